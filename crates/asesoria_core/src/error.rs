use miette::Diagnostic;
use std::time::Duration;
use thiserror::Error;

use crate::{db::DatabaseError, permission::DenialReason};

/// Coarse classification callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    Conflict,
    Unavailable,
    InvalidInput,
    Storage,
    Configuration,
}

#[derive(Error, Diagnostic, Debug)]
pub enum CoreError {
    #[error("{entity} not found: {id}")]
    #[diagnostic(
        code(asesoria_core::not_found),
        help("Check that the {entity} exists and has not been deactivated")
    )]
    NotFound { entity: &'static str, id: String },

    #[error("Permission denied: {reason}")]
    #[diagnostic(
        code(asesoria_core::permission_denied),
        help("Rule '{rule}' rejected the request from {actor}")
    )]
    PermissionDenied {
        actor: String,
        rule: &'static str,
        reason: DenialReason,
    },

    #[error("Conflict on {entity}: {message}")]
    #[diagnostic(
        code(asesoria_core::conflict),
        help("The value is already in use; pick another or update the existing record")
    )]
    Conflict {
        entity: &'static str,
        message: String,
    },

    #[error("Store unavailable during {operation}")]
    #[diagnostic(
        code(asesoria_core::unavailable),
        help("The durable store could not be reached in time; the request can be retried")
    )]
    Unavailable {
        operation: String,
        #[source]
        cause: DatabaseError,
    },

    #[error("Invalid input: {message}")]
    #[diagnostic(code(asesoria_core::invalid_input), help("Field: {field}"))]
    InvalidInput { field: &'static str, message: String },

    #[error("Storage error")]
    #[diagnostic(
        code(asesoria_core::storage_error),
        help("The store rejected the operation; check the schema version and logs")
    )]
    Storage {
        #[source]
        cause: DatabaseError,
    },

    #[error("Configuration error")]
    #[diagnostic(
        code(asesoria_core::configuration_error),
        help("Check configuration file at {config_path}")
    )]
    ConfigurationError {
        config_path: String,
        field: String,
        expected: String,
        #[source]
        cause: ConfigError,
    },
}

/// Underlying failure while reading or writing configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("TOML parse error: {0}")]
    TomlParse(String),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(String),
    #[error("Invalid value: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl From<DatabaseError> for CoreError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Timeout { operation, .. } => Self::Unavailable {
                operation: operation.to_string(),
                cause: err,
            },
            DatabaseError::ConnectionFailed(_) => Self::Unavailable {
                operation: "connect".to_string(),
                cause: err,
            },
            DatabaseError::WriteConflict(_) => Self::Unavailable {
                operation: "commit".to_string(),
                cause: err,
            },
            DatabaseError::UniqueViolation { table, ref value, .. } => Self::Conflict {
                entity: table,
                message: format!("'{}' is already taken", value),
            },
            DatabaseError::QueryFailed(_)
            | DatabaseError::InvalidRecord { .. }
            | DatabaseError::Other(_) => Self::Storage { cause: err },
        }
    }
}

// Helper functions for creating common errors with context
impl CoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn denied(actor: impl ToString, reason: DenialReason) -> Self {
        Self::PermissionDenied {
            actor: actor.to_string(),
            rule: reason.rule(),
            reason,
        }
    }

    pub fn conflict(entity: &'static str, message: impl Into<String>) -> Self {
        Self::Conflict {
            entity,
            message: message.into(),
        }
    }

    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            message: message.into(),
        }
    }

    pub fn timed_out(operation: &'static str, after: Duration) -> Self {
        DatabaseError::Timeout { operation, after }.into()
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound { .. } => ErrorKind::NotFound,
            CoreError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            CoreError::Conflict { .. } => ErrorKind::Conflict,
            CoreError::Unavailable { .. } => ErrorKind::Unavailable,
            CoreError::InvalidInput { .. } => ErrorKind::InvalidInput,
            CoreError::Storage { .. } => ErrorKind::Storage,
            CoreError::ConfigurationError { .. } => ErrorKind::Configuration,
        }
    }

    /// Only an unreachable store or a lost write race is worth retrying
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Unavailable
    }

    /// The violated rule, if this is a permission denial
    pub fn denial(&self) -> Option<&DenialReason> {
        match self {
            CoreError::PermissionDenied { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::Role;
    use miette::Report;

    #[test]
    fn test_permission_denied_report_names_rule() {
        let error = CoreError::denied(
            "user_123",
            DenialReason::GroupRequiresConsultor {
                initiator: Role::Usuario,
            },
        );
        let output = format!("{:?}", Report::new(error));
        assert!(output.contains("permission_denied"));
        assert!(output.contains("group_requires_consultor"));
        assert!(output.contains("usuario cannot create group conversations"));
    }

    #[test]
    fn test_timeout_maps_to_unavailable() {
        let error = CoreError::timed_out("get_user", Duration::from_millis(10));
        assert_eq!(error.kind(), ErrorKind::Unavailable);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_unique_violation_maps_to_conflict() {
        let error: CoreError = DatabaseError::UniqueViolation {
            table: "label",
            index: "label_name",
            value: "Urgente".to_string(),
        }
        .into();
        assert_eq!(error.kind(), ErrorKind::Conflict);
        assert!(!error.is_retryable());
        assert!(error.to_string().contains("Urgente"));
    }

    #[test]
    fn test_transport_failures_are_retryable() {
        let lost_connection: CoreError = DatabaseError::ConnectionFailed(surrealdb::Error::Api(
            surrealdb::error::Api::ConnectionUninitialised,
        ))
        .into();
        assert_eq!(lost_connection.kind(), ErrorKind::Unavailable);
        assert!(lost_connection.is_retryable());

        let conflict: CoreError = DatabaseError::WriteConflict(surrealdb::Error::Db(
            surrealdb::error::Db::TxRetryable,
        ))
        .into();
        assert_eq!(conflict.kind(), ErrorKind::Unavailable);
        assert!(conflict.is_retryable());
    }

    #[test]
    fn test_not_found_is_not_retryable() {
        let error = CoreError::not_found("user", "user_x");
        assert_eq!(error.kind(), ErrorKind::NotFound);
        assert!(!error.is_retryable());
        assert!(error.denial().is_none());
    }
}
