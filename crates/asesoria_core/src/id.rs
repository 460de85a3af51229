//! Type-safe ID generation and management
//!
//! Every entity the engine manages is keyed by an `Id<T>`: a UUID tagged with a
//! marker type so a `LabelId` can never be passed where a `UserId` is expected.
//! The string form is `prefix_uuid`, and the prefix doubles as the SurrealDB
//! table name.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Display};
use std::marker::PhantomData;
use std::str::FromStr;
use surrealdb::RecordId;
use uuid::Uuid;

/// A type-safe ID with a consistent prefix and UUID
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T> {
    uuid: Uuid,
    _phantom: PhantomData<T>,
}

impl<T: IdType> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", T::PREFIX, self.uuid)
    }
}

/// Trait for types that can be used as ID markers
pub trait IdType: Send + Sync + 'static {
    /// The prefix for this ID type, also used as the table name
    const PREFIX: &'static str;
}

/// Errors that can occur when working with IDs
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum IdError {
    #[error("Invalid ID format: expected prefix '{expected}', got '{actual}'")]
    #[diagnostic(help("Ensure the ID starts with the correct prefix followed by an underscore"))]
    InvalidPrefix { expected: String, actual: String },

    #[error("Invalid UUID: {0}")]
    #[diagnostic(help("The UUID portion of the ID must be a valid UUID"))]
    InvalidUuid(#[from] uuid::Error),

    #[error("Invalid ID format: {0}")]
    #[diagnostic(help(
        "IDs must be in the format 'prefix_uuid' where prefix matches the expected type"
    ))]
    InvalidFormat(String),
}

impl<T: IdType> Id<T> {
    /// Create a new ID with a generated UUID
    pub fn generate() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    /// Create an ID from a specific UUID (useful for tests or migrations)
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self {
            uuid,
            _phantom: PhantomData,
        }
    }

    /// Parse an ID from its `prefix_uuid` string form
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let Some((prefix, uuid_str)) = s.rsplit_once('_') else {
            return Err(IdError::InvalidFormat(
                "ID must be in format 'prefix_uuid'".to_string(),
            ));
        };

        if prefix != T::PREFIX {
            return Err(IdError::InvalidPrefix {
                expected: T::PREFIX.to_string(),
                actual: prefix.to_string(),
            });
        }

        Ok(Self::from_uuid(Uuid::parse_str(uuid_str)?))
    }

    /// Rebuild an ID from a SurrealDB record id (`table:⟨uuid⟩`)
    pub fn from_record(record: &RecordId) -> Result<Self, IdError> {
        if record.table() != T::PREFIX {
            return Err(IdError::InvalidPrefix {
                expected: T::PREFIX.to_string(),
                actual: record.table().to_string(),
            });
        }
        let key = record.key().to_string();
        Ok(Self::from_uuid(Uuid::parse_str(strip_brackets(&key))?))
    }

    pub fn to_record_id(&self) -> RecordId {
        RecordId::from_table_key(T::PREFIX, self.uuid.to_string())
    }
}

/// Record keys render as `⟨uuid⟩` or `` `uuid` `` depending on the engine version
pub(crate) fn strip_brackets(s: &str) -> &str {
    s.trim_start_matches(['⟨', '`', '\''])
        .trim_end_matches(['⟩', '`', '\''])
}

impl<T: IdType> Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", T::PREFIX, self.uuid)
    }
}

impl<T: IdType> FromStr for Id<T> {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<T: IdType> From<Id<T>> for RecordId {
    fn from(id: Id<T>) -> Self {
        id.to_record_id()
    }
}

impl<T: IdType> From<&Id<T>> for RecordId {
    fn from(id: &Id<T>) -> Self {
        id.to_record_id()
    }
}

impl<T: IdType> Serialize for Id<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de, T: IdType> Deserialize<'de> for Id<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(IdVisitor(PhantomData))
    }
}

struct IdVisitor<T>(PhantomData<T>);

impl<'de, T: IdType> Visitor<'de> for IdVisitor<T> {
    type Value = Id<T>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "a string with the format '{}_UUID'", T::PREFIX)
    }

    fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Id::parse(s).map_err(de::Error::custom)
    }
}

/// Macro to define new ID types with minimal boilerplate
#[macro_export]
macro_rules! define_id_type {
    ($type_name:ident, $prefix:expr) => {
        /// Marker type for the ID
        #[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
        pub struct $type_name;

        impl $crate::id::IdType for $type_name {
            const PREFIX: &'static str = $prefix;
        }
    };
}

define_id_type!(UserIdType, "user");
define_id_type!(ConversationIdType, "convo");
define_id_type!(LabelIdType, "label");
define_id_type!(AssignmentIdType, "assignment");

/// Type alias for User IDs
pub type UserId = Id<UserIdType>;

/// Type alias for Conversation IDs
pub type ConversationId = Id<ConversationIdType>;

/// Type alias for Label IDs
pub type LabelId = Id<LabelIdType>;

/// Type alias for Label Assignment IDs
pub type AssignmentId = Id<AssignmentIdType>;
