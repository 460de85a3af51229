//! SurrealQL schema definitions
//!
//! Tables are schemaless apart from the fields that carry an invariant. The
//! unique indexes are what make concurrent `upsert`/`assign` calls race to a
//! single row.

/// Schema definitions for the database
pub struct Schema;

impl Schema {
    /// Get all table definitions
    pub fn tables() -> Vec<TableDefinition> {
        vec![
            Self::schema_migration(),
            Self::users(),
            Self::conversations(),
            Self::labels(),
            Self::assignments(),
        ]
    }

    /// Version marker table
    pub fn schema_migration() -> TableDefinition {
        TableDefinition {
            name: "schema_migration",
            schema: r#"
                DEFINE TABLE IF NOT EXISTS schema_migration SCHEMALESS;
                DEFINE FIELD IF NOT EXISTS version ON schema_migration TYPE int;
            "#,
            indexes: vec![
                "DEFINE INDEX IF NOT EXISTS schema_migration_version ON schema_migration FIELDS version UNIQUE",
            ],
        }
    }

    /// Users table
    pub fn users() -> TableDefinition {
        TableDefinition {
            name: "user",
            schema: r#"
                DEFINE TABLE IF NOT EXISTS user SCHEMALESS;
                DEFINE FIELD IF NOT EXISTS business_id ON user TYPE string;
                DEFINE FIELD IF NOT EXISTS is_active ON user TYPE bool DEFAULT true;
            "#,
            indexes: vec![
                "DEFINE INDEX IF NOT EXISTS user_business_id ON user FIELDS business_id UNIQUE",
                "DEFINE INDEX IF NOT EXISTS user_role ON user FIELDS role",
            ],
        }
    }

    /// Conversations table
    pub fn conversations() -> TableDefinition {
        TableDefinition {
            name: "convo",
            schema: r#"
                DEFINE TABLE IF NOT EXISTS convo SCHEMALESS;
                DEFINE FIELD IF NOT EXISTS kind ON convo TYPE string ASSERT $value INSIDE ['direct', 'group'];
            "#,
            indexes: vec![],
        }
    }

    /// Label catalog
    pub fn labels() -> TableDefinition {
        TableDefinition {
            name: "label",
            schema: r#"
                DEFINE TABLE IF NOT EXISTS label SCHEMALESS;
                DEFINE FIELD IF NOT EXISTS name ON label TYPE string ASSERT string::len($value) > 0;
            "#,
            indexes: vec!["DEFINE INDEX IF NOT EXISTS label_name ON label FIELDS name UNIQUE"],
        }
    }

    /// Conversation/label join
    pub fn assignments() -> TableDefinition {
        TableDefinition {
            name: "assignment",
            schema: r#"
                DEFINE TABLE IF NOT EXISTS assignment SCHEMALESS;
            "#,
            indexes: vec![
                "DEFINE INDEX IF NOT EXISTS assignment_pair ON assignment FIELDS conversation_id, label_id UNIQUE",
                "DEFINE INDEX IF NOT EXISTS assignment_label ON assignment FIELDS label_id",
                "DEFINE INDEX IF NOT EXISTS assignment_assigner ON assignment FIELDS assigned_by",
            ],
        }
    }

    /// Restrict stored roles to the three tiers. Applied after legacy rows
    /// have been reclassified.
    pub fn role_enum() -> &'static str {
        "DEFINE FIELD OVERWRITE role ON user ASSERT $value = NONE OR $value = NULL OR $value INSIDE ['usuario', 'asesor', 'consultor']"
    }

    /// Every statement needed to create the base tables, in order
    pub fn statements() -> Vec<&'static str> {
        Self::tables()
            .into_iter()
            .flat_map(|t| std::iter::once(t.schema).chain(t.indexes))
            .collect()
    }
}

/// Table definition with schema and indexes
#[derive(Debug, Clone)]
pub struct TableDefinition {
    pub name: &'static str,
    pub schema: &'static str,
    pub indexes: Vec<&'static str>,
}
