//! The schema descriptor: database-agnostic table definitions that
//! adapters and the migration generator translate into native schemas.
//!
//! Field attributes carry everything the engine needs to know about a
//! column: type, required/unique, foreign-key reference, default value,
//! whether the API accepts it as input and returns it in public views,
//! and whether it is sortable.

mod migration;

pub use migration::{generate_migrations, SqlDialect};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Logical field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Json,
}

/// Action on delete for a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OnDelete {
    Cascade,
    SetNull,
    Restrict,
    NoAction,
}

impl OnDelete {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::Restrict => "RESTRICT",
            Self::NoAction => "NO ACTION",
        }
    }
}

/// A foreign-key descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldReference {
    pub model: String,
    pub field: String,
    pub on_delete: OnDelete,
}

/// One field of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references: Option<FieldReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Whether the API accepts this field from request bodies.
    #[serde(default = "default_true")]
    pub input: bool,
    /// Whether the field is emitted in public views.
    #[serde(default = "default_true")]
    pub returned: bool,
    #[serde(default)]
    pub sortable: bool,
}

fn default_true() -> bool {
    true
}

impl SchemaField {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
            unique: false,
            references: None,
            default_value: None,
            input: true,
            returned: true,
            sortable: false,
        }
    }

    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            required: false,
            ..Self::new(name, field_type)
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn references(
        mut self,
        model: impl Into<String>,
        field: impl Into<String>,
        on_delete: OnDelete,
    ) -> Self {
        self.references = Some(FieldReference {
            model: model.into(),
            field: field.into(),
            on_delete,
        });
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Never accepted from request bodies (server-managed).
    pub fn no_input(mut self) -> Self {
        self.input = false;
        self
    }

    /// Never emitted in public views (secret material).
    pub fn hidden(mut self) -> Self {
        self.returned = false;
        self
    }

    pub fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }
}

/// A table definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub fields: Vec<SchemaField>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: SchemaField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Standard `id` primary key every table opens with.
    fn with_id(name: impl Into<String>) -> Self {
        Self::new(name).field(SchemaField::new("id", FieldType::String).unique().no_input())
    }

    fn timestamps(self) -> Self {
        self.field(SchemaField::new("createdAt", FieldType::Date).no_input().sortable())
            .field(SchemaField::new("updatedAt", FieldType::Date).no_input().sortable())
    }
}

/// The merged schema of the core plus all registered plugins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub tables: Vec<TableDefinition>,
}

impl SchemaDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table, merging fields into an existing table of the same name
    /// (plugins extend core tables this way).
    pub fn add_table(&mut self, table: TableDefinition) {
        if let Some(existing) = self.tables.iter_mut().find(|t| t.name == table.name) {
            for field in table.fields {
                if existing.get_field(&field.name).is_none() {
                    existing.fields.push(field);
                }
            }
        } else {
            self.tables.push(table);
        }
    }

    pub fn get_table(&self, name: &str) -> Option<&TableDefinition> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// The core tables: user, session, account, verification.
pub fn core_schema() -> SchemaDefinition {
    let mut schema = SchemaDefinition::new();
    schema.add_table(user_table());
    schema.add_table(session_table());
    schema.add_table(account_table());
    schema.add_table(verification_table());
    schema
}

fn user_table() -> TableDefinition {
    TableDefinition::with_id("user")
        .field(SchemaField::new("email", FieldType::String).unique().sortable())
        .field(
            SchemaField::new("emailVerified", FieldType::Boolean)
                .default_value(Value::Bool(false))
                .no_input(),
        )
        .field(SchemaField::optional("name", FieldType::String).sortable())
        .field(SchemaField::optional("image", FieldType::String))
        .timestamps()
}

fn session_table() -> TableDefinition {
    TableDefinition::with_id("session")
        .field(SchemaField::new("token", FieldType::String).unique().no_input().hidden())
        .field(
            SchemaField::new("userId", FieldType::String)
                .references("user", "id", OnDelete::Cascade)
                .no_input(),
        )
        .field(SchemaField::new("expiresAt", FieldType::Date).no_input())
        .field(SchemaField::optional("ipAddress", FieldType::String).no_input())
        .field(SchemaField::optional("userAgent", FieldType::String).no_input())
        .timestamps()
}

fn account_table() -> TableDefinition {
    TableDefinition::with_id("account")
        .field(
            SchemaField::new("userId", FieldType::String)
                .references("user", "id", OnDelete::Cascade)
                .no_input(),
        )
        .field(SchemaField::new("providerId", FieldType::String).no_input())
        .field(SchemaField::new("accountId", FieldType::String).no_input())
        .field(SchemaField::optional("password", FieldType::String).no_input().hidden())
        .field(SchemaField::optional("accessToken", FieldType::String).no_input().hidden())
        .field(SchemaField::optional("refreshToken", FieldType::String).no_input().hidden())
        .field(SchemaField::optional("idToken", FieldType::String).no_input().hidden())
        .field(SchemaField::optional("accessTokenExpiresAt", FieldType::Date).no_input())
        .field(SchemaField::optional("refreshTokenExpiresAt", FieldType::Date).no_input())
        .field(SchemaField::optional("scope", FieldType::String).no_input())
        .timestamps()
}

fn verification_table() -> TableDefinition {
    TableDefinition::with_id("verification")
        .field(SchemaField::new("identifier", FieldType::String).no_input())
        .field(SchemaField::new("value", FieldType::String).no_input().hidden())
        .field(SchemaField::new("expiresAt", FieldType::Date).no_input())
        .timestamps()
}
