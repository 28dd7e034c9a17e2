//! The database abstraction: a narrow CRUD contract every backend
//! implements, plus the where-clause model shared between them.
//!
//! Records travel as `serde_json::Value` objects keyed by logical field
//! names. Backends must never interpolate values into query text; SQL
//! implementations bind parameters.

mod factory;
mod internal;
mod where_clause;

pub use factory::{AdapterFactory, AdapterFactoryConfig, IdStrategy};
pub use internal::InternalAdapter;
pub use where_clause::matches_where;

use crate::error::AuthResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

/// Comparison operators for where clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    In,
    NotIn,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    StartsWith,
    EndsWith,
}

/// How a where entry combines with the accumulated truth value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connector {
    And,
    Or,
}

/// One entry of a where clause.
///
/// Evaluation is strictly left-to-right: the first entry seeds the truth
/// value, each subsequent entry combines via its connector. There is no
/// precedence rewriting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Where {
    pub field: String,
    pub value: Value,
    pub operator: Operator,
    pub connector: Connector,
}

impl Where {
    pub fn new(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            field: field.into(),
            value,
            operator,
            connector: Connector::And,
        }
    }

    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, Operator::Eq, value)
    }

    pub fn or(mut self) -> Self {
        self.connector = Connector::Or;
        self
    }
}

/// Sort directive for `find_many`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortBy {
    pub field: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// A join directive: attach matching rows of `model` under `as_field`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Join {
    /// The model to join in.
    pub model: String,
    /// Field on the base record.
    pub local_field: String,
    /// Field on the joined model compared for equality.
    pub foreign_field: String,
    /// Key the joined rows are attached under.
    pub as_field: String,
}

/// Arguments for `find_many`.
#[derive(Debug, Clone, Default)]
pub struct FindManyArgs {
    pub where_clause: Vec<Where>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub sort_by: Option<SortBy>,
    pub join: Vec<Join>,
}

/// Arguments for `find_one`.
#[derive(Debug, Clone, Default)]
pub struct FindOneArgs {
    pub where_clause: Vec<Where>,
    /// Optional projection; `None` returns the full record.
    pub select: Option<Vec<String>>,
    pub join: Vec<Join>,
}

impl FindOneArgs {
    pub fn by(where_clause: Vec<Where>) -> Self {
        Self {
            where_clause,
            ..Default::default()
        }
    }
}

/// Future returned by a transaction callback.
pub type TxFuture<'a> = Pin<Box<dyn Future<Output = AuthResult<Value>> + Send + 'a>>;

/// Boxed transaction callback. Receives a transactional view of the
/// adapter; a returned error rolls the transaction back where the backend
/// supports it.
pub type TxCallback = Box<dyn for<'a> FnOnce(&'a dyn DatabaseAdapter) -> TxFuture<'a> + Send>;

/// The narrow CRUD contract.
///
/// Implementations must make single-row consumption observable: `delete_many`
/// returns the number of rows removed so callers can enforce single-use
/// semantics with a count check.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Creates a record; returns it with its id resolved.
    async fn create(&self, model: &str, data: Value) -> AuthResult<Value>;

    /// Returns one matching record, or `None`.
    async fn find_one(&self, model: &str, args: FindOneArgs) -> AuthResult<Option<Value>>;

    /// Returns an ordered sequence of matching records.
    async fn find_many(&self, model: &str, args: FindManyArgs) -> AuthResult<Vec<Value>>;

    /// Counts matching records.
    async fn count(&self, model: &str, where_clause: &[Where]) -> AuthResult<u64>;

    /// Updates the first matching record; returns it, or `None` when nothing
    /// matched.
    async fn update(
        &self,
        model: &str,
        where_clause: &[Where],
        update: Value,
    ) -> AuthResult<Option<Value>>;

    /// Updates all matching records; returns the count affected.
    async fn update_many(
        &self,
        model: &str,
        where_clause: &[Where],
        update: Value,
    ) -> AuthResult<u64>;

    /// Deletes the first matching record.
    async fn delete(&self, model: &str, where_clause: &[Where]) -> AuthResult<()>;

    /// Deletes all matching records; returns the count removed.
    async fn delete_many(&self, model: &str, where_clause: &[Where]) -> AuthResult<u64>;

    /// Runs `callback` with a transactional adapter. Backends without
    /// transaction support run the callback sequentially against `self`;
    /// that makes `transaction` a documented no-op there, not a rollback
    /// guarantee.
    async fn transaction(&self, callback: TxCallback) -> AuthResult<Value>;
}
