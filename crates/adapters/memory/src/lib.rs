//! # Better Auth Memory Adapter
//!
//! An in-memory implementation of the generic database contract,
//! intended for testing and development. Data is lost when the process
//! exits.
//!
//! Where clauses are evaluated with the engine's shared structural
//! matcher, so operator semantics here are exactly the contract's.
//! Transactions run the callback sequentially against the same store:
//! rollback is not supported, which the contract documents for backends
//! without native transactions.

use async_trait::async_trait;
use better_auth_core::db::{
    matches_where, DatabaseAdapter, FindManyArgs, FindOneArgs, Join, SortBy, SortDirection,
    TxCallback, Where,
};
use better_auth_core::error::AuthResult;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Rows of one model.
type Table = Vec<Value>;

/// In-memory database adapter.
#[derive(Default, Clone)]
pub struct MemoryAdapter {
    tables: Arc<RwLock<HashMap<String, Table>>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every row of every model.
    pub async fn clear(&self) {
        self.tables.write().await.clear();
    }

    /// Number of rows currently stored for `model`.
    pub async fn len(&self, model: &str) -> usize {
        self.tables
            .read()
            .await
            .get(model)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub async fn is_empty(&self, model: &str) -> bool {
        self.len(model).await == 0
    }

    async fn attach_joins(&self, record: &mut Value, joins: &[Join]) {
        if joins.is_empty() {
            return;
        }
        let tables = self.tables.read().await;
        for join in joins {
            let local = record.get(&join.local_field).cloned().unwrap_or(Value::Null);
            let matches: Vec<Value> = tables
                .get(&join.model)
                .map(|rows| {
                    rows.iter()
                        .filter(|r| r.get(&join.foreign_field) == Some(&local))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            if let Value::Object(map) = record {
                map.insert(join.as_field.clone(), Value::Array(matches));
            }
        }
    }
}

fn compare_records(a: &Value, b: &Value, sort: &SortBy) -> Ordering {
    let left = a.get(&sort.field).unwrap_or(&Value::Null);
    let right = b.get(&sort.field).unwrap_or(&Value::Null);
    let ordering = match (left, right) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => Ordering::Equal,
    };
    match sort.direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}

fn merge_update(target: &mut Value, update: &Value) {
    if let (Value::Object(target), Value::Object(patch)) = (target, update) {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    }
}

#[async_trait]
impl DatabaseAdapter for MemoryAdapter {
    async fn create(&self, model: &str, data: Value) -> AuthResult<Value> {
        let mut tables = self.tables.write().await;
        tables.entry(model.to_string()).or_default().push(data.clone());
        Ok(data)
    }

    async fn find_one(&self, model: &str, args: FindOneArgs) -> AuthResult<Option<Value>> {
        let found = {
            let tables = self.tables.read().await;
            tables
                .get(model)
                .and_then(|rows| rows.iter().find(|r| matches_where(r, &args.where_clause)))
                .cloned()
        };
        let Some(mut record) = found else {
            return Ok(None);
        };
        self.attach_joins(&mut record, &args.join).await;
        if let Some(select) = &args.select {
            if let Value::Object(map) = &record {
                let projected: serde_json::Map<String, Value> = map
                    .iter()
                    .filter(|(k, _)| select.contains(k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                return Ok(Some(Value::Object(projected)));
            }
        }
        Ok(Some(record))
    }

    async fn find_many(&self, model: &str, args: FindManyArgs) -> AuthResult<Vec<Value>> {
        let mut rows: Vec<Value> = {
            let tables = self.tables.read().await;
            tables
                .get(model)
                .map(|rows| {
                    rows.iter()
                        .filter(|r| matches_where(r, &args.where_clause))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };
        if let Some(sort) = &args.sort_by {
            rows.sort_by(|a, b| compare_records(a, b, sort));
        }
        let offset = args.offset.unwrap_or(0) as usize;
        if offset > 0 {
            rows = rows.into_iter().skip(offset).collect();
        }
        if let Some(limit) = args.limit {
            rows.truncate(limit as usize);
        }
        for record in &mut rows {
            self.attach_joins(record, &args.join).await;
        }
        Ok(rows)
    }

    async fn count(&self, model: &str, where_clause: &[Where]) -> AuthResult<u64> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(model)
            .map(|rows| rows.iter().filter(|r| matches_where(r, where_clause)).count())
            .unwrap_or(0) as u64)
    }

    async fn update(
        &self,
        model: &str,
        where_clause: &[Where],
        update: Value,
    ) -> AuthResult<Option<Value>> {
        let mut tables = self.tables.write().await;
        let Some(rows) = tables.get_mut(model) else {
            return Ok(None);
        };
        for row in rows.iter_mut() {
            if matches_where(row, where_clause) {
                merge_update(row, &update);
                return Ok(Some(row.clone()));
            }
        }
        Ok(None)
    }

    async fn update_many(
        &self,
        model: &str,
        where_clause: &[Where],
        update: Value,
    ) -> AuthResult<u64> {
        let mut tables = self.tables.write().await;
        let Some(rows) = tables.get_mut(model) else {
            return Ok(0);
        };
        let mut affected = 0;
        for row in rows.iter_mut() {
            if matches_where(row, where_clause) {
                merge_update(row, &update);
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn delete(&self, model: &str, where_clause: &[Where]) -> AuthResult<()> {
        let mut tables = self.tables.write().await;
        if let Some(rows) = tables.get_mut(model) {
            if let Some(position) = rows.iter().position(|r| matches_where(r, where_clause)) {
                rows.remove(position);
            }
        }
        Ok(())
    }

    async fn delete_many(&self, model: &str, where_clause: &[Where]) -> AuthResult<u64> {
        let mut tables = self.tables.write().await;
        let Some(rows) = tables.get_mut(model) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| !matches_where(r, where_clause));
        Ok((before - rows.len()) as u64)
    }

    async fn transaction(&self, callback: TxCallback) -> AuthResult<Value> {
        // No rollback: operations apply as they run.
        callback(self).await
    }
}
