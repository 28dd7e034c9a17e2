//! The adapter factory: wraps a raw backend with id generation, logical →
//! physical field-name mapping, and per-field value transforms driven by
//! the schema (booleans as 0/1 for SQLite-class stores, dates as ISO
//! strings).

use super::{DatabaseAdapter, FindManyArgs, FindOneArgs, TxCallback, Where};
use crate::crypto;
use crate::error::AuthResult;
use crate::schema::{FieldType, SchemaDefinition};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// How record ids are produced when the caller does not supply one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdStrategy {
    /// 32-byte random base64url string.
    #[default]
    Random,
    /// Numeric auto-increment (stringified), for backends that want it.
    Increment,
}

/// Configuration for [`AdapterFactory`].
#[derive(Debug, Clone, Default)]
pub struct AdapterFactoryConfig {
    pub id_strategy: IdStrategy,
    /// Store booleans as 0/1 (SQLite-class backends).
    pub booleans_as_integers: bool,
    /// Per-model logical → physical field names (e.g. `id` → `_id`).
    pub field_map: HashMap<String, HashMap<String, String>>,
}

/// Wraps a raw backend, applying transforms on the way in and reversing
/// them on the way out.
pub struct AdapterFactory {
    inner: Arc<dyn DatabaseAdapter>,
    config: AdapterFactoryConfig,
    schema: Arc<SchemaDefinition>,
    counters: Mutex<HashMap<String, u64>>,
}

impl AdapterFactory {
    pub fn new(
        inner: Arc<dyn DatabaseAdapter>,
        config: AdapterFactoryConfig,
        schema: Arc<SchemaDefinition>,
    ) -> Self {
        Self {
            inner,
            config,
            schema,
            counters: Mutex::new(HashMap::new()),
        }
    }

    fn physical_name(&self, model: &str, field: &str) -> String {
        self.config
            .field_map
            .get(model)
            .and_then(|m| m.get(field))
            .cloned()
            .unwrap_or_else(|| field.to_string())
    }

    fn logical_name(&self, model: &str, physical: &str) -> String {
        if let Some(map) = self.config.field_map.get(model) {
            for (logical, phys) in map {
                if phys == physical {
                    return logical.clone();
                }
            }
        }
        physical.to_string()
    }

    fn field_type(&self, model: &str, field: &str) -> Option<FieldType> {
        self.schema
            .get_table(model)
            .and_then(|t| t.get_field(field))
            .map(|f| f.field_type)
    }

    fn next_id(&self, model: &str) -> String {
        match self.config.id_strategy {
            IdStrategy::Random => crypto::generate_token(),
            IdStrategy::Increment => {
                let mut counters = self.counters.lock().expect("id counter poisoned");
                let counter = counters.entry(model.to_string()).or_insert(0);
                *counter += 1;
                counter.to_string()
            }
        }
    }

    fn transform_value_in(&self, model: &str, field: &str, value: Value) -> Value {
        if self.config.booleans_as_integers
            && self.field_type(model, field) == Some(FieldType::Boolean)
        {
            if let Value::Bool(b) = value {
                return Value::from(if b { 1 } else { 0 });
            }
        }
        value
    }

    fn transform_value_out(&self, model: &str, field: &str, value: Value) -> Value {
        if self.config.booleans_as_integers
            && self.field_type(model, field) == Some(FieldType::Boolean)
        {
            if let Some(n) = value.as_i64() {
                return Value::Bool(n != 0);
            }
        }
        value
    }

    fn transform_data_in(&self, model: &str, data: Value) -> Value {
        let Value::Object(map) = data else { return data };
        let mut out = serde_json::Map::with_capacity(map.len());
        for (field, value) in map {
            let value = self.transform_value_in(model, &field, value);
            out.insert(self.physical_name(model, &field), value);
        }
        Value::Object(out)
    }

    fn transform_record_out(&self, model: &str, record: Value) -> Value {
        let Value::Object(map) = record else { return record };
        let mut out = serde_json::Map::with_capacity(map.len());
        for (physical, value) in map {
            let field = self.logical_name(model, &physical);
            let value = self.transform_value_out(model, &field, value);
            out.insert(field, value);
        }
        Value::Object(out)
    }

    fn transform_where_in(&self, model: &str, where_clause: &[Where]) -> Vec<Where> {
        where_clause
            .iter()
            .map(|w| {
                let mut w = w.clone();
                w.value = self.transform_value_in(model, &w.field, w.value);
                w.field = self.physical_name(model, &w.field);
                w
            })
            .collect()
    }
}

#[async_trait]
impl DatabaseAdapter for AdapterFactory {
    async fn create(&self, model: &str, mut data: Value) -> AuthResult<Value> {
        if data.get("id").map(Value::is_null).unwrap_or(true) {
            if let Value::Object(map) = &mut data {
                map.insert("id".to_string(), Value::String(self.next_id(model)));
            }
        }
        let data = self.transform_data_in(model, data);
        let created = self.inner.create(model, data).await?;
        Ok(self.transform_record_out(model, created))
    }

    async fn find_one(&self, model: &str, mut args: FindOneArgs) -> AuthResult<Option<Value>> {
        args.where_clause = self.transform_where_in(model, &args.where_clause);
        if let Some(select) = &mut args.select {
            for field in select.iter_mut() {
                *field = self.physical_name(model, field);
            }
        }
        let found = self.inner.find_one(model, args).await?;
        Ok(found.map(|r| self.transform_record_out(model, r)))
    }

    async fn find_many(&self, model: &str, mut args: FindManyArgs) -> AuthResult<Vec<Value>> {
        args.where_clause = self.transform_where_in(model, &args.where_clause);
        if let Some(sort) = &mut args.sort_by {
            sort.field = self.physical_name(model, &sort.field);
        }
        let found = self.inner.find_many(model, args).await?;
        Ok(found
            .into_iter()
            .map(|r| self.transform_record_out(model, r))
            .collect())
    }

    async fn count(&self, model: &str, where_clause: &[Where]) -> AuthResult<u64> {
        let where_clause = self.transform_where_in(model, where_clause);
        self.inner.count(model, &where_clause).await
    }

    async fn update(
        &self,
        model: &str,
        where_clause: &[Where],
        update: Value,
    ) -> AuthResult<Option<Value>> {
        let where_clause = self.transform_where_in(model, where_clause);
        let update = self.transform_data_in(model, update);
        let updated = self.inner.update(model, &where_clause, update).await?;
        Ok(updated.map(|r| self.transform_record_out(model, r)))
    }

    async fn update_many(
        &self,
        model: &str,
        where_clause: &[Where],
        update: Value,
    ) -> AuthResult<u64> {
        let where_clause = self.transform_where_in(model, where_clause);
        let update = self.transform_data_in(model, update);
        self.inner.update_many(model, &where_clause, update).await
    }

    async fn delete(&self, model: &str, where_clause: &[Where]) -> AuthResult<()> {
        let where_clause = self.transform_where_in(model, where_clause);
        self.inner.delete(model, &where_clause).await
    }

    async fn delete_many(&self, model: &str, where_clause: &[Where]) -> AuthResult<u64> {
        let where_clause = self.transform_where_in(model, where_clause);
        self.inner.delete_many(model, &where_clause).await
    }

    async fn transaction(&self, callback: TxCallback) -> AuthResult<Value> {
        // Transforms must see the factory view, so the callback runs against
        // `self`; rollback support stays with backends that implement it on
        // their own transaction path.
        callback(self).await
    }
}
