//! Publish rules over plain JSON objects.
//!
//! The records of a collection live in memory, keyed by the value of a key
//! field. Fields whose name starts with `_` are control fields and are left
//! out of the published view.

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use syncfeed_core::{CoreResult, PublishRules, PublishSettings, RuleError};

/// Control field marking a record read from input as deleted.
pub const DELETED_FIELD: &str = "_deleted";

/// Rules for collections of JSON objects.
#[derive(Debug)]
pub struct JsonRecordRules {
    collection: String,
    key_field: String,
    filter: Option<String>,
    records: RwLock<BTreeMap<String, Value>>,
}

impl JsonRecordRules {
    /// Creates rules publishing every record of `collection` under the value
    /// of `key_field`.
    pub fn new(collection: impl Into<String>, key_field: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            key_field: key_field.into(),
            filter: None,
            records: RwLock::new(BTreeMap::new()),
        }
    }

    /// Publishes only records whose `field` is `true`.
    pub fn with_filter(mut self, field: impl Into<String>) -> Self {
        self.filter = Some(field.into());
        self
    }

    /// Returns the key of a record, if it has a string or integer key field.
    pub fn key_for(&self, record: &Value) -> Option<String> {
        match record.get(&self.key_field)? {
            Value::String(key) => Some(key.clone()),
            Value::Number(n) if n.is_u64() || n.is_i64() => Some(n.to_string()),
            _ => None,
        }
    }

    /// Stores a record, replacing any record with the same key.
    ///
    /// Returns the key, or `None` if the record has no usable key.
    pub fn upsert(&self, record: Value) -> Option<String> {
        let key = self.key_for(&record)?;
        self.records.write().insert(key.clone(), record);
        Some(key)
    }

    /// Removes a record by key.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.records.write().remove(key)
    }

    /// Returns the number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no records are stored.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn passes_filter(&self, record: &Value) -> bool {
        match &self.filter {
            Some(field) => record.get(field).and_then(Value::as_bool).unwrap_or(false),
            None => true,
        }
    }
}

/// Returns true if a record read from input marks a deletion.
pub fn is_deletion(record: &Value) -> bool {
    record
        .get(DELETED_FIELD)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

impl PublishRules for JsonRecordRules {
    type Record = Value;

    fn record_id(&self, record: &Value) -> String {
        self.key_for(record).unwrap_or_default()
    }

    fn key_of(&self, record: &Value) -> Option<String> {
        self.key_for(record)
    }

    fn matches(&self, id: &str) -> Result<bool, RuleError> {
        Ok(self
            .records
            .read()
            .get(id)
            .is_some_and(|record| self.passes_filter(record)))
    }

    fn to_view(&self, record: &Value) -> Result<Value, RuleError> {
        let Value::Object(fields) = record else {
            return Err(RuleError::new("view", "record is not a JSON object"));
        };
        let view: Map<String, Value> = fields
            .iter()
            .filter(|(name, _)| !name.starts_with('_'))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Ok(Value::Object(view))
    }

    fn settings(&self) -> PublishSettings {
        let constraint = match &self.filter {
            Some(field) => format!("{field} == true"),
            None => "all".to_string(),
        };
        PublishSettings::new(&self.collection, &self.key_field)
            .with_constraint(constraint)
            .with_view_shape("object-without-control-fields")
    }

    fn for_each_matching(
        &self,
        batch_size: usize,
        sink: &mut dyn FnMut(Vec<Value>) -> CoreResult<()>,
    ) -> CoreResult<()> {
        let records: Vec<Value> = self
            .records
            .read()
            .values()
            .filter(|record| self.passes_filter(record))
            .cloned()
            .collect();
        for chunk in records.chunks(batch_size.max(1)) {
            sink(chunk.to_vec())?;
        }
        Ok(())
    }
}
