//! Business hooks injected into the publisher.
//!
//! The engine never looks inside host records. Everything it needs to know
//! about them (identity, key, whether they are published, what their view
//! looks like) comes through [`PublishRules`], supplied at construction time.

use crate::error::RuleError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Describes how a collection is published.
///
/// A change to any field changes the fingerprint, which makes the reindexer
/// rebuild the collection's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishSettings {
    /// Host entity the collection is drawn from.
    pub source_entity: String,
    /// Attribute holding the published key.
    pub key_attribute: String,
    /// Description of the constraint selecting published records.
    pub constraint: String,
    /// Description of the view shape (fields, version).
    pub view_shape: String,
}

impl PublishSettings {
    /// Creates settings with an empty constraint and view shape.
    pub fn new(source_entity: impl Into<String>, key_attribute: impl Into<String>) -> Self {
        Self {
            source_entity: source_entity.into(),
            key_attribute: key_attribute.into(),
            constraint: String::new(),
            view_shape: String::new(),
        }
    }

    /// Sets the constraint description.
    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = constraint.into();
        self
    }

    /// Sets the view shape description.
    pub fn with_view_shape(mut self, view_shape: impl Into<String>) -> Self {
        self.view_shape = view_shape.into();
        self
    }

    /// Returns the sha-256 fingerprint of these settings (lowercase hex).
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            &self.source_entity,
            &self.key_attribute,
            &self.constraint,
            &self.view_shape,
        ] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Host-supplied capabilities the publisher and reindexer depend on.
///
/// All hooks may fail; the publisher logs the failure and drops the change.
pub trait PublishRules: Send + Sync {
    /// Host record type.
    type Record: Send + Sync;

    /// Returns the host identifier of a record (used by the constraint).
    fn record_id(&self, record: &Self::Record) -> String;

    /// Returns the published key (the key attribute), if the record has one.
    fn key_of(&self, record: &Self::Record) -> Option<String>;

    /// Evaluates the publish constraint for a record id.
    fn matches(&self, id: &str) -> Result<bool, RuleError>;

    /// Converts a record into its published view.
    fn to_view(&self, record: &Self::Record) -> Result<Value, RuleError>;

    /// Serializes a view. The etag is computed over these bytes.
    fn serialize(&self, view: &Value) -> Result<Vec<u8>, RuleError> {
        serde_json::to_vec(view).map_err(|e| RuleError::new("serialize", e.to_string()))
    }

    /// Returns the current publish settings.
    fn settings(&self) -> PublishSettings;

    /// Feeds every record currently matching the constraint to `sink`, in
    /// batches of at most `batch_size`.
    ///
    /// Used by the reindexer. An error from `sink` must be returned as is.
    fn for_each_matching(
        &self,
        batch_size: usize,
        sink: &mut dyn FnMut(Vec<Self::Record>) -> crate::error::CoreResult<()>,
    ) -> crate::error::CoreResult<()>;
}
