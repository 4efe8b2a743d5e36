//! The unit of storage and its JSON codec.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::storage::{RepositoryError, Result};

/// A value with a stable, caller-assigned string identifier.
///
/// Identity within one repository is defined solely by [`Record::id`]. The
/// serde bounds let every backend encode the record as JSON text.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The record's identifier. Must be non-blank.
    fn id(&self) -> &str;
}

/// Key/value record backing the built-in `meta` repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaRecord {
    pub key: String,
    pub value: String,
}

impl MetaRecord {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Record for MetaRecord {
    fn id(&self) -> &str {
        &self.key
    }
}

/// Trims an id and rejects blank ones.
pub fn normalize_id(id: &str) -> Result<&str> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(RepositoryError::InvalidData("record id is blank".to_string()));
    }
    Ok(trimmed)
}

/// Encodes a record as pretty-printed JSON text.
pub fn encode_record<T: Record>(record: &T) -> Result<String> {
    serde_json::to_string_pretty(record).map_err(|e| RepositoryError::Serialization(e.to_string()))
}

/// Decodes a record from JSON bytes.
pub fn decode_record<T: Record>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| RepositoryError::Serialization(e.to_string()))
}
