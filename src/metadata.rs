//! Metadata record carried in the first segment of every frame.
//!
//! On the wire the record is a flat JSON object. Keys the protocol knows about are
//! listed in [`crate::protocol::keys`]; anything else a peer sends is kept as-is.

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::checksum::sha256_hex;
use crate::protocol::{keys, MAX_METADATA_LEN};

/// Errors raised while parsing a metadata segment
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("metadata is not valid UTF-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),

    #[error("metadata is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("metadata must be a JSON object")]
    NotAnObject,

    #[error("metadata key {0:?} holds a nested value")]
    NestedValue(String),

    #[error("metadata segment of {0} bytes exceeds maximum {max}", max = MAX_METADATA_LEN)]
    TooLarge(usize),
}

/// Flat string-keyed record describing one transfer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style insert
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Insert `key` only when the record does not carry it yet
    pub fn insert_if_absent(&mut self, key: &str, value: impl Into<Value>) -> bool {
        if self.0.contains_key(key) {
            return false;
        }
        self.insert(key, value);
        true
    }

    /// String value for `key`; scalars other than strings are not coerced
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn file_name(&self) -> Option<&str> {
        self.get_str(keys::FILE_NAME)
    }

    pub fn sha256(&self) -> Option<&str> {
        self.get_str(keys::SHA256)
    }

    pub fn blob_name(&self) -> Option<&str> {
        self.get_str(keys::BLOB_NAME)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.0)
    }

    /// Serialize for the wire, holding the record to the same rules
    /// [`Metadata::from_json_bytes`] applies on the way in
    pub fn to_wire_bytes(&self) -> Result<Vec<u8>, MetadataError> {
        if let Some(key) = first_nested(self.iter()) {
            return Err(MetadataError::NestedValue(key.clone()));
        }
        let bytes = self.to_json_bytes()?;
        if bytes.len() > MAX_METADATA_LEN {
            return Err(MetadataError::TooLarge(bytes.len()));
        }
        Ok(bytes)
    }

    /// Parse a metadata segment, rejecting anything that is not a flat object
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, MetadataError> {
        let text = std::str::from_utf8(bytes)?;
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(map) = value else {
            return Err(MetadataError::NotAnObject);
        };
        if let Some(key) = first_nested(map.iter()) {
            return Err(MetadataError::NestedValue(key.clone()));
        }
        Ok(Self(map))
    }
}

fn first_nested<'a>(
    mut entries: impl Iterator<Item = (&'a String, &'a Value)>,
) -> Option<&'a String> {
    entries
        .find(|(_, v)| matches!(v, Value::Array(_) | Value::Object(_)))
        .map(|(k, _)| k)
}

impl From<Map<String, Value>> for Metadata {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// The record a transmitter builds for one file right before sending it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRecord {
    pub blob_name: String,
    pub datetime: String,
    pub file_name: String,
    pub sha256: String,
    pub uuid: String,
}

impl BlobRecord {
    /// Build the record for `payload`. The digest covers exactly these bytes.
    pub fn for_payload(file_name: &str, payload: &[u8]) -> Self {
        let uuid = Uuid::new_v4().to_string();
        let now = Local::now();
        let blob_name = format!("{}_{}_{}", file_name, uuid, now.format("%Y%m%d%H%M%S"));
        Self {
            blob_name,
            datetime: now.format("%Y-%m-%dT%H:%M:%S").to_string(),
            file_name: file_name.to_string(),
            sha256: sha256_hex(payload),
            uuid,
        }
    }

    pub fn into_metadata(self) -> Metadata {
        Metadata::new()
            .with(keys::BLOB_NAME, self.blob_name)
            .with(keys::DATETIME, self.datetime)
            .with(keys::FILE_NAME, self.file_name)
            .with(keys::SHA256, self.sha256)
            .with(keys::UUID, self.uuid)
    }
}
