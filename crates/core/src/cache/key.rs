//! Cache key identifying one context payload.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Error;

const MAX_RECORD_TYPE_LEN: usize = 64;
const MAX_RECORD_ID_LEN: usize = 256;

/// Identifies one cached context payload.
///
/// A key without a `record_id` names the aggregate "list" context for the
/// whole record type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub struct CacheKey {
    pub record_type: String,
    pub record_id: Option<String>,
}

impl CacheKey {
    /// Build and validate a key.
    pub fn new(record_type: impl Into<String>, record_id: Option<String>) -> Result<Self, Error> {
        let key = Self { record_type: record_type.into(), record_id };
        key.validate()?;
        Ok(key)
    }

    /// Key of a single record's context.
    pub fn record(record_type: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self { record_type: record_type.into(), record_id: Some(record_id.into()) }
    }

    /// Key of the aggregate context of a record type.
    pub fn aggregate(record_type: impl Into<String>) -> Self {
        Self { record_type: record_type.into(), record_id: None }
    }

    pub fn is_aggregate(&self) -> bool {
        self.record_id.is_none()
    }

    /// The aggregate key of this key's record type.
    pub fn to_aggregate(&self) -> Self {
        Self::aggregate(self.record_type.clone())
    }

    /// Check the key is storable.
    ///
    /// Record types are lowercase identifiers; record ids, when present,
    /// must be non-empty because the empty string is the stored form of the
    /// aggregate key.
    pub fn validate(&self) -> Result<(), Error> {
        validate_record_type(&self.record_type)?;

        if let Some(id) = &self.record_id {
            if id.is_empty() {
                return Err(Error::InvalidInput("record_id must not be empty".into()));
            }
            if id.len() > MAX_RECORD_ID_LEN {
                return Err(Error::InvalidInput(format!("record_id exceeds {MAX_RECORD_ID_LEN} bytes")));
            }
        }

        Ok(())
    }

    pub(crate) fn storage_id(&self) -> &str {
        self.record_id.as_deref().unwrap_or("")
    }

    pub(crate) fn from_storage(record_type: String, record_id: String) -> Self {
        let record_id = (!record_id.is_empty()).then_some(record_id);
        Self { record_type, record_id }
    }
}

/// Check a record type name.
pub fn validate_record_type(record_type: &str) -> Result<(), Error> {
    if record_type.is_empty() {
        return Err(Error::InvalidInput("record_type must not be empty".into()));
    }
    if record_type.len() > MAX_RECORD_TYPE_LEN {
        return Err(Error::InvalidInput(format!("record_type exceeds {MAX_RECORD_TYPE_LEN} bytes")));
    }
    if !record_type
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(Error::InvalidInput(format!(
            "record_type must be lowercase letters, digits or '_': {record_type}"
        )));
    }
    Ok(())
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.record_id {
            Some(id) => write!(f, "{}/{}", self.record_type, id),
            None => write!(f, "{}/*", self.record_type),
        }
    }
}
