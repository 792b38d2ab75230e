//! Store identity
//!
//! A random 16-byte id rendered as base58check. The id disambiguates
//! concurrent replicas of the same document on the sync server.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::StoreError;

/// Identity of a local store replica
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoreId(String);

impl StoreId {
    /// Generate a new random id
    pub fn new() -> Self {
        Self(
            bs58::encode(Uuid::new_v4().as_bytes())
                .with_check()
                .into_string(),
        )
    }

    /// Parse a base58check encoded id
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        let bytes = bs58::decode(s)
            .with_check(None)
            .into_vec()
            .map_err(|_| StoreError::InvalidId(s.to_string()))?;

        if bytes.is_empty() {
            return Err(StoreError::InvalidId(s.to_string()));
        }

        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StoreId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StoreId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StoreId {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StoreId> for String {
    fn from(id: StoreId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ids_are_unique() {
        assert_ne!(StoreId::new(), StoreId::new());
    }

    #[test]
    fn test_parse_roundtrip() {
        let id = StoreId::new();
        let parsed: StoreId = id.as_str().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(StoreId::parse("not-an-id").is_err());
        assert!(StoreId::parse("").is_err());
    }
}
