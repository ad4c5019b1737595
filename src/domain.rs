use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::OdsError;

/// Name of a dataset as it appears in the manifest and as the top-level
/// directory of its cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatasetName(String);

impl DatasetName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetName {
    type Err = OdsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = !normalized.is_empty()
            && !normalized.starts_with('.')
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'));
        if !is_valid {
            return Err(OdsError::InvalidDatasetName(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

impl AsRef<str> for DatasetName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Re-fetch files that are already present in the cache.
    pub force: bool,
    /// Report the planned fetches without asking for consent or touching the network.
    pub dry_run: bool,
}
