//! Database configuration and the presets used by most callers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::hashdb::HashConfig;
use crate::pathdb::PathConfig;

/// Node addressing scheme of a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Nodes keyed by the hash of their blob.
    Hash,
    /// Nodes keyed by owner and path.
    Path,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Hash => f.write_str("hash"),
            Scheme::Path => f.write_str("path"),
        }
    }
}

/// Trie database configuration.
///
/// At most one of `hash` and `path` may be set; with neither the hash
/// scheme runs with default settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Record the preimages of hashed trie keys.
    pub preimages: bool,
    pub hash: Option<HashConfig>,
    pub path: Option<PathConfig>,
    /// Use the circuit-friendly trie.
    pub zktrie: bool,
    /// Use the experimental zk state trie on top of `zktrie`.
    pub experimental_zktrie: bool,
}

impl Config {
    /// Hash scheme with default settings.
    pub fn hash_defaults() -> Self {
        Self {
            hash: Some(HashConfig::default()),
            ..Self::default()
        }
    }

    /// Circuit-friendly hash scheme with default settings.
    pub fn zk_hash_defaults() -> Self {
        Self {
            zktrie: true,
            ..Self::hash_defaults()
        }
    }

    pub fn hash_defaults_for(is_zk: bool) -> Self {
        if is_zk {
            Self::zk_hash_defaults()
        } else {
            Self::hash_defaults()
        }
    }

    /// Path scheme with default settings.
    pub fn path_defaults() -> Self {
        Self {
            path: Some(PathConfig::default()),
            ..Self::default()
        }
    }

    /// Rejects ambiguous or unsupported combinations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hash.is_some() && self.path.is_some() {
            return Err(ConfigError::ConflictingSchemes);
        }
        if self.path.is_some() && self.zktrie {
            return Err(ConfigError::ZkPathScheme);
        }
        Ok(())
    }

    pub fn scheme(&self) -> Scheme {
        if self.path.is_some() {
            Scheme::Path
        } else {
            Scheme::Hash
        }
    }
}
