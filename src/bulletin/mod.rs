//! Content-addressed, append-only storage for public board records.
//!
//! Records are serialised to canonical JSON (sorted keys, compact) and
//! addressed by the lower-case hex SHA-256 of those bytes, so every backend
//! agrees on the address of a logical record.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use data_encoding::HEXLOWER;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::{Config, StorageKind};
use crate::error::{Error, Result};

mod local;
mod memory;

pub use local::{AuditReport, LocalBackend};
pub use memory::MemoryBackend;

const HASH_LEN: usize = 64;

/// Address of a record: the SHA-256 of its canonical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash raw bytes.
    pub fn of(bytes: &[u8]) -> Self {
        Self(HEXLOWER.encode(&Sha256::digest(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("content hash must be 64 lower-case hex characters")]
pub struct ParseHashError;

impl FromStr for ContentHash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let valid = s.len() == HASH_LEN
            && s.chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(ParseHashError)
        }
    }
}

impl TryFrom<String> for ContentHash {
    type Error = ParseHashError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

/// A place to put canonical bytes. Implementations must be write-once:
/// writing an address that already exists leaves the original untouched.
pub trait StorageBackend: Send + Sync {
    /// Persist `bytes` at `hash`. Idempotent.
    fn put(&self, hash: &ContentHash, bytes: &[u8]) -> Result<()>;

    /// Fetch the bytes at `hash`, if any.
    fn get(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>>;

    fn contains(&self, hash: &ContentHash) -> Result<bool> {
        Ok(self.get(hash)?.is_some())
    }
}

/// Sort every object's keys recursively.
///
/// `serde_json::Map` keeps insertion order once any crate in the build
/// enables its `preserve_order` feature, so the order is set here explicitly.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key, canonicalize(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Serialise a record to canonical JSON bytes.
pub fn canonical_json<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    let value = canonicalize(serde_json::to_value(record)?);
    Ok(serde_json::to_vec(&value)?)
}

/// The public bulletin board.
#[derive(Clone)]
pub struct BulletinStore {
    backend: Arc<dyn StorageBackend>,
}

impl BulletinStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Build the backend selected by the config.
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend: Arc<dyn StorageBackend> = match config.storage() {
            StorageKind::Local => Arc::new(LocalBackend::open(config.storage_path())?),
            StorageKind::Memory => Arc::new(MemoryBackend::default()),
        };
        Ok(Self::new(backend))
    }

    /// Store a record and return its address.
    pub fn store<T: Serialize>(&self, record: &T) -> Result<ContentHash> {
        let bytes = canonical_json(record)?;
        let hash = ContentHash::of(&bytes);
        self.backend.put(&hash, &bytes)?;
        trace!("Stored bulletin record {hash} ({} bytes)", bytes.len());
        Ok(hash)
    }

    /// Fetch a record as raw JSON.
    pub fn retrieve(&self, hash: &ContentHash) -> Result<Value> {
        self.retrieve_as(hash)
    }

    /// Fetch a record and deserialise it.
    pub fn retrieve_as<T: DeserializeOwned>(&self, hash: &ContentHash) -> Result<T> {
        let bytes = self
            .backend
            .get(hash)?
            .ok_or_else(|| Error::not_found(format!("bulletin record {hash}")))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn contains(&self, hash: &ContentHash) -> Result<bool> {
        self.backend.contains(hash)
    }
}
