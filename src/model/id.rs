use std::fmt::{Display, Formatter};
use std::str::FromStr;

use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const LENGTH: usize = 12;

/// A random 96-bit identifier, displayed as 24 lower-case hex characters.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Id([u8; LENGTH]);

impl Id {
    /// Generate a fresh random ID.
    pub fn new() -> Self {
        Self(rand::random())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", HEXLOWER.encode(&self.0))
    }
}

impl FromStr for Id {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = HEXLOWER
            .decode(s.to_ascii_lowercase().as_bytes())
            .map_err(|_| ParseIdError::NotHex)?;
        let bytes: [u8; LENGTH] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| ParseIdError::InvalidLength(v.len()))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Id {
    type Error = ParseIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Id> for String {
    fn from(id: Id) -> Self {
        id.to_string()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseIdError {
    #[error("id must be hexadecimal")]
    NotHex,
    #[error("id must be 12 bytes, got {0}")]
    InvalidLength(usize),
}
