use std::fmt::{Display, Formatter};
use std::str::FromStr;

use data_encoding::HEXUPPER;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::model::id::Id;

pub const LENGTH: usize = 16;

/// The public code a voter uses to find their ballot on the board.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrackingCode(String);

impl TrackingCode {
    /// Derive a fresh code from the election, the voter fingerprint and a random nonce.
    pub fn generate(election_id: Id, voter_fingerprint: &str) -> Self {
        let nonce: [u8; 16] = rand::random();
        let mut hasher = Sha256::new();
        hasher.update(election_id.to_string().as_bytes());
        hasher.update(voter_fingerprint.as_bytes());
        hasher.update(nonce);
        let digest = HEXUPPER.encode(&hasher.finalize());
        Self(digest[..LENGTH].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TrackingCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TrackingCode {
    type Err = ParseError;

    /// Parse a code, accepting lower-case input.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != LENGTH {
            return Err(ParseError::InvalidLength(s.len()));
        }
        if let Some(c) = s.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(ParseError::InvalidChar(c));
        }
        Ok(Self(s.to_ascii_uppercase()))
    }
}

impl TryFrom<String> for TrackingCode {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TrackingCode> for String {
    fn from(code: TrackingCode) -> Self {
        code.0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("tracking code must contain exactly 16 characters, got {0}")]
    InvalidLength(usize),
    #[error("tracking code must be hexadecimal, found '{0}'")]
    InvalidChar(char),
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn generated_shape() {
        let code = TrackingCode::generate(Id::new(), "fingerprint");
        assert_eq!(code.as_str().len(), LENGTH);
        assert!(code
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn same_inputs_differ() {
        let election = Id::new();
        let codes: HashSet<_> = (0..200)
            .map(|_| TrackingCode::generate(election, "same voter"))
            .collect();
        assert_eq!(codes.len(), 200);
    }

    #[test]
    fn parse() {
        let code: TrackingCode = "0123456789abcdef".parse().unwrap();
        assert_eq!(code.as_str(), "0123456789ABCDEF");
        assert_eq!(
            "0123".parse::<TrackingCode>(),
            Err(ParseError::InvalidLength(4))
        );
        assert_eq!(
            "0123456789ABCDEG".parse::<TrackingCode>(),
            Err(ParseError::InvalidChar('G'))
        );
    }
}
