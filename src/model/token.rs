use chrono::{DateTime, Duration, Utc};
use data_encoding::BASE64URL_NOPAD;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;
use crate::model::{election::Question, id::Id};

const TOKEN_BYTES: usize = 32;

/// A single-use, time-bound authorisation to cast one ballot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub id: Id,
    /// Opaque URL-safe token string.
    pub token: String,
    pub election_id: Id,
    pub email: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

impl AccessToken {
    /// Mint a fresh random token valid for `ttl`.
    pub fn generate(election_id: Id, email: &str, ttl: Duration, now: DateTime<Utc>) -> Self {
        let mut bytes = [0; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self {
            id: Id::new(),
            token: BASE64URL_NOPAD.encode(&bytes),
            election_id,
            email: email.to_string(),
            expires_at: now + ttl,
            used: false,
            created_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Usable for a submission at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.used && !self.is_expired(now)
    }
}

/// What a voter learns by following a valid access link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRedemption {
    pub election_id: Id,
    pub election_title: String,
    pub email: String,
    pub questions: Vec<Question>,
    pub public_key: PublicKey,
    pub expires_at: DateTime<Utc>,
}
