use std::ops::Deref;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bulletin::ContentHash;
use crate::crypto::{Ciphertext, Proof};
use crate::model::id::Id;

mod selection;
mod tracking;

pub use selection::{DecodeError, Decoded, Selection};
pub use tracking::{ParseError as TrackingCodeError, TrackingCode};

/// Longest accepted voter fingerprint.
pub const MAX_FINGERPRINT_LEN: usize = 64;

/// A ballot as submitted by a voter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BallotSubmission {
    pub election_id: Id,
    /// One ciphertext per question, in question order.
    pub ciphertexts: Vec<Ciphertext>,
    pub proof: Proof,
    pub voter_fingerprint: String,
    #[serde(default)]
    pub access_token: Option<String>,
}

/// The public copy of a ballot written to the bulletin store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulletinEntry {
    pub election_id: Id,
    pub ciphertexts: Vec<Ciphertext>,
    pub proof: Proof,
    pub tracking_code: TrackingCode,
}

/// Core ballot data, without an ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BallotCore {
    pub election_id: Id,
    pub ciphertexts: Vec<Ciphertext>,
    pub proof: Proof,
    pub tracking_code: TrackingCode,
    pub content_hash: ContentHash,
    pub voter_fingerprint: String,
    /// Set only when the ballot was cast with an access token.
    pub voter_email: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// A recorded ballot. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ballot {
    pub id: Id,
    #[serde(flatten)]
    pub ballot: BallotCore,
}

impl Deref for Ballot {
    type Target = BallotCore;

    fn deref(&self) -> &Self::Target {
        &self.ballot
    }
}

impl Ballot {
    /// The public record this ballot was published as.
    pub fn bulletin_entry(&self) -> BulletinEntry {
        BulletinEntry {
            election_id: self.election_id,
            ciphertexts: self.ciphertexts.clone(),
            proof: self.proof.clone(),
            tracking_code: self.tracking_code.clone(),
        }
    }
}

/// Returned to the voter after a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotReceipt {
    pub id: Id,
    pub tracking_code: TrackingCode,
    pub timestamp: DateTime<Utc>,
    pub content_hash: ContentHash,
}

impl From<&Ballot> for BallotReceipt {
    fn from(ballot: &Ballot) -> Self {
        Self {
            id: ballot.id,
            tracking_code: ballot.tracking_code.clone(),
            timestamp: ballot.submitted_at,
            content_hash: ballot.content_hash.clone(),
        }
    }
}

/// Public answer to "is my ballot on the board?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotVerification {
    pub tracking_code: TrackingCode,
    pub timestamp: DateTime<Utc>,
    pub content_hash: ContentHash,
    /// True when the bulletin record still hashes to `content_hash`.
    pub verified: bool,
}
