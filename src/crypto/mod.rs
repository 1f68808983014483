//! The cryptographic capability boundary.
//!
//! The board never inspects ciphertexts itself. Everything it needs goes through
//! a [`CryptoEngine`], so a real homomorphic scheme can replace the bundled
//! [`TransparentEngine`] without touching ballot intake or the tally.

use serde::{Deserialize, Serialize};

use crate::error::Result;

mod transparent;

pub use transparent::TransparentEngine;

/// Largest encoded choice accepted for a single question, in bytes.
pub const MAX_CHOICE_LEN: usize = 4096;

/// Parameters for key generation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct KeyParams {
    /// Requested key size in bits.
    pub security_bits: u32,
    /// Number of private key shares to produce.
    pub trustees: u32,
    /// Shares needed to decrypt.
    pub threshold: u32,
}

/// An election's public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    /// Fingerprint of the key, shared by every ciphertext made with it.
    pub key_id: String,
    pub bits: u32,
    pub threshold: u32,
    /// Per-trustee commitments used to check decryption shares, by share index - 1.
    pub share_commitments: Vec<String>,
}

/// One trustee's share of the private key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyShare {
    pub key_id: String,
    /// 1-based trustee index.
    pub index: u32,
    pub value: String,
}

/// The encryption of one question's selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext {
    pub key_id: String,
    pub nonce: String,
    pub payload: String,
}

/// A non-interactive proof that a ballot's ciphertexts are well formed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Proof(pub String);

/// The combination of every ciphertext cast for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateCiphertext {
    pub key_id: String,
    pub share_commitments: Vec<String>,
    pub components: Vec<Ciphertext>,
    /// Digest binding the aggregate to its components.
    pub digest: String,
}

/// Decrypted contents of an aggregate, one entry per component.
/// `None` marks a component that could not be decrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaintextTally {
    pub plaintexts: Vec<Option<Vec<u8>>>,
}

/// Evidence that a decryption used the expected aggregate and shares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionProof {
    pub aggregate_digest: String,
    pub share_indices: Vec<u32>,
    pub transcript: String,
}

/// Capability interface for all election cryptography.
pub trait CryptoEngine: Send + Sync {
    /// Create a key sized to `params` and split the private half into shares.
    fn generate_keypair(&self, params: &KeyParams) -> Result<(PublicKey, Vec<KeyShare>)>;

    /// Encrypt one question's encoded choice.
    fn encrypt(&self, choice: &[u8], public_key: &PublicKey) -> Result<Ciphertext>;

    /// Prove that each ciphertext encrypts the corresponding choice.
    ///
    /// A production engine must also prove, without revealing it, that each
    /// choice is one of the question's legal options. The ballot set is then
    /// well formed before the tally runs, and tally-time option checks only
    /// catch what a weaker engine lets through.
    fn prove(
        &self,
        ciphertexts: &[Ciphertext],
        choices: &[Vec<u8>],
        public_key: &PublicKey,
    ) -> Result<Proof>;

    /// Check a ballot proof. Deterministic and side-effect free.
    fn verify(&self, ciphertexts: &[Ciphertext], proof: &Proof, public_key: &PublicKey) -> bool;

    /// Combine ciphertexts for the same question without decrypting any of them.
    fn aggregate(
        &self,
        ciphertexts: &[Ciphertext],
        public_key: &PublicKey,
    ) -> Result<AggregateCiphertext>;

    /// Decrypt an aggregate using at least `threshold` distinct valid shares.
    fn threshold_decrypt(
        &self,
        aggregate: &AggregateCiphertext,
        shares: &[KeyShare],
        threshold: usize,
    ) -> Result<(PlaintextTally, DecryptionProof)>;
}
