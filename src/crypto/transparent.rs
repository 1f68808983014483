use std::collections::BTreeSet;
use std::sync::Mutex;

use data_encoding::{BASE64, HEXLOWER};
use hmac::{Hmac, Mac};
use rand::{rngs::StdRng, RngCore, SeedableRng};
use sha2::{Digest, Sha256};

use super::{
    AggregateCiphertext, Ciphertext, CryptoEngine, DecryptionProof, KeyParams, KeyShare,
    PlaintextTally, Proof, PublicKey, MAX_CHOICE_LEN,
};
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 16;

/// A stand-in engine that provides no secrecy.
///
/// Payloads are only base64-encoded, but every contract of [`CryptoEngine`]
/// is enforced: ciphertexts are bound to their key, proofs are bound to the
/// exact ciphertexts they cover, and decryption needs enough genuine shares.
pub struct TransparentEngine {
    rng: Mutex<StdRng>,
}

impl TransparentEngine {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// An engine whose keys and nonces are reproducible.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn random_bytes(&self, len: usize) -> Vec<u8> {
        let mut bytes = vec![0; len];
        // A poisoned lock still holds a usable generator.
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.fill_bytes(&mut bytes);
        bytes
    }

    fn proof_mac(ciphertexts: &[Ciphertext], public_key: &PublicKey) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(public_key.key_id.as_bytes())
            .expect("HMAC can take key of any size");
        for ciphertext in ciphertexts {
            mac.update(ciphertext.nonce.as_bytes());
            mac.update(&[0]);
            mac.update(ciphertext.payload.as_bytes());
            mac.update(&[0x1e]);
        }
        mac
    }

    /// Check a ciphertext is bound to `key_id` and carries a sane payload.
    fn well_formed(ciphertext: &Ciphertext, key_id: &str) -> bool {
        if ciphertext.key_id != key_id {
            return false;
        }
        let nonce_ok = HEXLOWER
            .decode(ciphertext.nonce.as_bytes())
            .map_or(false, |n| n.len() == NONCE_LEN);
        let payload_ok = BASE64
            .decode(ciphertext.payload.as_bytes())
            .map_or(false, |p| p.len() <= MAX_CHOICE_LEN);
        nonce_ok && payload_ok
    }
}

impl Default for TransparentEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn sha256_hex(data: &[u8]) -> String {
    HEXLOWER.encode(&Sha256::digest(data))
}

impl CryptoEngine for TransparentEngine {
    fn generate_keypair(&self, params: &KeyParams) -> Result<(PublicKey, Vec<KeyShare>)> {
        if params.threshold == 0 || params.threshold > params.trustees {
            return Err(Error::validation(format!(
                "threshold {} must be between 1 and {}",
                params.threshold, params.trustees
            )));
        }
        let secret = self.random_bytes((params.security_bits / 8) as usize);
        let key_id = sha256_hex(&secret);

        let mut shares = Vec::with_capacity(params.trustees as usize);
        let mut share_commitments = Vec::with_capacity(params.trustees as usize);
        for index in 1..=params.trustees {
            let mut hasher = Sha256::new();
            hasher.update(&secret);
            hasher.update(index.to_be_bytes());
            let value = HEXLOWER.encode(&hasher.finalize());
            share_commitments.push(sha256_hex(value.as_bytes()));
            shares.push(KeyShare {
                key_id: key_id.clone(),
                index,
                value,
            });
        }

        let public_key = PublicKey {
            key_id,
            bits: params.security_bits,
            threshold: params.threshold,
            share_commitments,
        };
        Ok((public_key, shares))
    }

    fn encrypt(&self, choice: &[u8], public_key: &PublicKey) -> Result<Ciphertext> {
        if choice.len() > MAX_CHOICE_LEN {
            return Err(Error::validation(format!(
                "choice is {} bytes, limit is {MAX_CHOICE_LEN}",
                choice.len()
            )));
        }
        Ok(Ciphertext {
            key_id: public_key.key_id.clone(),
            nonce: HEXLOWER.encode(&self.random_bytes(NONCE_LEN)),
            payload: BASE64.encode(choice),
        })
    }

    fn prove(
        &self,
        ciphertexts: &[Ciphertext],
        choices: &[Vec<u8>],
        public_key: &PublicKey,
    ) -> Result<Proof> {
        if ciphertexts.len() != choices.len() {
            return Err(Error::validation(format!(
                "{} ciphertexts but {} choices",
                ciphertexts.len(),
                choices.len()
            )));
        }
        for (i, (ciphertext, choice)) in ciphertexts.iter().zip(choices).enumerate() {
            if !Self::well_formed(ciphertext, &public_key.key_id) {
                return Err(Error::validation(format!("ciphertext {i} is malformed")));
            }
            let payload = BASE64
                .decode(ciphertext.payload.as_bytes())
                .map_err(|_| Error::validation(format!("ciphertext {i} is malformed")))?;
            if &payload != choice {
                return Err(Error::validation(format!(
                    "ciphertext {i} does not encrypt the given choice"
                )));
            }
        }
        let tag = Self::proof_mac(ciphertexts, public_key).finalize().into_bytes();
        Ok(Proof(HEXLOWER.encode(&tag)))
    }

    fn verify(&self, ciphertexts: &[Ciphertext], proof: &Proof, public_key: &PublicKey) -> bool {
        if ciphertexts.is_empty()
            || !ciphertexts
                .iter()
                .all(|c| Self::well_formed(c, &public_key.key_id))
        {
            return false;
        }
        let tag = match HEXLOWER.decode(proof.0.as_bytes()) {
            Ok(tag) => tag,
            Err(_) => return false,
        };
        Self::proof_mac(ciphertexts, public_key)
            .verify_slice(&tag)
            .is_ok()
    }

    fn aggregate(
        &self,
        ciphertexts: &[Ciphertext],
        public_key: &PublicKey,
    ) -> Result<AggregateCiphertext> {
        let mut hasher = Sha256::new();
        hasher.update(public_key.key_id.as_bytes());
        for (i, ciphertext) in ciphertexts.iter().enumerate() {
            if ciphertext.key_id != public_key.key_id {
                return Err(Error::validation(format!(
                    "ciphertext {i} was made with a different key"
                )));
            }
            hasher.update(ciphertext.nonce.as_bytes());
            hasher.update(ciphertext.payload.as_bytes());
        }
        Ok(AggregateCiphertext {
            key_id: public_key.key_id.clone(),
            share_commitments: public_key.share_commitments.clone(),
            components: ciphertexts.to_vec(),
            digest: HEXLOWER.encode(&hasher.finalize()),
        })
    }

    fn threshold_decrypt(
        &self,
        aggregate: &AggregateCiphertext,
        shares: &[KeyShare],
        threshold: usize,
    ) -> Result<(PlaintextTally, DecryptionProof)> {
        if threshold == 0 {
            return Err(Error::validation("threshold must be at least 1"));
        }
        let valid: BTreeSet<u32> = shares
            .iter()
            .filter(|share| share.key_id == aggregate.key_id)
            .filter(|share| {
                (share.index as usize)
                    .checked_sub(1)
                    .and_then(|i| aggregate.share_commitments.get(i))
                    .map_or(false, |c| *c == sha256_hex(share.value.as_bytes()))
            })
            .map(|share| share.index)
            .collect();
        if valid.len() < threshold {
            return Err(Error::InsufficientShares {
                needed: threshold,
                found: valid.len(),
            });
        }
        let share_indices: Vec<u32> = valid.into_iter().take(threshold).collect();

        let plaintexts: Vec<Option<Vec<u8>>> = aggregate
            .components
            .iter()
            .map(|c| BASE64.decode(c.payload.as_bytes()).ok())
            .collect();

        let mut transcript = Sha256::new();
        transcript.update(aggregate.digest.as_bytes());
        for index in &share_indices {
            transcript.update(index.to_be_bytes());
        }
        for plaintext in &plaintexts {
            match plaintext {
                Some(bytes) => transcript.update(Sha256::digest(bytes)),
                None => transcript.update([0u8; 32]),
            }
        }

        let proof = DecryptionProof {
            aggregate_digest: aggregate.digest.clone(),
            share_indices,
            transcript: HEXLOWER.encode(&transcript.finalize()),
        };
        Ok((PlaintextTally { plaintexts }, proof))
    }
}
