use serde::{Deserialize, Serialize};

use crate::crypto::KeyShare;
use crate::model::id::Id;

/// A private key share held on behalf of one trustee until tally time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrusteeShare {
    pub id: Id,
    pub election_id: Id,
    pub share: KeyShare,
}

impl TrusteeShare {
    pub fn new(election_id: Id, share: KeyShare) -> Self {
        Self {
            id: Id::new(),
            election_id,
            share,
        }
    }
}
