//! The board's persistent state.
//!
//! Every read-modify-write runs inside [`Database::transaction`], which holds
//! one lock over all tables for its whole duration.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::model::{
    ballot::Ballot, election::Election, tally::TallyResult, token::AccessToken,
    trustee::TrusteeShare,
};

mod table;

pub use table::{
    election_fingerprint_key, election_voter_key, Record, Table, ELECTION, ELECTION_FINGERPRINT,
    ELECTION_TRUSTEE, ELECTION_VOTER, TOKEN, TRACKING_CODE,
};

/// All tables.
#[derive(Default)]
pub struct Tables {
    pub elections: Table<Election>,
    pub ballots: Table<Ballot>,
    pub tokens: Table<AccessToken>,
    pub trustee_shares: Table<TrusteeShare>,
    pub tallies: Table<TallyResult>,
}

/// A handle on the database. Cheap to clone.
#[derive(Clone, Default)]
pub struct Database {
    tables: Arc<Mutex<Tables>>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a transaction. It ends when the guard is dropped.
    pub async fn transaction(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().await
    }
}
