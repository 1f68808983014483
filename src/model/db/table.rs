use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::model::{
    ballot::Ballot, election::Election, id::Id, tally::TallyResult, token::AccessToken,
    trustee::TrusteeShare,
};

/// A type that can be stored in a [`Table`].
pub trait Record: Clone {
    /// The name of the table.
    const NAME: &'static str;

    fn id(&self) -> Id;

    /// Values that must be unique across the table, as `(index, key)` pairs.
    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }
}

/// Rows of one record type, keyed by ID, with unique secondary indexes.
pub struct Table<T> {
    rows: BTreeMap<Id, T>,
    unique: HashMap<(&'static str, String), Id>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            unique: HashMap::new(),
        }
    }
}

impl<T: Record> Table<T> {
    /// Insert a new row. Fails without modifying the table if the ID or any
    /// unique key is already taken.
    pub fn insert(&mut self, row: T) -> Result<()> {
        let id = row.id();
        if self.rows.contains_key(&id) {
            return Err(Error::DuplicateKey {
                table: T::NAME,
                key: format!("id {id}"),
            });
        }
        let keys = row.unique_keys();
        if let Some((index, key)) = keys.iter().find(|k| self.unique.contains_key(*k)) {
            return Err(Error::DuplicateKey {
                table: T::NAME,
                key: format!("{index} {key}"),
            });
        }
        for key in keys {
            self.unique.insert(key, id);
        }
        self.rows.insert(id, row);
        Ok(())
    }

    /// Replace an existing row. Unique keys may change but must stay unique.
    pub fn replace(&mut self, row: T) -> Result<()> {
        let id = row.id();
        let old = self
            .rows
            .get(&id)
            .ok_or_else(|| Error::not_found(format!("{} {id}", T::NAME)))?;
        let old_keys = old.unique_keys();
        let new_keys = row.unique_keys();
        let clash = new_keys
            .iter()
            .find(|k| matches!(self.unique.get(*k), Some(owner) if *owner != id));
        if let Some((index, key)) = clash {
            return Err(Error::DuplicateKey {
                table: T::NAME,
                key: format!("{index} {key}"),
            });
        }
        for key in old_keys {
            self.unique.remove(&key);
        }
        for key in new_keys {
            self.unique.insert(key, id);
        }
        self.rows.insert(id, row);
        Ok(())
    }

    pub fn remove(&mut self, id: Id) -> Option<T> {
        let row = self.rows.remove(&id)?;
        for key in row.unique_keys() {
            self.unique.remove(&key);
        }
        Some(row)
    }

    pub fn get(&self, id: Id) -> Option<&T> {
        self.rows.get(&id)
    }

    /// Look a row up by one of its unique keys.
    pub fn find_unique(&self, index: &'static str, key: &str) -> Option<&T> {
        self.unique
            .get(&(index, key.to_string()))
            .and_then(|id| self.rows.get(id))
    }

    pub fn contains_unique(&self, index: &'static str, key: &str) -> bool {
        self.unique.contains_key(&(index, key.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// Unique index names.
pub const TRACKING_CODE: &str = "tracking_code";
pub const ELECTION_VOTER: &str = "election_voter";
pub const ELECTION_FINGERPRINT: &str = "election_fingerprint";
pub const TOKEN: &str = "token";
pub const ELECTION: &str = "election";
pub const ELECTION_TRUSTEE: &str = "election_trustee";

/// Key for the one-ballot-per-voter index.
pub fn election_voter_key(election_id: Id, email: &str) -> String {
    format!("{election_id}/{}", email.to_lowercase())
}

/// Key for the one-ballot-per-fingerprint index of public elections.
pub fn election_fingerprint_key(election_id: Id, fingerprint: &str) -> String {
    format!("{election_id}/{fingerprint}")
}

impl Record for Election {
    const NAME: &'static str = "elections";

    fn id(&self) -> Id {
        self.id
    }
}

impl Record for Ballot {
    const NAME: &'static str = "ballots";

    fn id(&self) -> Id {
        self.id
    }

    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        let mut keys = vec![(TRACKING_CODE, self.tracking_code.to_string())];
        match &self.voter_email {
            Some(email) => keys.push((ELECTION_VOTER, election_voter_key(self.election_id, email))),
            None => keys.push((
                ELECTION_FINGERPRINT,
                election_fingerprint_key(self.election_id, &self.voter_fingerprint),
            )),
        }
        keys
    }
}

impl Record for AccessToken {
    const NAME: &'static str = "access_tokens";

    fn id(&self) -> Id {
        self.id
    }

    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        vec![(TOKEN, self.token.clone())]
    }
}

impl Record for TrusteeShare {
    const NAME: &'static str = "trustee_shares";

    fn id(&self) -> Id {
        self.id
    }

    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        vec![(
            ELECTION_TRUSTEE,
            format!("{}/{}", self.election_id, self.share.index),
        )]
    }
}

impl Record for TallyResult {
    const NAME: &'static str = "tally_results";

    fn id(&self) -> Id {
        self.id
    }

    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        vec![(ELECTION, self.election_id.to_string())]
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn token(token: &str) -> AccessToken {
        let mut t = AccessToken::generate(Id::new(), "a@example.com", Duration::minutes(1), Utc::now());
        t.token = token.to_string();
        t
    }

    #[test]
    fn unique_index_enforced() {
        let mut table = Table::default();
        table.insert(token("abc")).unwrap();
        let err = table.insert(token("abc")).unwrap_err();
        assert!(err.is_duplicate_key());
        assert_eq!(table.len(), 1);
        table.insert(token("def")).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn duplicate_id_rejected() {
        let mut table = Table::default();
        let row = token("abc");
        table.insert(row.clone()).unwrap();
        let mut again = row.clone();
        again.token = "other".to_string();
        assert!(table.insert(again).unwrap_err().is_duplicate_key());
        assert!(!table.contains_unique(TOKEN, "other"));
    }

    #[test]
    fn find_and_replace() {
        let mut table = Table::default();
        let mut row = token("abc");
        table.insert(row.clone()).unwrap();
        assert_eq!(table.find_unique(TOKEN, "abc").unwrap().id, row.id);

        row.used = true;
        row.token = "xyz".to_string();
        table.replace(row.clone()).unwrap();
        assert!(table.find_unique(TOKEN, "abc").is_none());
        assert!(table.find_unique(TOKEN, "xyz").unwrap().used);
    }

    #[test]
    fn replace_cannot_steal_key() {
        let mut table = Table::default();
        table.insert(token("abc")).unwrap();
        let mut other = token("def");
        table.insert(other.clone()).unwrap();
        other.token = "abc".to_string();
        assert!(table.replace(other).unwrap_err().is_duplicate_key());
        assert!(table.find_unique(TOKEN, "def").is_some());
    }

    #[test]
    fn remove_frees_keys() {
        let mut table = Table::default();
        let row = token("abc");
        table.insert(row.clone()).unwrap();
        assert!(table.remove(row.id).is_some());
        assert!(table.is_empty());
        table.insert(token("abc")).unwrap();
    }
}
