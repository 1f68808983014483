use std::ops::Deref;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;
use crate::model::id::Id;

mod question;
mod spec;
mod status;

pub use question::{Question, QuestionKind, ABSTENTION};
pub use spec::ElectionSpec;
pub use status::ElectionStatus;

/// Core election data, without an ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionCore {
    /// The only account allowed to change this election.
    pub owner: Id,
    pub status: ElectionStatus,
    pub title: String,
    pub description: String,
    pub questions: Vec<Question>,
    pub public_key: PublicKey,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub voter_emails: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An election.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Election {
    pub id: Id,
    #[serde(flatten)]
    pub election: ElectionCore,
}

impl Deref for Election {
    type Target = ElectionCore;

    fn deref(&self) -> &Self::Target {
        &self.election
    }
}

impl Election {
    /// Build a new draft from a normalised spec.
    pub(crate) fn draft(
        owner: Id,
        spec: ElectionSpec,
        public_key: PublicKey,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Id::new(),
            election: ElectionCore {
                owner,
                status: ElectionStatus::Draft,
                title: spec.title,
                description: spec.description,
                questions: spec.questions,
                public_key,
                start_date: spec.start_date,
                end_date: spec.end_date,
                voter_emails: spec.voter_emails,
                created_at: now,
                updated_at: now,
            },
        }
    }

    pub fn is_owned_by(&self, account: Id) -> bool {
        self.owner == account
    }

    /// Elections with an invitation list only accept ballots cast with an access token.
    pub fn is_invite_only(&self) -> bool {
        !self.voter_emails.is_empty()
    }

    pub fn voters_invited(&self) -> usize {
        self.voter_emails.len()
    }

    pub(crate) fn set_status(&mut self, status: ElectionStatus, now: DateTime<Utc>) {
        self.election.status = status;
        self.election.updated_at = now;
    }
}
