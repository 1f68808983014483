use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::question::Question;

/// An election specification, as supplied by its owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionSpec {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub questions: Vec<Question>,
    /// Defaults to the creation time.
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    /// Voters to invite when the election opens. Empty for a public election.
    #[serde(default)]
    pub voter_emails: Vec<String>,
}

impl ElectionSpec {
    /// Validate and tidy the spec: trim text, normalise questions and
    /// deduplicate invited emails.
    pub(crate) fn normalize(mut self, now: DateTime<Utc>) -> Result<Self> {
        self.title = self.title.trim().to_string();
        if self.title.is_empty() {
            return Err(Error::validation("election title is empty"));
        }
        self.description = self.description.trim().to_string();
        if self.questions.is_empty() {
            return Err(Error::validation("election has no questions"));
        }
        self.questions = self
            .questions
            .into_iter()
            .enumerate()
            .map(|(i, q)| q.normalize(i))
            .collect::<Result<_>>()?;

        let start = *self.start_date.get_or_insert(now);
        if let Some(end) = self.end_date {
            if end <= start {
                return Err(Error::validation("election must end after it starts"));
            }
        }

        let mut seen = HashSet::new();
        let mut emails = Vec::with_capacity(self.voter_emails.len());
        for email in self.voter_emails {
            let email = email.trim().to_string();
            if email.is_empty() {
                continue;
            }
            if !email.contains('@') {
                return Err(Error::validation(format!("`{email}` is not an email address")));
            }
            if seen.insert(email.to_lowercase()) {
                emails.push(email);
            }
        }
        self.voter_emails = emails;
        Ok(self)
    }
}
