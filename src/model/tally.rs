use std::ops::Deref;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{AggregateCiphertext, DecryptionProof};
use crate::error::{Error, Result};
use crate::model::{
    election::{ElectionStatus, QuestionKind},
    id::Id,
};

/// Votes for one option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionResult {
    pub option: String,
    pub votes: u64,
    /// Share of the question's counted ballots, 0 to 100.
    pub percentage: f64,
}

/// Results for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question: String,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    /// Ballots successfully decoded and counted for this question.
    pub counted: u64,
    pub options: Vec<OptionResult>,
}

/// A ballot (or part of one) the tally could not count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ballot_id: Id,
    pub question_index: usize,
    pub reason: String,
}

/// Everything the tally computes. Identical for identical ballot sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TallyOutcome {
    /// One aggregate per question.
    pub aggregates: Vec<AggregateCiphertext>,
    pub results: Vec<QuestionResult>,
    /// One decryption proof per question.
    pub proofs: Vec<DecryptionProof>,
    pub audit_log: Vec<AuditEntry>,
    pub votes_received: u64,
    pub voters_invited: u64,
    pub participation_rate: f64,
}

/// The final, immutable result of an election.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TallyResult {
    pub id: Id,
    pub election_id: Id,
    #[serde(flatten)]
    pub outcome: TallyOutcome,
    pub finalized_at: DateTime<Utc>,
}

impl Deref for TallyResult {
    type Target = TallyOutcome;

    fn deref(&self) -> &Self::Target {
        &self.outcome
    }
}

/// Participation figures, plus results once the election is tallied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionStats {
    pub election_id: Id,
    pub status: ElectionStatus,
    pub votes_received: u64,
    pub voters_invited: u64,
    pub participation_rate: f64,
    /// Empty until the election is tallied.
    pub results_by_question: Vec<QuestionResult>,
}

/// Summary of the election in an export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedElection {
    pub id: Id,
    pub title: String,
    pub description: String,
    pub status: ElectionStatus,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub total_votes: u64,
    pub total_invited: u64,
    pub participation_rate: f64,
}

/// A downloadable copy of an election's results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionExport {
    pub election: ExportedElection,
    pub results: Vec<QuestionResult>,
    pub audit_log: Vec<AuditEntry>,
    pub finalized_at: DateTime<Utc>,
}

impl ElectionExport {
    /// Render as CSV: election metadata as `key,value` rows, then a header
    /// and one row per option of every question.
    pub fn to_csv(&self) -> Result<String> {
        let election = &self.election;
        let date = |d: Option<DateTime<Utc>>| d.map(|d| d.to_rfc3339()).unwrap_or_default();
        let metadata = [
            ("election", election.id.to_string()),
            ("title", election.title.clone()),
            ("description", election.description.clone()),
            ("status", election.status.to_string()),
            ("start_date", date(election.start_date)),
            ("end_date", date(election.end_date)),
            ("votes_received", election.total_votes.to_string()),
            ("voters_invited", election.total_invited.to_string()),
            ("participation_rate", format!("{:.2}%", election.participation_rate)),
            ("finalized_at", self.finalized_at.to_rfc3339()),
        ];

        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(Vec::new());
        for (key, value) in &metadata {
            writer.write_record([*key, value.as_str()])?;
        }
        writer.write_record(["question", "type", "option", "votes", "percentage"])?;
        for result in &self.results {
            for option in &result.options {
                writer.write_record([
                    result.question.as_str(),
                    result.kind.to_string().as_str(),
                    option.option.as_str(),
                    option.votes.to_string().as_str(),
                    format!("{:.2}%", option.percentage).as_str(),
                ])?;
            }
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| Error::Storage(format!("CSV: {e}")))?;
        String::from_utf8(bytes).map_err(|e| Error::Storage(format!("CSV: {e}")))
    }
}

/// `part` as a percentage of `whole`, or zero when `whole` is zero.
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
