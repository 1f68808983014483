//! Decoding and counting the ballots of a closed election.

use std::collections::HashMap;

use crate::crypto::{CryptoEngine, KeyShare};
use crate::error::Result;
use crate::model::{
    ballot::{Ballot, Decoded, Selection},
    election::{Election, Question, QuestionKind},
    id::Id,
    tally::{percentage, AuditEntry, OptionResult, QuestionResult, TallyOutcome},
};

/// Counts ballots through a [`CryptoEngine`].
pub struct TallyEngine<'a> {
    crypto: &'a dyn CryptoEngine,
}

impl<'a> TallyEngine<'a> {
    pub fn new(crypto: &'a dyn CryptoEngine) -> Self {
        Self { crypto }
    }

    /// Tally every ballot of `election`.
    ///
    /// Ballots that cannot be decoded for a question are left out of that
    /// question's counts and listed in the audit log. Only failures of the
    /// crypto engine itself, such as too few key shares, abort the tally.
    pub fn run(
        &self,
        election: &Election,
        ballots: &[Ballot],
        shares: &[KeyShare],
    ) -> Result<TallyOutcome> {
        let mut ordered: Vec<&Ballot> = ballots
            .iter()
            .filter(|b| b.election_id == election.id)
            .collect();
        ordered.sort_by(|a, b| (a.submitted_at, a.id).cmp(&(b.submitted_at, b.id)));
        debug!(
            "Tallying {} ballots for election {}",
            ordered.len(),
            election.id
        );

        let threshold = election.public_key.threshold as usize;
        let mut aggregates = Vec::with_capacity(election.questions.len());
        let mut results = Vec::with_capacity(election.questions.len());
        let mut proofs = Vec::with_capacity(election.questions.len());
        let mut audit_log = Vec::new();

        for (index, question) in election.questions.iter().enumerate() {
            let mut cast = Vec::with_capacity(ordered.len());
            let mut ciphertexts = Vec::with_capacity(ordered.len());
            for ballot in &ordered {
                match ballot.ciphertexts.get(index) {
                    Some(ciphertext) => {
                        cast.push(ballot.id);
                        ciphertexts.push(ciphertext.clone());
                    }
                    None => audit(&mut audit_log, ballot.id, index, "no entry for question"),
                }
            }

            let aggregate = self.crypto.aggregate(&ciphertexts, &election.public_key)?;
            let (plaintexts, proof) = self.crypto.threshold_decrypt(&aggregate, shares, threshold)?;

            let mut counter = QuestionCounter::new(question);
            for (ballot_id, plaintext) in cast.into_iter().zip(plaintexts.plaintexts) {
                let outcome = match plaintext {
                    Some(bytes) => counter.count(&bytes),
                    None => Err("could not be decrypted".to_string()),
                };
                if let Err(reason) = outcome {
                    audit(&mut audit_log, ballot_id, index, reason);
                }
            }

            results.push(counter.finish());
            aggregates.push(aggregate);
            proofs.push(proof);
        }

        let votes_received = ordered.len() as u64;
        let voters_invited = election.voters_invited() as u64;
        Ok(TallyOutcome {
            aggregates,
            results,
            proofs,
            audit_log,
            votes_received,
            voters_invited,
            participation_rate: percentage(votes_received, voters_invited),
        })
    }
}

fn audit(log: &mut Vec<AuditEntry>, ballot_id: Id, question_index: usize, reason: impl Into<String>) {
    let reason = reason.into();
    warn!("Skipping ballot {ballot_id} on question {question_index}: {reason}");
    log.push(AuditEntry {
        ballot_id,
        question_index,
        reason,
    });
}

/// Running counts for one question.
struct QuestionCounter<'q> {
    question: &'q Question,
    positions: HashMap<&'q str, usize>,
    votes: Vec<u64>,
    counted: u64,
}

impl<'q> QuestionCounter<'q> {
    fn new(question: &'q Question) -> Self {
        let positions = question
            .options
            .iter()
            .enumerate()
            .map(|(i, option)| (option.as_str(), i))
            .collect();
        Self {
            question,
            positions,
            votes: vec![0; question.options.len()],
            counted: 0,
        }
    }

    /// Count one decrypted ballot. An `Err` means the ballot was not counted,
    /// except for unknown or malformed entries inside a multiple choice or
    /// below the first rank, which are skipped individually.
    fn count(&mut self, plaintext: &[u8]) -> std::result::Result<(), String> {
        let Decoded { selection, ignored } =
            Selection::decode_reporting(self.question.kind, plaintext).map_err(|e| e.to_string())?;
        let credited = selection.credited();

        let mut unknown = Vec::new();
        let mut known = Vec::with_capacity(credited.len());
        for label in credited {
            match self.positions.get(label.as_str()) {
                Some(&position) => known.push(position),
                None => unknown.push(label.as_str()),
            }
        }

        match self.question.kind {
            QuestionKind::Single | QuestionKind::Ranking if known.is_empty() => {
                return Err(format!("unknown option `{}`", unknown.join("`, `")));
            }
            _ => {}
        }
        for position in known {
            self.votes[position] += 1;
        }
        self.counted += 1;

        let mut skipped = Vec::new();
        if !unknown.is_empty() {
            skipped.push(format!("unknown options `{}`", unknown.join("`, `")));
        }
        if !ignored.is_empty() {
            skipped.push(format!("malformed entries {}", ignored.join(", ")));
        }
        if skipped.is_empty() {
            Ok(())
        } else {
            Err(format!("counted, but ignored {}", skipped.join(" and ")))
        }
    }

    fn finish(self) -> QuestionResult {
        let counted = self.counted;
        QuestionResult {
            question: self.question.text.clone(),
            kind: self.question.kind,
            counted,
            options: self
                .question
                .options
                .iter()
                .zip(self.votes)
                .map(|(option, votes)| OptionResult {
                    option: option.clone(),
                    votes,
                    percentage: percentage(votes, counted),
                })
                .collect(),
        }
    }
}
