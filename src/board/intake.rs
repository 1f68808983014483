use chrono::Utc;

use super::tokens::{live_token, open_election};
use super::Board;
use crate::error::{Error, Result};
use crate::logging::OperationId;
use crate::model::{
    ballot::{
        Ballot, BallotCore, BallotReceipt, BallotSubmission, BallotVerification, BulletinEntry,
        TrackingCode, MAX_FINGERPRINT_LEN,
    },
    db::{
        election_fingerprint_key, election_voter_key, Tables, ELECTION_FINGERPRINT,
        ELECTION_VOTER, TRACKING_CODE,
    },
    election::Election,
    id::Id,
};
use crate::notify::Notification;

impl Board {
    /// Record an encrypted ballot and publish it to the bulletin.
    ///
    /// Everything from the token check to marking the token used happens
    /// under one transaction, so a token can authorise at most one ballot.
    pub async fn submit_ballot(&self, submission: BallotSubmission) -> Result<BallotReceipt> {
        let op = OperationId::start("submit_ballot", submission.election_id);
        let result = self.submit_ballot_inner(submission).await;
        op.finish("submit_ballot", &result);
        result
    }

    async fn submit_ballot_inner(&self, submission: BallotSubmission) -> Result<BallotReceipt> {
        let fingerprint = submission.voter_fingerprint.trim().to_string();
        let (election, ballot) = {
            let mut tables = self.database().transaction().await;
            let election = open_election(&tables, submission.election_id)?;
            check_shape(&election, &submission, &fingerprint)?;
            if !self.crypto().verify(
                &submission.ciphertexts,
                &submission.proof,
                &election.public_key,
            ) {
                return Err(Error::InvalidProof);
            }
            let (voter_email, token_id) =
                check_eligibility(&tables, &election, &submission, &fingerprint)?;

            let mut tracking_code = TrackingCode::generate(election.id, &fingerprint);
            while tables
                .ballots
                .contains_unique(TRACKING_CODE, tracking_code.as_str())
            {
                debug!("Tracking code collision, regenerating");
                tracking_code = TrackingCode::generate(election.id, &fingerprint);
            }

            let entry = BulletinEntry {
                election_id: election.id,
                ciphertexts: submission.ciphertexts,
                proof: submission.proof,
                tracking_code,
            };
            let content_hash = self.bulletin().store(&entry)?;
            let ballot = Ballot {
                id: Id::new(),
                ballot: BallotCore {
                    election_id: entry.election_id,
                    ciphertexts: entry.ciphertexts,
                    proof: entry.proof,
                    tracking_code: entry.tracking_code,
                    content_hash,
                    voter_fingerprint: fingerprint,
                    voter_email,
                    submitted_at: Utc::now(),
                },
            };
            tables.ballots.insert(ballot.clone()).map_err(|e| {
                if e.is_duplicate_key() {
                    Error::DuplicateVote
                } else {
                    e
                }
            })?;

            if let Some(token_id) = token_id {
                let consumed = tables.tokens.get(token_id).cloned().map(|mut token| {
                    token.used = true;
                    token
                });
                let marked = match consumed {
                    Some(token) => tables.tokens.replace(token),
                    None => Err(Error::InvalidToken),
                };
                if let Err(e) = marked {
                    tables.ballots.remove(ballot.id);
                    return Err(e);
                }
            }
            (election, ballot)
        };

        debug!(
            "Recorded ballot {} for election {} as {}",
            ballot.id, election.id, ballot.content_hash
        );
        if let Some(email) = &ballot.voter_email {
            self.notifications()
                .enqueue(Notification::VoteConfirmation {
                    email: email.clone(),
                    election_id: election.id,
                    election_title: election.title.clone(),
                    tracking_code: ballot.tracking_code.clone(),
                });
        }
        Ok(BallotReceipt::from(&ballot))
    }

    /// Look up a ballot by tracking code and check its bulletin record.
    pub async fn verify_ballot(&self, tracking_code: &str) -> Result<BallotVerification> {
        let code: TrackingCode = tracking_code
            .trim()
            .parse()
            .map_err(|e| Error::validation(format!("invalid tracking code: {e}")))?;
        let ballot = {
            let tables = self.database().transaction().await;
            tables
                .ballots
                .find_unique(TRACKING_CODE, code.as_str())
                .cloned()
                .ok_or_else(|| Error::not_found(format!("ballot {code}")))?
        };
        let verified = match self.bulletin().retrieve_as::<BulletinEntry>(&ballot.content_hash) {
            Ok(entry) => entry == ballot.bulletin_entry(),
            Err(e) => {
                warn!(
                    "Bulletin record {} for ballot {} unreadable: {e}",
                    ballot.content_hash, ballot.id
                );
                false
            }
        };
        Ok(BallotVerification {
            tracking_code: ballot.tracking_code.clone(),
            timestamp: ballot.submitted_at,
            content_hash: ballot.content_hash.clone(),
            verified,
        })
    }
}

fn check_shape(election: &Election, submission: &BallotSubmission, fingerprint: &str) -> Result<()> {
    if submission.ciphertexts.len() != election.questions.len() {
        return Err(Error::validation(format!(
            "expected {} ciphertexts, got {}",
            election.questions.len(),
            submission.ciphertexts.len()
        )));
    }
    let len = fingerprint.chars().count();
    if len == 0 || len > MAX_FINGERPRINT_LEN {
        return Err(Error::validation(format!(
            "voter fingerprint must be 1 to {MAX_FINGERPRINT_LEN} characters"
        )));
    }
    Ok(())
}

/// Work out who is voting and make sure they have not voted already.
///
/// Returns the voter's email and the token to consume, if any.
fn check_eligibility(
    tables: &Tables,
    election: &Election,
    submission: &BallotSubmission,
    fingerprint: &str,
) -> Result<(Option<String>, Option<Id>)> {
    match submission.access_token.as_deref() {
        Some(token) => {
            let token = live_token(tables, token, Utc::now())?;
            if token.election_id != election.id {
                return Err(Error::InvalidToken);
            }
            if tables
                .ballots
                .contains_unique(ELECTION_VOTER, &election_voter_key(election.id, &token.email))
            {
                return Err(Error::DuplicateVote);
            }
            Ok((Some(token.email.clone()), Some(token.id)))
        }
        None if election.is_invite_only() => Err(Error::InvalidToken),
        None => {
            if tables.ballots.contains_unique(
                ELECTION_FINGERPRINT,
                &election_fingerprint_key(election.id, fingerprint),
            ) {
                return Err(Error::DuplicateVote);
            }
            Ok((None, None))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::crypto::Ciphertext;
    use crate::model::{election::ElectionSpec, election::ElectionStatus};
    use crate::notify::Outbox;
    use crate::testing::{ballot, multiple, open_election as open, single};

    #[board_test]
    async fn submit_and_verify(board: Board) {
        let election = open(&board, Id::new(), ElectionSpec::example()).await;
        let submission = ballot(
            &board,
            &election,
            &[single("A"), multiple(&["X"])],
            "device-1",
            None,
        );
        let receipt = board.submit_ballot(submission).await.unwrap();
        assert_eq!(receipt.tracking_code.as_str().len(), 16);
        assert!(board.bulletin().contains(&receipt.content_hash).unwrap());

        let verification = board
            .verify_ballot(&receipt.tracking_code.as_str().to_lowercase())
            .await
            .unwrap();
        assert!(verification.verified);
        assert_eq!(verification.content_hash, receipt.content_hash);
        assert_eq!(verification.timestamp, receipt.timestamp);
    }

    #[board_test]
    async fn verify_unknown_code(board: Board) {
        assert!(matches!(
            board.verify_ballot("0123456789ABCDEF").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            board.verify_ballot("not a code").await,
            Err(Error::Validation(_))
        ));
    }

    #[board_test]
    async fn token_authorises_one_ballot(board: Board) {
        let election = open(&board, Id::new(), ElectionSpec::example()).await;
        let token = board
            .issue_token(election.id, "carol@example.com")
            .await
            .unwrap();
        let selections = [single("A"), multiple(&[])];
        let first = ballot(&board, &election, &selections, "device-1", Some(&token.token));
        let second = ballot(&board, &election, &selections, "device-2", Some(&token.token));
        board.submit_ballot(first).await.unwrap();
        assert!(matches!(
            board.submit_ballot(second).await,
            Err(Error::InvalidToken)
        ));

        // A fresh token for the same voter still cannot cast a second ballot.
        let again = board.issue_token(election.id, "carol@example.com").await;
        assert!(matches!(again, Err(Error::DuplicateVote)));

        let tables = board.database().transaction().await;
        assert_eq!(tables.ballots.len(), 1);
        assert!(tables.tokens.find_unique(crate::model::db::TOKEN, &token.token).unwrap().used);
    }

    #[board_test]
    async fn concurrent_submissions_with_one_token(board: Board) {
        let election = open(&board, Id::new(), ElectionSpec::example()).await;
        let token = board
            .issue_token(election.id, "carol@example.com")
            .await
            .unwrap();
        let selections = [single("B"), multiple(&["Y"])];
        let first = ballot(&board, &election, &selections, "device-1", Some(&token.token));
        let second = ballot(&board, &election, &selections, "device-2", Some(&token.token));
        let (a, b) = tokio::join!(board.submit_ballot(first), board.submit_ballot(second));
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        let failure = a.err().or(b.err()).unwrap();
        assert!(
            matches!(failure, Error::InvalidToken | Error::DuplicateVote),
            "{failure}"
        );
        assert_eq!(board.database().transaction().await.ballots.len(), 1);
    }

    #[board_test]
    async fn tracking_codes_are_distinct(board: Board) {
        let election = open(&board, Id::new(), ElectionSpec::example()).await;
        let mut codes = HashSet::new();
        for i in 0..20 {
            let submission = ballot(
                &board,
                &election,
                &[single("A"), multiple(&["X"])],
                &format!("device-{i}"),
                None,
            );
            let receipt = board.submit_ballot(submission).await.unwrap();
            assert!(codes.insert(receipt.tracking_code));
        }
    }

    #[board_test]
    async fn tampered_ballot_rejected(board: Board) {
        let election = open(&board, Id::new(), ElectionSpec::example()).await;
        let mut submission = ballot(
            &board,
            &election,
            &[single("A"), multiple(&["X"])],
            "device-1",
            None,
        );
        let other = board
            .crypto()
            .encrypt(b"B", &election.public_key)
            .unwrap();
        submission.ciphertexts[0] = Ciphertext {
            nonce: submission.ciphertexts[0].nonce.clone(),
            ..other
        };
        assert!(matches!(
            board.submit_ballot(submission).await,
            Err(Error::InvalidProof)
        ));
        assert!(board.database().transaction().await.ballots.is_empty());
    }

    #[board_test]
    async fn rejects_malformed_submissions(board: Board) {
        let election = open(&board, Id::new(), ElectionSpec::example()).await;
        let short = ballot(&board, &election, &[single("A")], "device-1", None);
        assert!(matches!(
            board.submit_ballot(short).await,
            Err(Error::Validation(_))
        ));
        let selections = [single("A"), multiple(&["X"])];
        let too_long = "f".repeat(MAX_FINGERPRINT_LEN + 1);
        for fingerprint in ["   ", too_long.as_str()] {
            let submission = ballot(&board, &election, &selections, fingerprint, None);
            assert!(matches!(
                board.submit_ballot(submission).await,
                Err(Error::Validation(_))
            ));
        }
        let submission = ballot(&board, &election, &selections, "device-1", None);
        let unknown = BallotSubmission {
            election_id: Id::new(),
            ..submission
        };
        assert!(matches!(
            board.submit_ballot(unknown).await,
            Err(Error::NotFound(_))
        ));
    }

    #[board_test]
    async fn closed_election_rejects_ballots(board: Board) {
        let owner = Id::new();
        let election = open(&board, owner, ElectionSpec::example()).await;
        board
            .transition(election.id, owner, ElectionStatus::Closed)
            .await
            .unwrap();
        let submission = ballot(
            &board,
            &election,
            &[single("A"), multiple(&["X"])],
            "device-1",
            None,
        );
        assert!(matches!(
            board.submit_ballot(submission).await,
            Err(Error::InvalidState(_))
        ));
    }

    #[board_test]
    async fn invite_only_requires_token(board: Board) {
        let election = open(&board, Id::new(), ElectionSpec::invited_example()).await;
        let selections = [single("A"), multiple(&["X"])];
        let anonymous = ballot(&board, &election, &selections, "device-1", None);
        assert!(matches!(
            board.submit_ballot(anonymous).await,
            Err(Error::InvalidToken)
        ));

        // A token from another election is no good either.
        let other = open(&board, Id::new(), ElectionSpec::example()).await;
        let foreign = board
            .issue_token(other.id, "alice@example.com")
            .await
            .unwrap();
        let submission = ballot(&board, &election, &selections, "device-1", Some(&foreign.token));
        assert!(matches!(
            board.submit_ballot(submission).await,
            Err(Error::InvalidToken)
        ));
    }

    #[board_test]
    async fn public_elections_dedupe_fingerprints(board: Board) {
        let election = open(&board, Id::new(), ElectionSpec::example()).await;
        let selections = [single("A"), multiple(&["X"])];
        let first = ballot(&board, &election, &selections, "device-1", None);
        let repeat = ballot(&board, &election, &selections, " device-1 ", None);
        board.submit_ballot(first).await.unwrap();
        assert!(matches!(
            board.submit_ballot(repeat).await,
            Err(Error::DuplicateVote)
        ));
    }

    #[board_test]
    async fn confirmation_sent(board: Board, outbox: Outbox) {
        let election = open(&board, Id::new(), ElectionSpec::example()).await;
        let token = board
            .issue_token(election.id, "carol@example.com")
            .await
            .unwrap();
        let submission = ballot(
            &board,
            &election,
            &[single("A"), multiple(&["X"])],
            "device-1",
            Some(&token.token),
        );
        let receipt = board.submit_ballot(submission).await.unwrap();
        board.shutdown().await;
        assert!(outbox.sent().iter().any(|n| matches!(
            n,
            Notification::VoteConfirmation { email, tracking_code, .. }
                if email == "carol@example.com" && *tracking_code == receipt.tracking_code
        )));
    }

    #[board_test(local)]
    async fn local_bulletin_records(board: Board) {
        let election = open(&board, Id::new(), ElectionSpec::example()).await;
        let submission = ballot(
            &board,
            &election,
            &[single("B"), multiple(&["X", "Y"])],
            "device-1",
            None,
        );
        let receipt = board.submit_ballot(submission).await.unwrap();
        let path = board
            .config()
            .storage_path()
            .join(format!("{}.json", receipt.content_hash));
        assert!(path.is_file());

        let record: BulletinEntry = board.bulletin().retrieve_as(&receipt.content_hash).unwrap();
        assert_eq!(record.tracking_code, receipt.tracking_code);
        assert!(board
            .verify_ballot(receipt.tracking_code.as_str())
            .await
            .unwrap()
            .verified);

        std::fs::write(&path, b"{}").unwrap();
        assert!(!board
            .verify_ballot(receipt.tracking_code.as_str())
            .await
            .unwrap()
            .verified);
    }

    #[board_test]
    async fn end_to_end_tally(board: Board) {
        let owner = Id::new();
        let election = open(&board, owner, ElectionSpec::example()).await;
        let votes = [
            (single("A"), multiple(&["X", "Y"])),
            (single("B"), multiple(&["X"])),
            (single("Vote blanc"), multiple(&[])),
        ];
        for (i, (first, second)) in votes.into_iter().enumerate() {
            let submission = ballot(
                &board,
                &election,
                &[first, second],
                &format!("device-{i}"),
                None,
            );
            board.submit_ballot(submission).await.unwrap();
        }
        board
            .transition(election.id, owner, ElectionStatus::Closed)
            .await
            .unwrap();
        board
            .transition(election.id, owner, ElectionStatus::Tallied)
            .await
            .unwrap();

        let result = board.tally_result(election.id).await.unwrap();
        assert!(result.audit_log.is_empty());
        assert_eq!(result.votes_received, 3);
        let counts = |question: usize| -> Vec<(String, u64)> {
            result.results[question]
                .options
                .iter()
                .map(|o| (o.option.clone(), o.votes))
                .collect()
        };
        assert_eq!(
            counts(0),
            vec![
                ("A".to_string(), 1),
                ("B".to_string(), 1),
                ("Vote blanc".to_string(), 1)
            ]
        );
        assert_eq!(counts(1), vec![("X".to_string(), 2), ("Y".to_string(), 1)]);
    }
}
