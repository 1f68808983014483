//! Shared helpers for board tests.

use std::sync::Arc;

use crate::crypto::TransparentEngine;
use crate::model::{
    ballot::{BallotSubmission, Selection},
    election::{Election, ElectionSpec, ElectionStatus},
    id::Id,
};
use crate::notify::Outbox;
use crate::{Board, Config};

/// Route crate logging to the test output.
pub fn init_logging() {
    log4rs_test_utils::test_logging::init_logging_once_for(["novavote_board"], None, None);
}

/// Launch a board with a recording mailer.
pub async fn launch(config: Config) -> (Board, Outbox) {
    init_logging();
    let outbox = Outbox::default();
    let board = Board::launch(
        config,
        Arc::new(TransparentEngine::seeded(rand::random())),
        Arc::new(outbox.clone()),
    )
    .await
    .unwrap();
    (board, outbox)
}

/// Create an election from `spec` and open it.
pub async fn open_election(board: &Board, owner: Id, spec: ElectionSpec) -> Election {
    let election = board.create_election(owner, spec).await.unwrap();
    board
        .transition(election.id, owner, ElectionStatus::Open)
        .await
        .unwrap();
    board.get_election(election.id).await.unwrap()
}

/// Encrypt and prove a ballot the way a voting client would.
pub fn ballot(
    board: &Board,
    election: &Election,
    selections: &[Selection],
    fingerprint: &str,
    access_token: Option<&str>,
) -> BallotSubmission {
    let choices: Vec<Vec<u8>> = selections.iter().map(Selection::encode).collect();
    let ciphertexts: Vec<_> = choices
        .iter()
        .map(|choice| board.crypto().encrypt(choice, &election.public_key).unwrap())
        .collect();
    let proof = board
        .crypto()
        .prove(&ciphertexts, &choices, &election.public_key)
        .unwrap();
    BallotSubmission {
        election_id: election.id,
        ciphertexts,
        proof,
        voter_fingerprint: fingerprint.to_string(),
        access_token: access_token.map(str::to_string),
    }
}

pub fn single(label: &str) -> Selection {
    Selection::Single(label.to_string())
}

pub fn multiple(labels: &[&str]) -> Selection {
    Selection::Multiple(labels.iter().map(|s| s.to_string()).collect())
}
