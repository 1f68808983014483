use chrono::{DateTime, Utc};

use super::Board;
use crate::crypto::KeyParams;
use crate::error::{Error, Result};
use crate::logging::OperationId;
use crate::model::{
    db::{Tables, ELECTION},
    election::{Election, ElectionSpec, ElectionStatus},
    id::Id,
    tally::TallyResult,
    token::AccessToken,
    trustee::TrusteeShare,
};
use crate::notify::Notification;
use crate::tally::TallyEngine;

impl Board {
    /// Create a draft election owned by `owner`.
    pub async fn create_election(&self, owner: Id, spec: ElectionSpec) -> Result<Election> {
        let op = OperationId::start("create_election", format!("owner {owner}"));
        let result = self.create_election_inner(owner, spec).await;
        op.finish("create_election", &result);
        result
    }

    async fn create_election_inner(&self, owner: Id, spec: ElectionSpec) -> Result<Election> {
        let now = Utc::now();
        let spec = spec.normalize(now)?;
        let config = self.config();
        let params = KeyParams {
            security_bits: config.security_bits(),
            trustees: config.trustees(),
            threshold: config.trustee_threshold(),
        };
        let (public_key, shares) = self.crypto().generate_keypair(&params)?;
        let election = Election::draft(owner, spec, public_key, now);

        let mut tables = self.database().transaction().await;
        tables.elections.insert(election.clone())?;
        for share in shares {
            tables
                .trustee_shares
                .insert(TrusteeShare::new(election.id, share))?;
        }
        debug!(
            "Created election {} with {} questions",
            election.id,
            election.questions.len()
        );
        Ok(election)
    }

    /// Fetch an election. Public.
    pub async fn get_election(&self, election_id: Id) -> Result<Election> {
        let tables = self.database().transaction().await;
        tables
            .elections
            .get(election_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("election {election_id}")))
    }

    /// All elections owned by `owner`, oldest first.
    pub async fn list_elections(&self, owner: Id) -> Vec<Election> {
        let tables = self.database().transaction().await;
        let mut elections: Vec<Election> = tables
            .elections
            .iter()
            .filter(|e| e.is_owned_by(owner))
            .cloned()
            .collect();
        elections.sort_by_key(|e| (e.created_at, e.id));
        elections
    }

    /// Delete a draft election. Anything past draft may have published
    /// ballots, so it stays.
    pub async fn delete_election(&self, election_id: Id, owner: Id) -> Result<()> {
        let op = OperationId::start("delete_election", election_id);
        let result = self.delete_election_inner(election_id, owner).await;
        op.finish("delete_election", &result);
        result
    }

    async fn delete_election_inner(&self, election_id: Id, owner: Id) -> Result<()> {
        let mut tables = self.database().transaction().await;
        let election = owned_election(&tables, election_id, owner)?;
        if election.status != ElectionStatus::Draft {
            return Err(Error::invalid_state(format!(
                "cannot delete a {} election",
                election.status
            )));
        }
        let shares: Vec<Id> = tables
            .trustee_shares
            .iter()
            .filter(|s| s.election_id == election_id)
            .map(|s| s.id)
            .collect();
        for id in shares {
            tables.trustee_shares.remove(id);
        }
        tables.elections.remove(election_id);
        Ok(())
    }

    /// Move an election to `requested`, which must be the next state.
    ///
    /// Opening issues an access token to every invited voter. Tallying runs the
    /// tally first and only commits the new state if it succeeds.
    pub async fn transition(
        &self,
        election_id: Id,
        owner: Id,
        requested: ElectionStatus,
    ) -> Result<ElectionStatus> {
        let op = OperationId::start("transition", format!("{election_id} -> {requested}"));
        let result = self.transition_inner(election_id, owner, requested).await;
        op.finish("transition", &result);
        result
    }

    async fn transition_inner(
        &self,
        election_id: Id,
        owner: Id,
        requested: ElectionStatus,
    ) -> Result<ElectionStatus> {
        let now = Utc::now();
        let mut notifications = Vec::new();
        {
            let mut tables = self.database().transaction().await;
            let mut election = owned_election(&tables, election_id, owner)?;
            if !election.status.can_transition_to(requested) {
                return Err(Error::InvalidTransition {
                    from: election.status,
                    to: requested,
                });
            }

            match requested {
                ElectionStatus::Open => {
                    let tokens = self.invite_voters(&mut tables, &election, now)?;
                    notifications.extend(tokens.iter().map(|t| self.access_link(&election, t)));
                }
                ElectionStatus::Tallied => {
                    let result = self.tally(&tables, &election, now)?;
                    tables.tallies.insert(result)?;
                }
                ElectionStatus::Draft | ElectionStatus::Closed => {}
            }

            election.set_status(requested, now);
            tables.elections.replace(election)?;
        }

        info!("Election {election_id} is now {requested}");
        for notification in notifications {
            self.notifications().enqueue(notification);
        }
        Ok(requested)
    }

    /// Issue one token per invited email. All or nothing.
    fn invite_voters(
        &self,
        tables: &mut Tables,
        election: &Election,
        now: DateTime<Utc>,
    ) -> Result<Vec<AccessToken>> {
        let ttl = self.config().token_ttl();
        let tokens: Vec<AccessToken> = election
            .voter_emails
            .iter()
            .map(|email| AccessToken::generate(election.id, email, ttl, now))
            .collect();
        for (i, token) in tokens.iter().enumerate() {
            if let Err(e) = tables.tokens.insert(token.clone()) {
                for issued in &tokens[..i] {
                    tables.tokens.remove(issued.id);
                }
                return Err(e);
            }
        }
        debug!(
            "Issued {} access tokens for election {}",
            tokens.len(),
            election.id
        );
        Ok(tokens)
    }

    /// Run the tally over every ballot and share stored for `election`.
    fn tally(&self, tables: &Tables, election: &Election, now: DateTime<Utc>) -> Result<TallyResult> {
        if tables
            .tallies
            .contains_unique(ELECTION, &election.id.to_string())
        {
            return Err(Error::invalid_state("election already has a tally"));
        }
        let ballots: Vec<_> = tables
            .ballots
            .iter()
            .filter(|b| b.election_id == election.id)
            .cloned()
            .collect();
        let shares: Vec<_> = tables
            .trustee_shares
            .iter()
            .filter(|s| s.election_id == election.id)
            .map(|s| s.share.clone())
            .collect();
        let outcome = TallyEngine::new(self.crypto()).run(election, &ballots, &shares)?;
        if !outcome.audit_log.is_empty() {
            warn!(
                "Tally of election {} skipped {} ballot entries",
                election.id,
                outcome.audit_log.len()
            );
        }
        Ok(TallyResult {
            id: Id::new(),
            election_id: election.id,
            outcome,
            finalized_at: now,
        })
    }

    pub(super) fn access_link(&self, election: &Election, token: &AccessToken) -> Notification {
        Notification::AccessLink {
            email: token.email.clone(),
            election_id: election.id,
            election_title: election.title.clone(),
            link: format!("{}/vote/{}", self.config().public_url(), token.token),
            expires_at: token.expires_at,
        }
    }
}

/// Fetch an election and check that `owner` may change it.
pub(super) fn owned_election(tables: &Tables, election_id: Id, owner: Id) -> Result<Election> {
    let election = tables
        .elections
        .get(election_id)
        .ok_or_else(|| Error::not_found(format!("election {election_id}")))?;
    if !election.is_owned_by(owner) {
        return Err(Error::Forbidden(format!(
            "election {election_id} belongs to another account"
        )));
    }
    Ok(election.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Outbox;
    use crate::testing::open_election;

    #[board_test]
    async fn create_starts_in_draft(board: Board) {
        let owner = Id::new();
        let election = board
            .create_election(owner, ElectionSpec::example())
            .await
            .unwrap();
        assert_eq!(election.status, ElectionStatus::Draft);
        assert_eq!(election.questions[0].options, vec!["A", "B", "Vote blanc"]);
        assert_eq!(election.public_key.bits, 2048);
        assert!(election.start_date.is_some());

        let fetched = board.get_election(election.id).await.unwrap();
        assert_eq!(fetched.id, election.id);
        assert_eq!(board.list_elections(owner).await.len(), 1);
        assert!(board.list_elections(Id::new()).await.is_empty());
    }

    #[board_test]
    async fn create_rejects_invalid_spec(board: Board) {
        let spec = ElectionSpec {
            questions: vec![],
            ..ElectionSpec::example()
        };
        let result = board.create_election(Id::new(), spec).await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[board_test]
    async fn full_lifecycle(board: Board) {
        let owner = Id::new();
        let election = board
            .create_election(owner, ElectionSpec::example())
            .await
            .unwrap();
        for status in [
            ElectionStatus::Open,
            ElectionStatus::Closed,
            ElectionStatus::Tallied,
        ] {
            assert_eq!(
                board.transition(election.id, owner, status).await.unwrap(),
                status
            );
            assert_eq!(board.get_election(election.id).await.unwrap().status, status);
        }
        assert!(board.tally_result(election.id).await.is_ok());
    }

    #[board_test]
    async fn draft_cannot_close(board: Board) {
        let owner = Id::new();
        let election = board
            .create_election(owner, ElectionSpec::example())
            .await
            .unwrap();
        let result = board
            .transition(election.id, owner, ElectionStatus::Closed)
            .await;
        assert!(matches!(
            result,
            Err(Error::InvalidTransition {
                from: ElectionStatus::Draft,
                to: ElectionStatus::Closed
            })
        ));
        assert_eq!(
            board.get_election(election.id).await.unwrap().status,
            ElectionStatus::Draft
        );
    }

    #[board_test]
    async fn no_going_back(board: Board) {
        let owner = Id::new();
        let election = open_election(&board, owner, ElectionSpec::example()).await;
        for status in [ElectionStatus::Draft, ElectionStatus::Open, ElectionStatus::Tallied] {
            let result = board.transition(election.id, owner, status).await;
            assert!(matches!(result, Err(Error::InvalidTransition { .. })), "{status}");
        }
    }

    #[board_test]
    async fn only_owner_transitions(board: Board) {
        let owner = Id::new();
        let election = board
            .create_election(owner, ElectionSpec::example())
            .await
            .unwrap();
        let result = board
            .transition(election.id, Id::new(), ElectionStatus::Open)
            .await;
        assert!(matches!(result, Err(Error::Forbidden(_))));
        let result = board
            .transition(Id::new(), owner, ElectionStatus::Open)
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[board_test]
    async fn opening_invites_voters(board: Board, outbox: Outbox) {
        let owner = Id::new();
        let election = open_election(&board, owner, ElectionSpec::invited_example()).await;
        {
            let tables = board.database().transaction().await;
            let tokens: Vec<_> = tables
                .tokens
                .iter()
                .filter(|t| t.election_id == election.id)
                .collect();
            assert_eq!(tokens.len(), 2);
            assert!(tokens.iter().all(|t| !t.used));
        }
        board.shutdown().await;
        let mut recipients: Vec<String> = outbox
            .sent()
            .iter()
            .map(|n| n.recipient().to_string())
            .collect();
        recipients.sort();
        assert_eq!(recipients, vec!["alice@example.com", "bob@example.com"]);
        match &outbox.sent()[0] {
            Notification::AccessLink { link, .. } => {
                assert!(link.starts_with("http://localhost:3001/vote/"))
            }
            other => panic!("unexpected notification {other:?}"),
        }
    }

    #[board_test]
    async fn delete_only_drafts(board: Board) {
        let owner = Id::new();
        let draft = board
            .create_election(owner, ElectionSpec::example())
            .await
            .unwrap();
        assert!(matches!(
            board.delete_election(draft.id, Id::new()).await,
            Err(Error::Forbidden(_))
        ));
        board.delete_election(draft.id, owner).await.unwrap();
        assert!(matches!(
            board.get_election(draft.id).await,
            Err(Error::NotFound(_))
        ));

        let open = open_election(&board, owner, ElectionSpec::example()).await;
        assert!(matches!(
            board.delete_election(open.id, owner).await,
            Err(Error::InvalidState(_))
        ));
    }
}
