use chrono::{DateTime, Utc};

use super::Board;
use crate::error::{Error, Result};
use crate::logging::OperationId;
use crate::model::{
    db::{election_voter_key, Tables, ELECTION_VOTER, TOKEN},
    election::{Election, ElectionStatus},
    id::Id,
    token::{AccessToken, TokenRedemption},
};

impl Board {
    /// Issue a fresh access token for `email` and send it to them.
    ///
    /// Earlier tokens for the same voter stay valid until they expire; the
    /// one-ballot-per-voter rule is enforced at submission.
    pub async fn issue_token(&self, election_id: Id, email: &str) -> Result<AccessToken> {
        let op = OperationId::start("issue_token", election_id);
        let result = self.issue_token_inner(election_id, email).await;
        op.finish("issue_token", &result);
        result
    }

    async fn issue_token_inner(&self, election_id: Id, email: &str) -> Result<AccessToken> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(Error::validation(format!("`{email}` is not an email address")));
        }
        let now = Utc::now();
        let (election, token) = {
            let mut tables = self.database().transaction().await;
            let election = open_election(&tables, election_id)?;
            if election.is_invite_only()
                && !election
                    .voter_emails
                    .iter()
                    .any(|invited| invited.eq_ignore_ascii_case(email))
            {
                return Err(Error::Forbidden(format!(
                    "{email} is not invited to election {election_id}"
                )));
            }
            if tables
                .ballots
                .contains_unique(ELECTION_VOTER, &election_voter_key(election_id, email))
            {
                return Err(Error::DuplicateVote);
            }
            let token = AccessToken::generate(election_id, email, self.config().token_ttl(), now);
            tables.tokens.insert(token.clone())?;
            (election, token)
        };
        self.notifications()
            .enqueue(self.access_link(&election, &token));
        Ok(token)
    }

    /// Check a token without using it up.
    pub async fn redeem_token(&self, token: &str) -> Result<TokenRedemption> {
        let tables = self.database().transaction().await;
        let token = live_token(&tables, token, Utc::now())?;
        let election = open_election(&tables, token.election_id)?;
        Ok(TokenRedemption {
            election_id: election.id,
            election_title: election.title.clone(),
            email: token.email.clone(),
            questions: election.questions.clone(),
            public_key: election.public_key.clone(),
            expires_at: token.expires_at,
        })
    }

    /// Mark a token as used.
    pub async fn consume_token(&self, token: &str) -> Result<()> {
        let op = OperationId::start("consume_token", "");
        let result = self.consume_token_inner(token).await;
        op.finish("consume_token", &result);
        result
    }

    async fn consume_token_inner(&self, token: &str) -> Result<()> {
        let mut tables = self.database().transaction().await;
        let mut token = live_token(&tables, token, Utc::now())?.clone();
        token.used = true;
        tables.tokens.replace(token)
    }
}

/// Find a token that can still authorise a ballot.
pub(super) fn live_token<'t>(
    tables: &'t Tables,
    token: &str,
    now: DateTime<Utc>,
) -> Result<&'t AccessToken> {
    let token = tables
        .tokens
        .find_unique(TOKEN, token)
        .ok_or(Error::InvalidToken)?;
    if token.used {
        return Err(Error::InvalidToken);
    }
    if token.is_expired(now) {
        return Err(Error::ExpiredToken);
    }
    Ok(token)
}

/// Fetch an election that is accepting ballots.
pub(super) fn open_election(tables: &Tables, election_id: Id) -> Result<Election> {
    let election = tables
        .elections
        .get(election_id)
        .ok_or_else(|| Error::not_found(format!("election {election_id}")))?;
    if election.status != ElectionStatus::Open {
        return Err(Error::invalid_state(format!(
            "election {election_id} is {}, not OPEN",
            election.status
        )));
    }
    Ok(election.clone())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::config::Config;
    use crate::model::election::ElectionSpec;
    use crate::notify::{Notification, Outbox};
    use crate::testing::{launch, open_election as open};

    #[board_test]
    async fn issue_and_redeem(board: Board, outbox: Outbox) {
        let election = open(&board, Id::new(), ElectionSpec::example()).await;
        let token = board
            .issue_token(election.id, " carol@example.com ")
            .await
            .unwrap();
        assert_eq!(token.email, "carol@example.com");

        let redemption = board.redeem_token(&token.token).await.unwrap();
        assert_eq!(redemption.election_id, election.id);
        assert_eq!(redemption.questions, election.questions);
        assert_eq!(redemption.public_key, election.public_key);

        // Redeeming is read-only.
        board.redeem_token(&token.token).await.unwrap();

        board.shutdown().await;
        assert!(matches!(
            outbox.sent().last(),
            Some(Notification::AccessLink { email, .. }) if email == "carol@example.com"
        ));
    }

    #[board_test]
    async fn consume_once(board: Board) {
        let election = open(&board, Id::new(), ElectionSpec::example()).await;
        let token = board
            .issue_token(election.id, "carol@example.com")
            .await
            .unwrap();
        board.consume_token(&token.token).await.unwrap();
        assert!(matches!(
            board.consume_token(&token.token).await,
            Err(Error::InvalidToken)
        ));
        assert!(matches!(
            board.redeem_token(&token.token).await,
            Err(Error::InvalidToken)
        ));
    }

    #[board_test]
    async fn unknown_token(board: Board) {
        assert!(matches!(
            board.redeem_token("no-such-token").await,
            Err(Error::InvalidToken)
        ));
    }

    #[board_test]
    async fn requires_open_election(board: Board) {
        let owner = Id::new();
        let draft = board
            .create_election(owner, ElectionSpec::example())
            .await
            .unwrap();
        assert!(matches!(
            board.issue_token(draft.id, "carol@example.com").await,
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            board.issue_token(Id::new(), "carol@example.com").await,
            Err(Error::NotFound(_))
        ));
    }

    #[board_test]
    async fn invite_only_elections(board: Board) {
        let election = open(&board, Id::new(), ElectionSpec::invited_example()).await;
        assert!(matches!(
            board.issue_token(election.id, "mallory@example.com").await,
            Err(Error::Forbidden(_))
        ));
        board
            .issue_token(election.id, "ALICE@example.com")
            .await
            .unwrap();
    }

    #[board_test]
    async fn rejects_bad_email(board: Board) {
        let election = open(&board, Id::new(), ElectionSpec::example()).await;
        assert!(matches!(
            board.issue_token(election.id, "nobody").await,
            Err(Error::Validation(_))
        ));
    }

    #[board_test]
    async fn expired_token(board: Board) {
        let election = open(&board, Id::new(), ElectionSpec::example()).await;
        let token = board
            .issue_token(election.id, "carol@example.com")
            .await
            .unwrap();
        {
            let mut tables = board.database().transaction().await;
            let mut stale = token.clone();
            stale.expires_at = Utc::now() - Duration::seconds(1);
            tables.tokens.replace(stale).unwrap();
        }
        assert!(matches!(
            board.redeem_token(&token.token).await,
            Err(Error::ExpiredToken)
        ));
        assert!(matches!(
            board.consume_token(&token.token).await,
            Err(Error::ExpiredToken)
        ));
    }

    #[tokio::test]
    async fn ttl_comes_from_config() {
        let (board, _) = launch(Config::in_memory().with_token_ttl_minutes(5)).await;
        let election = open(&board, Id::new(), ElectionSpec::example()).await;
        let token = board
            .issue_token(election.id, "carol@example.com")
            .await
            .unwrap();
        assert_eq!(token.expires_at - token.created_at, Duration::minutes(5));
        board.shutdown().await;
    }
}
