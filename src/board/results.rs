use super::lifecycle::owned_election;
use super::Board;
use crate::error::{Error, Result};
use crate::logging::OperationId;
use crate::model::{
    db::ELECTION,
    election::ElectionStatus,
    id::Id,
    tally::{percentage, ElectionExport, ElectionStats, ExportedElection, TallyResult},
};

impl Board {
    /// Participation for any election, plus per-question results once it
    /// has been tallied.
    pub async fn stats(&self, election_id: Id) -> Result<ElectionStats> {
        let tables = self.database().transaction().await;
        let election = tables
            .elections
            .get(election_id)
            .ok_or_else(|| Error::not_found(format!("election {election_id}")))?;
        let votes_received = tables
            .ballots
            .iter()
            .filter(|b| b.election_id == election_id)
            .count() as u64;
        let voters_invited = election.voters_invited() as u64;
        let results_by_question = match election.status {
            ElectionStatus::Tallied => tables
                .tallies
                .find_unique(ELECTION, &election_id.to_string())
                .map(|tally| tally.results.clone())
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        Ok(ElectionStats {
            election_id,
            status: election.status,
            votes_received,
            voters_invited,
            participation_rate: percentage(votes_received, voters_invited),
            results_by_question,
        })
    }

    /// The stored tally of an election.
    pub async fn tally_result(&self, election_id: Id) -> Result<TallyResult> {
        let tables = self.database().transaction().await;
        tables
            .tallies
            .find_unique(ELECTION, &election_id.to_string())
            .cloned()
            .ok_or_else(|| Error::not_found(format!("tally for election {election_id}")))
    }

    /// Results of a tallied election in a form ready for download.
    pub async fn export_results(&self, election_id: Id, owner: Id) -> Result<ElectionExport> {
        let op = OperationId::start("export_results", election_id);
        let result = self.export_results_inner(election_id, owner).await;
        op.finish("export_results", &result);
        result
    }

    /// [`Board::export_results`] rendered as CSV.
    pub async fn export_results_csv(&self, election_id: Id, owner: Id) -> Result<String> {
        self.export_results(election_id, owner).await?.to_csv()
    }

    async fn export_results_inner(&self, election_id: Id, owner: Id) -> Result<ElectionExport> {
        let tables = self.database().transaction().await;
        let election = owned_election(&tables, election_id, owner)?;
        if election.status != ElectionStatus::Tallied {
            return Err(Error::invalid_state(format!(
                "election {election_id} is {}, results are not final",
                election.status
            )));
        }
        let tally = tables
            .tallies
            .find_unique(ELECTION, &election_id.to_string())
            .ok_or_else(|| Error::not_found(format!("tally for election {election_id}")))?;
        Ok(ElectionExport {
            election: ExportedElection {
                id: election.id,
                title: election.title.clone(),
                description: election.description.clone(),
                status: election.status,
                start_date: election.start_date,
                end_date: election.end_date,
                total_votes: tally.votes_received,
                total_invited: tally.voters_invited,
                participation_rate: tally.participation_rate,
            },
            results: tally.results.clone(),
            audit_log: tally.audit_log.clone(),
            finalized_at: tally.finalized_at,
        })
    }
}
