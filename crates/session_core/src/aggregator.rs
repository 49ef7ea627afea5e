use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::{
    domain::{ContributionStatus, PeerId, ProgramId, StoreId},
    protocol::{CodePartyStart, Contribution},
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionRecord {
    pub peer_id: PeerId,
    pub program_id: ProgramId,
    pub status: ContributionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_id: Option<StoreId>,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    ForeignProgram,
    UnboundPeer,
    /// A stored secret is not revoked by a later failure report.
    AlreadyOk,
    /// `pending` never replaces a settled status.
    Regression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerUpdate {
    Recorded {
        previous: ContributionStatus,
        current: ContributionStatus,
    },
    Ignored(IgnoreReason),
}

/// Per-peer contribution status for one program, keyed by peer id so that
/// repeated deliveries overwrite instead of accumulating.
#[derive(Debug, Clone)]
pub struct ContributionAggregator {
    program_id: ProgramId,
    records: BTreeMap<PeerId, ContributionRecord>,
}

impl ContributionAggregator {
    pub fn new(program_id: ProgramId, bound_peers: impl IntoIterator<Item = PeerId>) -> Self {
        let observed_at = Utc::now();
        let records = bound_peers
            .into_iter()
            .map(|peer_id| {
                let record = ContributionRecord {
                    peer_id: peer_id.clone(),
                    program_id: program_id.clone(),
                    status: ContributionStatus::Pending,
                    store_id: None,
                    observed_at,
                };
                (peer_id, record)
            })
            .collect();
        Self {
            program_id,
            records,
        }
    }

    pub fn from_start(start: &CodePartyStart) -> Self {
        Self::new(
            start.program_id.clone(),
            start.peers.values().map(|binding| binding.peer_id.clone()),
        )
    }

    pub fn program_id(&self) -> &ProgramId {
        &self.program_id
    }

    pub fn apply(&mut self, contribution: &Contribution) -> LedgerUpdate {
        if contribution.program_id != self.program_id {
            debug!(
                active = %self.program_id,
                received = %contribution.program_id,
                "contribution for another program ignored"
            );
            return LedgerUpdate::Ignored(IgnoreReason::ForeignProgram);
        }
        let Some(record) = self.records.get_mut(&contribution.peer_id) else {
            warn!(peer_id = %contribution.peer_id, "contribution from unbound peer ignored");
            return LedgerUpdate::Ignored(IgnoreReason::UnboundPeer);
        };

        let previous = record.status;
        match (previous, contribution.status) {
            (ContributionStatus::Ok, ContributionStatus::Error) => {
                return LedgerUpdate::Ignored(IgnoreReason::AlreadyOk)
            }
            (settled, ContributionStatus::Pending) if settled.is_settled() => {
                return LedgerUpdate::Ignored(IgnoreReason::Regression)
            }
            _ => {}
        }

        record.status = contribution.status;
        record.store_id = match contribution.status {
            ContributionStatus::Ok => contribution.store_id.clone(),
            ContributionStatus::Pending | ContributionStatus::Error => None,
        };
        record.observed_at = Utc::now();

        info!(
            program_id = %self.program_id,
            peer_id = %contribution.peer_id,
            status = ?contribution.status,
            ok = self.ok_count(),
            expected = self.expected(),
            "contribution recorded"
        );
        LedgerUpdate::Recorded {
            previous,
            current: contribution.status,
        }
    }

    pub fn status(&self, peer_id: &PeerId) -> Option<ContributionStatus> {
        self.records.get(peer_id).map(|record| record.status)
    }

    pub fn records(&self) -> impl Iterator<Item = &ContributionRecord> {
        self.records.values()
    }

    pub fn expected(&self) -> usize {
        self.records.len()
    }

    pub fn ok_count(&self) -> usize {
        self.count(ContributionStatus::Ok)
    }

    pub fn settled_count(&self) -> usize {
        self.records
            .values()
            .filter(|record| record.status.is_settled())
            .count()
    }

    fn count(&self, status: ContributionStatus) -> usize {
        self.records
            .values()
            .filter(|record| record.status == status)
            .count()
    }

    /// Every bound peer has stored its input.
    pub fn is_complete(&self) -> bool {
        !self.records.is_empty() && self.ok_count() == self.expected()
    }

    pub fn has_failures(&self) -> bool {
        self.count(ContributionStatus::Error) > 0
    }

    pub fn store_ids(&self) -> Vec<StoreId> {
        self.records
            .values()
            .filter_map(|record| record.store_id.clone())
            .collect()
    }
}

#[cfg(test)]
#[path = "tests/aggregator_tests.rs"]
mod tests;
