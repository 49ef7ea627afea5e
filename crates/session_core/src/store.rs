use std::collections::HashSet;

use indexmap::IndexMap;
use shared::{
    domain::{ContributionStatus, PartySymbol, PeerId, ProgramId},
    protocol::{
        self, Baseline, Binding, ChainConfig, ClusterConfig, CodePartyStart, Contribution,
        Envelope, Registry,
    },
};
use tracing::{debug, info, warn};

use crate::aggregator::{ContributionAggregator, LedgerUpdate};

/// Outcome of folding one envelope into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    RegistryReplaced { peers: usize },
    BindingsObserved { program_id: ProgramId, bindings: usize },
    PromptOpened(Binding),
    ContributionRecorded {
        peer_id: PeerId,
        status: ContributionStatus,
        complete: bool,
    },
    Ignored { kind: String, reason: &'static str },
}

#[derive(Debug, Clone)]
struct ActiveSession {
    program_id: ProgramId,
    bindings: IndexMap<PartySymbol, Binding>,
    ledger: ContributionAggregator,
    mine: Option<Binding>,
}

impl ActiveSession {
    fn empty(program_id: ProgramId) -> Self {
        Self {
            ledger: ContributionAggregator::new(program_id.clone(), Vec::new()),
            program_id,
            bindings: IndexMap::new(),
            mine: None,
        }
    }
}

/// Local, non-authoritative view of the room rebuilt from the envelope
/// stream in arrival order.
#[derive(Debug, Clone)]
pub struct SessionStore {
    me: PeerId,
    registry: Registry,
    chain: Option<ChainConfig>,
    cluster: Option<ClusterConfig>,
    active: Option<ActiveSession>,
    prompted: HashSet<ProgramId>,
    prompt: Option<Binding>,
}

impl SessionStore {
    pub fn new(me: PeerId) -> Self {
        Self {
            me,
            registry: Registry::default(),
            chain: None,
            cluster: None,
            active: None,
            prompted: HashSet::new(),
            prompt: None,
        }
    }

    pub fn me(&self) -> &PeerId {
        &self.me
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn chain(&self) -> Option<&ChainConfig> {
        self.chain.as_ref()
    }

    pub fn cluster(&self) -> Option<&ClusterConfig> {
        self.cluster.as_ref()
    }

    pub fn active_program(&self) -> Option<&ProgramId> {
        self.active.as_ref().map(|session| &session.program_id)
    }

    pub fn bindings(&self) -> Option<&IndexMap<PartySymbol, Binding>> {
        self.active.as_ref().map(|session| &session.bindings)
    }

    pub fn ledger(&self) -> Option<&ContributionAggregator> {
        self.active.as_ref().map(|session| &session.ledger)
    }

    pub fn is_complete(&self) -> bool {
        self.ledger().is_some_and(ContributionAggregator::is_complete)
    }

    /// Contribution prompt waiting for the local user, if any.
    pub fn prompt(&self) -> Option<&Binding> {
        self.prompt.as_ref()
    }

    pub fn take_prompt(&mut self) -> Option<Binding> {
        self.prompt.take()
    }

    /// This peer's binding in the active session, kept after the prompt is
    /// taken so a failed contribution can be resubmitted.
    pub fn my_binding(&self) -> Option<&Binding> {
        self.active.as_ref()?.mine.as_ref()
    }

    /// Makes `program_id` the session this store follows. Used by the owner
    /// right after publishing.
    pub fn activate(&mut self, program_id: ProgramId) {
        if self.active_program() == Some(&program_id) {
            return;
        }
        info!(%program_id, "session activated");
        self.active = Some(ActiveSession::empty(program_id));
    }

    /// Local cancellation; nothing is sent to the room.
    pub fn deactivate(&mut self) -> Option<ProgramId> {
        self.prompt = None;
        self.active.take().map(|session| session.program_id)
    }

    /// Installs the binding set of the active session. The set is frozen
    /// once installed; a differing bundle for the same program is refused,
    /// as is a bundle that binds one peer to several parties.
    pub fn adopt_bindings(&mut self, start: &CodePartyStart) -> bool {
        if !start.is_injective() {
            warn!(program_id = %start.program_id, "bundle binds a peer to several parties; ignored");
            return false;
        }
        let Some(session) = self.active.as_mut() else {
            return false;
        };
        if session.program_id != start.program_id {
            return false;
        }
        if !session.bindings.is_empty() {
            if session.bindings != start.peers {
                warn!(program_id = %start.program_id, "binding set is frozen; differing bundle ignored");
                return false;
            }
            return true;
        }
        session.bindings = start.peers.clone();
        session.ledger = ContributionAggregator::from_start(start);
        true
    }

    fn open_prompt(&mut self, binding: &Binding) -> bool {
        if binding.peer_id != self.me || !self.prompted.insert(binding.program_id.clone()) {
            return false;
        }
        info!(
            program_id = %binding.program_id,
            party = %binding.party_symbol,
            "contribution prompt opened"
        );
        if let Some(session) = self.active.as_mut() {
            if session.program_id == binding.program_id {
                session.mine = Some(binding.clone());
            }
        }
        self.prompt = Some(binding.clone());
        true
    }

    pub fn apply(&mut self, envelope: Envelope) -> StoreEvent {
        debug!(kind = envelope.kind(), "applying envelope");
        match envelope {
            Envelope::Baseline(baseline) => self.apply_baseline(baseline),
            Envelope::CodePartyStart(start) => self.apply_start(start),
            Envelope::CodePartyTask(binding) => self.apply_task(binding),
            Envelope::Contrib(contribution) => self.apply_contribution(contribution),
            Envelope::Register(_) => StoreEvent::Ignored {
                kind: protocol::REGISTER.to_string(),
                reason: "registration is consumed by the hub",
            },
            Envelope::Unknown { kind, .. } => StoreEvent::Ignored {
                kind,
                reason: "unknown envelope type",
            },
        }
    }

    fn apply_baseline(&mut self, baseline: Baseline) -> StoreEvent {
        let Baseline {
            chain,
            config,
            peers,
        } = baseline;
        self.registry = peers;
        self.chain = Some(chain);
        self.cluster = Some(config);
        StoreEvent::RegistryReplaced {
            peers: self.registry.len(),
        }
    }

    /// Follows `program_id` when a binding addressed to this peer names a
    /// program it has not been prompted for yet.
    fn follow(&mut self, program_id: &ProgramId) {
        if self.active_program() == Some(program_id) || self.prompted.contains(program_id) {
            return;
        }
        if let Some(previous) = self.active_program() {
            info!(%previous, next = %program_id, "switching to a new session");
        }
        self.active = Some(ActiveSession::empty(program_id.clone()));
        self.prompt = None;
    }

    fn apply_start(&mut self, start: CodePartyStart) -> StoreEvent {
        if !start.is_injective() {
            warn!(program_id = %start.program_id, "bundle binds a peer to several parties; ignored");
            return StoreEvent::Ignored {
                kind: protocol::CODEPARTY_START.to_string(),
                reason: "bundle binds a peer to several parties",
            };
        }
        let addressed = start.binding_for(&self.me).cloned();
        if addressed.is_some() {
            self.follow(&start.program_id);
        }
        if self.active_program() != Some(&start.program_id) {
            return StoreEvent::Ignored {
                kind: protocol::CODEPARTY_START.to_string(),
                reason: "bindings for a session this peer does not follow",
            };
        }
        if !self.adopt_bindings(&start) {
            return StoreEvent::Ignored {
                kind: protocol::CODEPARTY_START.to_string(),
                reason: "binding set already frozen",
            };
        }
        if let Some(binding) = addressed {
            if self.open_prompt(&binding) {
                return StoreEvent::PromptOpened(binding);
            }
        }
        StoreEvent::BindingsObserved {
            program_id: start.program_id,
            bindings: start.peers.len(),
        }
    }

    fn apply_task(&mut self, binding: Binding) -> StoreEvent {
        if binding.peer_id != self.me {
            return StoreEvent::Ignored {
                kind: protocol::CODEPARTY_TASK.to_string(),
                reason: "task addressed to another peer",
            };
        }
        self.follow(&binding.program_id);
        if self.open_prompt(&binding) {
            StoreEvent::PromptOpened(binding)
        } else {
            StoreEvent::Ignored {
                kind: protocol::CODEPARTY_TASK.to_string(),
                reason: "prompt already opened for this program",
            }
        }
    }

    fn apply_contribution(&mut self, contribution: Contribution) -> StoreEvent {
        let Some(session) = self.active.as_mut() else {
            return StoreEvent::Ignored {
                kind: protocol::CONTRIB.to_string(),
                reason: "no active session",
            };
        };
        if session.program_id != contribution.program_id {
            return StoreEvent::Ignored {
                kind: protocol::CONTRIB.to_string(),
                reason: "contribution for another program",
            };
        }
        match session.ledger.apply(&contribution) {
            LedgerUpdate::Recorded { current, .. } => StoreEvent::ContributionRecorded {
                peer_id: contribution.peer_id,
                status: current,
                complete: session.ledger.is_complete(),
            },
            LedgerUpdate::Ignored(_) => StoreEvent::Ignored {
                kind: protocol::CONTRIB.to_string(),
                reason: "contribution does not change the ledger",
            },
        }
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
