use std::collections::{BTreeMap, BTreeSet, HashMap};

use shared::{
    domain::{PartySymbol, PeerId},
    protocol::{Binding, CodePartyStart, Registry},
};
use thiserror::Error;
use tracing::{debug, info};

use crate::extractor::ProgramDescriptor;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("program declares no party `{0}`")]
    UnknownParty(PartySymbol),
    #[error("peer `{0}` is not in the room registry")]
    UnknownPeer(PeerId),
    #[error("parties selected by more than one peer: {0:?}")]
    BindingConflict(Vec<PartySymbol>),
    #[error("{selected} of {declared} declared parties are covered")]
    CoverageConflict { selected: usize, declared: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConflictReport {
    pub binding_conflict: bool,
    pub coverage_conflict: bool,
}

impl ConflictReport {
    pub fn is_clear(&self) -> bool {
        !self.binding_conflict && !self.coverage_conflict
    }
}

/// True iff some party is selected by two or more peers.
pub fn binding_conflict<'a>(selected: impl IntoIterator<Item = &'a PartySymbol>) -> bool {
    let mut seen = BTreeSet::new();
    selected.into_iter().any(|symbol| !seen.insert(symbol))
}

/// True iff the distinct selected parties do not number the declared ones.
pub fn coverage_conflict<'a>(
    selected: impl IntoIterator<Item = &'a PartySymbol>,
    declared: usize,
) -> bool {
    selected.into_iter().collect::<BTreeSet<_>>().len() != declared
}

/// Incrementally built peer → party assignment for one published program.
#[derive(Debug, Clone)]
pub struct BindingResolver {
    descriptor: ProgramDescriptor,
    selections: BTreeMap<PeerId, PartySymbol>,
}

impl BindingResolver {
    pub fn new(descriptor: ProgramDescriptor) -> Self {
        Self {
            descriptor,
            selections: BTreeMap::new(),
        }
    }

    pub fn descriptor(&self) -> &ProgramDescriptor {
        &self.descriptor
    }

    pub fn selections(&self) -> &BTreeMap<PeerId, PartySymbol> {
        &self.selections
    }

    /// Records `peer → symbol`, replacing the peer's earlier choice.
    pub fn select(
        &mut self,
        peer: PeerId,
        symbol: PartySymbol,
    ) -> Result<Option<PartySymbol>, BindingError> {
        if self.descriptor.party(&symbol).is_none() {
            return Err(BindingError::UnknownParty(symbol));
        }
        debug!(%peer, %symbol, "party selected");
        Ok(self.selections.insert(peer, symbol))
    }

    pub fn deselect(&mut self, peer: &PeerId) -> Option<PartySymbol> {
        self.selections.remove(peer)
    }

    pub fn conflicts(&self) -> ConflictReport {
        ConflictReport {
            binding_conflict: binding_conflict(self.selections.values()),
            coverage_conflict: coverage_conflict(
                self.selections.values(),
                self.descriptor.parties.len(),
            ),
        }
    }

    fn contested_parties(&self) -> Vec<PartySymbol> {
        let mut counts: HashMap<&PartySymbol, usize> = HashMap::new();
        for symbol in self.selections.values() {
            *counts.entry(symbol).or_default() += 1;
        }
        self.descriptor
            .parties
            .keys()
            .filter(|symbol| counts.get(symbol).is_some_and(|count| *count > 1))
            .cloned()
            .collect()
    }

    pub fn validate(&self) -> Result<(), BindingError> {
        let report = self.conflicts();
        if report.binding_conflict {
            return Err(BindingError::BindingConflict(self.contested_parties()));
        }
        if report.coverage_conflict {
            return Err(BindingError::CoverageConflict {
                selected: self.selections.values().collect::<BTreeSet<_>>().len(),
                declared: self.descriptor.parties.len(),
            });
        }
        Ok(())
    }

    /// Builds the binding bundle to broadcast. Rejected while any conflict is
    /// present or when a selected peer has left the registry view.
    pub fn resolve(&self, owner: &PeerId, registry: &Registry) -> Result<CodePartyStart, BindingError> {
        self.validate()?;
        if let Some(missing) = self.selections.keys().find(|peer| !registry.contains(peer)) {
            return Err(BindingError::UnknownPeer(missing.clone()));
        }

        let by_party: HashMap<&PartySymbol, &PeerId> = self
            .selections
            .iter()
            .map(|(peer, symbol)| (symbol, peer))
            .collect();

        let mut peers = indexmap::IndexMap::with_capacity(self.descriptor.parties.len());
        for (symbol, decl) in &self.descriptor.parties {
            let peer_id = by_party
                .get(symbol)
                .copied()
                .ok_or_else(|| BindingError::CoverageConflict {
                    selected: by_party.len(),
                    declared: self.descriptor.parties.len(),
                })?;
            peers.insert(
                symbol.clone(),
                Binding {
                    owner_peer_id: owner.clone(),
                    peer_id: peer_id.clone(),
                    party_symbol: symbol.clone(),
                    party_name: decl.party_name.clone(),
                    program_id: self.descriptor.program_id.clone(),
                    inputs: decl.inputs.clone(),
                    output_name: decl.output_name.clone(),
                },
            );
        }

        info!(
            program_id = %self.descriptor.program_id,
            bindings = peers.len(),
            "bindings resolved"
        );
        Ok(CodePartyStart {
            peers,
            program_id: self.descriptor.program_id.clone(),
        })
    }
}

#[cfg(test)]
#[path = "tests/resolver_tests.rs"]
mod tests;
