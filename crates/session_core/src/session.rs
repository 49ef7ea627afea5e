//! Drivers for the two roles a peer plays: the owner who publishes and binds a
//! program, and a bound party that contributes its inputs.

use std::collections::BTreeMap;

use shared::{
    domain::{ContributionStatus, PartySymbol, PeerId, ProgramId},
    protocol::{Binding, Contribution, Envelope},
};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    collaborators::{secrets_for_binding, CollaboratorError, ComputeBindings, MpcClient, ProgramUploader},
    extractor::{extract, ExtractError, PartyTable, ProgramDescriptor},
    resolver::{BindingError, BindingResolver, ConflictReport},
    stepper::{SessionState, SessionStepper, StepError},
    store::SessionStore,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Step(#[from] StepError),
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error("no program has been published yet")]
    NotPublished,
    #[error("room configuration has not arrived from the hub")]
    NoClusterConfig,
    #[error("program {0} is not the active session")]
    Inactive(ProgramId),
    #[error("peer {0} holds no binding in the active session")]
    NotBound(PeerId),
}

/// Owner side of one session: draft source, published descriptor, party
/// selections and the lifecycle stepper.
#[derive(Debug, Clone)]
pub struct OwnerSession {
    me: PeerId,
    program_name: String,
    source: String,
    stepper: SessionStepper,
    resolver: Option<BindingResolver>,
}

impl OwnerSession {
    pub fn new(me: PeerId, program_name: impl Into<String>) -> Self {
        Self {
            me,
            program_name: program_name.into(),
            source: String::new(),
            stepper: SessionStepper::new(),
            resolver: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.stepper.state()
    }

    pub fn stepper(&self) -> &SessionStepper {
        &self.stepper
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn program_id(&self) -> Option<&ProgramId> {
        self.stepper.program_id()
    }

    pub fn descriptor(&self) -> Option<&ProgramDescriptor> {
        self.resolver.as_ref().map(BindingResolver::descriptor)
    }

    fn require(&self, state: SessionState, action: &'static str) -> Result<(), SessionError> {
        if self.stepper.state() == state {
            Ok(())
        } else {
            Err(StepError::InvalidTransition {
                state: self.stepper.state(),
                action,
            }
            .into())
        }
    }

    /// Replaces the draft and returns the party table it declares. The
    /// source is kept even when extraction fails so editing can continue.
    pub fn edit_source(&mut self, source: impl Into<String>) -> Result<PartyTable, SessionError> {
        self.require(SessionState::Draft, "edit")?;
        self.source = source.into();
        Ok(extract(&self.source)?)
    }

    /// Uploads the draft. The descriptor is frozen from the exact text that
    /// was uploaded.
    pub async fn publish(&mut self, uploader: &dyn ProgramUploader) -> Result<ProgramId, SessionError> {
        self.require(SessionState::Draft, "publish")?;
        let parties = extract(&self.source)?;
        let outcome = uploader.upload(&self.program_name, &self.source).await;
        let program_id = self.stepper.publish(outcome)?;
        info!(%program_id, parties = parties.len(), "program published");
        self.resolver = Some(BindingResolver::new(ProgramDescriptor::new(
            program_id.clone(),
            parties,
        )));
        Ok(program_id)
    }

    fn resolver_mut(&mut self) -> Result<&mut BindingResolver, SessionError> {
        self.require(SessionState::Published, "select parties for")?;
        self.resolver.as_mut().ok_or(SessionError::NotPublished)
    }

    pub fn select(&mut self, peer: PeerId, party: PartySymbol) -> Result<Option<PartySymbol>, SessionError> {
        Ok(self.resolver_mut()?.select(peer, party)?)
    }

    pub fn deselect(&mut self, peer: &PeerId) -> Result<Option<PartySymbol>, SessionError> {
        Ok(self.resolver_mut()?.deselect(peer))
    }

    pub fn conflicts(&self) -> Option<ConflictReport> {
        self.resolver.as_ref().map(BindingResolver::conflicts)
    }

    /// Freezes the selections into bindings and returns the bundle to send.
    /// The store adopts the bundle so the owner's ledger starts immediately.
    pub fn submit_bindings(&mut self, store: &mut SessionStore) -> Result<Envelope, SessionError> {
        let resolver = self.resolver.as_ref().ok_or(SessionError::NotPublished)?;
        let start = resolver.resolve(&self.me, store.registry())?;
        self.stepper.bind(resolver)?;
        store.activate(start.program_id.clone());
        store.adopt_bindings(&start);
        Ok(Envelope::CodePartyStart(start))
    }

    /// Re-sends one peer's binding, for a peer that missed the bundle.
    pub fn task_for(&self, store: &SessionStore, peer: &PeerId) -> Result<Envelope, SessionError> {
        let program_id = self.program_id().ok_or(SessionError::NotPublished)?;
        if store.active_program() != Some(program_id) {
            return Err(SessionError::Inactive(program_id.clone()));
        }
        store
            .bindings()
            .and_then(|bindings| bindings.values().find(|binding| &binding.peer_id == peer))
            .cloned()
            .map(Envelope::CodePartyTask)
            .ok_or_else(|| SessionError::NotBound(peer.clone()))
    }

    /// Runs the program once every bound peer has stored its inputs. `store`
    /// is a snapshot; the call does not hold the live view across the
    /// network round trip.
    pub async fn execute(
        &mut self,
        store: &SessionStore,
        mpc: &dyn MpcClient,
    ) -> Result<BTreeMap<String, String>, SessionError> {
        let program_id = self.program_id().cloned().ok_or(SessionError::NotPublished)?;
        let (Some(ledger), Some(bindings)) = (store.ledger(), store.bindings()) else {
            return Err(SessionError::Inactive(program_id));
        };
        let cluster_id = store
            .cluster()
            .map(|cluster| cluster.cluster_id.clone())
            .ok_or(SessionError::NoClusterConfig)?;
        self.stepper.begin_execution(ledger)?;

        let compute = ComputeBindings::from_bindings(program_id.clone(), bindings.values());
        let outcome = mpc.compute(&cluster_id, &compute, &ledger.store_ids()).await;
        self.stepper
            .finish(outcome.as_ref().map(|_| ()).map_err(ToString::to_string))?;
        let outputs = outcome?;
        info!(%program_id, outputs = outputs.len(), "program executed");
        Ok(outputs)
    }

    pub fn return_to_bound(&mut self) -> Result<(), SessionError> {
        Ok(self.stepper.return_to_bound()?)
    }

    /// Local only; peers keep their view until they cancel themselves.
    pub fn abort(&mut self, store: &mut SessionStore) -> Result<(), SessionError> {
        self.stepper.abort()?;
        store.deactivate();
        Ok(())
    }
}

/// Result of one contribution attempt. The envelope is sent whether the
/// secret was stored or not; a failure is reported alongside it.
#[derive(Debug)]
pub struct ContributionAttempt {
    pub envelope: Envelope,
    pub failure: Option<CollaboratorError>,
}

/// Stores this peer's inputs and builds the "contrib" envelope announcing the
/// outcome. Values that do not parse for their declared type are rejected
/// before any network call and nothing is announced.
pub async fn contribute(
    store: &SessionStore,
    values: &BTreeMap<String, String>,
    mpc: &dyn MpcClient,
) -> Result<ContributionAttempt, SessionError> {
    let binding: &Binding = store
        .my_binding()
        .ok_or_else(|| SessionError::NotBound(store.me().clone()))?;
    let secrets = secrets_for_binding(binding, values)?;
    let cluster_id = store
        .cluster()
        .map(|cluster| cluster.cluster_id.as_str())
        .ok_or(SessionError::NoClusterConfig)?;

    let (status, store_id, failure) = match mpc.store_secrets(cluster_id, binding, secrets).await {
        Ok(store_id) => {
            info!(program_id = %binding.program_id, %store_id, "inputs stored");
            (ContributionStatus::Ok, Some(store_id), None)
        }
        Err(err) => {
            warn!(program_id = %binding.program_id, error = %err, "storing inputs failed");
            (ContributionStatus::Error, None, Some(err))
        }
    };
    Ok(ContributionAttempt {
        envelope: Envelope::Contrib(Contribution {
            peer_id: binding.peer_id.clone(),
            status,
            program_id: binding.program_id.clone(),
            store_id,
        }),
        failure,
    })
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
