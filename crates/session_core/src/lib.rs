pub mod aggregator;
pub mod client;
pub mod collaborators;
pub mod extractor;
pub mod handles;
pub mod resolver;
pub mod session;
pub mod stepper;
pub mod store;

pub use aggregator::{ContributionAggregator, ContributionRecord, LedgerUpdate};
pub use client::{fetch_baseline, room_url, ClientError, ClientEvent, PeerClient};
pub use collaborators::{
    CollaboratorError, ComputeBindings, Faucet, HttpBackend, MissingMpcClient, MpcClient,
    ProgramUploader,
};
pub use extractor::{extract, ExtractError, PartyDecl, PartyTable, ProgramDescriptor};
pub use handles::handle_for;
pub use resolver::{BindingError, BindingResolver, ConflictReport};
pub use session::{contribute, ContributionAttempt, OwnerSession, SessionError};
pub use stepper::{SessionState, SessionStepper, StepError};
pub use store::{SessionStore, StoreEvent};
