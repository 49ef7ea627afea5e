use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use serde::{ser::Error as _, Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::{
    domain::{ConnectionId, ContributionStatus, Handle, PartySymbol, PeerId, ProgramId, StoreId},
    error::ProtocolError,
};

pub const REGISTER: &str = "register";
pub const BASELINE: &str = "baseline";
pub const CODEPARTY_START: &str = "codeparty-start";
pub const CODEPARTY_TASK: &str = "codeparty-task";
pub const CONTRIB: &str = "contrib";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    pub handle: Handle,
    pub peer_id: PeerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_peer_id: Option<ConnectionId>,
}

/// Room phone book keyed by stable peer identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Registry {
    peers: BTreeMap<PeerId, PeerRecord>,
}

impl Registry {
    /// Last write wins for a repeated peer id.
    pub fn insert(&mut self, record: PeerRecord) -> Option<PeerRecord> {
        self.peers.insert(record.peer_id.clone(), record)
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&PeerRecord> {
        self.peers.get(peer_id)
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    /// Display projection; several peers may share one handle.
    pub fn handles(&self) -> Vec<(&PeerId, &Handle)> {
        self.peers
            .iter()
            .map(|(peer_id, record)| (peer_id, &record.handle))
            .collect()
    }

    pub fn find_by_handle<'a>(&'a self, handle: &'a Handle) -> impl Iterator<Item = &'a PeerRecord> {
        self.peers.values().filter(move |record| &record.handle == handle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    pub chain_id: String,
    pub chain_name: String,
    #[serde(default)]
    pub icon_urls: Vec<String>,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<String>,
    #[serde(default)]
    pub block_explorer_urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentsConfig {
    pub rpc_endpoint: String,
    pub chain_id: u64,
    pub payments_address: String,
    pub blinding_factors_manager_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    pub cluster_id: String,
    pub bootnodes: Vec<String>,
    pub payments_config: PaymentsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baseline {
    pub chain: ChainConfig,
    pub config: ClusterConfig,
    pub peers: Registry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDecl {
    #[serde(rename = "type")]
    pub ty: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    pub owner_peer_id: PeerId,
    pub peer_id: PeerId,
    pub party_symbol: PartySymbol,
    pub party_name: String,
    pub program_id: ProgramId,
    pub inputs: Vec<InputDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodePartyStart {
    pub peers: IndexMap<PartySymbol, Binding>,
    pub program_id: ProgramId,
}

impl CodePartyStart {
    pub fn binding_for(&self, peer_id: &PeerId) -> Option<&Binding> {
        self.peers.values().find(|binding| &binding.peer_id == peer_id)
    }

    /// Every binding names a different peer.
    pub fn is_injective(&self) -> bool {
        let mut seen = BTreeSet::new();
        self.peers.values().all(|binding| seen.insert(&binding.peer_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contribution {
    pub peer_id: PeerId,
    pub status: ContributionStatus,
    pub program_id: ProgramId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_id: Option<StoreId>,
}

/// Untyped `{type, payload}` wrapper as it travels on the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawEnvelope")]
pub enum Envelope {
    Register(PeerRecord),
    Baseline(Baseline),
    CodePartyStart(CodePartyStart),
    CodePartyTask(Binding),
    Contrib(Contribution),
    /// Tag this build does not know; the payload is kept untouched.
    Unknown { kind: String, payload: Value },
}

impl Envelope {
    pub fn kind(&self) -> &str {
        match self {
            Envelope::Register(_) => REGISTER,
            Envelope::Baseline(_) => BASELINE,
            Envelope::CodePartyStart(_) => CODEPARTY_START,
            Envelope::CodePartyTask(_) => CODEPARTY_TASK,
            Envelope::Contrib(_) => CONTRIB,
            Envelope::Unknown { kind, .. } => kind,
        }
    }

    /// Session topic of the envelope, if it is session scoped.
    pub fn program_id(&self) -> Option<&ProgramId> {
        match self {
            Envelope::CodePartyStart(start) => Some(&start.program_id),
            Envelope::CodePartyTask(binding) => Some(&binding.program_id),
            Envelope::Contrib(contribution) => Some(&contribution.program_id),
            Envelope::Register(_) | Envelope::Baseline(_) | Envelope::Unknown { .. } => None,
        }
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawEnvelope = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
        Self::try_from(raw)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Malformed)
    }

    fn payload_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Envelope::Register(record) => serde_json::to_value(record),
            Envelope::Baseline(baseline) => serde_json::to_value(baseline),
            Envelope::CodePartyStart(start) => serde_json::to_value(start),
            Envelope::CodePartyTask(binding) => serde_json::to_value(binding),
            Envelope::Contrib(contribution) => serde_json::to_value(contribution),
            Envelope::Unknown { payload, .. } => Ok(payload.clone()),
        }
    }
}

impl TryFrom<RawEnvelope> for Envelope {
    type Error = ProtocolError;

    fn try_from(raw: RawEnvelope) -> Result<Self, Self::Error> {
        fn typed<T: serde::de::DeserializeOwned>(
            kind: &str,
            payload: Value,
        ) -> Result<T, ProtocolError> {
            serde_json::from_value(payload).map_err(|source| ProtocolError::InvalidPayload {
                kind: kind.to_string(),
                source,
            })
        }

        let RawEnvelope { kind, payload } = raw;
        let envelope = match kind.as_str() {
            REGISTER => Envelope::Register(typed(&kind, payload)?),
            BASELINE => Envelope::Baseline(typed(&kind, payload)?),
            CODEPARTY_START => Envelope::CodePartyStart(typed(&kind, payload)?),
            CODEPARTY_TASK => Envelope::CodePartyTask(typed(&kind, payload)?),
            CONTRIB => Envelope::Contrib(typed(&kind, payload)?),
            _ => Envelope::Unknown { kind, payload },
        };
        Ok(envelope)
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let payload = self.payload_value().map_err(S::Error::custom)?;
        RawEnvelope {
            kind: self.kind().to_string(),
            payload,
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
