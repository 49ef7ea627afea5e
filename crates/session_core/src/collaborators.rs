//! Seams to the services the coordination protocol depends on but does not
//! implement: the program compiler/uploader, the faucet and the MPC client.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use shared::{
    domain::{PeerId, ProgramId, StoreId},
    protocol::{Binding, InputDecl},
};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("program upload rejected: {0}")]
    UploadRejected(String),
    #[error("funding rejected: {0}")]
    FundingRejected(String),
    #[error("input `{name}` has unsupported type `{ty}`")]
    UnsupportedInputType { name: String, ty: String },
    #[error("input `{name}` expects {expected}, got `{value}`")]
    InvalidInputValue {
        name: String,
        expected: &'static str,
        value: String,
    },
    #[error("no value supplied for input `{0}`")]
    MissingInputValue(String),
    #[error("mpc client error: {0}")]
    Mpc(String),
    #[error("no MPC client is configured")]
    MissingMpcClient,
}

#[async_trait]
pub trait ProgramUploader: Send + Sync {
    async fn upload(&self, program_name: &str, source: &str) -> Result<ProgramId, CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingReceipt {
    pub tx: Option<String>,
}

#[async_trait]
pub trait Faucet: Send + Sync {
    async fn fund(&self, address: &str) -> Result<FundingReceipt, CollaboratorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretValue {
    Integer(i64),
    UnsignedInteger(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedSecret {
    pub name: String,
    pub value: SecretValue,
}

/// Parses a user supplied value for a declared input.
pub fn secret_for_input(input: &InputDecl, raw: &str) -> Result<SecretValue, CollaboratorError> {
    let raw = raw.trim();
    match input.ty.as_str() {
        "Integer" | "SecretInteger" | "PublicInteger" => raw
            .parse::<i64>()
            .map(SecretValue::Integer)
            .map_err(|_| CollaboratorError::InvalidInputValue {
                name: input.name.clone(),
                expected: "a signed integer",
                value: raw.to_string(),
            }),
        "UnsignedInteger" | "SecretUnsignedInteger" | "PublicUnsignedInteger" => raw
            .parse::<u64>()
            .map(SecretValue::UnsignedInteger)
            .map_err(|_| CollaboratorError::InvalidInputValue {
                name: input.name.clone(),
                expected: "an unsigned integer",
                value: raw.to_string(),
            }),
        other => Err(CollaboratorError::UnsupportedInputType {
            name: input.name.clone(),
            ty: other.to_string(),
        }),
    }
}

/// Pairs every declared input of `binding` with its parsed value.
pub fn secrets_for_binding(
    binding: &Binding,
    values: &BTreeMap<String, String>,
) -> Result<Vec<NamedSecret>, CollaboratorError> {
    binding
        .inputs
        .iter()
        .map(|input| {
            let raw = values
                .get(&input.name)
                .ok_or_else(|| CollaboratorError::MissingInputValue(input.name.clone()))?;
            Ok(NamedSecret {
                name: input.name.clone(),
                value: secret_for_input(input, raw)?,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartyAssignment {
    pub party_name: String,
    pub peer_id: PeerId,
}

/// Party wiring handed to the MPC client for one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeBindings {
    pub program_id: ProgramId,
    pub input_parties: Vec<PartyAssignment>,
    pub output_parties: Vec<PartyAssignment>,
    pub output_names: Vec<String>,
}

impl ComputeBindings {
    pub fn from_bindings<'a>(
        program_id: ProgramId,
        bindings: impl IntoIterator<Item = &'a Binding>,
    ) -> Self {
        let mut compute = Self {
            program_id,
            input_parties: Vec::new(),
            output_parties: Vec::new(),
            output_names: Vec::new(),
        };
        for binding in bindings {
            let assignment = PartyAssignment {
                party_name: binding.party_name.clone(),
                peer_id: binding.peer_id.clone(),
            };
            if let Some(output_name) = &binding.output_name {
                compute.output_parties.push(assignment.clone());
                compute.output_names.push(output_name.clone());
            }
            compute.input_parties.push(assignment);
        }
        compute
    }
}

#[async_trait]
pub trait MpcClient: Send + Sync {
    async fn store_secrets(
        &self,
        cluster_id: &str,
        binding: &Binding,
        secrets: Vec<NamedSecret>,
    ) -> Result<StoreId, CollaboratorError>;

    /// Returns output name → rendered value.
    async fn compute(
        &self,
        cluster_id: &str,
        bindings: &ComputeBindings,
        store_ids: &[StoreId],
    ) -> Result<BTreeMap<String, String>, CollaboratorError>;
}

pub struct MissingMpcClient;

#[async_trait]
impl MpcClient for MissingMpcClient {
    async fn store_secrets(
        &self,
        _cluster_id: &str,
        _binding: &Binding,
        _secrets: Vec<NamedSecret>,
    ) -> Result<StoreId, CollaboratorError> {
        Err(CollaboratorError::MissingMpcClient)
    }

    async fn compute(
        &self,
        _cluster_id: &str,
        _bindings: &ComputeBindings,
        _store_ids: &[StoreId],
    ) -> Result<BTreeMap<String, String>, CollaboratorError> {
        Err(CollaboratorError::MissingMpcClient)
    }
}

#[derive(Debug, Serialize)]
struct UploadRequest<'a> {
    nadalang: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackendResponse {
    status_code: u16,
    #[serde(default, rename = "programid")]
    program_id: Option<String>,
    #[serde(default)]
    tx: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for the program upload and faucet backend.
#[derive(Clone)]
pub struct HttpBackend {
    http: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn post(&self, path: &str, body: Option<&UploadRequest<'_>>) -> Result<BackendResponse, reqwest::Error> {
        let mut request = self.http.post(format!("{}{path}", self.base_url));
        if let Some(body) = body {
            request = request.json(body);
        }
        request.send().await?.error_for_status()?.json().await
    }
}

#[async_trait]
impl ProgramUploader for HttpBackend {
    async fn upload(&self, program_name: &str, source: &str) -> Result<ProgramId, CollaboratorError> {
        let encoded = STANDARD.encode(source.as_bytes());
        let response = self
            .post(
                &format!("/upload-nada-source/{program_name}"),
                Some(&UploadRequest { nadalang: &encoded }),
            )
            .await?;
        if response.status_code != 200 {
            let message = response
                .error
                .unwrap_or_else(|| format!("backend status {}", response.status_code));
            warn!(program_name, %message, "program upload rejected");
            return Err(CollaboratorError::UploadRejected(message));
        }
        let program_id = response
            .program_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| CollaboratorError::UploadRejected("response carried no program id".into()))?;
        info!(program_name, %program_id, "program uploaded");
        Ok(ProgramId::new(program_id))
    }
}

#[async_trait]
impl Faucet for HttpBackend {
    async fn fund(&self, address: &str) -> Result<FundingReceipt, CollaboratorError> {
        let response = self.post(&format!("/faucet/{address}"), None).await?;
        if response.status_code != 200 {
            let message = response
                .error
                .unwrap_or_else(|| format!("backend status {}", response.status_code));
            warn!(address, %message, "faucet request rejected");
            return Err(CollaboratorError::FundingRejected(message));
        }
        info!(address, "account funded");
        Ok(FundingReceipt { tx: response.tx })
    }
}

#[cfg(test)]
#[path = "tests/collaborators_tests.rs"]
mod tests;
