//! Standards-gateway connector.
//!
//! Authenticates with a client certificate (mutual TLS) and trades the
//! handshake for a short-lived bearer token. Submissions are structured
//! message envelopes; every response carries a machine-readable outcome code
//! and an optional list of coded errors.

pub mod envelope;
pub mod token;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use claimbridge_model::{
    ClaimSubmission, ConnectorId, ConnectorKind, CoverageStatus, Disposition,
    EligibilityKey, RejectionReason, TargetStatus,
};
use reqwest::{Client, Identity, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use self::envelope::{MessageEnvelope, eligibility_envelope, submission_envelope};
use self::token::{AccessToken, TokenCache};
use super::{
    Connector, ConnectorDescriptor, ConnectorError, ConnectorResult,
    SubmissionReceipt,
};
use crate::eligibility::{EligibilityVerifier, VerifiedCoverage};
use crate::error::{ClaimError, Result};

fn default_gateway_id() -> ConnectorId {
    ConnectorId::unchecked("gateway")
}

fn default_source_endpoint() -> String {
    "urn:claimbridge".to_string()
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_token_refresh_skew_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_id")]
    pub id: ConnectorId,
    pub base_url: Url,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// PEM file holding the client certificate followed by its private key.
    #[serde(default)]
    pub identity_pem: Option<PathBuf>,
    #[serde(default = "default_source_endpoint")]
    pub source_endpoint: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Refresh the token this long before it expires.
    #[serde(default = "default_token_refresh_skew_secs")]
    pub token_refresh_skew_secs: u64,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub requires_eligibility: bool,
}

impl GatewayConfig {
    pub fn new(base_url: Url, client_id: impl Into<String>) -> Self {
        Self {
            id: default_gateway_id(),
            base_url,
            client_id: client_id.into(),
            client_secret: None,
            identity_pem: None,
            source_endpoint: default_source_endpoint(),
            request_timeout_ms: default_request_timeout_ms(),
            token_refresh_skew_secs: default_token_refresh_skew_secs(),
            priority: 0,
            requires_eligibility: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum GatewayOutcome {
    Accepted,
    Queued,
    Partial,
    Rejected,
    Error,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorItem {
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    outcome: GatewayOutcome,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    errors: Vec<GatewayErrorItem>,
    #[serde(default)]
    coverage: Option<CoverageStatus>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: TargetStatus,
}

#[derive(Debug)]
pub struct GatewayConnector {
    descriptor: ConnectorDescriptor,
    config: GatewayConfig,
    client: Client,
    tokens: TokenCache,
}

impl GatewayConnector {
    pub fn new(mut config: GatewayConfig) -> Result<Self> {
        // `Url::join` drops the last segment unless the base ends in '/'.
        if !config.base_url.path().ends_with('/') {
            let path = format!("{}/", config.base_url.path());
            config.base_url.set_path(&path);
        }
        let mut builder = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .use_rustls_tls();
        if let Some(path) = &config.identity_pem {
            let pem = std::fs::read(path).map_err(|err| {
                ClaimError::Config(format!(
                    "failed to read gateway identity {}: {err}",
                    path.display()
                ))
            })?;
            let identity = Identity::from_pem(&pem).map_err(|err| {
                ClaimError::Config(format!("invalid gateway identity: {err}"))
            })?;
            builder = builder.identity(identity);
        }
        let client = builder.build().map_err(|err| {
            ClaimError::Config(format!("failed to build gateway client: {err}"))
        })?;

        let descriptor = ConnectorDescriptor {
            id: config.id.clone(),
            kind: ConnectorKind::StandardsGateway,
            priority: config.priority,
            requires_eligibility: config.requires_eligibility,
        };
        let tokens =
            TokenCache::new(Duration::from_secs(config.token_refresh_skew_secs));
        Ok(Self {
            descriptor,
            config,
            client,
            tokens,
        })
    }

    fn endpoint(&self, path: &str) -> ConnectorResult<Url> {
        self.config.base_url.join(path).map_err(|err| {
            ConnectorError::MalformedResponse(format!(
                "cannot build gateway url for {path}: {err}"
            ))
        })
    }

    async fn fetch_token(&self) -> ConnectorResult<AccessToken> {
        let url = self.endpoint("oauth/token")?;
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let response = self.client.post(url).form(&form).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ConnectorError::from_status(status, "token request"));
        }
        let body: TokenResponse = response.json().await.map_err(|err| {
            ConnectorError::MalformedResponse(format!(
                "unreadable token response: {err}"
            ))
        })?;
        debug!(
            target: "claims::connectors",
            connector = %self.descriptor.id,
            expires_in = body.expires_in,
            "gateway token issued"
        );
        Ok(AccessToken::new(
            body.access_token,
            Duration::from_secs(body.expires_in),
        ))
    }

    async fn bearer(&self) -> ConnectorResult<String> {
        self.tokens.get_or_refresh(|| self.fetch_token()).await
    }

    async fn send_envelope(
        &self,
        envelope: &MessageEnvelope,
    ) -> ConnectorResult<GatewayResponse> {
        let token = self.bearer().await?;
        let url = self.endpoint("$process-message")?;
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(envelope)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            // Server-side revocation: never present this token again.
            self.tokens.invalidate().await;
        }
        // Structured declines arrive as 422 with a normal response body.
        if !status.is_success() && status != StatusCode::UNPROCESSABLE_ENTITY {
            return Err(ConnectorError::from_status(status, "process-message"));
        }
        response.json::<GatewayResponse>().await.map_err(|err| {
            ConnectorError::MalformedResponse(format!(
                "unreadable gateway response: {err}"
            ))
        })
    }
}

fn rejection_reasons(errors: Vec<GatewayErrorItem>) -> Vec<RejectionReason> {
    errors
        .into_iter()
        .map(|item| RejectionReason::new(item.code, item.message))
        .collect()
}

fn receipt_from(response: GatewayResponse) -> ConnectorResult<SubmissionReceipt> {
    let disposition = match response.outcome {
        GatewayOutcome::Accepted => Disposition::Accepted,
        GatewayOutcome::Queued => Disposition::Queued,
        GatewayOutcome::Partial => Disposition::PartiallyApproved,
        GatewayOutcome::Rejected => {
            return Err(ConnectorError::rejection(rejection_reasons(
                response.errors,
            )));
        }
        GatewayOutcome::Error => {
            let detail = rejection_reasons(response.errors)
                .into_iter()
                .map(|r| format!("{}: {}", r.code, r.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ConnectorError::transient(format!(
                "gateway processing error: {detail}"
            )));
        }
    };
    let reference = response
        .reference
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| {
            ConnectorError::MalformedResponse(
                "gateway accepted the message without a reference".to_string(),
            )
        })?;
    Ok(SubmissionReceipt {
        reference,
        disposition,
    })
}

#[async_trait]
impl Connector for GatewayConnector {
    fn descriptor(&self) -> &ConnectorDescriptor {
        &self.descriptor
    }

    async fn authenticate(&self) -> ConnectorResult<()> {
        self.tokens.invalidate().await;
        self.bearer().await.map(|_| ())
    }

    async fn submit(
        &self,
        claim: &ClaimSubmission,
    ) -> ConnectorResult<SubmissionReceipt> {
        let envelope = submission_envelope(claim, &self.config.source_endpoint)
            .map_err(|err| {
                warn!(
                    target: "claims::connectors",
                    claim_id = %claim.claim_id,
                    error = %err,
                    "refusing to send invalid envelope"
                );
                ConnectorError::MalformedResponse(format!(
                    "outbound envelope invalid: {err}"
                ))
            })?;
        let response = self.send_envelope(&envelope).await?;
        receipt_from(response)
    }

    async fn check_status(
        &self,
        reference: &str,
    ) -> ConnectorResult<TargetStatus> {
        let token = self.bearer().await?;
        let url = self.endpoint(&format!("status/{reference}"))?;
        let response = self.client.get(url).bearer_auth(token).send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }
        if !status.is_success() {
            return Err(ConnectorError::from_status(status, "status poll"));
        }
        let body: StatusResponse = response.json().await.map_err(|err| {
            ConnectorError::MalformedResponse(format!(
                "unreadable status response: {err}"
            ))
        })?;
        Ok(body.status)
    }
}

#[async_trait]
impl EligibilityVerifier for GatewayConnector {
    async fn verify(
        &self,
        key: &EligibilityKey,
    ) -> ConnectorResult<VerifiedCoverage> {
        let envelope = eligibility_envelope(key, &self.config.source_endpoint)
            .map_err(|err| {
                ConnectorError::MalformedResponse(format!(
                    "outbound envelope invalid: {err}"
                ))
            })?;
        let response = self.send_envelope(&envelope).await?;
        let status = match response.outcome {
            GatewayOutcome::Rejected => CoverageStatus::Inactive,
            GatewayOutcome::Error => {
                return Err(ConnectorError::transient(
                    "gateway could not verify eligibility",
                ));
            }
            _ => response.coverage.unwrap_or(CoverageStatus::Unknown),
        };
        Ok(VerifiedCoverage {
            status,
            reference: response.reference,
            verified_by: Some(self.descriptor.id.clone()),
        })
    }
}
