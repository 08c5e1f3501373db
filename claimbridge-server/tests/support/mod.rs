#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum_test::TestServer;
use chrono::{Days, Utc};
use claimbridge_core::connectors::{
    Connector, ConnectorDescriptor, ConnectorError, ConnectorResult,
    SubmissionReceipt,
};
use claimbridge_core::{ClaimService, OrchestratorConfig};
use claimbridge_model::{
    ClaimSubmission, ConnectorKind, Disposition, RejectionReason, TargetStatus,
};
use claimbridge_server::{AppState, create_app, infra::config::Config};
use serde_json::{Value, json};

/// What a [`FixedConnector`] answers to every submission.
#[derive(Debug, Clone, Copy)]
pub enum Answer {
    Accept,
    Queue,
    Reject,
    Unavailable,
}

pub struct FixedConnector {
    descriptor: ConnectorDescriptor,
    answer: Answer,
    submits: AtomicUsize,
}

impl FixedConnector {
    pub fn new(id: &str, kind: ConnectorKind, priority: u32, answer: Answer) -> Arc<Self> {
        Arc::new(Self {
            descriptor: ConnectorDescriptor {
                id: id.into(),
                kind,
                priority,
                requires_eligibility: false,
            },
            answer,
            submits: AtomicUsize::new(0),
        })
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FixedConnector {
    fn descriptor(&self) -> &ConnectorDescriptor {
        &self.descriptor
    }

    async fn authenticate(&self) -> ConnectorResult<()> {
        Ok(())
    }

    async fn submit(&self, claim: &ClaimSubmission) -> ConnectorResult<SubmissionReceipt> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst) + 1;
        let reference = format!("{}-{}-{n}", self.descriptor.id, claim.claim_id);
        match self.answer {
            Answer::Accept => Ok(SubmissionReceipt {
                reference,
                disposition: Disposition::Accepted,
            }),
            Answer::Queue => Ok(SubmissionReceipt {
                reference,
                disposition: Disposition::Queued,
            }),
            Answer::Reject => Err(ConnectorError::rejection(vec![RejectionReason::new(
                "NC-01",
                "member not covered",
            )])),
            Answer::Unavailable => Err(ConnectorError::transient("upstream returned HTTP 503")),
        }
    }

    async fn check_status(&self, _reference: &str) -> ConnectorResult<TargetStatus> {
        Ok(TargetStatus::Queued)
    }
}

/// Engine config with short backoff so failing connectors do not slow tests.
pub fn test_config() -> Config {
    let mut orchestrator = OrchestratorConfig::default();
    orchestrator.retry.max_attempts = 2;
    orchestrator.retry.backoff_base_ms = 1;
    orchestrator.retry.backoff_max_ms = 5;
    Config {
        orchestrator,
        ..Config::default()
    }
}

pub fn build_server(connectors: &[Arc<FixedConnector>]) -> (TestServer, Arc<ClaimService>) {
    let config = test_config();
    let mut builder = ClaimService::builder(config.orchestrator.clone());
    for connector in connectors {
        builder = builder.with_connector(connector.clone());
    }
    let service = Arc::new(builder.build().expect("service builds"));
    let state = AppState::new(Arc::clone(&service), Arc::new(config));
    let server = TestServer::new(create_app(state)).expect("test server starts");
    (server, service)
}

/// Request body for a clean claim three days in the past.
pub fn claim_body(claim_id: &str, patient: &str) -> Value {
    let service_date = Utc::now()
        .date_naive()
        .checked_sub_days(Days::new(3))
        .expect("valid date");
    json!({
        "claim": {
            "claim_id": claim_id,
            "patient_id": patient,
            "payer_id": "ACME",
            "provider_id": "PRV-7",
            "service_date": service_date.to_string(),
            "line_items": [
                { "code": "99213", "quantity": 1, "unit_price_cents": 12000 }
            ],
            "diagnosis_codes": ["J06.9"],
            "operation": "claim",
            "created_at": Utc::now().to_rfc3339(),
        }
    })
}
