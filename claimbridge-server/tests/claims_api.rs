use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use claimbridge_model::ConnectorKind;
use claimbridge_server::{AppState, create_app, infra::config::Config};
use serde_json::{Value, json};
use tower::ServiceExt;

mod support;

use support::{Answer, FixedConnector, build_server, claim_body};

fn gateway(answer: Answer) -> std::sync::Arc<FixedConnector> {
    FixedConnector::new("gateway", ConnectorKind::StandardsGateway, 0, answer)
}

fn portal(id: &str, answer: Answer) -> std::sync::Arc<FixedConnector> {
    FixedConnector::new(id, ConnectorKind::LegacyPortal, 10, answer)
}

#[tokio::test]
async fn accepted_claim_is_readable_afterwards() {
    let gw = gateway(Answer::Accept);
    let (server, _service) = build_server(&[gw.clone()]);

    let response = server
        .post("/api/v1/claims")
        .json(&claim_body("CLM-100", "PAT-1"))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["strategy"], "primary_first");
    assert_eq!(body["attempts"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["authoritative_attempt"], body["attempts"][0]["attempt_id"]);

    let status = server.get("/api/v1/claims/CLM-100").await;
    status.assert_status_ok();
    let stored: Value = status.json();
    assert_eq!(stored["status"], "accepted");
    assert_eq!(stored["attempts"], body["attempts"]);
    assert_eq!(gw.submits(), 1);
}

#[tokio::test]
async fn invalid_claim_returns_report_and_reaches_no_connector() {
    let gw = gateway(Answer::Accept);
    let (server, _service) = build_server(&[gw.clone()]);

    let mut body = claim_body("CLM-101", "PAT-1");
    body["claim"]["patient_id"] = json!("");
    body["claim"]["line_items"][0]["quantity"] = json!(0);

    let response = server.post("/api/v1/claims").json(&body).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let error: Value = response.json();
    assert_eq!(error["error"]["status"], 400);
    let errors = error["error"]["details"]["errors"]
        .as_array()
        .expect("validation errors in body");
    assert!(errors.len() >= 2, "{errors:?}");
    assert_eq!(gw.submits(), 0);

    server
        .get("/api/v1/claims/CLM-101")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn requested_strategy_overrides_default() {
    let gw = gateway(Answer::Accept);
    let legacy = portal("portal-a", Answer::Accept);
    let (server, _service) = build_server(&[gw.clone(), legacy.clone()]);

    let mut body = claim_body("CLM-102", "PAT-2");
    body["strategy"] = json!("legacy_only");
    let response = server.post("/api/v1/claims").json(&body).await;
    response.assert_status_ok();
    let result: Value = response.json();
    assert_eq!(result["strategy"], "legacy_only");
    assert_eq!(result["attempts"][0]["connector_id"], "portal-a");
    assert_eq!(gw.submits(), 0);
    assert_eq!(legacy.submits(), 1);
}

#[tokio::test]
async fn fan_out_rejections_report_rejected() {
    let (server, _service) = build_server(&[
        gateway(Answer::Reject),
        portal("portal-a", Answer::Reject),
        portal("portal-b", Answer::Reject),
    ]);

    let mut body = claim_body("CLM-103", "PAT-3");
    body["strategy"] = json!("all_targets");
    let response = server.post("/api/v1/claims").json(&body).await;
    response.assert_status_ok();
    let result: Value = response.json();
    assert_eq!(result["status"], "rejected");
    let attempts = result["attempts"].as_array().expect("attempts");
    assert_eq!(attempts.len(), 3);
    assert!(attempts.iter().all(|a| a["retry_count"] == 0));
}

#[tokio::test]
async fn resubmission_returns_stored_result() {
    let gw = gateway(Answer::Accept);
    let (server, _service) = build_server(&[gw.clone()]);

    let first: Value = server
        .post("/api/v1/claims")
        .json(&claim_body("CLM-104", "PAT-4"))
        .await
        .json();
    let second: Value = server
        .post("/api/v1/claims")
        .json(&claim_body("CLM-104", "PAT-4"))
        .await
        .json();
    assert_eq!(first["attempts"], second["attempts"]);
    assert_eq!(gw.submits(), 1);
}

#[tokio::test]
async fn queued_claim_stays_pending_and_is_polled() {
    let (server, service) = build_server(&[gateway(Answer::Queue)]);

    let response = server
        .post("/api/v1/claims")
        .json(&claim_body("CLM-105", "PAT-5"))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["status"], "pending");

    let health: Value = server.get("/health").await.json();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["polling"], 1);

    service.shutdown();
}

#[tokio::test]
async fn unknown_claim_is_not_found() {
    let (server, _service) = build_server(&[gateway(Answer::Accept)]);
    let response = server.get("/api/v1/claims/NOPE").await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["error"]["status"], 404);
    assert!(
        body["error"]["message"]
            .as_str()
            .is_some_and(|m| m.contains("NOPE"))
    );
}

#[tokio::test]
async fn connector_health_lists_every_connector() {
    let (server, _service) = build_server(&[
        gateway(Answer::Unavailable),
        portal("portal-a", Answer::Accept),
    ]);

    // The gateway fails and the claim falls back to the portal.
    let mut body = claim_body("CLM-106", "PAT-6");
    body["strategy"] = json!("primary_first");
    let result: Value = server.post("/api/v1/claims").json(&body).await.json();
    assert_eq!(result["status"], "accepted");
    assert_eq!(result["attempts"].as_array().map(Vec::len), Some(2));

    let response = server.get("/api/v1/connectors/health").await;
    response.assert_status_ok();
    let snapshot: Value = response.json();
    let connectors = snapshot["connectors"].as_object().expect("connector map");
    assert_eq!(connectors.len(), 2);
    assert_eq!(connectors["gateway"]["state"], "closed");
    assert_eq!(connectors["gateway"]["kind"], "standards_gateway");
    assert!(connectors["gateway"]["consecutive_failures"].as_u64() >= Some(1));
    assert_eq!(connectors["portal-a"]["consecutive_failures"], 0);
}

#[tokio::test]
async fn ping_answers_without_connectors() {
    let service = claimbridge_core::ClaimService::builder(Default::default())
        .build()
        .expect("service builds");
    let app = create_app(AppState::new(
        std::sync::Arc::new(service),
        std::sync::Arc::new(Config::default()),
    ));

    let response = app
        .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
