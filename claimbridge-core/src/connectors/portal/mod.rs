//! Legacy web-portal connector.
//!
//! Portals are driven like a browser: fetch the login form, lift the
//! anti-forgery token out of the markup, post credentials and keep the
//! session cookie. Claims are posted as form fields and the confirmation
//! page is scraped for a confirmation number.

pub mod markup;
pub mod session;

use std::time::Duration;

use async_trait::async_trait;
use claimbridge_model::{
    ClaimSubmission, ConnectorId, ConnectorKind, Disposition, RejectionReason,
    TargetStatus,
};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use self::session::PortalSession;
use super::{
    Connector, ConnectorDescriptor, ConnectorError, ConnectorResult,
    SubmissionReceipt,
};

/// Field names and paths for one portal's forms. Defaults match the common
/// ASP.NET-style practice portals; override per portal in config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalFormMap {
    pub login_path: String,
    pub claim_form_path: String,
    pub status_path: String,
    pub status_reference_param: String,
    pub csrf_field: String,
    pub username_field: String,
    pub password_field: String,
    pub branch_field: String,
    pub member_field: String,
    pub payer_field: String,
    pub provider_field: String,
    pub service_date_field: String,
    /// `chrono` format string for the service date.
    pub service_date_format: String,
    pub diagnosis_field: String,
    pub operation_field: String,
    pub reference_field: String,
    pub original_reference_field: String,
    /// Lines are posted as `{prefix}[i].Code`, `.Quantity`, `.UnitPrice`.
    pub line_prefix: String,
}

impl Default for PortalFormMap {
    fn default() -> Self {
        Self {
            login_path: "account/login".to_string(),
            claim_form_path: "claims/new".to_string(),
            status_path: "claims/status".to_string(),
            status_reference_param: "reference".to_string(),
            csrf_field: "__RequestVerificationToken".to_string(),
            username_field: "UserName".to_string(),
            password_field: "Password".to_string(),
            branch_field: "BranchCode".to_string(),
            member_field: "MemberNumber".to_string(),
            payer_field: "SchemeCode".to_string(),
            provider_field: "PracticeNumber".to_string(),
            service_date_field: "ServiceDate".to_string(),
            service_date_format: "%Y-%m-%d".to_string(),
            diagnosis_field: "Icd10Codes".to_string(),
            operation_field: "RequestType".to_string(),
            reference_field: "ClaimReference".to_string(),
            original_reference_field: "OriginalReference".to_string(),
            line_prefix: "Lines".to_string(),
        }
    }
}

fn default_portal_priority() -> u32 {
    10
}

fn default_portal_timeout_ms() -> u64 {
    20_000
}

fn default_session_max_age_secs() -> u64 {
    20 * 60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    pub id: ConnectorId,
    pub base_url: Url,
    pub branch: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_portal_priority")]
    pub priority: u32,
    #[serde(default)]
    pub requires_eligibility: bool,
    #[serde(default = "default_portal_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Sessions older than this are re-established before use.
    #[serde(default = "default_session_max_age_secs")]
    pub session_max_age_secs: u64,
    #[serde(default)]
    pub form: PortalFormMap,
}

impl PortalConfig {
    pub fn new(
        id: impl Into<ConnectorId>,
        base_url: Url,
        branch: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            base_url,
            branch: branch.into(),
            username: username.into(),
            password: password.into(),
            priority: default_portal_priority(),
            requires_eligibility: false,
            request_timeout_ms: default_portal_timeout_ms(),
            session_max_age_secs: default_session_max_age_secs(),
            form: PortalFormMap::default(),
        }
    }
}

/// Maps a portal status label onto the target status set.
pub fn status_from_label(label: &str) -> Option<TargetStatus> {
    let status = match label.trim().to_ascii_lowercase().as_str() {
        "received" | "submitted" | "pending" | "queued" | "in process"
        | "processing" | "in review" => TargetStatus::Queued,
        "paid" | "approved" | "accepted" | "complete" | "completed"
        | "finalised" | "finalized" => TargetStatus::Complete,
        "partial" | "partially paid" | "part paid" | "partially approved" => {
            TargetStatus::Partial
        }
        "rejected" | "denied" | "declined" | "error" => TargetStatus::Error,
        _ => return None,
    };
    Some(status)
}

fn format_minor_units(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

#[derive(Debug)]
pub struct PortalConnector {
    descriptor: ConnectorDescriptor,
    config: PortalConfig,
    session: PortalSession,
}

impl PortalConnector {
    pub fn new(mut config: PortalConfig) -> Self {
        if !config.base_url.path().ends_with('/') {
            let path = format!("{}/", config.base_url.path());
            config.base_url.set_path(&path);
        }
        let descriptor = ConnectorDescriptor {
            id: config.id.clone(),
            kind: ConnectorKind::LegacyPortal,
            priority: config.priority,
            requires_eligibility: config.requires_eligibility,
        };
        let session = PortalSession::new(
            Duration::from_secs(config.session_max_age_secs),
            Duration::from_millis(config.request_timeout_ms),
        );
        Self {
            descriptor,
            config,
            session,
        }
    }

    pub fn branch(&self) -> &str {
        &self.config.branch
    }

    fn endpoint(&self, path: &str) -> ConnectorResult<Url> {
        self.config.base_url.join(path).map_err(|err| {
            ConnectorError::MalformedResponse(format!(
                "cannot build portal url for {path}: {err}"
            ))
        })
    }

    fn landed_on_login(&self, response: &Response) -> bool {
        let login = self.config.form.login_path.trim_matches('/');
        response.url().path().trim_end_matches('/').ends_with(login)
    }

    async fn login(&self, client: Client) -> ConnectorResult<()> {
        let form = &self.config.form;
        let url = self.endpoint(&form.login_path)?;
        let page = client.get(url.clone()).send().await?;
        if !page.status().is_success() {
            return Err(ConnectorError::from_status(page.status(), "login page"));
        }
        let html = page.text().await?;
        let token = markup::hidden_input_value(&html, &form.csrf_field)
            .ok_or_else(|| {
                ConnectorError::MalformedResponse(
                    "login page has no anti-forgery token".to_string(),
                )
            })?;

        let fields = [
            (form.csrf_field.as_str(), token.as_str()),
            (form.username_field.as_str(), self.config.username.as_str()),
            (form.password_field.as_str(), self.config.password.as_str()),
            (form.branch_field.as_str(), self.config.branch.as_str()),
        ];
        let response = client.post(url).form(&fields[..]).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ConnectorError::from_status(status, "portal login"));
        }
        let still_on_login = self.landed_on_login(&response);
        let html = response.text().await?;
        if let Some(message) = markup::login_error(&html) {
            return Err(ConnectorError::Authentication(message));
        }
        if still_on_login && markup::is_login_page(&html) {
            return Err(ConnectorError::Authentication(
                "portal returned the login form after sign-in".to_string(),
            ));
        }

        info!(
            target: "claims::connectors",
            connector = %self.descriptor.id,
            branch = %self.config.branch,
            "portal session established"
        );
        Ok(())
    }

    async fn client(&self) -> ConnectorResult<Client> {
        self.session.client(|client| self.login(client)).await
    }

    /// Rejects responses that show the session is gone and drops it so the
    /// next call logs in again.
    async fn ensure_authenticated(
        &self,
        response: &Response,
        context: &str,
    ) -> ConnectorResult<()> {
        let status = response.status();
        let expired = status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
            || self.landed_on_login(response);
        if expired {
            self.session.invalidate().await;
            return Err(ConnectorError::Authentication(format!(
                "{context}: portal session expired"
            )));
        }
        Ok(())
    }

    fn claim_fields(
        &self,
        claim: &ClaimSubmission,
        token: String,
    ) -> Vec<(String, String)> {
        let form = &self.config.form;
        let mut fields = vec![
            (form.csrf_field.clone(), token),
            (form.reference_field.clone(), claim.claim_id.to_string()),
            (form.member_field.clone(), claim.patient_id.to_string()),
            (form.payer_field.clone(), claim.payer_id.to_string()),
            (form.provider_field.clone(), claim.provider_id.to_string()),
            (form.branch_field.clone(), self.config.branch.clone()),
            (
                form.service_date_field.clone(),
                claim
                    .service_date
                    .format(&form.service_date_format)
                    .to_string(),
            ),
            (form.diagnosis_field.clone(), claim.diagnosis_codes.join(",")),
            (form.operation_field.clone(), claim.operation.to_string()),
        ];
        if let Some(original) = &claim.corrects {
            fields.push((
                form.original_reference_field.clone(),
                original.to_string(),
            ));
        }
        for (idx, line) in claim.line_items.iter().enumerate() {
            let prefix = format!("{}[{idx}]", form.line_prefix);
            fields.push((format!("{prefix}.Code"), line.code.clone()));
            fields.push((format!("{prefix}.Quantity"), line.quantity.to_string()));
            fields.push((
                format!("{prefix}.UnitPrice"),
                format_minor_units(line.unit_price_cents),
            ));
        }
        fields
    }

    fn parse_confirmation(html: &str) -> ConnectorResult<SubmissionReceipt> {
        if let Some(reasons) = markup::rejection_reasons(html) {
            return Err(ConnectorError::rejection(reasons));
        }
        let reference = markup::confirmation_number(html).ok_or_else(|| {
            ConnectorError::MalformedResponse(
                "no confirmation number in portal response".to_string(),
            )
        })?;
        let label = markup::claim_status(html);
        let disposition = match label.as_deref().and_then(status_from_label) {
            Some(TargetStatus::Queued) => Disposition::Queued,
            Some(TargetStatus::Partial) => Disposition::PartiallyApproved,
            Some(TargetStatus::Error) => {
                return Err(ConnectorError::rejection(vec![
                    RejectionReason::new(
                        "PORTAL_STATUS",
                        label.unwrap_or_default(),
                    ),
                ]));
            }
            Some(TargetStatus::Complete) | None => Disposition::Accepted,
        };
        Ok(SubmissionReceipt {
            reference,
            disposition,
        })
    }
}

#[async_trait]
impl Connector for PortalConnector {
    fn descriptor(&self) -> &ConnectorDescriptor {
        &self.descriptor
    }

    async fn authenticate(&self) -> ConnectorResult<()> {
        self.session.invalidate().await;
        self.client().await.map(|_| ())
    }

    async fn submit(
        &self,
        claim: &ClaimSubmission,
    ) -> ConnectorResult<SubmissionReceipt> {
        let client = self.client().await?;
        let url = self.endpoint(&self.config.form.claim_form_path)?;

        let page = client.get(url.clone()).send().await?;
        self.ensure_authenticated(&page, "claim form").await?;
        if !page.status().is_success() {
            return Err(ConnectorError::from_status(page.status(), "claim form"));
        }
        let html = page.text().await?;
        let token = markup::hidden_input_value(&html, &self.config.form.csrf_field)
            .ok_or_else(|| {
                ConnectorError::MalformedResponse(
                    "claim form has no anti-forgery token".to_string(),
                )
            })?;

        let fields = self.claim_fields(claim, token);
        let response = client.post(url).form(&fields).send().await?;
        self.ensure_authenticated(&response, "claim submit").await?;
        let status = response.status();
        // Validation failures come back as 400/422 pages listing reasons.
        let readable = status.is_success()
            || status == StatusCode::BAD_REQUEST
            || status == StatusCode::UNPROCESSABLE_ENTITY;
        if !readable {
            return Err(ConnectorError::from_status(status, "claim submit"));
        }
        let html = response.text().await?;
        let parsed = Self::parse_confirmation(&html);
        if !status.is_success()
            && matches!(parsed, Err(ConnectorError::MalformedResponse(_)))
        {
            return Err(ConnectorError::from_status(status, "claim submit"));
        }
        if let Ok(receipt) = &parsed {
            debug!(
                target: "claims::connectors",
                connector = %self.descriptor.id,
                claim_id = %claim.claim_id,
                confirmation = %receipt.reference,
                "portal confirmed submission"
            );
        }
        parsed
    }

    async fn check_status(
        &self,
        reference: &str,
    ) -> ConnectorResult<TargetStatus> {
        let client = self.client().await?;
        let url = self.endpoint(&self.config.form.status_path)?;
        let response = client
            .get(url)
            .query(&[(self.config.form.status_reference_param.as_str(), reference)])
            .send()
            .await?;
        self.ensure_authenticated(&response, "status page").await?;
        if !response.status().is_success() {
            return Err(ConnectorError::from_status(
                response.status(),
                "status page",
            ));
        }
        let html = response.text().await?;
        let label = markup::claim_status(&html).ok_or_else(|| {
            ConnectorError::MalformedResponse(format!(
                "no claim status on portal page for {reference}"
            ))
        })?;
        status_from_label(&label).ok_or_else(|| {
            ConnectorError::MalformedResponse(format!(
                "unrecognised portal status '{label}'"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use axum::extract::{Form, Query, State};
    use axum::http::{HeaderMap, StatusCode as HttpStatus, header};
    use axum::response::{Html, IntoResponse, Redirect, Response as AxumResponse};
    use axum::routing::get;
    use axum::Router;
    use chrono::{NaiveDate, Utc};
    use claimbridge_model::{LineItem, Operation};

    #[derive(Clone, Default)]
    struct Portal {
        logins: Arc<AtomicUsize>,
        drop_sessions: Arc<AtomicBool>,
        confirmation: Arc<parking_lot::Mutex<String>>,
        posted: Arc<parking_lot::Mutex<Vec<HashMap<String, String>>>>,
    }

    const SESSION: &str = "portal_session";

    fn has_session(portal: &Portal, headers: &HeaderMap) -> bool {
        if portal.drop_sessions.swap(false, Ordering::SeqCst) {
            return false;
        }
        headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|c| c.contains(SESSION))
    }

    async fn login_page() -> Html<&'static str> {
        Html(
            r#"<form><input type="hidden" name="__RequestVerificationToken" value="login-tok">
               <input type="password" name="Password"></form>"#,
        )
    }

    async fn login_post(
        State(portal): State<Portal>,
        Form(form): Form<HashMap<String, String>>,
    ) -> AxumResponse {
        if form.get("Password").map(String::as_str) != Some("secret")
            || form.get("__RequestVerificationToken").map(String::as_str)
                != Some("login-tok")
        {
            return Html(
                r#"<div class="login-error">Invalid credentials</div><input type="password" name="Password">"#,
            )
            .into_response();
        }
        let n = portal.logins.fetch_add(1, Ordering::SeqCst) + 1;
        (
            [(header::SET_COOKIE, format!("{SESSION}={n}; Path=/"))],
            Html("<p>Welcome</p>"),
        )
            .into_response()
    }

    async fn claim_form(
        State(portal): State<Portal>,
        headers: HeaderMap,
    ) -> AxumResponse {
        if !has_session(&portal, &headers) {
            return Redirect::to("/account/login").into_response();
        }
        Html(r#"<input name="__RequestVerificationToken" type="hidden" value="claim-tok">"#)
            .into_response()
    }

    async fn claim_post(
        State(portal): State<Portal>,
        headers: HeaderMap,
        Form(form): Form<HashMap<String, String>>,
    ) -> AxumResponse {
        if !has_session(&portal, &headers) {
            return HttpStatus::UNAUTHORIZED.into_response();
        }
        portal.posted.lock().push(form);
        Html(portal.confirmation.lock().clone()).into_response()
    }

    async fn status_page(
        State(portal): State<Portal>,
        headers: HeaderMap,
        Query(query): Query<HashMap<String, String>>,
    ) -> AxumResponse {
        if !has_session(&portal, &headers) {
            return Redirect::to("/account/login").into_response();
        }
        let label = match query.get("reference").map(String::as_str) {
            Some("PX-1") => "Paid",
            Some("PX-2") => "Partially Paid",
            _ => "Mystery",
        };
        Html(format!(r#"<td data-claim-status="{label}"></td>"#)).into_response()
    }

    async fn spawn(portal: Portal) -> Url {
        let app = Router::new()
            .route("/account/login", get(login_page).post(login_post))
            .route("/claims/new", get(claim_form).post(claim_post))
            .route("/claims/status", get(status_page))
            .with_state(portal);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{addr}")).unwrap()
    }

    fn connector(base: Url, password: &str) -> PortalConnector {
        PortalConnector::new(PortalConfig::new(
            "portal-east",
            base,
            "EAST-01",
            "clerk",
            password,
        ))
    }

    fn claim() -> ClaimSubmission {
        ClaimSubmission {
            claim_id: "CLM-5".into(),
            patient_id: "PAT-5".into(),
            payer_id: "PAYER-B".into(),
            provider_id: "PRV-2".into(),
            service_date: NaiveDate::from_ymd_opt(2026, 5, 9).unwrap(),
            line_items: vec![
                LineItem::new("99213", 1, 9_050),
                LineItem::new("87880", 2, 1_500),
            ],
            diagnosis_codes: vec!["J02.0".into()],
            operation: Operation::Claim,
            corrects: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn submit_logs_in_and_maps_form_fields() {
        let portal = Portal::default();
        *portal.confirmation.lock() =
            "<p>Confirmation Number: <b>PX-1</b></p>".to_string();
        let base = spawn(portal.clone()).await;
        let connector = connector(base, "secret");

        let receipt = connector.submit(&claim()).await.unwrap();
        assert_eq!(receipt.reference, "PX-1");
        assert_eq!(receipt.disposition, Disposition::Accepted);

        let posted = portal.posted.lock();
        let form = &posted[0];
        assert_eq!(form["__RequestVerificationToken"], "claim-tok");
        assert_eq!(form["MemberNumber"], "PAT-5");
        assert_eq!(form["BranchCode"], "EAST-01");
        assert_eq!(form["Lines[0].UnitPrice"], "90.50");
        assert_eq!(form["Lines[1].Quantity"], "2");
    }

    #[tokio::test]
    async fn missing_confirmation_is_not_a_success() {
        let portal = Portal::default();
        *portal.confirmation.lock() = "<p>Thank you</p>".to_string();
        let base = spawn(portal).await;
        let err = connector(base, "secret").submit(&claim()).await.unwrap_err();
        assert!(matches!(err, ConnectorError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn rejection_page_is_a_business_rejection() {
        let portal = Portal::default();
        *portal.confirmation.lock() =
            r#"<li class="rejection-reason" data-code="R09">Benefit exhausted</li>"#
                .to_string();
        let base = spawn(portal).await;
        let err = connector(base, "secret").submit(&claim()).await.unwrap_err();
        assert_eq!(err.kind(), claimbridge_model::FailureKind::BusinessRejection);
    }

    #[tokio::test]
    async fn bad_credentials_are_an_authentication_failure() {
        let portal = Portal::default();
        let base = spawn(portal).await;
        let err = connector(base, "wrong").submit(&claim()).await.unwrap_err();
        assert_eq!(
            err,
            ConnectorError::Authentication("Invalid credentials".to_string())
        );
    }

    #[tokio::test]
    async fn expired_session_is_reported_then_reestablished() {
        let portal = Portal::default();
        *portal.confirmation.lock() =
            r#"<div data-confirmation="PX-7" data-claim-status="Received"></div>"#
                .to_string();
        let base = spawn(portal.clone()).await;
        let connector = connector(base, "secret");

        connector.authenticate().await.unwrap();
        portal.drop_sessions.store(true, Ordering::SeqCst);
        let err = connector.submit(&claim()).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Authentication(_)));

        connector.authenticate().await.unwrap();
        let receipt = connector.submit(&claim()).await.unwrap();
        assert_eq!(receipt.disposition, Disposition::Queued);
        assert_eq!(portal.logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn status_page_labels_map_to_target_status() {
        let portal = Portal::default();
        let base = spawn(portal).await;
        let connector = connector(base, "secret");
        assert_eq!(
            connector.check_status("PX-1").await.unwrap(),
            TargetStatus::Complete
        );
        assert_eq!(
            connector.check_status("PX-2").await.unwrap(),
            TargetStatus::Partial
        );
        assert!(matches!(
            connector.check_status("PX-3").await,
            Err(ConnectorError::MalformedResponse(_))
        ));
    }

    #[test]
    fn minor_units_format_with_two_decimals() {
        assert_eq!(format_minor_units(9_050), "90.50");
        assert_eq!(format_minor_units(5), "0.05");
        assert_eq!(format_minor_units(-120), "-1.20");
    }
}
