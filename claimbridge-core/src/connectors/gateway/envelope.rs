//! Structured message envelope sent to the standards gateway.
//!
//! An envelope is a message bundle: the first entry is a header whose
//! `focus` list references every payload resource, followed by the payload
//! resources themselves. References inside payloads point at other entries by
//! their `full_url`; a reference that resolves to nothing is rejected before
//! anything is sent.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use claimbridge_model::{ClaimSubmission, EligibilityKey, Operation};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("envelope has no header entry")]
    MissingHeader,
    #[error("header does not reference payload entry {0}")]
    UnreferencedPayload(String),
    #[error("dangling reference {0}")]
    DanglingReference(String),
    #[error("duplicate entry {0}")]
    DuplicateEntry(String),
}

/// Event code carried in the header; one per gateway operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageEvent {
    EligibilityCheck,
    PriorAuthorization,
    ClaimSubmit,
    CommunicationSend,
}

impl MessageEvent {
    pub fn code(&self) -> &'static str {
        match self {
            MessageEvent::EligibilityCheck => "eligibility-check",
            MessageEvent::PriorAuthorization => "prior-authorization",
            MessageEvent::ClaimSubmit => "claim-submit",
            MessageEvent::CommunicationSend => "communication-send",
        }
    }

    pub fn for_operation(operation: Operation) -> Self {
        match operation {
            Operation::Eligibility => MessageEvent::EligibilityCheck,
            Operation::PriorAuth => MessageEvent::PriorAuthorization,
            Operation::Claim => MessageEvent::ClaimSubmit,
            Operation::Communication => MessageEvent::CommunicationSend,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeEntry {
    pub full_url: String,
    pub resource: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub resource_type: String,
    pub id: String,
    #[serde(rename = "type")]
    pub bundle_type: String,
    pub timestamp: DateTime<Utc>,
    pub entry: Vec<EnvelopeEntry>,
}

fn new_full_url() -> String {
    format!("urn:uuid:{}", Uuid::new_v4())
}

/// Collects payload resources and emits a header that focuses all of them.
#[derive(Debug)]
pub struct EnvelopeBuilder {
    event: MessageEvent,
    source_endpoint: String,
    payload: Vec<EnvelopeEntry>,
}

impl EnvelopeBuilder {
    pub fn new(event: MessageEvent, source_endpoint: impl Into<String>) -> Self {
        Self {
            event,
            source_endpoint: source_endpoint.into(),
            payload: Vec::new(),
        }
    }

    /// Adds a resource and returns the `full_url` other resources use to
    /// reference it.
    pub fn push(&mut self, resource: Value) -> String {
        let full_url = new_full_url();
        self.payload.push(EnvelopeEntry {
            full_url: full_url.clone(),
            resource,
        });
        full_url
    }

    pub fn build(self) -> Result<MessageEnvelope, EnvelopeError> {
        let focus: Vec<Value> = self
            .payload
            .iter()
            .map(|entry| json!({ "reference": entry.full_url }))
            .collect();
        let header = EnvelopeEntry {
            full_url: new_full_url(),
            resource: json!({
                "resourceType": "MessageHeader",
                "eventCoding": { "code": self.event.code() },
                "source": { "endpoint": self.source_endpoint },
                "focus": focus,
            }),
        };

        let mut entry = Vec::with_capacity(self.payload.len() + 1);
        entry.push(header);
        entry.extend(self.payload);

        let envelope = MessageEnvelope {
            resource_type: "Bundle".to_string(),
            id: Uuid::now_v7().to_string(),
            bundle_type: "message".to_string(),
            timestamp: Utc::now(),
            entry,
        };
        envelope.validate()?;
        Ok(envelope)
    }
}

impl MessageEnvelope {
    /// Header first, every payload entry focused by the header, every
    /// reference resolvable inside the bundle.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        let (header, payload) =
            self.entry.split_first().ok_or(EnvelopeError::MissingHeader)?;
        if header.resource.get("resourceType")
            != Some(&Value::String("MessageHeader".into()))
        {
            return Err(EnvelopeError::MissingHeader);
        }

        let mut known = BTreeSet::new();
        for entry in &self.entry {
            if !known.insert(entry.full_url.as_str()) {
                return Err(EnvelopeError::DuplicateEntry(
                    entry.full_url.clone(),
                ));
            }
        }

        let mut focused = BTreeSet::new();
        collect_references(&header.resource, &mut focused);
        for entry in payload {
            if !focused.contains(entry.full_url.as_str()) {
                return Err(EnvelopeError::UnreferencedPayload(
                    entry.full_url.clone(),
                ));
            }
        }

        let mut referenced = focused;
        for entry in payload {
            collect_references(&entry.resource, &mut referenced);
        }
        match referenced.into_iter().find(|r| !known.contains(r)) {
            Some(dangling) => {
                Err(EnvelopeError::DanglingReference(dangling.to_string()))
            }
            None => Ok(()),
        }
    }

    pub fn header_event(&self) -> Option<&str> {
        self.entry
            .first()?
            .resource
            .pointer("/eventCoding/code")?
            .as_str()
    }
}

fn collect_references<'a>(value: &'a Value, out: &mut BTreeSet<&'a str>) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map {
                if key == "reference"
                    && let Value::String(reference) = inner
                {
                    out.insert(reference.as_str());
                } else {
                    collect_references(inner, out);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, out);
            }
        }
        _ => {}
    }
}

fn member_resources(
    builder: &mut EnvelopeBuilder,
    key: &EligibilityKey,
) -> (String, String) {
    let patient = builder.push(json!({
        "resourceType": "Patient",
        "identifier": [{ "value": key.patient_id.as_str() }],
    }));
    let coverage = builder.push(json!({
        "resourceType": "Coverage",
        "beneficiary": { "reference": patient },
        "payor": [{ "identifier": { "value": key.payer_id.as_str() } }],
    }));
    (patient, coverage)
}

/// Envelope for a claim, prior authorization or communication.
pub fn submission_envelope(
    claim: &ClaimSubmission,
    source_endpoint: &str,
) -> Result<MessageEnvelope, EnvelopeError> {
    if claim.operation == Operation::Eligibility {
        let key = EligibilityKey::new(
            claim.patient_id.clone(),
            claim.payer_id.clone(),
            claim.service_date,
        );
        return eligibility_envelope(&key, source_endpoint);
    }

    let event = MessageEvent::for_operation(claim.operation);
    let mut builder = EnvelopeBuilder::new(event, source_endpoint);
    let key = EligibilityKey::new(
        claim.patient_id.clone(),
        claim.payer_id.clone(),
        claim.service_date,
    );
    let (patient, coverage) = member_resources(&mut builder, &key);

    if claim.operation == Operation::Communication {
        builder.push(json!({
            "resourceType": "Communication",
            "identifier": [{ "value": claim.claim_id.as_str() }],
            "subject": { "reference": patient },
            "about": [{ "reference": coverage }],
            "sent": claim.created_at,
        }));
        return builder.build();
    }

    let items: Vec<Value> = claim
        .line_items
        .iter()
        .enumerate()
        .map(|(idx, line)| {
            json!({
                "sequence": idx + 1,
                "productOrService": { "code": line.code },
                "quantity": line.quantity,
                "unitPrice": line.unit_price_cents,
                "net": line.total_cents(),
            })
        })
        .collect();
    let diagnosis: Vec<Value> = claim
        .diagnosis_codes
        .iter()
        .enumerate()
        .map(|(idx, code)| json!({ "sequence": idx + 1, "code": code }))
        .collect();
    let usage = if claim.operation == Operation::PriorAuth {
        "preauthorization"
    } else {
        "claim"
    };

    let mut resource = json!({
        "resourceType": "Claim",
        "identifier": [{ "value": claim.claim_id.as_str() }],
        "use": usage,
        "patient": { "reference": patient },
        "insurance": [{ "sequence": 1, "focal": true, "coverage": { "reference": coverage } }],
        "provider": { "identifier": { "value": claim.provider_id.as_str() } },
        "billablePeriod": { "start": claim.service_date },
        "created": claim.created_at,
        "diagnosis": diagnosis,
        "item": items,
        "total": claim.total_billed_cents(),
    });
    if let Some(original) = &claim.corrects {
        resource["related"] =
            json!([{ "claim": { "identifier": { "value": original.as_str() } }, "relationship": "prior" }]);
    }
    builder.push(resource);
    builder.build()
}

pub fn eligibility_envelope(
    key: &EligibilityKey,
    source_endpoint: &str,
) -> Result<MessageEnvelope, EnvelopeError> {
    let mut builder =
        EnvelopeBuilder::new(MessageEvent::EligibilityCheck, source_endpoint);
    let (patient, coverage) = member_resources(&mut builder, key);
    builder.push(json!({
        "resourceType": "CoverageEligibilityRequest",
        "purpose": ["validation"],
        "patient": { "reference": patient },
        "servicedDate": key.service_date,
        "insurance": [{ "coverage": { "reference": coverage } }],
    }));
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use claimbridge_model::LineItem;

    fn claim(operation: Operation) -> ClaimSubmission {
        ClaimSubmission {
            claim_id: "CLM-9".into(),
            patient_id: "PAT-9".into(),
            payer_id: "PAYER-A".into(),
            provider_id: "PRV-1".into(),
            service_date: NaiveDate::from_ymd_opt(2026, 4, 2).unwrap(),
            line_items: vec![LineItem::new("99213", 1, 9_000)],
            diagnosis_codes: vec!["J06.9".into()],
            operation,
            corrects: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn header_focuses_every_payload_resource() {
        let envelope =
            submission_envelope(&claim(Operation::Claim), "urn:test").unwrap();
        assert_eq!(envelope.header_event(), Some("claim-submit"));
        assert_eq!(envelope.entry.len(), 4);
        let focus = envelope.entry[0].resource["focus"].as_array().unwrap();
        assert_eq!(focus.len(), 3);
        assert!(envelope.validate().is_ok());
    }

    #[test]
    fn prior_auth_uses_its_own_event_code() {
        let envelope =
            submission_envelope(&claim(Operation::PriorAuth), "urn:test")
                .unwrap();
        assert_eq!(envelope.header_event(), Some("prior-authorization"));
        assert_eq!(envelope.entry[3].resource["use"], "preauthorization");
    }

    #[test]
    fn dangling_reference_is_rejected() {
        let mut envelope =
            submission_envelope(&claim(Operation::Claim), "urn:test").unwrap();
        envelope.entry[3].resource["patient"]["reference"] =
            Value::String("urn:uuid:nowhere".into());
        assert_eq!(
            envelope.validate(),
            Err(EnvelopeError::DanglingReference("urn:uuid:nowhere".into()))
        );
    }

    #[test]
    fn unfocused_payload_is_rejected() {
        let mut envelope = eligibility_envelope(
            &EligibilityKey::new(
                "PAT-1".into(),
                "PAYER-A".into(),
                NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            ),
            "urn:test",
        )
        .unwrap();
        envelope.entry.push(EnvelopeEntry {
            full_url: "urn:uuid:orphan".into(),
            resource: json!({ "resourceType": "Organization" }),
        });
        assert_eq!(
            envelope.validate(),
            Err(EnvelopeError::UnreferencedPayload("urn:uuid:orphan".into()))
        );
    }
}
