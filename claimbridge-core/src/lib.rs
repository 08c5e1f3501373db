//! # Claimbridge Core
//!
//! Submission engine for healthcare claims: takes a claim, decides which
//! payer back-ends to send it to and in what order, keeps each back-end
//! behind its own retry policy and circuit breaker, and reconciles what the
//! back-ends answered into one authoritative result.
//!
//! ## Pipeline
//!
//! 1. [`validation`]: structural checks and additive risk scoring
//! 2. [`eligibility`]: read-through coverage cache with single-flight misses
//! 3. [`routing`]: strategy selection against live connector health
//! 4. [`orchestrator`]: sequential or fan-out execution and aggregation
//! 5. [`poller`]: background resolution of queued submissions
//!
//! [`service::ClaimService`] wires these together and is the entry point for
//! callers. Connectors live in [`connectors`] and are always invoked through
//! [`resilience::ResilientConnector`].
//!
//! ## Example
//!
//! ```no_run
//! use claimbridge_core::{ClaimService, OrchestratorConfig};
//! use claimbridge_core::connectors::{GatewayConfig, GatewayConnector};
//! use std::sync::Arc;
//!
//! # fn build() -> Result<ClaimService, Box<dyn std::error::Error>> {
//! let base = url::Url::parse("https://gateway.example.org/fhir/")?;
//! let gateway = Arc::new(GatewayConnector::new(GatewayConfig::new(
//!     base,
//!     "clinic-42",
//! ))?);
//! let service = ClaimService::builder(OrchestratorConfig::default())
//!     .with_connector(gateway.clone())
//!     .with_verifier(gateway)
//!     .build()?;
//! # Ok(service)
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Engine configuration
pub mod config;

/// Submission targets: standards gateway and legacy portals
pub mod connectors;

/// Coverage verification cache
pub mod eligibility;

/// Service-level error taxonomy
pub mod error;

/// Plan execution and outcome aggregation
pub mod orchestrator;

/// Pending-result status polling
pub mod poller;

/// Storage and review-queue collaborators
pub mod ports;

/// Circuit breaking, retry and the connector registry
pub mod resilience;

/// Strategy selection
pub mod routing;

/// Claim service facade
pub mod service;

/// Structural validation and risk scoring
pub mod validation;

pub use config::OrchestratorConfig;
pub use error::{ClaimError, Result};
pub use service::{ClaimService, ClaimServiceBuilder};

pub use claimbridge_model as model;
