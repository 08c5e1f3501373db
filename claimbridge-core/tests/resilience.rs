mod common;

use std::sync::Arc;
use std::time::Duration;

use claimbridge_core::config::{BreakerConfig, RetryConfig};
use claimbridge_core::connectors::ConnectorError;
use claimbridge_core::resilience::ResilientConnector;
use claimbridge_model::CircuitState;
use common::*;

fn wrapped(connector: Arc<ScriptedConnector>) -> ResilientConnector {
    ResilientConnector::new(
        connector,
        &RetryConfig {
            max_attempts: 1,
            backoff_base_ms: 10,
            backoff_max_ms: 10,
        },
        &BreakerConfig {
            failure_threshold: 5,
            failure_window_ms: 60_000,
            cooldown_ms: 1_000,
            max_cooldown_ms: 4_000,
        },
    )
}

#[tokio::test(start_paused = true)]
async fn call_after_threshold_never_reaches_the_network() {
    let connector = ScriptedConnector::portal("portal-a", 1).always(transient()).arc();
    let wrapper = wrapped(connector.clone());
    let c = claim("CLM-1", "PAT-1");

    for _ in 0..5 {
        assert!(wrapper.submit(&c).await.result.is_err());
    }
    assert_eq!(wrapper.health().state, CircuitState::Open);

    let report = wrapper.submit(&c).await;
    assert!(matches!(report.result, Err(ConnectorError::CircuitOpen { .. })));
    assert_eq!(connector.submits(), 5);
}

#[tokio::test(start_paused = true)]
async fn half_open_admits_a_single_probe_under_concurrency() {
    let connector = ScriptedConnector::portal("portal-a", 1)
        .with_delay(Duration::from_millis(100))
        .always(transient())
        .arc();
    let wrapper = wrapped(connector.clone());
    let c = claim("CLM-1", "PAT-1");
    for _ in 0..5 {
        wrapper.submit(&c).await;
    }

    tokio::time::advance(Duration::from_millis(1_000)).await;
    assert_eq!(wrapper.health().state, CircuitState::HalfOpen);

    let (probe, bystander) = tokio::join!(wrapper.submit(&c), wrapper.submit(&c));
    assert!(matches!(probe.result, Err(ConnectorError::Transient { .. })));
    assert!(matches!(
        bystander.result,
        Err(ConnectorError::CircuitOpen { .. })
    ));
    assert_eq!(connector.submits(), 6);

    // Failed probe re-opens with a doubled cooldown.
    assert_eq!(wrapper.health().state, CircuitState::Open);
    assert_eq!(wrapper.breaker().current_cooldown(), Duration::from_millis(2_000));

    tokio::time::advance(Duration::from_millis(2_000)).await;
    connector.enqueue(accepted("P-1"));
    let recovered = wrapper.submit(&c).await;
    assert_eq!(recovered.result.unwrap().reference, "P-1");
    assert_eq!(wrapper.health().state, CircuitState::Closed);
    assert_eq!(wrapper.breaker().current_cooldown(), Duration::from_millis(1_000));
}
