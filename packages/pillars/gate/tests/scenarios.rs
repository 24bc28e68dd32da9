//! Crate-level integration tests for the two gate-owned end-to-end scenarios:
//! circuit recovery under a failure burst, and rate-limit isolation between
//! tenants.

use std::time::Duration;

use agentkern_gate::circuit::{CircuitConfig, CircuitRegistry};
use agentkern_gate::rate_limit::RateLimiter;
use agentkern_gate::CircuitError;

// Scenario 5: circuit opens under failure burst, then recovers.
#[tokio::test]
async fn circuit_opens_under_failure_burst_then_recovers() {
    let registry = CircuitRegistry::new(CircuitConfig {
        failure_threshold: 5,
        success_threshold: 2,
        open_timeout: Duration::from_millis(50),
        half_open_max_calls: 3,
    });
    let circuit = registry.get("inference");

    for _ in 0..5 {
        let _ = circuit.execute(|| async { Err::<(), _>("downstream unavailable") }).await;
    }

    let sixth = circuit.execute(|| async { Ok::<_, &str>(()) }).await;
    assert!(matches!(sixth, Err(CircuitError::CircuitOpen { .. })));

    tokio::time::sleep(Duration::from_millis(60)).await;

    let _ = circuit.execute(|| async { Ok::<_, &str>(()) }).await.unwrap();
    let _ = circuit.execute(|| async { Ok::<_, &str>(()) }).await.unwrap();
    assert_eq!(circuit.status().state, agentkern_gate::circuit::State::Closed);
}

// Scenario 6: rate-limit isolation between tenants.
#[test]
fn rate_limit_isolation_between_tenants() {
    let limiter = RateLimiter::new(1, 100, Duration::from_secs(60));
    assert!(limiter.acquire("tenant-1", "user-1").is_ok());
    assert!(limiter.acquire("tenant-1", "user-1").is_err());
    assert!(limiter.acquire("tenant-2", "user-1").is_ok());
}
