//! Tests for the circuit breaker

use super::*;

#[test]
fn test_opens_at_threshold() {
    let breaker = CircuitBreaker::new(3, Some(Duration::from_secs(30)));
    breaker.record_failure();
    breaker.record_failure();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(breaker.allow_request().is_some());

    breaker.record_failure();
    assert!(breaker.is_open());
    assert_eq!(breaker.failure_count(), 3);
    assert!(breaker.allow_request().is_none());
}

#[test]
fn test_success_resets_count() {
    let breaker = CircuitBreaker::new(3, None);
    breaker.record_failure();
    breaker.record_failure();
    breaker.record_success();
    breaker.record_failure();
    breaker.record_failure();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.failure_count(), 2);
}

#[test]
fn test_zero_threshold_is_clamped() {
    let breaker = CircuitBreaker::new(0, None);
    assert_eq!(breaker.failure_threshold(), 1);
    assert!(breaker.allow_request().is_some());
    breaker.record_failure();
    assert!(breaker.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_half_open_after_cooldown() {
    let breaker = CircuitBreaker::new(1, Some(Duration::from_secs(30)));
    breaker.record_failure();
    assert!(breaker.allow_request().is_none());

    tokio::time::advance(Duration::from_secs(29)).await;
    assert!(breaker.allow_request().is_none());

    tokio::time::advance(Duration::from_secs(1)).await;
    let probe = breaker.allow_request().unwrap();
    assert!(probe.is_probe());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    // Only one probe while half-open
    assert!(breaker.allow_request().is_none());

    probe.succeeded();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.failure_count(), 0);
    assert!(breaker.allow_request().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_failed_probe_reopens() {
    let breaker = CircuitBreaker::new(2, Some(Duration::from_secs(10)));
    breaker.record_failure();
    breaker.record_failure();

    tokio::time::advance(Duration::from_secs(10)).await;
    breaker.allow_request().unwrap().failed();
    assert!(breaker.is_open());

    // Cool-down restarts from the failed probe
    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(breaker.allow_request().is_none());
    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(breaker.allow_request().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_inconclusive_probe_frees_slot() {
    let breaker = CircuitBreaker::new(1, Some(Duration::from_secs(1)));
    breaker.record_failure();
    tokio::time::advance(Duration::from_secs(1)).await;

    let probe = breaker.allow_request().unwrap();
    assert!(breaker.allow_request().is_none());
    probe.inconclusive();
    assert!(breaker.allow_request().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_dropped_half_open_admission_frees_slot() {
    let breaker = CircuitBreaker::new(1, Some(Duration::from_secs(1)));
    breaker.record_failure();
    tokio::time::advance(Duration::from_secs(1)).await;

    let probe = breaker.allow_request().unwrap();
    assert!(breaker.allow_request().is_none());
    drop(probe);

    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    let next = breaker.allow_request().unwrap();
    assert!(next.is_probe());
    next.succeeded();
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_stale_admission_does_not_free_newer_slot() {
    let breaker = CircuitBreaker::new(1, Some(Duration::from_secs(1)));
    breaker.record_failure();
    tokio::time::advance(Duration::from_secs(1)).await;
    let stale = breaker.allow_request().unwrap();

    // Trip again while the first probe is still outstanding
    breaker.record_failure();
    tokio::time::advance(Duration::from_secs(1)).await;
    let current = breaker.allow_request().unwrap();

    drop(stale);
    assert!(breaker.allow_request().is_none());
    current.succeeded();
}

#[tokio::test(start_paused = true)]
async fn test_permanent_trip_without_cooldown() {
    let breaker = CircuitBreaker::new(1, None);
    breaker.record_failure();

    tokio::time::advance(Duration::from_secs(24 * 60 * 60)).await;
    assert!(breaker.allow_request().is_none());
    assert!(breaker.is_open());

    breaker.reset();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(breaker.allow_request().is_some());
}

#[test]
fn test_state_serialization() {
    let json = serde_json::to_string(&CircuitState::HalfOpen).unwrap();
    assert_eq!(json, "\"half_open\"");
}

#[tokio::test(start_paused = true)]
async fn test_closed_admission_cannot_free_half_open_slot() {
    let breaker = CircuitBreaker::new(1, Some(Duration::from_secs(1)));
    let before_trip = breaker.allow_request().unwrap();
    assert!(!before_trip.is_probe());

    breaker.record_failure();
    tokio::time::advance(Duration::from_secs(1)).await;
    let probe = breaker.allow_request().unwrap();

    before_trip.inconclusive();
    assert!(breaker.allow_request().is_none());
    probe.succeeded();
    assert_eq!(breaker.state(), CircuitState::Closed);
}
