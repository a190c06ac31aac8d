//! Circuit breaker recovery specs

use std::time::Duration;
use warden_core::{BreakerConfig, CircuitBreaker, CircuitState, FakeClock};

#[test]
fn breaker_opens_cools_down_and_recovers() {
    let clock = FakeClock::new();
    let config = BreakerConfig {
        failure_threshold: 3,
        recovery_threshold: 2,
        open_timeout: Duration::from_secs(1),
        ..BreakerConfig::default()
    };
    let breaker = CircuitBreaker::new(clock.clone(), config);

    for _ in 0..3 {
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
    }
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(!breaker.allow_request());

    clock.advance(Duration::from_millis(1001));
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    assert!(breaker.allow_request());

    breaker.record_success();
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    breaker.record_success();
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[test]
fn failed_probe_reopens_the_circuit() {
    let clock = FakeClock::new();
    let breaker = CircuitBreaker::new(clock.clone(), BreakerConfig::for_testing());
    for _ in 0..3 {
        breaker.record_failure();
    }
    clock.advance(Duration::from_millis(60));
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    breaker.record_failure();
    assert_eq!(breaker.state(), CircuitState::Open);
}
