use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::GatewayError;

/// Circuit state visible to callers and the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Per-provider circuit breaker.
///
/// CLOSED → OPEN after `failure_threshold` consecutive failures;
/// OPEN → HALF_OPEN once `recovery` has elapsed (a single probe call is let
/// through); HALF_OPEN → CLOSED on success, back to OPEN on failure.
/// While OPEN, calls fail fast so analyzers drop to their fallback path.
pub struct CircuitBreaker {
    provider: String,
    failure_threshold: u32,
    recovery: Duration,
    inner: Mutex<Inner>,
}

struct Inner {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(provider: impl Into<String>, failure_threshold: u32, recovery: Duration) -> Self {
        Self {
            provider: provider.into(),
            failure_threshold,
            recovery,
            inner: Mutex::new(Inner {
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock().unwrap();
        match inner.opened_at {
            None => CircuitState::Closed,
            Some(t) if t.elapsed() >= self.recovery => CircuitState::HalfOpen,
            Some(_) => CircuitState::Open,
        }
    }

    /// Gate a call. Fails fast while OPEN; lets exactly one probe through
    /// once the recovery window has elapsed.
    pub fn check(&self) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.opened_at {
            None => Ok(()),
            Some(t) if t.elapsed() >= self.recovery => {
                if inner.probe_in_flight {
                    Err(GatewayError::CircuitOpen {
                        provider: self.provider.clone(),
                    })
                } else {
                    inner.probe_in_flight = true;
                    info!(provider = %self.provider, "circuit half-open, probing");
                    Ok(())
                }
            }
            Some(_) => Err(GatewayError::CircuitOpen {
                provider: self.provider.clone(),
            }),
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.opened_at.is_some() {
            info!(provider = %self.provider, "circuit closed after successful probe");
        }
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures += 1;
        inner.probe_in_flight = false;
        if inner.opened_at.is_some() {
            // failed probe — restart the recovery clock
            inner.opened_at = Some(Instant::now());
        } else if inner.consecutive_failures >= self.failure_threshold {
            warn!(
                provider = %self.provider,
                failures = inner.consecutive_failures,
                "circuit opened"
            );
            inner.opened_at = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, recovery_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new("test", threshold, Duration::from_millis(recovery_ms))
    }

    #[test]
    fn stays_closed_below_threshold() {
        let b = breaker(3, 1000);
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.check().is_ok());
    }

    #[test]
    fn opens_at_threshold_and_fails_fast() {
        let b = breaker(2, 1000);
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
        assert!(matches!(
            b.check(),
            Err(GatewayError::CircuitOpen { .. })
        ));
    }

    #[test]
    fn success_resets_failure_streak() {
        let b = breaker(2, 1000);
        b.record_failure();
        b.record_success();
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_allows_single_probe() {
        let b = breaker(1, 10);
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert!(b.check().is_ok(), "first probe goes through");
        assert!(b.check().is_err(), "second concurrent probe is rejected");
    }

    #[test]
    fn successful_probe_closes_circuit() {
        let b = breaker(1, 10);
        b.record_failure();
        std::thread::sleep(Duration::from_millis(25));
        assert!(b.check().is_ok());
        b.record_success();
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.check().is_ok());
    }

    #[test]
    fn failed_probe_reopens_circuit() {
        let b = breaker(1, 10);
        b.record_failure();
        std::thread::sleep(Duration::from_millis(25));
        assert!(b.check().is_ok());
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
        assert!(b.check().is_err());
    }
}
