use std::{
    sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tracing::info;

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Fraction of failed outcomes within the window that opens the circuit.
    pub failure_threshold: f64,
    /// Minimum windowed failures before the fraction is evaluated.
    pub min_failures: u32,
    /// Time window for failure counting, in milliseconds.
    pub failure_window_ms: u64,
    /// Duration to wait before attempting half-open, in milliseconds.
    pub reset_timeout_ms: u64,
    /// Consecutive successes in half-open required to close the circuit.
    pub half_open_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 0.5,
            min_failures: 5,
            failure_window_ms: 60_000,
            reset_timeout_ms: 30_000,
            half_open_requests: 3,
        }
    }
}

/// Circuit breaker state constants for atomic storage.
const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, requests are allowed.
    Closed,
    /// Circuit is open, the backend is bypassed.
    Open,
    /// Probing whether the backend has recovered.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn to_int(self) -> u8 {
        match self {
            CircuitState::Closed => STATE_CLOSED,
            CircuitState::Open => STATE_OPEN,
            CircuitState::HalfOpen => STATE_HALF_OPEN,
        }
    }

    fn from_int(v: u8) -> Self {
        match v {
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state transition observed while recording an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitTransition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Monotonic milliseconds since an arbitrary process-local epoch, suitable for
/// atomic storage.
#[inline]
fn now_ms() -> u64 {
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_millis() as u64
}

/// Per-backend circuit breaker using lock-free atomics on the hot path.
///
/// State checks (the most common operation) are plain atomic loads; state
/// transitions use compare-and-swap. The failure count is windowed: counters
/// reset once the window expires, and a success while closed decrements the
/// failure count instead of clearing it, giving a sliding tolerance.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// 0=Closed, 1=Open, 2=HalfOpen.
    state: AtomicU8,
    window_failures: AtomicU32,
    window_total: AtomicU32,
    /// Start of the current failure window (now_ms clock).
    window_start_ms: AtomicU64,
    half_open_successes: AtomicU32,
    last_failure_ms: AtomicU64,
    /// Earliest time an open circuit may transition to half-open.
    next_attempt_ms: AtomicU64,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(STATE_CLOSED),
            window_failures: AtomicU32::new(0),
            window_total: AtomicU32::new(0),
            window_start_ms: AtomicU64::new(now_ms()),
            half_open_successes: AtomicU32::new(0),
            last_failure_ms: AtomicU64::new(0),
            next_attempt_ms: AtomicU64::new(0),
            config,
        }
    }

    /// Whether a request may be routed through this breaker.
    #[inline]
    pub fn can_execute(&self) -> bool {
        !matches!(self.state(), CircuitState::Open)
    }

    /// Current state. Lazily performs the open -> half-open transition once
    /// the reset timeout has elapsed.
    pub fn state(&self) -> CircuitState {
        let current = CircuitState::from_int(self.state.load(Ordering::Acquire));

        if current == CircuitState::Open && now_ms() >= self.next_attempt_ms.load(Ordering::Acquire)
        {
            // Only one caller wins the CAS; losers re-read whatever state the
            // winner (or a concurrent failure) left behind.
            if self
                .state
                .compare_exchange(
                    STATE_OPEN,
                    STATE_HALF_OPEN,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.half_open_successes.store(0, Ordering::Release);
                info!("circuit breaker transition: open -> half_open");
                return CircuitState::HalfOpen;
            }
            return CircuitState::from_int(self.state.load(Ordering::Acquire));
        }
        current
    }

    /// Record the outcome of a completed request. Returns the state transition
    /// it caused, if any.
    pub fn record_outcome(&self, success: bool) -> Option<CircuitTransition> {
        self.roll_window();
        if success {
            self.record_success()
        } else {
            self.record_failure()
        }
    }

    fn record_success(&self) -> Option<CircuitTransition> {
        self.window_total.fetch_add(1, Ordering::Relaxed);
        // Sliding tolerance: forgive one windowed failure per success.
        let _ = self
            .window_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |f| f.checked_sub(1));

        match self.state() {
            CircuitState::HalfOpen => {
                let successes = self.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.half_open_requests {
                    return self.transition_to(CircuitState::Closed);
                }
                None
            }
            _ => None,
        }
    }

    fn record_failure(&self) -> Option<CircuitTransition> {
        self.window_total.fetch_add(1, Ordering::Relaxed);
        let failures = self.window_failures.fetch_add(1, Ordering::AcqRel) + 1;
        self.last_failure_ms.store(now_ms(), Ordering::Release);

        match self.state() {
            CircuitState::Closed => {
                let total = self.window_total.load(Ordering::Relaxed).max(1);
                let ratio = failures as f64 / total as f64;
                if failures >= self.config.min_failures && ratio >= self.config.failure_threshold {
                    return self.open_circuit();
                }
                None
            }
            CircuitState::HalfOpen => self.open_circuit(),
            CircuitState::Open => None,
        }
    }

    /// Reset window counters once the failure window has elapsed.
    fn roll_window(&self) {
        let now = now_ms();
        let start = self.window_start_ms.load(Ordering::Acquire);
        if now.saturating_sub(start) >= self.config.failure_window_ms
            && self
                .window_start_ms
                .compare_exchange(start, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.window_failures.store(0, Ordering::Release);
            self.window_total.store(0, Ordering::Release);
        }
    }

    fn open_circuit(&self) -> Option<CircuitTransition> {
        self.next_attempt_ms.store(
            now_ms() + self.config.reset_timeout_ms,
            Ordering::Release,
        );
        self.transition_to(CircuitState::Open)
    }

    fn transition_to(&self, new_state: CircuitState) -> Option<CircuitTransition> {
        let old = CircuitState::from_int(self.state.swap(new_state.to_int(), Ordering::AcqRel));
        if old == new_state {
            return None;
        }

        if new_state == CircuitState::Closed {
            self.window_failures.store(0, Ordering::Release);
            self.window_total.store(0, Ordering::Release);
            self.window_start_ms.store(now_ms(), Ordering::Release);
        }
        self.half_open_successes.store(0, Ordering::Release);

        info!(
            "circuit breaker transition: {} -> {}",
            old.as_str(),
            new_state.as_str()
        );
        Some(CircuitTransition {
            from: old,
            to: new_state,
        })
    }

    /// Number of failures in the current window.
    pub fn window_failures(&self) -> u32 {
        self.window_failures.load(Ordering::Acquire)
    }

    /// Time since the last recorded failure.
    pub fn time_since_last_failure(&self) -> Option<Duration> {
        let last = self.last_failure_ms.load(Ordering::Acquire);
        (last != 0).then(|| Duration::from_millis(now_ms().saturating_sub(last)))
    }

    /// Reset to closed (manual intervention).
    pub fn reset(&self) -> Option<CircuitTransition> {
        self.transition_to(CircuitState::Closed)
    }

    /// Force the circuit open (manual intervention).
    pub fn force_open(&self) -> Option<CircuitTransition> {
        self.open_circuit()
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            state: self.state(),
            window_failures: self.window_failures.load(Ordering::Acquire),
            window_total: self.window_total.load(Ordering::Acquire),
            half_open_successes: self.half_open_successes.load(Ordering::Acquire),
            time_since_last_failure: self.time_since_last_failure(),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

/// Point-in-time circuit breaker statistics.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub window_failures: u32,
    pub window_total: u32,
    pub half_open_successes: u32,
    pub time_since_last_failure: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 0.5,
            min_failures: 1,
            failure_window_ms: 60_000,
            reset_timeout_ms: 50,
            half_open_requests: 3,
        }
    }

    #[test]
    fn test_initial_state() {
        let cb = CircuitBreaker::default();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
        assert_eq!(cb.window_failures(), 0);
    }

    #[test]
    fn test_opens_on_failure_rate() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());

        // 10 consecutive failures: ratio 1.0 over min_failures, must open.
        let mut opened = false;
        for _ in 0..10 {
            if let Some(t) = cb.record_outcome(false) {
                assert_eq!(t.to, CircuitState::Open);
                opened = true;
            }
        }
        assert!(opened);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
    }

    #[test]
    fn test_stays_closed_below_rate() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            min_failures: 5,
            ..CircuitBreakerConfig::default()
        });

        // 4 failures among 16 successes: ratio stays under 0.5.
        for _ in 0..4 {
            assert!(cb.record_outcome(false).is_none());
            for _ in 0..4 {
                cb.record_outcome(true);
            }
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_timeout() {
        let cb = CircuitBreaker::new(fast_config());

        cb.record_outcome(false);
        assert_eq!(cb.state(), CircuitState::Open);

        thread::sleep(Duration::from_millis(80));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.can_execute());
    }

    #[test]
    fn test_closes_after_half_open_successes() {
        let cb = CircuitBreaker::new(fast_config());

        cb.record_outcome(false);
        thread::sleep(Duration::from_millis(80));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_outcome(true);
        cb.record_outcome(true);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        let t = cb.record_outcome(true).expect("third success closes");
        assert_eq!(t.to, CircuitState::Closed);
        assert!(cb.can_execute());
    }

    #[test]
    fn test_reopens_on_half_open_failure() {
        let cb = CircuitBreaker::new(fast_config());

        cb.record_outcome(false);
        thread::sleep(Duration::from_millis(80));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let t = cb.record_outcome(false).expect("failure reopens");
        assert_eq!(t.to, CircuitState::Open);
        assert!(!cb.can_execute());

        // next_attempt_ms is fresh: still open right away, half-open later.
        assert_eq!(cb.state(), CircuitState::Open);
        thread::sleep(Duration::from_millis(80));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_success_decrements_failures() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());

        cb.record_outcome(false);
        cb.record_outcome(false);
        assert_eq!(cb.window_failures(), 2);

        cb.record_outcome(true);
        assert_eq!(cb.window_failures(), 1);

        // Never below zero.
        cb.record_outcome(true);
        cb.record_outcome(true);
        assert_eq!(cb.window_failures(), 0);
    }

    #[test]
    fn test_manual_reset_and_force_open() {
        let cb = CircuitBreaker::new(fast_config());

        cb.record_outcome(false);
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_stats() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        cb.record_outcome(true);
        cb.record_outcome(false);

        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.window_failures, 1);
        assert_eq!(stats.window_total, 2);
        assert!(stats.time_since_last_failure.is_some());
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;

        let cb = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            min_failures: u32::MAX,
            ..CircuitBreakerConfig::default()
        }));
        let mut handles = vec![];

        for _ in 0..8 {
            let cb = Arc::clone(&cb);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    cb.record_outcome(false);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cb.window_failures(), 800);
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
