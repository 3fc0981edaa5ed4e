use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use serde::{Deserialize, Serialize};

use super::{
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig},
    health::HealthCheckConfig,
};

/// Smoothing factor for the response-time moving average.
const RESPONSE_TIME_ALPHA: f64 = 0.2;

/// Wire protocol a backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
    Grpc,
    Tcp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => write!(f, "http"),
            Protocol::Https => write!(f, "https"),
            Protocol::Grpc => write!(f, "grpc"),
            Protocol::Tcp => write!(f, "tcp"),
        }
    }
}

/// Static configuration for one backend instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub id: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub max_connections: Option<usize>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_weight() -> u32 {
    1
}

/// One upstream backend instance.
///
/// All mutable fields are atomics so the request path, the health monitor and
/// admin operations can touch a shared `Arc<Backend>` without locking.
pub struct Backend {
    pub(crate) id: String,
    host: String,
    port: u16,
    protocol: Protocol,
    metadata: HashMap<String, String>,
    max_connections: Option<usize>,

    weight: AtomicU32,
    healthy: AtomicBool,
    draining: AtomicBool,
    connections: AtomicUsize,
    /// EMA of response time in ms, stored as f64 bits.
    response_time_bits: AtomicU64,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,

    /// Hysteresis counters driven by the health monitor.
    pub(crate) consecutive_probe_failures: AtomicUsize,
    pub(crate) consecutive_probe_successes: AtomicUsize,

    circuit_breaker: CircuitBreaker,
    pub(crate) health_config: HealthCheckConfig,
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("id", &self.id)
            .field("url", &self.url())
            .field("healthy", &self.is_healthy())
            .field("connections", &self.connections())
            .field("weight", &self.weight())
            .finish()
    }
}

impl Backend {
    pub fn new(config: BackendConfig) -> Self {
        Self::with_policies(
            config,
            CircuitBreakerConfig::default(),
            HealthCheckConfig::default(),
        )
    }

    pub fn with_policies(
        config: BackendConfig,
        breaker: CircuitBreakerConfig,
        health: HealthCheckConfig,
    ) -> Self {
        Self {
            id: config.id,
            host: config.host,
            port: config.port,
            protocol: config.protocol,
            metadata: config.metadata,
            max_connections: config.max_connections,
            weight: AtomicU32::new(config.weight),
            healthy: AtomicBool::new(true),
            draining: AtomicBool::new(false),
            connections: AtomicUsize::new(0),
            response_time_bits: AtomicU64::new(0f64.to_bits()),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            consecutive_probe_failures: AtomicUsize::new(0),
            consecutive_probe_successes: AtomicUsize::new(0),
            circuit_breaker: CircuitBreaker::new(breaker),
            health_config: health,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn weight(&self) -> u32 {
        self.weight.load(Ordering::Relaxed)
    }

    pub fn set_weight(&self, weight: u32) {
        self.weight.store(weight, Ordering::Relaxed);
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    /// A draining backend finishes in-flight requests but takes no new ones.
    /// The health monitor keeps probing it, so the flag must gate selection
    /// independently of health.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    pub fn set_draining(&self, draining: bool) {
        self.draining.store(draining, Ordering::Release);
    }

    /// Healthy, not draining, breaker-permitting, and under its connection cap.
    pub fn is_available(&self) -> bool {
        !self.is_draining()
            && self.is_healthy()
            && self.circuit_breaker.can_execute()
            && self
                .max_connections
                .map_or(true, |max| self.connections() < max)
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn increment_connections(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_connections(&self) {
        if self
            .connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                current.checked_sub(1)
            })
            .is_err()
        {
            tracing::warn!(
                backend_id = %self.id,
                "attempted to decrement connection counter already at 0"
            );
        }
    }

    /// Moving-average response time in milliseconds.
    pub fn response_time_ms(&self) -> f64 {
        f64::from_bits(self.response_time_bits.load(Ordering::Relaxed))
    }

    /// Fraction of failed requests over all recorded requests.
    pub fn error_rate(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.failed_requests.load(Ordering::Relaxed) as f64 / total as f64
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn failed_requests(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }

    /// Record a completed request: latency EMA, error counters and the
    /// circuit breaker. Returns any breaker transition for event emission.
    pub fn record_result(
        &self,
        success: bool,
        latency_ms: f64,
    ) -> Option<super::circuit_breaker::CircuitTransition> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }

        // Lossy CAS loop on the EMA; a dropped sample under heavy contention
        // is acceptable for a smoothed metric.
        let mut current = self.response_time_bits.load(Ordering::Relaxed);
        loop {
            let old = f64::from_bits(current);
            let new = if old == 0.0 {
                latency_ms
            } else {
                old * (1.0 - RESPONSE_TIME_ALPHA) + latency_ms * RESPONSE_TIME_ALPHA
            };
            match self.response_time_bits.compare_exchange_weak(
                current,
                new.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        self.circuit_breaker.record_outcome(success)
    }

    /// Point-in-time metrics snapshot for observability export.
    pub fn snapshot(&self) -> BackendSnapshot {
        BackendSnapshot {
            id: self.id.clone(),
            url: self.url(),
            healthy: self.is_healthy(),
            connections: self.connections(),
            weight: self.weight(),
            response_time_ms: self.response_time_ms(),
            error_rate: self.error_rate(),
            circuit_state: self.circuit_breaker.state(),
        }
    }
}

/// Exported per-backend metrics.
#[derive(Debug, Clone)]
pub struct BackendSnapshot {
    pub id: String,
    pub url: String,
    pub healthy: bool,
    pub connections: usize,
    pub weight: u32,
    pub response_time_ms: f64,
    pub error_rate: f64,
    pub circuit_state: super::circuit_breaker::CircuitState,
}

/// RAII guard that decrements a backend's connection counter on drop.
///
/// Useful when the caller's request lifetime is tied to a scope rather than an
/// explicit completion callback.
pub struct ConnectionGuard {
    backend: Arc<Backend>,
}

impl ConnectionGuard {
    pub fn new(backend: Arc<Backend>) -> Self {
        backend.increment_connections();
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.backend.decrement_connections();
    }
}

#[cfg(test)]
pub(crate) fn test_backend(id: &str) -> Arc<Backend> {
    Arc::new(Backend::new(BackendConfig {
        id: id.to_string(),
        host: format!("{}.internal", id),
        port: 8080,
        protocol: Protocol::Http,
        weight: 1,
        max_connections: None,
        metadata: HashMap::new(),
    }))
}
