//! Active health probing with hysteresis.
//!
//! Each routing config runs one monitor task that probes every member backend
//! on a fixed interval. A backend changes state only after a run of
//! consecutive probe results crosses the configured threshold, so a single
//! flaky probe never flips traffic.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, LazyLock,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{backend::Backend, error::ProbeError};

/// Probe mechanism selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    #[default]
    Http,
    Tcp,
    /// Placeholder until a gRPC health client is wired in.
    Grpc,
    /// Placeholder for operator-supplied probe scripts.
    Script,
}

/// Health check configuration for one routing config's backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default)]
    pub kind: ProbeKind,
    /// Seconds between probe rounds.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Per-probe timeout in seconds. A timeout counts as a failed probe.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Path probed for HTTP backends.
    #[serde(default = "default_path")]
    pub path: String,
    /// Expected HTTP status code.
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
    /// Optional substring the response body must contain.
    #[serde(default)]
    pub expected_body: Option<String>,
    /// Consecutive successes required to mark an unhealthy backend healthy.
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: usize,
    /// Consecutive failures required to mark a healthy backend unhealthy.
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: usize,
}

fn default_interval_secs() -> u64 {
    10
}
fn default_timeout_secs() -> u64 {
    5
}
fn default_path() -> String {
    "/health".to_string()
}
fn default_expected_status() -> u16 {
    200
}
fn default_healthy_threshold() -> usize {
    2
}
fn default_unhealthy_threshold() -> usize {
    3
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            kind: ProbeKind::Http,
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
            path: default_path(),
            expected_status: default_expected_status(),
            expected_body: None,
            healthy_threshold: default_healthy_threshold(),
            unhealthy_threshold: default_unhealthy_threshold(),
        }
    }
}

/// A single probe attempt against one backend.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, backend: &Backend, config: &HealthCheckConfig) -> Result<(), ProbeError>;
}

static PROBE_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .pool_max_idle_per_host(4)
        .build()
        .expect("failed to build probe HTTP client")
});

/// HTTP probe: GET the configured path and match status (and optionally a
/// body substring).
pub struct HttpProbe;

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, backend: &Backend, config: &HealthCheckConfig) -> Result<(), ProbeError> {
        let url = format!("{}{}", backend.url(), config.path);
        let timeout = Duration::from_secs(config.timeout_secs);

        let response = PROBE_CLIENT
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Timeout {
                        backend_id: backend.id().to_string(),
                    }
                } else {
                    ProbeError::Io {
                        backend_id: backend.id().to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status().as_u16();
        if status != config.expected_status {
            return Err(ProbeError::Io {
                backend_id: backend.id().to_string(),
                reason: format!("unexpected status {status}, wanted {}", config.expected_status),
            });
        }

        if let Some(needle) = &config.expected_body {
            let body = response.text().await.map_err(|e| ProbeError::Io {
                backend_id: backend.id().to_string(),
                reason: e.to_string(),
            })?;
            if !body.contains(needle.as_str()) {
                return Err(ProbeError::Io {
                    backend_id: backend.id().to_string(),
                    reason: "expected body substring not found".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// TCP probe: a successful connect within the timeout counts as healthy.
pub struct TcpProbe;

#[async_trait]
impl HealthProbe for TcpProbe {
    async fn probe(&self, backend: &Backend, config: &HealthCheckConfig) -> Result<(), ProbeError> {
        let addr = format!("{}:{}", backend.host(), backend.port());
        let timeout = Duration::from_secs(config.timeout_secs);

        match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(&addr)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(ProbeError::Io {
                backend_id: backend.id().to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(ProbeError::Timeout {
                backend_id: backend.id().to_string(),
            }),
        }
    }
}

/// Stub probe for kinds without a real implementation yet. Reports success
/// unconditionally so configuring them never takes a backend down.
pub struct AlwaysHealthyProbe;

#[async_trait]
impl HealthProbe for AlwaysHealthyProbe {
    async fn probe(&self, _: &Backend, _: &HealthCheckConfig) -> Result<(), ProbeError> {
        Ok(())
    }
}

pub fn probe_for(kind: ProbeKind) -> Arc<dyn HealthProbe> {
    match kind {
        ProbeKind::Http => Arc::new(HttpProbe),
        ProbeKind::Tcp => Arc::new(TcpProbe),
        ProbeKind::Grpc | ProbeKind::Script => Arc::new(AlwaysHealthyProbe),
    }
}

/// Health state change produced by a probe round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthTransition {
    pub backend_id: String,
    pub healthy: bool,
}

/// Apply one probe outcome to a backend's hysteresis counters.
///
/// Returns a transition only when the consecutive-run threshold is crossed in
/// the direction opposite to the backend's current state.
pub fn apply_probe_outcome(backend: &Backend, success: bool) -> Option<HealthTransition> {
    let config = &backend.health_config;
    if success {
        backend
            .consecutive_probe_failures
            .store(0, Ordering::Relaxed);
        let successes = backend
            .consecutive_probe_successes
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        if !backend.is_healthy() && successes >= config.healthy_threshold {
            backend.set_healthy(true);
            return Some(HealthTransition {
                backend_id: backend.id().to_string(),
                healthy: true,
            });
        }
    } else {
        backend
            .consecutive_probe_successes
            .store(0, Ordering::Relaxed);
        let failures = backend
            .consecutive_probe_failures
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        if backend.is_healthy() && failures >= config.unhealthy_threshold {
            backend.set_healthy(false);
            return Some(HealthTransition {
                backend_id: backend.id().to_string(),
                healthy: false,
            });
        }
    }
    None
}

/// Handle to a running health monitor task. Dropping the handle does not stop
/// the task; call [`HealthMonitor::shutdown`].
pub struct HealthMonitor {
    handle: JoinHandle<()>,
    running: Arc<AtomicBool>,
}

impl HealthMonitor {
    /// Spawn a monitor that probes every backend returned by `members` on the
    /// config's interval, reporting transitions through `on_transition`.
    ///
    /// `members` is re-evaluated each round so backends added or removed
    /// after startup are picked up without restarting the monitor.
    pub fn spawn<M, F>(
        config_id: String,
        config: HealthCheckConfig,
        members: M,
        on_transition: F,
    ) -> Self
    where
        M: Fn() -> Arc<[Arc<Backend>]> + Send + Sync + 'static,
        F: Fn(HealthTransition) + Send + Sync + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = Arc::clone(&running);
        let probe = probe_for(config.kind);

        let handle = tokio::spawn(async move {
            info!(config_id = %config_id, interval_secs = config.interval_secs, "health monitor started");
            let mut ticker = tokio::time::interval(Duration::from_secs(config.interval_secs.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            while running_clone.load(Ordering::Acquire) {
                ticker.tick().await;
                if !running_clone.load(Ordering::Acquire) {
                    break;
                }

                let backends = members();
                let results = futures::future::join_all(
                    backends
                        .iter()
                        .map(|backend| probe.probe(backend, &backend.health_config)),
                )
                .await;
                for (backend, result) in backends.iter().zip(results) {
                    if let Err(e) = &result {
                        debug!(backend_id = %backend.id(), error = %e, "health probe failed");
                    }
                    if let Some(transition) = apply_probe_outcome(backend, result.is_ok()) {
                        if transition.healthy {
                            info!(backend_id = %transition.backend_id, "backend recovered");
                        } else {
                            warn!(backend_id = %transition.backend_id, "backend marked unhealthy");
                        }
                        on_transition(transition);
                    }
                }
            }
            info!(config_id = %config_id, "health monitor stopped");
        });

        Self { handle, running }
    }

    /// Stop the monitor and wait for its task to finish.
    pub async fn shutdown(self) {
        self.running.store(false, Ordering::Release);
        self.handle.abort();
        if let Err(e) = self.handle.await {
            if !e.is_cancelled() {
                error!(error = %e, "health monitor task panicked");
            }
        }
    }
}
