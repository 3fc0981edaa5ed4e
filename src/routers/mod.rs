//! The routing engine: request-path selection plus admin operations.
//!
//! [`RouterEngine`] owns the registry, the session store, the rate limiter and
//! all background tasks (health monitors, the session sweeper, rollouts). The
//! request path is synchronous and lock-light; admin operations that stop
//! tasks are async so they can await task shutdown.

pub mod rollout;
pub mod splitter;

pub use rollout::{RolloutHandle, RolloutPlan, RolloutStatus};

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::{RoutingConfig, TrafficSplitRule};
use crate::core::{
    Backend, BackendRegistry, BackendSnapshot, GatewayError, GatewayResult, HealthMonitor,
    RateLimiter, RegistryStats, SessionAffinityConfig, SessionStore, SessionSweeper,
};
use crate::observability::{EngineEvent, EventBus};
use crate::policies::{PolicyFactory, RequestContext, RoutingPolicy};

/// Outcome of a successful routing decision.
///
/// The engine has already counted the connection against the backend; the
/// caller must report completion through
/// [`RouterEngine::record_request_result`].
#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub backend: Arc<Backend>,
    /// Session id to hand back to the client when affinity is active.
    pub session_id: Option<String>,
}

/// Per-config runtime state.
struct ConfigEntry {
    policy: Arc<dyn RoutingPolicy>,
    split_rules: Arc<RwLock<Vec<TrafficSplitRule>>>,
    affinity: Option<SessionAffinityConfig>,
    /// Policy templates applied to backends added after load.
    breaker: crate::core::CircuitBreakerConfig,
    health: crate::core::HealthCheckConfig,
    monitor: Mutex<Option<HealthMonitor>>,
}

struct RolloutEntry {
    config_id: String,
    handle: RolloutHandle,
}

/// Sweep cadence used until a loaded config asks for a tighter one.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Owns all routing state and background tasks.
///
/// Construction and config loading must happen inside a Tokio runtime because
/// they spawn the sweeper and health monitor tasks.
pub struct RouterEngine {
    registry: Arc<BackendRegistry>,
    configs: DashMap<String, Arc<ConfigEntry>>,
    rate_limiter: RateLimiter,
    sessions: Arc<SessionStore>,
    sweeper: Mutex<Option<SessionSweeper>>,
    sweep_interval: Mutex<Duration>,
    rollouts: DashMap<String, RolloutEntry>,
    events: EventBus,
    shut_down: AtomicBool,
}

impl RouterEngine {
    pub fn new() -> Self {
        let sessions = Arc::new(SessionStore::new());
        let sweeper = SessionSweeper::spawn(Arc::clone(&sessions), DEFAULT_SWEEP_INTERVAL);

        Self {
            registry: Arc::new(BackendRegistry::new()),
            configs: DashMap::new(),
            rate_limiter: RateLimiter::new(),
            sessions,
            sweeper: Mutex::new(Some(sweeper)),
            sweep_interval: Mutex::new(DEFAULT_SWEEP_INTERVAL),
            rollouts: DashMap::new(),
            events: EventBus::default(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Shrink the shared sweeper's interval when a config asks for a tighter
    /// cleanup cadence than what is currently running.
    fn tighten_sweep_interval(&self, interval: Duration) {
        if self.shut_down.load(Ordering::Acquire) {
            return;
        }
        let mut current = self.sweep_interval.lock();
        if interval >= *current {
            return;
        }
        *current = interval;
        let replaced = self
            .sweeper
            .lock()
            .replace(SessionSweeper::spawn(Arc::clone(&self.sessions), interval));
        if let Some(old) = replaced {
            tokio::spawn(old.shutdown());
        }
    }

    /// Load and activate a routing config. Fails if the id is already loaded
    /// or the config does not validate.
    pub fn load_config(&self, config: RoutingConfig) -> GatewayResult<()> {
        config.validate()?;
        if self.configs.contains_key(&config.id) {
            return Err(GatewayError::InvalidConfiguration {
                message: format!("config {} is already loaded", config.id),
            });
        }

        let config_id = config.id.clone();
        let backend_count = config.backends.len();

        for backend_config in config.backends {
            let backend = Arc::new(Backend::with_policies(
                backend_config,
                config.circuit_breaker.clone(),
                config.health_check.clone(),
            ));
            self.registry.add(&config_id, backend);
        }

        if let Some(limit) = &config.rate_limit {
            self.rate_limiter.install(&config_id, limit);
        }

        if let Some(affinity) = &config.session_affinity {
            self.tighten_sweep_interval(Duration::from_secs(affinity.cleanup_interval_secs.max(1)));
        }

        let monitor = {
            let registry = Arc::clone(&self.registry);
            let members_config_id = config_id.clone();
            let events = self.events.clone();
            HealthMonitor::spawn(
                config_id.clone(),
                config.health_check.clone(),
                move || registry.get_members(&members_config_id),
                move |transition| {
                    events.publish(EngineEvent::BackendHealthChanged {
                        backend_id: transition.backend_id,
                        healthy: transition.healthy,
                    });
                },
            )
        };

        let entry = ConfigEntry {
            policy: PolicyFactory::create(config.algorithm),
            split_rules: Arc::new(RwLock::new(config.traffic_split)),
            affinity: config.session_affinity,
            breaker: config.circuit_breaker,
            health: config.health_check,
            monitor: Mutex::new(Some(monitor)),
        };
        self.configs.insert(config_id.clone(), Arc::new(entry));

        self.events.publish(EngineEvent::ConfigLoaded {
            config_id,
            backend_count,
        });
        Ok(())
    }

    /// Deactivate a config: stop its health monitor and rollouts, drop its
    /// backends, rate limit bucket and sessions.
    pub async fn remove_config(&self, config_id: &str) -> GatewayResult<()> {
        let (_, entry) = self
            .configs
            .remove(config_id)
            .ok_or_else(|| GatewayError::ConfigNotFound {
                id: config_id.to_string(),
            })?;

        // Guard dropped before the await below.
        let monitor = entry.monitor.lock().take();
        if let Some(monitor) = monitor {
            monitor.shutdown().await;
        }

        let rollout_ids: Vec<String> = self
            .rollouts
            .iter()
            .filter(|e| e.config_id == config_id)
            .map(|e| e.key().clone())
            .collect();
        for id in rollout_ids {
            if let Some((_, entry)) = self.rollouts.remove(&id) {
                entry.handle.cancel().await;
            }
        }

        for backend in self.registry.get_members(config_id).iter() {
            self.registry.remove(config_id, backend.id());
            self.sessions.evict_backend(backend.id());
        }
        self.rate_limiter.remove(config_id);

        self.events.publish(EngineEvent::ConfigRemoved {
            config_id: config_id.to_string(),
        });
        Ok(())
    }

    /// Route one request. Synchronous: rate limit, session affinity, traffic
    /// split, then the config's selection policy, in that order.
    pub fn route_request(
        &self,
        config_id: &str,
        ctx: &RequestContext,
    ) -> GatewayResult<RouteDecision> {
        let entry = self
            .configs
            .get(config_id)
            .map(|e| Arc::clone(&e))
            .ok_or_else(|| GatewayError::ConfigNotFound {
                id: config_id.to_string(),
            })?;

        if !self.rate_limiter.allow(config_id) {
            return Err(GatewayError::RateLimited {
                config_id: config_id.to_string(),
            });
        }

        let members = self.registry.get_members(config_id);

        // Sticky sessions take precedence over everything else as long as the
        // bound backend can still take traffic.
        let mut session = None;
        if let Some(affinity) = &entry.affinity {
            if let Some((key, session_id)) = SessionStore::session_key(
                config_id,
                affinity,
                ctx.session_id.as_deref(),
                ctx.client_ip.as_deref(),
            ) {
                let ttl = Duration::from_secs(affinity.ttl_secs);
                if let Some(bound_id) = self.sessions.lookup(&key) {
                    let bound = members
                        .iter()
                        .find(|b| b.id() == bound_id && b.is_available());
                    match bound {
                        Some(backend) => {
                            self.sessions.bind(&key, &bound_id, ttl);
                            backend.increment_connections();
                            return Ok(RouteDecision {
                                backend: Arc::clone(backend),
                                session_id: Some(session_id),
                            });
                        }
                        None => {
                            debug!(session_key = %key, backend_id = %bound_id, "sticky backend unavailable, rebinding");
                            self.sessions.evict(&key);
                        }
                    }
                }
                session = Some((key, session_id, ttl));
            }
        }

        let backend = splitter::select_split_backend(&entry.split_rules.read(), &members, ctx)
            .or_else(|| {
                let ring = entry
                    .policy
                    .needs_hash_ring()
                    .then(|| self.registry.get_hash_ring(config_id))
                    .flatten();
                entry
                    .policy
                    .select(&members, ring.as_deref(), ctx)
                    .map(|i| Arc::clone(&members[i]))
            })
            .ok_or_else(|| GatewayError::NoAvailableBackend {
                config_id: config_id.to_string(),
            })?;

        backend.increment_connections();

        let session_id = session.map(|(key, session_id, ttl)| {
            self.sessions.bind(&key, backend.id(), ttl);
            session_id
        });

        Ok(RouteDecision {
            backend,
            session_id,
        })
    }

    /// Report a request's outcome: releases the connection slot, feeds the
    /// latency and error accounting and publishes any breaker transition.
    pub fn record_request_result(
        &self,
        backend_id: &str,
        success: bool,
        latency_ms: f64,
    ) -> GatewayResult<()> {
        let backend = self
            .registry
            .get(backend_id)
            .ok_or_else(|| GatewayError::BackendNotFound {
                id: backend_id.to_string(),
            })?;

        backend.decrement_connections();
        if let Some(transition) = backend.record_result(success, latency_ms) {
            self.events.publish(EngineEvent::CircuitBreakerTransition {
                backend_id: backend_id.to_string(),
                from: transition.from,
                to: transition.to,
            });
        }
        Ok(())
    }

    /// Add a backend to a live config. It inherits the config's breaker and
    /// health policies.
    pub fn add_backend(
        &self,
        config_id: &str,
        backend_config: crate::core::BackendConfig,
    ) -> GatewayResult<()> {
        let entry = self
            .configs
            .get(config_id)
            .map(|e| Arc::clone(&e))
            .ok_or_else(|| GatewayError::ConfigNotFound {
                id: config_id.to_string(),
            })?;

        let backend_id = backend_config.id.clone();
        let backend = Arc::new(Backend::with_policies(
            backend_config,
            entry.breaker.clone(),
            entry.health.clone(),
        ));
        self.registry.add(config_id, backend);

        self.events.publish(EngineEvent::BackendAdded {
            config_id: config_id.to_string(),
            backend_id,
        });
        Ok(())
    }

    /// Remove a backend immediately, dropping any sticky sessions bound to it.
    pub fn remove_backend(&self, config_id: &str, backend_id: &str) -> GatewayResult<()> {
        self.registry
            .remove(config_id, backend_id)
            .ok_or_else(|| GatewayError::BackendNotFound {
                id: backend_id.to_string(),
            })?;
        let evicted = self.sessions.evict_backend(backend_id);
        if evicted > 0 {
            info!(backend_id, evicted, "evicted sessions for removed backend");
        }

        self.events.publish(EngineEvent::BackendRemoved {
            config_id: config_id.to_string(),
            backend_id: backend_id.to_string(),
        });
        Ok(())
    }

    /// Gracefully drain a backend: stop sending it new traffic and wait for
    /// in-flight requests to finish, bounded by `timeout`. The backend stays
    /// registered but out of rotation either way; a timeout is a warning, not
    /// an error. Returns whether the drain completed before the timeout.
    pub async fn drain_backend(
        &self,
        backend_id: &str,
        timeout: Duration,
    ) -> GatewayResult<bool> {
        let backend = self
            .registry
            .get(backend_id)
            .ok_or_else(|| GatewayError::BackendNotFound {
                id: backend_id.to_string(),
            })?;

        backend.set_draining(true);
        info!(backend_id, connections = backend.connections(), "draining backend");

        let deadline = tokio::time::Instant::now() + timeout;
        while backend.connections() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let completed = backend.connections() == 0;
        if !completed {
            warn!(
                backend_id,
                remaining = backend.connections(),
                "drain timed out with requests in flight"
            );
        }

        self.events.publish(EngineEvent::BackendDrained {
            backend_id: backend_id.to_string(),
            completed,
        });
        Ok(completed)
    }

    /// Install (replace) a config's traffic-split rules.
    pub fn set_traffic_split(
        &self,
        config_id: &str,
        rules: Vec<TrafficSplitRule>,
    ) -> GatewayResult<()> {
        let entry = self
            .configs
            .get(config_id)
            .map(|e| Arc::clone(&e))
            .ok_or_else(|| GatewayError::ConfigNotFound {
                id: config_id.to_string(),
            })?;

        let members = self.registry.get_members(config_id);
        let known: std::collections::HashSet<&str> = members.iter().map(|b| b.id()).collect();
        for rule in &rules {
            crate::config::validate_split_rule(rule, &known)?;
        }

        *entry.split_rules.write() = rules;
        info!(config_id, "traffic split rules replaced");
        Ok(())
    }

    pub fn set_backend_weight(&self, backend_id: &str, weight: u32) -> GatewayResult<()> {
        let backend = self
            .registry
            .get(backend_id)
            .ok_or_else(|| GatewayError::BackendNotFound {
                id: backend_id.to_string(),
            })?;
        backend.set_weight(weight);
        Ok(())
    }

    /// Manually close a backend's circuit.
    pub fn reset_circuit_breaker(&self, backend_id: &str) -> GatewayResult<()> {
        let backend = self
            .registry
            .get(backend_id)
            .ok_or_else(|| GatewayError::BackendNotFound {
                id: backend_id.to_string(),
            })?;
        if let Some(transition) = backend.circuit_breaker().reset() {
            self.events.publish(EngineEvent::CircuitBreakerTransition {
                backend_id: backend_id.to_string(),
                from: transition.from,
                to: transition.to,
            });
        }
        Ok(())
    }

    /// Start a staged canary rollout on a config.
    pub fn start_rollout(&self, config_id: &str, plan: RolloutPlan) -> GatewayResult<()> {
        let entry = self
            .configs
            .get(config_id)
            .map(|e| Arc::clone(&e))
            .ok_or_else(|| GatewayError::ConfigNotFound {
                id: config_id.to_string(),
            })?;

        plan.validate()
            .map_err(|message| GatewayError::InvalidConfiguration { message })?;

        let members = self.registry.get_members(config_id);
        let canary = members
            .iter()
            .find(|b| b.id() == plan.canary_backend_id)
            .cloned()
            .ok_or_else(|| GatewayError::BackendNotFound {
                id: plan.canary_backend_id.clone(),
            })?;

        if let Some(existing) = self.rollouts.get(&plan.id) {
            if !existing.handle.is_finished() {
                return Err(GatewayError::InvalidConfiguration {
                    message: format!("rollout {} is already running", plan.id),
                });
            }
        }

        let stable_backend_ids: Vec<String> = members
            .iter()
            .filter(|b| b.id() != plan.canary_backend_id)
            .map(|b| b.id().to_string())
            .collect();

        let rollout_id = plan.id.clone();
        let handle = rollout::spawn_rollout(
            config_id.to_string(),
            plan,
            canary,
            stable_backend_ids,
            Arc::clone(&entry.split_rules),
            self.events.clone(),
        );
        self.rollouts.insert(
            rollout_id,
            RolloutEntry {
                config_id: config_id.to_string(),
                handle,
            },
        );
        Ok(())
    }

    pub fn rollout_status(&self, rollout_id: &str) -> Option<RolloutStatus> {
        self.rollouts.get(rollout_id).map(|e| e.handle.status())
    }

    /// Cancel a rollout, reverting its traffic share to the stable backends.
    pub async fn cancel_rollout(&self, rollout_id: &str) -> Option<RolloutStatus> {
        let (_, entry) = self.rollouts.remove(rollout_id)?;
        Some(entry.handle.cancel().await)
    }

    /// Instantly shift all of a config's matched traffic to one backend.
    pub fn blue_green_cutover(&self, config_id: &str, target_backend_id: &str) -> GatewayResult<()> {
        let entry = self
            .configs
            .get(config_id)
            .map(|e| Arc::clone(&e))
            .ok_or_else(|| GatewayError::ConfigNotFound {
                id: config_id.to_string(),
            })?;

        let members = self.registry.get_members(config_id);
        if !members.iter().any(|b| b.id() == target_backend_id) {
            return Err(GatewayError::BackendNotFound {
                id: target_backend_id.to_string(),
            });
        }

        rollout::apply_cutover(
            &entry.split_rules,
            &format!("cutover:{config_id}"),
            target_backend_id,
        );
        info!(config_id, target_backend_id, "blue-green cutover applied");
        Ok(())
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    pub fn backend_snapshots(&self) -> Vec<BackendSnapshot> {
        self.registry.snapshots()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.active_sessions()
    }

    pub fn session_snapshots(&self) -> Vec<crate::core::SessionSnapshot> {
        self.sessions.snapshots()
    }

    /// Stop every background task. Idempotent; the request path keeps working
    /// on whatever state remains but nothing is probed or swept afterwards.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("routing engine shutting down");

        // Collect handles first so no map reference is held across an await.
        let monitors: Vec<HealthMonitor> = self
            .configs
            .iter()
            .filter_map(|entry| entry.monitor.lock().take())
            .collect();
        for monitor in monitors {
            monitor.shutdown().await;
        }

        let rollout_ids: Vec<String> = self.rollouts.iter().map(|e| e.key().clone()).collect();
        for id in rollout_ids {
            if let Some((_, entry)) = self.rollouts.remove(&id) {
                entry.handle.cancel().await;
            }
        }

        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.shutdown().await;
        }
    }
}

impl Default for RouterEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BackendConfig, Protocol, RateLimitConfig, SessionAffinityConfig};
    use crate::policies::Algorithm;

    fn backend_config(id: &str) -> BackendConfig {
        BackendConfig {
            id: id.to_string(),
            host: format!("{id}.internal"),
            port: 8080,
            protocol: Protocol::Http,
            weight: 1,
            max_connections: None,
            metadata: Default::default(),
        }
    }

    fn basic_config(id: &str, backends: &[&str]) -> RoutingConfig {
        RoutingConfig::new(
            id,
            Algorithm::RoundRobin,
            backends.iter().map(|b| backend_config(b)).collect(),
        )
    }

    #[tokio::test]
    async fn test_route_unknown_config() {
        let engine = RouterEngine::new();
        let err = engine
            .route_request("nope", &RequestContext::new("/"))
            .unwrap_err();
        assert!(matches!(err, GatewayError::ConfigNotFound { .. }));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_config_rejected() {
        let engine = RouterEngine::new();
        engine.load_config(basic_config("svc", &["b1"])).unwrap();
        let err = engine
            .load_config(basic_config("svc", &["b2"]))
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidConfiguration { .. }));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_route_and_record() {
        let engine = RouterEngine::new();
        engine
            .load_config(basic_config("svc", &["b1", "b2"]))
            .unwrap();

        let decision = engine
            .route_request("svc", &RequestContext::new("/"))
            .unwrap();
        assert_eq!(decision.backend.connections(), 1);

        engine
            .record_request_result(decision.backend.id(), true, 12.0)
            .unwrap();
        assert_eq!(decision.backend.connections(), 0);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_rate_limit_error() {
        let engine = RouterEngine::new();
        let mut config = basic_config("svc", &["b1"]);
        config.rate_limit = Some(RateLimitConfig {
            requests_per_second: 0,
            burst_size: 2,
        });
        engine.load_config(config).unwrap();

        let ctx = RequestContext::new("/");
        assert!(engine.route_request("svc", &ctx).is_ok());
        assert!(engine.route_request("svc", &ctx).is_ok());
        let err = engine.route_request("svc", &ctx).unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited { .. }));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_all_unavailable_errors() {
        let engine = RouterEngine::new();
        engine
            .load_config(basic_config("svc", &["b1", "b2"]))
            .unwrap();
        for backend in engine.backend_snapshots() {
            engine
                .registry
                .get(&backend.id)
                .unwrap()
                .set_healthy(false);
        }

        let err = engine
            .route_request("svc", &RequestContext::new("/"))
            .unwrap_err();
        assert!(matches!(err, GatewayError::NoAvailableBackend { .. }));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_drain_takes_backend_out_of_rotation() {
        let engine = RouterEngine::new();
        engine
            .load_config(basic_config("svc", &["b1", "b2"]))
            .unwrap();

        let completed = engine
            .drain_backend("b1", Duration::from_millis(200))
            .await
            .unwrap();
        assert!(completed);

        // Still registered, never selected.
        let drained = engine.registry.get("b1").unwrap();
        assert!(drained.is_draining());
        let ctx = RequestContext::new("/");
        for _ in 0..10 {
            let decision = engine.route_request("svc", &ctx).unwrap();
            assert_eq!(decision.backend.id(), "b2");
            engine
                .record_request_result("b2", true, 5.0)
                .unwrap();
        }
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_drain_timeout_with_inflight() {
        let engine = RouterEngine::new();
        engine.load_config(basic_config("svc", &["b1"])).unwrap();

        let decision = engine
            .route_request("svc", &RequestContext::new("/"))
            .unwrap();
        let completed = engine
            .drain_backend(decision.backend.id(), Duration::from_millis(150))
            .await
            .unwrap();
        assert!(!completed);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_set_traffic_split_validates_backends() {
        let engine = RouterEngine::new();
        engine
            .load_config(basic_config("svc", &["b1", "b2"]))
            .unwrap();

        let bad = vec![TrafficSplitRule {
            id: "r".to_string(),
            condition: None,
            backends: vec!["ghost".to_string()],
            percentages: vec![100],
        }];
        assert!(engine.set_traffic_split("svc", bad).is_err());

        let good = vec![TrafficSplitRule {
            id: "r".to_string(),
            condition: None,
            backends: vec!["b2".to_string()],
            percentages: vec![100],
        }];
        engine.set_traffic_split("svc", good).unwrap();

        let decision = engine
            .route_request("svc", &RequestContext::new("/"))
            .unwrap();
        assert_eq!(decision.backend.id(), "b2");
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweeper_follows_config_cleanup_interval() {
        let engine = RouterEngine::new();
        let mut config = basic_config("svc", &["b1"]);
        config.session_affinity = Some(SessionAffinityConfig {
            ttl_secs: 1,
            cleanup_interval_secs: 1,
            ..Default::default()
        });
        engine.load_config(config).unwrap();

        let decision = engine
            .route_request("svc", &RequestContext::new("/"))
            .unwrap();
        assert!(decision.session_id.is_some());
        engine.record_request_result("b1", true, 5.0).unwrap();
        assert_eq!(engine.active_sessions(), 1);

        // The expired binding must be swept without any further lookups.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(engine.active_sessions(), 0);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_idempotent() {
        let engine = RouterEngine::new();
        engine.load_config(basic_config("svc", &["b1"])).unwrap();
        engine.shutdown().await;
        engine.shutdown().await;
    }
}
