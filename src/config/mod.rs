//! Routing configuration types and validation.
//!
//! A [`RoutingConfig`] fully describes one routed service: its backends, the
//! selection algorithm and the attached traffic policies. Configs are
//! validated once at load time; the routing engine assumes a validated config
//! and never re-checks these invariants on the request path.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::core::{
    BackendConfig, CircuitBreakerConfig, GatewayError, GatewayResult, HealthCheckConfig,
    RateLimitConfig, SessionAffinityConfig,
};
use crate::policies::Algorithm;

/// Condition gating a traffic-split rule. A rule with no condition matches
/// every request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleCondition {
    /// Match when the request path starts with this prefix.
    #[serde(default)]
    pub path_prefix: Option<String>,
    /// Match when the request carries this header with this exact value.
    #[serde(default)]
    pub header: Option<(String, String)>,
}

/// Percentage-weighted split across a subset of a config's backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficSplitRule {
    pub id: String,
    #[serde(default)]
    pub condition: Option<RuleCondition>,
    /// Backend ids receiving split traffic, parallel to `percentages`.
    pub backends: Vec<String>,
    /// Percentage of matched traffic per backend. The sum must be in 1..=100;
    /// any shortfall falls through to the config's normal selection policy.
    pub percentages: Vec<u32>,
}

/// Complete definition of one routed service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub id: String,
    #[serde(default)]
    pub algorithm: Algorithm,
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub session_affinity: Option<SessionAffinityConfig>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    #[serde(default)]
    pub traffic_split: Vec<TrafficSplitRule>,
}

impl RoutingConfig {
    pub fn new(id: impl Into<String>, algorithm: Algorithm, backends: Vec<BackendConfig>) -> Self {
        Self {
            id: id.into(),
            algorithm,
            backends,
            health_check: HealthCheckConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            session_affinity: None,
            rate_limit: None,
            traffic_split: Vec::new(),
        }
    }

    /// Check structural invariants. Called once when the config is loaded
    /// into the engine.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.id.is_empty() {
            return Err(invalid("config id must not be empty"));
        }
        if self.backends.is_empty() {
            return Err(invalid(format!(
                "config {} must declare at least one backend",
                self.id
            )));
        }

        let mut ids = HashSet::new();
        for backend in &self.backends {
            if backend.id.is_empty() {
                return Err(invalid("backend id must not be empty"));
            }
            if backend.host.is_empty() {
                return Err(invalid(format!("backend {} has an empty host", backend.id)));
            }
            if !ids.insert(backend.id.as_str()) {
                return Err(invalid(format!("duplicate backend id {}", backend.id)));
            }
        }

        if self.circuit_breaker.failure_threshold <= 0.0
            || self.circuit_breaker.failure_threshold > 1.0
        {
            return Err(invalid(format!(
                "circuit breaker failure_threshold must be in (0, 1], got {}",
                self.circuit_breaker.failure_threshold
            )));
        }

        if let Some(limit) = &self.rate_limit {
            if limit.requests_per_second == 0 && limit.burst_size == 0 {
                return Err(invalid(
                    "rate limit must allow at least one request (rps and burst both 0)",
                ));
            }
        }

        for rule in &self.traffic_split {
            validate_split_rule(rule, &ids)?;
        }
        Ok(())
    }
}

/// Check one split rule against the set of known backend ids. Also used when
/// rules are installed on a live config.
pub fn validate_split_rule(
    rule: &TrafficSplitRule,
    known_backends: &HashSet<&str>,
) -> GatewayResult<()> {
    if rule.backends.is_empty() {
        return Err(invalid(format!(
            "split rule {} must target at least one backend",
            rule.id
        )));
    }
    if rule.backends.len() != rule.percentages.len() {
        return Err(invalid(format!(
            "split rule {} has {} backends but {} percentages",
            rule.id,
            rule.backends.len(),
            rule.percentages.len()
        )));
    }
    let total: u32 = rule.percentages.iter().sum();
    if total == 0 || total > 100 {
        return Err(invalid(format!(
            "split rule {} percentages sum to {total}, expected 1..=100",
            rule.id
        )));
    }
    for id in &rule.backends {
        if !known_backends.contains(id.as_str()) {
            return Err(invalid(format!(
                "split rule {} references unknown backend {id}",
                rule.id
            )));
        }
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> GatewayError {
    GatewayError::InvalidConfiguration {
        message: message.into(),
    }
}
