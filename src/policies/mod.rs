//! Backend selection policies.
//!
//! A policy picks one backend out of a config's candidate slice. Selection is
//! synchronous and never blocks; policies keep whatever per-config state they
//! need (round-robin cursors, weighted counters) in atomics.

pub mod consistent_hash;
pub mod factory;
pub mod ip_hash;
pub mod least_connections;
pub mod least_response_time;
pub mod round_robin;
pub mod two_random_choices;
pub mod weighted_round_robin;

pub use consistent_hash::ConsistentHashPolicy;
pub use factory::PolicyFactory;
pub use ip_hash::IpHashPolicy;
pub use least_connections::LeastConnectionsPolicy;
pub use least_response_time::LeastResponseTimePolicy;
pub use round_robin::RoundRobinPolicy;
pub use two_random_choices::TwoRandomChoicesPolicy;
pub use weighted_round_robin::WeightedRoundRobinPolicy;

use std::{fmt, sync::Arc};

use http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::core::{Backend, HashRing};

/// Routing algorithm selector, fixed per config at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    RoundRobin,
    LeastConnections,
    WeightedRoundRobin,
    IpHash,
    LeastResponseTime,
    TwoRandomChoices,
    ConsistentHash,
}

/// Per-request inputs a policy may consult.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub client_ip: Option<String>,
    pub session_id: Option<String>,
    pub path: String,
    pub method: String,
    pub headers: HeaderMap,
}

impl RequestContext {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: "GET".to_string(),
            ..Default::default()
        }
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(v) = value.parse() {
            self.headers.insert(name, v);
        }
        self
    }
}

/// Selects one backend from a candidate slice.
///
/// Implementations must only return indices of available backends and must
/// return `None` when no candidate is available.
pub trait RoutingPolicy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Pick an index into `backends`. `ring` is present only for configs whose
    /// algorithm maintains a consistent-hash ring.
    fn select(
        &self,
        backends: &[Arc<Backend>],
        ring: Option<&HashRing>,
        ctx: &RequestContext,
    ) -> Option<usize>;

    /// Whether the registry must maintain a hash ring for this policy.
    fn needs_hash_ring(&self) -> bool {
        false
    }
}

/// Indices of backends that may take traffic right now.
pub(crate) fn available_indices(backends: &[Arc<Backend>]) -> Vec<usize> {
    backends
        .iter()
        .enumerate()
        .filter(|(_, b)| b.is_available())
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::test_backend;

    #[test]
    fn test_available_indices_filters_unhealthy() {
        let backends: Vec<_> = (1..=3).map(|i| test_backend(&format!("b{}", i))).collect();
        backends[1].set_healthy(false);
        assert_eq!(available_indices(&backends), vec![0, 2]);
    }

    #[test]
    fn test_request_context_builder() {
        let ctx = RequestContext::new("/api/users")
            .with_client_ip("10.0.0.9")
            .with_method("POST")
            .with_header("x-canary", "true");
        assert_eq!(ctx.path, "/api/users");
        assert_eq!(ctx.method, "POST");
        assert_eq!(ctx.client_ip.as_deref(), Some("10.0.0.9"));
        assert_eq!(
            ctx.headers.get("x-canary").and_then(|v| v.to_str().ok()),
            Some("true")
        );
    }

    #[test]
    fn test_algorithm_serde_names() {
        let algo: Algorithm = serde_json::from_str("\"two_random_choices\"").unwrap();
        assert_eq!(algo, Algorithm::TwoRandomChoices);
        assert_eq!(
            serde_json::to_string(&Algorithm::ConsistentHash).unwrap(),
            "\"consistent_hash\""
        );
    }
}
