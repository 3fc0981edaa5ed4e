//! Policy construction from configuration.

use std::sync::Arc;

use tracing::debug;

use super::{
    Algorithm, ConsistentHashPolicy, IpHashPolicy, LeastConnectionsPolicy,
    LeastResponseTimePolicy, RoundRobinPolicy, RoutingPolicy, TwoRandomChoicesPolicy,
    WeightedRoundRobinPolicy,
};

/// Builds a policy instance for a config's algorithm.
///
/// Called once per routing config at load time; the resulting policy owns any
/// per-config selection state for that config's lifetime.
pub struct PolicyFactory;

impl PolicyFactory {
    pub fn create(algorithm: Algorithm) -> Arc<dyn RoutingPolicy> {
        let policy: Arc<dyn RoutingPolicy> = match algorithm {
            Algorithm::RoundRobin => Arc::new(RoundRobinPolicy::new()),
            Algorithm::LeastConnections => Arc::new(LeastConnectionsPolicy::new()),
            Algorithm::WeightedRoundRobin => Arc::new(WeightedRoundRobinPolicy::new()),
            Algorithm::IpHash => Arc::new(IpHashPolicy::new()),
            Algorithm::LeastResponseTime => Arc::new(LeastResponseTimePolicy::new()),
            Algorithm::TwoRandomChoices => Arc::new(TwoRandomChoicesPolicy::new()),
            Algorithm::ConsistentHash => Arc::new(ConsistentHashPolicy::new()),
        };
        debug!(policy = policy.name(), "created routing policy");
        policy
    }
}
