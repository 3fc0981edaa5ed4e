//! Least-connections selection.

use std::sync::Arc;

use super::{available_indices, RequestContext, RoutingPolicy};
use crate::core::{Backend, HashRing};

/// Picks the available backend with the fewest active connections.
/// Ties break on the earlier candidate, keeping selection deterministic.
#[derive(Debug, Default)]
pub struct LeastConnectionsPolicy;

impl LeastConnectionsPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl RoutingPolicy for LeastConnectionsPolicy {
    fn name(&self) -> &'static str {
        "least_connections"
    }

    fn select(
        &self,
        backends: &[Arc<Backend>],
        _ring: Option<&HashRing>,
        _ctx: &RequestContext,
    ) -> Option<usize> {
        available_indices(backends)
            .into_iter()
            .min_by_key(|&i| backends[i].connections())
    }
}
