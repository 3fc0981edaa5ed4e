//! Weight-proportional round-robin selection.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use super::{available_indices, RequestContext, RoutingPolicy};
use crate::core::{Backend, HashRing};

/// Distributes turns proportionally to backend weights.
///
/// A monotonic counter is reduced modulo the total available weight and walked
/// across the candidates' weight spans, so a weight-2 backend receives exactly
/// twice the turns of a weight-1 backend over any full cycle. Weight-0
/// backends are skipped entirely.
#[derive(Debug, Default)]
pub struct WeightedRoundRobinPolicy {
    counter: AtomicUsize,
}

impl WeightedRoundRobinPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoutingPolicy for WeightedRoundRobinPolicy {
    fn name(&self) -> &'static str {
        "weighted_round_robin"
    }

    fn select(
        &self,
        backends: &[Arc<Backend>],
        _ring: Option<&HashRing>,
        _ctx: &RequestContext,
    ) -> Option<usize> {
        let available = available_indices(backends);
        let weights: Vec<usize> = available
            .iter()
            .map(|&i| backends[i].weight() as usize)
            .collect();
        let total: usize = weights.iter().sum();
        if total == 0 {
            return None;
        }

        let mut slot = self.counter.fetch_add(1, Ordering::Relaxed) % total;
        for (pos, &weight) in weights.iter().enumerate() {
            if slot < weight {
                return Some(available[pos]);
            }
            slot -= weight;
        }
        unreachable!("slot reduced below total weight")
    }
}
