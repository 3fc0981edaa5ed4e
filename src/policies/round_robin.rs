//! Round-robin selection.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use super::{available_indices, RequestContext, RoutingPolicy};
use crate::core::{Backend, HashRing};

/// Cycles through available backends in order.
///
/// The cursor advances over the available set, so backends that drop out are
/// skipped without stalling the rotation.
#[derive(Debug, Default)]
pub struct RoundRobinPolicy {
    counter: AtomicUsize,
}

impl RoundRobinPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoutingPolicy for RoundRobinPolicy {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select(
        &self,
        backends: &[Arc<Backend>],
        _ring: Option<&HashRing>,
        _ctx: &RequestContext,
    ) -> Option<usize> {
        let available = available_indices(backends);
        if available.is_empty() {
            return None;
        }
        let turn = self.counter.fetch_add(1, Ordering::Relaxed);
        Some(available[turn % available.len()])
    }
}
