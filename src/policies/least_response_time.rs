//! Least-response-time selection.

use std::sync::Arc;

use super::{available_indices, RequestContext, RoutingPolicy};
use crate::core::{Backend, HashRing};

/// Picks the available backend with the lowest smoothed response time.
///
/// Backends with no recorded latency yet report 0 ms and therefore win until
/// they accumulate samples, which naturally warms up new backends.
#[derive(Debug, Default)]
pub struct LeastResponseTimePolicy;

impl LeastResponseTimePolicy {
    pub fn new() -> Self {
        Self
    }
}

impl RoutingPolicy for LeastResponseTimePolicy {
    fn name(&self) -> &'static str {
        "least_response_time"
    }

    fn select(
        &self,
        backends: &[Arc<Backend>],
        _ring: Option<&HashRing>,
        _ctx: &RequestContext,
    ) -> Option<usize> {
        available_indices(backends).into_iter().min_by(|&a, &b| {
            backends[a]
                .response_time_ms()
                .total_cmp(&backends[b].response_time_ms())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::test_backend;

    #[test]
    fn test_prefers_fastest() {
        let backends: Vec<_> = (1..=3).map(|i| test_backend(&format!("b{}", i))).collect();
        backends[0].record_result(true, 80.0);
        backends[1].record_result(true, 20.0);
        backends[2].record_result(true, 150.0);

        let policy = LeastResponseTimePolicy::new();
        assert_eq!(
            policy.select(&backends, None, &RequestContext::new("/")),
            Some(1)
        );
    }

    #[test]
    fn test_unsampled_backend_wins() {
        let backends: Vec<_> = (1..=2).map(|i| test_backend(&format!("b{}", i))).collect();
        backends[0].record_result(true, 10.0);

        let policy = LeastResponseTimePolicy::new();
        assert_eq!(
            policy.select(&backends, None, &RequestContext::new("/")),
            Some(1)
        );
    }

    #[test]
    fn test_skips_unavailable_fastest() {
        let backends: Vec<_> = (1..=2).map(|i| test_backend(&format!("b{}", i))).collect();
        backends[0].record_result(true, 5.0);
        backends[1].record_result(true, 50.0);
        backends[0].set_healthy(false);

        let policy = LeastResponseTimePolicy::new();
        assert_eq!(
            policy.select(&backends, None, &RequestContext::new("/")),
            Some(1)
        );
    }
}
