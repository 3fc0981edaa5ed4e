//! Power-of-two-choices selection.

use std::sync::Arc;

use rand::Rng;

use super::{available_indices, RequestContext, RoutingPolicy};
use crate::core::{Backend, HashRing};

/// Samples two distinct available backends uniformly and keeps the one with
/// fewer active connections. With a single candidate it degenerates to that
/// candidate.
#[derive(Debug, Default)]
pub struct TwoRandomChoicesPolicy;

impl TwoRandomChoicesPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl RoutingPolicy for TwoRandomChoicesPolicy {
    fn name(&self) -> &'static str {
        "two_random_choices"
    }

    fn select(
        &self,
        backends: &[Arc<Backend>],
        _ring: Option<&HashRing>,
        _ctx: &RequestContext,
    ) -> Option<usize> {
        let available = available_indices(backends);
        match available.len() {
            0 => None,
            1 => Some(available[0]),
            n => {
                let mut rng = rand::rng();
                let first = rng.random_range(0..n);
                // Offset by 1..n so the second draw is always distinct.
                let second = (first + rng.random_range(1..n)) % n;

                let a = available[first];
                let b = available[second];
                if backends[a].connections() <= backends[b].connections() {
                    Some(a)
                } else {
                    Some(b)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::test_backend;

    #[test]
    fn test_single_candidate() {
        let backends = vec![test_backend("b1")];
        let policy = TwoRandomChoicesPolicy::new();
        assert_eq!(
            policy.select(&backends, None, &RequestContext::new("/")),
            Some(0)
        );
    }

    #[test]
    fn test_avoids_heavily_loaded() {
        let backends: Vec<_> = (1..=2).map(|i| test_backend(&format!("b{}", i))).collect();
        for _ in 0..100 {
            backends[0].increment_connections();
        }

        // With two candidates both are always sampled, so the loaded one
        // must never win.
        let policy = TwoRandomChoicesPolicy::new();
        let ctx = RequestContext::new("/");
        for _ in 0..50 {
            assert_eq!(policy.select(&backends, None, &ctx), Some(1));
        }
    }

    #[test]
    fn test_load_concentrates_on_lighter_backends() {
        let backends: Vec<_> = (1..=4).map(|i| test_backend(&format!("b{}", i))).collect();
        for _ in 0..1000 {
            backends[0].increment_connections();
        }

        let policy = TwoRandomChoicesPolicy::new();
        let ctx = RequestContext::new("/");
        let mut heavy_picks = 0;
        for _ in 0..400 {
            if policy.select(&backends, None, &ctx) == Some(0) {
                heavy_picks += 1;
            }
        }
        // b0 loses every comparison and the two draws are always distinct,
        // so it can never be selected.
        assert_eq!(heavy_picks, 0);
    }

    #[test]
    fn test_none_when_all_down() {
        let backends: Vec<_> = (1..=3).map(|i| test_backend(&format!("b{}", i))).collect();
        backends.iter().for_each(|b| b.set_healthy(false));
        let policy = TwoRandomChoicesPolicy::new();
        assert!(policy
            .select(&backends, None, &RequestContext::new("/"))
            .is_none());
    }
}
