//! Consistent-hash selection over the config's virtual-node ring.

use std::sync::Arc;

use tracing::warn;

use super::{available_indices, RequestContext, RoutingPolicy};
use crate::core::{Backend, HashRing};

/// Routes by hashing a request key onto the config's ring. The key is the
/// request path, falling back to the session id and then the client ip when
/// the path is empty.
///
/// The ring walk skips unavailable backends, so a key whose owner is down
/// lands on the next backend clockwise and returns to its owner when it
/// recovers. Membership changes remap only the keys owned by the changed
/// backend's virtual nodes.
#[derive(Debug, Default)]
pub struct ConsistentHashPolicy;

fn routing_key(ctx: &RequestContext) -> Option<&str> {
    if !ctx.path.is_empty() {
        return Some(ctx.path.as_str());
    }
    ctx.session_id.as_deref().or(ctx.client_ip.as_deref())
}

impl ConsistentHashPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl RoutingPolicy for ConsistentHashPolicy {
    fn name(&self) -> &'static str {
        "consistent_hash"
    }

    fn needs_hash_ring(&self) -> bool {
        true
    }

    fn select(
        &self,
        backends: &[Arc<Backend>],
        ring: Option<&HashRing>,
        ctx: &RequestContext,
    ) -> Option<usize> {
        let Some(ring) = ring else {
            // Ring missing means the config was wired without one; degrade to
            // the first available backend rather than failing the request.
            warn!("consistent_hash policy invoked without a hash ring");
            return available_indices(backends).first().copied();
        };

        let Some(key) = routing_key(ctx) else {
            // A keyless request has no stable ring position anyway.
            return available_indices(backends).first().copied();
        };

        let id = ring.find_eligible(key, |id| {
            backends
                .iter()
                .any(|b| b.id() == id && b.is_available())
        })?;
        backends.iter().position(|b| b.id() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::test_backend;

    fn setup(n: usize) -> (Vec<Arc<Backend>>, HashRing) {
        let backends: Vec<_> = (1..=n).map(|i| test_backend(&format!("b{}", i))).collect();
        let ring = HashRing::new(&backends);
        (backends, ring)
    }

    #[test]
    fn test_same_path_same_backend() {
        let (backends, ring) = setup(4);
        let policy = ConsistentHashPolicy::new();
        let ctx = RequestContext::new("/api/orders/123");

        let first = policy.select(&backends, Some(&ring), &ctx).unwrap();
        for _ in 0..20 {
            assert_eq!(policy.select(&backends, Some(&ring), &ctx), Some(first));
        }
    }

    #[test]
    fn test_down_owner_falls_to_neighbor_and_back() {
        let (backends, ring) = setup(3);
        let policy = ConsistentHashPolicy::new();
        let ctx = RequestContext::new("/api/items/42");

        let owner = policy.select(&backends, Some(&ring), &ctx).unwrap();
        backends[owner].set_healthy(false);
        let fallback = policy.select(&backends, Some(&ring), &ctx).unwrap();
        assert_ne!(owner, fallback);

        backends[owner].set_healthy(true);
        assert_eq!(policy.select(&backends, Some(&ring), &ctx), Some(owner));
    }

    #[test]
    fn test_empty_path_falls_back_to_sticky_keys() {
        let (backends, ring) = setup(4);
        let policy = ConsistentHashPolicy::new();

        let by_session = RequestContext::new("").with_session_id("sess-1");
        let owner = policy.select(&backends, Some(&ring), &by_session).unwrap();
        for _ in 0..10 {
            assert_eq!(policy.select(&backends, Some(&ring), &by_session), Some(owner));
        }
        // Same key via the path hashes to the same owner.
        let by_path = RequestContext::new("sess-1");
        assert_eq!(policy.select(&backends, Some(&ring), &by_path), Some(owner));

        // The session id wins over the client ip; the ip alone still keys.
        let by_both = RequestContext::new("")
            .with_session_id("sess-1")
            .with_client_ip("10.0.0.9");
        assert_eq!(policy.select(&backends, Some(&ring), &by_both), Some(owner));
        let by_ip = RequestContext::new("").with_client_ip("10.0.0.9");
        let ip_owner = policy.select(&backends, Some(&ring), &by_ip).unwrap();
        assert_eq!(
            policy.select(&backends, Some(&ring), &by_ip),
            Some(ip_owner)
        );

        // No key at all still routes somewhere.
        assert!(policy
            .select(&backends, Some(&ring), &RequestContext::new(""))
            .is_some());
    }

    #[test]
    fn test_none_when_all_down() {
        let (backends, ring) = setup(2);
        backends.iter().for_each(|b| b.set_healthy(false));
        let policy = ConsistentHashPolicy::new();
        assert!(policy
            .select(&backends, Some(&ring), &RequestContext::new("/x"))
            .is_none());
    }

    #[test]
    fn test_missing_ring_degrades() {
        let backends = vec![test_backend("b1")];
        let policy = ConsistentHashPolicy::new();
        assert_eq!(
            policy.select(&backends, None, &RequestContext::new("/x")),
            Some(0)
        );
    }
}
