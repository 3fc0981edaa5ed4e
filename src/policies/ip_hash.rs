//! Client-IP hash selection.

use std::sync::Arc;

use super::{available_indices, RequestContext, RoutingPolicy};
use crate::core::{registry::hash_key32, Backend, HashRing};

/// Maps a client IP to a fixed backend by hashing the address modulo the
/// available count. The same client lands on the same backend as long as the
/// available set is unchanged. Requests without a client IP fall back to the
/// first available backend.
#[derive(Debug, Default)]
pub struct IpHashPolicy;

impl IpHashPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl RoutingPolicy for IpHashPolicy {
    fn name(&self) -> &'static str {
        "ip_hash"
    }

    fn select(
        &self,
        backends: &[Arc<Backend>],
        _ring: Option<&HashRing>,
        ctx: &RequestContext,
    ) -> Option<usize> {
        let available = available_indices(backends);
        if available.is_empty() {
            return None;
        }
        let pos = match ctx.client_ip.as_deref() {
            Some(ip) => hash_key32(ip) as usize % available.len(),
            None => 0,
        };
        Some(available[pos])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::test_backend;

    #[test]
    fn test_same_ip_same_backend() {
        let backends: Vec<_> = (1..=4).map(|i| test_backend(&format!("b{}", i))).collect();
        let policy = IpHashPolicy::new();
        let ctx = RequestContext::new("/").with_client_ip("192.168.1.50");

        let first = policy.select(&backends, None, &ctx).unwrap();
        for _ in 0..50 {
            assert_eq!(policy.select(&backends, None, &ctx), Some(first));
        }
    }

    #[test]
    fn test_different_ips_spread() {
        let backends: Vec<_> = (1..=4).map(|i| test_backend(&format!("b{}", i))).collect();
        let policy = IpHashPolicy::new();

        let mut seen = std::collections::HashSet::new();
        for i in 0..64 {
            let ctx = RequestContext::new("/").with_client_ip(format!("10.0.0.{}", i));
            seen.insert(policy.select(&backends, None, &ctx).unwrap());
        }
        assert!(seen.len() > 1, "64 distinct clients all hashed together");
    }

    #[test]
    fn test_missing_ip_falls_back() {
        let backends: Vec<_> = (1..=3).map(|i| test_backend(&format!("b{}", i))).collect();
        let policy = IpHashPolicy::new();
        assert_eq!(
            policy.select(&backends, None, &RequestContext::new("/")),
            Some(0)
        );
    }

    #[test]
    fn test_remaps_when_target_down() {
        let backends: Vec<_> = (1..=2).map(|i| test_backend(&format!("b{}", i))).collect();
        let policy = IpHashPolicy::new();
        let ctx = RequestContext::new("/").with_client_ip("172.16.0.7");

        let first = policy.select(&backends, None, &ctx).unwrap();
        backends[first].set_healthy(false);
        let second = policy.select(&backends, None, &ctx).unwrap();
        assert_ne!(first, second);
    }
}
