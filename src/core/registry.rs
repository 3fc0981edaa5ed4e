//! Backend registry with per-config indexing.
//!
//! The per-config index uses immutable `Arc` snapshots instead of a lock so
//! the request path reads a consistent candidate set without contention;
//! updates are copy-on-write. The registry also maintains a pre-computed
//! consistent-hash ring per config, rebuilt only when membership changes.

use std::sync::Arc;

use dashmap::DashMap;

use super::{
    backend::{Backend, BackendSnapshot},
    circuit_breaker::CircuitState,
};

/// Number of virtual nodes per backend for even ring distribution.
const VIRTUAL_NODES_PER_BACKEND: usize = 150;

/// Consistent hash ring over backend ids.
///
/// Each backend is placed at [`VIRTUAL_NODES_PER_BACKEND`] positions keyed by
/// `hash("{id}:{vnode}")`. A routing key maps to the first ring position at or
/// after its own hash, wrapping around; removing one backend remaps only the
/// keys whose virtual node belonged to it. Uses blake3 so positions are stable
/// across processes and Rust versions.
#[derive(Debug, Clone)]
pub struct HashRing {
    /// Sorted (ring_position, backend_id) pairs; `Arc<str>` is shared across
    /// all of a backend's virtual nodes.
    entries: Arc<[(u64, Arc<str>)]>,
}

impl HashRing {
    pub fn new(backends: &[Arc<Backend>]) -> Self {
        let mut entries: Vec<(u64, Arc<str>)> =
            Vec::with_capacity(backends.len() * VIRTUAL_NODES_PER_BACKEND);

        for backend in backends {
            let id: Arc<str> = Arc::from(backend.id());
            for vnode in 0..VIRTUAL_NODES_PER_BACKEND {
                let pos = hash_position(&format!("{}:{}", id, vnode));
                entries.push((pos, Arc::clone(&id)));
            }
        }
        entries.sort_unstable_by_key(|(pos, _)| *pos);

        Self {
            entries: Arc::from(entries.into_boxed_slice()),
        }
    }

    /// Find the backend id owning `key`, skipping ids rejected by `eligible`.
    /// Walks clockwise from the key's position, wrapping around.
    pub fn find_eligible<F>(&self, key: &str, eligible: F) -> Option<&str>
    where
        F: Fn(&str) -> bool,
    {
        if self.entries.is_empty() {
            return None;
        }

        let key_pos = hash_position(key);
        let start = self.entries.partition_point(|(pos, _)| *pos < key_pos);

        // Track ids already rejected so each backend is checked once even
        // though it appears at many virtual nodes.
        let mut checked = std::collections::HashSet::with_capacity(self.backend_count().min(16));
        for i in 0..self.entries.len() {
            let (_, id) = &self.entries[(start + i) % self.entries.len()];
            let id_str: &str = id;
            if !checked.insert(id_str) {
                continue;
            }
            if eligible(id_str) {
                return Some(id_str);
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total ring entries, virtual nodes included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn backend_count(&self) -> usize {
        self.entries.len() / VIRTUAL_NODES_PER_BACKEND.max(1)
    }
}

/// Hash a string to a ring position (first 8 bytes of blake3, little-endian).
#[inline]
pub(crate) fn hash_position(s: &str) -> u64 {
    let hash = blake3::hash(s.as_bytes());
    u64::from_le_bytes(hash.as_bytes()[..8].try_into().unwrap())
}

/// Stable 32-bit digest for ip-hash style selection.
#[inline]
pub(crate) fn hash_key32(s: &str) -> u32 {
    let hash = blake3::hash(s.as_bytes());
    u32::from_le_bytes(hash.as_bytes()[..4].try_into().unwrap())
}

type ConfigIndex = DashMap<String, Arc<[Arc<Backend>]>>;

/// Registry owning all backends and their per-config membership.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    /// All backends indexed by id.
    backends: DashMap<String, Arc<Backend>>,
    /// Copy-on-write membership snapshots per routing config.
    config_index: ConfigIndex,
    /// Consistent hash rings per routing config, rebuilt on membership change.
    hash_rings: DashMap<String, Arc<HashRing>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under a routing config. A backend id already present
    /// is replaced in place.
    pub fn add(&self, config_id: &str, backend: Arc<Backend>) {
        self.backends
            .insert(backend.id().to_string(), Arc::clone(&backend));

        self.config_index
            .entry(config_id.to_string())
            .and_modify(|existing| {
                let mut members: Vec<Arc<Backend>> = existing
                    .iter()
                    .filter(|b| b.id() != backend.id())
                    .cloned()
                    .collect();
                members.push(Arc::clone(&backend));
                *existing = Arc::from(members.into_boxed_slice());
            })
            .or_insert_with(|| Arc::from(vec![Arc::clone(&backend)].into_boxed_slice()));

        self.rebuild_hash_ring(config_id);
    }

    /// Remove a backend from a config. The backend (with its embedded circuit
    /// breaker) drops once the last `Arc` goes away; stale sessions pointing
    /// at it are handled as lookup misses by the session store.
    ///
    /// A no-op returning `None` when the backend is not a member of the named
    /// config, so a wrong config id cannot unregister someone else's backend.
    pub fn remove(&self, config_id: &str, backend_id: &str) -> Option<Arc<Backend>> {
        {
            let mut entry = self.config_index.get_mut(config_id)?;
            if !entry.iter().any(|b| b.id() == backend_id) {
                return None;
            }
            let members: Vec<Arc<Backend>> = entry
                .iter()
                .filter(|b| b.id() != backend_id)
                .cloned()
                .collect();
            *entry = Arc::from(members.into_boxed_slice());
        }
        self.rebuild_hash_ring(config_id);

        let (_, backend) = self.backends.remove(backend_id)?;
        backend.set_healthy(false);
        Some(backend)
    }

    pub fn get(&self, backend_id: &str) -> Option<Arc<Backend>> {
        self.backends.get(backend_id).map(|b| Arc::clone(&b))
    }

    /// Empty member slice for configs with no backends.
    const EMPTY: &'static [Arc<Backend>] = &[];

    /// Lock-free snapshot of a config's members (an atomic refcount bump).
    pub fn get_members(&self, config_id: &str) -> Arc<[Arc<Backend>]> {
        self.config_index
            .get(config_id)
            .map(|members| Arc::clone(&members))
            .unwrap_or_else(|| Arc::from(Self::EMPTY))
    }

    pub fn get_hash_ring(&self, config_id: &str) -> Option<Arc<HashRing>> {
        self.hash_rings.get(config_id).map(|r| Arc::clone(&r))
    }

    fn rebuild_hash_ring(&self, config_id: &str) {
        match self.config_index.get(config_id) {
            Some(members) if !members.is_empty() => {
                self.hash_rings
                    .insert(config_id.to_string(), Arc::new(HashRing::new(&members)));
            }
            _ => {
                self.hash_rings.remove(config_id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn all(&self) -> Vec<Arc<Backend>> {
        self.backends.iter().map(|b| Arc::clone(&b)).collect()
    }

    /// Per-backend metrics snapshots for observability export.
    pub fn snapshots(&self) -> Vec<BackendSnapshot> {
        self.backends.iter().map(|b| b.snapshot()).collect()
    }

    /// Aggregate registry statistics.
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for entry in self.backends.iter() {
            let backend = entry.value();
            stats.total_backends += 1;
            if backend.is_healthy() {
                stats.healthy_backends += 1;
            }
            stats.total_connections += backend.connections();
            match backend.circuit_breaker().state() {
                CircuitState::Open => stats.circuit_open += 1,
                CircuitState::HalfOpen => stats.circuit_half_open += 1,
                CircuitState::Closed => {}
            }
        }
        stats.unhealthy_backends = stats.total_backends - stats.healthy_backends;
        stats
    }
}

/// Aggregate statistics across all registered backends.
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub total_backends: usize,
    pub healthy_backends: usize,
    pub unhealthy_backends: usize,
    pub total_connections: usize,
    pub circuit_open: usize,
    pub circuit_half_open: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::test_backend;

    #[test]
    fn test_add_get_remove() {
        let registry = BackendRegistry::new();
        registry.add("svc", test_backend("b1"));
        registry.add("svc", test_backend("b2"));

        assert_eq!(registry.len(), 2);
        assert!(registry.get("b1").is_some());
        assert_eq!(registry.get_members("svc").len(), 2);

        let removed = registry.remove("svc", "b1").unwrap();
        assert!(!removed.is_healthy());
        assert!(registry.get("b1").is_none());
        assert_eq!(registry.get_members("svc").len(), 1);
        assert_eq!(registry.get_members("svc")[0].id(), "b2");
    }

    #[test]
    fn test_remove_under_wrong_config_is_a_no_op() {
        let registry = BackendRegistry::new();
        registry.add("svc", test_backend("b1"));
        registry.add("other", test_backend("c1"));

        assert!(registry.remove("other", "b1").is_none());
        let kept = registry.get("b1").unwrap();
        assert!(kept.is_healthy());
        assert_eq!(registry.get_members("svc").len(), 1);

        assert!(registry.remove("svc", "b1").is_some());
        assert!(registry.get("b1").is_none());
    }

    #[test]
    fn test_members_empty_for_unknown_config() {
        let registry = BackendRegistry::new();
        assert!(registry.get_members("nope").is_empty());
    }

    #[test]
    fn test_re_add_replaces() {
        let registry = BackendRegistry::new();
        registry.add("svc", test_backend("b1"));
        registry.add("svc", test_backend("b1"));
        assert_eq!(registry.get_members("svc").len(), 1);
    }

    #[test]
    fn test_hash_ring_lifecycle() {
        let registry = BackendRegistry::new();
        assert!(registry.get_hash_ring("svc").is_none());

        registry.add("svc", test_backend("b1"));
        registry.add("svc", test_backend("b2"));
        let ring = registry.get_hash_ring("svc").unwrap();
        assert_eq!(ring.backend_count(), 2);
        assert_eq!(ring.len(), 300);

        registry.remove("svc", "b1");
        registry.remove("svc", "b2");
        assert!(registry.get_hash_ring("svc").is_none());
    }

    #[test]
    fn test_ring_stability() {
        let backends: Vec<_> = (1..=3).map(|i| test_backend(&format!("b{}", i))).collect();
        let ring = HashRing::new(&backends);

        let first = ring.find_eligible("key-abc", |_| true).unwrap().to_string();
        for _ in 0..10 {
            assert_eq!(ring.find_eligible("key-abc", |_| true), Some(first.as_str()));
        }
    }

    #[test]
    fn test_ring_bounded_remapping() {
        let backends: Vec<_> = (1..=4).map(|i| test_backend(&format!("b{}", i))).collect();
        let full_ring = HashRing::new(&backends);
        let reduced_ring = HashRing::new(&backends[..3]);

        let mut moved = 0;
        let mut on_removed = 0;
        for i in 0..200 {
            let key = format!("key-{}", i);
            let before = full_ring.find_eligible(&key, |_| true).unwrap();
            let after = reduced_ring.find_eligible(&key, |_| true).unwrap();
            if before == "b4" {
                on_removed += 1;
            } else if before != after {
                moved += 1;
            }
        }

        // Keys not owned by the removed backend must keep their assignment.
        assert_eq!(moved, 0);
        assert!(on_removed > 0, "expected some keys on the removed backend");
    }

    #[test]
    fn test_ring_skips_ineligible() {
        let backends: Vec<_> = (1..=2).map(|i| test_backend(&format!("b{}", i))).collect();
        let ring = HashRing::new(&backends);

        let owner = ring.find_eligible("some-key", |_| true).unwrap().to_string();
        let other = ring
            .find_eligible("some-key", |id| id != owner)
            .unwrap()
            .to_string();
        assert_ne!(owner, other);

        assert!(ring.find_eligible("some-key", |_| false).is_none());
    }

    #[test]
    fn test_stats() {
        let registry = BackendRegistry::new();
        registry.add("svc", test_backend("b1"));
        registry.add("svc", test_backend("b2"));
        registry.get("b2").unwrap().set_healthy(false);
        registry.get("b1").unwrap().increment_connections();

        let stats = registry.stats();
        assert_eq!(stats.total_backends, 2);
        assert_eq!(stats.healthy_backends, 1);
        assert_eq!(stats.unhealthy_backends, 1);
        assert_eq!(stats.total_connections, 1);
    }
}
