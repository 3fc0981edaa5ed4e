//! Sticky session store.
//!
//! Maps a session key to a backend id with a sliding TTL. Cookie mode issues
//! opaque session ids; ip mode derives a stable key from the client address so
//! the same client always produces the same session entry. Stale or
//! no-longer-routable bindings are treated as misses and evicted, which lets
//! the caller fall through to normal selection.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::registry::hash_position;

/// How session keys are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AffinityMode {
    #[default]
    Cookie,
    Ip,
}

/// Session affinity configuration for one routing config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAffinityConfig {
    #[serde(default)]
    pub mode: AffinityMode,
    /// Idle TTL in seconds. Each routed request slides the expiry forward.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Seconds between expired-session sweeps.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_ttl_secs() -> u64 {
    1800
}
fn default_cleanup_interval_secs() -> u64 {
    60
}

impl Default for SessionAffinityConfig {
    fn default() -> Self {
        Self {
            mode: AffinityMode::Cookie,
            ttl_secs: default_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

/// One sticky binding.
#[derive(Debug, Clone)]
struct Session {
    backend_id: String,
    expires_at: Instant,
    request_count: u64,
}

/// Concurrent session table shared by all routing configs.
///
/// Keys are namespaced by config id so two configs can hold independent
/// bindings for the same client.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the session id and store key for a request, minting a fresh
    /// cookie id when the caller presented none.
    ///
    /// Cookie mode reuses the caller-presented id when there is one; ip mode
    /// ignores any presented id and hashes the client address. Returns
    /// `(store_key, session_id)`; the session id is what goes back to the
    /// client, the key is namespaced by config so configs never share
    /// bindings.
    pub fn session_key(
        config_id: &str,
        config: &SessionAffinityConfig,
        presented_id: Option<&str>,
        client_ip: Option<&str>,
    ) -> Option<(String, String)> {
        let session_id = match config.mode {
            AffinityMode::Cookie => presented_id
                .map(str::to_string)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            AffinityMode::Ip => {
                let ip = client_ip?;
                format!("{:016x}", hash_position(ip))
            }
        };
        Some((format!("{config_id}/{session_id}"), session_id))
    }

    /// Look up a live binding. Expired entries are evicted and reported as a
    /// miss; validating that the bound backend is still routable is the
    /// caller's job (the store does not hold backend references).
    pub fn lookup(&self, key: &str) -> Option<String> {
        let expired = match self.sessions.get(key) {
            Some(session) if session.expires_at > Instant::now() => {
                return Some(session.backend_id.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.sessions.remove(key);
            debug!(session_key = key, "evicted expired session");
        }
        None
    }

    /// Bind (or re-bind) a session to a backend and slide its TTL forward.
    pub fn bind(&self, key: &str, backend_id: &str, ttl: Duration) {
        self.sessions
            .entry(key.to_string())
            .and_modify(|session| {
                session.backend_id = backend_id.to_string();
                session.expires_at = Instant::now() + ttl;
                session.request_count += 1;
            })
            .or_insert_with(|| Session {
                backend_id: backend_id.to_string(),
                expires_at: Instant::now() + ttl,
                request_count: 1,
            });
    }

    /// Drop a binding, e.g. when its backend is no longer routable.
    pub fn evict(&self, key: &str) {
        self.sessions.remove(key);
    }

    /// Drop every binding pointing at a backend (used on backend removal).
    pub fn evict_backend(&self, backend_id: &str) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| session.backend_id != backend_id);
        before - self.sessions.len()
    }

    /// Remove expired entries. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.expires_at > now);
        before - self.sessions.len()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Listing of live bindings for observability export.
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let now = Instant::now();
        self.sessions
            .iter()
            .filter(|s| s.expires_at > now)
            .map(|s| SessionSnapshot {
                key: s.key().clone(),
                backend_id: s.backend_id.clone(),
                request_count: s.request_count,
                expires_in: s.expires_at - now,
            })
            .collect()
    }

    #[cfg(test)]
    fn request_count(&self, key: &str) -> Option<u64> {
        self.sessions.get(key).map(|s| s.request_count)
    }
}

/// Exported view of one live session.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub key: String,
    pub backend_id: String,
    pub request_count: u64,
    pub expires_in: Duration,
}

/// Background task that periodically sweeps expired sessions.
pub struct SessionSweeper {
    handle: JoinHandle<()>,
    running: Arc<AtomicBool>,
}

impl SessionSweeper {
    pub fn spawn(store: Arc<SessionStore>, interval: Duration) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = Arc::clone(&running);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            while running_clone.load(Ordering::Acquire) {
                ticker.tick().await;
                let removed = store.sweep();
                if removed > 0 {
                    debug!(removed, "swept expired sessions");
                }
            }
            info!("session sweeper stopped");
        });

        Self { handle, running }
    }

    pub async fn shutdown(self) {
        self.running.store(false, Ordering::Release);
        self.handle.abort();
        let _ = self.handle.await;
    }
}
