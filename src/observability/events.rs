//! Engine lifecycle events.
//!
//! State transitions that outside observers care about are published on a
//! broadcast channel in addition to being logged, so operators can react to
//! them (alerting, cache invalidation) without scraping logs. Slow
//! subscribers lag and drop, they never block the engine.

use serde::Serialize;
use tracing::{info, warn};

use crate::core::CircuitState;

/// Events published by the routing engine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    ConfigLoaded {
        config_id: String,
        backend_count: usize,
    },
    ConfigRemoved {
        config_id: String,
    },
    BackendAdded {
        config_id: String,
        backend_id: String,
    },
    BackendRemoved {
        config_id: String,
        backend_id: String,
    },
    BackendHealthChanged {
        backend_id: String,
        healthy: bool,
    },
    CircuitBreakerTransition {
        backend_id: String,
        from: CircuitState,
        to: CircuitState,
    },
    BackendDrained {
        backend_id: String,
        completed: bool,
    },
    RolloutStageAdvanced {
        config_id: String,
        rollout_id: String,
        stage: usize,
        percentage: u32,
    },
    RolloutCompleted {
        config_id: String,
        rollout_id: String,
    },
    RolloutAborted {
        config_id: String,
        rollout_id: String,
        reason: String,
    },
}

impl EngineEvent {
    /// Emit the event to the structured log at an appropriate level.
    pub fn log(&self) {
        match self {
            EngineEvent::ConfigLoaded {
                config_id,
                backend_count,
            } => info!(config_id, backend_count, "routing config loaded"),
            EngineEvent::ConfigRemoved { config_id } => {
                info!(config_id, "routing config removed")
            }
            EngineEvent::BackendAdded {
                config_id,
                backend_id,
            } => info!(config_id, backend_id, "backend added"),
            EngineEvent::BackendRemoved {
                config_id,
                backend_id,
            } => info!(config_id, backend_id, "backend removed"),
            EngineEvent::BackendHealthChanged {
                backend_id,
                healthy,
            } => {
                if *healthy {
                    info!(backend_id, "backend healthy");
                } else {
                    warn!(backend_id, "backend unhealthy");
                }
            }
            EngineEvent::CircuitBreakerTransition {
                backend_id,
                from,
                to,
            } => {
                if *to == CircuitState::Open {
                    warn!(backend_id, from = from.as_str(), to = to.as_str(), "circuit opened");
                } else {
                    info!(
                        backend_id,
                        from = from.as_str(),
                        to = to.as_str(),
                        "circuit transition"
                    );
                }
            }
            EngineEvent::BackendDrained {
                backend_id,
                completed,
            } => {
                if *completed {
                    info!(backend_id, "backend drained");
                } else {
                    warn!(backend_id, "backend drain timed out with connections remaining");
                }
            }
            EngineEvent::RolloutStageAdvanced {
                config_id,
                rollout_id,
                stage,
                percentage,
            } => info!(config_id, rollout_id, stage, percentage, "rollout stage advanced"),
            EngineEvent::RolloutCompleted {
                config_id,
                rollout_id,
            } => info!(config_id, rollout_id, "rollout completed"),
            EngineEvent::RolloutAborted {
                config_id,
                rollout_id,
                reason,
            } => warn!(config_id, rollout_id, reason, "rollout aborted"),
        }
    }
}

/// Publishes events to the log and any broadcast subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: tokio::sync::broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: EngineEvent) {
        event.log();
        // Send fails only when there are no subscribers, which is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
