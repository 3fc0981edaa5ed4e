//! Progressive traffic rollouts.
//!
//! A canary rollout walks a list of percentage stages, holding each stage for
//! a dwell period while watching the canary backend's error rate. Crossing the
//! error threshold aborts the rollout and removes its split rule, returning
//! all traffic to the stable backends. A blue-green cutover is the degenerate
//! single-stage case: 100 percent immediately.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::{sync::Notify, task::JoinHandle};
use tracing::{debug, info};

use crate::config::TrafficSplitRule;
use crate::core::Backend;
use crate::observability::{EngineEvent, EventBus};

/// Plan for a staged canary rollout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutPlan {
    pub id: String,
    /// Backend receiving the shifting share of traffic.
    pub canary_backend_id: String,
    /// Traffic percentages walked in order, e.g. `[5, 25, 50, 100]`.
    pub stages: Vec<u32>,
    /// Seconds to hold each stage before advancing.
    #[serde(default = "default_stage_duration_secs")]
    pub stage_duration_secs: u64,
    /// Stage-local error rate that aborts the rollout.
    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f64,
    /// Minimum requests observed in a stage before the error rate is judged.
    #[serde(default = "default_min_sample")]
    pub min_sample: u64,
}

fn default_stage_duration_secs() -> u64 {
    300
}
fn default_max_error_rate() -> f64 {
    0.05
}
fn default_min_sample() -> u64 {
    20
}

impl RolloutPlan {
    pub fn validate(&self) -> Result<(), String> {
        if self.stages.is_empty() {
            return Err("rollout plan has no stages".to_string());
        }
        if let Some(&bad) = self.stages.iter().find(|&&p| p == 0 || p > 100) {
            return Err(format!("rollout stage percentage {bad} out of range 1..=100"));
        }
        if self.stages.windows(2).any(|w| w[0] >= w[1]) {
            return Err("rollout stages must be strictly increasing".to_string());
        }
        if !(0.0..=1.0).contains(&self.max_error_rate) {
            return Err(format!(
                "max_error_rate must be in [0, 1], got {}",
                self.max_error_rate
            ));
        }
        Ok(())
    }

    /// Split rule id owned by this rollout.
    pub fn rule_id(&self) -> String {
        format!("rollout:{}", self.id)
    }
}

/// Observable state of a rollout.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RolloutStatus {
    InProgress { stage: usize, percentage: u32 },
    Completed,
    Aborted { reason: String },
    Cancelled,
}

/// Handle to a running rollout task.
pub struct RolloutHandle {
    handle: JoinHandle<()>,
    cancel: Arc<AtomicBool>,
    notify: Arc<Notify>,
    status: Arc<RwLock<RolloutStatus>>,
}

impl RolloutHandle {
    pub fn status(&self) -> RolloutStatus {
        self.status.read().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Request cancellation and wait for the task to exit. The rollout's split
    /// rule is removed, reverting traffic to the stable backends.
    pub async fn cancel(self) -> RolloutStatus {
        self.cancel.store(true, Ordering::Release);
        self.notify.notify_waiters();
        let _ = self.handle.await;
        self.status.read().clone()
    }

    /// Wait for the rollout to finish on its own.
    pub async fn wait(self) -> RolloutStatus {
        let _ = self.handle.await;
        self.status.read().clone()
    }
}

/// Split `share` evenly across `count` targets; the first targets absorb the
/// remainder so the parts always sum to `share`.
fn spread(share: u32, count: usize) -> Vec<u32> {
    let count = count as u32;
    (0..count)
        .map(|i| share / count + u32::from(i < share % count))
        .collect()
}

/// Upsert the rule a rollout drives: the canary at `percentage`, the stable
/// backends sharing the remainder. The rule always covers the full 100 so the
/// stable set's share is exact rather than a fall-through approximation.
fn set_rollout_rule(
    rules: &RwLock<Vec<TrafficSplitRule>>,
    rule_id: &str,
    canary_backend_id: &str,
    stable_backend_ids: &[String],
    percentage: u32,
) {
    let mut backends = vec![canary_backend_id.to_string()];
    let mut percentages = vec![percentage];
    if !stable_backend_ids.is_empty() && percentage < 100 {
        backends.extend(stable_backend_ids.iter().cloned());
        percentages.extend(spread(100 - percentage, stable_backend_ids.len()));
    }

    let mut rules = rules.write();
    match rules.iter_mut().find(|r| r.id == rule_id) {
        Some(rule) => {
            rule.backends = backends;
            rule.percentages = percentages;
        }
        None => rules.push(TrafficSplitRule {
            id: rule_id.to_string(),
            condition: None,
            backends,
            percentages,
        }),
    }
}

fn remove_rollout_rule(rules: &RwLock<Vec<TrafficSplitRule>>, rule_id: &str) {
    rules.write().retain(|r| r.id != rule_id);
}

/// Spawn a staged rollout against a config's split rules.
///
/// The task owns the rule named [`RolloutPlan::rule_id`] and removes it in
/// every terminal state: after completion all traffic returns to normal
/// selection (the operator retires the old backends separately), and after
/// abort or cancellation traffic reverts to the stable set.
///
/// The first stage's rule and its counter baseline are installed before this
/// returns, so traffic recorded right after the call counts against stage 0
/// even if the task has not been polled yet.
///
/// `stable_backend_ids` is fixed at spawn time; backends added to the config
/// mid-rollout only receive traffic again once the rollout ends.
pub fn spawn_rollout(
    config_id: String,
    plan: RolloutPlan,
    canary: Arc<Backend>,
    stable_backend_ids: Vec<String>,
    rules: Arc<RwLock<Vec<TrafficSplitRule>>>,
    events: EventBus,
) -> RolloutHandle {
    let cancel = Arc::new(AtomicBool::new(false));
    let notify = Arc::new(Notify::new());
    let status = Arc::new(RwLock::new(RolloutStatus::InProgress {
        stage: 0,
        percentage: plan.stages[0],
    }));

    let rule_id = plan.rule_id();
    set_rollout_rule(&rules, &rule_id, canary.id(), &stable_backend_ids, plan.stages[0]);
    events.publish(EngineEvent::RolloutStageAdvanced {
        config_id: config_id.clone(),
        rollout_id: plan.id.clone(),
        stage: 0,
        percentage: plan.stages[0],
    });
    let stage0_base = (canary.total_requests(), canary.failed_requests());

    let cancel_task = Arc::clone(&cancel);
    let notify_task = Arc::clone(&notify);
    let status_task = Arc::clone(&status);

    let handle = tokio::spawn(async move {
        let dwell = Duration::from_secs(plan.stage_duration_secs);

        for (stage, &percentage) in plan.stages.iter().enumerate() {
            if cancel_task.load(Ordering::Acquire) {
                remove_rollout_rule(&rules, &rule_id);
                *status_task.write() = RolloutStatus::Cancelled;
                return;
            }

            // Stage-local counters: judge only traffic sent during this stage.
            // Stage 0 was installed synchronously at spawn.
            let (base_total, base_failed) = if stage == 0 {
                stage0_base
            } else {
                set_rollout_rule(&rules, &rule_id, canary.id(), &stable_backend_ids, percentage);
                *status_task.write() = RolloutStatus::InProgress { stage, percentage };
                events.publish(EngineEvent::RolloutStageAdvanced {
                    config_id: config_id.clone(),
                    rollout_id: plan.id.clone(),
                    stage,
                    percentage,
                });
                (canary.total_requests(), canary.failed_requests())
            };

            match hold_stage(&plan, &canary, base_total, base_failed, dwell, &cancel_task, &notify_task).await {
                StageOutcome::Advance => {}
                StageOutcome::Cancelled => {
                    remove_rollout_rule(&rules, &rule_id);
                    *status_task.write() = RolloutStatus::Cancelled;
                    info!(rollout_id = %plan.id, "rollout cancelled");
                    return;
                }
                StageOutcome::ErrorBudgetExceeded { rate, sampled } => {
                    remove_rollout_rule(&rules, &rule_id);
                    let reason = format!(
                        "stage {stage} error rate {:.1}% over {:.1}% threshold ({sampled} requests)",
                        rate * 100.0,
                        plan.max_error_rate * 100.0
                    );
                    *status_task.write() = RolloutStatus::Aborted {
                        reason: reason.clone(),
                    };
                    events.publish(EngineEvent::RolloutAborted {
                        config_id: config_id.clone(),
                        rollout_id: plan.id.clone(),
                        reason,
                    });
                    return;
                }
            }
        }

        remove_rollout_rule(&rules, &rule_id);
        *status_task.write() = RolloutStatus::Completed;
        events.publish(EngineEvent::RolloutCompleted {
            config_id,
            rollout_id: plan.id.clone(),
        });
    });

    RolloutHandle {
        handle,
        cancel,
        notify,
        status,
    }
}

enum StageOutcome {
    Advance,
    Cancelled,
    ErrorBudgetExceeded { rate: f64, sampled: u64 },
}

/// Hold one stage for its dwell period, checking the canary's stage-local
/// error rate once a second and reacting promptly to cancellation.
///
/// The stage never advances unjudged: when its own sample stays under
/// `min_sample` the final gate uses the canary's cumulative error rate
/// instead, so a quiet stage cannot wave through a failing backend.
async fn hold_stage(
    plan: &RolloutPlan,
    canary: &Backend,
    base_total: u64,
    base_failed: u64,
    dwell: Duration,
    cancel: &AtomicBool,
    notify: &Notify,
) -> StageOutcome {
    let tick = Duration::from_secs(1).min(dwell.max(Duration::from_millis(10)));
    let deadline = tokio::time::Instant::now() + dwell;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            let sampled = canary.total_requests().saturating_sub(base_total);
            let failed = canary.failed_requests().saturating_sub(base_failed);
            let rate = if sampled >= plan.min_sample {
                failed as f64 / sampled as f64
            } else {
                canary.error_rate()
            };
            if rate > plan.max_error_rate {
                return StageOutcome::ErrorBudgetExceeded { rate, sampled };
            }
            return StageOutcome::Advance;
        }

        tokio::select! {
            _ = notify.notified() => return StageOutcome::Cancelled,
            _ = tokio::time::sleep(tick.min(remaining)) => {}
        }
        if cancel.load(Ordering::Acquire) {
            return StageOutcome::Cancelled;
        }

        let sampled = canary.total_requests().saturating_sub(base_total);
        let failed = canary.failed_requests().saturating_sub(base_failed);
        if sampled >= plan.min_sample {
            let rate = failed as f64 / sampled as f64;
            debug!(sampled, rate, "canary stage sample");
            if rate > plan.max_error_rate {
                return StageOutcome::ErrorBudgetExceeded { rate, sampled };
            }
        }
    }
}

/// Immediately shift all matched traffic to one backend.
///
/// Used for blue-green cutover; the installed rule persists until replaced or
/// removed by the operator.
pub fn apply_cutover(
    rules: &RwLock<Vec<TrafficSplitRule>>,
    rule_id: &str,
    target_backend_id: &str,
) {
    set_rollout_rule(rules, rule_id, target_backend_id, &[], 100);
}
