//! Restart engine: the restart-type policy matrix plus strategy dispatch
//! for `RestartOne` and `RestartAll`.
//!
//! Functions here return every freshly created monitor receiver rather than
//! awaiting it themselves; `supervisor.rs` owns the single mailbox that all
//! down notifications must flow through, so it is the one that spawns the
//! small forwarding tasks that feed a receiver into that mailbox.

use crate::registry::Registry;
use crate::restart_window::RestartWindow;
use crate::runtime::{DownNotification, Runtime};
use crate::spec_types::{ChildKey, ChildRef, Direction, MonitorRef, RestartAllMode, RestartStrategy, RestartType, SupervisorId};
use crate::start::{start, StartOutcome};
use crate::termination::terminate_with_fallback;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// A freshly registered monitor the caller must start forwarding into its mailbox.
pub struct NewMonitor {
    pub key: ChildKey,
    pub mref: MonitorRef,
    pub down_rx: oneshot::Receiver<DownNotification>,
}

/// What exit class a `DiedReason` falls into for the policy matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    Normal,
    Abnormal,
    Shutdown,
}

impl ExitClass {
    pub fn of(reason: &crate::spec_types::DiedReason) -> Self {
        if reason.is_normal() {
            ExitClass::Normal
        } else if reason.is_shutdown() {
            ExitClass::Shutdown
        } else {
            ExitClass::Abnormal
        }
    }
}

/// What the restart engine decided to do about one dead child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    Restart,
    KeepStopped,
    Remove,
    SupervisorExitsNormally,
}

/// The restart-type policy matrix: which exits provoke a restart, and what
/// happens when they don't.
pub fn decide(restart_type: RestartType, class: ExitClass) -> RestartDecision {
    use ExitClass::*;
    use RestartDecision::*;
    use RestartType::*;
    match (restart_type, class) {
        (Permanent, Normal | Abnormal | Shutdown) => Restart,
        (Transient, Normal | Shutdown) => KeepStopped,
        (Transient, Abnormal) => Restart,
        (Temporary, Normal | Abnormal | Shutdown) => Remove,
        (Intrinsic, Normal | Shutdown) => SupervisorExitsNormally,
        (Intrinsic, Abnormal) => Restart,
    }
}

/// Outcome of handling one monitor-down notification.
pub enum DownHandling {
    /// The supervisor should keep running; `new_monitors` lists any children
    /// that were (re)started and must be wired into the mailbox.
    Continue { new_monitors: Vec<NewMonitor> },
    /// Restart intensity was exceeded; the supervisor must self-terminate.
    Escalate,
    /// An `Intrinsic` child exited normally; the supervisor exits `Normal`.
    ExitNormal,
}

/// Handle a single down notification for `key`.
///
/// On `RestartAll`, every sibling is affected according to `mode`: all are
/// terminated first (temporary siblings included), then the non-temporary
/// ones are restarted and the now-dead temporary ones are dropped. This
/// function performs that whole group operation before returning.
pub async fn handle_down(
    runtime: &dyn Runtime,
    sup_id: SupervisorId,
    registry: &mut Registry,
    window: &mut RestartWindow,
    strategy: RestartStrategy,
    key: &ChildKey,
    reason: crate::spec_types::DiedReason,
) -> DownHandling {
    let restart_type = match registry.get(key) {
        Some(entry) => entry.spec.restart_type,
        None => {
            warn!(%key, "down notification for unknown key");
            return DownHandling::Continue { new_monitors: Vec::new() };
        }
    };

    let class = ExitClass::of(&reason);
    let decision = decide(restart_type, class);

    match decision {
        RestartDecision::KeepStopped => {
            registry.update_ref(key, ChildRef::Stopped);
            DownHandling::Continue { new_monitors: Vec::new() }
        }
        RestartDecision::Remove => {
            registry.remove(key);
            DownHandling::Continue { new_monitors: Vec::new() }
        }
        RestartDecision::SupervisorExitsNormally => DownHandling::ExitNormal,
        RestartDecision::Restart => {
            if !window.allow_restart(Instant::now(), strategy.limit()) {
                warn!(%key, "restart intensity exceeded");
                return DownHandling::Escalate;
            }
            let new_monitors = match strategy {
                RestartStrategy::RestartOne(_) => restart_one(runtime, registry, key).await.into_iter().collect(),
                RestartStrategy::RestartAll(_, mode) => restart_all(runtime, sup_id, registry, mode).await,
            };
            DownHandling::Continue { new_monitors }
        }
    }
}

/// Restart exactly one child. Returns the new monitor if the restart
/// produced a live child.
async fn restart_one(runtime: &dyn Runtime, registry: &mut Registry, key: &ChildKey) -> Option<NewMonitor> {
    let old_pid = registry.get(key).and_then(|e| e.child_ref.pid());
    if let Some(pid) = old_pid {
        registry.update_ref(key, ChildRef::Restarting(pid));
    }

    let spec = registry.get(key)?.spec.clone();

    match start(runtime, &spec).await {
        StartOutcome::Started { child_ref, mref, down_rx } => {
            registry.update_ref(key, child_ref);
            info!(%key, "restarted");
            Some(NewMonitor { key: key.clone(), mref, down_rx })
        }
        StartOutcome::Ignored { remove_spec } => {
            if remove_spec {
                registry.remove(key);
            } else {
                registry.update_ref(key, ChildRef::StartIgnored);
            }
            None
        }
        StartOutcome::Failed(failure) => {
            registry.update_ref(key, ChildRef::StartFailed(failure.to_string()));
            warn!(%key, %failure, "restart attempt failed");
            None
        }
    }
}

/// Restart a whole sibling group for `RestartAll`. Every sibling in `dir`
/// order is terminated, including `Temporary` ones; only the non-temporary
/// survivors are then restarted, and the dead temporaries are dropped from
/// the registry entirely rather than kept as `Stopped`.
async fn restart_all(runtime: &dyn Runtime, sup_id: SupervisorId, registry: &mut Registry, mode: RestartAllMode) -> Vec<NewMonitor> {
    let mut new_monitors = Vec::new();
    match mode {
        RestartAllMode::RestartEach(dir) => {
            for key in registry.ordered_keys(dir) {
                terminate_if_live(runtime, sup_id, registry, &key).await;
                if is_temporary(registry, &key) {
                    continue;
                }
                if let Some(m) = restart_one(runtime, registry, &key).await {
                    new_monitors.push(m);
                }
            }
            remove_dead_temporaries(registry);
        }
        RestartAllMode::RestartInOrder(dir) => {
            let keys = registry.ordered_keys(dir);
            for key in &keys {
                terminate_if_live(runtime, sup_id, registry, key).await;
            }
            remove_dead_temporaries(registry);
            for key in &keys {
                if registry.get(key).is_none() {
                    continue; // was temporary, already dropped above
                }
                if let Some(m) = restart_one(runtime, registry, key).await {
                    new_monitors.push(m);
                }
            }
        }
    }
    new_monitors
}

fn is_temporary(registry: &Registry, key: &ChildKey) -> bool {
    registry.get(key).map(|e| matches!(e.spec.restart_type, RestartType::Temporary)).unwrap_or(false)
}

async fn terminate_if_live(runtime: &dyn Runtime, sup_id: SupervisorId, registry: &mut Registry, key: &ChildKey) {
    let Some(entry) = registry.get(key) else { return };
    if !entry.child_ref.is_live() {
        return;
    }
    let pid = entry.child_ref.pid().expect("is_live implies a pid");
    let policy = entry.spec.termination_policy;
    let _reason = terminate_with_fallback(runtime, sup_id, pid, policy).await;
    registry.update_ref(key, ChildRef::Stopped);
}

/// `Temporary` siblings caught up in a group terminate are removed, not kept
/// `Stopped`.
fn remove_dead_temporaries(registry: &mut Registry) {
    let temp_keys: Vec<ChildKey> = registry
        .list()
        .filter(|e| matches!(e.spec.restart_type, RestartType::Temporary) && !e.child_ref.is_live())
        .map(|e| e.key.clone())
        .collect();
    for key in temp_keys {
        registry.remove(&key);
    }
}

/// Explicit `restartChild(key)`.
pub enum RestartChildResult {
    Ok(ChildRef, Option<NewMonitor>),
    Failed(String),
    AlreadyRunning(ChildRef),
    UnknownId,
}

pub async fn restart_child(runtime: &dyn Runtime, registry: &mut Registry, key: &ChildKey) -> RestartChildResult {
    let Some(entry) = registry.get(key) else {
        return RestartChildResult::UnknownId;
    };
    if entry.child_ref.is_live() {
        return RestartChildResult::AlreadyRunning(entry.child_ref.clone());
    }

    let new_monitor = restart_one(runtime, registry, key).await;
    match registry.get(key) {
        Some(entry) if entry.child_ref.is_live() => RestartChildResult::Ok(entry.child_ref.clone(), new_monitor),
        Some(entry) => RestartChildResult::Failed(entry.child_ref.to_string()),
        None => RestartChildResult::Failed("spec removed (ignored temporary)".to_string()),
    }
}
