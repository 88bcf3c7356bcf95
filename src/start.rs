//! Start engine: resolve a child's factory, spawn it, monitor it, register it.

use crate::runtime::{DownNotification, Runtime};
use crate::spec_types::{ChildRef, ChildSpec, MonitorRef, RestartType, StartFailure};
use tokio::sync::oneshot;
use tracing::{info, warn};

/// Outcome of a single start attempt.
pub enum StartOutcome {
    /// The actor is up; holds the ref to install, the monitor reference to
    /// track for staleness checks, and the channel its eventual down
    /// notification arrives on.
    Started {
        child_ref: ChildRef,
        mref: MonitorRef,
        down_rx: oneshot::Receiver<DownNotification>,
    },
    /// The factory signaled "ignore this start". `Temporary` children have
    /// their spec removed entirely; all others keep `StartIgnored`.
    Ignored { remove_spec: bool },
    /// The spawn or factory resolution failed outright.
    Failed(StartFailure),
}

/// Run the start engine for `spec`.
pub async fn start(runtime: &dyn Runtime, spec: &ChildSpec) -> StartOutcome {
    let pid = match runtime.spawn(&spec.factory).await {
        Ok(pid) => pid,
        Err(StartFailure::Ignore) => {
            info!(key = %spec.key, "factory signaled ignore");
            return StartOutcome::Ignored {
                remove_spec: matches!(spec.restart_type, RestartType::Temporary),
            };
        }
        Err(failure) => {
            warn!(key = %spec.key, %failure, "start failed");
            return StartOutcome::Failed(failure);
        }
    };

    let (down_tx, down_rx) = oneshot::channel();
    let mref = runtime.monitor(pid, down_tx);

    if let Some(name) = &spec.registered_name {
        if let Err(err) = runtime.register(name.clone(), pid) {
            warn!(key = %spec.key, %name, %err, "failed to register child under name");
        }
    }

    info!(key = %spec.key, %pid, "child started");
    StartOutcome::Started {
        child_ref: ChildRef::Running(pid),
        mref,
        down_rx,
    }
}
