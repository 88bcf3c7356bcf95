//! Termination engine: stop one child per its `TerminationPolicy`.
//!
//! Graceful signal first, then abort on timeout. A child is never considered
//! terminated until the runtime has reported its down notification — this
//! module always awaits that notification, it never treats the stop
//! *request* as completion.

use crate::runtime::{DownNotification, Runtime};
use crate::spec_types::{DiedReason, Pid, ShutdownTimeout, SupervisorId, TerminationPolicy};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Stop `pid` according to `policy`, registering whatever monitors it needs
/// along the way. Returns the `DiedReason` the runtime ultimately reported;
/// the child is never considered terminated before this resolves.
pub async fn terminate_with_fallback(
    runtime: &dyn Runtime,
    sup_id: SupervisorId,
    pid: Pid,
    policy: TerminationPolicy,
) -> DiedReason {
    match policy {
        TerminationPolicy::Immediate => {
            let (tx, rx) = oneshot::channel();
            runtime.monitor(pid, tx);
            brutal_kill(runtime, sup_id, pid, rx).await
        }
        TerminationPolicy::Timeout(ShutdownTimeout::Infinity) => {
            let (tx, rx) = oneshot::channel();
            runtime.monitor(pid, tx);
            runtime.graceful_exit(pid);
            await_down(rx).await
        }
        TerminationPolicy::Timeout(ShutdownTimeout::Finite(delay)) => {
            let (tx, rx) = oneshot::channel();
            runtime.monitor(pid, tx);
            runtime.graceful_exit(pid);
            match tokio::time::timeout(delay, rx).await {
                Ok(down) => reason_of(down),
                Err(_elapsed) => {
                    warn!(%pid, ?delay, "graceful exit timed out, falling back to brutal kill");
                    let (tx2, rx2) = oneshot::channel();
                    runtime.monitor(pid, tx2);
                    brutal_kill(runtime, sup_id, pid, rx2).await
                }
            }
        }
    }
}

async fn brutal_kill(
    runtime: &dyn Runtime,
    sup_id: SupervisorId,
    pid: Pid,
    down_rx: oneshot::Receiver<DownNotification>,
) -> DiedReason {
    let reason = format!("killed-by={sup_id},reason=TerminatedBySupervisor");
    runtime.kill(pid, reason);
    await_down(down_rx).await
}

async fn await_down(down_rx: oneshot::Receiver<DownNotification>) -> DiedReason {
    reason_of(down_rx.await)
}

fn reason_of(down: Result<DownNotification, oneshot::error::RecvError>) -> DiedReason {
    match down {
        Ok(down) => {
            debug!(pid = %down.pid, reason = %down.reason, "child terminated");
            down.reason
        }
        Err(_) => DiedReason::Unknown,
    }
}
