//! The actor-runtime boundary treated as externally supplied.
//!
//! A `Runtime` trait models `spawn`/`monitor`/`kill`/`graceful_exit`/named
//! registration, and `TokioRuntime` is one concrete implementation built
//! from `tokio::spawn` tasks and mpsc channels. `FactoryRegistry` is the
//! dynamic-dispatch-over-factories registry: child construction goes
//! through an opaque label rather than runtime inheritance, kept as an
//! explicit value rather than a process-wide singleton so independent
//! supervisor trees can use independent factory sets (see DESIGN.md).

use crate::error::SupervisorResult;
use crate::spec_types::{DiedReason, MonitorRef, Pid, StartFailure};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A notification the runtime delivers once, when a monitored actor exits.
#[derive(Debug, Clone)]
pub struct DownNotification {
    pub mref: MonitorRef,
    pub pid: Pid,
    pub reason: DiedReason,
}

/// Signals the runtime delivers into a running child's control channel.
#[derive(Debug, Clone)]
pub enum ControlSignal {
    GracefulExit,
}

/// Execution context handed to a spawned child's `run`.
pub struct ChildContext {
    ctrl_rx: mpsc::UnboundedReceiver<ControlSignal>,
}

impl ChildContext {
    /// Wait for the next control signal. Children that never call this
    /// (or that call it and ignore the result) never observe a graceful
    /// exit request and can only be stopped by a brutal kill.
    pub async fn recv_control(&mut self) -> Option<ControlSignal> {
        self.ctrl_rx.recv().await
    }
}

/// What a factory produces: one independent unit of concurrent execution.
#[async_trait]
pub trait Child: Send + 'static {
    async fn run(&mut self, ctx: ChildContext) -> DiedReason;
}

type FactoryFn = dyn Fn() -> Box<dyn Child> + Send + Sync;

/// Mapping of factory label → actor launcher, populated at startup and
/// read-mostly thereafter.
#[derive(Default)]
pub struct FactoryRegistry {
    factories: Mutex<HashMap<String, Arc<FactoryFn>>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, label: impl Into<String>, factory: impl Fn() -> Box<dyn Child> + Send + Sync + 'static) {
        self.factories.lock().unwrap().insert(label.into(), Arc::new(factory));
    }

    fn resolve(&self, label: &str) -> Result<Arc<FactoryFn>, StartFailure> {
        self.factories
            .lock()
            .unwrap()
            .get(label)
            .cloned()
            .ok_or_else(|| StartFailure::BadClosure(format!("unknown factory label: {label}")))
    }
}

/// The runtime interface the supervisor core consumes.
#[async_trait]
pub trait Runtime: Send + Sync + 'static {
    async fn spawn(&self, factory: &str) -> Result<Pid, StartFailure>;
    /// Register interest in `pid`'s termination. Monitor refs are 1:1 with
    /// live children, so only one outstanding monitor per pid is
    /// supported; the notification is delivered at most once.
    fn monitor(&self, pid: Pid, down_tx: oneshot::Sender<DownNotification>) -> MonitorRef;
    fn unmonitor(&self, mref: MonitorRef);
    fn kill(&self, pid: Pid, reason: String);
    fn graceful_exit(&self, pid: Pid);
    fn register(&self, name: String, pid: Pid) -> SupervisorResult<()>;
    fn unregister(&self, name: &str);
    fn lookup(&self, name: &str) -> Option<Pid>;
}

struct ProcessHandle {
    ctrl_tx: mpsc::UnboundedSender<ControlSignal>,
    abort_handle: tokio::task::AbortHandle,
    /// Set by `kill` just before aborting, so the reaper can report the
    /// brutal-kill reason even though the task itself never observes it.
    kill_reason: Arc<Mutex<Option<String>>>,
}

#[derive(Default)]
struct Inner {
    processes: Mutex<HashMap<Pid, ProcessHandle>>,
    monitors: Mutex<HashMap<Pid, (MonitorRef, oneshot::Sender<DownNotification>)>>,
    names: Mutex<HashMap<String, Pid>>,
}

/// A `Runtime` backed by real `tokio::spawn` tasks.
///
/// Each child is one task; a second "reaper" task awaits the child's
/// `JoinHandle` and delivers the down notification, which lets brutal kill
/// (`JoinHandle::abort`) still produce an observable `DiedReason` even
/// though the aborted task can run no further code of its own.
#[derive(Clone, Default)]
pub struct TokioRuntime {
    inner: Arc<Inner>,
    factories: Arc<FactoryRegistry>,
}

impl TokioRuntime {
    pub fn new(factories: Arc<FactoryRegistry>) -> Self {
        Self { inner: Arc::new(Inner::default()), factories }
    }

    fn deliver_down(inner: &Inner, pid: Pid, reason: DiedReason) {
        let monitor = inner.monitors.lock().unwrap().remove(&pid);
        if let Some((mref, down_tx)) = monitor {
            let _ = down_tx.send(DownNotification { mref, pid, reason });
        }
        inner.processes.lock().unwrap().remove(&pid);
    }
}

#[async_trait]
impl Runtime for TokioRuntime {
    async fn spawn(&self, factory: &str) -> Result<Pid, StartFailure> {
        let make_child = self.factories.resolve(factory)?;
        let mut child = make_child();

        let pid = Pid::new();
        let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
        let kill_reason = Arc::new(Mutex::new(None));

        let join: JoinHandle<DiedReason> = tokio::spawn(async move {
            let ctx = ChildContext { ctrl_rx };
            child.run(ctx).await
        });
        let abort_handle = join.abort_handle();

        self.inner.processes.lock().unwrap().insert(
            pid,
            ProcessHandle { ctrl_tx, abort_handle, kill_reason: kill_reason.clone() },
        );

        // Reaper: the only place a Down notification is produced. Awaiting
        // the JoinHandle here (rather than in the process map) lets `kill`
        // abort the task via the separately-held AbortHandle while this
        // task still observes the outcome, including cancellation.
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let reason = match join.await {
                Ok(reason) => reason,
                Err(e) if e.is_cancelled() => {
                    let reason_text = kill_reason.lock().unwrap().clone();
                    DiedReason::KilledBy(reason_text.unwrap_or_else(|| "killed".to_string()))
                }
                Err(e) => DiedReason::Exception(e.to_string()),
            };
            debug!(%pid, %reason, "child exited");
            TokioRuntime::deliver_down(&inner, pid, reason);
        });

        Ok(pid)
    }

    fn monitor(&self, pid: Pid, down_tx: oneshot::Sender<DownNotification>) -> MonitorRef {
        let mref = MonitorRef::new();
        // A pid not present in `processes` has already exited (pids are only
        // ever created by `spawn`, which inserts before returning). Report
        // the DOWN immediately rather than registering a monitor that would
        // never fire, per the usual "monitor of a dead process" semantics.
        if !self.inner.processes.lock().unwrap().contains_key(&pid) {
            let _ = down_tx.send(DownNotification { mref, pid, reason: DiedReason::Unknown });
            return mref;
        }
        self.inner.monitors.lock().unwrap().insert(pid, (mref, down_tx));
        mref
    }

    fn unmonitor(&self, mref: MonitorRef) {
        let mut monitors = self.inner.monitors.lock().unwrap();
        monitors.retain(|_, (existing, _)| *existing != mref);
    }

    fn kill(&self, pid: Pid, reason: String) {
        let processes = self.inner.processes.lock().unwrap();
        if let Some(handle) = processes.get(&pid) {
            *handle.kill_reason.lock().unwrap() = Some(reason);
            handle.abort_handle.abort();
        } else {
            warn!(%pid, "kill requested for unknown pid");
        }
    }

    fn graceful_exit(&self, pid: Pid) {
        let processes = self.inner.processes.lock().unwrap();
        if let Some(handle) = processes.get(&pid) {
            let _ = handle.ctrl_tx.send(ControlSignal::GracefulExit);
        } else {
            warn!(%pid, "graceful_exit requested for unknown pid");
        }
    }

    fn register(&self, name: String, pid: Pid) -> SupervisorResult<()> {
        self.inner.names.lock().unwrap().insert(name, pid);
        Ok(())
    }

    fn unregister(&self, name: &str) {
        self.inner.names.lock().unwrap().remove(name);
    }

    fn lookup(&self, name: &str) -> Option<Pid> {
        self.inner.names.lock().unwrap().get(name).copied()
    }
}

#[cfg(test)]
pub mod test_children {
    //! Small `Child` implementations shared by the scenario tests.
    use super::*;

    pub struct BlockForever;

    #[async_trait]
    impl Child for BlockForever {
        async fn run(&mut self, mut ctx: ChildContext) -> DiedReason {
            match ctx.recv_control().await {
                Some(ControlSignal::GracefulExit) | None => DiedReason::Shutdown,
            }
        }
    }

    pub struct NoOp;

    #[async_trait]
    impl Child for NoOp {
        async fn run(&mut self, _ctx: ChildContext) -> DiedReason {
            DiedReason::Normal
        }
    }

    /// Exits on its own, as if it had decided to shut down cleanly, without
    /// waiting for an external graceful-exit signal.
    pub struct SelfStops;

    #[async_trait]
    impl Child for SelfStops {
        async fn run(&mut self, _ctx: ChildContext) -> DiedReason {
            DiedReason::Shutdown
        }
    }

    pub struct SleepyIgnoresShutdown;

    #[async_trait]
    impl Child for SleepyIgnoresShutdown {
        async fn run(&mut self, _ctx: ChildContext) -> DiedReason {
            // Never listens for GracefulExit; only a brutal kill ends it.
            std::future::pending::<()>().await;
            unreachable!()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec_types::DiedReason;
    use test_children::*;

    fn runtime_with(label: &str, make: impl Fn() -> Box<dyn Child> + Send + Sync + 'static) -> TokioRuntime {
        let factories = Arc::new(FactoryRegistry::new());
        factories.register(label, make);
        TokioRuntime::new(factories)
    }

    #[tokio::test]
    async fn unknown_factory_is_bad_closure() {
        let factories = Arc::new(FactoryRegistry::new());
        let runtime = TokioRuntime::new(factories);
        let err = runtime.spawn("missing").await.unwrap_err();
        assert_eq!(err, StartFailure::BadClosure("unknown factory label: missing".to_string()));
    }

    #[tokio::test]
    async fn graceful_exit_reports_shutdown() {
        let runtime = runtime_with("block", || Box::new(BlockForever));
        let pid = runtime.spawn("block").await.unwrap();
        let (tx, rx) = oneshot::channel();
        let mref = runtime.monitor(pid, tx);

        runtime.graceful_exit(pid);
        let down = rx.await.unwrap();
        assert_eq!(down.mref, mref);
        assert_eq!(down.reason, DiedReason::Shutdown);
    }

    #[tokio::test]
    async fn brutal_kill_reports_killed_by_with_reason() {
        let runtime = runtime_with("sleepy", || Box::new(SleepyIgnoresShutdown));
        let pid = runtime.spawn("sleepy").await.unwrap();
        let (tx, rx) = oneshot::channel();
        runtime.monitor(pid, tx);

        runtime.kill(pid, "killed-by=sup-test,reason=TerminatedBySupervisor".to_string());
        let down = rx.await.unwrap();
        match down.reason {
            DiedReason::KilledBy(reason) => assert!(reason.contains("TerminatedBySupervisor")),
            other => panic!("expected KilledBy, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn noop_child_reports_normal() {
        let runtime = runtime_with("noop", || Box::new(NoOp));
        let pid = runtime.spawn("noop").await.unwrap();
        let (tx, rx) = oneshot::channel();
        runtime.monitor(pid, tx);

        let down = rx.await.unwrap();
        assert_eq!(down.reason, DiedReason::Normal);
    }
}
