//! The supervisor actor: main loop, admin-request dispatch, monitor-down
//! handling, startup and shutdown.
//!
//! Down notifications arrive one-at-a-time per child via `oneshot`; a small
//! forwarding task per live monitor feeds them into a single internal mpsc
//! channel so the main loop can `select!` over admin requests and monitor
//! events uniformly, giving the supervisor a single-threaded, serialized
//! view of both request and event streams.

use crate::client::{
    AddChildResult, AdminRequest, DeleteChildResult, RestartChildResult, RestartFailure, StartChildResult,
    SupervisorHandle, TerminateChildResult,
};
use crate::registry::Registry;
use crate::restart::{self, handle_down, DownHandling, NewMonitor};
use crate::restart_window::RestartWindow;
use crate::runtime::{DownNotification, Runtime};
use crate::spec_types::{ChildKey, ChildRef, ChildSpec, Direction, RestartStrategy, SupervisorExitReason, SupervisorId};
use crate::start::StartOutcome;
use crate::termination::terminate_with_fallback;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

enum StartAttempt {
    Running(ChildRef),
    Ignored,
    Failed(String),
}

struct Supervisor {
    sup_id: SupervisorId,
    runtime: Arc<dyn Runtime>,
    registry: Registry,
    window: RestartWindow,
    strategy: RestartStrategy,
    /// Tracks the monitor ref currently expected for each live key, so a
    /// notification from a superseded incarnation is recognized as stale,
    /// even though the runtime's one-slot-per-pid monitor table already
    /// retires old monitors on re-registration.
    expected_mref: HashMap<ChildKey, crate::spec_types::MonitorRef>,
    admin_rx: mpsc::UnboundedReceiver<AdminRequest>,
    down_tx: mpsc::UnboundedSender<(ChildKey, DownNotification)>,
    down_rx: mpsc::UnboundedReceiver<(ChildKey, DownNotification)>,
}

/// Start a new supervisor actor task.
///
/// Returns a cheap handle for issuing administrative requests and a
/// `JoinHandle` that resolves to the reason the supervisor ultimately
/// exited with.
pub fn start_link(
    sup_id: SupervisorId,
    runtime: Arc<dyn Runtime>,
    strategy: RestartStrategy,
    initial_specs: Vec<ChildSpec>,
) -> (SupervisorHandle, JoinHandle<SupervisorExitReason>) {
    let (admin_tx, admin_rx) = mpsc::unbounded_channel();
    let (down_tx, down_rx) = mpsc::unbounded_channel();

    let mut supervisor = Supervisor {
        sup_id,
        runtime,
        registry: Registry::new(),
        window: RestartWindow::new(),
        strategy,
        expected_mref: HashMap::new(),
        admin_rx,
        down_tx,
        down_rx,
    };

    let join = tokio::spawn(async move {
        if let Some(reason) = supervisor.boot(initial_specs).await {
            return reason;
        }
        supervisor.run().await
    });

    (SupervisorHandle::new(admin_tx), join)
}

impl Supervisor {
    async fn boot(&mut self, specs: Vec<ChildSpec>) -> Option<SupervisorExitReason> {
        for spec in specs {
            let key = spec.key.clone();
            if let Err(existing) = self.registry.insert(spec, ChildRef::Stopped) {
                warn!(%key, ?existing, "duplicate key among initial child specs, skipping");
                continue;
            }

            loop {
                match self.start_and_install(&key).await {
                    StartAttempt::Running(_) | StartAttempt::Ignored => break,
                    StartAttempt::Failed(reason) => {
                        if self.window.allow_restart(Instant::now(), self.strategy.limit()) {
                            warn!(%key, %reason, "initial start failed, retrying");
                            continue;
                        }
                        error!(%key, %reason, "initial start repeatedly failed, aborting supervisor");
                        self.terminate_all_reverse().await;
                        return Some(SupervisorExitReason::ReachedMaxRestartIntensity);
                    }
                }
            }
        }
        None
    }

    async fn run(mut self) -> SupervisorExitReason {
        loop {
            tokio::select! {
                maybe_req = self.admin_rx.recv() => {
                    match maybe_req {
                        Some(req) => {
                            if let Some(reason) = self.handle_admin(req).await {
                                return reason;
                            }
                        }
                        None => return SupervisorExitReason::Normal,
                    }
                }
                maybe_down = self.down_rx.recv() => {
                    let (key, down) = maybe_down.expect("down_tx is held by self and never drops while running");
                    if let Some(reason) = self.handle_down_event(key, down).await {
                        return reason;
                    }
                }
            }
        }
    }

    async fn handle_admin(&mut self, req: AdminRequest) -> Option<SupervisorExitReason> {
        match req {
            AdminRequest::AddChild(spec, reply) => {
                let result = match self.registry.insert(spec, ChildRef::Stopped) {
                    Ok(()) => AddChildResult::ChildAdded(ChildRef::Stopped),
                    Err(existing) => AddChildResult::DuplicateChild(existing),
                };
                let _ = reply.send(result);
                None
            }
            AdminRequest::StartChild(spec, reply) => {
                let key = spec.key.clone();
                if let Some(entry) = self.registry.get(&key) {
                    if entry.child_ref.is_live() {
                        let _ = reply.send(StartChildResult::DuplicateChild(entry.child_ref.clone()));
                        return None;
                    }
                } else if let Err(existing) = self.registry.insert(spec, ChildRef::Stopped) {
                    let _ = reply.send(StartChildResult::DuplicateChild(existing));
                    return None;
                }

                let result = match self.start_and_install(&key).await {
                    StartAttempt::Running(child_ref) => StartChildResult::ChildAdded(child_ref),
                    StartAttempt::Ignored => StartChildResult::ChildFailedToStart("ignored".to_string()),
                    StartAttempt::Failed(reason) => StartChildResult::ChildFailedToStart(reason),
                };
                let _ = reply.send(result);
                None
            }
            AdminRequest::TerminateChild(key, reply) => {
                match self.registry.get(&key) {
                    None => {
                        let _ = reply.send(TerminateChildResult::ChildNotFound);
                    }
                    Some(entry) if !entry.child_ref.is_live() => {
                        let _ = reply.send(TerminateChildResult::ChildTerminated);
                    }
                    Some(entry) => {
                        let pid = entry.child_ref.pid().expect("is_live implies a pid");
                        let policy = entry.spec.termination_policy;
                        // terminate_with_fallback registers its own fresh
                        // monitor on `pid`, which overwrites the runtime's
                        // single slot for it; the original forwarder simply
                        // observes its sender dropped and exits quietly.
                        self.expected_mref.remove(&key);
                        let _reason = terminate_with_fallback(self.runtime.as_ref(), self.sup_id, pid, policy).await;
                        self.registry.update_ref(&key, ChildRef::Stopped);
                        let _ = reply.send(TerminateChildResult::ChildTerminated);
                    }
                }
                None
            }
            AdminRequest::RestartChild(key, reply) => {
                let result = restart::restart_child(self.runtime.as_ref(), &mut self.registry, &key).await;
                let reply_val = match result {
                    restart::RestartChildResult::Ok(child_ref, monitor) => {
                        if let Some(m) = monitor {
                            self.install_monitor(m);
                        }
                        RestartChildResult::ChildRestartOk(child_ref)
                    }
                    restart::RestartChildResult::Failed(msg) => {
                        RestartChildResult::ChildRestartFailed(RestartFailure::StartFailed(msg))
                    }
                    restart::RestartChildResult::AlreadyRunning(existing) => {
                        RestartChildResult::ChildRestartFailed(RestartFailure::AlreadyRunning(existing))
                    }
                    restart::RestartChildResult::UnknownId => RestartChildResult::ChildRestartUnknownId,
                };
                let _ = reply.send(reply_val);
                None
            }
            AdminRequest::DeleteChild(key, reply) => {
                let result = match self.registry.get(&key) {
                    None => DeleteChildResult::ChildNotFound,
                    Some(entry) if entry.child_ref.is_live() => DeleteChildResult::ChildNotStopped(entry.child_ref.clone()),
                    Some(_) => {
                        self.registry.remove(&key);
                        self.expected_mref.remove(&key);
                        DeleteChildResult::ChildDeleted
                    }
                };
                let _ = reply.send(result);
                None
            }
            AdminRequest::LookupChild(key, reply) => {
                let _ = reply.send(self.registry.get(&key).map(|e| e.child_ref.clone()));
                None
            }
            AdminRequest::ListChildren(reply) => {
                let all = self.registry.list().map(|e| (e.key.clone(), e.child_ref.clone())).collect();
                let _ = reply.send(all);
                None
            }
            AdminRequest::Shutdown(reply) => {
                self.terminate_all_reverse().await;
                let _ = reply.send(());
                Some(SupervisorExitReason::Normal)
            }
        }
    }

    async fn handle_down_event(&mut self, key: ChildKey, down: DownNotification) -> Option<SupervisorExitReason> {
        match self.expected_mref.get(&key) {
            Some(expected) if *expected == down.mref => {}
            _ => {
                debug!(%key, "ignoring down notification from a stale monitor");
                return None;
            }
        }
        self.expected_mref.remove(&key);

        match handle_down(
            self.runtime.as_ref(),
            self.sup_id,
            &mut self.registry,
            &mut self.window,
            self.strategy,
            &key,
            down.reason,
        )
        .await
        {
            DownHandling::Continue { new_monitors } => {
                self.install_new_monitors(new_monitors);
                None
            }
            DownHandling::Escalate => {
                warn!(sup = %self.sup_id, "restart intensity exceeded, escalating");
                self.terminate_all_reverse().await;
                Some(SupervisorExitReason::ReachedMaxRestartIntensity)
            }
            DownHandling::ExitNormal => {
                self.terminate_all_reverse().await;
                Some(SupervisorExitReason::Normal)
            }
        }
    }

    async fn start_and_install(&mut self, key: &ChildKey) -> StartAttempt {
        let spec = match self.registry.get(key) {
            Some(entry) => entry.spec.clone(),
            None => return StartAttempt::Failed("unknown child".to_string()),
        };

        match crate::start::start(self.runtime.as_ref(), &spec).await {
            StartOutcome::Started { child_ref, mref, down_rx } => {
                self.registry.update_ref(key, child_ref.clone());
                self.expected_mref.insert(key.clone(), mref);
                Self::spawn_forwarder(key.clone(), down_rx, self.down_tx.clone());
                StartAttempt::Running(child_ref)
            }
            StartOutcome::Ignored { remove_spec } => {
                if remove_spec {
                    self.registry.remove(key);
                } else {
                    self.registry.update_ref(key, ChildRef::StartIgnored);
                }
                StartAttempt::Ignored
            }
            StartOutcome::Failed(failure) => {
                self.registry.update_ref(key, ChildRef::StartFailed(failure.to_string()));
                StartAttempt::Failed(failure.to_string())
            }
        }
    }

    fn install_monitor(&mut self, m: NewMonitor) {
        self.expected_mref.insert(m.key.clone(), m.mref);
        Self::spawn_forwarder(m.key, m.down_rx, self.down_tx.clone());
    }

    fn install_new_monitors(&mut self, monitors: Vec<NewMonitor>) {
        for m in monitors {
            self.install_monitor(m);
        }
    }

    fn spawn_forwarder(
        key: ChildKey,
        down_rx: oneshot::Receiver<DownNotification>,
        sink: mpsc::UnboundedSender<(ChildKey, DownNotification)>,
    ) {
        tokio::spawn(async move {
            if let Ok(down) = down_rx.await {
                let _ = sink.send((key, down));
            }
        });
    }

    /// On shutdown, terminate all children in reverse insertion order using
    /// their termination policies.
    async fn terminate_all_reverse(&mut self) {
        for key in self.registry.ordered_keys(Direction::RightToLeft) {
            let Some(entry) = self.registry.get(&key) else { continue };
            if !entry.child_ref.is_live() {
                continue;
            }
            let pid = entry.child_ref.pid().expect("is_live implies a pid");
            let policy = entry.spec.termination_policy;
            self.expected_mref.remove(&key);
            let _ = terminate_with_fallback(self.runtime.as_ref(), self.sup_id, pid, policy).await;
            self.registry.update_ref(&key, ChildRef::Stopped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::test_children::{BlockForever, NoOp, SelfStops};
    use crate::runtime::{Child, FactoryRegistry, TokioRuntime};
    use crate::spec_types::{RestartLimit, RestartType, TerminationPolicy};
    use std::time::Duration;

    fn runtime_with(children: Vec<(&str, fn() -> Box<dyn Child>)>) -> Arc<dyn Runtime> {
        let factories = Arc::new(FactoryRegistry::new());
        for (label, make) in children {
            factories.register(label, move || make());
        }
        Arc::new(TokioRuntime::new(factories))
    }

    #[tokio::test]
    async fn add_child_then_start_child_brings_it_up() {
        let runtime = runtime_with(vec![("noop", || Box::new(NoOp))]);
        let (handle, _join) = start_link(
            SupervisorId::new(),
            runtime,
            RestartStrategy::RestartOne(RestartLimit::default()),
            Vec::new(),
        );

        let key = ChildKey::new("a").unwrap();
        let spec = ChildSpec::new(key.clone(), "noop", RestartType::Temporary)
            .with_termination_policy(TerminationPolicy::Immediate);

        let added = handle.add_child(spec.clone()).await.unwrap();
        assert_eq!(added, AddChildResult::ChildAdded(ChildRef::Stopped));

        let dup = handle.add_child(spec).await.unwrap();
        assert_eq!(dup, AddChildResult::DuplicateChild(ChildRef::Stopped));
    }

    #[tokio::test]
    async fn start_child_on_unknown_key_inserts_and_starts() {
        let runtime = runtime_with(vec![("block", || Box::new(BlockForever))]);
        let (handle, _join) = start_link(
            SupervisorId::new(),
            runtime,
            RestartStrategy::RestartOne(RestartLimit::default()),
            Vec::new(),
        );

        let key = ChildKey::new("a").unwrap();
        let spec = ChildSpec::new(key.clone(), "block", RestartType::Permanent);
        let result = handle.start_child(spec).await.unwrap();
        match result {
            StartChildResult::ChildAdded(ChildRef::Running(_)) => {}
            other => panic!("expected ChildAdded(Running), got {other:?}"),
        }

        let looked_up = handle.lookup_child(key).await.unwrap();
        assert!(matches!(looked_up, Some(ChildRef::Running(_))));
    }

    #[tokio::test]
    async fn permanent_child_restarts_after_spontaneous_graceful_stop() {
        let runtime = runtime_with(vec![("self_stops", || Box::new(SelfStops))]);
        let (handle, _join) = start_link(
            SupervisorId::new(),
            runtime,
            // SelfStops re-exits immediately on every restart; a generous
            // limit keeps the test from racing the intensity escalation.
            RestartStrategy::RestartOne(RestartLimit { max_restarts: 1_000_000, interval: Duration::from_secs(60) }),
            Vec::new(),
        );

        let key = ChildKey::new("perm").unwrap();
        let spec = ChildSpec::new(key.clone(), "self_stops", RestartType::Permanent);
        let started = handle.start_child(spec).await.unwrap();
        let old_pid = match started {
            StartChildResult::ChildAdded(ChildRef::Running(pid)) => pid,
            other => panic!("expected running child, got {other:?}"),
        };

        // The child exits on its own; the supervisor observes the down
        // notification and restarts it without any admin request.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let after = handle.lookup_child(key).await.unwrap();
        match after {
            Some(ChildRef::Running(new_pid)) => assert_ne!(new_pid, old_pid),
            other => panic!("expected a running replacement, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_child_refuses_live_and_removes_stopped() {
        let runtime = runtime_with(vec![("noop", || Box::new(NoOp))]);
        let (handle, _join) = start_link(
            SupervisorId::new(),
            runtime,
            RestartStrategy::RestartOne(RestartLimit::default()),
            Vec::new(),
        );

        let key = ChildKey::new("a").unwrap();
        handle
            .add_child(ChildSpec::new(key.clone(), "noop", RestartType::Temporary))
            .await
            .unwrap();

        let deleted = handle.delete_child(key.clone()).await.unwrap();
        assert_eq!(deleted, DeleteChildResult::ChildDeleted);

        let not_found = handle.delete_child(key).await.unwrap();
        assert_eq!(not_found, DeleteChildResult::ChildNotFound);
    }

    #[tokio::test]
    async fn shutdown_terminates_children_and_exits_normally() {
        let runtime = runtime_with(vec![("block", || Box::new(BlockForever))]);
        let (handle, join) = start_link(
            SupervisorId::new(),
            runtime,
            RestartStrategy::RestartOne(RestartLimit::default()),
            vec![ChildSpec::new(ChildKey::new("a").unwrap(), "block", RestartType::Permanent)],
        );

        handle.shutdown().await.unwrap();
        let reason = join.await.unwrap();
        assert_eq!(reason, SupervisorExitReason::Normal);
    }
}
