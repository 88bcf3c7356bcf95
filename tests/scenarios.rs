//! End-to-end scenarios covering restart policy, intensity limiting, and
//! termination behavior.
//!
//! These exercise the public API only (`SupervisorHandle`, `start_link`,
//! `Runtime`/`Child`), the way an external consumer would.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use supervisor_core::runtime::{Child, ChildContext, ControlSignal, FactoryRegistry, TokioRuntime};
use supervisor_core::{
    ChildKey, ChildRef, ChildSpec, DiedReason, Direction, RestartAllMode, RestartLimit, RestartStrategy, RestartType,
    Runtime, ShutdownTimeout, StartChildResult, SupervisorExitReason, SupervisorId, TerminateChildResult,
    TerminationPolicy,
};

struct BlockForever;

#[async_trait]
impl Child for BlockForever {
    async fn run(&mut self, mut ctx: ChildContext) -> DiedReason {
        match ctx.recv_control().await {
            Some(ControlSignal::GracefulExit) | None => DiedReason::Shutdown,
        }
    }
}

struct NoOp;

#[async_trait]
impl Child for NoOp {
    async fn run(&mut self, _ctx: ChildContext) -> DiedReason {
        DiedReason::Normal
    }
}

struct SleepyIgnoresShutdown;

#[async_trait]
impl Child for SleepyIgnoresShutdown {
    async fn run(&mut self, _ctx: ChildContext) -> DiedReason {
        std::future::pending::<()>().await;
        unreachable!()
    }
}

fn runtime_with(children: Vec<(&str, fn() -> Box<dyn Child>)>) -> Arc<TokioRuntime> {
    let factories = Arc::new(FactoryRegistry::new());
    for (label, make) in children {
        factories.register(label, move || make());
    }
    Arc::new(TokioRuntime::new(factories))
}

fn key(s: &str) -> ChildKey {
    ChildKey::new(s).unwrap()
}

#[tokio::test]
async fn scenario_1_permanent_restart_on_normal_stop() {
    let runtime = runtime_with(vec![("block", || Box::new(BlockForever))]);
    let (handle, _join) = supervisor_core::start_link(
        SupervisorId::new(),
        runtime.clone(),
        RestartStrategy::RestartOne(RestartLimit::default()),
        Vec::new(),
    );

    let spec = ChildSpec::new(key("perm"), "block", RestartType::Permanent);
    let started = handle.start_child(spec).await.unwrap();
    let pid = match started {
        StartChildResult::ChildAdded(ChildRef::Running(pid)) => pid,
        other => panic!("expected running child, got {other:?}"),
    };

    runtime.graceful_exit(pid);
    tokio::time::sleep(Duration::from_millis(50)).await;

    match handle.lookup_child(key("perm")).await.unwrap() {
        Some(ChildRef::Running(new_pid)) => assert_ne!(new_pid, pid),
        other => panic!("expected a running replacement, got {other:?}"),
    }
}

#[tokio::test]
async fn scenario_2_temporary_removal_on_kill() {
    let runtime = runtime_with(vec![("block", || Box::new(BlockForever))]);
    let (handle, _join) = supervisor_core::start_link(
        SupervisorId::new(),
        runtime.clone(),
        RestartStrategy::RestartOne(RestartLimit::default()),
        Vec::new(),
    );

    let spec = ChildSpec::new(key("temp"), "block", RestartType::Temporary);
    let started = handle.start_child(spec).await.unwrap();
    let pid = match started {
        StartChildResult::ChildAdded(ChildRef::Running(pid)) => pid,
        other => panic!("expected running child, got {other:?}"),
    };

    runtime.kill(pid, "bye".to_string());
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(handle.lookup_child(key("temp")).await.unwrap(), None);
}

#[tokio::test]
async fn scenario_3a_transient_graceful_stop_keeps_spec_stopped() {
    let runtime = runtime_with(vec![("block", || Box::new(BlockForever))]);
    let (handle, _join) = supervisor_core::start_link(
        SupervisorId::new(),
        runtime.clone(),
        RestartStrategy::RestartOne(RestartLimit::default()),
        Vec::new(),
    );

    let spec = ChildSpec::new(key("trans"), "block", RestartType::Transient);
    let started = handle.start_child(spec).await.unwrap();
    let pid = match started {
        StartChildResult::ChildAdded(ChildRef::Running(pid)) => pid,
        other => panic!("expected running child, got {other:?}"),
    };

    runtime.graceful_exit(pid);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(handle.lookup_child(key("trans")).await.unwrap(), Some(ChildRef::Stopped));
}

#[tokio::test]
async fn scenario_3b_transient_abnormal_exit_restarts() {
    let runtime = runtime_with(vec![("block", || Box::new(BlockForever))]);
    let (handle, _join) = supervisor_core::start_link(
        SupervisorId::new(),
        runtime.clone(),
        RestartStrategy::RestartOne(RestartLimit::default()),
        Vec::new(),
    );

    let spec = ChildSpec::new(key("trans"), "block", RestartType::Transient);
    let started = handle.start_child(spec).await.unwrap();
    let pid = match started {
        StartChildResult::ChildAdded(ChildRef::Running(pid)) => pid,
        other => panic!("expected running child, got {other:?}"),
    };

    runtime.kill(pid, "bye".to_string());
    tokio::time::sleep(Duration::from_millis(50)).await;

    match handle.lookup_child(key("trans")).await.unwrap() {
        Some(ChildRef::Running(new_pid)) => assert_ne!(new_pid, pid),
        other => panic!("expected a running replacement, got {other:?}"),
    }
}

#[tokio::test]
async fn scenario_4_intensity_escalation() {
    let runtime = runtime_with(vec![("noop", || Box::new(NoOp))]);
    let sup_id = SupervisorId::new();
    let limit = RestartLimit { max_restarts: 50, interval: Duration::from_secs(2) };
    let (handle, join) = supervisor_core::start_link(
        sup_id,
        runtime,
        RestartStrategy::RestartOne(limit),
        vec![ChildSpec::new(key("noop"), "noop", RestartType::Permanent)],
    );

    let reason = tokio::time::timeout(Duration::from_secs(5), join)
        .await
        .expect("supervisor should exit within a few seconds")
        .unwrap();
    assert_eq!(reason, SupervisorExitReason::ReachedMaxRestartIntensity);

    // The handle is now talking to a dead mailbox; further calls fail cleanly
    // rather than hanging.
    assert!(handle.lookup_child(key("noop")).await.is_err());
}

#[tokio::test]
async fn scenario_5_restart_all_in_order_preserves_insertion_order() {
    let mut children = Vec::new();
    for _ in 1..=100 {
        children.push(("block", (|| Box::new(BlockForever) as Box<dyn Child>) as fn() -> Box<dyn Child>));
    }
    let runtime = runtime_with(children);

    let specs: Vec<ChildSpec> = (1..=100)
        .map(|i| ChildSpec::new(key(&i.to_string()), "block", RestartType::Permanent))
        .collect();

    let (handle, _join) = supervisor_core::start_link(
        SupervisorId::new(),
        runtime.clone(),
        RestartStrategy::RestartAll(RestartLimit::default(), RestartAllMode::RestartInOrder(Direction::LeftToRight)),
        specs,
    );

    let first_pid = match handle.lookup_child(key("1")).await.unwrap() {
        Some(ChildRef::Running(pid)) => pid,
        other => panic!("expected running child 1, got {other:?}"),
    };

    runtime.kill(first_pid, "bye".to_string());
    tokio::time::sleep(Duration::from_millis(200)).await;

    let all = handle.list_children().await.unwrap();
    assert_eq!(all.len(), 100);
    for (k, child_ref) in &all {
        assert!(matches!(child_ref, ChildRef::Running(_)), "child {k} was not restarted: {child_ref:?}");
    }
}

#[tokio::test]
async fn scenario_6_termination_timeout_falls_back_to_brutal_kill() {
    let runtime = runtime_with(vec![("sleepy", || Box::new(SleepyIgnoresShutdown))]);
    let (handle, _join) = supervisor_core::start_link(
        SupervisorId::new(),
        runtime,
        RestartStrategy::RestartOne(RestartLimit::default()),
        Vec::new(),
    );

    let spec = ChildSpec::new(key("sleepy"), "sleepy", RestartType::Temporary)
        .with_termination_policy(TerminationPolicy::Timeout(ShutdownTimeout::Finite(Duration::from_secs(1))));
    handle.start_child(spec).await.unwrap();

    let start = tokio::time::Instant::now();
    let result = handle.terminate_child(key("sleepy")).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(result, TerminateChildResult::ChildTerminated);
    assert!(elapsed >= Duration::from_millis(900), "terminated too early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(2000), "brutal-kill fallback took too long: {elapsed:?}");
}
