//! Public client API: request/reply wrappers against a running supervisor.
//!
//! A cheap, `Clone`-able handle wraps a mailbox sender, and each public
//! operation is a `oneshot`-backed request/reply round trip. Every
//! request/reply type here is `Serialize`/`Deserialize` so it is ready to be
//! addressed remotely even though no transport is implemented.

use crate::spec_types::{ChildKey, ChildRef, ChildSpec};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error::{SupervisorError, SupervisorResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddChildResult {
    ChildAdded(ChildRef),
    DuplicateChild(ChildRef),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartChildResult {
    ChildAdded(ChildRef),
    ChildFailedToStart(String),
    DuplicateChild(ChildRef),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteChildResult {
    ChildDeleted,
    ChildNotFound,
    ChildNotStopped(ChildRef),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartFailure {
    AlreadyRunning(ChildRef),
    StartFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartChildResult {
    ChildRestartOk(ChildRef),
    ChildRestartFailed(RestartFailure),
    ChildRestartUnknownId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminateChildResult {
    ChildTerminated,
    ChildNotFound,
}

/// Administrative requests sent to a running supervisor's mailbox. Not part
/// of the public wire surface itself — `SupervisorHandle` is the public API;
/// this is the internal message shape the actor loop dispatches on.
pub(crate) enum AdminRequest {
    AddChild(ChildSpec, oneshot::Sender<AddChildResult>),
    StartChild(ChildSpec, oneshot::Sender<StartChildResult>),
    TerminateChild(ChildKey, oneshot::Sender<TerminateChildResult>),
    RestartChild(ChildKey, oneshot::Sender<RestartChildResult>),
    DeleteChild(ChildKey, oneshot::Sender<DeleteChildResult>),
    LookupChild(ChildKey, oneshot::Sender<Option<ChildRef>>),
    ListChildren(oneshot::Sender<Vec<(ChildKey, ChildRef)>>),
    Shutdown(oneshot::Sender<()>),
}

/// A cheap, cloneable reference to a running supervisor's mailbox.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<AdminRequest>,
}

impl SupervisorHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<AdminRequest>) -> Self {
        Self { tx }
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> AdminRequest) -> SupervisorResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(make(reply_tx)).map_err(|_| SupervisorError::NotRunning)?;
        reply_rx.await.map_err(|_| SupervisorError::NoReply)
    }

    /// `addChild`: insert `spec` with ref `Stopped`; does not start it.
    pub async fn add_child(&self, spec: ChildSpec) -> SupervisorResult<AddChildResult> {
        self.call(|reply| AdminRequest::AddChild(spec, reply)).await
    }

    /// `startChild`: insert (if new) and start `spec`, or start an existing
    /// non-live spec.
    pub async fn start_child(&self, spec: ChildSpec) -> SupervisorResult<StartChildResult> {
        self.call(|reply| AdminRequest::StartChild(spec, reply)).await
    }

    /// `terminateChild`: stop a live child per its termination policy.
    pub async fn terminate_child(&self, key: ChildKey) -> SupervisorResult<TerminateChildResult> {
        self.call(|reply| AdminRequest::TerminateChild(key, reply)).await
    }

    /// `restartChild`: explicitly (re)start a non-live child.
    pub async fn restart_child(&self, key: ChildKey) -> SupervisorResult<RestartChildResult> {
        self.call(|reply| AdminRequest::RestartChild(key, reply)).await
    }

    /// `deleteChild`: remove a non-live spec from the registry.
    pub async fn delete_child(&self, key: ChildKey) -> SupervisorResult<DeleteChildResult> {
        self.call(|reply| AdminRequest::DeleteChild(key, reply)).await
    }

    /// `lookupChild`: current ref for `key`, if any.
    pub async fn lookup_child(&self, key: ChildKey) -> SupervisorResult<Option<ChildRef>> {
        self.call(|reply| AdminRequest::LookupChild(key, reply)).await
    }

    /// `listChildren`: all entries, in insertion order.
    pub async fn list_children(&self) -> SupervisorResult<Vec<(ChildKey, ChildRef)>> {
        self.call(AdminRequest::ListChildren).await
    }

    /// `shutdown`: terminate all children and stop the supervisor, reporting
    /// `SupervisorExitReason::Normal`.
    pub async fn shutdown(&self) -> SupervisorResult<()> {
        self.call(AdminRequest::Shutdown).await
    }
}
