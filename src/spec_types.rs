//! Core data model for the supervisor core: identifiers, specs, and policy enums.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Identity of a live actor, assigned by the runtime at spawn time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pid(pub Uuid);

impl Pid {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Pid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid-{}", self.0)
    }
}

/// Opaque lookup key for an active monitor; 1:1 with a live `Running`/
/// `Restarting` child ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonitorRef(pub Uuid);

impl MonitorRef {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MonitorRef {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity of a supervisor, used only to render human-readable exit/kill
/// reasons. Supervisors are not runtime-monitored children in this crate's
/// scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SupervisorId(pub Uuid);

impl SupervisorId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SupervisorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SupervisorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sup-{}", self.0)
    }
}

/// Non-empty string identifying a child within its supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChildKey(String);

impl ChildKey {
    pub fn new(key: impl Into<String>) -> Result<Self, EmptyChildKey> {
        let key = key.into();
        if key.is_empty() {
            Err(EmptyChildKey)
        } else {
            Ok(Self(key))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmptyChildKey;

impl fmt::Display for EmptyChildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "child key must not be empty")
    }
}

impl std::error::Error for EmptyChildKey {}

/// Why a monitored actor terminated, as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiedReason {
    Normal,
    Shutdown,
    Exception(String),
    /// Brutal kill; `reason` is the free-text reason passed to `Runtime::kill`,
    /// e.g. `"killed-by=sup-<id>,reason=TerminatedBySupervisor"`.
    KilledBy(String),
    Unknown,
}

impl fmt::Display for DiedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiedReason::Normal => write!(f, "normal"),
            DiedReason::Shutdown => write!(f, "shutdown"),
            DiedReason::Exception(e) => write!(f, "exception={e}"),
            DiedReason::KilledBy(reason) => write!(f, "{reason}"),
            DiedReason::Unknown => write!(f, "unknown"),
        }
    }
}

impl DiedReason {
    /// Whether this exit should be treated as a graceful shutdown: the
    /// reason equals our own graceful-termination signal.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, DiedReason::Shutdown)
    }

    pub fn is_normal(&self) -> bool {
        matches!(self, DiedReason::Normal)
    }
}

/// Why a start attempt (spawn or factory resolution) failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartFailure {
    /// The factory explicitly signaled "ignore this start".
    Ignore,
    /// Factory resolution failed synchronously.
    BadClosure(String),
    /// The spawned actor failed during its own init.
    InitFailed(String),
    /// The spawned actor did not finish init in time.
    InitTimeout,
}

impl fmt::Display for StartFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartFailure::Ignore => write!(f, "ignore"),
            StartFailure::BadClosure(m) => write!(f, "bad-closure: {m}"),
            StartFailure::InitFailed(m) => write!(f, "init-failed: {m}"),
            StartFailure::InitTimeout => write!(f, "init-timeout"),
        }
    }
}

/// Runtime state of a child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildRef {
    Running(Pid),
    Restarting(Pid),
    Stopped,
    StartIgnored,
    StartFailed(String),
}

impl ChildRef {
    pub fn is_live(&self) -> bool {
        matches!(self, ChildRef::Running(_) | ChildRef::Restarting(_))
    }

    pub fn pid(&self) -> Option<Pid> {
        match self {
            ChildRef::Running(pid) | ChildRef::Restarting(pid) => Some(*pid),
            _ => None,
        }
    }
}

impl fmt::Display for ChildRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildRef::Running(pid) => write!(f, "running({pid})"),
            ChildRef::Restarting(pid) => write!(f, "restarting({pid})"),
            ChildRef::Stopped => write!(f, "stopped"),
            ChildRef::StartIgnored => write!(f, "start-ignored"),
            ChildRef::StartFailed(reason) => write!(f, "start-failed({reason})"),
        }
    }
}

/// Affects shutdown defaults only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildType {
    Worker,
    Supervisor,
}

/// Controls which exits provoke a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartType {
    Permanent,
    Transient,
    Temporary,
    Intrinsic,
}

/// Delay before falling back from graceful exit to brutal kill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownTimeout {
    Infinity,
    Finite(Duration),
}

/// How a child should be asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationPolicy {
    Immediate,
    Timeout(ShutdownTimeout),
}

impl TerminationPolicy {
    /// Shutdown default for a child type, matching the glossary's "affects
    /// shutdown defaults only" note on `ChildType`.
    pub fn default_for(child_type: ChildType) -> Self {
        match child_type {
            ChildType::Worker => TerminationPolicy::Timeout(ShutdownTimeout::Finite(Duration::from_secs(5))),
            ChildType::Supervisor => TerminationPolicy::Timeout(ShutdownTimeout::Infinity),
        }
    }
}

/// Declarative description of a child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildSpec {
    pub key: ChildKey,
    pub child_type: ChildType,
    pub restart_type: RestartType,
    pub termination_policy: TerminationPolicy,
    /// Opaque token resolved by the runtime's `FactoryRegistry` to an actor launcher.
    pub factory: String,
    pub registered_name: Option<String>,
}

impl ChildSpec {
    pub fn new(key: ChildKey, factory: impl Into<String>, restart_type: RestartType) -> Self {
        let child_type = ChildType::Worker;
        Self {
            key,
            child_type,
            restart_type,
            termination_policy: TerminationPolicy::default_for(child_type),
            factory: factory.into(),
            registered_name: None,
        }
    }

    pub fn with_child_type(mut self, child_type: ChildType) -> Self {
        self.child_type = child_type;
        self
    }

    pub fn with_termination_policy(mut self, policy: TerminationPolicy) -> Self {
        self.termination_policy = policy;
        self
    }

    pub fn with_registered_name(mut self, name: impl Into<String>) -> Self {
        self.registered_name = Some(name.into());
        self
    }
}

/// Iteration order for `RestartAll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Insertion order.
    LeftToRight,
    /// Reverse insertion order.
    RightToLeft,
}

/// How siblings are affected by a group restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartAllMode {
    /// Terminate then immediately restart each sibling in turn.
    RestartEach(Direction),
    /// Terminate all siblings first, then start all siblings.
    RestartInOrder(Direction),
}

/// Sliding-window cap on restart attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartLimit {
    pub max_restarts: u32,
    pub interval: Duration,
}

impl Default for RestartLimit {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            interval: Duration::from_secs(60),
        }
    }
}

/// Which siblings a restart affects, and how many restarts are tolerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartStrategy {
    RestartOne(RestartLimit),
    RestartAll(RestartLimit, RestartAllMode),
}

impl RestartStrategy {
    pub fn limit(&self) -> RestartLimit {
        match self {
            RestartStrategy::RestartOne(limit) => *limit,
            RestartStrategy::RestartAll(limit, _) => *limit,
        }
    }
}

/// Reason a supervisor itself terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorExitReason {
    Normal,
    ReachedMaxRestartIntensity,
}

impl SupervisorExitReason {
    pub fn describe(&self, sup_id: SupervisorId) -> String {
        match self {
            SupervisorExitReason::Normal => format!("exit-from={sup_id},reason=Normal"),
            SupervisorExitReason::ReachedMaxRestartIntensity => {
                format!("exit-from={sup_id},reason=ReachedMaxRestartIntensity")
            }
        }
    }
}
