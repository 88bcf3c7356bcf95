//! # Supervisor Core
//!
//! A fault-tolerant process-management subsystem that starts, monitors,
//! restarts, and terminates a dynamic set of child actors according to
//! declarative policy, modeled after the OTP supervisor pattern.
//!
//! The public entry points are [`supervisor::start_link`] to bring up a
//! supervisor tree and [`client::SupervisorHandle`] to administer it.

pub mod client;
pub mod error;
pub mod registry;
pub mod restart;
pub mod restart_window;
pub mod runtime;
pub mod spec_types;
pub mod start;
pub mod supervisor;
pub mod termination;

pub use client::{
    AddChildResult, DeleteChildResult, RestartChildResult, RestartFailure, StartChildResult, SupervisorHandle,
    TerminateChildResult,
};
pub use error::{SupervisorError, SupervisorResult};
pub use runtime::{Child, ChildContext, ControlSignal, FactoryRegistry, Runtime, TokioRuntime};
pub use spec_types::{
    ChildKey, ChildRef, ChildSpec, ChildType, DiedReason, Direction, MonitorRef, Pid, RestartAllMode, RestartLimit,
    RestartStrategy, RestartType, ShutdownTimeout, SupervisorExitReason, SupervisorId, TerminationPolicy,
};
pub use supervisor::start_link;
