//! Error handling for the supervisor core.
//!
//! A single `thiserror`-derived enum and a crate-wide result alias.
//! `SupervisorError` is reserved for "communication with the supervisor
//! itself failed" — expected outcomes (duplicate key, unknown child,
//! already running, ...) are reported as typed reply variants, not as
//! this error.

use thiserror::Error;

pub type SupervisorResult<T> = Result<T, SupervisorError>;

#[derive(Error, Debug)]
pub enum SupervisorError {
    /// The supervisor's mailbox is gone; it has already exited.
    #[error("supervisor is not running")]
    NotRunning,

    /// A reply channel was dropped before the supervisor answered.
    #[error("no reply received from supervisor")]
    NoReply,
}
