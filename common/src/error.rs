//! Configuration-time errors.
//!
//! These are the only failures the runtime lets propagate to the caller;
//! runtime agent failures are contained and surfaced through agent state
//! and supervisor reports instead.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// The event type name is not part of the closed catalog.
    #[error("unknown event type: '{0}'")]
    UnknownEventType(String),

    /// The agent name is not registered with the component that was asked about it.
    #[error("unknown agent: '{0}'")]
    UnknownAgent(String),

    /// A driver was started while already running.
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),
}
