//! WafGuard Asynchronous Execution Bridge
//!
//! Exposes request inspection to callers that must never block their own
//! scheduling loop. The inspection itself is blocking, CPU-bound work
//! against an engine that is not safe for concurrent invocation, so each
//! [`EngineContext`] serializes it on one dedicated worker thread:
//!
//! - callers build a [`Task`] from an owned snapshot of the request and
//!   push it onto an unbounded blocking [`TaskQueue`]
//! - the worker pops tasks in FIFO order, runs the inspection pipeline,
//!   and delivers exactly one [`CheckReply`] per check to the caller's
//!   reply channel
//! - shutdown is a queued task too, so outstanding checks always drain
//!   before the worker exits
//!
//! Submission never blocks and never applies backpressure; replies for one
//! context arrive in submission order.

pub mod context;
pub mod queue;
pub mod task;
mod worker;

pub use context::{BridgeStatsSnapshot, ConnectionConfig, ContextConfig, EngineContext};
pub use queue::TaskQueue;
pub use task::{CheckReply, CorrelationToken, ReplySender, RequestSnapshot, Task};

use thiserror::Error;

/// Bridge errors, surfaced synchronously to the submitting caller
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Request shape invalid at task construction; the task never enters
    /// the queue and no asynchronous reply will follow.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// A rule file failed to load and the context is configured strict
    #[error("rule load failed for {path}: {reason}")]
    RuleLoad { path: String, reason: String },

    /// Worker thread could not be spawned
    #[error("worker spawn failed: {0}")]
    Spawn(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
