//! Engine Context
//!
//! One long-lived binding of (engine, rule set, queue, worker thread).
//! Creating a context starts its worker; consuming it with
//! [`EngineContext::shutdown`] (or dropping it) queues a shutdown task and
//! joins the worker before the engine resources go away. Contexts are
//! fully self-contained and never share a queue or worker.

use crate::queue::TaskQueue;
use crate::task::{CorrelationToken, ReplySender, RequestSnapshot, Task};
use crate::worker;
use crate::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use wafguard_engine::{Engine, RuleSet};

/// Connection metadata fed to every transaction
///
/// The engine pipeline wants endpoint and request-line metadata that the
/// caller does not supply per check; these defaults stand in for it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Client address
    pub client_addr: String,

    /// Client port
    pub client_port: u16,

    /// Server address
    pub server_addr: String,

    /// Server port
    pub server_port: u16,

    /// Method passed to URI processing
    pub method: String,

    /// HTTP protocol version passed to URI processing
    pub http_version: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            client_addr: "127.0.0.1".into(),
            client_port: 80,
            server_addr: "127.0.0.1".into(),
            server_port: 80,
            method: "GET".into(),
            http_version: "1.1".into(),
        }
    }
}

/// Context configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Connection metadata for every check on this context
    pub connection: ConnectionConfig,

    /// Fail context creation on any rule that does not load, instead of
    /// logging a warning and continuing with the rules that did.
    pub strict_rule_load: bool,
}

/// Per-context counters (atomic)
#[derive(Debug, Default)]
pub(crate) struct BridgeStats {
    pub(crate) checks: AtomicU64,
    pub(crate) allowed: AtomicU64,
    pub(crate) blocked: AtomicU64,
    pub(crate) errored: AtomicU64,
}

/// Counters snapshot
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BridgeStatsSnapshot {
    /// Checks processed by the worker
    pub checks: u64,
    /// Checks that came back allowed
    pub allowed: u64,
    /// Checks that came back blocked
    pub blocked: u64,
    /// Checks that aborted with an error reply
    pub errored: u64,
}

/// One inspection context: engine, rule set, queue and worker thread
#[derive(Debug)]
pub struct EngineContext {
    queue: Arc<TaskQueue>,
    worker: Option<thread::JoinHandle<()>>,
    stats: Arc<BridgeStats>,
}

impl EngineContext {
    /// Create a context, loading each rule file in order, then start the
    /// worker thread
    ///
    /// Rule files that fail to load are logged and skipped unless
    /// [`ContextConfig::strict_rule_load`] is set. Fails only on strict
    /// rule-load errors or if the worker thread cannot be spawned.
    pub fn create<P: AsRef<Path>>(rule_files: &[P], config: ContextConfig) -> Result<Self> {
        let engine = Engine::new();
        let mut rules = RuleSet::new();

        for path in rule_files {
            let path = path.as_ref();
            let errors_before = rules.load_errors().len();
            match rules.add_file(path) {
                Ok(added) => {
                    tracing::info!(file = %path.display(), rules = added, "loaded rule file");
                    if config.strict_rule_load && rules.load_errors().len() > errors_before {
                        let (source, reason) = rules.load_errors()[errors_before].clone();
                        return Err(BridgeError::RuleLoad {
                            path: source,
                            reason,
                        });
                    }
                }
                Err(e) => {
                    if config.strict_rule_load {
                        return Err(BridgeError::RuleLoad {
                            path: path.display().to_string(),
                            reason: e.to_string(),
                        });
                    }
                    tracing::warn!(file = %path.display(), error = %e, "skipping rule file");
                }
            }
        }

        if rules.is_empty() {
            tracing::warn!("context starting with no usable rules; all checks will pass");
        }

        let queue = Arc::new(TaskQueue::new());
        let stats = Arc::new(BridgeStats::default());
        let connection = config.connection.clone();

        let handle = {
            let queue = queue.clone();
            let stats = stats.clone();
            thread::Builder::new()
                .name("wafguard-worker".into())
                .spawn(move || worker::run(queue, engine, rules, connection, stats))
                .map_err(BridgeError::Spawn)?
        };

        Ok(Self {
            queue,
            worker: Some(handle),
            stats,
        })
    }

    /// Submit one check; returns as soon as the task is enqueued
    ///
    /// The verdict arrives later on `reply_to` tagged with `token`.
    /// Fails synchronously only if the request shape is invalid, in which
    /// case nothing is enqueued and no reply will follow.
    pub fn submit_check<N, V>(
        &self,
        token: CorrelationToken,
        reply_to: ReplySender,
        uri: &[u8],
        headers: &[(N, V)],
        body: &[u8],
    ) -> Result<()>
    where
        N: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let request = RequestSnapshot::capture(uri, headers, body)?;
        tracing::trace!(%token, uri_len = request.uri.len(), "check enqueued");
        self.queue.push(Task::Check {
            token,
            reply_to,
            request,
        });
        Ok(())
    }

    /// Counters for this context
    pub fn stats(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            checks: self.stats.checks.load(Ordering::Relaxed),
            allowed: self.stats.allowed.load(Ordering::Relaxed),
            blocked: self.stats.blocked.load(Ordering::Relaxed),
            errored: self.stats.errored.load(Ordering::Relaxed),
        }
    }

    /// Stop the context, draining every check submitted before this call
    ///
    /// Pushes the shutdown task behind any outstanding checks and blocks
    /// until the worker thread has fully stopped. Consuming `self` makes
    /// double-shutdown and submit-after-shutdown unrepresentable.
    ///
    /// # Panics
    ///
    /// Panics if the worker thread itself panicked; that is an invariant
    /// violation, not a recoverable error.
    pub fn shutdown(mut self) {
        if let Err(e) = self.stop_worker() {
            std::panic::resume_unwind(e);
        }
    }

    fn stop_worker(&mut self) -> thread::Result<()> {
        match self.worker.take() {
            Some(handle) => {
                self.queue.push(Task::Shutdown);
                handle.join()
            }
            None => Ok(()),
        }
    }
}

impl Drop for EngineContext {
    fn drop(&mut self) {
        if self.worker.is_some() {
            tracing::debug!("context dropped without explicit shutdown");
            if self.stop_worker().is_err() {
                tracing::error!("inspection worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_with_no_rule_files() {
        let rule_files: &[&Path] = &[];
        let ctx = EngineContext::create(rule_files, ContextConfig::default()).unwrap();
        ctx.shutdown();
    }

    #[test]
    fn test_missing_rule_file_is_nonfatal_by_default() {
        let ctx =
            EngineContext::create(&["/nonexistent/rules.conf"], ContextConfig::default())
                .unwrap();
        ctx.shutdown();
    }

    #[test]
    fn test_missing_rule_file_fails_when_strict() {
        let config = ContextConfig {
            strict_rule_load: true,
            ..Default::default()
        };
        let err = EngineContext::create(&["/nonexistent/rules.conf"], config).unwrap_err();
        assert!(matches!(err, BridgeError::RuleLoad { .. }));
    }

    #[test]
    fn test_malformed_submit_rejected_synchronously() {
        let rule_files: &[&Path] = &[];
        let ctx = EngineContext::create(rule_files, ContextConfig::default()).unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let no_headers: &[(&[u8], &[u8])] = &[];
        let err = ctx
            .submit_check(CorrelationToken::new(), tx, b"", no_headers, b"")
            .unwrap_err();
        assert!(matches!(err, BridgeError::MalformedRequest(_)));

        ctx.shutdown();
        // Nothing was enqueued, so no reply may ever arrive.
        assert!(rx.try_recv().is_err());
    }
}
