//! Inspection Engine
//!
//! One [`Engine`] instance per inspection context. The engine owns the
//! log sink and per-context counters; per-request state lives in a
//! [`Transaction`] created from it.

use crate::rules::RuleSet;
use crate::transaction::Transaction;
use std::sync::atomic::{AtomicU64, Ordering};

/// Log sink invoked once per logged rule match
pub type LogCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Engine counters (atomic)
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Transactions created
    pub transactions: AtomicU64,

    /// Transactions that ended with a disruptive intervention
    pub interventions: AtomicU64,
}

/// Inspection engine
pub struct Engine {
    log_cb: LogCallback,
    stats: EngineStats,
}

impl Engine {
    /// Create new engine with the default log sink (forwards to `tracing`)
    pub fn new() -> Self {
        Self {
            log_cb: Box::new(|msg| tracing::info!(target: "wafguard::audit", "{}", msg)),
            stats: EngineStats::default(),
        }
    }

    /// Replace the log sink
    pub fn set_log_callback(&mut self, cb: LogCallback) {
        self.log_cb = cb;
    }

    /// Start a new inspection transaction against a rule set
    pub fn new_transaction<'e>(&'e self, rules: &'e RuleSet) -> Transaction<'e> {
        self.stats.transactions.fetch_add(1, Ordering::Relaxed);
        Transaction::new(self, rules)
    }

    /// Get engine counters
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub(crate) fn log(&self, msg: &str) {
        (self.log_cb)(msg);
    }

    pub(crate) fn record_intervention(&self) {
        self.stats.interventions.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
