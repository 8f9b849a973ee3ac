//! WafGuard Inspection Engine
//!
//! Rule-driven HTTP request inspection with a transaction-based API.
//!
//! ## Features
//!
//! - **Rule Parser**: Parses a SecLang-style rule language into structured rules
//! - **Rule Set**: Compiles rules once at load time (regex + Aho-Corasick)
//! - **Transactions**: Per-request inspection pipeline with phased evaluation
//! - **Interventions**: Disruptive rule matches yield a block verdict
//!
//! A [`Transaction`] is single-threaded and short-lived: feed it the request
//! pieces in order, run the processing phases, then query [`Transaction::intervention`].

pub mod engine;
pub mod parser;
pub mod rules;
pub mod transaction;

pub use engine::{Engine, EngineStats, LogCallback};
pub use parser::{Disposition, Operator, RuleActions, RuleParser, SecRule, Severity, Variable};
pub use rules::RuleSet;
pub use transaction::{Intervention, MatchedRule, Transaction};

use thiserror::Error;

/// Inspection engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid rule: {0}")]
    InvalidRule(String),

    #[error("duplicate rule id: {0}")]
    DuplicateRuleId(u32),

    #[error("invalid pattern in rule {id}: {reason}")]
    InvalidPattern { id: u32, reason: String },

    #[error("invalid request header: {0}")]
    InvalidHeader(String),

    #[error("invalid request uri: {0}")]
    InvalidUri(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
