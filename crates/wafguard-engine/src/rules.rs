//! Rule Set
//!
//! Owns the parsed rules of one inspection context and compiles their
//! operators once at load time. Loading is best-effort: files are read in
//! order, unparseable rules are recorded and skipped, and the set stays
//! usable with whatever loaded cleanly.

use crate::parser::{Operator, RuleParser, SecRule};
use crate::{EngineError, Result};
use aho_corasick::AhoCorasick;
use regex::bytes::Regex;
use std::collections::HashSet;
use std::path::Path;

/// Compiled form of a rule operator
pub(crate) enum CompiledOp {
    Rx(Regex),
    Contains(Vec<u8>),
    BeginsWith(Vec<u8>),
    EndsWith(Vec<u8>),
    Streq(Vec<u8>),
    Pm(AhoCorasick),
}

impl CompiledOp {
    fn compile(rule: &SecRule) -> Result<Self> {
        let id = rule.actions.id;
        match &rule.operator {
            Operator::Rx(pattern) => {
                let re = Regex::new(pattern).map_err(|e| EngineError::InvalidPattern {
                    id,
                    reason: e.to_string(),
                })?;
                Ok(Self::Rx(re))
            }
            Operator::Contains(s) => Ok(Self::Contains(s.clone().into_bytes())),
            Operator::BeginsWith(s) => Ok(Self::BeginsWith(s.clone().into_bytes())),
            Operator::EndsWith(s) => Ok(Self::EndsWith(s.clone().into_bytes())),
            Operator::Streq(s) => Ok(Self::Streq(s.clone().into_bytes())),
            Operator::Pm(words) => {
                let ac = AhoCorasick::builder()
                    .ascii_case_insensitive(true)
                    .build(words)
                    .map_err(|e| EngineError::InvalidPattern {
                        id,
                        reason: e.to_string(),
                    })?;
                Ok(Self::Pm(ac))
            }
        }
    }

    /// Evaluate the operator against one target value
    pub(crate) fn matches(&self, value: &[u8]) -> bool {
        match self {
            Self::Rx(re) => re.is_match(value),
            Self::Contains(needle) => memchr::memmem::find(value, needle).is_some(),
            Self::BeginsWith(prefix) => value.starts_with(prefix),
            Self::EndsWith(suffix) => value.ends_with(suffix),
            Self::Streq(expected) => value == expected.as_slice(),
            Self::Pm(ac) => ac.is_match(value),
        }
    }
}

/// Rule with its compiled operator
pub(crate) struct CompiledRule {
    pub(crate) rule: SecRule,
    pub(crate) op: CompiledOp,
}

/// Compiled rule set for one inspection context
pub struct RuleSet {
    /// Rules in load order
    rules: Vec<CompiledRule>,

    /// Seen rule ids, for duplicate detection
    ids: HashSet<u32>,

    /// Load errors as (source, message); parse errors carry the line number
    load_errors: Vec<(String, String)>,
}

impl RuleSet {
    /// Create empty rule set
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            ids: HashSet::new(),
            load_errors: Vec::new(),
        }
    }

    /// Load rules from a file, appending to the set
    ///
    /// Returns the number of rules added. Fails only if the file cannot be
    /// read; individual rules that fail to parse or compile are recorded in
    /// [`RuleSet::load_errors`] and skipped.
    pub fn add_file(&mut self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let source = path.display().to_string();
        tracing::info!(file = %source, "loading rule file");
        Ok(self.add_parsed(&content, &source))
    }

    /// Load rules from a string, appending to the set
    pub fn add_rules(&mut self, text: &str) -> usize {
        self.add_parsed(text, "<inline>")
    }

    fn add_parsed(&mut self, content: &str, source: &str) -> usize {
        let mut parser = RuleParser::new();
        // parse_content only fails on IO, which cannot happen for a string
        let _ = parser.parse_content(content);

        for (line, err) in parser.errors() {
            tracing::warn!(source, line, error = %err, "skipping unparseable rule");
            self.load_errors
                .push((format!("{}:{}", source, line), err.clone()));
        }

        let mut added = 0;
        for rule in parser.into_rules() {
            match self.add_rule(rule) {
                Ok(()) => added += 1,
                Err(e) => {
                    tracing::warn!(source, error = %e, "skipping rule");
                    self.load_errors.push((source.to_string(), e.to_string()));
                }
            }
        }

        added
    }

    /// Add one parsed rule, compiling its operator
    pub fn add_rule(&mut self, rule: SecRule) -> Result<()> {
        if !self.ids.insert(rule.actions.id) {
            return Err(EngineError::DuplicateRuleId(rule.actions.id));
        }
        let op = CompiledOp::compile(&rule)?;
        self.rules.push(CompiledRule { rule, op });
        Ok(())
    }

    /// Rules of one phase, in load order
    pub(crate) fn phase_rules(&self, phase: u8) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter().filter(move |r| r.rule.actions.phase == phase)
    }

    /// Number of usable rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the set has no usable rules
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Errors collected during loading, as (source, message)
    pub fn load_errors(&self) -> &[(String, String)] {
        &self.load_errors
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::new()
    }
}
