//! SecLang Rule Parser
//!
//! Parses a subset of the SecLang rule language into structured rule
//! objects that can be compiled into a [`crate::RuleSet`].
//!
//! Supported directive form:
//!
//! ```text
//! SecRule TARGETS "OPERATOR" "actions"
//! ```
//!
//! with `#` comments and backslash line continuation.

use crate::{EngineError, Result};

/// Inspection target selected by a rule
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Variable {
    /// Request URI (path and query)
    RequestUri,

    /// Request method
    RequestMethod,

    /// Request body bytes
    RequestBody,

    /// All request header values
    RequestHeaders,

    /// Values of one named header (name compared case-insensitively)
    RequestHeader(String),
}

impl Variable {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "REQUEST_URI" => Ok(Self::RequestUri),
            "REQUEST_METHOD" => Ok(Self::RequestMethod),
            "REQUEST_BODY" => Ok(Self::RequestBody),
            "REQUEST_HEADERS" => Ok(Self::RequestHeaders),
            _ => {
                if let Some(name) = s.strip_prefix("REQUEST_HEADERS:") {
                    if name.is_empty() {
                        return Err(EngineError::InvalidRule(
                            "empty header selector".into(),
                        ));
                    }
                    Ok(Self::RequestHeader(name.to_ascii_lowercase()))
                } else {
                    Err(EngineError::InvalidRule(format!("unknown variable: {}", s)))
                }
            }
        }
    }
}

/// Rule operator, raw (uncompiled) form
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operator {
    /// Regular expression match (`@rx`, also the default for a bare pattern)
    Rx(String),

    /// Substring match (`@contains`)
    Contains(String),

    /// Prefix match (`@beginsWith`)
    BeginsWith(String),

    /// Suffix match (`@endsWith`)
    EndsWith(String),

    /// Exact string equality (`@streq`)
    Streq(String),

    /// Case-insensitive phrase match over a word list (`@pm`)
    Pm(Vec<String>),
}

/// Disruptive disposition requested by a rule's actions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Disposition {
    /// Match is recorded but request handling continues
    #[default]
    Pass,

    /// Deny the request with the configured status
    Deny,

    /// Drop the connection
    Drop,

    /// Block using the contextual default action
    Block,

    /// Stop processing the current phase, allowing the request
    Allow,
}

impl Disposition {
    /// Whether this disposition interrupts request handling
    pub fn is_disruptive(&self) -> bool {
        matches!(self, Self::Deny | Self::Drop | Self::Block)
    }
}

/// Rule severity levels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

impl Severity {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "0" | "EMERGENCY" => Some(Self::Emergency),
            "1" | "ALERT" => Some(Self::Alert),
            "2" | "CRITICAL" => Some(Self::Critical),
            "3" | "ERROR" => Some(Self::Error),
            "4" | "WARNING" => Some(Self::Warning),
            "5" | "NOTICE" => Some(Self::Notice),
            "6" | "INFO" => Some(Self::Info),
            "7" | "DEBUG" => Some(Self::Debug),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Emergency => "EMERGENCY",
            Self::Alert => "ALERT",
            Self::Critical => "CRITICAL",
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Notice => "NOTICE",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
        };
        write!(f, "{}", s)
    }
}

/// Input transformation applied before operator evaluation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transform {
    None,
    Lowercase,
}

/// Parsed rule actions
#[derive(Clone, Debug)]
pub struct RuleActions {
    /// Unique rule id (required)
    pub id: u32,

    /// Processing phase: 1 = request headers, 2 = request body
    pub phase: u8,

    /// Log message
    pub msg: Option<String>,

    /// Severity for logging
    pub severity: Option<Severity>,

    /// HTTP status used when the rule denies
    pub status: u16,

    /// Disruptive disposition
    pub disposition: Disposition,

    /// Whether a match is logged
    pub log: bool,

    /// Input transformations, applied in order
    pub transforms: Vec<Transform>,
}

impl Default for RuleActions {
    fn default() -> Self {
        Self {
            id: 0,
            phase: 2,
            msg: None,
            severity: None,
            status: 403,
            disposition: Disposition::default(),
            log: true,
            transforms: Vec::new(),
        }
    }
}

/// Parsed rule
#[derive(Clone, Debug)]
pub struct SecRule {
    /// Inspection targets, evaluated left to right
    pub targets: Vec<Variable>,

    /// Operator applied to each target value
    pub operator: Operator,

    /// Operator result is inverted
    pub negated: bool,

    /// Actions
    pub actions: RuleActions,

    /// Raw rule text
    pub raw: String,
}

/// SecLang rule parser
pub struct RuleParser {
    /// Parsed rules
    rules: Vec<SecRule>,

    /// Parse errors as (line, message)
    errors: Vec<(usize, String)>,
}

impl RuleParser {
    /// Create new parser
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Parse rules from file
    pub fn parse_file(&mut self, path: &std::path::Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content)
    }

    /// Parse rules from string
    ///
    /// Parsing is best-effort: a rule that fails to parse is recorded in
    /// [`RuleParser::errors`] and the remaining lines are still processed.
    /// Returns the total number of rules parsed so far.
    pub fn parse_content(&mut self, content: &str) -> Result<usize> {
        let mut rule_buffer = String::new();
        let mut line_num = 0;
        let mut start_line = 0;

        for line in content.lines() {
            line_num += 1;
            let trimmed = line.trim();

            // Skip comments and empty lines
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            // Handle line continuation
            if let Some(stripped) = trimmed.strip_suffix('\\') {
                if rule_buffer.is_empty() {
                    start_line = line_num;
                }
                rule_buffer.push_str(stripped);
                rule_buffer.push(' ');
                continue;
            }

            let full_rule = if rule_buffer.is_empty() {
                start_line = line_num;
                trimmed.to_string()
            } else {
                rule_buffer.push_str(trimmed);
                std::mem::take(&mut rule_buffer)
            };

            // Directives outside the supported subset are skipped, not errors
            if !full_rule.starts_with("SecRule ") {
                if full_rule.starts_with("Sec") {
                    tracing::debug!(line = start_line, "skipping unsupported directive");
                    continue;
                }
                self.errors
                    .push((start_line, format!("not a directive: {}", full_rule)));
                continue;
            }

            match self.parse_single_rule(&full_rule) {
                Ok(rule) => self.rules.push(rule),
                Err(e) => self.errors.push((start_line, e.to_string())),
            }
        }

        Ok(self.rules.len())
    }

    /// Parse a single `SecRule` directive
    pub fn parse_single_rule(&self, line: &str) -> Result<SecRule> {
        let parts = self.split_directive(line)?;
        if parts.len() != 4 {
            return Err(EngineError::InvalidRule(format!(
                "expected SecRule TARGETS \"OPERATOR\" \"actions\", got {} parts",
                parts.len()
            )));
        }

        let targets = parts[1]
            .split('|')
            .map(|t| Variable::parse(t.trim()))
            .collect::<Result<Vec<_>>>()?;
        if targets.is_empty() {
            return Err(EngineError::InvalidRule("no targets".into()));
        }

        let (operator, negated) = self.parse_operator(&parts[2])?;
        let actions = self.parse_actions(&parts[3])?;

        if actions.id == 0 {
            return Err(EngineError::InvalidRule("missing id action".into()));
        }

        Ok(SecRule {
            targets,
            operator,
            negated,
            actions,
            raw: line.to_string(),
        })
    }

    /// Split a directive into whitespace-separated parts, honoring double quotes
    fn split_directive(&self, line: &str) -> Result<Vec<String>> {
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut escape_next = false;

        for ch in line.chars() {
            if escape_next {
                // Only the quote needs escaping; keep other escapes verbatim
                // so regex patterns survive intact.
                if ch != '"' {
                    current.push('\\');
                }
                current.push(ch);
                escape_next = false;
                continue;
            }

            match ch {
                '\\' if in_quotes => escape_next = true,
                '"' => in_quotes = !in_quotes,
                c if c.is_whitespace() && !in_quotes => {
                    if !current.is_empty() {
                        parts.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            }
        }

        if in_quotes {
            return Err(EngineError::InvalidRule("unterminated quote".into()));
        }
        if !current.is_empty() {
            parts.push(current);
        }

        Ok(parts)
    }

    /// Parse the operator part, e.g. `@contains /admin` or a bare regex
    fn parse_operator(&self, s: &str) -> Result<(Operator, bool)> {
        let mut s = s.trim();
        let mut negated = false;

        if let Some(stripped) = s.strip_prefix('!') {
            negated = true;
            s = stripped.trim_start();
        }

        if !s.starts_with('@') {
            // Bare pattern defaults to a regex match
            return Ok((Operator::Rx(s.to_string()), negated));
        }

        let (name, arg) = match s.split_once(char::is_whitespace) {
            Some((n, a)) => (n, a.trim()),
            None => (s, ""),
        };

        let op = match name.to_ascii_lowercase().as_str() {
            "@rx" => Operator::Rx(arg.to_string()),
            "@contains" => Operator::Contains(arg.to_string()),
            "@beginswith" => Operator::BeginsWith(arg.to_string()),
            "@endswith" => Operator::EndsWith(arg.to_string()),
            "@streq" => Operator::Streq(arg.to_string()),
            "@pm" => {
                let words: Vec<String> =
                    arg.split_whitespace().map(|w| w.to_string()).collect();
                if words.is_empty() {
                    return Err(EngineError::InvalidRule("@pm with no phrases".into()));
                }
                Operator::Pm(words)
            }
            other => {
                return Err(EngineError::InvalidRule(format!(
                    "unsupported operator: {}",
                    other
                )))
            }
        };

        Ok((op, negated))
    }

    /// Parse the actions part, a comma-separated list of `key:value` or bare keys
    fn parse_actions(&self, s: &str) -> Result<RuleActions> {
        let mut actions = RuleActions::default();

        for item in self.split_actions(s) {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }

            let (key, value) = match item.split_once(':') {
                Some((k, v)) => (k.trim(), Some(v.trim().trim_matches('\''))),
                None => (item, None),
            };

            match key {
                "id" => {
                    let v = value
                        .ok_or_else(|| EngineError::InvalidRule("id without value".into()))?;
                    actions.id = v
                        .parse()
                        .map_err(|_| EngineError::InvalidRule(format!("bad id: {}", v)))?;
                }
                "phase" => {
                    let v = value
                        .ok_or_else(|| EngineError::InvalidRule("phase without value".into()))?;
                    actions.phase = match v {
                        "1" => 1,
                        "2" => 2,
                        other => {
                            return Err(EngineError::InvalidRule(format!(
                                "unsupported phase: {}",
                                other
                            )))
                        }
                    };
                }
                "msg" => actions.msg = value.map(|v| v.to_string()),
                "severity" => actions.severity = value.and_then(Severity::parse),
                "status" => {
                    if let Some(v) = value {
                        actions.status = v.parse().map_err(|_| {
                            EngineError::InvalidRule(format!("bad status: {}", v))
                        })?;
                    }
                }
                "deny" => actions.disposition = Disposition::Deny,
                "drop" => actions.disposition = Disposition::Drop,
                "block" => actions.disposition = Disposition::Block,
                "pass" => actions.disposition = Disposition::Pass,
                "allow" => actions.disposition = Disposition::Allow,
                "log" => actions.log = true,
                "nolog" => actions.log = false,
                "t" => match value {
                    Some("none") => actions.transforms.push(Transform::None),
                    Some("lowercase") => actions.transforms.push(Transform::Lowercase),
                    Some(other) => {
                        return Err(EngineError::InvalidRule(format!(
                            "unsupported transform: {}",
                            other
                        )))
                    }
                    None => {}
                },
                _ => {
                    tracing::debug!(action = key, "ignoring unsupported rule action");
                }
            }
        }

        Ok(actions)
    }

    /// Split actions on commas, respecting single-quoted values
    fn split_actions(&self, s: &str) -> Vec<String> {
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;

        for ch in s.chars() {
            match ch {
                '\'' => {
                    in_quotes = !in_quotes;
                    current.push(ch);
                }
                ',' if !in_quotes => {
                    if !current.trim().is_empty() {
                        parts.push(current.trim().to_string());
                    }
                    current.clear();
                }
                _ => current.push(ch),
            }
        }

        if !current.trim().is_empty() {
            parts.push(current.trim().to_string());
        }

        parts
    }

    /// Get parsed rules
    pub fn rules(&self) -> &[SecRule] {
        &self.rules
    }

    /// Get parse errors
    pub fn errors(&self) -> &[(usize, String)] {
        &self.errors
    }

    /// Take parsed rules
    pub fn into_rules(self) -> Vec<SecRule> {
        self.rules
    }
}

impl Default for RuleParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_rule() {
        let parser = RuleParser::new();

        let rule = parser
            .parse_single_rule(
                r#"SecRule REQUEST_URI "@beginsWith /admin" "id:1001,phase:1,deny,status:403,msg:'admin blocked'""#,
            )
            .unwrap();

        assert_eq!(rule.targets, vec![Variable::RequestUri]);
        assert_eq!(rule.operator, Operator::BeginsWith("/admin".into()));
        assert!(!rule.negated);
        assert_eq!(rule.actions.id, 1001);
        assert_eq!(rule.actions.phase, 1);
        assert_eq!(rule.actions.disposition, Disposition::Deny);
        assert_eq!(rule.actions.status, 403);
        assert_eq!(rule.actions.msg.as_deref(), Some("admin blocked"));
    }

    #[test]
    fn test_parse_default_rx_operator() {
        let parser = RuleParser::new();

        let rule = parser
            .parse_single_rule(r#"SecRule REQUEST_BODY "union\s+select" "id:2,phase:2,deny""#)
            .unwrap();

        assert_eq!(rule.operator, Operator::Rx(r"union\s+select".into()));
        assert_eq!(rule.actions.phase, 2);
    }

    #[test]
    fn test_parse_multiple_targets_and_negation() {
        let parser = RuleParser::new();

        let rule = parser
            .parse_single_rule(
                r#"SecRule REQUEST_URI|REQUEST_HEADERS:User-Agent "!@contains safe" "id:3,phase:1,pass,nolog""#,
            )
            .unwrap();

        assert_eq!(
            rule.targets,
            vec![
                Variable::RequestUri,
                Variable::RequestHeader("user-agent".into())
            ]
        );
        assert!(rule.negated);
        assert!(!rule.actions.log);
        assert_eq!(rule.actions.disposition, Disposition::Pass);
    }

    #[test]
    fn test_parse_pm_operator() {
        let parser = RuleParser::new();

        let rule = parser
            .parse_single_rule(r#"SecRule REQUEST_BODY "@pm exec eval system" "id:4,deny""#)
            .unwrap();

        match &rule.operator {
            Operator::Pm(words) => assert_eq!(words.len(), 3),
            other => panic!("expected Pm, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_id_rejected() {
        let parser = RuleParser::new();

        let err = parser
            .parse_single_rule(r#"SecRule REQUEST_URI "@contains x" "phase:1,deny""#)
            .unwrap_err();
        assert!(err.to_string().contains("missing id"));
    }

    #[test]
    fn test_parse_content_best_effort() {
        let mut parser = RuleParser::new();

        let text = r#"
# comment
SecRuleEngine On
SecRule REQUEST_URI "@contains /a" "id:10,phase:1,deny"
SecRule REQUEST_URI "@bogus x" "id:11,phase:1,deny"
SecRule REQUEST_URI \
    "@contains /b" \
    "id:12,phase:1,deny"
"#;

        let count = parser.parse_content(text).unwrap();
        assert_eq!(count, 2);
        assert_eq!(parser.errors().len(), 1);
        assert_eq!(parser.rules()[1].actions.id, 12);
    }
}
