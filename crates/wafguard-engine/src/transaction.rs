//! Inspection Transaction
//!
//! Per-request inspection state. A transaction is fed the request pieces
//! in a fixed sequence, runs phased rule evaluation, and is queried for an
//! intervention verdict at the end:
//!
//! 1. `add_request_header` for each header, in request order
//! 2. `append_request_body`
//! 3. `process_connection`
//! 4. `process_uri`
//! 5. `process_request_headers` (phase 1 rules)
//! 6. `process_request_body` (phase 2 rules)
//! 7. `process_logging`
//! 8. `intervention`
//!
//! A transaction is not thread-safe and is expected to live on a single
//! thread for its whole life. All resources are released on drop.

use crate::engine::Engine;
use crate::parser::{Disposition, Severity, Transform, Variable};
use crate::rules::{CompiledRule, RuleSet};
use crate::{EngineError, Result};
use std::borrow::Cow;

/// Disruptive outcome of a transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Intervention {
    /// HTTP status the embedding runtime should respond with
    pub status: u16,

    /// Whether request handling must be interrupted
    pub disruptive: bool,

    /// Log line describing the triggering rule
    pub log: Option<String>,
}

/// One rule match recorded during processing
#[derive(Clone, Debug)]
pub struct MatchedRule {
    pub id: u32,
    pub phase: u8,
    pub msg: Option<String>,
    pub severity: Option<Severity>,
    pub disruptive: bool,
    pub log: bool,
}

/// Remote/local endpoint metadata fed to the transaction
#[derive(Clone, Debug)]
struct ConnectionInfo {
    client_addr: String,
    client_port: u16,
    server_addr: String,
    server_port: u16,
}

/// Per-request inspection transaction
pub struct Transaction<'e> {
    engine: &'e Engine,
    rules: &'e RuleSet,

    connection: Option<ConnectionInfo>,
    uri: Vec<u8>,
    method: String,
    headers: Vec<(Vec<u8>, Vec<u8>)>,
    body: Vec<u8>,

    matched: Vec<MatchedRule>,
    intervention: Option<Intervention>,
}

impl<'e> Transaction<'e> {
    pub(crate) fn new(engine: &'e Engine, rules: &'e RuleSet) -> Self {
        Self {
            engine,
            rules,
            connection: None,
            uri: Vec::new(),
            method: String::new(),
            headers: Vec::new(),
            body: Vec::new(),
            matched: Vec::new(),
            intervention: None,
        }
    }

    /// Register one request header, preserving request order
    ///
    /// Fails if the name is empty or if name/value contain a NUL byte;
    /// the header is not registered in that case.
    pub fn add_request_header(&mut self, name: &[u8], value: &[u8]) -> Result<()> {
        if name.is_empty() {
            return Err(EngineError::InvalidHeader("empty header name".into()));
        }
        if memchr::memchr(0, name).is_some() || memchr::memchr(0, value).is_some() {
            return Err(EngineError::InvalidHeader(format!(
                "NUL byte in header {}",
                String::from_utf8_lossy(name)
            )));
        }
        self.headers.push((name.to_vec(), value.to_vec()));
        Ok(())
    }

    /// Append a chunk to the request body buffer
    pub fn append_request_body(&mut self, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
    }

    /// Feed connection endpoint metadata
    pub fn process_connection(
        &mut self,
        client_addr: &str,
        client_port: u16,
        server_addr: &str,
        server_port: u16,
    ) {
        self.connection = Some(ConnectionInfo {
            client_addr: client_addr.to_string(),
            client_port,
            server_addr: server_addr.to_string(),
            server_port,
        });
    }

    /// Feed the request line
    ///
    /// Fails if the URI is empty or contains a NUL byte.
    pub fn process_uri(&mut self, uri: &[u8], method: &str, _http_version: &str) -> Result<()> {
        if uri.is_empty() {
            return Err(EngineError::InvalidUri("empty uri".into()));
        }
        if memchr::memchr(0, uri).is_some() {
            return Err(EngineError::InvalidUri("NUL byte in uri".into()));
        }
        self.uri = uri.to_vec();
        self.method = method.to_string();
        Ok(())
    }

    /// Run phase 1 rules (request line and headers)
    pub fn process_request_headers(&mut self) {
        self.run_phase(1);
    }

    /// Run phase 2 rules (request body)
    pub fn process_request_body(&mut self) {
        self.run_phase(2);
    }

    /// Emit one audit log line per logged rule match
    pub fn process_logging(&self) {
        for m in self.matched.iter().filter(|m| m.log) {
            let client = self
                .connection
                .as_ref()
                .map(|c| format!("{}:{}", c.client_addr, c.client_port))
                .unwrap_or_else(|| "-".into());
            let severity = m
                .severity
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".into());
            let line = format!(
                "client {} uri {} rule {} severity {} {}",
                client,
                String::from_utf8_lossy(&self.uri),
                m.id,
                severity,
                m.msg.as_deref().unwrap_or(""),
            );
            self.engine.log(line.trim_end());
        }
    }

    /// Disruptive verdict, if any rule triggered one
    pub fn intervention(&self) -> Option<&Intervention> {
        self.intervention.as_ref()
    }

    /// Rules that matched during processing, in evaluation order
    pub fn matched_rules(&self) -> &[MatchedRule] {
        &self.matched
    }

    fn run_phase(&mut self, phase: u8) {
        // A disruptive match from an earlier phase ends evaluation.
        if self.intervention.is_some() {
            return;
        }

        let mut matched = Vec::new();
        let mut intervention = None;

        for compiled in self.rules.phase_rules(phase) {
            if self.rule_matches(compiled) {
                let actions = &compiled.rule.actions;
                matched.push(MatchedRule {
                    id: actions.id,
                    phase: actions.phase,
                    msg: actions.msg.clone(),
                    severity: actions.severity,
                    disruptive: actions.disposition.is_disruptive(),
                    log: actions.log,
                });

                if actions.disposition == Disposition::Allow {
                    break;
                }

                if actions.disposition.is_disruptive() {
                    intervention = Some(Intervention {
                        status: actions.status,
                        disruptive: true,
                        log: actions.msg.clone(),
                    });
                    break;
                }
            }
        }

        self.matched.extend(matched);
        if let Some(iv) = intervention {
            tracing::debug!(status = iv.status, phase, "intervention triggered");
            self.engine.record_intervention();
            self.intervention = Some(iv);
        }
    }

    /// A rule matches when its operator holds for any target value,
    /// honoring negation. Absent targets contribute no values.
    fn rule_matches(&self, compiled: &CompiledRule) -> bool {
        let rule = &compiled.rule;
        for target in &rule.targets {
            for value in self.target_values(target) {
                let value = apply_transforms(&rule.actions.transforms, value);
                if compiled.op.matches(&value) != rule.negated {
                    return true;
                }
            }
        }
        false
    }

    fn target_values<'a>(&'a self, target: &'a Variable) -> Vec<Cow<'a, [u8]>> {
        match target {
            Variable::RequestUri => vec![Cow::Borrowed(self.uri.as_slice())],
            Variable::RequestMethod => vec![Cow::Borrowed(self.method.as_bytes())],
            Variable::RequestBody => vec![Cow::Borrowed(self.body.as_slice())],
            Variable::RequestHeaders => self
                .headers
                .iter()
                .map(|(_, v)| Cow::Borrowed(v.as_slice()))
                .collect(),
            Variable::RequestHeader(name) => self
                .headers
                .iter()
                .filter(|(n, _)| n.eq_ignore_ascii_case(name.as_bytes()))
                .map(|(_, v)| Cow::Borrowed(v.as_slice()))
                .collect(),
        }
    }
}

fn apply_transforms<'a>(transforms: &[Transform], value: Cow<'a, [u8]>) -> Cow<'a, [u8]> {
    let mut value = value;
    for t in transforms {
        match t {
            Transform::None => {}
            Transform::Lowercase => {
                value = Cow::Owned(value.to_ascii_lowercase());
            }
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ruleset(text: &str) -> RuleSet {
        let mut rules = RuleSet::new();
        rules.add_rules(text);
        rules
    }

    fn run_pipeline(tx: &mut Transaction<'_>, uri: &[u8], body: &[u8]) {
        tx.append_request_body(body);
        tx.process_connection("127.0.0.1", 80, "127.0.0.1", 80);
        tx.process_uri(uri, "GET", "1.1").unwrap();
        tx.process_request_headers();
        tx.process_request_body();
        tx.process_logging();
    }

    #[test]
    fn test_empty_ruleset_allows() {
        let engine = Engine::new();
        let rules = RuleSet::new();

        let mut tx = engine.new_transaction(&rules);
        tx.add_request_header(b"Host", b"example.com").unwrap();
        run_pipeline(&mut tx, b"/index.html", b"");

        assert!(tx.intervention().is_none());
    }

    #[test]
    fn test_uri_rule_blocks() {
        let engine = Engine::new();
        let rules = ruleset(
            r#"SecRule REQUEST_URI "@beginsWith /admin" "id:1,phase:1,deny,status:403,msg:'admin blocked'""#,
        );

        let mut tx = engine.new_transaction(&rules);
        run_pipeline(&mut tx, b"/admin", b"");

        let iv = tx.intervention().expect("expected intervention");
        assert!(iv.disruptive);
        assert_eq!(iv.status, 403);
        assert_eq!(iv.log.as_deref(), Some("admin blocked"));
    }

    #[test]
    fn test_body_rule_runs_in_phase_two() {
        let engine = Engine::new();
        let rules = ruleset(r#"SecRule REQUEST_BODY "@contains attack" "id:2,phase:2,deny""#);

        let mut tx = engine.new_transaction(&rules);
        tx.append_request_body(b"an attack payload");
        tx.process_uri(b"/ok", "POST", "1.1").unwrap();
        tx.process_request_headers();
        assert!(tx.intervention().is_none());

        tx.process_request_body();
        assert!(tx.intervention().is_some());
    }

    #[test]
    fn test_header_selector_is_case_insensitive() {
        let engine = Engine::new();
        let rules = ruleset(
            r#"SecRule REQUEST_HEADERS:User-Agent "@contains curl" "id:3,phase:1,deny""#,
        );

        let mut tx = engine.new_transaction(&rules);
        tx.add_request_header(b"USER-AGENT", b"curl/8.0").unwrap();
        run_pipeline(&mut tx, b"/", b"");

        assert!(tx.intervention().is_some());
    }

    #[test]
    fn test_first_disruptive_match_wins() {
        let engine = Engine::new();
        let rules = ruleset(
            r#"
SecRule REQUEST_URI "@contains /x" "id:10,phase:1,deny,status:403"
SecRule REQUEST_URI "@contains /x" "id:11,phase:1,deny,status:500"
"#,
        );

        let mut tx = engine.new_transaction(&rules);
        run_pipeline(&mut tx, b"/x", b"");

        assert_eq!(tx.intervention().unwrap().status, 403);
        assert_eq!(tx.matched_rules().len(), 1);
    }

    #[test]
    fn test_allow_short_circuits_phase() {
        let engine = Engine::new();
        let rules = ruleset(
            r#"
SecRule REQUEST_URI "@beginsWith /health" "id:20,phase:1,allow,nolog"
SecRule REQUEST_URI "@contains /health" "id:21,phase:1,deny"
"#,
        );

        let mut tx = engine.new_transaction(&rules);
        run_pipeline(&mut tx, b"/health", b"");

        assert!(tx.intervention().is_none());
    }

    #[test]
    fn test_negated_operator() {
        let engine = Engine::new();
        let rules = ruleset(
            r#"SecRule REQUEST_HEADERS:X-Api-Key "!@streq secret" "id:30,phase:1,deny""#,
        );

        let mut tx = engine.new_transaction(&rules);
        tx.add_request_header(b"X-Api-Key", b"wrong").unwrap();
        run_pipeline(&mut tx, b"/", b"");
        assert!(tx.intervention().is_some());

        let mut tx = engine.new_transaction(&rules);
        tx.add_request_header(b"X-Api-Key", b"secret").unwrap();
        run_pipeline(&mut tx, b"/", b"");
        assert!(tx.intervention().is_none());
    }

    #[test]
    fn test_lowercase_transform() {
        let engine = Engine::new();
        let rules = ruleset(
            r#"SecRule REQUEST_URI "@contains /admin" "id:40,phase:1,deny,t:lowercase""#,
        );

        let mut tx = engine.new_transaction(&rules);
        run_pipeline(&mut tx, b"/ADMIN/panel", b"");

        assert!(tx.intervention().is_some());
    }

    #[test]
    fn test_invalid_header_rejected() {
        let engine = Engine::new();
        let rules = RuleSet::new();

        let mut tx = engine.new_transaction(&rules);
        assert!(tx.add_request_header(b"", b"x").is_err());
        assert!(tx.add_request_header(b"Na\0me", b"x").is_err());
        assert!(tx.add_request_header(b"Name", b"val\0ue").is_err());
        assert!(tx.add_request_header(b"Name", b"value").is_ok());
    }

    #[test]
    fn test_invalid_uri_rejected() {
        let engine = Engine::new();
        let rules = RuleSet::new();

        let mut tx = engine.new_transaction(&rules);
        assert!(tx.process_uri(b"", "GET", "1.1").is_err());
        assert!(tx.process_uri(b"/a\0b", "GET", "1.1").is_err());
    }

    #[test]
    fn test_logging_uses_engine_sink() {
        use std::sync::{Arc, Mutex};

        let lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();

        let mut engine = Engine::new();
        engine.set_log_callback(Box::new(move |msg| {
            sink.lock().unwrap().push(msg.to_string());
        }));

        let rules = ruleset(
            r#"SecRule REQUEST_URI "@contains /admin" "id:50,phase:1,deny,msg:'admin blocked'""#,
        );
        let mut tx = engine.new_transaction(&rules);
        run_pipeline(&mut tx, b"/admin", b"");

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("rule 50"));
        assert!(lines[0].contains("admin blocked"));
    }
}
