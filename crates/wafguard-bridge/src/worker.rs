//! Worker Loop
//!
//! The single dedicated thread of one context. Pops tasks forever,
//! runs the blocking inspection pipeline for each check, and exits on
//! the shutdown task. The engine and rule set are moved into this thread
//! at context creation and are never touched from anywhere else, so the
//! engine needs no locking and is never invoked concurrently.

use crate::context::{BridgeStats, ConnectionConfig};
use crate::queue::TaskQueue;
use crate::task::{CheckReply, CorrelationToken, RequestSnapshot, Task};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use wafguard_engine::{Engine, RuleSet};

pub(crate) fn run(
    queue: Arc<TaskQueue>,
    engine: Engine,
    rules: RuleSet,
    connection: ConnectionConfig,
    stats: Arc<BridgeStats>,
) {
    tracing::debug!("inspection worker started");

    loop {
        match queue.pop() {
            Task::Shutdown => {
                tracing::debug!("inspection worker stopping");
                break;
            }
            Task::Check {
                token,
                reply_to,
                request,
            } => {
                let reply = run_check(&engine, &rules, &connection, token, &request);

                stats.checks.fetch_add(1, Ordering::Relaxed);
                match &reply {
                    CheckReply::Allowed { .. } => stats.allowed.fetch_add(1, Ordering::Relaxed),
                    CheckReply::Blocked { .. } => stats.blocked.fetch_add(1, Ordering::Relaxed),
                    CheckReply::Error { .. } => stats.errored.fetch_add(1, Ordering::Relaxed),
                };

                // A closed reply channel means the caller went away; the
                // verdict is dropped, never the worker.
                if reply_to.send(reply).is_err() {
                    tracing::warn!(%token, "reply channel closed, dropping verdict");
                }
            }
        }
    }
}

/// Run one inspection against the context's engine and rule set
///
/// Every check produces exactly one reply. The fixed call sequence
/// matters: the transaction is stateful and the phases build on the
/// request pieces fed before them. Transaction resources are released on
/// every exit path when it drops.
fn run_check(
    engine: &Engine,
    rules: &RuleSet,
    connection: &ConnectionConfig,
    token: CorrelationToken,
    request: &RequestSnapshot,
) -> CheckReply {
    let mut tx = engine.new_transaction(rules);

    for (name, value) in &request.headers {
        if let Err(e) = tx.add_request_header(name, value) {
            tracing::debug!(%token, error = %e, "aborting check on malformed header");
            return CheckReply::Error {
                token,
                reason: e.to_string(),
            };
        }
    }

    tx.append_request_body(&request.body);
    tx.process_connection(
        &connection.client_addr,
        connection.client_port,
        &connection.server_addr,
        connection.server_port,
    );
    if let Err(e) = tx.process_uri(&request.uri, &connection.method, &connection.http_version) {
        // Snapshot capture validates the URI, so this only fires if the
        // engine tightens its rules beyond the capture check.
        return CheckReply::Error {
            token,
            reason: e.to_string(),
        };
    }
    tx.process_request_headers();
    tx.process_request_body();
    tx.process_logging();

    let blocked = tx.intervention().is_some_and(|iv| iv.disruptive);
    if blocked {
        CheckReply::Blocked { token }
    } else {
        CheckReply::Allowed { token }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(uri: &[u8], headers: &[(&[u8], &[u8])], body: &[u8]) -> RequestSnapshot {
        RequestSnapshot::capture(uri, headers, body).unwrap()
    }

    #[test]
    fn test_run_check_allowed() {
        let engine = Engine::new();
        let rules = RuleSet::new();
        let token = CorrelationToken::new();

        let reply = run_check(
            &engine,
            &rules,
            &ConnectionConfig::default(),
            token,
            &snapshot(b"/index.html", &[(b"Host", b"example.com")], b""),
        );

        assert_eq!(reply, CheckReply::Allowed { token });
    }

    #[test]
    fn test_run_check_blocked() {
        let engine = Engine::new();
        let mut rules = RuleSet::new();
        rules.add_rules(r#"SecRule REQUEST_URI "@beginsWith /admin" "id:1,phase:1,deny""#);
        let token = CorrelationToken::new();

        let no_headers: &[(&[u8], &[u8])] = &[];
        let reply = run_check(
            &engine,
            &rules,
            &ConnectionConfig::default(),
            token,
            &snapshot(b"/admin", no_headers, b""),
        );

        assert_eq!(reply, CheckReply::Blocked { token });
    }

    #[test]
    fn test_run_check_malformed_header() {
        let engine = Engine::new();
        let rules = RuleSet::new();
        let token = CorrelationToken::new();

        let reply = run_check(
            &engine,
            &rules,
            &ConnectionConfig::default(),
            token,
            &snapshot(b"/", &[(b"", b"value")], b""),
        );

        match reply {
            CheckReply::Error { token: t, reason } => {
                assert_eq!(t, token);
                assert!(reason.contains("header"));
            }
            other => panic!("expected error reply, got {:?}", other),
        }
    }
}
