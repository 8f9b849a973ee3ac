//! Task model
//!
//! A [`Task`] is the unit of work handed from a producer to the worker
//! thread. Construction deep-copies every caller-supplied byte into
//! storage owned solely by the task, so the producer and the worker never
//! share a view of the same buffer: the producer may continue or be torn
//! down immediately after submission while the task stays valid until the
//! worker disposes of it.

use crate::{BridgeError, Result};
use uuid::Uuid;

/// Caller-supplied opaque token echoed unchanged in the reply, so the
/// caller can match replies to requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CorrelationToken(Uuid);

impl CorrelationToken {
    /// Generate a fresh random token
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for CorrelationToken {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Verdict message delivered asynchronously to the reply channel
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckReply {
    /// No rule triggered a disruptive action
    Allowed { token: CorrelationToken },

    /// A disruptive rule matched
    Blocked { token: CorrelationToken },

    /// Inspection was aborted, e.g. on a malformed header entry
    Error {
        token: CorrelationToken,
        reason: String,
    },
}

impl CheckReply {
    /// Correlation token this reply echoes
    pub fn token(&self) -> CorrelationToken {
        match self {
            Self::Allowed { token } | Self::Blocked { token } | Self::Error { token, .. } => {
                *token
            }
        }
    }
}

/// Destination for asynchronous verdict messages
pub type ReplySender = tokio::sync::mpsc::UnboundedSender<CheckReply>;

/// Independently-owned copy of the request pieces under inspection
#[derive(Clone, Debug)]
pub struct RequestSnapshot {
    /// Request URI bytes
    pub uri: Vec<u8>,

    /// Headers in the caller's original order; duplicate names allowed
    pub headers: Vec<(Vec<u8>, Vec<u8>)>,

    /// Request body bytes
    pub body: Vec<u8>,
}

impl RequestSnapshot {
    /// Deep-copy the caller's buffers into an owned snapshot
    ///
    /// Construction is all-or-nothing: a URI that is empty or contains a
    /// NUL byte is rejected here, synchronously, and nothing is enqueued.
    /// Malformed header entries are deliberately not rejected here; they
    /// surface later as an error reply from the worker.
    pub fn capture<N, V>(uri: &[u8], headers: &[(N, V)], body: &[u8]) -> Result<Self>
    where
        N: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        if uri.is_empty() {
            return Err(BridgeError::MalformedRequest("empty uri".into()));
        }
        if uri.contains(&0) {
            return Err(BridgeError::MalformedRequest("NUL byte in uri".into()));
        }

        Ok(Self {
            uri: uri.to_vec(),
            headers: headers
                .iter()
                .map(|(n, v)| (n.as_ref().to_vec(), v.as_ref().to_vec()))
                .collect(),
            body: body.to_vec(),
        })
    }
}

/// Unit of work for the worker thread
///
/// Once pushed, ownership passes entirely to the worker; the producer
/// holds no reference to the snapshot.
#[derive(Debug)]
pub enum Task {
    /// Inspect one request and reply with the verdict
    Check {
        token: CorrelationToken,
        reply_to: ReplySender,
        request: RequestSnapshot,
    },

    /// Stop the worker loop; carries no payload
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_copies_bytes() {
        let mut uri = b"/index.html".to_vec();
        let headers = vec![(b"Host".to_vec(), b"example.com".to_vec())];

        let snapshot = RequestSnapshot::capture(&uri, &headers, b"body").unwrap();

        // Mutating the source buffers must not affect the snapshot.
        uri.clear();
        assert_eq!(snapshot.uri, b"/index.html");
        assert_eq!(snapshot.headers.len(), 1);
        assert_eq!(snapshot.body, b"body");
    }

    #[test]
    fn test_capture_rejects_bad_uri() {
        let headers: Vec<(&[u8], &[u8])> = Vec::new();

        assert!(matches!(
            RequestSnapshot::capture(b"", &headers, b""),
            Err(BridgeError::MalformedRequest(_))
        ));
        assert!(matches!(
            RequestSnapshot::capture(b"/a\0b", &headers, b""),
            Err(BridgeError::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_reply_token_echo() {
        let token = CorrelationToken::new();
        assert_eq!(CheckReply::Allowed { token }.token(), token);
        assert_eq!(
            CheckReply::Error {
                token,
                reason: "x".into()
            }
            .token(),
            token
        );
    }
}
