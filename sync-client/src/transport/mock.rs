//! Mock transport for testing.
//!
//! Captures sent messages and file sends for verification and lets tests
//! inject failures.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use sync_types::{Message, PeerId};

/// Something the orchestrator handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    /// A protocol message.
    Message(PeerId, Message),
    /// A file send.
    File(PeerId, PathBuf),
}

/// Mock transport for testing.
///
/// Clones share state, so a test can keep one handle while the
/// orchestrator owns another.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    disconnected: bool,
    sent: Vec<Sent>,
    fail_next_message: Option<String>,
    fail_next_file: Option<String>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far, in order.
    pub fn sent(&self) -> Vec<Sent> {
        let inner = self.inner.lock().unwrap();
        inner.sent.clone()
    }

    /// Protocol messages sent so far, in order.
    pub fn sent_messages(&self) -> Vec<Message> {
        let inner = self.inner.lock().unwrap();
        inner
            .sent
            .iter()
            .filter_map(|s| match s {
                Sent::Message(_, m) => Some(m.clone()),
                Sent::File(..) => None,
            })
            .collect()
    }

    /// Files sent so far, in order.
    pub fn sent_files(&self) -> Vec<PathBuf> {
        let inner = self.inner.lock().unwrap();
        inner
            .sent
            .iter()
            .filter_map(|s| match s {
                Sent::File(_, p) => Some(p.clone()),
                Sent::Message(..) => None,
            })
            .collect()
    }

    /// Get the last message that was sent.
    pub fn last_message(&self) -> Option<Message> {
        self.sent_messages().pop()
    }

    /// Cause the next send_message() to fail with the given error.
    pub fn fail_next_message(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_message = Some(error.to_string());
    }

    /// Cause the next send_file() to fail with the given error.
    pub fn fail_next_file(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_file = Some(error.to_string());
    }

    /// Make every following send report a lost peer.
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.disconnected = true;
    }

    /// Clear all state (sent items, failures, connection).
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = MockTransportInner::default();
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_message(&self, peer: &PeerId, message: &Message) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();

        if inner.disconnected {
            return Err(TransportError::PeerDisconnected(peer.clone()));
        }

        // Check for forced failure
        if let Some(error) = inner.fail_next_message.take() {
            return Err(TransportError::SendFailed(error));
        }

        inner.sent.push(Sent::Message(peer.clone(), message.clone()));
        Ok(())
    }

    async fn send_file(&self, peer: &PeerId, path: &Path) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();

        if inner.disconnected {
            return Err(TransportError::PeerDisconnected(peer.clone()));
        }

        // Check for forced failure
        if let Some(error) = inner.fail_next_file.take() {
            return Err(TransportError::SendFailed(error));
        }

        inner.sent.push(Sent::File(peer.clone(), path.to_path_buf()));
        Ok(())
    }
}
