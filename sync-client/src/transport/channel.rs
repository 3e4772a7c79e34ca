//! In-process transport over tokio channels.
//!
//! [`ChannelTransport::pair`] wires two endpoints back to back: whatever one
//! side sends arrives as [`Inbound`] frames on the other side's receiver.
//! Used for loopback syncs between two local folders and for end-to-end
//! tests of two orchestrators.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sync_types::{Message, PeerId};
use tokio::sync::mpsc;

use super::{Inbound, Transport, TransportError};

/// Default bound on reading a file for sending.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// One end of an in-process link.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    local: PeerId,
    remote: PeerId,
    outbox: mpsc::UnboundedSender<Inbound>,
    send_timeout: Duration,
}

impl ChannelTransport {
    /// Create two connected endpoints.
    ///
    /// Returns `(a, a_inbound)` and `(b, b_inbound)`: frames sent by `a`
    /// arrive on `b_inbound` and vice versa.
    #[allow(clippy::type_complexity)]
    pub fn pair(
        a: PeerId,
        b: PeerId,
    ) -> (
        (Self, mpsc::UnboundedReceiver<Inbound>),
        (Self, mpsc::UnboundedReceiver<Inbound>),
    ) {
        let (to_a, a_rx) = mpsc::unbounded_channel();
        let (to_b, b_rx) = mpsc::unbounded_channel();

        let a_end = Self {
            local: a.clone(),
            remote: b.clone(),
            outbox: to_b,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        };
        let b_end = Self {
            local: b,
            remote: a,
            outbox: to_a,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        };
        ((a_end, a_rx), (b_end, b_rx))
    }

    /// Set the bound on reading a file for `send_file`.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// This endpoint's identity.
    pub fn local(&self) -> &PeerId {
        &self.local
    }

    /// The peer at the other end.
    pub fn remote(&self) -> &PeerId {
        &self.remote
    }

    /// Tell the other side this endpoint went away.
    pub fn disconnect(&self) {
        let _ = self.outbox.send(Inbound::Disconnected {
            peer: self.local.clone(),
        });
    }

    fn check_peer(&self, peer: &PeerId) -> Result<(), TransportError> {
        if peer != &self.remote {
            return Err(TransportError::NotConnected(peer.clone()));
        }
        if self.outbox.is_closed() {
            return Err(TransportError::PeerDisconnected(peer.clone()));
        }
        Ok(())
    }

    fn deliver(&self, frame: Inbound) -> Result<(), TransportError> {
        self.outbox
            .send(frame)
            .map_err(|_| TransportError::PeerDisconnected(self.remote.clone()))
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send_message(&self, peer: &PeerId, message: &Message) -> Result<(), TransportError> {
        self.check_peer(peer)?;
        let bytes = message.to_bytes()?;
        tracing::trace!("{} -> {}: {}", self.local, peer, message.kind());
        self.deliver(Inbound::Message {
            peer: self.local.clone(),
            bytes,
        })
    }

    async fn send_file(&self, peer: &PeerId, path: &Path) -> Result<(), TransportError> {
        self.check_peer(peer)?;

        let bytes = match tokio::time::timeout(self.send_timeout, tokio::fs::read(path)).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                return Err(TransportError::SendFailed(format!(
                    "{}: {}",
                    path.display(),
                    e
                )))
            }
            Err(_) => return Err(TransportError::Timeout),
        };

        tracing::trace!("{} -> {}: {} bytes", self.local, peer, bytes.len());
        self.deliver(Inbound::File {
            peer: self.local.clone(),
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_types::{SessionId, SessionRef};

    fn peers() -> (PeerId, PeerId) {
        (PeerId::new("alice"), PeerId::new("bob"))
    }

    #[tokio::test]
    async fn message_arrives_on_other_side() {
        let (a, b) = peers();
        let ((alice, _alice_rx), (_bob, mut bob_rx)) = ChannelTransport::pair(a.clone(), b.clone());
        let message = Message::SyncPaused(SessionRef::new(SessionId::new()));

        alice.send_message(&b, &message).await.unwrap();

        match bob_rx.recv().await.unwrap() {
            Inbound::Message { peer, bytes } => {
                assert_eq!(peer, a);
                assert_eq!(Message::from_bytes(&bytes).unwrap(), message);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn file_content_is_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();

        let (a, b) = peers();
        let ((alice, _), (_, mut bob_rx)) = ChannelTransport::pair(a, b.clone());
        alice.send_file(&b, &path).await.unwrap();

        assert!(matches!(
            bob_rx.recv().await.unwrap(),
            Inbound::File { bytes, .. } if bytes == b"hello"
        ));
    }

    #[tokio::test]
    async fn missing_file_is_a_send_failure() {
        let (a, b) = peers();
        let ((alice, _), _bob) = ChannelTransport::pair(a, b.clone());
        let err = alice
            .send_file(&b, Path::new("/definitely/not/here"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::SendFailed(_)));
    }

    #[tokio::test]
    async fn unknown_peer_is_not_connected() {
        let (a, b) = peers();
        let ((alice, _), _bob) = ChannelTransport::pair(a, b);
        let message = Message::SyncPaused(SessionRef::new(SessionId::new()));
        let err = alice
            .send_message(&PeerId::new("carol"), &message)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConnected(_)));
    }

    #[tokio::test]
    async fn dropped_receiver_means_disconnected() {
        let (a, b) = peers();
        let ((alice, _), (_bob, bob_rx)) = ChannelTransport::pair(a, b.clone());
        drop(bob_rx);

        let message = Message::SyncPaused(SessionRef::new(SessionId::new()));
        let err = alice.send_message(&b, &message).await.unwrap_err();
        assert!(matches!(err, TransportError::PeerDisconnected(_)));
    }

    #[tokio::test]
    async fn disconnect_notifies_peer() {
        let (a, b) = peers();
        let ((alice, _), (_bob, mut bob_rx)) = ChannelTransport::pair(a.clone(), b);
        alice.disconnect();
        assert_eq!(
            bob_rx.recv().await.unwrap(),
            Inbound::Disconnected { peer: a }
        );
    }
}
