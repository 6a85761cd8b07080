//! Per-session packet bridge between the client and upstream handlers.
//!
//! Each accepted client connection gets one bridge: two FIFO channels
//! (`toward_server` for client packets, `toward_client` for server packets)
//! and a shutdown signal either side can raise. The two session tasks share
//! nothing else.
//!
//! Teardown has two layers. Dropping an end closes its channel halves, so a
//! peer blocked on a channel operation returns immediately; the broadcast
//! shutdown signal additionally wakes a peer blocked on socket I/O. Both
//! ends raise the signal on drop, so teardown fires no matter how a task
//! exits.

use tokio::sync::{broadcast, mpsc};

use crate::error::{ProxyError, Result};
use crate::protocol::Packet;

/// Builder for the two connected bridge ends of one session.
pub struct SessionBridge;

impl SessionBridge {
    /// Create a bridge with the given per-direction channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> (ClientEnd, UpstreamEnd) {
        let (toward_server_tx, toward_server_rx) = mpsc::channel(capacity);
        let (toward_client_tx, toward_client_rx) = mpsc::channel(capacity);
        let (shutdown_tx, _) = broadcast::channel(1);

        let client = ClientEnd {
            toward_server: toward_server_tx,
            toward_client: toward_client_rx,
            shutdown: shutdown_tx.subscribe(),
            shutdown_tx: shutdown_tx.clone(),
        };
        let upstream = UpstreamEnd {
            toward_server: toward_server_rx,
            toward_client: toward_client_tx,
            shutdown: shutdown_tx.subscribe(),
            shutdown_tx,
        };
        (client, upstream)
    }
}

/// Bridge end held by the client-facing pump.
pub struct ClientEnd {
    toward_server: mpsc::Sender<Packet>,
    toward_client: mpsc::Receiver<Packet>,
    shutdown: broadcast::Receiver<()>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ClientEnd {
    /// Queue a client packet for the upstream handler.
    pub async fn send_toward_server(&self, packet: Packet) -> Result<()> {
        self.toward_server
            .send(packet)
            .await
            .map_err(|_| ProxyError::BridgeClosed)
    }

    /// Wait for the next packet destined for the client, or for teardown.
    ///
    /// Biased toward the packet channel: packets queued before teardown
    /// was raised still drain to the client, so a final auth rejection or
    /// synthesized error is never discarded. The signal is honored once
    /// the channel is empty.
    pub async fn recv_toward_client(&mut self) -> Result<Packet> {
        tokio::select! {
            biased;
            packet = self.toward_client.recv() => packet.ok_or(ProxyError::BridgeClosed),
            _ = self.shutdown.recv() => Err(ProxyError::Shutdown),
        }
    }

    /// Raise the session-wide teardown signal.
    pub fn trigger_teardown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Resolves when the peer raises teardown.
    pub async fn teardown_signal(&mut self) {
        let _ = self.shutdown.recv().await;
    }
}

impl Drop for ClientEnd {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Bridge end held by the upstream session handler.
pub struct UpstreamEnd {
    toward_server: mpsc::Receiver<Packet>,
    toward_client: mpsc::Sender<Packet>,
    shutdown: broadcast::Receiver<()>,
    shutdown_tx: broadcast::Sender<()>,
}

impl UpstreamEnd {
    /// Wait for the next client packet, or for teardown.
    pub async fn recv_toward_server(&mut self) -> Result<Packet> {
        tokio::select! {
            packet = self.toward_server.recv() => packet.ok_or(ProxyError::BridgeClosed),
            _ = self.shutdown.recv() => Err(ProxyError::Shutdown),
        }
    }

    /// Queue a server-side packet for the client pump.
    pub async fn send_toward_client(&self, packet: Packet) -> Result<()> {
        self.toward_client
            .send(packet)
            .await
            .map_err(|_| ProxyError::BridgeClosed)
    }

    /// Raise the session-wide teardown signal.
    pub fn trigger_teardown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Resolves when the peer raises teardown.
    pub async fn teardown_signal(&mut self) {
        let _ = self.shutdown.recv().await;
    }
}

impl Drop for UpstreamEnd {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}
