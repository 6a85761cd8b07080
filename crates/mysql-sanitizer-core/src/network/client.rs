//! Client-side connection pump.
//!
//! Owns the accepted client socket and shuttles packets between it and
//! the session bridge. All protocol interpretation happens on the
//! server-facing side; this half only frames, forwards, and watches for
//! shutdown.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{debug, instrument, warn};

use crate::error::{ProxyError, Result};
use crate::metrics::ProxyMetrics;
use crate::session::ClientEnd;

use super::codec::PacketCodec;

/// The client-facing half of one proxied session.
pub struct ClientConnection {
    bridge: ClientEnd,
    shutdown_rx: broadcast::Receiver<()>,
    metrics: Arc<ProxyMetrics>,
    session_id: u64,
}

impl ClientConnection {
    /// Create a pump for an accepted client socket.
    #[must_use]
    pub fn new(
        bridge: ClientEnd,
        shutdown_rx: broadcast::Receiver<()>,
        metrics: Arc<ProxyMetrics>,
        session_id: u64,
    ) -> Self {
        Self {
            bridge,
            shutdown_rx,
            metrics,
            session_id,
        }
    }

    /// Pump packets until either side closes, then tear down the bridge.
    ///
    /// Consumes the handler. Teardown runs on every exit path so the
    /// server-facing half is released from any blocked read or send.
    #[instrument(skip(self, stream), fields(
        session_id = self.session_id,
        peer = %stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".to_string())
    ))]
    pub async fn run(mut self, stream: TcpStream) {
        match self.pump(stream).await {
            Ok(()) => debug!("client disconnected"),
            Err(ref e) if e.is_disconnect() => debug!(error = %e, "client connection closed"),
            Err(ref e) => {
                warn!(error = %e, "client connection failed");
                self.metrics.record_session_error(e.kind_label());
            }
        }
        self.bridge.trigger_teardown();
    }

    async fn pump(&mut self, stream: TcpStream) -> Result<()> {
        stream.set_nodelay(true)?;
        let mut framed = Framed::new(stream, PacketCodec::new());

        loop {
            tokio::select! {
                incoming = framed.next() => {
                    match incoming {
                        Some(packet) => self.bridge.send_toward_server(packet?).await?,
                        None => return Ok(()),
                    }
                }
                outgoing = self.bridge.recv_toward_client() => {
                    framed.send(outgoing?).await?;
                }
                _ = self.shutdown_rx.recv() => {
                    debug!("shutdown during client pump");
                    return Err(ProxyError::Shutdown);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::Packet;
    use crate::session::SessionBridge;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    async fn pump_pair() -> (TcpStream, crate::session::UpstreamEnd, broadcast::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let (client_end, upstream_end) = SessionBridge::new(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let metrics = Arc::new(ProxyMetrics::new());

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            ClientConnection::new(client_end, shutdown_rx, metrics, 1)
                .run(socket)
                .await;
        });

        let client = TcpStream::connect(address).await.unwrap();
        (client, upstream_end, shutdown_tx)
    }

    #[tokio::test]
    async fn test_pump_relays_both_directions() {
        let (mut client, mut upstream_end, _shutdown_tx) = pump_pair().await;

        // Client writes a PING; it must surface on the bridge.
        client.write_all(&[0x01, 0x00, 0x00, 0x00, 0x0E]).await.unwrap();
        let forwarded = timeout(Duration::from_secs(1), upstream_end.recv_toward_server())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(forwarded.payload, vec![0x0E]);
        assert_eq!(forwarded.sequence_id, 0);

        // A bridge packet must arrive framed on the client socket.
        upstream_end
            .send_toward_client(Packet {
                sequence_id: 1,
                payload: vec![0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00],
            })
            .await
            .unwrap();

        let mut buf = [0u8; 11];
        timeout(Duration::from_secs(1), client.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..4], &[0x07, 0x00, 0x00, 0x01]);
        assert_eq!(buf[4], 0x00);
    }

    #[tokio::test]
    async fn test_bridge_teardown_closes_client_socket() {
        let (mut client, upstream_end, _shutdown_tx) = pump_pair().await;

        // Dropping the server-facing end must unblock and close the pump.
        drop(upstream_end);

        let mut buf = [0u8; 4];
        let read = timeout(Duration::from_secs(1), client.read(&mut buf))
            .await
            .expect("socket should close within the timeout")
            .unwrap();
        assert_eq!(read, 0);
    }

    #[tokio::test]
    async fn test_shutdown_signal_closes_client_socket() {
        let (mut client, _upstream_end, shutdown_tx) = pump_pair().await;

        let _ = shutdown_tx.send(());

        let mut buf = [0u8; 4];
        let read = timeout(Duration::from_secs(1), client.read(&mut buf))
            .await
            .expect("socket should close within the timeout")
            .unwrap();
        assert_eq!(read, 0);
    }
}
