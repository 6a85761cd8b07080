//! TCP listener for accepting MySQL client connections.
//!
//! The listener accepts connections and spawns the two halves of each
//! session: a client-side pump and a server-side session handler, joined
//! by a session bridge.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ListenConfig;
use crate::error::Result;
use crate::metrics::ProxyMetrics;
use crate::session::{SessionBridge, SessionContext};
use crate::upstream::{UpstreamSession, UpstreamStream};

use super::client::ClientConnection;

/// TCP listener that accepts client sessions.
pub struct ProxyListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    max_connections: usize,
    context: SessionContext,
    metrics: Arc<ProxyMetrics>,
    shutdown_tx: broadcast::Sender<()>,
    active_sessions: Arc<AtomicUsize>,
    next_session_id: AtomicU64,
}

impl ProxyListener {
    /// Bind the listen address and prepare to accept sessions.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(
        listen: &ListenConfig,
        context: SessionContext,
        metrics: Arc<ProxyMetrics>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(&listen.address).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            listener,
            local_addr,
            max_connections: listen.max_connections,
            context,
            metrics,
            shutdown_tx,
            active_sessions: Arc::new(AtomicUsize::new(0)),
            next_session_id: AtomicU64::new(1),
        })
    }

    /// The address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get a shutdown handle to signal the listener to stop.
    #[must_use]
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Get the current number of active sessions.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Run the listener, accepting sessions until shutdown.
    #[instrument(skip(self), fields(address = %self.local_addr))]
    pub async fn run(&self) -> Result<()> {
        info!(
            address = %self.local_addr,
            upstream = self.context.upstream_address(),
            "proxy listening"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let current = self.active_sessions.load(Ordering::Relaxed);

                            // Check connection limit
                            if current >= self.max_connections {
                                warn!(
                                    peer = %addr,
                                    active = current,
                                    max = self.max_connections,
                                    "session rejected: limit reached"
                                );
                                // Socket will be dropped, closing the connection
                                continue;
                            }

                            self.active_sessions.fetch_add(1, Ordering::Relaxed);
                            self.metrics.record_session_started();
                            let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
                            debug!(peer = %addr, session_id, active = current + 1, "accepted session");

                            self.spawn_session(socket, session_id);
                        }
                        Err(e) => {
                            error!(error = %e, "accept error");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        let active = self.active_sessions.load(Ordering::Relaxed);
        if active > 0 {
            info!(active, "sessions still draining at shutdown");
        }

        Ok(())
    }

    /// Spawn both halves of one session.
    ///
    /// The client pump owns the accepted socket; the server handler dials
    /// the upstream and drives the protocol. A failed upstream dial tears
    /// the bridge down so the client observes its connection closing.
    fn spawn_session(&self, socket: tokio::net::TcpStream, session_id: u64) {
        let (client_end, upstream_end) = SessionBridge::new(self.context.session_buffer());

        let client_shutdown = self.shutdown_tx.subscribe();
        let client_metrics = Arc::clone(&self.metrics);
        let active_sessions = Arc::clone(&self.active_sessions);
        tokio::spawn(async move {
            let connection = ClientConnection::new(
                client_end,
                client_shutdown,
                Arc::clone(&client_metrics),
                session_id,
            );
            connection.run(socket).await;
            active_sessions.fetch_sub(1, Ordering::Relaxed);
            client_metrics.record_session_closed();
        });

        let context = self.context.clone();
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            match UpstreamStream::connect(context.upstream_address(), context.connect_timeout())
                .await
            {
                Ok(stream) => {
                    UpstreamSession::new(stream, upstream_end, context, metrics, session_id)
                        .run()
                        .await;
                }
                Err(e) => {
                    warn!(session_id, error = %e, "upstream connection failed");
                    metrics.record_session_error(e.kind_label());
                    upstream_end.trigger_teardown();
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    fn test_context(upstream: &str) -> SessionContext {
        let mut config = ProxyConfig::default();
        config.upstream.address = upstream.to_string();
        config.upstream.connect_timeout_ms = 200;
        config.sanitize.salt = "test-salt".to_string();
        SessionContext::from_config(&config).unwrap()
    }

    async fn bound_listener(upstream: &str) -> ProxyListener {
        let listen = ListenConfig {
            address: "127.0.0.1:0".to_string(),
            max_connections: 4,
            session_buffer: 8,
        };
        ProxyListener::bind(&listen, test_context(upstream), Arc::new(ProxyMetrics::new()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_listener_binds_ephemeral_port() {
        let listener = bound_listener("127.0.0.1:3306").await;
        assert_ne!(listener.local_addr().port(), 0);
        assert_eq!(listener.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_listener_shutdown() {
        let listener = bound_listener("127.0.0.1:3306").await;
        let shutdown = listener.shutdown_handle();

        let task = tokio::spawn(async move { listener.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let _ = shutdown.send(());

        let result = timeout(Duration::from_secs(1), task).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_upstream_closes_client() {
        // Nothing listens on the upstream address, so the dial fails and
        // the accepted client must observe its connection closing.
        let listener = bound_listener("127.0.0.1:1").await;
        let address = listener.local_addr();
        let shutdown = listener.shutdown_handle();
        let task = tokio::spawn(async move { listener.run().await });

        let mut client = TcpStream::connect(address).await.unwrap();
        let mut buf = [0u8; 4];
        let read = timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("client socket should close within the timeout")
            .unwrap();
        assert_eq!(read, 0);

        let _ = shutdown.send(());
        let _ = timeout(Duration::from_secs(1), task).await;
    }
}
