//! `ConnServer`: accepts TCP connections, optionally TLS-wraps them, and
//! runs each one's read-dispatch-write loop as its own task (spec §4.6).
//! Shutdown is cooperative: a `CancellationToken` fires, in-flight
//! connections get a grace period to finish their current frame, then the
//! listener task returns regardless of stragglers.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use ridgeline_codec::header::RequestHeader;

use crate::broker::Broker;
use crate::connection::{PeerStream, DEFAULT_READ_DEADLINE};
use crate::dispatch::{self, ConnState};

pub struct ConnServer {
    broker: Arc<Broker>,
    tls_acceptor: Option<TlsAcceptor>,
}

impl ConnServer {
    pub fn new(broker: Arc<Broker>, tls_acceptor: Option<TlsAcceptor>) -> Self {
        Self { broker, tls_acceptor }
    }

    /// Bind `addr` and accept connections until `cancel` fires. Each accepted
    /// connection is handed its own task; `run` itself returns once the
    /// listener socket stops accepting (either on cancellation or a fatal
    /// accept error).
    pub async fn run(&self, addr: &str, cancel: CancellationToken) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr, "ridgeline listening for connections");

        let mut tasks = tokio::task::JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (socket, peer_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    socket.set_nodelay(true).ok();
                    ridgeline_common::metrics::set_active_connections(tasks.len() as i64 + 1);

                    let broker = self.broker.clone();
                    let tls_acceptor = self.tls_acceptor.clone();
                    let conn_cancel = cancel.clone();
                    tasks.spawn(async move {
                        if let Err(e) = handle_connection(broker, tls_acceptor, socket, peer_addr.to_string(), conn_cancel).await {
                            tracing::debug!(peer = %peer_addr, error = %e, "connection ended");
                        }
                    });
                }
                _ = cancel.cancelled() => {
                    tracing::info!("shutdown requested, draining connections");
                    break;
                }
            }

            // Reap finished tasks opportunistically so the join set doesn't
            // grow unbounded under a long-running, high-churn workload.
            while tasks.try_join_next().is_some() {}
        }

        let grace = Duration::from_secs(self.broker.shutdown_grace_secs);
        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            tracing::warn!("shutdown grace period elapsed with connections still active");
            tasks.shutdown().await;
        }

        Ok(())
    }
}

async fn handle_connection(
    broker: Arc<Broker>,
    tls_acceptor: Option<TlsAcceptor>,
    socket: TcpStream,
    peer_addr: String,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let mut peer = match tls_acceptor {
        Some(acceptor) => {
            let tls_stream = acceptor.accept(socket).await?;
            PeerStream::Tls(Box::new(tls_stream))
        }
        None => PeerStream::Plain(socket),
    };

    let host = peer_addr.rsplit_once(':').map(|(h, _)| h.to_string()).unwrap_or(peer_addr);
    let mut state = ConnState::new(&broker, host);

    loop {
        let frame = tokio::select! {
            frame = peer.read_frame(DEFAULT_READ_DEADLINE) => frame?,
            _ = cancel.cancelled() => break,
        };
        let Some(mut body) = frame else {
            break;
        };

        let header = match RequestHeader::decode(&mut body) {
            Ok(h) => h,
            Err(_) => break, // malformed header: nothing to frame a response against
        };

        dispatch::dispatch(&broker, &header, &mut body, &mut state, &mut peer, &cancel).await?;
    }

    Ok(())
}
