//! Minimal `/metrics` HTTP endpoint. One route, no framework: the broker
//! already renders Prometheus text exposition itself
//! ([`ridgeline_common::metrics::export_prometheus`]), so a hand-rolled
//! HTTP/1.1 responder is all a scrape target needs.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub async fn run(port: u16, cancel: CancellationToken) {
    let addr = format!("0.0.0.0:{port}");
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::warn!(addr, error = %e, "failed to bind metrics listener");
            return;
        }
    };
    tracing::info!(addr, "metrics endpoint listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let Ok((socket, _)) = accepted else { continue };
                tokio::spawn(serve_one(socket));
            }
            _ = cancel.cancelled() => return,
        }
    }
}

async fn serve_one(mut socket: tokio::net::TcpStream) {
    let mut buf = [0u8; 1024];
    // Discard the request; the only route served is `/metrics`.
    let _ = socket.read(&mut buf).await;

    let body = ridgeline_common::metrics::export_prometheus();
    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: text/plain; version=0.0.4\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
}
