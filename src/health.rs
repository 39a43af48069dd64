//! Liveness HTTP endpoint. Mirrors the Flask `/health` route in
//! `original_source/server/server.py` (200 while running, 503 otherwise),
//! implemented with the same hyper accept-loop shape as `metrics.rs`
//! (grounded on `Duocast-TSOD/server/metrics/src/http.rs`).
use anyhow::Result;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Shared, cheaply-clonable process status backing the health endpoint.
#[derive(Clone)]
pub struct StatusHandle(Arc<AtomicU8>);

impl StatusHandle {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(AppStatus::Starting as u8)))
    }

    pub fn set(&self, status: AppStatus) {
        self.0.store(status as u8, Ordering::SeqCst);
    }

    pub fn get(&self) -> AppStatus {
        match self.0.load(Ordering::SeqCst) {
            0 => AppStatus::Starting,
            1 => AppStatus::Running,
            2 => AppStatus::Stopping,
            _ => AppStatus::Stopped,
        }
    }
}

impl Default for StatusHandle {
    fn default() -> Self {
        Self::new()
    }
}

pub struct HealthServer {
    status: StatusHandle,
    port: u16,
}

impl HealthServer {
    pub fn new(status: StatusHandle, port: u16) -> Self {
        Self { status, port }
    }

    pub async fn serve(self) -> Result<()> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.port).into();
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(target: "health", "health check listening on http://{addr}/health");

        loop {
            let (stream, _) = listener.accept().await?;
            let status = self.status.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = hyper::service::service_fn(move |req: Request<hyper::body::Incoming>| {
                    let status = status.clone();
                    async move { health_handler(req, status) }
                });
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(io, service)
                    .await;
            });
        }
    }
}

fn health_handler(req: Request<hyper::body::Incoming>, status: StatusHandle) -> Result<Response<Full<Bytes>>, hyper::Error> {
    if req.uri().path() != "/health" {
        return Ok(Response::builder().status(404).body(Full::new(Bytes::from("not found"))).unwrap());
    }
    let (code, body) = match status.get() {
        AppStatus::Running => (200, "running"),
        _ => (503, "not running"),
    };
    Ok(Response::builder().status(code).body(Full::new(Bytes::from(body))).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_handle_round_trips_transitions() {
        let status = StatusHandle::new();
        assert_eq!(status.get(), AppStatus::Starting);
        status.set(AppStatus::Running);
        assert_eq!(status.get(), AppStatus::Running);
        status.set(AppStatus::Stopped);
        assert_eq!(status.get(), AppStatus::Stopped);
    }
}
