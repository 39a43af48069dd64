//! Prometheus metrics endpoint. Grounded on
//! `Duocast-TSOD/server/metrics/src/http.rs`'s `PrometheusBuilder` install
//! + hyper accept loop, adapted to this relay's gauges/histograms instead
//! of voice-pipeline-specific buckets.
use anyhow::Result;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

const HISTOGRAM_NAMES: &[&str] = &[
    "speech_processing_time_seconds",
    "client_queue_wait_time_seconds",
    "total_processing_time_seconds",
];

pub struct MetricsServer {
    handle: PrometheusHandle,
    port: u16,
}

impl MetricsServer {
    /// Install the global Prometheus recorder once. Must be called exactly
    /// once per process, before any `metrics::` macro invocation.
    pub fn install(port: u16) -> Result<Self> {
        let mut builder = PrometheusBuilder::new();
        for name in HISTOGRAM_NAMES {
            builder = builder.set_buckets_for_metric(
                Matcher::Full((*name).to_string()),
                &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )?;
        }
        let handle = builder.install_recorder()?;
        Ok(Self { handle, port })
    }

    pub async fn serve(self) -> Result<()> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.port).into();
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(target: "metrics", "metrics listening on http://{addr}/metrics");

        let handle = Arc::new(self.handle);
        loop {
            let (stream, _) = listener.accept().await?;
            let handle = handle.clone();

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = hyper::service::service_fn(move |req: Request<hyper::body::Incoming>| {
                    let handle = handle.clone();
                    async move { metrics_handler(req, handle).await }
                });
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(io, service)
                    .await;
            });
        }
    }
}

async fn metrics_handler(
    req: Request<hyper::body::Incoming>,
    handle: Arc<PrometheusHandle>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    if req.uri().path() != "/metrics" {
        return Ok(Response::builder()
            .status(404)
            .body(Full::new(Bytes::from("not found")))
            .unwrap());
    }

    let body = handle.render();
    Ok(Response::builder()
        .status(200)
        .header("content-type", "text/plain; version=0.0.4")
        .body(Full::new(Bytes::from(body)))
        .unwrap())
}
