//! Process-level wiring: builds configuration, starts every component,
//! and owns the shutdown sequence. Grounded on the teacher's `main.rs`
//! (thin wiring, no business logic of its own) and
//! `original_source/server/server.py::main()`'s callback-registration
//! ordering (datagram server started before the stream server, since the
//! stream handshake immediately registers datagram whitelist entries).
use crate::config::Config;
use crate::crypto::ServerKeyPair;
use crate::datagram_server::DatagramServer;
use crate::dispatch::{DispatchQueue, WorkerPool};
use crate::health::{AppStatus, HealthServer, StatusHandle};
use crate::metrics::MetricsServer;
use crate::session::SessionManager;
use crate::stream_server::StreamServer;
use crate::transcribe::{ContainerDecoder, EchoTranscriber, OggPassthroughDecoder, Transcriber};
use std::sync::Arc;
use std::time::Duration;

pub struct Application {
    pub config: Config,
    pub status: StatusHandle,
    stream_server: Arc<StreamServer>,
    datagram_server: Arc<DatagramServer>,
    worker_pool: WorkerPool,
    session_manager: Arc<SessionManager>,
}

impl Application {
    pub fn build(config: Config) -> anyhow::Result<Self> {
        let status = StatusHandle::new();
        let keypair = Arc::new(ServerKeyPair::generate(config.rsa_key_bits)?);

        let datagram_server = DatagramServer::new();
        let dispatch = DispatchQueue::new();
        let session_manager = Arc::new(SessionManager::new(datagram_server.clone(), dispatch.clone(), &config));

        let sm_for_datagram = session_manager.clone();
        datagram_server.set_on_payload(move |session, payload| {
            sm_for_datagram.on_datagram_payload(session, payload);
        });

        let stream_server = StreamServer::new(
            keypair,
            config.secret.clone(),
            Duration::from_secs_f64(config.session_timeout),
            session_manager.clone(),
            config.accept_backlog,
        );

        let worker_pool = WorkerPool::new();
        let decoder: Arc<dyn ContainerDecoder> = Arc::new(OggPassthroughDecoder);
        let make_transcriber: Arc<dyn Fn() -> Arc<dyn Transcriber> + Send + Sync> =
            Arc::new(|| Arc::new(EchoTranscriber) as Arc<dyn Transcriber>);
        worker_pool.start(dispatch, &config, decoder, make_transcriber);

        Ok(Self { config, status, stream_server, datagram_server, worker_pool, session_manager })
    }

    pub fn start(&self) -> anyhow::Result<()> {
        self.datagram_server.start(self.config.server_host, self.config.port_udp)?;
        self.stream_server.start(self.config.server_host, self.config.port_tcp)?;
        self.status.set(AppStatus::Running);
        tracing::info!(
            target: "app",
            tcp = self.config.port_tcp,
            udp = self.config.port_udp,
            "relay started"
        );
        Ok(())
    }

    /// Idempotent: a second call observes components already stopped.
    pub fn stop(&self) {
        self.status.set(AppStatus::Stopping);
        self.stream_server.stop();
        self.datagram_server.stop();
        self.worker_pool.stop();
        self.status.set(AppStatus::Stopped);
    }

    pub fn connected_session_count(&self) -> usize {
        self.session_manager.table.len()
    }

    pub async fn run_observability(&self) -> anyhow::Result<()> {
        let metrics_server = MetricsServer::install(self.config.metrics_port)?;
        let health_server = HealthServer::new(self.status.clone(), self.config.health_check_port);

        tokio::try_join!(metrics_server.serve(), health_server.serve())?;
        Ok(())
    }
}
