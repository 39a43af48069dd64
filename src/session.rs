//! The `Session` value: the pairing of one authenticated stream-channel
//! client with its datagram-channel sibling, plus the per-peer audio
//! state. `SessionManager` wires the stream server, datagram server, and
//! dispatch queue together the way `original_source/server/StreamServer.py`
//! wires its TCP/UDP clients, but advertises `EXTERNAL_HOST` from config
//! rather than the literal bind host (see DESIGN.md).
use crate::audio_buffer::AudioBuffer;
use crate::config::Config;
use crate::datagram_server::DatagramServer;
use crate::dispatch::DispatchQueue;
use crate::event::Event;
use crate::crypto;
use crate::net::write_frame;
use crate::types::{InitUdpAddr, SessionId, SessionKey, StreamAddr};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::TcpStream;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Handshaking = 0,
    Authenticating = 1,
    Established = 2,
    Draining = 3,
    Closed = 4,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Handshaking,
            1 => SessionState::Authenticating,
            2 => SessionState::Established,
            3 => SessionState::Draining,
            _ => SessionState::Closed,
        }
    }
}

pub struct Session {
    pub id: SessionId,
    pub stream_addr: StreamAddr,
    pub key: SessionKey,
    stream: Mutex<TcpStream>,
    state: AtomicU8,
    last_activity: Mutex<Instant>,
    pub audio: AudioBuffer,
}

impl Session {
    pub fn new(stream_addr: StreamAddr, key: SessionKey, stream: TcpStream) -> Self {
        Self {
            id: SessionId::new(),
            stream_addr,
            key,
            stream: Mutex::new(stream),
            state: AtomicU8::new(SessionState::Handshaking as u8),
            last_activity: Mutex::new(Instant::now()),
            audio: AudioBuffer::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.last_activity.lock().elapsed() > timeout
    }

    /// AES-CFB encrypt `plaintext` and write it as one length-prefixed frame.
    pub fn send_encrypted(&self, plaintext: &[u8]) -> anyhow::Result<()> {
        let ciphertext = crypto::encrypt(&self.key, plaintext);
        let mut stream = self.stream.lock();
        write_frame(&mut *stream, &ciphertext)?;
        Ok(())
    }

    pub fn shutdown(&self) {
        let _ = self.stream.lock().shutdown(std::net::Shutdown::Both);
    }
}

pub type SessionTable = Arc<DashMap<StreamAddr, Arc<Session>>>;

/// Pairs stream-channel sessions with datagram-channel clients and keeps
/// the session table authoritative. Stream-server handshake callbacks and
/// datagram-server message callbacks both route through here.
pub struct SessionManager {
    pub table: SessionTable,
    datagram_server: Arc<DatagramServer>,
    dispatch: Arc<DispatchQueue>,
    external_host: String,
    pub on_connected: Event<Arc<Session>>,
    pub on_disconnected: Event<StreamAddr>,
}

impl SessionManager {
    pub fn new(datagram_server: Arc<DatagramServer>, dispatch: Arc<DispatchQueue>, config: &Config) -> Self {
        Self {
            table: Arc::new(DashMap::new()),
            datagram_server,
            dispatch,
            external_host: config.external_host.clone(),
            on_connected: Event::new(),
            on_disconnected: Event::new(),
        }
    }

    /// Called once per session right after the stream-channel handshake
    /// and auth succeed.
    pub fn register(&self, session: Arc<Session>) -> anyhow::Result<()> {
        session.set_state(SessionState::Established);
        let host = session.stream_addr.ip();
        self.datagram_server.add_client(host, session.clone());

        let announce = InitUdpAddr::new(self.external_host.clone(), self.datagram_server.port());
        let payload = serde_json::to_vec(&announce)?;
        session.send_encrypted(&payload)?;

        self.table.insert(session.stream_addr, session.clone());
        metrics::gauge!("connected_clients").increment(1.0);
        self.on_connected.emit(session);
        Ok(())
    }

    pub fn unregister(&self, addr: StreamAddr) {
        if let Some((_, session)) = self.table.remove(&addr) {
            session.set_state(SessionState::Closed);
            self.datagram_server.remove_client(addr.ip());
            metrics::gauge!("connected_clients").decrement(1.0);
            self.on_disconnected.emit(addr);
        }
    }

    /// Routed from the datagram server: append audio and enqueue the
    /// owning session for transcription if it wasn't already queued.
    pub fn on_datagram_payload(&self, session: Arc<Session>, payload: Vec<u8>) {
        if session.audio.append_and_should_enqueue(&payload) {
            self.dispatch.enqueue(session);
        }
    }
}
