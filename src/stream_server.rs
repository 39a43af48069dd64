//! TCP stream channel: accepts connections, performs the RSA/AES-CFB
//! handshake and shared-token auth, then services PING/PONG liveness and
//! forwards any other frame as a `message` event. Grounded on the
//! teacher's `server.rs::control_loop`/`per_client_control` for the
//! thread-per-connection, nonblocking-accept-plus-running-flag shape,
//! generalized from the teacher's ASCII handshake to the RSA-OAEP/AES-CFB
//! handshake in `original_source/server/TCPserver.py`.
use crate::crypto::{self, ServerKeyPair};
use crate::error::AuthError;
use crate::event::Event;
use crate::net::{read_frame, write_frame};
use crate::session::{Session, SessionManager, SessionState};
use crossbeam_channel::{Receiver, Sender};
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const PING: &[u8] = b"PING";
const PONG: &[u8] = b"PONG";
const OK: &[u8] = b"OK";

pub struct StreamServer {
    running: Arc<AtomicBool>,
    keypair: Arc<ServerKeyPair>,
    secret: String,
    session_timeout: Duration,
    session_manager: Arc<SessionManager>,
    bound_port: Mutex<u16>,
    pub on_timeout: Event<SocketAddr>,
    pub on_ping: Event<Arc<Session>>,
    pub on_message: Event<(Arc<Session>, Vec<u8>)>,
    permit_tx: Sender<()>,
    permit_rx: Receiver<()>,
}

impl StreamServer {
    /// `accept_backlog` bounds how many sessions run their handshake and
    /// message loop concurrently; an accepted socket beyond that count
    /// waits for a permit before the acceptor thread moves on to the next
    /// `accept()` call, so excess connections back up in the kernel's own
    /// listen backlog rather than spawning unbounded worker threads.
    pub fn new(
        keypair: Arc<ServerKeyPair>,
        secret: String,
        session_timeout: Duration,
        session_manager: Arc<SessionManager>,
        accept_backlog: usize,
    ) -> Arc<Self> {
        let (permit_tx, permit_rx) = crossbeam_channel::bounded(accept_backlog.max(1));
        for _ in 0..accept_backlog.max(1) {
            let _ = permit_tx.send(());
        }
        Arc::new(Self {
            running: Arc::new(AtomicBool::new(false)),
            keypair,
            secret,
            session_timeout,
            session_manager,
            bound_port: Mutex::new(0),
            on_timeout: Event::new(),
            on_ping: Event::new(),
            on_message: Event::new(),
            permit_tx,
            permit_rx,
        })
    }

    /// Blocks until a session slot is free, or returns `false` if the
    /// server stopped while waiting.
    fn acquire_slot(&self) -> bool {
        while self.running.load(Ordering::Relaxed) {
            if self.permit_rx.recv_timeout(Duration::from_millis(200)).is_ok() {
                return true;
            }
        }
        false
    }

    fn release_slot(&self) {
        let _ = self.permit_tx.send(());
    }

    pub fn port(&self) -> u16 {
        *self.bound_port.lock().unwrap()
    }

    pub fn start(self: &Arc<Self>, bind_host: IpAddr, port: u16) -> anyhow::Result<()> {
        let listener = TcpListener::bind((bind_host, port))?;
        listener.set_nonblocking(true)?;
        *self.bound_port.lock().unwrap() = listener.local_addr()?.port();
        self.running.store(true, Ordering::SeqCst);

        let this = self.clone();
        thread::spawn(move || this.accept_loop(listener));
        Ok(())
    }

    /// Idempotent: closes accepted sessions and stops accepting. A second
    /// call observes `running` already false and is a no-op beyond that.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        for entry in self.session_manager.table.iter() {
            entry.value().shutdown();
        }
    }

    fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        while self.running.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, addr)) => {
                    if !self.acquire_slot() {
                        break;
                    }
                    let this = self.clone();
                    thread::spawn(move || {
                        if let Err(e) = this.handle_connection(stream, addr) {
                            tracing::debug!(target: "stream_server", %addr, "connection ended: {e}");
                        }
                        this.release_slot();
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(20));
                }
                Err(e) => {
                    tracing::warn!(target: "stream_server", "accept error: {e}");
                    thread::sleep(Duration::from_millis(200));
                }
            }
        }
    }

    fn handle_connection(self: &Arc<Self>, mut stream: TcpStream, addr: SocketAddr) -> anyhow::Result<()> {
        stream.set_nodelay(true).ok();

        // Steps 1-2: send the server's RSA public key (PEM SubjectPublicKeyInfo).
        write_frame(&mut stream, self.keypair.public_pem().as_bytes())?;

        // Step 3: receive and decrypt the peer's (IV, key) payload.
        let ciphertext = read_frame(&mut stream)?;
        let session_key = match self.keypair.decrypt_session_key(&ciphertext) {
            Ok(k) => k,
            Err(e) => {
                tracing::debug!(target: "stream_server", %addr, "handshake failed: {e}");
                return Ok(());
            }
        };

        let session = Arc::new(Session::new(addr, session_key.clone(), stream.try_clone()?));
        session.set_state(SessionState::Authenticating);

        // Step 4: OK, AES-CFB encrypted.
        write_frame(&mut stream, &crypto::encrypt(&session_key, OK))?;

        // Step 5: read the token frame and verify it.
        stream.set_read_timeout(Some(self.session_timeout))?;
        let token_frame = read_frame(&mut stream)?;
        let token_plaintext = crypto::decrypt(&session_key, &token_frame);
        if token_plaintext != self.secret.as_bytes() {
            tracing::debug!(target: "stream_server", %addr, "{}", AuthError::TokenMismatch);
            return Ok(());
        }

        self.session_manager.register(session.clone())?;
        session.touch();

        let result = self.message_loop(&session, &mut stream);
        self.session_manager.unregister(addr);
        result
    }

    fn message_loop(&self, session: &Arc<Session>, stream: &mut TcpStream) -> anyhow::Result<()> {
        loop {
            match read_frame(stream) {
                Ok(frame) => {
                    session.touch();
                    let plaintext = crypto::decrypt(&session.key, &frame);
                    if plaintext == PING {
                        self.on_ping.emit(session.clone());
                        write_frame(stream, &crypto::encrypt(&session.key, PONG))?;
                    } else {
                        self.on_message.emit((session.clone(), plaintext));
                    }
                }
                Err(e) => {
                    if session.is_expired(self.session_timeout) {
                        tracing::info!(target: "stream_server", session = %session.id, "liveness timeout");
                        self.on_timeout.emit(session.stream_addr);
                    } else {
                        tracing::debug!(target: "stream_server", session = %session.id, "closed: {e}");
                    }
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::datagram_server::DatagramServer;
    use crate::dispatch::DispatchQueue;
    use crate::types::SessionKey;
    use std::io::Read as _;

    fn test_config(secret: &str) -> Config {
        static LOCK: Mutex<()> = Mutex::new(());
        let _guard = LOCK.lock().unwrap();
        std::env::set_var("SECRET", secret);
        Config::load_or_exit()
    }

    fn client_handshake(addr: SocketAddr, secret: &str) -> (TcpStream, SessionKey) {
        let mut stream = TcpStream::connect(addr).unwrap();
        let public_pem = String::from_utf8(read_frame(&mut stream).unwrap()).unwrap();
        let public = crypto::parse_public_key(&public_pem).unwrap();

        let session_key = SessionKey { key: [11u8; 32], iv: [22u8; 16] };
        let ciphertext = crypto::encrypt_session_key(&public, &session_key).unwrap();
        write_frame(&mut stream, &ciphertext).unwrap();

        let ok_frame = read_frame(&mut stream).unwrap();
        assert_eq!(crypto::decrypt(&session_key, &ok_frame), OK);

        write_frame(&mut stream, &crypto::encrypt(&session_key, secret.as_bytes())).unwrap();
        (stream, session_key)
    }

    #[test]
    fn full_handshake_auth_and_ping_pong() {
        let config = test_config("topsecret");
        let keypair = Arc::new(ServerKeyPair::generate(1024).unwrap());
        let datagram_server = DatagramServer::new();
        datagram_server.start("127.0.0.1".parse().unwrap(), 0).unwrap();
        let dispatch = DispatchQueue::new();
        let session_manager = Arc::new(SessionManager::new(datagram_server, dispatch, &config));
        let connected = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let connected2 = connected.clone();
        session_manager.on_connected.subscribe(move |_| {
            connected2.store(true, Ordering::SeqCst);
        });

        let server = StreamServer::new(keypair, config.secret.clone(), Duration::from_secs(2), session_manager, config.accept_backlog);
        server.start("127.0.0.1".parse().unwrap(), 0).unwrap();
        thread::sleep(Duration::from_millis(50));

        let addr: SocketAddr = SocketAddr::from(([127, 0, 0, 1], server.port()));
        let (mut stream, session_key) = client_handshake(addr, "topsecret");
        thread::sleep(Duration::from_millis(50));
        assert!(connected.load(Ordering::SeqCst));

        write_frame(&mut stream, &crypto::encrypt(&session_key, PING)).unwrap();
        let pong_frame = read_frame(&mut stream).unwrap();
        assert_eq!(crypto::decrypt(&session_key, &pong_frame), PONG);

        server.stop();
    }

    #[test]
    fn wrong_token_closes_connection_silently() {
        let config = test_config("realsecret");
        let keypair = Arc::new(ServerKeyPair::generate(1024).unwrap());
        let datagram_server = DatagramServer::new();
        datagram_server.start("127.0.0.1".parse().unwrap(), 0).unwrap();
        let dispatch = DispatchQueue::new();
        let session_manager = Arc::new(SessionManager::new(datagram_server, dispatch, &config));
        let server = StreamServer::new(keypair, config.secret.clone(), Duration::from_secs(2), session_manager, config.accept_backlog);
        server.start("127.0.0.1".parse().unwrap(), 0).unwrap();
        thread::sleep(Duration::from_millis(50));

        let addr: SocketAddr = SocketAddr::from(([127, 0, 0, 1], server.port()));
        let (mut stream, _key) = client_handshake(addr, "wrongsecret");
        // The server closes without replying; a subsequent read observes EOF.
        let mut buf = [0u8; 1];
        let n = stream.read(&mut buf).unwrap_or(0);
        assert_eq!(n, 0);

        server.stop();
    }
}
