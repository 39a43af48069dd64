//! UDP datagram channel: a single receive loop that demultiplexes inbound
//! datagrams by source host against a whitelist populated during the
//! stream-channel handshake, pairing the first unpaired client for a host
//! to the first datagram seen from a new source port. Grounded on
//! `original_source/server/UDPserver.py::_listen`'s three-tier lookup, but
//! polls a nonblocking socket against a running flag the way the teacher's
//! `server.rs::audio_multicast_loop` does, instead of porting Python's
//! blocking `recvfrom` + dummy-self-datagram shutdown trick.
use crate::crypto;
use crate::event::Event;
use crate::session::Session;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub struct DatagramClient {
    pub host: IpAddr,
    pub port: Mutex<Option<u16>>,
    pub session: Arc<Session>,
}

type PayloadCallback = Box<dyn Fn(Arc<Session>, Vec<u8>) + Send + Sync>;

pub struct DatagramServer {
    running: Arc<AtomicBool>,
    whitelist: Mutex<std::collections::HashMap<IpAddr, Vec<Arc<DatagramClient>>>>,
    bound_port: Mutex<u16>,
    on_payload: Mutex<Option<PayloadCallback>>,
    pub on_paired: Event<Arc<DatagramClient>>,
}

impl DatagramServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            running: Arc::new(AtomicBool::new(false)),
            whitelist: Mutex::new(std::collections::HashMap::new()),
            bound_port: Mutex::new(0),
            on_payload: Mutex::new(None),
            on_paired: Event::new(),
        })
    }

    /// Register the single callback invoked for every successfully
    /// decrypted, successfully routed datagram.
    pub fn set_on_payload<F>(&self, cb: F)
    where
        F: Fn(Arc<Session>, Vec<u8>) + Send + Sync + 'static,
    {
        *self.on_payload.lock().unwrap() = Some(Box::new(cb));
    }

    pub fn port(&self) -> u16 {
        *self.bound_port.lock().unwrap()
    }

    pub fn start(self: &Arc<Self>, bind_host: IpAddr, port: u16) -> anyhow::Result<()> {
        let socket = UdpSocket::bind(SocketAddr::new(bind_host, port))?;
        socket.set_nonblocking(true)?;
        *self.bound_port.lock().unwrap() = socket.local_addr()?.port();
        self.running.store(true, Ordering::SeqCst);

        let this = self.clone();
        thread::spawn(move || this.receive_loop(socket));
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Record a pending (unpaired) datagram client for `host`, reusing the
    /// session's already-negotiated key/IV.
    pub fn add_client(&self, host: IpAddr, session: Arc<Session>) -> Arc<DatagramClient> {
        let client = Arc::new(DatagramClient { host, port: Mutex::new(None), session });
        self.whitelist
            .lock()
            .unwrap()
            .entry(host)
            .or_default()
            .push(client.clone());
        client
    }

    pub fn remove_client(&self, host: IpAddr) {
        self.whitelist.lock().unwrap().remove(&host);
    }

    fn receive_loop(&self, socket: UdpSocket) {
        let mut buf = vec![0u8; 64 * 1024];
        while self.running.load(Ordering::Relaxed) {
            match socket.recv_from(&mut buf) {
                Ok((n, from)) => self.route(&buf[..n], from),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(20));
                }
                Err(e) => {
                    tracing::warn!(target: "datagram_server", "recv error: {e}");
                    thread::sleep(Duration::from_millis(200));
                }
            }
        }
    }

    fn route(&self, data: &[u8], from: SocketAddr) {
        let (client, newly_paired) = {
            let mut whitelist = self.whitelist.lock().unwrap();
            let Some(clients) = whitelist.get_mut(&from.ip()) else {
                tracing::debug!(target: "datagram_server", "dropping datagram from unwhitelisted host {}", from.ip());
                return;
            };

            if let Some(existing) = clients
                .iter()
                .find(|c| *c.port.lock().unwrap() == Some(from.port()))
            {
                (existing.clone(), false)
            } else if let Some(pending) = clients.iter().find(|c| c.port.lock().unwrap().is_none()) {
                *pending.port.lock().unwrap() = Some(from.port());
                tracing::info!(target: "datagram_server", "paired datagram client {} for session {}", from, pending.session.id);
                (pending.clone(), true)
            } else {
                tracing::debug!(target: "datagram_server", "no pending client for host {}, dropping", from.ip());
                return;
            }
        };

        if newly_paired {
            self.on_paired.emit(client.clone());
        }

        let plaintext = crypto::decrypt(&client.session.key, data);
        if let Some(cb) = self.on_payload.lock().unwrap().as_ref() {
            cb(client.session.clone(), plaintext);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionKey;
    use std::net::TcpListener;

    fn dummy_session() -> Arc<Session> {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = std::net::TcpStream::connect(addr).unwrap();
        let key = SessionKey { key: [1u8; 32], iv: [2u8; 16] };
        Arc::new(Session::new(addr, key, stream))
    }

    #[test]
    fn whitelist_pairs_first_unset_client_to_new_source_port() {
        let server = DatagramServer::new();
        let session = dummy_session();
        let host: IpAddr = "127.0.0.1".parse().unwrap();
        let client = server.add_client(host, session);

        let received = Arc::new(Mutex::new(None));
        let received2 = received.clone();
        server.set_on_payload(move |_s, payload| {
            *received2.lock().unwrap() = Some(payload);
        });

        let plaintext = b"hello";
        let ciphertext = crypto::encrypt(&client.session.key, plaintext);
        server.route(&ciphertext, "127.0.0.1:9999".parse().unwrap());

        assert_eq!(*client.port.lock().unwrap(), Some(9999));
        assert_eq!(received.lock().unwrap().as_deref(), Some(&plaintext[..]));
    }

    #[test]
    fn datagram_from_unwhitelisted_host_is_dropped() {
        let server = DatagramServer::new();
        let hit = Arc::new(Mutex::new(false));
        let hit2 = hit.clone();
        server.set_on_payload(move |_, _| *hit2.lock().unwrap() = true);
        server.route(b"anything", "10.0.0.1:1234".parse().unwrap());
        assert!(!*hit.lock().unwrap());
    }
}
