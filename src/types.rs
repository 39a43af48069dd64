//! Small shared value types used across the relay.
use serde::Serialize;
use std::net::SocketAddr;
use uuid::Uuid;

/// Opaque, process-unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transcription task selector, mirrors the `TASK` config variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Transcribe,
    Translate,
}

impl std::str::FromStr for Task {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transcribe" => Ok(Task::Transcribe),
            "translate" => Ok(Task::Translate),
            other => Err(format!("unknown task '{other}', expected transcribe|translate")),
        }
    }
}

/// The one versioned control message the server sends: the datagram
/// endpoint the peer should start sending audio to.
#[derive(Debug, Serialize)]
pub struct InitUdpAddr {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub msg: InitUdpAddrBody,
}

#[derive(Debug, Serialize)]
pub struct InitUdpAddrBody {
    pub udp: UdpEndpoint,
}

#[derive(Debug, Serialize)]
pub struct UdpEndpoint {
    pub host: String,
    pub port: u16,
    pub encryption: bool,
}

impl InitUdpAddr {
    pub fn new(host: String, port: u16) -> Self {
        Self {
            msg_type: "init_udpaddr",
            msg: InitUdpAddrBody {
                udp: UdpEndpoint { host, port, encryption: true },
            },
        }
    }
}

/// The symmetric key material agreed during the RSA handshake.
#[derive(Clone, Debug)]
pub struct SessionKey {
    pub key: [u8; 32],
    pub iv: [u8; 16],
}

/// Remote peer's stream-channel address, used as the session table key.
pub type StreamAddr = SocketAddr;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_from_str_round_trips_known_values() {
        assert_eq!("transcribe".parse::<Task>().unwrap(), Task::Transcribe);
        assert_eq!("translate".parse::<Task>().unwrap(), Task::Translate);
        assert!("nonsense".parse::<Task>().is_err());
    }

    #[test]
    fn init_udpaddr_serializes_expected_shape() {
        let msg = InitUdpAddr::new("127.0.0.1".into(), 5001);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "init_udpaddr");
        assert_eq!(json["msg"]["udp"]["host"], "127.0.0.1");
        assert_eq!(json["msg"]["udp"]["port"], 5001);
        assert_eq!(json["msg"]["udp"]["encryption"], true);
    }
}
