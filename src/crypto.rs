//! RSA-OAEP-SHA256 handshake and AES-CFB framing for the stream and
//! datagram channels. The server generates one RSA key pair at startup and
//! reuses it for the lifetime of the process; every session then derives
//! its own symmetric key/IV pair from the client's handshake payload.
use crate::error::HandshakeError;
use crate::types::SessionKey;
use aes::Aes256;
use cfb_mode::{Decryptor, Encryptor};
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

type Aes256CfbEnc = Encryptor<Aes256>;
type Aes256CfbDec = Decryptor<Aes256>;

/// The server's process-wide RSA key pair, generated once at startup.
pub struct ServerKeyPair {
    private: RsaPrivateKey,
    public_pem: String,
}

impl ServerKeyPair {
    pub fn generate(bits: usize) -> anyhow::Result<Self> {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, bits)?;
        let public = RsaPublicKey::from(&private);
        let public_pem = public.to_public_key_pem(LineEnding::LF)?;
        Ok(Self { private, public_pem })
    }

    /// PEM-encoded SubjectPublicKeyInfo, sent verbatim to the peer.
    pub fn public_pem(&self) -> &str {
        &self.public_pem
    }

    /// Decrypt the peer's OAEP-SHA256 ciphertext into the 16-byte IV plus
    /// 32-byte key it must contain.
    pub fn decrypt_session_key(&self, ciphertext: &[u8]) -> Result<SessionKey, HandshakeError> {
        let padding = Oaep::new::<Sha256>();
        let plaintext = self.private.decrypt(padding, ciphertext)?;
        if plaintext.len() != 48 {
            return Err(HandshakeError::BadKeyLength);
        }
        let mut iv = [0u8; 16];
        let mut key = [0u8; 32];
        iv.copy_from_slice(&plaintext[..16]);
        key.copy_from_slice(&plaintext[16..]);
        Ok(SessionKey { key, iv })
    }
}

/// Parse a peer-supplied PEM SubjectPublicKeyInfo public key (used by
/// tests and any non-server peer implementation living in this crate).
pub fn parse_public_key(pem: &str) -> anyhow::Result<RsaPublicKey> {
    Ok(RsaPublicKey::from_public_key_pem(pem)?)
}

/// Encrypt a 48-byte (IV||key) payload under the peer's RSA public key
/// using OAEP-SHA256, as the client side of the handshake does.
pub fn encrypt_session_key(public: &RsaPublicKey, session: &SessionKey) -> anyhow::Result<Vec<u8>> {
    let mut rng = rand::thread_rng();
    let mut plaintext = Vec::with_capacity(48);
    plaintext.extend_from_slice(&session.iv);
    plaintext.extend_from_slice(&session.key);
    let padding = Oaep::new::<Sha256>();
    Ok(public.encrypt(&mut rng, padding, &plaintext)?)
}

/// Encrypt `plaintext` with AES-CFB using the session's (key, IV).
pub fn encrypt(session: &SessionKey, plaintext: &[u8]) -> Vec<u8> {
    let mut buf = plaintext.to_vec();
    Aes256CfbEnc::new(&session.key.into(), &session.iv.into()).encrypt(&mut buf);
    buf
}

/// Decrypt `ciphertext` with AES-CFB using the session's (key, IV).
pub fn decrypt(session: &SessionKey, ciphertext: &[u8]) -> Vec<u8> {
    let mut buf = ciphertext.to_vec();
    Aes256CfbDec::new(&session.key.into(), &session.iv.into()).decrypt(&mut buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aes_cfb_round_trips() {
        let session = SessionKey { key: [7u8; 32], iv: [3u8; 16] };
        let plaintext = b"hello established session";
        let ciphertext = encrypt(&session, plaintext);
        assert_ne!(ciphertext, plaintext);
        let roundtrip = decrypt(&session, &ciphertext);
        assert_eq!(roundtrip, plaintext);
    }

    #[test]
    fn handshake_round_trips_through_rsa_oaep() {
        let server = ServerKeyPair::generate(1024).unwrap();
        let public = parse_public_key(server.public_pem()).unwrap();
        let session = SessionKey { key: [9u8; 32], iv: [1u8; 16] };
        let ciphertext = encrypt_session_key(&public, &session).unwrap();
        let decoded = server.decrypt_session_key(&ciphertext).unwrap();
        assert_eq!(decoded.key, session.key);
        assert_eq!(decoded.iv, session.iv);
    }

    #[test]
    fn rejects_wrong_length_payload() {
        let server = ServerKeyPair::generate(1024).unwrap();
        let public = parse_public_key(server.public_pem()).unwrap();
        let mut rng = rand::thread_rng();
        let padding = Oaep::new::<Sha256>();
        let bad_ciphertext = public.encrypt(&mut rng, padding, b"too short").unwrap();
        let err = server.decrypt_session_key(&bad_ciphertext).unwrap_err();
        assert!(matches!(err, HandshakeError::BadKeyLength));
    }
}
