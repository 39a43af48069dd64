//! Typed error categories for the components that need to distinguish
//! failure modes from the caller's side; everything above `main` collapses
//! into `anyhow::Error`.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("client key payload was not 48 bytes after RSA-OAEP decryption")]
    BadKeyLength,
    #[error("RSA-OAEP decryption failed")]
    Decrypt(#[from] rsa::Error),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token did not match the configured secret")]
    TokenMismatch,
}

#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("container decode failed: {0}")]
    Decode(String),
    #[error("transcription failed: {0}")]
    Model(String),
}
