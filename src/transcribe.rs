//! External-collaborator interfaces: the speech-to-text model and the
//! audio container decoder. Production deployments plug in a real model;
//! this crate ships only the trait plus a deterministic stand-in so the
//! dispatch pipeline is exercisable without one.
use crate::error::TranscribeError;
use crate::ogg::find_header_pages;
use crate::types::Task;

pub trait Transcriber: Send + Sync {
    fn transcribe(&self, pcm: &[u8], task: Task) -> Result<String, TranscribeError>;
}

pub trait ContainerDecoder: Send + Sync {
    /// Locate the identification and comment header pages, if both are
    /// present in `container_bytes`.
    fn find_header_pages(&self, container_bytes: &[u8]) -> Option<(Vec<u8>, Vec<u8>)>;

    /// Convert a container-framed byte range into PCM samples ready for
    /// the transcriber.
    fn to_pcm(&self, container_bytes: &[u8]) -> Result<Vec<u8>, TranscribeError>;
}

/// Real Ogg-Opus header scanning, pass-through PCM conversion. The PCM
/// step is a stand-in: a genuine Opus decode is out of scope for this
/// repository.
pub struct OggPassthroughDecoder;

impl ContainerDecoder for OggPassthroughDecoder {
    fn find_header_pages(&self, container_bytes: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
        find_header_pages(container_bytes)
    }

    fn to_pcm(&self, container_bytes: &[u8]) -> Result<Vec<u8>, TranscribeError> {
        Ok(container_bytes.to_vec())
    }
}

/// Deterministic stand-in transcriber: reports the byte length of its
/// input so tests and default deployments can observe that the pipeline
/// ran without depending on a real model.
pub struct EchoTranscriber;

impl Transcriber for EchoTranscriber {
    fn transcribe(&self, pcm: &[u8], task: Task) -> Result<String, TranscribeError> {
        Ok(format!("[{:?}] {} bytes transcribed", task, pcm.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_transcriber_reports_length() {
        let t = EchoTranscriber;
        let out = t.transcribe(&[0u8; 10], Task::Transcribe).unwrap();
        assert!(out.contains("10 bytes"));
    }

    #[test]
    fn passthrough_decoder_round_trips_bytes() {
        let d = OggPassthroughDecoder;
        let input = vec![1, 2, 3];
        assert_eq!(d.to_pcm(&input).unwrap(), input);
    }
}
