//! Per-session audio ingestion buffer: append-on-datagram, a queued flag
//! for the dispatch FIFO, container header-prefix capture, and the
//! phrase-window reset policy.
use parking_lot::Mutex;
use std::time::{Duration, Instant};

struct Inner {
    buffer: Vec<u8>,
    header_prefix: Vec<u8>,
    header_complete: bool,
    queued: bool,
    phrase_start: Option<Instant>,
}

/// Guarded per-session audio state. Cheap to hold across a short critical
/// section; never held across I/O or transcription.
pub struct AudioBuffer {
    inner: Mutex<Inner>,
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                buffer: Vec::new(),
                header_prefix: Vec::new(),
                header_complete: false,
                queued: false,
                phrase_start: None,
            }),
        }
    }
}

impl AudioBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append new datagram bytes. Returns `true` if the caller should
    /// enqueue the owning session (it wasn't already queued).
    pub fn append_and_should_enqueue(&self, data: &[u8]) -> bool {
        let mut inner = self.inner.lock();
        inner.buffer.extend_from_slice(data);
        if inner.queued {
            false
        } else {
            inner.queued = true;
            true
        }
    }

    /// Called by a worker right before it reads the buffer: clears the
    /// queued flag first so datagrams arriving during the worker's pass
    /// cause a fresh enqueue rather than being silently folded into a
    /// buffer snapshot the worker has already taken.
    pub fn begin_worker_pass(&self) -> Vec<u8> {
        let mut inner = self.inner.lock();
        inner.queued = false;
        if inner.phrase_start.is_none() {
            inner.phrase_start = Some(Instant::now());
        }
        inner.buffer.clone()
    }

    pub fn header_complete(&self) -> bool {
        self.inner.lock().header_complete
    }

    pub fn set_header_prefix(&self, id_page: Vec<u8>, comment_pages: Vec<u8>) {
        let mut inner = self.inner.lock();
        let mut prefix = id_page;
        prefix.extend(comment_pages);
        inner.header_prefix = prefix;
        inner.header_complete = true;
    }

    /// Reset the buffer back to the captured header prefix once the phrase
    /// window has elapsed since the worker first touched this phrase.
    pub fn clear_if_phrase_expired(&self, record_timeout: Duration) {
        let mut inner = self.inner.lock();
        if let Some(start) = inner.phrase_start {
            if start.elapsed() > record_timeout {
                inner.buffer = inner.header_prefix.clone();
                inner.phrase_start = None;
            }
        }
    }

    pub fn header_prefix(&self) -> Vec<u8> {
        self.inner.lock().header_prefix.clone()
    }

    pub fn is_queued(&self) -> bool {
        self.inner.lock().queued
    }

    /// Read-only snapshot of the current buffer contents. Unlike
    /// `begin_worker_pass`, this never clears `queued` or touches
    /// `phrase_start` — safe to call from anywhere observing state.
    pub fn snapshot(&self) -> Vec<u8> {
        self.inner.lock().buffer.clone()
    }
}
