//! FIFO dispatch queue and the fixed worker pool that drains it. Grounded
//! on `original_source/server/server.py`'s `Worker.process()`: the
//! 250ms<->0ms sleep toggle on queue emptiness, the header-capture gate
//! that skips transcription on the round that completes it, and the
//! model-loading mutex scoped around loading only, never inference.
//!
//! Deliberate divergence from the original: a transcription error here
//! logs and drops the current phrase instead of killing the worker thread
//! (see DESIGN.md).
use crate::config::Config;
use crate::session::Session;
use crate::transcribe::{ContainerDecoder, Transcriber};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct DispatchQueue {
    tx: Sender<Arc<Session>>,
    rx: Receiver<Arc<Session>>,
}

impl Default for DispatchQueue {
    fn default() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }
}

impl DispatchQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn enqueue(&self, session: Arc<Session>) {
        let _ = self.tx.send(session);
    }

    fn try_pop(&self) -> Option<Arc<Session>> {
        self.rx.try_recv().ok()
    }
}

pub struct WorkerPool {
    running: std::sync::Arc<std::sync::atomic::AtomicBool>,
    handles: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

/// Shared across workers so model *loading* is serialized while
/// transcription itself runs fully in parallel.
pub type ModelLoadLock = Arc<Mutex<()>>;

impl WorkerPool {
    pub fn new() -> Self {
        Self {
            running: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true)),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn start(
        &self,
        queue: Arc<DispatchQueue>,
        config: &Config,
        decoder: Arc<dyn ContainerDecoder>,
        make_transcriber: Arc<dyn Fn() -> Arc<dyn Transcriber> + Send + Sync>,
    ) {
        let load_lock: ModelLoadLock = Arc::new(Mutex::new(()));
        metrics::gauge!("workers").set(config.worker_count as f64);

        for worker_id in 0..config.worker_count {
            let running = self.running.clone();
            let queue = queue.clone();
            let decoder = decoder.clone();
            let make_transcriber = make_transcriber.clone();
            let load_lock = load_lock.clone();
            let record_timeout = Duration::from_secs_f64(config.record_timeout);
            let task = config.task;

            let handle = std::thread::spawn(move || {
                let transcriber = {
                    let _guard = load_lock.lock();
                    make_transcriber()
                };
                tracing::info!(target: "dispatch", worker_id, "worker ready");

                while running.load(std::sync::atomic::Ordering::Relaxed) {
                    match queue.try_pop() {
                        Some(session) => {
                            process_one(&session, &*decoder, &*transcriber, task, record_timeout);
                        }
                        None => std::thread::sleep(Duration::from_millis(250)),
                    }
                }
            });
            self.handles.lock().push(handle);
        }
    }

    pub fn stop(&self) {
        self.running.store(false, std::sync::atomic::Ordering::SeqCst);
        let mut handles = self.handles.lock();
        for h in handles.drain(..) {
            let _ = h.join();
        }
    }
}

fn process_one(
    session: &Arc<Session>,
    decoder: &dyn ContainerDecoder,
    transcriber: &dyn Transcriber,
    task: crate::types::Task,
    record_timeout: Duration,
) {
    let queue_wait_start = Instant::now();
    let snapshot = session.audio.begin_worker_pass();
    metrics::histogram!("client_queue_wait_time_seconds").record(queue_wait_start.elapsed().as_secs_f64());

    if !session.audio.header_complete() {
        if let Some((id_page, comment_pages)) = decoder.find_header_pages(&snapshot) {
            session.audio.set_header_prefix(id_page, comment_pages);
        }
        return;
    }

    let total_start = Instant::now();
    let pcm = match decoder.to_pcm(&snapshot) {
        Ok(pcm) => pcm,
        Err(e) => {
            tracing::warn!(target: "dispatch", session = %session.id, "container decode failed, dropping phrase: {e}");
            session.audio.clear_if_phrase_expired(Duration::from_secs(0));
            return;
        }
    };

    let processing_start = Instant::now();
    let text = match transcriber.transcribe(&pcm, task) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(target: "dispatch", session = %session.id, "transcription failed, dropping phrase: {e}");
            session.audio.clear_if_phrase_expired(Duration::from_secs(0));
            return;
        }
    };
    metrics::histogram!("speech_processing_time_seconds").record(processing_start.elapsed().as_secs_f64());

    if let Err(e) = session.send_encrypted(text.as_bytes()) {
        tracing::warn!(target: "dispatch", session = %session.id, "failed to send transcription: {e}");
    }

    metrics::histogram!("total_processing_time_seconds").record(total_start.elapsed().as_secs_f64());
    session.audio.clear_if_phrase_expired(record_timeout);
}
