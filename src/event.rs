//! Generic multi-subscriber event dispatcher. Subscribers register behind
//! an opaque handle instead of keying off callback identity; `emit` spawns
//! one thread per subscriber and joins all of them before returning, so a
//! caller can rely on "every handler has observed this emit" once `emit`
//! returns.
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

struct Entry<T> {
    id: SubscriptionId,
    cb: Callback<T>,
}

/// An event with payload type `T`. `T` must be `Clone` because every
/// subscriber thread gets its own copy.
pub struct Event<T> {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Entry<T>>>,
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self { next_id: AtomicU64::new(1), subscribers: Mutex::new(Vec::new()) }
    }
}

impl<T: Clone + Send + 'static> Event<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, cb: F) -> SubscriptionId
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().push(Entry { id, cb: Arc::new(cb) });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.lock().retain(|e| e.id != id);
    }

    /// Fan out `value` to every subscriber registered at the time of the
    /// call, each on its own thread, and join before returning.
    pub fn emit(&self, value: T) {
        let callbacks: Vec<Callback<T>> = {
            let guard = self.subscribers.lock();
            guard.iter().map(|e| e.cb.clone()).collect()
        };
        let handles: Vec<_> = callbacks
            .into_iter()
            .map(|cb| {
                let value = value.clone();
                std::thread::spawn(move || (cb)(value))
            })
            .collect();
        for h in handles {
            let _ = h.join();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn emit_waits_for_all_subscribers() {
        let event: Event<u32> = Event::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let hits = hits.clone();
            event.subscribe(move |_| {
                std::thread::sleep(std::time::Duration::from_millis(10));
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        event.emit(1);
        assert_eq!(hits.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn unsubscribe_stops_future_delivery() {
        let event: Event<u32> = Event::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let id = event.subscribe(move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        event.emit(1);
        event.unsubscribe(id);
        event.emit(1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
