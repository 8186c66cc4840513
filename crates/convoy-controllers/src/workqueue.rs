use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// A rate-limited work queue: immediate adds, delayed re-adds, and
/// exponential back-off per key.
///
/// With the default limiter (5ms * 2^(retries-1)) a key is re-queued at
/// 5ms, 10ms, 20ms, ... until the retry budget runs out; the numbers add up
/// to roughly 82s over fifteen retries.
pub struct RateLimitedQueue<T> {
    tx: mpsc::UnboundedSender<T>,
    retries: Arc<Mutex<HashMap<String, u32>>>,
    base: Duration,
    max_retries: u32,
}

impl<T: Send + 'static> RateLimitedQueue<T> {
    pub fn new(max_retries: u32, base: Duration) -> (Self, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                retries: Arc::new(Mutex::new(HashMap::new())),
                base,
                max_retries,
            },
            rx,
        )
    }

    /// Enqueue immediately
    pub fn add(&self, item: T) {
        let _ = self.tx.send(item);
    }

    /// Enqueue after `delay`
    pub fn add_after(&self, item: T, delay: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(item);
        });
    }

    /// Re-enqueue with exponential back-off. Returns false once the key has
    /// exhausted its retry budget; the caller drops the item then.
    pub fn add_rate_limited(&self, key: &str, item: T) -> bool {
        let attempt = {
            let mut retries = self.retries.lock().expect("retries lock");
            let attempt = retries.entry(key.to_string()).or_insert(0);
            *attempt += 1;
            *attempt
        };
        if attempt > self.max_retries {
            return false;
        }

        let delay = self.base * 2u32.saturating_pow(attempt - 1);
        self.add_after(item, delay);
        true
    }

    /// Number of re-queues recorded for the key
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.retries
            .lock()
            .expect("retries lock")
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Clear the key's retry history after a success
    pub fn forget(&self, key: &str) {
        self.retries.lock().expect("retries lock").remove(key);
    }
}
