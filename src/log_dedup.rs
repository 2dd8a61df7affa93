use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct Entry {
    last_logged: Instant,
    suppressed: u64,
}

/// Rate-limits identical error lines.
///
/// When the RPC endpoint is unreachable every poll tick fails the same way;
/// this lets the first occurrence through, swallows repeats for
/// `window`, and reports how many were swallowed on the next one it lets
/// through.
#[derive(Clone)]
pub struct ErrorLogThrottle {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    window: Duration,
}

impl ErrorLogThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            window,
        }
    }

    /// `Some(n)` when the line should be logged, `n` being the number of
    /// repeats suppressed since it was last logged. `None` to suppress.
    pub async fn admit(&self, key: &str) -> Option<u64> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        // Keys that have been quiet for two windows are dropped, so varying
        // error text during a long outage does not grow the map.
        let stale_after = self.window * 2;
        entries.retain(|k, entry| k == key || now.duration_since(entry.last_logged) < stale_after);

        match entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.last_logged) < self.window => {
                entry.suppressed += 1;
                None
            }
            Some(entry) => {
                let suppressed = entry.suppressed;
                entry.last_logged = now;
                entry.suppressed = 0;
                Some(suppressed)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }

    /// Forgets every key; the next error of any kind logs immediately.
    /// Called after a successful cycle.
    pub async fn reset(&self) {
        self.entries.lock().await.clear();
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
