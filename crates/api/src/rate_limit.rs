use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Sliding-window request budget per client address.
///
/// Keys come from a client-supplied header, so clients whose window has emptied are
/// dropped: the caller's own entry on every call, everyone else once per window.
#[derive(Debug, Clone)]
pub struct IpRateLimiter {
    windows: Arc<Mutex<ClientWindows>>,
    window: Duration,
    max_requests: usize,
}

#[derive(Debug)]
struct ClientWindows {
    hits: HashMap<String, VecDeque<Instant>>,
    last_sweep: Instant,
}

impl IpRateLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            windows: Arc::new(Mutex::new(ClientWindows {
                hits: HashMap::new(),
                last_sweep: Instant::now(),
            })),
            window,
            max_requests,
        }
    }

    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock();

        if now.duration_since(windows.last_sweep) >= self.window {
            let window = self.window;
            windows.hits.retain(|_, hits| {
                drop_expired(hits, now, window);
                !hits.is_empty()
            });
            windows.last_sweep = now;
        }

        let hits = windows.hits.entry(key.to_string()).or_default();
        drop_expired(hits, now, self.window);
        if hits.len() >= self.max_requests {
            return false;
        }

        hits.push_back(now);
        true
    }

    /// Clients currently holding at least one request in their window.
    pub fn tracked_clients(&self) -> usize {
        self.windows.lock().hits.len()
    }
}

fn drop_expired(hits: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while hits
        .front()
        .is_some_and(|seen| now.duration_since(*seen) > window)
    {
        hits.pop_front();
    }
}
