use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

#[derive(Debug, Default)]
pub struct AppMetrics {
    requests_total: AtomicU64,
    generation_calls_total: AtomicU64,
    generation_retries_total: AtomicU64,
    generation_failures_total: AtomicU64,
    day_count_shortfalls_total: AtomicU64,
    lookup_failures_total: AtomicU64,
    total_latency_millis: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub generation_calls_total: u64,
    pub generation_retries_total: u64,
    pub generation_failures_total: u64,
    pub day_count_shortfalls_total: u64,
    pub lookup_failures_total: u64,
    pub avg_latency_millis: f64,
}

impl AppMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_generation_call(&self) {
        self.generation_calls_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_generation_retry(&self) {
        self.generation_retries_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_generation_failure(&self) {
        self.generation_failures_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_day_count_shortfall(&self) {
        self.day_count_shortfalls_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_lookup_failure(&self) {
        self.lookup_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_latency(&self, duration: Duration) {
        self.total_latency_millis
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests = self.requests_total.load(Ordering::Relaxed);
        let latency = self.total_latency_millis.load(Ordering::Relaxed);

        MetricsSnapshot {
            requests_total: requests,
            generation_calls_total: self.generation_calls_total.load(Ordering::Relaxed),
            generation_retries_total: self.generation_retries_total.load(Ordering::Relaxed),
            generation_failures_total: self.generation_failures_total.load(Ordering::Relaxed),
            day_count_shortfalls_total: self.day_count_shortfalls_total.load(Ordering::Relaxed),
            lookup_failures_total: self.lookup_failures_total.load(Ordering::Relaxed),
            avg_latency_millis: if requests == 0 {
                0.0
            } else {
                latency as f64 / requests as f64
            },
        }
    }
}

pub fn init_tracing(service_name: &str) {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}=info,wayfinder_api=info,wayfinder_agents=info",
                service_name
            ))
        });

        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .init();
    });
}
