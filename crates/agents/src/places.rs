use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use reqwest::header::USER_AGENT;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use wayfinder_core::Place;
use wayfinder_observability::AppMetrics;

pub const DEFAULT_GEOCODER_BASE_URL: &str = "https://nominatim.openstreetmap.org";
pub const DEFAULT_GEOCODER_USER_AGENT: &str = "wayfinder-trip-planner/0.1";

pub const SUGGESTION_QUIET_PERIOD: Duration = Duration::from_millis(300);
/// Queries shorter than this (after trimming) never reach the geocoder.
pub const MIN_SUGGESTION_QUERY_CHARS: usize = 3;
pub const SUGGESTION_LIMIT: usize = 5;

#[derive(Debug, Error)]
pub enum LookupFailure {
    #[error("place lookup request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("place lookup returned status {0}")]
    Status(u16),

    #[error("place lookup response could not be decoded: {0}")]
    MalformedBody(String),
}

pub trait PlaceSearch: Send + Sync {
    fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Place>, LookupFailure>> + Send;
}

#[derive(Debug, Clone)]
pub struct NominatimConfig {
    pub base_url: String,
    pub user_agent: String,
    pub language: String,
}

impl Default for NominatimConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GEOCODER_BASE_URL.to_string(),
            user_agent: DEFAULT_GEOCODER_USER_AGENT.to_string(),
            language: "en".to_string(),
        }
    }
}

impl NominatimConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("WAYFINDER_GEOCODER_BASE_URL").unwrap_or(defaults.base_url),
            user_agent: std::env::var("WAYFINDER_GEOCODER_USER_AGENT")
                .unwrap_or(defaults.user_agent),
            ..defaults
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Coordinates arrive as decimal strings.
#[derive(Debug, Deserialize)]
struct NominatimPlace {
    display_name: String,
    lat: String,
    lon: String,
}

impl NominatimPlace {
    fn into_place(self) -> Option<Place> {
        Some(Place {
            lat: self.lat.trim().parse().ok()?,
            lon: self.lon.trim().parse().ok()?,
            display_name: self.display_name,
        })
    }
}

#[derive(Clone)]
pub struct NominatimClient {
    http: Client,
    config: NominatimConfig,
}

impl NominatimClient {
    pub fn new(config: NominatimConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(6))
            .timeout(Duration::from_secs(20))
            .build()
            .context("failed to build geocoder http client")?;
        Ok(Self { http, config })
    }
}

impl PlaceSearch for NominatimClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Place>, LookupFailure> {
        let url = format!("{}/search", self.config.base_url.trim_end_matches('/'));
        let limit = limit.to_string();
        let response = self
            .http
            .get(url)
            .header(USER_AGENT, &self.config.user_agent)
            .query(&[
                ("format", "json"),
                ("q", query),
                ("accept-language", self.config.language.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LookupFailure::Status(status.as_u16()));
        }

        let raw: Vec<NominatimPlace> = response
            .json()
            .await
            .map_err(|error| LookupFailure::MalformedBody(error.to_string()))?;

        Ok(raw
            .into_iter()
            .filter_map(NominatimPlace::into_place)
            .collect())
    }
}

/// One published batch of suggestions, tagged with the input that produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Suggestions {
    pub sequence: u64,
    pub query: String,
    pub places: Vec<Place>,
}

/// Debounced type-ahead lookup. Each input cancels whatever was pending and only
/// the result for the most recent input is ever published.
pub struct SuggestionSearch<P> {
    search: Arc<P>,
    metrics: Arc<AppMetrics>,
    quiet_period: Duration,
    latest: Arc<AtomicU64>,
    pending: Mutex<Option<JoinHandle<()>>>,
    published: Arc<watch::Sender<Suggestions>>,
}

impl<P> SuggestionSearch<P>
where
    P: PlaceSearch + 'static,
{
    pub fn new(search: Arc<P>, metrics: Arc<AppMetrics>) -> Self {
        Self::with_quiet_period(search, metrics, SUGGESTION_QUIET_PERIOD)
    }

    pub fn with_quiet_period(
        search: Arc<P>,
        metrics: Arc<AppMetrics>,
        quiet_period: Duration,
    ) -> Self {
        let (published, _) = watch::channel(Suggestions::default());
        Self {
            search,
            metrics,
            quiet_period,
            latest: Arc::new(AtomicU64::new(0)),
            pending: Mutex::new(None),
            published: Arc::new(published),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Suggestions> {
        self.published.subscribe()
    }

    pub fn current(&self) -> Suggestions {
        self.published.borrow().clone()
    }

    /// Registers a new input value and returns its sequence number. Must be called
    /// from within a tokio runtime.
    pub fn input(&self, query: &str) -> u64 {
        let sequence = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let query = query.trim().to_string();

        let search = Arc::clone(&self.search);
        let metrics = Arc::clone(&self.metrics);
        let latest = Arc::clone(&self.latest);
        let published = Arc::clone(&self.published);
        let quiet_period = self.quiet_period;

        let mut pending = self.pending.lock();
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(quiet_period).await;

            let places = if query.chars().count() < MIN_SUGGESTION_QUERY_CHARS {
                Vec::new()
            } else {
                match search.search(&query, SUGGESTION_LIMIT).await {
                    Ok(places) => places,
                    Err(error) => {
                        metrics.inc_lookup_failure();
                        warn!(%error, query = %query, "suggestion lookup failed");
                        Vec::new()
                    }
                }
            };

            let delivered = publish_if_latest(
                &published,
                &latest,
                Suggestions {
                    sequence,
                    query,
                    places,
                },
            );
            debug!(sequence, delivered, "suggestion lookup finished");
        }));

        sequence
    }

    pub fn cancel(&self) {
        if let Some(previous) = self.pending.lock().take() {
            previous.abort();
        }
    }
}

impl<P> Drop for SuggestionSearch<P> {
    fn drop(&mut self) {
        if let Some(previous) = self.pending.get_mut().take() {
            previous.abort();
        }
    }
}

fn publish_if_latest(
    published: &watch::Sender<Suggestions>,
    latest: &AtomicU64,
    suggestions: Suggestions,
) -> bool {
    if latest.load(Ordering::SeqCst) != suggestions.sequence {
        return false;
    }
    published.send_if_modified(|current| {
        if suggestions.sequence > current.sequence {
            *current = suggestions;
            true
        } else {
            false
        }
    })
}
