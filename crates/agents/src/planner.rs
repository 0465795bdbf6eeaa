use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use wayfinder_core::{
    advance, complete_generation, export_file_name, parse_itinerary, render_itinerary,
    start_session, ConversationSession, Directive, GenerationOutcome, MapMarker, MapView, Message,
    ParsedItinerary, Place, Transition, UserInput,
};
use wayfinder_observability::AppMetrics;
use wayfinder_storage::SessionRepository;

use crate::generation::{GenerationService, ItineraryGenerator};
use crate::places::{PlaceSearch, SuggestionSearch};

pub const DEFAULT_SESSION_TTL_SECONDS: i64 = 86_400;
/// Geocoder lookups spent on one day's map.
pub const MAX_DAY_MARKERS: usize = 5;

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("session {0} was not found or has expired")]
    SessionNotFound(String),

    #[error("an itinerary is already being generated for session {0}")]
    GenerationInFlight(String),

    #[error("session {0} has no itinerary yet")]
    NoItinerary(String),

    #[error("the itinerary for session {session_id} has no day {day}")]
    DayNotFound { session_id: String, day: u32 },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct TurnResult {
    pub session: ConversationSession,
    pub reply: Message,
}

#[derive(Debug, Clone)]
pub struct ItineraryExport {
    pub file_name: String,
    pub document: String,
}

/// Holds a session id in the busy set until dropped.
struct InFlightGuard {
    busy: Arc<Mutex<HashSet<String>>>,
    session_id: String,
}

impl InFlightGuard {
    fn acquire(busy: &Arc<Mutex<HashSet<String>>>, session_id: &str) -> Option<Self> {
        if !busy.lock().insert(session_id.to_string()) {
            return None;
        }
        Some(Self {
            busy: Arc::clone(busy),
            session_id: session_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.busy.lock().remove(&self.session_id);
    }
}

pub struct TripPlanner<G, P, S> {
    generator: ItineraryGenerator<G>,
    places: Arc<P>,
    store: Arc<S>,
    metrics: Arc<AppMetrics>,
    session_ttl: Duration,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl<G, P, S> TripPlanner<G, P, S>
where
    G: GenerationService,
    P: PlaceSearch + 'static,
    S: SessionRepository,
{
    pub fn new(
        generation: G,
        places: Arc<P>,
        store: Arc<S>,
        metrics: Arc<AppMetrics>,
        session_ttl: Duration,
    ) -> Self {
        Self {
            generator: ItineraryGenerator::new(generation, Arc::clone(&metrics)),
            places,
            store,
            metrics,
            session_ttl,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn metrics(&self) -> &Arc<AppMetrics> {
        &self.metrics
    }

    pub fn generation_service(&self) -> &G {
        self.generator.service()
    }

    pub async fn start_session(&self) -> Result<ConversationSession, PlannerError> {
        let session = start_session(
            Uuid::new_v4().to_string(),
            Utc::now() + self.session_ttl,
        );
        self.store.upsert_session(&session).await?;
        info!(session_id = %session.session_id, "planning session started");
        Ok(session)
    }

    pub async fn session(&self, session_id: &str) -> Result<ConversationSession, PlannerError> {
        self.store
            .load_session(session_id)
            .await?
            .ok_or_else(|| PlannerError::SessionNotFound(session_id.to_string()))
    }

    /// Applies one user turn. Turns for the same session never overlap: while one is
    /// running (including its itinerary generation) the next is rejected.
    #[instrument(skip(self, session_id, input), fields(session_id = %session_id))]
    pub async fn handle_turn(
        &self,
        session_id: &str,
        input: UserInput,
    ) -> Result<TurnResult, PlannerError> {
        let started = Instant::now();
        self.metrics.inc_request();

        let _guard = InFlightGuard::acquire(&self.in_flight, session_id)
            .ok_or_else(|| PlannerError::GenerationInFlight(session_id.to_string()))?;

        let session = self.session(session_id).await?;
        let Transition { session, directive } = advance(session, input);

        let mut session = match directive {
            Directive::Reply => session,
            Directive::GenerateItinerary(request) => {
                let outcome = match self.generator.generate(&request).await {
                    Ok(generated) => generated.into_outcome(),
                    Err(failure) => {
                        warn!(error = %failure, "itinerary generation failed");
                        GenerationOutcome::Failed {
                            reason: failure.to_string(),
                        }
                    }
                };
                complete_generation(session, &outcome)
            }
        };

        session.expires_at = Utc::now() + self.session_ttl;
        self.store.upsert_session(&session).await?;

        let reply = session
            .messages
            .last()
            .cloned()
            .context("conversation turn produced no reply")?;

        self.metrics.observe_latency(started.elapsed());
        info!(
            step = ?session.step,
            latency_ms = started.elapsed().as_millis() as u64,
            "turn handled"
        );

        Ok(TurnResult { session, reply })
    }

    pub async fn itinerary(&self, session_id: &str) -> Result<ParsedItinerary, PlannerError> {
        let session = self.session(session_id).await?;
        session
            .itinerary_text
            .as_deref()
            .map(parse_itinerary)
            .ok_or_else(|| PlannerError::NoItinerary(session_id.to_string()))
    }

    pub async fn export_document(&self, session_id: &str) -> Result<ItineraryExport, PlannerError> {
        let itinerary = self.itinerary(session_id).await?;
        Ok(ItineraryExport {
            file_name: export_file_name(&itinerary),
            document: render_itinerary(&itinerary),
        })
    }

    /// Map for the session's destination, or for one itinerary day when `day` is given.
    /// Falls back to the default view when nothing could be located.
    pub async fn map_view(
        &self,
        session_id: &str,
        day: Option<u32>,
    ) -> Result<MapView, PlannerError> {
        let Some(day_number) = day else {
            let session = self.session(session_id).await?;
            let Some(destination) = session.trip.destination else {
                return Ok(MapView::default());
            };
            let places = self.search_places(&destination, 1).await;
            return Ok(MapView::with_places(&places));
        };

        let itinerary = self.itinerary(session_id).await?;
        let day = itinerary
            .days
            .iter()
            .find(|day| day.day_number == day_number)
            .ok_or_else(|| PlannerError::DayNotFound {
                session_id: session_id.to_string(),
                day: day_number,
            })?;

        let mut markers = Vec::new();
        for activity in day.activities().into_iter().take(MAX_DAY_MARKERS) {
            let query = if itinerary.destination.is_empty() {
                activity.to_string()
            } else {
                format!("{activity}, {}", itinerary.destination)
            };
            if let Some(place) = self.search_places(&query, 1).await.first() {
                markers.push(MapMarker::for_stop(activity, place));
            }
        }

        info!(day = day_number, markers = markers.len(), "day map built");
        Ok(MapView::with_markers(markers))
    }

    /// Geocoder lookups degrade to an empty list; the failure is only logged and counted.
    pub async fn search_places(&self, query: &str, limit: usize) -> Vec<Place> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }

        match self.places.search(query, limit).await {
            Ok(places) => places,
            Err(error) => {
                self.metrics.inc_lookup_failure();
                warn!(%error, query, "place lookup failed");
                Vec::new()
            }
        }
    }

    pub fn suggestion_search(&self) -> SuggestionSearch<P> {
        SuggestionSearch::new(Arc::clone(&self.places), Arc::clone(&self.metrics))
    }

    pub async fn purge_expired_sessions(&self) -> Result<u64, PlannerError> {
        let removed = self.store.purge_expired(Utc::now()).await?;
        if removed > 0 {
            info!(removed, "expired planning sessions purged");
        }
        Ok(removed)
    }
}
