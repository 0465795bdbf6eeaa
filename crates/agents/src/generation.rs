use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument, warn};
use wayfinder_core::{
    build_initial_prompt, build_retry_prompt, compose_document, count_day_headings,
    decide_day_count, parse_itinerary, DayCountDecision, DayCountShortfall, GenerationOutcome,
    ParsedItinerary, TripRequest,
};
use wayfinder_observability::AppMetrics;

/// Transport or protocol trouble with the generation service. Never retried automatically.
#[derive(Debug, Error)]
pub enum GenerationFailure {
    #[error("generation service is not configured")]
    NotConfigured,

    #[error("generation request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("generation service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("generation response could not be decoded: {0}")]
    MalformedBody(String),

    #[error("generation response is missing the text payload")]
    MissingText,
}

pub trait GenerationService: Send + Sync {
    fn generate_text(
        &self,
        prompt: &str,
    ) -> impl Future<Output = Result<String, GenerationFailure>> + Send;
}

#[derive(Debug, Clone)]
pub struct GeneratedItinerary {
    /// Normalized document: header rebuilt from the request, days re-rendered.
    pub text: String,
    /// Text exactly as the service returned it on the accepted attempt.
    pub raw_text: String,
    pub itinerary: ParsedItinerary,
    pub attempts: u8,
    pub shortfall: Option<DayCountShortfall>,
}

impl GeneratedItinerary {
    pub fn into_outcome(self) -> GenerationOutcome {
        GenerationOutcome::Generated {
            text: self.text,
            shortfall: self.shortfall,
        }
    }
}

struct Attempt {
    raw_text: String,
    document: String,
    day_count: usize,
}

pub struct ItineraryGenerator<G> {
    service: G,
    metrics: Arc<AppMetrics>,
}

impl<G> ItineraryGenerator<G>
where
    G: GenerationService,
{
    pub fn new(service: G, metrics: Arc<AppMetrics>) -> Self {
        Self { service, metrics }
    }

    pub fn service(&self) -> &G {
        &self.service
    }

    #[instrument(
        skip(self, request),
        fields(
            destination = request.destination.as_deref().unwrap_or_default(),
            days = request.number_of_days.unwrap_or_default()
        )
    )]
    pub async fn generate(
        &self,
        request: &TripRequest,
    ) -> Result<GeneratedItinerary, GenerationFailure> {
        let expected = request.number_of_days.unwrap_or_default();

        let first = self.attempt(&build_initial_prompt(request), request).await?;
        let (accepted, attempts) = match decide_day_count(first.day_count, expected) {
            DayCountDecision::Accept => (first, 1),
            DayCountDecision::RetryWithStrongerPrompt => {
                warn!(
                    found = first.day_count,
                    expected, "itinerary came back short, retrying with stricter prompt"
                );
                self.metrics.inc_generation_retry();
                (self.attempt(&build_retry_prompt(request), request).await?, 2)
            }
        };

        let shortfall = (accepted.day_count < expected as usize).then_some(DayCountShortfall {
            expected,
            found: accepted.day_count,
        });
        if shortfall.is_some() {
            self.metrics.inc_day_count_shortfall();
        }

        info!(
            attempts,
            day_count = accepted.day_count,
            "itinerary generated"
        );

        Ok(GeneratedItinerary {
            itinerary: parse_itinerary(&accepted.document),
            text: accepted.document,
            raw_text: accepted.raw_text,
            attempts,
            shortfall,
        })
    }

    async fn attempt(
        &self,
        prompt: &str,
        request: &TripRequest,
    ) -> Result<Attempt, GenerationFailure> {
        self.metrics.inc_generation_call();
        let raw_text = self
            .service
            .generate_text(prompt)
            .await
            .map_err(|failure| {
                self.metrics.inc_generation_failure();
                failure
            })?;

        let document = compose_document(request, &parse_itinerary(&raw_text));
        let day_count = count_day_headings(&document);

        Ok(Attempt {
            raw_text,
            document,
            day_count,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;

    use parking_lot::Mutex;
    use wayfinder_core::{DateRange, TravelStyle};

    use super::*;

    /// Replays queued responses in order and records every prompt it was given.
    #[derive(Default)]
    pub(crate) struct ScriptedService {
        responses: Mutex<VecDeque<Result<String, GenerationFailure>>>,
        pub(crate) prompts: Mutex<Vec<String>>,
    }

    impl ScriptedService {
        pub(crate) fn new(responses: Vec<Result<String, GenerationFailure>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.prompts.lock().len()
        }
    }

    impl GenerationService for ScriptedService {
        async fn generate_text(&self, prompt: &str) -> Result<String, GenerationFailure> {
            self.prompts.lock().push(prompt.to_string());
            self.responses
                .lock()
                .pop_front()
                .unwrap_or(Err(GenerationFailure::MissingText))
        }
    }

    pub(crate) fn days_text(count: u32) -> String {
        (1..=count)
            .map(|day| format!("Day {day}:\n- Morning:\n  • Stroll\n- Evening:\n  • Dinner"))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn request(days: u32) -> TripRequest {
        TripRequest {
            destination: Some("Paris".to_string()),
            number_of_days: Some(days),
            date_range: Some(DateRange::from_input("next_month")),
            interests: vec!["food".to_string()],
            travel_style: Some(TravelStyle::Balanced),
        }
    }

    fn generator(responses: Vec<Result<String, GenerationFailure>>) -> ItineraryGenerator<ScriptedService> {
        ItineraryGenerator::new(ScriptedService::new(responses), AppMetrics::shared())
    }

    #[tokio::test]
    async fn complete_result_is_accepted_first_time() {
        let generator = generator(vec![Ok(days_text(3))]);
        let generated = generator.generate(&request(3)).await.unwrap();

        assert_eq!(generated.attempts, 1);
        assert_eq!(generated.shortfall, None);
        assert_eq!(generated.itinerary.days.len(), 3);
        assert_eq!(generated.itinerary.destination, "Paris");
        assert_eq!(generator.service().calls(), 1);
        assert!(generator.service().prompts.lock()[0].contains("IMPORTANT: Output exactly 3 days"));
    }

    #[tokio::test]
    async fn short_result_is_retried_once_with_stricter_prompt() {
        let generator = generator(vec![Ok(days_text(2)), Ok(days_text(5))]);
        let generated = generator.generate(&request(5)).await.unwrap();

        assert_eq!(generated.attempts, 2);
        assert_eq!(generated.shortfall, None);
        assert_eq!(generated.itinerary.days.len(), 5);
        let prompts = generator.service().prompts.lock();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("STRICT REQUIREMENTS"));
    }

    #[tokio::test]
    async fn still_short_after_retry_is_accepted() {
        let generator = generator(vec![
            Ok(days_text(1)),
            Ok(days_text(2)),
            Ok(days_text(5)),
        ]);
        let generated = generator.generate(&request(5)).await.unwrap();

        assert_eq!(generator.service().calls(), 2);
        assert_eq!(generated.itinerary.days.len(), 2);
        assert_eq!(
            generated.shortfall,
            Some(DayCountShortfall {
                expected: 5,
                found: 2
            })
        );
    }

    #[tokio::test]
    async fn transport_failure_is_not_retried() {
        let generator = generator(vec![
            Err(GenerationFailure::Status {
                status: 503,
                body: "overloaded".to_string(),
            }),
            Ok(days_text(3)),
        ]);
        let error = generator.generate(&request(3)).await.unwrap_err();

        assert!(matches!(error, GenerationFailure::Status { status: 503, .. }));
        assert_eq!(generator.service().calls(), 1);
    }

    #[tokio::test]
    async fn failure_on_the_retry_attempt_surfaces() {
        let generator = generator(vec![Ok(days_text(1)), Err(GenerationFailure::MissingText)]);
        let error = generator.generate(&request(4)).await.unwrap_err();
        assert!(matches!(error, GenerationFailure::MissingText));
        assert_eq!(generator.service().calls(), 2);
    }

    #[tokio::test]
    async fn stored_text_header_comes_from_request() {
        let generator = generator(vec![Ok(format!(
            "Destination: Lutetia\nNumber of Days: 9\n\n{}",
            days_text(2)
        ))]);
        let generated = generator.generate(&request(2)).await.unwrap();

        assert!(generated.text.starts_with("Destination: Paris\nNumber of Days: 2\nTravel Dates: next_month"));
        assert!(generated.raw_text.starts_with("Destination: Lutetia"));
    }
}
