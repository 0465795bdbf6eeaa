mod gemini;
mod generation;
mod places;
mod planner;

pub use gemini::{GeminiClient, GeminiConfig, DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL};
pub use generation::{GeneratedItinerary, GenerationFailure, GenerationService, ItineraryGenerator};
pub use places::{
    LookupFailure, NominatimClient, NominatimConfig, PlaceSearch, SuggestionSearch, Suggestions,
    DEFAULT_GEOCODER_BASE_URL, MIN_SUGGESTION_QUERY_CHARS, SUGGESTION_LIMIT,
    SUGGESTION_QUIET_PERIOD,
};
pub use planner::{
    ItineraryExport, PlannerError, TripPlanner, TurnResult, DEFAULT_SESSION_TTL_SECONDS,
    MAX_DAY_MARKERS,
};
