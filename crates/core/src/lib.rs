pub mod conversation;
pub mod input;
pub mod map;
pub mod models;
pub mod parser;
pub mod prompt;
pub mod render;

pub use conversation::{
    advance, complete_generation, restart, start_session, Directive, Transition, GREETING,
    MAX_TRIP_DAYS, OPTION_RESTART, OPTION_RETRY, OPTION_VIEW_ITINERARY,
};
pub use input::normalize_text;
pub use map::{LatLng, MapMarker, MapView};
pub use models::*;
pub use parser::{count_day_headings, parse_itinerary};
pub use prompt::{build_initial_prompt, build_retry_prompt, decide_day_count, DayCountDecision};
pub use render::{compose_document, export_file_name, render_itinerary};
