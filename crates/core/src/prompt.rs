use crate::models::TripRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayCountDecision {
    Accept,
    RetryWithStrongerPrompt,
}

/// A short result earns one stronger retry; the caller never asks twice.
pub fn decide_day_count(found: usize, expected: u32) -> DayCountDecision {
    if expected > 0 && found < expected as usize {
        DayCountDecision::RetryWithStrongerPrompt
    } else {
        DayCountDecision::Accept
    }
}

pub fn build_initial_prompt(request: &TripRequest) -> String {
    let days = request.number_of_days.unwrap_or_default();
    format!(
        "{}\n\nIMPORTANT: Output exactly {days} days with headings for each day in the form 'Day X:' for X = 1 to {days}. Do not omit any day. Do not include any content before the Destination/Number of Days/Travel Dates header.",
        build_base_prompt(request)
    )
}

pub fn build_retry_prompt(request: &TripRequest) -> String {
    let days = request.number_of_days.unwrap_or_default();
    format!(
        "{}\n\nSTRICT REQUIREMENTS:\n- You MUST include headings for every day from Day 1 to Day {days}.\n- Provide all {days} days.\n- Use the exact heading format: 'Day X:' on its own line for each day.",
        build_base_prompt(request)
    )
}

fn build_base_prompt(request: &TripRequest) -> String {
    let destination = request.destination.as_deref().unwrap_or_default();
    let days = request.number_of_days.unwrap_or_default();
    let (date_phrase, travel_dates) = match &request.date_range {
        Some(range) => match &range.end {
            Some(end) => (format!("from {} to {}", range.start, end), range.describe()),
            None => (format!("starting {}", range.start), range.describe()),
        },
        None => ("on flexible dates".to_string(), "flexible".to_string()),
    };
    let style = request
        .travel_style
        .map(|style| format!("{} ({})", style.label(), style.description()))
        .unwrap_or_else(|| "Balanced Adventurer".to_string());
    let interests = request.interests.join(", ");

    format!(
        "Create a detailed {days}-day travel itinerary for a trip to {destination} {date_phrase}.
Travel style: {style}
Interests: {interests}

Format the itinerary exactly as follows:
Destination: {destination}
Number of Days: {days}
Travel Dates: {travel_dates}

Day 1:
- Morning:
  • Activity 1
  • Activity 2
- Afternoon:
  • Activity 1
  • Activity 2
- Evening:
  • Activity 1
  • Activity 2

Include for each day:
- Morning, afternoon, and evening activities
- Transportation details
- Restaurant recommendations
- Estimated costs
- Important tips or notes

Make each day unique and creative, matching the traveler's interests and style.
Ensure the activities are properly spaced throughout the day and consider travel time between locations.
Format each day exactly as shown above, with proper indentation and bullet points."
    )
}
