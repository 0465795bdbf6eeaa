use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::input::strip_option_decoration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TravelStyle {
    Relaxed,
    Balanced,
    Packed,
}

impl TravelStyle {
    pub const ALL: [TravelStyle; 3] = [Self::Relaxed, Self::Balanced, Self::Packed];

    /// Accepts the style id, its label, or an option label with its emoji prefix.
    pub fn parse(value: &str) -> Option<Self> {
        match strip_option_decoration(value).to_lowercase().as_str() {
            "relaxed" | "relaxed explorer" => Some(Self::Relaxed),
            "balanced" | "balanced adventurer" => Some(Self::Balanced),
            "packed" | "packed itinerary" => Some(Self::Packed),
            _ => None,
        }
    }

    pub fn as_code(self) -> &'static str {
        match self {
            Self::Relaxed => "relaxed",
            Self::Balanced => "balanced",
            Self::Packed => "packed",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Relaxed => "Relaxed Explorer",
            Self::Balanced => "Balanced Adventurer",
            Self::Packed => "Packed Itinerary",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Relaxed => "Take it slow, enjoy the moments",
            Self::Balanced => "Mix of must-sees and downtime",
            Self::Packed => "See everything, maximize your time",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Self::Relaxed => "☕",
            Self::Balanced => "⚖️",
            Self::Packed => "⚡",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterestCategory {
    Culture,
    Food,
    Nature,
    Adventure,
    Shopping,
    Nightlife,
    Art,
    Wellness,
}

impl InterestCategory {
    pub const ALL: [InterestCategory; 8] = [
        Self::Culture,
        Self::Food,
        Self::Nature,
        Self::Adventure,
        Self::Shopping,
        Self::Nightlife,
        Self::Art,
        Self::Wellness,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = strip_option_decoration(value).to_lowercase();
        Self::ALL.into_iter().find(|category| {
            normalized == category.as_code() || normalized == category.label().to_lowercase()
        })
    }

    pub fn as_code(self) -> &'static str {
        match self {
            Self::Culture => "culture",
            Self::Food => "food",
            Self::Nature => "nature",
            Self::Adventure => "adventure",
            Self::Shopping => "shopping",
            Self::Nightlife => "nightlife",
            Self::Art => "art",
            Self::Wellness => "wellness",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Culture => "Culture & History",
            Self::Food => "Food & Dining",
            Self::Nature => "Nature & Outdoors",
            Self::Adventure => "Adventure Sports",
            Self::Shopping => "Shopping",
            Self::Nightlife => "Nightlife",
            Self::Art => "Art & Museums",
            Self::Wellness => "Wellness & Relaxation",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Self::Culture => "🏛️",
            Self::Food => "🍜",
            Self::Nature => "🌲",
            Self::Adventure => "🏄",
            Self::Shopping => "🛍️",
            Self::Nightlife => "🌙",
            Self::Art => "🎨",
            Self::Wellness => "🧘",
        }
    }
}

/// Catalog interests collapse to their code; anything else is kept as typed.
pub fn canonical_interest(value: &str) -> String {
    match InterestCategory::parse(value) {
        Some(category) => category.as_code().to_string(),
        None => value.trim().to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: String,
    pub end: Option<String>,
}

impl DateRange {
    /// Splits on the literal " to ". A missing separator leaves `end` undefined.
    pub fn from_input(value: &str) -> Self {
        let mut parts = value.split(" to ");
        let start = parts.next().unwrap_or_default().trim().to_string();
        let end = parts
            .next()
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty());

        Self { start, end }
    }

    pub fn describe(&self) -> String {
        match &self.end {
            Some(end) => format!("{} to {}", self.start, end),
            None => self.start.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripRequest {
    pub destination: Option<String>,
    pub number_of_days: Option<u32>,
    pub date_range: Option<DateRange>,
    pub interests: Vec<String>,
    pub travel_style: Option<TravelStyle>,
}

impl TripRequest {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Returns false when the tag was already collected.
    pub fn add_interest(&mut self, tag: String) -> bool {
        if tag.is_empty() || self.interests.iter().any(|existing| existing == &tag) {
            return false;
        }
        self.interests.push(tag);
        true
    }

    pub fn is_complete(&self) -> bool {
        self.destination.is_some()
            && self.number_of_days.is_some()
            && self.date_range.is_some()
            && !self.interests.is_empty()
            && self.travel_style.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStep {
    CollectingDestination,
    CollectingDuration,
    CollectingDates,
    CollectingInterests,
    CollectingStyle,
    GeneratingItinerary,
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatOption {
    pub label: String,
    pub value: String,
}

impl ChatOption {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<ChatOption>,
    pub at: DateTime<Utc>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            options: Vec::new(),
            at: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>, options: Vec<ChatOption>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            options,
            at: Utc::now(),
        }
    }

    pub fn option_values(&self) -> Vec<&str> {
        self.options.iter().map(|option| option.value.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserInput {
    Text(String),
    Option(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub session_id: String,
    pub step: ConversationStep,
    pub trip: TripRequest,
    pub messages: Vec<Message>,
    pub itinerary_text: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl ConversationSession {
    pub fn last_assistant_message(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::Assistant)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCountShortfall {
    pub expected: u32,
    pub found: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationOutcome {
    Generated {
        text: String,
        shortfall: Option<DayCountShortfall>,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedItinerary {
    pub destination: String,
    pub number_of_days: Option<u32>,
    pub date_range: Option<DateRange>,
    pub days: Vec<Day>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCountMismatch {
    pub declared: u32,
    pub found: usize,
}

impl ParsedItinerary {
    pub fn day_count_mismatch(&self) -> Option<DayCountMismatch> {
        let declared = self.number_of_days?;
        if declared as usize == self.days.len() {
            None
        } else {
            Some(DayCountMismatch {
                declared,
                found: self.days.len(),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Day {
    pub day_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub sections: Vec<Section>,
}

impl Day {
    /// Activities in itinerary order: each detail line, or the section title when a section
    /// has no details.
    pub fn activities(&self) -> Vec<&str> {
        self.sections
            .iter()
            .flat_map(|section| {
                if section.details.is_empty() {
                    vec![section.title.as_str()]
                } else {
                    section.details.iter().map(String::as_str).collect()
                }
            })
            .filter(|activity| !activity.trim().is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub details: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub display_name: String,
    pub lat: f64,
    pub lon: f64,
}
