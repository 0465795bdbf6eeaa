//! Guided trip-collection dialogue.
//!
//! Every transition takes the session by value and hands it back with exactly one new assistant
//! message, except when the style answer completes the request: then the caller receives
//! [`Directive::GenerateItinerary`] and reports the result through [`complete_generation`],
//! which appends the one reply for that turn.

use chrono::{DateTime, Utc};

use crate::input::{normalize_text, parse_day_count};
use crate::models::{
    canonical_interest, ChatOption, ConversationSession, ConversationStep, DateRange,
    GenerationOutcome, InterestCategory, Message, TravelStyle, TripRequest, UserInput,
};
use crate::parser::parse_itinerary;

pub const GREETING: &str =
    "Hi! I'm your AI travel assistant. Let's plan your perfect trip! 🌍\n\nWhere would you like to travel?";
pub const MAX_TRIP_DAYS: u32 = 30;

pub const OPTION_VIEW_ITINERARY: &str = "view_itinerary";
pub const OPTION_RESTART: &str = "restart";
pub const OPTION_RETRY: &str = "retry";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Reply,
    GenerateItinerary(TripRequest),
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub session: ConversationSession,
    pub directive: Directive,
}

impl Transition {
    fn reply(session: ConversationSession) -> Self {
        Self {
            session,
            directive: Directive::Reply,
        }
    }
}

pub fn start_session(session_id: impl Into<String>, expires_at: DateTime<Utc>) -> ConversationSession {
    ConversationSession {
        session_id: session_id.into(),
        step: ConversationStep::CollectingDestination,
        trip: TripRequest::default(),
        messages: vec![greeting()],
        itinerary_text: None,
        expires_at,
    }
}

/// Clears the trip and the log back to the greeting. Valid from any step.
pub fn restart(mut session: ConversationSession) -> ConversationSession {
    session.step = ConversationStep::CollectingDestination;
    session.trip = TripRequest::default();
    session.itinerary_text = None;
    session.messages = vec![greeting()];
    session
}

pub fn advance(mut session: ConversationSession, input: UserInput) -> Transition {
    let (value, shown) = match &input {
        UserInput::Text(text) => (normalize_text(text), text.trim().to_string()),
        UserInput::Option(value) => {
            let value = value.trim().to_string();
            let label = session
                .last_assistant_message()
                .and_then(|message| message.options.iter().find(|option| option.value == value))
                .map(|option| option.label.clone())
                .unwrap_or_else(|| value.clone());
            (value, label)
        }
    };

    if is_restart(&session, &input, &value) {
        return Transition::reply(restart(session));
    }

    if value.is_empty() {
        let prompt = prompt_for_step(&session);
        session.messages.push(prompt);
        return Transition::reply(session);
    }

    session.messages.push(Message::user(shown));

    match session.step {
        ConversationStep::CollectingDestination => {
            session.trip.destination = Some(value);
            session.step = ConversationStep::CollectingDuration;
            session.messages.push(duration_question());
        }
        ConversationStep::CollectingDuration => {
            match parse_day_count(&value).filter(|days| *days <= MAX_TRIP_DAYS) {
                Some(days) => {
                    session.trip.number_of_days = Some(days);
                    session.step = ConversationStep::CollectingDates;
                    session.messages.push(dates_question());
                }
                None => session.messages.push(Message::assistant(
                    format!("Please pick a trip length between 1 and {MAX_TRIP_DAYS} days. 📅"),
                    duration_options(),
                )),
            }
        }
        ConversationStep::CollectingDates => {
            session.trip.date_range = Some(DateRange::from_input(&value));
            session.step = ConversationStep::CollectingInterests;
            session.messages.push(interests_question());
        }
        ConversationStep::CollectingInterests => {
            session.trip.add_interest(canonical_interest(&value));
            session.step = ConversationStep::CollectingStyle;
            session.messages.push(style_question());
        }
        ConversationStep::CollectingStyle => match TravelStyle::parse(&value) {
            Some(style) => {
                session.trip.travel_style = Some(style);
                session.step = ConversationStep::GeneratingItinerary;
                session.itinerary_text = None;
                let request = session.trip.clone();
                return Transition {
                    session,
                    directive: Directive::GenerateItinerary(request),
                };
            }
            None => session.messages.push(Message::assistant(
                "I didn't catch that style. Which of these fits you best? 🎭",
                style_options(),
            )),
        },
        ConversationStep::GeneratingItinerary => {
            if session.itinerary_text.is_none() {
                if value == OPTION_RETRY {
                    let request = session.trip.clone();
                    return Transition {
                        session,
                        directive: Directive::GenerateItinerary(request),
                    };
                }
                session.messages.push(failure_message());
            } else if value == OPTION_VIEW_ITINERARY {
                session.step = ConversationStep::Terminal;
                let summary = itinerary_summary(&session);
                session.messages.push(summary);
            } else {
                session.messages.push(ready_message(None));
            }
        }
        ConversationStep::Terminal => {
            let reply = if value == OPTION_VIEW_ITINERARY {
                itinerary_summary(&session)
            } else {
                Message::assistant(
                    "Your itinerary is ready. You can view it again or start a new trip.",
                    ready_options(),
                )
            };
            session.messages.push(reply);
        }
    }

    Transition::reply(session)
}

/// Appends the reply for a finished generation. Outcomes arriving after the session left
/// `GeneratingItinerary` are dropped.
pub fn complete_generation(
    mut session: ConversationSession,
    outcome: &GenerationOutcome,
) -> ConversationSession {
    if session.step != ConversationStep::GeneratingItinerary {
        return session;
    }

    match outcome {
        GenerationOutcome::Generated { text, shortfall } => {
            session.itinerary_text = Some(text.clone());
            session.messages.push(ready_message(shortfall.map(|value| {
                format!(
                    "Heads up: only {} of the {} requested days came back.",
                    value.found, value.expected
                )
            })));
        }
        GenerationOutcome::Failed { .. } => {
            session.itinerary_text = None;
            session.messages.push(failure_message());
        }
    }

    session
}

fn is_restart(session: &ConversationSession, input: &UserInput, value: &str) -> bool {
    match input {
        UserInput::Option(_) => value == OPTION_RESTART,
        UserInput::Text(_) => {
            matches!(
                session.step,
                ConversationStep::GeneratingItinerary | ConversationStep::Terminal
            ) && value.eq_ignore_ascii_case(OPTION_RESTART)
        }
    }
}

fn greeting() -> Message {
    Message::assistant(GREETING, Vec::new())
}

fn prompt_for_step(session: &ConversationSession) -> Message {
    match session.step {
        ConversationStep::CollectingDestination => {
            Message::assistant("Where would you like to travel?", Vec::new())
        }
        ConversationStep::CollectingDuration => duration_question(),
        ConversationStep::CollectingDates => dates_question(),
        ConversationStep::CollectingInterests => interests_question(),
        ConversationStep::CollectingStyle => style_question(),
        ConversationStep::GeneratingItinerary if session.itinerary_text.is_none() => {
            failure_message()
        }
        ConversationStep::GeneratingItinerary | ConversationStep::Terminal => ready_message(None),
    }
}

fn duration_question() -> Message {
    Message::assistant("How many days would you like to stay? 📅", duration_options())
}

fn duration_options() -> Vec<ChatOption> {
    [3, 5, 7, 10]
        .into_iter()
        .map(|days| ChatOption::new(format!("{days} days"), days.to_string()))
        .collect()
}

fn dates_question() -> Message {
    Message::assistant(
        "When would you like to visit? 📅",
        vec![
            ChatOption::new("Next month", "next_month"),
            ChatOption::new("In 3 months", "3_months"),
            ChatOption::new("In 6 months", "6_months"),
        ],
    )
}

fn interests_question() -> Message {
    Message::assistant(
        "What kind of experiences are you interested in? 🎯",
        InterestCategory::ALL
            .into_iter()
            .map(|interest| {
                ChatOption::new(
                    format!("{} {}", interest.emoji(), interest.label()),
                    interest.as_code(),
                )
            })
            .collect(),
    )
}

fn style_question() -> Message {
    Message::assistant("What's your preferred travel style? 🎭", style_options())
}

fn style_options() -> Vec<ChatOption> {
    TravelStyle::ALL
        .into_iter()
        .map(|style| ChatOption::new(format!("{} {}", style.emoji(), style.label()), style.as_code()))
        .collect()
}

fn ready_options() -> Vec<ChatOption> {
    vec![
        ChatOption::new("View Full Itinerary", OPTION_VIEW_ITINERARY),
        ChatOption::new("Start Over", OPTION_RESTART),
    ]
}

fn ready_message(note: Option<String>) -> Message {
    let mut text =
        "Here's your personalized itinerary! Would you like to view it in detail?".to_string();
    if let Some(note) = note {
        text.push_str("\n\n");
        text.push_str(&note);
    }
    Message::assistant(text, ready_options())
}

fn failure_message() -> Message {
    Message::assistant(
        "I apologize, but I encountered an error while generating your itinerary. Would you like to try again?",
        vec![
            ChatOption::new("Try Again", OPTION_RETRY),
            ChatOption::new("Start Over", OPTION_RESTART),
        ],
    )
}

fn itinerary_summary(session: &ConversationSession) -> Message {
    let itinerary = parse_itinerary(session.itinerary_text.as_deref().unwrap_or_default());
    let mut lines = vec![format!(
        "Your {}-day trip to {} is ready:",
        itinerary.days.len(),
        itinerary.destination
    )];
    lines.extend(itinerary.days.iter().map(|day| {
        let highlights = day
            .sections
            .iter()
            .map(|section| section.title.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        match &day.title {
            Some(title) => format!("Day {}: {} ({})", day.day_number, title, highlights),
            None => format!("Day {}: {}", day.day_number, highlights),
        }
    }));

    Message::assistant(lines.join("\n"), ready_options())
}
