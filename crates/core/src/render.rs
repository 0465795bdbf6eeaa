use crate::models::{Day, ParsedItinerary, TripRequest};

/// Canonical text layout: header lines, then one block per day with `- ` section titles and
/// `  • ` detail bullets. Parsing the output yields the same structure back.
pub fn render_itinerary(itinerary: &ParsedItinerary) -> String {
    let mut header = vec![format!("Destination: {}", itinerary.destination)];
    if let Some(days) = itinerary.number_of_days {
        header.push(format!("Number of Days: {days}"));
    }
    if let Some(range) = &itinerary.date_range {
        header.push(format!("Travel Dates: {}", range.describe()));
    }

    let mut blocks = vec![header.join("\n")];
    blocks.extend(itinerary.days.iter().map(render_day));
    blocks.join("\n\n")
}

/// Rebuilds the header from what the traveller asked for and keeps the generated days.
pub fn compose_document(request: &TripRequest, generated: &ParsedItinerary) -> String {
    render_itinerary(&ParsedItinerary {
        destination: request.destination.clone().unwrap_or_default(),
        number_of_days: request.number_of_days,
        date_range: request.date_range.clone(),
        days: generated.days.clone(),
    })
}

pub fn export_file_name(itinerary: &ParsedItinerary) -> String {
    let slug = itinerary
        .destination
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase();

    if slug.is_empty() {
        "trip-itinerary.txt".to_string()
    } else {
        format!("{slug}-itinerary.txt")
    }
}

fn render_day(day: &Day) -> String {
    let mut lines = vec![match &day.title {
        Some(title) => format!("Day {}: {}", day.day_number, title),
        None => format!("Day {}:", day.day_number),
    }];

    for section in &day.sections {
        lines.push(format!("- {}", section.title));
        lines.extend(section.details.iter().map(|detail| format!("  • {detail}")));
    }

    lines.join("\n")
}
