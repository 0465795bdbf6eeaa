//! Lenient parser for generated itinerary text.
//!
//! The text comes from a free-form generation model, so nothing here fails: missing header
//! fields stay empty, stray lines fold into the nearest section, and a day without sections is
//! still a day.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{DateRange, Day, ParsedItinerary, Section};

static DAY_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\s#*]*Day\s+(\d+)\s*:(.*)$").expect("valid day heading regex")
});

const DESTINATION_PREFIX: &str = "Destination:";
const DAYS_PREFIX: &str = "Number of Days:";
const DATES_PREFIX: &str = "Travel Dates:";

struct DayBlock<'a> {
    day_number: u32,
    title: Option<String>,
    lines: Vec<&'a str>,
}

pub fn parse_itinerary(raw: &str) -> ParsedItinerary {
    let mut header_lines = Vec::new();
    let mut blocks: Vec<DayBlock<'_>> = Vec::new();

    for line in raw.lines() {
        if let Some((day_number, title)) = match_day_heading(line) {
            blocks.push(DayBlock {
                day_number,
                title,
                lines: Vec::new(),
            });
        } else if let Some(block) = blocks.last_mut() {
            block.lines.push(line);
        } else {
            header_lines.push(line);
        }
    }

    let mut days = blocks
        .into_iter()
        .map(|block| Day {
            day_number: block.day_number,
            title: block.title,
            sections: parse_sections(&block.lines),
        })
        .collect::<Vec<_>>();
    days.sort_by_key(|day| day.day_number);

    ParsedItinerary {
        destination: header_value(&header_lines, DESTINATION_PREFIX).unwrap_or_default(),
        number_of_days: header_value(&header_lines, DAYS_PREFIX).and_then(|value| {
            value
                .chars()
                .take_while(|ch| ch.is_ascii_digit())
                .collect::<String>()
                .parse()
                .ok()
        }),
        date_range: header_value(&header_lines, DATES_PREFIX)
            .filter(|value| !value.is_empty())
            .map(|value| DateRange::from_input(&value)),
        days,
    }
}

/// Number of `Day N:` headings found in `raw`.
pub fn count_day_headings(raw: &str) -> usize {
    raw.lines()
        .filter(|line| match_day_heading(line).is_some())
        .count()
}

fn match_day_heading(line: &str) -> Option<(u32, Option<String>)> {
    let captures = DAY_HEADING.captures(line)?;
    let day_number = captures.get(1)?.as_str().parse::<u32>().ok()?;
    let title = captures
        .get(2)
        .map(|rest| {
            rest.as_str()
                .trim_matches(|ch: char| ch == '*' || ch == '#' || ch.is_whitespace())
                .to_string()
        })
        .filter(|rest| !rest.is_empty());

    Some((day_number, title))
}

fn header_value(lines: &[&str], prefix: &str) -> Option<String> {
    lines.iter().find_map(|line| {
        line.trim()
            .trim_start_matches(['*', '#'])
            .trim_start()
            .strip_prefix(prefix)
            .map(|value| value.trim_matches(|ch: char| ch == '*' || ch.is_whitespace()).to_string())
    })
}

fn parse_sections(lines: &[&str]) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current: Option<Section> = None;

    for line in lines {
        let trimmed = line.trim();
        if let Some(title) = trimmed.strip_prefix("- ") {
            if let Some(section) = current.take() {
                sections.push(section);
            }
            current = Some(Section {
                title: clean_title(title),
                details: Vec::new(),
            });
            continue;
        }

        if trimmed.is_empty() {
            continue;
        }

        match current.as_mut() {
            Some(section) => {
                let detail = clean_detail(trimmed);
                if !detail.is_empty() {
                    section.details.push(detail);
                }
            }
            None => {
                current = Some(Section {
                    title: clean_title(trimmed),
                    details: Vec::new(),
                });
            }
        }
    }

    if let Some(section) = current {
        sections.push(section);
    }

    sections
}

fn clean_title(title: &str) -> String {
    title.trim().trim_end_matches(':').trim_end().to_string()
}

fn clean_detail(detail: &str) -> String {
    detail
        .trim_start_matches(['•', '*'])
        .trim()
        .to_string()
}
