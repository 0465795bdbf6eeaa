pub fn normalize_text(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

/// Drops emoji and punctuation that option labels carry in front of the text.
pub fn strip_option_decoration(input: &str) -> &str {
    input
        .trim()
        .trim_start_matches(|ch: char| !ch.is_alphanumeric())
        .trim()
}

/// Reads the leading integer of inputs such as "5", "5 days" or "7days".
pub fn parse_day_count(input: &str) -> Option<u32> {
    let digits = input
        .trim()
        .chars()
        .take_while(|ch| ch.is_ascii_digit())
        .collect::<String>();

    digits.parse::<u32>().ok().filter(|days| *days > 0)
}
