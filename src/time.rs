use ::time::OffsetDateTime;
use ::time::format_description::BorrowedFormatItem;
use ::time::macros::format_description;
use std::ops::Neg;
use std::time::Duration;

/// Day-first date format used in the renewal log (`18-10-2026`).
const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[day]-[month]-[year]");

/// Parses the cycle delay. A bare integer is a number of milliseconds; anything else
/// is read as a human duration such as `12h` or `1day 30min`.
pub fn parse_delay(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        return s
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| format!("Invalid delay: {e}"));
    }
    cyborgtime::parse_duration(s).map_err(|e| format!("Invalid duration: {e}"))
}

pub fn format_date(date: OffsetDateTime) -> String {
    date.format(DATE_FORMAT)
        .unwrap_or_else(|_| date.date().to_string())
}

pub fn humanize_duration(mut duration: ::time::Duration) -> String {
    const SECONDS_IN_MINUTE: i64 = 60;
    const SECONDS_IN_HOUR: i64 = 3600;
    const SECONDS_IN_DAY: i64 = 86400;
    const SECONDS_IN_MONTH: i64 = 2_630_016; // Approximation (30.44 days)
    const SECONDS_IN_YEAR: i64 = 31_557_600; // Approximation (365.25 days)

    if duration.is_negative() {
        duration = duration.neg();
    }

    let mut remaining_seconds = duration.whole_seconds();

    let units = [
        ("year", SECONDS_IN_YEAR),
        ("month", SECONDS_IN_MONTH),
        ("day", SECONDS_IN_DAY),
        ("hour", SECONDS_IN_HOUR),
        ("minute", SECONDS_IN_MINUTE),
    ];
    let mut components = Vec::new();
    for (name, seconds_in_unit) in units {
        let amount = remaining_seconds / seconds_in_unit;
        remaining_seconds %= seconds_in_unit;
        if amount > 0 {
            components.push(format!("{amount} {name}{}", if amount > 1 { "s" } else { "" }));
        }
    }
    if remaining_seconds > 0 || components.is_empty() {
        components.push(format!(
            "{remaining_seconds} second{}",
            if remaining_seconds == 1 { "" } else { "s" }
        ));
    }

    components.join(", ")
}
