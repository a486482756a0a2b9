//! Human duration strings (`1h`, `30min`, `1.5d`, `-2h 30m`) to milliseconds.

use crate::config::ConfigError;

const SECOND: f64 = 1_000.0;
const MINUTE: f64 = 60.0 * SECOND;
const HOUR: f64 = 60.0 * MINUTE;
const DAY: f64 = 24.0 * HOUR;
const WEEK: f64 = 7.0 * DAY;
const YEAR: f64 = 365.25 * DAY;
const MONTH: f64 = YEAR / 12.0;

/// Largest accepted magnitude for any configured duration or offset.
pub const MAX_DURATION_MS: i64 = 100 * YEAR as i64;

fn unit_ms(unit: &str) -> Option<f64> {
    let ms = match unit {
        "ms" | "msec" | "millisecond" | "milliseconds" => 1.0,
        "s" | "sec" | "secs" | "second" | "seconds" => SECOND,
        "m" | "min" | "mins" | "minute" | "minutes" => MINUTE,
        "h" | "hr" | "hrs" | "hour" | "hours" => HOUR,
        "d" | "day" | "days" => DAY,
        "w" | "wk" | "wks" | "week" | "weeks" => WEEK,
        "mo" | "month" | "months" => MONTH,
        "y" | "yr" | "yrs" | "year" | "years" => YEAR,
        _ => return None,
    };
    Some(ms)
}

/// Parse a duration string into signed milliseconds.
///
/// # Errors
///
/// Returns a human-readable reason when the string is empty, contains an
/// unknown unit, or a group without a number.
pub fn parse_duration(input: &str) -> Result<i64, String> {
    let trimmed = input.trim();
    let (sign, body) = match trimmed.as_bytes().first() {
        Some(b'-') => (-1.0, &trimmed[1..]),
        Some(b'+') => (1.0, &trimmed[1..]),
        _ => (1.0, trimmed),
    };

    let chars: Vec<char> = body.chars().collect();
    let mut i = 0;
    let mut total = 0.0;
    let mut groups = 0;

    while i < chars.len() {
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        if i == chars.len() {
            break;
        }

        let num_start = i;
        while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
            i += 1;
        }
        let number: String = chars[num_start..i].iter().collect();
        let value: f64 = number
            .parse()
            .map_err(|_| format!("expected a number at position {num_start}"))?;

        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        let unit_start = i;
        while i < chars.len() && chars[i].is_ascii_alphabetic() {
            i += 1;
        }
        let unit: String = chars[unit_start..i].iter().collect::<String>().to_lowercase();
        let ms = if unit.is_empty() {
            // bare numbers are milliseconds
            1.0
        } else {
            unit_ms(&unit).ok_or_else(|| format!("unknown unit '{unit}'"))?
        };

        total += value * ms;
        groups += 1;
    }

    if groups == 0 {
        return Err("empty duration".to_string());
    }

    Ok((sign * total).round() as i64)
}

/// Parse a duration, attributing failures to `path`.
///
/// # Errors
///
/// Returns `ConfigError::Invalid` naming `path` when the value is not a valid
/// range of time or exceeds [`MAX_DURATION_MS`] in either direction.
pub fn validate_interval(value: &str, path: &str) -> Result<i64, ConfigError> {
    let ms = parse_duration(value).map_err(|reason| {
        ConfigError::invalid(path, format!("'{value}' is not a valid range of time ({reason})"))
    })?;
    if !(-MAX_DURATION_MS..=MAX_DURATION_MS).contains(&ms) {
        return Err(ConfigError::invalid(
            path,
            format!("'{value}' exceeds the maximum of 100 years"),
        ));
    }
    Ok(ms)
}

/// Like [`validate_interval`], but requires an explicit leading `+` or `-`.
///
/// # Errors
///
/// Returns `ConfigError::Invalid` when the sign is missing or the duration
/// does not parse.
pub fn validate_offset(value: &str, path: &str) -> Result<i64, ConfigError> {
    if !value.starts_with('+') && !value.starts_with('-') {
        return Err(ConfigError::invalid(
            path,
            format!("'{value}' should start with a '+' or a '-'"),
        ));
    }
    validate_interval(value, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_units() {
        assert_eq!(parse_duration("1h"), Ok(3_600_000));
        assert_eq!(parse_duration("30min"), Ok(1_800_000));
        assert_eq!(parse_duration("500ms"), Ok(500));
        assert_eq!(parse_duration("2d"), Ok(172_800_000));
        assert_eq!(parse_duration("1w"), Ok(604_800_000));
    }

    #[test]
    fn parses_compound_and_fractional() {
        assert_eq!(parse_duration("1h30m"), Ok(5_400_000));
        assert_eq!(parse_duration("1h 30m"), Ok(5_400_000));
        assert_eq!(parse_duration("1.5h"), Ok(5_400_000));
    }

    #[test]
    fn keeps_sign() {
        assert_eq!(parse_duration("-1d"), Ok(-86_400_000));
        assert_eq!(parse_duration("+2h"), Ok(7_200_000));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("3 fortnights").is_err());
    }

    #[test]
    fn caps_magnitude() {
        assert_eq!(validate_interval("100y", "graph_span").unwrap(), MAX_DURATION_MS);
        let err = validate_interval("300000y", "graph_span").unwrap_err();
        assert!(err.to_string().contains("graph_span"));
        assert!(validate_offset("-100000000000000y", "span.offset").is_err());
    }

    #[test]
    fn offset_requires_sign() {
        let err = validate_offset("1h", "span.offset").unwrap_err();
        assert!(err.to_string().contains("span.offset"));
        assert_eq!(validate_offset("-1h", "span.offset").unwrap(), -3_600_000);
    }
}
