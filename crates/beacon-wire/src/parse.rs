// Parsers for the free-form parameter values accepted by the HTTP surface.
use std::time::Duration;

pub type Result<T> = std::result::Result<T, ParseError>;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown priority")]
    InvalidPriority,
    #[error("invalid since value")]
    InvalidSince,
    #[error("invalid duration")]
    InvalidDuration,
}

/// Cursor into the message cache for replay requests.
///
/// `All` and `None` are the two sentinels: everything cached, or nothing
/// (the default for a streaming subscribe without backfill).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Since {
    All,
    None,
    Time(i64),
}

impl Since {
    pub fn includes(&self, time: i64) -> bool {
        match self {
            Since::All => true,
            Since::None => false,
            Since::Time(t) => time >= *t,
        }
    }
}

/// Parses `since`: a unix timestamp, a look-back duration (`12h`), or `all`.
///
/// An absent value defaults to all messages for a poll and to none for a
/// streaming subscribe.
pub fn parse_since(value: &str, poll: bool, now: i64) -> Result<Since> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(if poll { Since::All } else { Since::None });
    }
    if value == "all" {
        return Ok(Since::All);
    }
    if let Ok(ts) = value.parse::<i64>() {
        return Ok(Since::Time(ts));
    }
    if let Ok(d) = parse_duration(value) {
        return Ok(Since::Time(now - d.as_secs() as i64));
    }
    Err(ParseError::InvalidSince)
}

/// Parses a priority string into 1..5; empty means unset (0).
pub fn parse_priority(value: &str) -> Result<u8> {
    match value.trim().to_lowercase().as_str() {
        "" => Ok(0),
        "1" | "min" => Ok(1),
        "2" | "low" => Ok(2),
        "3" | "default" => Ok(3),
        "4" | "high" => Ok(4),
        "5" | "max" | "urgent" => Ok(5),
        _ => Err(ParseError::InvalidPriority),
    }
}

/// Parses a compound duration such as `90s`, `10m`, `1h30m` or `3d`.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ParseError::InvalidDuration);
    }
    let mut total = 0u64;
    let mut digits = String::new();
    let mut seen_unit = false;
    for c in value.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let n: u64 = digits.parse().map_err(|_| ParseError::InvalidDuration)?;
        digits.clear();
        seen_unit = true;
        total += match c {
            's' => n,
            'm' => n * 60,
            'h' => n * 3600,
            'd' => n * 86400,
            _ => return Err(ParseError::InvalidDuration),
        };
    }
    if !digits.is_empty() || !seen_unit {
        return Err(ParseError::InvalidDuration);
    }
    Ok(Duration::from_secs(total))
}

/// Parses a delivery time: an absolute unix timestamp, or a duration
/// relative to `now`.
pub fn parse_future_time(value: &str, now: i64) -> Result<i64> {
    let value = value.trim();
    if let Ok(ts) = value.parse::<i64>() {
        return Ok(ts);
    }
    let d = parse_duration(value).map_err(|_| ParseError::InvalidDuration)?;
    Ok(now + d.as_secs() as i64)
}

/// Splits on `sep`, trims each piece, and drops empties.
pub fn split_no_empty(value: &str, sep: char) -> Vec<String> {
    value
        .split(sep)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn since_defaults_differ_for_poll_and_stream() {
        assert_eq!(parse_since("", true, 100).expect("poll"), Since::All);
        assert_eq!(parse_since("", false, 100).expect("stream"), Since::None);
    }

    #[test]
    fn since_accepts_all_timestamp_and_duration() {
        assert_eq!(parse_since("all", false, 100).expect("all"), Since::All);
        assert_eq!(
            parse_since("1700000000", false, 100).expect("ts"),
            Since::Time(1700000000)
        );
        assert_eq!(
            parse_since("12h", false, 100_000).expect("duration"),
            Since::Time(100_000 - 12 * 3600)
        );
        assert_eq!(
            parse_since("bogus", false, 100).expect_err("bogus"),
            ParseError::InvalidSince
        );
    }

    #[test]
    fn since_includes_respects_sentinels() {
        assert!(Since::All.includes(0));
        assert!(!Since::None.includes(i64::MAX));
        assert!(Since::Time(10).includes(10));
        assert!(!Since::Time(10).includes(9));
    }

    #[test]
    fn priority_words_and_digits() {
        assert_eq!(parse_priority("").expect("empty"), 0);
        assert_eq!(parse_priority("urgent").expect("urgent"), 5);
        assert_eq!(parse_priority(" High ").expect("high"), 4);
        assert_eq!(parse_priority("2").expect("two"), 2);
        assert_eq!(
            parse_priority("bogus").expect_err("bogus"),
            ParseError::InvalidPriority
        );
    }

    #[test]
    fn durations_parse_compound_units() {
        assert_eq!(parse_duration("30s").expect("s").as_secs(), 30);
        assert_eq!(parse_duration("1h30m").expect("hm").as_secs(), 5400);
        assert_eq!(parse_duration("3d").expect("d").as_secs(), 259_200);
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("5w").is_err());
    }

    #[test]
    fn future_time_accepts_absolute_and_relative() {
        assert_eq!(parse_future_time("1700000000", 5).expect("abs"), 1700000000);
        assert_eq!(parse_future_time("10m", 1000).expect("rel"), 1600);
        assert!(parse_future_time("later", 0).is_err());
    }

    #[test]
    fn split_drops_empty_pieces() {
        assert_eq!(
            split_no_empty("a, b,,c ", ','),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(split_no_empty("", ',').is_empty());
    }
}
