//! Timecode parsing and formatting.
//!
//! The localization tool writes segment boundaries as `H:MM:SS`, `MM:SS` or
//! bare seconds. Only the last component may carry a fractional part.

use thiserror::Error;

/// Timecode parsing error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimecodeError {
    #[error("timecode cannot be empty")]
    Empty,

    #[error("invalid {component} value '{value}' in timecode")]
    InvalidValue {
        component: &'static str,
        value: String,
    },

    #[error("invalid timecode format '{0}', expected H:MM:SS, MM:SS or seconds")]
    InvalidFormat(String),
}

/// Parse a timecode to total seconds.
///
/// # Examples
/// ```
/// use vcd_models::timecode::parse_timecode;
/// assert_eq!(parse_timecode("1:30:00").unwrap(), 5400.0);
/// assert_eq!(parse_timecode("05:30").unwrap(), 330.0);
/// assert_eq!(parse_timecode("12.5").unwrap(), 12.5);
/// ```
pub fn parse_timecode(text: &str) -> Result<f64, TimecodeError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(TimecodeError::Empty);
    }

    let parts: Vec<&str> = text.split(':').collect();
    match parts.as_slice() {
        [secs] => parse_seconds(secs),
        [mins, secs] => Ok(parse_whole(mins, "minutes")? * 60.0 + parse_seconds(secs)?),
        [hours, mins, secs] => Ok(parse_whole(hours, "hours")? * 3600.0
            + parse_whole(mins, "minutes")? * 60.0
            + parse_seconds(secs)?),
        _ => Err(TimecodeError::InvalidFormat(text.to_string())),
    }
}

fn parse_whole(value: &str, component: &'static str) -> Result<f64, TimecodeError> {
    value
        .parse::<u64>()
        .map(|v| v as f64)
        .map_err(|_| TimecodeError::InvalidValue {
            component,
            value: value.to_string(),
        })
}

fn parse_seconds(value: &str) -> Result<f64, TimecodeError> {
    let invalid = || TimecodeError::InvalidValue {
        component: "seconds",
        value: value.to_string(),
    };
    // f64::from_str accepts "inf", "nan" and exponents, none of which a tool emits.
    if !value.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(invalid());
    }
    let secs: f64 = value.parse().map_err(|_| invalid())?;
    Ok(secs)
}

/// Format seconds as `HH:MM:SS`, rounded to whole seconds.
pub fn format_hhmmss(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// Format seconds as `MM:SS`, switching to `HH:MM:SS` from one hour on.
pub fn format_mmss(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    if total >= 3600 {
        return format_hhmmss(seconds);
    }
    format!("{:02}:{:02}", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hh_mm_ss() {
        assert_eq!(parse_timecode("0:00:00").unwrap(), 0.0);
        assert_eq!(parse_timecode("01:00:00").unwrap(), 3600.0);
        assert_eq!(parse_timecode("1:30:45").unwrap(), 5445.0);
        assert!((parse_timecode("0:01:02.250").unwrap() - 62.25).abs() < 1e-9);
    }

    #[test]
    fn test_parse_mm_ss_and_seconds() {
        assert_eq!(parse_timecode("05:30").unwrap(), 330.0);
        assert_eq!(parse_timecode("90").unwrap(), 90.0);
        assert!((parse_timecode("7.5").unwrap() - 7.5).abs() < 1e-9);
    }

    #[test]
    fn test_fraction_only_in_last_component() {
        assert!(matches!(
            parse_timecode("1.5:30"),
            Err(TimecodeError::InvalidValue { component: "minutes", .. })
        ));
        assert!(matches!(
            parse_timecode("1:2.5:30"),
            Err(TimecodeError::InvalidValue { component: "minutes", .. })
        ));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_timecode(""), Err(TimecodeError::Empty));
        assert!(matches!(parse_timecode("1:2:3:4"), Err(TimecodeError::InvalidFormat(_))));
        assert!(matches!(parse_timecode("abc"), Err(TimecodeError::InvalidValue { .. })));
        assert!(matches!(parse_timecode("-5"), Err(TimecodeError::InvalidValue { .. })));
        assert!(matches!(parse_timecode("inf"), Err(TimecodeError::InvalidValue { .. })));
    }

    #[test]
    fn test_format() {
        assert_eq!(format_hhmmss(0.0), "00:00:00");
        assert_eq!(format_hhmmss(3661.4), "01:01:01");
        assert_eq!(format_mmss(90.0), "01:30");
        assert_eq!(format_mmss(59.6), "01:00");
        assert_eq!(format_mmss(3600.0), "01:00:00");
    }
}
