//! Duration parsing for timeout and delay settings

use std::time::Duration;

/// Parse a duration setting.
///
/// A bare number is taken as (possibly fractional) seconds, as in
/// `restart-delay = 0.5`. A unit suffix is also accepted: `100ms`, `10s`, `5m`, `1h`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Empty duration string".to_string());
    }

    // Find where the number ends and the unit begins
    let (num_str, unit) = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .map(|i| s.split_at(i))
        .unwrap_or((s, "s"));

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", s))?;

    let seconds_per_unit = match unit.to_lowercase().as_str() {
        "ms" => 0.001,
        "s" | "" => 1.0,
        "m" => 60.0,
        "h" => 60.0 * 60.0,
        _ => return Err(format!("Unknown duration unit: {}", unit)),
    };

    Duration::try_from_secs_f64(num * seconds_per_unit)
        .map_err(|_| format!("Duration value out of range: {}", s))
}
