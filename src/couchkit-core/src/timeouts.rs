//! Deadline composition and server duration strings

use std::time::{Duration, Instant};

/// Compute the effective deadline for an operation.
///
/// The operation timeout falls back to the global timeout when unset. When the
/// caller also carries its own deadline the earlier of the two wins.
pub fn resolve_deadline(
    parent: Option<Instant>,
    timeout: Option<Duration>,
    global: Duration,
) -> Instant {
    let own = Instant::now() + timeout.unwrap_or(global);
    match parent {
        Some(parent) if parent < own => parent,
        _ => own,
    }
}

/// Time left until `deadline`, zero once it has passed
pub fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// Format a duration the way the query and analytics services expect it
pub fn format_server_timeout(timeout: Duration) -> String {
    format!("{}ms", timeout.as_millis())
}

/// Parse a server duration string such as `"1.5s"`, `"12.3ms"`, `"850µs"` or `"1m2.5s"`
pub fn parse_duration(input: &str) -> Option<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }
    if s == "0" {
        return Some(Duration::ZERO);
    }

    let mut total_nanos: f64 = 0.0;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_len == 0 {
            return None;
        }
        let value: f64 = rest[..num_len].parse().ok()?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit_nanos = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60.0 * 1e9,
            "h" => 3600.0 * 1e9,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total_nanos += value * unit_nanos;
    }

    Some(Duration::from_nanos(total_nanos.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_deadline_uses_global_when_unset() {
        let before = Instant::now();
        let deadline = resolve_deadline(None, None, Duration::from_secs(5));
        assert!(deadline >= before + Duration::from_secs(5));
    }

    #[test]
    fn test_resolve_deadline_parent_wins_when_earlier() {
        let parent = Instant::now() + Duration::from_millis(10);
        let deadline = resolve_deadline(Some(parent), Some(Duration::from_secs(60)), Duration::ZERO);
        assert_eq!(deadline, parent);
    }

    #[test]
    fn test_resolve_deadline_timeout_wins_when_earlier() {
        let parent = Instant::now() + Duration::from_secs(60);
        let deadline = resolve_deadline(Some(parent), Some(Duration::from_millis(10)), Duration::ZERO);
        assert!(deadline < parent);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration("12.5ms"), Some(Duration::from_micros(12_500)));
        assert_eq!(parse_duration("850µs"), Some(Duration::from_micros(850)));
        assert_eq!(parse_duration("1m2s"), Some(Duration::from_secs(62)));
        assert_eq!(parse_duration("0"), Some(Duration::ZERO));
        assert_eq!(parse_duration("fast"), None);
        assert_eq!(parse_duration("10parsecs"), None);
    }

    #[test]
    fn test_format_server_timeout() {
        assert_eq!(format_server_timeout(Duration::from_millis(20)), "20ms");
        assert_eq!(format_server_timeout(Duration::from_secs(75)), "75000ms");
    }
}
