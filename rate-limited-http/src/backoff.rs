//! Delay computation for throttled responses.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::Response;

/// Parses the standard `Retry-After` header.
///
/// Accepts both forms: delay in whole seconds and an HTTP-date.
pub fn retry_after(response: &Response) -> Option<Duration> {
    let raw = response.headers().get("retry-after")?.to_str().ok()?;

    if let Ok(secs) = raw.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let when = DateTime::parse_from_rfc2822(raw.trim()).ok()?;
    let delta = when.with_timezone(&Utc) - Utc::now();
    Some(Duration::from_secs(delta.num_seconds().max(0) as u64))
}

/// Exponential backoff with full jitter: `base · 2^retry · U(0.5, 1.0)`.
///
/// `retry` is 1-based (the first retry passes 1), so the delay before the
/// n-th retry is at least `base · 2^(n-1)`. The result is clamped to `max`.
pub fn jittered_backoff(retry: u32, base: Duration, max: Duration) -> Duration {
    let exp = base.as_millis() as f64 * 2f64.powi(retry.min(16) as i32);
    let factor = rand::thread_rng().gen_range(0.5..=1.0);
    Duration::from_millis((exp * factor) as u64).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_lower_and_upper_bounds() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(60);
        for retry in 1..=6u32 {
            for _ in 0..50 {
                let d = jittered_backoff(retry, base, max);
                let floor = base.as_millis() as u64 * 2u64.pow(retry - 1);
                assert!(
                    d.as_millis() as u64 >= floor,
                    "retry {retry}: {d:?} below floor {floor}ms"
                );
                assert!(d <= max);
            }
        }
    }

    #[test]
    fn backoff_clamps_to_max() {
        let d = jittered_backoff(16, Duration::from_secs(10), Duration::from_secs(30));
        assert_eq!(d, Duration::from_secs(30));
    }
}
