//! Dynamic page size for backfill requests

use chrono::{DateTime, Utc};

/// Page size used when no floor is known, and for incremental fetches
pub const DEFAULT_PAGE_SIZE: usize = 200;
/// Smallest backfill page
pub const MIN_PAGE_SIZE: usize = 50;
/// Largest page the kline endpoint accepts
pub const MAX_PAGE_SIZE: usize = 1000;

const PAGE_MARGIN: f64 = 1.2;

/// Bars needed to cover `current - floor`, plus 20%, clamped to
/// `[MIN_PAGE_SIZE, MAX_PAGE_SIZE]`.
pub fn calculate_diff_limit(
    floor: Option<DateTime<Utc>>,
    current: DateTime<Utc>,
    bucket_minutes: i64,
) -> usize {
    let Some(floor) = floor else {
        return DEFAULT_PAGE_SIZE;
    };

    let bucket_secs = (bucket_minutes * 60).max(1);
    let bars = (current - floor).num_seconds().max(0) / bucket_secs;
    let with_margin = (bars as f64 * PAGE_MARGIN) as i64;

    (with_margin.max(0) as usize).clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_no_floor_returns_default() {
        assert_eq!(calculate_diff_limit(None, now(), 5), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_margin_applied_inside_bounds() {
        // 100 five-minute bars -> 120
        let floor = now() - Duration::minutes(500);
        assert_eq!(calculate_diff_limit(Some(floor), now(), 5), 120);
    }

    #[test]
    fn test_clamped_to_bounds() {
        let near = now() - Duration::minutes(10);
        assert_eq!(calculate_diff_limit(Some(near), now(), 5), MIN_PAGE_SIZE);

        let far = now() - Duration::days(180);
        assert_eq!(calculate_diff_limit(Some(far), now(), 5), MAX_PAGE_SIZE);

        // floor in the future
        let future = now() + Duration::days(1);
        assert_eq!(calculate_diff_limit(Some(future), now(), 60), MIN_PAGE_SIZE);
    }

    #[test]
    fn test_never_outside_bounds() {
        for minutes in [5, 15, 60, 240] {
            for hours in [0i64, 1, 7, 50, 400, 5000, 100_000] {
                let floor = now() - Duration::hours(hours);
                let limit = calculate_diff_limit(Some(floor), now(), minutes);
                assert!((MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&limit));
            }
        }
    }
}
