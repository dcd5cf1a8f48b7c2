use chrono::{DateTime, Utc};

/// `2024-05-01T10:00:00.123456Z`
pub fn format_timestamp(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// `10:00:00`
pub fn format_clock(time: &DateTime<Utc>) -> String {
    time.format("%H:%M:%S").to_string()
}

/// Fractional minutes from `earlier` to `later`; negative if `earlier` is in the future.
pub fn minutes_between(earlier: &DateTime<Utc>, later: &DateTime<Utc>) -> f64 {
    let elapsed = *later - *earlier;
    elapsed.num_milliseconds() as f64 / 1000.0 / 60.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn formats_with_microsecond_precision() {
        let time = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 1).unwrap() + Duration::microseconds(42);
        assert_eq!(format_timestamp(&time), "2024-05-01T10:00:01.000042Z");
        assert_eq!(format_clock(&time), "10:00:01");
    }

    #[test]
    fn measures_elapsed_minutes() {
        let earlier = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let later = earlier + Duration::seconds(90);
        assert_eq!(minutes_between(&earlier, &later), 1.5);
        assert_eq!(minutes_between(&later, &earlier), -1.5);
    }
}
