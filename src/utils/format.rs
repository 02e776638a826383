use chrono::Duration;

/// `HH:MM:SS`, hours not wrapping at 24. Negative durations show as zero.
pub fn hms(duration: Duration) -> String {
    let secs = duration.num_seconds().max(0);
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_clock_style() {
        assert_eq!(hms(Duration::zero()), "00:00:00");
        assert_eq!(hms(Duration::seconds(3725)), "01:02:05");
        assert_eq!(hms(Duration::hours(27)), "27:00:00");
        assert_eq!(hms(Duration::milliseconds(59_999)), "00:00:59");
        assert_eq!(hms(Duration::seconds(-4)), "00:00:00");
    }
}
