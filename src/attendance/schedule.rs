//! Department schedule boundaries for a given calendar day.
//!
//! Everything here degrades instead of failing: no department means "always
//! within schedule, never late, never overtime", an unknown time zone means
//! UTC.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::model::department::Department;

const MS_PER_MINUTE: i64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lateness {
    pub is_late: bool,
    pub late_minutes: i64,
}

pub fn department_tz(department: &Department) -> Tz {
    parse_timezone(&department.timezone).unwrap_or_else(|| {
        tracing::warn!(
            department = %department.name,
            timezone = %department.timezone,
            "Unknown department time zone, using UTC"
        );
        Tz::UTC
    })
}

fn parse_timezone(raw: &str) -> Option<Tz> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("utc") || trimmed.eq_ignore_ascii_case("gmt") {
        return Some(Tz::UTC);
    }
    let normalized = if trimmed == "Europe/Kiev" { "Europe/Kyiv" } else { trimmed };
    normalized.parse::<Tz>().ok()
}

/// Resolves a local wall-clock time to an instant. DST gaps resolve to the
/// first valid instant after the gap.
fn resolve(tz: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(t) => t.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => resolve(tz, local + Duration::hours(1)),
    }
}

/// Calendar day of `now` in the department's zone (UTC without a department).
pub fn local_day(now: DateTime<Utc>, department: Option<&Department>) -> NaiveDate {
    match department {
        Some(department) => now.with_timezone(&department_tz(department)).date_naive(),
        None => now.date_naive(),
    }
}

/// Wall-clock minute of `now` in the department's zone.
pub fn local_minute(now: DateTime<Utc>, department: &Department) -> NaiveDateTime {
    let local = now.with_timezone(&department_tz(department)).naive_local();
    local
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(local)
}

/// `[day 00:00, next day 00:00)` of the department day containing `now`.
pub fn day_bounds(now: DateTime<Utc>, department: Option<&Department>) -> (DateTime<Utc>, DateTime<Utc>) {
    let tz = department.map(department_tz).unwrap_or(Tz::UTC);
    let day = local_day(now, department);
    let start = resolve(tz, day.and_time(NaiveTime::MIN));
    let next = day.succ_opt().unwrap_or(day);
    let end = resolve(tz, next.and_time(NaiveTime::MIN));
    (start, end)
}

pub fn scheduled_start(day: NaiveDate, department: &Department) -> DateTime<Utc> {
    resolve(department_tz(department), day.and_time(department.schedule.clock_in))
}

pub fn scheduled_end(day: NaiveDate, department: &Department) -> DateTime<Utc> {
    resolve(department_tz(department), day.and_time(department.schedule.clock_out))
}

/// Inclusive on both ends.
pub fn is_within_schedule(now: DateTime<Utc>, department: Option<&Department>) -> bool {
    let Some(department) = department else {
        return true;
    };
    let day = local_day(now, Some(department));
    scheduled_start(day, department) <= now && now <= scheduled_end(day, department)
}

fn floor_minutes(delta: Duration) -> i64 {
    delta.num_milliseconds().div_euclid(MS_PER_MINUTE)
}

/// Evaluated once, at clock-in.
pub fn lateness(clock_in: DateTime<Utc>, department: Option<&Department>) -> Lateness {
    let Some(department) = department else {
        return Lateness::default();
    };
    let day = local_day(clock_in, Some(department));
    let diff = floor_minutes(clock_in - scheduled_start(day, department));
    if diff > i64::from(department.schedule.grace_period) {
        Lateness {
            is_late: true,
            late_minutes: diff,
        }
    } else {
        Lateness::default()
    }
}

/// Minutes past the scheduled end of `shift_date`, when beyond the threshold.
pub fn overtime_minutes(now: DateTime<Utc>, shift_date: NaiveDate, department: Option<&Department>) -> Option<i64> {
    let department = department?;
    let diff = floor_minutes(now - scheduled_end(shift_date, department));
    (diff > i64::from(department.schedule.overtime_threshold)).then_some(diff)
}

/// Whether the wall-clock minute `boundary` was reached in
/// `(previous, current]`. Without a previous tick only the current minute
/// counts.
pub fn boundary_reached(boundary: NaiveTime, previous: Option<NaiveDateTime>, current: NaiveDateTime) -> bool {
    let Some(previous) = previous else {
        return current.time() == boundary;
    };
    if previous >= current {
        return false;
    }
    let mut day = previous.date();
    while day <= current.date() {
        let candidate = day.and_time(boundary);
        if candidate > previous && candidate <= current {
            return true;
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    false
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::NaiveTime;

    use crate::model::department::{Department, Schedule};

    pub fn department(id: &str, tz: &str, clock_in: (u32, u32), clock_out: (u32, u32), grace: u32, overtime: u32) -> Department {
        Department {
            id: id.to_string(),
            name: format!("{id} team"),
            timezone: tz.to_string(),
            schedule: Schedule {
                clock_in: NaiveTime::from_hms_opt(clock_in.0, clock_in.1, 0).unwrap(),
                clock_out: NaiveTime::from_hms_opt(clock_out.0, clock_out.1, 0).unwrap(),
                grace_period: grace,
                overtime_threshold: overtime,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::department;
    use super::*;

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, h, m, 0).unwrap()
    }

    #[test]
    fn grace_period_decides_lateness() {
        let dept = department("ops", "UTC", (9, 0), (17, 0), 15, 30);
        assert_eq!(lateness(utc(9, 10), Some(&dept)), Lateness::default());
        assert_eq!(lateness(utc(9, 15), Some(&dept)), Lateness::default());
        assert_eq!(
            lateness(utc(9, 20), Some(&dept)),
            Lateness {
                is_late: true,
                late_minutes: 20
            }
        );
        // Early arrivals are never late.
        assert_eq!(lateness(utc(8, 30), Some(&dept)), Lateness::default());
    }

    #[test]
    fn lateness_floors_partial_minutes() {
        let dept = department("ops", "UTC", (9, 0), (17, 0), 15, 30);
        let clock_in = utc(9, 15) + Duration::seconds(59);
        assert!(!lateness(clock_in, Some(&dept)).is_late);
        let clock_in = utc(9, 16) + Duration::seconds(1);
        assert_eq!(lateness(clock_in, Some(&dept)).late_minutes, 16);
    }

    #[test]
    fn overtime_beyond_threshold() {
        let dept = department("ops", "UTC", (9, 0), (17, 0), 15, 30);
        let day = utc(0, 0).date_naive();
        assert_eq!(overtime_minutes(utc(17, 30), day, Some(&dept)), None);
        assert_eq!(overtime_minutes(utc(17, 31), day, Some(&dept)), Some(31));
        assert_eq!(overtime_minutes(utc(16, 0), day, Some(&dept)), None);
    }

    #[test]
    fn missing_department_degrades() {
        assert!(is_within_schedule(utc(3, 0), None));
        assert!(!lateness(utc(23, 0), None).is_late);
        assert_eq!(overtime_minutes(utc(23, 0), utc(0, 0).date_naive(), None), None);
    }

    #[test]
    fn window_is_inclusive_and_zoned() {
        let dept = department("ny", "America/New_York", (9, 0), (17, 0), 0, 0);
        // 2024-03-04 is EST (UTC-5): 09:00 local is 14:00Z.
        assert!(!is_within_schedule(utc(13, 59), Some(&dept)));
        assert!(is_within_schedule(utc(14, 0), Some(&dept)));
        assert!(is_within_schedule(utc(22, 0), Some(&dept)));
        assert!(!is_within_schedule(utc(22, 1), Some(&dept)));
    }

    #[test]
    fn unknown_zone_is_utc() {
        let dept = department("x", "Mars/Olympus", (9, 0), (17, 0), 0, 0);
        assert!(is_within_schedule(utc(9, 0), Some(&dept)));
        assert_eq!(day_bounds(utc(12, 0), Some(&dept)), (utc(0, 0), utc(0, 0) + Duration::days(1)));
    }

    #[test]
    fn day_bounds_follow_department_day() {
        let dept = department("ny", "America/New_York", (9, 0), (17, 0), 0, 0);
        // 02:00Z on the 4th is still the 3rd in New York.
        let (start, end) = day_bounds(utc(2, 0), Some(&dept));
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 3, 3, 5, 0, 0).unwrap());
        assert_eq!(end, utc(5, 0));
    }

    #[test]
    fn boundaries_fire_once_and_survive_late_ticks() {
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let day = utc(0, 0).date_naive();
        let at = |h, m| day.and_hms_opt(h, m, 0).unwrap();

        assert!(boundary_reached(nine, None, at(9, 0)));
        assert!(!boundary_reached(nine, None, at(9, 1)));
        assert!(boundary_reached(nine, Some(at(8, 59)), at(9, 0)));
        // Tick skipped the exact minute.
        assert!(boundary_reached(nine, Some(at(8, 58)), at(9, 1)));
        // Second tick within the same minute.
        assert!(!boundary_reached(nine, Some(at(9, 0)), at(9, 0)));
        assert!(!boundary_reached(nine, Some(at(9, 0)), at(9, 1)));
    }
}
