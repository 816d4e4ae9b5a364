// src/scheduling/conflict.rs

use chrono::{Duration, NaiveDateTime};
use uuid::Uuid;

/// Fallback when a catalog procedure has no usable duration.
pub const DEFAULT_DURATION_MIN: i64 = 30;

/// One non-cancelled booking of a dentist, with its procedure duration
/// already joined in. Loaded by the store; this module never touches I/O.
#[derive(Debug, Clone)]
pub struct BookedInterval {
    pub appointment_id: Uuid,
    pub procedure_name: String,
    pub start: NaiveDateTime,
    pub duration_min: i64,
}

impl BookedInterval {
    pub fn end(&self) -> NaiveDateTime {
        self.start + Duration::minutes(self.duration_min)
    }
}

pub fn effective_duration(duration_min: Option<i32>) -> i64 {
    match duration_min {
        Some(d) if d > 0 => d as i64,
        _ => DEFAULT_DURATION_MIN,
    }
}

/// Half-open interval overlap: [a_start, a_end) vs [b_start, b_end).
/// Back-to-back bookings (a_end == b_start) do not overlap.
pub fn overlaps(
    a_start: NaiveDateTime,
    a_end: NaiveDateTime,
    b_start: NaiveDateTime,
    b_end: NaiveDateTime,
) -> bool {
    a_start < b_end && b_start < a_end
}

/// Find the first existing booking that collides with the candidate interval.
/// The same full-interval test serves creation, reschedule and availability
/// checks. `exclude` skips the appointment being moved.
pub fn find_conflict<'a>(
    candidate_start: NaiveDateTime,
    candidate_duration_min: i64,
    existing: &'a [BookedInterval],
    exclude: Option<Uuid>,
) -> Option<&'a BookedInterval> {
    let candidate_end = candidate_start + Duration::minutes(candidate_duration_min);
    existing
        .iter()
        .filter(|b| exclude != Some(b.appointment_id))
        .find(|b| overlaps(candidate_start, candidate_end, b.start, b.end()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 10)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn booked(h: u32, m: u32, duration_min: i64) -> BookedInterval {
        BookedInterval {
            appointment_id: Uuid::new_v4(),
            procedure_name: "Limpeza".to_string(),
            start: at(h, m),
            duration_min,
        }
    }

    #[test]
    fn test_effective_duration_defaults() {
        assert_eq!(effective_duration(Some(45)), 45);
        assert_eq!(effective_duration(Some(0)), DEFAULT_DURATION_MIN);
        assert_eq!(effective_duration(Some(-10)), DEFAULT_DURATION_MIN);
        assert_eq!(effective_duration(None), DEFAULT_DURATION_MIN);
    }

    #[test]
    fn test_overlap_is_half_open() {
        // [09:00, 10:00) vs [10:00, 10:30) touch but do not overlap
        assert!(!overlaps(at(9, 0), at(10, 0), at(10, 0), at(10, 30)));
        assert!(!overlaps(at(10, 0), at(10, 30), at(9, 0), at(10, 0)));
        // one minute of overlap is a conflict
        assert!(overlaps(at(9, 0), at(10, 1), at(10, 0), at(10, 30)));
        // containment both ways
        assert!(overlaps(at(9, 0), at(11, 0), at(9, 30), at(10, 0)));
        assert!(overlaps(at(9, 30), at(10, 0), at(9, 0), at(11, 0)));
    }

    #[test]
    fn test_find_conflict_full_interval() {
        let existing = vec![booked(9, 0, 60)];

        // candidate starting inside the existing window
        assert!(find_conflict(at(9, 30), 30, &existing, None).is_some());
        // candidate ending inside the existing window
        assert!(find_conflict(at(8, 30), 60, &existing, None).is_some());
        // candidate swallowing the existing window
        assert!(find_conflict(at(8, 30), 120, &existing, None).is_some());
        // back-to-back before and after
        assert!(find_conflict(at(8, 0), 60, &existing, None).is_none());
        assert!(find_conflict(at(10, 0), 30, &existing, None).is_none());
    }

    #[test]
    fn test_exclude_skips_the_appointment_being_moved() {
        let existing = vec![booked(9, 0, 60), booked(10, 0, 30)];
        let moving = existing[0].appointment_id;

        // Moving the 09:00 appointment within its own old window is fine...
        assert!(find_conflict(at(9, 15), 30, &existing, Some(moving)).is_none());
        // ...but not onto the 10:00 one.
        let hit = find_conflict(at(9, 45), 30, &existing, Some(moving));
        assert_eq!(hit.unwrap().appointment_id, existing[1].appointment_id);
    }

    #[test]
    fn test_pairwise_sweep_matches_interval_math() {
        // Sweep candidate starts across the day grid against a fixed booking
        // and cross-check the detector against the raw interval test.
        let existing = vec![booked(11, 0, 45)];
        for start_min in (8 * 60..18 * 60).step_by(15) {
            for duration in [15i64, 30, 45, 60, 90] {
                let start = at((start_min / 60) as u32, (start_min % 60) as u32);
                let end = start + Duration::minutes(duration);
                let expected = overlaps(start, end, existing[0].start, existing[0].end());
                let got = find_conflict(start, duration, &existing, None).is_some();
                assert_eq!(got, expected, "start={start} duration={duration}");
            }
        }
    }

    #[test]
    fn test_availability_check_is_idempotent() {
        let existing = vec![booked(9, 0, 60), booked(14, 0, 90)];
        let first = find_conflict(at(9, 30), 30, &existing, None).map(|b| b.appointment_id);
        let second = find_conflict(at(9, 30), 30, &existing, None).map(|b| b.appointment_id);
        assert_eq!(first, second);

        let free_first = find_conflict(at(12, 0), 30, &existing, None).is_none();
        let free_second = find_conflict(at(12, 0), 30, &existing, None).is_none();
        assert_eq!(free_first, free_second);
    }
}
