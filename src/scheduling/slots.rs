// src/scheduling/slots.rs
//
// The booking grid is quantized to fixed 30-minute slots, 08:00 to 18:00
// (20 slots per day). An appointment occupies ceil(duration/30) slots: the
// slot matching scheduled_at exactly is its starting slot, the rest are
// continuation slots that defer to the starting slot's card.

use chrono::{Duration, NaiveDate, NaiveDateTime};

pub const SLOT_MINUTES: i64 = 30;
pub const DAY_START_HOUR: u32 = 8;
pub const DAY_END_HOUR: u32 = 18;
pub const SLOTS_PER_DAY: usize =
    ((DAY_END_HOUR - DAY_START_HOUR) as i64 * 60 / SLOT_MINUTES) as usize;

/// Number of grid slots an appointment of this duration occupies.
pub fn slot_span(duration_min: i64) -> i64 {
    if duration_min <= 0 {
        return 1;
    }
    (duration_min + SLOT_MINUTES - 1) / SLOT_MINUTES
}

/// The slot whose boundary equals scheduled_at exactly carries the card.
pub fn is_starting_slot(appt_start: NaiveDateTime, slot: NaiveDateTime) -> bool {
    appt_start == slot
}

/// Strict on both ends: the boundary at appt_start is the starting slot,
/// and the boundary at appt_end belongs to whatever comes next.
pub fn is_continuation_slot(
    appt_start: NaiveDateTime,
    duration_min: i64,
    slot: NaiveDateTime,
) -> bool {
    let appt_end = appt_start + Duration::minutes(duration_min);
    appt_start < slot && slot < appt_end
}

/// The 20 slot boundaries of a working day.
pub fn day_slots(date: NaiveDate) -> Vec<NaiveDateTime> {
    let mut out = Vec::with_capacity(SLOTS_PER_DAY);
    let mut t = date.and_hms_opt(DAY_START_HOUR, 0, 0).unwrap();
    let day_end = date.and_hms_opt(DAY_END_HOUR, 0, 0).unwrap();
    while t < day_end {
        out.push(t);
        t += Duration::minutes(SLOT_MINUTES);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 10)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_slot_span_is_ceil_of_duration() {
        assert_eq!(slot_span(30), 1);
        assert_eq!(slot_span(45), 2);
        assert_eq!(slot_span(61), 3);
        assert_eq!(slot_span(0), 1);
        for d in 1..=600i64 {
            assert_eq!(slot_span(d), (d + SLOT_MINUTES - 1) / SLOT_MINUTES, "duration={d}");
        }
    }

    #[test]
    fn test_starting_vs_continuation_classification() {
        // 09:00 appointment, 90 minutes: spans 09:00, 09:30, 10:00
        let start = at(9, 0);

        assert!(is_starting_slot(start, at(9, 0)));
        assert!(!is_continuation_slot(start, 90, at(9, 0)));

        assert!(is_continuation_slot(start, 90, at(9, 30)));
        assert!(is_continuation_slot(start, 90, at(10, 0)));

        // 10:30 is past the end, free again
        assert!(!is_continuation_slot(start, 90, at(10, 30)));
        assert!(!is_starting_slot(start, at(10, 30)));
    }

    #[test]
    fn test_day_has_twenty_slots() {
        let slots = day_slots(NaiveDate::from_ymd_opt(2026, 3, 10).unwrap());
        assert_eq!(slots.len(), SLOTS_PER_DAY);
        assert_eq!(slots.len(), 20);
        assert_eq!(slots[0], at(8, 0));
        assert_eq!(slots[1], at(8, 30));
        assert_eq!(*slots.last().unwrap(), at(17, 30));
    }
}
