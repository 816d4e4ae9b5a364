// src/scheduling/fanout.rs
//
// Consultation-driven fan-out: one appointment per snapshot procedure,
// booked back-to-back from the consultation's start. Planning is pure; the
// consultation route replays the plan inside its transaction.

use chrono::{Duration, NaiveDateTime};
use tracing::warn;
use uuid::Uuid;

use crate::error::SchedulingError;
use crate::scheduling::conflict::{BookedInterval, find_conflict};

/// Minimum lead time for a new consultation, as clock-skew margin.
pub const MIN_LEAD_TIME_SECONDS: i64 = 60;

#[derive(Debug, Clone)]
pub struct FanOutItem {
    pub procedure_id: Uuid,
    pub display_name: String,
    pub duration_min: i64,
}

#[derive(Debug, Clone)]
pub struct PlannedAppointment {
    pub procedure_id: Uuid,
    pub display_name: String,
    pub scheduled_at: NaiveDateTime,
    pub duration_min: i64,
    pub note: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SkippedItem {
    pub procedure_id: Uuid,
    pub display_name: String,
    pub scheduled_at: NaiveDateTime,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct FanOutPlan {
    pub booked: Vec<PlannedAppointment>,
    pub skipped: Vec<SkippedItem>,
}

/// Reject consultations dated before tenant-local now + the lead margin.
pub fn validate_lead_time(
    scheduled_at: NaiveDateTime,
    local_now: NaiveDateTime,
) -> Result<(), SchedulingError> {
    if scheduled_at < local_now + Duration::seconds(MIN_LEAD_TIME_SECONDS) {
        return Err(SchedulingError::PastDate);
    }
    Ok(())
}

/// Walk the snapshot in order, threading the running clock through the fold.
/// Each item advances the clock by its duration whether or not its
/// appointment was skipped, so later procedures keep their relative offsets.
/// Items planned earlier in the same walk count as booked for the later ones.
pub fn plan_fan_out(
    consultation_id: Uuid,
    start: NaiveDateTime,
    items: &[FanOutItem],
    existing: &[BookedInterval],
) -> FanOutPlan {
    let mut taken: Vec<BookedInterval> = existing.to_vec();

    let (plan, _clock) = items.iter().fold(
        (FanOutPlan::default(), start),
        |(mut plan, clock), item| {
            match find_conflict(clock, item.duration_min, &taken, None) {
                None => {
                    taken.push(BookedInterval {
                        appointment_id: Uuid::new_v4(),
                        procedure_name: item.display_name.clone(),
                        start: clock,
                        duration_min: item.duration_min,
                    });
                    plan.booked.push(PlannedAppointment {
                        procedure_id: item.procedure_id,
                        display_name: item.display_name.clone(),
                        scheduled_at: clock,
                        duration_min: item.duration_min,
                        note: format!("Booked from consultation {consultation_id}"),
                    });
                }
                Some(hit) => {
                    let reason = SchedulingError::Conflict {
                        procedure: hit.procedure_name.clone(),
                        start: hit.start,
                        end: hit.end(),
                    }
                    .to_string();
                    warn!(
                        consultation_id = %consultation_id,
                        procedure = %item.display_name,
                        scheduled_at = %clock,
                        "skipping fan-out appointment: {reason}"
                    );
                    plan.skipped.push(SkippedItem {
                        procedure_id: item.procedure_id,
                        display_name: item.display_name.clone(),
                        scheduled_at: clock,
                        reason,
                    });
                }
            }
            (plan, clock + Duration::minutes(item.duration_min))
        },
    );

    plan
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

    fn item(name: &str, duration_min: i64) -> FanOutItem {
        FanOutItem {
            procedure_id: Uuid::new_v4(),
            display_name: name.to_string(),
            duration_min,
        }
    }

    fn booked(h: u32, m: u32, duration_min: i64) -> BookedInterval {
        BookedInterval {
            appointment_id: Uuid::new_v4(),
            procedure_name: "Canal".to_string(),
            start: at(h, m),
            duration_min,
        }
    }

    #[test]
    fn test_back_to_back_clock_advance() {
        // [A(30), B(45)] at 14:00 -> A@14:00, B@14:30 (not 14:45)
        let items = vec![item("Limpeza", 30), item("Restauração", 45)];
        let plan = plan_fan_out(Uuid::new_v4(), at(14, 0), &items, &[]);

        assert!(plan.skipped.is_empty());
        assert_eq!(plan.booked.len(), 2);
        assert_eq!(plan.booked[0].scheduled_at, at(14, 0));
        assert_eq!(plan.booked[1].scheduled_at, at(14, 30));
    }

    #[test]
    fn test_conflicting_item_is_skipped_but_rest_survive() {
        // B's window collides with a pre-existing 14:30 booking;
        // A books, B is skipped with a reason naming the collision.
        let items = vec![item("Limpeza", 30), item("Restauração", 45)];
        let existing = vec![booked(14, 30, 30)];
        let plan = plan_fan_out(Uuid::new_v4(), at(14, 0), &items, &existing);

        assert_eq!(plan.booked.len(), 1);
        assert_eq!(plan.booked[0].display_name, "Limpeza");
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].display_name, "Restauração");
        assert!(plan.skipped[0].reason.contains("Canal"));
    }

    #[test]
    fn test_clock_advances_past_skipped_items() {
        // Middle item skipped; the third keeps its intended offset
        // (14:00 + 30 + 45 = 15:15), not 14:30.
        let items = vec![item("Limpeza", 30), item("Restauração", 45), item("Raio-X", 15)];
        let existing = vec![booked(14, 30, 30)];
        let plan = plan_fan_out(Uuid::new_v4(), at(14, 0), &items, &existing);

        assert_eq!(plan.booked.len(), 2);
        assert_eq!(plan.booked[1].display_name, "Raio-X");
        assert_eq!(plan.booked[1].scheduled_at, at(15, 15));
    }

    #[test]
    fn test_fanout_items_do_not_collide_with_each_other() {
        // Two identical durations from the same start would overlap if the
        // planner forgot its own earlier bookings.
        let items = vec![item("Limpeza", 30), item("Profilaxia", 30)];
        let plan = plan_fan_out(Uuid::new_v4(), at(9, 0), &items, &[]);

        assert_eq!(plan.booked.len(), 2);
        assert_eq!(plan.booked[0].scheduled_at, at(9, 0));
        assert_eq!(plan.booked[1].scheduled_at, at(9, 30));
    }

    #[test]
    fn test_note_references_originating_consultation() {
        let consultation_id = Uuid::new_v4();
        let plan = plan_fan_out(consultation_id, at(9, 0), &[item("Limpeza", 30)], &[]);
        assert!(plan.booked[0].note.contains(&consultation_id.to_string()));
    }

    #[test]
    fn test_lead_time_guard() {
        let now = at(14, 0);
        assert!(validate_lead_time(at(13, 59), now).is_err());
        assert!(validate_lead_time(at(14, 0), now).is_err());
        // exactly now + 60s is allowed
        assert!(validate_lead_time(at(14, 1), now).is_ok());
        assert!(validate_lead_time(at(15, 0), now).is_ok());
    }
}
