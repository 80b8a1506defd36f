//! Teacher double-booking detection.
//!
//! Everything here is pure: callers load the published bookings for the
//! teacher and hand them in. The service layer runs it as an advisory
//! pre-check; the stores run it again inside the publish transaction.

use crate::errors::AppResult;
use crate::model::common::{DayOfWeek, TimeRange};
use crate::model::timetable::{ScheduleConflict, TeacherBooking};

/// A prospective commitment of one teacher.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub staff_id: u64,
    pub day_of_week: DayOfWeek,
    pub period_slot_id: u64,
    pub range: TimeRange,
}

impl Candidate {
    fn conflict_with(&self, other: &TeacherBooking) -> ScheduleConflict {
        ScheduleConflict {
            staff_id: self.staff_id,
            day_of_week: self.day_of_week,
            period_slot_id: self.period_slot_id,
            start_time: self.range.start(),
            end_time: self.range.end(),
            conflicting_entry_id: other.entry_id,
            conflicting_timetable_id: other.timetable_id,
            conflicting_section_id: other.section_id,
            conflicting_period_slot_id: other.period_slot_id,
            conflicting_start_time: other.start_time,
            conflicting_end_time: other.end_time,
        }
    }
}

impl TryFrom<&TeacherBooking> for Candidate {
    type Error = crate::errors::AppError;

    fn try_from(booking: &TeacherBooking) -> AppResult<Self> {
        Ok(Candidate {
            staff_id: booking.staff_id,
            day_of_week: booking.day_of_week,
            period_slot_id: booking.period_slot_id,
            range: booking.range()?,
        })
    }
}

/// First booking of the same teacher on the same day whose time range
/// overlaps the candidate, ignoring bookings of `exclude_timetable_id`.
/// Earliest-starting booking wins so the report is deterministic.
pub fn find_conflict(
    candidate: &Candidate,
    bookings: &[TeacherBooking],
    exclude_timetable_id: Option<u64>,
) -> AppResult<Option<ScheduleConflict>> {
    let mut hit: Option<&TeacherBooking> = None;

    for booking in bookings {
        if booking.staff_id != candidate.staff_id
            || booking.day_of_week != candidate.day_of_week
            || Some(booking.timetable_id) == exclude_timetable_id
        {
            continue;
        }
        if !candidate.range.overlaps(&booking.range()?) {
            continue;
        }
        let earlier = match hit {
            Some(current) => (booking.start_time, booking.entry_id) < (current.start_time, current.entry_id),
            None => true,
        };
        if earlier {
            hit = Some(booking);
        }
    }

    Ok(hit.map(|booking| candidate.conflict_with(booking)))
}

/// Overlapping commitments of one teacher inside a single timetable, e.g.
/// two slots from different shifts that share minutes on the same day.
pub fn find_internal_conflict(own: &[TeacherBooking]) -> AppResult<Option<ScheduleConflict>> {
    for (i, booking) in own.iter().enumerate() {
        let candidate = Candidate::try_from(booking)?;
        let rest: Vec<TeacherBooking> = own[i + 1..]
            .iter()
            .filter(|other| other.entry_id != booking.entry_id)
            .cloned()
            .collect();
        if let Some(conflict) = find_conflict(&candidate, &rest, None)? {
            return Ok(Some(conflict));
        }
    }
    Ok(None)
}

/// Published bookings on `period_slot_id` re-checked as if the slot ran
/// over `range`. Bookings on the same slot move together and never clash
/// with each other here.
pub fn find_retime_conflict(
    period_slot_id: u64,
    range: TimeRange,
    bookings: &[TeacherBooking],
) -> AppResult<Option<ScheduleConflict>> {
    let (moved, rest): (Vec<&TeacherBooking>, Vec<&TeacherBooking>) =
        bookings.iter().partition(|b| b.period_slot_id == period_slot_id);
    let rest: Vec<TeacherBooking> = rest.into_iter().cloned().collect();

    for booking in moved {
        let candidate = Candidate {
            staff_id: booking.staff_id,
            day_of_week: booking.day_of_week,
            period_slot_id,
            range,
        };
        if let Some(conflict) = find_conflict(&candidate, &rest, None)? {
            return Ok(Some(conflict));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn booking(entry_id: u64, timetable_id: u64, staff_id: u64, day: u8, start: NaiveTime, end: NaiveTime) -> TeacherBooking {
        TeacherBooking {
            entry_id,
            timetable_id,
            section_id: timetable_id * 10,
            staff_id,
            day_of_week: DayOfWeek::new(day).unwrap(),
            period_slot_id: entry_id + 100,
            start_time: start,
            end_time: end,
        }
    }

    fn candidate(staff_id: u64, day: u8, start: NaiveTime, end: NaiveTime) -> Candidate {
        Candidate {
            staff_id,
            day_of_week: DayOfWeek::new(day).unwrap(),
            period_slot_id: 1,
            range: TimeRange::new(start, end).unwrap(),
        }
    }

    #[test]
    fn overlapping_booking_is_reported() {
        let bookings = vec![booking(1, 7, 42, 1, t(9, 0), t(9, 45))];
        let hit = find_conflict(&candidate(42, 1, t(9, 30), t(10, 15)), &bookings, None)
            .unwrap()
            .expect("conflict");
        assert_eq!(hit.conflicting_entry_id, 1);
        assert_eq!(hit.conflicting_timetable_id, 7);
        assert_eq!(hit.staff_id, 42);
    }

    #[test]
    fn back_to_back_periods_do_not_conflict() {
        let bookings = vec![booking(1, 7, 42, 1, t(9, 0), t(9, 45))];
        let hit = find_conflict(&candidate(42, 1, t(9, 45), t(10, 30)), &bookings, None).unwrap();
        assert!(hit.is_none());
    }

    #[test]
    fn other_teacher_or_day_is_ignored() {
        let bookings = vec![
            booking(1, 7, 43, 1, t(9, 0), t(9, 45)),
            booking(2, 7, 42, 2, t(9, 0), t(9, 45)),
        ];
        let hit = find_conflict(&candidate(42, 1, t(9, 0), t(9, 45)), &bookings, None).unwrap();
        assert!(hit.is_none());
    }

    #[test]
    fn excluded_timetable_never_conflicts_with_itself() {
        let bookings = vec![booking(1, 7, 42, 1, t(9, 0), t(9, 45))];
        let same = candidate(42, 1, t(9, 0), t(9, 45));
        assert!(find_conflict(&same, &bookings, Some(7)).unwrap().is_none());
        assert!(find_conflict(&same, &bookings, Some(8)).unwrap().is_some());
    }

    #[test]
    fn earliest_overlap_is_reported_first() {
        let bookings = vec![
            booking(5, 7, 42, 1, t(10, 0), t(10, 45)),
            booking(3, 8, 42, 1, t(9, 0), t(9, 45)),
        ];
        let hit = find_conflict(&candidate(42, 1, t(9, 30), t(10, 30)), &bookings, None)
            .unwrap()
            .unwrap();
        assert_eq!(hit.conflicting_entry_id, 3);
    }

    #[test]
    fn internal_overlap_within_one_timetable() {
        let own = vec![
            booking(1, 7, 42, 1, t(9, 0), t(9, 45)),
            booking(2, 7, 42, 1, t(9, 40), t(10, 20)),
            booking(3, 7, 42, 2, t(9, 0), t(9, 45)),
        ];
        let hit = find_internal_conflict(&own).unwrap().unwrap();
        assert_eq!(hit.conflicting_entry_id, 2);

        let clean = vec![own[0].clone(), own[2].clone()];
        assert!(find_internal_conflict(&clean).unwrap().is_none());
    }

    #[test]
    fn retimed_slot_is_checked_against_other_slots() {
        // slot 101 at 09:00 in timetable 7, slot 102 at 10:00 in timetable 8
        let bookings = vec![
            booking(1, 7, 42, 1, t(9, 0), t(9, 45)),
            booking(2, 8, 42, 1, t(10, 0), t(10, 45)),
        ];
        let earlier = TimeRange::new(t(9, 15), t(10, 0)).unwrap();
        let hit = find_retime_conflict(102, earlier, &bookings).unwrap().unwrap();
        assert_eq!(hit.period_slot_id, 102);
        assert_eq!(hit.conflicting_entry_id, 1);

        let later = TimeRange::new(t(11, 0), t(11, 45)).unwrap();
        assert!(find_retime_conflict(102, later, &bookings).unwrap().is_none());
    }
}
