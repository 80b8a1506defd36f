use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::{IntoParams, ToSchema};

use crate::model::common::{DayOfWeek, Patch};
use crate::model::schedule::PeriodSlot;
use crate::model::timetable::TimetableEntry;
use crate::model::wire::ClockTime;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    HalfDay,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChangeType {
    Create,
    Edit,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct PeriodAttendanceRecord {
    pub id: u64,
    pub tenant_id: u64,
    pub branch_id: u64,
    pub section_id: u64,
    pub student_id: u64,
    pub period_slot_id: u64,
    pub timetable_entry_id: u64,
    #[schema(example = "2025-01-10", format = "date", value_type = String)]
    pub attendance_date: NaiveDate,
    pub status: AttendanceStatus,
    #[schema(value_type = Option<String>, example = "09:10:00")]
    pub late_arrival_time: Option<NaiveTime>,
    pub remarks: Option<String>,
    /// User who first marked the roster
    pub marked_by: u64,
    #[schema(format = "date-time", value_type = String)]
    pub marked_at: DateTime<Utc>,
    pub updated_by: Option<u64>,
    #[schema(format = "date-time", value_type = Option<String>)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Immutable record of one change to a `PeriodAttendanceRecord`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct AttendanceAuditEntry {
    pub id: u64,
    pub tenant_id: u64,
    pub attendance_id: u64,
    pub change_type: ChangeType,
    pub previous_status: Option<AttendanceStatus>,
    pub previous_remarks: Option<String>,
    #[schema(value_type = Option<String>)]
    pub previous_late_arrival_time: Option<NaiveTime>,
    pub new_status: AttendanceStatus,
    pub new_remarks: Option<String>,
    #[schema(value_type = Option<String>)]
    pub new_late_arrival_time: Option<NaiveTime>,
    /// Always present for edits, absent for the initial mark
    pub change_reason: Option<String>,
    pub changed_by: u64,
    #[schema(format = "date-time", value_type = String)]
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct EditWindowPolicy {
    pub tenant_id: u64,
    pub branch_id: u64,
    #[schema(example = 30)]
    pub edit_window_minutes: u32,
    pub updated_by: Option<u64>,
    #[schema(format = "date-time", value_type = Option<String>)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Derived, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct EditWindowStatus {
    pub can_edit: bool,
    pub is_within_window: bool,
    pub is_original_marker: bool,
    pub has_override: bool,
    pub window_minutes: u32,
    pub elapsed_minutes: i64,
    pub remaining_minutes: i64,
    #[schema(format = "date-time", value_type = String)]
    pub marked_at: DateTime<Utc>,
    #[schema(format = "date-time", value_type = String)]
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct AttendanceSummary {
    pub total: u32,
    pub present: u32,
    pub absent: u32,
    pub late: u32,
    pub half_day: u32,
}

impl AttendanceSummary {
    pub fn count(statuses: impl IntoIterator<Item = AttendanceStatus>) -> Self {
        statuses.into_iter().fold(Self::default(), |mut acc, status| {
            acc.total += 1;
            match status {
                AttendanceStatus::Present => acc.present += 1,
                AttendanceStatus::Absent => acc.absent += 1,
                AttendanceStatus::Late => acc.late += 1,
                AttendanceStatus::HalfDay => acc.half_day += 1,
            }
            acc
        })
    }

    pub fn add(&mut self, other: &AttendanceSummary) {
        self.total += other.total;
        self.present += other.present;
        self.absent += other.absent;
        self.late += other.late;
        self.half_day += other.half_day;
    }
}

// ---------------------------------------------------------------------
// Directory (reference data owned elsewhere)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct Section {
    pub id: u64,
    pub tenant_id: u64,
    pub branch_id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct StudentRef {
    pub id: u64,
    pub full_name: String,
    pub roll_number: Option<String>,
}

// ---------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct PeriodOverview {
    pub period_slot: PeriodSlot,
    pub entry: TimetableEntry,
    pub is_marked: bool,
    pub summary: AttendanceSummary,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SectionDayPeriods {
    pub section_id: u64,
    #[schema(format = "date", value_type = String)]
    pub date: NaiveDate,
    #[schema(value_type = u8)]
    pub day_of_week: DayOfWeek,
    pub is_working_day: bool,
    pub timetable_id: Option<u64>,
    pub periods: Vec<PeriodOverview>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RosterLine {
    pub student: StudentRef,
    pub attendance_id: Option<u64>,
    pub status: AttendanceStatus,
    #[schema(value_type = Option<String>)]
    pub late_arrival_time: Option<NaiveTime>,
    pub remarks: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PeriodRoster {
    pub section_id: u64,
    pub period_slot: PeriodSlot,
    pub entry: TimetableEntry,
    #[schema(format = "date", value_type = String)]
    pub date: NaiveDate,
    pub is_marked: bool,
    #[schema(format = "date-time", value_type = Option<String>)]
    pub marked_at: Option<DateTime<Utc>>,
    pub marked_by: Option<u64>,
    pub students: Vec<RosterLine>,
    /// Counts over stored records; zero until marked
    pub summary: AttendanceSummary,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DaySummary {
    pub section_id: u64,
    #[schema(format = "date", value_type = String)]
    pub date: NaiveDate,
    pub periods: Vec<PeriodSummary>,
    pub total: AttendanceSummary,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PeriodSummary {
    pub period_slot_id: u64,
    pub summary: AttendanceSummary,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MarkOutcome {
    /// `false` when an already marked roster was corrected
    pub created: bool,
    pub records: Vec<PeriodAttendanceRecord>,
    pub summary: AttendanceSummary,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EditOutcome {
    pub record: PeriodAttendanceRecord,
    pub audit: AttendanceAuditEntry,
}

// ---------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SectionDateQuery {
    #[param(example = 12)]
    pub section_id: u64,
    #[param(example = "2025-01-10", value_type = String, format = Date)]
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BranchQuery {
    pub branch_id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct MarkLine {
    #[schema(example = 501)]
    pub student_id: u64,
    pub status: AttendanceStatus,
    #[schema(value_type = Option<String>, example = "09:10")]
    pub late_arrival_time: Option<ClockTime>,
    pub remarks: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MarkRoster {
    pub students: Vec<MarkLine>,
    /// Required only when correcting an already marked roster
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct EditAttendance {
    #[schema(value_type = Option<AttendanceStatus>)]
    pub status: Patch<AttendanceStatus>,
    /// Explicit `null` clears the remarks
    #[schema(value_type = Option<String>)]
    pub remarks: Patch<String>,
    #[schema(value_type = Option<String>)]
    pub late_arrival_time: Patch<ClockTime>,
    #[schema(example = "left early")]
    pub reason: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateEditWindowPolicy {
    #[schema(example = 30)]
    pub edit_window_minutes: u32,
}

// ---------------------------------------------------------------------
// Store inputs
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewAttendance {
    pub student_id: u64,
    pub status: AttendanceStatus,
    pub late_arrival_time: Option<NaiveTime>,
    pub remarks: Option<String>,
}

/// Full-roster insert; all rows or none.
#[derive(Debug, Clone)]
pub struct RosterMark {
    pub tenant_id: u64,
    pub branch_id: u64,
    pub section_id: u64,
    pub period_slot_id: u64,
    pub timetable_entry_id: u64,
    pub date: NaiveDate,
    pub marked_by: u64,
    pub marked_at: DateTime<Utc>,
    pub lines: Vec<NewAttendance>,
}

/// New state for one record; the store captures the previous state
/// inside the same transaction.
#[derive(Debug, Clone)]
pub struct AttendanceEdit {
    pub attendance_id: u64,
    pub status: AttendanceStatus,
    pub late_arrival_time: Option<NaiveTime>,
    pub remarks: Option<String>,
    pub reason: String,
    pub changed_by: u64,
    pub changed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_each_status() {
        let summary = AttendanceSummary::count([
            AttendanceStatus::Present,
            AttendanceStatus::Absent,
            AttendanceStatus::Present,
            AttendanceStatus::HalfDay,
            AttendanceStatus::Late,
        ]);
        assert_eq!(summary.total, 5);
        assert_eq!(summary.present, 2);
        assert_eq!(summary.absent, 1);
        assert_eq!(summary.late, 1);
        assert_eq!(summary.half_day, 1);
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(AttendanceStatus::HalfDay.as_ref(), "half_day");
        assert_eq!("half_day".parse::<AttendanceStatus>().unwrap(), AttendanceStatus::HalfDay);
        assert_eq!(
            serde_json::to_string(&AttendanceStatus::HalfDay).unwrap(),
            "\"half_day\""
        );
    }
}
