use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::{IntoParams, ToSchema};

use crate::errors::AppResult;
use crate::model::common::{DayOfWeek, TimeRange};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TimetableStatus {
    Draft,
    Published,
    Archived,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
#[schema(example = json!({
    "id": 7,
    "tenant_id": 1,
    "branch_id": 3,
    "section_id": 12,
    "academic_year_id": 2025,
    "name": "Grade 5 A - Term 1",
    "status": "published",
    "published_at": "2025-01-02T08:00:00Z",
    "archived_at": null,
    "created_by": 4,
    "created_at": "2025-01-01T08:00:00Z",
    "updated_at": "2025-01-02T08:00:00Z"
}))]
pub struct Timetable {
    pub id: u64,
    pub tenant_id: u64,
    pub branch_id: u64,
    pub section_id: u64,
    pub academic_year_id: u64,
    pub name: String,
    pub status: TimetableStatus,
    #[schema(format = "date-time", value_type = String)]
    pub published_at: Option<DateTime<Utc>>,
    #[schema(format = "date-time", value_type = String)]
    pub archived_at: Option<DateTime<Utc>>,
    pub created_by: u64,
    #[schema(format = "date-time", value_type = String)]
    pub created_at: DateTime<Utc>,
    #[schema(format = "date-time", value_type = String)]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct TimetableEntry {
    pub id: u64,
    pub tenant_id: u64,
    pub timetable_id: u64,
    #[schema(value_type = u8, example = 1)]
    pub day_of_week: DayOfWeek,
    pub period_slot_id: u64,
    pub subject_id: u64,
    /// Teacher (staff member) taking the period
    pub staff_id: u64,
    pub room: Option<String>,
    #[schema(format = "date-time", value_type = String)]
    pub created_at: DateTime<Utc>,
    #[schema(format = "date-time", value_type = String)]
    pub updated_at: DateTime<Utc>,
}

/// A teacher commitment in a published timetable, resolved to wall-clock
/// times. This is what the conflict detector compares against.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TeacherBooking {
    pub entry_id: u64,
    pub timetable_id: u64,
    pub section_id: u64,
    pub staff_id: u64,
    pub day_of_week: DayOfWeek,
    pub period_slot_id: u64,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl TeacherBooking {
    pub fn range(&self) -> AppResult<TimeRange> {
        TimeRange::new(self.start_time, self.end_time)
    }
}

/// The offending pair reported when a teacher would be double-booked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ScheduleConflict {
    pub staff_id: u64,
    #[schema(value_type = u8)]
    pub day_of_week: DayOfWeek,
    pub period_slot_id: u64,
    #[schema(value_type = String, example = "09:00:00")]
    pub start_time: NaiveTime,
    #[schema(value_type = String, example = "09:45:00")]
    pub end_time: NaiveTime,
    pub conflicting_entry_id: u64,
    pub conflicting_timetable_id: u64,
    pub conflicting_section_id: u64,
    pub conflicting_period_slot_id: u64,
    #[schema(value_type = String)]
    pub conflicting_start_time: NaiveTime,
    #[schema(value_type = String)]
    pub conflicting_end_time: NaiveTime,
}

// ---------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTimetable {
    #[schema(example = 12)]
    pub section_id: u64,
    #[schema(example = 2025)]
    pub academic_year_id: u64,
    #[schema(example = "Grade 5 A - Term 1")]
    pub name: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RenameTimetable {
    #[schema(example = "Grade 5 A - Term 2")]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct EntryInput {
    #[schema(value_type = u8, example = 1)]
    pub day_of_week: DayOfWeek,
    #[schema(example = 4)]
    pub period_slot_id: u64,
    #[schema(example = 30)]
    pub subject_id: u64,
    #[schema(example = 88)]
    pub staff_id: u64,
    pub room: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BulkEntries {
    pub entries: Vec<EntryInput>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TimetableQuery {
    pub section_id: Option<u64>,
    pub academic_year_id: Option<u64>,
    pub branch_id: Option<u64>,
    pub status: Option<TimetableStatus>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ConflictQuery {
    #[param(example = 88)]
    pub staff_id: u64,
    #[param(example = 1)]
    pub day_of_week: u8,
    #[param(example = 4)]
    pub period_slot_id: u64,
    pub exclude_timetable_id: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConflictCheck {
    pub has_conflict: bool,
    pub conflict: Option<ScheduleConflict>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PublishOutcome {
    pub timetable: Timetable,
    /// Previously published timetable for the same section-year, now archived
    pub archived_timetable_id: Option<u64>,
}

// ---------------------------------------------------------------------
// Store inputs
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewTimetable {
    pub tenant_id: u64,
    pub branch_id: u64,
    pub section_id: u64,
    pub academic_year_id: u64,
    pub name: String,
    pub created_by: u64,
}

#[derive(Debug, Clone, Default)]
pub struct TimetableFilter {
    pub section_id: Option<u64>,
    pub academic_year_id: Option<u64>,
    pub branch_id: Option<u64>,
    pub status: Option<TimetableStatus>,
}

/// One entry to upsert, with its slot already resolved by the service.
#[derive(Debug, Clone)]
pub struct PlannedEntry {
    pub input: EntryInput,
    pub range: TimeRange,
}
