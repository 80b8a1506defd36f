use crate::model::attendance::{
    AttendanceAuditEntry, AttendanceStatus, AttendanceSummary, ChangeType, DaySummary, EditAttendance, EditOutcome,
    EditWindowPolicy, EditWindowStatus, MarkLine, MarkOutcome, MarkRoster, PeriodAttendanceRecord, PeriodOverview,
    PeriodRoster, PeriodSummary, RosterLine, Section, SectionDayPeriods, StudentRef, UpdateEditWindowPolicy,
};
use crate::model::schedule::{
    CreateDayPattern, CreatePeriodSlot, CreateShift, DayPattern, DayPatternAssignment, PeriodSlot, Shift, SlotType,
    UpdateDayPattern, UpdatePeriodSlot, UpdateShift, UpsertDayAssignment,
};
use crate::model::timetable::{
    BulkEntries, ConflictCheck, CreateTimetable, EntryInput, PublishOutcome, RenameTimetable, ScheduleConflict,
    Timetable, TimetableEntry, TimetableStatus,
};
use utoipa::Modify;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Campus Timetable & Attendance API",
        version = "1.0.0",
        description = r#"
## Timetable scheduling and period attendance

### Key features
- **Schedule templates**
  - Shifts, day patterns and period slots per branch, plus the weekly day-pattern assignment
- **Timetables**
  - Draft, publish and archive section timetables; a teacher is never booked twice at the same time
- **Period attendance**
  - Full-roster marking per period, time-boxed edits and an append-only audit trail

### Security
Every endpoint requires a **JWT Bearer** access token carrying the tenant, branch and role of the caller.

### Response format
`{ "success": true, "data": ... }` on success, `{ "success": false, "error": { type, title, status, detail, code } }` otherwise.
"#,
    ),
    paths(
        crate::api::shift::create_shift,
        crate::api::shift::list_shifts,
        crate::api::shift::get_shift,
        crate::api::shift::update_shift,
        crate::api::shift::toggle_shift,
        crate::api::shift::delete_shift,

        crate::api::day_pattern::create_day_pattern,
        crate::api::day_pattern::list_day_patterns,
        crate::api::day_pattern::get_day_pattern,
        crate::api::day_pattern::update_day_pattern,
        crate::api::day_pattern::toggle_day_pattern,
        crate::api::day_pattern::delete_day_pattern,

        crate::api::period_slot::create_period_slot,
        crate::api::period_slot::list_period_slots,
        crate::api::period_slot::get_period_slot,
        crate::api::period_slot::update_period_slot,
        crate::api::period_slot::toggle_period_slot,
        crate::api::period_slot::delete_period_slot,

        crate::api::day_assignment::list_day_assignments,
        crate::api::day_assignment::get_day_assignment,
        crate::api::day_assignment::upsert_day_assignment,

        crate::api::timetable::create_timetable,
        crate::api::timetable::list_timetables,
        crate::api::timetable::get_timetable,
        crate::api::timetable::rename_timetable,
        crate::api::timetable::delete_timetable,
        crate::api::timetable::publish_timetable,
        crate::api::timetable::archive_timetable,
        crate::api::timetable::list_entries,
        crate::api::timetable::upsert_entry,
        crate::api::timetable::bulk_upsert_entries,
        crate::api::timetable::delete_entry,
        crate::api::timetable::check_conflict,

        crate::api::attendance::list_periods,
        crate::api::attendance::get_roster,
        crate::api::attendance::mark_roster,
        crate::api::attendance::day_summary,
        crate::api::attendance::edit_record,
        crate::api::attendance::history,
        crate::api::attendance::edit_status,
        crate::api::attendance::get_policy,
        crate::api::attendance::update_policy
    ),
    components(
        schemas(
            Shift,
            CreateShift,
            UpdateShift,
            DayPattern,
            CreateDayPattern,
            UpdateDayPattern,
            PeriodSlot,
            CreatePeriodSlot,
            UpdatePeriodSlot,
            SlotType,
            DayPatternAssignment,
            UpsertDayAssignment,
            Timetable,
            TimetableStatus,
            TimetableEntry,
            CreateTimetable,
            RenameTimetable,
            EntryInput,
            BulkEntries,
            ScheduleConflict,
            ConflictCheck,
            PublishOutcome,
            AttendanceStatus,
            ChangeType,
            PeriodAttendanceRecord,
            AttendanceAuditEntry,
            AttendanceSummary,
            EditWindowPolicy,
            EditWindowStatus,
            UpdateEditWindowPolicy,
            Section,
            StudentRef,
            PeriodOverview,
            SectionDayPeriods,
            RosterLine,
            PeriodRoster,
            PeriodSummary,
            DaySummary,
            MarkLine,
            MarkRoster,
            MarkOutcome,
            EditAttendance,
            EditOutcome
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Shift", description = "Shift templates"),
        (name = "DayPattern", description = "Day pattern templates"),
        (name = "PeriodSlot", description = "Period slot templates"),
        (name = "DayAssignment", description = "Weekday to day-pattern mapping"),
        (name = "Timetable", description = "Section timetables and teacher conflict checks"),
        (name = "StudentAttendance", description = "Period attendance, edits and audit trail"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}
