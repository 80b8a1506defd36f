//! Storage seams. Every method that has to preserve an invariant across
//! several rows (publish, roster mark, edits, guarded deletes) is a single
//! call here and a single transaction in the implementation.

pub mod memory;
pub mod mysql;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::errors::AppResult;
use crate::model::attendance::{
    AttendanceAuditEntry, AttendanceEdit, EditOutcome, EditWindowPolicy, PeriodAttendanceRecord,
    RosterMark, Section, StudentRef,
};
use crate::model::common::{DayOfWeek, Page, Pagination};
use crate::model::schedule::{
    DayPattern, DayPatternAssignment, DayPatternChanges, NewDayPattern, NewPeriodSlot, NewShift,
    PeriodSlot, PeriodSlotChanges, Shift, ShiftChanges, TemplateFilter,
};
use crate::model::timetable::{
    NewTimetable, PlannedEntry, PublishOutcome, TeacherBooking, Timetable, TimetableEntry,
    TimetableFilter,
};

pub use memory::MemoryStore;
pub use mysql::MySqlStore;

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn create_shift(&self, new: NewShift, now: DateTime<Utc>) -> AppResult<Shift>;
    async fn get_shift(&self, tenant_id: u64, id: u64) -> AppResult<Option<Shift>>;
    async fn list_shifts(&self, tenant_id: u64, filter: &TemplateFilter, page: Pagination) -> AppResult<Page<Shift>>;
    async fn update_shift(&self, tenant_id: u64, id: u64, changes: ShiftChanges, now: DateTime<Utc>) -> AppResult<Shift>;
    /// Fails with `EntityInUse` while an active period slot references it.
    async fn delete_shift(&self, tenant_id: u64, id: u64) -> AppResult<()>;

    async fn create_day_pattern(&self, new: NewDayPattern, now: DateTime<Utc>) -> AppResult<DayPattern>;
    async fn get_day_pattern(&self, tenant_id: u64, id: u64) -> AppResult<Option<DayPattern>>;
    async fn list_day_patterns(
        &self,
        tenant_id: u64,
        filter: &TemplateFilter,
        page: Pagination,
    ) -> AppResult<Page<DayPattern>>;
    async fn update_day_pattern(
        &self,
        tenant_id: u64,
        id: u64,
        changes: DayPatternChanges,
        now: DateTime<Utc>,
    ) -> AppResult<DayPattern>;
    /// Fails with `EntityInUse` while an active period slot or a day
    /// assignment references it.
    async fn delete_day_pattern(&self, tenant_id: u64, id: u64) -> AppResult<()>;

    async fn create_period_slot(&self, new: NewPeriodSlot, now: DateTime<Utc>) -> AppResult<PeriodSlot>;
    async fn get_period_slot(&self, tenant_id: u64, id: u64) -> AppResult<Option<PeriodSlot>>;
    async fn list_period_slots(
        &self,
        tenant_id: u64,
        filter: &TemplateFilter,
        page: Pagination,
    ) -> AppResult<Page<PeriodSlot>>;
    async fn update_period_slot(
        &self,
        tenant_id: u64,
        id: u64,
        changes: PeriodSlotChanges,
        now: DateTime<Utc>,
    ) -> AppResult<PeriodSlot>;
    /// Fails with `EntityInUse` while a timetable entry or an attendance
    /// record references it.
    async fn delete_period_slot(&self, tenant_id: u64, id: u64) -> AppResult<()>;

    /// Stored assignments only; days never configured are absent.
    async fn list_day_assignments(&self, tenant_id: u64, branch_id: u64) -> AppResult<Vec<DayPatternAssignment>>;
    async fn upsert_day_assignment(&self, assignment: DayPatternAssignment) -> AppResult<DayPatternAssignment>;
}

#[async_trait]
pub trait TimetableStore: Send + Sync {
    async fn create_timetable(&self, new: NewTimetable, now: DateTime<Utc>) -> AppResult<Timetable>;
    async fn get_timetable(&self, tenant_id: u64, id: u64) -> AppResult<Option<Timetable>>;
    async fn list_timetables(
        &self,
        tenant_id: u64,
        filter: &TimetableFilter,
        page: Pagination,
    ) -> AppResult<Page<Timetable>>;
    /// Rejects archived timetables.
    async fn rename_timetable(&self, tenant_id: u64, id: u64, name: String, now: DateTime<Utc>) -> AppResult<Timetable>;
    /// Draft only; removes the entries with it.
    async fn delete_timetable(&self, tenant_id: u64, id: u64) -> AppResult<()>;

    async fn list_entries(&self, tenant_id: u64, timetable_id: u64) -> AppResult<Vec<TimetableEntry>>;
    /// Insert or replace each (day, slot) row. On a published timetable
    /// every row is conflict-checked and its booking refreshed in the same
    /// transaction.
    async fn upsert_entries(
        &self,
        tenant_id: u64,
        timetable_id: u64,
        entries: Vec<PlannedEntry>,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<TimetableEntry>>;
    async fn delete_entry(&self, tenant_id: u64, timetable_id: u64, entry_id: u64) -> AppResult<()>;

    /// Commitments of one teacher on one weekday across all published
    /// timetables of the tenant.
    async fn published_bookings(&self, tenant_id: u64, staff_id: u64, day: DayOfWeek) -> AppResult<Vec<TeacherBooking>>;

    /// Conflict check, supersede and publish as one unit of work.
    async fn publish(&self, tenant_id: u64, id: u64, now: DateTime<Utc>) -> AppResult<PublishOutcome>;
    async fn archive(&self, tenant_id: u64, id: u64, now: DateTime<Utc>) -> AppResult<Timetable>;

    /// Most recently published timetable of a section.
    async fn published_for_section(&self, tenant_id: u64, section_id: u64) -> AppResult<Option<Timetable>>;
}

#[async_trait]
pub trait AttendanceStore: Send + Sync {
    async fn get_record(&self, tenant_id: u64, id: u64) -> AppResult<Option<PeriodAttendanceRecord>>;
    async fn period_records(
        &self,
        tenant_id: u64,
        section_id: u64,
        period_slot_id: u64,
        date: NaiveDate,
    ) -> AppResult<Vec<PeriodAttendanceRecord>>;
    async fn day_records(&self, tenant_id: u64, section_id: u64, date: NaiveDate) -> AppResult<Vec<PeriodAttendanceRecord>>;

    /// Inserts the whole roster and its `create` audit entries, or nothing.
    /// Fails with `AlreadyMarked` if any student already has a record.
    async fn mark_roster(&self, mark: RosterMark) -> AppResult<Vec<PeriodAttendanceRecord>>;
    /// Applies the edits in order, one audit entry each, all or nothing.
    async fn apply_edits(&self, tenant_id: u64, edits: Vec<AttendanceEdit>) -> AppResult<Vec<EditOutcome>>;
    async fn history(&self, tenant_id: u64, attendance_id: u64) -> AppResult<Vec<AttendanceAuditEntry>>;

    async fn get_policy(&self, tenant_id: u64, branch_id: u64) -> AppResult<Option<EditWindowPolicy>>;
    async fn upsert_policy(&self, policy: EditWindowPolicy) -> AppResult<EditWindowPolicy>;
}

/// Reference data owned by other parts of the school system.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn section(&self, tenant_id: u64, section_id: u64) -> AppResult<Option<Section>>;
    /// Active students enrolled in the section, in roll order.
    async fn section_students(&self, tenant_id: u64, section_id: u64) -> AppResult<Vec<StudentRef>>;
    /// Whether the staff member actively teaches the subject to the section.
    async fn teacher_assigned(&self, tenant_id: u64, staff_id: u64, subject_id: u64, section_id: u64) -> AppResult<bool>;
}
