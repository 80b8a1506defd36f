//! In-process store behind one mutex. Backs the test-suite and
//! `DATABASE_URL=memory:`; every method validates first and mutates last
//! so a failed call leaves no trace.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::core::conflict::{Candidate, find_conflict, find_internal_conflict, find_retime_conflict};
use crate::errors::{AppError, AppResult};
use crate::model::attendance::{
    AttendanceAuditEntry, AttendanceEdit, ChangeType, EditOutcome, EditWindowPolicy,
    PeriodAttendanceRecord, RosterMark, Section, StudentRef,
};
use crate::model::common::{DayOfWeek, Page, Pagination};
use crate::model::schedule::{
    DayPattern, DayPatternAssignment, DayPatternChanges, NewDayPattern, NewPeriodSlot, NewShift,
    PeriodSlot, PeriodSlotChanges, Shift, ShiftChanges, TemplateFilter,
};
use crate::model::timetable::{
    NewTimetable, PlannedEntry, PublishOutcome, ScheduleConflict, TeacherBooking, Timetable,
    TimetableEntry, TimetableFilter, TimetableStatus,
};
use crate::store::{AttendanceStore, Directory, ScheduleStore, TimetableStore};

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    shifts: Vec<Shift>,
    day_patterns: Vec<DayPattern>,
    period_slots: Vec<PeriodSlot>,
    assignments: Vec<DayPatternAssignment>,
    timetables: Vec<Timetable>,
    entries: Vec<TimetableEntry>,
    records: Vec<PeriodAttendanceRecord>,
    audit: Vec<AttendanceAuditEntry>,
    policies: Vec<EditWindowPolicy>,
    sections: Vec<Section>,
    // (tenant, section, student)
    students: Vec<(u64, u64, StudentRef)>,
    // (tenant, staff, subject, section)
    teaching: HashSet<(u64, u64, u64, u64)>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn slot(&self, tenant_id: u64, id: u64) -> Option<&PeriodSlot> {
        self.period_slots
            .iter()
            .find(|s| s.tenant_id == tenant_id && s.id == id)
    }

    fn timetable(&self, tenant_id: u64, id: u64) -> AppResult<&Timetable> {
        self.timetables
            .iter()
            .find(|t| t.tenant_id == tenant_id && t.id == id)
            .ok_or_else(|| AppError::not_found("timetable", id))
    }

    fn timetable_mut(&mut self, tenant_id: u64, id: u64) -> AppResult<&mut Timetable> {
        self.timetables
            .iter_mut()
            .find(|t| t.tenant_id == tenant_id && t.id == id)
            .ok_or_else(|| AppError::not_found("timetable", id))
    }

    fn booking(&self, timetable: &Timetable, entry: &TimetableEntry) -> Option<TeacherBooking> {
        let slot = self.slot(entry.tenant_id, entry.period_slot_id)?;
        Some(TeacherBooking {
            entry_id: entry.id,
            timetable_id: timetable.id,
            section_id: timetable.section_id,
            staff_id: entry.staff_id,
            day_of_week: entry.day_of_week,
            period_slot_id: entry.period_slot_id,
            start_time: slot.start_time,
            end_time: slot.end_time,
        })
    }

    fn bookings_of(&self, timetable: &Timetable, entries: &[TimetableEntry]) -> Vec<TeacherBooking> {
        entries
            .iter()
            .filter(|e| e.timetable_id == timetable.id)
            .filter_map(|e| self.booking(timetable, e))
            .collect()
    }

    /// Bookings of every published timetable in the tenant.
    fn published_bookings(&self, tenant_id: u64) -> Vec<TeacherBooking> {
        self.timetables
            .iter()
            .filter(|t| t.tenant_id == tenant_id && t.status == TimetableStatus::Published)
            .flat_map(|t| self.bookings_of(t, &self.entries))
            .collect()
    }

    fn check_against(
        own: &[TeacherBooking],
        others: &[TeacherBooking],
        timetable_id: u64,
    ) -> AppResult<()> {
        if let Some(conflict) = find_internal_conflict(own)? {
            return Err(schedule_conflict(conflict));
        }
        for booking in own {
            let candidate = Candidate::try_from(booking)?;
            if let Some(conflict) = find_conflict(&candidate, others, Some(timetable_id))? {
                return Err(schedule_conflict(conflict));
            }
        }
        Ok(())
    }
}

fn schedule_conflict(conflict: ScheduleConflict) -> AppError {
    AppError::ScheduleConflict(Box::new(conflict))
}

fn paginate<T>(mut items: Vec<T>, page: Pagination) -> Page<T> {
    let total = items.len() as u64;
    let offset = page.offset().min(total) as usize;
    let limit = page.limit() as usize;
    let items = items.drain(offset..).take(limit).collect();
    Page { items, total }
}

fn matches_search(search: &Option<String>, name: &str, code: &str) -> bool {
    match search.as_deref().map(str::trim) {
        Some(term) if !term.is_empty() => {
            let term = term.to_lowercase();
            name.to_lowercase().contains(&term) || code.to_lowercase().contains(&term)
        }
        _ => true,
    }
}

fn next_display_order(orders: impl Iterator<Item = u32>) -> u32 {
    orders.max().map_or(1, |max| max + 1)
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn add_section(&self, section: Section) {
        self.state().sections.push(section);
    }

    pub fn enroll(&self, tenant_id: u64, section_id: u64, student: StudentRef) {
        self.state().students.push((tenant_id, section_id, student));
    }

    pub fn assign_teacher(&self, tenant_id: u64, staff_id: u64, subject_id: u64, section_id: u64) {
        self.state()
            .teaching
            .insert((tenant_id, staff_id, subject_id, section_id));
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn create_shift(&self, new: NewShift, now: DateTime<Utc>) -> AppResult<Shift> {
        let mut state = self.state();
        let siblings = || {
            state
                .shifts
                .iter()
                .filter(|s| s.tenant_id == new.tenant_id && s.branch_id == new.branch_id)
        };
        if siblings().any(|s| s.code == new.code) {
            return Err(AppError::DuplicateCode {
                entity: "shift",
                code: new.code,
            });
        }
        let display_order = new
            .display_order
            .unwrap_or_else(|| next_display_order(siblings().map(|s| s.display_order)));

        let shift = Shift {
            id: state.next_id(),
            tenant_id: new.tenant_id,
            branch_id: new.branch_id,
            name: new.name,
            code: new.code,
            start_time: new.range.start(),
            end_time: new.range.end(),
            description: new.description,
            display_order,
            is_active: new.is_active,
            created_at: now,
            updated_at: now,
        };
        state.shifts.push(shift.clone());
        Ok(shift)
    }

    async fn get_shift(&self, tenant_id: u64, id: u64) -> AppResult<Option<Shift>> {
        Ok(self
            .state()
            .shifts
            .iter()
            .find(|s| s.tenant_id == tenant_id && s.id == id)
            .cloned())
    }

    async fn list_shifts(&self, tenant_id: u64, filter: &TemplateFilter, page: Pagination) -> AppResult<Page<Shift>> {
        let state = self.state();
        let mut items: Vec<Shift> = state
            .shifts
            .iter()
            .filter(|s| s.tenant_id == tenant_id)
            .filter(|s| filter.branch_id.map_or(true, |b| s.branch_id == b))
            .filter(|s| filter.is_active.map_or(true, |a| s.is_active == a))
            .filter(|s| matches_search(&filter.search, &s.name, &s.code))
            .cloned()
            .collect();
        items.sort_by_key(|s| (s.display_order, s.id));
        Ok(paginate(items, page))
    }

    async fn update_shift(&self, tenant_id: u64, id: u64, changes: ShiftChanges, now: DateTime<Utc>) -> AppResult<Shift> {
        let mut state = self.state();
        let branch_id = state
            .shifts
            .iter()
            .find(|s| s.tenant_id == tenant_id && s.id == id)
            .map(|s| s.branch_id)
            .ok_or_else(|| AppError::not_found("shift", id))?;

        if let Some(code) = &changes.code {
            let taken = state.shifts.iter().any(|s| {
                s.tenant_id == tenant_id && s.branch_id == branch_id && s.id != id && &s.code == code
            });
            if taken {
                return Err(AppError::DuplicateCode {
                    entity: "shift",
                    code: code.clone(),
                });
            }
        }

        let shift = state
            .shifts
            .iter_mut()
            .find(|s| s.tenant_id == tenant_id && s.id == id)
            .ok_or_else(|| AppError::not_found("shift", id))?;
        if let Some(name) = changes.name {
            shift.name = name;
        }
        if let Some(code) = changes.code {
            shift.code = code;
        }
        if let Some(range) = changes.range {
            shift.start_time = range.start();
            shift.end_time = range.end();
        }
        if let Some(description) = changes.description {
            shift.description = description;
        }
        if let Some(order) = changes.display_order {
            shift.display_order = order;
        }
        if let Some(active) = changes.is_active {
            shift.is_active = active;
        }
        shift.updated_at = now;
        Ok(shift.clone())
    }

    async fn delete_shift(&self, tenant_id: u64, id: u64) -> AppResult<()> {
        let mut state = self.state();
        if !state.shifts.iter().any(|s| s.tenant_id == tenant_id && s.id == id) {
            return Err(AppError::not_found("shift", id));
        }
        if state
            .period_slots
            .iter()
            .any(|p| p.tenant_id == tenant_id && p.is_active && p.shift_id == Some(id))
        {
            return Err(AppError::EntityInUse {
                entity: "shift",
                id,
                referenced_by: "period_slot",
            });
        }
        // inactive slots only lose the optional link
        for slot in state
            .period_slots
            .iter_mut()
            .filter(|p| p.tenant_id == tenant_id && p.shift_id == Some(id))
        {
            slot.shift_id = None;
        }
        state.shifts.retain(|s| !(s.tenant_id == tenant_id && s.id == id));
        Ok(())
    }

    async fn create_day_pattern(&self, new: NewDayPattern, now: DateTime<Utc>) -> AppResult<DayPattern> {
        let mut state = self.state();
        if state
            .day_patterns
            .iter()
            .any(|p| p.tenant_id == new.tenant_id && p.code == new.code)
        {
            return Err(AppError::DuplicateCode {
                entity: "day_pattern",
                code: new.code,
            });
        }
        let display_order = new.display_order.unwrap_or_else(|| {
            next_display_order(
                state
                    .day_patterns
                    .iter()
                    .filter(|p| p.tenant_id == new.tenant_id)
                    .map(|p| p.display_order),
            )
        });

        let pattern = DayPattern {
            id: state.next_id(),
            tenant_id: new.tenant_id,
            name: new.name,
            code: new.code,
            description: new.description,
            total_periods: new.total_periods,
            display_order,
            is_active: new.is_active,
            created_at: now,
            updated_at: now,
        };
        state.day_patterns.push(pattern.clone());
        Ok(pattern)
    }

    async fn get_day_pattern(&self, tenant_id: u64, id: u64) -> AppResult<Option<DayPattern>> {
        Ok(self
            .state()
            .day_patterns
            .iter()
            .find(|p| p.tenant_id == tenant_id && p.id == id)
            .cloned())
    }

    async fn list_day_patterns(
        &self,
        tenant_id: u64,
        filter: &TemplateFilter,
        page: Pagination,
    ) -> AppResult<Page<DayPattern>> {
        let state = self.state();
        let mut items: Vec<DayPattern> = state
            .day_patterns
            .iter()
            .filter(|p| p.tenant_id == tenant_id)
            .filter(|p| filter.is_active.map_or(true, |a| p.is_active == a))
            .filter(|p| matches_search(&filter.search, &p.name, &p.code))
            .cloned()
            .collect();
        items.sort_by_key(|p| (p.display_order, p.id));
        Ok(paginate(items, page))
    }

    async fn update_day_pattern(
        &self,
        tenant_id: u64,
        id: u64,
        changes: DayPatternChanges,
        now: DateTime<Utc>,
    ) -> AppResult<DayPattern> {
        let mut state = self.state();
        if let Some(code) = &changes.code {
            if state
                .day_patterns
                .iter()
                .any(|p| p.tenant_id == tenant_id && p.id != id && &p.code == code)
            {
                return Err(AppError::DuplicateCode {
                    entity: "day_pattern",
                    code: code.clone(),
                });
            }
        }

        let pattern = state
            .day_patterns
            .iter_mut()
            .find(|p| p.tenant_id == tenant_id && p.id == id)
            .ok_or_else(|| AppError::not_found("day_pattern", id))?;
        if let Some(name) = changes.name {
            pattern.name = name;
        }
        if let Some(code) = changes.code {
            pattern.code = code;
        }
        if let Some(description) = changes.description {
            pattern.description = description;
        }
        if let Some(total) = changes.total_periods {
            pattern.total_periods = total;
        }
        if let Some(order) = changes.display_order {
            pattern.display_order = order;
        }
        if let Some(active) = changes.is_active {
            pattern.is_active = active;
        }
        pattern.updated_at = now;
        Ok(pattern.clone())
    }

    async fn delete_day_pattern(&self, tenant_id: u64, id: u64) -> AppResult<()> {
        let mut state = self.state();
        if !state
            .day_patterns
            .iter()
            .any(|p| p.tenant_id == tenant_id && p.id == id)
        {
            return Err(AppError::not_found("day_pattern", id));
        }
        if state
            .period_slots
            .iter()
            .any(|s| s.tenant_id == tenant_id && s.is_active && s.day_pattern_id == Some(id))
        {
            return Err(AppError::EntityInUse {
                entity: "day_pattern",
                id,
                referenced_by: "period_slot",
            });
        }
        if state
            .assignments
            .iter()
            .any(|a| a.tenant_id == tenant_id && a.day_pattern_id == Some(id))
        {
            return Err(AppError::EntityInUse {
                entity: "day_pattern",
                id,
                referenced_by: "day_pattern_assignment",
            });
        }
        for slot in state
            .period_slots
            .iter_mut()
            .filter(|s| s.tenant_id == tenant_id && s.day_pattern_id == Some(id))
        {
            slot.day_pattern_id = None;
        }
        state
            .day_patterns
            .retain(|p| !(p.tenant_id == tenant_id && p.id == id));
        Ok(())
    }

    async fn create_period_slot(&self, new: NewPeriodSlot, now: DateTime<Utc>) -> AppResult<PeriodSlot> {
        let mut state = self.state();
        let siblings = || {
            state
                .period_slots
                .iter()
                .filter(|s| s.tenant_id == new.tenant_id && s.branch_id == new.branch_id)
        };
        if siblings().any(|s| s.code == new.code) {
            return Err(AppError::DuplicateCode {
                entity: "period_slot",
                code: new.code,
            });
        }
        let display_order = new
            .display_order
            .unwrap_or_else(|| next_display_order(siblings().map(|s| s.display_order)));

        let slot = PeriodSlot {
            id: state.next_id(),
            tenant_id: new.tenant_id,
            branch_id: new.branch_id,
            name: new.name,
            code: new.code,
            slot_type: new.slot_type,
            start_time: new.range.start(),
            end_time: new.range.end(),
            duration_minutes: new.range.duration_minutes(),
            day_pattern_id: new.day_pattern_id,
            shift_id: new.shift_id,
            display_order,
            is_active: new.is_active,
            created_at: now,
            updated_at: now,
        };
        state.period_slots.push(slot.clone());
        Ok(slot)
    }

    async fn get_period_slot(&self, tenant_id: u64, id: u64) -> AppResult<Option<PeriodSlot>> {
        Ok(self.state().slot(tenant_id, id).cloned())
    }

    async fn list_period_slots(
        &self,
        tenant_id: u64,
        filter: &TemplateFilter,
        page: Pagination,
    ) -> AppResult<Page<PeriodSlot>> {
        let state = self.state();
        let mut items: Vec<PeriodSlot> = state
            .period_slots
            .iter()
            .filter(|s| s.tenant_id == tenant_id)
            .filter(|s| filter.branch_id.map_or(true, |b| s.branch_id == b))
            .filter(|s| filter.is_active.map_or(true, |a| s.is_active == a))
            .filter(|s| filter.day_pattern_id.map_or(true, |d| s.day_pattern_id == Some(d)))
            .filter(|s| filter.shift_id.map_or(true, |d| s.shift_id == Some(d)))
            .filter(|s| filter.slot_type.map_or(true, |t| s.slot_type == t))
            .filter(|s| matches_search(&filter.search, &s.name, &s.code))
            .cloned()
            .collect();
        items.sort_by_key(|s| (s.display_order, s.id));
        Ok(paginate(items, page))
    }

    async fn update_period_slot(
        &self,
        tenant_id: u64,
        id: u64,
        changes: PeriodSlotChanges,
        now: DateTime<Utc>,
    ) -> AppResult<PeriodSlot> {
        let mut state = self.state();
        let branch_id = state
            .slot(tenant_id, id)
            .map(|s| s.branch_id)
            .ok_or_else(|| AppError::not_found("period_slot", id))?;

        if let Some(code) = &changes.code {
            let taken = state.period_slots.iter().any(|s| {
                s.tenant_id == tenant_id && s.branch_id == branch_id && s.id != id && &s.code == code
            });
            if taken {
                return Err(AppError::DuplicateCode {
                    entity: "period_slot",
                    code: code.clone(),
                });
            }
        }
        if let Some(range) = changes.range {
            let bookings = state.published_bookings(tenant_id);
            if let Some(conflict) = find_retime_conflict(id, range, &bookings)? {
                return Err(schedule_conflict(conflict));
            }
        }

        let slot = state
            .period_slots
            .iter_mut()
            .find(|s| s.tenant_id == tenant_id && s.id == id)
            .ok_or_else(|| AppError::not_found("period_slot", id))?;
        if let Some(name) = changes.name {
            slot.name = name;
        }
        if let Some(code) = changes.code {
            slot.code = code;
        }
        if let Some(slot_type) = changes.slot_type {
            slot.slot_type = slot_type;
        }
        if let Some(range) = changes.range {
            slot.start_time = range.start();
            slot.end_time = range.end();
            slot.duration_minutes = range.duration_minutes();
        }
        if let Some(day_pattern_id) = changes.day_pattern_id {
            slot.day_pattern_id = day_pattern_id;
        }
        if let Some(shift_id) = changes.shift_id {
            slot.shift_id = shift_id;
        }
        if let Some(order) = changes.display_order {
            slot.display_order = order;
        }
        if let Some(active) = changes.is_active {
            slot.is_active = active;
        }
        slot.updated_at = now;
        Ok(slot.clone())
    }

    async fn delete_period_slot(&self, tenant_id: u64, id: u64) -> AppResult<()> {
        let mut state = self.state();
        if state.slot(tenant_id, id).is_none() {
            return Err(AppError::not_found("period_slot", id));
        }
        if state
            .entries
            .iter()
            .any(|e| e.tenant_id == tenant_id && e.period_slot_id == id)
        {
            return Err(AppError::EntityInUse {
                entity: "period_slot",
                id,
                referenced_by: "timetable_entry",
            });
        }
        if state
            .records
            .iter()
            .any(|r| r.tenant_id == tenant_id && r.period_slot_id == id)
        {
            return Err(AppError::EntityInUse {
                entity: "period_slot",
                id,
                referenced_by: "attendance_record",
            });
        }
        state
            .period_slots
            .retain(|s| !(s.tenant_id == tenant_id && s.id == id));
        Ok(())
    }

    async fn list_day_assignments(&self, tenant_id: u64, branch_id: u64) -> AppResult<Vec<DayPatternAssignment>> {
        let mut items: Vec<DayPatternAssignment> = self
            .state()
            .assignments
            .iter()
            .filter(|a| a.tenant_id == tenant_id && a.branch_id == branch_id)
            .cloned()
            .collect();
        items.sort_by_key(|a| a.day_of_week);
        Ok(items)
    }

    async fn upsert_day_assignment(&self, assignment: DayPatternAssignment) -> AppResult<DayPatternAssignment> {
        let mut state = self.state();
        let existing = state.assignments.iter_mut().find(|a| {
            a.tenant_id == assignment.tenant_id
                && a.branch_id == assignment.branch_id
                && a.day_of_week == assignment.day_of_week
        });
        match existing {
            Some(row) => *row = assignment.clone(),
            None => state.assignments.push(assignment.clone()),
        }
        Ok(assignment)
    }
}

#[async_trait]
impl TimetableStore for MemoryStore {
    async fn create_timetable(&self, new: NewTimetable, now: DateTime<Utc>) -> AppResult<Timetable> {
        let mut state = self.state();
        let timetable = Timetable {
            id: state.next_id(),
            tenant_id: new.tenant_id,
            branch_id: new.branch_id,
            section_id: new.section_id,
            academic_year_id: new.academic_year_id,
            name: new.name,
            status: TimetableStatus::Draft,
            published_at: None,
            archived_at: None,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
        };
        state.timetables.push(timetable.clone());
        Ok(timetable)
    }

    async fn get_timetable(&self, tenant_id: u64, id: u64) -> AppResult<Option<Timetable>> {
        Ok(self.state().timetable(tenant_id, id).ok().cloned())
    }

    async fn list_timetables(
        &self,
        tenant_id: u64,
        filter: &TimetableFilter,
        page: Pagination,
    ) -> AppResult<Page<Timetable>> {
        let state = self.state();
        let mut items: Vec<Timetable> = state
            .timetables
            .iter()
            .filter(|t| t.tenant_id == tenant_id)
            .filter(|t| filter.section_id.map_or(true, |v| t.section_id == v))
            .filter(|t| filter.academic_year_id.map_or(true, |v| t.academic_year_id == v))
            .filter(|t| filter.branch_id.map_or(true, |v| t.branch_id == v))
            .filter(|t| filter.status.map_or(true, |v| t.status == v))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(paginate(items, page))
    }

    async fn rename_timetable(&self, tenant_id: u64, id: u64, name: String, now: DateTime<Utc>) -> AppResult<Timetable> {
        let mut state = self.state();
        let timetable = state.timetable_mut(tenant_id, id)?;
        if timetable.status == TimetableStatus::Archived {
            return Err(AppError::InvalidState {
                entity: "timetable",
                id,
                status: timetable.status.to_string(),
                action: "rename",
            });
        }
        timetable.name = name;
        timetable.updated_at = now;
        Ok(timetable.clone())
    }

    async fn delete_timetable(&self, tenant_id: u64, id: u64) -> AppResult<()> {
        let mut state = self.state();
        let timetable = state.timetable(tenant_id, id)?;
        if timetable.status != TimetableStatus::Draft {
            return Err(AppError::InvalidState {
                entity: "timetable",
                id,
                status: timetable.status.to_string(),
                action: "delete",
            });
        }
        state.entries.retain(|e| e.timetable_id != id);
        state.timetables.retain(|t| t.id != id);
        Ok(())
    }

    async fn list_entries(&self, tenant_id: u64, timetable_id: u64) -> AppResult<Vec<TimetableEntry>> {
        let state = self.state();
        state.timetable(tenant_id, timetable_id)?;
        let mut entries: Vec<TimetableEntry> = state
            .entries
            .iter()
            .filter(|e| e.timetable_id == timetable_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| {
            let start = state.slot(tenant_id, e.period_slot_id).map(|s| s.start_time);
            (e.day_of_week, start, e.id)
        });
        Ok(entries)
    }

    async fn upsert_entries(
        &self,
        tenant_id: u64,
        timetable_id: u64,
        entries: Vec<PlannedEntry>,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<TimetableEntry>> {
        let mut state = self.state();
        let timetable = state.timetable(tenant_id, timetable_id)?.clone();
        if timetable.status == TimetableStatus::Archived {
            return Err(AppError::InvalidState {
                entity: "timetable",
                id: timetable_id,
                status: timetable.status.to_string(),
                action: "edit entries",
            });
        }

        // Build the resulting entry set first, then check it, then commit.
        let mut next = state.entries.clone();
        let mut touched = Vec::with_capacity(entries.len());
        for planned in entries {
            let input = planned.input;
            let existing = next.iter_mut().find(|e| {
                e.timetable_id == timetable_id
                    && e.day_of_week == input.day_of_week
                    && e.period_slot_id == input.period_slot_id
            });
            let id = match existing {
                Some(entry) => {
                    entry.subject_id = input.subject_id;
                    entry.staff_id = input.staff_id;
                    entry.room = input.room;
                    entry.updated_at = now;
                    entry.id
                }
                None => {
                    let id = state.next_id();
                    next.push(TimetableEntry {
                        id,
                        tenant_id,
                        timetable_id,
                        day_of_week: input.day_of_week,
                        period_slot_id: input.period_slot_id,
                        subject_id: input.subject_id,
                        staff_id: input.staff_id,
                        room: input.room,
                        created_at: now,
                        updated_at: now,
                    });
                    id
                }
            };
            touched.push(id);
        }

        if timetable.status == TimetableStatus::Published {
            let own = state.bookings_of(&timetable, &next);
            let others: Vec<TeacherBooking> = state
                .published_bookings(tenant_id)
                .into_iter()
                .filter(|b| b.timetable_id != timetable_id)
                .collect();
            State::check_against(&own, &others, timetable_id)?;
        }

        let result = touched
            .iter()
            .filter_map(|id| next.iter().find(|e| e.id == *id).cloned())
            .collect();
        state.entries = next;
        if let Ok(row) = state.timetable_mut(tenant_id, timetable_id) {
            row.updated_at = now;
        }
        Ok(result)
    }

    async fn delete_entry(&self, tenant_id: u64, timetable_id: u64, entry_id: u64) -> AppResult<()> {
        let mut state = self.state();
        let timetable = state.timetable(tenant_id, timetable_id)?;
        if timetable.status == TimetableStatus::Archived {
            return Err(AppError::InvalidState {
                entity: "timetable",
                id: timetable_id,
                status: timetable.status.to_string(),
                action: "edit entries",
            });
        }
        if !state
            .entries
            .iter()
            .any(|e| e.id == entry_id && e.timetable_id == timetable_id)
        {
            return Err(AppError::not_found("timetable_entry", entry_id));
        }
        if state.records.iter().any(|r| r.timetable_entry_id == entry_id) {
            return Err(AppError::EntityInUse {
                entity: "timetable_entry",
                id: entry_id,
                referenced_by: "attendance_record",
            });
        }
        state.entries.retain(|e| e.id != entry_id);
        Ok(())
    }

    async fn published_bookings(&self, tenant_id: u64, staff_id: u64, day: DayOfWeek) -> AppResult<Vec<TeacherBooking>> {
        Ok(self
            .state()
            .published_bookings(tenant_id)
            .into_iter()
            .filter(|b| b.staff_id == staff_id && b.day_of_week == day)
            .collect())
    }

    async fn publish(&self, tenant_id: u64, id: u64, now: DateTime<Utc>) -> AppResult<PublishOutcome> {
        let mut state = self.state();
        let timetable = state.timetable(tenant_id, id)?.clone();
        if timetable.status == TimetableStatus::Archived {
            return Err(AppError::InvalidState {
                entity: "timetable",
                id,
                status: timetable.status.to_string(),
                action: "publish",
            });
        }

        let own = state.bookings_of(&timetable, &state.entries);
        if own.is_empty() {
            return Err(AppError::validation("entries", "a timetable without entries cannot be published"));
        }

        let superseded: Vec<u64> = state
            .timetables
            .iter()
            .filter(|t| {
                t.tenant_id == tenant_id
                    && t.id != id
                    && t.section_id == timetable.section_id
                    && t.academic_year_id == timetable.academic_year_id
                    && t.status == TimetableStatus::Published
            })
            .map(|t| t.id)
            .collect();
        let others: Vec<TeacherBooking> = state
            .published_bookings(tenant_id)
            .into_iter()
            .filter(|b| !superseded.contains(&b.timetable_id))
            .collect();
        State::check_against(&own, &others, id)?;

        for old in state.timetables.iter_mut().filter(|t| superseded.contains(&t.id)) {
            old.status = TimetableStatus::Archived;
            old.archived_at = Some(now);
            old.updated_at = now;
        }
        let row = state.timetable_mut(tenant_id, id)?;
        if row.status != TimetableStatus::Published {
            row.status = TimetableStatus::Published;
            row.published_at = Some(now);
            row.updated_at = now;
        }

        Ok(PublishOutcome {
            timetable: row.clone(),
            archived_timetable_id: superseded.first().copied(),
        })
    }

    async fn archive(&self, tenant_id: u64, id: u64, now: DateTime<Utc>) -> AppResult<Timetable> {
        let mut state = self.state();
        let row = state.timetable_mut(tenant_id, id)?;
        if row.status != TimetableStatus::Published {
            return Err(AppError::InvalidState {
                entity: "timetable",
                id,
                status: row.status.to_string(),
                action: "archive",
            });
        }
        row.status = TimetableStatus::Archived;
        row.archived_at = Some(now);
        row.updated_at = now;
        Ok(row.clone())
    }

    async fn published_for_section(&self, tenant_id: u64, section_id: u64) -> AppResult<Option<Timetable>> {
        Ok(self
            .state()
            .timetables
            .iter()
            .filter(|t| {
                t.tenant_id == tenant_id
                    && t.section_id == section_id
                    && t.status == TimetableStatus::Published
            })
            .max_by_key(|t| (t.published_at, t.id))
            .cloned())
    }
}

#[async_trait]
impl AttendanceStore for MemoryStore {
    async fn get_record(&self, tenant_id: u64, id: u64) -> AppResult<Option<PeriodAttendanceRecord>> {
        Ok(self
            .state()
            .records
            .iter()
            .find(|r| r.tenant_id == tenant_id && r.id == id)
            .cloned())
    }

    async fn period_records(
        &self,
        tenant_id: u64,
        section_id: u64,
        period_slot_id: u64,
        date: NaiveDate,
    ) -> AppResult<Vec<PeriodAttendanceRecord>> {
        Ok(self
            .state()
            .records
            .iter()
            .filter(|r| {
                r.tenant_id == tenant_id
                    && r.section_id == section_id
                    && r.period_slot_id == period_slot_id
                    && r.attendance_date == date
            })
            .cloned()
            .collect())
    }

    async fn day_records(&self, tenant_id: u64, section_id: u64, date: NaiveDate) -> AppResult<Vec<PeriodAttendanceRecord>> {
        Ok(self
            .state()
            .records
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.section_id == section_id && r.attendance_date == date)
            .cloned()
            .collect())
    }

    async fn mark_roster(&self, mark: RosterMark) -> AppResult<Vec<PeriodAttendanceRecord>> {
        let mut state = self.state();
        let already = state.records.iter().any(|r| {
            r.tenant_id == mark.tenant_id
                && r.period_slot_id == mark.period_slot_id
                && r.attendance_date == mark.date
                && (r.section_id == mark.section_id
                    || mark.lines.iter().any(|l| l.student_id == r.student_id))
        });
        if already {
            return Err(AppError::AlreadyMarked {
                section_id: mark.section_id,
                period_slot_id: mark.period_slot_id,
                date: mark.date,
            });
        }

        let mut created = Vec::with_capacity(mark.lines.len());
        for line in mark.lines {
            let record = PeriodAttendanceRecord {
                id: state.next_id(),
                tenant_id: mark.tenant_id,
                branch_id: mark.branch_id,
                section_id: mark.section_id,
                student_id: line.student_id,
                period_slot_id: mark.period_slot_id,
                timetable_entry_id: mark.timetable_entry_id,
                attendance_date: mark.date,
                status: line.status,
                late_arrival_time: line.late_arrival_time,
                remarks: line.remarks,
                marked_by: mark.marked_by,
                marked_at: mark.marked_at,
                updated_by: None,
                updated_at: None,
            };
            let audit = AttendanceAuditEntry {
                id: state.next_id(),
                tenant_id: mark.tenant_id,
                attendance_id: record.id,
                change_type: ChangeType::Create,
                previous_status: None,
                previous_remarks: None,
                previous_late_arrival_time: None,
                new_status: record.status,
                new_remarks: record.remarks.clone(),
                new_late_arrival_time: record.late_arrival_time,
                change_reason: None,
                changed_by: mark.marked_by,
                changed_at: mark.marked_at,
            };
            state.audit.push(audit);
            state.records.push(record.clone());
            created.push(record);
        }
        Ok(created)
    }

    async fn apply_edits(&self, tenant_id: u64, edits: Vec<AttendanceEdit>) -> AppResult<Vec<EditOutcome>> {
        let mut state = self.state();
        for edit in &edits {
            if !state
                .records
                .iter()
                .any(|r| r.tenant_id == tenant_id && r.id == edit.attendance_id)
            {
                return Err(AppError::not_found("attendance", edit.attendance_id));
            }
        }

        let mut outcomes = Vec::with_capacity(edits.len());
        for edit in edits {
            let audit_id = state.next_id();
            let Some(record) = state
                .records
                .iter_mut()
                .find(|r| r.tenant_id == tenant_id && r.id == edit.attendance_id)
            else {
                return Err(AppError::not_found("attendance", edit.attendance_id));
            };

            let audit = AttendanceAuditEntry {
                id: audit_id,
                tenant_id,
                attendance_id: record.id,
                change_type: ChangeType::Edit,
                previous_status: Some(record.status),
                previous_remarks: record.remarks.clone(),
                previous_late_arrival_time: record.late_arrival_time,
                new_status: edit.status,
                new_remarks: edit.remarks.clone(),
                new_late_arrival_time: edit.late_arrival_time,
                change_reason: Some(edit.reason),
                changed_by: edit.changed_by,
                changed_at: edit.changed_at,
            };
            record.status = edit.status;
            record.remarks = edit.remarks;
            record.late_arrival_time = edit.late_arrival_time;
            record.updated_by = Some(edit.changed_by);
            record.updated_at = Some(edit.changed_at);

            let record = record.clone();
            state.audit.push(audit.clone());
            outcomes.push(EditOutcome { record, audit });
        }
        Ok(outcomes)
    }

    async fn history(&self, tenant_id: u64, attendance_id: u64) -> AppResult<Vec<AttendanceAuditEntry>> {
        let mut entries: Vec<AttendanceAuditEntry> = self
            .state()
            .audit
            .iter()
            .filter(|a| a.tenant_id == tenant_id && a.attendance_id == attendance_id)
            .cloned()
            .collect();
        entries.sort_by_key(|a| (a.changed_at, a.id));
        Ok(entries)
    }

    async fn get_policy(&self, tenant_id: u64, branch_id: u64) -> AppResult<Option<EditWindowPolicy>> {
        Ok(self
            .state()
            .policies
            .iter()
            .find(|p| p.tenant_id == tenant_id && p.branch_id == branch_id)
            .cloned())
    }

    async fn upsert_policy(&self, policy: EditWindowPolicy) -> AppResult<EditWindowPolicy> {
        let mut state = self.state();
        match state
            .policies
            .iter_mut()
            .find(|p| p.tenant_id == policy.tenant_id && p.branch_id == policy.branch_id)
        {
            Some(row) => *row = policy.clone(),
            None => state.policies.push(policy.clone()),
        }
        Ok(policy)
    }
}

#[async_trait]
impl Directory for MemoryStore {
    async fn section(&self, tenant_id: u64, section_id: u64) -> AppResult<Option<Section>> {
        Ok(self
            .state()
            .sections
            .iter()
            .find(|s| s.tenant_id == tenant_id && s.id == section_id)
            .cloned())
    }

    async fn section_students(&self, tenant_id: u64, section_id: u64) -> AppResult<Vec<StudentRef>> {
        let mut students: Vec<StudentRef> = self
            .state()
            .students
            .iter()
            .filter(|(t, s, _)| *t == tenant_id && *s == section_id)
            .map(|(_, _, student)| student.clone())
            .collect();
        students.sort_by(|a, b| (&a.roll_number, a.id).cmp(&(&b.roll_number, b.id)));
        Ok(students)
    }

    async fn teacher_assigned(&self, tenant_id: u64, staff_id: u64, subject_id: u64, section_id: u64) -> AppResult<bool> {
        Ok(self
            .state()
            .teaching
            .contains(&(tenant_id, staff_id, subject_id, section_id)))
    }
}
