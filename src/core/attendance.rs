use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use moka::future::Cache;
use tracing::{debug, info, instrument};

use super::edit_window::{ensure_editable, evaluate_edit_window};
use super::{Stores, authorize, clean_text};
use crate::auth::auth::AuthUser;
use crate::auth::capability::{Authorizer, Capability};
use crate::clock::Clock;
use crate::config::Config;
use crate::errors::{AppError, AppResult};
use crate::model::attendance::{
    AttendanceAuditEntry, AttendanceEdit, AttendanceStatus, AttendanceSummary, DaySummary, EditAttendance,
    EditOutcome, EditWindowPolicy, EditWindowStatus, MarkLine, MarkOutcome, MarkRoster, NewAttendance,
    PeriodAttendanceRecord, PeriodOverview, PeriodRoster, PeriodSummary, RosterLine, RosterMark, Section,
    SectionDayPeriods, StudentRef, UpdateEditWindowPolicy,
};
use crate::model::common::{DayOfWeek, Patch};
use crate::model::wire::ClockTime;
use crate::model::schedule::PeriodSlot;
use crate::model::timetable::{Timetable, TimetableEntry};
use crate::store::{AttendanceStore, Directory, ScheduleStore, TimetableStore};

const MAX_WINDOW_MINUTES: u32 = 10_080;

/// A teaching period of a section on one date: the published entry and
/// the slot it occupies.
struct Period {
    entry: TimetableEntry,
    slot: PeriodSlot,
}

fn summary_of<'a>(records: impl IntoIterator<Item = &'a PeriodAttendanceRecord>) -> AttendanceSummary {
    AttendanceSummary::count(records.into_iter().map(|r| r.status))
}

/// Checks a submitted roster against the enrolled students: each listed
/// exactly once, nobody else.
fn validate_roster(students: &[StudentRef], lines: &[MarkLine]) -> AppResult<Vec<NewAttendance>> {
    let enrolled: HashSet<u64> = students.iter().map(|s| s.id).collect();
    let mut seen = HashSet::with_capacity(lines.len());
    let mut marks = Vec::with_capacity(lines.len());

    for line in lines {
        if !enrolled.contains(&line.student_id) {
            return Err(AppError::validation(
                "students",
                format!("student {} is not enrolled in this section", line.student_id),
            ));
        }
        if !seen.insert(line.student_id) {
            return Err(AppError::validation(
                "students",
                format!("student {} is listed more than once", line.student_id),
            ));
        }
        if line.late_arrival_time.is_some() && line.status != AttendanceStatus::Late {
            return Err(AppError::validation(
                "late_arrival_time",
                format!("only allowed for late students (student {})", line.student_id),
            ));
        }
        marks.push(NewAttendance {
            student_id: line.student_id,
            status: line.status,
            late_arrival_time: line.late_arrival_time.map(|t| t.into_inner()),
            remarks: clean_text(line.remarks.clone()),
        });
    }

    if let Some(missing) = students.iter().find(|s| !seen.contains(&s.id)) {
        return Err(AppError::validation(
            "students",
            format!("every enrolled student must be listed; student {} is missing", missing.id),
        ));
    }
    Ok(marks)
}

fn non_empty_reason(reason: Option<&str>) -> AppResult<String> {
    match reason.map(str::trim) {
        Some(r) if !r.is_empty() => Ok(r.to_string()),
        _ => Err(AppError::validation("reason", "a reason is required to change attendance")),
    }
}

/// Period attendance capture, corrections under the edit window, and the
/// audit trail.
#[derive(Clone)]
pub struct AttendanceService {
    store: Arc<dyn AttendanceStore>,
    timetables: Arc<dyn TimetableStore>,
    schedule: Arc<dyn ScheduleStore>,
    directory: Arc<dyn Directory>,
    authorizer: Arc<dyn Authorizer>,
    clock: Arc<dyn Clock>,
    /// (tenant, branch) → window minutes
    policies: Cache<(u64, u64), u32>,
    default_window_minutes: u32,
}

impl AttendanceService {
    pub fn new(stores: Stores, authorizer: Arc<dyn Authorizer>, clock: Arc<dyn Clock>, config: &Config) -> Self {
        let policies = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(config.policy_cache_ttl_secs))
            .build();

        AttendanceService {
            store: stores.attendance,
            timetables: stores.timetable,
            schedule: stores.schedule,
            directory: stores.directory,
            authorizer,
            clock,
            policies,
            default_window_minutes: config.default_edit_window_minutes,
        }
    }

    fn require(&self, caller: &AuthUser, capability: Capability) -> AppResult<()> {
        authorize(self.authorizer.as_ref(), caller, capability)
    }

    fn has_override(&self, caller: &AuthUser) -> bool {
        self.authorizer
            .authorize(caller, Capability::AttendanceOverride)
            .is_allowed()
    }

    async fn section(&self, caller: &AuthUser, section_id: u64) -> AppResult<Section> {
        match self.directory.section(caller.tenant_id, section_id).await? {
            Some(section) if caller.can_access_branch(section.branch_id) => Ok(section),
            Some(section) => Err(AppError::PermissionDenied {
                reason: format!("section {} belongs to another branch", section.id),
            }),
            None => Err(AppError::not_found("section", section_id)),
        }
    }

    async fn record(&self, caller: &AuthUser, attendance_id: u64) -> AppResult<PeriodAttendanceRecord> {
        match self.store.get_record(caller.tenant_id, attendance_id).await? {
            Some(record) if caller.can_access_branch(record.branch_id) => Ok(record),
            _ => Err(AppError::not_found("attendance", attendance_id)),
        }
    }

    /// Periods of a section on a date, from its published timetable,
    /// ordered by start time.
    async fn periods(&self, tenant_id: u64, section_id: u64, date: NaiveDate) -> AppResult<(Option<Timetable>, Vec<Period>)> {
        let Some(timetable) = self.timetables.published_for_section(tenant_id, section_id).await? else {
            return Ok((None, Vec::new()));
        };

        let day = DayOfWeek::of(date);
        let mut periods = Vec::new();
        for entry in self.timetables.list_entries(tenant_id, timetable.id).await? {
            if entry.day_of_week != day {
                continue;
            }
            let slot = self
                .schedule
                .get_period_slot(tenant_id, entry.period_slot_id)
                .await?
                .ok_or_else(|| AppError::not_found("period_slot", entry.period_slot_id))?;
            periods.push(Period { entry, slot });
        }
        periods.sort_by_key(|p| (p.slot.start_time, p.slot.display_order, p.slot.id));
        Ok((Some(timetable), periods))
    }

    async fn period(&self, tenant_id: u64, section_id: u64, period_slot_id: u64, date: NaiveDate) -> AppResult<Period> {
        let (_, periods) = self.periods(tenant_id, section_id, date).await?;
        periods
            .into_iter()
            .find(|p| p.slot.id == period_slot_id)
            .ok_or_else(|| {
                AppError::validation(
                    "period_slot_id",
                    format!(
                        "section {} has no published period in slot {} on {}",
                        section_id,
                        period_slot_id,
                        DayOfWeek::of(date)
                    ),
                )
            })
    }

    /// Edit window of a branch in minutes, cached per (tenant, branch).
    pub async fn window_minutes(&self, tenant_id: u64, branch_id: u64) -> AppResult<u32> {
        let store = self.store.clone();
        let default = self.default_window_minutes;
        self.policies
            .try_get_with((tenant_id, branch_id), async move {
                store
                    .get_policy(tenant_id, branch_id)
                    .await
                    .map(|policy| policy.map_or(default, |p| p.edit_window_minutes))
            })
            .await
            .map_err(|e| AppError::Internal(format!("edit window policy lookup failed: {}", e)))
    }

    // ------------------------------------------------------------------
    // Capture
    // ------------------------------------------------------------------

    pub async fn list_periods(&self, caller: &AuthUser, section_id: u64, date: NaiveDate) -> AppResult<SectionDayPeriods> {
        self.require(caller, Capability::AttendanceRead)?;
        let section = self.section(caller, section_id).await?;
        let day = DayOfWeek::of(date);

        let is_working_day = self
            .schedule
            .list_day_assignments(caller.tenant_id, section.branch_id)
            .await?
            .iter()
            .any(|a| a.day_of_week == day && a.is_working_day);

        let (timetable, periods) = self.periods(caller.tenant_id, section.id, date).await?;
        let records = self.store.day_records(caller.tenant_id, section.id, date).await?;

        let periods = periods
            .into_iter()
            .map(|period| {
                let marked: Vec<&PeriodAttendanceRecord> = records
                    .iter()
                    .filter(|r| r.period_slot_id == period.slot.id)
                    .collect();
                PeriodOverview {
                    is_marked: !marked.is_empty(),
                    summary: summary_of(marked),
                    period_slot: period.slot,
                    entry: period.entry,
                }
            })
            .collect();

        Ok(SectionDayPeriods {
            section_id: section.id,
            date,
            day_of_week: day,
            is_working_day,
            timetable_id: timetable.map(|t| t.id),
            periods,
        })
    }

    /// Stored records where marked, otherwise every enrolled student
    /// defaulting to present.
    pub async fn roster(
        &self,
        caller: &AuthUser,
        period_slot_id: u64,
        section_id: u64,
        date: NaiveDate,
    ) -> AppResult<PeriodRoster> {
        self.require(caller, Capability::AttendanceRead)?;
        let section = self.section(caller, section_id).await?;
        let period = self.period(caller.tenant_id, section.id, period_slot_id, date).await?;

        let students = self.directory.section_students(caller.tenant_id, section.id).await?;
        let records = self
            .store
            .period_records(caller.tenant_id, section.id, period_slot_id, date)
            .await?;
        let by_student: HashMap<u64, &PeriodAttendanceRecord> =
            records.iter().map(|r| (r.student_id, r)).collect();

        let lines = students
            .into_iter()
            .map(|student| match by_student.get(&student.id) {
                Some(record) => RosterLine {
                    attendance_id: Some(record.id),
                    status: record.status,
                    late_arrival_time: record.late_arrival_time,
                    remarks: record.remarks.clone(),
                    student,
                },
                None => RosterLine {
                    attendance_id: None,
                    status: AttendanceStatus::Present,
                    late_arrival_time: None,
                    remarks: None,
                    student,
                },
            })
            .collect();

        let first = records.iter().min_by_key(|r| (r.marked_at, r.id));
        Ok(PeriodRoster {
            section_id: section.id,
            date,
            is_marked: !records.is_empty(),
            marked_at: first.map(|r| r.marked_at),
            marked_by: first.map(|r| r.marked_by),
            summary: summary_of(&records),
            students: lines,
            period_slot: period.slot,
            entry: period.entry,
        })
    }

    /// Full-roster mark. A roster that is already marked may only be
    /// resubmitted by a caller who could edit every one of its records;
    /// the resubmission is applied as audited edits.
    #[instrument(skip(self, caller, payload), fields(tenant_id = caller.tenant_id, user_id = caller.user_id))]
    pub async fn mark(
        &self,
        caller: &AuthUser,
        period_slot_id: u64,
        section_id: u64,
        date: NaiveDate,
        payload: MarkRoster,
    ) -> AppResult<MarkOutcome> {
        self.require(caller, Capability::AttendanceMark)?;
        let section = self.section(caller, section_id).await?;

        let now = self.clock.now();
        if date > self.clock.today() {
            return Err(AppError::validation("date", "attendance cannot be marked for a future date"));
        }
        let period = self.period(caller.tenant_id, section.id, period_slot_id, date).await?;

        let students = self.directory.section_students(caller.tenant_id, section.id).await?;
        if students.is_empty() {
            return Err(AppError::validation("students", "the section has no enrolled students"));
        }
        let marks = validate_roster(&students, &payload.students)?;

        let existing = self
            .store
            .period_records(caller.tenant_id, section.id, period_slot_id, date)
            .await?;
        let already_marked = || AppError::AlreadyMarked {
            section_id: section.id,
            period_slot_id,
            date,
        };

        if existing.is_empty() {
            let records = self
                .store
                .mark_roster(RosterMark {
                    tenant_id: caller.tenant_id,
                    branch_id: section.branch_id,
                    section_id: section.id,
                    period_slot_id,
                    timetable_entry_id: period.entry.id,
                    date,
                    marked_by: caller.user_id,
                    marked_at: now,
                    lines: marks,
                })
                .await?;
            info!(
                section_id = section.id,
                period_slot_id,
                date = %date,
                students = records.len(),
                "Roster marked"
            );
            return Ok(MarkOutcome {
                created: true,
                summary: summary_of(&records),
                records,
            });
        }

        // resubmission
        let window = self.window_minutes(caller.tenant_id, section.branch_id).await?;
        let has_override = self.has_override(caller);
        let by_student: HashMap<u64, &PeriodAttendanceRecord> =
            existing.iter().map(|r| (r.student_id, r)).collect();

        let mut edits = Vec::new();
        let mut reason = None;
        for mark in marks {
            let Some(record) = by_student.get(&mark.student_id) else {
                debug!(student_id = mark.student_id, "Resubmission lists a student without a record");
                return Err(already_marked());
            };
            let status = evaluate_edit_window(
                record.marked_at,
                now,
                window,
                record.marked_by == caller.user_id,
                has_override,
            );
            if !status.can_edit {
                return Err(already_marked());
            }

            let unchanged = record.status == mark.status
                && record.late_arrival_time == mark.late_arrival_time
                && record.remarks == mark.remarks;
            if unchanged {
                continue;
            }
            if reason.is_none() {
                reason = Some(non_empty_reason(payload.reason.as_deref())?);
            }
            edits.push(AttendanceEdit {
                attendance_id: record.id,
                status: mark.status,
                late_arrival_time: mark.late_arrival_time,
                remarks: mark.remarks,
                reason: reason.clone().unwrap_or_default(),
                changed_by: caller.user_id,
                changed_at: now,
            });
        }

        if !edits.is_empty() {
            let applied = self.store.apply_edits(caller.tenant_id, edits).await?;
            info!(
                section_id = section.id,
                period_slot_id,
                date = %date,
                changed = applied.len(),
                "Roster corrected"
            );
        }

        let records = self
            .store
            .period_records(caller.tenant_id, section.id, period_slot_id, date)
            .await?;
        Ok(MarkOutcome {
            created: false,
            summary: summary_of(&records),
            records,
        })
    }

    // ------------------------------------------------------------------
    // Edit window and audit trail
    // ------------------------------------------------------------------

    #[instrument(skip(self, caller, payload), fields(tenant_id = caller.tenant_id, user_id = caller.user_id))]
    pub async fn edit(&self, caller: &AuthUser, attendance_id: u64, payload: EditAttendance) -> AppResult<EditOutcome> {
        self.require(caller, Capability::AttendanceMark)?;
        let reason = non_empty_reason(Some(&payload.reason))?;
        let record = self.record(caller, attendance_id).await?;

        let status = payload.status.required("status")?.unwrap_or(record.status);
        let remarks = match payload.remarks {
            Patch::Absent => record.remarks.clone(),
            patch => clean_text(patch.apply_to(None)),
        };
        let late_arrival_time = match (status, payload.late_arrival_time) {
            (AttendanceStatus::Late, patch) => patch.map(ClockTime::into_inner).apply_to(record.late_arrival_time),
            (_, Patch::Value(_)) => {
                return Err(AppError::validation(
                    "late_arrival_time",
                    "only allowed when the status is late",
                ));
            }
            _ => None,
        };

        if status == record.status && remarks == record.remarks && late_arrival_time == record.late_arrival_time {
            return Err(AppError::validation("status", "the edit does not change the record"));
        }

        let now = self.clock.now();
        let window = self.window_minutes(caller.tenant_id, record.branch_id).await?;
        let decision = evaluate_edit_window(
            record.marked_at,
            now,
            window,
            record.marked_by == caller.user_id,
            self.has_override(caller),
        );
        ensure_editable(&decision, record.id)?;

        let outcome = self
            .store
            .apply_edits(
                caller.tenant_id,
                vec![AttendanceEdit {
                    attendance_id: record.id,
                    status,
                    late_arrival_time,
                    remarks,
                    reason,
                    changed_by: caller.user_id,
                    changed_at: now,
                }],
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Internal("edit produced no outcome".into()))?;

        info!(
            attendance_id = record.id,
            from = %record.status,
            to = %outcome.record.status,
            within_window = decision.is_within_window,
            "Attendance edited"
        );
        Ok(outcome)
    }

    pub async fn history(&self, caller: &AuthUser, attendance_id: u64) -> AppResult<Vec<AttendanceAuditEntry>> {
        self.require(caller, Capability::AttendanceRead)?;
        let record = self.record(caller, attendance_id).await?;
        self.store.history(caller.tenant_id, record.id).await
    }

    /// Computed for the caller at the current instant; never stored.
    pub async fn edit_status(&self, caller: &AuthUser, attendance_id: u64) -> AppResult<EditWindowStatus> {
        self.require(caller, Capability::AttendanceRead)?;
        let record = self.record(caller, attendance_id).await?;
        let window = self.window_minutes(caller.tenant_id, record.branch_id).await?;

        Ok(evaluate_edit_window(
            record.marked_at,
            self.clock.now(),
            window,
            record.marked_by == caller.user_id,
            self.has_override(caller),
        ))
    }

    pub async fn get_policy(&self, caller: &AuthUser, branch_id: Option<u64>) -> AppResult<EditWindowPolicy> {
        self.require(caller, Capability::AttendanceRead)?;
        let branch_id = caller.resolve_branch(branch_id)?;
        Ok(self
            .store
            .get_policy(caller.tenant_id, branch_id)
            .await?
            .unwrap_or(EditWindowPolicy {
                tenant_id: caller.tenant_id,
                branch_id,
                edit_window_minutes: self.default_window_minutes,
                updated_by: None,
                updated_at: None,
            }))
    }

    pub async fn update_policy(
        &self,
        caller: &AuthUser,
        branch_id: Option<u64>,
        payload: UpdateEditWindowPolicy,
    ) -> AppResult<EditWindowPolicy> {
        self.require(caller, Capability::AttendancePolicy)?;
        let branch_id = caller.resolve_branch(branch_id)?;
        if !(1..=MAX_WINDOW_MINUTES).contains(&payload.edit_window_minutes) {
            return Err(AppError::validation(
                "edit_window_minutes",
                format!("must be between 1 and {}", MAX_WINDOW_MINUTES),
            ));
        }

        let saved = self
            .store
            .upsert_policy(EditWindowPolicy {
                tenant_id: caller.tenant_id,
                branch_id,
                edit_window_minutes: payload.edit_window_minutes,
                updated_by: Some(caller.user_id),
                updated_at: Some(self.clock.now()),
            })
            .await?;
        self.policies.invalidate(&(caller.tenant_id, branch_id)).await;

        info!(
            tenant_id = caller.tenant_id,
            branch_id,
            minutes = saved.edit_window_minutes,
            "Edit window policy updated"
        );
        Ok(saved)
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    pub async fn day_summary(&self, caller: &AuthUser, section_id: u64, date: NaiveDate) -> AppResult<DaySummary> {
        self.require(caller, Capability::AttendanceRead)?;
        let section = self.section(caller, section_id).await?;
        let records = self.store.day_records(caller.tenant_id, section.id, date).await?;

        let mut by_slot: BTreeMap<u64, AttendanceSummary> = BTreeMap::new();
        for record in &records {
            by_slot
                .entry(record.period_slot_id)
                .or_default()
                .add(&AttendanceSummary::count([record.status]));
        }

        let mut total = AttendanceSummary::default();
        let periods = by_slot
            .into_iter()
            .map(|(period_slot_id, summary)| {
                total.add(&summary);
                PeriodSummary { period_slot_id, summary }
            })
            .collect();

        Ok(DaySummary {
            section_id: section.id,
            date,
            periods,
            total,
        })
    }
}
