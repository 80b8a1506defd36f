use std::sync::Arc;

use tracing::info;

use super::{authorize, clean_text};
use crate::auth::auth::AuthUser;
use crate::auth::capability::{Authorizer, Capability};
use crate::clock::Clock;
use crate::errors::{AppError, AppResult};
use crate::model::common::{DayOfWeek, Page, Pagination, TimeRange, normalize_code, require_name};
use crate::model::schedule::{
    CreateDayPattern, CreatePeriodSlot, CreateShift, DayPattern, DayPatternAssignment, DayPatternChanges,
    NewDayPattern, NewPeriodSlot, NewShift, PeriodSlot, PeriodSlotChanges, Shift, ShiftChanges, TemplateFilter,
    TemplateQuery, UpdateDayPattern, UpdatePeriodSlot, UpdateShift, UpsertDayAssignment,
};
use crate::store::ScheduleStore;

const MAX_PERIODS: u32 = 20;

fn check_total_periods(total: u32) -> AppResult<u32> {
    if !(1..=MAX_PERIODS).contains(&total) {
        return Err(AppError::validation(
            "total_periods",
            format!("must be between 1 and {}", MAX_PERIODS),
        ));
    }
    Ok(total)
}

fn check_duration(range: &TimeRange, supplied: Option<u32>) -> AppResult<()> {
    match supplied {
        Some(minutes) if minutes != range.duration_minutes() => Err(AppError::validation(
            "duration_minutes",
            format!(
                "{} does not match the {} minutes between start and end",
                minutes,
                range.duration_minutes()
            ),
        )),
        _ => Ok(()),
    }
}

/// Branch filter for branch-scoped lists: the requested branch if the
/// caller may see it, else the caller's home branch, else all branches.
fn list_branch(caller: &AuthUser, requested: Option<u64>) -> AppResult<Option<u64>> {
    match requested {
        Some(branch) => caller.resolve_branch(Some(branch)).map(Some),
        None => Ok(caller.branch_id),
    }
}

fn template_filter(query: &TemplateQuery, branch_id: Option<u64>) -> TemplateFilter {
    TemplateFilter {
        branch_id,
        is_active: query.is_active,
        search: clean_text(query.search.clone()),
        day_pattern_id: query.day_pattern_id,
        shift_id: query.shift_id,
        slot_type: query.slot_type,
    }
}

fn pagination(query: &TemplateQuery) -> Pagination {
    Pagination {
        page: query.page,
        per_page: query.per_page,
    }
}

/// Shifts, day patterns, period slots and the weekday → pattern map.
#[derive(Clone)]
pub struct ScheduleService {
    store: Arc<dyn ScheduleStore>,
    authorizer: Arc<dyn Authorizer>,
    clock: Arc<dyn Clock>,
}

impl ScheduleService {
    pub fn new(store: Arc<dyn ScheduleStore>, authorizer: Arc<dyn Authorizer>, clock: Arc<dyn Clock>) -> Self {
        ScheduleService {
            store,
            authorizer,
            clock,
        }
    }

    fn require(&self, caller: &AuthUser, capability: Capability) -> AppResult<()> {
        authorize(self.authorizer.as_ref(), caller, capability)
    }

    // ------------------------------------------------------------------
    // Shifts
    // ------------------------------------------------------------------

    pub async fn create_shift(&self, caller: &AuthUser, payload: CreateShift) -> AppResult<Shift> {
        self.require(caller, Capability::ScheduleManage)?;
        let branch_id = caller.resolve_branch(payload.branch_id)?;

        let new = NewShift {
            tenant_id: caller.tenant_id,
            branch_id,
            name: require_name(&payload.name, "name")?,
            code: normalize_code(&payload.code)?,
            range: TimeRange::new(payload.start_time.into_inner(), payload.end_time.into_inner())?,
            description: clean_text(payload.description),
            display_order: payload.display_order,
            is_active: payload.is_active.unwrap_or(true),
        };
        let shift = self.store.create_shift(new, self.clock.now()).await?;
        info!(tenant_id = caller.tenant_id, shift_id = shift.id, code = %shift.code, "Shift created");
        Ok(shift)
    }

    async fn load_shift(&self, caller: &AuthUser, id: u64) -> AppResult<Shift> {
        match self.store.get_shift(caller.tenant_id, id).await? {
            Some(shift) if caller.can_access_branch(shift.branch_id) => Ok(shift),
            _ => Err(AppError::not_found("shift", id)),
        }
    }

    pub async fn get_shift(&self, caller: &AuthUser, id: u64) -> AppResult<Shift> {
        self.require(caller, Capability::ScheduleRead)?;
        self.load_shift(caller, id).await
    }

    pub async fn list_shifts(&self, caller: &AuthUser, query: &TemplateQuery) -> AppResult<Page<Shift>> {
        self.require(caller, Capability::ScheduleRead)?;
        let filter = template_filter(query, list_branch(caller, query.branch_id)?);
        self.store
            .list_shifts(caller.tenant_id, &filter, pagination(query))
            .await
    }

    pub async fn update_shift(&self, caller: &AuthUser, id: u64, payload: UpdateShift) -> AppResult<Shift> {
        self.require(caller, Capability::ScheduleManage)?;
        let current = self.load_shift(caller, id).await?;

        let start = payload.start_time.required("start_time")?.map(|t| t.into_inner());
        let end = payload.end_time.required("end_time")?.map(|t| t.into_inner());
        let range = match (start, end) {
            (None, None) => None,
            (start, end) => Some(TimeRange::new(
                start.unwrap_or(current.start_time),
                end.unwrap_or(current.end_time),
            )?),
        };

        let changes = ShiftChanges {
            name: payload
                .name
                .required("name")?
                .map(|n| require_name(&n, "name"))
                .transpose()?,
            code: payload
                .code
                .required("code")?
                .map(|c| normalize_code(&c))
                .transpose()?,
            range,
            description: payload.description.nullable().map(clean_text),
            display_order: payload.display_order.required("display_order")?,
            is_active: payload.is_active.required("is_active")?,
        };
        if changes.is_empty() {
            return Ok(current);
        }
        self.store
            .update_shift(caller.tenant_id, id, changes, self.clock.now())
            .await
    }

    pub async fn toggle_shift(&self, caller: &AuthUser, id: u64) -> AppResult<Shift> {
        self.require(caller, Capability::ScheduleManage)?;
        let current = self.load_shift(caller, id).await?;
        let changes = ShiftChanges {
            is_active: Some(!current.is_active),
            ..Default::default()
        };
        self.store
            .update_shift(caller.tenant_id, id, changes, self.clock.now())
            .await
    }

    pub async fn delete_shift(&self, caller: &AuthUser, id: u64) -> AppResult<()> {
        self.require(caller, Capability::ScheduleManage)?;
        self.load_shift(caller, id).await?;
        self.store.delete_shift(caller.tenant_id, id).await?;
        info!(tenant_id = caller.tenant_id, shift_id = id, "Shift deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Day patterns (tenant-wide)
    // ------------------------------------------------------------------

    pub async fn create_day_pattern(&self, caller: &AuthUser, payload: CreateDayPattern) -> AppResult<DayPattern> {
        self.require(caller, Capability::ScheduleManage)?;

        let new = NewDayPattern {
            tenant_id: caller.tenant_id,
            name: require_name(&payload.name, "name")?,
            code: normalize_code(&payload.code)?,
            description: clean_text(payload.description),
            total_periods: check_total_periods(payload.total_periods)?,
            display_order: payload.display_order,
            is_active: payload.is_active.unwrap_or(true),
        };
        let pattern = self.store.create_day_pattern(new, self.clock.now()).await?;
        info!(tenant_id = caller.tenant_id, day_pattern_id = pattern.id, "Day pattern created");
        Ok(pattern)
    }

    async fn load_day_pattern(&self, caller: &AuthUser, id: u64) -> AppResult<DayPattern> {
        self.store
            .get_day_pattern(caller.tenant_id, id)
            .await?
            .ok_or_else(|| AppError::not_found("day_pattern", id))
    }

    pub async fn get_day_pattern(&self, caller: &AuthUser, id: u64) -> AppResult<DayPattern> {
        self.require(caller, Capability::ScheduleRead)?;
        self.load_day_pattern(caller, id).await
    }

    pub async fn list_day_patterns(&self, caller: &AuthUser, query: &TemplateQuery) -> AppResult<Page<DayPattern>> {
        self.require(caller, Capability::ScheduleRead)?;
        let filter = template_filter(query, None);
        self.store
            .list_day_patterns(caller.tenant_id, &filter, pagination(query))
            .await
    }

    pub async fn update_day_pattern(
        &self,
        caller: &AuthUser,
        id: u64,
        payload: UpdateDayPattern,
    ) -> AppResult<DayPattern> {
        self.require(caller, Capability::ScheduleManage)?;
        let current = self.load_day_pattern(caller, id).await?;

        let changes = DayPatternChanges {
            name: payload
                .name
                .required("name")?
                .map(|n| require_name(&n, "name"))
                .transpose()?,
            code: payload
                .code
                .required("code")?
                .map(|c| normalize_code(&c))
                .transpose()?,
            description: payload.description.nullable().map(clean_text),
            total_periods: payload
                .total_periods
                .required("total_periods")?
                .map(check_total_periods)
                .transpose()?,
            display_order: payload.display_order.required("display_order")?,
            is_active: payload.is_active.required("is_active")?,
        };
        if changes.is_empty() {
            return Ok(current);
        }
        self.store
            .update_day_pattern(caller.tenant_id, id, changes, self.clock.now())
            .await
    }

    pub async fn toggle_day_pattern(&self, caller: &AuthUser, id: u64) -> AppResult<DayPattern> {
        self.require(caller, Capability::ScheduleManage)?;
        let current = self.load_day_pattern(caller, id).await?;
        let changes = DayPatternChanges {
            is_active: Some(!current.is_active),
            ..Default::default()
        };
        self.store
            .update_day_pattern(caller.tenant_id, id, changes, self.clock.now())
            .await
    }

    pub async fn delete_day_pattern(&self, caller: &AuthUser, id: u64) -> AppResult<()> {
        self.require(caller, Capability::ScheduleManage)?;
        self.load_day_pattern(caller, id).await?;
        self.store.delete_day_pattern(caller.tenant_id, id).await?;
        info!(tenant_id = caller.tenant_id, day_pattern_id = id, "Day pattern deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Period slots
    // ------------------------------------------------------------------

    /// Pattern must exist in the tenant; shift must exist in the slot's branch.
    async fn check_slot_links(
        &self,
        caller: &AuthUser,
        branch_id: u64,
        day_pattern_id: Option<u64>,
        shift_id: Option<u64>,
    ) -> AppResult<()> {
        if let Some(pattern_id) = day_pattern_id {
            if self.store.get_day_pattern(caller.tenant_id, pattern_id).await?.is_none() {
                return Err(AppError::validation(
                    "day_pattern_id",
                    format!("day pattern {} does not exist", pattern_id),
                ));
            }
        }
        if let Some(shift_id) = shift_id {
            match self.store.get_shift(caller.tenant_id, shift_id).await? {
                Some(shift) if shift.branch_id == branch_id => {}
                _ => {
                    return Err(AppError::validation(
                        "shift_id",
                        format!("shift {} does not exist in branch {}", shift_id, branch_id),
                    ));
                }
            }
        }
        Ok(())
    }

    pub async fn create_period_slot(&self, caller: &AuthUser, payload: CreatePeriodSlot) -> AppResult<PeriodSlot> {
        self.require(caller, Capability::ScheduleManage)?;
        let branch_id = caller.resolve_branch(payload.branch_id)?;

        let range = TimeRange::new(payload.start_time.into_inner(), payload.end_time.into_inner())?;
        check_duration(&range, payload.duration_minutes)?;
        self.check_slot_links(caller, branch_id, payload.day_pattern_id, payload.shift_id)
            .await?;

        let new = NewPeriodSlot {
            tenant_id: caller.tenant_id,
            branch_id,
            name: require_name(&payload.name, "name")?,
            code: normalize_code(&payload.code)?,
            slot_type: payload.slot_type,
            range,
            day_pattern_id: payload.day_pattern_id,
            shift_id: payload.shift_id,
            display_order: payload.display_order,
            is_active: payload.is_active.unwrap_or(true),
        };
        let slot = self.store.create_period_slot(new, self.clock.now()).await?;
        info!(
            tenant_id = caller.tenant_id,
            period_slot_id = slot.id,
            code = %slot.code,
            slot_type = %slot.slot_type,
            "Period slot created"
        );
        Ok(slot)
    }

    async fn load_period_slot(&self, caller: &AuthUser, id: u64) -> AppResult<PeriodSlot> {
        match self.store.get_period_slot(caller.tenant_id, id).await? {
            Some(slot) if caller.can_access_branch(slot.branch_id) => Ok(slot),
            _ => Err(AppError::not_found("period_slot", id)),
        }
    }

    pub async fn get_period_slot(&self, caller: &AuthUser, id: u64) -> AppResult<PeriodSlot> {
        self.require(caller, Capability::ScheduleRead)?;
        self.load_period_slot(caller, id).await
    }

    pub async fn list_period_slots(&self, caller: &AuthUser, query: &TemplateQuery) -> AppResult<Page<PeriodSlot>> {
        self.require(caller, Capability::ScheduleRead)?;
        let filter = template_filter(query, list_branch(caller, query.branch_id)?);
        self.store
            .list_period_slots(caller.tenant_id, &filter, pagination(query))
            .await
    }

    pub async fn update_period_slot(
        &self,
        caller: &AuthUser,
        id: u64,
        payload: UpdatePeriodSlot,
    ) -> AppResult<PeriodSlot> {
        self.require(caller, Capability::ScheduleManage)?;
        let current = self.load_period_slot(caller, id).await?;

        let start = payload.start_time.required("start_time")?.map(|t| t.into_inner());
        let end = payload.end_time.required("end_time")?.map(|t| t.into_inner());
        let duration = payload.duration_minutes.required("duration_minutes")?;
        let range = match (start, end) {
            (None, None) => None,
            (start, end) => Some(TimeRange::new(
                start.unwrap_or(current.start_time),
                end.unwrap_or(current.end_time),
            )?),
        };
        match range {
            Some(ref r) => check_duration(r, duration)?,
            None => check_duration(&current.range()?, duration)?,
        }

        let day_pattern_id = payload.day_pattern_id.nullable();
        let shift_id = payload.shift_id.nullable();
        self.check_slot_links(caller, current.branch_id, day_pattern_id.flatten(), shift_id.flatten())
            .await?;

        let changes = PeriodSlotChanges {
            name: payload
                .name
                .required("name")?
                .map(|n| require_name(&n, "name"))
                .transpose()?,
            code: payload
                .code
                .required("code")?
                .map(|c| normalize_code(&c))
                .transpose()?,
            slot_type: payload.slot_type.required("slot_type")?,
            range,
            day_pattern_id,
            shift_id,
            display_order: payload.display_order.required("display_order")?,
            is_active: payload.is_active.required("is_active")?,
        };
        if changes.is_empty() {
            return Ok(current);
        }
        self.store
            .update_period_slot(caller.tenant_id, id, changes, self.clock.now())
            .await
    }

    pub async fn toggle_period_slot(&self, caller: &AuthUser, id: u64) -> AppResult<PeriodSlot> {
        self.require(caller, Capability::ScheduleManage)?;
        let current = self.load_period_slot(caller, id).await?;
        let changes = PeriodSlotChanges {
            is_active: Some(!current.is_active),
            ..Default::default()
        };
        self.store
            .update_period_slot(caller.tenant_id, id, changes, self.clock.now())
            .await
    }

    pub async fn delete_period_slot(&self, caller: &AuthUser, id: u64) -> AppResult<()> {
        self.require(caller, Capability::ScheduleManage)?;
        self.load_period_slot(caller, id).await?;
        self.store.delete_period_slot(caller.tenant_id, id).await?;
        info!(tenant_id = caller.tenant_id, period_slot_id = id, "Period slot deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Day assignment map
    // ------------------------------------------------------------------

    /// All seven weekdays of a branch; unconfigured days come back as
    /// non-working with no pattern.
    pub async fn list_day_assignments(
        &self,
        caller: &AuthUser,
        branch_id: Option<u64>,
    ) -> AppResult<Vec<DayPatternAssignment>> {
        self.require(caller, Capability::ScheduleRead)?;
        let branch_id = caller.resolve_branch(branch_id)?;
        let stored = self.store.list_day_assignments(caller.tenant_id, branch_id).await?;

        Ok(DayOfWeek::all()
            .map(|day| {
                stored
                    .iter()
                    .find(|a| a.day_of_week == day)
                    .cloned()
                    .unwrap_or_else(|| DayPatternAssignment::unassigned(caller.tenant_id, branch_id, day))
            })
            .collect())
    }

    pub async fn get_day_assignment(
        &self,
        caller: &AuthUser,
        day: u8,
        branch_id: Option<u64>,
    ) -> AppResult<DayPatternAssignment> {
        let day = DayOfWeek::new(day)?;
        let week = self.list_day_assignments(caller, branch_id).await?;
        week.into_iter()
            .find(|a| a.day_of_week == day)
            .ok_or_else(|| AppError::Internal(format!("weekday {} missing from assignment map", day)))
    }

    pub async fn upsert_day_assignment(
        &self,
        caller: &AuthUser,
        day: u8,
        branch_id: Option<u64>,
        payload: UpsertDayAssignment,
    ) -> AppResult<DayPatternAssignment> {
        self.require(caller, Capability::ScheduleManage)?;
        let day = DayOfWeek::new(day)?;
        let branch_id = caller.resolve_branch(branch_id)?;

        if let Some(pattern_id) = payload.day_pattern_id {
            if !payload.is_working_day {
                return Err(AppError::validation(
                    "day_pattern_id",
                    "a non-working day cannot carry a day pattern",
                ));
            }
            match self.store.get_day_pattern(caller.tenant_id, pattern_id).await? {
                Some(pattern) if pattern.is_active => {}
                Some(_) => {
                    return Err(AppError::validation(
                        "day_pattern_id",
                        format!("day pattern {} is inactive", pattern_id),
                    ));
                }
                None => return Err(AppError::not_found("day_pattern", pattern_id)),
            }
        }

        let assignment = DayPatternAssignment {
            tenant_id: caller.tenant_id,
            branch_id,
            day_of_week: day,
            is_working_day: payload.is_working_day,
            day_pattern_id: payload.day_pattern_id,
            updated_by: Some(caller.user_id),
            updated_at: Some(self.clock.now()),
        };
        let saved = self.store.upsert_day_assignment(assignment).await?;
        info!(
            tenant_id = caller.tenant_id,
            branch_id,
            day = %day,
            is_working_day = saved.is_working_day,
            "Day assignment saved"
        );
        Ok(saved)
    }
}
