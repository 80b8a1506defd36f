use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::authorize;
use super::conflict::{Candidate, find_conflict};
use crate::auth::auth::AuthUser;
use crate::auth::capability::{Authorizer, Capability};
use crate::clock::Clock;
use crate::errors::{AppError, AppResult};
use crate::model::common::{DayOfWeek, Page, Pagination, require_name};
use crate::model::timetable::{
    ConflictCheck, ConflictQuery, CreateTimetable, EntryInput, NewTimetable, PlannedEntry, PublishOutcome,
    RenameTimetable, Timetable, TimetableEntry, TimetableFilter, TimetableQuery, TimetableStatus,
};
use crate::store::{Directory, ScheduleStore, TimetableStore};

/// Timetable lifecycle, entry editing and the conflict pre-check.
#[derive(Clone)]
pub struct TimetableService {
    store: Arc<dyn TimetableStore>,
    schedule: Arc<dyn ScheduleStore>,
    directory: Arc<dyn Directory>,
    authorizer: Arc<dyn Authorizer>,
    clock: Arc<dyn Clock>,
}

impl TimetableService {
    pub fn new(
        store: Arc<dyn TimetableStore>,
        schedule: Arc<dyn ScheduleStore>,
        directory: Arc<dyn Directory>,
        authorizer: Arc<dyn Authorizer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        TimetableService {
            store,
            schedule,
            directory,
            authorizer,
            clock,
        }
    }

    fn require(&self, caller: &AuthUser, capability: Capability) -> AppResult<()> {
        authorize(self.authorizer.as_ref(), caller, capability)
    }

    async fn load(&self, caller: &AuthUser, id: u64) -> AppResult<Timetable> {
        match self.store.get_timetable(caller.tenant_id, id).await? {
            Some(timetable) if caller.can_access_branch(timetable.branch_id) => Ok(timetable),
            _ => Err(AppError::not_found("timetable", id)),
        }
    }

    pub async fn create(&self, caller: &AuthUser, payload: CreateTimetable) -> AppResult<Timetable> {
        self.require(caller, Capability::TimetableManage)?;
        let section = self
            .directory
            .section(caller.tenant_id, payload.section_id)
            .await?
            .ok_or_else(|| AppError::not_found("section", payload.section_id))?;
        if !caller.can_access_branch(section.branch_id) {
            return Err(AppError::PermissionDenied {
                reason: format!("section {} belongs to another branch", section.id),
            });
        }
        if payload.academic_year_id == 0 {
            return Err(AppError::validation("academic_year_id", "is required"));
        }

        let new = NewTimetable {
            tenant_id: caller.tenant_id,
            branch_id: section.branch_id,
            section_id: section.id,
            academic_year_id: payload.academic_year_id,
            name: require_name(&payload.name, "name")?,
            created_by: caller.user_id,
        };
        let timetable = self.store.create_timetable(new, self.clock.now()).await?;
        info!(
            tenant_id = caller.tenant_id,
            timetable_id = timetable.id,
            section_id = timetable.section_id,
            "Timetable created"
        );
        Ok(timetable)
    }

    pub async fn get(&self, caller: &AuthUser, id: u64) -> AppResult<Timetable> {
        self.require(caller, Capability::TimetableRead)?;
        self.load(caller, id).await
    }

    pub async fn list(&self, caller: &AuthUser, query: &TimetableQuery) -> AppResult<Page<Timetable>> {
        self.require(caller, Capability::TimetableRead)?;
        let branch_id = match query.branch_id {
            Some(branch) => Some(caller.resolve_branch(Some(branch))?),
            None => caller.branch_id.filter(|_| !caller.role.spans_branches()),
        };
        let filter = TimetableFilter {
            section_id: query.section_id,
            academic_year_id: query.academic_year_id,
            branch_id,
            status: query.status,
        };
        let page = Pagination {
            page: query.page,
            per_page: query.per_page,
        };
        self.store.list_timetables(caller.tenant_id, &filter, page).await
    }

    pub async fn rename(&self, caller: &AuthUser, id: u64, payload: RenameTimetable) -> AppResult<Timetable> {
        self.require(caller, Capability::TimetableManage)?;
        self.load(caller, id).await?;
        let name = require_name(&payload.name, "name")?;
        self.store
            .rename_timetable(caller.tenant_id, id, name, self.clock.now())
            .await
    }

    pub async fn delete(&self, caller: &AuthUser, id: u64) -> AppResult<()> {
        self.require(caller, Capability::TimetableManage)?;
        self.load(caller, id).await?;
        self.store.delete_timetable(caller.tenant_id, id).await?;
        info!(tenant_id = caller.tenant_id, timetable_id = id, "Timetable deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Entries
    // ------------------------------------------------------------------

    pub async fn list_entries(&self, caller: &AuthUser, id: u64) -> AppResult<Vec<TimetableEntry>> {
        self.require(caller, Capability::TimetableRead)?;
        self.load(caller, id).await?;
        self.store.list_entries(caller.tenant_id, id).await
    }

    pub async fn upsert_entry(&self, caller: &AuthUser, id: u64, input: EntryInput) -> AppResult<TimetableEntry> {
        self.upsert_entries(caller, id, vec![input])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Internal("entry upsert returned no rows".into()))
    }

    /// Insert or replace each (day, slot) row. Rows not in the payload are
    /// left alone.
    pub async fn upsert_entries(
        &self,
        caller: &AuthUser,
        id: u64,
        inputs: Vec<EntryInput>,
    ) -> AppResult<Vec<TimetableEntry>> {
        self.require(caller, Capability::TimetableManage)?;
        let timetable = self.load(caller, id).await?;
        if timetable.status == TimetableStatus::Archived {
            return Err(AppError::InvalidState {
                entity: "timetable",
                id,
                status: timetable.status.to_string(),
                action: "edit entries",
            });
        }
        if inputs.is_empty() {
            return Err(AppError::validation("entries", "at least one entry is required"));
        }

        let mut seen = HashSet::new();
        let mut planned = Vec::with_capacity(inputs.len());
        for mut input in inputs {
            if !seen.insert((input.day_of_week, input.period_slot_id)) {
                return Err(AppError::validation(
                    "entries",
                    format!(
                        "period slot {} on {} is listed more than once",
                        input.period_slot_id, input.day_of_week
                    ),
                ));
            }
            if input.subject_id == 0 {
                return Err(AppError::validation("subject_id", "is required"));
            }
            if input.staff_id == 0 {
                return Err(AppError::validation("staff_id", "is required"));
            }

            let slot = self
                .schedule
                .get_period_slot(caller.tenant_id, input.period_slot_id)
                .await?
                .ok_or_else(|| AppError::not_found("period_slot", input.period_slot_id))?;
            if slot.branch_id != timetable.branch_id {
                return Err(AppError::validation(
                    "period_slot_id",
                    format!("period slot {} belongs to another branch", slot.id),
                ));
            }
            if !slot.is_active {
                return Err(AppError::validation(
                    "period_slot_id",
                    format!("period slot {} is inactive", slot.id),
                ));
            }
            if !slot.slot_type.is_teaching() {
                return Err(AppError::validation(
                    "period_slot_id",
                    format!("nothing can be scheduled into a {} slot", slot.slot_type),
                ));
            }

            // a live timetable must stay publishable
            if timetable.status == TimetableStatus::Published {
                let assigned = self
                    .directory
                    .teacher_assigned(caller.tenant_id, input.staff_id, input.subject_id, timetable.section_id)
                    .await?;
                if !assigned {
                    return Err(AppError::validation(
                        "staff_id",
                        format!(
                            "teacher {} has no active assignment for subject {} in section {}",
                            input.staff_id, input.subject_id, timetable.section_id
                        ),
                    ));
                }
            }

            input.room = input.room.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
            planned.push(PlannedEntry {
                input,
                range: slot.range()?,
            });
        }

        self.store
            .upsert_entries(caller.tenant_id, id, planned, self.clock.now())
            .await
    }

    pub async fn delete_entry(&self, caller: &AuthUser, id: u64, entry_id: u64) -> AppResult<()> {
        self.require(caller, Capability::TimetableManage)?;
        self.load(caller, id).await?;
        self.store.delete_entry(caller.tenant_id, id, entry_id).await
    }

    // ------------------------------------------------------------------
    // Conflicts and lifecycle
    // ------------------------------------------------------------------

    /// Advisory check for a prospective booking; the stores repeat it
    /// inside the write transaction.
    pub async fn check_conflict(&self, caller: &AuthUser, query: &ConflictQuery) -> AppResult<ConflictCheck> {
        self.require(caller, Capability::TimetableRead)?;
        let day = DayOfWeek::new(query.day_of_week)?;
        let slot = self
            .schedule
            .get_period_slot(caller.tenant_id, query.period_slot_id)
            .await?
            .ok_or_else(|| AppError::not_found("period_slot", query.period_slot_id))?;

        let candidate = Candidate {
            staff_id: query.staff_id,
            day_of_week: day,
            period_slot_id: slot.id,
            range: slot.range()?,
        };
        let bookings = self
            .store
            .published_bookings(caller.tenant_id, query.staff_id, day)
            .await?;
        let conflict = find_conflict(&candidate, &bookings, query.exclude_timetable_id)?;

        Ok(ConflictCheck {
            has_conflict: conflict.is_some(),
            conflict,
        })
    }

    #[instrument(skip(self, caller), fields(tenant_id = caller.tenant_id, user_id = caller.user_id))]
    pub async fn publish(&self, caller: &AuthUser, id: u64) -> AppResult<PublishOutcome> {
        self.require(caller, Capability::TimetablePublish)?;
        let timetable = self.load(caller, id).await?;
        if timetable.status == TimetableStatus::Archived {
            return Err(AppError::InvalidState {
                entity: "timetable",
                id,
                status: timetable.status.to_string(),
                action: "publish",
            });
        }

        for entry in self.store.list_entries(caller.tenant_id, id).await? {
            match self
                .schedule
                .get_period_slot(caller.tenant_id, entry.period_slot_id)
                .await?
            {
                Some(slot) if slot.branch_id == timetable.branch_id => {}
                _ => {
                    return Err(AppError::validation(
                        "entries",
                        format!(
                            "entry {} uses period slot {} outside branch {}",
                            entry.id, entry.period_slot_id, timetable.branch_id
                        ),
                    ));
                }
            }
            let assigned = self
                .directory
                .teacher_assigned(caller.tenant_id, entry.staff_id, entry.subject_id, timetable.section_id)
                .await?;
            if !assigned {
                return Err(AppError::validation(
                    "entries",
                    format!(
                        "teacher {} has no active assignment for subject {} in section {}",
                        entry.staff_id, entry.subject_id, timetable.section_id
                    ),
                ));
            }
        }

        let outcome = self.store.publish(caller.tenant_id, id, self.clock.now()).await;
        match &outcome {
            Ok(published) => info!(
                timetable_id = id,
                section_id = published.timetable.section_id,
                archived_timetable_id = ?published.archived_timetable_id,
                "Timetable published"
            ),
            Err(AppError::ScheduleConflict(conflict)) => warn!(
                timetable_id = id,
                staff_id = conflict.staff_id,
                conflicting_timetable_id = conflict.conflicting_timetable_id,
                "Publish rejected: teacher double-booked"
            ),
            Err(_) => {}
        }
        outcome
    }

    #[instrument(skip(self, caller), fields(tenant_id = caller.tenant_id, user_id = caller.user_id))]
    pub async fn archive(&self, caller: &AuthUser, id: u64) -> AppResult<Timetable> {
        self.require(caller, Capability::TimetablePublish)?;
        self.load(caller, id).await?;
        let archived = self.store.archive(caller.tenant_id, id, self.clock.now()).await?;
        info!(timetable_id = id, "Timetable archived");
        Ok(archived)
    }
}
