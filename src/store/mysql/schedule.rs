use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::MySqlConnection;
use tracing::debug;

use super::timetable::lock_bookings_of;
use super::{MySqlStore, NEXT_DISPLAY_ORDER, fetch_page, on_duplicate};
use crate::core::conflict::find_retime_conflict;
use crate::errors::{AppError, AppResult};
use crate::model::common::{Page, Pagination};
use crate::model::schedule::{
    DayPattern, DayPatternAssignment, DayPatternChanges, NewDayPattern, NewPeriodSlot, NewShift,
    PeriodSlot, PeriodSlotChanges, Shift, ShiftChanges, TemplateFilter,
};
use crate::store::ScheduleStore;
use crate::utils::db_utils::{SqlFilter, SqlUpdate};

const SHIFT_COLUMNS: &str = "id, tenant_id, branch_id, name, code, start_time, end_time, \
     description, display_order, is_active, created_at, updated_at";

const DAY_PATTERN_COLUMNS: &str = "id, tenant_id, name, code, description, total_periods, \
     display_order, is_active, created_at, updated_at";

const PERIOD_SLOT_COLUMNS: &str = "id, tenant_id, branch_id, name, code, slot_type, start_time, \
     end_time, duration_minutes, day_pattern_id, shift_id, display_order, is_active, created_at, updated_at";

const ASSIGNMENT_COLUMNS: &str =
    "tenant_id, branch_id, day_of_week, is_working_day, day_pattern_id, updated_by, updated_at";

async fn fetch_shift(conn: &mut MySqlConnection, tenant_id: u64, id: u64) -> Result<Option<Shift>, sqlx::Error> {
    sqlx::query_as::<_, Shift>(&format!(
        "SELECT {} FROM shifts WHERE tenant_id = ? AND id = ?",
        SHIFT_COLUMNS
    ))
    .bind(tenant_id)
    .bind(id)
    .fetch_optional(conn)
    .await
}

async fn fetch_day_pattern(
    conn: &mut MySqlConnection,
    tenant_id: u64,
    id: u64,
) -> Result<Option<DayPattern>, sqlx::Error> {
    sqlx::query_as::<_, DayPattern>(&format!(
        "SELECT {} FROM day_patterns WHERE tenant_id = ? AND id = ?",
        DAY_PATTERN_COLUMNS
    ))
    .bind(tenant_id)
    .bind(id)
    .fetch_optional(conn)
    .await
}

async fn fetch_period_slot(
    conn: &mut MySqlConnection,
    tenant_id: u64,
    id: u64,
) -> Result<Option<PeriodSlot>, sqlx::Error> {
    sqlx::query_as::<_, PeriodSlot>(&format!(
        "SELECT {} FROM period_slots WHERE tenant_id = ? AND id = ?",
        PERIOD_SLOT_COLUMNS
    ))
    .bind(tenant_id)
    .bind(id)
    .fetch_optional(conn)
    .await
}

async fn next_display_order(
    conn: &mut MySqlConnection,
    table: &str,
    tenant_id: u64,
    branch_id: Option<u64>,
) -> Result<u32, sqlx::Error> {
    let sql = match branch_id {
        Some(_) => format!(
            "SELECT {} FROM {} WHERE tenant_id = ? AND branch_id = ?",
            NEXT_DISPLAY_ORDER, table
        ),
        None => format!("SELECT {} FROM {} WHERE tenant_id = ?", NEXT_DISPLAY_ORDER, table),
    };
    let mut query = sqlx::query_scalar::<_, u64>(&sql).bind(tenant_id);
    if let Some(branch_id) = branch_id {
        query = query.bind(branch_id);
    }
    let next = query.fetch_one(conn).await?;
    Ok(u32::try_from(next).unwrap_or(u32::MAX))
}

/// Row must exist (locked) before a guarded delete looks at references.
async fn lock_row(conn: &mut MySqlConnection, table: &str, entity: &'static str, tenant_id: u64, id: u64) -> AppResult<()> {
    let found = sqlx::query_scalar::<_, u64>(&format!(
        "SELECT id FROM {} WHERE tenant_id = ? AND id = ? FOR UPDATE",
        table
    ))
    .bind(tenant_id)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    found.map(|_| ()).ok_or_else(|| AppError::not_found(entity, id))
}

async fn is_referenced(conn: &mut MySqlConnection, sql: &str, tenant_id: u64, id: u64) -> AppResult<bool> {
    let count = sqlx::query_scalar::<_, i64>(sql)
        .bind(tenant_id)
        .bind(id)
        .fetch_one(conn)
        .await?;
    Ok(count > 0)
}

#[async_trait]
impl ScheduleStore for MySqlStore {
    async fn create_shift(&self, new: NewShift, now: DateTime<Utc>) -> AppResult<Shift> {
        let mut tx = self.pool.begin().await?;
        let display_order = match new.display_order {
            Some(order) => order,
            None => next_display_order(&mut tx, "shifts", new.tenant_id, Some(new.branch_id)).await?,
        };

        let result = sqlx::query(
            r#"
            INSERT INTO shifts
                (tenant_id, branch_id, name, code, start_time, end_time, description,
                 display_order, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.tenant_id)
        .bind(new.branch_id)
        .bind(&new.name)
        .bind(&new.code)
        .bind(new.range.start())
        .bind(new.range.end())
        .bind(&new.description)
        .bind(display_order)
        .bind(new.is_active)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            on_duplicate(e, || AppError::DuplicateCode {
                entity: "shift",
                code: new.code.clone(),
            })
        })?;

        let id = result.last_insert_id();
        let shift = fetch_shift(&mut tx, new.tenant_id, id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("shift {} vanished after insert", id)))?;
        tx.commit().await?;
        Ok(shift)
    }

    async fn get_shift(&self, tenant_id: u64, id: u64) -> AppResult<Option<Shift>> {
        let mut conn = self.pool.acquire().await?;
        Ok(fetch_shift(&mut conn, tenant_id, id).await?)
    }

    async fn list_shifts(&self, tenant_id: u64, filter: &TemplateFilter, page: Pagination) -> AppResult<Page<Shift>> {
        let mut sql = SqlFilter::default();
        sql.eq("tenant_id", tenant_id);
        if let Some(branch_id) = filter.branch_id {
            sql.eq("branch_id", branch_id);
        }
        if let Some(active) = filter.is_active {
            sql.eq("is_active", active);
        }
        sql.search("name", "code", filter.search.as_deref());

        fetch_page(&self.pool, "shifts", SHIFT_COLUMNS, &sql, "display_order, id", page).await
    }

    async fn update_shift(&self, tenant_id: u64, id: u64, changes: ShiftChanges, now: DateTime<Utc>) -> AppResult<Shift> {
        let code = changes.code.clone();
        let mut update = SqlUpdate::new("shifts");
        update.set_some("name", changes.name).set_some("code", changes.code);
        if let Some(range) = changes.range {
            update.set("start_time", range.start()).set("end_time", range.end());
        }
        if let Some(description) = changes.description {
            update.set("description", description);
        }
        update
            .set_some("display_order", changes.display_order)
            .set_some("is_active", changes.is_active)
            .set("updated_at", now);

        let mut tx = self.pool.begin().await?;
        update.execute(&mut tx, tenant_id, id).await.map_err(|e| {
            on_duplicate(e, || AppError::DuplicateCode {
                entity: "shift",
                code: code.unwrap_or_default(),
            })
        })?;
        let shift = fetch_shift(&mut tx, tenant_id, id)
            .await?
            .ok_or_else(|| AppError::not_found("shift", id))?;
        tx.commit().await?;
        Ok(shift)
    }

    async fn delete_shift(&self, tenant_id: u64, id: u64) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        lock_row(&mut tx, "shifts", "shift", tenant_id, id).await?;

        let active_slots = "SELECT COUNT(*) FROM period_slots WHERE tenant_id = ? AND shift_id = ? AND is_active = TRUE";
        if is_referenced(&mut tx, active_slots, tenant_id, id).await? {
            return Err(AppError::EntityInUse {
                entity: "shift",
                id,
                referenced_by: "period_slot",
            });
        }

        sqlx::query("DELETE FROM shifts WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        debug!(tenant_id, id, "Shift deleted");
        Ok(())
    }

    async fn create_day_pattern(&self, new: NewDayPattern, now: DateTime<Utc>) -> AppResult<DayPattern> {
        let mut tx = self.pool.begin().await?;
        let display_order = match new.display_order {
            Some(order) => order,
            None => next_display_order(&mut tx, "day_patterns", new.tenant_id, None).await?,
        };

        let result = sqlx::query(
            r#"
            INSERT INTO day_patterns
                (tenant_id, name, code, description, total_periods, display_order,
                 is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.tenant_id)
        .bind(&new.name)
        .bind(&new.code)
        .bind(&new.description)
        .bind(new.total_periods)
        .bind(display_order)
        .bind(new.is_active)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            on_duplicate(e, || AppError::DuplicateCode {
                entity: "day_pattern",
                code: new.code.clone(),
            })
        })?;

        let id = result.last_insert_id();
        let pattern = fetch_day_pattern(&mut tx, new.tenant_id, id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("day pattern {} vanished after insert", id)))?;
        tx.commit().await?;
        Ok(pattern)
    }

    async fn get_day_pattern(&self, tenant_id: u64, id: u64) -> AppResult<Option<DayPattern>> {
        let mut conn = self.pool.acquire().await?;
        Ok(fetch_day_pattern(&mut conn, tenant_id, id).await?)
    }

    async fn list_day_patterns(
        &self,
        tenant_id: u64,
        filter: &TemplateFilter,
        page: Pagination,
    ) -> AppResult<Page<DayPattern>> {
        let mut sql = SqlFilter::default();
        sql.eq("tenant_id", tenant_id);
        if let Some(active) = filter.is_active {
            sql.eq("is_active", active);
        }
        sql.search("name", "code", filter.search.as_deref());

        fetch_page(&self.pool, "day_patterns", DAY_PATTERN_COLUMNS, &sql, "display_order, id", page).await
    }

    async fn update_day_pattern(
        &self,
        tenant_id: u64,
        id: u64,
        changes: DayPatternChanges,
        now: DateTime<Utc>,
    ) -> AppResult<DayPattern> {
        let code = changes.code.clone();
        let mut update = SqlUpdate::new("day_patterns");
        update.set_some("name", changes.name).set_some("code", changes.code);
        if let Some(description) = changes.description {
            update.set("description", description);
        }
        update
            .set_some("total_periods", changes.total_periods)
            .set_some("display_order", changes.display_order)
            .set_some("is_active", changes.is_active)
            .set("updated_at", now);

        let mut tx = self.pool.begin().await?;
        update.execute(&mut tx, tenant_id, id).await.map_err(|e| {
            on_duplicate(e, || AppError::DuplicateCode {
                entity: "day_pattern",
                code: code.unwrap_or_default(),
            })
        })?;
        let pattern = fetch_day_pattern(&mut tx, tenant_id, id)
            .await?
            .ok_or_else(|| AppError::not_found("day_pattern", id))?;
        tx.commit().await?;
        Ok(pattern)
    }

    async fn delete_day_pattern(&self, tenant_id: u64, id: u64) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        lock_row(&mut tx, "day_patterns", "day_pattern", tenant_id, id).await?;

        let active_slots =
            "SELECT COUNT(*) FROM period_slots WHERE tenant_id = ? AND day_pattern_id = ? AND is_active = TRUE";
        if is_referenced(&mut tx, active_slots, tenant_id, id).await? {
            return Err(AppError::EntityInUse {
                entity: "day_pattern",
                id,
                referenced_by: "period_slot",
            });
        }
        let assignments = "SELECT COUNT(*) FROM day_pattern_assignments WHERE tenant_id = ? AND day_pattern_id = ?";
        if is_referenced(&mut tx, assignments, tenant_id, id).await? {
            return Err(AppError::EntityInUse {
                entity: "day_pattern",
                id,
                referenced_by: "day_pattern_assignment",
            });
        }

        sqlx::query("DELETE FROM day_patterns WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        debug!(tenant_id, id, "Day pattern deleted");
        Ok(())
    }

    async fn create_period_slot(&self, new: NewPeriodSlot, now: DateTime<Utc>) -> AppResult<PeriodSlot> {
        let mut tx = self.pool.begin().await?;
        let display_order = match new.display_order {
            Some(order) => order,
            None => next_display_order(&mut tx, "period_slots", new.tenant_id, Some(new.branch_id)).await?,
        };

        let result = sqlx::query(
            r#"
            INSERT INTO period_slots
                (tenant_id, branch_id, name, code, slot_type, start_time, end_time,
                 duration_minutes, day_pattern_id, shift_id, display_order, is_active,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.tenant_id)
        .bind(new.branch_id)
        .bind(&new.name)
        .bind(&new.code)
        .bind(new.slot_type)
        .bind(new.range.start())
        .bind(new.range.end())
        .bind(new.range.duration_minutes())
        .bind(new.day_pattern_id)
        .bind(new.shift_id)
        .bind(display_order)
        .bind(new.is_active)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            on_duplicate(e, || AppError::DuplicateCode {
                entity: "period_slot",
                code: new.code.clone(),
            })
        })?;

        let id = result.last_insert_id();
        let slot = fetch_period_slot(&mut tx, new.tenant_id, id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("period slot {} vanished after insert", id)))?;
        tx.commit().await?;
        Ok(slot)
    }

    async fn get_period_slot(&self, tenant_id: u64, id: u64) -> AppResult<Option<PeriodSlot>> {
        let mut conn = self.pool.acquire().await?;
        Ok(fetch_period_slot(&mut conn, tenant_id, id).await?)
    }

    async fn list_period_slots(
        &self,
        tenant_id: u64,
        filter: &TemplateFilter,
        page: Pagination,
    ) -> AppResult<Page<PeriodSlot>> {
        let mut sql = SqlFilter::default();
        sql.eq("tenant_id", tenant_id);
        if let Some(branch_id) = filter.branch_id {
            sql.eq("branch_id", branch_id);
        }
        if let Some(active) = filter.is_active {
            sql.eq("is_active", active);
        }
        if let Some(day_pattern_id) = filter.day_pattern_id {
            sql.eq("day_pattern_id", day_pattern_id);
        }
        if let Some(shift_id) = filter.shift_id {
            sql.eq("shift_id", shift_id);
        }
        if let Some(slot_type) = filter.slot_type {
            sql.eq("slot_type", slot_type.as_ref());
        }
        sql.search("name", "code", filter.search.as_deref());

        fetch_page(&self.pool, "period_slots", PERIOD_SLOT_COLUMNS, &sql, "display_order, id", page).await
    }

    async fn update_period_slot(
        &self,
        tenant_id: u64,
        id: u64,
        changes: PeriodSlotChanges,
        now: DateTime<Utc>,
    ) -> AppResult<PeriodSlot> {
        let code = changes.code.clone();
        let mut update = SqlUpdate::new("period_slots");
        update
            .set_some("name", changes.name)
            .set_some("code", changes.code)
            .set_some("slot_type", changes.slot_type.map(|t| t.as_ref().to_string()));
        if let Some(range) = changes.range {
            update
                .set("start_time", range.start())
                .set("end_time", range.end())
                .set("duration_minutes", range.duration_minutes());
        }
        if let Some(day_pattern_id) = changes.day_pattern_id {
            update.set("day_pattern_id", day_pattern_id);
        }
        if let Some(shift_id) = changes.shift_id {
            update.set("shift_id", shift_id);
        }
        update
            .set_some("display_order", changes.display_order)
            .set_some("is_active", changes.is_active)
            .set("updated_at", now);

        let mut tx = self.pool.begin().await?;
        if let Some(range) = changes.range {
            lock_row(&mut tx, "period_slots", "period_slot", tenant_id, id).await?;
            let staff: BTreeSet<u64> = sqlx::query_scalar::<_, u64>(
                "SELECT DISTINCT staff_id FROM teacher_bookings WHERE tenant_id = ? AND period_slot_id = ?",
            )
            .bind(tenant_id)
            .bind(id)
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .collect();
            let bookings = lock_bookings_of(&mut tx, tenant_id, &staff).await?;
            if let Some(conflict) = find_retime_conflict(id, range, &bookings)? {
                return Err(AppError::ScheduleConflict(Box::new(conflict)));
            }
        }
        update.execute(&mut tx, tenant_id, id).await.map_err(|e| {
            on_duplicate(e, || AppError::DuplicateCode {
                entity: "period_slot",
                code: code.unwrap_or_default(),
            })
        })?;
        let slot = fetch_period_slot(&mut tx, tenant_id, id)
            .await?
            .ok_or_else(|| AppError::not_found("period_slot", id))?;
        tx.commit().await?;
        Ok(slot)
    }

    async fn delete_period_slot(&self, tenant_id: u64, id: u64) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        lock_row(&mut tx, "period_slots", "period_slot", tenant_id, id).await?;

        let entries = "SELECT COUNT(*) FROM timetable_entries WHERE tenant_id = ? AND period_slot_id = ?";
        if is_referenced(&mut tx, entries, tenant_id, id).await? {
            return Err(AppError::EntityInUse {
                entity: "period_slot",
                id,
                referenced_by: "timetable_entry",
            });
        }
        let records = "SELECT COUNT(*) FROM period_attendance WHERE tenant_id = ? AND period_slot_id = ?";
        if is_referenced(&mut tx, records, tenant_id, id).await? {
            return Err(AppError::EntityInUse {
                entity: "period_slot",
                id,
                referenced_by: "attendance_record",
            });
        }

        sqlx::query("DELETE FROM period_slots WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        debug!(tenant_id, id, "Period slot deleted");
        Ok(())
    }

    async fn list_day_assignments(&self, tenant_id: u64, branch_id: u64) -> AppResult<Vec<DayPatternAssignment>> {
        let rows = sqlx::query_as::<_, DayPatternAssignment>(&format!(
            "SELECT {} FROM day_pattern_assignments WHERE tenant_id = ? AND branch_id = ? ORDER BY day_of_week",
            ASSIGNMENT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(branch_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn upsert_day_assignment(&self, assignment: DayPatternAssignment) -> AppResult<DayPatternAssignment> {
        sqlx::query(
            r#"
            INSERT INTO day_pattern_assignments
                (tenant_id, branch_id, day_of_week, is_working_day, day_pattern_id, updated_by, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                is_working_day = VALUES(is_working_day),
                day_pattern_id = VALUES(day_pattern_id),
                updated_by     = VALUES(updated_by),
                updated_at     = VALUES(updated_at)
            "#,
        )
        .bind(assignment.tenant_id)
        .bind(assignment.branch_id)
        .bind(assignment.day_of_week)
        .bind(assignment.is_working_day)
        .bind(assignment.day_pattern_id)
        .bind(assignment.updated_by)
        .bind(assignment.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(assignment)
    }
}
