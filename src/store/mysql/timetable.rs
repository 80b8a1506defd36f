use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::MySqlConnection;
use tracing::{debug, info, instrument, warn};

use super::{MySqlStore, fetch_page, is_duplicate_key, on_duplicate};
use crate::core::conflict::{Candidate, find_conflict, find_internal_conflict};
use crate::errors::{AppError, AppResult};
use crate::model::common::{DayOfWeek, Page, Pagination};
use crate::model::timetable::{
    NewTimetable, PlannedEntry, PublishOutcome, TeacherBooking, Timetable, TimetableEntry,
    TimetableFilter, TimetableStatus,
};
use crate::store::TimetableStore;
use crate::utils::db_utils::SqlFilter;

const TIMETABLE_COLUMNS: &str = "id, tenant_id, branch_id, section_id, academic_year_id, name, \
     status, published_at, archived_at, created_by, created_at, updated_at";

const ENTRY_COLUMNS: &str = "e.id, e.tenant_id, e.timetable_id, e.day_of_week, e.period_slot_id, \
     e.subject_id, e.staff_id, e.room, e.created_at, e.updated_at";

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

async fn fetch_timetable(
    conn: &mut MySqlConnection,
    tenant_id: u64,
    id: u64,
    for_update: bool,
) -> AppResult<Timetable> {
    let sql = format!(
        "SELECT {} FROM timetables WHERE tenant_id = ? AND id = ?{}",
        TIMETABLE_COLUMNS,
        if for_update { " FOR UPDATE" } else { "" }
    );
    sqlx::query_as::<_, Timetable>(&sql)
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::not_found("timetable", id))
}

fn reject_archived(timetable: &Timetable, action: &'static str) -> AppResult<()> {
    if timetable.status == TimetableStatus::Archived {
        return Err(AppError::InvalidState {
            entity: "timetable",
            id: timetable.id,
            status: timetable.status.to_string(),
            action,
        });
    }
    Ok(())
}

/// Entries of one timetable resolved to wall-clock bookings.
async fn own_bookings(conn: &mut MySqlConnection, tenant_id: u64, timetable_id: u64) -> AppResult<Vec<TeacherBooking>> {
    let rows = sqlx::query_as::<_, TeacherBooking>(
        r#"
        SELECT e.id AS entry_id, e.timetable_id, t.section_id, e.staff_id, e.day_of_week,
               e.period_slot_id, s.start_time, s.end_time
        FROM timetable_entries e
        JOIN timetables t ON t.id = e.timetable_id
        JOIN period_slots s ON s.id = e.period_slot_id
        WHERE e.tenant_id = ? AND e.timetable_id = ?
        ORDER BY e.day_of_week, s.start_time, e.id
        "#,
    )
    .bind(tenant_id)
    .bind(timetable_id)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Published bookings of the given teachers, locked so a concurrent
/// publish touching the same teachers waits for this transaction.
pub(super) async fn lock_bookings_of(
    conn: &mut MySqlConnection,
    tenant_id: u64,
    staff_ids: &BTreeSet<u64>,
) -> AppResult<Vec<TeacherBooking>> {
    if staff_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        r#"
        SELECT b.entry_id, b.timetable_id, b.section_id, b.staff_id, b.day_of_week,
               b.period_slot_id, s.start_time, s.end_time
        FROM teacher_bookings b
        JOIN period_slots s ON s.id = b.period_slot_id
        WHERE b.tenant_id = ? AND b.staff_id IN ({})
        FOR UPDATE
        "#,
        placeholders(staff_ids.len())
    );
    let mut query = sqlx::query_as::<_, TeacherBooking>(&sql).bind(tenant_id);
    for staff_id in staff_ids {
        query = query.bind(*staff_id);
    }
    Ok(query.fetch_all(conn).await?)
}

/// Internal overlaps first, then every booking against the others.
fn check_bookings(own: &[TeacherBooking], others: &[TeacherBooking], timetable_id: u64) -> AppResult<()> {
    if let Some(conflict) = find_internal_conflict(own)? {
        return Err(AppError::ScheduleConflict(Box::new(conflict)));
    }
    for booking in own {
        let candidate = Candidate::try_from(booking)?;
        if let Some(conflict) = find_conflict(&candidate, others, Some(timetable_id))? {
            return Err(AppError::ScheduleConflict(Box::new(conflict)));
        }
    }
    Ok(())
}

/// Rewrite the booking rows of a published timetable. The unique key on
/// (tenant, staff, day, slot) is the final word if a concurrent publish
/// slipped in between the check and this write.
async fn replace_bookings(
    conn: &mut MySqlConnection,
    tenant_id: u64,
    timetable_id: u64,
    own: &[TeacherBooking],
) -> AppResult<()> {
    sqlx::query("DELETE FROM teacher_bookings WHERE tenant_id = ? AND timetable_id = ?")
        .bind(tenant_id)
        .bind(timetable_id)
        .execute(&mut *conn)
        .await?;

    for booking in own {
        let inserted = sqlx::query(
            r#"
            INSERT INTO teacher_bookings
                (entry_id, tenant_id, timetable_id, section_id, staff_id, day_of_week, period_slot_id)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(booking.entry_id)
        .bind(tenant_id)
        .bind(timetable_id)
        .bind(booking.section_id)
        .bind(booking.staff_id)
        .bind(booking.day_of_week)
        .bind(booking.period_slot_id)
        .execute(&mut *conn)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if is_duplicate_key(&e) => {
                warn!(
                    tenant_id,
                    timetable_id,
                    staff_id = booking.staff_id,
                    "Booking collided with a concurrently published timetable"
                );
                let taken = sqlx::query_as::<_, TeacherBooking>(
                    r#"
                    SELECT b.entry_id, b.timetable_id, b.section_id, b.staff_id, b.day_of_week,
                           b.period_slot_id, s.start_time, s.end_time
                    FROM teacher_bookings b
                    JOIN period_slots s ON s.id = b.period_slot_id
                    WHERE b.tenant_id = ? AND b.staff_id = ? AND b.day_of_week = ? AND b.period_slot_id = ?
                    "#,
                )
                .bind(tenant_id)
                .bind(booking.staff_id)
                .bind(booking.day_of_week)
                .bind(booking.period_slot_id)
                .fetch_all(&mut *conn)
                .await?;

                let candidate = Candidate::try_from(booking)?;
                return Err(match find_conflict(&candidate, &taken, Some(timetable_id))? {
                    Some(conflict) => AppError::ScheduleConflict(Box::new(conflict)),
                    None => AppError::Database(e),
                });
            }
            Err(e) => return Err(AppError::Database(e)),
        }
    }
    Ok(())
}

async fn fetch_entries_by_id(conn: &mut MySqlConnection, tenant_id: u64, ids: &[u64]) -> AppResult<Vec<TimetableEntry>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {} FROM timetable_entries e WHERE e.tenant_id = ? AND e.id IN ({})",
        ENTRY_COLUMNS,
        placeholders(ids.len())
    );
    let mut query = sqlx::query_as::<_, TimetableEntry>(&sql).bind(tenant_id);
    for id in ids {
        query = query.bind(*id);
    }
    let rows = query.fetch_all(conn).await?;

    // keep the caller's order
    Ok(ids
        .iter()
        .filter_map(|id| rows.iter().find(|e| e.id == *id).cloned())
        .collect())
}

#[async_trait]
impl TimetableStore for MySqlStore {
    async fn create_timetable(&self, new: NewTimetable, now: DateTime<Utc>) -> AppResult<Timetable> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO timetables
                (tenant_id, branch_id, section_id, academic_year_id, name, status,
                 created_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.tenant_id)
        .bind(new.branch_id)
        .bind(new.section_id)
        .bind(new.academic_year_id)
        .bind(&new.name)
        .bind(TimetableStatus::Draft)
        .bind(new.created_by)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let timetable = fetch_timetable(&mut tx, new.tenant_id, result.last_insert_id(), false).await?;
        tx.commit().await?;
        Ok(timetable)
    }

    async fn get_timetable(&self, tenant_id: u64, id: u64) -> AppResult<Option<Timetable>> {
        let mut conn = self.pool.acquire().await?;
        match fetch_timetable(&mut conn, tenant_id, id, false).await {
            Ok(timetable) => Ok(Some(timetable)),
            Err(AppError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_timetables(
        &self,
        tenant_id: u64,
        filter: &TimetableFilter,
        page: Pagination,
    ) -> AppResult<Page<Timetable>> {
        let mut sql = SqlFilter::default();
        sql.eq("tenant_id", tenant_id);
        if let Some(section_id) = filter.section_id {
            sql.eq("section_id", section_id);
        }
        if let Some(year) = filter.academic_year_id {
            sql.eq("academic_year_id", year);
        }
        if let Some(branch_id) = filter.branch_id {
            sql.eq("branch_id", branch_id);
        }
        if let Some(status) = filter.status {
            sql.eq("status", status.as_ref());
        }

        fetch_page(&self.pool, "timetables", TIMETABLE_COLUMNS, &sql, "id DESC", page).await
    }

    async fn rename_timetable(&self, tenant_id: u64, id: u64, name: String, now: DateTime<Utc>) -> AppResult<Timetable> {
        let mut tx = self.pool.begin().await?;
        let current = fetch_timetable(&mut tx, tenant_id, id, true).await?;
        reject_archived(&current, "rename")?;

        sqlx::query("UPDATE timetables SET name = ?, updated_at = ? WHERE tenant_id = ? AND id = ?")
            .bind(&name)
            .bind(now)
            .bind(tenant_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let timetable = fetch_timetable(&mut tx, tenant_id, id, false).await?;
        tx.commit().await?;
        Ok(timetable)
    }

    async fn delete_timetable(&self, tenant_id: u64, id: u64) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        let current = fetch_timetable(&mut tx, tenant_id, id, true).await?;
        if current.status != TimetableStatus::Draft {
            return Err(AppError::InvalidState {
                entity: "timetable",
                id,
                status: current.status.to_string(),
                action: "delete",
            });
        }

        // entries go with it (ON DELETE CASCADE)
        sqlx::query("DELETE FROM timetables WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        debug!(tenant_id, id, "Draft timetable deleted");
        Ok(())
    }

    async fn list_entries(&self, tenant_id: u64, timetable_id: u64) -> AppResult<Vec<TimetableEntry>> {
        let mut conn = self.pool.acquire().await?;
        fetch_timetable(&mut conn, tenant_id, timetable_id, false).await?;

        let rows = sqlx::query_as::<_, TimetableEntry>(&format!(
            r#"
            SELECT {}
            FROM timetable_entries e
            JOIN period_slots s ON s.id = e.period_slot_id
            WHERE e.tenant_id = ? AND e.timetable_id = ?
            ORDER BY e.day_of_week, s.start_time, e.id
            "#,
            ENTRY_COLUMNS
        ))
        .bind(tenant_id)
        .bind(timetable_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    #[instrument(skip(self, entries), fields(count = entries.len()))]
    async fn upsert_entries(
        &self,
        tenant_id: u64,
        timetable_id: u64,
        entries: Vec<PlannedEntry>,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<TimetableEntry>> {
        let mut tx = self.pool.begin().await?;
        let timetable = fetch_timetable(&mut tx, tenant_id, timetable_id, true).await?;
        reject_archived(&timetable, "edit entries")?;

        let mut ids = Vec::with_capacity(entries.len());
        for planned in &entries {
            let input = &planned.input;
            sqlx::query(
                r#"
                INSERT INTO timetable_entries
                    (tenant_id, timetable_id, day_of_week, period_slot_id, subject_id, staff_id,
                     room, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON DUPLICATE KEY UPDATE
                    subject_id = VALUES(subject_id),
                    staff_id   = VALUES(staff_id),
                    room       = VALUES(room),
                    updated_at = VALUES(updated_at)
                "#,
            )
            .bind(tenant_id)
            .bind(timetable_id)
            .bind(input.day_of_week)
            .bind(input.period_slot_id)
            .bind(input.subject_id)
            .bind(input.staff_id)
            .bind(&input.room)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            let id = sqlx::query_scalar::<_, u64>(
                "SELECT id FROM timetable_entries WHERE timetable_id = ? AND day_of_week = ? AND period_slot_id = ?",
            )
            .bind(timetable_id)
            .bind(input.day_of_week)
            .bind(input.period_slot_id)
            .fetch_one(&mut *tx)
            .await?;
            ids.push(id);
        }

        if timetable.status == TimetableStatus::Published {
            let own = own_bookings(&mut tx, tenant_id, timetable_id).await?;
            let staff: BTreeSet<u64> = own.iter().map(|b| b.staff_id).collect();
            let others = lock_bookings_of(&mut tx, tenant_id, &staff).await?;
            check_bookings(&own, &others, timetable_id)?;
            replace_bookings(&mut tx, tenant_id, timetable_id, &own).await?;
        }

        sqlx::query("UPDATE timetables SET updated_at = ? WHERE tenant_id = ? AND id = ?")
            .bind(now)
            .bind(tenant_id)
            .bind(timetable_id)
            .execute(&mut *tx)
            .await?;

        let saved = fetch_entries_by_id(&mut tx, tenant_id, &ids).await?;
        tx.commit().await?;
        Ok(saved)
    }

    async fn delete_entry(&self, tenant_id: u64, timetable_id: u64, entry_id: u64) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        let timetable = fetch_timetable(&mut tx, tenant_id, timetable_id, true).await?;
        reject_archived(&timetable, "edit entries")?;

        let exists = sqlx::query_scalar::<_, u64>(
            "SELECT id FROM timetable_entries WHERE tenant_id = ? AND timetable_id = ? AND id = ? FOR UPDATE",
        )
        .bind(tenant_id)
        .bind(timetable_id)
        .bind(entry_id)
        .fetch_optional(&mut *tx)
        .await?;
        if exists.is_none() {
            return Err(AppError::not_found("timetable_entry", entry_id));
        }

        let marked = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM period_attendance WHERE tenant_id = ? AND timetable_entry_id = ?",
        )
        .bind(tenant_id)
        .bind(entry_id)
        .fetch_one(&mut *tx)
        .await?;
        if marked > 0 {
            return Err(AppError::EntityInUse {
                entity: "timetable_entry",
                id: entry_id,
                referenced_by: "attendance_record",
            });
        }

        // booking row goes with it (ON DELETE CASCADE)
        sqlx::query("DELETE FROM timetable_entries WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id)
            .bind(entry_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn published_bookings(&self, tenant_id: u64, staff_id: u64, day: DayOfWeek) -> AppResult<Vec<TeacherBooking>> {
        let rows = sqlx::query_as::<_, TeacherBooking>(
            r#"
            SELECT b.entry_id, b.timetable_id, b.section_id, b.staff_id, b.day_of_week,
                   b.period_slot_id, s.start_time, s.end_time
            FROM teacher_bookings b
            JOIN period_slots s ON s.id = b.period_slot_id
            WHERE b.tenant_id = ? AND b.staff_id = ? AND b.day_of_week = ?
            ORDER BY s.start_time, b.entry_id
            "#,
        )
        .bind(tenant_id)
        .bind(staff_id)
        .bind(day)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    #[instrument(skip(self))]
    async fn publish(&self, tenant_id: u64, id: u64, now: DateTime<Utc>) -> AppResult<PublishOutcome> {
        let mut tx = self.pool.begin().await?;
        let timetable = fetch_timetable(&mut tx, tenant_id, id, true).await?;
        reject_archived(&timetable, "publish")?;

        let own = own_bookings(&mut tx, tenant_id, id).await?;
        if own.is_empty() {
            return Err(AppError::validation("entries", "a timetable without entries cannot be published"));
        }

        let superseded: Vec<u64> = sqlx::query_scalar::<_, u64>(
            r#"
            SELECT id FROM timetables
            WHERE tenant_id = ? AND section_id = ? AND academic_year_id = ?
              AND status = 'published' AND id <> ?
            FOR UPDATE
            "#,
        )
        .bind(tenant_id)
        .bind(timetable.section_id)
        .bind(timetable.academic_year_id)
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        let staff: BTreeSet<u64> = own.iter().map(|b| b.staff_id).collect();
        let others: Vec<TeacherBooking> = lock_bookings_of(&mut tx, tenant_id, &staff)
            .await?
            .into_iter()
            .filter(|b| !superseded.contains(&b.timetable_id))
            .collect();
        check_bookings(&own, &others, id)?;

        if !superseded.is_empty() {
            let list = placeholders(superseded.len());
            let archive_sql = format!(
                "UPDATE timetables SET status = 'archived', archived_at = ?, updated_at = ? WHERE tenant_id = ? AND id IN ({})",
                list
            );
            let mut archive = sqlx::query(&archive_sql).bind(now).bind(now).bind(tenant_id);
            for old in &superseded {
                archive = archive.bind(*old);
            }
            archive.execute(&mut *tx).await?;

            let release_sql = format!(
                "DELETE FROM teacher_bookings WHERE tenant_id = ? AND timetable_id IN ({})",
                list
            );
            let mut release = sqlx::query(&release_sql).bind(tenant_id);
            for old in &superseded {
                release = release.bind(*old);
            }
            release.execute(&mut *tx).await?;
        }

        if timetable.status != TimetableStatus::Published {
            sqlx::query(
                "UPDATE timetables SET status = 'published', published_at = ?, updated_at = ? WHERE tenant_id = ? AND id = ?",
            )
            .bind(now)
            .bind(now)
            .bind(tenant_id)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                on_duplicate(e, || AppError::ConcurrentPublish {
                    section_id: timetable.section_id,
                    academic_year_id: timetable.academic_year_id,
                })
            })?;
        }
        replace_bookings(&mut tx, tenant_id, id, &own).await?;

        let published = fetch_timetable(&mut tx, tenant_id, id, false).await?;
        tx.commit().await?;

        info!(
            tenant_id,
            timetable_id = id,
            section_id = published.section_id,
            archived = ?superseded.first(),
            "Timetable published"
        );
        Ok(PublishOutcome {
            timetable: published,
            archived_timetable_id: superseded.first().copied(),
        })
    }

    #[instrument(skip(self))]
    async fn archive(&self, tenant_id: u64, id: u64, now: DateTime<Utc>) -> AppResult<Timetable> {
        let mut tx = self.pool.begin().await?;
        let current = fetch_timetable(&mut tx, tenant_id, id, true).await?;
        if current.status != TimetableStatus::Published {
            return Err(AppError::InvalidState {
                entity: "timetable",
                id,
                status: current.status.to_string(),
                action: "archive",
            });
        }

        sqlx::query(
            "UPDATE timetables SET status = 'archived', archived_at = ?, updated_at = ? WHERE tenant_id = ? AND id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(tenant_id)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM teacher_bookings WHERE tenant_id = ? AND timetable_id = ?")
            .bind(tenant_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let archived = fetch_timetable(&mut tx, tenant_id, id, false).await?;
        tx.commit().await?;
        Ok(archived)
    }

    async fn published_for_section(&self, tenant_id: u64, section_id: u64) -> AppResult<Option<Timetable>> {
        let row = sqlx::query_as::<_, Timetable>(&format!(
            r#"
            SELECT {} FROM timetables
            WHERE tenant_id = ? AND section_id = ? AND status = 'published'
            ORDER BY published_at DESC, id DESC
            LIMIT 1
            "#,
            TIMETABLE_COLUMNS
        ))
        .bind(tenant_id)
        .bind(section_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
