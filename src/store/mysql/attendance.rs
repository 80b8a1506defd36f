use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::MySqlConnection;
use tracing::{debug, info, instrument};

use super::{MySqlStore, on_duplicate};
use crate::errors::{AppError, AppResult};
use crate::model::attendance::{
    AttendanceAuditEntry, AttendanceEdit, AttendanceStatus, ChangeType, EditOutcome, EditWindowPolicy,
    PeriodAttendanceRecord, RosterMark,
};
use crate::store::AttendanceStore;

const RECORD_COLUMNS: &str = "id, tenant_id, branch_id, section_id, student_id, period_slot_id, \
     timetable_entry_id, attendance_date, status, late_arrival_time, remarks, marked_by, marked_at, \
     updated_by, updated_at";

const AUDIT_COLUMNS: &str = "id, tenant_id, attendance_id, change_type, previous_status, \
     previous_remarks, previous_late_arrival_time, new_status, new_remarks, new_late_arrival_time, \
     change_reason, changed_by, changed_at";

async fn fetch_record(
    conn: &mut MySqlConnection,
    tenant_id: u64,
    id: u64,
    for_update: bool,
) -> Result<Option<PeriodAttendanceRecord>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM period_attendance WHERE tenant_id = ? AND id = ?{}",
        RECORD_COLUMNS,
        if for_update { " FOR UPDATE" } else { "" }
    );
    sqlx::query_as::<_, PeriodAttendanceRecord>(&sql)
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(conn)
        .await
}

async fn fetch_audit(conn: &mut MySqlConnection, id: u64) -> Result<AttendanceAuditEntry, sqlx::Error> {
    sqlx::query_as::<_, AttendanceAuditEntry>(&format!(
        "SELECT {} FROM period_attendance_audit WHERE id = ?",
        AUDIT_COLUMNS
    ))
    .bind(id)
    .fetch_one(conn)
    .await
}

#[allow(clippy::too_many_arguments)]
async fn insert_audit(
    conn: &mut MySqlConnection,
    tenant_id: u64,
    attendance_id: u64,
    change_type: ChangeType,
    previous: Option<&PeriodAttendanceRecord>,
    new_status: AttendanceStatus,
    new_remarks: &Option<String>,
    new_late: Option<NaiveTime>,
    reason: Option<&str>,
    changed_by: u64,
    changed_at: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO period_attendance_audit
            (tenant_id, attendance_id, change_type, previous_status, previous_remarks,
             previous_late_arrival_time, new_status, new_remarks, new_late_arrival_time,
             change_reason, changed_by, changed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(tenant_id)
    .bind(attendance_id)
    .bind(change_type)
    .bind(previous.map(|r| r.status))
    .bind(previous.and_then(|r| r.remarks.clone()))
    .bind(previous.and_then(|r| r.late_arrival_time))
    .bind(new_status)
    .bind(new_remarks)
    .bind(new_late)
    .bind(reason)
    .bind(changed_by)
    .bind(changed_at)
    .execute(conn)
    .await?;
    Ok(result.last_insert_id())
}

#[async_trait]
impl AttendanceStore for MySqlStore {
    async fn get_record(&self, tenant_id: u64, id: u64) -> AppResult<Option<PeriodAttendanceRecord>> {
        let mut conn = self.pool.acquire().await?;
        Ok(fetch_record(&mut conn, tenant_id, id, false).await?)
    }

    async fn period_records(
        &self,
        tenant_id: u64,
        section_id: u64,
        period_slot_id: u64,
        date: NaiveDate,
    ) -> AppResult<Vec<PeriodAttendanceRecord>> {
        let rows = sqlx::query_as::<_, PeriodAttendanceRecord>(&format!(
            r#"
            SELECT {} FROM period_attendance
            WHERE tenant_id = ? AND section_id = ? AND period_slot_id = ? AND attendance_date = ?
            ORDER BY id
            "#,
            RECORD_COLUMNS
        ))
        .bind(tenant_id)
        .bind(section_id)
        .bind(period_slot_id)
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn day_records(&self, tenant_id: u64, section_id: u64, date: NaiveDate) -> AppResult<Vec<PeriodAttendanceRecord>> {
        let rows = sqlx::query_as::<_, PeriodAttendanceRecord>(&format!(
            r#"
            SELECT {} FROM period_attendance
            WHERE tenant_id = ? AND section_id = ? AND attendance_date = ?
            ORDER BY period_slot_id, id
            "#,
            RECORD_COLUMNS
        ))
        .bind(tenant_id)
        .bind(section_id)
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    #[instrument(skip(self, mark), fields(section_id = mark.section_id, period_slot_id = mark.period_slot_id, date = %mark.date))]
    async fn mark_roster(&self, mark: RosterMark) -> AppResult<Vec<PeriodAttendanceRecord>> {
        let already_marked = || AppError::AlreadyMarked {
            section_id: mark.section_id,
            period_slot_id: mark.period_slot_id,
            date: mark.date,
        };

        let mut tx = self.pool.begin().await?;

        // the unique key only covers students; a roster marked for a
        // section whose enrollment changed since is caught here
        let existing = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM period_attendance
            WHERE tenant_id = ? AND section_id = ? AND period_slot_id = ? AND attendance_date = ?
            "#,
        )
        .bind(mark.tenant_id)
        .bind(mark.section_id)
        .bind(mark.period_slot_id)
        .bind(mark.date)
        .fetch_one(&mut *tx)
        .await?;
        if existing > 0 {
            return Err(already_marked());
        }

        let mut ids = Vec::with_capacity(mark.lines.len());
        for line in &mark.lines {
            let result = sqlx::query(
                r#"
                INSERT INTO period_attendance
                    (tenant_id, branch_id, section_id, student_id, period_slot_id, timetable_entry_id,
                     attendance_date, status, late_arrival_time, remarks, marked_by, marked_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(mark.tenant_id)
            .bind(mark.branch_id)
            .bind(mark.section_id)
            .bind(line.student_id)
            .bind(mark.period_slot_id)
            .bind(mark.timetable_entry_id)
            .bind(mark.date)
            .bind(line.status)
            .bind(line.late_arrival_time)
            .bind(&line.remarks)
            .bind(mark.marked_by)
            .bind(mark.marked_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| on_duplicate(e, already_marked))?;
            let id = result.last_insert_id();

            insert_audit(
                &mut tx,
                mark.tenant_id,
                id,
                ChangeType::Create,
                None,
                line.status,
                &line.remarks,
                line.late_arrival_time,
                None,
                mark.marked_by,
                mark.marked_at,
            )
            .await?;
            ids.push(id);
        }

        let mut created = Vec::with_capacity(ids.len());
        for id in ids {
            let record = fetch_record(&mut tx, mark.tenant_id, id, false)
                .await?
                .ok_or_else(|| AppError::Internal(format!("attendance {} vanished after insert", id)))?;
            created.push(record);
        }
        tx.commit().await?;

        info!(count = created.len(), marked_by = mark.marked_by, "Period attendance marked");
        Ok(created)
    }

    #[instrument(skip(self, edits), fields(count = edits.len()))]
    async fn apply_edits(&self, tenant_id: u64, edits: Vec<AttendanceEdit>) -> AppResult<Vec<EditOutcome>> {
        let mut tx = self.pool.begin().await?;
        let mut outcomes = Vec::with_capacity(edits.len());

        for edit in edits {
            let previous = fetch_record(&mut tx, tenant_id, edit.attendance_id, true)
                .await?
                .ok_or_else(|| AppError::not_found("attendance", edit.attendance_id))?;

            let audit_id = insert_audit(
                &mut tx,
                tenant_id,
                previous.id,
                ChangeType::Edit,
                Some(&previous),
                edit.status,
                &edit.remarks,
                edit.late_arrival_time,
                Some(&edit.reason),
                edit.changed_by,
                edit.changed_at,
            )
            .await?;

            sqlx::query(
                r#"
                UPDATE period_attendance
                SET status = ?, late_arrival_time = ?, remarks = ?, updated_by = ?, updated_at = ?
                WHERE tenant_id = ? AND id = ?
                "#,
            )
            .bind(edit.status)
            .bind(edit.late_arrival_time)
            .bind(&edit.remarks)
            .bind(edit.changed_by)
            .bind(edit.changed_at)
            .bind(tenant_id)
            .bind(previous.id)
            .execute(&mut *tx)
            .await?;

            let record = fetch_record(&mut tx, tenant_id, previous.id, false)
                .await?
                .ok_or_else(|| AppError::not_found("attendance", previous.id))?;
            let audit = fetch_audit(&mut tx, audit_id).await?;
            outcomes.push(EditOutcome { record, audit });
        }

        tx.commit().await?;
        debug!(tenant_id, count = outcomes.len(), "Attendance edits applied");
        Ok(outcomes)
    }

    async fn history(&self, tenant_id: u64, attendance_id: u64) -> AppResult<Vec<AttendanceAuditEntry>> {
        let rows = sqlx::query_as::<_, AttendanceAuditEntry>(&format!(
            r#"
            SELECT {} FROM period_attendance_audit
            WHERE tenant_id = ? AND attendance_id = ?
            ORDER BY changed_at, id
            "#,
            AUDIT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(attendance_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_policy(&self, tenant_id: u64, branch_id: u64) -> AppResult<Option<EditWindowPolicy>> {
        let row = sqlx::query_as::<_, EditWindowPolicy>(
            r#"
            SELECT tenant_id, branch_id, edit_window_minutes, updated_by, updated_at
            FROM edit_window_policies
            WHERE tenant_id = ? AND branch_id = ?
            "#,
        )
        .bind(tenant_id)
        .bind(branch_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn upsert_policy(&self, policy: EditWindowPolicy) -> AppResult<EditWindowPolicy> {
        sqlx::query(
            r#"
            INSERT INTO edit_window_policies (tenant_id, branch_id, edit_window_minutes, updated_by, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                edit_window_minutes = VALUES(edit_window_minutes),
                updated_by          = VALUES(updated_by),
                updated_at          = VALUES(updated_at)
            "#,
        )
        .bind(policy.tenant_id)
        .bind(policy.branch_id)
        .bind(policy.edit_window_minutes)
        .bind(policy.updated_by)
        .bind(policy.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(policy)
    }
}
