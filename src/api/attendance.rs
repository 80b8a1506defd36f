use actix_web::{Responder, web};

use crate::auth::auth::AuthUser;
use crate::core::AppState;
use crate::model::attendance::{
    AttendanceAuditEntry, BranchQuery, DaySummary, EditAttendance, EditOutcome, EditWindowPolicy, EditWindowStatus,
    MarkOutcome, MarkRoster, PeriodRoster, SectionDateQuery, SectionDayPeriods, UpdateEditWindowPolicy,
};
use crate::utils::response::{created, ok};

/* =========================
Roster
========================= */
#[utoipa::path(
    get,
    path = "/api/student-attendance/periods",
    params(SectionDateQuery),
    responses(
        (status = 200, description = "Teaching periods of the section on the date", body = SectionDayPeriods),
        (status = 404, description = "Section not found")
    ),
    security(("bearer_auth" = [])),
    tag = "StudentAttendance"
)]
pub async fn list_periods(
    auth: AuthUser,
    state: web::Data<AppState>,
    query: web::Query<SectionDateQuery>,
) -> actix_web::Result<impl Responder> {
    let periods = state.attendance.list_periods(&auth, query.section_id, query.date).await?;
    Ok(ok(periods))
}

#[utoipa::path(
    get,
    path = "/api/student-attendance/period/{period_slot_id}",
    params(
        ("period_slot_id" = u64, Path, description = "Period slot id"),
        SectionDateQuery
    ),
    responses(
        (status = 200, description = "Roster with stored marks, or defaults when unmarked", body = PeriodRoster),
        (status = 400, description = "No scheduled period for the section on the date")
    ),
    security(("bearer_auth" = [])),
    tag = "StudentAttendance"
)]
pub async fn get_roster(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
    query: web::Query<SectionDateQuery>,
) -> actix_web::Result<impl Responder> {
    let roster = state
        .attendance
        .roster(&auth, path.into_inner(), query.section_id, query.date)
        .await?;
    Ok(ok(roster))
}

/// First submission creates the records (201). Resubmitting a marked
/// roster applies audited edits (200) and needs edit rights on every record.
#[utoipa::path(
    post,
    path = "/api/student-attendance/period/{period_slot_id}",
    params(
        ("period_slot_id" = u64, Path, description = "Period slot id"),
        SectionDateQuery
    ),
    request_body = MarkRoster,
    responses(
        (status = 201, description = "Roster marked", body = MarkOutcome),
        (status = 200, description = "Marked roster corrected", body = MarkOutcome),
        (status = 400, description = "Roster does not match enrolment, or future date"),
        (status = 409, description = "Roster already marked and not editable by the caller")
    ),
    security(("bearer_auth" = [])),
    tag = "StudentAttendance"
)]
pub async fn mark_roster(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
    query: web::Query<SectionDateQuery>,
    payload: web::Json<MarkRoster>,
) -> actix_web::Result<impl Responder> {
    let outcome = state
        .attendance
        .mark(&auth, path.into_inner(), query.section_id, query.date, payload.into_inner())
        .await?;
    if outcome.created {
        Ok(created(outcome))
    } else {
        Ok(ok(outcome))
    }
}

#[utoipa::path(
    get,
    path = "/api/student-attendance/summary",
    params(SectionDateQuery),
    responses((status = 200, description = "Per-period and whole-day counts", body = DaySummary)),
    security(("bearer_auth" = [])),
    tag = "StudentAttendance"
)]
pub async fn day_summary(
    auth: AuthUser,
    state: web::Data<AppState>,
    query: web::Query<SectionDateQuery>,
) -> actix_web::Result<impl Responder> {
    let summary = state.attendance.day_summary(&auth, query.section_id, query.date).await?;
    Ok(ok(summary))
}

/* =========================
Single record
========================= */
#[utoipa::path(
    put,
    path = "/api/student-attendance/{id}",
    params(("id" = u64, Path, description = "Attendance record id")),
    request_body = EditAttendance,
    responses(
        (status = 200, description = "Edited record with its audit entry", body = EditOutcome),
        (status = 400, description = "Missing reason or nothing changed"),
        (status = 403, description = "Edit window expired or caller is not the original marker")
    ),
    security(("bearer_auth" = [])),
    tag = "StudentAttendance"
)]
pub async fn edit_record(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
    payload: web::Json<EditAttendance>,
) -> actix_web::Result<impl Responder> {
    let outcome = state
        .attendance
        .edit(&auth, path.into_inner(), payload.into_inner())
        .await?;
    Ok(ok(outcome))
}

#[utoipa::path(
    get,
    path = "/api/student-attendance/{id}/history",
    params(("id" = u64, Path, description = "Attendance record id")),
    responses((status = 200, description = "Audit trail oldest first", body = [AttendanceAuditEntry])),
    security(("bearer_auth" = [])),
    tag = "StudentAttendance"
)]
pub async fn history(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let entries = state.attendance.history(&auth, path.into_inner()).await?;
    Ok(ok(entries))
}

#[utoipa::path(
    get,
    path = "/api/student-attendance/{id}/edit-status",
    params(("id" = u64, Path, description = "Attendance record id")),
    responses((status = 200, description = "Whether the caller may still edit", body = EditWindowStatus)),
    security(("bearer_auth" = [])),
    tag = "StudentAttendance"
)]
pub async fn edit_status(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let status = state.attendance.edit_status(&auth, path.into_inner()).await?;
    Ok(ok(status))
}

/* =========================
Edit window policy
========================= */
#[utoipa::path(
    get,
    path = "/api/student-attendance/edit-window-policy",
    params(BranchQuery),
    responses((status = 200, description = "Stored policy or the default", body = EditWindowPolicy)),
    security(("bearer_auth" = [])),
    tag = "StudentAttendance"
)]
pub async fn get_policy(
    auth: AuthUser,
    state: web::Data<AppState>,
    query: web::Query<BranchQuery>,
) -> actix_web::Result<impl Responder> {
    let policy = state.attendance.get_policy(&auth, query.branch_id).await?;
    Ok(ok(policy))
}

#[utoipa::path(
    put,
    path = "/api/student-attendance/edit-window-policy",
    params(BranchQuery),
    request_body = UpdateEditWindowPolicy,
    responses(
        (status = 200, description = "Saved policy", body = EditWindowPolicy),
        (status = 400, description = "Window outside 1..=10080 minutes")
    ),
    security(("bearer_auth" = [])),
    tag = "StudentAttendance"
)]
pub async fn update_policy(
    auth: AuthUser,
    state: web::Data<AppState>,
    query: web::Query<BranchQuery>,
    payload: web::Json<UpdateEditWindowPolicy>,
) -> actix_web::Result<impl Responder> {
    let policy = state
        .attendance
        .update_policy(&auth, query.branch_id, payload.into_inner())
        .await?;
    Ok(ok(policy))
}
