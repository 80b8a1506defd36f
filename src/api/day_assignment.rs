use actix_web::{Responder, web};

use crate::auth::auth::AuthUser;
use crate::core::AppState;
use crate::model::attendance::BranchQuery;
use crate::model::schedule::{DayPatternAssignment, UpsertDayAssignment};
use crate::utils::response::ok;

/// The whole week of a branch, one row per weekday (0 = Sunday).
#[utoipa::path(
    get,
    path = "/api/day-pattern-assignments",
    params(BranchQuery),
    responses(
        (status = 200, description = "Seven assignments, Sunday first", body = [DayPatternAssignment]),
        (status = 403, description = "Branch outside the caller's scope")
    ),
    security(("bearer_auth" = [])),
    tag = "DayAssignment"
)]
pub async fn list_day_assignments(
    auth: AuthUser,
    state: web::Data<AppState>,
    query: web::Query<BranchQuery>,
) -> actix_web::Result<impl Responder> {
    let week = state.schedule.list_day_assignments(&auth, query.branch_id).await?;
    Ok(ok(week))
}

#[utoipa::path(
    get,
    path = "/api/day-pattern-assignments/{day_of_week}",
    params(
        ("day_of_week" = u8, Path, description = "0 = Sunday .. 6 = Saturday"),
        BranchQuery
    ),
    responses(
        (status = 200, description = "Assignment of the weekday", body = DayPatternAssignment),
        (status = 400, description = "Weekday out of range")
    ),
    security(("bearer_auth" = [])),
    tag = "DayAssignment"
)]
pub async fn get_day_assignment(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u8>,
    query: web::Query<BranchQuery>,
) -> actix_web::Result<impl Responder> {
    let assignment = state
        .schedule
        .get_day_assignment(&auth, path.into_inner(), query.branch_id)
        .await?;
    Ok(ok(assignment))
}

#[utoipa::path(
    put,
    path = "/api/day-pattern-assignments/{day_of_week}",
    params(
        ("day_of_week" = u8, Path, description = "0 = Sunday .. 6 = Saturday"),
        BranchQuery
    ),
    request_body = UpsertDayAssignment,
    responses(
        (status = 200, description = "Saved assignment", body = DayPatternAssignment),
        (status = 400, description = "Pattern on a non-working day, or inactive pattern"),
        (status = 404, description = "Day pattern not found")
    ),
    security(("bearer_auth" = [])),
    tag = "DayAssignment"
)]
pub async fn upsert_day_assignment(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u8>,
    query: web::Query<BranchQuery>,
    payload: web::Json<UpsertDayAssignment>,
) -> actix_web::Result<impl Responder> {
    let assignment = state
        .schedule
        .upsert_day_assignment(&auth, path.into_inner(), query.branch_id, payload.into_inner())
        .await?;
    Ok(ok(assignment))
}
