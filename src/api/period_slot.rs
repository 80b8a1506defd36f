use actix_web::{Responder, web};

use crate::auth::auth::AuthUser;
use crate::core::AppState;
use crate::model::schedule::{CreatePeriodSlot, PeriodSlot, TemplateQuery, UpdatePeriodSlot};
use crate::utils::response::{created, deleted, ok};

/* =========================
Create period slot
========================= */
#[utoipa::path(
    post,
    path = "/api/period-slots",
    request_body(content = CreatePeriodSlot, description = "Slot definition; duration is computed when omitted"),
    responses(
        (status = 201, description = "Period slot created", body = PeriodSlot),
        (status = 400, description = "Invalid time range, duration or link"),
        (status = 409, description = "Code already used in the branch")
    ),
    security(("bearer_auth" = [])),
    tag = "PeriodSlot"
)]
pub async fn create_period_slot(
    auth: AuthUser,
    state: web::Data<AppState>,
    payload: web::Json<CreatePeriodSlot>,
) -> actix_web::Result<impl Responder> {
    let slot = state.schedule.create_period_slot(&auth, payload.into_inner()).await?;
    Ok(created(slot))
}

#[utoipa::path(
    get,
    path = "/api/period-slots",
    params(TemplateQuery),
    responses(
        (status = 200, description = "Period slots ordered by display order", body = Object, example = json!({
            "success": true,
            "data": { "items": [], "total": 0 }
        }))
    ),
    security(("bearer_auth" = [])),
    tag = "PeriodSlot"
)]
pub async fn list_period_slots(
    auth: AuthUser,
    state: web::Data<AppState>,
    query: web::Query<TemplateQuery>,
) -> actix_web::Result<impl Responder> {
    let page = state.schedule.list_period_slots(&auth, &query).await?;
    Ok(ok(page))
}

#[utoipa::path(
    get,
    path = "/api/period-slots/{id}",
    params(("id" = u64, Path, description = "Period slot id")),
    responses(
        (status = 200, description = "Period slot", body = PeriodSlot),
        (status = 404, description = "Period slot not found")
    ),
    security(("bearer_auth" = [])),
    tag = "PeriodSlot"
)]
pub async fn get_period_slot(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let slot = state.schedule.get_period_slot(&auth, path.into_inner()).await?;
    Ok(ok(slot))
}

#[utoipa::path(
    put,
    path = "/api/period-slots/{id}",
    params(("id" = u64, Path, description = "Period slot id")),
    request_body = UpdatePeriodSlot,
    responses(
        (status = 200, description = "Updated period slot", body = PeriodSlot),
        (status = 400, description = "Invalid field"),
        (status = 404, description = "Period slot not found")
    ),
    security(("bearer_auth" = [])),
    tag = "PeriodSlot"
)]
pub async fn update_period_slot(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
    payload: web::Json<UpdatePeriodSlot>,
) -> actix_web::Result<impl Responder> {
    let slot = state
        .schedule
        .update_period_slot(&auth, path.into_inner(), payload.into_inner())
        .await?;
    Ok(ok(slot))
}

#[utoipa::path(
    post,
    path = "/api/period-slots/{id}/toggle-active",
    params(("id" = u64, Path, description = "Period slot id")),
    responses((status = 200, description = "Period slot with flipped is_active", body = PeriodSlot)),
    security(("bearer_auth" = [])),
    tag = "PeriodSlot"
)]
pub async fn toggle_period_slot(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let slot = state.schedule.toggle_period_slot(&auth, path.into_inner()).await?;
    Ok(ok(slot))
}

#[utoipa::path(
    delete,
    path = "/api/period-slots/{id}",
    params(("id" = u64, Path, description = "Period slot id")),
    responses(
        (status = 200, description = "Period slot deleted"),
        (status = 409, description = "Referenced by a timetable entry or attendance record")
    ),
    security(("bearer_auth" = [])),
    tag = "PeriodSlot"
)]
pub async fn delete_period_slot(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let id = path.into_inner();
    state.schedule.delete_period_slot(&auth, id).await?;
    Ok(deleted("period_slot", id))
}
