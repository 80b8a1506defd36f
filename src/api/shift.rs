use actix_web::{Responder, web};

use crate::auth::auth::AuthUser;
use crate::core::AppState;
use crate::model::schedule::{CreateShift, Shift, TemplateQuery, UpdateShift};
use crate::utils::response::{created, deleted, ok};

/* =========================
Create shift
========================= */
#[utoipa::path(
    post,
    path = "/api/shifts",
    request_body(content = CreateShift, description = "Shift definition", content_type = "application/json"),
    responses(
        (status = 201, description = "Shift created", body = Shift),
        (status = 400, description = "Invalid code, name or time range"),
        (status = 403, description = "Missing schedule.manage"),
        (status = 409, description = "Code already used in the branch")
    ),
    security(("bearer_auth" = [])),
    tag = "Shift"
)]
pub async fn create_shift(
    auth: AuthUser,
    state: web::Data<AppState>,
    payload: web::Json<CreateShift>,
) -> actix_web::Result<impl Responder> {
    let shift = state.schedule.create_shift(&auth, payload.into_inner()).await?;
    Ok(created(shift))
}

/* =========================
List shifts
========================= */
#[utoipa::path(
    get,
    path = "/api/shifts",
    params(TemplateQuery),
    responses(
        (status = 200, description = "Shifts ordered by display order", body = Object, example = json!({
            "success": true,
            "data": { "items": [], "total": 0 }
        })),
        (status = 403, description = "Missing schedule.read")
    ),
    security(("bearer_auth" = [])),
    tag = "Shift"
)]
pub async fn list_shifts(
    auth: AuthUser,
    state: web::Data<AppState>,
    query: web::Query<TemplateQuery>,
) -> actix_web::Result<impl Responder> {
    let page = state.schedule.list_shifts(&auth, &query).await?;
    Ok(ok(page))
}

#[utoipa::path(
    get,
    path = "/api/shifts/{id}",
    params(("id" = u64, Path, description = "Shift id")),
    responses(
        (status = 200, description = "Shift", body = Shift),
        (status = 404, description = "Shift not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Shift"
)]
pub async fn get_shift(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let shift = state.schedule.get_shift(&auth, path.into_inner()).await?;
    Ok(ok(shift))
}

/// Partial update; fields left out are unchanged, `description: null` clears it.
#[utoipa::path(
    put,
    path = "/api/shifts/{id}",
    params(("id" = u64, Path, description = "Shift id")),
    request_body = UpdateShift,
    responses(
        (status = 200, description = "Updated shift", body = Shift),
        (status = 400, description = "Invalid field"),
        (status = 404, description = "Shift not found"),
        (status = 409, description = "Code already used in the branch")
    ),
    security(("bearer_auth" = [])),
    tag = "Shift"
)]
pub async fn update_shift(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
    payload: web::Json<UpdateShift>,
) -> actix_web::Result<impl Responder> {
    let shift = state
        .schedule
        .update_shift(&auth, path.into_inner(), payload.into_inner())
        .await?;
    Ok(ok(shift))
}

#[utoipa::path(
    post,
    path = "/api/shifts/{id}/toggle-active",
    params(("id" = u64, Path, description = "Shift id")),
    responses(
        (status = 200, description = "Shift with flipped is_active", body = Shift),
        (status = 404, description = "Shift not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Shift"
)]
pub async fn toggle_shift(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let shift = state.schedule.toggle_shift(&auth, path.into_inner()).await?;
    Ok(ok(shift))
}

#[utoipa::path(
    delete,
    path = "/api/shifts/{id}",
    params(("id" = u64, Path, description = "Shift id")),
    responses(
        (status = 200, description = "Shift deleted"),
        (status = 404, description = "Shift not found"),
        (status = 409, description = "An active period slot still uses the shift")
    ),
    security(("bearer_auth" = [])),
    tag = "Shift"
)]
pub async fn delete_shift(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let id = path.into_inner();
    state.schedule.delete_shift(&auth, id).await?;
    Ok(deleted("shift", id))
}
