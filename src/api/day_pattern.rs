use actix_web::{Responder, web};

use crate::auth::auth::AuthUser;
use crate::core::AppState;
use crate::model::schedule::{CreateDayPattern, DayPattern, TemplateQuery, UpdateDayPattern};
use crate::utils::response::{created, deleted, ok};

#[utoipa::path(
    post,
    path = "/api/day-patterns",
    request_body = CreateDayPattern,
    responses(
        (status = 201, description = "Day pattern created", body = DayPattern),
        (status = 400, description = "Invalid code, name or total_periods"),
        (status = 409, description = "Code already used in the tenant")
    ),
    security(("bearer_auth" = [])),
    tag = "DayPattern"
)]
pub async fn create_day_pattern(
    auth: AuthUser,
    state: web::Data<AppState>,
    payload: web::Json<CreateDayPattern>,
) -> actix_web::Result<impl Responder> {
    let pattern = state.schedule.create_day_pattern(&auth, payload.into_inner()).await?;
    Ok(created(pattern))
}

#[utoipa::path(
    get,
    path = "/api/day-patterns",
    params(TemplateQuery),
    responses(
        (status = 200, description = "Day patterns of the tenant", body = Object, example = json!({
            "success": true,
            "data": { "items": [], "total": 0 }
        }))
    ),
    security(("bearer_auth" = [])),
    tag = "DayPattern"
)]
pub async fn list_day_patterns(
    auth: AuthUser,
    state: web::Data<AppState>,
    query: web::Query<TemplateQuery>,
) -> actix_web::Result<impl Responder> {
    let page = state.schedule.list_day_patterns(&auth, &query).await?;
    Ok(ok(page))
}

#[utoipa::path(
    get,
    path = "/api/day-patterns/{id}",
    params(("id" = u64, Path, description = "Day pattern id")),
    responses(
        (status = 200, description = "Day pattern", body = DayPattern),
        (status = 404, description = "Day pattern not found")
    ),
    security(("bearer_auth" = [])),
    tag = "DayPattern"
)]
pub async fn get_day_pattern(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let pattern = state.schedule.get_day_pattern(&auth, path.into_inner()).await?;
    Ok(ok(pattern))
}

#[utoipa::path(
    put,
    path = "/api/day-patterns/{id}",
    params(("id" = u64, Path, description = "Day pattern id")),
    request_body = UpdateDayPattern,
    responses(
        (status = 200, description = "Updated day pattern", body = DayPattern),
        (status = 404, description = "Day pattern not found"),
        (status = 409, description = "Code already used in the tenant")
    ),
    security(("bearer_auth" = [])),
    tag = "DayPattern"
)]
pub async fn update_day_pattern(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
    payload: web::Json<UpdateDayPattern>,
) -> actix_web::Result<impl Responder> {
    let pattern = state
        .schedule
        .update_day_pattern(&auth, path.into_inner(), payload.into_inner())
        .await?;
    Ok(ok(pattern))
}

#[utoipa::path(
    post,
    path = "/api/day-patterns/{id}/toggle-active",
    params(("id" = u64, Path, description = "Day pattern id")),
    responses((status = 200, description = "Day pattern with flipped is_active", body = DayPattern)),
    security(("bearer_auth" = [])),
    tag = "DayPattern"
)]
pub async fn toggle_day_pattern(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let pattern = state.schedule.toggle_day_pattern(&auth, path.into_inner()).await?;
    Ok(ok(pattern))
}

#[utoipa::path(
    delete,
    path = "/api/day-patterns/{id}",
    params(("id" = u64, Path, description = "Day pattern id")),
    responses(
        (status = 200, description = "Day pattern deleted"),
        (status = 409, description = "Still referenced by an active period slot or a day assignment")
    ),
    security(("bearer_auth" = [])),
    tag = "DayPattern"
)]
pub async fn delete_day_pattern(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let id = path.into_inner();
    state.schedule.delete_day_pattern(&auth, id).await?;
    Ok(deleted("day_pattern", id))
}
