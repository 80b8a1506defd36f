use actix_web::{Responder, web};
use serde::Deserialize;

use crate::auth::auth::AuthUser;
use crate::core::AppState;
use crate::model::timetable::{
    BulkEntries, ConflictCheck, ConflictQuery, CreateTimetable, EntryInput, PublishOutcome, RenameTimetable, Timetable,
    TimetableEntry, TimetableQuery,
};
use crate::utils::response::{created, deleted, ok};

#[derive(Debug, Deserialize)]
pub struct EntryPath {
    pub id: u64,
    pub entry_id: u64,
}

/* =========================
Timetables
========================= */
#[utoipa::path(
    post,
    path = "/api/timetables",
    request_body = CreateTimetable,
    responses(
        (status = 201, description = "Draft timetable created", body = Timetable),
        (status = 403, description = "Section outside the caller's branch"),
        (status = 404, description = "Section not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Timetable"
)]
pub async fn create_timetable(
    auth: AuthUser,
    state: web::Data<AppState>,
    payload: web::Json<CreateTimetable>,
) -> actix_web::Result<impl Responder> {
    let timetable = state.timetables.create(&auth, payload.into_inner()).await?;
    Ok(created(timetable))
}

#[utoipa::path(
    get,
    path = "/api/timetables",
    params(TimetableQuery),
    responses(
        (status = 200, description = "Timetables newest first", body = Object, example = json!({
            "success": true,
            "data": { "items": [], "total": 0 }
        }))
    ),
    security(("bearer_auth" = [])),
    tag = "Timetable"
)]
pub async fn list_timetables(
    auth: AuthUser,
    state: web::Data<AppState>,
    query: web::Query<TimetableQuery>,
) -> actix_web::Result<impl Responder> {
    let page = state.timetables.list(&auth, &query).await?;
    Ok(ok(page))
}

#[utoipa::path(
    get,
    path = "/api/timetables/{id}",
    params(("id" = u64, Path, description = "Timetable id")),
    responses(
        (status = 200, description = "Timetable", body = Timetable),
        (status = 404, description = "Timetable not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Timetable"
)]
pub async fn get_timetable(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let timetable = state.timetables.get(&auth, path.into_inner()).await?;
    Ok(ok(timetable))
}

#[utoipa::path(
    put,
    path = "/api/timetables/{id}",
    params(("id" = u64, Path, description = "Timetable id")),
    request_body = RenameTimetable,
    responses(
        (status = 200, description = "Renamed timetable", body = Timetable),
        (status = 409, description = "Timetable is archived")
    ),
    security(("bearer_auth" = [])),
    tag = "Timetable"
)]
pub async fn rename_timetable(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
    payload: web::Json<RenameTimetable>,
) -> actix_web::Result<impl Responder> {
    let timetable = state
        .timetables
        .rename(&auth, path.into_inner(), payload.into_inner())
        .await?;
    Ok(ok(timetable))
}

#[utoipa::path(
    delete,
    path = "/api/timetables/{id}",
    params(("id" = u64, Path, description = "Timetable id")),
    responses(
        (status = 200, description = "Draft deleted with its entries"),
        (status = 409, description = "Only drafts can be deleted")
    ),
    security(("bearer_auth" = [])),
    tag = "Timetable"
)]
pub async fn delete_timetable(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let id = path.into_inner();
    state.timetables.delete(&auth, id).await?;
    Ok(deleted("timetable", id))
}

/// Publishing supersedes the section's currently published timetable for
/// the same academic year. Re-publishing an already published timetable
/// returns it unchanged.
#[utoipa::path(
    post,
    path = "/api/timetables/{id}/publish",
    params(("id" = u64, Path, description = "Timetable id")),
    responses(
        (status = 200, description = "Published timetable", body = PublishOutcome),
        (status = 400, description = "Timetable has no entries"),
        (status = 409, description = "Teacher double-booked, archived timetable, or concurrent publish")
    ),
    security(("bearer_auth" = [])),
    tag = "Timetable"
)]
pub async fn publish_timetable(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let outcome = state.timetables.publish(&auth, path.into_inner()).await?;
    Ok(ok(outcome))
}

#[utoipa::path(
    post,
    path = "/api/timetables/{id}/archive",
    params(("id" = u64, Path, description = "Timetable id")),
    responses(
        (status = 200, description = "Archived timetable", body = Timetable),
        (status = 409, description = "Only published timetables can be archived")
    ),
    security(("bearer_auth" = [])),
    tag = "Timetable"
)]
pub async fn archive_timetable(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let timetable = state.timetables.archive(&auth, path.into_inner()).await?;
    Ok(ok(timetable))
}

/* =========================
Entries
========================= */
#[utoipa::path(
    get,
    path = "/api/timetables/{id}/entries",
    params(("id" = u64, Path, description = "Timetable id")),
    responses((status = 200, description = "Entries by day then slot order", body = [TimetableEntry])),
    security(("bearer_auth" = [])),
    tag = "Timetable"
)]
pub async fn list_entries(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let entries = state.timetables.list_entries(&auth, path.into_inner()).await?;
    Ok(ok(entries))
}

#[utoipa::path(
    post,
    path = "/api/timetables/{id}/entries",
    params(("id" = u64, Path, description = "Timetable id")),
    request_body = EntryInput,
    responses(
        (status = 200, description = "Entry stored for its (day, slot) cell", body = TimetableEntry),
        (status = 400, description = "Invalid slot, subject or teacher"),
        (status = 409, description = "Teacher double-booked or timetable archived")
    ),
    security(("bearer_auth" = [])),
    tag = "Timetable"
)]
pub async fn upsert_entry(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
    payload: web::Json<EntryInput>,
) -> actix_web::Result<impl Responder> {
    let entry = state
        .timetables
        .upsert_entry(&auth, path.into_inner(), payload.into_inner())
        .await?;
    Ok(ok(entry))
}

/// Entries not named in the request are kept.
#[utoipa::path(
    post,
    path = "/api/timetables/{id}/entries/bulk",
    params(("id" = u64, Path, description = "Timetable id")),
    request_body = BulkEntries,
    responses(
        (status = 200, description = "Stored entries", body = [TimetableEntry]),
        (status = 400, description = "Duplicate cell or invalid entry"),
        (status = 409, description = "Teacher double-booked or timetable archived")
    ),
    security(("bearer_auth" = [])),
    tag = "Timetable"
)]
pub async fn bulk_upsert_entries(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
    payload: web::Json<BulkEntries>,
) -> actix_web::Result<impl Responder> {
    let entries = state
        .timetables
        .upsert_entries(&auth, path.into_inner(), payload.into_inner().entries)
        .await?;
    Ok(ok(entries))
}

#[utoipa::path(
    delete,
    path = "/api/timetables/{id}/entries/{entry_id}",
    params(
        ("id" = u64, Path, description = "Timetable id"),
        ("entry_id" = u64, Path, description = "Entry id")
    ),
    responses(
        (status = 200, description = "Entry deleted"),
        (status = 409, description = "Attendance references the entry")
    ),
    security(("bearer_auth" = [])),
    tag = "Timetable"
)]
pub async fn delete_entry(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<EntryPath>,
) -> actix_web::Result<impl Responder> {
    let EntryPath { id, entry_id } = path.into_inner();
    state.timetables.delete_entry(&auth, id, entry_id).await?;
    Ok(deleted("timetable_entry", entry_id))
}

#[utoipa::path(
    get,
    path = "/api/timetables/conflicts",
    params(ConflictQuery),
    responses((status = 200, description = "Whether the teacher is already booked", body = ConflictCheck)),
    security(("bearer_auth" = [])),
    tag = "Timetable"
)]
pub async fn check_conflict(
    auth: AuthUser,
    state: web::Data<AppState>,
    query: web::Query<ConflictQuery>,
) -> actix_web::Result<impl Responder> {
    let check = state.timetables.check_conflict(&auth, &query).await?;
    Ok(ok(check))
}
