use actix_web::{HttpRequest, HttpResponse};
use actix_web::error::{JsonPayloadError, PathError, QueryPayloadError};
use serde::Serialize;
use serde_json::json;

use crate::errors::AppError;

/// Success half of the `{ success, data?, error? }` envelope.
#[derive(Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    pub data: T,
}

pub fn ok<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(Envelope { success: true, data })
}

pub fn created<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Created().json(Envelope { success: true, data })
}

pub fn deleted(entity: &str, id: u64) -> HttpResponse {
    ok(json!({ "deleted": true, "entity": entity, "id": id }))
}

// Extractor failures are answered in the same problem shape as domain errors.

pub fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    AppError::validation("body", err.to_string()).into()
}

pub fn query_error(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    AppError::validation("query", err.to_string()).into()
}

pub fn path_error(err: PathError, _req: &HttpRequest) -> actix_web::Error {
    AppError::validation("path", err.to_string()).into()
}
