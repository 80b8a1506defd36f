//! Closed error type shared by the service layer, the stores and the HTTP
//! handlers. Every variant carries structured fields; the HTTP body is the
//! uniform `{ success: false, error: { type, title, status, detail, .. } }`
//! envelope.

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use chrono::{NaiveDate, NaiveTime};
use serde_json::{Value, json};
use thiserror::Error;

use crate::auth::capability::Capability;
use crate::model::timetable::ScheduleConflict;

/// Taxonomy bucket an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    PermissionDenied,
    EditWindowExpired,
    Unauthorized,
    Internal,
}

#[derive(Error, Debug)]
pub enum AppError {
    // ---------------------------
    // Validation
    // ---------------------------
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("start time {start} must be before end time {end}")]
    InvalidTimeRange { start: NaiveTime, end: NaiveTime },

    // ---------------------------
    // Conflicts
    // ---------------------------
    #[error("{entity} code '{code}' already exists")]
    DuplicateCode { entity: &'static str, code: String },

    #[error("{entity} {id} is still referenced by {referenced_by}")]
    EntityInUse {
        entity: &'static str,
        id: u64,
        referenced_by: &'static str,
    },

    #[error("{entity} {id} is {status}; cannot {action}")]
    InvalidState {
        entity: &'static str,
        id: u64,
        status: String,
        action: &'static str,
    },

    #[error(
        "teacher {} is already booked on day {} by entry {} (timetable {})",
        .0.staff_id,
        .0.day_of_week,
        .0.conflicting_entry_id,
        .0.conflicting_timetable_id
    )]
    ScheduleConflict(Box<ScheduleConflict>),

    #[error("attendance for section {section_id}, period slot {period_slot_id} on {date} is already marked")]
    AlreadyMarked {
        section_id: u64,
        period_slot_id: u64,
        date: NaiveDate,
    },

    #[error("another timetable for section {section_id} / academic year {academic_year_id} was published concurrently")]
    ConcurrentPublish {
        section_id: u64,
        academic_year_id: u64,
    },

    // ---------------------------
    // Lookup / access
    // ---------------------------
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },

    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("edit window of {window_minutes} minutes for attendance {attendance_id} expired {elapsed_minutes} minutes after marking")]
    EditWindowExpired {
        attendance_id: u64,
        window_minutes: u32,
        elapsed_minutes: i64,
    },

    // ---------------------------
    // Infrastructure
    // ---------------------------
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: u64) -> Self {
        AppError::NotFound { entity, id }
    }

    pub fn missing_capability(capability: Capability) -> Self {
        AppError::PermissionDenied {
            reason: format!("missing capability '{}'", capability),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation { .. } | AppError::InvalidTimeRange { .. } => ErrorKind::Validation,
            AppError::DuplicateCode { .. }
            | AppError::EntityInUse { .. }
            | AppError::InvalidState { .. }
            | AppError::ScheduleConflict(_)
            | AppError::AlreadyMarked { .. }
            | AppError::ConcurrentPublish { .. } => ErrorKind::Conflict,
            AppError::NotFound { .. } => ErrorKind::NotFound,
            AppError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            AppError::EditWindowExpired { .. } => ErrorKind::EditWindowExpired,
            AppError::Unauthorized(_) => ErrorKind::Unauthorized,
            AppError::Database(_) | AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code, also the last segment of the problem type.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "validation_error",
            AppError::InvalidTimeRange { .. } => "invalid_time_range",
            AppError::DuplicateCode { .. } => "duplicate_code",
            AppError::EntityInUse { .. } => "entity_in_use",
            AppError::InvalidState { .. } => "invalid_state",
            AppError::ScheduleConflict(_) => "schedule_conflict",
            AppError::AlreadyMarked { .. } => "already_marked",
            AppError::ConcurrentPublish { .. } => "concurrent_publish",
            AppError::NotFound { .. } => "not_found",
            AppError::PermissionDenied { .. } => "permission_denied",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::EditWindowExpired { .. } => "edit_window_expired",
            AppError::Database(_) | AppError::Internal(_) => "internal_error",
        }
    }

    fn title(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Validation => "Validation failed",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::NotFound => "Resource not found",
            ErrorKind::PermissionDenied => "Permission denied",
            ErrorKind::EditWindowExpired => "Edit window expired",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::Internal => "Internal server error",
        }
    }

    /// Structured fields merged into the problem body next to `detail`.
    fn extra(&self) -> Value {
        match self {
            AppError::Validation { field, .. } => json!({ "field": field }),
            AppError::InvalidTimeRange { start, end } => json!({
                "start_time": start.format("%H:%M:%S").to_string(),
                "end_time": end.format("%H:%M:%S").to_string(),
            }),
            AppError::DuplicateCode { entity, code } => json!({ "entity": entity, "value": code }),
            AppError::EntityInUse {
                entity,
                id,
                referenced_by,
            } => json!({ "entity": entity, "id": id, "referenced_by": referenced_by }),
            AppError::InvalidState {
                entity, id, status, ..
            } => json!({ "entity": entity, "id": id, "current_status": status }),
            AppError::ScheduleConflict(conflict) => json!({ "conflict": conflict }),
            AppError::AlreadyMarked {
                section_id,
                period_slot_id,
                date,
            } => json!({
                "section_id": section_id,
                "period_slot_id": period_slot_id,
                "date": date,
            }),
            AppError::ConcurrentPublish {
                section_id,
                academic_year_id,
            } => json!({ "section_id": section_id, "academic_year_id": academic_year_id }),
            AppError::NotFound { entity, id } => json!({ "entity": entity, "id": id }),
            AppError::EditWindowExpired {
                attendance_id,
                window_minutes,
                elapsed_minutes,
            } => json!({
                "attendance_id": attendance_id,
                "window_minutes": window_minutes,
                "elapsed_minutes": elapsed_minutes,
            }),
            _ => json!({}),
        }
    }

    /// Problem-detail object placed under `error` in the envelope.
    pub fn problem(&self) -> Value {
        let status = self.status_code();
        let detail = match self.kind() {
            // never leak SQL text to callers
            ErrorKind::Internal => "An unexpected error occurred".to_string(),
            _ => self.to_string(),
        };

        let mut body = json!({
            "type": format!("/problems/{}", self.code()),
            "title": self.title(),
            "status": status.as_u16(),
            "detail": detail,
            "code": self.code(),
        });
        if let (Some(target), Value::Object(extra)) = (body.as_object_mut(), self.extra()) {
            target.extend(extra);
        }
        body
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::PermissionDenied | ErrorKind::EditWindowExpired => StatusCode::FORBIDDEN,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.kind() == ErrorKind::Internal {
            tracing::error!(error = %self, "Request failed with internal error");
        } else {
            tracing::debug!(code = self.code(), error = %self, "Request rejected");
        }

        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "error": self.problem(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_bad_request_with_field() {
        let err = AppError::validation("reason", "must not be empty");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let problem = err.problem();
        assert_eq!(problem["type"], "/problems/validation_error");
        assert_eq!(problem["status"], 400);
        assert_eq!(problem["field"], "reason");
    }

    #[test]
    fn conflict_variants_share_409() {
        let dup = AppError::DuplicateCode {
            entity: "shift",
            code: "MORNING".into(),
        };
        let marked = AppError::AlreadyMarked {
            section_id: 1,
            period_slot_id: 2,
            date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
        };
        assert_eq!(dup.status_code(), StatusCode::CONFLICT);
        assert_eq!(marked.status_code(), StatusCode::CONFLICT);
        assert_eq!(marked.problem()["date"], "2025-01-10");
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = AppError::Internal("connection reset while running SELECT".into());
        let problem = err.problem();
        assert_eq!(problem["status"], 500);
        assert_eq!(problem["detail"], "An unexpected error occurred");
    }

    #[test]
    fn edit_window_expired_is_forbidden() {
        let err = AppError::EditWindowExpired {
            attendance_id: 9,
            window_minutes: 30,
            elapsed_minutes: 31,
        };
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.problem()["window_minutes"], 30);
    }
}
