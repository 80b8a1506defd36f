//! Who may still change a submitted attendance record, and until when.

use chrono::{DateTime, Duration, Utc};

use crate::errors::{AppError, AppResult};
use crate::model::attendance::EditWindowStatus;

/// Pure evaluation of the edit window. Never touches storage, so two
/// readers at the same instant always get the same answer.
///
/// * within the window: only the original marker may edit
/// * after the window: only a caller holding the override capability
pub fn evaluate_edit_window(
    marked_at: DateTime<Utc>,
    now: DateTime<Utc>,
    window_minutes: u32,
    is_original_marker: bool,
    has_override: bool,
) -> EditWindowStatus {
    let window = Duration::minutes(i64::from(window_minutes));
    let elapsed = (now - marked_at).max(Duration::zero());
    let elapsed_minutes = elapsed.num_minutes();
    let is_within_window = elapsed < window;

    EditWindowStatus {
        can_edit: (is_within_window && is_original_marker) || has_override,
        is_within_window,
        is_original_marker,
        has_override,
        window_minutes,
        elapsed_minutes,
        remaining_minutes: (i64::from(window_minutes) - elapsed_minutes).max(0),
        marked_at,
        expires_at: marked_at + window,
    }
}

/// Turn a negative decision into the matching error.
pub fn ensure_editable(status: &EditWindowStatus, attendance_id: u64) -> AppResult<()> {
    if status.can_edit {
        return Ok(());
    }
    if !status.is_within_window {
        return Err(AppError::EditWindowExpired {
            attendance_id,
            window_minutes: status.window_minutes,
            elapsed_minutes: status.elapsed_minutes,
        });
    }
    Err(AppError::PermissionDenied {
        reason: format!(
            "attendance {} can only be changed by the user who marked it",
            attendance_id
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn marked() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 9, 5, 0).unwrap()
    }

    #[test]
    fn original_marker_inside_window() {
        let status = evaluate_edit_window(marked(), marked() + Duration::minutes(29), 30, true, false);
        assert!(status.can_edit);
        assert!(status.is_within_window);
        assert_eq!(status.remaining_minutes, 1);
        assert!(ensure_editable(&status, 1).is_ok());
    }

    #[test]
    fn original_marker_after_window() {
        let status = evaluate_edit_window(marked(), marked() + Duration::minutes(31), 30, true, false);
        assert!(!status.can_edit);
        assert_eq!(status.remaining_minutes, 0);
        assert!(matches!(
            ensure_editable(&status, 1),
            Err(AppError::EditWindowExpired { elapsed_minutes: 31, .. })
        ));
    }

    #[test]
    fn override_after_window() {
        let status = evaluate_edit_window(marked(), marked() + Duration::minutes(31), 30, false, true);
        assert!(status.can_edit);
        assert!(!status.is_within_window);
    }

    #[test]
    fn window_boundary_is_exclusive() {
        let status = evaluate_edit_window(marked(), marked() + Duration::minutes(30), 30, true, false);
        assert!(!status.is_within_window);
        assert_eq!(status.expires_at, marked() + Duration::minutes(30));
    }

    #[test]
    fn freshly_marked_record() {
        let status = evaluate_edit_window(marked(), marked(), 30, true, false);
        assert!(status.can_edit);
        assert_eq!(status.elapsed_minutes, 0);
        assert_eq!(status.remaining_minutes, 30);
    }

    #[test]
    fn other_user_inside_window_is_denied() {
        let status = evaluate_edit_window(marked(), marked() + Duration::minutes(5), 30, false, false);
        assert!(!status.can_edit);
        assert!(matches!(
            ensure_editable(&status, 1),
            Err(AppError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn clock_skew_does_not_go_negative() {
        let status = evaluate_edit_window(marked(), marked() - Duration::minutes(2), 30, true, false);
        assert_eq!(status.elapsed_minutes, 0);
        assert!(status.can_edit);
    }
}
