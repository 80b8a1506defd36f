mod common;

use chrono::{Duration, NaiveDate};

use campus::auth::auth::AuthUser;
use campus::errors::AppError;
use campus::model::attendance::{
    AttendanceStatus, ChangeType, EditAttendance, MarkOutcome, PeriodAttendanceRecord, UpdateEditWindowPolicy,
};
use campus::model::common::Patch;
use campus::model::schedule::PeriodSlot;

use common::*;

use AttendanceStatus::{Absent, Late, Present};

fn record_of(outcome: &MarkOutcome, student_id: u64) -> PeriodAttendanceRecord {
    outcome
        .records
        .iter()
        .find(|r| r.student_id == student_id)
        .cloned()
        .unwrap()
}

fn change_status(status: AttendanceStatus, reason: &str) -> EditAttendance {
    EditAttendance {
        status: Patch::Value(status),
        reason: reason.to_string(),
        ..Default::default()
    }
}

async fn mark_all_present(fx: &Fixture, slot: &PeriodSlot, by: &AuthUser) -> MarkOutcome {
    fx.state
        .attendance
        .mark(by, slot.id, SECTION_A, monday(), roster([Present, Present, Present]))
        .await
        .unwrap()
}

#[actix_web::test]
async fn mark_then_edit_keeps_an_audit_trail() {
    let fx = Fixture::new();
    let p1 = fx.published_period().await;

    let marked = mark_all_present(&fx, &p1, &teacher()).await;
    assert!(marked.created);
    assert_eq!(marked.summary.total, 3);
    assert_eq!(marked.summary.present, 3);

    fx.clock.advance(Duration::minutes(10));
    let second = record_of(&marked, STUDENTS[1]);
    let edited = fx
        .state
        .attendance
        .edit(&teacher(), second.id, change_status(Absent, "left early"))
        .await
        .unwrap();
    assert_eq!(edited.record.status, Absent);
    assert_eq!(edited.record.updated_by, Some(teacher().user_id));

    let summary = fx.state.attendance.day_summary(&teacher(), SECTION_A, monday()).await.unwrap();
    assert_eq!(summary.total.present, 2);
    assert_eq!(summary.total.absent, 1);
    assert_eq!(summary.periods.len(), 1);

    let history = fx.state.attendance.history(&teacher(), second.id).await.unwrap();
    let edits: Vec<_> = history.iter().filter(|h| h.change_type == ChangeType::Edit).collect();
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].previous_status, Some(Present));
    assert_eq!(edits[0].new_status, Absent);
    assert_eq!(edits[0].change_reason.as_deref(), Some("left early"));
    assert_eq!(history.first().map(|h| h.change_type), Some(ChangeType::Create));
}

#[actix_web::test]
async fn second_submission_by_another_teacher_is_rejected() {
    let fx = Fixture::new();
    let p1 = fx.published_period().await;
    let first = mark_all_present(&fx, &p1, &teacher()).await;

    let err = fx
        .state
        .attendance
        .mark(&other_teacher(), p1.id, SECTION_A, monday(), roster([Absent, Absent, Absent]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyMarked { section_id: SECTION_A, .. }));

    let roster = fx.state.attendance.roster(&teacher(), p1.id, SECTION_A, monday()).await.unwrap();
    assert!(roster.is_marked);
    assert_eq!(roster.summary.present, 3);
    assert_eq!(roster.marked_by, Some(teacher().user_id));
    assert_eq!(roster.marked_at, Some(record_of(&first, STUDENTS[0]).marked_at));
}

#[actix_web::test]
async fn resubmission_by_the_marker_is_applied_as_edits() {
    let fx = Fixture::new();
    let p1 = fx.published_period().await;
    mark_all_present(&fx, &p1, &teacher()).await;

    // unchanged roster: nothing to record, no reason needed
    let same = mark_all_present(&fx, &p1, &teacher()).await;
    assert!(!same.created);

    let err = fx
        .state
        .attendance
        .mark(&teacher(), p1.id, SECTION_A, monday(), roster([Present, Absent, Present]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "reason"));

    let mut corrected = roster([Present, Absent, Present]);
    corrected.reason = Some("miscounted".to_string());
    let outcome = fx
        .state
        .attendance
        .mark(&teacher(), p1.id, SECTION_A, monday(), corrected)
        .await
        .unwrap();
    assert!(!outcome.created);
    assert_eq!(outcome.summary.absent, 1);

    let changed = record_of(&outcome, STUDENTS[1]);
    let history = fx.state.attendance.history(&teacher(), changed.id).await.unwrap();
    assert_eq!(history.len(), 2);
    let untouched = record_of(&outcome, STUDENTS[0]);
    let history = fx.state.attendance.history(&teacher(), untouched.id).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[actix_web::test]
async fn edit_window_closes_for_the_marker_but_not_for_override() {
    let fx = Fixture::new();
    let p1 = fx.published_period().await;
    let marked = mark_all_present(&fx, &p1, &teacher()).await;
    let first = record_of(&marked, STUDENTS[0]);
    let second = record_of(&marked, STUDENTS[1]);

    fx.clock.advance(Duration::minutes(29));
    fx.state
        .attendance
        .edit(&teacher(), first.id, change_status(Late, "arrived late"))
        .await
        .unwrap();

    fx.clock.advance(Duration::minutes(2));
    let err = fx
        .state
        .attendance
        .edit(&teacher(), second.id, change_status(Absent, "left early"))
        .await
        .unwrap_err();
    match err {
        AppError::EditWindowExpired {
            window_minutes,
            elapsed_minutes,
            ..
        } => {
            assert_eq!(window_minutes, 30);
            assert_eq!(elapsed_minutes, 31);
        }
        other => panic!("expected expired window, got {:?}", other),
    }

    let status = fx.state.attendance.edit_status(&teacher(), second.id).await.unwrap();
    assert!(!status.can_edit);
    assert_eq!(status.remaining_minutes, 0);

    let edited = fx
        .state
        .attendance
        .edit(&coordinator(), second.id, change_status(Absent, "left early"))
        .await
        .unwrap();
    assert_eq!(edited.audit.changed_by, coordinator().user_id);
}

#[actix_web::test]
async fn only_the_marker_edits_inside_the_window() {
    let fx = Fixture::new();
    let p1 = fx.published_period().await;
    let marked = mark_all_present(&fx, &p1, &teacher()).await;
    let first = record_of(&marked, STUDENTS[0]);

    let err = fx
        .state
        .attendance
        .edit(&other_teacher(), first.id, change_status(Absent, "wrong roster"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::PermissionDenied { .. }));

    let status = fx.state.attendance.edit_status(&other_teacher(), first.id).await.unwrap();
    assert!(status.is_within_window);
    assert!(!status.is_original_marker);
    assert!(!status.can_edit);
}

#[actix_web::test]
async fn edits_need_a_reason_and_a_change() {
    let fx = Fixture::new();
    let p1 = fx.published_period().await;
    let marked = mark_all_present(&fx, &p1, &teacher()).await;
    let first = record_of(&marked, STUDENTS[0]);

    let err = fx
        .state
        .attendance
        .edit(&teacher(), first.id, change_status(Absent, "   "))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "reason"));

    let err = fx
        .state
        .attendance
        .edit(&teacher(), first.id, change_status(Present, "no-op"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "status"));

    let late_time_on_absent = EditAttendance {
        status: Patch::Value(Absent),
        late_arrival_time: Patch::Value(time(9, 10)),
        reason: "mixed up".to_string(),
        ..Default::default()
    };
    let err = fx
        .state
        .attendance
        .edit(&teacher(), first.id, late_time_on_absent)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "late_arrival_time"));
}

#[actix_web::test]
async fn policy_update_takes_effect_immediately() {
    let fx = Fixture::new();
    let p1 = fx.published_period().await;
    let marked = mark_all_present(&fx, &p1, &teacher()).await;
    let first = record_of(&marked, STUDENTS[0]);

    fx.clock.advance(Duration::minutes(45));
    // warms the cached window
    let status = fx.state.attendance.edit_status(&teacher(), first.id).await.unwrap();
    assert_eq!(status.window_minutes, 30);
    assert!(!status.can_edit);

    let err = fx
        .state
        .attendance
        .update_policy(&coordinator(), None, UpdateEditWindowPolicy { edit_window_minutes: 60 })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::PermissionDenied { .. }));

    let err = fx
        .state
        .attendance
        .update_policy(&admin(), None, UpdateEditWindowPolicy { edit_window_minutes: 0 })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { .. }));

    let policy = fx
        .state
        .attendance
        .update_policy(&admin(), None, UpdateEditWindowPolicy { edit_window_minutes: 60 })
        .await
        .unwrap();
    assert_eq!(policy.branch_id, BRANCH);
    assert_eq!(policy.updated_by, Some(admin().user_id));

    let status = fx.state.attendance.edit_status(&teacher(), first.id).await.unwrap();
    assert_eq!(status.window_minutes, 60);
    assert!(status.can_edit);
    fx.state
        .attendance
        .edit(&teacher(), first.id, change_status(Absent, "left early"))
        .await
        .unwrap();
}

#[actix_web::test]
async fn default_policy_is_reported_until_one_is_stored() {
    let fx = Fixture::new();
    let policy = fx.state.attendance.get_policy(&teacher(), None).await.unwrap();
    assert_eq!(policy.edit_window_minutes, fx.config.default_edit_window_minutes);
    assert!(policy.updated_at.is_none());
}

#[actix_web::test]
async fn roster_must_match_enrolment() {
    let fx = Fixture::new();
    let p1 = fx.published_period().await;

    let mut short = roster([Present, Present, Present]);
    short.students.pop();
    let err = fx
        .state
        .attendance
        .mark(&teacher(), p1.id, SECTION_A, monday(), short)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "students"));

    let mut stranger = roster([Present, Present, Present]);
    stranger.students[0].student_id = 999;
    let err = fx
        .state
        .attendance
        .mark(&teacher(), p1.id, SECTION_A, monday(), stranger)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "students"));

    let roster_view = fx.state.attendance.roster(&teacher(), p1.id, SECTION_A, monday()).await.unwrap();
    assert!(!roster_view.is_marked);
}

#[actix_web::test]
async fn marking_needs_a_published_period_on_a_past_or_current_date() {
    let fx = Fixture::new();
    let p1 = fx.published_period().await;

    let tuesday = NaiveDate::from_ymd_opt(2025, 1, 7).unwrap();
    let err = fx
        .state
        .attendance
        .mark(&teacher(), p1.id, SECTION_A, tuesday, roster([Present, Present, Present]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "date"));

    // nothing is scheduled on Sundays
    let sunday = NaiveDate::from_ymd_opt(2025, 1, 5).unwrap();
    let err = fx
        .state
        .attendance
        .mark(&teacher(), p1.id, SECTION_A, sunday, roster([Present, Present, Present]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "period_slot_id"));
}

#[actix_web::test]
async fn unmarked_roster_defaults_to_present() {
    let fx = Fixture::new();
    let p1 = fx.published_period().await;

    let view = fx.state.attendance.roster(&teacher(), p1.id, SECTION_A, monday()).await.unwrap();
    assert!(!view.is_marked);
    assert_eq!(view.students.len(), 3);
    assert!(view.students.iter().all(|l| l.status == Present && l.attendance_id.is_none()));
    assert_eq!(view.summary.total, 0);

    let periods = fx.state.attendance.list_periods(&teacher(), SECTION_A, monday()).await.unwrap();
    assert_eq!(periods.periods.len(), 1);
    assert!(!periods.periods[0].is_marked);

    mark_all_present(&fx, &p1, &teacher()).await;
    let periods = fx.state.attendance.list_periods(&teacher(), SECTION_A, monday()).await.unwrap();
    assert!(periods.periods[0].is_marked);
    assert_eq!(periods.periods[0].summary.present, 3);
}

#[actix_web::test]
async fn late_marks_keep_their_arrival_time() {
    let fx = Fixture::new();
    let p1 = fx.published_period().await;

    let mut bad = roster([Present, Present, Present]);
    bad.students[1].late_arrival_time = Some(time(9, 5));
    let err = fx
        .state
        .attendance
        .mark(&teacher(), p1.id, SECTION_A, monday(), bad)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "late_arrival_time"));

    let mut lines = roster([Late, Present, Present]);
    lines.students[0].late_arrival_time = Some(time(9, 12));
    let outcome = fx
        .state
        .attendance
        .mark(&teacher(), p1.id, SECTION_A, monday(), lines)
        .await
        .unwrap();
    let late = record_of(&outcome, STUDENTS[0]);
    assert_eq!(late.late_arrival_time, Some(time(9, 12).into_inner()));
    assert_eq!(outcome.summary.late, 1);
}
