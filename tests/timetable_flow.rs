mod common;

use campus::errors::AppError;
use campus::model::common::{DayOfWeek, Patch};
use campus::model::schedule::{SlotType, UpdatePeriodSlot};
use campus::model::timetable::{ConflictQuery, EntryInput, TimetableStatus};

use common::*;

#[actix_web::test]
async fn publishing_a_double_booked_teacher_fails() {
    let fx = Fixture::new();
    let p1 = fx.slot("P1", SlotType::Regular, (9, 0), (9, 45)).await;

    let a = fx.timetable(SECTION_A, "A").await;
    fx.entry(a.id, p1.id, MATH, TEACHER_STAFF).await;
    fx.state.timetables.publish(&coordinator(), a.id).await.unwrap();

    let b = fx.timetable(SECTION_B, "B").await;
    let entry_b = fx.entry(b.id, p1.id, MATH, TEACHER_STAFF).await;

    let err = fx.state.timetables.publish(&coordinator(), b.id).await.unwrap_err();
    match err {
        AppError::ScheduleConflict(conflict) => {
            assert_eq!(conflict.staff_id, TEACHER_STAFF);
            assert_eq!(conflict.day_of_week, DayOfWeek::MONDAY);
            assert_eq!(conflict.conflicting_timetable_id, a.id);
            assert_eq!(conflict.conflicting_section_id, SECTION_A);
            assert_ne!(conflict.conflicting_entry_id, entry_b.id);
        }
        other => panic!("expected schedule conflict, got {:?}", other),
    }

    let b = fx.state.timetables.get(&coordinator(), b.id).await.unwrap();
    assert_eq!(b.status, TimetableStatus::Draft);
}

#[actix_web::test]
async fn overlapping_slots_conflict_even_when_ids_differ() {
    let fx = Fixture::new();
    let p1 = fx.slot("P1", SlotType::Regular, (9, 0), (9, 45)).await;
    let lab = fx.slot("LAB", SlotType::Activity, (9, 30), (10, 15)).await;

    let a = fx.timetable(SECTION_A, "A").await;
    fx.entry(a.id, p1.id, MATH, TEACHER_STAFF).await;
    fx.state.timetables.publish(&coordinator(), a.id).await.unwrap();

    let b = fx.timetable(SECTION_B, "B").await;
    fx.entry(b.id, lab.id, MATH, TEACHER_STAFF).await;
    let err = fx.state.timetables.publish(&coordinator(), b.id).await.unwrap_err();
    assert!(matches!(err, AppError::ScheduleConflict(_)));
}

#[actix_web::test]
async fn back_to_back_slots_do_not_conflict() {
    let fx = Fixture::new();
    let p1 = fx.slot("P1", SlotType::Regular, (9, 0), (9, 45)).await;
    let p2 = fx.slot("P2", SlotType::Regular, (9, 45), (10, 30)).await;

    let a = fx.timetable(SECTION_A, "A").await;
    fx.entry(a.id, p1.id, MATH, TEACHER_STAFF).await;
    fx.state.timetables.publish(&coordinator(), a.id).await.unwrap();

    let b = fx.timetable(SECTION_B, "B").await;
    fx.entry(b.id, p2.id, MATH, TEACHER_STAFF).await;
    let outcome = fx.state.timetables.publish(&coordinator(), b.id).await.unwrap();
    assert_eq!(outcome.timetable.status, TimetableStatus::Published);
}

#[actix_web::test]
async fn republishing_is_idempotent() {
    let fx = Fixture::new();
    let p1 = fx.slot("P1", SlotType::Regular, (9, 0), (9, 45)).await;
    let a = fx.timetable(SECTION_A, "A").await;
    fx.entry(a.id, p1.id, MATH, TEACHER_STAFF).await;

    let first = fx.state.timetables.publish(&coordinator(), a.id).await.unwrap();
    fx.clock.advance(chrono::Duration::minutes(5));
    let second = fx.state.timetables.publish(&coordinator(), a.id).await.unwrap();

    assert_eq!(second.timetable.status, TimetableStatus::Published);
    assert_eq!(second.timetable.published_at, first.timetable.published_at);
    assert_eq!(second.archived_timetable_id, None);
}

#[actix_web::test]
async fn publishing_a_new_version_archives_the_previous_one() {
    let fx = Fixture::new();
    let p1 = fx.slot("P1", SlotType::Regular, (9, 0), (9, 45)).await;

    let term1 = fx.timetable(SECTION_A, "Term 1").await;
    fx.entry(term1.id, p1.id, MATH, TEACHER_STAFF).await;
    fx.state.timetables.publish(&coordinator(), term1.id).await.unwrap();

    // same teacher, same slot: only clashes with the version being replaced
    let term2 = fx.timetable(SECTION_A, "Term 2").await;
    fx.entry(term2.id, p1.id, MATH, TEACHER_STAFF).await;
    let outcome = fx.state.timetables.publish(&coordinator(), term2.id).await.unwrap();

    assert_eq!(outcome.archived_timetable_id, Some(term1.id));
    let term1 = fx.state.timetables.get(&coordinator(), term1.id).await.unwrap();
    assert_eq!(term1.status, TimetableStatus::Archived);
    assert!(term1.archived_at.is_some());
}

#[actix_web::test]
async fn conflict_check_reports_published_bookings() {
    let fx = Fixture::new();
    let p1 = fx.slot("P1", SlotType::Regular, (9, 0), (9, 45)).await;
    let a = fx.timetable(SECTION_A, "A").await;
    fx.entry(a.id, p1.id, MATH, TEACHER_STAFF).await;

    let query = ConflictQuery {
        staff_id: TEACHER_STAFF,
        day_of_week: 1,
        period_slot_id: p1.id,
        exclude_timetable_id: None,
    };
    // drafts hold no bookings
    let check = fx.state.timetables.check_conflict(&teacher(), &query).await.unwrap();
    assert!(!check.has_conflict);

    fx.state.timetables.publish(&coordinator(), a.id).await.unwrap();
    let check = fx.state.timetables.check_conflict(&teacher(), &query).await.unwrap();
    assert!(check.has_conflict);
    assert_eq!(check.conflict.map(|c| c.conflicting_timetable_id), Some(a.id));

    let excluded = ConflictQuery {
        exclude_timetable_id: Some(a.id),
        ..query
    };
    let check = fx.state.timetables.check_conflict(&teacher(), &excluded).await.unwrap();
    assert!(!check.has_conflict);
}

#[actix_web::test]
async fn entries_cannot_use_break_slots_or_repeat_a_cell() {
    let fx = Fixture::new();
    let p1 = fx.slot("P1", SlotType::Regular, (9, 0), (9, 45)).await;
    let recess = fx.slot("BRK", SlotType::Break, (10, 30), (10, 45)).await;
    let a = fx.timetable(SECTION_A, "A").await;

    let input = |slot_id| EntryInput {
        day_of_week: DayOfWeek::MONDAY,
        period_slot_id: slot_id,
        subject_id: MATH,
        staff_id: TEACHER_STAFF,
        room: None,
    };

    let err = fx
        .state
        .timetables
        .upsert_entry(&coordinator(), a.id, input(recess.id))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "period_slot_id"));

    let err = fx
        .state
        .timetables
        .upsert_entries(&coordinator(), a.id, vec![input(p1.id), input(p1.id)])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "entries"));
}

#[actix_web::test]
async fn upsert_replaces_the_cell_and_keeps_other_entries() {
    let fx = Fixture::new();
    let p1 = fx.slot("P1", SlotType::Regular, (9, 0), (9, 45)).await;
    let p2 = fx.slot("P2", SlotType::Regular, (9, 45), (10, 30)).await;
    let a = fx.timetable(SECTION_A, "A").await;

    fx.entry(a.id, p1.id, MATH, TEACHER_STAFF).await;
    fx.entry(a.id, p2.id, SCIENCE, OTHER_STAFF).await;
    let replaced = fx.entry(a.id, p1.id, SCIENCE, OTHER_STAFF).await;

    let entries = fx.state.timetables.list_entries(&coordinator(), a.id).await.unwrap();
    assert_eq!(entries.len(), 2);
    let cell = entries.iter().find(|e| e.period_slot_id == p1.id).unwrap();
    assert_eq!(cell.id, replaced.id);
    assert_eq!(cell.staff_id, OTHER_STAFF);
}

#[actix_web::test]
async fn teacher_without_assignment_blocks_publish() {
    let fx = Fixture::new();
    let p1 = fx.slot("P1", SlotType::Regular, (9, 0), (9, 45)).await;
    let a = fx.timetable(SECTION_A, "A").await;
    // OTHER_STAFF teaches science, not math
    fx.entry(a.id, p1.id, MATH, OTHER_STAFF).await;

    let err = fx.state.timetables.publish(&coordinator(), a.id).await.unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "entries"));
}

#[actix_web::test]
async fn lifecycle_transitions_are_guarded() {
    let fx = Fixture::new();
    let p1 = fx.slot("P1", SlotType::Regular, (9, 0), (9, 45)).await;
    let a = fx.timetable(SECTION_A, "A").await;

    // empty draft
    let err = fx.state.timetables.publish(&coordinator(), a.id).await.unwrap_err();
    assert!(matches!(err, AppError::Validation { .. }));

    // drafts are not archived, they are deleted
    let err = fx.state.timetables.archive(&coordinator(), a.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState { action: "archive", .. }));

    fx.entry(a.id, p1.id, MATH, TEACHER_STAFF).await;
    fx.state.timetables.publish(&coordinator(), a.id).await.unwrap();
    let err = fx.state.timetables.delete(&coordinator(), a.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState { .. }));

    let archived = fx.state.timetables.archive(&coordinator(), a.id).await.unwrap();
    assert_eq!(archived.status, TimetableStatus::Archived);
    let err = fx.state.timetables.publish(&coordinator(), a.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState { action: "publish", .. }));
}

#[actix_web::test]
async fn teachers_cannot_publish() {
    let fx = Fixture::new();
    let p1 = fx.slot("P1", SlotType::Regular, (9, 0), (9, 45)).await;
    let a = fx.timetable(SECTION_A, "A").await;
    fx.entry(a.id, p1.id, MATH, TEACHER_STAFF).await;

    let err = fx.state.timetables.publish(&teacher(), a.id).await.unwrap_err();
    assert!(matches!(err, AppError::PermissionDenied { .. }));
}

#[actix_web::test]
async fn retiming_a_slot_cannot_double_book_a_published_teacher() {
    let fx = Fixture::new();
    let p1 = fx.slot("P1", SlotType::Regular, (9, 0), (9, 45)).await;
    let p2 = fx.slot("P2", SlotType::Regular, (10, 0), (10, 45)).await;

    let a = fx.timetable(SECTION_A, "A").await;
    fx.entry(a.id, p1.id, MATH, TEACHER_STAFF).await;
    fx.state.timetables.publish(&coordinator(), a.id).await.unwrap();
    let b = fx.timetable(SECTION_B, "B").await;
    fx.entry(b.id, p2.id, MATH, TEACHER_STAFF).await;
    fx.state.timetables.publish(&coordinator(), b.id).await.unwrap();

    let earlier = UpdatePeriodSlot {
        start_time: Patch::Value(time(9, 15)),
        end_time: Patch::Value(time(10, 0)),
        ..Default::default()
    };
    let err = fx
        .state
        .schedule
        .update_period_slot(&admin(), p2.id, earlier)
        .await
        .unwrap_err();
    match err {
        AppError::ScheduleConflict(conflict) => {
            assert_eq!(conflict.staff_id, TEACHER_STAFF);
            assert_eq!(conflict.period_slot_id, p2.id);
            assert_eq!(conflict.conflicting_period_slot_id, p1.id);
        }
        other => panic!("expected schedule conflict, got {:?}", other),
    }
    let p2 = fx.state.schedule.get_period_slot(&admin(), p2.id).await.unwrap();
    assert_eq!(p2.start_time, time(10, 0).into_inner());

    // moving away from every other booking is fine
    let later = UpdatePeriodSlot {
        start_time: Patch::Value(time(11, 0)),
        end_time: Patch::Value(time(11, 45)),
        ..Default::default()
    };
    let p2 = fx
        .state
        .schedule
        .update_period_slot(&admin(), p2.id, later)
        .await
        .unwrap();
    assert_eq!(p2.duration_minutes, 45);
}

#[actix_web::test]
async fn published_timetable_only_takes_assigned_teachers() {
    let fx = Fixture::new();
    let p1 = fx.published_period().await;
    let p2 = fx.slot("P2", SlotType::Regular, (9, 45), (10, 30)).await;
    let published = fx
        .state
        .timetables
        .list(&coordinator(), &Default::default())
        .await
        .unwrap()
        .items
        .into_iter()
        .find(|t| t.status == TimetableStatus::Published)
        .unwrap();

    // OTHER_STAFF teaches science only
    let input = EntryInput {
        day_of_week: DayOfWeek::MONDAY,
        period_slot_id: p2.id,
        subject_id: MATH,
        staff_id: OTHER_STAFF,
        room: None,
    };
    let err = fx
        .state
        .timetables
        .upsert_entry(&coordinator(), published.id, input)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "staff_id"));

    let entries = fx.state.timetables.list_entries(&coordinator(), published.id).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].period_slot_id, p1.id);

    let input = EntryInput {
        day_of_week: DayOfWeek::MONDAY,
        period_slot_id: p2.id,
        subject_id: SCIENCE,
        staff_id: OTHER_STAFF,
        room: None,
    };
    fx.state
        .timetables
        .upsert_entry(&coordinator(), published.id, input)
        .await
        .unwrap();
    fx.state.timetables.publish(&coordinator(), published.id).await.unwrap();
}
