mod common;

use campus::errors::AppError;
use campus::model::common::{DayOfWeek, Patch};
use campus::model::schedule::{
    CreateDayPattern, CreatePeriodSlot, CreateShift, DayPattern, PeriodSlot, Shift, SlotType, TemplateQuery,
    UpdatePeriodSlot, UpdateShift, UpsertDayAssignment,
};

use common::*;

fn new_shift(code: &str, start: (u32, u32), end: (u32, u32)) -> CreateShift {
    CreateShift {
        branch_id: None,
        name: format!("{} shift", code),
        code: code.to_string(),
        start_time: time(start.0, start.1),
        end_time: time(end.0, end.1),
        description: None,
        display_order: None,
        is_active: None,
    }
}

fn new_pattern(code: &str) -> CreateDayPattern {
    CreateDayPattern {
        name: format!("{} day", code),
        code: code.to_string(),
        description: None,
        total_periods: 8,
        display_order: None,
        is_active: None,
    }
}

fn new_slot(code: &str, start: (u32, u32), end: (u32, u32)) -> CreatePeriodSlot {
    CreatePeriodSlot {
        branch_id: None,
        name: code.to_string(),
        code: code.to_string(),
        slot_type: SlotType::Regular,
        start_time: time(start.0, start.1),
        end_time: time(end.0, end.1),
        duration_minutes: None,
        day_pattern_id: None,
        shift_id: None,
        display_order: None,
        is_active: None,
    }
}

impl Fixture {
    async fn shift(&self, code: &str) -> Shift {
        self.state
            .schedule
            .create_shift(&admin(), new_shift(code, (7, 30), (13, 0)))
            .await
            .unwrap()
    }

    async fn pattern(&self, code: &str) -> DayPattern {
        self.state
            .schedule
            .create_day_pattern(&admin(), new_pattern(code))
            .await
            .unwrap()
    }

    async fn linked_slot(&self, code: &str, pattern_id: Option<u64>, shift_id: Option<u64>) -> PeriodSlot {
        let mut payload = new_slot(code, (9, 0), (9, 45));
        payload.day_pattern_id = pattern_id;
        payload.shift_id = shift_id;
        self.state
            .schedule
            .create_period_slot(&admin(), payload)
            .await
            .unwrap()
    }
}

#[actix_web::test]
async fn codes_are_normalized_and_unique_per_scope() {
    let fx = Fixture::new();
    let schedule = &fx.state.schedule;

    let shift = fx.shift(" morning ").await;
    assert_eq!(shift.code, "MORNING");
    let err = schedule
        .create_shift(&admin(), new_shift("Morning", (7, 0), (12, 0)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DuplicateCode { entity: "shift", .. }));

    fx.pattern("regular").await;
    let err = schedule
        .create_day_pattern(&admin(), new_pattern("REGULAR"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DuplicateCode { entity: "day_pattern", .. }));

    fx.slot("P1", SlotType::Regular, (9, 0), (9, 45)).await;
    let err = schedule
        .create_period_slot(&admin(), new_slot("p1", (10, 0), (10, 45)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DuplicateCode { entity: "period_slot", ref code } if code == "P1"));

    // renaming onto a taken code is caught too
    let other = fx.shift("evening").await;
    let rename = UpdateShift {
        code: Patch::Value("MORNING".into()),
        ..Default::default()
    };
    let err = schedule.update_shift(&admin(), other.id, rename).await.unwrap_err();
    assert!(matches!(err, AppError::DuplicateCode { .. }));
}

#[actix_web::test]
async fn shift_times_must_run_forwards() {
    let fx = Fixture::new();
    let schedule = &fx.state.schedule;

    let err = schedule
        .create_shift(&admin(), new_shift("LATE", (13, 0), (7, 30)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTimeRange { .. }));

    let err = schedule
        .create_shift(&admin(), new_shift("EMPTY", (9, 0), (9, 0)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTimeRange { .. }));

    // only one end moves; the other is taken from the stored shift
    let shift = fx.shift("MORNING").await;
    let update = UpdateShift {
        end_time: Patch::Value(time(7, 0)),
        ..Default::default()
    };
    let err = schedule.update_shift(&admin(), shift.id, update).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidTimeRange { .. }));

    let update = UpdateShift {
        end_time: Patch::Value(time(14, 0)),
        ..Default::default()
    };
    let shift = schedule.update_shift(&admin(), shift.id, update).await.unwrap();
    assert_eq!(shift.end_time, time(14, 0).into_inner());
}

#[actix_web::test]
async fn slot_duration_is_derived_or_checked() {
    let fx = Fixture::new();
    let schedule = &fx.state.schedule;

    let slot = fx.slot("P1", SlotType::Regular, (9, 0), (9, 45)).await;
    assert_eq!(slot.duration_minutes, 45);

    let mut payload = new_slot("P2", (10, 0), (10, 45));
    payload.duration_minutes = Some(40);
    let err = schedule.create_period_slot(&admin(), payload).await.unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "duration_minutes"));

    let update = UpdatePeriodSlot {
        end_time: Patch::Value(time(10, 0)),
        ..Default::default()
    };
    let slot = schedule.update_period_slot(&admin(), slot.id, update).await.unwrap();
    assert_eq!(slot.duration_minutes, 60);

    let update = UpdatePeriodSlot {
        duration_minutes: Patch::Value(45),
        ..Default::default()
    };
    let err = schedule.update_period_slot(&admin(), slot.id, update).await.unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "duration_minutes"));
}

#[actix_web::test]
async fn slot_links_must_exist() {
    let fx = Fixture::new();
    let schedule = &fx.state.schedule;

    let mut payload = new_slot("P1", (9, 0), (9, 45));
    payload.day_pattern_id = Some(999);
    let err = schedule.create_period_slot(&admin(), payload).await.unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "day_pattern_id"));

    let mut payload = new_slot("P1", (9, 0), (9, 45));
    payload.shift_id = Some(999);
    let err = schedule.create_period_slot(&admin(), payload).await.unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "shift_id"));
}

#[actix_web::test]
async fn shift_in_use_by_active_slot_cannot_be_deleted() {
    let fx = Fixture::new();
    let schedule = &fx.state.schedule;
    let shift = fx.shift("MORNING").await;
    let slot = fx.linked_slot("P1", None, Some(shift.id)).await;

    let err = schedule.delete_shift(&admin(), shift.id).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::EntityInUse {
            entity: "shift",
            referenced_by: "period_slot",
            ..
        }
    ));

    // an inactive slot only loses its link
    let slot = schedule.toggle_period_slot(&admin(), slot.id).await.unwrap();
    assert!(!slot.is_active);
    schedule.delete_shift(&admin(), shift.id).await.unwrap();

    let slot = schedule.get_period_slot(&admin(), slot.id).await.unwrap();
    assert_eq!(slot.shift_id, None);
    let err = schedule.get_shift(&admin(), shift.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound { .. }));
}

#[actix_web::test]
async fn day_pattern_in_use_cannot_be_deleted() {
    let fx = Fixture::new();
    let schedule = &fx.state.schedule;

    let pattern = fx.pattern("REGULAR").await;
    let slot = fx.linked_slot("P1", Some(pattern.id), None).await;
    let err = schedule.delete_day_pattern(&admin(), pattern.id).await.unwrap_err();
    assert!(matches!(err, AppError::EntityInUse { referenced_by: "period_slot", .. }));
    schedule.toggle_period_slot(&admin(), slot.id).await.unwrap();

    schedule
        .upsert_day_assignment(
            &admin(),
            1,
            None,
            UpsertDayAssignment {
                is_working_day: true,
                day_pattern_id: Some(pattern.id),
            },
        )
        .await
        .unwrap();
    let err = schedule.delete_day_pattern(&admin(), pattern.id).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::EntityInUse {
            referenced_by: "day_pattern_assignment",
            ..
        }
    ));

    schedule
        .upsert_day_assignment(
            &admin(),
            1,
            None,
            UpsertDayAssignment {
                is_working_day: true,
                day_pattern_id: None,
            },
        )
        .await
        .unwrap();
    schedule.delete_day_pattern(&admin(), pattern.id).await.unwrap();
    let slot = schedule.get_period_slot(&admin(), slot.id).await.unwrap();
    assert_eq!(slot.day_pattern_id, None);
}

#[actix_web::test]
async fn slot_used_by_a_timetable_cannot_be_deleted() {
    let fx = Fixture::new();
    let schedule = &fx.state.schedule;

    let spare = fx.slot("P9", SlotType::Regular, (14, 0), (14, 45)).await;
    schedule.delete_period_slot(&admin(), spare.id).await.unwrap();

    let p1 = fx.published_period().await;
    let err = schedule.delete_period_slot(&admin(), p1.id).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::EntityInUse {
            entity: "period_slot",
            referenced_by: "timetable_entry",
            ..
        }
    ));
}

#[actix_web::test]
async fn toggle_flips_active_flag_and_filters_follow() {
    let fx = Fixture::new();
    let schedule = &fx.state.schedule;

    let shift = fx.shift("MORNING").await;
    fx.shift("EVENING").await;
    let shift = schedule.toggle_shift(&admin(), shift.id).await.unwrap();
    assert!(!shift.is_active);

    let active = TemplateQuery {
        is_active: Some(true),
        ..Default::default()
    };
    let page = schedule.list_shifts(&admin(), &active).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].code, "EVENING");

    let shift = schedule.toggle_shift(&admin(), shift.id).await.unwrap();
    assert!(shift.is_active);

    let pattern = fx.pattern("REGULAR").await;
    let pattern = schedule.toggle_day_pattern(&admin(), pattern.id).await.unwrap();
    assert!(!pattern.is_active);
}

#[actix_web::test]
async fn teachers_read_templates_but_cannot_change_them() {
    let fx = Fixture::new();
    let schedule = &fx.state.schedule;
    let shift = fx.shift("MORNING").await;

    assert!(schedule.get_shift(&teacher(), shift.id).await.is_ok());
    let err = schedule.toggle_shift(&teacher(), shift.id).await.unwrap_err();
    assert!(matches!(err, AppError::PermissionDenied { .. }));
}

#[actix_web::test]
async fn week_map_lists_seven_days() {
    let fx = Fixture::new();
    let schedule = &fx.state.schedule;
    let pattern = fx.pattern("REGULAR").await;

    schedule
        .upsert_day_assignment(
            &admin(),
            1,
            None,
            UpsertDayAssignment {
                is_working_day: true,
                day_pattern_id: Some(pattern.id),
            },
        )
        .await
        .unwrap();

    let week = schedule.list_day_assignments(&admin(), None).await.unwrap();
    assert_eq!(week.len(), 7);
    assert_eq!(week[0].day_of_week, DayOfWeek::SUNDAY);
    assert!(!week[0].is_working_day);
    assert_eq!(week[1].day_pattern_id, Some(pattern.id));
    assert!(week[1].is_working_day);
    assert!(week[2..].iter().all(|a| !a.is_working_day && a.day_pattern_id.is_none()));

    let monday = schedule.get_day_assignment(&teacher(), 1, None).await.unwrap();
    assert_eq!(monday.updated_by, Some(admin().user_id));
}

#[actix_web::test]
async fn day_assignment_rejects_bad_patterns() {
    let fx = Fixture::new();
    let schedule = &fx.state.schedule;
    let pattern = fx.pattern("REGULAR").await;

    let err = schedule
        .upsert_day_assignment(
            &admin(),
            0,
            None,
            UpsertDayAssignment {
                is_working_day: false,
                day_pattern_id: Some(pattern.id),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "day_pattern_id"));

    schedule.toggle_day_pattern(&admin(), pattern.id).await.unwrap();
    let err = schedule
        .upsert_day_assignment(
            &admin(),
            2,
            None,
            UpsertDayAssignment {
                is_working_day: true,
                day_pattern_id: Some(pattern.id),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { .. }));

    let err = schedule
        .upsert_day_assignment(
            &admin(),
            7,
            None,
            UpsertDayAssignment {
                is_working_day: true,
                day_pattern_id: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "day_of_week"));
}
