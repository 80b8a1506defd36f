#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};

use campus::auth::auth::AuthUser;
use campus::auth::capability::RoleAuthorizer;
use campus::clock::ManualClock;
use campus::config::Config;
use campus::core::{AppState, Stores};
use campus::model::attendance::{AttendanceStatus, MarkLine, MarkRoster, Section, StudentRef};
use campus::model::common::DayOfWeek;
use campus::model::role::Role;
use campus::model::schedule::{CreatePeriodSlot, PeriodSlot, SlotType};
use campus::model::timetable::{CreateTimetable, EntryInput, Timetable, TimetableEntry};
use campus::model::wire::ClockTime;
use campus::models::{Claims, TokenType};
use campus::store::MemoryStore;

pub const SECRET: &str = "integration-test-secret-0123456789";

pub const TENANT: u64 = 1;
pub const BRANCH: u64 = 1;
pub const OTHER_BRANCH: u64 = 2;
pub const SECTION_A: u64 = 10;
pub const SECTION_B: u64 = 20;
pub const YEAR: u64 = 2025;

pub const MATH: u64 = 30;
pub const SCIENCE: u64 = 31;
/// Staff record of the teacher account below
pub const TEACHER_STAFF: u64 = 88;
pub const OTHER_STAFF: u64 = 89;

pub const STUDENTS: [u64; 3] = [501, 502, 503];

pub fn user(role: Role, user_id: u64, staff_id: Option<u64>) -> AuthUser {
    AuthUser {
        user_id,
        username: format!("user{}", user_id),
        role,
        tenant_id: TENANT,
        branch_id: Some(BRANCH),
        staff_id,
    }
}

pub fn admin() -> AuthUser {
    user(Role::Admin, 1, None)
}

pub fn coordinator() -> AuthUser {
    user(Role::Coordinator, 2, None)
}

pub fn teacher() -> AuthUser {
    user(Role::Teacher, 300, Some(TEACHER_STAFF))
}

pub fn other_teacher() -> AuthUser {
    user(Role::Teacher, 301, Some(OTHER_STAFF))
}

/// Signs a token the way the identity service does.
pub fn signed_token(caller: &AuthUser, token_type: TokenType) -> String {
    let claims = Claims {
        user_id: caller.user_id,
        sub: caller.username.clone(),
        role: caller.role.id(),
        exp: Utc::now().timestamp() as usize + 3600,
        jti: uuid::Uuid::new_v4().to_string(),
        token_type,
        tenant_id: caller.tenant_id,
        branch_id: caller.branch_id,
        staff_id: caller.staff_id,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

pub fn token_for(caller: &AuthUser) -> String {
    signed_token(caller, TokenType::Access)
}

/// 2025-01-06 is a Monday.
pub fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 6).unwrap()
}

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 6, hour, minute, 0).unwrap()
}

pub fn time(hour: u32, minute: u32) -> ClockTime {
    ClockTime::from(NaiveTime::from_hms_opt(hour, minute, 0).unwrap())
}

pub fn roster(statuses: [AttendanceStatus; 3]) -> MarkRoster {
    MarkRoster {
        students: STUDENTS
            .iter()
            .zip(statuses)
            .map(|(&student_id, status)| MarkLine {
                student_id,
                status,
                late_arrival_time: None,
                remarks: None,
            })
            .collect(),
        reason: None,
    }
}

/// Memory-backed application with two sections in one branch, three
/// students in section A and a clock parked on Monday morning.
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub config: Config,
    pub state: AppState,
}

impl Fixture {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(at(9, 50)));
        let config = Config::for_tests(SECRET);

        for (id, branch_id, name) in [
            (SECTION_A, BRANCH, "Grade 5 A"),
            (SECTION_B, BRANCH, "Grade 5 B"),
            (30, OTHER_BRANCH, "Grade 6 A"),
        ] {
            store.add_section(Section {
                id,
                tenant_id: TENANT,
                branch_id,
                name: name.to_string(),
            });
        }
        for (n, id) in STUDENTS.iter().enumerate() {
            store.enroll(
                TENANT,
                SECTION_A,
                StudentRef {
                    id: *id,
                    full_name: format!("Student {}", n + 1),
                    roll_number: Some(format!("{:02}", n + 1)),
                },
            );
        }
        for section in [SECTION_A, SECTION_B] {
            store.assign_teacher(TENANT, TEACHER_STAFF, MATH, section);
            store.assign_teacher(TENANT, OTHER_STAFF, SCIENCE, section);
        }

        let state = AppState::new(
            Stores::from_backend(store.clone()),
            Arc::new(RoleAuthorizer),
            clock.clone(),
            &config,
        );

        Fixture {
            store,
            clock,
            config,
            state,
        }
    }

    pub async fn slot(&self, code: &str, slot_type: SlotType, start: (u32, u32), end: (u32, u32)) -> PeriodSlot {
        self.state
            .schedule
            .create_period_slot(
                &admin(),
                CreatePeriodSlot {
                    branch_id: None,
                    name: code.to_string(),
                    code: code.to_string(),
                    slot_type,
                    start_time: time(start.0, start.1),
                    end_time: time(end.0, end.1),
                    duration_minutes: None,
                    day_pattern_id: None,
                    shift_id: None,
                    display_order: None,
                    is_active: None,
                },
            )
            .await
            .unwrap()
    }

    pub async fn timetable(&self, section_id: u64, name: &str) -> Timetable {
        self.state
            .timetables
            .create(
                &coordinator(),
                CreateTimetable {
                    section_id,
                    academic_year_id: YEAR,
                    name: name.to_string(),
                },
            )
            .await
            .unwrap()
    }

    pub async fn entry(&self, timetable_id: u64, slot_id: u64, subject_id: u64, staff_id: u64) -> TimetableEntry {
        self.state
            .timetables
            .upsert_entry(
                &coordinator(),
                timetable_id,
                EntryInput {
                    day_of_week: DayOfWeek::MONDAY,
                    period_slot_id: slot_id,
                    subject_id,
                    staff_id,
                    room: None,
                },
            )
            .await
            .unwrap()
    }

    /// Section A with a published Monday P1 (09:00-09:45) math lesson.
    pub async fn published_period(&self) -> PeriodSlot {
        let p1 = self.slot("P1", SlotType::Regular, (9, 0), (9, 45)).await;
        let tt = self.timetable(SECTION_A, "Grade 5 A - Term 1").await;
        self.entry(tt.id, p1.id, MATH, TEACHER_STAFF).await;
        self.state.timetables.publish(&coordinator(), tt.id).await.unwrap();
        p1
    }
}
