mod common;

use actix_web::http::StatusCode;
use actix_web::{App, test, web::Data};
use serde_json::{Value, json};

use campus::models::TokenType;
use campus::routes;

use common::*;

macro_rules! app {
    ($fx:expr) => {{
        let config = $fx.config.clone();
        test::init_service(
            App::new()
                .app_data(Data::new($fx.state.clone()))
                .app_data(Data::new($fx.config.clone()))
                .configure(move |cfg| routes::configure(cfg, &config)),
        )
        .await
    }};
}

macro_rules! call {
    ($app:expr, $req:expr) => {{
        let resp = test::call_service(&$app, $req.to_request()).await;
        let status: StatusCode = resp.status();
        let body: Value = test::read_body_json(resp).await;
        (status, body)
    }};
}

fn request(method: &str, uri: &str, token: Option<&str>) -> test::TestRequest {
    let req = match method {
        "POST" => test::TestRequest::post(),
        "PUT" => test::TestRequest::put(),
        "DELETE" => test::TestRequest::delete(),
        _ => test::TestRequest::get(),
    }
    .uri(uri)
    // the rate limiter keys on the peer address
    .peer_addr("127.0.0.1:40000".parse().unwrap());
    match token {
        Some(token) => req.insert_header(("Authorization", format!("Bearer {}", token))),
        None => req,
    }
}

#[actix_web::test]
async fn requests_without_a_token_are_rejected() {
    let fx = Fixture::new();
    let app = app!(fx);

    let (status, body) = call!(app, request("GET", "/api/shifts", None));
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"]["code"], json!("unauthorized"));
    assert_eq!(body["error"]["type"], json!("/problems/unauthorized"));
}

#[actix_web::test]
async fn refresh_tokens_do_not_open_the_api() {
    let fx = Fixture::new();
    let app = app!(fx);

    let refresh = signed_token(&admin(), TokenType::Refresh);
    let (status, body) = call!(app, request("GET", "/api/shifts", Some(&refresh)));
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["detail"], json!("Access token required"));

    let access = signed_token(&admin(), TokenType::Access);
    let (status, _) = call!(app, request("GET", "/api/shifts", Some(&access)));
    assert_eq!(status, StatusCode::OK);
}

#[actix_web::test]
async fn create_shift_returns_created_envelope() {
    let fx = Fixture::new();
    let app = app!(fx);
    let token = token_for(&admin());

    let req = request("POST", "/api/shifts", Some(&token)).set_json(json!({
        "name": "Morning",
        "code": "morning",
        "start_time": "07:30",
        "end_time": "13:00"
    }));
    let (status, body) = call!(app, req);
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["code"], json!("MORNING"));
    assert_eq!(body["data"]["start_time"], json!("07:30:00"));

    let (status, body) = call!(app, request("GET", "/api/shifts", Some(&token)));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], json!(1));
}

#[actix_web::test]
async fn invalid_payloads_use_the_problem_shape() {
    let fx = Fixture::new();
    let app = app!(fx);
    let token = token_for(&admin());

    let req = request("POST", "/api/shifts", Some(&token)).set_json(json!({
        "name": "Broken",
        "code": "broken",
        "start_time": "13:00",
        "end_time": "07:30"
    }));
    let (status, body) = call!(app, req);
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("invalid_time_range"));

    let req = request("POST", "/api/shifts", Some(&token)).set_json(json!({ "name": 5 }));
    let (status, body) = call!(app, req);
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("validation_error"));
    assert_eq!(body["error"]["field"], json!("body"));

    let (status, body) = call!(app, request("GET", "/api/shifts/abc", Some(&token)));
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["field"], json!("path"));
}

#[actix_web::test]
async fn publish_conflict_is_a_409_with_details() {
    let fx = Fixture::new();
    let p1 = fx.published_period().await;
    let b = fx.timetable(SECTION_B, "B").await;
    fx.entry(b.id, p1.id, MATH, TEACHER_STAFF).await;

    let app = app!(fx);
    let token = token_for(&coordinator());
    let uri = format!("/api/timetables/{}/publish", b.id);
    let (status, body) = call!(app, request("POST", &uri, Some(&token)));

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], json!("schedule_conflict"));
    assert_eq!(body["error"]["conflict"]["staff_id"], json!(TEACHER_STAFF));
    assert_eq!(body["error"]["conflict"]["conflicting_section_id"], json!(SECTION_A));
}

#[actix_web::test]
async fn conflict_check_route_is_not_shadowed_by_id() {
    let fx = Fixture::new();
    let p1 = fx.published_period().await;
    let app = app!(fx);
    let token = token_for(&teacher());

    let uri = format!(
        "/api/timetables/conflicts?staff_id={}&day_of_week=1&period_slot_id={}",
        TEACHER_STAFF, p1.id
    );
    let (status, body) = call!(app, request("GET", &uri, Some(&token)));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["has_conflict"], json!(true));
}

#[actix_web::test]
async fn roster_is_marked_once_over_http() {
    let fx = Fixture::new();
    let p1 = fx.published_period().await;
    let app = app!(fx);
    let uri = format!("/api/student-attendance/period/{}?section_id={}&date=2025-01-06", p1.id, SECTION_A);
    let payload = json!({
        "students": STUDENTS.iter().map(|id| json!({ "student_id": id, "status": "present" })).collect::<Vec<_>>()
    });

    let req = request("POST", &uri, Some(&token_for(&teacher()))).set_json(payload.clone());
    let (status, body) = call!(app, req);
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["summary"]["present"], json!(3));
    let record_id = body["data"]["records"][0]["id"].as_u64().unwrap();

    let req = request("POST", &uri, Some(&token_for(&other_teacher()))).set_json(payload);
    let (status, body) = call!(app, req);
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], json!("already_marked"));

    let status_uri = format!("/api/student-attendance/{}/edit-status", record_id);
    let (status, body) = call!(app, request("GET", &status_uri, Some(&token_for(&teacher()))));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["can_edit"], json!(true));
    assert_eq!(body["data"]["window_minutes"], json!(30));
}

#[actix_web::test]
async fn teachers_cannot_change_the_edit_window() {
    let fx = Fixture::new();
    let app = app!(fx);

    let req = request("PUT", "/api/student-attendance/edit-window-policy", Some(&token_for(&teacher())))
        .set_json(json!({ "edit_window_minutes": 60 }));
    let (status, body) = call!(app, req);
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], json!("permission_denied"));

    let req = request("GET", "/api/student-attendance/edit-window-policy", Some(&token_for(&teacher())));
    let (status, body) = call!(app, req);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["edit_window_minutes"], json!(30));
}
