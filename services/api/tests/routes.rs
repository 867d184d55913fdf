//! Router-level tests against the in-memory store.

use api_lib::web::{router, state::AppState, USER_ID_HEADER};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use course_progress_core::domain::{Course, Lesson, LessonType, PaymentIntent, PaymentMetadata, Section};
use course_progress_core::memory::InMemoryDatabase;
use course_progress_core::{PaymentGateway, PortResult, ProgressService, SystemClock};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

/// Opens intents for whatever is asked and settles them once `settled` is set.
#[derive(Default)]
struct FakeGateway {
    settled: AtomicBool,
    amount_cents: std::sync::Mutex<i64>,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_payment_intent(
        &self,
        amount_cents: i64,
        _metadata: PaymentMetadata,
    ) -> PortResult<PaymentIntent> {
        *self.amount_cents.lock().unwrap() = amount_cents;
        Ok(PaymentIntent {
            id: "pi_test".to_string(),
            client_secret: Some("pi_test_secret".to_string()),
            status: "requires_payment_method".to_string(),
            amount_cents,
        })
    }

    async fn retrieve_payment_intent(&self, intent_id: &str) -> PortResult<PaymentIntent> {
        let status = if self.settled.load(Ordering::SeqCst) {
            "succeeded"
        } else {
            "processing"
        };
        Ok(PaymentIntent {
            id: intent_id.to_string(),
            client_secret: None,
            status: status.to_string(),
            amount_cents: *self.amount_cents.lock().unwrap(),
        })
    }
}

fn course(price_cents: i64, sizes: &[usize]) -> Course {
    let course_id = Uuid::new_v4();
    let sections = sizes
        .iter()
        .enumerate()
        .map(|(i, &size)| {
            let section_id = Uuid::new_v4();
            Section {
                id: section_id,
                course_id,
                title: format!("Part {}", i + 1),
                position: i as i32 + 1,
                lessons: (0..size)
                    .map(|j| Lesson {
                        id: Uuid::new_v4(),
                        section_id,
                        title: format!("Lesson {}", j + 1),
                        position: j as i32 + 1,
                        lesson_type: LessonType::Video,
                        is_preview: i == 0 && j == 0,
                        duration_seconds: Some(600),
                    })
                    .collect(),
            }
        })
        .collect();
    Course {
        id: course_id,
        slug: format!("course-{}", course_id.simple()),
        title: "Ownership in Practice".to_string(),
        description: Some("Borrowing without tears".to_string()),
        price_cents,
        sections,
    }
}

fn app(courses: &[&Course]) -> (Router, Arc<FakeGateway>) {
    let db = Arc::new(InMemoryDatabase::new());
    for course in courses {
        db.insert_course((*course).clone());
    }
    let gateway = Arc::new(FakeGateway::default());
    let progress = ProgressService::new(db, gateway.clone(), Arc::new(SystemClock));
    (router(Arc::new(AppState::new(progress))), gateway)
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    user: Option<Uuid>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header(USER_ID_HEADER, user.to_string());
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn requests_without_user_id_are_rejected() {
    let course = course(0, &[1]);
    let (app, _) = app(&[&course]);

    let uri = format!("/courses/{}/enrollment", course.id);
    let (status, body) = send(&app, "GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Please sign in to continue");

    let request = Request::builder()
        .uri(&uri)
        .header(USER_ID_HEADER, "not-a-uuid")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn free_course_enrollment_and_progress_flow() {
    let course = course(0, &[2, 2]);
    let (app, _) = app(&[&course]);
    let user = Some(Uuid::new_v4());
    let base = format!("/courses/{}", course.id);
    let first = course.sections[0].lessons[0].id;
    let third = course.sections[1].lessons[0].id;

    let (status, body) = send(&app, "POST", &format!("{base}/enrollment"), user, None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "enrolled");
    assert_eq!(body["enrollment"]["current_lesson_id"], first.to_string());

    // Enrolling again is reported as success with the existing enrollment.
    let (status, again) = send(&app, "POST", &format!("{base}/enrollment"), user, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["enrollment"]["id"], body["enrollment"]["id"]);

    for _ in 0..2 {
        let (status, _) = send(&app, "POST", &format!("{base}/lessons/{first}/complete"), user, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }
    let (status, _) = send(
        &app,
        "PUT",
        &format!("{base}/lessons/{third}/watch"),
        user,
        Some(json!({ "watched_seconds": 95 })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, progress) = send(&app, "GET", &format!("{base}/lessons/{third}/progress"), user, None).await;
    assert_eq!(progress["completed"], false);
    assert_eq!(progress["watched_seconds"], 95);

    let (status, outline) = send(&app, "GET", &format!("{base}/outline"), user, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outline["enrolled"], true);
    assert_eq!(outline["percent_complete"], 25);
    assert_eq!(outline["completed_lessons"], 1);
    assert_eq!(outline["current_lesson_id"], third.to_string());
    assert_eq!(outline["sections"][0]["lessons"][0]["completed"], true);

    let (_, current) = send(&app, "GET", &format!("{base}/current-lesson"), user, None).await;
    assert_eq!(current["lesson"]["id"], third.to_string());
    assert_eq!(current["section_title"], "Part 2");

    let (_, dashboard) = send(&app, "GET", "/dashboard", user, None).await;
    assert_eq!(dashboard.as_array().map(Vec::len), Some(1));
    assert_eq!(dashboard[0]["total_lessons"], 4);

    let (status, _) = send(&app, "DELETE", &format!("{base}/lessons/{first}/complete"), user, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, outline) = send(&app, "GET", &format!("{base}/outline"), user, None).await;
    assert_eq!(outline["percent_complete"], 0);
}

#[tokio::test]
async fn progress_writes_require_enrollment() {
    let course = course(0, &[1]);
    let (app, _) = app(&[&course]);
    let lesson = course.sections[0].lessons[0].id;
    let base = format!("/courses/{}", course.id);
    let user = Some(Uuid::new_v4());

    let (status, body) = send(&app, "POST", &format!("{base}/lessons/{lesson}/complete"), user, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "You are not enrolled in this course");

    // Watch updates are fire-and-forget even when nothing can be recorded.
    let (status, _) = send(
        &app,
        "PUT",
        &format!("{base}/lessons/{lesson}/watch"),
        user,
        Some(json!({ "watched_seconds": 10 })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, progress) = send(&app, "GET", &format!("{base}/lessons/{lesson}/progress"), user, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(progress["watched_seconds"], 0);
}

#[tokio::test]
async fn unknown_and_empty_courses() {
    let empty = course(0, &[]);
    let (app, _) = app(&[&empty]);
    let user = Some(Uuid::new_v4());

    let (status, _) = send(&app, "GET", &format!("/courses/{}/outline", Uuid::new_v4()), user, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "POST", &format!("/courses/{}/enrollment", empty.id), user, None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, current) = send(&app, "GET", &format!("/courses/{}/current-lesson", empty.id), user, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(current, Value::Null);
}

#[tokio::test]
async fn adjacent_lessons_cross_sections() {
    let course = course(0, &[2, 1]);
    let (app, _) = app(&[&course]);
    let second = course.sections[0].lessons[1].id;
    let uri = format!("/courses/{}/lessons/{}/adjacent", course.id, second);

    let (status, body) = send(&app, "GET", &uri, Some(Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["previous"]["id"], course.sections[0].lessons[0].id.to_string());
    assert_eq!(body["next"]["id"], course.sections[1].lessons[0].id.to_string());
}

#[tokio::test]
async fn paid_course_enrolls_after_confirmed_payment() {
    let course = course(4900, &[2]);
    let (app, gateway) = app(&[&course]);
    let user = Some(Uuid::new_v4());
    let enrollment_uri = format!("/courses/{}/enrollment", course.id);

    let (status, body) = send(&app, "POST", &enrollment_uri, user, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "payment_required");
    assert_eq!(body["amount_cents"], 4900);
    assert_eq!(body["client_secret"], "pi_test_secret");

    let (status, body) = send(&app, "POST", "/payments/pi_test/confirm", user, None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["processor_status"], "processing");
    let (_, enrolled) = send(&app, "GET", &enrollment_uri, user, None).await;
    assert_eq!(enrolled["enrolled"], false);

    gateway.settled.store(true, Ordering::SeqCst);
    let (status, body) = send(&app, "POST", "/payments/pi_test/confirm", user, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "enrolled");
    let (_, enrolled) = send(&app, "GET", &enrollment_uri, user, None).await;
    assert_eq!(enrolled["enrolled"], true);

    // Another user cannot claim the payment.
    let (status, _) = send(&app, "POST", "/payments/pi_test/confirm", Some(Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unenroll_is_idempotent() {
    let course = course(0, &[1]);
    let (app, _) = app(&[&course]);
    let user = Some(Uuid::new_v4());
    let uri = format!("/courses/{}/enrollment", course.id);

    send(&app, "POST", &uri, user, None).await;
    for _ in 0..2 {
        let (status, _) = send(&app, "DELETE", &uri, user, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }
    let (_, body) = send(&app, "GET", &uri, user, None).await;
    assert_eq!(body["enrolled"], false);
}

#[tokio::test]
async fn outline_by_slug() {
    let course = course(0, &[1, 1]);
    let (app, _) = app(&[&course]);
    let user = Some(Uuid::new_v4());

    send(&app, "POST", &format!("/courses/{}/enrollment", course.id), user, None).await;
    let (status, outline) = send(&app, "GET", &format!("/catalog/{}/outline", course.slug), user, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outline["course_id"], course.id.to_string());
    assert_eq!(outline["enrolled"], true);
    assert_eq!(outline["sections"].as_array().map(Vec::len), Some(2));

    let (status, body) = send(&app, "GET", "/catalog/no-such-course/outline", user, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Course 'no-such-course' not found");
}
