//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::error::ApiError;
use crate::web::middleware::CurrentUser;
use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use course_progress_core::{
    CheckoutStart, CoreError, CourseOutline, CourseProgressSummary, Enrollment, Lesson,
    LessonProgress, PaymentConfirmation,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        enrollment_status_handler,
        enroll_handler,
        unenroll_handler,
        course_outline_handler,
        course_outline_by_slug_handler,
        current_lesson_handler,
        lesson_progress_handler,
        mark_complete_handler,
        mark_incomplete_handler,
        update_watch_progress_handler,
        adjacent_lessons_handler,
        dashboard_handler,
        confirm_payment_handler,
    ),
    components(
        schemas(
            EnrollmentStatusResponse,
            EnrollmentDto,
            CheckoutResponse,
            ConfirmationResponse,
            LessonDto,
            CurrentLessonResponse,
            LessonProgressDto,
            WatchProgressRequest,
            AdjacentLessonsResponse,
            OutlineResponse,
            OutlineSectionDto,
            OutlineLessonDto,
            DashboardEntry,
        )
    ),
    tags(
        (name = "Course Progress API", description = "Enrollment and lesson progress tracking for learners.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct EnrollmentStatusResponse {
    pub course_id: Uuid,
    pub enrolled: bool,
}

#[derive(Serialize, ToSchema)]
pub struct EnrollmentDto {
    pub id: Uuid,
    pub course_id: Uuid,
    pub enrolled_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub completed_lessons: u32,
    pub current_lesson_id: Option<Uuid>,
}

impl From<Enrollment> for EnrollmentDto {
    fn from(e: Enrollment) -> Self {
        Self {
            id: e.id,
            course_id: e.course_id,
            enrolled_at: e.enrolled_at,
            last_accessed: e.last_accessed,
            completed_lessons: e.completed_lessons,
            current_lesson_id: e.current_lesson_id,
        }
    }
}

/// The outcome of starting a checkout.
#[derive(Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckoutResponse {
    Enrolled {
        enrollment: EnrollmentDto,
    },
    /// Complete the payment client-side with `client_secret`, then confirm the intent.
    PaymentRequired {
        payment_id: Uuid,
        intent_id: String,
        client_secret: Option<String>,
        amount_cents: i64,
    },
}

#[derive(Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConfirmationResponse {
    Pending { processor_status: String },
    Enrolled { enrollment: EnrollmentDto },
}

#[derive(Serialize, ToSchema)]
pub struct LessonDto {
    pub id: Uuid,
    pub section_id: Uuid,
    pub title: String,
    pub position: i32,
    pub lesson_type: String,
    pub is_preview: bool,
    pub duration_seconds: Option<i32>,
}

impl From<Lesson> for LessonDto {
    fn from(l: Lesson) -> Self {
        Self {
            id: l.id,
            section_id: l.section_id,
            title: l.title,
            position: l.position,
            lesson_type: l.lesson_type.to_string(),
            is_preview: l.is_preview,
            duration_seconds: l.duration_seconds,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct CurrentLessonResponse {
    pub section_id: Uuid,
    pub section_title: String,
    pub lesson: LessonDto,
}

#[derive(Serialize, ToSchema)]
pub struct LessonProgressDto {
    pub lesson_id: Uuid,
    pub completed: bool,
    pub watched_seconds: u32,
    pub last_watched: Option<DateTime<Utc>>,
}

impl From<LessonProgress> for LessonProgressDto {
    fn from(p: LessonProgress) -> Self {
        Self {
            lesson_id: p.lesson_id,
            completed: p.completed,
            watched_seconds: p.watched_seconds,
            last_watched: p.last_watched,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct WatchProgressRequest {
    pub watched_seconds: u32,
}

#[derive(Serialize, ToSchema)]
pub struct AdjacentLessonsResponse {
    pub previous: Option<LessonDto>,
    pub next: Option<LessonDto>,
}

#[derive(Serialize, ToSchema)]
pub struct OutlineLessonDto {
    pub id: Uuid,
    pub title: String,
    pub position: i32,
    pub lesson_type: String,
    pub is_preview: bool,
    pub duration_seconds: Option<i32>,
    pub completed: bool,
    pub watched_seconds: u32,
    pub accessible: bool,
}

#[derive(Serialize, ToSchema)]
pub struct OutlineSectionDto {
    pub id: Uuid,
    pub title: String,
    pub position: i32,
    pub lessons: Vec<OutlineLessonDto>,
}

#[derive(Serialize, ToSchema)]
pub struct OutlineResponse {
    pub course_id: Uuid,
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
    pub enrolled: bool,
    pub percent_complete: u8,
    pub completed_lessons: u32,
    pub current_lesson_id: Option<Uuid>,
    pub previous_lesson_id: Option<Uuid>,
    pub next_lesson_id: Option<Uuid>,
    pub sections: Vec<OutlineSectionDto>,
}

impl From<CourseOutline> for OutlineResponse {
    fn from(outline: CourseOutline) -> Self {
        let CourseOutline {
            course,
            enrollment,
            percent_complete,
            current_lesson_id,
            neighbours,
            lessons,
        } = outline;

        let mut ordered: Vec<_> = course.sections.iter().collect();
        ordered.sort_by_key(|section| section.position);
        let sections = ordered
            .into_iter()
            .map(|section| OutlineSectionDto {
                id: section.id,
                title: section.title.clone(),
                position: section.position,
                lessons: lessons
                    .iter()
                    .filter(|row| row.section_id == section.id)
                    .map(|row| OutlineLessonDto {
                        id: row.lesson.id,
                        title: row.lesson.title.clone(),
                        position: row.lesson.position,
                        lesson_type: row.lesson.lesson_type.to_string(),
                        is_preview: row.lesson.is_preview,
                        duration_seconds: row.lesson.duration_seconds,
                        completed: row.completed,
                        watched_seconds: row.watched_seconds,
                        accessible: row.accessible,
                    })
                    .collect(),
            })
            .collect();

        Self {
            course_id: course.id,
            slug: course.slug,
            title: course.title,
            description: course.description,
            enrolled: enrollment.is_some(),
            completed_lessons: enrollment.map(|e| e.completed_lessons).unwrap_or_default(),
            percent_complete,
            current_lesson_id,
            previous_lesson_id: neighbours.previous.map(|l| l.id),
            next_lesson_id: neighbours.next.map(|l| l.id),
            sections,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct DashboardEntry {
    pub enrollment_id: Uuid,
    pub course_id: Uuid,
    pub course_slug: String,
    pub course_title: String,
    pub percent_complete: u8,
    pub completed_lessons: u32,
    pub total_lessons: u32,
    pub current_lesson_id: Option<Uuid>,
    pub enrolled_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl From<CourseProgressSummary> for DashboardEntry {
    fn from(s: CourseProgressSummary) -> Self {
        Self {
            enrollment_id: s.enrollment_id,
            course_id: s.course_id,
            course_slug: s.course_slug,
            course_title: s.course_title,
            percent_complete: s.percent_complete,
            completed_lessons: s.completed_lessons,
            total_lessons: s.total_lessons,
            current_lesson_id: s.current_lesson_id,
            enrolled_at: s.enrolled_at,
            last_accessed: s.last_accessed,
        }
    }
}

//=========================================================================================
// Enrollment Handlers
//=========================================================================================

/// Whether the caller is enrolled in the course.
#[utoipa::path(
    get,
    path = "/courses/{course_id}/enrollment",
    responses(
        (status = 200, description = "Enrollment status", body = EnrollmentStatusResponse),
        (status = 401, description = "Missing or invalid user id")
    ),
    params(
        ("course_id" = Uuid, Path, description = "The course."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn enrollment_status_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(course_id): Path<Uuid>,
) -> Result<Json<EnrollmentStatusResponse>, ApiError> {
    let enrolled = state.progress.is_enrolled(user_id, course_id).await?;
    Ok(Json(EnrollmentStatusResponse { course_id, enrolled }))
}

/// Enroll in a course.
///
/// Free courses enroll immediately. Paid courses open a payment intent which must be
/// confirmed through `/payments/{intent_id}/confirm`. Enrolling again is not an error.
#[utoipa::path(
    post,
    path = "/courses/{course_id}/enrollment",
    responses(
        (status = 201, description = "Enrolled in a free course", body = CheckoutResponse),
        (status = 200, description = "Already enrolled, or payment required", body = CheckoutResponse),
        (status = 404, description = "Course not found"),
        (status = 422, description = "Course has no lessons")
    ),
    params(
        ("course_id" = Uuid, Path, description = "The course."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn enroll_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    match state.progress.begin_checkout(user_id, course_id).await {
        Ok(CheckoutStart::Enrolled(enrollment)) => Ok((
            StatusCode::CREATED,
            Json(CheckoutResponse::Enrolled {
                enrollment: enrollment.into(),
            }),
        )),
        Ok(CheckoutStart::PaymentRequired {
            payment_id,
            intent_id,
            client_secret,
            amount_cents,
        }) => Ok((
            StatusCode::OK,
            Json(CheckoutResponse::PaymentRequired {
                payment_id,
                intent_id,
                client_secret,
                amount_cents,
            }),
        )),
        Err(CoreError::AlreadyEnrolled { .. }) => {
            let enrollment = state
                .progress
                .enrollments()
                .enrollment(user_id, course_id)
                .await?
                .ok_or(CoreError::NotEnrolled)?;
            Ok((
                StatusCode::OK,
                Json(CheckoutResponse::Enrolled {
                    enrollment: enrollment.into(),
                }),
            ))
        }
        Err(e) => Err(e.into()),
    }
}

/// Leave a course. Progress is discarded.
#[utoipa::path(
    delete,
    path = "/courses/{course_id}/enrollment",
    responses(
        (status = 204, description = "Not enrolled anymore")
    ),
    params(
        ("course_id" = Uuid, Path, description = "The course."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn unenroll_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(course_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.progress.unenroll(user_id, course_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Confirm a payment and enroll once the processor reports it settled.
#[utoipa::path(
    post,
    path = "/payments/{intent_id}/confirm",
    responses(
        (status = 200, description = "Payment settled and enrolled", body = ConfirmationResponse),
        (status = 202, description = "Payment not settled yet", body = ConfirmationResponse),
        (status = 404, description = "No payment for this intent"),
        (status = 409, description = "Settled amount differs from the price")
    ),
    params(
        ("intent_id" = String, Path, description = "The processor's payment intent id."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn confirm_payment_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(intent_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.progress.confirm_payment(user_id, &intent_id).await? {
        PaymentConfirmation::Pending { status } => {
            info!(intent_id = %intent_id, processor_status = %status, "Payment not settled yet");
            Ok((
                StatusCode::ACCEPTED,
                Json(ConfirmationResponse::Pending {
                    processor_status: status,
                }),
            ))
        }
        PaymentConfirmation::Enrolled(enrollment) => Ok((
            StatusCode::OK,
            Json(ConfirmationResponse::Enrolled {
                enrollment: enrollment.into(),
            }),
        )),
    }
}

//=========================================================================================
// Course View Handlers
//=========================================================================================

/// The curriculum with the caller's progress on each lesson.
#[utoipa::path(
    get,
    path = "/courses/{course_id}/outline",
    responses(
        (status = 200, description = "Course outline", body = OutlineResponse),
        (status = 404, description = "Course not found")
    ),
    params(
        ("course_id" = Uuid, Path, description = "The course."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn course_outline_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(course_id): Path<Uuid>,
) -> Result<Json<OutlineResponse>, ApiError> {
    let outline = state.progress.course_outline(user_id, course_id).await?;
    Ok(Json(outline.into()))
}

/// Same as the outline by id, addressed by the course's public slug.
#[utoipa::path(
    get,
    path = "/catalog/{slug}/outline",
    responses(
        (status = 200, description = "Course outline", body = OutlineResponse),
        (status = 404, description = "No course with this slug")
    ),
    params(
        ("slug" = String, Path, description = "The course slug."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn course_outline_by_slug_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(slug): Path<String>,
) -> Result<Json<OutlineResponse>, ApiError> {
    let outline = state.progress.course_outline_by_slug(user_id, &slug).await?;
    Ok(Json(outline.into()))
}

/// The lesson to resume at. `null` when the course has no lessons.
#[utoipa::path(
    get,
    path = "/courses/{course_id}/current-lesson",
    responses(
        (status = 200, description = "Current lesson", body = CurrentLessonResponse),
        (status = 404, description = "Course not found")
    ),
    params(
        ("course_id" = Uuid, Path, description = "The course."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn current_lesson_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(course_id): Path<Uuid>,
) -> Result<Json<Option<CurrentLessonResponse>>, ApiError> {
    let current = state.progress.current_lesson(user_id, course_id).await?;
    Ok(Json(current.map(|(section, lesson)| CurrentLessonResponse {
        section_id: section.id,
        section_title: section.title,
        lesson: lesson.into(),
    })))
}

/// The lessons before and after the given one in course order.
#[utoipa::path(
    get,
    path = "/courses/{course_id}/lessons/{lesson_id}/adjacent",
    responses(
        (status = 200, description = "Neighbouring lessons", body = AdjacentLessonsResponse),
        (status = 404, description = "Course not found")
    ),
    params(
        ("course_id" = Uuid, Path, description = "The course."),
        ("lesson_id" = Uuid, Path, description = "The lesson."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn adjacent_lessons_handler(
    State(state): State<Arc<AppState>>,
    Path((course_id, lesson_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<AdjacentLessonsResponse>, ApiError> {
    let neighbours = state.progress.adjacent_lessons(course_id, lesson_id).await?;
    Ok(Json(AdjacentLessonsResponse {
        previous: neighbours.previous.map(Into::into),
        next: neighbours.next.map(Into::into),
    }))
}

/// Progress across every enrolled course, most recently accessed first.
#[utoipa::path(
    get,
    path = "/dashboard",
    responses(
        (status = 200, description = "Enrolled courses", body = Vec<DashboardEntry>)
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn dashboard_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> Result<Json<Vec<DashboardEntry>>, ApiError> {
    let summaries = state.progress.dashboard(user_id).await?;
    Ok(Json(summaries.into_iter().map(Into::into).collect()))
}

//=========================================================================================
// Lesson Progress Handlers
//=========================================================================================

#[utoipa::path(
    get,
    path = "/courses/{course_id}/lessons/{lesson_id}/progress",
    responses(
        (status = 200, description = "Lesson progress; zero values when not started", body = LessonProgressDto)
    ),
    params(
        ("course_id" = Uuid, Path, description = "The course."),
        ("lesson_id" = Uuid, Path, description = "The lesson."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn lesson_progress_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path((course_id, lesson_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<LessonProgressDto>, ApiError> {
    let progress = state
        .progress
        .lesson_progress(user_id, course_id, lesson_id)
        .await?;
    Ok(Json(progress.into()))
}

/// Mark a lesson complete. Repeating the call changes nothing.
#[utoipa::path(
    post,
    path = "/courses/{course_id}/lessons/{lesson_id}/complete",
    responses(
        (status = 204, description = "Lesson is complete"),
        (status = 403, description = "Not enrolled in the course")
    ),
    params(
        ("course_id" = Uuid, Path, description = "The course."),
        ("lesson_id" = Uuid, Path, description = "The lesson."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn mark_complete_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path((course_id, lesson_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    state
        .progress
        .mark_complete(user_id, course_id, lesson_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Clear a lesson's completion. Repeating the call changes nothing.
#[utoipa::path(
    delete,
    path = "/courses/{course_id}/lessons/{lesson_id}/complete",
    responses(
        (status = 204, description = "Lesson is not complete"),
        (status = 403, description = "Not enrolled in the course")
    ),
    params(
        ("course_id" = Uuid, Path, description = "The course."),
        ("lesson_id" = Uuid, Path, description = "The lesson."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn mark_incomplete_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path((course_id, lesson_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    state
        .progress
        .mark_incomplete(user_id, course_id, lesson_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Record the playback position. Best-effort: failures are logged, never returned.
#[utoipa::path(
    put,
    path = "/courses/{course_id}/lessons/{lesson_id}/watch",
    request_body = WatchProgressRequest,
    responses(
        (status = 204, description = "Accepted")
    ),
    params(
        ("course_id" = Uuid, Path, description = "The course."),
        ("lesson_id" = Uuid, Path, description = "The lesson."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn update_watch_progress_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path((course_id, lesson_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<WatchProgressRequest>,
) -> StatusCode {
    state
        .progress
        .update_watch_progress(user_id, course_id, lesson_id, body.watched_seconds)
        .await;
    StatusCode::NO_CONTENT
}
