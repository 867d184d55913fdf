//! crates/course_progress_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the external collaborators of the core.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the concrete database and payment processor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    Course, Enrollment, LessonProgress, NewEnrollment, Payment, PaymentIntent, PaymentMetadata,
    PaymentStatus,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// A unique constraint rejected the write.
    #[error("Conflicting record: {0}")]
    Conflict(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The persistence gateway over the courses, enrollments, progress and payments tables.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Course Content ---
    /// Loads a course with all of its sections and lessons.
    async fn get_course(&self, course_id: Uuid) -> PortResult<Option<Course>>;

    async fn get_course_by_slug(&self, slug: &str) -> PortResult<Option<Course>>;

    // --- Enrollments ---
    async fn find_enrollment(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> PortResult<Option<Enrollment>>;

    async fn get_enrollment(&self, enrollment_id: Uuid) -> PortResult<Option<Enrollment>>;

    async fn list_enrollments_for_user(&self, user_id: Uuid) -> PortResult<Vec<Enrollment>>;

    /// Inserts a new enrollment. Fails with `PortError::Conflict` when the
    /// (user, course) pair is already enrolled.
    async fn insert_enrollment(&self, enrollment: NewEnrollment) -> PortResult<Enrollment>;

    /// Deletes the enrollment and its progress rows. Returns whether a row existed.
    async fn delete_enrollment(&self, user_id: Uuid, course_id: Uuid) -> PortResult<bool>;

    /// Moves the current lesson pointer and bumps `last_accessed`.
    async fn touch_enrollment(
        &self,
        enrollment_id: Uuid,
        current_lesson_id: Uuid,
        at: DateTime<Utc>,
    ) -> PortResult<()>;

    /// Atomically adds `delta` to `completed_lessons`, flooring the result at zero.
    /// Also bumps `last_accessed` and, when given, moves the current lesson pointer.
    async fn adjust_completed_lessons(
        &self,
        enrollment_id: Uuid,
        delta: i32,
        current_lesson_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> PortResult<()>;

    /// Atomically re-derives `completed_lessons` from the progress rows and
    /// returns the stored value.
    async fn recount_completed_lessons(&self, enrollment_id: Uuid) -> PortResult<u32>;

    // --- Lesson Progress ---
    async fn get_lesson_progress(
        &self,
        enrollment_id: Uuid,
        lesson_id: Uuid,
    ) -> PortResult<Option<LessonProgress>>;

    async fn list_lesson_progress(&self, enrollment_id: Uuid) -> PortResult<Vec<LessonProgress>>;

    /// Sets the `completed` flag on the (enrollment, lesson) row and returns whether
    /// the flag actually changed. Setting creates the row if needed; clearing never
    /// creates a row.
    async fn set_lesson_completed(
        &self,
        enrollment_id: Uuid,
        lesson_id: Uuid,
        completed: bool,
        at: DateTime<Utc>,
    ) -> PortResult<bool>;

    /// Upserts the playback position. Never touches the `completed` flag.
    async fn upsert_watch_position(
        &self,
        enrollment_id: Uuid,
        lesson_id: Uuid,
        watched_seconds: u32,
        at: DateTime<Utc>,
    ) -> PortResult<()>;

    // --- Payments ---
    async fn insert_payment(&self, payment: Payment) -> PortResult<()>;

    async fn find_payment_by_intent(&self, intent_id: &str) -> PortResult<Option<Payment>>;

    async fn update_payment_status(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
        at: DateTime<Utc>,
    ) -> PortResult<()>;
}

/// The payment processor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a payment intent for `amount_cents` and returns it with its client secret.
    async fn create_payment_intent(
        &self,
        amount_cents: i64,
        metadata: PaymentMetadata,
    ) -> PortResult<PaymentIntent>;

    async fn retrieve_payment_intent(&self, intent_id: &str) -> PortResult<PaymentIntent>;
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// System clock - uses real time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
