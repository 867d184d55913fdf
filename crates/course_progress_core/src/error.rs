//! crates/course_progress_core/src/error.rs
//!
//! The error taxonomy surfaced by the enrollment and progress operations.

use uuid::Uuid;

use crate::ports::PortError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error("Please sign in to continue")]
    NotAuthenticated,

    /// Callers treat this as a success path, not a failure.
    #[error("You are already enrolled in this course")]
    AlreadyEnrolled { course_id: Uuid },

    #[error("Course {0} has no lessons yet")]
    CourseHasNoLessons(Uuid),

    #[error("Course {0} not found")]
    CourseNotFound(Uuid),

    #[error("Course '{0}' not found")]
    UnknownCourseSlug(String),

    #[error("You are not enrolled in this course")]
    NotEnrolled,

    #[error("No payment found for intent {0}")]
    PaymentNotFound(String),

    #[error("Payment amount {actual} does not match the expected {expected}")]
    PaymentAmountMismatch { expected: i64, actual: i64 },

    /// Any failure of the persistence or payment gateway.
    #[error("Gateway failure: {0}")]
    Gateway(#[from] PortError),
}

impl CoreError {
    /// Whether the error describes an outcome the caller should treat as success.
    pub fn is_benign(&self) -> bool {
        matches!(self, CoreError::AlreadyEnrolled { .. })
    }
}

/// A convenience type alias for `Result<T, CoreError>`.
pub type CoreResult<T> = Result<T, CoreError>;
