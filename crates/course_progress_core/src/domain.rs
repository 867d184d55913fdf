//! crates/course_progress_core/src/domain.rs
//!
//! Defines the pure, core data structures for course enrollment and lesson progress.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// Course Content (authored elsewhere, read-only here)
//=========================================================================================

/// A published course together with its full section/lesson tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Course {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
    /// Price in the smallest currency unit. Zero means the course is free to join.
    pub price_cents: i64,
    pub sections: Vec<Section>,
}

impl Course {
    pub fn is_free(&self) -> bool {
        self.price_cents == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub position: i32,
    pub lessons: Vec<Lesson>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lesson {
    pub id: Uuid,
    pub section_id: Uuid,
    pub title: String,
    pub position: i32,
    pub lesson_type: LessonType,
    /// Preview lessons can be opened without an enrollment.
    pub is_preview: bool,
    pub duration_seconds: Option<i32>,
}

impl Lesson {
    /// Whether a learner may open this lesson.
    pub fn is_accessible(&self, enrolled: bool) -> bool {
        enrolled || self.is_preview
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LessonType {
    Video,
    Quiz,
    Assignment,
}

impl LessonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LessonType::Video => "video",
            LessonType::Quiz => "quiz",
            LessonType::Assignment => "assignment",
        }
    }
}

impl fmt::Display for LessonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LessonType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(LessonType::Video),
            "quiz" => Ok(LessonType::Quiz),
            "assignment" => Ok(LessonType::Assignment),
            other => Err(format!("unknown lesson type '{}'", other)),
        }
    }
}

//=========================================================================================
// Learner State
//=========================================================================================

/// A user's registration in a course. At most one exists per (user, course).
#[derive(Debug, Clone, PartialEq)]
pub struct Enrollment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub enrolled_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    /// Must always equal the number of this enrollment's completed progress rows.
    pub completed_lessons: u32,
    pub current_lesson_id: Option<Uuid>,
}

/// The fields needed to create an enrollment row.
#[derive(Debug, Clone)]
pub struct NewEnrollment {
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub current_lesson_id: Uuid,
    pub enrolled_at: DateTime<Utc>,
}

/// Per-lesson watch/completion state scoped to one enrollment.
#[derive(Debug, Clone, PartialEq)]
pub struct LessonProgress {
    /// `None` when no row has been written yet.
    pub id: Option<Uuid>,
    pub enrollment_id: Uuid,
    pub lesson_id: Uuid,
    pub completed: bool,
    pub watched_seconds: u32,
    pub last_watched: Option<DateTime<Utc>>,
}

impl LessonProgress {
    /// The zero value returned for lessons the learner has not started.
    pub fn not_started(enrollment_id: Uuid, lesson_id: Uuid) -> Self {
        Self {
            id: None,
            enrollment_id,
            lesson_id,
            completed: false,
            watched_seconds: 0,
            last_watched: None,
        }
    }
}

/// The lessons on either side of a position in the course lesson sequence.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AdjacentLessons<'a> {
    pub previous: Option<&'a Lesson>,
    pub next: Option<&'a Lesson>,
}

//=========================================================================================
// Payments
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Completed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            other => Err(format!("unknown payment status '{}'", other)),
        }
    }
}

/// A purchase of a course, linked to the processor's payment intent.
#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub intent_id: String,
    pub amount_cents: i64,
    pub status: PaymentStatus,
    pub payment_date: DateTime<Utc>,
}

/// The payment processor's view of a payment attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub status: String,
    pub amount_cents: i64,
}

impl PaymentIntent {
    /// Only a settled intent may trigger enrollment.
    pub fn is_settled(&self) -> bool {
        matches!(self.status.as_str(), "succeeded" | "completed")
    }
}

/// Metadata attached to a payment intent so it can be traced back to a purchase.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentMetadata {
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub course_slug: String,
}
