//! crates/course_progress_core/src/service.rs
//!
//! User-scoped entry point used by the application layer. Resolves the learner's
//! enrollment from (user, course), delegates to the enrollment manager, progress
//! tracker and checkout, and keeps the enrollment cache current.
//!
//! Enrollment checks always read the gateway; the cache only backs the dashboard.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{EnrollmentCache, DEFAULT_TTL_SECS};
use crate::checkout::{Checkout, CheckoutStart, PaymentConfirmation};
use crate::completion::{
    lesson_sequence, percent_complete, resolve_adjacent_lessons, resume_point, total_lessons,
};
use crate::domain::{Course, Enrollment, Lesson, LessonProgress, Section};
use crate::enrollment::EnrollmentManager;
use crate::error::{CoreError, CoreResult};
use crate::ports::{Clock, DatabaseService, PaymentGateway};
use crate::progress::LessonProgressTracker;

//=========================================================================================
// Read Models
//=========================================================================================

/// Owned neighbours of a lesson in the course lesson sequence.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LessonNeighbours {
    pub previous: Option<Lesson>,
    pub next: Option<Lesson>,
}

/// One row of the curriculum view.
#[derive(Debug, Clone, PartialEq)]
pub struct OutlineLesson {
    pub section_id: Uuid,
    pub lesson: Lesson,
    pub completed: bool,
    pub watched_seconds: u32,
    pub accessible: bool,
}

/// The curriculum view of a course for one learner.
#[derive(Debug, Clone, PartialEq)]
pub struct CourseOutline {
    pub course: Course,
    pub enrollment: Option<Enrollment>,
    pub percent_complete: u8,
    pub current_lesson_id: Option<Uuid>,
    pub neighbours: LessonNeighbours,
    /// Every lesson in course order.
    pub lessons: Vec<OutlineLesson>,
}

/// A dashboard card for one enrolled course.
#[derive(Debug, Clone, PartialEq)]
pub struct CourseProgressSummary {
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

//=========================================================================================
// Service
//=========================================================================================

pub struct ProgressService {
    enrollments: Arc<EnrollmentManager>,
    tracker: LessonProgressTracker,
    checkout: Checkout,
    cache: EnrollmentCache,
    clock: Arc<dyn Clock>,
}

impl ProgressService {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        payments: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let enrollments = Arc::new(EnrollmentManager::new(db.clone(), clock.clone()));
        Self {
            tracker: LessonProgressTracker::new(db.clone(), clock.clone()),
            checkout: Checkout::new(db.clone(), payments, enrollments.clone(), clock.clone()),
            cache: EnrollmentCache::new(db, clock.clone(), Duration::seconds(DEFAULT_TTL_SECS)),
            enrollments,
            clock,
        }
    }

    pub fn enrollments(&self) -> &EnrollmentManager {
        &self.enrollments
    }

    // --- Enrollment ---

    pub async fn is_enrolled(&self, user_id: Uuid, course_id: Uuid) -> CoreResult<bool> {
        self.enrollments.is_enrolled(user_id, course_id).await
    }

    pub async fn enroll(&self, user_id: Uuid, course_id: Uuid) -> CoreResult<Enrollment> {
        let enrollment = self.enrollments.enroll(user_id, course_id).await?;
        self.refresh_cache(user_id).await;
        Ok(enrollment)
    }

    pub async fn unenroll(&self, user_id: Uuid, course_id: Uuid) -> CoreResult<()> {
        self.enrollments.unenroll(user_id, course_id).await?;
        self.refresh_cache(user_id).await;
        Ok(())
    }

    pub async fn current_lesson(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> CoreResult<Option<(Section, Lesson)>> {
        self.enrollments.current_lesson(user_id, course_id).await
    }

    // --- Checkout ---

    pub async fn begin_checkout(&self, user_id: Uuid, course_id: Uuid) -> CoreResult<CheckoutStart> {
        let start = self.checkout.begin(user_id, course_id).await?;
        if matches!(start, CheckoutStart::Enrolled(_)) {
            self.refresh_cache(user_id).await;
        }
        Ok(start)
    }

    pub async fn confirm_payment(
        &self,
        user_id: Uuid,
        intent_id: &str,
    ) -> CoreResult<PaymentConfirmation> {
        let confirmation = self.checkout.confirm(user_id, intent_id).await?;
        if matches!(confirmation, PaymentConfirmation::Enrolled(_)) {
            self.refresh_cache(user_id).await;
        }
        Ok(confirmation)
    }

    // --- Lesson Progress ---

    pub async fn mark_complete(&self, user_id: Uuid, course_id: Uuid, lesson_id: Uuid) -> CoreResult<()> {
        let enrollment = self.require_enrollment(user_id, course_id).await?;
        let result = self.tracker.mark_complete(enrollment.id, lesson_id).await;
        self.after_completion_change(user_id, result).await
    }

    pub async fn mark_incomplete(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        lesson_id: Uuid,
    ) -> CoreResult<()> {
        let enrollment = self.require_enrollment(user_id, course_id).await?;
        let result = self.tracker.mark_incomplete(enrollment.id, lesson_id).await;
        self.after_completion_change(user_id, result).await
    }

    /// Best-effort; nothing is reported back to the caller.
    pub async fn update_watch_progress(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        lesson_id: Uuid,
        watched_seconds: u32,
    ) {
        let enrollment = match self.enrollments.enrollment(user_id, course_id).await {
            Ok(Some(enrollment)) => enrollment,
            Ok(None) => {
                debug!(user_id = %user_id, course_id = %course_id, "Watch progress without enrollment ignored");
                self.cache.invalidate(user_id);
                return;
            }
            Err(e) => {
                warn!(user_id = %user_id, course_id = %course_id, error = %e, "Dropping watch progress update");
                return;
            }
        };

        self.tracker
            .update_watch_progress(enrollment.id, lesson_id, watched_seconds)
            .await;
        self.cache
            .patch_watch(user_id, course_id, lesson_id, self.clock.now());
    }

    /// The learner's progress on a lesson; the zero value when not enrolled or not started.
    pub async fn lesson_progress(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        lesson_id: Uuid,
    ) -> CoreResult<LessonProgress> {
        match self.enrollments.enrollment(user_id, course_id).await? {
            Some(enrollment) => self.tracker.get_progress(enrollment.id, lesson_id).await,
            None => Ok(LessonProgress::not_started(Uuid::nil(), lesson_id)),
        }
    }

    // --- Derived Views ---

    pub async fn adjacent_lessons(&self, course_id: Uuid, lesson_id: Uuid) -> CoreResult<LessonNeighbours> {
        let course = self.enrollments.load_course(course_id).await?;
        let adjacent = resolve_adjacent_lessons(&course, lesson_id);
        Ok(LessonNeighbours {
            previous: adjacent.previous.cloned(),
            next: adjacent.next.cloned(),
        })
    }

    pub async fn course_outline(&self, user_id: Uuid, course_id: Uuid) -> CoreResult<CourseOutline> {
        let course = self.enrollments.load_course(course_id).await?;
        self.outline_for(user_id, course).await
    }

    /// The curriculum view looked up by the course's public slug.
    pub async fn course_outline_by_slug(&self, user_id: Uuid, slug: &str) -> CoreResult<CourseOutline> {
        let course = self.enrollments.load_course_by_slug(slug).await?;
        self.outline_for(user_id, course).await
    }

    async fn outline_for(&self, user_id: Uuid, course: Course) -> CoreResult<CourseOutline> {
        let mut enrollment = self.enrollments.enrollment(user_id, course.id).await?;

        let progress = match &mut enrollment {
            Some(enrollment) => {
                enrollment.completed_lessons = self.tracker.verify_counter(enrollment.id).await?;
                self.tracker.list_progress(enrollment.id).await?
            }
            None => Vec::new(),
        };

        let enrolled = enrollment.is_some();
        let pointer = enrollment.as_ref().and_then(|e| e.current_lesson_id);
        let current_lesson_id = resume_point(&course, pointer).map(|(_, lesson)| lesson.id);
        let neighbours = current_lesson_id
            .map(|id| {
                let adjacent = resolve_adjacent_lessons(&course, id);
                LessonNeighbours {
                    previous: adjacent.previous.cloned(),
                    next: adjacent.next.cloned(),
                }
            })
            .unwrap_or_default();

        let lessons = lesson_sequence(&course)
            .into_iter()
            .map(|(section, lesson)| {
                let row = progress.iter().find(|row| row.lesson_id == lesson.id);
                OutlineLesson {
                    section_id: section.id,
                    lesson: lesson.clone(),
                    completed: row.is_some_and(|row| row.completed),
                    watched_seconds: row.map(|row| row.watched_seconds).unwrap_or_default(),
                    accessible: lesson.is_accessible(enrolled),
                }
            })
            .collect();

        Ok(CourseOutline {
            percent_complete: percent_complete(&course, &progress),
            current_lesson_id,
            neighbours,
            lessons,
            enrollment,
            course,
        })
    }

    /// One summary per enrolled course, most recently accessed first. Served from
    /// the enrollment cache, so enrollments changed by another instance may take
    /// up to the cache TTL to show up.
    pub async fn dashboard(&self, user_id: Uuid) -> CoreResult<Vec<CourseProgressSummary>> {
        let mut summaries = Vec::new();
        for enrollment in self.cache.enrollments(user_id).await? {
            let course = match self.enrollments.load_course(enrollment.course_id).await {
                Ok(course) => course,
                Err(CoreError::CourseNotFound(course_id)) => {
                    warn!(course_id = %course_id, enrollment_id = %enrollment.id, "Enrollment for a missing course");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let progress = self.tracker.list_progress(enrollment.id).await?;

            summaries.push(CourseProgressSummary {
                enrollment_id: enrollment.id,
                course_id: course.id,
                percent_complete: percent_complete(&course, &progress),
                total_lessons: total_lessons(&course) as u32,
                completed_lessons: enrollment.completed_lessons,
                current_lesson_id: resume_point(&course, enrollment.current_lesson_id)
                    .map(|(_, lesson)| lesson.id),
                enrolled_at: enrollment.enrolled_at,
                last_accessed: enrollment.last_accessed,
                course_slug: course.slug,
                course_title: course.title,
            });
        }
        Ok(summaries)
    }

    async fn require_enrollment(&self, user_id: Uuid, course_id: Uuid) -> CoreResult<Enrollment> {
        self.enrollments
            .enrollment(user_id, course_id)
            .await?
            .ok_or(CoreError::NotEnrolled)
    }

    /// Runs after a committed write, so a failed reload only drops the cached entry.
    async fn refresh_cache(&self, user_id: Uuid) {
        if let Err(e) = self.cache.refresh(user_id).await {
            warn!(user_id = %user_id, error = %e, "Enrollment cache refresh failed; dropping entry");
            self.cache.invalidate(user_id);
        }
    }

    async fn after_completion_change(&self, user_id: Uuid, result: CoreResult<()>) -> CoreResult<()> {
        match result {
            Ok(()) => {
                self.refresh_cache(user_id).await;
                Ok(())
            }
            Err(CoreError::NotEnrolled) => {
                // Removed elsewhere between the lookup and the write.
                self.cache.invalidate(user_id);
                Err(CoreError::NotEnrolled)
            }
            Err(e) => Err(e),
        }
    }
}
