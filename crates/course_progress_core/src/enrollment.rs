//! crates/course_progress_core/src/enrollment.rs
//!
//! The enrollment manager owns creation and removal of enrollments and answers
//! enrollment-state queries.

use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::completion::{first_lesson, resume_point};
use crate::domain::{Course, Enrollment, Lesson, NewEnrollment, Section};
use crate::error::{CoreError, CoreResult};
use crate::ports::{Clock, DatabaseService, PortError};

pub struct EnrollmentManager {
    db: Arc<dyn DatabaseService>,
    clock: Arc<dyn Clock>,
}

impl EnrollmentManager {
    pub fn new(db: Arc<dyn DatabaseService>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub async fn is_enrolled(&self, user_id: Uuid, course_id: Uuid) -> CoreResult<bool> {
        Ok(self.db.find_enrollment(user_id, course_id).await?.is_some())
    }

    pub async fn enrollment(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> CoreResult<Option<Enrollment>> {
        Ok(self.db.find_enrollment(user_id, course_id).await?)
    }

    /// Enrolls the user, pointing them at the first lesson of the course.
    ///
    /// Fails with `AlreadyEnrolled` when an enrollment exists, including when a
    /// concurrent call won the race to insert it.
    pub async fn enroll(&self, user_id: Uuid, course_id: Uuid) -> CoreResult<Enrollment> {
        if self.is_enrolled(user_id, course_id).await? {
            return Err(CoreError::AlreadyEnrolled { course_id });
        }

        let course = self.load_course(course_id).await?;
        let (_, lesson) =
            first_lesson(&course).ok_or(CoreError::CourseHasNoLessons(course_id))?;

        let new = NewEnrollment {
            user_id,
            course_id,
            current_lesson_id: lesson.id,
            enrolled_at: self.clock.now(),
        };
        let enrollment = self.db.insert_enrollment(new).await.map_err(|e| match e {
            PortError::Conflict(_) => CoreError::AlreadyEnrolled { course_id },
            other => CoreError::Gateway(other),
        })?;

        info!(
            enrollment_id = %enrollment.id,
            user_id = %user_id,
            course_id = %course_id,
            "Enrollment created"
        );
        Ok(enrollment)
    }

    /// Like `enroll`, but an existing enrollment is returned instead of reported.
    /// Safe to retry.
    pub async fn ensure_enrolled(&self, user_id: Uuid, course_id: Uuid) -> CoreResult<Enrollment> {
        match self.enroll(user_id, course_id).await {
            Err(CoreError::AlreadyEnrolled { .. }) => self
                .db
                .find_enrollment(user_id, course_id)
                .await?
                .ok_or(CoreError::NotEnrolled),
            other => other,
        }
    }

    /// Removes the enrollment and its progress. Unenrolling twice is not an error.
    pub async fn unenroll(&self, user_id: Uuid, course_id: Uuid) -> CoreResult<()> {
        let removed = self.db.delete_enrollment(user_id, course_id).await?;
        if removed {
            info!(user_id = %user_id, course_id = %course_id, "Enrollment removed");
        } else {
            debug!(user_id = %user_id, course_id = %course_id, "Nothing to unenroll");
        }
        Ok(())
    }

    /// The lesson the learner should resume at. Stale or missing pointers fall back
    /// to the first lesson; `None` only when the course has no lessons.
    pub async fn current_lesson(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> CoreResult<Option<(Section, Lesson)>> {
        let course = self.load_course(course_id).await?;
        let pointer = self
            .db
            .find_enrollment(user_id, course_id)
            .await?
            .and_then(|enrollment| enrollment.current_lesson_id);

        Ok(resume_point(&course, pointer)
            .map(|(section, lesson)| (section.clone(), lesson.clone())))
    }

    pub async fn load_course(&self, course_id: Uuid) -> CoreResult<Course> {
        self.db
            .get_course(course_id)
            .await?
            .ok_or(CoreError::CourseNotFound(course_id))
    }

    pub async fn load_course_by_slug(&self, slug: &str) -> CoreResult<Course> {
        self.db
            .get_course_by_slug(slug)
            .await?
            .ok_or_else(|| CoreError::UnknownCourseSlug(slug.to_string()))
    }
}
