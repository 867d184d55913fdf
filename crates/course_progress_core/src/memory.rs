//! crates/course_progress_core/src/memory.rs
//!
//! An in-memory implementation of the `DatabaseService` port.
//!
//! It honours the same constraints as the relational store: one enrollment per
//! (user, course), one progress row per (enrollment, lesson), progress rows are
//! removed with their enrollment and counter updates are atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::domain::{
    Course, Enrollment, LessonProgress, NewEnrollment, Payment, PaymentStatus,
};
use crate::ports::{DatabaseService, PortError, PortResult};

#[derive(Default)]
struct Tables {
    courses: HashMap<Uuid, Course>,
    enrollments: HashMap<Uuid, Enrollment>,
    progress: HashMap<(Uuid, Uuid), LessonProgress>,
    payments: HashMap<Uuid, Payment>,
}

impl Tables {
    fn enrollment_mut(&mut self, enrollment_id: Uuid) -> PortResult<&mut Enrollment> {
        self.enrollments
            .get_mut(&enrollment_id)
            .ok_or_else(|| PortError::NotFound(format!("Enrollment {} not found", enrollment_id)))
    }

    fn completed_count(&self, enrollment_id: Uuid) -> u32 {
        self.progress
            .values()
            .filter(|row| row.enrollment_id == enrollment_id && row.completed)
            .count() as u32
    }
}

#[derive(Default)]
pub struct InMemoryDatabase {
    tables: Mutex<Tables>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a course so it can be enrolled in.
    pub fn insert_course(&self, course: Course) {
        self.tables().courses.insert(course.id, course);
    }

    /// Test hook: overwrites the stored counter without touching progress rows.
    #[cfg(test)]
    pub(crate) fn force_completed_lessons(&self, enrollment_id: Uuid, value: u32) {
        if let Some(enrollment) = self.tables().enrollments.get_mut(&enrollment_id) {
            enrollment.completed_lessons = value;
        }
    }

    /// Test hook.
    #[cfg(test)]
    pub(crate) fn enrollment_count(&self) -> usize {
        self.tables().enrollments.len()
    }

    // Writers never panic mid-update, so a poisoned guard is still consistent.
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DatabaseService for InMemoryDatabase {
    async fn get_course(&self, course_id: Uuid) -> PortResult<Option<Course>> {
        Ok(self.tables().courses.get(&course_id).cloned())
    }

    async fn get_course_by_slug(&self, slug: &str) -> PortResult<Option<Course>> {
        Ok(self
            .tables()
            .courses
            .values()
            .find(|course| course.slug == slug)
            .cloned())
    }

    async fn find_enrollment(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> PortResult<Option<Enrollment>> {
        Ok(self
            .tables()
            .enrollments
            .values()
            .find(|e| e.user_id == user_id && e.course_id == course_id)
            .cloned())
    }

    async fn get_enrollment(&self, enrollment_id: Uuid) -> PortResult<Option<Enrollment>> {
        Ok(self.tables().enrollments.get(&enrollment_id).cloned())
    }

    async fn list_enrollments_for_user(&self, user_id: Uuid) -> PortResult<Vec<Enrollment>> {
        let mut enrollments: Vec<Enrollment> = self
            .tables()
            .enrollments
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        enrollments.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        Ok(enrollments)
    }

    async fn insert_enrollment(&self, new: NewEnrollment) -> PortResult<Enrollment> {
        let mut tables = self.tables();
        let duplicate = tables
            .enrollments
            .values()
            .any(|e| e.user_id == new.user_id && e.course_id == new.course_id);
        if duplicate {
            return Err(PortError::Conflict(format!(
                "User {} is already enrolled in course {}",
                new.user_id, new.course_id
            )));
        }

        let enrollment = Enrollment {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            course_id: new.course_id,
            enrolled_at: new.enrolled_at,
            last_accessed: new.enrolled_at,
            completed_lessons: 0,
            current_lesson_id: Some(new.current_lesson_id),
        };
        tables.enrollments.insert(enrollment.id, enrollment.clone());
        Ok(enrollment)
    }

    async fn delete_enrollment(&self, user_id: Uuid, course_id: Uuid) -> PortResult<bool> {
        let mut tables = self.tables();
        let Some(id) = tables
            .enrollments
            .values()
            .find(|e| e.user_id == user_id && e.course_id == course_id)
            .map(|e| e.id)
        else {
            return Ok(false);
        };
        tables.enrollments.remove(&id);
        tables.progress.retain(|_, row| row.enrollment_id != id);
        Ok(true)
    }

    async fn touch_enrollment(
        &self,
        enrollment_id: Uuid,
        current_lesson_id: Uuid,
        at: DateTime<Utc>,
    ) -> PortResult<()> {
        let mut tables = self.tables();
        let enrollment = tables.enrollment_mut(enrollment_id)?;
        enrollment.current_lesson_id = Some(current_lesson_id);
        enrollment.last_accessed = at;
        Ok(())
    }

    async fn adjust_completed_lessons(
        &self,
        enrollment_id: Uuid,
        delta: i32,
        current_lesson_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> PortResult<()> {
        let mut tables = self.tables();
        let enrollment = tables.enrollment_mut(enrollment_id)?;
        enrollment.completed_lessons = (enrollment.completed_lessons as i64 + delta as i64).max(0) as u32;
        enrollment.last_accessed = at;
        if let Some(lesson_id) = current_lesson_id {
            enrollment.current_lesson_id = Some(lesson_id);
        }
        Ok(())
    }

    async fn recount_completed_lessons(&self, enrollment_id: Uuid) -> PortResult<u32> {
        let mut tables = self.tables();
        let count = tables.completed_count(enrollment_id);
        tables.enrollment_mut(enrollment_id)?.completed_lessons = count;
        Ok(count)
    }

    async fn get_lesson_progress(
        &self,
        enrollment_id: Uuid,
        lesson_id: Uuid,
    ) -> PortResult<Option<LessonProgress>> {
        Ok(self
            .tables()
            .progress
            .get(&(enrollment_id, lesson_id))
            .cloned())
    }

    async fn list_lesson_progress(&self, enrollment_id: Uuid) -> PortResult<Vec<LessonProgress>> {
        Ok(self
            .tables()
            .progress
            .values()
            .filter(|row| row.enrollment_id == enrollment_id)
            .cloned()
            .collect())
    }

    async fn set_lesson_completed(
        &self,
        enrollment_id: Uuid,
        lesson_id: Uuid,
        completed: bool,
        at: DateTime<Utc>,
    ) -> PortResult<bool> {
        let mut tables = self.tables();
        tables.enrollment_mut(enrollment_id)?;

        match tables.progress.get_mut(&(enrollment_id, lesson_id)) {
            Some(row) if row.completed == completed => Ok(false),
            Some(row) => {
                row.completed = completed;
                row.last_watched = Some(at);
                Ok(true)
            }
            None if !completed => Ok(false),
            None => {
                let row = LessonProgress {
                    id: Some(Uuid::new_v4()),
                    completed: true,
                    last_watched: Some(at),
                    ..LessonProgress::not_started(enrollment_id, lesson_id)
                };
                tables.progress.insert((enrollment_id, lesson_id), row);
                Ok(true)
            }
        }
    }

    async fn upsert_watch_position(
        &self,
        enrollment_id: Uuid,
        lesson_id: Uuid,
        watched_seconds: u32,
        at: DateTime<Utc>,
    ) -> PortResult<()> {
        let mut tables = self.tables();
        tables.enrollment_mut(enrollment_id)?;

        let row = tables
            .progress
            .entry((enrollment_id, lesson_id))
            .or_insert_with(|| LessonProgress {
                id: Some(Uuid::new_v4()),
                ..LessonProgress::not_started(enrollment_id, lesson_id)
            });
        row.watched_seconds = watched_seconds;
        row.last_watched = Some(at);
        Ok(())
    }

    async fn insert_payment(&self, payment: Payment) -> PortResult<()> {
        let mut tables = self.tables();
        if tables
            .payments
            .values()
            .any(|existing| existing.intent_id == payment.intent_id)
        {
            return Err(PortError::Conflict(format!(
                "Payment for intent {} already recorded",
                payment.intent_id
            )));
        }
        tables.payments.insert(payment.id, payment);
        Ok(())
    }

    async fn find_payment_by_intent(&self, intent_id: &str) -> PortResult<Option<Payment>> {
        Ok(self
            .tables()
            .payments
            .values()
            .find(|payment| payment.intent_id == intent_id)
            .cloned())
    }

    async fn update_payment_status(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
        at: DateTime<Utc>,
    ) -> PortResult<()> {
        let mut tables = self.tables();
        let payment = tables
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| PortError::NotFound(format!("Payment {} not found", payment_id)))?;
        payment.status = status;
        payment.payment_date = at;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{course_with_sections, store_with};

    #[tokio::test]
    async fn duplicate_enrollment_is_a_conflict() {
        let course = course_with_sections(&[1]);
        let db = store_with(&course);
        let new = NewEnrollment {
            user_id: Uuid::new_v4(),
            course_id: course.id,
            current_lesson_id: course.sections[0].lessons[0].id,
            enrolled_at: Utc::now(),
        };
        db.insert_enrollment(new.clone()).await.unwrap();
        let second = db.insert_enrollment(new).await;
        assert!(matches!(second, Err(PortError::Conflict(_))));
        assert_eq!(db.enrollment_count(), 1);
    }

    #[tokio::test]
    async fn clearing_completion_never_creates_a_row() {
        let course = course_with_sections(&[1]);
        let db = store_with(&course);
        let enrollment = db
            .insert_enrollment(NewEnrollment {
                user_id: Uuid::new_v4(),
                course_id: course.id,
                current_lesson_id: course.sections[0].lessons[0].id,
                enrolled_at: Utc::now(),
            })
            .await
            .unwrap();
        let lesson_id = course.sections[0].lessons[0].id;

        let changed = db
            .set_lesson_completed(enrollment.id, lesson_id, false, Utc::now())
            .await
            .unwrap();
        assert!(!changed);
        assert!(db.get_lesson_progress(enrollment.id, lesson_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn counter_adjustments_floor_at_zero() {
        let course = course_with_sections(&[1]);
        let db = store_with(&course);
        let enrollment = db
            .insert_enrollment(NewEnrollment {
                user_id: Uuid::new_v4(),
                course_id: course.id,
                current_lesson_id: course.sections[0].lessons[0].id,
                enrolled_at: Utc::now(),
            })
            .await
            .unwrap();

        db.adjust_completed_lessons(enrollment.id, -1, None, Utc::now())
            .await
            .unwrap();
        let stored = db.get_enrollment(enrollment.id).await.unwrap().unwrap();
        assert_eq!(stored.completed_lessons, 0);
    }

    #[tokio::test]
    async fn progress_writes_require_an_enrollment() {
        let db = InMemoryDatabase::new();
        let result = db
            .upsert_watch_position(Uuid::new_v4(), Uuid::new_v4(), 10, Utc::now())
            .await;
        assert!(matches!(result, Err(PortError::NotFound(_))));
    }

    #[tokio::test]
    async fn poisoned_lock_keeps_serving() {
        let course = course_with_sections(&[1]);
        let db = store_with(&course);
        let poisoner = db.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.tables.lock().unwrap();
            panic!("poison the store");
        })
        .join();
        assert!(db.tables.is_poisoned());

        let stored = db.get_course(course.id).await.unwrap();
        assert_eq!(stored.map(|c| c.id), Some(course.id));
        db.insert_enrollment(NewEnrollment {
            user_id: Uuid::new_v4(),
            course_id: course.id,
            current_lesson_id: course.sections[0].lessons[0].id,
            enrolled_at: Utc::now(),
        })
        .await
        .unwrap();
        assert_eq!(db.enrollment_count(), 1);
    }
}
