//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use course_progress_core::domain::{
    Course, Enrollment, Lesson, LessonProgress, NewEnrollment, Payment, PaymentStatus, Section,
};
use course_progress_core::ports::{DatabaseService, PortError, PortResult};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    async fn load_tree(&self, record: CourseRecord) -> PortResult<Course> {
        let sections = sqlx::query_as::<_, SectionRecord>(
            "SELECT id, course_id, title, position FROM sections WHERE course_id = $1 ORDER BY position",
        )
        .bind(record.id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let lessons = sqlx::query_as::<_, LessonRecord>(
            "SELECT l.id, l.section_id, l.title, l.position, l.lesson_type, l.is_preview, l.duration_seconds
             FROM lessons l JOIN sections s ON s.id = l.section_id
             WHERE s.course_id = $1
             ORDER BY s.position, l.position",
        )
        .bind(record.id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let mut sections: Vec<Section> = sections.into_iter().map(SectionRecord::to_domain).collect();
        for lesson in lessons {
            let lesson = lesson.to_domain()?;
            if let Some(section) = sections.iter_mut().find(|s| s.id == lesson.section_id) {
                section.lessons.push(lesson);
            }
        }
        Ok(record.to_domain(sections))
    }
}

/// Maps driver errors onto the port's error kinds.
fn map_sqlx(e: sqlx::Error) -> PortError {
    match &e {
        sqlx::Error::RowNotFound => PortError::NotFound(e.to_string()),
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            PortError::Conflict(db.message().to_string())
        }
        // Progress rows reference their enrollment.
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            PortError::NotFound(db.message().to_string())
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn not_found_unless_affected(rows_affected: u64, what: String) -> PortResult<()> {
    if rows_affected == 0 {
        Err(PortError::NotFound(what))
    } else {
        Ok(())
    }
}

fn to_db_seconds(seconds: u32) -> i32 {
    i32::try_from(seconds).unwrap_or(i32::MAX)
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct CourseRecord {
    id: Uuid,
    slug: String,
    title: String,
    description: Option<String>,
    price_cents: i64,
}
impl CourseRecord {
    fn to_domain(self, sections: Vec<Section>) -> Course {
        Course {
            id: self.id,
            slug: self.slug,
            title: self.title,
            description: self.description,
            price_cents: self.price_cents,
            sections,
        }
    }
}

#[derive(FromRow)]
struct SectionRecord {
    id: Uuid,
    course_id: Uuid,
    title: String,
    position: i32,
}
impl SectionRecord {
    fn to_domain(self) -> Section {
        Section {
            id: self.id,
            course_id: self.course_id,
            title: self.title,
            position: self.position,
            lessons: Vec::new(),
        }
    }
}

#[derive(FromRow)]
struct LessonRecord {
    id: Uuid,
    section_id: Uuid,
    title: String,
    position: i32,
    lesson_type: String,
    is_preview: bool,
    duration_seconds: Option<i32>,
}
impl LessonRecord {
    fn to_domain(self) -> PortResult<Lesson> {
        Ok(Lesson {
            id: self.id,
            section_id: self.section_id,
            title: self.title,
            position: self.position,
            lesson_type: self.lesson_type.parse().map_err(PortError::Unexpected)?,
            is_preview: self.is_preview,
            duration_seconds: self.duration_seconds,
        })
    }
}

#[derive(FromRow)]
struct EnrollmentRecord {
    id: Uuid,
    user_id: Uuid,
    course_id: Uuid,
    enrolled_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    completed_lessons: i32,
    current_lesson_id: Option<Uuid>,
}
impl EnrollmentRecord {
    fn to_domain(self) -> Enrollment {
        Enrollment {
            id: self.id,
            user_id: self.user_id,
            course_id: self.course_id,
            enrolled_at: self.enrolled_at,
            last_accessed: self.last_accessed,
            completed_lessons: self.completed_lessons.max(0) as u32,
            current_lesson_id: self.current_lesson_id,
        }
    }
}

#[derive(FromRow)]
struct LessonProgressRecord {
    id: Uuid,
    enrollment_id: Uuid,
    lesson_id: Uuid,
    completed: bool,
    watched_seconds: i32,
    last_watched: Option<DateTime<Utc>>,
}
impl LessonProgressRecord {
    fn to_domain(self) -> LessonProgress {
        LessonProgress {
            id: Some(self.id),
            enrollment_id: self.enrollment_id,
            lesson_id: self.lesson_id,
            completed: self.completed,
            watched_seconds: self.watched_seconds.max(0) as u32,
            last_watched: self.last_watched,
        }
    }
}

#[derive(FromRow)]
struct PaymentRecord {
    id: Uuid,
    user_id: Uuid,
    course_id: Uuid,
    intent_id: String,
    amount_cents: i64,
    status: String,
    payment_date: DateTime<Utc>,
}
impl PaymentRecord {
    fn to_domain(self) -> PortResult<Payment> {
        Ok(Payment {
            id: self.id,
            user_id: self.user_id,
            course_id: self.course_id,
            intent_id: self.intent_id,
            amount_cents: self.amount_cents,
            status: self.status.parse().map_err(PortError::Unexpected)?,
            payment_date: self.payment_date,
        })
    }
}

const ENROLLMENT_COLUMNS: &str =
    "id, user_id, course_id, enrolled_at, last_accessed, completed_lessons, current_lesson_id";
const PROGRESS_COLUMNS: &str =
    "id, enrollment_id, lesson_id, completed, watched_seconds, last_watched";
const PAYMENT_COLUMNS: &str =
    "id, user_id, course_id, intent_id, amount_cents, status, payment_date";

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn get_course(&self, course_id: Uuid) -> PortResult<Option<Course>> {
        let record = sqlx::query_as::<_, CourseRecord>(
            "SELECT id, slug, title, description, price_cents FROM courses WHERE id = $1",
        )
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        match record {
            Some(record) => self.load_tree(record).await.map(Some),
            None => Ok(None),
        }
    }

    async fn get_course_by_slug(&self, slug: &str) -> PortResult<Option<Course>> {
        let record = sqlx::query_as::<_, CourseRecord>(
            "SELECT id, slug, title, description, price_cents FROM courses WHERE slug = $1",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        match record {
            Some(record) => self.load_tree(record).await.map(Some),
            None => Ok(None),
        }
    }

    async fn find_enrollment(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> PortResult<Option<Enrollment>> {
        let record = sqlx::query_as::<_, EnrollmentRecord>(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE user_id = $1 AND course_id = $2"
        ))
        .bind(user_id)
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(record.map(EnrollmentRecord::to_domain))
    }

    async fn get_enrollment(&self, enrollment_id: Uuid) -> PortResult<Option<Enrollment>> {
        let record = sqlx::query_as::<_, EnrollmentRecord>(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE id = $1"
        ))
        .bind(enrollment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(record.map(EnrollmentRecord::to_domain))
    }

    async fn list_enrollments_for_user(&self, user_id: Uuid) -> PortResult<Vec<Enrollment>> {
        let records = sqlx::query_as::<_, EnrollmentRecord>(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE user_id = $1 ORDER BY last_accessed DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(records.into_iter().map(EnrollmentRecord::to_domain).collect())
    }

    async fn insert_enrollment(&self, enrollment: NewEnrollment) -> PortResult<Enrollment> {
        // The (user_id, course_id) unique constraint turns a lost race into a Conflict.
        let record = sqlx::query_as::<_, EnrollmentRecord>(&format!(
            "INSERT INTO enrollments (id, user_id, course_id, enrolled_at, last_accessed, completed_lessons, current_lesson_id)
             VALUES ($1, $2, $3, $4, $4, 0, $5)
             RETURNING {ENROLLMENT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(enrollment.user_id)
        .bind(enrollment.course_id)
        .bind(enrollment.enrolled_at)
        .bind(enrollment.current_lesson_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(record.to_domain())
    }

    async fn delete_enrollment(&self, user_id: Uuid, course_id: Uuid) -> PortResult<bool> {
        // lesson_progress rows go with it through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM enrollments WHERE user_id = $1 AND course_id = $2")
            .bind(user_id)
            .bind(course_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch_enrollment(
        &self,
        enrollment_id: Uuid,
        current_lesson_id: Uuid,
        at: DateTime<Utc>,
    ) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE enrollments SET current_lesson_id = $2, last_accessed = $3 WHERE id = $1",
        )
        .bind(enrollment_id)
        .bind(current_lesson_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        not_found_unless_affected(
            result.rows_affected(),
            format!("Enrollment {} not found", enrollment_id),
        )
    }

    async fn adjust_completed_lessons(
        &self,
        enrollment_id: Uuid,
        delta: i32,
        current_lesson_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE enrollments
             SET completed_lessons = GREATEST(completed_lessons + $2, 0),
                 last_accessed = $3,
                 current_lesson_id = COALESCE($4, current_lesson_id)
             WHERE id = $1",
        )
        .bind(enrollment_id)
        .bind(delta)
        .bind(at)
        .bind(current_lesson_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        not_found_unless_affected(
            result.rows_affected(),
            format!("Enrollment {} not found", enrollment_id),
        )
    }

    async fn recount_completed_lessons(&self, enrollment_id: Uuid) -> PortResult<u32> {
        let count = sqlx::query_scalar::<_, i32>(
            "UPDATE enrollments e
             SET completed_lessons = (
                 SELECT count(*) FROM lesson_progress p
                 WHERE p.enrollment_id = e.id AND p.completed
             )
             WHERE e.id = $1
             RETURNING e.completed_lessons",
        )
        .bind(enrollment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?
        .ok_or_else(|| PortError::NotFound(format!("Enrollment {} not found", enrollment_id)))?;
        Ok(count.max(0) as u32)
    }

    async fn get_lesson_progress(
        &self,
        enrollment_id: Uuid,
        lesson_id: Uuid,
    ) -> PortResult<Option<LessonProgress>> {
        let record = sqlx::query_as::<_, LessonProgressRecord>(&format!(
            "SELECT {PROGRESS_COLUMNS} FROM lesson_progress WHERE enrollment_id = $1 AND lesson_id = $2"
        ))
        .bind(enrollment_id)
        .bind(lesson_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(record.map(LessonProgressRecord::to_domain))
    }

    async fn list_lesson_progress(&self, enrollment_id: Uuid) -> PortResult<Vec<LessonProgress>> {
        let records = sqlx::query_as::<_, LessonProgressRecord>(&format!(
            "SELECT {PROGRESS_COLUMNS} FROM lesson_progress WHERE enrollment_id = $1"
        ))
        .bind(enrollment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(records.into_iter().map(LessonProgressRecord::to_domain).collect())
    }

    async fn set_lesson_completed(
        &self,
        enrollment_id: Uuid,
        lesson_id: Uuid,
        completed: bool,
        at: DateTime<Utc>,
    ) -> PortResult<bool> {
        // Both statements only return a row when the flag actually flips.
        let flipped = if completed {
            sqlx::query_scalar::<_, Uuid>(
                "INSERT INTO lesson_progress (id, enrollment_id, lesson_id, completed, watched_seconds, last_watched)
                 VALUES ($1, $2, $3, TRUE, 0, $4)
                 ON CONFLICT (enrollment_id, lesson_id) DO UPDATE
                 SET completed = TRUE, last_watched = EXCLUDED.last_watched
                 WHERE lesson_progress.completed = FALSE
                 RETURNING id",
            )
            .bind(Uuid::new_v4())
            .bind(enrollment_id)
            .bind(lesson_id)
            .bind(at)
            .fetch_optional(&self.pool)
            .await
        } else {
            sqlx::query_scalar::<_, Uuid>(
                "UPDATE lesson_progress SET completed = FALSE, last_watched = $3
                 WHERE enrollment_id = $1 AND lesson_id = $2 AND completed = TRUE
                 RETURNING id",
            )
            .bind(enrollment_id)
            .bind(lesson_id)
            .bind(at)
            .fetch_optional(&self.pool)
            .await
        }
        .map_err(map_sqlx)?;
        Ok(flipped.is_some())
    }

    async fn upsert_watch_position(
        &self,
        enrollment_id: Uuid,
        lesson_id: Uuid,
        watched_seconds: u32,
        at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO lesson_progress (id, enrollment_id, lesson_id, completed, watched_seconds, last_watched)
             VALUES ($1, $2, $3, FALSE, $4, $5)
             ON CONFLICT (enrollment_id, lesson_id) DO UPDATE
             SET watched_seconds = EXCLUDED.watched_seconds, last_watched = EXCLUDED.last_watched",
        )
        .bind(Uuid::new_v4())
        .bind(enrollment_id)
        .bind(lesson_id)
        .bind(to_db_seconds(watched_seconds))
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn insert_payment(&self, payment: Payment) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO payments (id, user_id, course_id, intent_id, amount_cents, status, payment_date)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(payment.id)
        .bind(payment.user_id)
        .bind(payment.course_id)
        .bind(&payment.intent_id)
        .bind(payment.amount_cents)
        .bind(payment.status.as_str())
        .bind(payment.payment_date)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn find_payment_by_intent(&self, intent_id: &str) -> PortResult<Option<Payment>> {
        let record = sqlx::query_as::<_, PaymentRecord>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE intent_id = $1"
        ))
        .bind(intent_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        record.map(PaymentRecord::to_domain).transpose()
    }

    async fn update_payment_status(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
        at: DateTime<Utc>,
    ) -> PortResult<()> {
        let result = sqlx::query("UPDATE payments SET status = $2, payment_date = $3 WHERE id = $1")
            .bind(payment_id)
            .bind(status.as_str())
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        not_found_unless_affected(
            result.rows_affected(),
            format!("Payment {} not found", payment_id),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use course_progress_core::domain::LessonType;

    #[test]
    fn lesson_records_reject_unknown_types() {
        let record = LessonRecord {
            id: Uuid::new_v4(),
            section_id: Uuid::new_v4(),
            title: "Wrap-up".to_string(),
            position: 1,
            lesson_type: "livestream".to_string(),
            is_preview: false,
            duration_seconds: None,
        };
        assert!(matches!(record.to_domain(), Err(PortError::Unexpected(_))));
    }

    #[test]
    fn lesson_records_map_to_domain() {
        let record = LessonRecord {
            id: Uuid::new_v4(),
            section_id: Uuid::new_v4(),
            title: "Quiz 1".to_string(),
            position: 3,
            lesson_type: "quiz".to_string(),
            is_preview: true,
            duration_seconds: Some(600),
        };
        let lesson = record.to_domain().unwrap();
        assert_eq!(lesson.lesson_type, LessonType::Quiz);
        assert!(lesson.is_preview);
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        assert!(matches!(map_sqlx(sqlx::Error::RowNotFound), PortError::NotFound(_)));
        assert!(matches!(map_sqlx(sqlx::Error::PoolTimedOut), PortError::Unexpected(_)));
    }

    #[test]
    fn watch_positions_saturate() {
        assert_eq!(to_db_seconds(42), 42);
        assert_eq!(to_db_seconds(u32::MAX), i32::MAX);
    }

    #[test]
    fn lesson_pointers_are_not_foreign_keys() {
        let schema = include_str!("../../migrations/0001_init.sql");
        for column in ["current_lesson_id UUID", "lesson_id UUID NOT NULL"] {
            let line = schema
                .lines()
                .find(|line| line.trim_start().starts_with(column))
                .unwrap();
            assert!(!line.contains("REFERENCES"), "{line}");
        }
    }
}
