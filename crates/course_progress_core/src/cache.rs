//! crates/course_progress_core/src/cache.rs
//!
//! A per-user cache of enrollment lists for dashboards and course cards.
//!
//! Invalidation rule: infrequent writes (enroll, unenroll, completion changes,
//! payment confirmation) refresh the user's entry from the gateway; high-frequency
//! watch-progress writes patch the cached enrollment locally and never refresh.
//! Entries older than the TTL are reloaded, which bounds how long writes made by
//! other instances stay invisible. Single-enrollment checks never go through here.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::domain::Enrollment;
use crate::error::CoreResult;
use crate::ports::{Clock, DatabaseService};

/// How long a loaded enrollment list is served before it is reloaded.
pub const DEFAULT_TTL_SECS: i64 = 30;

struct CachedEnrollments {
    loaded_at: DateTime<Utc>,
    by_course: HashMap<Uuid, Enrollment>,
}

pub struct EnrollmentCache {
    db: Arc<dyn DatabaseService>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    users: RwLock<HashMap<Uuid, CachedEnrollments>>,
}

impl EnrollmentCache {
    pub fn new(db: Arc<dyn DatabaseService>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            db,
            clock,
            ttl,
            users: RwLock::new(HashMap::new()),
        }
    }

    /// All of the user's enrollments, most recently accessed first.
    pub async fn enrollments(&self, user_id: Uuid) -> CoreResult<Vec<Enrollment>> {
        let now = self.clock.now();
        let cached = self
            .users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .filter(|entry| now - entry.loaded_at < self.ttl)
            .map(|entry| entry.by_course.values().cloned().collect::<Vec<_>>());

        let mut enrollments = match cached {
            Some(enrollments) => enrollments,
            None => self.refresh(user_id).await?,
        };
        enrollments.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        Ok(enrollments)
    }

    /// Reloads the user's enrollments from the gateway.
    pub async fn refresh(&self, user_id: Uuid) -> CoreResult<Vec<Enrollment>> {
        let enrollments = self.db.list_enrollments_for_user(user_id).await?;
        let entry = CachedEnrollments {
            loaded_at: self.clock.now(),
            by_course: enrollments
                .iter()
                .map(|enrollment| (enrollment.course_id, enrollment.clone()))
                .collect(),
        };
        self.users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id, entry);
        debug!(user_id = %user_id, count = enrollments.len(), "Enrollment cache refreshed");
        Ok(enrollments)
    }

    pub fn invalidate(&self, user_id: Uuid) {
        self.users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user_id);
    }

    /// Optimistic local update after a watch-progress write.
    pub fn patch_watch(&self, user_id: Uuid, course_id: Uuid, lesson_id: Uuid, at: DateTime<Utc>) {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(enrollment) = users
            .get_mut(&user_id)
            .and_then(|entry| entry.by_course.get_mut(&course_id))
        {
            enrollment.current_lesson_id = Some(lesson_id);
            enrollment.last_accessed = at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrollment::EnrollmentManager;
    use crate::fixtures::{course_with_sections, store_with, ManualClock};
    use crate::ports::{MockDatabaseService, SystemClock};

    fn cache(db: Arc<dyn DatabaseService>, clock: Arc<dyn Clock>) -> EnrollmentCache {
        EnrollmentCache::new(db, clock, Duration::seconds(DEFAULT_TTL_SECS))
    }

    #[tokio::test]
    async fn loads_once_within_ttl() {
        let user_id = Uuid::new_v4();
        let mut db = MockDatabaseService::new();
        db.expect_list_enrollments_for_user()
            .times(1)
            .returning(|_| Ok(Vec::new()));
        let cache = cache(Arc::new(db), Arc::new(SystemClock));

        assert!(cache.enrollments(user_id).await.unwrap().is_empty());
        assert!(cache.enrollments(user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_entries_pick_up_writes_made_elsewhere() {
        let course = course_with_sections(&[1]);
        let db = store_with(&course);
        let clock = Arc::new(ManualClock::new());
        let cache = cache(db.clone(), clock.clone());
        let manager = EnrollmentManager::new(db.clone(), clock.clone());
        let user_id = Uuid::new_v4();

        assert!(cache.enrollments(user_id).await.unwrap().is_empty());
        manager.enroll(user_id, course.id).await.unwrap();
        assert!(cache.enrollments(user_id).await.unwrap().is_empty());

        clock.advance(Duration::seconds(DEFAULT_TTL_SECS));
        assert_eq!(cache.enrollments(user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn refresh_picks_up_new_enrollments() {
        let course = course_with_sections(&[1]);
        let db = store_with(&course);
        let cache = cache(db.clone(), Arc::new(SystemClock));
        let manager = EnrollmentManager::new(db.clone(), Arc::new(SystemClock));
        let user_id = Uuid::new_v4();

        assert!(cache.enrollments(user_id).await.unwrap().is_empty());
        manager.enroll(user_id, course.id).await.unwrap();
        assert_eq!(cache.refresh(user_id).await.unwrap().len(), 1);
        assert_eq!(cache.enrollments(user_id).await.unwrap().len(), 1);

        cache.invalidate(user_id);
        manager.unenroll(user_id, course.id).await.unwrap();
        assert!(cache.enrollments(user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn watch_patch_is_local_only() {
        let course = course_with_sections(&[2]);
        let db = store_with(&course);
        let cache = cache(db.clone(), Arc::new(SystemClock));
        let manager = EnrollmentManager::new(db.clone(), Arc::new(SystemClock));
        let user_id = Uuid::new_v4();
        let enrollment = manager.enroll(user_id, course.id).await.unwrap();
        cache.refresh(user_id).await.unwrap();

        let second = course.sections[0].lessons[1].id;
        cache.patch_watch(user_id, course.id, second, Utc::now());

        let cached = cache.enrollments(user_id).await.unwrap();
        assert_eq!(cached[0].current_lesson_id, Some(second));
        let stored = db.get_enrollment(enrollment.id).await.unwrap().unwrap();
        assert_eq!(stored.current_lesson_id, Some(course.sections[0].lessons[0].id));
    }
}
