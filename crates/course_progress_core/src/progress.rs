//! crates/course_progress_core/src/progress.rs
//!
//! The lesson progress tracker owns per-lesson watch/completion state and keeps the
//! enrollment's `completed_lessons` counter equal to the number of completed rows.
//!
//! Completion changes are two writes: the progress row flip, then an atomic counter
//! delta at the gateway. The counter delta is only applied when the flip actually
//! happened, which makes repeated calls idempotent. If the counter write fails after
//! the flip, the counter is re-derived from the rows before reporting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{Enrollment, LessonProgress};
use crate::error::{CoreError, CoreResult};
use crate::ports::{Clock, DatabaseService, PortError};

//=========================================================================================
// Per-(enrollment, lesson) serialisation
//=========================================================================================

/// Hands out one FIFO async lock per (enrollment, lesson) pair so completion
/// changes for the same lesson apply in the order they were issued.
#[derive(Default)]
struct PairLocks {
    locks: Mutex<HashMap<(Uuid, Uuid), Arc<AsyncMutex<()>>>>,
}

impl PairLocks {
    async fn acquire(&self, enrollment_id: Uuid, lesson_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries only referenced by the map have no holder and no waiter.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry((enrollment_id, lesson_id)).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn tracked_pairs(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

//=========================================================================================
// Tracker
//=========================================================================================

pub struct LessonProgressTracker {
    db: Arc<dyn DatabaseService>,
    clock: Arc<dyn Clock>,
    pair_locks: PairLocks,
}

impl LessonProgressTracker {
    pub fn new(db: Arc<dyn DatabaseService>, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            clock,
            pair_locks: PairLocks::default(),
        }
    }

    /// Marks the lesson completed. Completing an already completed lesson is a no-op.
    pub async fn mark_complete(&self, enrollment_id: Uuid, lesson_id: Uuid) -> CoreResult<()> {
        let _guard = self.pair_locks.acquire(enrollment_id, lesson_id).await;
        self.require_enrollment(enrollment_id).await?;

        let now = self.clock.now();
        let changed = self
            .db
            .set_lesson_completed(enrollment_id, lesson_id, true, now)
            .await
            .map_err(missing_enrollment)?;
        if !changed {
            debug!(enrollment_id = %enrollment_id, lesson_id = %lesson_id, "Lesson already completed");
            return Ok(());
        }

        self.apply_counter_delta(enrollment_id, 1, Some(lesson_id))
            .await
    }

    /// Clears the completed flag. A lesson that is not completed is left alone.
    pub async fn mark_incomplete(&self, enrollment_id: Uuid, lesson_id: Uuid) -> CoreResult<()> {
        let _guard = self.pair_locks.acquire(enrollment_id, lesson_id).await;
        self.require_enrollment(enrollment_id).await?;

        let now = self.clock.now();
        let changed = self
            .db
            .set_lesson_completed(enrollment_id, lesson_id, false, now)
            .await
            .map_err(missing_enrollment)?;
        if !changed {
            debug!(enrollment_id = %enrollment_id, lesson_id = %lesson_id, "Lesson was not completed");
            return Ok(());
        }

        self.apply_counter_delta(enrollment_id, -1, None).await
    }

    /// Best-effort playback position update. Failures are logged, never returned.
    pub async fn update_watch_progress(
        &self,
        enrollment_id: Uuid,
        lesson_id: Uuid,
        watched_seconds: u32,
    ) {
        if let Err(e) = self
            .record_watch_position(enrollment_id, lesson_id, watched_seconds)
            .await
        {
            warn!(
                enrollment_id = %enrollment_id,
                lesson_id = %lesson_id,
                error = %e,
                "Dropping watch progress update"
            );
        }
    }

    /// The fallible half of `update_watch_progress`.
    pub async fn record_watch_position(
        &self,
        enrollment_id: Uuid,
        lesson_id: Uuid,
        watched_seconds: u32,
    ) -> CoreResult<()> {
        let now = self.clock.now();
        self.db
            .upsert_watch_position(enrollment_id, lesson_id, watched_seconds, now)
            .await
            .map_err(missing_enrollment)?;
        self.db
            .touch_enrollment(enrollment_id, lesson_id, now)
            .await
            .map_err(missing_enrollment)?;
        Ok(())
    }

    /// The stored progress, or the not-started zero value when there is no row.
    pub async fn get_progress(
        &self,
        enrollment_id: Uuid,
        lesson_id: Uuid,
    ) -> CoreResult<LessonProgress> {
        Ok(self
            .db
            .get_lesson_progress(enrollment_id, lesson_id)
            .await?
            .unwrap_or_else(|| LessonProgress::not_started(enrollment_id, lesson_id)))
    }

    pub async fn list_progress(&self, enrollment_id: Uuid) -> CoreResult<Vec<LessonProgress>> {
        Ok(self.db.list_lesson_progress(enrollment_id).await?)
    }

    /// Re-derives the counter from the progress rows and returns it.
    pub async fn reconcile(&self, enrollment_id: Uuid) -> CoreResult<u32> {
        let count = self
            .db
            .recount_completed_lessons(enrollment_id)
            .await
            .map_err(missing_enrollment)?;
        info!(enrollment_id = %enrollment_id, completed_lessons = count, "Completion counter re-derived");
        Ok(count)
    }

    /// Compares the stored counter with the completed rows and repairs drift.
    /// Returns the consistent count.
    pub async fn verify_counter(&self, enrollment_id: Uuid) -> CoreResult<u32> {
        let enrollment = self.require_enrollment(enrollment_id).await?;
        let completed = self
            .db
            .list_lesson_progress(enrollment_id)
            .await?
            .iter()
            .filter(|row| row.completed)
            .count() as u32;

        if completed == enrollment.completed_lessons {
            return Ok(completed);
        }
        warn!(
            enrollment_id = %enrollment_id,
            stored = enrollment.completed_lessons,
            actual = completed,
            "Completion counter drifted"
        );
        self.reconcile(enrollment_id).await
    }

    async fn require_enrollment(&self, enrollment_id: Uuid) -> CoreResult<Enrollment> {
        self.db
            .get_enrollment(enrollment_id)
            .await?
            .ok_or(CoreError::NotEnrolled)
    }

    async fn apply_counter_delta(
        &self,
        enrollment_id: Uuid,
        delta: i32,
        current_lesson_id: Option<Uuid>,
    ) -> CoreResult<()> {
        let now = self.clock.now();
        let Err(e) = self
            .db
            .adjust_completed_lessons(enrollment_id, delta, current_lesson_id, now)
            .await
        else {
            return Ok(());
        };

        warn!(
            enrollment_id = %enrollment_id,
            error = %e,
            "Counter update failed after progress write, re-deriving"
        );
        match self.reconcile(enrollment_id).await {
            Ok(_) => Ok(()),
            Err(_) => Err(missing_enrollment(e)),
        }
    }
}

/// A gateway `NotFound` on a progress write means the enrollment is gone.
fn missing_enrollment(e: PortError) -> CoreError {
    match e {
        PortError::NotFound(_) => CoreError::NotEnrolled,
        other => CoreError::Gateway(other),
    }
}
