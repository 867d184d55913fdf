//! Shared builders for unit tests.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

use crate::domain::{Course, Lesson, LessonProgress, LessonType, Section};
use crate::memory::InMemoryDatabase;
use crate::ports::Clock;

/// A course with one section per entry, each holding that many video lessons.
/// Positions start at 1 and follow the slice order.
pub fn course_with_sections(sizes: &[usize]) -> Course {
    course_priced(sizes, 0)
}

pub fn course_priced(sizes: &[usize], price_cents: i64) -> Course {
    let course_id = Uuid::new_v4();
    let sections = sizes
        .iter()
        .enumerate()
        .map(|(section_index, &size)| {
            let section_id = Uuid::new_v4();
            Section {
                id: section_id,
                course_id,
                title: format!("Section {}", section_index + 1),
                position: section_index as i32 + 1,
                lessons: (0..size)
                    .map(|lesson_index| Lesson {
                        id: Uuid::new_v4(),
                        section_id,
                        title: format!("Lesson {}.{}", section_index + 1, lesson_index + 1),
                        position: lesson_index as i32 + 1,
                        lesson_type: LessonType::Video,
                        is_preview: false,
                        duration_seconds: Some(300),
                    })
                    .collect(),
            }
        })
        .collect();

    Course {
        id: course_id,
        slug: format!("course-{}", course_id.simple()),
        title: "Test Course".to_string(),
        description: None,
        price_cents,
        sections,
    }
}

pub fn completed_row(enrollment_id: Uuid, lesson_id: Uuid) -> LessonProgress {
    LessonProgress {
        id: Some(Uuid::new_v4()),
        enrollment_id,
        lesson_id,
        completed: true,
        watched_seconds: 0,
        last_watched: Some(Utc::now()),
    }
}

/// An in-memory store seeded with the given course.
pub fn store_with(course: &Course) -> Arc<InMemoryDatabase> {
    let db = InMemoryDatabase::new();
    db.insert_course(course.clone());
    Arc::new(db)
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
