//! crates/course_progress_core/src/completion.rs
//!
//! Pure derivations over a course's lesson tree: the course lesson sequence,
//! completion percentage and sequential navigation. Nothing here touches a port.
//!
//! The course lesson sequence orders lessons by `(section.position, lesson.position)`.
//! It is the single ordering used for "first lesson", resume and next/previous.

use std::collections::HashSet;
use uuid::Uuid;

use crate::domain::{AdjacentLessons, Course, Lesson, LessonProgress, Section};

/// Flattens the course into its lesson sequence.
///
/// Sections and lessons are sorted by position regardless of the order they
/// were loaded in; ties keep their load order.
pub fn lesson_sequence(course: &Course) -> Vec<(&Section, &Lesson)> {
    let mut sections: Vec<&Section> = course.sections.iter().collect();
    sections.sort_by_key(|section| section.position);

    sections
        .into_iter()
        .flat_map(|section| {
            let mut lessons: Vec<&Lesson> = section.lessons.iter().collect();
            lessons.sort_by_key(|lesson| lesson.position);
            lessons.into_iter().map(move |lesson| (section, lesson))
        })
        .collect()
}

pub fn total_lessons(course: &Course) -> usize {
    course.sections.iter().map(|section| section.lessons.len()).sum()
}

/// The lowest-positioned lesson of the lowest-positioned non-empty section.
pub fn first_lesson(course: &Course) -> Option<(&Section, &Lesson)> {
    lesson_sequence(course).into_iter().next()
}

pub fn locate_lesson(course: &Course, lesson_id: Uuid) -> Option<(&Section, &Lesson)> {
    course.sections.iter().find_map(|section| {
        section
            .lessons
            .iter()
            .find(|lesson| lesson.id == lesson_id)
            .map(|lesson| (section, lesson))
    })
}

/// Where a learner resumes: the pointed-to lesson, or the first lesson when the
/// pointer is missing or no longer part of the course.
pub fn resume_point(
    course: &Course,
    current_lesson_id: Option<Uuid>,
) -> Option<(&Section, &Lesson)> {
    current_lesson_id
        .and_then(|lesson_id| locate_lesson(course, lesson_id))
        .or_else(|| first_lesson(course))
}

/// Completed lessons over total lessons, rounded half-up to an integer in `0..=100`.
///
/// Each lesson of the course counts at most once; rows for lessons that are
/// not part of the course are ignored. An empty course is always 0%.
pub fn percent_complete(course: &Course, progress: &[LessonProgress]) -> u8 {
    let total = total_lessons(course) as u64;
    if total == 0 {
        return 0;
    }

    let course_lessons: HashSet<Uuid> = course
        .sections
        .iter()
        .flat_map(|section| section.lessons.iter().map(|lesson| lesson.id))
        .collect();
    let completed = progress
        .iter()
        .filter(|row| row.completed && course_lessons.contains(&row.lesson_id))
        .map(|row| row.lesson_id)
        .collect::<HashSet<_>>()
        .len() as u64;

    let percent = (200 * completed + total) / (2 * total);
    percent.min(100) as u8
}

/// The lessons immediately before and after `current_lesson_id` in the sequence.
///
/// An id that is not part of the course resolves to no neighbours at all, since
/// lesson pointers can go stale when course content changes after enrollment.
pub fn resolve_adjacent_lessons(course: &Course, current_lesson_id: Uuid) -> AdjacentLessons<'_> {
    let sequence = lesson_sequence(course);
    let Some(index) = sequence
        .iter()
        .position(|(_, lesson)| lesson.id == current_lesson_id)
    else {
        return AdjacentLessons::default();
    };

    AdjacentLessons {
        previous: index
            .checked_sub(1)
            .and_then(|i| sequence.get(i))
            .map(|(_, lesson)| *lesson),
        next: sequence.get(index + 1).map(|(_, lesson)| *lesson),
    }
}
