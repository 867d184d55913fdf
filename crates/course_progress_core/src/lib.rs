pub mod cache;
pub mod checkout;
pub mod completion;
pub mod domain;
pub mod enrollment;
pub mod error;
pub mod memory;
pub mod ports;
pub mod progress;
pub mod service;

#[cfg(test)]
mod fixtures;

pub use checkout::{CheckoutStart, PaymentConfirmation};
pub use domain::{
    AdjacentLessons, Course, Enrollment, Lesson, LessonProgress, LessonType, Payment,
    PaymentIntent, PaymentMetadata, PaymentStatus, Section,
};
pub use error::{CoreError, CoreResult};
pub use ports::{Clock, DatabaseService, PaymentGateway, PortError, PortResult, SystemClock};
pub use service::{CourseOutline, CourseProgressSummary, LessonNeighbours, OutlineLesson, ProgressService};
