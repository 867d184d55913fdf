//! crates/course_progress_core/src/checkout.rs
//!
//! Payment-triggered enrollment. Free courses are joined directly; paid courses go
//! through a payment intent, and only a settled intent creates the enrollment.
//!
//! Marking the payment completed and creating the enrollment are separate writes.
//! A failure between them is recovered by confirming again: a completed payment
//! always leads to `ensure_enrolled`.

use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::completion::first_lesson;
use crate::domain::{Enrollment, Payment, PaymentMetadata, PaymentStatus};
use crate::enrollment::EnrollmentManager;
use crate::error::{CoreError, CoreResult};
use crate::ports::{Clock, DatabaseService, PaymentGateway};

#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutStart {
    /// The course was free and the learner is now enrolled.
    Enrolled(Enrollment),
    /// The client must complete the payment with `client_secret`, then confirm.
    PaymentRequired {
        payment_id: Uuid,
        intent_id: String,
        client_secret: Option<String>,
        amount_cents: i64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PaymentConfirmation {
    /// The processor has not settled the payment yet.
    Pending { status: String },
    Enrolled(Enrollment),
}

pub struct Checkout {
    db: Arc<dyn DatabaseService>,
    payments: Arc<dyn PaymentGateway>,
    enrollments: Arc<EnrollmentManager>,
    clock: Arc<dyn Clock>,
}

impl Checkout {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        payments: Arc<dyn PaymentGateway>,
        enrollments: Arc<EnrollmentManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            payments,
            enrollments,
            clock,
        }
    }

    pub async fn begin(&self, user_id: Uuid, course_id: Uuid) -> CoreResult<CheckoutStart> {
        let course = self.enrollments.load_course(course_id).await?;
        if self.enrollments.is_enrolled(user_id, course_id).await? {
            return Err(CoreError::AlreadyEnrolled { course_id });
        }
        if course.is_free() {
            let enrollment = self.enrollments.enroll(user_id, course_id).await?;
            return Ok(CheckoutStart::Enrolled(enrollment));
        }
        if first_lesson(&course).is_none() {
            return Err(CoreError::CourseHasNoLessons(course_id));
        }

        let metadata = PaymentMetadata {
            user_id,
            course_id,
            course_slug: course.slug.clone(),
        };
        let intent = self
            .payments
            .create_payment_intent(course.price_cents, metadata)
            .await?;

        let payment = Payment {
            id: Uuid::new_v4(),
            user_id,
            course_id,
            intent_id: intent.id.clone(),
            amount_cents: course.price_cents,
            status: PaymentStatus::Pending,
            payment_date: self.clock.now(),
        };
        self.db.insert_payment(payment.clone()).await?;
        info!(
            payment_id = %payment.id,
            intent_id = %intent.id,
            course_id = %course_id,
            "Checkout started"
        );

        Ok(CheckoutStart::PaymentRequired {
            payment_id: payment.id,
            intent_id: intent.id,
            client_secret: intent.client_secret,
            amount_cents: payment.amount_cents,
        })
    }

    /// Checks the intent with the processor and enrolls once it has settled.
    /// Confirming the same intent again is safe.
    pub async fn confirm(&self, user_id: Uuid, intent_id: &str) -> CoreResult<PaymentConfirmation> {
        let payment = self
            .db
            .find_payment_by_intent(intent_id)
            .await?
            .filter(|payment| payment.user_id == user_id)
            .ok_or_else(|| CoreError::PaymentNotFound(intent_id.to_string()))?;

        if payment.status == PaymentStatus::Pending {
            let intent = self.payments.retrieve_payment_intent(intent_id).await?;
            if !intent.is_settled() {
                return Ok(PaymentConfirmation::Pending {
                    status: intent.status,
                });
            }
            if intent.amount_cents != payment.amount_cents {
                return Err(CoreError::PaymentAmountMismatch {
                    expected: payment.amount_cents,
                    actual: intent.amount_cents,
                });
            }
            self.db
                .update_payment_status(payment.id, PaymentStatus::Completed, self.clock.now())
                .await?;
            info!(payment_id = %payment.id, intent_id = %intent_id, "Payment completed");
        }

        let enrollment = self
            .enrollments
            .ensure_enrolled(payment.user_id, payment.course_id)
            .await
            .inspect_err(|e| {
                error!(
                    payment_id = %payment.id,
                    error = %e,
                    "Payment completed but enrollment failed; confirm again to retry"
                )
            })?;
        Ok(PaymentConfirmation::Enrolled(enrollment))
    }
}
