//! services/api/src/adapters/payments.rs
//!
//! This module contains the adapter for the payment processor.
//! It implements the `PaymentGateway` port from the `core` crate against the
//! Stripe payment intents API.

use async_trait::async_trait;
use course_progress_core::domain::{PaymentIntent, PaymentMetadata};
use course_progress_core::ports::{PaymentGateway, PortError, PortResult};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{error, info};

/// The wire shape of a payment intent; only the fields the core needs.
#[derive(Debug, Deserialize)]
struct IntentResponse {
    id: String,
    client_secret: Option<String>,
    status: String,
    amount: i64,
}

impl IntentResponse {
    fn to_domain(self) -> PaymentIntent {
        PaymentIntent {
            id: self.id,
            client_secret: self.client_secret,
            status: self.status,
            amount_cents: self.amount,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// The concrete adapter for the Stripe payment intents API.
#[derive(Clone)]
pub struct StripePaymentAdapter {
    client: Client,
    base_url: String,
    secret_key: String,
    currency: String,
}

impl StripePaymentAdapter {
    /// Creates a new `StripePaymentAdapter`.
    pub fn new(base_url: &str, secret_key: String, currency: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key,
            currency,
        }
    }

    fn intents_url(&self) -> String {
        format!("{}/v1/payment_intents", self.base_url)
    }

    async fn read_intent(&self, response: reqwest::Response) -> PortResult<PaymentIntent> {
        let status = response.status();
        if status.is_success() {
            let intent = response.json::<IntentResponse>().await.map_err(|e| {
                error!("Failed to decode payment intent: {:?}", e);
                PortError::Unexpected(format!("Invalid payment intent response: {}", e))
            })?;
            return Ok(intent.to_domain());
        }

        let message = response
            .json::<ErrorEnvelope>()
            .await
            .ok()
            .and_then(|envelope| envelope.error.message)
            .unwrap_or_else(|| status.to_string());
        Err(map_status(status, message))
    }
}

fn map_status(status: StatusCode, message: String) -> PortError {
    match status {
        StatusCode::NOT_FOUND => PortError::NotFound(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PortError::Unauthorized,
        StatusCode::CONFLICT => PortError::Conflict(message),
        _ => PortError::Unexpected(format!("Payment processor returned {}: {}", status, message)),
    }
}

/// Form fields for a new payment intent, metadata included.
fn intent_form(amount_cents: i64, currency: &str, metadata: &PaymentMetadata) -> Vec<(String, String)> {
    vec![
        ("amount".to_string(), amount_cents.to_string()),
        ("currency".to_string(), currency.to_string()),
        ("automatic_payment_methods[enabled]".to_string(), "true".to_string()),
        ("metadata[user_id]".to_string(), metadata.user_id.to_string()),
        ("metadata[course_id]".to_string(), metadata.course_id.to_string()),
        ("metadata[course_slug]".to_string(), metadata.course_slug.clone()),
    ]
}

#[async_trait]
impl PaymentGateway for StripePaymentAdapter {
    async fn create_payment_intent(
        &self,
        amount_cents: i64,
        metadata: PaymentMetadata,
    ) -> PortResult<PaymentIntent> {
        info!(
            course_id = %metadata.course_id,
            amount_cents,
            "Creating payment intent"
        );
        let response = self
            .client
            .post(self.intents_url())
            .bearer_auth(&self.secret_key)
            .form(&intent_form(amount_cents, &self.currency, &metadata))
            .send()
            .await
            .map_err(|e| {
                error!("Payment processor request failed: {:?}", e);
                PortError::Unexpected(format!("Payment processor unreachable: {}", e))
            })?;
        self.read_intent(response).await
    }

    async fn retrieve_payment_intent(&self, intent_id: &str) -> PortResult<PaymentIntent> {
        let response = self
            .client
            .get(format!("{}/{}", self.intents_url(), intent_id))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| {
                error!("Payment processor request failed: {:?}", e);
                PortError::Unexpected(format!("Payment processor unreachable: {}", e))
            })?;
        self.read_intent(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn intent_response_decodes_stripe_payload() {
        let body = r#"{
            "id": "pi_3Nabc",
            "object": "payment_intent",
            "amount": 4900,
            "currency": "usd",
            "client_secret": "pi_3Nabc_secret_xyz",
            "status": "requires_payment_method"
        }"#;
        let intent = serde_json::from_str::<IntentResponse>(body).unwrap().to_domain();
        assert_eq!(intent.id, "pi_3Nabc");
        assert_eq!(intent.amount_cents, 4900);
        assert_eq!(intent.client_secret.as_deref(), Some("pi_3Nabc_secret_xyz"));
        assert!(!intent.is_settled());
    }

    #[test]
    fn form_carries_amount_currency_and_metadata() {
        let metadata = PaymentMetadata {
            user_id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            course_slug: "rust-basics".to_string(),
        };
        let form = intent_form(4900, "usd", &metadata);
        let value = |key: &str| form.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());
        assert_eq!(value("amount"), Some("4900"));
        assert_eq!(value("currency"), Some("usd"));
        assert_eq!(value("metadata[course_slug]"), Some("rust-basics"));
        assert_eq!(value("metadata[course_id]"), Some(metadata.course_id.to_string().as_str()));
    }

    #[test]
    fn processor_statuses_map_to_port_errors() {
        assert_eq!(
            map_status(StatusCode::NOT_FOUND, "No such payment_intent".to_string()),
            PortError::NotFound("No such payment_intent".to_string())
        );
        assert_eq!(map_status(StatusCode::UNAUTHORIZED, String::new()), PortError::Unauthorized);
        assert!(matches!(
            map_status(StatusCode::BAD_GATEWAY, "upstream".to_string()),
            PortError::Unexpected(_)
        ));
    }
}
