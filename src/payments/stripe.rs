use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::PaymentsConfig;
use crate::http::{read_body, HttpFailure, HTTP_CLIENT};
use crate::payments::{DonationRequest, PaymentError, PaymentIntent, PaymentProcessor};

#[derive(Debug, Deserialize)]
struct IntentResponse {
    client_secret: Option<String>,
}

pub struct StripeClient {
    client: Client,
    api_base: String,
    secret_key: String,
    currency: String,
    description: String,
    project: String,
}

impl StripeClient {
    pub fn new(config: &PaymentsConfig) -> Self {
        Self {
            client: HTTP_CLIENT.clone(),
            api_base: config.stripe_api_base.trim_end_matches('/').to_string(),
            secret_key: config.stripe_secret_key.clone(),
            currency: config.currency.clone(),
            description: config.description.clone(),
            project: config.project.clone(),
        }
    }

    fn form(&self, request: &DonationRequest) -> Vec<(&'static str, String)> {
        vec![
            ("amount", request.amount_cents.to_string()),
            ("currency", self.currency.clone()),
            ("description", self.description.clone()),
            ("receipt_email", request.email.trim().to_string()),
            ("metadata[donor_name]", request.name.trim().to_string()),
            ("metadata[donor_email]", request.email.trim().to_string()),
            ("metadata[project]", self.project.clone()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ]
    }
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    async fn create_intent(&self, request: &DonationRequest) -> Result<PaymentIntent, PaymentError> {
        if self.secret_key.trim().is_empty() {
            return Err(PaymentError::NotConfigured);
        }
        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.api_base))
            .basic_auth(&self.secret_key, Some(""))
            .form(&self.form(request))
            .send()
            .await?;
        let body = read_body(response).await.map_err(|failure| match failure {
            HttpFailure::Transport(error) => PaymentError::Transport(error),
            HttpFailure::Status { status, message } => PaymentError::Declined { status, message },
        })?;
        let parsed: IntentResponse =
            serde_json::from_str(&body).map_err(|err| PaymentError::Malformed(err.to_string()))?;
        parsed
            .client_secret
            .filter(|secret| !secret.is_empty())
            .map(|client_secret| PaymentIntent { client_secret })
            .ok_or_else(|| PaymentError::Malformed("missing client_secret".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_carries_donor_metadata_and_cad_currency() {
        let client = StripeClient::new(&PaymentsConfig::default());
        let form = client.form(&DonationRequest {
            amount_cents: 2_500,
            name: " Ann Lee ".to_string(),
            email: "ann@example.com".to_string(),
        });
        let get = |key: &str| {
            form.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("amount"), Some("2500"));
        assert_eq!(get("currency"), Some("cad"));
        assert_eq!(get("metadata[donor_name]"), Some("Ann Lee"));
        assert_eq!(get("metadata[project]"), Some("SSI Arena"));
        assert_eq!(get("automatic_payment_methods[enabled]"), Some("true"));
    }

    #[tokio::test]
    async fn refuses_without_secret_key() {
        let client = StripeClient::new(&PaymentsConfig::default());
        let result = client
            .create_intent(&DonationRequest {
                amount_cents: 1_000,
                name: "Ann".to_string(),
                email: "ann@example.com".to_string(),
            })
            .await;
        assert!(matches!(result, Err(PaymentError::NotConfigured)));
    }
}
