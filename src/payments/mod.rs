pub mod etransfer;
pub mod stripe;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

pub use etransfer::{etransfer_instructions, EtransferInstructions};
pub use stripe::StripeClient;

/// Smallest charge the card processor accepts, in cents.
pub const MIN_DONATION_CENTS: i64 = 50;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DonationRequest {
    /// Amount in cents.
    pub amount_cents: i64,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentIntent {
    pub client_secret: String,
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Amount must be at least $0.50 CAD")]
    AmountTooSmall,
    #[error("Name and email are required")]
    MissingDonor,
    #[error("card payments are not configured")]
    NotConfigured,
    #[error("{message}")]
    Declined { status: u16, message: String },
    #[error("payment processor unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected payment processor response: {0}")]
    Malformed(String),
}

impl PaymentError {
    /// Errors the donor can fix by changing the request.
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Self::AmountTooSmall | Self::MissingDonor)
    }
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_intent(&self, request: &DonationRequest) -> Result<PaymentIntent, PaymentError>;
}

pub fn validate_donation(request: &DonationRequest) -> Result<(), PaymentError> {
    if request.amount_cents < MIN_DONATION_CENTS {
        return Err(PaymentError::AmountTooSmall);
    }
    if request.name.trim().is_empty() || request.email.trim().is_empty() {
        return Err(PaymentError::MissingDonor);
    }
    Ok(())
}

/// Validates locally, then asks the processor for a client confirmation
/// token. Invalid requests never reach the processor.
pub async fn create_donation_intent(
    processor: &dyn PaymentProcessor,
    request: &DonationRequest,
) -> Result<PaymentIntent, PaymentError> {
    validate_donation(request)?;
    match processor.create_intent(request).await {
        Ok(intent) => {
            info!(amount_cents = request.amount_cents, "payment intent created");
            Ok(intent)
        }
        Err(err) => {
            error!("error creating payment intent: {err}");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[derive(Default)]
    struct CountingProcessor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PaymentProcessor for CountingProcessor {
        async fn create_intent(
            &self,
            _request: &DonationRequest,
        ) -> Result<PaymentIntent, PaymentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PaymentIntent {
                client_secret: "pi_123_secret_abc".to_string(),
            })
        }
    }

    fn request(amount_cents: i64, name: &str, email: &str) -> DonationRequest {
        DonationRequest {
            amount_cents,
            name: name.to_string(),
            email: email.to_string(),
        }
    }

    #[tokio::test]
    async fn below_minimum_never_reaches_the_processor() {
        let processor = CountingProcessor::default();
        let err = assert_err!(create_donation_intent(&processor, &request(49, "Ann", "ann@example.com")).await);
        assert_eq!(err.to_string(), "Amount must be at least $0.50 CAD");
        assert!(err.is_invalid_request());
        assert_eq!(processor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn donor_details_are_required() {
        let processor = CountingProcessor::default();
        let err = assert_err!(create_donation_intent(&processor, &request(5_000, " ", "ann@example.com")).await);
        assert_eq!(err.to_string(), "Name and email are required");
        assert_eq!(processor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn valid_request_returns_client_secret() {
        let processor = CountingProcessor::default();
        let intent = assert_ok!(create_donation_intent(&processor, &request(50, "Ann", "ann@example.com")).await);
        assert_eq!(intent.client_secret, "pi_123_secret_abc");
        assert_eq!(processor.calls.load(Ordering::SeqCst), 1);
    }
}
