use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::campaign::{pledge_tier, CampaignService, PledgeRequest};
use crate::types::{NewSignature, PledgeId, SignatureId, MAX_PLEDGE_DOLLARS};
use crate::workflow::{blank_fields, SubmissionPhase, SubmissionState, ValidationError, WorkflowError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PledgeForm {
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub postal_code: String,
    /// Pledge in whole or fractional dollars.
    pub amount: f64,
}

impl PledgeForm {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let missing = blank_fields(&[
            ("first_name", self.first_name.as_str()),
            ("email", self.email.as_str()),
        ]);
        if !missing.is_empty() {
            return Err(ValidationError::MissingPledgeContact { fields: missing });
        }
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(ValidationError::InvalidPledgeAmount);
        }
        if self.amount > MAX_PLEDGE_DOLLARS {
            return Err(ValidationError::PledgeAmountTooLarge);
        }
        Ok(())
    }

    /// Pledge-only signature row: never counted on the petition, always
    /// opted in to follow-up.
    fn follow_up_signature(&self) -> NewSignature {
        NewSignature {
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            email: self.email.trim().to_string(),
            postal_code: self.postal_code.trim().to_string(),
            consent_petition: false,
            consent_updates: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PledgeStep {
    Signature,
    Pledge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    Failed { message: String },
}

/// Result of the two-write pledge path. `step` names the last write that
/// ran; a failed `Pledge` step means the signature row already exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PledgeOutcome {
    pub step: PledgeStep,
    pub outcome: StepOutcome,
    pub signature_id: Option<SignatureId>,
    pub pledge_id: Option<PledgeId>,
    pub tier: Option<String>,
}

impl PledgeOutcome {
    pub fn succeeded(&self) -> bool {
        self.outcome == StepOutcome::Succeeded
    }

    pub fn is_partial(&self) -> bool {
        self.step == PledgeStep::Pledge && !self.succeeded()
    }

    pub fn message(&self) -> Option<&str> {
        match &self.outcome {
            StepOutcome::Failed { message } => Some(message),
            StepOutcome::Succeeded => None,
        }
    }
}

pub struct PledgeWorkflow {
    service: CampaignService,
    form: PledgeForm,
    state: SubmissionState,
}

impl PledgeWorkflow {
    pub fn new(service: CampaignService) -> Self {
        Self {
            service,
            form: PledgeForm::default(),
            state: SubmissionState::default(),
        }
    }

    pub fn form(&self) -> &PledgeForm {
        &self.form
    }

    pub fn state(&self) -> &SubmissionState {
        &self.state
    }

    pub fn phase(&self) -> SubmissionPhase {
        self.state.phase
    }

    pub fn edit(&mut self, change: impl FnOnce(&mut PledgeForm)) {
        change(&mut self.form);
        self.state.on_edit();
    }

    pub fn reset(&mut self) {
        self.form = PledgeForm::default();
        self.state.reset();
    }

    pub async fn submit(&mut self) -> Result<PledgeOutcome, WorkflowError> {
        self.state.begin()?;
        if let Err(invalid) = self.form.validate() {
            self.state.fail(invalid.to_string());
            return Err(invalid.into());
        }

        self.state.submitting();
        let signature_id = match self
            .service
            .submit_signature(&self.form.follow_up_signature())
            .await
        {
            Ok(id) => id,
            Err(err) => {
                warn!("pledge contact could not be recorded: {err}");
                let message = format!("Pledge submission failed: {}", err.user_message());
                self.state.fail(message.clone());
                return Ok(PledgeOutcome {
                    step: PledgeStep::Signature,
                    outcome: StepOutcome::Failed { message },
                    signature_id: None,
                    pledge_id: None,
                    tier: None,
                });
            }
        };

        let tier = pledge_tier(self.form.amount).label.to_string();
        let request = PledgeRequest {
            amount_dollars: self.form.amount,
            tier: Some(tier.clone()),
        };
        match self.service.submit_pledge(signature_id, &request).await {
            Ok(pledge_id) => {
                info!(signature_id, pledge_id, tier = tier.as_str(), "pledge recorded");
                self.state.succeed();
                self.form = PledgeForm::default();
                Ok(PledgeOutcome {
                    step: PledgeStep::Pledge,
                    outcome: StepOutcome::Succeeded,
                    signature_id: Some(signature_id),
                    pledge_id: Some(pledge_id),
                    tier: Some(tier),
                })
            }
            Err(err) => {
                warn!(signature_id, "pledge failed after signature was recorded: {err}");
                let message = format!(
                    "Your signature was recorded but the pledge failed: {}",
                    err.user_message()
                );
                self.state.fail(message.clone());
                Ok(PledgeOutcome {
                    step: PledgeStep::Pledge,
                    outcome: StepOutcome::Failed { message },
                    signature_id: Some(signature_id),
                    pledge_id: None,
                    tier: Some(tier),
                })
            }
        }
    }
}
