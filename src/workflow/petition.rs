use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::campaign::CampaignService;
use crate::types::{NewSignature, SignatureId};
use crate::workflow::{blank_fields, SubmissionPhase, SubmissionState, ValidationError, WorkflowError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PetitionForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub postal_code: String,
    #[serde(default)]
    pub consent_petition: bool,
    #[serde(default)]
    pub consent_updates: bool,
}

impl PetitionForm {
    pub fn validate(&self) -> Result<NewSignature, ValidationError> {
        let missing = blank_fields(&[
            ("first_name", self.first_name.as_str()),
            ("last_name", self.last_name.as_str()),
            ("email", self.email.as_str()),
            ("postal_code", self.postal_code.as_str()),
        ]);
        if !missing.is_empty() {
            return Err(ValidationError::MissingPetitionFields { fields: missing });
        }
        if !self.consent_petition {
            return Err(ValidationError::PetitionConsentRequired);
        }
        Ok(NewSignature {
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            email: self.email.trim().to_string(),
            postal_code: self.postal_code.trim().to_string(),
            consent_petition: true,
            consent_updates: self.consent_updates,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PetitionOutcome {
    Signed { signature_id: SignatureId },
    Failed { message: String },
}

pub struct PetitionWorkflow {
    service: CampaignService,
    form: PetitionForm,
    state: SubmissionState,
}

impl PetitionWorkflow {
    pub fn new(service: CampaignService) -> Self {
        Self {
            service,
            form: PetitionForm::default(),
            state: SubmissionState::default(),
        }
    }

    pub fn form(&self) -> &PetitionForm {
        &self.form
    }

    pub fn state(&self) -> &SubmissionState {
        &self.state
    }

    pub fn phase(&self) -> SubmissionPhase {
        self.state.phase
    }

    pub fn edit(&mut self, change: impl FnOnce(&mut PetitionForm)) {
        change(&mut self.form);
        self.state.on_edit();
    }

    /// Back to a blank form after a thank-you.
    pub fn reset(&mut self) {
        self.form = PetitionForm::default();
        self.state.reset();
    }

    /// Validation failures return `Err` without touching the store; remote
    /// failures come back as `PetitionOutcome::Failed`.
    pub async fn submit(&mut self) -> Result<PetitionOutcome, WorkflowError> {
        self.state.begin()?;
        let signature = match self.form.validate() {
            Ok(signature) => signature,
            Err(invalid) => {
                self.state.fail(invalid.to_string());
                return Err(invalid.into());
            }
        };

        self.state.submitting();
        match self.service.submit_signature(&signature).await {
            Ok(signature_id) => {
                info!(signature_id, "petition signed");
                self.state.succeed();
                Ok(PetitionOutcome::Signed { signature_id })
            }
            Err(err) => {
                warn!("petition submission failed: {err}");
                let message = err.user_message();
                self.state.fail(message.clone());
                Ok(PetitionOutcome::Failed { message })
            }
        }
    }
}
