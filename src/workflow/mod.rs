pub mod petition;
pub mod pledge;

use serde::Serialize;
use thiserror::Error;

pub use petition::{PetitionForm, PetitionOutcome, PetitionWorkflow};
pub use pledge::{PledgeForm, PledgeOutcome, PledgeStep, PledgeWorkflow, StepOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionPhase {
    #[default]
    Idle,
    Validating,
    Submitting,
    Succeeded,
    Failed,
}

/// Transient state of one submission surface.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SubmissionState {
    pub phase: SubmissionPhase,
    pub error: Option<String>,
}

impl SubmissionState {
    /// A user edit clears a failure; a success stays until `reset`. A failed
    /// form may also be resubmitted as is.
    pub fn on_edit(&mut self) {
        if self.phase == SubmissionPhase::Failed {
            self.phase = SubmissionPhase::Idle;
            self.error = None;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn begin(&mut self) -> Result<(), WorkflowError> {
        match self.phase {
            SubmissionPhase::Idle | SubmissionPhase::Failed => {
                self.phase = SubmissionPhase::Validating;
                self.error = None;
                Ok(())
            }
            phase => Err(WorkflowError::NotReady(phase)),
        }
    }

    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        self.phase = SubmissionPhase::Failed;
        self.error = Some(message.into());
    }

    pub(crate) fn submitting(&mut self) {
        self.phase = SubmissionPhase::Submitting;
    }

    pub(crate) fn succeed(&mut self) {
        self.phase = SubmissionPhase::Succeeded;
        self.error = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please complete first/last name, email, and postal code.")]
    MissingPetitionFields { fields: Vec<&'static str> },
    #[error("You must agree that your name can be counted toward the community petition.")]
    PetitionConsentRequired,
    #[error("Please provide your first name and email for pledge follow-up.")]
    MissingPledgeContact { fields: Vec<&'static str> },
    #[error("Please select or enter a pledge amount.")]
    InvalidPledgeAmount,
    #[error("Pledges above $10,000,000 cannot be taken online. Please contact the campaign directly.")]
    PledgeAmountTooLarge,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("form is {0:?}; edit or reset it before submitting again")]
    NotReady(SubmissionPhase),
}

pub(crate) fn blank_fields<'a>(fields: &[(&'static str, &'a str)]) -> Vec<&'static str> {
    fields
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_returns_to_idle_on_edit() {
        let mut state = SubmissionState::default();
        state.begin().expect("idle form starts");
        state.fail("nope");
        assert_eq!(state.phase, SubmissionPhase::Failed);
        state.on_edit();
        assert_eq!(state, SubmissionState::default());
    }

    #[test]
    fn success_is_sticky_until_reset() {
        let mut state = SubmissionState::default();
        state.begin().expect("idle form starts");
        state.submitting();
        state.succeed();
        state.on_edit();
        assert_eq!(state.phase, SubmissionPhase::Succeeded);
        assert_eq!(
            state.begin(),
            Err(WorkflowError::NotReady(SubmissionPhase::Succeeded))
        );
        state.reset();
        assert_eq!(state.phase, SubmissionPhase::Idle);
    }

    #[test]
    fn blank_fields_ignores_whitespace_padding() {
        let missing = blank_fields(&[("first_name", "  "), ("email", "a@b.c"), ("postal_code", "")]);
        assert_eq!(missing, vec!["first_name", "postal_code"]);
    }
}
