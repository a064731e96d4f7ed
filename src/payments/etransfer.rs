use serde::Serialize;

use crate::config::EtransferConfig;

/// What the e-Transfer panel shows. Bank transfers bypass card fees, so
/// the whole amount reaches the society.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EtransferInstructions {
    pub recipient_email: String,
    pub recipient_name: String,
    pub steps: Vec<String>,
    pub fee_note: String,
    pub receipt_note: String,
}

pub fn etransfer_instructions(config: &EtransferConfig) -> EtransferInstructions {
    EtransferInstructions {
        recipient_email: config.recipient_email.clone(),
        recipient_name: config.recipient_name.clone(),
        steps: vec![
            "Log in to your online banking or mobile banking app".to_string(),
            "Select \"Interac e-Transfer\" or \"Send Money\"".to_string(),
            format!("Send to {}", config.recipient_email),
            "Enter your donation amount and include your name and email in the message \
             (so the Society can send you a confirmation)"
                .to_string(),
            "Complete the transfer; no security question required (auto-deposit enabled)"
                .to_string(),
        ],
        fee_note: "Zero fees means 100% goes to the project!".to_string(),
        receipt_note: "The Society cannot yet issue tax receipts. All e-Transfer donations \
                       are tracked for future tax receipt issuance when available."
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_name_the_configured_recipient() {
        let config = EtransferConfig {
            recipient_email: "treasurer@example.org".to_string(),
            recipient_name: "Arena Society".to_string(),
        };
        let panel = etransfer_instructions(&config);
        assert_eq!(panel.recipient_email, "treasurer@example.org");
        assert_eq!(panel.steps.len(), 5);
        assert_eq!(panel.steps[2], "Send to treasurer@example.org");
    }
}
