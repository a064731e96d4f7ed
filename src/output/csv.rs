use anyhow::Result;

use crate::types::Signature;

/// Supporter export for the campaign team. Pledge-only rows are included;
/// the petition column tells them apart.
pub fn signatures_to_csv(signatures: &[Signature]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record([
        "id",
        "first_name",
        "last_name",
        "email",
        "postal_code",
        "consent_petition",
        "consent_updates",
        "created_at",
    ])?;
    for signature in signatures {
        writer.write_record([
            signature.id.to_string(),
            signature.first_name.clone(),
            signature.last_name.clone(),
            signature.email.clone(),
            signature.postal_code.clone(),
            signature.consent_petition.to_string(),
            signature.consent_updates.to_string(),
            signature.created_at.to_rfc3339(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn quotes_fields_containing_commas() {
        let signature = Signature {
            id: 9,
            first_name: "Mary, Jr".to_string(),
            last_name: "Fern".to_string(),
            email: "mary@example.com".to_string(),
            postal_code: "V8K 1A1".to_string(),
            consent_petition: true,
            consent_updates: false,
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        };
        let csv = signatures_to_csv(&[signature]).expect("csv");
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("id,first_name,last_name,email,postal_code,consent_petition,consent_updates,created_at")
        );
        assert_eq!(
            lines.next(),
            Some("9,\"Mary, Jr\",Fern,mary@example.com,V8K 1A1,true,false,2025-03-01T12:00:00+00:00")
        );
    }
}
