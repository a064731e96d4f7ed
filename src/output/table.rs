use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Row, Table};

use crate::campaign::PledgeTier;
use crate::notify::broadcast::BroadcastReport;
use crate::progress::ProgressData;
use crate::types::{CampaignStats, Signature};

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(header);
    table
}

fn percent_cell(percent: f64) -> Cell {
    let cell = Cell::new(format!("{percent:.0}%"));
    if percent >= 100.0 {
        cell.fg(Color::Green)
    } else {
        cell
    }
}

pub fn render_progress_table(progress: &ProgressData) -> String {
    let mut table = new_table(vec!["Meter", "Current", "Goal", "Progress"]);
    table.add_row(Row::from(vec![
        Cell::new("Signatures"),
        Cell::new(progress.signatures.to_string()),
        Cell::new(progress.signature_goal.to_string()),
        percent_cell(progress.signature_percent()),
    ]));
    table.add_row(Row::from(vec![
        Cell::new("Pledged"),
        Cell::new(format!("${:.0}", progress.pledge_amount_dollars())),
        Cell::new(format!("${:.0}", progress.pledge_goal_dollars())),
        percent_cell(progress.pledge_percent()),
    ]));
    table.add_row(Row::from(vec![
        Cell::new("Emails"),
        Cell::new(progress.emails.to_string()),
        Cell::new(progress.email_goal.to_string()),
        percent_cell(progress.email_percent()),
    ]));
    table.to_string()
}

pub fn render_stats_table(stats: &CampaignStats) -> String {
    let mut table = new_table(vec!["Field", "Value"]);
    table.add_row(vec!["signatures".to_string(), stats.signatures.to_string()]);
    table.add_row(vec!["pledges".to_string(), stats.pledges.to_string()]);
    table.add_row(vec![
        "pledged".to_string(),
        format!("${:.2}", stats.pledge_amount_dollars()),
    ]);
    table.add_row(vec![
        "signature goal".to_string(),
        stats.signature_goal.to_string(),
    ]);
    table.add_row(vec![
        "pledge goal".to_string(),
        format!("${:.0}", stats.pledge_goal_dollars()),
    ]);
    table.add_row(vec![
        "last activity".to_string(),
        stats
            .last_updated
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "-".to_string()),
    ]);
    table.to_string()
}

pub fn render_tiers_table(tiers: &[PledgeTier], highlight: Option<&PledgeTier>) -> String {
    let mut table = new_table(vec!["Rank", "Tier", "From", "Description"]);
    for tier in tiers {
        let name = Cell::new(tier.label);
        let name = if highlight == Some(tier) {
            name.fg(Color::Green)
        } else {
            name
        };
        table.add_row(Row::from(vec![
            Cell::new(tier.rank.to_string()),
            name,
            Cell::new(format!("${}", tier.min_dollars)),
            Cell::new(tier.description),
        ]));
    }
    table.to_string()
}

pub fn render_broadcast_table(report: &BroadcastReport) -> String {
    let mut table = new_table(vec!["Recipients", "Sent", "Failed"]);
    let failed = if report.failed > 0 {
        Cell::new(report.failed.to_string()).fg(Color::Red)
    } else {
        Cell::new("0")
    };
    table.add_row(Row::from(vec![
        Cell::new(report.total_recipients.to_string()),
        Cell::new(report.sent.to_string()),
        failed,
    ]));
    let mut out = table.to_string();
    for failure in &report.errors {
        out.push_str(&format!("\n  {}: {}", failure.email, failure.error));
    }
    out
}

pub fn render_signatures_table(signatures: &[Signature]) -> String {
    let mut table = new_table(vec!["ID", "Name", "Email", "Postal", "Petition", "Updates", "Signed"]);
    for signature in signatures {
        table.add_row(vec![
            signature.id.to_string(),
            signature.full_name(),
            signature.email.clone(),
            signature.postal_code.clone(),
            yes_no(signature.consent_petition).to_string(),
            yes_no(signature.consent_updates).to_string(),
            signature.created_at.format("%Y-%m-%d %H:%M").to_string(),
        ]);
    }
    table.to_string()
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "YES"
    } else {
        "NO"
    }
}
