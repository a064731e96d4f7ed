use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use arena_campaign::app::CampaignApp;
use arena_campaign::campaign::{pledge_tier, PLEDGE_TIERS};
use arena_campaign::config::{Config, ConfigOverrides};
use arena_campaign::notify::broadcast::CampaignEmail;
use arena_campaign::output::csv::signatures_to_csv;
use arena_campaign::output::render_json;
use arena_campaign::output::table::{
    render_broadcast_table, render_progress_table, render_signatures_table, render_stats_table,
    render_tiers_table,
};
use arena_campaign::payments::{create_donation_intent, etransfer_instructions, DonationRequest};
use arena_campaign::server::run_server;
use arena_campaign::store::{CampaignStore, SignatureCountFilter};
use arena_campaign::types::{dollars_to_cents, Audience, StatsConfig};
use arena_campaign::workflow::{PetitionOutcome, PetitionWorkflow, PledgeWorkflow};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CountFilterArg {
    Petition,
    All,
}

impl From<CountFilterArg> for SignatureCountFilter {
    fn from(value: CountFilterArg) -> Self {
        match value {
            CountFilterArg::Petition => SignatureCountFilter::PetitionConsent,
            CountFilterArg::All => SignatureCountFilter::All,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "arena-campaign",
    about = "Petition, pledge and progress tracking for the arena campaign"
)]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// SQLite database path.
    #[arg(long)]
    db: Option<String>,
    /// Hosted REST project URL; switches storage to the rest backend.
    #[arg(long)]
    rest_url: Option<String>,
    /// Offline signatures added to the displayed count.
    #[arg(long)]
    baseline_offset: Option<u64>,
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Current totals and the progress meters.
    Stats,
    /// Print progress every time a signature or pledge lands.
    Watch,
    Sign {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        postal_code: String,
        /// Agree to be counted on the community petition.
        #[arg(long)]
        consent: bool,
        #[arg(long)]
        updates: bool,
    },
    Pledge {
        #[arg(long)]
        first_name: String,
        #[arg(long, default_value = "")]
        last_name: String,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "")]
        postal_code: String,
        /// Amount in dollars.
        #[arg(long)]
        amount: f64,
    },
    /// Show the pledge tier ladder, or the tier for one amount.
    Tier { amount: Option<f64> },
    /// Create a card donation intent.
    Donate {
        /// Amount in dollars.
        #[arg(long)]
        amount: f64,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
    Etransfer,
    /// Email every opted-in supporter in an audience.
    Broadcast {
        #[arg(long)]
        subject: String,
        /// HTML body; `{{first_name}}` is personalised per recipient.
        #[arg(long)]
        html: PathBuf,
        #[arg(long, default_value = "all")]
        audience: Audience,
    },
    /// Signature rows as CSV.
    Export {
        #[arg(long, value_enum, default_value_t = CountFilterArg::All)]
        filter: CountFilterArg,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Set the campaign goals in the local database.
    Goals {
        #[arg(long)]
        signatures: u64,
        /// Pledge goal in dollars.
        #[arg(long)]
        pledges: u64,
    },
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 3001)]
        port: u16,
    },
    Config {
        #[arg(long)]
        init: bool,
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(Some(&config_path))?;
    config.apply_env();
    config.apply_overrides(ConfigOverrides {
        db_path: cli.db.clone(),
        rest_url: cli.rest_url.clone(),
        baseline_signature_offset: cli.baseline_offset,
    });

    match &cli.command {
        Commands::Config { init, show } => {
            handle_config_command(*init, *show, &config, &config_path)?;
        }
        Commands::Tier { amount } => print_tiers(*amount, cli.output)?,
        Commands::Etransfer => print_etransfer(&config, cli.output)?,
        Commands::Serve { host, port } => {
            let app = CampaignApp::from_config(config)?;
            let bind = format!("{host}:{port}");
            let addr: SocketAddr = bind
                .parse()
                .map_err(|e| anyhow!("invalid bind address {bind}: {e}"))?;
            run_server(app, addr).await?;
        }
        Commands::Stats => {
            let app = CampaignApp::from_config(config)?;
            let stats = app
                .service
                .get_campaign_stats()
                .await
                .ok_or_else(|| anyhow!("campaign statistics are unavailable"))?;
            let tracker = app.progress_tracker();
            tracker.refresh().await;
            let progress = tracker.snapshot();
            match cli.output {
                OutputFormat::Json => println!(
                    "{}",
                    render_json(&serde_json::json!({ "stats": stats, "progress": progress }))?
                ),
                OutputFormat::Table => {
                    println!("{}", render_stats_table(&stats));
                    println!("{}", render_progress_table(&progress));
                }
            }
        }
        Commands::Watch => {
            let app = CampaignApp::from_config(config)?;
            let mut tracker = app.progress_tracker();
            tracker.mount().await;
            let handle = tracker.handle();
            let mut last = handle.snapshot();
            println!("{}", render_progress_table(&last));
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(500));
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = ticker.tick() => {
                        let current = handle.snapshot();
                        if current != last {
                            println!("{}", render_progress_table(&current));
                            last = current;
                        }
                    }
                }
            }
            tracker.unmount();
        }
        Commands::Sign {
            first_name,
            last_name,
            email,
            postal_code,
            consent,
            updates,
        } => {
            let app = CampaignApp::from_config(config)?;
            let mut workflow = PetitionWorkflow::new(app.service.clone());
            workflow.edit(|form| {
                form.first_name = first_name.clone();
                form.last_name = last_name.clone();
                form.email = email.clone();
                form.postal_code = postal_code.clone();
                form.consent_petition = *consent;
                form.consent_updates = *updates;
            });
            match workflow.submit().await? {
                PetitionOutcome::Signed { signature_id } => {
                    print_outcome(cli.output, workflow.state(), || {
                        format!("Thank you for signing! Signature #{signature_id}")
                    })?;
                }
                PetitionOutcome::Failed { message } => bail!(message),
            }
        }
        Commands::Pledge {
            first_name,
            last_name,
            email,
            postal_code,
            amount,
        } => {
            let app = CampaignApp::from_config(config)?;
            let mut workflow = PledgeWorkflow::new(app.service.clone());
            workflow.edit(|form| {
                form.first_name = first_name.clone();
                form.last_name = last_name.clone();
                form.email = email.clone();
                form.postal_code = postal_code.clone();
                form.amount = *amount;
            });
            let outcome = workflow.submit().await?;
            if let OutputFormat::Json = cli.output {
                println!("{}", render_json(&outcome)?);
            }
            match outcome.message() {
                Some(message) => bail!(message.to_string()),
                None => {
                    if let OutputFormat::Table = cli.output {
                        println!(
                            "Thank you! Pledge of ${amount:.2} recorded as {}.",
                            outcome.tier.as_deref().unwrap_or("Supporter")
                        );
                    }
                }
            }
        }
        Commands::Donate { amount, name, email } => {
            let app = CampaignApp::from_config(config)?;
            let request = DonationRequest {
                amount_cents: dollars_to_cents(*amount),
                name: name.clone(),
                email: email.clone(),
            };
            let intent = create_donation_intent(&app.payments(), &request).await?;
            match cli.output {
                OutputFormat::Json => println!("{}", render_json(&intent)?),
                OutputFormat::Table => println!("client secret: {}", intent.client_secret),
            }
        }
        Commands::Broadcast {
            subject,
            html,
            audience,
        } => {
            let app = CampaignApp::from_config(config)?;
            let body = std::fs::read_to_string(html)
                .with_context(|| format!("failed reading email body: {}", html.display()))?;
            let report = app
                .broadcaster()
                .send(&CampaignEmail {
                    subject: subject.clone(),
                    html: body,
                    audience: *audience,
                })
                .await?;
            match cli.output {
                OutputFormat::Json => println!("{}", render_json(&report)?),
                OutputFormat::Table => println!("{}", render_broadcast_table(&report)),
            }
        }
        Commands::Export { filter, out } => {
            let app = CampaignApp::from_config(config)?;
            let signatures = app.backend.store.list_signatures((*filter).into()).await?;
            match (cli.output, out) {
                (_, Some(path)) => {
                    std::fs::write(path, signatures_to_csv(&signatures)?)
                        .with_context(|| format!("failed writing export: {}", path.display()))?;
                    info!(rows = signatures.len(), path = %path.display(), "signatures exported");
                }
                (OutputFormat::Json, None) => println!("{}", render_json(&signatures)?),
                (OutputFormat::Table, None) => {
                    if signatures.is_empty() {
                        println!("No signatures yet.");
                    } else {
                        println!("{}", render_signatures_table(&signatures));
                    }
                }
            }
        }
        Commands::Goals { signatures, pledges } => {
            let app = CampaignApp::from_config(config)?;
            let Some(local) = app.backend.local() else {
                bail!("goals can only be set on the sqlite backend");
            };
            let goals = StatsConfig {
                signature_goal: *signatures,
                pledge_goal_cents: dollars_to_cents(*pledges as f64),
            };
            local.set_stats_config(&goals)?;
            info!(signature_goal = goals.signature_goal, pledge_goal_cents = goals.pledge_goal_cents, "campaign goals updated");
        }
    }

    Ok(())
}

fn print_etransfer(config: &Config, output: OutputFormat) -> Result<()> {
    let panel = etransfer_instructions(&config.etransfer);
    match output {
        OutputFormat::Json => println!("{}", render_json(&panel)?),
        OutputFormat::Table => {
            println!("Send an Interac e-Transfer to {} ({})", panel.recipient_email, panel.recipient_name);
            for (index, step) in panel.steps.iter().enumerate() {
                println!("  {}. {step}", index + 1);
            }
            println!("{}", panel.fee_note);
            println!("{}", panel.receipt_note);
        }
    }
    Ok(())
}

fn print_outcome<T: serde::Serialize>(
    output: OutputFormat,
    state: &T,
    message: impl FnOnce() -> String,
) -> Result<()> {
    match output {
        OutputFormat::Json => println!("{}", render_json(state)?),
        OutputFormat::Table => println!("{}", message()),
    }
    Ok(())
}

fn print_tiers(amount: Option<f64>, output: OutputFormat) -> Result<()> {
    let tier = amount.map(pledge_tier);
    match output {
        OutputFormat::Json => match tier {
            Some(tier) => println!("{}", render_json(&tier)?),
            None => println!("{}", render_json(&PLEDGE_TIERS)?),
        },
        OutputFormat::Table => {
            println!("{}", render_tiers_table(&PLEDGE_TIERS, tier.as_ref()));
            if let (Some(amount), Some(tier)) = (amount, tier) {
                println!("${amount:.2} -> {} ({})", tier.label, tier.description);
            }
        }
    }
    Ok(())
}

fn handle_config_command(init: bool, show: bool, config: &Config, config_path: &Path) -> Result<()> {
    if init {
        if config_path.exists() {
            bail!("config already exists at {}", config_path.display());
        }
        Config::write_template(config_path)?;
        println!("Wrote config template to {}", config_path.display());
    }
    if show || !init {
        println!("{}", render_json(&config.redacted())?);
    }
    Ok(())
}
