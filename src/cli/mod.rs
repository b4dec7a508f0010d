use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::application::{Collaborators, CompletionSweep, Engine};
use crate::config::Config;
use crate::domain::{
    AuditAction, Tutor, WithdrawalStatus, format_basis_points, format_cents, parse_cents,
};
use crate::storage::{AuditFilter, BankAccount, Repository};

/// Tutorledger - escrow and payout ledger for a tutoring marketplace
#[derive(Parser)]
#[command(name = "tutorledger")]
#[command(about = "Operator tool for booking escrow, disputes and tutor withdrawals")]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to ./tutorledger.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Database file path, overriding the config
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database and seed platform settings
    Init,

    /// Show the resolved configuration
    Config,

    /// Tutor directory maintenance
    #[command(subcommand)]
    Tutor(TutorCommands),

    /// Complete finished sessions and release escrow
    Sweep {
        /// Keep running on the configured interval until interrupted
        #[arg(long)]
        watch: bool,
    },

    /// Show a tutor's escrow and withdrawable balance
    Earnings {
        /// Tutor ID
        tutor: String,
    },

    /// Withdrawal request management
    #[command(subcommand)]
    Withdrawals(WithdrawalCommands),

    /// Dispute overview
    #[command(subcommand)]
    Disputes(DisputeCommands),

    /// Platform money settings
    #[command(subcommand)]
    Settings(SettingsCommands),

    /// List captured payments that no booking could take
    Orphans {
        /// Include captures already refunded
        #[arg(long)]
        all: bool,
    },

    /// Show the financial audit log
    Audit {
        /// Filter by tutor ID
        #[arg(long)]
        tutor: Option<String>,

        /// Filter by booking ID
        #[arg(long)]
        booking: Option<String>,

        /// Filter by action (e.g. EARNINGS_RELEASED)
        #[arg(long)]
        action: Option<String>,

        /// Maximum number of entries to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Export data to CSV or JSON
    Export {
        /// What to export: audit, ledger, full
        #[arg(value_name = "TYPE")]
        export_type: String,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum TutorCommands {
    /// Add a tutor with an hourly rate
    Add {
        /// Display name
        name: String,

        /// Hourly rate (e.g., "500.00")
        #[arg(long)]
        rate: String,
    },

    /// Store or replace a tutor's payout account
    Bank {
        /// Tutor ID
        tutor: String,

        #[arg(long)]
        holder: String,

        #[arg(long)]
        account: String,

        #[arg(long)]
        bank: Option<String>,

        #[arg(long)]
        ifsc: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum WithdrawalCommands {
    /// List withdrawal requests
    List {
        /// Filter by tutor ID
        #[arg(long)]
        tutor: Option<String>,

        /// Filter by status: pending, approved, rejected, paid
        #[arg(long)]
        status: Option<String>,
    },

    /// Request a withdrawal on behalf of a tutor
    Request {
        /// Tutor ID
        tutor: String,

        /// Amount (e.g., "500.00")
        amount: String,
    },

    /// Approve a pending request
    Approve {
        id: String,

        /// Admin user ID
        #[arg(long)]
        admin: String,
    },

    /// Reject a pending request
    Reject {
        id: String,

        /// Admin user ID
        #[arg(long)]
        admin: String,

        #[arg(long)]
        note: Option<String>,
    },

    /// Mark an approved request as paid out
    Pay {
        id: String,

        /// Admin user ID
        #[arg(long)]
        admin: String,

        /// Bank transaction reference
        #[arg(long)]
        reference: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum DisputeCommands {
    /// List disputes (open only unless --all)
    List {
        #[arg(long)]
        all: bool,
    },

    /// Show a dispute and its trail
    Show { id: String },
}

#[derive(Subcommand)]
pub enum SettingsCommands {
    /// Show current platform settings
    Show,

    /// Update platform settings
    Set {
        /// Commission in basis points (1000 = 10%)
        #[arg(long)]
        commission_bps: Option<i64>,

        /// Minimum withdrawal amount (e.g., "500.00")
        #[arg(long)]
        min_withdrawal: Option<String>,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(database) = self.database {
            config.database = database;
        }

        match self.command {
            Commands::Init => {
                let repo = init_repository(&config.database).await?;
                repo.seed_platform_settings(config.platform.into()).await?;
                println!("Database initialized: {}", config.database);
            }

            Commands::Config => {
                println!("{}", config);
            }

            Commands::Tutor(cmd) => {
                let repo = connect_repository(&config.database).await?;
                run_tutor_command(&repo, cmd).await?;
            }

            Commands::Sweep { watch } => {
                let engine = connect_engine(&config).await?;
                run_sweep_command(engine.sweep.clone(), watch, config.sweep_interval_secs).await?;
            }

            Commands::Earnings { tutor } => {
                let engine = connect_engine(&config).await?;
                run_earnings_command(&engine, parse_id(&tutor, "tutor")?).await?;
            }

            Commands::Withdrawals(cmd) => {
                let engine = connect_engine(&config).await?;
                run_withdrawal_command(&engine, cmd).await?;
            }

            Commands::Disputes(cmd) => {
                let engine = connect_engine(&config).await?;
                run_dispute_command(&engine, cmd).await?;
            }

            Commands::Orphans { all } => {
                let engine = connect_engine(&config).await?;
                run_orphans_command(&engine, all).await?;
            }

            Commands::Settings(cmd) => {
                let repo = connect_repository(&config.database).await?;
                run_settings_command(&repo, cmd).await?;
            }

            Commands::Audit {
                tutor,
                booking,
                action,
                limit,
            } => {
                let engine = connect_engine(&config).await?;
                let filter = AuditFilter {
                    tutor_id: tutor.as_deref().map(|t| parse_id(t, "tutor")).transpose()?,
                    booking_id: booking.as_deref().map(|b| parse_id(b, "booking")).transpose()?,
                    withdrawal_id: None,
                    action: action
                        .as_deref()
                        .map(|a| {
                            AuditAction::from_str(&a.to_uppercase())
                                .ok_or_else(|| anyhow::anyhow!("Unknown audit action '{}'", a))
                        })
                        .transpose()?,
                    limit,
                };
                run_audit_command(&engine, &filter).await?;
            }

            Commands::Export {
                export_type,
                output,
            } => {
                let repo = connect_repository(&config.database).await?;
                run_export_command(&repo, &export_type, output.as_deref()).await?;
            }
        }

        Ok(())
    }
}

async fn init_repository(database_path: &str) -> Result<Repository> {
    let db_url = format!("sqlite:{}?mode=rwc", database_path);
    Repository::init(&db_url).await
}

async fn connect_repository(database_path: &str) -> Result<Repository> {
    let db_url = format!("sqlite:{}", database_path);
    Repository::connect(&db_url).await
}

/// Wire every service against the configured database. The operator tool
/// has no gateway credentials, so gateway calls fail cleanly.
async fn connect_engine(config: &Config) -> Result<Engine> {
    let repo = Arc::new(connect_repository(&config.database).await?);
    let deps = Collaborators::offline(repo.clone());
    Ok(Engine::new(repo, deps, config.policy, config.currency.clone()))
}

async fn run_tutor_command(repo: &Repository, cmd: TutorCommands) -> Result<()> {
    match cmd {
        TutorCommands::Add { name, rate } => {
            let rate = parse_cents(&rate).context("Invalid rate format. Use '500.00' or '500'")?;
            if rate <= 0 {
                anyhow::bail!("Hourly rate must be positive");
            }
            let tutor = Tutor::new(name, rate);
            repo.save_tutor(&tutor).await?;
            println!("Added tutor {} ({}/h): {}", tutor.display_name, format_cents(rate), tutor.id);
        }

        TutorCommands::Bank {
            tutor,
            holder,
            account,
            bank,
            ifsc,
        } => {
            let tutor_id = parse_id(&tutor, "tutor")?;
            repo.get_tutor(tutor_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Tutor not found: {}", tutor_id))?;
            repo.save_bank_account(&BankAccount {
                tutor_id,
                account_holder: holder,
                account_number: account,
                bank_name: bank,
                ifsc,
            })
            .await?;
            println!("Saved bank details for {}", tutor_id);
        }
    }
    Ok(())
}

async fn run_sweep_command(sweep: Arc<CompletionSweep>, watch: bool, interval_secs: u64) -> Result<()> {
    if !watch {
        let report = sweep.run_once().await?;
        println!(
            "Examined {}, completed {}, released {}, frozen {}, failed {}",
            report.examined, report.completed, report.released, report.frozen, report.failed
        );
        return Ok(());
    }

    let handle = sweep.spawn(Duration::from_secs(interval_secs));
    tracing::info!(interval_secs, "completion sweep running");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    handle.abort();
    tracing::info!("completion sweep stopped");
    Ok(())
}

async fn run_earnings_command(engine: &Engine, tutor_id: Uuid) -> Result<()> {
    let summary = engine.wallet.summary(tutor_id).await?;
    let entries = engine.wallet.entries_for_tutor(tutor_id).await?;

    println!("Tutor: {}", tutor_id);
    println!("  Pending release: {}", format_cents(summary.pending));
    println!("  Available:       {}", format_cents(summary.available));
    println!("  Withdrawn:       {}", format_cents(summary.withdrawn));
    println!("  Withdrawable:    {}", format_cents(summary.withdrawable()));
    println!("  Refunded:        {}", format_cents(summary.refunded));

    if !entries.is_empty() {
        println!();
        println!(
            "{:<36} {:>12} {:<16} {:>10}",
            "BOOKING", "AMOUNT", "STATUS", "COMMISSION"
        );
        println!("{}", "-".repeat(78));
        for entry in entries {
            println!(
                "{:<36} {:>12} {:<16} {:>10}",
                entry.booking_id,
                format_cents(entry.amount),
                entry.status,
                format_cents(entry.commission_amount)
            );
        }
    }
    Ok(())
}

async fn run_withdrawal_command(engine: &Engine, cmd: WithdrawalCommands) -> Result<()> {
    let processor = &engine.withdrawals;

    match cmd {
        WithdrawalCommands::List { tutor, status } => {
            let tutor_id = tutor.as_deref().map(|t| parse_id(t, "tutor")).transpose()?;
            let status = status
                .as_deref()
                .map(|s| {
                    WithdrawalStatus::from_str(&s.to_lowercase())
                        .ok_or_else(|| anyhow::anyhow!("Unknown withdrawal status '{}'", s))
                })
                .transpose()?;

            let requests = processor.list(tutor_id, status).await?;
            if requests.is_empty() {
                println!("No withdrawal requests found.");
            } else {
                println!(
                    "{:<36} {:<36} {:>12} {:<10} {:<12}",
                    "ID", "TUTOR", "AMOUNT", "STATUS", "ACCOUNT"
                );
                println!("{}", "-".repeat(110));
                for request in requests {
                    println!(
                        "{:<36} {:<36} {:>12} {:<10} {:<12}",
                        request.id,
                        request.tutor_id,
                        format_cents(request.amount),
                        request.status,
                        request.bank_snapshot.masked_account_number
                    );
                }
            }
        }

        WithdrawalCommands::Request { tutor, amount } => {
            let tutor_id = parse_id(&tutor, "tutor")?;
            let amount = parse_cents(&amount).context("Invalid amount format. Use '50.00' or '50'")?;
            let request = processor.create_withdrawal_request(tutor_id, amount).await?;
            println!("Withdrawal requested: {} ({})", request.id, format_cents(request.amount));
        }

        WithdrawalCommands::Approve { id, admin } => {
            let request = processor
                .approve(parse_id(&id, "withdrawal")?, parse_id(&admin, "admin")?)
                .await?;
            println!("Approved {} ({})", request.id, format_cents(request.amount));
        }

        WithdrawalCommands::Reject { id, admin, note } => {
            let request = processor
                .reject(
                    parse_id(&id, "withdrawal")?,
                    parse_id(&admin, "admin")?,
                    note.as_deref(),
                )
                .await?;
            println!("Rejected {}", request.id);
        }

        WithdrawalCommands::Pay { id, admin, reference } => {
            let request = processor
                .mark_paid(
                    parse_id(&id, "withdrawal")?,
                    parse_id(&admin, "admin")?,
                    reference.as_deref(),
                )
                .await?;
            println!("Marked {} as paid", request.id);
        }
    }
    Ok(())
}

async fn run_dispute_command(engine: &Engine, cmd: DisputeCommands) -> Result<()> {
    match cmd {
        DisputeCommands::List { all } => {
            let disputes = if all {
                engine.disputes.list_all().await?
            } else {
                engine.disputes.list_open().await?
            };
            if disputes.is_empty() {
                println!("No disputes found.");
            } else {
                println!(
                    "{:<36} {:<36} {:<9} {:<26} {:<12}",
                    "ID", "BOOKING", "STATUS", "OUTCOME", "OPENED"
                );
                println!("{}", "-".repeat(122));
                for dispute in disputes {
                    println!(
                        "{:<36} {:<36} {:<9} {:<26} {:<12}",
                        dispute.id,
                        dispute.booking_id,
                        dispute.status,
                        dispute.outcome.map(|o| o.to_string()).unwrap_or_default(),
                        dispute.created_at.format("%Y-%m-%d")
                    );
                }
            }
        }

        DisputeCommands::Show { id } => {
            let dispute_id = parse_id(&id, "dispute")?;
            let dispute = engine.disputes.get(dispute_id).await?;

            println!("Dispute: {}", dispute.id);
            println!("  Booking:  {}", dispute.booking_id);
            println!("  Status:   {}", dispute.status);
            if let Some(reason) = &dispute.reason {
                println!("  Reason:   {}", reason);
            }
            if let Some(outcome) = dispute.outcome {
                println!("  Outcome:  {}", outcome);
            }
            if let Some(amount) = dispute.refund_amount {
                println!("  Refunded: {}", format_cents(amount));
            }
            println!();
            for entry in engine.disputes.audit_trail(dispute_id).await? {
                println!(
                    "  {} {:<20} {} {}",
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.action.as_str(),
                    entry.actor_id,
                    entry.details
                );
            }
        }
    }
    Ok(())
}

async fn run_settings_command(repo: &Repository, cmd: SettingsCommands) -> Result<()> {
    let current = repo
        .get_platform_settings()
        .await?
        .ok_or_else(|| anyhow::anyhow!("Platform settings missing; run 'init' first"))?;

    match cmd {
        SettingsCommands::Show => {
            println!("Commission:         {}", format_basis_points(current.commission_rate));
            println!("Minimum withdrawal: {}", format_cents(current.min_withdrawal_amount));
        }

        SettingsCommands::Set {
            commission_bps,
            min_withdrawal,
        } => {
            let mut updated = current;
            if let Some(bps) = commission_bps {
                if !(0..=crate::domain::BASIS_POINTS_PER_UNIT).contains(&bps) {
                    anyhow::bail!("Commission must be between 0 and 10000 basis points");
                }
                updated.commission_rate = bps;
            }
            if let Some(min) = min_withdrawal {
                updated.min_withdrawal_amount =
                    parse_cents(&min).context("Invalid amount format. Use '500.00' or '500'")?;
            }
            repo.update_platform_settings(updated).await?;
            println!(
                "Settings updated: commission {}, minimum withdrawal {}",
                format_basis_points(updated.commission_rate),
                format_cents(updated.min_withdrawal_amount)
            );
        }
    }
    Ok(())
}

async fn run_orphans_command(engine: &Engine, all: bool) -> Result<()> {
    let captures = engine.bookings.orphan_captures(!all).await?;
    if captures.is_empty() {
        println!("No orphan captures found.");
        return Ok(());
    }

    println!(
        "{:<19} {:<36} {:<24} {:>12} {:<18} {:<16}",
        "TIME", "BOOKING", "PAYMENT", "AMOUNT", "REASON", "REFUND"
    );
    println!("{}", "-".repeat(130));
    for capture in captures {
        println!(
            "{:<19} {:<36} {:<24} {:>12} {:<18} {:<16}",
            capture.created_at.format("%Y-%m-%d %H:%M:%S"),
            capture.booking_id,
            capture.payment_ref,
            format_cents(capture.amount),
            capture.reason.as_str(),
            capture.refund_ref.as_deref().unwrap_or("PENDING")
        );
    }
    Ok(())
}

async fn run_audit_command(engine: &Engine, filter: &AuditFilter) -> Result<()> {
    let entries = engine.audit.entries(filter).await?;
    if entries.is_empty() {
        println!("No audit entries found.");
        return Ok(());
    }

    println!(
        "{:<19} {:<20} {:>12} {:<8} {:<36}",
        "TIME", "ACTION", "AMOUNT", "BY", "SUBJECT"
    );
    println!("{}", "-".repeat(99));
    for entry in entries {
        let subject = entry
            .booking_id
            .or(entry.withdrawal_id)
            .map(|id| id.to_string())
            .unwrap_or_default();
        println!(
            "{:<19} {:<20} {:>12} {:<8} {:<36}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.action.as_str(),
            format_cents(entry.amount),
            entry.performed_by.as_str(),
            subject
        );
    }
    Ok(())
}

async fn run_export_command(repo: &Repository, export_type: &str, output: Option<&str>) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;
    use std::io::{Write, stdout};

    let exporter = Exporter::new(repo);

    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    match export_type {
        "audit" => {
            let count = exporter
                .export_audit_csv(&AuditFilter::default(), writer)
                .await?;
            if output.is_some() {
                eprintln!("Exported {} audit entries", count);
            }
        }
        "ledger" => {
            let count = exporter.export_ledger_csv(writer).await?;
            if output.is_some() {
                eprintln!("Exported {} ledger entries", count);
            }
        }
        "full" => {
            let snapshot = exporter.export_full_json(writer).await?;
            if output.is_some() {
                eprintln!(
                    "Exported {} ledger entries, {} withdrawals, {} disputes, {} audit entries",
                    snapshot.ledger.len(),
                    snapshot.withdrawals.len(),
                    snapshot.disputes.len(),
                    snapshot.audit_log.len()
                );
            }
        }
        _ => {
            anyhow::bail!(
                "Invalid export type '{}'. Valid types: audit, ledger, full",
                export_type
            );
        }
    }

    Ok(())
}

fn parse_id(value: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("Invalid {} ID '{}'", what, value))
}
