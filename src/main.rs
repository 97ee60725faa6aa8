//! # Dripline — rate-limited outreach scheduling
//!
//! Schedules bulk outbound actions (identity lookup, friend requests,
//! messages) against a third-party messaging account without blowing its
//! hourly/daily quotas.
//!
//! Usage:
//!   dripline account add --id a1 --name "Main shop" --hourly 20 --daily 200
//!   dripline customer add --id c1 --name "An" --phone 0900000001
//!   dripline job create --actor op-1 --account a1 --action lookup_identity \
//!       --rate 12 --recipients targets.json
//!   dripline job list --actor op-1

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{FixedOffset, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dripline_core::DriplineConfig;
use dripline_scheduler::{
    AccountQuota, ActionType, Actor, ActorRole, CreateJobParams, InvalidationBus, JobManager,
    QuotaState, Recipient, SchedulerDb, SenderAccount, list_running_jobs, run_invalidation_logger,
};

#[derive(Parser)]
#[command(
    name = "dripline",
    version,
    about = "💧 Dripline — rate-limited outreach scheduling"
)]
struct Cli {
    /// SQLite database path (defaults to the configured storage path)
    #[arg(long)]
    db: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage sending accounts
    Account {
        #[command(subcommand)]
        cmd: AccountCmd,
    },
    /// Manage the customer system of record
    Customer {
        #[command(subcommand)]
        cmd: CustomerCmd,
    },
    /// Manage actors (operators and admins)
    Actor {
        #[command(subcommand)]
        cmd: ActorCmd,
    },
    /// Create, cancel, and list scheduled jobs
    Job {
        #[command(subcommand)]
        cmd: JobCmd,
    },
}

#[derive(Subcommand)]
enum AccountCmd {
    /// Register a sending account
    Add {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        phone: String,
        /// Hourly action quota (legacy model)
        #[arg(long, default_value = "20")]
        hourly: u32,
        /// Daily action quota (legacy model)
        #[arg(long, default_value = "200")]
        daily: u32,
        /// Newer-model account: no tracked quota
        #[arg(long)]
        unlimited: bool,
        /// Comma-separated actor ids delegated to this account
        #[arg(long, value_delimiter = ',')]
        operators: Vec<String>,
    },
    /// List registered accounts
    List,
}

#[derive(Subcommand)]
enum CustomerCmd {
    /// Add or update a customer record
    Add {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        phone: String,
        /// Known platform identity handle
        #[arg(long)]
        external_id: Option<String>,
    },
}

#[derive(Subcommand)]
enum ActorCmd {
    /// Register an actor
    Add {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        /// Grant unrestricted visibility
        #[arg(long)]
        admin: bool,
    },
}

#[derive(Subcommand)]
enum JobCmd {
    /// Schedule a recipient batch (merges into an in-flight lookup job)
    Create {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        account: String,
        /// lookup_identity | send_message | add_friend | check_friend
        #[arg(long)]
        action: String,
        /// Desired throughput, clamped to 1..=30 actions per hour
        #[arg(long)]
        rate: Option<u32>,
        #[arg(long)]
        name: Option<String>,
        /// Raw message template (send_message jobs)
        #[arg(long)]
        template: Option<String>,
        /// Mark as a manually triggered batch
        #[arg(long)]
        manual: bool,
        /// JSON file with the recipient array
        #[arg(long)]
        recipients: PathBuf,
    },
    /// Cancel a job outright
    Cancel {
        #[arg(long)]
        actor: Option<String>,
        job_id: String,
    },
    /// List the most recent jobs visible to an actor
    List {
        #[arg(long, default_value = "admin")]
        actor: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "dripline=debug,dripline_scheduler=debug"
    } else {
        "dripline=info,dripline_scheduler=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = DriplineConfig::load()?;
    let db_path = shellexpand::tilde(
        cli.db.as_deref().unwrap_or(config.storage.db_path.as_str()),
    )
    .to_string();
    let db = Arc::new(SchedulerDb::open(std::path::Path::new(&db_path))?);

    let Some(day_offset) =
        FixedOffset::east_opt(config.scheduler.day_boundary_offset_minutes * 60)
    else {
        bail!("day_boundary_offset_minutes out of range (must stay within ±1440)");
    };

    let (invalidations, rx) = InvalidationBus::new();
    let logger = tokio::spawn(run_invalidation_logger(rx));
    let manager = JobManager::new(db.clone(), db.clone(), invalidations, day_offset);

    match cli.command {
        Command::Account { cmd } => run_account(&db, day_offset, cmd)?,
        Command::Customer { cmd } => run_customer(&db, cmd)?,
        Command::Actor { cmd } => run_actor(&db, cmd)?,
        Command::Job { cmd } => run_job(&db, &manager, &config, cmd)?,
    }

    // Let the invalidation logger drain what the command published.
    drop(manager);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    logger.abort();
    Ok(())
}

fn run_account(db: &SchedulerDb, day_offset: FixedOffset, cmd: AccountCmd) -> Result<()> {
    match cmd {
        AccountCmd::Add {
            id,
            name,
            phone,
            hourly,
            daily,
            unlimited,
            operators,
        } => {
            let now = Utc::now();
            let quota = if unlimited {
                AccountQuota::Unlimited
            } else {
                AccountQuota::Legacy(QuotaState::new(hourly, daily, now, day_offset))
            };
            db.upsert_account(&SenderAccount {
                id: id.clone(),
                display_name: name,
                phone,
                quota,
                operators,
                job_ids: Vec::new(),
                created_at: now,
            })?;
            println!("Account '{id}' saved");
        }
        AccountCmd::List => {
            for account in db.list_accounts()? {
                let quota = match &account.quota {
                    AccountQuota::Unlimited => "unlimited".to_string(),
                    AccountQuota::Legacy(q) => format!(
                        "{}/{}h {}/{}d",
                        q.used_this_hour, q.hourly_limit, q.used_this_day, q.daily_limit
                    ),
                };
                println!(
                    "{:<12} {:<24} {:<14} quota: {:<18} jobs: {}",
                    account.id,
                    account.display_name,
                    account.phone,
                    quota,
                    account.job_ids.len()
                );
            }
        }
    }
    Ok(())
}

fn run_customer(db: &SchedulerDb, cmd: CustomerCmd) -> Result<()> {
    match cmd {
        CustomerCmd::Add {
            id,
            name,
            phone,
            external_id,
        } => {
            db.upsert_customer(&Recipient {
                id: id.clone(),
                name,
                phone,
                external_id,
                kind: "customer".into(),
            })?;
            println!("Customer '{id}' saved");
        }
    }
    Ok(())
}

fn run_actor(db: &SchedulerDb, cmd: ActorCmd) -> Result<()> {
    match cmd {
        ActorCmd::Add { id, name, admin } => {
            db.upsert_actor(&Actor {
                id: id.clone(),
                display_name: name,
                role: if admin {
                    ActorRole::Admin
                } else {
                    ActorRole::Operator
                },
            })?;
            println!("Actor '{id}' saved");
        }
    }
    Ok(())
}

fn run_job(
    db: &SchedulerDb,
    manager: &JobManager,
    config: &DriplineConfig,
    cmd: JobCmd,
) -> Result<()> {
    match cmd {
        JobCmd::Create {
            actor,
            account,
            action,
            rate,
            name,
            template,
            manual,
            recipients,
        } => {
            let Some(action) = ActionType::parse(&action) else {
                bail!(
                    "unknown action '{action}' (expected lookup_identity, send_message, \
                     add_friend, or check_friend)"
                );
            };
            let raw = std::fs::read_to_string(&recipients)
                .with_context(|| format!("reading {}", recipients.display()))?;
            let recipients: Vec<Recipient> = serde_json::from_str(&raw)
                .with_context(|| "recipient file must be a JSON array of recipients")?;

            let outcome = manager.create_or_extend(CreateJobParams {
                actor_id: actor,
                account_id: account,
                action,
                recipients,
                actions_per_hour: rate.unwrap_or(config.scheduler.default_actions_per_hour),
                job_name: name,
                message_template: template,
                manual,
            })?;
            println!("{}", outcome.message);
            if let Some(job_id) = outcome.job_id {
                println!("Job id: {job_id}");
            }
        }
        JobCmd::Cancel { actor: _, job_id } => {
            manager.cancel(&job_id)?;
            println!("Job '{job_id}' cancelled");
        }
        JobCmd::List { actor } => {
            let actor = db.get_actor(&actor)?.unwrap_or(Actor {
                id: actor.clone(),
                display_name: actor,
                role: ActorRole::Operator,
            });
            let views = list_running_jobs(db, &actor)?;
            if views.is_empty() {
                println!("No jobs visible to '{}'", actor.id);
                return Ok(());
            }
            for view in views {
                let job = &view.job;
                println!(
                    "{}  {:<20} {:<16} {:<24} {}/{} done ({} failed)  est. {}  by {}",
                    job.id,
                    job.name,
                    job.action,
                    view.account_name,
                    job.stats.completed,
                    job.stats.total,
                    job.stats.failed,
                    job.estimated_completion.format("%Y-%m-%d %H:%M"),
                    view.created_by_name
                );
            }
        }
    }
    Ok(())
}
