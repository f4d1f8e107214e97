//! Catalog harvester CLI
//!
//! Local execution entry point. Sources and datasets live in a local JSON
//! store; `serve` runs the periodic worker until interrupted.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use harvester::{
    HarvestActions, NewSource, SourceEdit,
    backends::BackendRegistry,
    error::{AppError, Result},
    models::{FilterValue, Frequency, HarvestConfig, Job, Owner, Source, SourceConfig, SourceQuery},
    scheduler::{InMemoryQueue, Worker},
    signals::{LogSink, Signals},
    storage::LocalStorage,
};

/// Harvest dataset catalogs from remote portals
#[derive(Parser, Debug)]
#[command(name = "harvester", version, about = "Dataset catalog harvester")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "harvester.toml")]
    config: PathBuf,

    /// Storage directory (overrides `storage.path`)
    #[arg(short, long)]
    storage_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new source
    Create {
        name: String,
        url: String,
        backend: String,

        /// `manual`, an interval such as `6h`, a crontab or `@daily`
        #[arg(short, long, default_value = "manual")]
        frequency: Frequency,

        #[arg(short, long, default_value = "")]
        description: String,

        /// Owning user id
        #[arg(long)]
        owner: Option<String>,

        /// Owning organization id
        #[arg(long)]
        organization: Option<String>,

        /// Include filter, as `key=value` (repeatable)
        #[arg(long = "filter", value_name = "KEY=VALUE")]
        filters: Vec<String>,

        /// Exclude filter, as `key=value` (repeatable)
        #[arg(long = "exclude", value_name = "KEY=VALUE")]
        excludes: Vec<String>,

        /// Backend feature, as `key=true|false` (repeatable)
        #[arg(long = "feature", value_name = "KEY=BOOL")]
        features: Vec<String>,
    },

    /// Edit a source
    Edit {
        ident: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        frequency: Option<Frequency>,
        #[arg(long)]
        active: Option<bool>,
    },

    /// Soft-delete a source and drop its schedule
    Delete { ident: String },

    /// List sources
    List {
        /// Only sources with a periodic schedule
        #[arg(long)]
        scheduled: bool,

        /// Include deleted sources
        #[arg(long)]
        deleted: bool,

        #[arg(long)]
        owner: Option<String>,

        #[arg(long)]
        organization: Option<String>,
    },

    /// Show one source as JSON
    Show { ident: String },

    /// Harvest a source now
    Run {
        ident: String,

        /// Validate mapped datasets without writing them
        #[arg(long)]
        debug: bool,
    },

    /// Preview the first items of a source without keeping anything
    Preview { ident: String },

    /// Queue a harvest and let the worker run it
    Launch { ident: String },

    /// Schedule periodic harvests
    Schedule {
        ident: String,
        /// Crontab (`m h dom mon dow`), interval (`30m`, `1d`) or `@daily`
        expr: String,
    },

    /// Remove the periodic schedule
    Unschedule { ident: String },

    /// Pause the periodic schedule, keeping its trigger
    Pause { ident: String },

    /// Resume a paused schedule
    Resume { ident: String },

    /// Accept a source
    Validate {
        ident: String,
        #[arg(long)]
        by: Option<String>,
        #[arg(long)]
        comment: Option<String>,
    },

    /// Refuse a source
    Reject {
        ident: String,
        #[arg(long)]
        by: Option<String>,
        #[arg(long)]
        comment: Option<String>,
    },

    /// Show the job history of a source, newest first
    Jobs {
        ident: String,

        #[arg(short, long, default_value_t = 1)]
        page: usize,

        /// Show a single job as JSON
        #[arg(long)]
        job: Option<String>,
    },

    /// Remove deleted sources for good
    Purge,

    /// List available backends
    Backends,

    /// Run the worker and periodic schedules until Ctrl-C
    Serve,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool, level: &str) {
    let level = if verbose { "debug" } else { level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Parse a `key=value` argument.
fn split_pair(raw: &str) -> Result<(&str, &str)> {
    raw.split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| AppError::invalid("config", format!("expected key=value, got '{raw}'")))
}

/// Integers and booleans keep their type, anything else is a string.
fn filter_value(raw: &str) -> serde_json::Value {
    if let Ok(n) = raw.parse::<i64>() {
        return n.into();
    }
    match raw {
        "true" => true.into(),
        "false" => false.into(),
        _ => raw.into(),
    }
}

fn build_config(filters: &[String], excludes: &[String], features: &[String]) -> Result<SourceConfig> {
    let mut config = SourceConfig::default();
    for raw in filters {
        let (key, value) = split_pair(raw)?;
        config.filters.push(FilterValue::include(key, filter_value(value)));
    }
    for raw in excludes {
        let (key, value) = split_pair(raw)?;
        config.filters.push(FilterValue::exclude(key, filter_value(value)));
    }
    for raw in features {
        let (key, value) = split_pair(raw)?;
        let enabled = value
            .parse()
            .map_err(|_| AppError::invalid(format!("config.features.{key}"), "expected true or false"))?;
        config.features.insert(key.to_string(), enabled);
    }
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_source_line(source: &Source) {
    let status = source.last_job().map(|j| j.status.as_str()).unwrap_or("never run");
    let schedule = source
        .periodic_task
        .as_ref()
        .map(|t| format!("{}{}", t.trigger, if t.enabled { "" } else { " (paused)" }))
        .unwrap_or_else(|| "-".into());
    println!(
        "{:<24} {:<8} {:<10} {:<14} {:<12} {}",
        source.slug,
        source.backend,
        format!("{:?}", source.validation.state).to_lowercase(),
        schedule,
        status,
        source.url
    );
}

fn print_job_summary(job: &Job) {
    println!(
        "{} {} started {} ended {} items {} failed {}{}",
        job.id,
        job.status.as_str(),
        job.started.format("%Y-%m-%d %H:%M:%S"),
        job.ended
            .map(|e| e.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".into()),
        job.items.len(),
        job.failed_items(),
        if job.dry_run { " (dry run)" } else { "" }
    );
    for error in &job.errors {
        println!("  error: {}", error.message);
    }
}

async fn execute(command: Command, actions: &Arc<HarvestActions>, worker: &Worker) -> Result<()> {
    match command {
        Command::Create {
            name,
            url,
            backend,
            frequency,
            description,
            owner,
            organization,
            filters,
            excludes,
            features,
        } => {
            let source = actions
                .create_source(NewSource {
                    name,
                    url,
                    backend,
                    description,
                    frequency,
                    owner: Owner::from_parts(owner, organization)?,
                    config: build_config(&filters, &excludes, &features)?,
                })
                .await?;
            println!("Created source {} ({})", source.slug, source.id);
        }

        Command::Edit {
            ident,
            name,
            url,
            description,
            frequency,
            active,
        } => {
            let source = actions
                .update_source(
                    &ident,
                    SourceEdit {
                        name,
                        url,
                        description,
                        frequency,
                        config: None,
                        active,
                    },
                )
                .await?;
            println!("Updated source {}", source.slug);
        }

        Command::Delete { ident } => {
            let source = actions.delete_source(&ident).await?;
            println!("Deleted source {}", source.slug);
        }

        Command::List {
            scheduled,
            deleted,
            owner,
            organization,
        } => {
            let sources = actions
                .list_sources(&SourceQuery {
                    owner,
                    organization,
                    include_deleted: deleted,
                    scheduled_only: scheduled,
                })
                .await?;
            if sources.is_empty() {
                println!("No sources found");
            }
            for source in &sources {
                print_source_line(source);
            }
        }

        Command::Show { ident } => print_json(&actions.get_source(&ident).await?)?,

        Command::Run { ident, debug } => {
            let job = actions.run(&ident, debug).await?;
            print_job_summary(&job);
        }

        Command::Preview { ident } => print_json(&actions.preview(&ident).await?)?,

        Command::Launch { ident } => {
            actions.launch(&ident).await?;
            // The queue lives in this process: drain it before exiting.
            worker.run_pending().await;
            let page = actions.list_jobs(&ident, 1).await?;
            if let Some(job) = page.jobs.first() {
                print_job_summary(job);
            }
        }

        Command::Schedule { ident, expr } => {
            let task = actions.schedule(&ident, &expr).await?;
            println!("Scheduled {} ({})", ident, task.trigger);
            if let Some(next) = task.next_run() {
                println!("Next run at {}", next.format("%Y-%m-%d %H:%M:%S UTC"));
            }
        }

        Command::Unschedule { ident } => {
            actions.unschedule(&ident).await?;
            println!("Unscheduled {ident}");
        }

        Command::Pause { ident } => {
            actions.enable_schedule(&ident, false).await?;
            println!("Paused {ident}");
        }

        Command::Resume { ident } => {
            actions.enable_schedule(&ident, true).await?;
            println!("Resumed {ident}");
        }

        Command::Validate { ident, by, comment } => {
            let source = actions.validate_source(&ident, by, comment).await?;
            println!("Accepted {}", source.slug);
        }

        Command::Reject { ident, by, comment } => {
            let source = actions.reject_source(&ident, by, comment).await?;
            println!("Refused {}", source.slug);
        }

        Command::Jobs { ident, page, job } => match job {
            Some(job_id) => print_json(&actions.get_job(&ident, &job_id).await?)?,
            None => {
                let page = actions.list_jobs(&ident, page).await?;
                println!(
                    "Page {} ({} jobs in total, {} per page)",
                    page.page, page.total, page.page_size
                );
                for job in &page.jobs {
                    print_job_summary(job);
                }
            }
        },

        Command::Purge => {
            let purged = actions.purge_sources().await?;
            println!("Purged {purged} deleted source(s)");
        }

        Command::Backends => {
            for backend in actions.list_backends() {
                let filters: Vec<_> = backend
                    .filters
                    .iter()
                    .map(|f| format!("{}:{}", f.key, f.value_type))
                    .collect();
                let features: Vec<_> = backend.features.iter().map(|f| f.key.as_str()).collect();
                println!(
                    "{:<8} {:<10} filters [{}] features [{}]",
                    backend.name,
                    backend.display_name,
                    filters.join(", "),
                    features.join(", ")
                );
            }
        }

        Command::Serve => {
            let restored = actions.restore_schedules().await?;
            log::info!("Restored {} periodic schedule(s)", restored);
            worker
                .run_until(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        log::error!("Unable to listen for Ctrl-C: {}", e);
                    }
                })
                .await;
        }
    }
    Ok(())
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = HarvestConfig::load(&cli.config);
    let level = loaded
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| "info".into());
    init_logging(cli.verbose, &level);

    let mut config = loaded.unwrap_or_else(|e| {
        log::debug!("No configuration loaded from {}: {}", cli.config.display(), e);
        HarvestConfig::default()
    });
    if let Some(dir) = cli.storage_dir {
        config.storage.path = dir;
    }

    match setup_and_execute(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn setup_and_execute(command: Command, config: HarvestConfig) -> Result<()> {
    config.validate()?;

    let storage = Arc::new(LocalStorage::new(&config.storage.path));
    let queue = Arc::new(InMemoryQueue::new());
    let registry = Arc::new(BackendRegistry::with_defaults(config.http.clone())?);
    let actions = Arc::new(HarvestActions::new(
        storage.clone(),
        storage,
        registry,
        queue.clone(),
        Signals::new().with_sink(LogSink),
        config.harvest.clone(),
    ));
    let worker = Worker::new(actions.clone(), queue, config.scheduler.tick());

    log::debug!("Using storage at {}", config.storage.path.display());
    execute(command, &actions, &worker).await
}
