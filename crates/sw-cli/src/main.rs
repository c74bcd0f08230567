//! Surface Warden CLI
//!
//! Command-line interface for attack-surface discovery and the asset registry.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod commands;
mod config;
mod output;
mod validator;

use commands::{
    build_service, load_report, parse_filter, parse_keys, pending_report, resolve_selection,
    save_report, select_by_mode, CommitMode, ResolveMode,
};
use config::AppConfig;
use sw_connectors::{DiscoveryError, Seed};
use sw_core::ServiceError;
use validator::ConfigValidator;

#[derive(Parser)]
#[command(name = "surface-warden")]
#[command(author = "Surface Warden Team")]
#[command(version)]
#[command(about = "Attack-surface discovery and asset registry", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(long, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid output format: {}", s)),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Query every enabled source for a seed and reconcile the results
    Discover {
        /// Domain or IP address to discover from
        seed: String,

        /// Write the pending candidates to a report file
        #[arg(short, long, value_name = "FILE")]
        save: Option<PathBuf>,

        /// Commit candidates right away
        #[arg(long, value_enum)]
        commit: Option<CommitMode>,

        /// How to settle conflicting candidates when committing
        #[arg(long, value_enum)]
        resolve: Option<ResolveMode>,

        /// Only show candidates matching field=value (repeatable)
        #[arg(short, long, value_name = "FIELD=VALUE")]
        filter: Vec<String>,

        /// Overall deadline for this discovery, in milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,
    },

    /// List the pending candidates of a saved report
    Pending {
        /// Report written by `discover --save`
        #[arg(short, long, value_name = "FILE")]
        report: PathBuf,

        /// Only show candidates matching field=value (repeatable)
        #[arg(short, long, value_name = "FIELD=VALUE")]
        filter: Vec<String>,
    },

    /// Commit candidates from a saved report into the registry
    Commit {
        /// Report written by `discover --save`
        #[arg(short, long, value_name = "FILE")]
        report: PathBuf,

        /// Candidate ids or unambiguous id prefixes
        #[arg(required_unless_present = "all")]
        ids: Vec<String>,

        /// Commit every pending candidate
        #[arg(long, conflicts_with = "ids")]
        all: bool,

        /// How to settle conflicting candidates
        #[arg(long, value_enum)]
        resolve: Option<ResolveMode>,
    },

    /// Drop candidates from a saved report without committing them
    Ignore {
        /// Report written by `discover --save`
        #[arg(short, long, value_name = "FILE")]
        report: PathBuf,

        /// Candidate ids or unambiguous id prefixes
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Inspect or edit the asset registry
    Registry {
        #[command(subcommand)]
        action: RegistryCommands,
    },

    /// Show source health and throttle state
    Sources,

    /// Validate configuration file
    Validate {
        /// Also check that a seed is acceptable
        #[arg(long)]
        seed: Option<String>,
    },

    /// Show current configuration
    Config {
        /// Show secrets (API keys)
        #[arg(long)]
        show_secrets: bool,
    },
}

#[derive(Subcommand)]
enum RegistryCommands {
    /// List registry assets
    List {
        /// Only show assets matching field=value (repeatable)
        #[arg(short, long, value_name = "FIELD=VALUE")]
        filter: Vec<String>,
    },

    /// Delete assets by identity key (value/type)
    Delete {
        /// Keys such as example.com/domain or 192.0.2.1/host
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = match AppConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) if cli.config.is_some() => return Err(e),
        Err(_) => AppConfig::default(),
    };
    config.apply_env_overrides();

    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    sw_observability::init_logging_with_config(sw_observability::LoggingConfig::from_level_name(
        level,
        config.logging.json_format,
    ));
    sw_observability::register_metrics();

    if cli.verbose && cli.config.is_none() && !config_path.exists() {
        eprintln!("Using default configuration (no config file found)");
    }

    match cli.command {
        Commands::Discover {
            seed,
            save,
            commit,
            resolve,
            filter,
            deadline_ms,
        } => {
            let deadline = deadline_ms
                .map(Duration::from_millis)
                .or_else(|| config.discovery.orchestrator.deadline());
            cmd_discover(
                &config,
                &seed,
                deadline,
                save.as_deref(),
                commit,
                resolve,
                &filter,
                cli.format,
            )
            .await
        }
        Commands::Pending { report, filter } => {
            cmd_pending(&report, &filter, cli.format).await
        }
        Commands::Commit {
            report,
            ids,
            all,
            resolve,
        } => cmd_commit(&config, &report, &ids, all, resolve, cli.format).await,
        Commands::Ignore { report, ids } => cmd_ignore(&config, &report, &ids, cli.format).await,
        Commands::Registry { action } => cmd_registry(&config, action, cli.format).await,
        Commands::Sources => cmd_sources(&config, cli.format).await,
        Commands::Validate { seed } => cmd_validate(config_path, seed.as_deref()).await,
        Commands::Config { show_secrets } => cmd_config(config, show_secrets, cli.format).await,
    }
}

fn default_config_path() -> PathBuf {
    directories::ProjectDirs::from("io", "surface-warden", "surface-warden")
        .map(|dirs| dirs.config_dir().join("config.yaml"))
        .unwrap_or_else(|| PathBuf::from("config.yaml"))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_discover(
    config: &AppConfig,
    seed: &str,
    deadline: Option<Duration>,
    save: Option<&Path>,
    commit: Option<CommitMode>,
    resolve: Option<ResolveMode>,
    filter: &[String],
    format: OutputFormat,
) -> Result<()> {
    let filter = parse_filter(filter)?;
    let service = build_service(config).await?;
    let report = match service.discover_with_deadline(seed, deadline).await {
        Ok(report) => report,
        Err(ServiceError::Discovery(DiscoveryError::AllSourcesFailed { errors })) => {
            for error in &errors {
                eprintln!("  {} {}", "✗".red(), error);
            }
            bail!("All {} discovery sources failed for {}", errors.len(), seed);
        }
        Err(e) => return Err(e.into()),
    };

    let committed = match commit {
        Some(mode) => {
            let selections = select_by_mode(&report.candidates, mode, resolve);
            Some(service.commit(report.session_id, selections).await?)
        }
        None => None,
    };

    let mut shown = pending_report(&service, &report).await?;
    if let Some(path) = save {
        save_report(path, &shown)?;
    }
    if let Some(spec) = &filter {
        shown.candidates = spec.apply(&shown.candidates)?;
    }

    if format == OutputFormat::Json {
        print_json(&serde_json::json!({
            "report": shown,
            "commit": committed,
        }))?;
        return Ok(());
    }

    output::print_report(&shown);
    if let Some(commit_report) = &committed {
        println!();
        output::print_commit(commit_report);
    }
    if let Some(path) = save {
        println!();
        println!("Report saved to {}", path.display().to_string().cyan());
    }
    Ok(())
}

async fn cmd_pending(
    report_path: &Path,
    filter: &[String],
    format: OutputFormat,
) -> Result<()> {
    let filter = parse_filter(filter)?;
    let report = load_report(report_path)?;
    let candidates = match &filter {
        Some(spec) => spec.apply(&report.candidates)?,
        None => report.candidates.clone(),
    };

    if format == OutputFormat::Json {
        return print_json(&candidates);
    }

    println!(
        "{} {} {}",
        "Pending".bold(),
        report.seed.to_string().cyan(),
        format!("(session {})", report.session_id).dimmed()
    );
    println!("───────────────────────────────");
    if candidates.is_empty() {
        println!("No pending candidates");
    } else {
        output::print_candidates(&candidates);
    }
    if let Some(spec) = &filter {
        println!();
        println!(
            "{} of {} candidate(s) match {}",
            candidates.len(),
            report.candidates.len(),
            spec
        );
    }
    Ok(())
}

async fn cmd_commit(
    config: &AppConfig,
    report_path: &Path,
    ids: &[String],
    all: bool,
    resolve: Option<ResolveMode>,
    format: OutputFormat,
) -> Result<()> {
    let report = load_report(report_path)?;
    if report.candidates.is_empty() {
        bail!("Report {} has no pending candidates", report_path.display());
    }

    let service = build_service(config).await?;
    let session_id = service.restore_session(&report).await;
    let selections = if all {
        select_by_mode(&report.candidates, CommitMode::All, resolve)
    } else {
        resolve_selection(&report.candidates, ids, resolve)?
    };

    let result = service.commit(session_id, selections).await?;
    let remaining = pending_report(&service, &report).await?;
    save_report(report_path, &remaining)?;

    if format == OutputFormat::Json {
        return print_json(&result);
    }
    output::print_commit(&result);
    println!(
        "{} candidate(s) still pending in {}",
        remaining.candidates.len(),
        report_path.display()
    );
    Ok(())
}

async fn cmd_ignore(
    config: &AppConfig,
    report_path: &Path,
    ids: &[String],
    format: OutputFormat,
) -> Result<()> {
    let report = load_report(report_path)?;
    let service = build_service(config).await?;
    let session_id = service.restore_session(&report).await;

    let ignored: Vec<uuid::Uuid> = resolve_selection(&report.candidates, ids, None)?
        .into_iter()
        .map(|s| s.candidate_id)
        .collect();
    let removed = service.ignore(session_id, &ignored).await?;
    let remaining = pending_report(&service, &report).await?;
    save_report(report_path, &remaining)?;

    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "ignored": removed,
            "pending": remaining.candidates.len(),
        }));
    }
    println!(
        "{} Ignored {} candidate(s); {} still pending",
        "✓".green(),
        removed,
        remaining.candidates.len()
    );
    Ok(())
}

async fn cmd_registry(
    config: &AppConfig,
    action: RegistryCommands,
    format: OutputFormat,
) -> Result<()> {
    let service = build_service(config).await?;

    match action {
        RegistryCommands::List { filter } => {
            let filter = parse_filter(&filter)?;
            let assets = service.registry(filter.as_ref()).await?;
            if format == OutputFormat::Json {
                return print_json(&assets);
            }
            output::print_assets(&assets);
        }
        RegistryCommands::Delete { keys } => {
            let keys = parse_keys(&keys)?;
            let removed = service.registry_delete(&keys).await?;
            if format == OutputFormat::Json {
                return print_json(&serde_json::json!({
                    "requested": keys.len(),
                    "removed": removed,
                }));
            }
            println!(
                "{} Removed {} of {} asset(s)",
                "✓".green(),
                removed,
                keys.len()
            );
        }
    }

    Ok(())
}

async fn cmd_sources(config: &AppConfig, format: OutputFormat) -> Result<()> {
    let service = build_service(config).await?;
    let statuses = service.sources().await;
    if format == OutputFormat::Json {
        return print_json(&statuses);
    }
    output::print_sources(&statuses);
    Ok(())
}

async fn cmd_validate(config_path: PathBuf, seed: Option<&str>) -> Result<()> {
    println!(
        "Validating configuration: {}",
        config_path.display().to_string().cyan()
    );

    let mut config = match AppConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("{}: {:#}", "Configuration file error".red().bold(), e);
            std::process::exit(1);
        }
    };
    config.apply_env_overrides();

    let mut validation_result = ConfigValidator::validate(&config);
    if let Some(raw) = seed {
        if let Err(e) = raw.parse::<Seed>() {
            validation_result.add_error(format!("Seed '{}' is not acceptable: {}", raw, e));
        }
    }
    validation_result.print();

    let enabled = config.sources.values().filter(|s| s.enabled).count();
    println!();
    println!("{}", "Configuration Summary".bold());
    println!("─────────────────────");
    println!("  Sources: {} ({} enabled)", config.sources.len(), enabled);
    println!(
        "  Per-source timeout: {}ms",
        config.discovery.orchestrator.timeout_per_source_ms
    );
    println!(
        "  Session TTL: {}s",
        config.discovery.service.session_ttl_secs
    );
    println!("  Registry: {}", config.registry.path.display());

    if validation_result.has_errors() {
        println!();
        println!(
            "{}",
            "Configuration validation failed. Fix the errors above."
                .red()
                .bold()
        );
        std::process::exit(1);
    } else if validation_result.has_warnings() {
        println!();
        println!(
            "{}",
            "Configuration valid with warnings.".yellow().bold()
        );
    } else {
        println!();
        println!("{}", "Configuration valid.".green().bold());
    }

    Ok(())
}

async fn cmd_config(config: AppConfig, show_secrets: bool, format: OutputFormat) -> Result<()> {
    let display_config = if show_secrets {
        config
    } else {
        config.redact_secrets()
    };

    if format == OutputFormat::Json {
        return print_json(&display_config);
    }

    let yaml = serde_yaml::to_string(&display_config).context("Failed to render configuration")?;
    println!("{}", "Current Configuration".bold());
    println!("─────────────────────────");
    println!("{}", yaml);
    Ok(())
}
