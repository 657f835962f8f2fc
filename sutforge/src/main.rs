//! SUT Forge operator CLI.
//!
//! Inspect settings, build single entities and run setup scenarios against
//! the configured SUT without going through a test runner.

#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::sync::Arc;
use sutforge::factory::{FactoryDispatcher, FactoryError, FactoryRegistry, Overrides};
use sutforge::harness::{self, HarnessError, HostStrategy, WorkerId};
use sutforge::setup::{CustomRepoOptions, SetupError, SetupOrchestrator};
use sutforge::transport::{Transport, TransportError, TransportSet};
use sutforge_common::{
    ConfigError, ConfigureOptions, ErrorCode, LogConfig, Settings, TargetKind, configure, init_logging,
};
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "sutforge")]
#[command(author, version, about = "SUT Forge - entity factories and setup scenarios")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings directory (defaults to SUTFORGE_SETTINGS_DIR or ".")
    #[arg(long, global = true)]
    settings_dir: Option<std::path::PathBuf>,

    /// Treat invalid sections as unset instead of failing
    #[arg(long, global = true)]
    lazy: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate every configured section
    Validate,

    /// Print the value at a dotted settings path
    Get {
        /// Path such as `server.hostname`
        path: String,
    },

    /// List known sections and whether each is set
    Sections,

    /// Create one entity through its factory
    Make {
        /// Factory name, e.g. `subnet` or `org`
        factory: String,

        /// Override a field (`key=value`; values are parsed as JSON when possible)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,

        #[arg(long, value_enum, default_value = "api")]
        transport: TransportChoice,

        #[arg(long, value_enum, default_value = "server")]
        target: TargetChoice,
    },

    /// Run a setup scenario
    Setup {
        #[command(subcommand)]
        scenario: SetupScenario,
    },

    /// Bind this process to a SUT host and print the binding
    Align {
        /// Worker id (`master` or `gw<N>`)
        #[arg(long, default_value = "master")]
        worker: String,

        /// Host strategy (defaults to `server.xdist_behavior`)
        #[arg(long, value_enum)]
        strategy: Option<HostStrategy>,
    },

    /// Print the session header line
    Header,

    /// List registered factories
    Factories,
}

#[derive(Subcommand)]
enum SetupScenario {
    /// Organisation with a synced custom repository behind an activation key
    CustomRepo {
        /// Yum repository URL
        #[arg(long)]
        url: String,

        #[arg(long)]
        org_id: Option<u64>,

        #[arg(long, value_enum, default_value = "api")]
        transport: TransportChoice,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TransportChoice {
    Api,
    Cli,
}

#[derive(Clone, Copy, ValueEnum)]
enum TargetChoice {
    Server,
    Capsule,
}

impl From<TargetChoice> for TargetKind {
    fn from(choice: TargetChoice) -> Self {
        match choice {
            TargetChoice::Server => TargetKind::Server,
            TargetChoice::Capsule => TargetKind::Capsule,
        }
    }
}

fn pick(transports: &TransportSet, choice: TransportChoice) -> Arc<dyn Transport> {
    match choice {
        TransportChoice::Api => transports.api.clone(),
        TransportChoice::Cli => transports.cli.clone(),
    }
}

/// `key=value` with the value read as JSON when it parses, else as a string.
fn parse_assignment(raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("expected KEY=VALUE, got '{raw}'");
    };
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

fn load_settings(cli: &Cli) -> Result<Arc<Settings>> {
    let mut options = ConfigureOptions::from_env();
    if let Some(dir) = &cli.settings_dir {
        options.settings_dir = dir.clone();
    }
    if cli.lazy {
        options.lazy = true;
    }
    let settings = configure(&options)
        .with_context(|| format!("loading settings from {}", options.settings_dir.display()))?;
    Ok(Arc::new(settings))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Catalog code of the first library error in the chain, if any.
fn error_code(err: &anyhow::Error) -> Option<ErrorCode> {
    err.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<ConfigError>() {
            return Some(e.code());
        }
        if let Some(e) = cause.downcast_ref::<TransportError>() {
            return Some(e.code());
        }
        if let Some(e) = cause.downcast_ref::<FactoryError>() {
            return Some(e.code());
        }
        if let Some(e) = cause.downcast_ref::<SetupError>() {
            return Some(e.code());
        }
        cause.downcast_ref::<HarnessError>().map(HarnessError::code)
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let result = run(Cli::parse()).await;
    if let Err(err) = &result
        && let Some(code) = error_code(err)
    {
        eprintln!("{}", code.entry().format_full());
    }
    result
}

async fn run(cli: Cli) -> Result<()> {
    let settings = load_settings(&cli)?;

    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    } else if let Ok(level) = settings.verbosity() {
        log_config = log_config.with_verbosity(level);
    }
    let _logging_guards = init_logging(&log_config)?;
    debug!(providers = ?settings.provider_names(), "Settings loaded");

    match cli.command {
        Commands::Validate => {
            let errors = settings.validate();
            if errors.is_empty() {
                println!("Settings are valid");
                return Ok(());
            }
            for error in &errors {
                eprintln!("{error}");
            }
            bail!("{} validation error(s)", errors.len());
        }
        Commands::Get { path } => {
            let value = settings.get_value(&path)?;
            match value {
                Value::String(s) => println!("{s}"),
                other => print_json(&other)?,
            }
            Ok(())
        }
        Commands::Sections => {
            for section in settings.sections() {
                let state = if settings.is_set(&section) { "set" } else { "unset" };
                println!("{section:<20} {state}");
            }
            Ok(())
        }
        Commands::Factories => {
            for name in FactoryRegistry::global().names() {
                println!("{name}");
            }
            Ok(())
        }
        Commands::Make {
            factory,
            set,
            transport,
            target,
        } => {
            let mut overrides = Overrides::new();
            for raw in &set {
                let (key, value) = parse_assignment(raw)?;
                overrides = overrides.set(&key, value);
            }
            let transports = TransportSet::from_settings(settings.clone())?;
            let transport = pick(&transports, transport);
            let dispatcher = FactoryDispatcher::new(&transport, settings, target.into());
            let entity = dispatcher.make(&factory, overrides).await?;
            info!(factory = %factory, id = ?entity.id(), "Entity created");
            print_json(&entity)
        }
        Commands::Setup { scenario } => match scenario {
            SetupScenario::CustomRepo {
                url,
                org_id,
                transport,
            } => {
                let transports = TransportSet::from_settings(settings.clone())?;
                let orchestrator = SetupOrchestrator::new(pick(&transports, transport), settings)?;
                let bundle = orchestrator
                    .setup_org_for_a_custom_repo(&CustomRepoOptions {
                        organization_id: org_id,
                        ..CustomRepoOptions::new(url)
                    })
                    .await?;
                print_json(&bundle)
            }
        },
        Commands::Align { worker, strategy } => {
            let worker: WorkerId = worker.parse()?;
            let strategy = match strategy {
                Some(strategy) => strategy,
                None => HostStrategy::from_settings(&settings)?,
            };
            let binding = harness::align_worker(&settings, worker, strategy, None).await?;
            print_json(&binding)
        }
        Commands::Header => {
            println!("{}", harness::test_header(&settings)?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignment_reads_json_values() {
        assert_eq!(parse_assignment("mask=255.255.255.0").unwrap().1, Value::from("255.255.255.0"));
        assert_eq!(parse_assignment("organization-ids=[1,2]").unwrap().1, serde_json::json!([1, 2]));
        assert_eq!(parse_assignment("locked=true").unwrap().1, Value::Bool(true));
        assert!(parse_assignment("novalue").is_err());
    }

    #[test]
    fn test_cli_parses_make_with_overrides() {
        let cli = Cli::try_parse_from([
            "sutforge", "make", "subnet", "--set", "mask=255.255.0.0", "--transport", "cli",
        ])
        .unwrap();
        match cli.command {
            Commands::Make { factory, set, .. } => {
                assert_eq!(factory, "subnet");
                assert_eq!(set, vec!["mask=255.255.0.0".to_string()]);
            }
            _ => panic!("expected make"),
        }
    }

    #[test]
    fn test_error_code_found_through_context() {
        let err = anyhow::Error::from(HarnessError::InvalidWorker("gwx".into())).context("aligning worker");
        assert_eq!(error_code(&err), Some(ErrorCode::WorkerAlignmentFailed));
        assert_eq!(error_code(&anyhow::anyhow!("plain")), None);
    }

    #[test]
    fn test_cli_parses_align_strategy() {
        let cli = Cli::try_parse_from(["sutforge", "align", "--worker", "gw2", "--strategy", "on-demand"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Align {
                strategy: Some(HostStrategy::OnDemand),
                ..
            }
        ));
    }
}
