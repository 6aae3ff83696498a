use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rootsync_core::{ConfigManager, LoggingConfig, ModuleView, ProjectModel, RootSyncConfig};
use rootsync_project::{FsArtifactInspector, ManifestProject, ManifestWatcher, MANIFEST_FILE};
use rootsync_reconcile::{GateMode, LibraryManager, PassReport, Reconciler};

#[derive(Parser)]
#[command(name = "rootsync")]
#[command(about = "Keeps the managed metadata library of each module in sync with its dependencies", long_about = None)]
#[command(version)]
struct Cli {
    /// Project manifest
    #[arg(short, long, global = true, env = "ROOTSYNC_MANIFEST", default_value = MANIFEST_FILE)]
    manifest: PathBuf,

    /// Configuration file (defaults to ./.rootsync.toml, then ~/.rootsync/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one reconciliation pass and print what changed
    Sync,

    /// Reconcile continuously, reloading the manifest on change, until Ctrl-C
    Watch {
        /// Quiet period before a manifest change is picked up (ms)
        #[arg(long, default_value_t = 200)]
        reload_debounce_ms: u64,
    },

    /// Show the managed libraries of every module
    Show,

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a default configuration file
    Init {
        /// Target path
        #[arg(default_value = ".rootsync.toml")]
        path: PathBuf,
    },

    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Config(ConfigCommands::Init { path }) = &cli.command {
        ConfigManager::create_default_config(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("{} {}", "Wrote".green(), path.display());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.logging, cli.verbose);

    match execute_command(&cli, config).await {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<RootSyncConfig> {
    let manager = match path {
        Some(path) => ConfigManager::load_from(path)?,
        None => ConfigManager::load()?,
    };
    Ok(manager.into_config())
}

fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let result = match logging.format.as_str() {
        "json" => registry.with(layer.json()).try_init(),
        "compact" => registry.with(layer.compact()).try_init(),
        _ => registry.with(layer.pretty()).try_init(),
    };
    if let Err(e) = result {
        eprintln!("tracing already initialised: {}", e);
    }
}

async fn execute_command(cli: &Cli, config: RootSyncConfig) -> Result<()> {
    match &cli.command {
        Commands::Sync => execute_sync(cli, config),
        Commands::Watch { reload_debounce_ms } => {
            execute_watch(cli, config, Duration::from_millis(*reload_debounce_ms)).await
        }
        Commands::Show => execute_show(cli, &config),
        Commands::Config(ConfigCommands::Show) => {
            let text = toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{}", text);
            Ok(())
        }
        Commands::Config(ConfigCommands::Init { .. }) => Ok(()),
    }
}

fn load_project(cli: &Cli) -> Result<Arc<ManifestProject>> {
    ManifestProject::load(&cli.manifest)
        .with_context(|| format!("Failed to load project from {}", cli.manifest.display()))
}

fn execute_sync(cli: &Cli, config: RootSyncConfig) -> Result<()> {
    let project = load_project(cli)?;
    let inspector = Arc::new(FsArtifactInspector::new(&config.scanner));
    let reconciler = Reconciler::new(&config, inspector);
    let report = reconciler
        .run_pass(&*project)
        .context("Reconciliation failed")?;
    print_report(cli.json, &report)
}

async fn execute_watch(cli: &Cli, config: RootSyncConfig, reload_debounce: Duration) -> Result<()> {
    let project = load_project(cli)?;
    let inspector = Arc::new(FsArtifactInspector::new(&config.scanner));
    let manager = LibraryManager::open(project.clone(), config, inspector)
        .context("Failed to open library manager")?;
    let watcher = ManifestWatcher::new(project.clone())
        .with_debounce(reload_debounce)
        .spawn()
        .context("Failed to watch project directory")?;

    println!(
        "{} {} ({})",
        "Watching".cyan().bold(),
        project.name(),
        project.root().display()
    );

    let mut modes = manager.gate().watch_mode();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = modes.changed() => {
                if changed.is_err() {
                    break;
                }
                if *modes.borrow_and_update() != GateMode::Idle {
                    continue;
                }
                if let Some(error) = manager.gate().last_error() {
                    warn!("last pass failed: {}", error);
                } else if let Some(report) = manager.gate().last_report() {
                    print_report(cli.json, &report)?;
                }
            }
        }
    }

    info!("shutting down");
    watcher.stop();
    manager.close().await;
    let metrics = manager.metrics();
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
    } else {
        println!(
            "{} {} passes, {} commits, {} failed",
            "Stopped:".yellow().bold(),
            metrics.passes,
            metrics.commits,
            metrics.failed_passes
        );
    }
    Ok(())
}

fn execute_show(cli: &Cli, config: &RootSyncConfig) -> Result<()> {
    let project = load_project(cli)?;
    let value = managed_libraries(&project, config);
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{} {}", "Project:".cyan().bold(), project.name());
    for module in value["modules"].as_array().into_iter().flatten() {
        let name = module["module"].as_str().unwrap_or_default();
        let kind = module["kind"].as_str().unwrap_or_default();
        println!("  {} {}", name.bold(), format!("({})", kind).as_str().dimmed());
        let libraries = module["libraries"].as_array().cloned().unwrap_or_default();
        if libraries.is_empty() {
            println!("    {}", "no managed library".dimmed());
        }
        for library in libraries {
            println!("    {}", library["name"].as_str().unwrap_or_default().green());
            for root in library["classes"].as_array().into_iter().flatten() {
                println!("      classes {}", root.as_str().unwrap_or_default());
            }
            for root in library["sources"].as_array().into_iter().flatten() {
                println!("      sources {}", root.as_str().unwrap_or_default());
            }
        }
    }
    Ok(())
}

fn managed_libraries(project: &ManifestProject, config: &RootSyncConfig) -> serde_json::Value {
    let modules: Vec<_> = project
        .inner()
        .in_memory_modules()
        .into_iter()
        .map(|module| {
            let libraries: Vec<_> = module
                .table()
                .libraries_snapshot()
                .into_iter()
                .filter(|lib| config.library.matches(&lib.name))
                .map(|lib| {
                    json!({
                        "name": lib.name,
                        "id": lib.id.to_string(),
                        "classes": lib.roots.classes.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
                        "sources": lib.roots.sources.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
                    })
                })
                .collect();
            json!({
                "module": module.id_ref().as_str(),
                "kind": module.kind().to_string(),
                "libraries": libraries,
            })
        })
        .collect();
    json!({ "project": project.name(), "modules": modules })
}

fn print_report(as_json: bool, report: &PassReport) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!(
        "{} {} modules, {} commits in {:?}",
        "Reconciled".green().bold(),
        report.modules.len(),
        report.commits(),
        report.duration
    );
    for entry in &report.modules {
        let outcome = entry.outcome.to_string();
        let outcome = if entry.outcome.committed() {
            outcome.as_str().yellow()
        } else {
            outcome.as_str().dimmed()
        };
        println!("  {:<24} {}", entry.module.as_str(), outcome);
    }
    Ok(())
}
