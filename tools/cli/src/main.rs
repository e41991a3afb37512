//! settingsync CLI - export and import editor configuration.
//!
//! This tool collects installed add-ons, settings, themes and snippets
//! from a local editor install and syncs them with a local directory,
//! a GitHub gist or a GitHub repository.

mod terminal;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use settingsync_common::{Category, Credential};
use settingsync_host::{
    keys, ConfigStore, EditorEnvironment, Edition, Host, JsonFileStore, SyncConfiguration,
    VscodeHost, CONFIG_NAMESPACE,
};
use settingsync_sync::{ChangeSet, ComparisonStatus, SyncEngine};

use crate::terminal::TerminalInteraction;

#[derive(Parser)]
#[command(name = "settingsync")]
#[command(about = "settingsync - Sync editor add-ons, settings, themes and snippets")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Answer every prompt with its first action.
    #[arg(short, long, global = true)]
    yes: bool,

    /// settingsync configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Editor edition (code, insiders, vscodium, cursor, ...).
    #[arg(long, global = true, default_value = "code")]
    edition: String,

    /// Override the editor's data directory.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Override the editor's extensions directory.
    #[arg(long, global = true)]
    extensions_dir: Option<PathBuf>,

    /// Workspace folder whose settings and snippets are included.
    #[arg(long, global = true)]
    workspace: Vec<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export one category, or all of them.
    Export {
        /// extensions, settings, themes, snippets or all.
        #[arg(default_value = "all")]
        category: String,
    },

    /// Import one category, or all of them, replacing local state.
    Import {
        /// extensions, settings, themes, snippets or all.
        #[arg(default_value = "all")]
        category: String,
    },

    /// Show how the remote add-on list differs from the local one.
    Compare,

    /// Check that the configured backend is reachable.
    Test,

    /// Read or change settingsync configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show the detected editor paths.
    Env,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print every configuration key.
    Show,

    /// Print one key.
    Get { key: String },

    /// Set one key. Lists are comma-separated.
    Set { key: String, value: String },

    /// Check the configuration for the selected export method.
    Validate,
}

/// Selected category argument.
enum Target {
    One(Category),
    All,
}

fn parse_target(arg: &str) -> Result<Target> {
    if arg.eq_ignore_ascii_case("all") {
        return Ok(Target::All);
    }
    Ok(Target::One(arg.parse().context("Invalid category")?))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let store = Arc::new(JsonFileStore::new(
        config_path(cli.config.as_deref())?,
        Some(CONFIG_NAMESPACE),
    ));

    match &cli.command {
        Commands::Export { category } => cmd_export(&cli, store, category).await,
        Commands::Import { category } => cmd_import(&cli, store, category).await,
        Commands::Compare => cmd_compare(&cli, store).await,
        Commands::Test => cmd_test(&cli, store).await,
        Commands::Config { action } => cmd_config(store.as_ref(), action).await,
        Commands::Env => cmd_env(&cli),
    }
}

/// `--config`, or `<config_dir>/settingsync/settings.json`.
fn config_path(explicit: Option<&std::path::Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let dir = dirs::config_dir().context("Cannot determine the configuration directory")?;
    Ok(dir.join("settingsync").join("settings.json"))
}

fn environment(cli: &Cli) -> Result<EditorEnvironment> {
    let edition: Edition = cli.edition.parse().context("Invalid edition")?;
    let mut env = EditorEnvironment::detect(edition).context("Failed to detect editor paths")?;
    if let Some(dir) = &cli.data_dir {
        env = env.with_data_dir(dir);
    }
    if let Some(dir) = &cli.extensions_dir {
        env = env.with_extensions_dir(dir);
    }
    Ok(env)
}

fn engine(cli: &Cli, store: Arc<JsonFileStore>) -> Result<SyncEngine> {
    let host = VscodeHost::new(environment(cli)?).with_workspace_folders(cli.workspace.clone());
    info!("Using {} at {}", host.name(), host.user_dir().display());
    SyncEngine::new(
        Arc::new(host),
        Arc::new(TerminalInteraction::new(cli.yes)),
        store,
    )
    .context("Failed to create sync engine")
}

async fn cmd_export(cli: &Cli, store: Arc<JsonFileStore>, category: &str) -> Result<()> {
    let target = parse_target(category)?;
    let engine = engine(cli, store)?;

    match target {
        Target::One(category) => {
            engine
                .export_category(category)
                .await
                .with_context(|| format!("Failed to export {}", category))?;
        }
        Target::All => {
            let results = engine.export_all().await.context("Failed to export")?;
            for result in &results {
                let mark = if result.success { "ok  " } else { "FAIL" };
                println!("{} {:<10} {}", mark, result.category, result.message);
                if let Some(error) = &result.error {
                    println!("     {}", error);
                }
            }
        }
    }
    Ok(())
}

async fn cmd_import(cli: &Cli, store: Arc<JsonFileStore>, category: &str) -> Result<()> {
    let target = parse_target(category)?;
    let engine = engine(cli, store)?;

    let report = match target {
        Target::One(category) => engine
            .import_category(category)
            .await
            .with_context(|| format!("Failed to import {}", category))?,
        Target::All => engine.import_all().await.context("Failed to import")?,
    };

    if report.summary.failed > 0 {
        anyhow::bail!(
            "{} of {} categories failed to import",
            report.summary.failed,
            report.summary.total
        );
    }
    Ok(())
}

async fn cmd_compare(cli: &Cli, store: Arc<JsonFileStore>) -> Result<()> {
    let engine = engine(cli, store)?;
    let outcomes = engine
        .compare_addons()
        .await
        .context("Failed to compare add-ons")?;

    for outcome in &outcomes {
        let status = match outcome.status {
            ComparisonStatus::NotInstalled => "missing",
            ComparisonStatus::VersionMismatch => "outdated",
            ComparisonStatus::UpToDate => "ok",
            ComparisonStatus::NewerLocal => "newer",
        };
        let toggle = if outcome.needs_enable_disable {
            if outcome.remote_enabled {
                " (enable)"
            } else {
                " (disable)"
            }
        } else {
            ""
        };
        println!(
            "{:<9} {:<45} {:>12} -> {:<12}{}",
            status,
            outcome.id,
            outcome.local_version.as_deref().unwrap_or("-"),
            outcome.remote_version,
            toggle
        );
    }

    let changes = ChangeSet::from_outcomes(&outcomes);
    println!();
    if changes.is_empty() {
        println!("All add-ons are up to date");
    } else {
        println!("Changes needed: {}", changes.summary());
    }
    Ok(())
}

async fn cmd_test(cli: &Cli, store: Arc<JsonFileStore>) -> Result<()> {
    let engine = engine(cli, store)?;
    let name = engine
        .check_backend()
        .await
        .context("Backend check failed")?;
    println!("{} backend is ready", name);
    Ok(())
}

async fn cmd_config(store: &JsonFileStore, action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            println!("Configuration file: {}", store.path().display());
            for key in keys::ALL {
                println!("  {:<24} {}", key, display_value(store, key).await?);
            }
        }
        ConfigAction::Get { key } => {
            require_known(key)?;
            println!("{}", display_value(store, key).await?);
        }
        ConfigAction::Set { key, value } => {
            require_known(key)?;
            store
                .update(key, parse_value(key, value)?)
                .await
                .with_context(|| format!("Failed to set {}", key))?;
            println!("{} updated", key);
        }
        ConfigAction::Validate => {
            let config = SyncConfiguration::load(store).await?;
            let result = config.validate();
            if result.is_valid() {
                println!("Configuration is valid for export method '{}'", config.export_method);
            } else {
                for error in &result.errors {
                    println!("  - {}", error);
                }
                anyhow::bail!("Configuration is invalid");
            }
        }
    }
    Ok(())
}

fn require_known(key: &str) -> Result<()> {
    if keys::ALL.contains(&key) {
        Ok(())
    } else {
        anyhow::bail!(
            "Unknown key '{}'. Known keys: {}",
            key,
            keys::ALL.join(", ")
        )
    }
}

/// Render a stored value, masking the token.
async fn display_value(store: &JsonFileStore, key: &str) -> Result<String> {
    let value = store.get(key).await?;
    Ok(match value {
        None => "(not set)".to_string(),
        Some(Value::String(s)) if key == keys::REMOTE_TOKEN => Credential::new(s).masked(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}

fn parse_value(key: &str, raw: &str) -> Result<Value> {
    let value = match key {
        keys::IGNORED_EXTENSIONS => Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| Value::String(s.to_string()))
                .collect(),
        ),
        keys::SYNC_DISABLED_EXTENSIONS => Value::Bool(
            raw.trim()
                .parse()
                .with_context(|| format!("{} expects true or false", key))?,
        ),
        _ => Value::String(raw.to_string()),
    };
    Ok(value)
}

fn cmd_env(cli: &Cli) -> Result<()> {
    let env = environment(cli)?;
    println!("Edition:          {}", env.edition());
    println!("Portable:         {}", env.is_portable());
    println!("Data dir:         {}", env.data_dir().display());
    println!("User settings:    {}", env.settings_path().display());
    println!("Snippets:         {}", env.snippets_dir().display());
    println!("Extensions dir:   {}", env.extensions_dir().display());
    println!("State database:   {}", env.state_db_path().display());
    println!("Manifest:         {}", env.manifest_path().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["settingsync", "--yes", "import", "settings"]).unwrap();
        assert!(cli.yes);
        assert!(matches!(cli.command, Commands::Import { ref category } if category == "settings"));

        let cli = Cli::try_parse_from(["settingsync", "export"]).unwrap();
        assert!(matches!(cli.command, Commands::Export { ref category } if category == "all"));

        let cli =
            Cli::try_parse_from(["settingsync", "config", "set", "exportMethod", "gist"]).unwrap();
        assert!(matches!(cli.command, Commands::Config { action: ConfigAction::Set { .. } }));
    }

    #[test]
    fn test_parse_target() {
        assert!(matches!(parse_target("ALL").unwrap(), Target::All));
        assert!(matches!(
            parse_target("snippets").unwrap(),
            Target::One(Category::Snippets)
        ));
        assert!(parse_target("fonts").is_err());
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(
            parse_value(keys::IGNORED_EXTENSIONS, "a.b, ^ms-.*,").unwrap(),
            serde_json::json!(["a.b", "^ms-.*"])
        );
        assert_eq!(
            parse_value(keys::SYNC_DISABLED_EXTENSIONS, "true").unwrap(),
            Value::Bool(true)
        );
        assert!(parse_value(keys::SYNC_DISABLED_EXTENSIONS, "yes").is_err());
        assert_eq!(
            parse_value(keys::LOCAL_PATH, "~/sync").unwrap(),
            Value::String("~/sync".to_string())
        );
    }

    #[test]
    fn test_require_known() {
        assert!(require_known(keys::REMOTE_TOKEN).is_ok());
        assert!(require_known("nope").is_err());
    }
}
