//! `deskhand` -- the plugin host CLI.
//!
//! Subcommands:
//!
//! - `deskhand list` -- scan the plugins root and show every plugin,
//!   valid or broken, with diagnostics.
//! - `deskhand config` -- inspect and mutate one plugin's settings.
//! - `deskhand run` -- load every enabled plugin and stream lifecycle
//!   events until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::broadcast;

use deskhand_core::{PluginManager, SettingCipher};
use deskhand_plugin::{NullWindow, PluginRegistry};

/// deskhand plugin host CLI.
#[derive(Parser)]
#[command(name = "deskhand", about = "deskhand plugin host CLI", version)]
struct Cli {
    /// Plugins root directory (defaults to the per-user config dir).
    #[arg(long, global = true)]
    plugins_root: Option<PathBuf>,

    /// Salt for the setting cipher.
    #[arg(long, global = true, env = "DESKHAND_SALT", default_value = "deskhand")]
    salt: String,

    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// List discovered plugins, including broken ones.
    List {
        /// Emit descriptors as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Inspect and mutate a plugin's settings.
    Config {
        /// Plugin name.
        plugin: String,

        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Load every enabled plugin and stream lifecycle events.
    Run,
}

/// Subcommands for `deskhand config`.
#[derive(Subcommand)]
enum ConfigAction {
    /// Show the whole settings map.
    Show,

    /// Read one setting.
    Get {
        /// Setting key.
        key: String,

        /// Decrypt secret-convention values before printing.
        #[arg(long)]
        reveal: bool,
    },

    /// Write one setting. The value is parsed as JSON, falling back to
    /// a plain string.
    Set {
        /// Setting key.
        key: String,

        /// New value.
        value: String,
    },

    /// Re-select a value in an ordered-list setting.
    Select {
        /// Setting key.
        key: String,

        /// Choice to make the new default.
        choice: String,
    },

    /// Enable the plugin (persists, then loads).
    Enable,

    /// Disable the plugin (persists, then unloads).
    Disable,
}

fn plugins_root(cli: &Cli) -> PathBuf {
    cli.plugins_root.clone().unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("deskhand")
            .join("plugins")
    })
}

fn registry() -> anyhow::Result<PluginRegistry> {
    let mut registry = PluginRegistry::new();
    registry.register(deskhand_plugin_webtools::plugin_spec())?;
    registry.register(deskhand_plugin_demo::plugin_spec())?;
    Ok(registry)
}

fn manager(cli: &Cli) -> anyhow::Result<PluginManager> {
    let root = plugins_root(cli);
    Ok(PluginManager::new(
        root,
        registry()?,
        Arc::new(NullWindow),
        SettingCipher::new(&cli.salt),
    ))
}

fn list(manager: &PluginManager, json: bool) -> anyhow::Result<()> {
    let descriptors = manager.discover();
    if json {
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
        return Ok(());
    }
    if descriptors.is_empty() {
        println!("no plugins under {}", manager.root().display());
        return Ok(());
    }
    for d in &descriptors {
        let status = if !d.valid {
            "broken"
        } else if d.enabled {
            "enabled"
        } else {
            "disabled"
        };
        let detail = d.error.as_deref().unwrap_or(&d.description);
        println!("{:<16} {:<9} {:<8} {detail}", d.name, status, d.version);
    }
    Ok(())
}

fn config(manager: &PluginManager, plugin: &str, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let settings = manager.store().settings(plugin)?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        ConfigAction::Get { key, reveal } => {
            if reveal {
                match manager.get_decrypted_setting(plugin, &key)? {
                    Some(secret) => println!("{}", secret.reveal()),
                    None => anyhow::bail!("no setting '{key}' on '{plugin}'"),
                }
            } else {
                match manager.get_setting(plugin, &key)? {
                    Some(value) => println!("{}", serde_json::to_string(&value)?),
                    None => anyhow::bail!("no setting '{key}' on '{plugin}'"),
                }
            }
        }
        ConfigAction::Set { key, value } => {
            let parsed: Value =
                serde_json::from_str(&value).unwrap_or_else(|_| Value::String(value));
            manager
                .set_setting(plugin, &key, parsed)
                .with_context(|| format!("writing '{key}' on '{plugin}'"))?;
            println!("ok");
        }
        ConfigAction::Select { key, choice } => {
            manager.select_choice(plugin, &key, &choice)?;
            println!("ok");
        }
        ConfigAction::Enable => {
            manager.enable(plugin)?;
            println!("'{plugin}' enabled");
        }
        ConfigAction::Disable => {
            manager.disable(plugin)?;
            println!("'{plugin}' disabled");
        }
    }
    Ok(())
}

async fn run(manager: &PluginManager) -> anyhow::Result<()> {
    let mut events = manager.events().subscribe();
    let count = manager.load_all();
    println!(
        "{count} plugin(s) loaded from {}; streaming events, ctrl-c to exit",
        manager.root().display()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    manager.shutdown();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let manager = manager(&cli)?;
    match cli.command {
        Commands::List { json } => list(&manager, json)?,
        Commands::Config { plugin, action } => config(&manager, &plugin, action)?,
        Commands::Run => run(&manager).await?,
    }
    Ok(())
}
