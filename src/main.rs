//! Command-line surface over the model configuration mirror.
//!
//! Each subcommand maps to one consumer-facing query or one mutation of the
//! remote authority. Query commands refresh the mirror first unless
//! `--offline` is given; mutations trigger their own resync on acceptance.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use argus::{
    AlertChannels, AlertRule, DetectionRule, ModelManager, MutationOutcome, Settings,
};

/// Model configuration mirror for a video-detection appliance.
#[derive(Parser)]
#[command(name = "argus")]
#[command(about = "Mirrors detection-model configuration from the remote authority")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Skip the refresh that query commands run before reading the cache
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror the remote catalog into the local cache
    Sync,

    /// List every cached model with its rules and alerts
    Models,

    /// Show the active model, if one resolves
    Active,

    /// List the active model's detection rules
    Rules,

    /// List the active model's alert configs
    Alerts,

    /// Mark a model active on the authority
    Select {
        /// Model name as recorded in the document's main section
        model: String,
    },

    /// Delete a model on the authority and rebuild the cache
    DeleteModel {
        model: String,
    },

    /// Enable or disable tracking of an object class on the active model
    ToggleRule {
        class: String,

        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        #[arg(long)]
        disable: bool,
    },

    /// Write a schedule window for an object class on the active model
    SaveRule {
        class: String,

        /// Window start, "HH:MM"
        #[arg(long)]
        start: String,

        /// Window end, "HH:MM"
        #[arg(long)]
        end: String,

        /// Track the class as well
        #[arg(long)]
        enable: bool,
    },

    /// Drop an object class's schedule and tracking from the active model
    DeleteRule {
        class: String,
    },

    /// Create or replace an alert config on the active model
    SaveAlert {
        object_type: String,

        #[arg(long, default_value = "0.5")]
        confidence_min: f64,

        #[arg(long)]
        email: bool,

        #[arg(long)]
        viber: bool,

        #[arg(long)]
        api: bool,

        #[arg(long)]
        enable: bool,
    },

    /// Remove an alert config from the active model
    DeleteAlert {
        object_type: String,
    },

    /// Enable or disable an existing alert config on the active model
    ToggleAlert {
        object_type: String,

        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        #[arg(long)]
        disable: bool,
    },

    /// Control the appliance's detection process
    Detection {
        #[command(subcommand)]
        action: DetectionAction,
    },
}

#[derive(Subcommand)]
enum DetectionAction {
    Start,
    Stop,
    Restart,
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = Settings::from_env()?;
    let manager = ModelManager::from_settings(&settings)?;

    match cli.command {
        Commands::Sync => {
            let report = manager.refresh().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.success {
                bail!("catalog fetch failed, cache left as is");
            }
        }
        Commands::Models => {
            refresh_first(&manager, cli.offline).await;
            let summaries = manager.model_summaries().await;
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
        Commands::Active => {
            refresh_first(&manager, cli.offline).await;
            match manager.active_model().await {
                Some(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
                None => println!("null"),
            }
        }
        Commands::Rules => {
            refresh_first(&manager, cli.offline).await;
            match manager.active_model().await {
                Some(summary) => println!("{}", serde_json::to_string_pretty(&summary.rules)?),
                None => bail!("no active model in the local cache"),
            }
        }
        Commands::Alerts => {
            refresh_first(&manager, cli.offline).await;
            match manager.active_model().await {
                Some(summary) => println!("{}", serde_json::to_string_pretty(&summary.alerts)?),
                None => bail!("no active model in the local cache"),
            }
        }
        Commands::Select { model } => {
            report(manager.select_model(&model).await)?;
        }
        Commands::DeleteModel { model } => {
            report(manager.delete_model(&model).await)?;
        }
        Commands::ToggleRule {
            class,
            enable,
            disable,
        } => {
            report(manager.toggle_rule(&class, resolve_toggle(enable, disable)?).await)?;
        }
        Commands::SaveRule {
            class,
            start,
            end,
            enable,
        } => {
            let rule = DetectionRule {
                object_type: class,
                start_time: start,
                end_time: end,
                enabled: enable,
            };
            report(manager.save_rule(&rule).await)?;
        }
        Commands::DeleteRule { class } => {
            report(manager.delete_rule(&class).await)?;
        }
        Commands::SaveAlert {
            object_type,
            confidence_min,
            email,
            viber,
            api,
            enable,
        } => {
            let alert = AlertRule {
                object_type,
                channels: AlertChannels { email, viber, api },
                confidence_min,
                enabled: enable,
            };
            report(manager.save_alert_config(&alert).await)?;
        }
        Commands::DeleteAlert { object_type } => {
            report(manager.delete_alert_config(&object_type).await)?;
        }
        Commands::ToggleAlert {
            object_type,
            enable,
            disable,
        } => {
            report(
                manager
                    .toggle_alert(&object_type, resolve_toggle(enable, disable)?)
                    .await,
            )?;
        }
        Commands::Detection { action } => match action {
            DetectionAction::Start => report(manager.start_detection().await)?,
            DetectionAction::Stop => report(manager.stop_detection().await)?,
            DetectionAction::Restart => report(manager.restart_detection().await)?,
            DetectionAction::Status => {
                let status = manager.detection_status().await?;
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
        },
    }

    Ok(())
}

/// Query commands pull the authority's current state before reading the
/// cache. An unreachable authority degrades to the stale mirror.
async fn refresh_first(manager: &ModelManager, offline: bool) {
    if offline {
        return;
    }
    let report = manager.refresh().await;
    if !report.success {
        warn!("refresh failed, serving the stale local mirror");
    }
}

fn resolve_toggle(enable: bool, disable: bool) -> Result<bool> {
    match (enable, disable) {
        (true, false) => Ok(true),
        (false, true) => Ok(false),
        _ => bail!("pass exactly one of --enable or --disable"),
    }
}

fn report(outcome: MutationOutcome) -> Result<()> {
    if outcome.success {
        println!("{}", outcome.message);
        Ok(())
    } else {
        bail!("{}", outcome.message);
    }
}
