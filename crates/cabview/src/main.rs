//! `cabview` - CLI for the cab telemetry dashboard

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use cabview::cli::{Cli, Command, ConfigCommand, GeocodeCommand, RunCommand};
use cabview::config::PositionSourceKind;
use cabview::geocode::lookup_place;
use cabview::render::{render_json, render_text};
use cabview::{init_logging, Config, Coordinates, Error, TelemetryController, TelemetryState};

/// Clears the terminal and homes the cursor.
const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    // `config` subcommands load (or check) the file themselves.
    match cli.command {
        Command::Run(run_cmd) => handle_run(load_config(cli.config)?, run_cmd).await,
        Command::Geocode(geocode_cmd) => {
            handle_geocode(&load_config(cli.config)?, &geocode_cmd).await
        }
        Command::Config(config_cmd) => handle_config(cli.config, config_cmd),
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    Config::load_from(path).context("loading configuration")
}

async fn handle_run(mut config: Config, cmd: RunCommand) -> anyhow::Result<()> {
    if let Some(path) = cmd.replay {
        std::fs::metadata(&path).map_err(|source| Error::ReplayRead {
            path: path.clone(),
            source,
        })?;
        config.position.source = PositionSourceKind::Replay;
        config.position.replay_path = Some(path);
        config.validate()?;
    }

    let handle = TelemetryController::from_config(&config)?.mount();
    let mut updates = handle.subscribe();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    if !cmd.once {
        let state = updates.borrow_and_update().clone();
        draw(&state, &config, cmd.json)?;
    }

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("waiting for Ctrl-C")?;
                info!("Interrupted");
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                draw(&state, &config, cmd.json)?;
                if cmd.once {
                    break;
                }
            }
        }
    }

    handle.unmount().await?;
    Ok(())
}

fn draw(state: &TelemetryState, config: &Config, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", render_json(state, &config.route)?);
    } else {
        println!("{CLEAR_SCREEN}{}", render_text(state, &config.route));
    }
    Ok(())
}

async fn handle_geocode(config: &Config, cmd: &GeocodeCommand) -> anyhow::Result<()> {
    let coordinates = Coordinates::new(cmd.latitude, cmd.longitude);

    let place = match lookup_place(&config.geocode, coordinates).await {
        Ok(place) => place,
        Err(e) if e.is_source_error() => {
            // Same marker the dashboard would show, but still a failed run.
            println!("{}", config.geocode.failure_marker);
            return Err(e).with_context(|| format!("reverse geocoding {coordinates}"));
        }
        Err(e) => return Err(e.into()),
    };

    if place.is_empty() {
        println!("(no place name for {coordinates})");
    } else {
        println!("{place}");
    }
    Ok(())
}

fn handle_config(config_path: Option<PathBuf>, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = load_config(config_path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print_config(&config);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file
                .or(config_path)
                .unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            Config::load_from(Some(path.clone()))
                .with_context(|| format!("invalid configuration in {}", path.display()))?;
            println!("Configuration is valid.");
        }
    }
    Ok(())
}

fn print_config(config: &Config) {
    println!("Current Configuration");
    println!("=====================");
    println!();
    println!("[Clock]");
    println!("  Interval (ms):      {}", config.clock.interval_ms);
    println!();
    println!("[Position]");
    println!("  Source:             {}", config.position.source);
    println!("  High accuracy:      {}", config.position.high_accuracy);
    println!("  Maximum age (ms):   {}", config.position.maximum_age_ms);
    println!("  Timeout (ms):       {}", config.position.timeout_ms);
    println!("  gpsd address:       {}", config.position.gpsd_address);
    if let Some(path) = &config.position.replay_path {
        println!("  Replay file:        {}", path.display());
    }
    println!();
    println!("[Geocode]");
    println!("  Endpoint:           {}", config.geocode.endpoint);
    println!("  Language:           {}", config.geocode.language);
    println!("  Region index:       {}", config.geocode.region_index);
    println!("  Locality pattern:   {}", config.geocode.locality_pattern);
    println!("  Discard stale:      {}", config.geocode.discard_stale);
    println!();
    println!("[Route]");
    println!("  Line:               {}", config.route.line_code);
    println!(
        "  Service:            {} {}",
        config.route.service_type, config.route.pattern
    );
    println!(
        "  Run:                {} {}",
        config.route.run_number, config.route.run_suffix
    );
}
