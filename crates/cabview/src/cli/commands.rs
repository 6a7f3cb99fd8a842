//! CLI command definitions.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Run command arguments.
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Emit one JSON document per update instead of the text dashboard
    #[arg(short, long)]
    pub json: bool,

    /// Render once after the first clock tick, then exit
    #[arg(long)]
    pub once: bool,

    /// Replay positions from an NDJSON file instead of the configured source
    #[arg(long, value_name = "FILE")]
    pub replay: Option<PathBuf>,
}

/// Geocode command arguments.
#[derive(Debug, Args)]
pub struct GeocodeCommand {
    /// Latitude in decimal degrees
    #[arg(allow_negative_numbers = true)]
    pub latitude: f64,

    /// Longitude in decimal degrees
    #[arg(allow_negative_numbers = true)]
    pub longitude: f64,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show configuration file path
    Path,

    /// Validate a configuration file
    Validate {
        /// Path to config file (default: standard location)
        file: Option<PathBuf>,
    },
}
