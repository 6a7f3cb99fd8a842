//! Command-line interface for cabview.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{ConfigCommand, GeocodeCommand, RunCommand};

use crate::logging::Verbosity;

/// cabview - Train cab telemetry in your terminal
///
/// Shows the time, GPS speed and the reverse-geocoded place alongside a
/// static route panel.
#[derive(Debug, Parser)]
#[command(name = "cabview")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the live dashboard
    Run(RunCommand),

    /// Look up the place name for a position
    Geocode(GeocodeCommand),

    /// View or check configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
        assert_eq!(Cli::command().get_name(), "cabview");
    }

    #[test]
    fn test_parse_run() {
        let cli = parse(&["cabview", "run"]);
        let Command::Run(run) = cli.command else {
            panic!("expected run");
        };
        assert!(!run.json);
        assert!(!run.once);
        assert!(run.replay.is_none());
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = parse(&["cabview", "run", "--json", "--once", "--replay", "trip.ndjson"]);
        let Command::Run(run) = cli.command else {
            panic!("expected run");
        };
        assert!(run.json);
        assert!(run.once);
        assert_eq!(run.replay, Some(PathBuf::from("trip.ndjson")));
    }

    #[test]
    fn test_parse_geocode_negative_coordinates() {
        let cli = parse(&["cabview", "geocode", "-33.8688", "151.2093"]);
        let Command::Geocode(geocode) = cli.command else {
            panic!("expected geocode");
        };
        assert!((geocode.latitude + 33.8688).abs() < f64::EPSILON);
        assert!((geocode.longitude - 151.2093).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_geocode_rejects_garbage() {
        assert!(Cli::try_parse_from(["cabview", "geocode", "north", "1.0"]).is_err());
    }

    #[test]
    fn test_parse_config_subcommands() {
        assert!(matches!(
            parse(&["cabview", "config", "show", "--json"]).command,
            Command::Config(ConfigCommand::Show { json: true })
        ));
        assert!(matches!(
            parse(&["cabview", "config", "path"]).command,
            Command::Config(ConfigCommand::Path)
        ));
        assert!(matches!(
            parse(&["cabview", "config", "validate"]).command,
            Command::Config(ConfigCommand::Validate { file: None })
        ));
    }

    #[test]
    fn test_global_flags() {
        let cli = parse(&["cabview", "-c", "/custom/config.toml", "-vv", "run"]);
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
        assert_eq!(cli.verbosity(), Verbosity::Trace);

        let cli = parse(&["cabview", "run", "-q"]);
        assert_eq!(cli.verbosity(), Verbosity::Quiet);

        let cli = parse(&["cabview", "run"]);
        assert_eq!(cli.verbosity(), Verbosity::Normal);
    }
}
