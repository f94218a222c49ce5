//! Command-line interface for picvoice
//!
//! Provides argument parsing using clap derive macros.

use crate::config::Device;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Speak images and text over HTTP
#[derive(Parser, Debug)]
#[command(
    name = "picvoice",
    version,
    about = "Speak images and text over HTTP"
)]
pub struct Cli {
    /// Subcommand to execute (default: serve)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Address to bind (overrides config and PICVOICE_HOST)
    #[arg(long, global = true, value_name = "HOST")]
    pub host: Option<String>,

    /// Port to bind (overrides config and PICVOICE_PORT)
    #[arg(long, short = 'p', global = true, value_name = "PORT")]
    pub port: Option<u16>,

    /// Compute device for both capabilities: auto, cpu, cuda
    #[arg(long, global = true, value_name = "DEVICE")]
    pub device: Option<Device>,
}

impl Cli {
    /// Default `tracing` filter for the chosen verbosity.
    pub fn log_filter(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "picvoice=info,tower_http=warn",
            1 => "picvoice=debug,tower_http=debug",
            _ => "picvoice=trace,tower_http=trace",
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP service
    Serve,

    /// Check external programs, model files and directories
    Check,

    /// View configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_command() {
        let cli = Cli::try_parse_from(["picvoice"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert!(cli.device.is_none());
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_parse_verbose_double() {
        let cli = Cli::try_parse_from(["picvoice", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.log_filter(), "picvoice=trace,tower_http=trace");
    }

    #[test]
    fn test_quiet_wins_over_verbose() {
        let cli = Cli::try_parse_from(["picvoice", "-q", "-v"]).unwrap();
        assert_eq!(cli.log_filter(), "error");
    }

    #[test]
    fn test_parse_serve_with_overrides() {
        let cli = Cli::try_parse_from([
            "picvoice", "serve", "--host", "0.0.0.0", "--port", "8080", "--device", "cpu",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Commands::Serve)));
        assert_eq!(cli.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(cli.port, Some(8080));
        assert_eq!(cli.device, Some(Device::Cpu));
    }

    #[test]
    fn test_parse_invalid_device() {
        assert!(Cli::try_parse_from(["picvoice", "--device", "tpu"]).is_err());
    }

    #[test]
    fn test_parse_global_config() {
        let cli = Cli::try_parse_from(["picvoice", "check", "--config", "/etc/picvoice.toml"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Check)));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/picvoice.toml")));
    }

    #[test]
    fn test_parse_config_show() {
        let cli = Cli::try_parse_from(["picvoice", "config", "show"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Config {
                action: ConfigAction::Show
            })
        ));
    }

    #[test]
    fn test_parse_completions() {
        let cli = Cli::try_parse_from(["picvoice", "completions", "bash"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Completions { shell: Shell::Bash })
        ));
    }
}
