//! Command-line interface for vaani
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Spoken conversations with a spiritual guide
#[derive(Parser, Debug)]
#[command(
    name = "vaani",
    version,
    about = "Real-time voice conversations with a spiritual guide"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress status output (transcript only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: level meters + info logs, -vv: debug logs)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Persona to talk to (see `vaani personas`)
    #[arg(long, short = 'p', value_name = "ID")]
    pub persona: Option<String>,

    /// Audio input device (e.g., pipewire)
    #[arg(long, value_name = "DEVICE")]
    pub input_device: Option<String>,

    /// Audio output device
    #[arg(long, value_name = "DEVICE")]
    pub output_device: Option<String>,

    /// Speak from a WAV file instead of the microphone
    #[arg(long, value_name = "FILE")]
    pub input_wav: Option<PathBuf>,

    /// Write the conversation as JSON when the session ends
    #[arg(long, value_name = "FILE")]
    pub transcript_out: Option<PathBuf>,

    /// End the session automatically. Examples: 90s, 5m, 1h
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub max_duration: Option<Duration>,

    /// Start with the microphone muted
    #[arg(long)]
    pub muted: bool,
}

/// Parse a duration string; bare numbers are seconds.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available personas
    Personas,

    /// List audio input and output devices
    Devices,

    /// Show configuration
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
    /// Print the effective configuration (file, defaults and env overrides)
    Show,
    /// Print the configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_command() {
        let cli = Cli::try_parse_from(["vaani"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.persona.is_none());
        assert!(cli.input_wav.is_none());
        assert!(cli.max_duration.is_none());
        assert!(!cli.muted);
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_parse_live_flags() {
        let cli = Cli::try_parse_from([
            "vaani",
            "--persona",
            "vedic-seer",
            "--input-wav",
            "question.wav",
            "--transcript-out",
            "talk.json",
            "--max-duration",
            "2m",
            "--muted",
            "-vv",
        ])
        .unwrap();

        assert_eq!(cli.persona.as_deref(), Some("vedic-seer"));
        assert_eq!(cli.input_wav, Some(PathBuf::from("question.wav")));
        assert_eq!(cli.transcript_out, Some(PathBuf::from("talk.json")));
        assert_eq!(cli.max_duration, Some(Duration::from_secs(120)));
        assert!(cli.muted);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_parse_duration_formats() {
        assert_eq!(parse_duration("45"), Ok(Duration::from_secs(45)));
        assert_eq!(parse_duration("1m30s"), Ok(Duration::from_secs(90)));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["vaani", "personas"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Personas)));

        let cli = Cli::try_parse_from(["vaani", "devices"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Devices)));

        let cli = Cli::try_parse_from(["vaani", "config", "show"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Config {
                action: ConfigAction::Show
            })
        ));

        let cli = Cli::try_parse_from(["vaani", "completions", "bash"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Completions { .. })));
    }

    #[test]
    fn test_global_config_after_subcommand() {
        let cli = Cli::try_parse_from(["vaani", "config", "path", "--config", "/tmp/v.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/v.toml")));
    }
}
