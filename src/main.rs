use anyhow::Result;
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use vaani::app::{LiveArgs, run_live_command};
use vaani::audio::capture::{list_devices, list_output_devices};
use vaani::cli::{Cli, Commands, ConfigAction};
use vaani::config::Config;

/// Libraries that log per packet at debug level.
const NOISY_CRATE_FILTERS: &str = ",tungstenite=warn,tokio_tungstenite=warn,native_tls=warn";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        None => {
            let config = load_config(cli.config.as_deref())?;
            run_live_command(
                config,
                LiveArgs {
                    persona: cli.persona,
                    input_device: cli.input_device,
                    output_device: cli.output_device,
                    input_wav: cli.input_wav,
                    transcript_out: cli.transcript_out,
                    max_duration: cli.max_duration,
                    muted: cli.muted,
                    quiet: cli.quiet,
                    verbosity: cli.verbose,
                },
            )
            .await?;
        }
        Some(Commands::Personas) => {
            let config = load_config(cli.config.as_deref())?;
            list_personas(&config);
        }
        Some(Commands::Devices) => {
            list_audio_devices()?;
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "vaani", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Logs go to stderr; `RUST_LOG` wins over `-v`.
fn init_tracing(verbosity: u8, quiet: bool) {
    let level = match (quiet, verbosity) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, _) => "debug",
    };
    let env_filter = match std::env::var("RUST_LOG") {
        Ok(filter) if !filter.is_empty() => tracing_subscriber::EnvFilter::new(filter),
        _ => tracing_subscriber::EnvFilter::new(format!("{}{}", level, NOISY_CRATE_FILTERS)),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .ok();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/vaani/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    Ok(config.with_env_overrides())
}

fn list_personas(config: &Config) {
    for persona in config.catalog() {
        let marker = if persona.id == config.persona.default {
            "●".green().to_string()
        } else {
            " ".to_string()
        };
        println!(
            "{} {:<20} {} {}",
            marker,
            persona.id,
            persona.name,
            format!("({})", persona.voice).dimmed()
        );
        if !persona.description.is_empty() {
            println!("    {}", persona.description.dimmed());
        }
    }
}

/// List available audio input and output devices.
fn list_audio_devices() -> Result<()> {
    let inputs = list_devices()?;
    let outputs = list_output_devices()?;

    if inputs.is_empty() && outputs.is_empty() {
        eprintln!("{}", "No audio devices found".red());
        std::process::exit(1);
    }

    println!("Input devices:");
    for (idx, device) in inputs.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }
    println!("Output devices:");
    for (idx, device) in outputs.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&std::path::Path>) -> Result<()> {
    let config_path = custom_path
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::default_path);

    match action {
        ConfigAction::Path => {
            println!("{}", config_path.display());
            if !config_path.exists() {
                eprintln!("{}", "(file does not exist, defaults are in effect)".dimmed());
            }
        }
        ConfigAction::Show => {
            let config = Config::load_or_default(&config_path)?.with_env_overrides();
            if let Err(e) = config.validate() {
                eprintln!("{}", format!("Warning: {}", e).yellow());
            }
            print!("{}", config.to_toml()?);
        }
    }
    Ok(())
}
