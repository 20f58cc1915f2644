//! Live conversation entry point.
//!
//! Wires the microphone, speaker and live link into a [`SessionManager`] and
//! runs the interactive loop until the person quits, the session ends or the
//! time limit is reached.

use crate::audio::capture::suppress_audio_warnings;
use crate::config::Config;
use crate::error::{Result, VaaniError};
use crate::live::websocket::WebSocketConnector;
use crate::output;
use crate::session::devices::CpalDevices;
use crate::session::manager::SessionManager;
use crate::session::state::SessionState;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

/// How often the level meters are redrawn.
const METER_INTERVAL: Duration = Duration::from_millis(100);

const HELP: &str = "commands: m = mute/unmute, p <id> = switch persona, p = list personas, s = status, q = quit";

/// Command-line overrides for a live session.
#[derive(Debug, Default, Clone)]
pub struct LiveArgs {
    pub persona: Option<String>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub input_wav: Option<PathBuf>,
    pub transcript_out: Option<PathBuf>,
    pub max_duration: Option<Duration>,
    pub muted: bool,
    pub quiet: bool,
    pub verbosity: u8,
}

/// What the loop should do after a line typed on stdin.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Run a live conversation until it ends.
///
/// The transcript is printed as turns complete and, with
/// `transcript_out`, written as JSON on the way out.
pub async fn run_live_command(mut config: Config, args: LiveArgs) -> Result<()> {
    // Suppress noisy JACK/ALSA warnings before audio init
    suppress_audio_warnings();

    // Apply CLI overrides
    if let Some(device) = args.input_device.clone() {
        config.audio.input_device = Some(device);
    }
    if let Some(device) = args.output_device.clone() {
        config.audio.output_device = Some(device);
    }
    if let Some(persona) = args.persona.clone() {
        config.persona.default = persona;
    }
    config.validate()?;

    let api_key = config.api_key().ok_or_else(|| VaaniError::Connection {
        message: format!(
            "no API key found; set {} to your key",
            config.live.api_key_env
        ),
    })?;
    let persona = config.default_persona()?;

    let devices = CpalDevices {
        input_device: config.audio.input_device.clone(),
        output_device: config.audio.output_device.clone(),
        input_wav: args.input_wav.clone(),
    };
    let mut manager = SessionManager::new(
        Arc::new(WebSocketConnector::new()),
        Arc::new(devices),
        persona,
    )
    .with_options(config.session_options(api_key))
    .with_catalog(config.catalog());
    manager.set_muted(args.muted);

    if !args.quiet {
        output::render_notice(&format!("Connecting as {}...", manager.persona().name));
    }
    start_session(&mut manager).await?;
    if !args.quiet {
        output::render_notice(HELP);
    }

    let result = conversation_loop(
        &mut manager,
        &args,
        BufReader::new(tokio::io::stdin()),
        tokio::signal::ctrl_c(),
    )
    .await;

    manager.stop();
    if let Some(path) = &args.transcript_out {
        write_transcript(&manager, path)?;
        if !args.quiet {
            output::render_notice(&format!("Transcript written to {}", path.display()));
        }
    }
    result
}

async fn start_session(manager: &mut SessionManager) -> Result<()> {
    if let Err(e) = manager.start().await {
        let message = manager
            .last_error()
            .map(str::to_string)
            .unwrap_or_else(|| e.to_string());
        output::render_error(&message);
        return Err(e);
    }
    Ok(())
}

/// Drives the session from typed `commands` until `interrupt` resolves, the
/// session closes or the time limit is reached.
async fn conversation_loop<R, I>(
    manager: &mut SessionManager,
    args: &LiveArgs,
    commands: R,
    interrupt: I,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    I: Future<Output = std::io::Result<()>>,
{
    let show_meter = args.verbosity >= 1 && !args.quiet;
    let mut meter = tokio::time::interval(METER_INTERVAL);
    meter.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let deadline = async {
        match args.max_duration {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    // Polled across iterations so a signal between turns is not lost
    tokio::pin!(interrupt);

    let mut lines = commands.lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = &mut interrupt => {
                if !args.quiet {
                    output::render_notice("Interrupted, ending session");
                }
                break;
            }
            _ = &mut deadline => {
                if !args.quiet {
                    output::render_notice("Time limit reached, ending session");
                }
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if handle_command(manager, line.trim(), args.quiet).await == Flow::Quit {
                        break;
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::debug!("stdin closed: {}", e);
                    stdin_open = false;
                }
            },
            event = manager.next_event() => {
                let Some(event) = event else { break };
                for entry in manager.dispatch(event) {
                    output::render_entry(&entry);
                }
                if manager.state() == SessionState::Closed {
                    if let Some(message) = manager.last_error() {
                        output::render_error(message);
                    } else if !args.quiet {
                        output::render_notice("Session ended");
                    }
                    break;
                }
            }
            _ = meter.tick(), if show_meter => {
                output::render_levels(manager.input_level(), manager.output_level(), manager.is_muted());
            }
        }
    }

    if show_meter {
        output::clear_line();
    }
    Ok(())
}

async fn handle_command(manager: &mut SessionManager, line: &str, quiet: bool) -> Flow {
    let (command, argument) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    match command {
        "" => {}
        "q" | "quit" => return Flow::Quit,
        "m" | "mute" => {
            manager.set_muted(!manager.is_muted());
            output::render_status(manager.state(), manager.persona(), manager.is_muted());
        }
        "s" | "status" => {
            output::render_status(manager.state(), manager.persona(), manager.is_muted());
        }
        "p" | "persona" if argument.is_empty() => {
            for persona in manager.catalog() {
                let marker = if persona.id == manager.persona().id { "*" } else { " " };
                output::render_notice(&format!("{} {:<20} {}", marker, persona.id, persona.name));
            }
        }
        "p" | "persona" => return switch_persona(manager, argument, quiet).await,
        _ => output::render_notice(HELP),
    }
    Flow::Continue
}

/// Ends the current session and starts a new one with another persona.
async fn switch_persona(manager: &mut SessionManager, id: &str, quiet: bool) -> Flow {
    if let Err(e) = manager.select_persona(id) {
        output::render_error(&e.to_string());
        return Flow::Continue;
    }
    if let Err(e) = manager.reset() {
        output::render_error(&e.to_string());
        return Flow::Quit;
    }
    if !quiet {
        output::render_notice(&format!("Connecting as {}...", manager.persona().name));
    }
    match start_session(manager).await {
        Ok(()) => Flow::Continue,
        Err(_) => Flow::Quit,
    }
}

fn write_transcript(manager: &SessionManager, path: &Path) -> Result<()> {
    let json = manager.transcript().to_json()?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::connector::MockConnector;
    use crate::persona;
    use crate::session::{MockDevices, SessionEvent, SessionOptions};

    fn quiet_args() -> LiveArgs {
        LiveArgs {
            quiet: true,
            ..LiveArgs::default()
        }
    }

    fn manager(connector: &MockConnector, devices: &MockDevices) -> SessionManager {
        let persona = persona::find(&persona::builtin(), "vedic-seer").unwrap();
        SessionManager::new(Arc::new(connector.clone()), Arc::new(devices.clone()), persona)
            .with_options(SessionOptions {
                frame_size: 4,
                ..SessionOptions::default()
            })
    }

    #[tokio::test]
    async fn interrupt_ends_loop_while_events_keep_arriving() {
        let connector = MockConnector::new();
        let devices = MockDevices::new();
        let mut session = manager(&connector, &devices);
        session.start().await.unwrap();
        let remote = connector.take_remote().unwrap();

        // Busier than the interrupt delay, so a per-turn timer would never fire
        let chatter = tokio::spawn(async move {
            remote.emit(SessionEvent::Opened).await;
            for _ in 0..5000 {
                remote.emit(SessionEvent::InputTranscript("om ".into())).await;
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });
        let interrupt = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<(), std::io::Error>(())
        };

        let finished = tokio::time::timeout(
            Duration::from_secs(5),
            conversation_loop(&mut session, &quiet_args(), &b""[..], interrupt),
        )
        .await;

        assert!(finished.is_ok(), "loop ignored the interrupt");
        assert_eq!(session.state(), SessionState::Live);
        chatter.abort();
        session.stop();
    }

    #[tokio::test]
    async fn quit_command_ends_loop() {
        let connector = MockConnector::new();
        let devices = MockDevices::new();
        let mut session = manager(&connector, &devices);
        session.start().await.unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            conversation_loop(
                &mut session,
                &quiet_args(),
                &b"s\nq\n"[..],
                std::future::pending::<std::io::Result<()>>(),
            ),
        )
        .await;

        assert!(matches!(result, Ok(Ok(()))));
        session.stop();
        assert_eq!(session.state(), SessionState::Closed);
    }
}
