//! Terminal rendering for a running conversation.
//!
//! Transcript lines go to stdout; status, meters and errors go to stderr so
//! stdout can be piped.

use crate::persona::Persona;
use crate::session::state::SessionState;
use crate::transcript::{Role, TranscriptEntry};
use std::io::{self, Write};

const DIM: &str = "\x1b[2m";
const BOLD: &str = "\x1b[1m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// Width of each level meter in characters.
const METER_WIDTH: usize = 20;

/// Clear the current terminal line (replaces the meter line)
pub fn clear_line() {
    eprint!("\r\x1b[2K");
}

/// Render a 0.0-1.0 level as a fixed-width bar.
///
/// Speech RMS rarely exceeds 0.3, so the scale is stretched by 3x.
pub fn format_level_bar(level: f32, width: usize) -> String {
    let scaled = (level.clamp(0.0, 1.0) * 3.0).min(1.0);
    let filled = (scaled * width as f32).round() as usize;
    format!("{}{}", "█".repeat(filled), "·".repeat(width - filled))
}

fn role_label(role: Role) -> String {
    match role {
        Role::User => format!("{CYAN}{BOLD}you{RESET}"),
        Role::Model => format!("{GREEN}{BOLD}guru{RESET}"),
    }
}

/// Print one transcript entry.
pub fn render_entry(entry: &TranscriptEntry) {
    clear_line();
    let time = entry.timestamp.format("%H:%M:%S");
    println!(
        "{DIM}{time}{RESET} {}: {}",
        role_label(entry.role),
        entry.text.trim()
    );
    io::stdout().flush().ok();
}

/// Overwrite the meter line with microphone and speaker levels.
pub fn render_levels(input: f32, output: f32, muted: bool) {
    let mic = if muted {
        format!("{DIM}{}{RESET}", format_level_bar(0.0, METER_WIDTH))
    } else {
        format_level_bar(input, METER_WIDTH)
    };
    eprint!(
        "\r\x1b[2K{DIM}mic{RESET} {mic} {DIM}voice{RESET} {}",
        format_level_bar(output, METER_WIDTH)
    );
    io::stderr().flush().ok();
}

/// One-line summary of the session.
pub fn format_status(state: SessionState, persona: &Persona, muted: bool) -> String {
    let state_color = match state {
        SessionState::Live => GREEN,
        SessionState::Connecting | SessionState::Closing => YELLOW,
        SessionState::Errored => RED,
        SessionState::Idle | SessionState::Closed => DIM,
    };
    let mute = if muted {
        format!(" {YELLOW}[muted]{RESET}")
    } else {
        String::new()
    };
    format!(
        "{state_color}{state}{RESET} {DIM}persona{RESET} {} {DIM}({}){RESET}{mute}",
        persona.name, persona.voice
    )
}

pub fn render_status(state: SessionState, persona: &Persona, muted: bool) {
    clear_line();
    eprintln!("{}", format_status(state, persona, muted));
}

/// Print a message meant for the person at the terminal.
pub fn render_notice(message: &str) {
    clear_line();
    eprintln!("{DIM}{message}{RESET}");
}

pub fn render_error(message: &str) {
    clear_line();
    eprintln!("{RED}{message}{RESET}");
}
