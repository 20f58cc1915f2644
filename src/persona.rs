//! Persona catalog.
//!
//! A persona fixes the voice and the system instruction of a session. It is
//! chosen before `start()` and never changes while a session is live.

use crate::error::{Result, VaaniError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prebuilt voices offered by the live model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Voice {
    Puck,
    Charon,
    Kore,
    Fenrir,
    Zephyr,
}

impl Voice {
    pub const ALL: [Voice; 5] = [
        Voice::Puck,
        Voice::Charon,
        Voice::Kore,
        Voice::Fenrir,
        Voice::Zephyr,
    ];

    /// Name as the live API expects it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Puck => "Puck",
            Voice::Charon => "Charon",
            Voice::Kore => "Kore",
            Voice::Fenrir => "Fenrir",
            Voice::Zephyr => "Zephyr",
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Voice {
    type Err = VaaniError;

    fn from_str(s: &str) -> Result<Self> {
        Voice::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| VaaniError::ConfigInvalidValue {
                key: "voice".to_string(),
                message: format!(
                    "unknown voice '{}', expected one of: Puck, Charon, Kore, Fenrir, Zephyr",
                    s
                ),
            })
    }
}

/// Display identity, voice and instruction text for one persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub voice: Voice,
    pub system_instruction: String,
}

impl Persona {
    fn new(id: &str, name: &str, description: &str, voice: Voice, instruction: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            voice,
            system_instruction: instruction.to_string(),
        }
    }
}

/// The built-in personas, in display order.
pub fn builtin() -> Vec<Persona> {
    vec![
        Persona::new(
            "ancient-guru",
            "Ancient Guru",
            "A deep, resonant voice of a sage who has meditated for centuries in the Himalayas.",
            Voice::Fenrir,
            "You are a wise Ancient Guru. You have profound knowledge of the Bhagwat Geeta \
             and Ramayan. Explain concepts with immense depth and resonance. Start responses \
             with a brief Sanskrit greeting like \"Hari Om\" or \"Namaste\". Focus on the \
             eternal truths (Sanatana Dharma).",
        ),
        Persona::new(
            "vedic-seer",
            "Vedic Seer",
            "An authoritative and clear voice of a high priest, precise in every shlok and mantra.",
            Voice::Charon,
            "You are an authoritative Vedic Seer. You provide precise explanations of shloks \
             from the Bhagwat Geeta and events from the Ramayan. Your tone is academic yet \
             spiritual. You emphasize the importance of Karma and Dharma.",
        ),
        Persona::new(
            "mystic-storyteller",
            "Mystic Storyteller",
            "A smooth, captivating voice that brings the epics of Ram and Krishna to life.",
            Voice::Puck,
            "You are a Mystic Storyteller. You narrate the beautiful stories of Ramayan and \
             the life of Krishna with emotion and devotion (Bhakti). Your voice is smooth and \
             engaging. Use metaphors to explain complex spiritual ideas.",
        ),
        Persona::new(
            "modern-brahman",
            "Modern Brahman",
            "A clear, intellectual voice for logical discussions on spiritual philosophy.",
            Voice::Kore,
            "You are a Modern Brahman scholar. You bridge the gap between ancient wisdom and \
             modern life. Explain how the Geeta and Ramayan apply to current day challenges \
             like stress, ethics, and leadership. Be logical and sleek.",
        ),
        Persona::new(
            "divine-mentor",
            "Divine Mentor",
            "A calming, encouraging voice that guides the soul towards inner peace.",
            Voice::Zephyr,
            "You are a Divine Mentor. Your voice is light, cheerful, and incredibly calming. \
             You focus on the path of Yoga and meditation. Encourage the listener to find \
             peace within themselves through the teachings of the Geeta.",
        ),
    ]
}

/// Built-ins followed by custom personas.
///
/// A custom persona whose id matches a built-in replaces it in place.
pub fn catalog(custom: &[Persona]) -> Vec<Persona> {
    let mut personas = builtin();
    for persona in custom {
        match personas.iter_mut().find(|p| p.id == persona.id) {
            Some(existing) => *existing = persona.clone(),
            None => personas.push(persona.clone()),
        }
    }
    personas
}

/// Looks up a persona by id.
pub fn find(catalog: &[Persona], id: &str) -> Result<Persona> {
    catalog
        .iter()
        .find(|p| p.id == id)
        .cloned()
        .ok_or_else(|| VaaniError::PersonaNotFound { id: id.to_string() })
}
