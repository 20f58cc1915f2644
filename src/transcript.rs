//! Conversation transcript.
//!
//! Streamed transcription fragments accumulate per direction until the
//! model finishes its turn, then become one entry each (user first).

use crate::defaults;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Who said it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Model => f.write_str("model"),
        }
    }
}

/// One flushed turn of one speaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Pending text for the turn in progress, one buffer per direction.
#[derive(Debug, Default, Clone)]
pub struct TurnAccumulator {
    user: String,
    model: String,
}

impl TurnAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, fragment: &str) {
        self.user.push_str(fragment);
    }

    pub fn push_model(&mut self, fragment: &str) {
        self.model.push_str(fragment);
    }

    pub fn pending_user(&self) -> &str {
        &self.user
    }

    pub fn pending_model(&self) -> &str {
        &self.model
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.model.is_empty()
    }

    /// Turns non-empty buffers into entries, user first, and clears both.
    pub fn flush(&mut self) -> Vec<TranscriptEntry> {
        let mut entries = Vec::with_capacity(2);
        let user = std::mem::take(&mut self.user);
        let model = std::mem::take(&mut self.model);
        if !user.is_empty() {
            entries.push(TranscriptEntry::new(Role::User, user));
        }
        if !model.is_empty() {
            entries.push(TranscriptEntry::new(Role::Model, model));
        }
        entries
    }

    pub fn clear(&mut self) {
        self.user.clear();
        self.model.clear();
    }
}

/// Append-only log of the most recent entries, oldest first.
#[derive(Debug, Clone)]
pub struct TranscriptLog {
    entries: VecDeque<TranscriptEntry>,
    capacity: usize,
}

impl Default for TranscriptLog {
    fn default() -> Self {
        Self::with_capacity(defaults::TRANSCRIPT_CAPACITY)
    }
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends an entry, evicting the oldest when full.
    pub fn push(&mut self, entry: TranscriptEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = TranscriptEntry>) {
        for entry in entries {
            self.push(entry);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn entries(&self) -> impl Iterator<Item = &TranscriptEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.back()
    }

    pub fn to_vec(&self) -> Vec<TranscriptEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.to_vec())
    }
}
