//! Transcript model and the sink contract used to persist it.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::sync::Mutex;

/// Who produced a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    User,
    Agent,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "You"),
            Role::Agent => write!(f, "AI"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Local>,
}

impl TranscriptEntry {
    /// Creates an entry stamped with the current local time.
    pub fn now(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Local::now(),
        }
    }
}

/// Persists conversation transcripts.
///
/// Failures are reported to the caller, which logs them; they never end the
/// session.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn append(&self, entry: TranscriptEntry) -> Result<()>;
}

/// An in-memory `TranscriptSink` for development and integration testing.
#[derive(Debug, Default)]
pub struct MemoryTranscriptSink {
    entries: Mutex<Vec<TranscriptEntry>>,
}

impl MemoryTranscriptSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything appended so far.
    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TranscriptSink for MemoryTranscriptSink {
    async fn append(&self, entry: TranscriptEntry) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("transcript buffer poisoned"))?
            .push(entry);
        Ok(())
    }
}
