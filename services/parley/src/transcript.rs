//! Conversation log on disk.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parley_core::{TranscriptEntry, TranscriptSink};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Appends `[YYYY-MM-DD HH:MM:SS] <role>: <text>` lines to a file.
///
/// The file is opened on the first append and kept open afterwards.
pub struct FileTranscriptSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileTranscriptSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn format_line(entry: &TranscriptEntry) -> String {
    format!(
        "[{}] {}: {}\n",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        entry.role,
        entry.text
    )
}

#[async_trait]
impl TranscriptSink for FileTranscriptSink {
    async fn append(&self, entry: TranscriptEntry) -> Result<()> {
        let mut file = self.file.lock().await;
        if file.is_none() {
            let opened = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .with_context(|| format!("Failed to open {}", self.path.display()))?;
            *file = Some(opened);
        }
        let Some(handle) = file.as_mut() else {
            return Ok(());
        };

        let written = async {
            handle.write_all(format_line(&entry).as_bytes()).await?;
            handle.flush().await
        }
        .await;
        if written.is_err() {
            // Reopen on the next append
            *file = None;
        }
        written.with_context(|| format!("Failed to write {}", self.path.display()))
    }
}
