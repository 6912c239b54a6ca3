//! Operation journal
//!
//! Appends one JSON line per cache operation to `journal.log` in the
//! metadata directory. A removal that stops part way is recorded with the
//! step it stopped at, which is what an operator needs to finish by hand.

use crate::config::{schema::Config, ConfigManager};
use chrono::Utc;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Append-only JSON lines journal
pub struct Journal {
    enabled: bool,
    path: PathBuf,
}

impl Journal {
    pub fn new(config: &Config) -> Self {
        Self {
            enabled: config.general.journal,
            path: ConfigManager::journal_path(config),
        }
    }

    /// Record an event
    ///
    /// Write failures are logged and otherwise ignored: the operation being
    /// journaled has already happened.
    pub async fn log(&self, event: &str, data: &serde_json::Value) {
        if !self.enabled {
            return;
        }

        let entry = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "event": event,
            "data": data,
        });

        let mut line = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize journal entry: {}", e);
                return;
            }
        };
        line.push('\n');

        if let Err(e) = self.append(&line).await {
            warn!("Failed to write journal {}: {}", self.path.display(), e);
        }
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
