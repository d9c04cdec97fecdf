//! Deployment log: append-only audit trail of facility operations
//!
//! Every command the executor attempts - success, failure, or rollback -
//! becomes exactly one entry: who asked, which record it served, what was
//! actually run, and the raw process output. Entries are written as
//! JSON-lines and are never mutated or deleted by the manager; consumers get
//! a time-ordered, paginated feed.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// What a logged command was doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    Apply,
    Remove,
    /// Undo of this invocation's own partial work after a mid-plan failure
    Rollback,
}

/// A single deployment log entry. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentLogEntry {
    /// When the command was attempted (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Who triggered the operation
    pub actor: String,

    /// Identity tag of the record the command served
    pub tag: String,

    pub action: LogAction,

    /// Command text as issued (rendered argv)
    pub command: String,

    /// Raw process output (stdout and stderr combined)
    pub output: String,

    pub success: bool,
}

impl DeploymentLogEntry {
    pub fn new(
        actor: impl Into<String>,
        tag: impl Into<String>,
        action: LogAction,
        command: impl Into<String>,
        output: impl Into<String>,
        success: bool,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            actor: actor.into(),
            tag: tag.into(),
            action,
            command: command.into(),
            output: output.into(),
            success,
        }
    }
}

/// Append-only deployment log backed by a JSON-lines file
#[derive(Debug, Clone)]
pub struct DeploymentLog {
    log_path: PathBuf,
}

impl DeploymentLog {
    /// Creates a log instance in the default state directory
    ///
    /// # Errors
    ///
    /// Returns `Err` if the state directory cannot be determined
    pub fn new() -> std::io::Result<Self> {
        let mut log_path = crate::utils::get_state_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "State directory not found")
        })?;
        log_path.push("deploy.log");

        Ok(Self { log_path })
    }

    /// Creates a log instance at an explicit path (tests, packaged installs)
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: path.into(),
        }
    }

    /// Appends an entry. Entries are one JSON object per line, fsynced so an
    /// apply that crashes the host still leaves its trail.
    pub async fn append(&self, entry: &DeploymentLogEntry) -> std::io::Result<()> {
        if let Some(parent) = self.log_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string(entry)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.sync_all().await?;

        Ok(())
    }

    /// Reads a page of entries, newest first.
    ///
    /// `offset` is measured from the newest entry; unreadable lines are
    /// skipped rather than failing the whole page.
    pub async fn read_page(
        &self,
        offset: usize,
        limit: usize,
    ) -> std::io::Result<Vec<DeploymentLogEntry>> {
        let content = match tokio::fs::read_to_string(&self.log_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let entries: Vec<DeploymentLogEntry> = content
            .lines()
            .rev()
            .skip(offset)
            .take(limit)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        Ok(entries)
    }

    /// Reads the most recent events from the log
    #[allow(dead_code)]
    pub async fn read_recent(&self, count: usize) -> std::io::Result<Vec<DeploymentLogEntry>> {
        self.read_page(0, count).await
    }

    /// Total number of entries on disk
    pub async fn len(&self) -> std::io::Result<usize> {
        match tokio::fs::read_to_string(&self.log_path).await {
            Ok(content) => Ok(content.lines().count()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }

    pub async fn is_empty(&self) -> std::io::Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Returns the path to the log file
    #[allow(dead_code)]
    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_log() -> DeploymentLog {
        let dir = std::env::temp_dir().join(format!("routemgr-log-test-{}", uuid::Uuid::new_v4()));
        DeploymentLog::at_path(dir.join("deploy.log"))
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let log = temp_log();

        let entry = DeploymentLogEntry::new(
            "admin",
            "firewallrule:test",
            LogAction::Apply,
            "nft add rule inet routemgr input tcp dport 22 accept",
            "",
            true,
        );
        log.append(&entry).await.unwrap();

        let entries = log.read_recent(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tag, "firewallrule:test");
        assert!(entries[0].success);
    }

    #[tokio::test]
    async fn test_read_page_newest_first() {
        let log = temp_log();

        for i in 0..5 {
            let entry = DeploymentLogEntry::new(
                "admin",
                format!("firewallrule:{i}"),
                LogAction::Apply,
                "cmd",
                "",
                true,
            );
            log.append(&entry).await.unwrap();
        }

        let first_page = log.read_page(0, 2).await.unwrap();
        assert_eq!(first_page.len(), 2);
        assert_eq!(first_page[0].tag, "firewallrule:4");
        assert_eq!(first_page[1].tag, "firewallrule:3");

        let second_page = log.read_page(2, 2).await.unwrap();
        assert_eq!(second_page[0].tag, "firewallrule:2");

        assert_eq!(log.len().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_missing_log_reads_empty() {
        let log = temp_log();
        assert!(log.read_recent(10).await.unwrap().is_empty());
        assert!(log.is_empty().await.unwrap());
    }

    #[test]
    fn test_entry_serialization() {
        let entry = DeploymentLogEntry::new(
            "admin",
            "portforward:x",
            LogAction::Rollback,
            "nft delete rule",
            "some stderr",
            false,
        );

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("rollback"));
        assert!(json.contains("some stderr"));

        let back: DeploymentLogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.action, LogAction::Rollback);
        assert!(!back.success);
    }
}
