//! Request journal (SPEC_FULL.md §4.9): durable per-request JSON files with
//! an atomic rename-based pending → processing → completed/failed lifecycle,
//! enabling crash replay. No direct teacher exemplar for file-backed
//! persistence — the entry shape is grounded on `traffic.rs`'s
//! `TrafficEntry`, generalized from an in-memory ring buffer to durable
//! storage via `tokio::fs` + `std::fs::rename`.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JournalStatus {
    Pending,
    Processing,
    Completed,
    Failed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: String,
    pub path: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub model: Option<String>,
    pub status: JournalStatus,
    pub retry: u32,
}

pub struct Journal {
    root: PathBuf,
}

impl Journal {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn pending_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    fn completed_path(&self, id: &str) -> PathBuf {
        self.root.join("completed").join(format!("{id}.json"))
    }

    fn failed_path(&self, id: &str, unix: i64) -> PathBuf {
        self.root.join("failed").join(format!("{id}-{unix}.json"))
    }

    async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::create_dir_all(self.root.join("completed")).await?;
        tokio::fs::create_dir_all(self.root.join("failed")).await?;
        Ok(())
    }

    /// Write a new `pending` entry to disk. Called before the handler runs.
    pub async fn record_pending(&self, entry: &JournalEntry) -> anyhow::Result<()> {
        self.ensure_dirs().await?;
        let payload = serde_json::to_vec_pretty(entry)?;
        tokio::fs::write(self.pending_path(&entry.id), payload).await?;
        Ok(())
    }

    /// Rewrite the entry in place with `status: processing`, right before
    /// dispatch.
    pub async fn mark_processing(&self, entry: &mut JournalEntry) -> anyhow::Result<()> {
        entry.status = JournalStatus::Processing;
        let payload = serde_json::to_vec_pretty(entry)?;
        tokio::fs::write(self.pending_path(&entry.id), payload).await?;
        Ok(())
    }

    /// Move the entry to `completed/` on handler success.
    pub async fn mark_completed(&self, entry: &JournalEntry) -> anyhow::Result<()> {
        let mut completed = entry.clone();
        completed.status = JournalStatus::Completed;
        let payload = serde_json::to_vec_pretty(&completed)?;
        tokio::fs::write(self.completed_path(&entry.id), payload).await?;
        let _ = tokio::fs::remove_file(self.pending_path(&entry.id)).await;
        Ok(())
    }

    /// Move the entry to `failed/` with a reason, on handler error.
    pub async fn mark_failed(&self, entry: &JournalEntry, reason: &str) -> anyhow::Result<()> {
        let unix = Utc::now().timestamp();
        let mut failed = entry.clone();
        failed.status = JournalStatus::Failed(reason.to_string());
        let payload = serde_json::to_vec_pretty(&failed)?;
        tokio::fs::write(self.failed_path(&entry.id, unix), payload).await?;
        let _ = tokio::fs::remove_file(self.pending_path(&entry.id)).await;
        Ok(())
    }

    /// Scan for entries still `pending` or `processing` — replay candidates
    /// after a crash/restart.
    pub async fn pending_entries(&self) -> anyhow::Result<Vec<JournalEntry>> {
        self.ensure_dirs().await?;
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(file) = dir.next_entry().await? {
            if file.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = tokio::fs::read_to_string(file.path()).await?;
            if let Ok(entry) = serde_json::from_str::<JournalEntry>(&content) {
                if matches!(entry.status, JournalStatus::Pending | JournalStatus::Processing) {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> JournalEntry {
        JournalEntry {
            id: id.to_string(),
            path: "/api/v1/chat/completions".into(),
            method: "POST".into(),
            headers: vec![],
            body: "{}".into(),
            timestamp: Utc::now(),
            model: Some("default".into()),
            status: JournalStatus::Pending,
            retry: 0,
        }
    }

    #[tokio::test]
    async fn completed_entry_has_exactly_one_terminal_file() {
        let dir = tempdir();
        let journal = Journal::new(dir.clone());
        let e = entry("abc");
        journal.record_pending(&e).await.unwrap();
        journal.mark_completed(&e).await.unwrap();

        assert!(!journal.pending_path("abc").exists());
        assert!(journal.completed_path("abc").exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn failed_entry_lands_in_failed_dir_with_reason() {
        let dir = tempdir();
        let journal = Journal::new(dir.clone());
        let e = entry("def");
        journal.record_pending(&e).await.unwrap();
        journal.mark_failed(&e, "generation failed: boom").await.unwrap();

        assert!(!journal.pending_path("def").exists());
        let failed_dir = dir.join("failed");
        let mut read = std::fs::read_dir(&failed_dir).unwrap();
        assert!(read.next().is_some());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn pending_entries_surfaces_unfinished_work() {
        let dir = tempdir();
        let journal = Journal::new(dir.clone());
        let e = entry("ghi");
        journal.record_pending(&e).await.unwrap();

        let pending = journal.pending_entries().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "ghi");
        std::fs::remove_dir_all(&dir).ok();
    }

    fn tempdir() -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("journal-test-{}", uuid::Uuid::new_v4()));
        path
    }
}
