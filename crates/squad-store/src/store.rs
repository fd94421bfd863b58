//! Snapshot and record collections over per-session JSONL files.

use crate::jsonl::{append_jsonl, decode_rows, read_jsonl_values};
use crate::layout::Workspace;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use squad_core::{Result, Session, SquadError};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

/// Timestamp carried by the marker line written when a collection is created.
pub const SENTINEL_TIMESTAMP: &str = "1970-01-01T00:00:00.000Z";

/// Collections whose readers see the latest record per id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotCollection {
    Session,
    Agents,
    Tasks,
    Messages,
    AgentRuns,
    Artifacts,
}

/// Collections whose readers see every record in append order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordCollection {
    TaskDependencies,
    TaskStatusHistory,
    ActivityLogs,
}

impl SnapshotCollection {
    pub const ALL: [SnapshotCollection; 6] = [
        SnapshotCollection::Session,
        SnapshotCollection::Agents,
        SnapshotCollection::Tasks,
        SnapshotCollection::Messages,
        SnapshotCollection::AgentRuns,
        SnapshotCollection::Artifacts,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            SnapshotCollection::Session => "session.jsonl",
            SnapshotCollection::Agents => "agents.jsonl",
            SnapshotCollection::Tasks => "tasks.jsonl",
            SnapshotCollection::Messages => "messages.jsonl",
            SnapshotCollection::AgentRuns => "agent-runs.jsonl",
            SnapshotCollection::Artifacts => "artifacts.jsonl",
        }
    }
}

impl std::str::FromStr for SnapshotCollection {
    type Err = SquadError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.file_name().trim_end_matches(".jsonl") == s)
            .ok_or_else(|| SquadError::InvalidArgument(format!("unknown snapshot collection \"{}\"", s)))
    }
}

impl RecordCollection {
    pub const ALL: [RecordCollection; 3] = [
        RecordCollection::TaskDependencies,
        RecordCollection::TaskStatusHistory,
        RecordCollection::ActivityLogs,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            RecordCollection::TaskDependencies => "task-dependencies.jsonl",
            RecordCollection::TaskStatusHistory => "task-status-history.jsonl",
            RecordCollection::ActivityLogs => "activity-logs.jsonl",
        }
    }
}

/// Outcome of [`RecordStore::compact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompactStats {
    /// Rows before compaction (sentinel excluded)
    pub rows_before: usize,
    /// Rows kept
    pub rows_after: usize,
}

/// Exclusive advisory lock on a session, released on drop.
///
/// Only cooperating callers that also take the lock are excluded; plain
/// appends never wait on it.
#[derive(Debug)]
pub struct SessionLock {
    file: std::fs::File,
    path: PathBuf,
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!("Failed to release {}: {}", self.path.display(), e);
        }
    }
}

/// The record store for one project workspace.
#[derive(Debug, Clone)]
pub struct RecordStore {
    workspace: Workspace,
}

impl RecordStore {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    fn snapshot_path(&self, session_id: &str, collection: SnapshotCollection) -> PathBuf {
        self.workspace.session_dir(session_id).join(collection.file_name())
    }

    fn record_path(&self, session_id: &str, collection: RecordCollection) -> PathBuf {
        self.workspace.session_dir(session_id).join(collection.file_name())
    }

    /// Create the session directories and seed every missing collection file
    /// with a sentinel line.
    #[instrument(skip(self))]
    pub async fn ensure_session_store(&self, session_id: &str) -> Result<()> {
        self.workspace.ensure_session(session_id).await?;

        let paths = SnapshotCollection::ALL
            .iter()
            .map(|c| self.snapshot_path(session_id, *c))
            .chain(RecordCollection::ALL.iter().map(|c| self.record_path(session_id, *c)));

        for path in paths {
            if !fs::try_exists(&path).await? {
                append_jsonl(&path, &sentinel()).await?;
                debug!("Initialized {}", path.display());
            }
        }
        Ok(())
    }

    async fn ensure_file(&self, session_id: &str, path: &std::path::Path) -> Result<()> {
        if !fs::try_exists(path).await? {
            self.ensure_session_store(session_id).await?;
        }
        Ok(())
    }

    /// Append a full record to a snapshot collection.
    ///
    /// Readers will see this record in place of any earlier one with the same id.
    pub async fn append_snapshot<T: Serialize>(
        &self,
        session_id: &str,
        collection: SnapshotCollection,
        record: &T,
    ) -> Result<()> {
        let path = self.snapshot_path(session_id, collection);
        self.ensure_file(session_id, &path).await?;
        append_jsonl(&path, record).await?;
        debug!("Appended snapshot to {}", collection.file_name());
        Ok(())
    }

    /// Latest record per id, as raw JSON.
    pub async fn read_snapshot_values(
        &self,
        session_id: &str,
        collection: SnapshotCollection,
    ) -> Result<Vec<Value>> {
        let rows = read_jsonl_values(&self.snapshot_path(session_id, collection)).await?;
        Ok(project_latest_by_id(rows))
    }

    /// Latest record per id, decoded into `T`.
    ///
    /// A missing session or collection reads as empty.
    pub async fn read_snapshots<T: DeserializeOwned>(
        &self,
        session_id: &str,
        collection: SnapshotCollection,
    ) -> Result<Vec<T>> {
        let rows = self.read_snapshot_values(session_id, collection).await?;
        Ok(decode_rows(rows, &self.snapshot_path(session_id, collection)))
    }

    /// Append to a pure log collection.
    pub async fn append_record<T: Serialize>(
        &self,
        session_id: &str,
        collection: RecordCollection,
        record: &T,
    ) -> Result<()> {
        let path = self.record_path(session_id, collection);
        self.ensure_file(session_id, &path).await?;
        append_jsonl(&path, record).await?;
        debug!("Appended record to {}", collection.file_name());
        Ok(())
    }

    /// Every record of a log collection in append order.
    pub async fn read_records<T: DeserializeOwned>(
        &self,
        session_id: &str,
        collection: RecordCollection,
    ) -> Result<Vec<T>> {
        let path = self.record_path(session_id, collection);
        let rows = read_jsonl_values(&path)
            .await?
            .into_iter()
            .filter(|row| !is_sentinel(row))
            .collect();
        Ok(decode_rows(rows, &path))
    }

    /// The session record, if one was ever written.
    pub async fn read_session(&self, session_id: &str) -> Result<Option<Session>> {
        let mut sessions: Vec<Session> = self
            .read_snapshots(session_id, SnapshotCollection::Session)
            .await?;
        Ok(sessions.pop())
    }

    /// All sessions with a session record, most recently updated first.
    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        let mut entries = match fs::read_dir(self.workspace.sessions_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(session_id) = name.to_str() else {
                continue;
            };
            if let Some(session) = self.read_session(session_id).await? {
                sessions.push(session);
            }
        }

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    /// Take the session's exclusive lock, waiting for other holders.
    pub async fn lock_session(&self, session_id: &str) -> Result<SessionLock> {
        self.workspace.ensure_session(session_id).await?;
        let path = self.workspace.lock_path(session_id);
        let lock_path = path.clone();

        let file = tokio::task::spawn_blocking(move || -> std::io::Result<std::fs::File> {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(&lock_path)?;
            file.lock_exclusive()?;
            Ok(file)
        })
        .await
        .map_err(|e| SquadError::Process(format!("lock task failed: {}", e)))??;

        debug!("Locked session {}", session_id);
        Ok(SessionLock { file, path })
    }

    /// Rewrite a snapshot collection to its projection.
    ///
    /// Writers that do not hold the session lock and append during the
    /// rewrite may lose that append.
    #[instrument(skip(self))]
    pub async fn compact(
        &self,
        session_id: &str,
        collection: SnapshotCollection,
    ) -> Result<CompactStats> {
        let _lock = self.lock_session(session_id).await?;
        let path = self.snapshot_path(session_id, collection);

        let rows: Vec<Value> = read_jsonl_values(&path)
            .await?
            .into_iter()
            .filter(|row| !is_sentinel(row))
            .collect();
        let rows_before = rows.len();
        let projected = project_latest_by_id(rows);
        let rows_after = projected.len();

        let mut content = serde_json::to_string(&sentinel())?;
        content.push('\n');
        for row in &projected {
            content.push_str(&serde_json::to_string(row)?);
            content.push('\n');
        }

        let temp_path = path.with_extension("jsonl.tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, &path).await?;

        info!(
            "Compacted {} for session {}: {} -> {} rows",
            collection.file_name(),
            session_id,
            rows_before,
            rows_after
        );
        Ok(CompactStats {
            rows_before,
            rows_after,
        })
    }
}

fn sentinel() -> Value {
    json!({ "__init": true, "timestamp": SENTINEL_TIMESTAMP })
}

fn is_sentinel(row: &Value) -> bool {
    row.get("__init").and_then(Value::as_bool).unwrap_or(false)
}

/// Fold rows to the latest value per `id`.
///
/// Rows without an id come first in append order, then one row per id in
/// order of the id's first appearance, holding the most recent value.
/// Sentinel rows are dropped.
pub fn project_latest_by_id(rows: impl IntoIterator<Item = Value>) -> Vec<Value> {
    let mut without_id = Vec::new();
    let mut first_seen: Vec<String> = Vec::new();
    let mut latest: HashMap<String, Value> = HashMap::new();

    for row in rows {
        if is_sentinel(&row) {
            continue;
        }

        let id = row
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        match id {
            Some(id) => {
                if !latest.contains_key(&id) {
                    first_seen.push(id.clone());
                }
                latest.insert(id, row);
            }
            None => without_id.push(row),
        }
    }

    without_id.extend(first_seen.into_iter().filter_map(|id| latest.remove(&id)));
    without_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> RecordStore {
        RecordStore::new(Workspace::new(temp.path()))
    }

    #[test]
    fn test_projection_keeps_first_appearance_order() {
        let rows = vec![
            json!({"id": "a", "v": 1}),
            json!({"id": "a", "v": 2}),
            json!({"id": "b", "v": 1}),
        ];
        assert_eq!(
            project_latest_by_id(rows),
            vec![json!({"id": "a", "v": 2}), json!({"id": "b", "v": 1})]
        );
    }

    #[test]
    fn test_projection_puts_idless_rows_first() {
        let rows = vec![
            json!({"__init": true, "timestamp": SENTINEL_TIMESTAMP}),
            json!({"id": "a", "v": 1}),
            json!({"note": "no id"}),
            json!({"id": "b", "v": 1}),
            json!({"id": "a", "v": 3}),
        ];
        assert_eq!(
            project_latest_by_id(rows),
            vec![
                json!({"note": "no id"}),
                json!({"id": "a", "v": 3}),
                json!({"id": "b", "v": 1})
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_session_reads_empty() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let rows: Vec<Value> = store
            .read_snapshots("nowhere", SnapshotCollection::Tasks)
            .await
            .unwrap();
        assert!(rows.is_empty());
        let records: Vec<Value> = store
            .read_records("nowhere", RecordCollection::ActivityLogs)
            .await
            .unwrap();
        assert!(records.is_empty());
        assert!(!store.workspace().session_dir("nowhere").exists());
    }

    #[tokio::test]
    async fn test_first_append_seeds_all_collections() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        store
            .append_snapshot("default", SnapshotCollection::Tasks, &json!({"id": "t1"}))
            .await
            .unwrap();

        for collection in SnapshotCollection::ALL {
            let path = store.workspace().session_dir("default").join(collection.file_name());
            let content = std::fs::read_to_string(&path).unwrap();
            assert!(content.starts_with("{\"__init\":true"), "{}", collection.file_name());
        }
        for collection in RecordCollection::ALL {
            let path = store.workspace().session_dir("default").join(collection.file_name());
            assert!(path.exists());
        }

        let empty: Vec<Value> = store
            .read_records("default", RecordCollection::TaskStatusHistory)
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_through_files() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        for row in [
            json!({"id": "a", "v": 1}),
            json!({"id": "a", "v": 2}),
            json!({"id": "b", "v": 1}),
        ] {
            store
                .append_snapshot("default", SnapshotCollection::Agents, &row)
                .await
                .unwrap();
        }

        let rows: Vec<Value> = store
            .read_snapshots("default", SnapshotCollection::Agents)
            .await
            .unwrap();
        assert_eq!(rows, vec![json!({"id": "a", "v": 2}), json!({"id": "b", "v": 1})]);
    }

    #[tokio::test]
    async fn test_records_keep_every_row() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        for v in 0..3 {
            store
                .append_record(
                    "default",
                    RecordCollection::TaskStatusHistory,
                    &json!({"id": "same", "v": v}),
                )
                .await
                .unwrap();
        }
        let rows: Vec<Value> = store
            .read_records("default", RecordCollection::TaskStatusHistory)
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2]["v"], 2);
    }

    #[tokio::test]
    async fn test_compact_rewrites_to_projection() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        for v in 0..5 {
            store
                .append_snapshot("default", SnapshotCollection::Tasks, &json!({"id": "t1", "v": v}))
                .await
                .unwrap();
        }
        store
            .append_snapshot("default", SnapshotCollection::Tasks, &json!({"id": "t2", "v": 0}))
            .await
            .unwrap();

        let stats = store.compact("default", SnapshotCollection::Tasks).await.unwrap();
        assert_eq!(stats, CompactStats { rows_before: 6, rows_after: 2 });

        let rows: Vec<Value> = store
            .read_snapshots("default", SnapshotCollection::Tasks)
            .await
            .unwrap();
        assert_eq!(rows, vec![json!({"id": "t1", "v": 4}), json!({"id": "t2", "v": 0})]);

        let raw = std::fs::read_to_string(
            store.workspace().session_dir("default").join("tasks.jsonl"),
        )
        .unwrap();
        assert_eq!(raw.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_list_sessions_newest_first() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let older = chrono::Utc::now() - chrono::Duration::minutes(5);
        let newer = chrono::Utc::now();
        for (id, updated) in [("old", older), ("new", newer)] {
            let session = Session {
                id: id.to_string(),
                title: id.to_string(),
                goal: "goal".to_string(),
                status: squad_core::SessionStatus::Active,
                manager_agent_id: None,
                provider_id: None,
                root_workdir: None,
                created_at: older,
                updated_at: updated,
                completed_at: None,
            };
            store
                .append_snapshot(id, SnapshotCollection::Session, &session)
                .await
                .unwrap();
        }
        // A directory without a session record is ignored
        store.workspace().ensure_session("empty").await.unwrap();

        let sessions = store.list_sessions().await.unwrap();
        let ids: Vec<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn test_session_lock_is_reentrant_after_drop() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let lock = store.lock_session("default").await.unwrap();
        drop(lock);
        let _again = store.lock_session("default").await.unwrap();
    }

    #[test]
    fn test_collection_from_str() {
        assert_eq!(
            "agent-runs".parse::<SnapshotCollection>().unwrap(),
            SnapshotCollection::AgentRuns
        );
        assert!("task-dependencies".parse::<SnapshotCollection>().is_err());
    }
}
