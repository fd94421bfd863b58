//! Domain events and human-readable activity.
//!
//! Events are the structured record of what happened (`task.assigned`,
//! `message.delivered`, ...) and live in the session's `events.jsonl`.
//! Activity lines are the prose a person tails while a session runs; they go
//! to `activity-logs.jsonl` and, when a reporter is attached, straight to it
//! as well.

use crate::jsonl::{append_jsonl, read_jsonl};
use crate::store::{RecordCollection, RecordStore};
use chrono::Utc;
use serde_json::Value;
use squad_core::ids::{self, new_id};
use squad_core::{ActivityLog, Event, LogLevel, Result};
use std::sync::Arc;
use tracing::debug;

/// Receives activity lines as they are written.
pub trait ActivityReporter: Send + Sync {
    fn report(&self, entry: &ActivityLog);
}

/// An activity line before it gets an id and timestamp.
#[derive(Debug, Clone)]
pub struct ActivityEntry {
    pub session_id: String,
    pub agent_id: Option<String>,
    pub level: LogLevel,
    pub kind: String,
    pub message: String,
    pub details: Option<Value>,
}

impl ActivityEntry {
    pub fn new(
        session_id: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            agent_id: None,
            level: LogLevel::Info,
            kind: kind.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn agent(mut self, agent_id: Option<&str>) -> Self {
        self.agent_id = agent_id.map(str::to_string);
        self
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Writer and reader for a workspace's events and activity.
#[derive(Clone)]
pub struct Journal {
    store: RecordStore,
    reporter: Option<Arc<dyn ActivityReporter>>,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("store", &self.store)
            .field("reporter", &self.reporter.is_some())
            .finish()
    }
}

impl Journal {
    pub fn new(store: RecordStore) -> Self {
        Self {
            store,
            reporter: None,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ActivityReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Record a domain event.
    pub async fn append_event(
        &self,
        session_id: &str,
        event_type: &str,
        payload: Value,
        agent_id: Option<&str>,
    ) -> Result<Event> {
        let event = Event {
            id: new_id(ids::EVENT),
            session_id: session_id.to_string(),
            agent_id: agent_id.map(str::to_string),
            event_type: event_type.to_string(),
            timestamp: Utc::now(),
            payload,
        };
        self.store.workspace().ensure_session(session_id).await?;
        append_jsonl(&self.store.workspace().events_path(session_id), &event).await?;
        debug!("Event {} ({})", event.event_type, event.id);
        Ok(event)
    }

    /// Events in append order, optionally for one agent.
    pub async fn list_events(&self, session_id: &str, agent_id: Option<&str>) -> Result<Vec<Event>> {
        let events: Vec<Event> = read_jsonl(&self.store.workspace().events_path(session_id)).await?;
        Ok(match agent_id {
            Some(agent) => events
                .into_iter()
                .filter(|e| e.agent_id.as_deref() == Some(agent))
                .collect(),
            None => events,
        })
    }

    /// Record an activity line.
    pub async fn log(&self, entry: ActivityEntry) -> Result<ActivityLog> {
        let details_json = entry
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let log = ActivityLog {
            id: new_id(ids::ACTIVITY),
            session_id: entry.session_id,
            agent_id: entry.agent_id,
            level: entry.level,
            kind: entry.kind,
            message: entry.message,
            details_json,
            created_at: Utc::now(),
        };

        self.store
            .append_record(&log.session_id, RecordCollection::ActivityLogs, &log)
            .await?;

        if let Some(reporter) = &self.reporter {
            reporter.report(&log);
        }
        Ok(log)
    }

    /// Activity sorted by creation time, optionally for one agent.
    pub async fn list_activity(
        &self,
        session_id: &str,
        agent_id: Option<&str>,
    ) -> Result<Vec<ActivityLog>> {
        let mut logs: Vec<ActivityLog> = self
            .store
            .read_records(session_id, RecordCollection::ActivityLogs)
            .await?;
        if let Some(agent) = agent_id {
            logs.retain(|l| l.agent_id.as_deref() == Some(agent));
        }
        logs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Workspace;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    impl ActivityReporter for Collect {
        fn report(&self, entry: &ActivityLog) {
            self.0.lock().unwrap().push(entry.message.clone());
        }
    }

    fn journal(temp: &TempDir) -> Journal {
        Journal::new(RecordStore::new(Workspace::new(temp.path())))
    }

    #[tokio::test]
    async fn test_events_filter_by_agent() {
        let temp = TempDir::new().unwrap();
        let journal = journal(&temp);
        journal
            .append_event("default", "agent.spawned", json!({"mode": "oneshot"}), Some("agent-a"))
            .await
            .unwrap();
        journal
            .append_event("default", "task.assigned", json!({"taskId": "task-1"}), Some("agent-b"))
            .await
            .unwrap();

        let all = journal.list_events("default", None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].event_type, "agent.spawned");

        let mine = journal.list_events("default", Some("agent-b")).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].payload["taskId"], "task-1");
    }

    #[tokio::test]
    async fn test_activity_is_stored_and_reported() {
        let temp = TempDir::new().unwrap();
        let collect = Arc::new(Collect::default());
        let journal = journal(&temp).with_reporter(collect.clone());

        let log = journal
            .log(
                ActivityEntry::new("default", "task.status", "agent-a status: todo -> ready")
                    .agent(Some("agent-a"))
                    .details(json!({"taskId": "task-1"})),
            )
            .await
            .unwrap();
        assert_eq!(log.details_json.as_deref(), Some("{\"taskId\":\"task-1\"}"));

        journal
            .log(ActivityEntry::new("default", "agent.stderr", "oops").level(LogLevel::Warning))
            .await
            .unwrap();

        let logs = journal.list_activity("default", Some("agent-a")).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].kind, "task.status");
        assert_eq!(collect.0.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_session_has_no_events() {
        let temp = TempDir::new().unwrap();
        let journal = journal(&temp);
        assert!(journal.list_events("fresh", None).await.unwrap().is_empty());
        assert!(journal.list_activity("fresh", None).await.unwrap().is_empty());
    }
}
