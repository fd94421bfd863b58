//! On-disk layout of a project workspace.

use squad_core::{Result, SquadError, WORKSPACE_DIR};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Paths rooted at a project directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

/// Private files of one agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentPaths {
    pub root: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
    pub inbox: PathBuf,
    pub outbox: PathBuf,
    pub agent_json: PathBuf,
    pub pid: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Project directory the workspace hangs off.
    pub fn project_root(&self) -> &Path {
        &self.root
    }

    /// `<root>/.agentsquad`
    pub fn workspace_dir(&self) -> PathBuf {
        self.root.join(WORKSPACE_DIR)
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.workspace_dir().join("sessions")
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.sessions_dir().join(session_id)
    }

    pub fn agents_dir(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("agents")
    }

    /// Session-wide domain event journal.
    pub fn events_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("events.jsonl")
    }

    pub fn lock_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join(".lock")
    }

    pub fn agent_paths(&self, session_id: &str, agent_id: &str) -> AgentPaths {
        let root = self.agents_dir(session_id).join(agent_id);
        AgentPaths {
            stdout: root.join("stdout.log"),
            stderr: root.join("stderr.log"),
            inbox: root.join("inbox.jsonl"),
            outbox: root.join("outbox.jsonl"),
            agent_json: root.join("agent.json"),
            pid: root.join("pid.json"),
            root,
        }
    }

    /// Create the session and agents directories.
    pub async fn ensure_session(&self, session_id: &str) -> Result<PathBuf> {
        validate_segment("session id", session_id)?;
        fs::create_dir_all(self.agents_dir(session_id)).await?;
        Ok(self.session_dir(session_id))
    }

    /// Create an agent's private directory.
    pub async fn ensure_agent(&self, session_id: &str, agent_id: &str) -> Result<AgentPaths> {
        validate_segment("session id", session_id)?;
        validate_segment("agent id", agent_id)?;
        let paths = self.agent_paths(session_id, agent_id);
        fs::create_dir_all(&paths.root).await?;
        Ok(paths)
    }
}

impl AgentPaths {
    /// File holding a message payload for the `file` transport.
    pub fn payload_path(&self, message_id: &str) -> PathBuf {
        self.root.join(format!("{}.txt", message_id))
    }
}

/// Ids become directory names; keep them to a single path component.
fn validate_segment(what: &str, value: &str) -> Result<()> {
    let invalid = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\'])
        || value.contains('\0');
    if invalid {
        return Err(SquadError::InvalidArgument(format!(
            "{} \"{}\" is not a valid path component",
            what, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_agent_paths() {
        let ws = Workspace::new("/proj");
        let paths = ws.agent_paths("default", "agent-max-dev");
        assert_eq!(
            paths.root,
            PathBuf::from("/proj/.agentsquad/sessions/default/agents/agent-max-dev")
        );
        assert!(paths.pid.ends_with("agent-max-dev/pid.json"));
        assert!(paths.payload_path("msg-1").ends_with("agent-max-dev/msg-1.txt"));
        assert_eq!(
            ws.events_path("default"),
            PathBuf::from("/proj/.agentsquad/sessions/default/events.jsonl")
        );
    }

    #[tokio::test]
    async fn test_ensure_session_creates_dirs() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::new(temp.path());
        ws.ensure_session("default").await.unwrap();
        assert!(ws.agents_dir("default").is_dir());
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::new(temp.path());
        let err = ws.ensure_session("../escape").await.unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
        assert!(ws.ensure_agent("default", "..").await.is_err());
    }
}
