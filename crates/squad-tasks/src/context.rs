//! What an agent sees when it asks for its task.

use crate::engine::TaskEngine;
use crate::graph;
use crate::model::{AgentSummary, AvailableAgent, CurrentTask, TaskContext};
use crate::wait::WaitOptions;
use squad_core::{CallerContext, Result, SquadError};
use tracing::debug;

impl TaskEngine {
    /// The agent's highest-ranked task, with the rest of the squad for context.
    pub async fn current_task(&self, session_id: &str, agent_id: &str) -> Result<Option<CurrentTask>> {
        let current = self.load(session_id).await?;
        let Some(task) = graph::pick_current_task(&current.tasks, agent_id) else {
            return Ok(None);
        };

        let mut available_agents: Vec<AvailableAgent> = self
            .load_agents(session_id)
            .await?
            .into_iter()
            .filter(|agent| agent.id != agent_id)
            .map(|agent| {
                let bound = agent
                    .current_task_id
                    .as_deref()
                    .and_then(|id| current.find(id));
                AvailableAgent {
                    task_title: bound.map(|t| t.title.clone()),
                    task_status: bound.map(|t| t.status),
                    id: agent.id,
                    name: agent.name,
                    role: agent.role,
                    status: agent.status,
                }
            })
            .collect();
        available_agents.sort_by_key(|agent| format!("{}:{}", agent.role, agent.id));

        Ok(Some(CurrentTask {
            view: current.view(task),
            available_agents,
        }))
    }

    /// Resolve the calling agent and its current task.
    ///
    /// With wait mode on (by default when the identity came from the agent
    /// environment) the call blocks until the task's blocking dependencies
    /// clear.
    pub async fn task_context(
        &self,
        ctx: &CallerContext,
        wait: Option<bool>,
        options: &WaitOptions,
    ) -> Result<TaskContext> {
        let agent_id = ctx.require_agent()?;
        let agents = self.load_agents(&ctx.session_id).await?;
        let agent = agents
            .iter()
            .find(|a| a.id == agent_id && a.session_id == ctx.session_id)
            .ok_or_else(|| SquadError::AgentNotFound(agent_id.to_string()))?;

        let mut task = self.current_task(&ctx.session_id, agent_id).await?;
        if let Some(current) = task.as_mut() {
            if ctx.resolve_wait(wait) {
                debug!("Waiting for {} to become available", current.view.id);
                let task_id = current.view.id.clone();
                current.view = self
                    .wait_for_availability(&ctx.session_id, &task_id, Some(agent_id), options)
                    .await?;
            }
        }

        Ok(TaskContext {
            agent: AgentSummary::from(agent),
            task,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewTask;
    use chrono::Utc;
    use squad_core::{Agent, AgentKind, AgentStatus, ProviderMode};
    use squad_store::{Journal, RecordStore, SnapshotCollection, Workspace};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn agent(id: &str, role: &str) -> Agent {
        let now = Utc::now();
        Agent {
            id: id.to_string(),
            name: id.to_string(),
            role: role.to_string(),
            kind: AgentKind::Worker,
            provider_id: "generic".to_string(),
            profile: None,
            session_id: "default".to_string(),
            workdir: "/tmp".into(),
            goal: "help".to_string(),
            status: AgentStatus::Idle,
            mode: ProviderMode::Oneshot,
            current_task_id: None,
            parent_agent_id: None,
            created_by_agent_id: None,
            env: BTreeMap::new(),
            system_prompt: None,
            launch_command: None,
            pid: None,
            last_heartbeat_at: None,
            archived_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn setup(temp: &TempDir) -> TaskEngine {
        let store = RecordStore::new(Workspace::new(temp.path()));
        for (id, role) in [("agent-max-dev", "dev"), ("agent-leo-tester", "tester"), ("agent-ines-arch", "arch")] {
            store
                .append_snapshot("default", SnapshotCollection::Agents, &agent(id, role))
                .await
                .unwrap();
        }
        TaskEngine::new(Journal::new(store))
    }

    #[tokio::test]
    async fn test_context_requires_identity() {
        let temp = TempDir::new().unwrap();
        let engine = setup(&temp).await;
        let err = engine
            .task_context(&CallerContext::operator("default"), None, &WaitOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "AGENT_ID_REQUIRED");

        let err = engine
            .task_context(&CallerContext::agent("agent-ghost", "default"), None, &WaitOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "AGENT_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_context_lists_other_agents() {
        let temp = TempDir::new().unwrap();
        let engine = setup(&temp).await;
        engine
            .create_task(NewTask {
                title: Some("build api".into()),
                ..NewTask::new("default", "agent-max-dev")
            })
            .await
            .unwrap();
        engine
            .create_task(NewTask {
                title: Some("write tests".into()),
                ..NewTask::new("default", "agent-leo-tester")
            })
            .await
            .unwrap();

        let context = engine
            .task_context(&CallerContext::agent("agent-max-dev", "default"), None, &WaitOptions::default())
            .await
            .unwrap();
        assert_eq!(context.agent.id, "agent-max-dev");
        assert_eq!(context.agent.current_task_id.as_deref(), context.task.as_ref().map(|t| t.id.as_str()));

        let task = context.task.unwrap();
        assert_eq!(task.title, "build api");
        let others: Vec<&str> = task.available_agents.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(others, vec!["agent-ines-arch", "agent-leo-tester"]);
        assert_eq!(task.available_agents[1].task_title.as_deref(), Some("write tests"));
        assert!(task.available_agents[0].task_title.is_none());
    }

    #[tokio::test]
    async fn test_agent_without_tasks_has_no_current_task() {
        let temp = TempDir::new().unwrap();
        let engine = setup(&temp).await;
        let context = engine
            .task_context(&CallerContext::agent("agent-ines-arch", "default"), Some(true), &WaitOptions::default())
            .await
            .unwrap();
        assert!(context.task.is_none());
    }
}
