//! Objective kickoff: start a manager agent and brief it.

use crate::agents::SpawnAgent;
use crate::coordinator::Coordinator;
use crate::messages::{SendMessage, SendReport};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use squad_core::{
    Agent, AgentKind, CallerContext, MessageKind, Result, Session, SessionStatus, SquadError,
};
use squad_store::SnapshotCollection;
use std::path::PathBuf;
use tracing::{info, instrument};

const MANAGER_NAME: &str = "manager";
const MANAGER_TASK: &str = "Create a plan, define roles, and coordinate the project.";
const TITLE_LIMIT: usize = 80;

#[derive(Debug, Clone, Default)]
pub struct Objective {
    pub goal: String,
    /// Defaults to the configured orchestrator provider
    pub provider: Option<String>,
    pub profile: Option<String>,
    pub title: Option<String>,
    pub workdir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectiveReport {
    pub session: Session,
    pub manager: Agent,
    pub kickoff: SendReport,
    pub summary: String,
}

/// Briefing sent to the manager agent.
pub fn build_manager_prompt(goal: &str, provider_ids: &[&str]) -> String {
    let choices = provider_ids
        .iter()
        .map(|id| format!("`{}`", id))
        .collect::<Vec<_>>()
        .join(", ");
    let usage = provider_ids.join("|");

    [
        "You are the project manager and planner for this objective.".to_string(),
        "You must create a high-level plan, identify the roles needed, and coordinate the project using the agentsquad CLI.".to_string(),
        format!(
            "You can create worker agents with `agentsquad agent run --provider <{}> --role <role> --goal <goal> --task <task>`.",
            usage
        ),
        "Each worker can recover its current assignment with `agentsquad task get`.".to_string(),
        "You can communicate between agents with `agentsquad message send --to <agent-id> --text <message>`.".to_string(),
        "You should break the objective into concrete tasks, assign roles, and drive the project to completion.".to_string(),
        "When you create a worker, give it a focused role and a crisp task.".to_string(),
        format!(
            "If you need a specific model family, you can choose between {}.",
            choices
        ),
        String::new(),
        format!("User objective: {}", goal),
    ]
    .join("\n")
}

impl Coordinator {
    /// Put the session in planning, spawn its manager and send the briefing.
    #[instrument(skip(self, ctx, objective), fields(session = %ctx.session_id))]
    pub async fn execute_objective(&self, ctx: &CallerContext, objective: Objective) -> Result<ObjectiveReport> {
        let goal = objective.goal.trim().to_string();
        if goal.is_empty() {
            return Err(SquadError::InvalidArgument("objective goal must not be empty".to_string()));
        }
        let session_id = ctx.session_id.as_str();
        let provider_id = objective
            .provider
            .clone()
            .unwrap_or_else(|| self.config().orchestrator.provider.clone());
        self.providers().get(&provider_id)?;

        let now = Utc::now();
        let title = objective
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| goal.chars().take(TITLE_LIMIT).collect());
        let existing = self.store().read_session(session_id).await?;
        let planning = Session {
            id: session_id.to_string(),
            title,
            goal: goal.clone(),
            status: SessionStatus::Planning,
            manager_agent_id: existing.as_ref().and_then(|s| s.manager_agent_id.clone()),
            provider_id: Some(provider_id.clone()),
            root_workdir: Some(self.workspace().project_root().to_path_buf()),
            created_at: existing.as_ref().map(|s| s.created_at).unwrap_or(now),
            updated_at: now,
            completed_at: None,
        };
        self.store()
            .append_snapshot(session_id, SnapshotCollection::Session, &planning)
            .await?;

        let provider_ids: Vec<&str> = self.providers().ids().collect();
        let prompt = build_manager_prompt(&goal, &provider_ids);
        let manager = self
            .spawn_agent(
                ctx,
                SpawnAgent {
                    provider: provider_id.clone(),
                    profile: objective.profile.clone(),
                    name: Some(MANAGER_NAME.to_string()),
                    role: Some(self.config().orchestrator.manager_role.clone()),
                    kind: AgentKind::Manager,
                    goal: Some(goal.clone()),
                    workdir: objective.workdir.clone(),
                    system_prompt: Some(prompt.clone()),
                    task: Some(MANAGER_TASK.to_string()),
                    session_goal: Some(goal.clone()),
                    ..Default::default()
                },
            )
            .await?;

        let session = Session {
            status: SessionStatus::Active,
            manager_agent_id: Some(manager.id.clone()),
            updated_at: Utc::now(),
            ..planning
        };
        self.store()
            .append_snapshot(session_id, SnapshotCollection::Session, &session)
            .await?;
        self.journal()
            .append_event(
                session_id,
                "session.objective_started",
                json!({ "goal": goal, "provider": provider_id }),
                Some(&manager.id),
            )
            .await?;

        let kickoff = self
            .send_message(
                &CallerContext::operator(session_id),
                SendMessage {
                    to: manager.id.clone(),
                    text: Some(prompt),
                    kind: MessageKind::Instruction,
                    ..Default::default()
                },
            )
            .await?;

        let summary = format!("Started {} with {} for objective: {}", manager.id, provider_id, goal);
        info!("{}", summary);
        Ok(ObjectiveReport {
            session,
            manager,
            kickoff,
            summary,
        })
    }
}
