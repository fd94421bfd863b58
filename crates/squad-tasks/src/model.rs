//! Views and inputs of the task engine.

use serde::Serialize;
use squad_core::{
    Agent, AgentStatus, DependencyType, Priority, Task, TaskDependency, TaskStatus, TaskType,
};
use std::ops::Deref;
use std::path::PathBuf;

/// A dependency edge joined with the upstream task it points at.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyView {
    #[serde(flatten)]
    pub dependency: TaskDependency,
    pub depends_on_task_title: Option<String>,
    pub depends_on_task_status: Option<TaskStatus>,
    pub depends_on_task_type: Option<TaskType>,
    pub depends_on_agent_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    WaitingForDependencies,
    Ready,
}

/// A task with its dependencies resolved against the current log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub dependencies: Vec<DependencyView>,
    /// Blocking edges that are not yet satisfied for this task
    pub blocking_tasks: Vec<DependencyView>,
    pub wait_state: WaitState,
}

impl Deref for TaskView {
    type Target = Task;

    fn deref(&self) -> &Task {
        &self.task
    }
}

impl TaskView {
    pub fn is_blocked_by_dependencies(&self) -> bool {
        !self.blocking_tasks.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizationOutcome {
    Finalized,
    ChangesRequested,
    Waiting,
    NoAction,
    Missing,
}

impl FinalizationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalizationOutcome::Finalized => "finalized",
            FinalizationOutcome::ChangesRequested => "changes_requested",
            FinalizationOutcome::Waiting => "waiting",
            FinalizationOutcome::NoAction => "no_action",
            FinalizationOutcome::Missing => "missing",
        }
    }
}

/// Validator feedback carried back to the implementer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub task_id: String,
    pub agent_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResult {
    pub outcome: FinalizationOutcome,
    pub task: Option<TaskView>,
    pub pending_dependent_task_ids: Vec<String>,
    pub feedback: Vec<Feedback>,
}

impl FinalizeResult {
    pub(crate) fn without_change(outcome: FinalizationOutcome, task: Option<TaskView>) -> Self {
        Self {
            outcome,
            task,
            pending_dependent_task_ids: Vec::new(),
            feedback: Vec::new(),
        }
    }
}

/// Requested edge from a new or existing task onto an upstream task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencySpec {
    pub depends_on_task_id: String,
    pub dependency_type: DependencyType,
}

impl DependencySpec {
    /// A `blocks` edge onto `task_id`.
    pub fn blocks(task_id: impl Into<String>) -> Self {
        Self {
            depends_on_task_id: task_id.into(),
            dependency_type: DependencyType::Blocks,
        }
    }
}

/// Input of [`crate::TaskEngine::create_task`]. Unset fields take defaults.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub id: Option<String>,
    pub session_id: String,
    pub agent_id: String,
    pub parent_task_id: Option<String>,
    pub title: Option<String>,
    pub goal: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub task_type: Option<TaskType>,
    pub scope_path: Option<String>,
    pub acceptance_criteria: Option<String>,
    pub created_by_agent_id: Option<String>,
    pub dependencies: Vec<DependencySpec>,
}

impl NewTask {
    pub fn new(session_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            agent_id: agent_id.into(),
            ..Default::default()
        }
    }
}

/// Operator- or manager-issued assignment.
#[derive(Debug, Clone, Default)]
pub struct AssignTask {
    pub agent_id: String,
    /// Task text; becomes the description and, without a title, the title
    pub task: Option<String>,
    pub title: Option<String>,
    pub goal: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub task_type: Option<TaskType>,
    pub acceptance_criteria: Option<String>,
    pub depends_on: Vec<DependencySpec>,
}

/// Input of [`crate::TaskEngine::update_status`].
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub task_id: String,
    pub status: TaskStatus,
    pub note: Option<String>,
    pub blocking_reason: Option<String>,
    pub result_summary: Option<String>,
}

impl StatusUpdate {
    pub fn new(task_id: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.into(),
            status,
            note: None,
            blocking_reason: None,
            result_summary: None,
        }
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Another agent of the session, as shown to an agent asking for its task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableAgent {
    pub id: String,
    pub name: String,
    pub role: String,
    pub status: AgentStatus,
    pub task_title: Option<String>,
    pub task_status: Option<TaskStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentTask {
    #[serde(flatten)]
    pub view: TaskView,
    pub available_agents: Vec<AvailableAgent>,
}

impl Deref for CurrentTask {
    type Target = TaskView;

    fn deref(&self) -> &TaskView {
        &self.view
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    pub id: String,
    pub session_id: String,
    pub name: String,
    pub role: String,
    pub goal: String,
    pub status: AgentStatus,
    pub current_task_id: Option<String>,
    pub workdir: PathBuf,
}

impl From<&Agent> for AgentSummary {
    fn from(agent: &Agent) -> Self {
        Self {
            id: agent.id.clone(),
            session_id: agent.session_id.clone(),
            name: agent.name.clone(),
            role: agent.role.clone(),
            goal: agent.goal.clone(),
            status: agent.status,
            current_task_id: agent.current_task_id.clone(),
            workdir: agent.workdir.clone(),
        }
    }
}

/// What an agent gets back from `task get`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskContext {
    pub agent: AgentSummary,
    pub task: Option<CurrentTask>,
}
