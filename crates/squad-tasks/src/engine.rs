//! The task state machine.
//!
//! Every call re-reads the session log, decides, and appends. Nothing is
//! cached between calls because other processes write the same files.

use crate::graph;
use crate::model::{
    AssignTask, DependencySpec, DependencyView, Feedback, FinalizationOutcome, FinalizeResult,
    NewTask, StatusUpdate, TaskView,
};
use crate::wait::{Deadline, WaitOptions};
use chrono::{DateTime, Utc};
use serde_json::json;
use squad_core::ids::{self, new_id};
use squad_core::{
    Agent, CallerContext, Result, SquadError, Task, TaskDependency, TaskStatus, TaskStatusHistory,
};
use squad_store::{ActivityEntry, Journal, RecordCollection, RecordStore, SnapshotCollection};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument};

const DEFAULT_TITLE: &str = "Assigned task";
const DEFAULT_GOAL: &str = "Support the project objective";
const DEFAULT_DESCRIPTION: &str = "No task description provided.";
const DEFAULT_FEEDBACK: &str = "Changes requested by downstream validation.";
const DEFAULT_VALIDATOR_MESSAGE: &str = "Changes requested.";

/// Field changes applied together with a status transition.
#[derive(Debug, Default)]
struct Transition<'a> {
    changed_by: Option<&'a str>,
    note: Option<String>,
    /// `Some` replaces the stored value, `None` keeps it
    blocking_reason: Option<Option<String>>,
    result_summary: Option<Option<String>>,
}

/// Tasks and edges of one session, read together.
pub(crate) struct SessionTasks {
    pub(crate) tasks: Vec<Task>,
    pub(crate) edges: Vec<TaskDependency>,
}

impl SessionTasks {
    pub(crate) fn find(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub(crate) fn view(&self, task: &Task) -> TaskView {
        let index: HashMap<&str, &Task> = self.tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let dependencies = graph::dependency_views(&task.id, &self.edges, &index);
        let blocking_tasks = graph::blocking_dependencies(task.task_type, &dependencies);
        TaskView {
            task: task.clone(),
            wait_state: graph::wait_state(&blocking_tasks),
            dependencies,
            blocking_tasks,
        }
    }

    /// Tasks holding a blocking edge onto `task_id`, oldest first.
    fn dependents(&self, task_id: &str, validators_only: bool) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|task| {
                self.edges.iter().any(|edge| {
                    edge.depends_on_task_id == task_id
                        && edge.task_id == task.id
                        && edge.dependency_type.affects_scheduling()
                })
            })
            .filter(|task| !validators_only || task.task_type.is_validator())
            .collect()
    }
}

/// Task operations over one workspace.
#[derive(Debug, Clone)]
pub struct TaskEngine {
    journal: Journal,
}

impl TaskEngine {
    pub fn new(journal: Journal) -> Self {
        Self { journal }
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    fn store(&self) -> &RecordStore {
        self.journal.store()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub(crate) async fn load_tasks(&self, session_id: &str) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .store()
            .read_snapshots(session_id, SnapshotCollection::Tasks)
            .await?;
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    pub(crate) async fn load_agents(&self, session_id: &str) -> Result<Vec<Agent>> {
        let mut agents: Vec<Agent> = self
            .store()
            .read_snapshots(session_id, SnapshotCollection::Agents)
            .await?;
        agents.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(agents)
    }

    async fn load_dependencies(&self, session_id: &str) -> Result<Vec<TaskDependency>> {
        let mut edges: Vec<TaskDependency> = self
            .store()
            .read_records(session_id, RecordCollection::TaskDependencies)
            .await?;
        edges.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(edges)
    }

    pub(crate) async fn load(&self, session_id: &str) -> Result<SessionTasks> {
        Ok(SessionTasks {
            tasks: self.load_tasks(session_id).await?,
            edges: self.load_dependencies(session_id).await?,
        })
    }

    /// A task with its dependencies, or `None` if the session has no such task.
    pub async fn get_task(&self, session_id: &str, task_id: &str) -> Result<Option<TaskView>> {
        let current = self.load(session_id).await?;
        Ok(current.find(task_id).map(|task| current.view(task)))
    }

    /// [`TaskEngine::get_task`], failing with `TASK_NOT_FOUND`.
    pub async fn require_task(&self, session_id: &str, task_id: &str) -> Result<TaskView> {
        self.get_task(session_id, task_id)
            .await?
            .ok_or_else(|| SquadError::TaskNotFound(task_id.to_string()))
    }

    /// Tasks of a session in creation order, optionally for one agent.
    pub async fn list_tasks(&self, session_id: &str, agent_id: Option<&str>) -> Result<Vec<TaskView>> {
        let current = self.load(session_id).await?;
        Ok(current
            .tasks
            .iter()
            .filter(|task| agent_id.map_or(true, |agent| task.agent_id == agent))
            .map(|task| current.view(task))
            .collect())
    }

    pub async fn list_dependencies(&self, session_id: &str, task_id: &str) -> Result<Vec<DependencyView>> {
        Ok(self
            .get_task(session_id, task_id)
            .await?
            .map(|view| view.dependencies)
            .unwrap_or_default())
    }

    /// Unsatisfied blocking edges of a task; empty for a missing task.
    pub async fn list_blocking_dependencies(
        &self,
        session_id: &str,
        task_id: &str,
    ) -> Result<Vec<DependencyView>> {
        Ok(self
            .get_task(session_id, task_id)
            .await?
            .map(|view| view.blocking_tasks)
            .unwrap_or_default())
    }

    /// Tasks that block on `task_id`, optionally only validators.
    pub async fn list_dependent_tasks(
        &self,
        session_id: &str,
        task_id: &str,
        validators_only: bool,
    ) -> Result<Vec<TaskView>> {
        let current = self.load(session_id).await?;
        Ok(current
            .dependents(task_id, validators_only)
            .into_iter()
            .map(|task| current.view(task))
            .collect())
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Create a task, wire its dependencies, bind it to its agent and promote it.
    ///
    /// Dependencies are checked before anything is written: an unknown
    /// upstream fails with `TASK_NOT_FOUND`, a blocking edge that would close
    /// a cycle with `DEPENDENCY_CYCLE`.
    #[instrument(skip(self, input), fields(agent = %input.agent_id))]
    pub async fn create_task(&self, input: NewTask) -> Result<TaskView> {
        let session_id = input.session_id.clone();
        let task_id = input.id.clone().unwrap_or_else(|| new_id(ids::TASK));
        let specs = dedupe_specs(input.dependencies.clone());

        if !specs.is_empty() {
            let current = self.load(&session_id).await?;
            validate_dependencies(&current, &task_id, &specs)?;
        }

        let now = Utc::now();
        let title = non_empty(input.title.clone()).unwrap_or_else(|| DEFAULT_TITLE.to_string());
        let task = Task {
            id: task_id.clone(),
            session_id: session_id.clone(),
            agent_id: input.agent_id.clone(),
            parent_task_id: input.parent_task_id,
            title: title.clone(),
            goal: non_empty(input.goal).unwrap_or_else(|| DEFAULT_GOAL.to_string()),
            description: non_empty(input.description)
                .or_else(|| non_empty(input.title))
                .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
            status: input.status.unwrap_or(TaskStatus::Todo),
            priority: input.priority.unwrap_or_default(),
            task_type: input.task_type.unwrap_or_default(),
            scope_path: input.scope_path,
            acceptance_criteria: input.acceptance_criteria,
            blocking_reason: None,
            result_summary: None,
            created_by_agent_id: input.created_by_agent_id.clone(),
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };

        self.store()
            .append_snapshot(&session_id, SnapshotCollection::Tasks, &task)
            .await?;
        self.store()
            .append_record(
                &session_id,
                RecordCollection::TaskStatusHistory,
                &TaskStatusHistory {
                    id: new_id(ids::TASK_STATUS),
                    session_id: session_id.clone(),
                    task_id: task_id.clone(),
                    from_status: None,
                    to_status: task.status,
                    changed_by_agent_id: task.created_by_agent_id.clone(),
                    note: Some("Task created".to_string()),
                    created_at: now,
                },
            )
            .await?;

        let created_by = input.created_by_agent_id.as_deref();
        if !specs.is_empty() {
            self.write_dependencies(&session_id, &task_id, &specs, created_by)
                .await?;
        }

        self.bind_current_task(&session_id, &task.agent_id, &task_id, now)
            .await?;

        self.journal
            .append_event(
                &session_id,
                "task.assigned",
                json!({ "taskId": task_id, "status": task.status }),
                Some(&task.agent_id),
            )
            .await?;
        self.journal
            .log(
                ActivityEntry::new(
                    &session_id,
                    "task.assignment",
                    format!("{} assigned: {}", task.agent_id, title),
                )
                .agent(Some(&task.agent_id))
                .details(json!({
                    "status": task.status,
                    "priority": task.priority,
                    "dependencies": specs.iter().map(|s| &s.depends_on_task_id).collect::<Vec<_>>(),
                })),
            )
            .await?;
        info!("Created task {} for {}", task_id, task.agent_id);

        self.promote(&session_id, &task_id, created_by, None).await?;
        self.require_task(&session_id, &task_id).await
    }

    /// Operator or manager assignment on behalf of `ctx`.
    pub async fn assign_task(&self, ctx: &CallerContext, input: AssignTask) -> Result<TaskView> {
        let agents = self.load_agents(&ctx.session_id).await?;
        if !agents.iter().any(|a| a.id == input.agent_id) {
            return Err(SquadError::AgentNotFound(input.agent_id));
        }

        self.create_task(NewTask {
            session_id: ctx.session_id.clone(),
            agent_id: input.agent_id,
            title: input.title.or_else(|| input.task.clone()),
            description: input.task,
            goal: input.goal,
            status: input.status,
            priority: input.priority,
            task_type: input.task_type,
            acceptance_criteria: input.acceptance_criteria,
            created_by_agent_id: ctx.agent_id.clone(),
            dependencies: input.depends_on,
            ..Default::default()
        })
        .await
    }

    /// Add edges to an existing task, then re-evaluate whether it may run.
    #[instrument(skip(self, specs))]
    pub async fn add_dependencies(
        &self,
        session_id: &str,
        task_id: &str,
        specs: Vec<DependencySpec>,
        changed_by: Option<&str>,
    ) -> Result<Vec<DependencyView>> {
        let specs = dedupe_specs(specs);
        let current = self.load(session_id).await?;
        if current.find(task_id).is_none() {
            return Err(SquadError::TaskNotFound(task_id.to_string()));
        }
        if specs.is_empty() {
            return self.list_dependencies(session_id, task_id).await;
        }

        validate_dependencies(&current, task_id, &specs)?;
        self.write_dependencies(session_id, task_id, &specs, changed_by)
            .await?;
        self.promote(session_id, task_id, changed_by, None).await?;
        self.list_dependencies(session_id, task_id).await
    }

    async fn write_dependencies(
        &self,
        session_id: &str,
        task_id: &str,
        specs: &[DependencySpec],
        changed_by: Option<&str>,
    ) -> Result<()> {
        let existing = self.load_dependencies(session_id).await?;
        let now = Utc::now();

        for spec in specs {
            let duplicate = existing.iter().any(|edge| {
                edge.task_id == task_id
                    && edge.depends_on_task_id == spec.depends_on_task_id
                    && edge.dependency_type == spec.dependency_type
            });
            if duplicate {
                debug!("Skipping existing dependency {} -> {}", task_id, spec.depends_on_task_id);
                continue;
            }

            self.store()
                .append_record(
                    session_id,
                    RecordCollection::TaskDependencies,
                    &TaskDependency {
                        id: new_id(ids::TASK_DEPENDENCY),
                        session_id: session_id.to_string(),
                        task_id: task_id.to_string(),
                        depends_on_task_id: spec.depends_on_task_id.clone(),
                        dependency_type: spec.dependency_type,
                        created_at: now,
                    },
                )
                .await?;
        }

        let listed: Vec<_> = specs
            .iter()
            .map(|spec| {
                json!({
                    "dependsOnTaskId": spec.depends_on_task_id,
                    "dependencyType": spec.dependency_type,
                })
            })
            .collect();

        self.journal
            .append_event(
                session_id,
                "task.dependencies_created",
                json!({ "taskId": task_id, "dependencies": listed }),
                changed_by,
            )
            .await?;
        self.journal
            .log(
                ActivityEntry::new(
                    session_id,
                    "task.dependencies",
                    format!("{} dependencies updated", task_id),
                )
                .agent(changed_by)
                .details(json!({ "taskId": task_id, "dependencies": listed })),
            )
            .await?;
        Ok(())
    }

    async fn bind_current_task(
        &self,
        session_id: &str,
        agent_id: &str,
        task_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let agents = self.load_agents(session_id).await?;
        let Some(agent) = agents.into_iter().find(|a| a.id == agent_id) else {
            debug!("No agent {} to bind task {} to", agent_id, task_id);
            return Ok(());
        };

        let bound = Agent {
            current_task_id: Some(task_id.to_string()),
            updated_at: at,
            ..agent
        };
        self.store()
            .append_snapshot(session_id, SnapshotCollection::Agents, &bound)
            .await
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    async fn record_status_change(
        &self,
        task: &Task,
        next: TaskStatus,
        transition: Transition<'_>,
    ) -> Result<TaskView> {
        let now = Utc::now();
        let mut updated = task.clone();
        updated.status = next;
        if next == TaskStatus::InProgress && updated.started_at.is_none() {
            updated.started_at = Some(now);
        }
        updated.completed_at = match next {
            TaskStatus::Done => Some(now),
            status if status.is_terminal() => task.completed_at.or(Some(now)),
            _ => None,
        };
        if let Some(reason) = transition.blocking_reason {
            updated.blocking_reason = reason;
        }
        if let Some(summary) = transition.result_summary {
            updated.result_summary = summary;
        }
        updated.updated_at = now;

        let session_id = task.session_id.as_str();
        self.store()
            .append_snapshot(session_id, SnapshotCollection::Tasks, &updated)
            .await?;
        self.store()
            .append_record(
                session_id,
                RecordCollection::TaskStatusHistory,
                &TaskStatusHistory {
                    id: new_id(ids::TASK_STATUS),
                    session_id: session_id.to_string(),
                    task_id: task.id.clone(),
                    from_status: Some(task.status),
                    to_status: next,
                    changed_by_agent_id: transition.changed_by.map(str::to_string),
                    note: transition.note.clone(),
                    created_at: now,
                },
            )
            .await?;

        self.journal
            .append_event(
                session_id,
                "task.status_changed",
                json!({ "taskId": task.id, "from": task.status, "to": next }),
                Some(&task.agent_id),
            )
            .await?;
        self.journal
            .log(
                ActivityEntry::new(
                    session_id,
                    "task.status",
                    format!("{} status: {} -> {}", task.agent_id, task.status, next),
                )
                .agent(Some(&task.agent_id))
                .details(json!({ "taskId": task.id, "note": transition.note })),
            )
            .await?;
        info!("Task {}: {} -> {}", task.id, task.status, next);

        self.require_task(session_id, &task.id).await
    }

    /// Move a task between `todo`, `waiting` and `ready` according to its
    /// blocking dependencies.
    ///
    /// Terminal, `in_progress` and `in_review` tasks are left alone. Returns
    /// `None` for a missing task. Calling it again without an intervening
    /// change writes nothing.
    #[instrument(skip(self))]
    pub async fn promote(
        &self,
        session_id: &str,
        task_id: &str,
        changed_by: Option<&str>,
        note: Option<&str>,
    ) -> Result<Option<TaskView>> {
        let Some(view) = self.get_task(session_id, task_id).await? else {
            return Ok(None);
        };
        if view.status.is_terminal()
            || matches!(view.status, TaskStatus::InReview | TaskStatus::InProgress)
        {
            return Ok(Some(view));
        }

        if view.is_blocked_by_dependencies() {
            if view.status == TaskStatus::Waiting {
                return Ok(Some(view));
            }
            let waiting = self
                .record_status_change(
                    &view.task,
                    TaskStatus::Waiting,
                    Transition {
                        changed_by,
                        note: Some(note.unwrap_or("Waiting for dependencies").to_string()),
                        ..Default::default()
                    },
                )
                .await?;
            return Ok(Some(waiting));
        }

        if matches!(view.status, TaskStatus::Todo | TaskStatus::Waiting) {
            let ready = self
                .record_status_change(
                    &view.task,
                    TaskStatus::Ready,
                    Transition {
                        changed_by,
                        note: Some(note.unwrap_or("Dependencies satisfied").to_string()),
                        blocking_reason: Some(None),
                        ..Default::default()
                    },
                )
                .await?;
            self.journal
                .append_event(
                    session_id,
                    "task.unblocked",
                    json!({ "taskId": task_id }),
                    Some(&ready.agent_id),
                )
                .await?;
            return Ok(Some(ready));
        }

        Ok(Some(view))
    }

    /// Re-run [`TaskEngine::promote`] on every task blocking on `task_id`.
    pub async fn refresh_dependents(
        &self,
        session_id: &str,
        task_id: &str,
        changed_by: Option<&str>,
        note: Option<&str>,
    ) -> Result<Vec<TaskView>> {
        let dependents = self.list_dependent_tasks(session_id, task_id, false).await?;
        let mut refreshed = Vec::with_capacity(dependents.len());
        for dependent in dependents {
            if let Some(view) = self.promote(session_id, &dependent.id, changed_by, note).await? {
                refreshed.push(view);
            }
        }
        Ok(refreshed)
    }

    /// Push the upstream work of a rejecting validator back to `in_progress`.
    ///
    /// Only upstream tasks in `in_review` or `done` move. Their blocking
    /// reason becomes the feedback text, and their other dependents are
    /// re-promoted. The feedback task keeps its own status.
    pub async fn reopen_upstream(
        &self,
        feedback_task: &Task,
        changed_by: Option<&str>,
        note: Option<&str>,
        result_summary: Option<&str>,
    ) -> Result<Vec<TaskView>> {
        let feedback = note
            .or(result_summary)
            .or(feedback_task.result_summary.as_deref())
            .or(feedback_task.blocking_reason.as_deref())
            .filter(|text| !text.trim().is_empty())
            .unwrap_or(DEFAULT_FEEDBACK)
            .to_string();

        let session_id = feedback_task.session_id.as_str();
        let dependencies = self.list_dependencies(session_id, &feedback_task.id).await?;
        let mut reopened = Vec::new();

        for dependency in dependencies
            .iter()
            .filter(|d| d.dependency.dependency_type.affects_scheduling())
        {
            let Some(upstream) = self
                .get_task(session_id, &dependency.dependency.depends_on_task_id)
                .await?
            else {
                continue;
            };
            if !matches!(upstream.status, TaskStatus::InReview | TaskStatus::Done) {
                continue;
            }

            let view = self
                .record_status_change(
                    &upstream.task,
                    TaskStatus::InProgress,
                    Transition {
                        changed_by,
                        note: Some(format!("Reopened after feedback from {}", feedback_task.id)),
                        blocking_reason: Some(Some(feedback.clone())),
                        result_summary: Some(None),
                    },
                )
                .await?;
            self.journal
                .append_event(
                    session_id,
                    "task.changes_requested",
                    json!({
                        "taskId": upstream.id,
                        "feedbackTaskId": feedback_task.id,
                        "feedback": feedback,
                    }),
                    Some(&feedback_task.agent_id),
                )
                .await?;

            // Siblings that started against the reviewed work go back to waiting
            for dependent in self.list_dependent_tasks(session_id, &upstream.id, false).await? {
                if dependent.id == feedback_task.id {
                    continue;
                }
                self.promote(session_id, &dependent.id, changed_by, None).await?;
            }
            reopened.push(view);
        }
        Ok(reopened)
    }

    /// Decide an `in_review` task from the state of its validators.
    ///
    /// Any validator `blocked` or `failed` reopens it (`changes_requested`).
    /// The reopen goes through the first rejecting validator, so every
    /// upstream task that validator blocks on is reopened, not only this one.
    /// Any validator not yet `done` leaves it (`waiting`). Otherwise,
    /// including when it has no validators, it becomes `done`.
    #[instrument(skip(self))]
    pub async fn finalize(
        &self,
        session_id: &str,
        task_id: &str,
        changed_by: Option<&str>,
        note: Option<&str>,
        result_summary: Option<&str>,
    ) -> Result<FinalizeResult> {
        let Some(view) = self.get_task(session_id, task_id).await? else {
            return Ok(FinalizeResult::without_change(FinalizationOutcome::Missing, None));
        };
        if view.status != TaskStatus::InReview {
            return Ok(FinalizeResult::without_change(
                FinalizationOutcome::NoAction,
                Some(view),
            ));
        }

        let validators = self.list_dependent_tasks(session_id, task_id, true).await?;
        let pending: Vec<String> = validators
            .iter()
            .filter(|v| v.status != TaskStatus::Done)
            .map(|v| v.id.clone())
            .collect();
        let rejecting: Vec<&TaskView> = validators
            .iter()
            .filter(|v| matches!(v.status, TaskStatus::Blocked | TaskStatus::Failed))
            .collect();

        if let Some(first) = rejecting.first() {
            let feedback: Vec<Feedback> = rejecting
                .iter()
                .map(|v| Feedback {
                    task_id: v.id.clone(),
                    agent_id: v.agent_id.clone(),
                    message: v
                        .blocking_reason
                        .clone()
                        .or_else(|| v.result_summary.clone())
                        .unwrap_or_else(|| DEFAULT_VALIDATOR_MESSAGE.to_string()),
                })
                .collect();
            let joined = feedback
                .iter()
                .map(|f| f.message.as_str())
                .collect::<Vec<_>>()
                .join("\n");

            let reopened = self
                .reopen_upstream(&first.task, changed_by, Some(&joined), None)
                .await?;
            let task = match reopened.into_iter().find(|t| t.id == task_id) {
                Some(task) => Some(task),
                None => self.get_task(session_id, task_id).await?,
            };
            info!("Task {} has changes requested by {}", task_id, first.id);

            return Ok(FinalizeResult {
                outcome: FinalizationOutcome::ChangesRequested,
                task,
                pending_dependent_task_ids: pending,
                feedback,
            });
        }

        if !pending.is_empty() {
            self.journal
                .append_event(
                    session_id,
                    "task.finalization_waiting",
                    json!({ "taskId": task_id, "pendingDependentTaskIds": pending }),
                    Some(&view.agent_id),
                )
                .await?;
            return Ok(FinalizeResult {
                outcome: FinalizationOutcome::Waiting,
                task: Some(view),
                pending_dependent_task_ids: pending,
                feedback: Vec::new(),
            });
        }

        let done = self
            .record_status_change(
                &view.task,
                TaskStatus::Done,
                Transition {
                    changed_by,
                    note: Some(note.unwrap_or("All downstream validations completed").to_string()),
                    blocking_reason: Some(None),
                    result_summary: result_summary.map(|s| Some(s.to_string())),
                },
            )
            .await?;
        self.journal
            .append_event(
                session_id,
                "task.finalized",
                json!({ "taskId": task_id }),
                Some(&done.agent_id),
            )
            .await?;
        self.refresh_dependents(session_id, task_id, changed_by, note)
            .await?;

        Ok(FinalizeResult::without_change(
            FinalizationOutcome::Finalized,
            Some(done),
        ))
    }

    /// Apply an explicit status change and cascade its consequences.
    ///
    /// Dependents are re-promoted. A validator moving to `blocked` or
    /// `failed` reopens its upstream work; a validator reaching `done` tries
    /// to finalize it. Leaving a terminal status fails with
    /// `INVALID_TRANSITION`; re-applying it changes nothing.
    #[instrument(skip(self, ctx), fields(session = %ctx.session_id))]
    pub async fn update_status(&self, ctx: &CallerContext, update: StatusUpdate) -> Result<TaskView> {
        let session_id = ctx.session_id.as_str();
        let changed_by = ctx.agent_id.as_deref();
        let view = self.require_task(session_id, &update.task_id).await?;

        if view.status.is_terminal() {
            if view.status == update.status {
                debug!("Task {} already {}", view.id, view.status);
                return Ok(view);
            }
            return Err(SquadError::InvalidTransition {
                task_id: view.id.clone(),
                from: view.status.to_string(),
                to: update.status.to_string(),
            });
        }

        let blocking_reason = match (&update.blocking_reason, update.status) {
            (Some(reason), _) => Some(Some(reason.clone())),
            (None, TaskStatus::Blocked) => {
                Some(update.note.clone().or_else(|| view.blocking_reason.clone()))
            }
            (None, _) => None,
        };

        let updated = self
            .record_status_change(
                &view.task,
                update.status,
                Transition {
                    changed_by,
                    note: update.note.clone(),
                    blocking_reason,
                    result_summary: update.result_summary.clone().map(Some),
                },
            )
            .await?;

        self.refresh_dependents(session_id, &updated.id, changed_by, None)
            .await?;

        if updated.task_type.is_validator() {
            match update.status {
                TaskStatus::Blocked | TaskStatus::Failed => {
                    let note = update
                        .note
                        .as_deref()
                        .or(update.blocking_reason.as_deref())
                        .or(updated.blocking_reason.as_deref());
                    let summary = update
                        .result_summary
                        .as_deref()
                        .or(updated.result_summary.as_deref());
                    self.reopen_upstream(&updated.task, changed_by, note, summary)
                        .await?;
                }
                TaskStatus::Done => {
                    for dependency in updated
                        .dependencies
                        .iter()
                        .filter(|d| d.dependency.dependency_type.affects_scheduling())
                    {
                        self.finalize(
                            session_id,
                            &dependency.dependency.depends_on_task_id,
                            changed_by,
                            update.note.as_deref(),
                            None,
                        )
                        .await?;
                    }
                }
                _ => {}
            }
        }

        self.require_task(session_id, &updated.id).await
    }

    /// Hand a task to its validators and wait for their verdict.
    ///
    /// Moves the task to `in_review` (unless it already is), re-arms
    /// validators left `blocked` by an earlier round, wakes dependents, then
    /// polls until the task is finalized or reopened.
    #[instrument(skip(self, ctx, options), fields(session = %ctx.session_id))]
    pub async fn notify_done(
        &self,
        ctx: &CallerContext,
        task_id: &str,
        note: Option<&str>,
        result_summary: Option<&str>,
        options: &WaitOptions,
    ) -> Result<FinalizeResult> {
        let session_id = ctx.session_id.as_str();
        let changed_by = ctx.agent_id.as_deref();
        let view = self.require_task(session_id, task_id).await?;

        if matches!(view.status, TaskStatus::Failed | TaskStatus::Cancelled) {
            return Err(SquadError::InvalidTransition {
                task_id: view.id.clone(),
                from: view.status.to_string(),
                to: TaskStatus::InReview.to_string(),
            });
        }

        if !matches!(view.status, TaskStatus::InReview | TaskStatus::Done) {
            let review = self
                .record_status_change(
                    &view.task,
                    TaskStatus::InReview,
                    Transition {
                        changed_by,
                        note: Some(note.unwrap_or("Waiting for downstream validation").to_string()),
                        blocking_reason: Some(None),
                        result_summary: result_summary.map(|s| Some(s.to_string())),
                    },
                )
                .await?;
            self.journal
                .append_event(
                    session_id,
                    "task.finalization_started",
                    json!({ "taskId": task_id }),
                    Some(&review.agent_id),
                )
                .await?;

            self.rearm_validators(session_id, task_id, changed_by).await?;
            self.refresh_dependents(
                session_id,
                task_id,
                changed_by,
                Some("Upstream implementation ready for validation"),
            )
            .await?;
        }

        self.wait_for_finalization(session_id, task_id, changed_by, options)
            .await
    }

    /// Validators still `blocked` from a previous review round go back to
    /// `ready` when the upstream work is resubmitted.
    async fn rearm_validators(
        &self,
        session_id: &str,
        task_id: &str,
        changed_by: Option<&str>,
    ) -> Result<()> {
        for validator in self.list_dependent_tasks(session_id, task_id, true).await? {
            if validator.status != TaskStatus::Blocked || validator.is_blocked_by_dependencies() {
                continue;
            }
            self.record_status_change(
                &validator.task,
                TaskStatus::Ready,
                Transition {
                    changed_by,
                    note: Some(format!("Upstream {} resubmitted for validation", task_id)),
                    blocking_reason: Some(None),
                    ..Default::default()
                },
            )
            .await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Waits
    // ------------------------------------------------------------------

    /// Poll until the task has no unsatisfied blocking dependency or is terminal.
    pub async fn wait_for_availability(
        &self,
        session_id: &str,
        task_id: &str,
        changed_by: Option<&str>,
        options: &WaitOptions,
    ) -> Result<TaskView> {
        let deadline = Deadline::start(options);
        loop {
            self.require_task(session_id, task_id).await?;
            let view = self
                .promote(session_id, task_id, changed_by, None)
                .await?
                .ok_or_else(|| SquadError::TaskNotFound(task_id.to_string()))?;

            if !view.is_blocked_by_dependencies() || view.status.is_terminal() {
                return Ok(view);
            }

            let upstream: Vec<&str> = view
                .blocking_tasks
                .iter()
                .map(|d| d.dependency.depends_on_task_id.as_str())
                .collect();
            self.journal
                .append_event(
                    session_id,
                    "task.waiting_for_dependencies",
                    json!({ "taskId": task_id, "dependsOnTaskIds": upstream }),
                    Some(&view.agent_id),
                )
                .await?;

            deadline.pause(task_id).await?;
        }
    }

    /// Poll until the task is `done` or has been reopened with feedback.
    pub async fn wait_for_finalization(
        &self,
        session_id: &str,
        task_id: &str,
        changed_by: Option<&str>,
        options: &WaitOptions,
    ) -> Result<FinalizeResult> {
        let deadline = Deadline::start(options);
        loop {
            let view = self.require_task(session_id, task_id).await?;

            if view.status == TaskStatus::Done {
                return Ok(FinalizeResult::without_change(
                    FinalizationOutcome::Finalized,
                    Some(view),
                ));
            }

            if view.status == TaskStatus::InProgress {
                if let Some(reason) = view.blocking_reason.clone() {
                    let feedback = vec![Feedback {
                        task_id: view.id.clone(),
                        agent_id: view.agent_id.clone(),
                        message: reason,
                    }];
                    return Ok(FinalizeResult {
                        outcome: FinalizationOutcome::ChangesRequested,
                        task: Some(view),
                        pending_dependent_task_ids: Vec::new(),
                        feedback,
                    });
                }
            }

            let result = self
                .finalize(session_id, task_id, changed_by, None, None)
                .await?;
            match result.outcome {
                FinalizationOutcome::Waiting => deadline.pause(task_id).await?,
                // Another writer moved the task between the two reads
                FinalizationOutcome::NoAction
                    if result.task.as_ref().map_or(false, |t| t.status != view.status) =>
                {
                    continue
                }
                _ => return Ok(result),
            }
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn dedupe_specs(specs: Vec<DependencySpec>) -> Vec<DependencySpec> {
    let mut seen = HashSet::new();
    specs
        .into_iter()
        .filter(|spec| !spec.depends_on_task_id.is_empty())
        .filter(|spec| seen.insert(spec.clone()))
        .collect()
}

/// Reject unknown upstream tasks and blocking edges that would close a cycle.
fn validate_dependencies(current: &SessionTasks, task_id: &str, specs: &[DependencySpec]) -> Result<()> {
    let mut edges = current.edges.clone();
    for spec in specs {
        let blocks = spec.dependency_type.affects_scheduling();
        if blocks && graph::would_create_cycle(&edges, task_id, &spec.depends_on_task_id) {
            return Err(SquadError::DependencyCycle {
                task_id: task_id.to_string(),
                depends_on: spec.depends_on_task_id.clone(),
            });
        }
        let Some(upstream) = current.find(&spec.depends_on_task_id) else {
            return Err(SquadError::TaskNotFound(spec.depends_on_task_id.clone()));
        };
        if blocks {
            edges.push(TaskDependency {
                id: String::new(),
                session_id: upstream.session_id.clone(),
                task_id: task_id.to_string(),
                depends_on_task_id: spec.depends_on_task_id.clone(),
                dependency_type: spec.dependency_type,
                created_at: Utc::now(),
            });
        }
    }
    Ok(())
}
