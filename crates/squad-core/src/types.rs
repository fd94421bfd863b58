//! Records persisted to the session log and the enums they carry.
//!
//! Field names serialize in camelCase and enum values in snake_case so the
//! JSONL files stay readable by the monitoring front end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::Transport;
use crate::SquadError;

/// Implements `as_str`, `Display` and `FromStr` for a wire enum.
macro_rules! wire_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = SquadError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(SquadError::InvalidArgument(format!(
                        "unknown {} \"{}\"",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Planning,
    Active,
    Blocked,
    Completed,
    Failed,
    Cancelled,
}

wire_enum!(SessionStatus {
    Planning => "planning",
    Active => "active",
    Blocked => "blocked",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Manager,
    #[default]
    Worker,
}

wire_enum!(AgentKind {
    Manager => "manager",
    Worker => "worker",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Created,
    Idle,
    Starting,
    Running,
    Waiting,
    Blocked,
    Stopped,
    Completed,
    Failed,
}

wire_enum!(AgentStatus {
    Created => "created",
    Idle => "idle",
    Starting => "starting",
    Running => "running",
    Waiting => "waiting",
    Blocked => "blocked",
    Stopped => "stopped",
    Completed => "completed",
    Failed => "failed",
});

/// How a provider runs: once per delivered message, or as a long-lived process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderMode {
    #[default]
    Oneshot,
    Detached,
}

wire_enum!(ProviderMode {
    Oneshot => "oneshot",
    Detached => "detached",
});

/// Task lifecycle.
///
/// `todo → ready → in_progress → in_review → done` is the success path.
/// `waiting` means an unmet blocking dependency, `blocked` is an explicit halt,
/// `failed` and `cancelled` are abandonment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    Ready,
    InProgress,
    Waiting,
    Blocked,
    InReview,
    Done,
    Failed,
    Cancelled,
}

wire_enum!(TaskStatus {
    Todo => "todo",
    Ready => "ready",
    InProgress => "in_progress",
    Waiting => "waiting",
    Blocked => "blocked",
    InReview => "in_review",
    Done => "done",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl TaskStatus {
    /// `done`, `failed` and `cancelled` end the lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed | TaskStatus::Cancelled)
    }

    /// Rank used to pick an agent's current task; lower wins.
    pub fn current_task_rank(&self) -> u8 {
        match self {
            TaskStatus::InProgress => 0,
            TaskStatus::InReview => 1,
            TaskStatus::Ready => 2,
            TaskStatus::Todo => 3,
            TaskStatus::Waiting => 4,
            TaskStatus::Blocked => 5,
            _ => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

wire_enum!(Priority {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Planning,
    Implementation,
    Testing,
    Review,
    Research,
    Coordination,
    #[default]
    Other,
}

wire_enum!(TaskType {
    Planning => "planning",
    Implementation => "implementation",
    Testing => "testing",
    Review => "review",
    Research => "research",
    Coordination => "coordination",
    Other => "other",
});

impl TaskType {
    /// Validator tasks gate finalization of the work they depend on.
    pub fn is_validator(&self) -> bool {
        matches!(self, TaskType::Testing | TaskType::Review)
    }

    /// Guess a task type from an agent role name.
    pub fn infer_from_role(role: &str) -> Self {
        let role = role.to_lowercase();
        if role.contains("plan") {
            TaskType::Planning
        } else if role.contains("test") {
            TaskType::Testing
        } else if role.contains("review") {
            TaskType::Review
        } else if role.contains("dev") {
            TaskType::Implementation
        } else {
            TaskType::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    #[default]
    Blocks,
    RelatesTo,
    Duplicates,
    ParentOf,
}

wire_enum!(DependencyType {
    Blocks => "blocks",
    RelatesTo => "relates_to",
    Duplicates => "duplicates",
    ParentOf => "parent_of",
});

impl DependencyType {
    /// Only `blocks` edges take part in scheduling.
    pub fn affects_scheduling(&self) -> bool {
        matches!(self, DependencyType::Blocks)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Instruction,
    Question,
    Update,
    Review,
    Handoff,
    Note,
    System,
}

wire_enum!(MessageKind {
    Instruction => "instruction",
    Question => "question",
    Update => "update",
    Review => "review",
    Handoff => "handoff",
    Note => "note",
    System => "system",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Queued,
    Delivered,
    Failed,
    Read,
}

wire_enum!(DeliveryStatus {
    Queued => "queued",
    Delivered => "delivered",
    Failed => "failed",
    Read => "read",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    Agent,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

wire_enum!(LogLevel {
    Debug => "debug",
    Info => "info",
    Warning => "warning",
    Error => "error",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Starting,
    Running,
    Completed,
    Failed,
    Stopped,
}

// ============================================================================
// Records
// ============================================================================

/// One objective and everything spawned for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub title: String,
    pub goal: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub manager_agent_id: Option<String>,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub root_workdir: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// A tracked worker identity bound to a provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub kind: AgentKind,
    pub provider_id: String,
    #[serde(default)]
    pub profile: Option<String>,
    pub session_id: String,
    pub workdir: PathBuf,
    pub goal: String,
    pub status: AgentStatus,
    #[serde(default)]
    pub mode: ProviderMode,
    #[serde(default)]
    pub current_task_id: Option<String>,
    #[serde(default)]
    pub parent_agent_id: Option<String>,
    #[serde(default)]
    pub created_by_agent_id: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub launch_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default)]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A unit of work owned by exactly one agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub session_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub parent_task_id: Option<String>,
    pub title: String,
    pub goal: String,
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub task_type: TaskType,
    #[serde(default)]
    pub scope_path: Option<String>,
    #[serde(default)]
    pub acceptance_criteria: Option<String>,
    #[serde(default)]
    pub blocking_reason: Option<String>,
    #[serde(default)]
    pub result_summary: Option<String>,
    #[serde(default)]
    pub created_by_agent_id: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Edge `task_id` depends on `depends_on_task_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskDependency {
    pub id: String,
    pub session_id: String,
    pub task_id: String,
    pub depends_on_task_id: String,
    #[serde(default)]
    pub dependency_type: DependencyType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusHistory {
    pub id: String,
    pub session_id: String,
    pub task_id: String,
    pub from_status: Option<TaskStatus>,
    pub to_status: TaskStatus,
    #[serde(default)]
    pub changed_by_agent_id: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of handing a message to a provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryOutcome {
    pub ok: bool,
    pub code: Option<i32>,
    pub signal: Option<String>,
    pub transport: Transport,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub session_id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    /// Sending agent; `None` means the human operator.
    pub from: Option<String>,
    pub from_type: SenderType,
    pub to: String,
    #[serde(default)]
    pub message_kind: MessageKind,
    pub text: String,
    pub delivery_status: DeliveryStatus,
    #[serde(default)]
    pub related_task_id: Option<String>,
    #[serde(default)]
    pub reply_to_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryOutcome>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
}

/// Line appended to an agent's outbox after each delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub id: String,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub delivery: DeliveryOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLog {
    pub id: String,
    pub session_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub level: LogLevel,
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub details_json: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Structured domain event (`task.assigned`, `agent.spawned`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub session_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentRun {
    pub id: String,
    pub agent_id: String,
    pub session_id: String,
    pub provider_id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub exit_signal: Option<String>,
    pub status: RunStatus,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

/// Contents of an agent's `pid.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PidFile {
    pub pid: u32,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub started_at: DateTime<Utc>,
}
