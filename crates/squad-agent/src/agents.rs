//! Agent lifecycle: spawn, lookup, stop and log access.

use crate::coordinator::Coordinator;
use crate::process;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use squad_core::fail_open::fail_open;
use squad_core::ids::{self, new_id};
use squad_core::naming::{build_agent_id, generate_agent_name};
use squad_core::{
    Agent, AgentKind, AgentRun, AgentStatus, CallerContext, Priority, ProviderMode, Result,
    RunStatus, Session, SessionStatus, SquadError, TaskType,
};
use squad_store::{ActivityEntry, SnapshotCollection};
use squad_tasks::{DependencySpec, NewTask, TaskView};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, instrument};

pub const DEFAULT_ROLE: &str = "worker";
const DEFAULT_AGENT_GOAL: &str = "Support the project goal";

/// Lines shown before `follow_log` starts streaming.
const FOLLOW_TAIL_LINES: usize = 10;

/// Input of [`Coordinator::spawn_agent`]. Only `provider` is required.
#[derive(Debug, Clone, Default)]
pub struct SpawnAgent {
    pub provider: String,
    pub profile: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
    pub kind: AgentKind,
    pub goal: Option<String>,
    pub workdir: Option<PathBuf>,
    /// `KEY=VALUE` entries
    pub env: Vec<String>,
    pub parent_agent_id: Option<String>,
    pub system_prompt: Option<String>,
    /// Initial task text; creates a task owned by the new agent
    pub task: Option<String>,
    pub task_title: Option<String>,
    pub task_type: Option<TaskType>,
    pub priority: Option<Priority>,
    pub acceptance_criteria: Option<String>,
    pub depends_on: Vec<DependencySpec>,
    /// Goal given to the session if this spawn creates it
    pub session_goal: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogStream {
    #[default]
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
        }
    }
}

impl FromStr for LogStream {
    type Err = SquadError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stdout" => Ok(LogStream::Stdout),
            "stderr" => Ok(LogStream::Stderr),
            other => Err(SquadError::InvalidArgument(format!(
                "unknown log stream \"{}\"",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopReport {
    pub agent: Agent,
    pub stopped: bool,
    pub pid: Option<u32>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDetails {
    #[serde(flatten)]
    pub agent: Agent,
    pub runs: Vec<AgentRun>,
    pub task: Option<TaskView>,
}

/// Parse `KEY=VALUE` entries. The value may itself contain `=`; entries
/// without a key are skipped.
pub fn parse_env_entries(entries: &[String]) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    for entry in entries {
        match entry.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                env.insert(key.trim().to_string(), value.to_string());
            }
            _ => debug!("Ignoring env entry {:?}", entry),
        }
    }
    env
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn name_seed() -> u64 {
    Utc::now().timestamp_millis().unsigned_abs()
}

impl Coordinator {
    /// Register a new agent, optionally with an initial task, and start it if
    /// its provider is detached.
    ///
    /// The id is claimed under the session lock so concurrent spawns of the
    /// same name and role get distinct suffixes.
    #[instrument(skip(self, ctx, request), fields(session = %ctx.session_id, provider = %request.provider))]
    pub async fn spawn_agent(&self, ctx: &CallerContext, request: SpawnAgent) -> Result<Agent> {
        let session_id = ctx.session_id.as_str();
        let provider_config = self
            .config()
            .resolve_provider(&request.provider, request.profile.as_deref())?;
        let provider = self.providers().get(&request.provider)?;
        let env = parse_env_entries(&request.env);
        for spec in &request.depends_on {
            self.engine()
                .require_task(session_id, &spec.depends_on_task_id)
                .await?;
        }

        let root = self.workspace().project_root().to_path_buf();
        let workdir = match request.workdir.clone() {
            Some(dir) if dir.is_absolute() => dir,
            Some(dir) => root.join(dir),
            None => root.clone(),
        };
        let role = non_empty(request.role.clone()).unwrap_or_else(|| DEFAULT_ROLE.to_string());
        let name = non_empty(request.name.clone())
            .unwrap_or_else(|| generate_agent_name(name_seed()).to_string());
        let detached = provider_config.mode == ProviderMode::Detached;
        let now = Utc::now();

        let mut agent = {
            let _lock = self.store().lock_session(session_id).await?;
            let taken: HashSet<String> = self
                .store()
                .read_snapshots::<Agent>(session_id, SnapshotCollection::Agents)
                .await?
                .into_iter()
                .map(|a| a.id)
                .collect();
            let mut index = 0;
            let id = loop {
                let candidate = build_agent_id(&name, &role, index);
                if !taken.contains(&candidate) {
                    break candidate;
                }
                index += 1;
            };

            self.touch_session(session_id, request.session_goal.as_deref(), &request.provider, now)
                .await?;

            let agent = Agent {
                id,
                name: name.clone(),
                role: role.clone(),
                kind: request.kind,
                provider_id: request.provider.clone(),
                profile: request.profile.clone(),
                session_id: session_id.to_string(),
                workdir: workdir.clone(),
                goal: non_empty(request.goal.clone()).unwrap_or_else(|| DEFAULT_AGENT_GOAL.to_string()),
                status: if detached {
                    AgentStatus::Starting
                } else {
                    AgentStatus::Idle
                },
                mode: provider_config.mode,
                current_task_id: None,
                parent_agent_id: request.parent_agent_id.clone(),
                created_by_agent_id: ctx.agent_id.clone(),
                env,
                system_prompt: request.system_prompt.clone(),
                launch_command: Some(provider_config.launch_command()),
                pid: None,
                last_heartbeat_at: None,
                archived_at: None,
                created_at: now,
                updated_at: now,
            };
            self.store()
                .append_snapshot(session_id, SnapshotCollection::Agents, &agent)
                .await?;
            agent
        };
        self.mirror_agent(&agent).await;
        info!("Registered {} ({})", agent.id, agent.provider_id);

        if let Some(task_text) = non_empty(request.task.clone()) {
            let view = self
                .engine()
                .create_task(NewTask {
                    session_id: session_id.to_string(),
                    agent_id: agent.id.clone(),
                    title: non_empty(request.task_title.clone()).or_else(|| Some(task_text.clone())),
                    goal: Some(agent.goal.clone()),
                    description: Some(task_text),
                    priority: request.priority,
                    task_type: Some(
                        request
                            .task_type
                            .unwrap_or_else(|| TaskType::infer_from_role(&role)),
                    ),
                    acceptance_criteria: request.acceptance_criteria.clone(),
                    created_by_agent_id: ctx.agent_id.clone(),
                    dependencies: request.depends_on.clone(),
                    ..Default::default()
                })
                .await?;
            agent.current_task_id = Some(view.id.clone());
            agent.updated_at = view.updated_at;
            self.mirror_agent(&agent).await;
        }

        let paths = self.workspace().ensure_agent(session_id, &agent.id).await?;
        let mut run = AgentRun {
            id: new_id(ids::AGENT_RUN),
            agent_id: agent.id.clone(),
            session_id: session_id.to_string(),
            provider_id: agent.provider_id.clone(),
            command: provider_config.command.clone(),
            args: provider_config.args.clone(),
            pid: None,
            exit_code: None,
            exit_signal: None,
            status: if detached {
                RunStatus::Starting
            } else {
                RunStatus::Completed
            },
            stdout_path: paths.stdout.clone(),
            stderr_path: paths.stderr.clone(),
            started_at: now,
            ended_at: if detached { None } else { Some(now) },
        };
        self.store()
            .append_snapshot(session_id, SnapshotCollection::AgentRuns, &run)
            .await?;

        if detached {
            let invocation = provider.launch(&agent, &provider_config, &root);
            match process::start_detached(&invocation, &paths).await {
                Ok(record) => {
                    agent.pid = Some(record.pid);
                    agent.status = AgentStatus::Running;
                    run.pid = Some(record.pid);
                    run.status = RunStatus::Running;
                }
                Err(e) => {
                    agent.status = AgentStatus::Failed;
                    run.status = RunStatus::Failed;
                    run.ended_at = Some(Utc::now());
                    agent.updated_at = Utc::now();
                    self.save_agent(&agent).await?;
                    self.store()
                        .append_snapshot(session_id, SnapshotCollection::AgentRuns, &run)
                        .await?;
                    return Err(e);
                }
            }
            agent.updated_at = Utc::now();
            self.save_agent(&agent).await?;
            self.store()
                .append_snapshot(session_id, SnapshotCollection::AgentRuns, &run)
                .await?;
        }

        self.journal()
            .append_event(
                session_id,
                "agent.spawned",
                json!({
                    "providerId": agent.provider_id,
                    "workdir": agent.workdir,
                    "mode": agent.mode,
                    "role": agent.role,
                }),
                Some(&agent.id),
            )
            .await?;
        self.journal()
            .log(
                ActivityEntry::new(
                    session_id,
                    "agent.spawn",
                    format!("{} joined as {} via {}", agent.id, agent.role, agent.provider_id),
                )
                .agent(Some(&agent.id)),
            )
            .await?;
        Ok(agent)
    }

    /// Create the session record on first use, otherwise bump `updated_at`.
    async fn touch_session(
        &self,
        session_id: &str,
        goal: Option<&str>,
        provider_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let session = match self.store().read_session(session_id).await? {
            Some(existing) => Session {
                updated_at: now,
                ..existing
            },
            None => Session {
                id: session_id.to_string(),
                title: session_id.to_string(),
                goal: goal
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Session {}", session_id)),
                status: SessionStatus::Active,
                manager_agent_id: None,
                provider_id: Some(provider_id.to_string()),
                root_workdir: Some(self.workspace().project_root().to_path_buf()),
                created_at: now,
                updated_at: now,
                completed_at: None,
            },
        };
        self.store()
            .append_snapshot(session_id, SnapshotCollection::Session, &session)
            .await?;
        Ok(session)
    }

    /// Persist the agent record and refresh its `agent.json` mirror.
    pub(crate) async fn save_agent(&self, agent: &Agent) -> Result<()> {
        self.store()
            .append_snapshot(&agent.session_id, SnapshotCollection::Agents, agent)
            .await?;
        self.mirror_agent(agent).await;
        Ok(())
    }

    async fn mirror_agent(&self, agent: &Agent) {
        let workspace = self.workspace().clone();
        fail_open("agent.json mirror", || async move {
            let paths = workspace.ensure_agent(&agent.session_id, &agent.id).await?;
            tokio::fs::write(&paths.agent_json, serde_json::to_string_pretty(agent)?).await?;
            Ok(())
        })
        .await;
    }

    /// Reconcile a stored agent with its pid file.
    async fn hydrate(&self, mut agent: Agent) -> Result<Agent> {
        let paths = self.workspace().agent_paths(&agent.session_id, &agent.id);
        let detached = agent.mode == ProviderMode::Detached;
        match process::read_pid(&paths.pid).await? {
            Some(record) if process::is_pid_alive(record.pid) => {
                agent.pid = Some(record.pid);
                if detached {
                    agent.status = AgentStatus::Running;
                }
            }
            _ if detached && agent.status == AgentStatus::Running => {
                debug!("{} has no live process", agent.id);
                agent.status = AgentStatus::Stopped;
            }
            _ => {}
        }
        Ok(agent)
    }

    /// Agents of a session in creation order, with live process state.
    pub async fn list_agents(&self, session_id: &str) -> Result<Vec<Agent>> {
        let mut agents: Vec<Agent> = self
            .store()
            .read_snapshots(session_id, SnapshotCollection::Agents)
            .await?;
        agents.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let mut hydrated = Vec::with_capacity(agents.len());
        for agent in agents {
            hydrated.push(self.hydrate(agent).await?);
        }
        Ok(hydrated)
    }

    /// Look an agent up by id, then by name.
    pub async fn resolve_agent(&self, session_id: &str, reference: &str) -> Result<Agent> {
        let agents = self.list_agents(session_id).await?;
        if let Some(agent) = agents.iter().find(|a| a.id == reference) {
            return Ok(agent.clone());
        }

        let mut by_name = agents.into_iter().filter(|a| a.name == reference);
        match (by_name.next(), by_name.next()) {
            (Some(agent), None) => Ok(agent),
            (Some(_), Some(_)) => Err(SquadError::AmbiguousAgentName(reference.to_string())),
            (None, _) => Err(SquadError::AgentNotFound(reference.to_string())),
        }
    }

    /// Process launches recorded for an agent, oldest first.
    pub async fn list_runs(&self, session_id: &str, agent_id: &str) -> Result<Vec<AgentRun>> {
        let mut runs: Vec<AgentRun> = self
            .store()
            .read_snapshots(session_id, SnapshotCollection::AgentRuns)
            .await?;
        runs.retain(|run| run.agent_id == agent_id);
        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(runs)
    }

    /// An agent with its launches and current task.
    pub async fn show_agent(&self, session_id: &str, reference: &str) -> Result<AgentDetails> {
        let agent = self.resolve_agent(session_id, reference).await?;
        let runs = self.list_runs(session_id, &agent.id).await?;
        let task = match &agent.current_task_id {
            Some(task_id) => self.engine().get_task(session_id, task_id).await?,
            None => None,
        };
        Ok(AgentDetails { agent, runs, task })
    }

    /// Terminate a detached agent's process.
    #[instrument(skip(self))]
    pub async fn stop_agent(&self, session_id: &str, reference: &str) -> Result<StopReport> {
        let mut agent = self.resolve_agent(session_id, reference).await?;
        if agent.mode != ProviderMode::Detached {
            return Err(SquadError::AgentNotRunning(agent.id));
        }

        let paths = self.workspace().agent_paths(session_id, &agent.id);
        let outcome = process::stop_pid(&paths.pid).await?;

        agent.status = AgentStatus::Stopped;
        agent.pid = None;
        agent.updated_at = Utc::now();
        self.save_agent(&agent).await?;

        let mut runs = self.list_runs(session_id, &agent.id).await?;
        if let Some(mut run) = runs.pop().filter(|run| run.status == RunStatus::Running) {
            run.status = RunStatus::Stopped;
            run.ended_at = Some(agent.updated_at);
            self.store()
                .append_snapshot(session_id, SnapshotCollection::AgentRuns, &run)
                .await?;
        }

        self.journal()
            .append_event(
                session_id,
                "agent.stopped",
                json!({ "pid": outcome.pid }),
                Some(&agent.id),
            )
            .await?;

        let message = if outcome.stopped {
            format!("Stopped {}.", agent.id)
        } else {
            format!("{} was already stopped.", agent.id)
        };
        info!("{}", message);
        Ok(StopReport {
            agent,
            stopped: outcome.stopped,
            pid: outcome.pid,
            message,
        })
    }

    /// Path of an agent's stdout or stderr log.
    pub async fn log_path(&self, session_id: &str, reference: &str, stream: LogStream) -> Result<PathBuf> {
        let agent = self.resolve_agent(session_id, reference).await?;
        let paths = self.workspace().agent_paths(session_id, &agent.id);
        Ok(match stream {
            LogStream::Stdout => paths.stdout,
            LogStream::Stderr => paths.stderr,
        })
    }

    /// Full contents of an agent log; empty if nothing was written yet.
    pub async fn read_logs(&self, session_id: &str, reference: &str, stream: LogStream) -> Result<String> {
        let path = self.log_path(session_id, reference, stream).await?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Print the last lines of `path`, then stream appended bytes to `out`
/// until `shutdown` resolves.
///
/// A file that shrinks is treated as rotated and re-read from the start.
pub async fn follow_log<W, F>(path: &Path, out: &mut W, poll: Duration, shutdown: F) -> Result<()>
where
    W: AsyncWrite + Unpin,
    F: Future<Output = ()>,
{
    let mut offset = match tokio::fs::read(path).await {
        Ok(bytes) => {
            out.write_all(tail_lines(&bytes, FOLLOW_TAIL_LINES)).await?;
            bytes.len() as u64
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
        Err(e) => return Err(e.into()),
    };
    out.flush().await?;

    tokio::pin!(shutdown);
    let mut interval = tokio::time::interval(poll);
    loop {
        tokio::select! {
            _ = &mut shutdown => return Ok(()),
            _ = interval.tick() => {}
        }

        let mut file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata().await?.len();
        if len < offset {
            debug!("{} shrank, restarting from the top", path.display());
            offset = 0;
        }
        if len == offset {
            continue;
        }

        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut chunk = Vec::with_capacity((len - offset) as usize);
        file.read_to_end(&mut chunk).await?;
        offset += chunk.len() as u64;
        out.write_all(&chunk).await?;
        out.flush().await?;
    }
}

/// The suffix of `bytes` holding its last `count` lines.
fn tail_lines(bytes: &[u8], count: usize) -> &[u8] {
    let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    let start = body
        .iter()
        .enumerate()
        .rev()
        .filter(|(_, b)| **b == b'\n')
        .nth(count.saturating_sub(1))
        .map(|(i, _)| i + 1)
        .unwrap_or(0);
    &bytes[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_env_entries() {
        let env = parse_env_entries(&[
            "A=1".to_string(),
            "URL=x=y".to_string(),
            "NOVALUE".to_string(),
            "=1".to_string(),
        ]);
        assert_eq!(env.len(), 2);
        assert_eq!(env["A"], "1");
        assert_eq!(env["URL"], "x=y");
    }

    #[test]
    fn test_log_stream_parse() {
        assert_eq!("stderr".parse::<LogStream>().unwrap(), LogStream::Stderr);
        assert!("both".parse::<LogStream>().is_err());
    }

    #[test]
    fn test_tail_lines() {
        assert_eq!(tail_lines(b"a\nb\nc\n", 2), b"b\nc\n");
        assert_eq!(tail_lines(b"a\nb\nc", 2), b"b\nc");
        assert_eq!(tail_lines(b"a\nb\n", 10), b"a\nb\n");
        assert_eq!(tail_lines(b"", 3), b"");
    }

    #[tokio::test]
    async fn test_follow_log_streams_appends() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("stdout.log");
        std::fs::write(&path, "one\ntwo\n").unwrap();

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            let mut file = tokio::fs::OpenOptions::new()
                .append(true)
                .open(&writer_path)
                .await
                .unwrap();
            file.write_all(b"three\n").await.unwrap();
        });

        let mut out = Vec::new();
        follow_log(
            &path,
            &mut out,
            Duration::from_millis(20),
            tokio::time::sleep(Duration::from_millis(300)),
        )
        .await
        .unwrap();
        writer.await.unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "one\ntwo\nthree\n");
    }
}
