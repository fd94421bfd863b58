//! agentsquad CLI - spawn and coordinate CLI agents across providers
//!
//! Usage:
//!   agentsquad init                          Initialise the workspace
//!   agentsquad objective <goal>              Brief a manager agent
//!   agentsquad agent run --provider <id>     Spawn a worker
//!   agentsquad task get                      Current assignment of the calling agent
//!   agentsquad task done                     Submit work and wait for validation
//!   agentsquad message send --to <agent>     Deliver a message

mod render;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use squad_agent::{Coordinator, LogStream, Objective, SendMessage, SpawnAgent};
use squad_core::context::WORKSPACE_ROOT_ENV;
use squad_core::{
    AgentKind, CallerContext, MessageKind, Priority, SquadConfig, SquadError, TaskStatus, TaskType,
};
use squad_store::SnapshotCollection;
use squad_tasks::{AssignTask, DependencySpec, StatusUpdate, WaitOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const FOLLOW_POLL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "agentsquad")]
#[command(author, version, about = "Spawn and coordinate CLI agents across providers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Session id (defaults to AGENTSQUAD_SESSION_ID, then the configured default)
    #[arg(long, global = true)]
    session: Option<String>,

    /// Project root (defaults to AGENTSQUAD_WORKSPACE_ROOT, then the current directory)
    #[arg(long, global = true, value_name = "PATH")]
    root: Option<PathBuf>,
}

#[derive(Args, Clone, Copy)]
struct OutputArgs {
    /// Return JSON output
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialise agentsquad in the current project
    Init {
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Start a manager agent on an objective
    Objective {
        /// What the squad should achieve
        goal: String,

        /// Provider for the manager (defaults to the orchestrator provider)
        #[arg(long)]
        provider: Option<String>,

        /// Provider profile
        #[arg(long)]
        profile: Option<String>,

        /// Session title (defaults to the goal)
        #[arg(long)]
        title: Option<String>,

        /// Working directory of the manager
        #[arg(long)]
        workdir: Option<PathBuf>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Inspect configured providers
    Provider {
        #[command(subcommand)]
        action: ProviderAction,
    },

    /// Manage agents
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },

    /// Persist and deliver messages
    Message {
        #[command(subcommand)]
        action: MessageAction,
    },

    /// Manage agent tasks
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Show agent logs
    Logs {
        /// Agent id or unique name
        agent: String,

        /// Show stderr instead of stdout
        #[arg(long)]
        stderr: bool,

        /// Keep streaming new output until interrupted
        #[arg(short, long)]
        follow: bool,
    },

    /// List session events
    Events {
        /// Filter by agent id
        #[arg(long)]
        agent: Option<String>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// List session activity
    Activity {
        /// Filter by agent id
        #[arg(long)]
        agent: Option<String>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Inspect sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Maintain the session store
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },
}

#[derive(Subcommand)]
enum ProviderAction {
    /// List configured providers and local availability
    List {
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Subcommand)]
enum AgentAction {
    /// Run a managed agent
    Run {
        /// Provider id (defaults to the orchestrator provider)
        #[arg(long)]
        provider: Option<String>,

        /// Provider profile
        #[arg(long)]
        profile: Option<String>,

        /// Agent role
        #[arg(long)]
        role: Option<String>,

        /// Human-friendly agent name
        #[arg(long)]
        name: Option<String>,

        /// Goal assigned to the agent
        #[arg(long)]
        goal: Option<String>,

        /// Initial task to assign
        #[arg(long)]
        task: Option<String>,

        /// Title of the initial task
        #[arg(long)]
        task_title: Option<String>,

        /// Type of the initial task (inferred from the role otherwise)
        #[arg(long = "type", value_name = "TYPE")]
        task_type: Option<TaskType>,

        /// Priority of the initial task
        #[arg(long)]
        priority: Option<Priority>,

        /// Acceptance criteria of the initial task
        #[arg(long)]
        acceptance: Option<String>,

        /// Task ids the initial task is blocked by
        #[arg(long = "depends-on", value_name = "TASK_ID")]
        depends_on: Vec<String>,

        /// Working directory
        #[arg(long)]
        workdir: Option<PathBuf>,

        /// Environment override as KEY=VALUE (repeatable)
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Parent agent id
        #[arg(long)]
        parent: Option<String>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// List agents in a session
    List {
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Show details for one agent
    Show {
        /// Agent id or unique name
        agent: String,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Stop a running detached agent
    Stop {
        /// Agent id or unique name
        agent: String,

        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Subcommand)]
enum MessageAction {
    /// Send a message to an agent
    Send {
        /// Target agent id or unique name
        #[arg(long)]
        to: String,

        /// Source agent id or unique name (defaults to the calling agent)
        #[arg(long)]
        from: Option<String>,

        /// Inline message text
        #[arg(long)]
        text: Option<String>,

        /// Read message text from a file
        #[arg(long, conflicts_with = "text")]
        file: Option<PathBuf>,

        /// Message kind
        #[arg(long, default_value = "instruction")]
        kind: MessageKind,

        /// Thread id
        #[arg(long)]
        thread: Option<String>,

        /// Related task id
        #[arg(long)]
        related_task_id: Option<String>,

        /// Message this one replies to
        #[arg(long)]
        reply_to: Option<String>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// List persisted messages
    List {
        /// Filter by sender or recipient
        #[arg(long)]
        agent: Option<String>,

        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// Get the current task for an agent
    Get {
        /// Agent id (defaults to AGENTSQUAD_AGENT_ID)
        #[arg(long)]
        agent: Option<String>,

        /// Block until upstream dependencies are satisfied
        #[arg(long, conflicts_with = "no_wait")]
        wait: bool,

        /// Return immediately even when called by an agent
        #[arg(long)]
        no_wait: bool,

        /// Give up waiting after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// List tasks in a session
    List {
        /// Filter by agent id
        #[arg(long)]
        agent: Option<String>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Assign a task to an agent
    Assign {
        /// Agent id or unique name
        #[arg(long)]
        agent: String,

        /// Task description
        #[arg(long)]
        task: String,

        /// Project goal for the task
        #[arg(long)]
        goal: Option<String>,

        /// Task title
        #[arg(long)]
        title: Option<String>,

        /// Initial task status
        #[arg(long)]
        status: Option<TaskStatus>,

        /// Task priority
        #[arg(long)]
        priority: Option<Priority>,

        /// Task type
        #[arg(long = "type", value_name = "TYPE")]
        task_type: Option<TaskType>,

        /// Acceptance criteria
        #[arg(long)]
        acceptance: Option<String>,

        /// Task ids this task is blocked by
        #[arg(long = "depends-on", value_name = "TASK_ID")]
        depends_on: Vec<String>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Update the status of a task
    UpdateStatus {
        /// Task id
        #[arg(long)]
        task: String,

        /// Next status
        #[arg(long)]
        status: TaskStatus,

        /// Reason when blocked
        #[arg(long)]
        blocking_reason: Option<String>,

        /// Summary when completed
        #[arg(long)]
        result_summary: Option<String>,

        /// Optional history note
        #[arg(long)]
        note: Option<String>,

        /// Agent id performing the update
        #[arg(long)]
        agent: Option<String>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Submit a task for validation and wait for the verdict
    Done {
        /// Task id (defaults to the calling agent's current task)
        #[arg(long)]
        task: Option<String>,

        /// Summary of the delivered work
        #[arg(long)]
        result_summary: Option<String>,

        /// Optional history note
        #[arg(long)]
        note: Option<String>,

        /// Agent id submitting the work
        #[arg(long)]
        agent: Option<String>,

        /// Give up waiting after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// List sessions, most recently updated first
    List {
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Subcommand)]
enum StoreAction {
    /// Rewrite snapshot collections to their latest rows
    Compact {
        /// Collection to compact (all when omitted)
        #[arg(long)]
        collection: Option<SnapshotCollection>,

        #[command(flatten)]
        output: OutputArgs,
    },
}

/// What every command needs: where the project lives and how it is configured.
struct App {
    root: PathBuf,
    config: SquadConfig,
    session: Option<String>,
}

impl App {
    fn load(cli_root: Option<PathBuf>, session: Option<String>) -> Result<Self> {
        let root = match cli_root.or_else(|| std::env::var_os(WORKSPACE_ROOT_ENV).map(PathBuf::from)) {
            Some(root) => root,
            None => std::env::current_dir().context("Failed to resolve the current directory")?,
        };
        let config = SquadConfig::load_or_default(&root)?;
        debug!("Using workspace root {}", root.display());
        Ok(Self {
            root,
            config,
            session,
        })
    }

    fn context(&self, agent: Option<String>) -> CallerContext {
        CallerContext::from_env(agent, self.session.clone(), &self.config.default_session)
    }

    fn coordinator(&self) -> Coordinator {
        Coordinator::new(self.root.clone(), self.config.clone()).with_reporter(Arc::new(render::ConsoleReporter))
    }

    fn wait_options(&self, timeout_secs: Option<u64>) -> WaitOptions {
        let options = WaitOptions::from_defaults(&self.config.tasks);
        match timeout_secs {
            Some(secs) => options.with_timeout(Some(Duration::from_secs(secs))),
            None => options,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let squad = err.chain().find_map(|e| e.downcast_ref::<SquadError>());
            let (code, exit) = match squad {
                Some(e) => (e.code(), e.exit_code()),
                None => ("ERROR", 1),
            };
            eprintln!("{} {:#}", format!("error[{}]:", code).red().bold(), err);
            ExitCode::from(u8::try_from(exit).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let app = App::load(cli.root, cli.session)?;

    match cli.command {
        Commands::Init { output } => cmd_init(&app, output).await,
        Commands::Objective {
            goal,
            provider,
            profile,
            title,
            workdir,
            output,
        } => {
            let objective = Objective {
                goal,
                provider,
                profile,
                title,
                workdir,
            };
            cmd_objective(&app, objective, output).await
        }
        Commands::Provider { action } => cmd_provider(&app, action),
        Commands::Agent { action } => cmd_agent(&app, action).await,
        Commands::Message { action } => cmd_message(&app, action).await,
        Commands::Task { action } => cmd_task(&app, action).await,
        Commands::Logs {
            agent,
            stderr,
            follow,
        } => {
            let stream = if stderr { LogStream::Stderr } else { LogStream::Stdout };
            cmd_logs(&app, &agent, stream, follow).await
        }
        Commands::Events { agent, output } => {
            let ctx = app.context(None);
            let events = app
                .coordinator()
                .journal()
                .list_events(&ctx.session_id, agent.as_deref())
                .await?;
            if output.json {
                render::print_json(Some("events"), &events)
            } else {
                render::print_events(&events);
                Ok(())
            }
        }
        Commands::Activity { agent, output } => {
            let ctx = app.context(None);
            let entries = app
                .coordinator()
                .journal()
                .list_activity(&ctx.session_id, agent.as_deref())
                .await?;
            if output.json {
                render::print_json(Some("activity"), &entries)
            } else {
                render::print_activity(&entries);
                Ok(())
            }
        }
        Commands::Session { action } => cmd_session(&app, action).await,
        Commands::Store { action } => cmd_store(&app, action).await,
    }
}

async fn cmd_init(app: &App, output: OutputArgs) -> Result<()> {
    let config_path = SquadConfig::write_default(&app.root)?;
    let ctx = app.context(None);
    app.coordinator()
        .store()
        .ensure_session_store(&ctx.session_id)
        .await?;

    if output.json {
        return render::print_json(
            None,
            &serde_json::json!({
                "message": "Agentsquad workspace initialised",
                "workspaceRoot": app.root,
                "config": config_path,
                "session": ctx.session_id,
            }),
        );
    }

    println!("{} Agentsquad workspace initialised", "✓".green());
    println!("  Config:  {}", config_path.display());
    println!("  Session: {}", ctx.session_id.bright_cyan());
    Ok(())
}

async fn cmd_objective(app: &App, objective: Objective, output: OutputArgs) -> Result<()> {
    let ctx = app.context(None);
    let report = app.coordinator().execute_objective(&ctx, objective).await?;

    if output.json {
        return render::print_json(None, &report);
    }
    println!("{} {}", "✓".green(), report.summary);
    render::print_send(&report.kickoff);
    Ok(())
}

fn cmd_provider(app: &App, action: ProviderAction) -> Result<()> {
    match action {
        ProviderAction::List { output } => {
            let providers = squad_agent::provider_statuses(&app.config);
            if output.json {
                render::print_json(Some("providers"), &providers)
            } else {
                render::print_providers(&providers);
                Ok(())
            }
        }
    }
}

async fn cmd_agent(app: &App, action: AgentAction) -> Result<()> {
    let coordinator = app.coordinator();

    match action {
        AgentAction::Run {
            provider,
            profile,
            role,
            name,
            goal,
            task,
            task_title,
            task_type,
            priority,
            acceptance,
            depends_on,
            workdir,
            env,
            parent,
            output,
        } => {
            let ctx = app.context(None);
            let parent_agent_id = parent.or_else(|| ctx.agent_id.clone());
            let request = SpawnAgent {
                provider: provider.unwrap_or_else(|| app.config.orchestrator.provider.clone()),
                profile,
                name,
                role,
                kind: AgentKind::Worker,
                goal,
                workdir,
                env,
                parent_agent_id,
                task,
                task_title,
                task_type,
                priority,
                acceptance_criteria: acceptance,
                depends_on: depends_on.into_iter().map(DependencySpec::blocks).collect(),
                ..Default::default()
            };
            let agent = coordinator.spawn_agent(&ctx, request).await?;

            if output.json {
                return render::print_json(Some("agent"), &agent);
            }
            println!(
                "{} Created {} ({}, {})",
                "✓".green(),
                agent.id.bright_cyan(),
                agent.provider_id,
                agent.role
            );
            if let Some(task_id) = &agent.current_task_id {
                println!("  Task: {}", task_id);
            }
            Ok(())
        }
        AgentAction::List { output } => {
            let ctx = app.context(None);
            let agents = coordinator.list_agents(&ctx.session_id).await?;
            if output.json {
                render::print_json(Some("agents"), &agents)
            } else {
                render::print_agents(&agents);
                Ok(())
            }
        }
        AgentAction::Show { agent, output } => {
            let ctx = app.context(None);
            let details = coordinator.show_agent(&ctx.session_id, &agent).await?;
            if output.json {
                render::print_json(Some("agent"), &details)
            } else {
                render::print_agent_details(&details);
                Ok(())
            }
        }
        AgentAction::Stop { agent, output } => {
            let ctx = app.context(None);
            let report = coordinator.stop_agent(&ctx.session_id, &agent).await?;
            if output.json {
                render::print_json(None, &report)
            } else {
                render::print_stop(&report);
                Ok(())
            }
        }
    }
}

async fn cmd_message(app: &App, action: MessageAction) -> Result<()> {
    let coordinator = app.coordinator();

    match action {
        MessageAction::Send {
            to,
            from,
            text,
            file,
            kind,
            thread,
            related_task_id,
            reply_to,
            output,
        } => {
            let ctx = app.context(None);
            let request = SendMessage {
                to,
                text,
                file,
                from,
                kind,
                thread_id: thread,
                related_task_id,
                reply_to_message_id: reply_to,
            };
            let report = coordinator.send_message(&ctx, request).await?;
            if output.json {
                render::print_json(None, &report)
            } else {
                render::print_send(&report);
                Ok(())
            }
        }
        MessageAction::List { agent, output } => {
            let ctx = app.context(None);
            let messages = coordinator
                .list_messages(&ctx.session_id, agent.as_deref())
                .await?;
            if output.json {
                render::print_json(Some("messages"), &messages)
            } else {
                render::print_messages(&messages);
                Ok(())
            }
        }
    }
}

async fn cmd_task(app: &App, action: TaskAction) -> Result<()> {
    let coordinator = app.coordinator();
    let engine = coordinator.engine();

    match action {
        TaskAction::Get {
            agent,
            wait,
            no_wait,
            timeout,
            output,
        } => {
            let ctx = app.context(agent);
            let explicit_wait = match (wait, no_wait) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let context = engine
                .task_context(&ctx, explicit_wait, &app.wait_options(timeout))
                .await?;
            if output.json {
                render::print_json(None, &context)
            } else {
                render::print_task_context(&context);
                Ok(())
            }
        }
        TaskAction::List { agent, output } => {
            let ctx = app.context(None);
            let tasks = engine.list_tasks(&ctx.session_id, agent.as_deref()).await?;
            if output.json {
                render::print_json(Some("tasks"), &tasks)
            } else {
                render::print_tasks(&tasks);
                Ok(())
            }
        }
        TaskAction::Assign {
            agent,
            task,
            goal,
            title,
            status,
            priority,
            task_type,
            acceptance,
            depends_on,
            output,
        } => {
            let ctx = app.context(None);
            let target = coordinator.resolve_agent(&ctx.session_id, &agent).await?;
            let input = AssignTask {
                agent_id: target.id,
                task: Some(task),
                title,
                goal,
                status,
                priority,
                task_type,
                acceptance_criteria: acceptance,
                depends_on: depends_on.into_iter().map(DependencySpec::blocks).collect(),
            };
            let view = engine.assign_task(&ctx, input).await?;
            if output.json {
                return render::print_json(Some("task"), &view);
            }
            println!(
                "{} Assigned {} to {}",
                "✓".green(),
                view.id.bright_cyan(),
                view.agent_id
            );
            Ok(())
        }
        TaskAction::UpdateStatus {
            task,
            status,
            blocking_reason,
            result_summary,
            note,
            agent,
            output,
        } => {
            let ctx = app.context(agent);
            let update = StatusUpdate {
                task_id: task,
                status,
                note,
                blocking_reason,
                result_summary,
            };
            let view = engine.update_status(&ctx, update).await?;
            if output.json {
                render::print_json(Some("task"), &view)
            } else {
                render::print_task_change(&view);
                Ok(())
            }
        }
        TaskAction::Done {
            task,
            result_summary,
            note,
            agent,
            timeout,
            output,
        } => {
            let ctx = app.context(agent);
            let task_id = match task {
                Some(id) => id,
                None => {
                    let agent_id = ctx.require_agent()?;
                    engine
                        .current_task(&ctx.session_id, agent_id)
                        .await?
                        .map(|current| current.view.task.id)
                        .ok_or_else(|| {
                            SquadError::InvalidArgument(format!("{} has no current task", agent_id))
                        })?
                }
            };
            let result = engine
                .notify_done(
                    &ctx,
                    &task_id,
                    note.as_deref(),
                    result_summary.as_deref(),
                    &app.wait_options(timeout),
                )
                .await?;
            if output.json {
                render::print_json(None, &result)
            } else {
                render::print_finalize(&result);
                Ok(())
            }
        }
    }
}

async fn cmd_logs(app: &App, agent: &str, stream: LogStream, follow: bool) -> Result<()> {
    let ctx = app.context(None);
    let coordinator = app.coordinator();

    if !follow {
        let content = coordinator.read_logs(&ctx.session_id, agent, stream).await?;
        print!("{}", content);
        return Ok(());
    }

    let path = coordinator.log_path(&ctx.session_id, agent, stream).await?;
    let mut stdout = tokio::io::stdout();
    squad_agent::follow_log(&path, &mut stdout, FOLLOW_POLL, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            debug!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await?;
    Ok(())
}

async fn cmd_session(app: &App, action: SessionAction) -> Result<()> {
    match action {
        SessionAction::List { output } => {
            let sessions = app.coordinator().store().list_sessions().await?;
            if output.json {
                render::print_json(Some("sessions"), &sessions)
            } else {
                render::print_sessions(&sessions);
                Ok(())
            }
        }
    }
}

async fn cmd_store(app: &App, action: StoreAction) -> Result<()> {
    match action {
        StoreAction::Compact { collection, output } => {
            let ctx = app.context(None);
            let coordinator = app.coordinator();
            let targets: Vec<SnapshotCollection> = match collection {
                Some(c) => vec![c],
                None => SnapshotCollection::ALL.to_vec(),
            };

            let mut results = Vec::with_capacity(targets.len());
            for target in targets {
                let stats = coordinator.store().compact(&ctx.session_id, target).await?;
                results.push((target, stats));
            }

            if output.json {
                let summary: serde_json::Map<String, serde_json::Value> = results
                    .iter()
                    .map(|(c, stats)| {
                        (
                            c.file_name().trim_end_matches(".jsonl").to_string(),
                            serde_json::json!({
                                "rowsBefore": stats.rows_before,
                                "rowsAfter": stats.rows_after,
                            }),
                        )
                    })
                    .collect();
                render::print_json(Some("compacted"), &summary)
            } else {
                render::print_compaction(&results);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_task_get_wait_flags() {
        let cli = Cli::try_parse_from(["agentsquad", "task", "get", "--no-wait", "--timeout", "5"]).unwrap();
        match cli.command {
            Commands::Task {
                action: TaskAction::Get { wait, no_wait, timeout, .. },
            } => {
                assert!(!wait);
                assert!(no_wait);
                assert_eq!(timeout, Some(5));
            }
            _ => panic!("expected task get"),
        }

        let conflict = Cli::try_parse_from(["agentsquad", "task", "get", "--wait", "--no-wait"]);
        assert!(conflict.is_err());
    }

    #[test]
    fn test_wire_values_parse_into_enums() {
        let cli = Cli::try_parse_from([
            "agentsquad",
            "--session",
            "s1",
            "task",
            "update-status",
            "--task",
            "task-1",
            "--status",
            "in_review",
        ])
        .unwrap();
        assert_eq!(cli.session.as_deref(), Some("s1"));
        match cli.command {
            Commands::Task {
                action: TaskAction::UpdateStatus { status, .. },
            } => assert_eq!(status, TaskStatus::InReview),
            _ => panic!("expected task update-status"),
        }

        let bad = Cli::try_parse_from([
            "agentsquad",
            "task",
            "update-status",
            "--task",
            "task-1",
            "--status",
            "finished",
        ]);
        assert!(bad.is_err());
    }

    #[test]
    fn test_agent_run_collects_repeated_flags() {
        let cli = Cli::try_parse_from([
            "agentsquad",
            "agent",
            "run",
            "--provider",
            "codex",
            "--env",
            "A=1",
            "--env",
            "B=2",
            "--depends-on",
            "task-1",
            "--type",
            "testing",
        ])
        .unwrap();
        match cli.command {
            Commands::Agent {
                action:
                    AgentAction::Run {
                        env,
                        depends_on,
                        task_type,
                        ..
                    },
            } => {
                assert_eq!(env, vec!["A=1", "B=2"]);
                assert_eq!(depends_on, vec!["task-1"]);
                assert_eq!(task_type, Some(TaskType::Testing));
            }
            _ => panic!("expected agent run"),
        }
    }

    #[test]
    fn test_store_compact_collection_name() {
        let cli = Cli::try_parse_from(["agentsquad", "store", "compact", "--collection", "agents"]).unwrap();
        match cli.command {
            Commands::Store {
                action: StoreAction::Compact { collection, .. },
            } => assert_eq!(collection, Some(SnapshotCollection::Agents)),
            _ => panic!("expected store compact"),
        }
    }
}
