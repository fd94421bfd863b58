//! Human-readable output. `--json` bypasses everything here.

use anyhow::Result;
use colored::{ColoredString, Colorize};
use serde::Serialize;
use serde_json::{Map, Value};
use squad_agent::{AgentDetails, ProviderStatus, SendReport, StopReport};
use squad_core::{
    ActivityLog, Agent, AgentStatus, DeliveryStatus, Event, LogLevel, Message, Session, TaskStatus,
};
use squad_store::{ActivityReporter, CompactStats, SnapshotCollection};
use squad_tasks::{FinalizeResult, TaskContext, TaskView};

/// Print `{"status": "ok", <key>: value}`.
///
/// Without a key, the fields of `value` are merged into the envelope.
pub fn print_json<T: Serialize>(key: Option<&str>, value: &T) -> Result<()> {
    let mut envelope = Map::new();
    envelope.insert("status".to_string(), Value::from("ok"));
    match (key, serde_json::to_value(value)?) {
        (None, Value::Object(fields)) => envelope.extend(fields),
        (Some(key), other) => {
            envelope.insert(key.to_string(), other);
        }
        (None, other) => {
            envelope.insert("result".to_string(), other);
        }
    }
    println!("{}", serde_json::to_string_pretty(&Value::Object(envelope))?);
    Ok(())
}

/// Streams activity lines to stderr while a command runs.
pub struct ConsoleReporter;

impl ActivityReporter for ConsoleReporter {
    fn report(&self, entry: &ActivityLog) {
        let message = match entry.level {
            LogLevel::Error => entry.message.red(),
            LogLevel::Warning => entry.message.yellow(),
            LogLevel::Debug => entry.message.bright_black(),
            LogLevel::Info => entry.message.normal(),
        };
        eprintln!("{} {}", format!("[{}]", entry.kind).bright_black(), message);
    }
}

fn agent_status(status: AgentStatus) -> ColoredString {
    match status {
        AgentStatus::Running | AgentStatus::Idle => status.as_str().green(),
        AgentStatus::Starting | AgentStatus::Created => status.as_str().cyan(),
        AgentStatus::Failed => status.as_str().red(),
        _ => status.as_str().bright_black(),
    }
}

fn task_status(status: TaskStatus) -> ColoredString {
    match status {
        TaskStatus::Done => status.as_str().green(),
        TaskStatus::InProgress | TaskStatus::InReview => status.as_str().cyan(),
        TaskStatus::Waiting | TaskStatus::Blocked => status.as_str().yellow(),
        TaskStatus::Failed | TaskStatus::Cancelled => status.as_str().red(),
        _ => status.as_str().normal(),
    }
}

fn delivery_status(status: DeliveryStatus) -> ColoredString {
    match status {
        DeliveryStatus::Delivered => status.as_str().green(),
        DeliveryStatus::Failed => status.as_str().red(),
        _ => status.as_str().yellow(),
    }
}

pub fn print_providers(providers: &[ProviderStatus]) {
    if providers.is_empty() {
        println!("No providers configured.");
        return;
    }
    for provider in providers {
        let availability = if provider.available {
            "available".green()
        } else {
            "missing".red()
        };
        println!(
            "{} ({}) -> {} {}",
            provider.id.bright_cyan(),
            availability,
            provider.command,
            format!("[{}, {}]", provider.mode, provider.transport).bright_black()
        );
    }
}

pub fn print_agents(agents: &[Agent]) {
    if agents.is_empty() {
        println!("No agents found.");
        return;
    }

    println!(
        "{:<32} {:<10} {:<12} {:<14} {}",
        "ID".bold(),
        "STATUS".bold(),
        "PROVIDER".bold(),
        "ROLE".bold(),
        "TASK".bold()
    );
    println!("{}", "─".repeat(90));
    for agent in agents {
        println!(
            "{:<32} {:<10} {:<12} {:<14} {}",
            agent.id.bright_cyan(),
            agent_status(agent.status),
            agent.provider_id,
            agent.role,
            agent.current_task_id.as_deref().unwrap_or("-").bright_black()
        );
    }
}

pub fn print_agent_details(details: &AgentDetails) {
    let agent = &details.agent;
    println!("{} {}", agent.id.bright_cyan().bold(), format!("({})", agent.name).bright_black());
    println!("  Status:   {}", agent_status(agent.status));
    println!("  Kind:     {}", agent.kind);
    println!("  Role:     {}", agent.role);
    println!(
        "  Provider: {}{}",
        agent.provider_id,
        agent
            .profile
            .as_deref()
            .map(|p| format!(" (profile {})", p))
            .unwrap_or_default()
    );
    println!("  Mode:     {}", agent.mode);
    println!("  Goal:     {}", agent.goal);
    println!("  Workdir:  {}", agent.workdir.display());
    if let Some(pid) = agent.pid {
        println!("  Pid:      {}", pid);
    }

    if let Some(task) = &details.task {
        println!();
        println!("{}", "Current task".bold());
        println!("  {} [{}] {}", task.id, task_status(task.status), task.title);
    }

    if !details.runs.is_empty() {
        println!();
        println!("{}", "Runs".bold());
        for run in &details.runs {
            let exit = match (run.exit_code, &run.exit_signal) {
                (Some(code), _) => format!("exit {}", code),
                (None, Some(signal)) => signal.clone(),
                (None, None) => "-".to_string(),
            };
            println!(
                "  {} {} {} {}",
                run.id.bright_black(),
                format!("{:?}", run.status).to_lowercase(),
                run.started_at.format("%Y-%m-%d %H:%M:%S"),
                exit
            );
        }
    }
}

pub fn print_stop(report: &StopReport) {
    if report.stopped {
        println!("{} {}", "✓".green(), report.message);
    } else {
        println!("{}", report.message.yellow());
    }
}

pub fn print_send(report: &SendReport) {
    let message = &report.message;
    println!(
        "{} -> {} ({})",
        message.id.bright_cyan(),
        message.to,
        delivery_status(message.delivery_status)
    );
    if report.deferred {
        println!("{}", "Target runs detached; message left in its inbox.".bright_black());
    }
    if let Some(reason) = &report.failure_reason {
        println!("  {} {}", "reason:".red(), reason);
    }
}

pub fn print_messages(messages: &[Message]) {
    if messages.is_empty() {
        println!("No messages found.");
        return;
    }
    for message in messages {
        println!(
            "{} {} -> {} [{}] {}",
            message.id.bright_black(),
            message.from.as_deref().unwrap_or("user"),
            message.to,
            delivery_status(message.delivery_status),
            message.message_kind
        );
    }
}

pub fn print_task_context(context: &TaskContext) {
    let agent = &context.agent;
    let Some(current) = &context.task else {
        println!("{} ({}) has no active task.", agent.id.bright_cyan(), agent.role);
        return;
    };
    let task = &current.view;

    println!("{} ({})", agent.id.bright_cyan().bold(), agent.role);
    println!("Goal: {}", agent.goal);
    println!("Task: {} {}", task.title, format!("({})", task.id).bright_black());
    println!("Status: {}", task_status(task.status));
    println!("Details: {}", task.description);
    if let Some(criteria) = &task.acceptance_criteria {
        println!("Acceptance: {}", criteria);
    }

    if !task.blocking_tasks.is_empty() {
        println!();
        println!("{}", "Waiting on".yellow().bold());
        for dep in &task.blocking_tasks {
            println!(
                "  {} {} [{}] {}",
                dep.dependency.depends_on_task_id,
                dep.depends_on_agent_id.as_deref().unwrap_or("-"),
                dep.depends_on_task_status
                    .map(|s| s.as_str())
                    .unwrap_or("unknown"),
                dep.depends_on_task_title.as_deref().unwrap_or("")
            );
        }
    }

    if !current.available_agents.is_empty() {
        println!();
        println!("{}", "Other agents".bold());
        for other in &current.available_agents {
            println!(
                "  {:<32} {:<12} {}",
                other.id,
                other.role,
                match (&other.task_title, other.task_status) {
                    (Some(title), Some(status)) => format!("{} [{}]", title, status),
                    (Some(title), None) => title.clone(),
                    _ => "-".to_string(),
                }
            );
        }
    }
}

pub fn print_tasks(tasks: &[TaskView]) {
    if tasks.is_empty() {
        println!("No tasks found.");
        return;
    }

    println!(
        "{:<24} {:<28} {:<12} {:<14} {}",
        "ID".bold(),
        "AGENT".bold(),
        "STATUS".bold(),
        "TYPE".bold(),
        "TITLE".bold()
    );
    println!("{}", "─".repeat(100));
    for task in tasks {
        println!(
            "{:<24} {:<28} {:<12} {:<14} {}",
            task.id.bright_cyan(),
            task.agent_id,
            task_status(task.status),
            task.task_type,
            task.title
        );
    }
}

pub fn print_task_change(task: &TaskView) {
    println!("{} -> {}", task.id.bright_cyan(), task_status(task.status));
    if let Some(reason) = &task.blocking_reason {
        println!("  {} {}", "blocked:".yellow(), reason);
    }
}

pub fn print_finalize(result: &FinalizeResult) {
    match &result.task {
        Some(task) => println!(
            "{} {} ({})",
            task.id.bright_cyan(),
            result.outcome.as_str().bold(),
            task_status(task.status)
        ),
        None => println!("{}", result.outcome.as_str().bold()),
    }
    if !result.pending_dependent_task_ids.is_empty() {
        println!("  pending validators: {}", result.pending_dependent_task_ids.join(", "));
    }
    for feedback in &result.feedback {
        println!(
            "  {} {} ({}): {}",
            "feedback".yellow(),
            feedback.task_id,
            feedback.agent_id,
            feedback.message
        );
    }
}

pub fn print_events(events: &[Event]) {
    if events.is_empty() {
        println!("No events found.");
        return;
    }
    for event in events {
        println!(
            "{} {}{}",
            event.timestamp.to_rfc3339().bright_black(),
            event.event_type,
            event
                .agent_id
                .as_deref()
                .map(|a| format!(" {}", a.bright_cyan()))
                .unwrap_or_default()
        );
    }
}

pub fn print_activity(entries: &[ActivityLog]) {
    if entries.is_empty() {
        println!("No activity found.");
        return;
    }
    for entry in entries {
        let level = match entry.level {
            LogLevel::Error => entry.level.as_str().red(),
            LogLevel::Warning => entry.level.as_str().yellow(),
            _ => entry.level.as_str().bright_black(),
        };
        println!(
            "{} {:<7} {:<18} {}",
            entry.created_at.format("%H:%M:%S").to_string().bright_black(),
            level,
            entry.kind,
            entry.message
        );
    }
}

pub fn print_sessions(sessions: &[Session]) {
    if sessions.is_empty() {
        println!("No sessions found.");
        return;
    }
    for session in sessions {
        println!(
            "{:<20} {:<10} {} {}",
            session.id.bright_cyan(),
            session.status,
            session.title,
            session.updated_at.format("%Y-%m-%d %H:%M").to_string().bright_black()
        );
    }
}

pub fn print_compaction(results: &[(SnapshotCollection, CompactStats)]) {
    for (collection, stats) in results {
        println!(
            "{:<20} {} -> {} rows",
            collection.file_name(),
            stats.rows_before,
            stats.rows_after
        );
    }
}
