//! Message queueing and delivery.
//!
//! Every message is written to the log and the target's inbox first. Oneshot
//! providers are then invoked synchronously and the outcome is recorded; for
//! detached agents the message stays queued in the inbox.

use crate::coordinator::Coordinator;
use crate::provider::{Delivery, DeliveryRequest};
use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use squad_core::ids::{self, new_id};
use squad_core::{
    CallerContext, DeliveryStatus, LogLevel, Message, MessageKind, OutboxEntry, ProviderMode,
    Result, SenderType, SquadError,
};
use squad_store::jsonl::append_jsonl;
use squad_store::{ActivityEntry, SnapshotCollection};
use std::path::PathBuf;
use std::sync::LazyLock;
use tracing::{info, instrument, warn};

static SEPARATOR_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)séparateur|separator").expect("constant regex pattern is valid"));
static POWERSHELL_PARSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ParserError|InvalidEndOfLine").expect("constant regex pattern is valid"));
static EXIT_STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bexited\s+[1-9]").expect("constant regex pattern is valid"));
static FAILURE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error|failed|exception|exited\s+[1-9]").expect("constant regex pattern is valid")
});

/// Input of [`Coordinator::send_message`].
#[derive(Debug, Clone, Default)]
pub struct SendMessage {
    /// Target agent id or name
    pub to: String,
    pub text: Option<String>,
    /// Read when `text` is absent
    pub file: Option<PathBuf>,
    /// Sending agent id or name; defaults to the caller's agent
    pub from: Option<String>,
    pub kind: MessageKind,
    pub thread_id: Option<String>,
    pub related_task_id: Option<String>,
    pub reply_to_message_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReport {
    pub message: Message,
    /// Delivery left queued for a detached agent
    pub deferred: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl Coordinator {
    /// Queue a message and, for oneshot providers, deliver it right away.
    ///
    /// A provider that fails is recorded on the message; only bookkeeping
    /// failures are returned as errors.
    #[instrument(skip(self, ctx, request), fields(session = %ctx.session_id, to = %request.to))]
    pub async fn send_message(&self, ctx: &CallerContext, request: SendMessage) -> Result<SendReport> {
        let session_id = ctx.session_id.as_str();
        let text = message_text(&request).await?;

        let target = self.resolve_agent(session_id, &request.to).await?;
        let source = match request.from.as_deref().or(ctx.agent_id.as_deref()) {
            Some(reference) => Some(self.resolve_agent(session_id, reference).await?),
            None => None,
        };
        let source_id = source.as_ref().map(|agent| agent.id.clone());

        let mut message = Message {
            id: new_id(ids::MESSAGE),
            session_id: session_id.to_string(),
            thread_id: request.thread_id,
            from: source_id.clone(),
            from_type: if source_id.is_some() {
                SenderType::Agent
            } else {
                SenderType::User
            },
            to: target.id.clone(),
            message_kind: request.kind,
            text,
            delivery_status: DeliveryStatus::Queued,
            related_task_id: request.related_task_id,
            reply_to_message_id: request.reply_to_message_id,
            delivery: None,
            created_at: Utc::now(),
            delivered_at: None,
            read_at: None,
        };

        self.store()
            .append_snapshot(session_id, SnapshotCollection::Messages, &message)
            .await?;
        let paths = self.workspace().ensure_agent(session_id, &target.id).await?;
        append_jsonl(&paths.inbox, &message).await?;

        let sender = source_id.as_deref().unwrap_or("user");
        self.journal()
            .append_event(
                session_id,
                "message.queued",
                json!({ "messageId": message.id, "from": sender }),
                Some(&target.id),
            )
            .await?;
        self.journal()
            .log(
                ActivityEntry::new(
                    session_id,
                    "message.queue",
                    format!("{} -> {}: {}", sender, target.id, message.message_kind),
                )
                .agent(source_id.as_deref())
                .details(json!({ "messageId": message.id })),
            )
            .await?;

        if target.mode == ProviderMode::Detached {
            self.journal()
                .append_event(
                    session_id,
                    "message.deferred",
                    json!({ "messageId": message.id }),
                    Some(&target.id),
                )
                .await?;
            info!("Queued {} for detached {}", message.id, target.id);
            return Ok(SendReport {
                message,
                deferred: true,
                failure_reason: None,
            });
        }

        let provider_config = self
            .config()
            .resolve_provider(&target.provider_id, target.profile.as_deref())?;
        let provider = self.providers().get(&target.provider_id)?;
        let delivery = provider
            .deliver(DeliveryRequest {
                agent: &target,
                config: &provider_config,
                message: &message,
                paths: &paths,
                workspace_root: self.workspace().project_root(),
            })
            .await?;

        self.log_output(session_id, &target.id, &delivery).await?;

        let delivered_at = Utc::now();
        let ok = delivery.outcome.ok;
        message.delivery_status = if ok {
            DeliveryStatus::Delivered
        } else {
            DeliveryStatus::Failed
        };
        message.delivery = Some(delivery.outcome.clone());
        message.delivered_at = Some(delivered_at);
        self.store()
            .append_snapshot(session_id, SnapshotCollection::Messages, &message)
            .await?;
        append_jsonl(
            &paths.outbox,
            &OutboxEntry {
                id: new_id(ids::DELIVERY),
                message_id: message.id.clone(),
                timestamp: delivered_at,
                delivery: delivery.outcome.clone(),
            },
        )
        .await?;

        let code = delivery.outcome.code;
        let signal = delivery.outcome.signal.clone();
        self.journal()
            .append_event(
                session_id,
                if ok {
                    "message.delivered"
                } else {
                    "message.delivery_failed"
                },
                json!({
                    "messageId": message.id,
                    "providerId": target.provider_id,
                    "code": code,
                    "signal": signal,
                }),
                Some(&target.id),
            )
            .await?;

        let kind = message.message_kind;
        let (level, summary) = if ok {
            (LogLevel::Info, format!("{} received: {}", target.id, kind))
        } else {
            (LogLevel::Error, format!("{} failed delivery: {}", target.id, kind))
        };
        self.journal()
            .log(
                ActivityEntry::new(session_id, "message.delivery", summary)
                    .agent(Some(&target.id))
                    .level(level)
                    .details(json!({ "messageId": message.id, "code": code, "signal": signal })),
            )
            .await?;

        let failure_reason = if ok {
            None
        } else {
            let reason = summarize_delivery_failure(&target.provider_id, &delivery.stderr_lines)
                .or_else(|| summarize_delivery_failure(&target.provider_id, &delivery.stdout_lines));
            if let Some(reason) = &reason {
                warn!("{} failure reason: {}", target.id, reason);
            }
            reason
        };

        Ok(SendReport {
            message,
            deferred: false,
            failure_reason,
        })
    }

    /// Record each non-blank output line of a delivery as activity.
    async fn log_output(&self, session_id: &str, agent_id: &str, delivery: &Delivery) -> Result<()> {
        for line in delivery.stdout_lines.iter().filter(|l| !l.trim().is_empty()) {
            self.journal()
                .log(
                    ActivityEntry::new(session_id, "agent.stdout", format!("{} output: {}", agent_id, line))
                        .agent(Some(agent_id)),
                )
                .await?;
        }
        for line in delivery.stderr_lines.iter().filter(|l| !l.trim().is_empty()) {
            self.journal()
                .log(
                    ActivityEntry::new(session_id, "agent.stderr", format!("{} error: {}", agent_id, line))
                        .agent(Some(agent_id))
                        .level(LogLevel::Warning),
                )
                .await?;
        }
        Ok(())
    }

    /// Messages of a session by creation time, optionally those to or from one agent.
    pub async fn list_messages(&self, session_id: &str, agent_id: Option<&str>) -> Result<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .store()
            .read_snapshots(session_id, SnapshotCollection::Messages)
            .await?;
        if let Some(agent) = agent_id {
            messages.retain(|m| m.to == agent || m.from.as_deref() == Some(agent));
        }
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }
}

async fn message_text(request: &SendMessage) -> Result<String> {
    if let Some(text) = request.text.as_ref().filter(|t| !t.is_empty()) {
        return Ok(text.clone());
    }
    match &request.file {
        Some(path) => {
            let text = tokio::fs::read_to_string(path).await?;
            if text.is_empty() {
                Err(SquadError::MessageEmpty)
            } else {
                Ok(text)
            }
        }
        None => Err(SquadError::MessageEmpty),
    }
}

/// One-line explanation of a failed delivery, from the provider's output.
///
/// Codex output gets hints for known Windows PowerShell pitfalls. Otherwise
/// the first line that looks like an error wins, then the first line.
pub fn summarize_delivery_failure(provider_id: &str, lines: &[String]) -> Option<String> {
    let lines: Vec<&str> = lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();

    if provider_id == "codex" {
        if lines
            .iter()
            .any(|l| l.contains("&&") && SEPARATOR_HINT.is_match(l))
        {
            return Some(
                "Likely cause: Codex ran a PowerShell command with `&&`, which Windows PowerShell does not support. Use `;` instead."
                    .to_string(),
            );
        }
        if lines.iter().any(|l| POWERSHELL_PARSE.is_match(l)) {
            return Some(
                "Likely cause: the generated PowerShell command has invalid shell syntax for Windows PowerShell."
                    .to_string(),
            );
        }
        if let Some(line) = lines.iter().find(|l| EXIT_STATUS.is_match(l)) {
            return Some(format!("Provider command failed: {}", line));
        }
    }

    lines
        .iter()
        .find(|l| FAILURE_LINE.is_match(l))
        .or_else(|| lines.first())
        .map(|l| l.to_string())
}
