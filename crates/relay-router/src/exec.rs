//! `executeAndPost`: the single run performed under a pool slot (spec §4.3).
//!
//! Shaped the same way as `skynet_gateway::http::chat::chat_handler`'s
//! register-token / run-pipeline / always-unregister flow, generalised to
//! cover context assembly, sanitize+chunk posting, run-row bookkeeping, and
//! notification fan-out around the executor call.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use relay_channels::{ChannelManager, MessageFormat, OutboundMessage};
use relay_core::config::{AgentConfig, ContextConfig};
use relay_core::types::{Binding, ChatMessage, RelayRun, RelayRunPatch, RunStatus};
use relay_executor::RunRequest;
use relay_notify::Notifier;
use relay_store::RelayStore;

use crate::abort::AbortRegistry;

/// Shared dependencies an enqueued run needs. Bundled behind `Arc` so the
/// `'static` closure handed to `AgentPool::enqueue` can own a cheap clone.
pub struct ExecDeps {
    pub store: Arc<RelayStore>,
    pub channels: Arc<ChannelManager>,
    pub notifier: Arc<Notifier>,
    pub aborts: Arc<AbortRegistry>,
    pub agent: AgentConfig,
    pub context: ContextConfig,
}

/// One unit of work: reply to `incoming` in the context of `binding`,
/// topped up with whatever the caller already fetched live from the
/// platform, then mark `pending_id`'s WAL row done.
pub struct ExecJob {
    pub binding: Binding,
    pub incoming: ChatMessage,
    pub platform_top_up: Vec<ChatMessage>,
    pub pending_id: String,
}

#[instrument(skip(deps, job), fields(project = %job.binding.project, conversation_id = %job.incoming.conversation_id))]
pub async fn execute_and_post(deps: Arc<ExecDeps>, job: ExecJob) {
    let run_id = Uuid::new_v4().to_string();
    let conversation_id = job.incoming.conversation_id.clone();
    let cancel = deps.aborts.register(&conversation_id);

    let run = RelayRun {
        id: run_id.clone(),
        platform: job.incoming.platform,
        channel_id: job.incoming.channel_id.clone(),
        conversation_id: conversation_id.clone(),
        project: job.binding.project.clone(),
        user_id: job.incoming.user_id.clone(),
        started_at: Utc::now(),
        completed_at: None,
        status: RunStatus::Running,
        cost_usd: 0.0,
        input_tokens: 0,
        output_tokens: 0,
        duration_ms: 0,
        model: None,
    };
    if let Err(e) = deps.store.record_relay_run(&run) {
        error!(error = %e, run_id, "failed to record relay run");
    }

    let outcome = run_once(&deps, &job, &cancel).await;

    deps.aborts.unregister(&conversation_id);
    if let Err(e) = deps.store.mark_pending_status(&job.pending_id, relay_core::types::PendingStatus::Done) {
        error!(error = %e, pending_id = %job.pending_id, "failed to mark pending message done");
    }

    let completed_at = Utc::now();
    let mut final_run = run;
    final_run.completed_at = Some(completed_at);
    match &outcome {
        Ok(o) => {
            final_run.status = RunStatus::Completed;
            final_run.cost_usd = o.cost_usd;
            final_run.input_tokens = o.input_tokens;
            final_run.output_tokens = o.output_tokens;
            final_run.duration_ms = o.duration_ms;
            final_run.model = o.model.clone();
        }
        Err(_) => final_run.status = RunStatus::Failed,
    }

    let patch = RelayRunPatch {
        completed_at: Some(completed_at),
        status: Some(final_run.status),
        cost_usd: Some(final_run.cost_usd),
        input_tokens: Some(final_run.input_tokens),
        output_tokens: Some(final_run.output_tokens),
        duration_ms: Some(final_run.duration_ms),
        model: final_run.model.clone(),
    };
    if let Err(e) = deps.store.update_relay_run(&run_id, &patch) {
        error!(error = %e, run_id, "failed to update relay run");
    }

    deps.notifier.notify_schedule_result(&job.binding.project, &final_run).await;

    if let Err(e) = outcome {
        warn!(run_id, error = %e, "agent run failed");
    }
}

async fn run_once(
    deps: &ExecDeps,
    job: &ExecJob,
    cancel: &tokio_util::sync::CancellationToken,
) -> relay_core::error::Result<relay_executor::RunOutcome> {
    let assembled = relay_context::assemble_context(
        &deps.store,
        &deps.context,
        &job.binding.project,
        &job.incoming.platform.to_string(),
        &job.incoming.conversation_id,
        &job.incoming,
        &job.platform_top_up,
    )?;

    if assembled.stale {
        post_text(
            deps,
            job,
            &format!(
                "thread inactive for {}+ days; starting fresh",
                deps.context.stale_thread_days
            ),
        )
        .await;
    }

    let request = RunRequest {
        command: deps.agent.command.clone(),
        project_root: job.binding.project.clone(),
        prompt: assembled.prompt,
        model: None,
        timeout_ms: deps.agent.default_timeout_ms,
        max_turns: deps.agent.max_turns,
    };

    // `relay_executor::execute` has no `onText` callback (the runtime yields
    // one JSON blob at exit, not an incremental stream), so the handle never
    // sees an `append` — it exists only to let the adapter post a message
    // once up front and edit it in place at the end instead of posting a
    // fresh message.
    let stream = deps
        .channels
        .start_stream(
            &job.incoming.platform.to_string(),
            &job.incoming.channel_id,
            Some(&job.incoming.conversation_id),
        )
        .await;

    let outcome = relay_executor::execute(&request, cancel).await?;

    let project_env = read_project_env(&job.binding.project);
    let sanitized = relay_sanitize::sanitize(&outcome.content, &project_env);
    let max_len = deps
        .channels
        .capabilities(&job.incoming.platform.to_string())
        .await
        .map(|c| c.max_message_len)
        .unwrap_or(3500);
    let chunks = relay_sanitize::chunk_with_numbering(&sanitized, max_len);

    match stream {
        Some(Ok(mut handle)) => handle.stop(Some(&sanitized)).await,
        Some(Err(e)) => {
            warn!(error = %e, "failed to open streaming handle, falling back to chunked post");
            for chunk in &chunks {
                post_text(deps, job, chunk).await;
            }
        }
        None => {
            for chunk in &chunks {
                post_text(deps, job, chunk).await;
            }
        }
    }
    if let Some(diff) = &outcome.diff_stat {
        post_text(deps, job, &format!("```\n{diff}\n```")).await;
    }
    let footer = relay_sanitize::format_cost_footer(
        outcome.model.as_deref(),
        outcome.cost_usd,
        outcome.input_tokens,
        outcome.output_tokens,
        outcome.duration_ms,
        outcome.num_turns,
    );
    post_text(deps, job, &footer).await;

    info!(run_id = %job.incoming.conversation_id, chunks = chunks.len(), "posted agent run output");
    Ok(outcome)
}

/// Best-effort `KEY=VALUE` read of the project's `.env` file, feeding the
/// literal-value redaction pass in `relay_sanitize::sanitize`. Absent or
/// unreadable files yield an empty map rather than failing the run — env
/// redaction is a defense in depth, not a prerequisite for posting output.
fn read_project_env(project_root: &str) -> std::collections::HashMap<String, String> {
    let path = std::path::Path::new(project_root).join(".env");
    let Ok(contents) = std::fs::read_to_string(&path) else {
        return std::collections::HashMap::new();
    };
    contents
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let (key, value) = line.split_once('=')?;
            Some((key.trim().to_string(), value.trim().trim_matches('"').to_string()))
        })
        .collect()
}

async fn post_text(deps: &ExecDeps, job: &ExecJob, content: &str) {
    let msg = OutboundMessage {
        platform: job.incoming.platform,
        channel_id: job.incoming.channel_id.clone(),
        conversation_id: job.incoming.conversation_id.clone(),
        content: content.to_string(),
        format: MessageFormat::Markdown,
    };
    match deps.channels.send(&job.incoming.platform.to_string(), &msg).await {
        Some(Ok(_)) => {}
        Some(Err(e)) => error!(error = %e, "failed to post message to channel"),
        None => warn!(platform = %job.incoming.platform, "no channel adapter registered for platform"),
    }
}
