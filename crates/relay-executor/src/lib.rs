pub mod safety;

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use relay_core::error::{RelayError, Result};

/// One invocation of the agent runtime against a project.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Command used to invoke the agent runtime (config `agent.command`).
    pub command: String,
    pub project_root: String,
    pub prompt: String,
    pub model: Option<String>,
    pub timeout_ms: u64,
    pub max_turns: u32,
}

/// Result of a completed agent run, including a best-effort diff summary.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub content: String,
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    pub num_turns: u32,
    pub model: Option<String>,
    pub diff_stat: Option<String>,
}

/// Timeout for capturing `git diff --stat` after a run — a hung repo state
/// shouldn't block the agent's reply from being posted.
const DIFF_STAT_TIMEOUT: Duration = Duration::from_secs(5);

/// Spawn the agent runtime as a child process, write `req.prompt` to its
/// stdin, and parse its JSON result — same shape as the Claude CLI's
/// `-p --output-format json` contract.
///
/// `cancel` is observed at the one boundary this single-shot process model
/// offers: while waiting on the child. Firing it kills the child and
/// returns [`RelayError::Aborted`]. The runtime's `-p --output-format json`
/// contract yields one JSON blob at exit rather than an incremental token
/// stream, so there is no intermediate text to forward to a caller — this
/// is why `execute` takes no `onText`-style callback.
#[instrument(skip(req, cancel), fields(project = %req.project_root))]
pub async fn execute(req: &RunRequest, cancel: &CancellationToken) -> Result<RunOutcome> {
    let started = tokio::time::Instant::now();

    let mut cmd = tokio::process::Command::new(&req.command);
    cmd.current_dir(&req.project_root)
        .arg("-p")
        .arg("--output-format")
        .arg("json")
        .arg("--max-turns")
        .arg(req.max_turns.to_string())
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    if let Some(model) = &req.model {
        cmd.arg("--model").arg(model);
    }

    debug!(command = %req.command, prompt_len = req.prompt.len(), "spawning agent run");

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            RelayError::Internal(format!(
                "agent command '{}' not found — check agent.command in relay.toml",
                req.command
            ))
        } else {
            RelayError::Internal(format!("failed to spawn agent run: {e}"))
        }
    })?;

    if let Some(mut stdin) = child.stdin.take() {
        use tokio::io::AsyncWriteExt;
        stdin
            .write_all(req.prompt.as_bytes())
            .await
            .map_err(|e| RelayError::Internal(format!("failed to write agent stdin: {e}")))?;
    }

    let output = tokio::select! {
        result = tokio::time::timeout(
            Duration::from_millis(req.timeout_ms),
            child.wait_with_output(),
        ) => {
            result
                .map_err(|_| RelayError::Timeout { ms: req.timeout_ms })?
                .map_err(|e| RelayError::Internal(format!("agent run process error: {e}")))?
        }
        _ = cancel.cancelled() => {
            return Err(RelayError::Aborted);
        }
    };

    let duration_ms = started.elapsed().as_millis() as u64;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RelayError::Internal(format!(
            "agent run exited with code {}: {stderr}",
            output.status.code().unwrap_or(1)
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed = parse_agent_output(&stdout, duration_ms, req.model.clone())?;

    let diff_stat = capture_diff_stat(&req.project_root).await;

    Ok(RunOutcome {
        diff_stat,
        ..parsed
    })
}

fn parse_agent_output(stdout: &str, duration_ms: u64, model: Option<String>) -> Result<RunOutcome> {
    let json: serde_json::Value = serde_json::from_str(stdout).map_err(|e| {
        RelayError::Internal(format!(
            "failed to parse agent run JSON: {e}\nraw output: {}",
            truncate(stdout, 500)
        ))
    })?;

    if json.get("is_error").and_then(|v| v.as_bool()).unwrap_or(false) {
        let msg = json
            .get("result")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error from agent run");
        return Err(RelayError::Internal(msg.to_string()));
    }

    let content = json.get("result").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let cost_usd = json.get("cost_usd").and_then(|v| v.as_f64()).unwrap_or(0.0);
    let input_tokens = json.pointer("/usage/input_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
    let output_tokens = json.pointer("/usage/output_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
    let num_turns = json.get("num_turns").and_then(|v| v.as_u64()).unwrap_or(1) as u32;

    Ok(RunOutcome {
        content,
        cost_usd,
        input_tokens,
        output_tokens,
        duration_ms,
        num_turns,
        model,
        diff_stat: None,
    })
}

/// Best-effort `git diff --stat` for the project, bounded by
/// [`DIFF_STAT_TIMEOUT`]. Returns `None` on any failure — a missing diff
/// summary should never block posting the agent's reply.
async fn capture_diff_stat(project_root: &str) -> Option<String> {
    let run = async {
        let output = tokio::process::Command::new("git")
            .arg("diff")
            .arg("--stat")
            .current_dir(project_root)
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let stat = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if stat.is_empty() {
            None
        } else {
            Some(stat)
        }
    };

    match tokio::time::timeout(DIFF_STAT_TIMEOUT, run).await {
        Ok(result) => result,
        Err(_) => {
            warn!(project_root, "git diff --stat timed out");
            None
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        &s[..max]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_agent_output_extracts_fields() {
        let raw = r#"{"result":"hello","cost_usd":0.05,"usage":{"input_tokens":10,"output_tokens":20}}"#;
        let outcome = parse_agent_output(raw, 1234, Some("claude-3".to_string())).unwrap();
        assert_eq!(outcome.content, "hello");
        assert_eq!(outcome.input_tokens, 10);
        assert_eq!(outcome.output_tokens, 20);
        assert_eq!(outcome.duration_ms, 1234);
        assert_eq!(outcome.model.as_deref(), Some("claude-3"));
    }

    #[test]
    fn parse_agent_output_surfaces_is_error() {
        let raw = r#"{"is_error":true,"result":"boom"}"#;
        let err = parse_agent_output(raw, 0, None).unwrap_err();
        assert!(matches!(err, RelayError::Internal(ref msg) if msg == "boom"));
    }

    #[test]
    fn parse_agent_output_rejects_invalid_json() {
        assert!(parse_agent_output("not json", 0, None).is_err());
    }
}
