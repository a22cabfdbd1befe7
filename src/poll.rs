use crate::http::ApiError;
use base64::Engine; // for URL_SAFE_NO_PAD.encode/decode
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::io::Write;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Per-invocation state for one wait-tool call. Created from request
/// parameters, lives for exactly one polling loop, never persisted.
#[derive(Debug, Clone)]
pub struct WaitContext {
    pub owner: String,
    pub repo: String,
    pub pull_number: i64,
    /// Epoch millis of the first call for this logical wait; round-trips
    /// through the resume token so re-invocations keep the same deadline.
    pub started_at_ms: i64,
    /// Time already consumed before this invocation's loop starts.
    pub base_elapsed: Duration,
    pub poll_interval: Duration,
    pub timeout: Duration,
    /// Caller-supplied opaque token; absent means no one is listening.
    pub progress_token: Option<Value>,
}

impl WaitContext {
    pub fn new(
        owner: String,
        repo: String,
        pull_number: i64,
        timeout: Duration,
        poll_interval: Duration,
        progress_token: Option<Value>,
        resume: Option<ResumeToken>,
    ) -> Self {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let started_at_ms = resume.map(|r| r.started_at_ms).unwrap_or(now_ms);
        let base_elapsed = Duration::from_millis(now_ms.saturating_sub(started_at_ms).max(0) as u64);
        Self {
            owner,
            repo,
            pull_number,
            started_at_ms,
            base_elapsed,
            poll_interval,
            timeout,
            progress_token,
        }
    }

    /// Token a caller can pass back to continue this logical wait.
    pub fn resume_token(&self) -> String {
        encode_resume(&ResumeToken {
            v: RESUME_VERSION,
            started_at_ms: self.started_at_ms,
        })
    }
}

pub const RESUME_VERSION: u32 = 1;

/// Explicit, versioned resumption state, round-tripped verbatim by the
/// caller across otherwise independent tool calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResumeToken {
    pub v: u32,
    pub started_at_ms: i64,
}

pub fn encode_resume(t: &ResumeToken) -> String {
    let bytes = serde_json::to_vec(t).unwrap_or_default();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// A malformed or wrong-version token is rejected, not treated as a fresh
/// start; silently restarting the timer would defeat the timeout.
pub fn decode_resume(s: &str) -> Option<ResumeToken> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(s)
        .ok()?;
    let token: ResumeToken = serde_json::from_slice(&bytes).ok()?;
    if token.v != RESUME_VERSION {
        return None;
    }
    Some(token)
}

/// Outcomes the loop itself can produce, beyond check-function errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("Timeout waiting for {0}")]
    Timeout(String),
    #[error("Canceled while waiting for {0}")]
    Canceled(String),
    #[error("{}", .0.message)]
    Api(ApiError),
}

/// Out-of-band progress delivery. Implementations must not block the loop;
/// failures are logged by the engine and never surface to the caller.
pub trait ProgressSink {
    fn send(&self, token: &Value, progress: f64, total: Option<f64>) -> Result<(), String>;
}

/// Writes MCP `notifications/progress` lines to stdout, interleaved with
/// the in-flight tools/call.
pub struct StdioProgress;

impl ProgressSink for StdioProgress {
    fn send(&self, token: &Value, progress: f64, total: Option<f64>) -> Result<(), String> {
        let mut params = serde_json::json!({
            "progressToken": token,
            "progress": progress,
        });
        if let (Some(t), Some(map)) = (total, params.as_object_mut()) {
            map.insert("total".into(), serde_json::json!(t));
        }
        let note = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/progress",
            "params": params,
        });
        let line = serde_json::to_string(&note).map_err(|e| e.to_string())?;
        let mut out = std::io::stdout();
        writeln!(out, "{}", line).map_err(|e| e.to_string())?;
        out.flush().map_err(|e| e.to_string())
    }
}

fn emit_progress(sink: &dyn ProgressSink, ctx: &WaitContext, elapsed: Duration) {
    if let Some(token) = &ctx.progress_token {
        let total = ctx.timeout.as_secs_f64();
        if let Err(e) = sink.send(token, elapsed.as_secs_f64(), Some(total)) {
            warn!("progress notification dropped: {}", e);
        }
    }
}

/// Drive a bounded poll loop: invoke `check` until it yields a terminal
/// result, the deadline elapses, or `cancel` fires.
///
/// Per iteration: cancellation first, then the deadline, then exactly one
/// check invocation (no overlapping checks). A check error is fatal; this
/// layer does not distinguish transient from permanent failures. A `None`
/// result emits progress and sleeps one interval. Whatever ends the loop,
/// one final best-effort notification goes out.
pub async fn poll_until<T, C, Fut>(
    ctx: &WaitContext,
    cancel: Option<watch::Receiver<bool>>,
    sink: &dyn ProgressSink,
    what: &str,
    mut check: C,
) -> Result<T, WaitError>
where
    C: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, ApiError>>,
{
    let loop_start = tokio::time::Instant::now();
    let result = loop {
        if let Some(rx) = &cancel {
            if *rx.borrow() {
                break Err(WaitError::Canceled(what.to_string()));
            }
        }
        let elapsed = ctx.base_elapsed + loop_start.elapsed();
        if elapsed >= ctx.timeout {
            break Err(WaitError::Timeout(what.to_string()));
        }
        match check().await {
            Err(api) => break Err(WaitError::Api(api)),
            Ok(Some(terminal)) => break Ok(terminal),
            Ok(None) => {
                emit_progress(sink, ctx, elapsed);
                tokio::time::sleep(ctx.poll_interval).await;
            }
        }
    };
    // Best-effort closing notification; must not mask the primary outcome.
    emit_progress(sink, ctx, ctx.base_elapsed + loop_start.elapsed());
    result
}
