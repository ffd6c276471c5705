//! Approval channels — where a pending call is shown and answered.
//!
//! The gate owns the countdown; a channel only has to produce an answer
//! eventually. Interactive terminals and test doubles look identical to
//! the gate.

use crate::HitlError;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use wp_core::trace::{CallId, Decision};

// ---------------------------------------------------------------------------
// Request / reply
// ---------------------------------------------------------------------------

/// What the approver sees: tool name and arguments after reference resolution.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRequest {
    pub call_id: CallId,
    pub agent: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelReply {
    pub decision: Decision,
    pub responder: String,
}

impl ChannelReply {
    pub fn new(decision: Decision, responder: impl Into<String>) -> Self {
        Self {
            decision,
            responder: responder.into(),
        }
    }
}

#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    async fn present(&self, request: &ApprovalRequest) -> Result<ChannelReply, HitlError>;
}

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

/// Interactive prompt: `y`/`yes`, `n`/`no`, `s`/`skip`. Anything else re-prompts.
pub struct ConsoleChannel<R, W> {
    io: Mutex<(R, W)>,
}

impl ConsoleChannel<BufReader<tokio::io::Stdin>, tokio::io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> ConsoleChannel<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new((reader, writer)),
        }
    }
}

/// Parse one console answer.
pub fn parse_answer(line: &str) -> Option<Decision> {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(Decision::Approve),
        "n" | "no" => Some(Decision::Reject),
        "s" | "skip" => Some(Decision::Skip),
        _ => None,
    }
}

#[async_trait]
impl<R, W> ApprovalChannel for ConsoleChannel<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn present(&self, request: &ApprovalRequest) -> Result<ChannelReply, HitlError> {
        let mut io = self.io.lock().await;
        let (reader, writer) = &mut *io;

        let args = serde_json::to_string_pretty(&request.arguments)
            .unwrap_or_else(|_| request.arguments.to_string());
        let banner = format!(
            "\n[approval] agent `{}` wants to call `{}` (call {})\n{}\nauto-skip in {:.0}s\n",
            request.agent,
            request.tool_name,
            request.call_id,
            args,
            request.timeout.as_secs_f64()
        );
        write_all(writer, &banner).await?;

        loop {
            write_all(writer, "approve? [y]es / [n]o / [s]kip: ").await?;
            let mut line = String::new();
            let read = reader
                .read_line(&mut line)
                .await
                .map_err(|e| HitlError::Channel(e.to_string()))?;
            if read == 0 {
                return Err(HitlError::Channel("console input closed".into()));
            }
            if let Some(decision) = parse_answer(&line) {
                return Ok(ChannelReply::new(decision, "console"));
            }
        }
    }
}

async fn write_all<W: AsyncWrite + Unpin>(writer: &mut W, text: &str) -> Result<(), HitlError> {
    writer
        .write_all(text.as_bytes())
        .await
        .map_err(|e| HitlError::Channel(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| HitlError::Channel(e.to_string()))
}

// ---------------------------------------------------------------------------
// Callback
// ---------------------------------------------------------------------------

type DecideFn = dyn Fn(&ApprovalRequest) -> Decision + Send + Sync;

/// Programmatic approver backed by a closure.
#[derive(Clone)]
pub struct CallbackChannel {
    responder: String,
    decide: Arc<DecideFn>,
}

impl CallbackChannel {
    pub fn new<F>(responder: impl Into<String>, decide: F) -> Self
    where
        F: Fn(&ApprovalRequest) -> Decision + Send + Sync + 'static,
    {
        Self {
            responder: responder.into(),
            decide: Arc::new(decide),
        }
    }

    pub fn always(decision: Decision) -> Self {
        Self::new("auto", move |_| decision)
    }
}

#[async_trait]
impl ApprovalChannel for CallbackChannel {
    async fn present(&self, request: &ApprovalRequest) -> Result<ChannelReply, HitlError> {
        Ok(ChannelReply::new((self.decide)(request), self.responder.clone()))
    }
}

// ---------------------------------------------------------------------------
// Queue + inbox
// ---------------------------------------------------------------------------

/// A pending call waiting in an [`ApprovalInbox`].
#[derive(Debug)]
pub struct PendingApproval {
    pub request: ApprovalRequest,
    reply: oneshot::Sender<ChannelReply>,
}

impl PendingApproval {
    /// Returns false when the gate already stopped waiting.
    pub fn respond(self, decision: Decision, responder: impl Into<String>) -> bool {
        self.reply.send(ChannelReply::new(decision, responder)).is_ok()
    }

    pub fn approve(self, responder: impl Into<String>) -> bool {
        self.respond(Decision::Approve, responder)
    }

    pub fn reject(self, responder: impl Into<String>) -> bool {
        self.respond(Decision::Reject, responder)
    }

    pub fn skip(self, responder: impl Into<String>) -> bool {
        self.respond(Decision::Skip, responder)
    }
}

/// Channel side of a queue pair.
#[derive(Clone)]
pub struct QueueChannel {
    tx: mpsc::UnboundedSender<PendingApproval>,
}

/// Approver side of a queue pair, for UIs and tests.
pub struct ApprovalInbox {
    rx: mpsc::UnboundedReceiver<PendingApproval>,
}

impl ApprovalInbox {
    pub async fn next(&mut self) -> Option<PendingApproval> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<PendingApproval> {
        self.rx.try_recv().ok()
    }
}

pub fn queue() -> (QueueChannel, ApprovalInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueChannel { tx }, ApprovalInbox { rx })
}

#[async_trait]
impl ApprovalChannel for QueueChannel {
    async fn present(&self, request: &ApprovalRequest) -> Result<ChannelReply, HitlError> {
        let (reply, answer) = oneshot::channel();
        self.tx
            .send(PendingApproval {
                request: request.clone(),
                reply,
            })
            .map_err(|_| HitlError::Channel("approval inbox closed".into()))?;
        answer
            .await
            .map_err(|_| HitlError::Channel("approver dropped the request".into()))
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
