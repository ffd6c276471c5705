//! Run events streamed to an optional observer channel.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;
use wp_core::failure::Failure;
use wp_core::trace::{CallId, Decision};

pub type EventSender = mpsc::UnboundedSender<RunEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<RunEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone, Serialize)]
pub struct RunEvent {
    pub run_id: Uuid,
    /// Agent that produced the event; child runs keep their own name.
    pub agent: String,
    pub timestamp: DateTime<Utc>,
    pub kind: RunEventKind,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEventKind {
    RunStarted { message: String },
    StepStarted { step: u32 },
    ToolDispatched { call_id: CallId, tool: String },
    ApprovalRequested { call_id: CallId, tool: String },
    ApprovalDecided { call_id: CallId, decision: Decision, responder: String },
    OutputStored { call_id: CallId, tool: String },
    ToolFailed { call_id: CallId, tool: String, message: String },
    DelegationStarted { child: String, subtask: String },
    DelegationFinished { child: String, succeeded: bool },
    AnswerChunk { text: String },
    FinalAnswer { text: String },
    RunFailed { failure: Failure },
}

/// Emits events for one run; a no-op without a receiver.
#[derive(Debug, Clone)]
pub struct Emitter {
    run_id: Uuid,
    agent: String,
    tx: Option<EventSender>,
}

impl Emitter {
    pub fn new(run_id: Uuid, agent: impl Into<String>, tx: Option<EventSender>) -> Self {
        Self {
            run_id,
            agent: agent.into(),
            tx,
        }
    }

    pub fn sender(&self) -> Option<EventSender> {
        self.tx.clone()
    }

    pub fn emit(&self, kind: RunEventKind) {
        if let Some(tx) = &self.tx {
            // A dropped receiver only means nobody is watching.
            let _ = tx.send(RunEvent {
                run_id: self.run_id,
                agent: self.agent.clone(),
                timestamp: Utc::now(),
                kind,
            });
        }
    }
}

/// Word-sized chunks of a final answer, whitespace preserved.
pub fn answer_chunks(text: &str) -> Vec<String> {
    text.split_inclusive(char::is_whitespace)
        .map(str::to_string)
        .collect()
}
