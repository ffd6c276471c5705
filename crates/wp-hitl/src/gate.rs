//! Approval gate — cancellable wait on a channel with a per-call timer.

use crate::channel::{ApprovalChannel, ApprovalRequest, ChannelReply};
use crate::log::ApprovalLog;
use crate::state::ApprovalState;
use crate::HitlError;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wp_core::trace::{ApprovalDecision, Decision};

pub const RESPONDER_TIMER: &str = "timer";
pub const RESPONDER_CANCELLATION: &str = "cancellation";
pub const RESPONDER_CHANNEL_ERROR: &str = "channel-error";

/// One gate per run. The channel may be shared; the log belongs to the run.
pub struct ApprovalGate {
    channel: Arc<dyn ApprovalChannel>,
    log: ApprovalLog,
}

impl ApprovalGate {
    pub fn new(channel: Arc<dyn ApprovalChannel>) -> Self {
        Self {
            channel,
            log: ApprovalLog::new(),
        }
    }

    pub fn log(&self) -> &ApprovalLog {
        &self.log
    }

    /// Present `request` and suspend the calling run until approve, reject,
    /// skip, countdown expiry or cancellation. Never returns `Pending`.
    pub async fn request(
        &self,
        request: ApprovalRequest,
        cancel: &CancellationToken,
    ) -> Result<ApprovalDecision, HitlError> {
        if let Some(existing) = self.log.decision_for(&request.call_id)? {
            return Err(HitlError::InvalidTransition {
                call_id: request.call_id.to_string(),
                from: ApprovalState::for_decision(existing.decision),
                to: ApprovalState::Pending,
            });
        }

        tracing::info!(
            call_id = %request.call_id,
            tool = %request.tool_name,
            timeout_secs = request.timeout.as_secs_f64(),
            "approval pending"
        );

        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => ChannelReply::new(Decision::Skip, RESPONDER_CANCELLATION),
            answered = self.channel.present(&request) => match answered {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!(call_id = %request.call_id, error = %e, "approval channel failed");
                    ChannelReply::new(Decision::Skip, RESPONDER_CHANNEL_ERROR)
                }
            },
            _ = tokio::time::sleep(request.timeout) => ChannelReply::new(Decision::Timeout, RESPONDER_TIMER),
        };

        let state = ApprovalState::Pending.resolve(&request.call_id, reply.decision)?;
        let decision = ApprovalDecision::new(request.call_id.clone(), reply.decision, reply.responder);
        self.log.record(decision.clone())?;

        tracing::info!(
            call_id = %request.call_id,
            state = %state,
            responder = %decision.responder,
            "approval resolved"
        );
        Ok(decision)
    }
}
