//! wp-hitl: Approval gate — intercepts flagged tool calls, waits for a
//! human (or programmatic) decision with a per-call timeout, and logs it.

pub mod channel;
pub mod gate;
pub mod log;
pub mod state;

pub use channel::{
    queue, ApprovalChannel, ApprovalInbox, ApprovalRequest, CallbackChannel, ChannelReply,
    ConsoleChannel, PendingApproval, QueueChannel,
};
pub use gate::ApprovalGate;
pub use log::ApprovalLog;
pub use state::ApprovalState;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HitlError {
    #[error("approval channel error: {0}")]
    Channel(String),
    #[error("invalid approval transition for call {call_id}: {from} -> {to}")]
    InvalidTransition {
        call_id: String,
        from: ApprovalState,
        to: ApprovalState,
    },
    #[error("approval log lock poisoned")]
    LockPoisoned,
}
