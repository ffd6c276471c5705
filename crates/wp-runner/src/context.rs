//! Run Context — state owned by one agent run, created at start and dropped
//! at completion.

use crate::agents::AgentId;
use crate::delegation::DelegationResult;
use crate::events::{Emitter, RunEventKind};
use crate::pii::PiiMasker;
use crate::planner::{Observation, PlannerInput, SubAgentInfo, ToolResult};
use crate::store::ToolOutputStore;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wp_config::{fingerprint, AgentSettings, RuntimeConfig};
use wp_core::config::{EffectiveConfig, EntityRef};
use wp_core::memory::MemoryEntry;
use wp_core::message::{ChatMessage, FileRef};
use wp_core::tool::ToolDescriptor;
use wp_core::trace::{CallId, ToolCallRecord, ToolCallStatus};
use wp_hitl::{ApprovalChannel, ApprovalGate};
use wp_tools::{Tool, ToolContext};

/// A tool as seen by one run: implementation plus its effective config.
#[derive(Clone)]
pub struct RunTool {
    pub tool: Arc<dyn Tool>,
    pub config: EffectiveConfig,
    pub fingerprint: String,
}

impl RunTool {
    pub fn new(tool: Arc<dyn Tool>, config: EffectiveConfig) -> Self {
        let fingerprint = fingerprint(&config);
        Self {
            tool,
            config,
            fingerprint,
        }
    }
}

/// What a run is started with.
#[derive(Clone)]
pub(crate) struct RunJob {
    pub agent: AgentId,
    pub message: String,
    pub history: Vec<ChatMessage>,
    pub files: Arc<Vec<FileRef>>,
    pub runtime_config: Arc<RuntimeConfig>,
    pub parent_run_id: Option<Uuid>,
    pub memory_user_id: Option<String>,
    pub persist_chat_history: bool,
    pub events: Option<crate::events::EventSender>,
    pub cancel: CancellationToken,
}

pub struct RunContext {
    pub run_id: Uuid,
    pub parent_run_id: Option<Uuid>,
    pub agent: AgentId,
    pub agent_name: String,
    pub instruction: String,
    pub message: String,
    /// Real values; persisted and shared with children as given.
    pub history: Vec<ChatMessage>,
    /// `history` as the planner sees it, masked when PII handling is on.
    pub planner_history: Vec<ChatMessage>,
    pub files: Arc<Vec<FileRef>>,
    pub runtime_config: Arc<RuntimeConfig>,
    pub memory_user_id: Option<String>,
    pub persist_chat_history: bool,

    /// Filled in by the engine's prepare phase.
    pub agent_config: EffectiveConfig,
    pub settings: AgentSettings,
    pub tools: BTreeMap<String, RunTool>,
    pub descriptors: Vec<ToolDescriptor>,
    pub sub_agents: Vec<SubAgentInfo>,
    pub pii: Option<PiiMasker>,

    pub store: ToolOutputStore,
    pub gate: ApprovalGate,
    pub tool_calls: Vec<ToolCallRecord>,
    pub observations: Vec<Observation>,
    pub delegations: Vec<DelegationResult>,
    /// Recalled entries, masked like everything else the planner reads.
    pub memories: Vec<MemoryEntry>,
    pub emitter: Emitter,
    pub cancel: CancellationToken,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    pub(crate) fn new(job: RunJob, agent_name: &str, approvals: Arc<dyn ApprovalChannel>) -> Self {
        let run_id = Uuid::new_v4();
        Self {
            run_id,
            parent_run_id: job.parent_run_id,
            agent: job.agent,
            agent_name: agent_name.to_string(),
            instruction: String::new(),
            message: job.message,
            history: job.history,
            planner_history: Vec::new(),
            files: job.files,
            runtime_config: job.runtime_config,
            memory_user_id: job.memory_user_id,
            persist_chat_history: job.persist_chat_history,
            agent_config: EffectiveConfig::empty(EntityRef::agent(agent_name)),
            settings: AgentSettings::default(),
            tools: BTreeMap::new(),
            descriptors: Vec::new(),
            sub_agents: Vec::new(),
            pii: None,
            store: ToolOutputStore::new(),
            gate: ApprovalGate::new(approvals),
            tool_calls: Vec::new(),
            observations: Vec::new(),
            delegations: Vec::new(),
            memories: Vec::new(),
            emitter: Emitter::new(run_id, agent_name, job.events),
            cancel: job.cancel,
            started_at: Utc::now(),
        }
    }

    pub fn planner_input(&self, step: u32) -> PlannerInput<'_> {
        PlannerInput {
            agent: &self.agent_name,
            instruction: &self.instruction,
            message: &self.message,
            step,
            tools: &self.descriptors,
            sub_agents: &self.sub_agents,
            history: &self.planner_history,
            observations: &self.observations,
            files: &self.files,
            memories: &self.memories,
            settings: &self.settings,
        }
    }

    pub fn tool_context(&self) -> ToolContext {
        ToolContext::new(self.agent_name.clone(), self.files.clone())
    }

    pub fn emit(&self, kind: RunEventKind) {
        self.emitter.emit(kind);
    }

    /// A call id not yet used by this run.
    pub fn fresh_call_id(&self) -> CallId {
        loop {
            let id = CallId::generate();
            if !self.store.contains(&id) && !self.tool_calls.iter().any(|c| c.call_id == id) {
                return id;
            }
        }
    }

    /// Mask text on its way to the planner.
    pub fn mask_text(&self, text: &str) -> String {
        match &self.pii {
            Some(m) => m.anonymize_text(text),
            None => text.to_string(),
        }
    }

    pub fn mask(&self, value: &serde_json::Value) -> serde_json::Value {
        match &self.pii {
            Some(m) => m.anonymize(value),
            None => value.clone(),
        }
    }

    /// Masked copy of `history` for the planner.
    pub fn mask_history(&self) -> Vec<ChatMessage> {
        self.history
            .iter()
            .map(|m| ChatMessage::new(m.role, self.mask_text(&m.content)))
            .collect()
    }

    pub fn unmask(&self, value: &serde_json::Value) -> serde_json::Value {
        match &self.pii {
            Some(m) => m.restore(value),
            None => value.clone(),
        }
    }

    pub fn unmask_text(&self, text: &str) -> String {
        match &self.pii {
            Some(m) => m.restore_text(text),
            None => text.to_string(),
        }
    }

    pub fn observe_tool(
        &mut self,
        call_id: CallId,
        tool_name: &str,
        arguments: serde_json::Value,
        result: ToolResult,
        reference: Option<String>,
    ) {
        self.observations.push(Observation::Tool {
            call_id,
            tool_name: tool_name.to_string(),
            arguments,
            result,
            reference,
        });
    }

    /// Record a finished delegation; the answer is masked for the planner.
    pub fn observe_delegation(&mut self, result: DelegationResult) {
        let observed = match &self.pii {
            Some(m) => result.masked(m),
            None => result.clone(),
        };
        self.observations.push(Observation::Delegation(observed));
        self.delegations.push(result);
    }
}

/// A tool call in flight; `finish` turns it into its trace record.
pub(crate) struct CallDraft {
    pub call_id: CallId,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub fingerprint: String,
    pub started_at: DateTime<Utc>,
}

impl CallDraft {
    pub fn new(call_id: CallId, tool_name: &str, arguments: serde_json::Value, fingerprint: String) -> Self {
        Self {
            call_id,
            tool_name: tool_name.to_string(),
            arguments,
            fingerprint,
            started_at: Utc::now(),
        }
    }

    pub fn finish(
        self,
        run_id: Uuid,
        status: ToolCallStatus,
        output: Option<serde_json::Value>,
        error: Option<String>,
    ) -> ToolCallRecord {
        let completed_at = Utc::now();
        ToolCallRecord {
            call_id: self.call_id,
            run_id,
            tool_name: self.tool_name,
            arguments: self.arguments,
            output,
            config_fingerprint: self.fingerprint,
            status,
            error,
            started_at: self.started_at,
            completed_at: Some(completed_at),
            duration_ms: Some((completed_at - self.started_at).num_milliseconds()),
        }
    }
}
