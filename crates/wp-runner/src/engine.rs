//! Execution Engine — drives one agent run: config resolution, the step
//! loop, tool dispatch through the approval gate, and run completion.

use crate::agents::AgentGraph;
use crate::budget::StepBudget;
use crate::context::{CallDraft, RunContext, RunJob, RunTool};
use crate::delegation::DelegationResult;
use crate::events::{answer_chunks, EventSender, RunEventKind};
use crate::pii::PiiMasker;
use crate::planner::{Planner, Step, SubAgentInfo, ToolResult};
use crate::references::{placeholder, resolve_references};
use crate::RunnerError;
use async_recursion::async_recursion;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wp_config::resolver::overlay;
use wp_config::{agent_config_schema, resolve, AgentSettings, HitlPolicy, RuntimeConfig};
use wp_core::config::EntityRef;
use wp_core::failure::Failure;
use wp_core::memory::{MemoryEntry, MemoryStore};
use wp_core::message::{ChatMessage, FileRef, Role};
use wp_core::trace::{
    ApprovalDecision, RunRecord, RunSink, RunStatus, ToolCallRecord, ToolCallStatus,
    ToolOutputRecord,
};
use wp_hitl::{ApprovalChannel, ApprovalRequest, CallbackChannel};
use wp_mcp::{McpConnect, McpConnector};

/// Memory entries consulted before the first step.
const MEMORY_SEARCH_LIMIT: usize = 5;

/// Responder of the default approval channel, used when nobody is attached.
pub const UNATTENDED_RESPONDER: &str = "unattended";

// ---------------------------------------------------------------------------
// Request / outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub agent: String,
    pub message: String,
    pub history: Vec<ChatMessage>,
    pub files: Vec<FileRef>,
    pub runtime_config: RuntimeConfig,
    /// Enables the memory collaborator when the agent names a provider.
    pub memory_user_id: Option<String>,
    pub persist_chat_history: bool,
}

impl RunRequest {
    pub fn new(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn with_file(mut self, file: FileRef) -> Self {
        self.files.push(file);
        self
    }

    pub fn with_runtime_config(mut self, config: RuntimeConfig) -> Self {
        self.runtime_config = config;
        self
    }

    pub fn with_memory_user(mut self, user_id: impl Into<String>) -> Self {
        self.memory_user_id = Some(user_id.into());
        self
    }

    pub fn persist_history(mut self) -> Self {
        self.persist_chat_history = true;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub parent_run_id: Option<Uuid>,
    pub agent: String,
    pub status: RunStatus,
    pub answer: Option<String>,
    pub failure: Option<Failure>,
    pub steps: u32,
    pub tool_calls: Vec<ToolCallRecord>,
    pub approvals: Vec<ApprovalDecision>,
    pub outputs: Vec<ToolOutputRecord>,
    pub delegations: Vec<DelegationResult>,
    /// Input history plus this turn, when the run succeeded.
    pub history: Vec<ChatMessage>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    fn rejected(agent: &str, error: RunnerError) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            parent_run_id: None,
            agent: agent.to_string(),
            status: RunStatus::Failed,
            answer: None,
            failure: Some(error.into_failure()),
            steps: 0,
            tool_calls: Vec::new(),
            approvals: Vec::new(),
            outputs: Vec::new(),
            delegations: Vec::new(),
            history: Vec::new(),
            started_at: now,
            completed_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

struct RuntimeInner {
    graph: AgentGraph,
    planner: Arc<dyn Planner>,
    approvals: Arc<dyn ApprovalChannel>,
    connector: Arc<dyn McpConnect>,
    memory: Option<Arc<dyn MemoryStore>>,
    sink: Option<Arc<dyn RunSink>>,
}

/// Cheap to clone; every run shares the same graph and collaborators.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

pub struct RuntimeBuilder {
    graph: AgentGraph,
    planner: Arc<dyn Planner>,
    approvals: Option<Arc<dyn ApprovalChannel>>,
    connector: Option<Arc<dyn McpConnect>>,
    memory: Option<Arc<dyn MemoryStore>>,
    sink: Option<Arc<dyn RunSink>>,
}

impl RuntimeBuilder {
    pub fn new(graph: AgentGraph, planner: Arc<dyn Planner>) -> Self {
        Self {
            graph,
            planner,
            approvals: None,
            connector: None,
            memory: None,
            sink: None,
        }
    }

    pub fn approval_channel(mut self, channel: Arc<dyn ApprovalChannel>) -> Self {
        self.approvals = Some(channel);
        self
    }

    pub fn mcp_connector(mut self, connector: Arc<dyn McpConnect>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn memory(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(store);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn RunSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Without an approval channel, gated calls are skipped.
    pub fn build(self) -> Runtime {
        let approvals = self.approvals.unwrap_or_else(|| {
            Arc::new(CallbackChannel::new(UNATTENDED_RESPONDER, |_| {
                wp_core::trace::Decision::Skip
            }))
        });
        Runtime {
            inner: Arc::new(RuntimeInner {
                graph: self.graph,
                planner: self.planner,
                approvals,
                connector: self.connector.unwrap_or_else(|| Arc::new(McpConnector)),
                memory: self.memory,
                sink: self.sink,
            }),
        }
    }
}

impl Runtime {
    pub fn builder(graph: AgentGraph, planner: Arc<dyn Planner>) -> RuntimeBuilder {
        RuntimeBuilder::new(graph, planner)
    }

    pub fn graph(&self) -> &AgentGraph {
        &self.inner.graph
    }

    pub async fn run(&self, request: RunRequest) -> RunOutcome {
        self.run_with(request, None, CancellationToken::new()).await
    }

    /// Run with an event observer and an external cancellation token.
    pub async fn run_with(
        &self,
        request: RunRequest,
        events: Option<EventSender>,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let Some(agent) = self.inner.graph.id(&request.agent) else {
            tracing::warn!(agent = %request.agent, "run requested for unknown agent");
            return RunOutcome::rejected(&request.agent, RunnerError::UnknownAgent(request.agent.clone()));
        };
        self.execute(RunJob {
            agent,
            message: request.message,
            history: request.history,
            files: Arc::new(request.files),
            runtime_config: Arc::new(request.runtime_config),
            parent_run_id: None,
            memory_user_id: request.memory_user_id,
            persist_chat_history: request.persist_chat_history,
            events,
            cancel,
        })
        .await
    }

    /// One complete run. Child runs re-enter here through delegation.
    #[async_recursion]
    pub(crate) async fn execute(&self, job: RunJob) -> RunOutcome {
        let agent_name = self.inner.graph.node(job.agent).spec.name.clone();
        let mut ctx = RunContext::new(job, &agent_name, self.inner.approvals.clone());
        tracing::info!(
            run_id = %ctx.run_id,
            parent = ?ctx.parent_run_id,
            agent = %ctx.agent_name,
            "run started"
        );
        ctx.emit(RunEventKind::RunStarted {
            message: ctx.message.clone(),
        });

        let mut steps = 0;
        let result = match self.prepare(&mut ctx).await {
            Err(e) => Err(e),
            Ok(()) => {
                let mut budget = StepBudget::new(ctx.settings.max_steps, ctx.settings.run_timeout);
                let result = match (budget.deadline(), budget.run_timeout()) {
                    (Some(deadline), Some(limit)) => {
                        let cancel = ctx.cancel.clone();
                        let run_id = ctx.run_id;
                        let drive = self.drive(&mut ctx, &mut budget);
                        tokio::pin!(drive);
                        tokio::select! {
                            r = &mut drive => r,
                            _ = tokio::time::sleep_until(deadline) => {
                                tracing::warn!(run_id = %run_id, limit_secs = limit.as_secs_f64(), "run deadline reached");
                                // Pending approvals resolve as cancelled and land in the log.
                                cancel.cancel();
                                let _ = drive.await;
                                Err(RunnerError::RunTimeout(limit))
                            }
                        }
                    }
                    _ => self.drive(&mut ctx, &mut budget).await,
                };
                steps = budget.steps();
                result
            }
        };

        self.finish(ctx, steps, result).await
    }

    /// Resolve effective configs for the agent, its tools and its MCP
    /// connectors, connecting each connector for this run only.
    async fn prepare(&self, ctx: &mut RunContext) -> Result<(), RunnerError> {
        let graph = &self.inner.graph;
        let node = graph.node(ctx.agent);
        let spec = &node.spec;
        let runtime = ctx.runtime_config.clone();

        let agent_ref = EntityRef::agent(&spec.name);
        ctx.agent_config = resolve(
            &agent_ref,
            &runtime.layers_for(&spec.name, &agent_ref, Some(&spec.agent_config)),
            &agent_config_schema(),
        )?;
        ctx.settings = AgentSettings::from_config(&ctx.agent_config);
        ctx.pii = if ctx.settings.pii_active() {
            Some(PiiMasker::new(&ctx.settings.pii_mapping))
        } else {
            if ctx.settings.enable_pii {
                tracing::debug!(agent = %spec.name, "enable_pii without pii_mapping; masking off");
            }
            None
        };

        let mut tools: BTreeMap<String, RunTool> = BTreeMap::new();
        for name in &spec.tools {
            let tool = graph.tools().get(name).ok_or_else(|| RunnerError::UnknownTool {
                agent: spec.name.clone(),
                tool: name.clone(),
            })?;
            let entity = EntityRef::tool(name);
            let config = resolve(
                &entity,
                &runtime.layers_for(&spec.name, &entity, spec.tool_configs.get(name)),
                &tool.descriptor().config_schema,
            )?;
            tools.insert(name.clone(), RunTool::new(tool, config));
        }

        for mcp_name in &spec.mcps {
            let mcp = graph.mcp(mcp_name).ok_or_else(|| RunnerError::UnknownMcp {
                agent: spec.name.clone(),
                mcp: mcp_name.clone(),
            })?;
            let entity = EntityRef::mcp(mcp_name);
            let definition = overlay(Some(&mcp.definition_config()), spec.mcp_configs.get(mcp_name));
            let config = resolve(
                &entity,
                &runtime.layers_for(&spec.name, &entity, definition.as_ref()),
                &[],
            )?;
            let remote = self
                .inner
                .connector
                .connect(mcp, &config)
                .await
                .map_err(|e| RunnerError::Connector {
                    mcp: mcp_name.clone(),
                    message: e.to_string(),
                })?;
            for tool in remote {
                let name = tool.descriptor().name.clone();
                if tools.contains_key(&name) {
                    tracing::warn!(mcp = %mcp_name, tool = %name, "remote tool shadowed by an earlier tool");
                    continue;
                }
                let entity = EntityRef::tool(&name);
                let config = resolve(
                    &entity,
                    &runtime.layers_for(&spec.name, &entity, spec.tool_configs.get(&name)),
                    &tool.descriptor().config_schema,
                )?;
                tools.insert(name, RunTool::new(tool, config));
            }
        }

        ctx.descriptors = tools.values().map(|t| t.tool.descriptor().clone()).collect();
        ctx.tools = tools;
        ctx.sub_agents = node
            .sub_agents
            .iter()
            .map(|id| {
                let child = &graph.node(*id).spec;
                SubAgentInfo {
                    name: child.name.clone(),
                    description: child.description.clone(),
                }
            })
            .collect();
        ctx.instruction = spec.instruction.clone();
        ctx.message = ctx.mask_text(&ctx.message);
        ctx.planner_history = ctx.mask_history();

        tracing::debug!(
            run_id = %ctx.run_id,
            tools = ctx.tools.len(),
            sub_agents = ctx.sub_agents.len(),
            max_steps = ctx.settings.max_steps,
            "run prepared"
        );
        Ok(())
    }

    /// The step loop: ask the planner, act, observe, until a final answer.
    async fn drive(&self, ctx: &mut RunContext, budget: &mut StepBudget) -> Result<String, RunnerError> {
        self.recall(ctx).await;

        loop {
            if ctx.cancel.is_cancelled() {
                return Err(RunnerError::Cancelled);
            }
            let step_no = budget.begin_step()?;
            ctx.emit(RunEventKind::StepStarted { step: step_no });

            let step = {
                let input = ctx.planner_input(step_no);
                tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => return Err(RunnerError::Cancelled),
                    next = self.inner.planner.next_step(&input) => {
                        next.map_err(|e| RunnerError::Planner(e.0))?
                    }
                }
            };
            tracing::debug!(run_id = %ctx.run_id, step = step_no, ?step, "planner decided");

            match step {
                Step::FinalAnswer { text } => return Ok(ctx.unmask_text(&text)),
                Step::ToolCall { name, arguments } => self.dispatch_tool(ctx, &name, arguments).await?,
                Step::Delegate(task) => {
                    let result = self.delegate(ctx, task).await;
                    ctx.observe_delegation(result);
                }
                Step::DelegateMany { tasks } => {
                    for result in self.delegate_many(ctx, tasks).await {
                        ctx.observe_delegation(result);
                    }
                }
            }
        }
    }

    /// Best-effort read; a failing store never fails the run.
    async fn recall(&self, ctx: &mut RunContext) {
        let (Some(store), Some(provider), Some(user)) = (
            self.inner.memory.as_ref(),
            ctx.settings.memory.as_ref(),
            ctx.memory_user_id.as_ref(),
        ) else {
            return;
        };
        let query = ctx.unmask_text(&ctx.message);
        match store.search(user, &query, MEMORY_SEARCH_LIMIT).await {
            Ok(entries) => {
                let masked = entries
                    .into_iter()
                    .map(|mut entry| {
                        entry.content = ctx.mask_text(&entry.content);
                        entry
                    })
                    .collect();
                ctx.memories = masked;
            }
            Err(e) => tracing::warn!(provider = %provider, error = %e, "memory search failed"),
        }
    }

    /// References, then approval, then dispatch. Outputs land in the store
    /// only after the tool completes.
    async fn dispatch_tool(
        &self,
        ctx: &mut RunContext,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<(), RunnerError> {
        let call_id = ctx.fresh_call_id();

        let Some(run_tool) = ctx.tools.get(name).cloned() else {
            let message = format!("unknown tool `{name}`");
            tracing::warn!(run_id = %ctx.run_id, tool = %name, "planner asked for an unknown tool");
            let record = CallDraft::new(call_id.clone(), name, arguments.clone(), String::new()).finish(
                ctx.run_id,
                ToolCallStatus::Failed,
                None,
                Some(message.clone()),
            );
            ctx.tool_calls.push(record);
            ctx.emit(RunEventKind::ToolFailed {
                call_id: call_id.clone(),
                tool: name.to_string(),
                message: message.clone(),
            });
            ctx.observe_tool(call_id, name, arguments, ToolResult::Failed { message }, None);
            return Ok(());
        };

        let resolved = ctx.unmask(&resolve_references(&arguments, &ctx.store)?);
        let draft = CallDraft::new(call_id.clone(), name, resolved.clone(), run_tool.fingerprint.clone());

        let side_effect = run_tool.tool.descriptor().side_effect;
        if let Some(policy) = HitlPolicy::for_tool(&ctx.settings, &run_tool.config, side_effect) {
            ctx.emit(RunEventKind::ApprovalRequested {
                call_id: call_id.clone(),
                tool: name.to_string(),
            });
            let request = ApprovalRequest {
                call_id: call_id.clone(),
                agent: ctx.agent_name.clone(),
                tool_name: name.to_string(),
                arguments: resolved.clone(),
                timeout: policy.timeout,
            };
            let decision = ctx.gate.request(request, &ctx.cancel).await?;
            ctx.emit(RunEventKind::ApprovalDecided {
                call_id: call_id.clone(),
                decision: decision.decision,
                responder: decision.responder.clone(),
            });
            if !decision.decision.allows_execution() {
                let record = draft.finish(ctx.run_id, decision.decision.as_status(), None, None);
                ctx.tool_calls.push(record);
                ctx.observe_tool(
                    call_id,
                    name,
                    arguments,
                    ToolResult::NotExecuted {
                        decision: decision.decision,
                    },
                    None,
                );
                return Ok(());
            }
        }

        ctx.emit(RunEventKind::ToolDispatched {
            call_id: call_id.clone(),
            tool: name.to_string(),
        });
        let tool_ctx = ctx.tool_context();
        let result = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => None,
            r = wp_tools::invoke(run_tool.tool.as_ref(), resolved, &run_tool.config, &tool_ctx) => Some(r),
        };
        let Some(result) = result else {
            let message = "cancelled while running".to_string();
            tracing::warn!(run_id = %ctx.run_id, call_id = %call_id, tool = %name, "tool call cancelled");
            ctx.emit(RunEventKind::ToolFailed {
                call_id: call_id.clone(),
                tool: name.to_string(),
                message: message.clone(),
            });
            ctx.tool_calls
                .push(draft.finish(ctx.run_id, ToolCallStatus::Failed, None, Some(message)));
            return Err(RunnerError::Cancelled);
        };

        match result {
            Ok(output) => {
                ctx.store.put(call_id.clone(), name, output.clone())?;
                ctx.emit(RunEventKind::OutputStored {
                    call_id: call_id.clone(),
                    tool: name.to_string(),
                });
                let observed = ctx.mask(&output);
                ctx.tool_calls
                    .push(draft.finish(ctx.run_id, ToolCallStatus::Completed, Some(output), None));
                let reference = ctx.settings.tool_output_sharing.then(|| placeholder(&call_id));
                ctx.observe_tool(call_id, name, arguments, ToolResult::Completed { output: observed }, reference);
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(run_id = %ctx.run_id, call_id = %call_id, tool = %name, error = %message, "tool call failed");
                ctx.emit(RunEventKind::ToolFailed {
                    call_id: call_id.clone(),
                    tool: name.to_string(),
                    message: message.clone(),
                });
                ctx.tool_calls
                    .push(draft.finish(ctx.run_id, ToolCallStatus::Failed, None, Some(message.clone())));
                ctx.observe_tool(call_id, name, arguments, ToolResult::Failed { message }, None);
            }
        }
        Ok(())
    }

    /// Emit the terminal events, write memory and traces, build the outcome.
    async fn finish(
        &self,
        mut ctx: RunContext,
        steps: u32,
        result: Result<String, RunnerError>,
    ) -> RunOutcome {
        let (status, answer, failure) = match result {
            Ok(text) => (RunStatus::Completed, Some(text), None),
            Err(RunnerError::Cancelled) => (
                RunStatus::Cancelled,
                None,
                Some(RunnerError::Cancelled.into_failure()),
            ),
            Err(e) => (RunStatus::Failed, None, Some(e.into_failure())),
        };

        let mut history = std::mem::take(&mut ctx.history);
        match (&answer, &failure) {
            (Some(text), _) => {
                if ctx.settings.enable_a2a_token_streaming {
                    for chunk in answer_chunks(text) {
                        ctx.emit(RunEventKind::AnswerChunk { text: chunk });
                    }
                }
                ctx.emit(RunEventKind::FinalAnswer { text: text.clone() });
                let message = ctx.unmask_text(&ctx.message);
                history.push(ChatMessage::user(message.clone()));
                history.push(ChatMessage::assistant(text.clone()));
                self.remember(&ctx, &message, text).await;
                tracing::info!(run_id = %ctx.run_id, agent = %ctx.agent_name, steps, "run completed");
            }
            (None, Some(f)) => {
                ctx.emit(RunEventKind::RunFailed { failure: f.clone() });
                tracing::warn!(
                    run_id = %ctx.run_id,
                    agent = %ctx.agent_name,
                    kind = %f.kind,
                    component = ?f.component,
                    "run failed: {}",
                    f.message
                );
            }
            (None, None) => {}
        }

        let approvals = ctx.gate.log().snapshot().unwrap_or_else(|e| {
            tracing::warn!(run_id = %ctx.run_id, error = %e, "approval log unreadable");
            Vec::new()
        });
        let completed_at = Utc::now();
        let message = ctx.unmask_text(&ctx.message);

        if let Some(sink) = &self.inner.sink {
            let record = RunRecord {
                run_id: ctx.run_id,
                parent_run_id: ctx.parent_run_id,
                agent: ctx.agent_name.clone(),
                message,
                started_at: ctx.started_at,
                completed_at: Some(completed_at),
                status,
                steps,
                answer: answer.clone(),
                failure: failure.clone(),
            };
            if let Err(e) = sink.record_run(&record, &ctx.tool_calls, &approvals).await {
                tracing::warn!(run_id = %ctx.run_id, error = %e, "failed to record run");
            }
            if ctx.persist_chat_history && status == RunStatus::Completed {
                if let Err(e) = sink.persist_history(ctx.run_id, &ctx.agent_name, &history).await {
                    tracing::warn!(run_id = %ctx.run_id, error = %e, "failed to persist chat history");
                }
            }
        }

        RunOutcome {
            run_id: ctx.run_id,
            parent_run_id: ctx.parent_run_id,
            agent: ctx.agent_name,
            status,
            answer,
            failure,
            steps,
            tool_calls: ctx.tool_calls,
            approvals,
            outputs: ctx.store.snapshot(),
            delegations: ctx.delegations,
            history,
            started_at: ctx.started_at,
            completed_at,
        }
    }

    async fn remember(&self, ctx: &RunContext, message: &str, answer: &str) {
        let (Some(store), Some(_), Some(user)) = (
            self.inner.memory.as_ref(),
            ctx.settings.memory.as_ref(),
            ctx.memory_user_id.as_ref(),
        ) else {
            return;
        };
        for entry in [
            MemoryEntry::new(user, Role::User, message),
            MemoryEntry::new(user, Role::Assistant, answer),
        ] {
            if let Err(e) = store.add(entry).await {
                tracing::warn!(run_id = %ctx.run_id, error = %e, "memory write failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegation::{DelegationOutcome, DelegationTask};
    use crate::events::{self, RunEvent};
    use crate::planner::{FnPlanner, Observation, PlannerError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use wp_config::ScopedOverrides;
    use wp_core::agent::AgentSpec;
    use wp_core::config::{ConfigField, ConfigFieldType, ConfigMap, EffectiveConfig};
    use wp_core::failure::{Component, FailureKind};
    use wp_core::memory::MemoryStoreError;
    use wp_core::tool::{PortSpec, PortType, SideEffect, ToolDescriptor};
    use wp_core::trace::{CallId, Decision, SinkError};
    use wp_tools::{FnTool, Tool, ToolContext, ToolError};

    fn map(v: serde_json::Value) -> ConfigMap {
        v.as_object().cloned().unwrap()
    }

    fn planner<F>(f: F) -> Arc<dyn Planner>
    where
        F: Fn(&crate::planner::PlannerInput<'_>) -> Result<Step, PlannerError> + Send + Sync + 'static,
    {
        Arc::new(FnPlanner::new(f))
    }

    /// Echoes its effective config so tests can see what the call ran with.
    fn formatter() -> Arc<dyn Tool> {
        Arc::new(FnTool::new(
            ToolDescriptor::new("formatter", "format results")
                .with_config_field(ConfigField::new("style", ConfigFieldType::String).with_default(json!("brief")))
                .with_config_field(
                    ConfigField::new("max_results", ConfigFieldType::Integer)
                        .with_default(json!(5))
                        .with_range(1.0, 20.0),
                )
                .with_config_field(
                    ConfigField::new("include_links", ConfigFieldType::Boolean).with_default(json!(true)),
                ),
            |_, config: &EffectiveConfig| Ok(config.to_value()),
        ))
    }

    fn greet() -> Arc<dyn Tool> {
        Arc::new(FnTool::new(
            ToolDescriptor::new("greet", "say hello")
                .with_input(PortSpec::required("name", PortType::String)),
            |args, _| Ok(json!({"greeting": format!("Hello, {}!", args["name"].as_str().unwrap_or(""))})),
        ))
    }

    fn shout() -> Arc<dyn Tool> {
        Arc::new(FnTool::new(
            ToolDescriptor::new("shout", "upper-case text")
                .with_input(PortSpec::required("text", PortType::String)),
            |args, _| Ok(json!(args["text"].as_str().unwrap_or("").to_uppercase())),
        ))
    }

    fn deploy() -> Arc<dyn Tool> {
        Arc::new(FnTool::new(
            ToolDescriptor::new("deploy", "ship it").with_side_effect(SideEffect::Write),
            |_, _| Ok(json!({"deployed": true})),
        ))
    }

    fn first_tool_output(input: &crate::planner::PlannerInput<'_>) -> Option<serde_json::Value> {
        input.tool_results().find_map(|o| o.tool_result().and_then(|r| r.output()).cloned())
    }

    #[derive(Default)]
    struct RecordingSink {
        runs: Mutex<Vec<(RunRecord, Vec<ToolCallRecord>, Vec<ApprovalDecision>)>>,
        histories: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl RunSink for RecordingSink {
        async fn record_run(
            &self,
            run: &RunRecord,
            tool_calls: &[ToolCallRecord],
            approvals: &[ApprovalDecision],
        ) -> Result<(), SinkError> {
            self.runs
                .lock()
                .unwrap()
                .push((run.clone(), tool_calls.to_vec(), approvals.to_vec()));
            Ok(())
        }

        async fn persist_history(
            &self,
            _run_id: Uuid,
            _agent: &str,
            history: &[ChatMessage],
        ) -> Result<(), SinkError> {
            self.histories.lock().unwrap().push(history.to_vec());
            Ok(())
        }
    }

    // -- configuration -----------------------------------------------------

    #[tokio::test]
    async fn runtime_global_config_overrides_definition_per_key() {
        let graph = AgentGraph::builder()
            .tool(formatter())
            .unwrap()
            .agent(
                AgentSpec::new("writer", "format things")
                    .with_tool("formatter")
                    .with_tool_config("formatter", map(json!({"style": "detailed", "max_results": 5}))),
            )
            .build()
            .unwrap();
        let runtime = Runtime::builder(
            graph,
            planner(|input| match first_tool_output(input) {
                Some(out) => Ok(Step::final_answer(out.to_string())),
                None => Ok(Step::tool_call("formatter", json!({}))),
            }),
        )
        .build();

        let outcome = runtime
            .run(RunRequest::new("writer", "format").with_runtime_config(
                RuntimeConfig::default().with_tool_config("formatter", map(json!({"style": "compact"}))),
            ))
            .await;

        assert!(outcome.is_success(), "{:?}", outcome.failure);
        let used = outcome.tool_calls[0].output.clone().unwrap();
        assert_eq!(used, json!({"style": "compact", "max_results": 5, "include_links": true}));
    }

    #[tokio::test]
    async fn invalid_runtime_config_fails_before_any_step() {
        let graph = AgentGraph::builder()
            .tool(formatter())
            .unwrap()
            .agent(AgentSpec::new("writer", "").with_tool("formatter"))
            .build()
            .unwrap();
        let runtime = Runtime::builder(graph, planner(|_| Ok(Step::final_answer("unreachable")))).build();
        let outcome = runtime
            .run(RunRequest::new("writer", "go").with_runtime_config(
                RuntimeConfig::default().with_tool_config("formatter", map(json!({"max_results": "many"}))),
            ))
            .await;

        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.steps, 0);
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::ConfigValidationError);
        assert_eq!(failure.component, Component::ConfigResolver);
        assert_eq!(failure.config_key.as_deref(), Some("max_results"));
    }

    #[tokio::test]
    async fn unknown_agent_is_rejected() {
        let graph = AgentGraph::builder().agent(AgentSpec::new("a", "")).build().unwrap();
        let runtime = Runtime::builder(graph, planner(|_| Ok(Step::final_answer("x")))).build();
        let outcome = runtime.run(RunRequest::new("ghost", "hi")).await;
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(outcome.failure.unwrap().message.contains("ghost"));
    }

    // -- references --------------------------------------------------------

    #[tokio::test]
    async fn references_resolve_across_steps() {
        let graph = AgentGraph::builder()
            .tool(greet())
            .unwrap()
            .tool(shout())
            .unwrap()
            .agent(
                AgentSpec::new("greeter", "")
                    .with_tool("greet")
                    .with_tool("shout")
                    .with_agent_config("tool_output_sharing", json!(true)),
            )
            .build()
            .unwrap();
        let runtime = Runtime::builder(
            graph,
            planner(|input| match input.observations {
                [] => Ok(Step::tool_call("greet", json!({"name": "Ada"}))),
                [Observation::Tool { call_id, reference, .. }] => {
                    assert_eq!(reference.as_deref(), Some(format!("$tool_output.{call_id}").as_str()));
                    Ok(Step::tool_call("shout", json!({"text": reference.clone().unwrap_or_default()})))
                }
                _ => Ok(Step::final_answer(
                    first_tool_output(input).map(|v| v.to_string()).unwrap_or_default(),
                )),
            }),
        )
        .build();

        let outcome = runtime.run(RunRequest::new("greeter", "hi")).await;
        assert!(outcome.is_success(), "{:?}", outcome.failure);
        assert_eq!(outcome.tool_calls.len(), 2);
        // A whole-string placeholder passes the native value through.
        assert_eq!(outcome.tool_calls[1].arguments["text"], json!({"greeting": "Hello, Ada!"}));
        assert_eq!(outcome.outputs.len(), 2);
    }

    #[tokio::test]
    async fn unresolved_reference_fails_the_run_with_call_id() {
        let graph = AgentGraph::builder()
            .tool(shout())
            .unwrap()
            .agent(AgentSpec::new("a", "").with_tool("shout"))
            .build()
            .unwrap();
        let runtime = Runtime::builder(
            graph,
            planner(|_| Ok(Step::tool_call("shout", json!({"text": "$tool_output.abc123"})))),
        )
        .build();

        let outcome = runtime.run(RunRequest::new("a", "go")).await;
        assert_eq!(outcome.status, RunStatus::Failed);
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::UnresolvedToolOutputReference);
        assert_eq!(failure.component, Component::ReferenceResolver);
        assert_eq!(failure.call_id, Some(CallId::from("abc123")));
        assert!(outcome.tool_calls.is_empty());
    }

    // -- tools -------------------------------------------------------------

    #[tokio::test]
    async fn unknown_tool_and_tool_errors_are_observed_not_fatal() {
        let failing: Arc<dyn Tool> = Arc::new(FnTool::new(ToolDescriptor::new("flaky", "always fails"), |_, _| {
            Err(ToolError::ExecutionFailed("upstream down".into()))
        }));
        let graph = AgentGraph::builder()
            .tool(failing)
            .unwrap()
            .agent(AgentSpec::new("a", "").with_tool("flaky"))
            .build()
            .unwrap();
        let runtime = Runtime::builder(
            graph,
            planner(|input| match input.observations.len() {
                0 => Ok(Step::tool_call("missing", json!({}))),
                1 => Ok(Step::tool_call("flaky", json!({}))),
                _ => Ok(Step::final_answer("gave up politely")),
            }),
        )
        .build();

        let outcome = runtime.run(RunRequest::new("a", "go")).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.tool_calls.len(), 2);
        assert!(outcome.tool_calls.iter().all(|c| c.status == ToolCallStatus::Failed));
        assert!(outcome.outputs.is_empty());
    }

    // -- budgets -----------------------------------------------------------

    #[tokio::test]
    async fn step_limit_stops_a_looping_planner() {
        let graph = AgentGraph::builder()
            .tool(greet())
            .unwrap()
            .agent(
                AgentSpec::new("loop", "")
                    .with_tool("greet")
                    .with_agent_config("max_steps", json!(3)),
            )
            .build()
            .unwrap();
        let runtime = Runtime::builder(
            graph,
            planner(|_| Ok(Step::tool_call("greet", json!({"name": "again"})))),
        )
        .build();

        let outcome = runtime.run(RunRequest::new("loop", "go")).await;
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.steps, 3);
        assert_eq!(outcome.tool_calls.len(), 3);
        assert_eq!(outcome.failure.unwrap().kind, FailureKind::StepLimitExceeded);
    }

    struct Sleepy {
        descriptor: ToolDescriptor,
    }

    #[async_trait]
    impl Tool for Sleepy {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.descriptor
        }

        async fn run(
            &self,
            _arguments: serde_json::Value,
            _config: &EffectiveConfig,
            _ctx: &ToolContext,
        ) -> Result<serde_json::Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(json!(null))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_timeout_bounds_the_whole_run() {
        let graph = AgentGraph::builder()
            .tool(Arc::new(Sleepy {
                descriptor: ToolDescriptor::new("sleepy", "takes an hour"),
            }))
            .unwrap()
            .agent(
                AgentSpec::new("slow", "")
                    .with_tool("sleepy")
                    .with_agent_config("run_timeout_seconds", json!(2)),
            )
            .build()
            .unwrap();
        let runtime = Runtime::builder(graph, planner(|_| Ok(Step::tool_call("sleepy", json!({}))))).build();

        let outcome = runtime.run(RunRequest::new("slow", "go")).await;
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.failure.unwrap().kind, FailureKind::RunTimeout);
    }

    #[tokio::test]
    async fn planner_errors_fail_the_run() {
        let graph = AgentGraph::builder().agent(AgentSpec::new("a", "")).build().unwrap();
        let runtime =
            Runtime::builder(graph, planner(|_| Err(PlannerError("model unavailable".into())))).build();
        let outcome = runtime.run(RunRequest::new("a", "go")).await;
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::PlannerError);
        assert_eq!(failure.component, Component::Planner);
    }

    // -- approvals ---------------------------------------------------------

    fn deploy_graph() -> AgentGraph {
        AgentGraph::builder()
            .tool(deploy())
            .unwrap()
            .agent(
                AgentSpec::new("ops", "")
                    .with_tool("deploy")
                    .with_agent_config("hitl_enabled", json!(true))
                    .with_agent_config("hitl_default_timeout_seconds", json!(10)),
            )
            .build()
            .unwrap()
    }

    fn deploy_once() -> Arc<dyn Planner> {
        planner(|input| match input.last_observation().and_then(|o| o.tool_result()) {
            None => Ok(Step::tool_call("deploy", json!({}))),
            Some(ToolResult::NotExecuted { decision }) => Ok(Step::final_answer(format!("not deployed: {decision}"))),
            Some(_) => Ok(Step::final_answer("deployed")),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_approval_times_out_after_ten_seconds() {
        let (channel, _inbox) = wp_hitl::queue();
        let runtime = Runtime::builder(deploy_graph(), deploy_once())
            .approval_channel(Arc::new(channel))
            .build();

        let started = tokio::time::Instant::now();
        let outcome = runtime.run(RunRequest::new("ops", "ship")).await;

        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(outcome.answer.as_deref(), Some("not deployed: timeout"));
        assert_eq!(outcome.tool_calls[0].status, ToolCallStatus::TimedOut);
        assert_eq!(outcome.approvals[0].decision, Decision::Timeout);
        assert_eq!(outcome.approvals[0].responder, wp_hitl::gate::RESPONDER_TIMER);
        assert!(outcome.outputs.is_empty());
    }

    fn ops_graph(config: &[(&str, serde_json::Value)]) -> AgentGraph {
        let mut spec = AgentSpec::new("ops", "")
            .with_tool("deploy")
            .with_agent_config("hitl_enabled", json!(true));
        for (key, value) in config {
            spec = spec.with_agent_config(*key, value.clone());
        }
        AgentGraph::builder().tool(deploy()).unwrap().agent(spec).build().unwrap()
    }

    #[tokio::test]
    async fn huge_timeouts_do_not_panic() {
        let graph = ops_graph(&[
            ("hitl_default_timeout_seconds", json!(1e20)),
            ("run_timeout_seconds", json!(1e19)),
        ]);
        let runtime = Runtime::builder(graph, deploy_once())
            .approval_channel(Arc::new(CallbackChannel::always(Decision::Approve)))
            .build();
        let outcome = runtime.run(RunRequest::new("ops", "ship")).await;
        assert!(outcome.is_success(), "{:?}", outcome.failure);
        assert_eq!(outcome.answer.as_deref(), Some("deployed"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_deadline_during_approval_keeps_the_audit_trail() {
        let (channel, _inbox) = wp_hitl::queue();
        let graph = ops_graph(&[
            ("hitl_default_timeout_seconds", json!(30)),
            ("run_timeout_seconds", json!(5)),
        ]);
        let runtime = Runtime::builder(graph, deploy_once())
            .approval_channel(Arc::new(channel))
            .build();

        let started = tokio::time::Instant::now();
        let outcome = runtime.run(RunRequest::new("ops", "ship")).await;

        assert!(started.elapsed() < Duration::from_secs(30));
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.failure.unwrap().kind, FailureKind::RunTimeout);
        assert_eq!(outcome.approvals.len(), 1);
        assert_eq!(outcome.approvals[0].decision, Decision::Skip);
        assert_eq!(outcome.approvals[0].responder, wp_hitl::gate::RESPONDER_CANCELLATION);
        assert_eq!(outcome.tool_calls.len(), 1);
        assert_eq!(outcome.tool_calls[0].status, ToolCallStatus::Skipped);
    }

    #[tokio::test]
    async fn rejection_stays_distinct_from_skip() {
        for (decision, status) in [
            (Decision::Reject, ToolCallStatus::Rejected),
            (Decision::Skip, ToolCallStatus::Skipped),
        ] {
            let runtime = Runtime::builder(deploy_graph(), deploy_once())
                .approval_channel(Arc::new(CallbackChannel::always(decision)))
                .build();
            let outcome = runtime.run(RunRequest::new("ops", "ship")).await;
            assert_eq!(outcome.answer, Some(format!("not deployed: {decision}")));
            assert_eq!(outcome.tool_calls[0].status, status);
        }
    }

    #[tokio::test]
    async fn approved_calls_execute_and_store_output() {
        let (channel, mut inbox) = wp_hitl::queue();
        let runtime = Runtime::builder(deploy_graph(), deploy_once())
            .approval_channel(Arc::new(channel))
            .build();
        let approver = tokio::spawn(async move {
            let pending = inbox.next().await.unwrap();
            assert_eq!(pending.request.tool_name, "deploy");
            pending.approve("alice");
        });

        let outcome = runtime.run(RunRequest::new("ops", "ship")).await;
        approver.await.unwrap();
        assert_eq!(outcome.answer.as_deref(), Some("deployed"));
        assert_eq!(outcome.tool_calls[0].status, ToolCallStatus::Completed);
        assert_eq!(outcome.approvals[0].responder, "alice");
        assert_eq!(outcome.outputs.len(), 1);
    }

    #[tokio::test]
    async fn hitl_false_opts_a_side_effecting_tool_out() {
        let graph = AgentGraph::builder()
            .tool(deploy())
            .unwrap()
            .agent(
                AgentSpec::new("ops", "")
                    .with_tool("deploy")
                    .with_agent_config("hitl_enabled", json!(true))
                    .with_tool_config("deploy", map(json!({"hitl": false}))),
            )
            .build()
            .unwrap();
        let runtime = Runtime::builder(graph, deploy_once()).build();
        let outcome = runtime.run(RunRequest::new("ops", "ship")).await;
        assert_eq!(outcome.answer.as_deref(), Some("deployed"));
        assert!(outcome.approvals.is_empty());
    }

    #[tokio::test]
    async fn cancellation_resolves_a_pending_approval() {
        let (channel, mut inbox) = wp_hitl::queue();
        let runtime = Runtime::builder(deploy_graph(), deploy_once())
            .approval_channel(Arc::new(channel))
            .build();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let canceller = tokio::spawn(async move {
            let pending = inbox.next().await.unwrap();
            trigger.cancel();
            pending
        });

        let outcome = runtime.run_with(RunRequest::new("ops", "ship"), None, cancel).await;
        let _ = canceller.await.unwrap();
        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert_eq!(outcome.approvals[0].decision, Decision::Skip);
        assert_eq!(outcome.approvals[0].responder, wp_hitl::gate::RESPONDER_CANCELLATION);
        assert_eq!(outcome.failure.unwrap().kind, FailureKind::Cancelled);
    }

    // -- delegation --------------------------------------------------------

    fn weather() -> Arc<dyn Tool> {
        Arc::new(FnTool::new(
            ToolDescriptor::new("get_weather", "current weather")
                .with_input(PortSpec::required("city", PortType::String)),
            |args, _| Ok(json!({"city": args["city"], "temp_c": 21})),
        ))
    }

    fn calculator() -> Arc<dyn Tool> {
        Arc::new(FnTool::new(
            ToolDescriptor::new("add", "add two numbers")
                .with_input(PortSpec::required("a", PortType::Number))
                .with_input(PortSpec::required("b", PortType::Number)),
            |args, _| Ok(json!(args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0))),
        ))
    }

    /// Children call their one tool, then answer; the coordinator fans out
    /// and joins the answers.
    fn coordinator_planner() -> Arc<dyn Planner> {
        planner(|input| match input.agent {
            "coordinator" => match input.delegations().count() {
                0 => Ok(Step::DelegateMany {
                    tasks: vec![
                        DelegationTask::new("weather", "What's the weather in Tokyo?"),
                        DelegationTask::new("math", "What is 5 + 7?"),
                    ],
                }),
                _ => Ok(Step::final_answer(
                    input
                        .delegations()
                        .filter_map(|d| d.answer())
                        .collect::<Vec<_>>()
                        .join(" and "),
                )),
            },
            "weather" => match first_tool_output(input) {
                None => Ok(Step::tool_call("get_weather", json!({"city": "Tokyo"}))),
                Some(out) => Ok(Step::final_answer(format!("Tokyo is {}C", out["temp_c"]))),
            },
            "math" => match first_tool_output(input) {
                None => Ok(Step::tool_call("add", json!({"a": 5, "b": 7}))),
                Some(out) => Ok(Step::final_answer(format!("5+7={out}"))),
            },
            other => Err(PlannerError(format!("no plan for {other}"))),
        })
    }

    fn coordinator_graph() -> AgentGraph {
        AgentGraph::builder()
            .tool(weather())
            .unwrap()
            .tool(calculator())
            .unwrap()
            .agent(AgentSpec::new("weather", "weather expert").with_tool("get_weather"))
            .agent(AgentSpec::new("math", "math expert").with_tool("add"))
            .agent(
                AgentSpec::new("coordinator", "route questions")
                    .with_sub_agent("weather")
                    .with_sub_agent("math"),
            )
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn coordinator_combines_isolated_children() {
        let sink = Arc::new(RecordingSink::default());
        let runtime = Runtime::builder(coordinator_graph(), coordinator_planner())
            .sink(sink.clone())
            .build();

        let outcome = runtime
            .run(RunRequest::new("coordinator", "What's the weather in Tokyo and what is 5 + 7?"))
            .await;

        assert!(outcome.is_success(), "{:?}", outcome.failure);
        assert_eq!(outcome.answer.as_deref(), Some("Tokyo is 21C and 5+7=12"));
        assert_eq!(outcome.delegations.len(), 2);
        assert!(outcome.outputs.is_empty(), "parent store holds no child outputs");

        let runs = sink.runs.lock().unwrap();
        assert_eq!(runs.len(), 3);
        let children: Vec<_> = runs.iter().filter(|(r, _, _)| r.parent_run_id == Some(outcome.run_id)).collect();
        assert_eq!(children.len(), 2);
        for (run, calls, _) in children {
            assert_eq!(calls.len(), 1);
            assert!(calls.iter().all(|c| c.run_id == run.run_id));
        }
    }

    #[tokio::test]
    async fn child_cannot_see_parent_outputs() {
        let graph = AgentGraph::builder()
            .tool(greet())
            .unwrap()
            .tool(shout())
            .unwrap()
            .agent(AgentSpec::new("child", "").with_tool("shout"))
            .agent(AgentSpec::new("parent", "").with_tool("greet").with_sub_agent("child"))
            .build()
            .unwrap();
        let runtime = Runtime::builder(
            graph,
            planner(|input| match (input.agent, input.observations) {
                ("parent", []) => Ok(Step::tool_call("greet", json!({"name": "Ada"}))),
                ("parent", [Observation::Tool { call_id, .. }]) => {
                    Ok(Step::delegate("child", format!("shout $tool_output.{call_id}")))
                }
                ("parent", _) => Ok(Step::final_answer("done")),
                ("child", []) => {
                    // The subtask carries the parent's placeholder verbatim.
                    let reference = input.message.trim_start_matches("shout ").to_string();
                    Ok(Step::tool_call("shout", json!({"text": reference})))
                }
                _ => Ok(Step::final_answer("unreachable")),
            }),
        )
        .build();

        let outcome = runtime.run(RunRequest::new("parent", "go")).await;
        assert!(outcome.is_success());
        match &outcome.delegations[0].outcome {
            DelegationOutcome::Failed { failure } => {
                assert_eq!(failure.kind, FailureKind::DelegationFailure);
                assert!(failure.message.starts_with("UnresolvedToolOutputReference"));
            }
            other => panic!("child should have failed: {other:?}"),
        }
    }

    #[tokio::test]
    async fn delegating_to_an_undeclared_agent_is_reported() {
        let runtime = Runtime::builder(
            coordinator_graph(),
            planner(|input| match input.delegations().next() {
                None => Ok(Step::delegate("coordinator", "recurse")),
                Some(d) => Ok(Step::final_answer(format!("success={}", d.is_success()))),
            }),
        )
        .build();
        let outcome = runtime.run(RunRequest::new("weather", "hi")).await;
        assert_eq!(outcome.answer.as_deref(), Some("success=false"));
        assert!(outcome.delegations[0].run_id.is_none());
    }

    #[tokio::test]
    async fn child_events_forward_only_when_streaming() {
        for streaming in [false, true] {
            let (tx, mut rx) = events::channel();
            let runtime = Runtime::builder(coordinator_graph(), coordinator_planner()).build();
            let config = RuntimeConfig::default().with_agent_overrides(
                "coordinator",
                ScopedOverrides {
                    agent_config: map(json!({"enable_a2a_token_streaming": streaming})),
                    ..Default::default()
                },
            );
            let outcome = runtime
                .run_with(
                    RunRequest::new("coordinator", "both").with_runtime_config(config),
                    Some(tx),
                    CancellationToken::new(),
                )
                .await;
            assert!(outcome.is_success());

            let mut seen: Vec<RunEvent> = Vec::new();
            while let Ok(event) = rx.try_recv() {
                seen.push(event);
            }
            let from_children = seen.iter().any(|e| e.agent != "coordinator");
            assert_eq!(from_children, streaming);
            let chunks = seen
                .iter()
                .filter(|e| matches!(e.kind, RunEventKind::AnswerChunk { .. }))
                .count();
            assert_eq!(chunks > 0, streaming);
            assert!(seen.iter().any(|e| matches!(e.kind, RunEventKind::FinalAnswer { .. })));
        }
    }

    // -- PII, memory, history ----------------------------------------------

    #[tokio::test]
    async fn pii_is_masked_for_the_planner_and_restored_for_tools() {
        let lookup: Arc<dyn Tool> = Arc::new(FnTool::new(
            ToolDescriptor::new("lookup", "find a customer")
                .with_input(PortSpec::required("customer", PortType::String)),
            |args, _| Ok(json!({"customer": args["customer"], "email": "jane@example.com"})),
        ));
        let graph = AgentGraph::builder()
            .tool(lookup)
            .unwrap()
            .agent(
                AgentSpec::new("crm", "")
                    .with_tool("lookup")
                    .with_agent_config("enable_pii", json!(true))
                    .with_agent_config(
                        "pii_mapping",
                        json!({"C001": "<CUSTOMER_ID_1>", "jane@example.com": "<EMAIL_1>"}),
                    ),
            )
            .build()
            .unwrap();
        let runtime = Runtime::builder(
            graph,
            planner(|input| {
                assert!(!input.message.contains("C001"));
                match first_tool_output(input) {
                    None => Ok(Step::tool_call("lookup", json!({"customer": "<CUSTOMER_ID_1>"}))),
                    Some(out) => {
                        assert_eq!(out["email"], "<EMAIL_1>");
                        Ok(Step::final_answer("Mail <EMAIL_1>"))
                    }
                }
            }),
        )
        .build();

        let outcome = runtime.run(RunRequest::new("crm", "Who is C001?")).await;
        assert!(outcome.is_success(), "{:?}", outcome.failure);
        assert_eq!(outcome.tool_calls[0].arguments["customer"], "C001");
        assert_eq!(outcome.answer.as_deref(), Some("Mail jane@example.com"));
        assert_eq!(outcome.history[0].content, "Who is C001?");
    }

    #[derive(Default)]
    struct VecMemory {
        entries: Mutex<Vec<MemoryEntry>>,
    }

    #[async_trait]
    impl MemoryStore for VecMemory {
        async fn search(&self, user_id: &str, _query: &str, limit: usize) -> Result<Vec<MemoryEntry>, MemoryStoreError> {
            Ok(self
                .entries
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.user_id == user_id)
                .take(limit)
                .cloned()
                .collect())
        }

        async fn add(&self, entry: MemoryEntry) -> Result<(), MemoryStoreError> {
            self.entries.lock().unwrap().push(entry);
            Ok(())
        }
    }

    #[tokio::test]
    async fn memory_is_read_before_planning_and_written_after() {
        let memory = Arc::new(VecMemory::default());
        memory
            .add(MemoryEntry::new("u1", Role::User, "I live in Tokyo"))
            .await
            .unwrap();
        let graph = AgentGraph::builder()
            .agent(AgentSpec::new("assistant", "").with_agent_config("memory", json!("local")))
            .build()
            .unwrap();
        let runtime = Runtime::builder(
            graph,
            planner(|input| Ok(Step::final_answer(format!("recalled {}", input.memories.len())))),
        )
        .memory(memory.clone())
        .build();

        let outcome = runtime
            .run(RunRequest::new("assistant", "where do I live?").with_memory_user("u1"))
            .await;
        assert_eq!(outcome.answer.as_deref(), Some("recalled 1"));
        assert_eq!(memory.entries.lock().unwrap().len(), 3);

        // Without a user id the store is never touched.
        runtime.run(RunRequest::new("assistant", "again")).await;
        assert_eq!(memory.entries.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn pii_masks_history_and_memories_for_the_planner() {
        let memory = Arc::new(VecMemory::default());
        memory
            .add(MemoryEntry::new("u1", Role::User, "my id is C001"))
            .await
            .unwrap();
        let graph = AgentGraph::builder()
            .agent(
                AgentSpec::new("crm", "")
                    .with_agent_config("memory", json!("local"))
                    .with_agent_config("enable_pii", json!(true))
                    .with_agent_config("pii_mapping", json!({"C001": "<CUSTOMER_ID_1>"})),
            )
            .build()
            .unwrap();
        let runtime = Runtime::builder(
            graph,
            planner(|input| {
                let leaked = input.history.iter().any(|m| m.content.contains("C001"))
                    || input.memories.iter().any(|e| e.content.contains("C001"));
                Ok(Step::final_answer(format!(
                    "leaked={leaked} history={} memory={}",
                    input.history[0].content, input.memories[0].content
                )))
            }),
        )
        .memory(memory.clone())
        .build();

        let outcome = runtime
            .run(
                RunRequest::new("crm", "what do you know?")
                    .with_history(vec![ChatMessage::user("I am customer C001")])
                    .with_memory_user("u1"),
            )
            .await;
        assert!(outcome.is_success(), "{:?}", outcome.failure);
        assert_eq!(
            outcome.answer.as_deref(),
            Some("leaked=false history=I am customer C001 memory=my id is C001")
        );
        assert_eq!(outcome.history[0].content, "I am customer C001");
    }

    #[tokio::test]
    async fn history_is_persisted_only_on_request() {
        let sink = Arc::new(RecordingSink::default());
        let graph = AgentGraph::builder().agent(AgentSpec::new("a", "")).build().unwrap();
        let runtime = Runtime::builder(graph, planner(|_| Ok(Step::final_answer("hi there"))))
            .sink(sink.clone())
            .build();

        let outcome = runtime
            .run(RunRequest::new("a", "hello").with_history(vec![ChatMessage::user("earlier")]))
            .await;
        assert_eq!(outcome.history.len(), 3);
        assert!(sink.histories.lock().unwrap().is_empty());

        runtime.run(RunRequest::new("a", "hello").persist_history()).await;
        assert_eq!(sink.histories.lock().unwrap().len(), 1);
        assert_eq!(sink.runs.lock().unwrap().len(), 2);
    }
}
