//! Delegation Coordinator — hands subtasks to sub-agents, each in its own
//! child run with a fresh output store, and folds the answers back.

use crate::context::{RunContext, RunJob};
use crate::engine::{RunOutcome, Runtime};
use crate::events::RunEventKind;
use crate::pii::PiiMasker;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wp_core::failure::{Component, Failure, FailureKind};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DelegationTask {
    pub agent: String,
    pub subtask: String,
    /// Pass the parent's chat history to the child.
    #[serde(default)]
    pub share_history: bool,
}

impl DelegationTask {
    pub fn new(agent: impl Into<String>, subtask: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            subtask: subtask.into(),
            share_history: false,
        }
    }

    pub fn with_history(mut self) -> Self {
        self.share_history = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DelegationOutcome {
    Answer { text: String },
    Failed { failure: Failure },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DelegationResult {
    pub agent: String,
    pub subtask: String,
    /// Child run id; `None` when the child never started.
    pub run_id: Option<Uuid>,
    pub outcome: DelegationOutcome,
}

impl DelegationResult {
    pub fn answer(&self) -> Option<&str> {
        match &self.outcome {
            DelegationOutcome::Answer { text } => Some(text),
            DelegationOutcome::Failed { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, DelegationOutcome::Answer { .. })
    }

    fn failed(task: &DelegationTask, run_id: Option<Uuid>, message: String) -> Self {
        Self {
            agent: task.agent.clone(),
            subtask: task.subtask.clone(),
            run_id,
            outcome: DelegationOutcome::Failed {
                failure: Failure::new(
                    Component::DelegationCoordinator,
                    FailureKind::DelegationFailure,
                    message,
                ),
            },
        }
    }

    /// A child failure is wrapped, never propagated as the parent's own.
    fn from_outcome(task: &DelegationTask, outcome: RunOutcome) -> Self {
        match (outcome.answer, outcome.failure) {
            (Some(text), None) => Self {
                agent: task.agent.clone(),
                subtask: task.subtask.clone(),
                run_id: Some(outcome.run_id),
                outcome: DelegationOutcome::Answer { text },
            },
            (_, failure) => {
                let message = match failure {
                    Some(f) => format!("{}: {}", f.kind, f.message),
                    None => "child run produced no answer".to_string(),
                };
                Self::failed(task, Some(outcome.run_id), message)
            }
        }
    }

    pub(crate) fn masked(&self, masker: &PiiMasker) -> Self {
        let mut copy = self.clone();
        copy.subtask = masker.anonymize_text(&copy.subtask);
        if let DelegationOutcome::Answer { text } = &mut copy.outcome {
            *text = masker.anonymize_text(text);
        }
        copy
    }
}

impl Runtime {
    /// Child job for `task`, or the failure to report when `task.agent` is
    /// not one of the parent's declared sub-agents.
    fn child_job(&self, parent: &RunContext, task: &DelegationTask) -> Result<RunJob, DelegationResult> {
        let graph = self.graph();
        let declared = graph
            .node(parent.agent)
            .sub_agents
            .iter()
            .copied()
            .find(|id| graph.node(*id).spec.name == task.agent);
        let Some(child) = declared else {
            return Err(DelegationResult::failed(
                task,
                None,
                format!("{} is not a sub-agent of {}", task.agent, parent.agent_name),
            ));
        };

        Ok(RunJob {
            agent: child,
            message: parent.unmask_text(&task.subtask),
            history: if task.share_history {
                parent.history.clone()
            } else {
                Vec::new()
            },
            files: parent.files.clone(),
            runtime_config: parent.runtime_config.clone(),
            parent_run_id: Some(parent.run_id),
            memory_user_id: None,
            persist_chat_history: false,
            events: if parent.settings.enable_a2a_token_streaming {
                parent.emitter.sender()
            } else {
                None
            },
            cancel: parent.cancel.child_token(),
        })
    }

    async fn run_child(&self, task: DelegationTask, job: RunJob) -> DelegationResult {
        let outcome = self.execute(job).await;
        DelegationResult::from_outcome(&task, outcome)
    }

    /// Run one child to completion.
    pub(crate) async fn delegate(&self, parent: &RunContext, task: DelegationTask) -> DelegationResult {
        let job = match self.child_job(parent, &task) {
            Ok(job) => job,
            Err(result) => {
                tracing::warn!(parent = %parent.agent_name, child = %task.agent, "delegation to undeclared agent");
                return result;
            }
        };
        parent.emit(RunEventKind::DelegationStarted {
            child: task.agent.clone(),
            subtask: task.subtask.clone(),
        });
        let result = self.run_child(task, job).await;
        parent.emit(RunEventKind::DelegationFinished {
            child: result.agent.clone(),
            succeeded: result.is_success(),
        });
        result
    }

    /// Run independent children concurrently. Results keep task order.
    pub(crate) async fn delegate_many(
        &self,
        parent: &RunContext,
        tasks: Vec<DelegationTask>,
    ) -> Vec<DelegationResult> {
        enum Slot {
            Done(DelegationResult),
            Running(DelegationTask, tokio::task::JoinHandle<DelegationResult>),
        }

        let mut slots = Vec::with_capacity(tasks.len());
        for task in tasks {
            match self.child_job(parent, &task) {
                Err(result) => slots.push(Slot::Done(result)),
                Ok(job) => {
                    parent.emit(RunEventKind::DelegationStarted {
                        child: task.agent.clone(),
                        subtask: task.subtask.clone(),
                    });
                    let runtime = self.clone();
                    let owned = task.clone();
                    let handle = tokio::spawn(async move { runtime.run_child(owned, job).await });
                    slots.push(Slot::Running(task, handle));
                }
            }
        }

        let mut results = Vec::with_capacity(slots.len());
        for slot in slots {
            let result = match slot {
                Slot::Done(result) => result,
                Slot::Running(task, handle) => {
                    let result = match handle.await {
                        Ok(result) => result,
                        Err(e) => {
                            tracing::error!(child = %task.agent, "delegation task join error: {e}");
                            DelegationResult::failed(&task, None, format!("child task aborted: {e}"))
                        }
                    };
                    parent.emit(RunEventKind::DelegationFinished {
                        child: result.agent.clone(),
                        succeeded: result.is_success(),
                    });
                    result
                }
            };
            results.push(result);
        }
        results
    }
}
