//! Command handlers.

use crate::cli::{BundleCommand, Command, DemoArgs};
use crate::demo;
use crate::state::AppState;
use anyhow::{bail, Context};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wp_core::agent::AgentBundle;
use wp_config::RuntimeConfig;
use wp_core::message::FileRef;
use wp_hitl::{ApprovalChannel, ConsoleChannel};
use wp_runner::events::{self, RunEventKind};
use wp_runner::{AgentGraph, RunRequest, Runtime};
use wp_trace::{export_json, RunQuery};

pub async fn execute(command: Command, state: &AppState) -> anyhow::Result<()> {
    match command {
        Command::Demo(DemoArgs {
            agent,
            message,
            unattended,
            user,
            files,
            save_history,
            config,
        }) => {
            let mut request = RunRequest::new(agent, message);
            for file in files {
                request = request.with_file(FileRef::new(file));
            }
            if let Some(user) = user {
                request = request.with_memory_user(user);
            }
            if save_history {
                request = request.persist_history();
            }
            if let Some(path) = config {
                request = request.with_runtime_config(load_runtime_config(&path)?);
            }
            run_demo(state, request, unattended).await
        }
        Command::Bundle(BundleCommand::Export { path }) => export_bundle(&path),
        Command::Bundle(BundleCommand::Check { path }) => check_bundle(&path),
        Command::Runs { agent } => list_runs(state, agent),
        Command::Trace { run_id } => {
            let trace = state.trace_store.run_trace(run_id)?;
            println!("{}", export_json(&trace)?);
            Ok(())
        }
    }
}

async fn run_demo(state: &AppState, request: RunRequest, unattended: bool) -> anyhow::Result<()> {
    let mut builder = Runtime::builder(demo::demo_graph()?, demo::demo_planner())
        .sink(state.trace_store.clone())
        .memory(state.memory.clone());
    if !unattended {
        builder = builder.approval_channel(Arc::new(ConsoleChannel::stdio()) as Arc<dyn ApprovalChannel>);
    }
    let runtime = builder.build();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling run");
            on_interrupt.cancel();
        }
    });

    let (tx, mut rx) = events::channel();
    let root = request.agent.clone();
    let printer = tokio::spawn(async move {
        let mut streamed = false;
        while let Some(event) = rx.recv().await {
            match event.kind {
                RunEventKind::AnswerChunk { text } if event.agent == root => {
                    streamed = true;
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                }
                RunEventKind::FinalAnswer { text } if event.agent == root => {
                    if streamed {
                        println!();
                    } else {
                        println!("{text}");
                    }
                }
                kind => tracing::debug!(agent = %event.agent, run_id = %event.run_id, ?kind, "event"),
            }
        }
    });

    let outcome = runtime.run_with(request, Some(tx), cancel).await;
    let _ = printer.await;

    match &outcome.failure {
        None => {
            tracing::info!(run_id = %outcome.run_id, steps = outcome.steps, "run finished");
            println!("run {}", outcome.run_id);
            Ok(())
        }
        Some(failure) => bail!("run {} failed: {failure}", outcome.run_id),
    }
}

/// Per-run configuration: the RuntimeGlobal tables plus `agents.<name>` scoped tables.
fn load_runtime_config(path: &Path) -> anyhow::Result<RuntimeConfig> {
    let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(RuntimeConfig::from_json(&json)?)
}

fn export_bundle(path: &Path) -> anyhow::Result<()> {
    let bundle = demo::demo_graph()?.to_bundle();
    std::fs::write(path, bundle.to_json()?).with_context(|| format!("writing {}", path.display()))?;
    println!("wrote {} agents to {}", bundle.agents.len(), path.display());
    Ok(())
}

/// Assemble a bundle against the demo tools; reports definition-time errors.
fn check_bundle(path: &Path) -> anyhow::Result<()> {
    let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let bundle = AgentBundle::from_json(&json)?;
    let demo_tools = demo::demo_graph()?;
    let mut builder = AgentGraph::builder().bundle(bundle);
    for descriptor in demo_tools.tools().descriptors() {
        if let Some(tool) = demo_tools.tools().get(&descriptor.name) {
            builder = builder.tool(tool)?;
        }
    }
    let graph = builder.build()?;
    println!("ok: {}", graph.agent_names().join(", "));
    Ok(())
}

fn list_runs(state: &AppState, agent: Option<String>) -> anyhow::Result<()> {
    let runs = state.trace_store.query_runs(&RunQuery {
        agent,
        top_level_only: true,
        limit: Some(20),
        ..Default::default()
    })?;
    if runs.is_empty() {
        println!("no runs recorded in {}", state.data_dir.display());
    }
    for run in runs {
        println!(
            "{}  {:<12} {:?}  steps={}  {}",
            run.run_id,
            run.agent,
            run.status,
            run.steps,
            run.started_at.to_rfc3339()
        );
    }
    Ok(())
}
