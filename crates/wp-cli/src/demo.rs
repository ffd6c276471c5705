//! Demonstration agents with a scripted planner standing in for a model.

use serde_json::json;
use std::sync::Arc;
use wp_core::agent::AgentSpec;
use wp_core::config::{ConfigField, ConfigFieldType};
use wp_core::tool::{PortSpec, PortType, SideEffect, ToolDescriptor};
use wp_runner::planner::PlannerInput;
use wp_runner::{AgentGraph, DelegationTask, FnPlanner, Planner, PlannerError, Step, ToolResult};
use wp_tools::local::ReadTextFileTool;
use wp_tools::{FnTool, Tool, ToolError};

pub const COORDINATOR: &str = "coordinator";
pub const WEATHER: &str = "weather";
pub const MATH: &str = "math";
pub const OPS: &str = "ops";
pub const READER: &str = "reader";

fn weather_tool() -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        ToolDescriptor::new("get_weather", "Current weather for a city")
            .with_input(PortSpec::required("city", PortType::String))
            .with_config_field(
                ConfigField::new("units", ConfigFieldType::Select)
                    .with_options(vec![json!("metric"), json!("imperial")])
                    .with_default(json!("metric")),
            ),
        |args, config| {
            let city = args["city"].as_str().unwrap_or_default();
            let celsius: i64 = match city.to_lowercase().as_str() {
                "tokyo" => 21,
                "london" => 12,
                "paris" => 15,
                _ => 18,
            };
            Ok(match config.get_str("units") {
                Some("imperial") => json!({"city": city, "temp": celsius * 9 / 5 + 32, "unit": "F"}),
                _ => json!({"city": city, "temp": celsius, "unit": "C"}),
            })
        },
    ))
}

fn add_tool() -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        ToolDescriptor::new("add", "Add two numbers")
            .with_input(PortSpec::required("a", PortType::Number))
            .with_input(PortSpec::required("b", PortType::Number)),
        |args, _| match (args["a"].as_f64(), args["b"].as_f64()) {
            (Some(a), Some(b)) if a.fract() == 0.0 && b.fract() == 0.0 => Ok(json!((a + b) as i64)),
            (Some(a), Some(b)) => Ok(json!(a + b)),
            _ => Err(ToolError::InvalidArguments {
                tool: "add".into(),
                message: "a and b must be numbers".into(),
            }),
        },
    ))
}

fn deploy_tool() -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        ToolDescriptor::new("deploy", "Deploy a service")
            .with_input(PortSpec::required("service", PortType::String))
            .with_side_effect(SideEffect::Write),
        |args, _| Ok(json!({"service": args["service"], "deployed": true})),
    ))
}

pub fn demo_graph() -> anyhow::Result<AgentGraph> {
    let tools = [weather_tool(), add_tool(), deploy_tool(), Arc::new(ReadTextFileTool::new()) as Arc<dyn Tool>];
    let mut builder = AgentGraph::builder()
        .agent(AgentSpec::new(WEATHER, "Answer weather questions with get_weather.").with_description("weather expert").with_tool("get_weather"))
        .agent(AgentSpec::new(MATH, "Answer arithmetic with add.").with_description("math expert").with_tool("add"))
        .agent(
            AgentSpec::new(COORDINATOR, "Route each part of the question to the right expert.")
                .with_description("routes questions")
                .with_sub_agent(WEATHER)
                .with_sub_agent(MATH)
                .with_agent_config("enable_a2a_token_streaming", json!(true))
                .with_agent_config("memory", json!("local")),
        )
        .agent(
            AgentSpec::new(OPS, "Deploy services on request.")
                .with_description("deploys services")
                .with_tool("deploy")
                .with_agent_config("hitl_enabled", json!(true))
                .with_agent_config("hitl_default_timeout_seconds", json!(30)),
        )
        .agent(
            AgentSpec::new(READER, "Summarize attached text files.")
                .with_description("reads attached files")
                .with_tool(wp_tools::local::READ_LOCAL_TEXT_FILE),
        );
    for tool in tools {
        builder = builder.tool(tool)?;
    }
    Ok(builder.build()?)
}

/// First two numbers in `text`.
fn operands(text: &str) -> Option<(f64, f64)> {
    let mut numbers = text
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter_map(|s| s.parse::<f64>().ok());
    Some((numbers.next()?, numbers.next()?))
}

/// City after the word "in", defaulting to Tokyo.
fn city(text: &str) -> String {
    text.split_whitespace()
        .skip_while(|w| !w.eq_ignore_ascii_case("in"))
        .nth(1)
        .map(|w| w.trim_matches(|c: char| !c.is_alphabetic()).to_string())
        .filter(|w| !w.is_empty())
        .unwrap_or_else(|| "Tokyo".to_string())
}

fn last_tool_result<'a>(input: &'a PlannerInput<'_>) -> Option<&'a ToolResult> {
    input.last_observation().and_then(|o| o.tool_result())
}

fn plan(input: &PlannerInput<'_>) -> Result<Step, PlannerError> {
    match input.agent {
        COORDINATOR => {
            if input.delegations().next().is_some() {
                let parts: Vec<String> = input
                    .delegations()
                    .map(|d| d.answer().map(str::to_string).unwrap_or_else(|| format!("{} could not answer", d.agent)))
                    .collect();
                return Ok(Step::final_answer(parts.join(" and ")));
            }
            let lower = input.message.to_lowercase();
            let mut tasks = Vec::new();
            if lower.contains("weather") {
                tasks.push(DelegationTask::new(WEATHER, input.message));
            }
            if operands(input.message).is_some() {
                tasks.push(DelegationTask::new(MATH, input.message));
            }
            match tasks.len() {
                0 => Ok(Step::final_answer("I can help with weather and arithmetic.")),
                1 => Ok(Step::Delegate(tasks.remove(0))),
                _ => Ok(Step::DelegateMany { tasks }),
            }
        }
        WEATHER => match last_tool_result(input) {
            None => Ok(Step::tool_call("get_weather", json!({"city": city(input.message)}))),
            Some(ToolResult::Completed { output }) => Ok(Step::final_answer(format!(
                "{} is {}{}",
                output["city"].as_str().unwrap_or_default(),
                output["temp"],
                output["unit"].as_str().unwrap_or_default()
            ))),
            Some(other) => Err(PlannerError(format!("weather lookup did not complete: {other:?}"))),
        },
        MATH => match (last_tool_result(input), operands(input.message)) {
            (None, Some((a, b))) => Ok(Step::tool_call("add", json!({"a": a, "b": b}))),
            (Some(ToolResult::Completed { output }), Some((a, b))) => Ok(Step::final_answer(format!("{a}+{b}={output}"))),
            _ => Ok(Step::final_answer("I need two numbers.")),
        },
        OPS => match last_tool_result(input) {
            None => {
                let service = input.message.split_whitespace().last().unwrap_or("web");
                Ok(Step::tool_call("deploy", json!({"service": service})))
            }
            Some(ToolResult::Completed { .. }) => Ok(Step::final_answer("Deployed.")),
            Some(ToolResult::NotExecuted { decision }) => Ok(Step::final_answer(format!("Deployment not run ({decision})."))),
            Some(ToolResult::Failed { message }) => Ok(Step::final_answer(format!("Deployment failed: {message}"))),
        },
        READER => match (last_tool_result(input), input.files.first()) {
            (_, None) => Ok(Step::final_answer("No file attached.")),
            (None, Some(file)) => Ok(Step::tool_call(
                wp_tools::local::READ_LOCAL_TEXT_FILE,
                json!({"path": file.path.to_string_lossy()}),
            )),
            (Some(ToolResult::Completed { output }), Some(_)) => {
                let content = output["content"].as_str().unwrap_or_default();
                let first_line = content.lines().next().unwrap_or_default();
                Ok(Step::final_answer(format!("{} bytes; starts with: {first_line}", output["size"])))
            }
            (Some(other), Some(_)) => Ok(Step::final_answer(format!("Could not read the file: {other:?}"))),
        },
        other => Err(PlannerError(format!("no script for agent {other}"))),
    }
}

pub fn demo_planner() -> Arc<dyn Planner> {
    Arc::new(FnPlanner::new(plan))
}
