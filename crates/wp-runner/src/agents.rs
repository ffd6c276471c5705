//! Agent graph — agents in an arena with index-based sub-agent links,
//! validated when assembled.

use crate::RunnerError;
use std::collections::HashMap;
use std::sync::Arc;
use wp_config::{agent_config_schema, schema};
use wp_core::agent::{AgentBundle, AgentSpec};
use wp_core::config::EntityRef;
use wp_core::mcp::McpSpec;
use wp_tools::{Tool, ToolError, ToolRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId(usize);

impl AgentId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct AgentNode {
    pub spec: AgentSpec,
    pub sub_agents: Vec<AgentId>,
}

/// Immutable once built; shared by every run.
#[derive(Debug)]
pub struct AgentGraph {
    nodes: Vec<AgentNode>,
    by_name: HashMap<String, AgentId>,
    tools: ToolRegistry,
    mcps: HashMap<String, McpSpec>,
}

impl AgentGraph {
    pub fn builder() -> AgentGraphBuilder {
        AgentGraphBuilder::default()
    }

    pub fn id(&self, name: &str) -> Option<AgentId> {
        self.by_name.get(name).copied()
    }

    pub fn node(&self, id: AgentId) -> &AgentNode {
        &self.nodes[id.0]
    }

    pub fn get(&self, name: &str) -> Option<&AgentNode> {
        self.id(name).map(|id| self.node(id))
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn mcp(&self, name: &str) -> Option<&McpSpec> {
        self.mcps.get(name)
    }

    pub fn agent_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.spec.name.as_str()).collect()
    }

    /// Definitions as a portable bundle.
    pub fn to_bundle(&self) -> AgentBundle {
        let mut mcps: Vec<McpSpec> = self.mcps.values().cloned().collect();
        mcps.sort_by(|a, b| a.name.cmp(&b.name));
        AgentBundle {
            agents: self.nodes.iter().map(|n| n.spec.clone()).collect(),
            mcps,
        }
    }
}

#[derive(Default)]
pub struct AgentGraphBuilder {
    agents: Vec<AgentSpec>,
    mcps: Vec<McpSpec>,
    tools: ToolRegistry,
}

impl AgentGraphBuilder {
    pub fn agent(mut self, spec: AgentSpec) -> Self {
        self.agents.push(spec);
        self
    }

    pub fn mcp(mut self, spec: McpSpec) -> Self {
        self.mcps.push(spec);
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Result<Self, ToolError> {
        self.tools.register(tool)?;
        Ok(self)
    }

    pub fn bundle(mut self, bundle: AgentBundle) -> Self {
        self.agents.extend(bundle.agents);
        self.mcps.extend(bundle.mcps);
        self
    }

    /// Index agents, link sub-agents, check references and definition-scope
    /// configs, and reject delegation cycles. Nothing can run until this passes.
    pub fn build(self) -> Result<AgentGraph, RunnerError> {
        let mut by_name = HashMap::new();
        for (i, spec) in self.agents.iter().enumerate() {
            if by_name.insert(spec.name.clone(), AgentId(i)).is_some() {
                return Err(RunnerError::DuplicateAgent(spec.name.clone()));
            }
        }

        let mcps: HashMap<String, McpSpec> =
            self.mcps.into_iter().map(|m| (m.name.clone(), m)).collect();

        let mut nodes = Vec::with_capacity(self.agents.len());
        for spec in self.agents {
            let sub_agents = spec
                .agents
                .iter()
                .map(|name| {
                    by_name
                        .get(name)
                        .copied()
                        .ok_or_else(|| RunnerError::UnknownAgent(name.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?;

            for tool in &spec.tools {
                if !self.tools.contains(tool) {
                    return Err(RunnerError::UnknownTool {
                        agent: spec.name.clone(),
                        tool: tool.clone(),
                    });
                }
            }
            for mcp in &spec.mcps {
                if !mcps.contains_key(mcp) {
                    return Err(RunnerError::UnknownMcp {
                        agent: spec.name.clone(),
                        mcp: mcp.clone(),
                    });
                }
            }
            validate_definition(&spec, &self.tools)?;

            nodes.push(AgentNode { spec, sub_agents });
        }

        if let Some(path) = find_cycle(&nodes) {
            return Err(RunnerError::CyclicDelegation(path));
        }

        tracing::info!(agents = nodes.len(), tools = self.tools.len(), mcps = mcps.len(), "agent graph assembled");
        Ok(AgentGraph {
            nodes,
            by_name,
            tools: self.tools,
            mcps,
        })
    }
}

/// Definition-scope values must already match declared types; required
/// keys may still arrive at run time.
fn validate_definition(spec: &AgentSpec, tools: &ToolRegistry) -> Result<(), RunnerError> {
    schema::validate_present(
        &EntityRef::agent(&spec.name),
        &spec.agent_config,
        &agent_config_schema(),
    )?;
    for (name, config) in &spec.tool_configs {
        if let Some(tool) = tools.get(name) {
            schema::validate_present(
                &EntityRef::tool(name),
                config,
                &tool.descriptor().config_schema,
            )?;
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnPath,
    Done,
}

/// Depth-first search with a visited set; returns the first cycle as a name path.
fn find_cycle(nodes: &[AgentNode]) -> Option<Vec<String>> {
    let mut marks = vec![Mark::Unvisited; nodes.len()];
    let mut path: Vec<usize> = Vec::new();

    fn visit(
        i: usize,
        nodes: &[AgentNode],
        marks: &mut [Mark],
        path: &mut Vec<usize>,
    ) -> Option<Vec<String>> {
        marks[i] = Mark::OnPath;
        path.push(i);
        for child in &nodes[i].sub_agents {
            let c = child.0;
            match marks[c] {
                Mark::OnPath => {
                    let start = path.iter().position(|&p| p == c).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..]
                        .iter()
                        .map(|&p| nodes[p].spec.name.clone())
                        .collect();
                    cycle.push(nodes[c].spec.name.clone());
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = visit(c, nodes, marks, path) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }
        path.pop();
        marks[i] = Mark::Done;
        None
    }

    for i in 0..nodes.len() {
        if marks[i] == Mark::Unvisited {
            if let Some(cycle) = visit(i, nodes, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}
