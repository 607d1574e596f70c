use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Hard ceiling on the configured iteration budget. The effective loop
/// bound is `min(max_iterations, MAX_ITERATIONS_CEILING) + 1`, where the
/// extra iteration runs with tool definitions stripped so the model is
/// forced to answer.
pub const MAX_ITERATIONS_CEILING: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Requested reasoning-iteration budget per user turn.
    #[serde(default = "d_max_iterations")]
    pub max_iterations: u32,
    /// Reasoning strategy for this app.
    #[serde(default)]
    pub strategy: AgentStrategy,
    /// Maximum nesting depth for workflow-as-tool calls.
    #[serde(default = "d_workflow_depth")]
    pub max_workflow_call_depth: u32,
}

impl AgentConfig {
    /// The enforced loop bound for one user turn.
    pub fn max_iteration_steps(&self) -> u32 {
        self.max_iterations.min(MAX_ITERATIONS_CEILING) + 1
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: d_max_iterations(),
            strategy: AgentStrategy::default(),
            max_workflow_call_depth: d_workflow_depth(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStrategy {
    /// Free-text reasoning with embedded `Action:` JSON blocks.
    ChainOfThought,
    /// The model's native tool-call protocol.
    #[default]
    FunctionCalling,
}

fn d_max_iterations() -> u32 {
    5
}

fn d_workflow_depth() -> u32 {
    5
}
