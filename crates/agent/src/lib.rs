//! Agent reasoning loops.
//!
//! Two strategies over the same shared runner state: chain-of-thought
//! (free text with `Action:` JSON blocks, parsed as it streams) and
//! function-calling (the model's native tool protocol). Both persist
//! one thought record per iteration, absorb tool failures into
//! observations, and cap the loop at the configured iteration budget
//! plus one forced-answer round.

pub mod base;
pub mod cot;
pub mod fc;
pub mod generate;
pub mod history;
pub mod parser;
pub mod scratchpad;

pub use base::{AgentRunInput, AgentRunner};
pub use cot::CotAgentRunner;
pub use fc::FcAgentRunner;
pub use generate::{run_agent, spawn_agent_run};
pub use history::organize_agent_history;
pub use parser::{CotChunk, CotOutputParser};
pub use scratchpad::{render_scratchpad, AgentAction, AgentScratchpadUnit};
