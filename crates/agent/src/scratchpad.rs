//! Chain-of-thought scratchpad units.
//!
//! One unit per reasoning iteration: the free-text thought, the action
//! the model chose (if any), and the observation the tool produced.
//! Rendered back into the prompt on the next iteration so the model
//! sees its own prior steps.

use serde_json::Value;

/// A tool call the model requested inside an `Action:` block.
#[derive(Debug, Clone)]
pub struct AgentAction {
    pub action_name: String,
    pub action_input: Value,
}

impl AgentAction {
    /// The reserved pseudo-tool that ends the loop. Matched
    /// case-insensitively; models are inconsistent about capitalization.
    pub fn is_final_answer(&self) -> bool {
        self.action_name.eq_ignore_ascii_case("final answer")
    }

    /// The input coerced to plain text: strings verbatim, anything else
    /// serialized as JSON.
    pub fn input_text(&self) -> String {
        match &self.action_input {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// One iteration of the reasoning loop.
#[derive(Debug, Clone, Default)]
pub struct AgentScratchpadUnit {
    pub thought: String,
    pub action: Option<AgentAction>,
    pub observation: Option<String>,
    pub agent_response: String,
}

impl AgentScratchpadUnit {
    /// Render this unit the way it appears in the prompt.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("Thought: ");
        out.push_str(self.thought.trim());
        out.push('\n');
        if let Some(action) = &self.action {
            out.push_str(&format!(
                "Action:\n```json\n{{\"action\": {}, \"action_input\": {}}}\n```\n",
                Value::String(action.action_name.clone()),
                action.action_input
            ));
        }
        if let Some(observation) = &self.observation {
            out.push_str("Observation: ");
            out.push_str(observation);
            out.push('\n');
        }
        out
    }
}

/// Render the whole scratchpad for the next prompt.
pub fn render_scratchpad(units: &[AgentScratchpadUnit]) -> String {
    units.iter().map(AgentScratchpadUnit::render).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_answer_matches_case_insensitively() {
        for name in ["Final Answer", "final answer", "FINAL ANSWER"] {
            let action = AgentAction {
                action_name: name.into(),
                action_input: Value::String("42".into()),
            };
            assert!(action.is_final_answer());
        }
        let action = AgentAction {
            action_name: "search".into(),
            action_input: Value::Null,
        };
        assert!(!action.is_final_answer());
    }

    #[test]
    fn input_text_coerces_non_strings_to_json() {
        let action = AgentAction {
            action_name: "Final Answer".into(),
            action_input: serde_json::json!({"answer": 42}),
        };
        assert_eq!(action.input_text(), r#"{"answer":42}"#);
    }

    #[test]
    fn render_includes_action_and_observation() {
        let unit = AgentScratchpadUnit {
            thought: "need the time".into(),
            action: Some(AgentAction {
                action_name: "current_time".into(),
                action_input: serde_json::json!({"timezone": "UTC"}),
            }),
            observation: Some("2026-08-24 12:00".into()),
            agent_response: String::new(),
        };
        let rendered = unit.render();
        assert!(rendered.starts_with("Thought: need the time\n"));
        assert!(rendered.contains(r#""action": "current_time""#));
        assert!(rendered.contains("Observation: 2026-08-24 12:00"));
    }
}
