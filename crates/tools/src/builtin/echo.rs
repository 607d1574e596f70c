//! Echo provider: return the given text unchanged. Mostly useful for
//! wiring checks in app debugging.

use std::sync::Arc;

use serde_json::Value;

use skein_domain::tool::{ToolIdentity, ToolInvokeMessage, ToolParameter, ToolParameterType};

use crate::error::ToolError;
use crate::registry::BuiltinProvider;
use crate::tool::{ToolExec, ToolRuntime, ToolSpec};

struct EchoExec;

#[async_trait::async_trait]
impl ToolExec for EchoExec {
    async fn invoke(
        &self,
        _runtime: &ToolRuntime,
        parameters: Value,
        _user_id: &str,
    ) -> Result<Vec<ToolInvokeMessage>, ToolError> {
        let text = parameters
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::ParameterValidation("text is required".into()))?;
        Ok(vec![ToolInvokeMessage::text(text)])
    }
}

pub fn echo_provider() -> BuiltinProvider {
    let spec = ToolSpec {
        identity: ToolIdentity {
            name: "echo".into(),
            label: "Echo".into(),
            provider: "echo".into(),
            icon: None,
        },
        description: "A tool that repeats the given text back.".into(),
        parameters: vec![ToolParameter::new("text", ToolParameterType::String)
            .required()
            .help("the text to repeat")],
    };
    BuiltinProvider::new("echo", "Echo").with_tool(spec, Arc::new(EchoExec))
}
