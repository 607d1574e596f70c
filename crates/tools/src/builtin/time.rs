//! Time provider: report the current time.

use std::sync::Arc;

use serde_json::Value;

use skein_domain::tool::{
    ToolIdentity, ToolInvokeMessage, ToolParameter, ToolParameterForm, ToolParameterType,
};

use crate::error::ToolError;
use crate::registry::BuiltinProvider;
use crate::tool::{ToolExec, ToolRuntime, ToolSpec};

struct CurrentTimeExec;

#[async_trait::async_trait]
impl ToolExec for CurrentTimeExec {
    async fn invoke(
        &self,
        _runtime: &ToolRuntime,
        parameters: Value,
        _user_id: &str,
    ) -> Result<Vec<ToolInvokeMessage>, ToolError> {
        let format = parameters
            .get("format")
            .and_then(|v| v.as_str())
            .unwrap_or("%Y-%m-%d %H:%M:%S%.3f");
        let zone = parameters
            .get("timezone")
            .and_then(|v| v.as_str())
            .unwrap_or("utc");

        let text = match zone {
            "local" => chrono::Local::now().format(format).to_string(),
            _ => chrono::Utc::now().format(format).to_string(),
        };
        Ok(vec![ToolInvokeMessage::text(text)])
    }
}

pub fn time_provider() -> BuiltinProvider {
    let spec = ToolSpec {
        identity: ToolIdentity {
            name: "current_time".into(),
            label: "Current Time".into(),
            provider: "time".into(),
            icon: None,
        },
        description: "A tool for getting the current time.".into(),
        parameters: vec![
            ToolParameter::new("format", ToolParameterType::String)
                .help("strftime format string, defaults to ISO-like output"),
            ToolParameter::new("timezone", ToolParameterType::Select)
                .form(ToolParameterForm::Form)
                .options(["utc", "local"])
                .default_value(Value::String("utc".into())),
        ],
    };
    BuiltinProvider::new("time", "Time").with_tool(spec, Arc::new(CurrentTimeExec))
}
