//! The runnable tool type.
//!
//! A [`Tool`] pairs an immutable capability spec with a per-invocation
//! runtime context (tenant, decrypted credentials, materialized FORM
//! parameters). Resolution produces a fresh fork per call; the spec is
//! shared, the runtime never is.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use skein_domain::tool::{
    InvokeFrom, ToolDefinition, ToolIdentity, ToolInvokeFrom, ToolInvokeMessage, ToolParameter,
    ToolParameterForm, ToolParameterType,
};

use crate::error::ToolError;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-invocation context attached when a tool is resolved.
#[derive(Debug, Clone)]
pub struct ToolRuntime {
    pub tenant_id: String,
    /// Decrypted provider credentials.
    pub credentials: HashMap<String, String>,
    pub invoke_from: InvokeFrom,
    pub tool_invoke_from: ToolInvokeFrom,
    /// FORM parameter values, already cast and decrypted. Merged over the
    /// model-supplied arguments at invocation time.
    pub runtime_parameters: HashMap<String, Value>,
}

impl ToolRuntime {
    pub fn new(tenant_id: impl Into<String>, invoke_from: InvokeFrom) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            credentials: HashMap::new(),
            invoke_from,
            tool_invoke_from: ToolInvokeFrom::Agent,
            runtime_parameters: HashMap::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Spec + executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The immutable capability description of a tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub identity: ToolIdentity,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

/// What actually runs when a tool is invoked. One implementation per
/// provider kind, plus inline stubs in tests.
#[async_trait::async_trait]
pub trait ToolExec: Send + Sync {
    async fn invoke(
        &self,
        runtime: &ToolRuntime,
        parameters: Value,
        user_id: &str,
    ) -> Result<Vec<ToolInvokeMessage>, ToolError>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct Tool {
    pub spec: ToolSpec,
    pub runtime: ToolRuntime,
    exec: Arc<dyn ToolExec>,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("spec", &self.spec)
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}

impl Tool {
    pub fn new(spec: ToolSpec, runtime: ToolRuntime, exec: Arc<dyn ToolExec>) -> Self {
        Self {
            spec,
            runtime,
            exec,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.identity.name
    }

    /// A copy of this tool bound to a different runtime context.
    pub fn fork(&self, runtime: ToolRuntime) -> Self {
        Self {
            spec: self.spec.clone(),
            runtime,
            exec: Arc::clone(&self.exec),
        }
    }

    /// The parameters the model fills in (`form = llm` only).
    pub fn llm_parameters(&self) -> Vec<ToolParameter> {
        self.spec
            .parameters
            .iter()
            .filter(|p| p.form == ToolParameterForm::Llm)
            .cloned()
            .collect()
    }

    /// The prompt-facing definition: name, description, and a JSON Schema
    /// over the LLM-form parameters.
    pub fn definition(&self) -> ToolDefinition {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();

        for param in self.llm_parameters() {
            let mut schema = serde_json::Map::new();
            let json_type = match param.parameter_type {
                ToolParameterType::Number => "number",
                ToolParameterType::Boolean => "boolean",
                _ => "string",
            };
            schema.insert("type".into(), Value::String(json_type.into()));
            if let Some(help) = &param.help {
                schema.insert("description".into(), Value::String(help.clone()));
            }
            if param.parameter_type == ToolParameterType::Select {
                let options: Vec<Value> = param
                    .options
                    .iter()
                    .map(|o| Value::String(o.value.clone()))
                    .collect();
                schema.insert("enum".into(), Value::Array(options));
            }
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
            properties.insert(param.name.clone(), Value::Object(schema));
        }

        ToolDefinition {
            name: self.spec.identity.name.clone(),
            description: self.spec.description.clone(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }

    /// Invoke the tool. Materialized FORM values override whatever the
    /// model supplied for the same names.
    pub async fn invoke(
        &self,
        user_id: &str,
        parameters: Value,
    ) -> Result<Vec<ToolInvokeMessage>, ToolError> {
        let mut merged = match parameters {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(ToolError::ParameterValidation(format!(
                    "expected a parameter object, got {other}"
                )))
            }
        };
        for (name, value) in &self.runtime.runtime_parameters {
            merged.insert(name.clone(), value.clone());
        }

        self.exec
            .invoke(&self.runtime, Value::Object(merged), user_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoExec;

    #[async_trait::async_trait]
    impl ToolExec for EchoExec {
        async fn invoke(
            &self,
            _runtime: &ToolRuntime,
            parameters: Value,
            _user_id: &str,
        ) -> Result<Vec<ToolInvokeMessage>, ToolError> {
            Ok(vec![ToolInvokeMessage::text(parameters.to_string())])
        }
    }

    fn sample_tool() -> Tool {
        let spec = ToolSpec {
            identity: ToolIdentity {
                name: "echo".into(),
                label: "Echo".into(),
                provider: "test".into(),
                icon: None,
            },
            description: "repeats its input".into(),
            parameters: vec![
                ToolParameter::new("text", ToolParameterType::String)
                    .required()
                    .help("what to repeat"),
                ToolParameter::new("mode", ToolParameterType::Select)
                    .form(ToolParameterForm::Form)
                    .options(["plain", "loud"]),
            ],
        };
        Tool::new(
            spec,
            ToolRuntime::new("t1", InvokeFrom::Debugger),
            Arc::new(EchoExec),
        )
    }

    #[test]
    fn definition_excludes_form_parameters() {
        let def = sample_tool().definition();
        let props = def.parameters["properties"].as_object().unwrap();
        assert!(props.contains_key("text"));
        assert!(!props.contains_key("mode"));
        assert_eq!(def.parameters["required"][0], "text");
    }

    #[tokio::test]
    async fn runtime_parameters_override_model_arguments() {
        let mut tool = sample_tool();
        tool.runtime
            .runtime_parameters
            .insert("mode".into(), Value::String("loud".into()));

        let out = tool
            .invoke("u1", serde_json::json!({"text": "hi", "mode": "plain"}))
            .await
            .unwrap();
        let ToolInvokeMessage::Text { text } = &out[0] else {
            panic!("expected text");
        };
        assert!(text.contains("loud"));
    }
}
