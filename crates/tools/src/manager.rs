//! Tool resolution.
//!
//! Turns a `(provider kind, provider id, tool name)` selector into a
//! runnable [`Tool`] with decrypted credentials attached, and for agent
//! and workflow configurations additionally materializes the FORM
//! parameters: type-cast, option-checked, and secret-decrypted under the
//! configuration's own identity scope.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use skein_domain::tool::{
    InvokeFrom, ToolInvokeFrom, ToolParameterForm, ToolParameterType, ToolProviderType,
};

use crate::encryption::{self, ConfigIdentity};
use crate::error::ToolError;
use crate::provider::{ProviderStore, ToolProvider, WorkflowRunner};
use crate::registry::{builtin_registry, BuiltinRegistry};
use crate::tool::{Tool, ToolRuntime};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Selectors / configs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Identifies one tool within one provider.
#[derive(Debug, Clone)]
pub struct ToolSelector {
    pub provider_type: ToolProviderType,
    pub provider_id: String,
    pub tool_name: String,
}

/// An app's stored configuration for one tool: the selector plus the
/// FORM parameter settings (secret values stored encrypted).
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub selector: ToolSelector,
    pub parameters: HashMap<String, Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ToolManager {
    registry: Arc<BuiltinRegistry>,
    providers: Arc<ProviderStore>,
    workflow_runner: Option<Arc<dyn WorkflowRunner>>,
    max_workflow_call_depth: u32,
}

impl ToolManager {
    pub fn new(providers: Arc<ProviderStore>, max_workflow_call_depth: u32) -> Self {
        Self {
            registry: builtin_registry(),
            providers,
            workflow_runner: None,
            max_workflow_call_depth,
        }
    }

    /// Swap in a non-default builtin registry. Test seam.
    pub fn with_registry(mut self, registry: Arc<BuiltinRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_workflow_runner(mut self, runner: Arc<dyn WorkflowRunner>) -> Self {
        self.workflow_runner = Some(runner);
        self
    }

    pub fn registry(&self) -> &BuiltinRegistry {
        &self.registry
    }

    /// Resolve the provider half of a selector into the closed union.
    pub fn resolve_provider(
        &self,
        selector: &ToolSelector,
        tenant_id: &str,
    ) -> Result<ToolProvider, ToolError> {
        match selector.provider_type {
            ToolProviderType::Builtin => self
                .registry
                .get(&selector.provider_id)
                .map(ToolProvider::Builtin)
                .ok_or_else(|| ToolError::ProviderNotFound(selector.provider_id.clone())),
            ToolProviderType::Api => self
                .providers
                .api_provider(tenant_id, &selector.provider_id)?
                .map(ToolProvider::Api)
                .ok_or_else(|| ToolError::ProviderNotFound(selector.provider_id.clone())),
            ToolProviderType::Workflow => self
                .providers
                .workflow_provider(tenant_id, &selector.provider_id)
                .map(ToolProvider::Workflow)
                .ok_or_else(|| ToolError::ProviderNotFound(selector.provider_id.clone())),
        }
    }

    /// Resolve a selector into a runnable tool with credentials attached.
    ///
    /// `call_depth` is the workflow nesting level of the caller; it only
    /// matters for workflow providers, where exceeding the configured
    /// ceiling is rejected here rather than at invocation time.
    pub fn get_tool_runtime(
        &self,
        selector: &ToolSelector,
        tenant_id: &str,
        invoke_from: InvokeFrom,
        tool_invoke_from: ToolInvokeFrom,
        call_depth: u32,
    ) -> Result<Tool, ToolError> {
        let mut runtime = ToolRuntime::new(tenant_id, invoke_from);
        runtime.tool_invoke_from = tool_invoke_from;

        match self.resolve_provider(selector, tenant_id)? {
            ToolProvider::Builtin(provider) => {
                if provider.needs_credentials() {
                    let credentials = self
                        .providers
                        .builtin_credentials(tenant_id, &selector.provider_id)?
                        .ok_or_else(|| {
                            ToolError::CredentialValidation(format!(
                                "no credentials configured for provider {}",
                                selector.provider_id
                            ))
                        })?;
                    runtime.credentials = credentials;
                }
                provider.resolve(&selector.tool_name, runtime)
            }
            ToolProvider::Api(record) => {
                runtime.credentials = record.credentials.clone();
                record.resolve(&selector.tool_name, runtime)
            }
            ToolProvider::Workflow(record) => {
                let runner = self.workflow_runner.clone().ok_or_else(|| {
                    ToolError::NotSupported("workflow tools are not enabled".into())
                })?;

                let next_depth = call_depth + 1;
                if next_depth > self.max_workflow_call_depth {
                    return Err(ToolError::DepthExceeded {
                        depth: next_depth,
                        limit: self.max_workflow_call_depth,
                    });
                }
                record.resolve(&selector.tool_name, runtime, runner, next_depth)
            }
        }
    }

    /// Resolve a tool for an agent app: FORM parameters come from the
    /// agent's tool configuration, secrets scoped to `(agent, app)`.
    pub fn get_agent_tool_runtime(
        &self,
        tenant_id: &str,
        app_id: &str,
        config: &ToolConfig,
        invoke_from: InvokeFrom,
    ) -> Result<Tool, ToolError> {
        let mut tool = self.get_tool_runtime(
            &config.selector,
            tenant_id,
            invoke_from,
            ToolInvokeFrom::Agent,
            0,
        )?;
        let identity = ConfigIdentity::Agent {
            tenant_id: tenant_id.to_owned(),
            app_id: app_id.to_owned(),
        };
        tool.runtime.runtime_parameters =
            materialize_form_parameters(&tool, &config.parameters, &identity)?;
        Ok(tool)
    }

    /// Resolve a tool for a workflow node: secrets scoped to
    /// `(workflow, app, node)` so configurations cannot read each
    /// other's values even with identical parameter names.
    pub fn get_workflow_tool_runtime(
        &self,
        tenant_id: &str,
        app_id: &str,
        node_id: &str,
        config: &ToolConfig,
        invoke_from: InvokeFrom,
        call_depth: u32,
    ) -> Result<Tool, ToolError> {
        let mut tool = self.get_tool_runtime(
            &config.selector,
            tenant_id,
            invoke_from,
            ToolInvokeFrom::Workflow,
            call_depth,
        )?;
        let identity = ConfigIdentity::Workflow {
            tenant_id: tenant_id.to_owned(),
            app_id: app_id.to_owned(),
            node_id: node_id.to_owned(),
        };
        tool.runtime.runtime_parameters =
            materialize_form_parameters(&tool, &config.parameters, &identity)?;
        Ok(tool)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FORM parameter materialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn materialize_form_parameters(
    tool: &Tool,
    configured: &HashMap<String, Value>,
    identity: &ConfigIdentity,
) -> Result<HashMap<String, Value>, ToolError> {
    let mut materialized = HashMap::new();

    for param in &tool.spec.parameters {
        if param.form != ToolParameterForm::Form {
            continue;
        }

        let raw = configured
            .get(&param.name)
            .cloned()
            .or_else(|| param.default.clone());
        let Some(raw) = raw else {
            if param.required {
                return Err(ToolError::ParameterValidation(format!(
                    "required parameter {} is missing and has no default",
                    param.name
                )));
            }
            continue;
        };

        let value = cast_parameter_value(param, raw, identity)?;
        materialized.insert(param.name.clone(), value);
    }

    Ok(materialized)
}

fn cast_parameter_value(
    param: &skein_domain::tool::ToolParameter,
    raw: Value,
    identity: &ConfigIdentity,
) -> Result<Value, ToolError> {
    match param.parameter_type {
        ToolParameterType::String => Ok(match raw {
            Value::String(_) => raw,
            other => Value::String(other.to_string()),
        }),
        ToolParameterType::Number => match &raw {
            Value::Number(_) => Ok(raw),
            Value::String(s) => s
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| {
                    ToolError::ParameterValidation(format!(
                        "parameter {} expects a number, got {s:?}",
                        param.name
                    ))
                }),
            other => Err(ToolError::ParameterValidation(format!(
                "parameter {} expects a number, got {other}",
                param.name
            ))),
        },
        ToolParameterType::Boolean => match &raw {
            Value::Bool(_) => Ok(raw),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
            other => Err(ToolError::ParameterValidation(format!(
                "parameter {} expects a boolean, got {other}",
                param.name
            ))),
        },
        ToolParameterType::Select => {
            let Value::String(s) = &raw else {
                return Err(ToolError::ParameterValidation(format!(
                    "parameter {} expects one of its declared options",
                    param.name
                )));
            };
            if param.options.iter().any(|o| &o.value == s) {
                Ok(raw)
            } else {
                Err(ToolError::ParameterValidation(format!(
                    "parameter {} value {s:?} is not among the declared options",
                    param.name
                )))
            }
        }
        ToolParameterType::SecretInput => {
            let Value::String(encrypted) = &raw else {
                return Err(ToolError::ParameterValidation(format!(
                    "secret parameter {} must be a string",
                    param.name
                )));
            };
            let tenant = match identity {
                ConfigIdentity::Agent { tenant_id, .. }
                | ConfigIdentity::Workflow { tenant_id, .. } => tenant_id,
            };
            let plaintext = encryption::decrypt_secret(tenant, &identity.scope(), encrypted)?;
            Ok(Value::String(plaintext))
        }
    }
}
