//! Builtin tool provider registry.
//!
//! Providers shipped with the platform are collected once into a
//! process-wide registry behind a `OnceLock`, so initialization is a
//! single atomic fill rather than a checked flag plus a lock. The
//! registry also keeps a tool-name to human label index used when
//! rendering thoughts.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use skein_domain::tool::ToolParameter;

use crate::builtin;
use crate::error::ToolError;
use crate::tool::{Tool, ToolExec, ToolRuntime, ToolSpec};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Builtin provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One in-process tool provider: a named bundle of tools plus an
/// optional credential schema.
pub struct BuiltinProvider {
    pub name: String,
    pub label: String,
    /// Empty schema = the provider runs without credentials.
    pub credential_schema: Vec<ToolParameter>,
    tools: Vec<(ToolSpec, Arc<dyn ToolExec>)>,
}

impl BuiltinProvider {
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            credential_schema: Vec::new(),
            tools: Vec::new(),
        }
    }

    pub fn with_credential_schema(mut self, schema: Vec<ToolParameter>) -> Self {
        self.credential_schema = schema;
        self
    }

    pub fn with_tool(mut self, spec: ToolSpec, exec: Arc<dyn ToolExec>) -> Self {
        self.tools.push((spec, exec));
        self
    }

    pub fn needs_credentials(&self) -> bool {
        !self.credential_schema.is_empty()
    }

    pub fn tool_specs(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.iter().map(|(spec, _)| spec)
    }

    /// Bind a named tool to the given runtime.
    pub fn resolve(&self, tool_name: &str, runtime: ToolRuntime) -> Result<Tool, ToolError> {
        self.tools
            .iter()
            .find(|(spec, _)| spec.identity.name == tool_name)
            .map(|(spec, exec)| Tool::new(spec.clone(), runtime, Arc::clone(exec)))
            .ok_or_else(|| ToolError::NotFound(tool_name.to_owned()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct BuiltinRegistry {
    providers: HashMap<String, Arc<BuiltinProvider>>,
    /// tool name -> display label, across all providers.
    labels: HashMap<String, String>,
}

impl BuiltinRegistry {
    pub fn with_providers(providers: Vec<BuiltinProvider>) -> Self {
        let mut map = HashMap::new();
        let mut labels = HashMap::new();
        for provider in providers {
            for spec in provider.tool_specs() {
                labels.insert(spec.identity.name.clone(), spec.identity.label.clone());
            }
            map.insert(provider.name.clone(), Arc::new(provider));
        }
        Self {
            providers: map,
            labels,
        }
    }

    pub fn get(&self, provider_name: &str) -> Option<Arc<BuiltinProvider>> {
        self.providers.get(provider_name).cloned()
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// Display label for a tool name, falling back to the name itself.
    pub fn tool_label<'a>(&'a self, tool_name: &'a str) -> &'a str {
        self.labels
            .get(tool_name)
            .map(String::as_str)
            .unwrap_or(tool_name)
    }
}

static REGISTRY: OnceLock<Arc<BuiltinRegistry>> = OnceLock::new();

/// The process-wide registry of shipped providers, built on first use.
pub fn builtin_registry() -> Arc<BuiltinRegistry> {
    REGISTRY
        .get_or_init(|| {
            let registry = BuiltinRegistry::with_providers(vec![
                builtin::time_provider(),
                builtin::echo_provider(),
            ]);
            tracing::debug!(
                providers = registry.providers.len(),
                "builtin tool registry initialized"
            );
            Arc::new(registry)
        })
        .clone()
}
