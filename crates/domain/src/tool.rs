use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider / invocation tags
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The three structurally different sources of invocable tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolProviderType {
    /// Code shipped with the platform.
    Builtin,
    /// Declared via an OpenAPI/Swagger-style schema.
    Api,
    /// Another app exposed as a callable tool.
    Workflow,
}

impl fmt::Display for ToolProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Builtin => "builtin",
            Self::Api => "api",
            Self::Workflow => "workflow",
        };
        f.write_str(s)
    }
}

/// Where the surrounding generation request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokeFrom {
    WebApp,
    ServiceApi,
    Debugger,
}

/// Which execution context is invoking the tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolInvokeFrom {
    Agent,
    Workflow,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parameter schema
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Who supplies a parameter's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolParameterForm {
    /// Filled by the model at invocation time.
    Llm,
    /// Filled once at configuration time.
    Form,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolParameterType {
    String,
    Number,
    Boolean,
    Select,
    /// A FORM-only string that is stored encrypted and masked on read.
    SecretInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameterOption {
    pub value: String,
    pub label: String,
}

/// One typed parameter in a tool's capability schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    #[serde(rename = "type")]
    pub parameter_type: ToolParameterType,
    pub form: ToolParameterForm,
    #[serde(default)]
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<ToolParameterOption>,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, parameter_type: ToolParameterType) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            help: None,
            parameter_type,
            form: ToolParameterForm::Llm,
            required: false,
            default: None,
            options: Vec::new(),
        }
    }

    pub fn form(mut self, form: ToolParameterForm) -> Self {
        self.form = form;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn default_value(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn options<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = values
            .into_iter()
            .map(|v| {
                let value = v.into();
                ToolParameterOption {
                    label: value.clone(),
                    value,
                }
            })
            .collect();
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Identity / prompt-facing definition
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stable identity of a tool inside its provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolIdentity {
    pub name: String,
    pub label: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Tool definition exposed to the model (JSON Schema for parameters).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool output
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One typed chunk of a tool's response.
///
/// The engine flattens a sequence of these into a single plain-text summary
/// for the model and extracts binary-bearing chunks into message files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolInvokeMessage {
    Text {
        text: String,
    },
    Link {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    Image {
        url: String,
    },
    ImageLink {
        url: String,
    },
    Blob {
        data: Vec<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        /// Variable name to save the content under, if the tool asked.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        save_as: Option<String>,
    },
}

impl ToolInvokeMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}
