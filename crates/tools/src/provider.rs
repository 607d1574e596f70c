//! The three tool provider kinds as a closed union.
//!
//! Resolution pattern-matches on the kind, so adding a fourth provider
//! kind is a compile error everywhere a match is not updated. Builtin
//! providers live in the process registry; API and workflow providers
//! are per-tenant rows held by [`ProviderStore`] with their credentials
//! stored encrypted.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use skein_domain::tool::{ToolIdentity, ToolInvokeMessage, ToolParameter};

use crate::encryption;
use crate::error::ToolError;
use crate::registry::BuiltinProvider;
use crate::tool::{Tool, ToolExec, ToolRuntime, ToolSpec};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Closed provider union
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A resolved tool provider of one of the three kinds.
pub enum ToolProvider {
    Builtin(Arc<BuiltinProvider>),
    Api(ApiProviderRecord),
    Workflow(WorkflowProviderRecord),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// API providers (OpenAPI-declared)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How an API provider authenticates its requests.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApiAuthType {
    #[default]
    None,
    /// Send `{header}: {prefix}{api_key}`.
    ApiKeyHeader,
    /// Append `?{param}={api_key}` to the query.
    ApiKeyQuery,
}

/// One operation extracted from an API provider's schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiToolSchema {
    pub name: String,
    pub description: String,
    pub method: String,
    pub url: String,
    pub parameters: Vec<ToolParameter>,
}

/// A per-tenant API provider row: schema-derived operations plus stored
/// (encrypted) credentials.
#[derive(Debug, Clone)]
pub struct ApiProviderRecord {
    pub name: String,
    pub tenant_id: String,
    pub auth_type: ApiAuthType,
    /// `api_key`, `api_key_header`, `api_key_prefix`, `api_key_param`;
    /// the key itself is stored encrypted.
    pub credentials: HashMap<String, String>,
    pub tools: Vec<ApiToolSchema>,
}

impl ApiProviderRecord {
    fn find_tool(&self, tool_name: &str) -> Result<&ApiToolSchema, ToolError> {
        self.tools
            .iter()
            .find(|t| t.name == tool_name)
            .ok_or_else(|| ToolError::NotFound(tool_name.to_owned()))
    }

    /// Bind a named operation to a runtime. Credentials in the runtime
    /// are expected to be decrypted already.
    pub fn resolve(&self, tool_name: &str, runtime: ToolRuntime) -> Result<Tool, ToolError> {
        let schema = self.find_tool(tool_name)?;
        let spec = ToolSpec {
            identity: ToolIdentity {
                name: schema.name.clone(),
                label: schema.name.clone(),
                provider: self.name.clone(),
                icon: None,
            },
            description: schema.description.clone(),
            parameters: schema.parameters.clone(),
        };
        let exec = ApiToolExec {
            schema: schema.clone(),
            auth_type: self.auth_type.clone(),
            client: reqwest::Client::new(),
        };
        Ok(Tool::new(spec, runtime, Arc::new(exec)))
    }
}

/// Executes one HTTP operation. Path placeholders (`{name}`) are filled
/// from the parameters; the rest travel as query (GET/DELETE) or JSON
/// body (everything else).
struct ApiToolExec {
    schema: ApiToolSchema,
    auth_type: ApiAuthType,
    client: reqwest::Client,
}

#[async_trait::async_trait]
impl ToolExec for ApiToolExec {
    async fn invoke(
        &self,
        runtime: &ToolRuntime,
        parameters: Value,
        _user_id: &str,
    ) -> Result<Vec<ToolInvokeMessage>, ToolError> {
        let params = parameters.as_object().cloned().unwrap_or_default();

        // Fill path placeholders, collect the leftovers.
        let mut url = self.schema.url.clone();
        let mut rest = serde_json::Map::new();
        for (name, value) in params {
            let placeholder = format!("{{{name}}}");
            if url.contains(&placeholder) {
                let text = match &value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                url = url.replace(&placeholder, &text);
            } else {
                rest.insert(name, value);
            }
        }

        let method = self.schema.method.to_ascii_uppercase();
        let mut request = match method.as_str() {
            "GET" => self.client.get(&url),
            "DELETE" => self.client.delete(&url),
            "PUT" => self.client.put(&url),
            _ => self.client.post(&url),
        };

        match self.auth_type {
            ApiAuthType::None => {}
            ApiAuthType::ApiKeyHeader => {
                let header = runtime
                    .credentials
                    .get("api_key_header")
                    .map(String::as_str)
                    .unwrap_or("Authorization");
                let prefix = runtime
                    .credentials
                    .get("api_key_prefix")
                    .map(String::as_str)
                    .unwrap_or("");
                let key = runtime.credentials.get("api_key").ok_or_else(|| {
                    ToolError::CredentialValidation("api_key is not configured".into())
                })?;
                request = request.header(header, format!("{prefix}{key}"));
            }
            ApiAuthType::ApiKeyQuery => {
                let param = runtime
                    .credentials
                    .get("api_key_param")
                    .map(String::as_str)
                    .unwrap_or("api_key");
                let key = runtime.credentials.get("api_key").ok_or_else(|| {
                    ToolError::CredentialValidation("api_key is not configured".into())
                })?;
                request = request.query(&[(param, key.as_str())]);
            }
        }

        if method == "GET" || method == "DELETE" {
            let query: Vec<(String, String)> = rest
                .iter()
                .map(|(k, v)| {
                    let text = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), text)
                })
                .collect();
            request = request.query(&query);
        } else {
            request = request.json(&Value::Object(rest));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ToolError::Invoke(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::Invoke(format!("reading response failed: {e}")))?;

        if !status.is_success() {
            return Err(ToolError::Invoke(format!(
                "HTTP {} - {}",
                status.as_u16(),
                body
            )));
        }
        Ok(vec![ToolInvokeMessage::text(body)])
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workflow providers (app-as-tool)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Runs another app's workflow on behalf of a tool call. Implemented by
/// the pipeline layer; the tool layer only carries the proxy.
#[async_trait::async_trait]
pub trait WorkflowRunner: Send + Sync {
    /// Run the workflow of `app_id` with the given inputs. `call_depth`
    /// is the nesting level of this invocation, for recursion guarding
    /// by the caller that resolves the next level.
    async fn run_workflow(
        &self,
        app_id: &str,
        inputs: Value,
        user_id: &str,
        call_depth: u32,
    ) -> Result<Value, skein_domain::Error>;
}

/// A per-tenant workflow-as-tool row.
#[derive(Debug, Clone)]
pub struct WorkflowProviderRecord {
    pub name: String,
    pub tenant_id: String,
    /// The app whose workflow this provider proxies.
    pub app_id: String,
    pub label: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl WorkflowProviderRecord {
    /// Bind the workflow proxy as a tool. Workflow providers expose
    /// exactly one tool, named after the provider.
    pub fn resolve(
        &self,
        tool_name: &str,
        runtime: ToolRuntime,
        runner: Arc<dyn WorkflowRunner>,
        call_depth: u32,
    ) -> Result<Tool, ToolError> {
        if tool_name != self.name {
            return Err(ToolError::NotFound(tool_name.to_owned()));
        }
        let spec = ToolSpec {
            identity: ToolIdentity {
                name: self.name.clone(),
                label: self.label.clone(),
                provider: self.name.clone(),
                icon: None,
            },
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        };
        let exec = WorkflowToolExec {
            app_id: self.app_id.clone(),
            call_depth,
            runner,
        };
        Ok(Tool::new(spec, runtime, Arc::new(exec)))
    }
}

struct WorkflowToolExec {
    app_id: String,
    call_depth: u32,
    runner: Arc<dyn WorkflowRunner>,
}

#[async_trait::async_trait]
impl ToolExec for WorkflowToolExec {
    async fn invoke(
        &self,
        _runtime: &ToolRuntime,
        parameters: Value,
        user_id: &str,
    ) -> Result<Vec<ToolInvokeMessage>, ToolError> {
        let outputs = self
            .runner
            .run_workflow(&self.app_id, parameters, user_id, self.call_depth)
            .await
            .map_err(|e| ToolError::Invoke(e.to_string()))?;

        let text = match outputs {
            Value::String(s) => s,
            other => other.to_string(),
        };
        Ok(vec![ToolInvokeMessage::text(text)])
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const CREDENTIAL_SECRET_KEYS: &[&str] = &["api_key"];

/// Per-tenant provider rows. Secret credential values are encrypted on
/// write and decrypted only inside the tool layer; reads for display go
/// through [`masked_credentials`](ProviderStore::masked_credentials).
#[derive(Default)]
pub struct ProviderStore {
    /// (tenant_id, provider_name) -> encrypted credentials.
    builtin_credentials: RwLock<HashMap<(String, String), HashMap<String, String>>>,
    api_providers: RwLock<HashMap<(String, String), ApiProviderRecord>>,
    workflow_providers: RwLock<HashMap<(String, String), WorkflowProviderRecord>>,
}

impl ProviderStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn scope(provider_name: &str) -> String {
        format!("provider:{provider_name}")
    }

    /// Store builtin provider credentials for a tenant, encrypting the
    /// secret-valued entries.
    pub fn set_builtin_credentials(
        &self,
        tenant_id: &str,
        provider_name: &str,
        credentials: HashMap<String, String>,
    ) -> Result<(), ToolError> {
        let encrypted = encrypt_map(tenant_id, &Self::scope(provider_name), credentials)?;
        self.builtin_credentials
            .write()
            .insert((tenant_id.to_owned(), provider_name.to_owned()), encrypted);
        Ok(())
    }

    /// Decrypted builtin credentials, or `None` if the tenant never
    /// configured the provider.
    pub fn builtin_credentials(
        &self,
        tenant_id: &str,
        provider_name: &str,
    ) -> Result<Option<HashMap<String, String>>, ToolError> {
        let stored = self
            .builtin_credentials
            .read()
            .get(&(tenant_id.to_owned(), provider_name.to_owned()))
            .cloned();
        match stored {
            Some(encrypted) => Ok(Some(decrypt_map(
                tenant_id,
                &Self::scope(provider_name),
                encrypted,
            )?)),
            None => Ok(None),
        }
    }

    pub fn upsert_api_provider(&self, mut record: ApiProviderRecord) -> Result<(), ToolError> {
        record.credentials = encrypt_map(
            &record.tenant_id,
            &Self::scope(&record.name),
            record.credentials,
        )?;
        self.api_providers
            .write()
            .insert((record.tenant_id.clone(), record.name.clone()), record);
        Ok(())
    }

    /// An API provider row with its credentials decrypted.
    pub fn api_provider(
        &self,
        tenant_id: &str,
        provider_name: &str,
    ) -> Result<Option<ApiProviderRecord>, ToolError> {
        let stored = self
            .api_providers
            .read()
            .get(&(tenant_id.to_owned(), provider_name.to_owned()))
            .cloned();
        match stored {
            Some(mut record) => {
                record.credentials =
                    decrypt_map(tenant_id, &Self::scope(provider_name), record.credentials)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    pub fn upsert_workflow_provider(&self, record: WorkflowProviderRecord) {
        self.workflow_providers
            .write()
            .insert((record.tenant_id.clone(), record.name.clone()), record);
    }

    pub fn workflow_provider(
        &self,
        tenant_id: &str,
        provider_name: &str,
    ) -> Option<WorkflowProviderRecord> {
        self.workflow_providers
            .read()
            .get(&(tenant_id.to_owned(), provider_name.to_owned()))
            .cloned()
    }

    /// Credentials for outward display: secrets masked, never decrypted
    /// into the clear.
    pub fn masked_credentials(
        &self,
        tenant_id: &str,
        provider_name: &str,
    ) -> Result<Option<HashMap<String, String>>, ToolError> {
        let decrypted = self.builtin_credentials(tenant_id, provider_name)?;
        Ok(decrypted.map(|map| {
            map.into_iter()
                .map(|(k, v)| {
                    if CREDENTIAL_SECRET_KEYS.contains(&k.as_str()) {
                        let masked = encryption::mask_credential(&v);
                        (k, masked)
                    } else {
                        (k, v)
                    }
                })
                .collect()
        }))
    }
}

fn encrypt_map(
    tenant_id: &str,
    scope: &str,
    map: HashMap<String, String>,
) -> Result<HashMap<String, String>, ToolError> {
    map.into_iter()
        .map(|(k, v)| {
            if CREDENTIAL_SECRET_KEYS.contains(&k.as_str()) {
                Ok((k, encryption::encrypt_secret(tenant_id, scope, &v)?))
            } else {
                Ok((k, v))
            }
        })
        .collect()
}

fn decrypt_map(
    tenant_id: &str,
    scope: &str,
    map: HashMap<String, String>,
) -> Result<HashMap<String, String>, ToolError> {
    map.into_iter()
        .map(|(k, v)| {
            if CREDENTIAL_SECRET_KEYS.contains(&k.as_str()) {
                Ok((k, encryption::decrypt_secret(tenant_id, scope, &v)?))
            } else {
                Ok((k, v))
            }
        })
        .collect()
}
