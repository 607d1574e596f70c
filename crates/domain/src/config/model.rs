use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model deployments / credential sets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One configured model deployment: a provider + model pair with one or
/// more credential sets to rotate across.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    /// Credential sets rotated by the load balancer. At least one.
    #[serde(default)]
    pub credentials: Vec<CredentialSetConfig>,
    /// How long a credential set that just failed is excluded from
    /// selection.
    #[serde(default = "d_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Capabilities advertised by this model.
    #[serde(default)]
    pub features: Vec<ModelFeature>,
    /// Dollars per 1 million prompt tokens (for usage pricing).
    #[serde(default)]
    pub input_price_per_1m: f64,
    /// Dollars per 1 million completion tokens.
    #[serde(default)]
    pub output_price_per_1m: f64,
}

impl ModelConfig {
    pub fn has_feature(&self, feature: ModelFeature) -> bool {
        self.features.contains(&feature)
    }
}

/// One named credential set for a deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSetConfig {
    #[serde(default)]
    pub name: String,
    pub api_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelFeature {
    ToolCall,
    StreamToolCall,
    Vision,
}

fn d_cooldown_secs() -> u64 {
    60
}
