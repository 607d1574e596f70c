use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Output moderation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Case-insensitive keywords that trigger answer replacement.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Text substituted for the whole visible answer on a hit.
    #[serde(default = "d_replacement")]
    pub replacement: String,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            keywords: Vec::new(),
            replacement: d_replacement(),
        }
    }
}

fn d_replacement() -> String {
    "The response was removed by the content policy.".to_owned()
}
