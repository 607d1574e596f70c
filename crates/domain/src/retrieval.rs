use serde::{Deserialize, Serialize};

/// One ranked text segment returned by a dataset-retrieval call, with its
/// source citation. Forwarded to the client as generation metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieverResource {
    pub position: u32,
    pub dataset_id: String,
    pub dataset_name: String,
    pub document_id: String,
    pub document_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_id: Option<String>,
    pub score: f32,
    pub content: String,
}
