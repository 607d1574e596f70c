//! Dataset retriever tool.
//!
//! Retrieval-augmented apps expose their knowledge bases to the agent
//! as one more tool, indistinguishable in shape from any other. The
//! actual ranking lives behind [`DatasetRetrieval`]; citations flow out
//! through [`RetrievalCallback`] so the queue layer can publish them.

use std::sync::Arc;

use serde_json::Value;

use skein_domain::retrieval::RetrieverResource;
use skein_domain::tool::{InvokeFrom, ToolIdentity, ToolInvokeMessage, ToolParameter, ToolParameterType};

use crate::error::ToolError;
use crate::tool::{Tool, ToolExec, ToolRuntime, ToolSpec};

/// One ranked text segment from a retrieval call.
#[derive(Debug, Clone)]
pub struct RetrievedSegment {
    pub content: String,
    pub score: f32,
    pub dataset_id: String,
    pub dataset_name: String,
    pub document_id: String,
    pub document_name: String,
    pub segment_id: Option<String>,
}

/// The retrieval backend: query in, ranked segments out.
#[async_trait::async_trait]
pub trait DatasetRetrieval: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        dataset_ids: &[String],
        top_k: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<RetrievedSegment>, skein_domain::Error>;
}

/// Receives source citations for segments shown to the model.
#[async_trait::async_trait]
pub trait RetrievalCallback: Send + Sync {
    async fn on_retrieved(&self, resources: Vec<RetrieverResource>);
}

/// Retrieval knobs for one app.
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub dataset_ids: Vec<String>,
    pub top_k: usize,
    pub score_threshold: Option<f32>,
}

struct DatasetRetrieverExec {
    settings: RetrievalSettings,
    retrieval: Arc<dyn DatasetRetrieval>,
    callback: Option<Arc<dyn RetrievalCallback>>,
}

#[async_trait::async_trait]
impl ToolExec for DatasetRetrieverExec {
    async fn invoke(
        &self,
        _runtime: &ToolRuntime,
        parameters: Value,
        _user_id: &str,
    ) -> Result<Vec<ToolInvokeMessage>, ToolError> {
        let query = parameters
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::ParameterValidation("query is required".into()))?;

        let segments = self
            .retrieval
            .retrieve(
                query,
                &self.settings.dataset_ids,
                self.settings.top_k,
                self.settings.score_threshold,
            )
            .await
            .map_err(|e| ToolError::Invoke(e.to_string()))?;

        if segments.is_empty() {
            return Ok(vec![ToolInvokeMessage::text(
                "no documents were found in the datasets",
            )]);
        }

        if let Some(callback) = &self.callback {
            let resources: Vec<RetrieverResource> = segments
                .iter()
                .enumerate()
                .map(|(i, seg)| RetrieverResource {
                    position: (i + 1) as u32,
                    dataset_id: seg.dataset_id.clone(),
                    dataset_name: seg.dataset_name.clone(),
                    document_id: seg.document_id.clone(),
                    document_name: seg.document_name.clone(),
                    segment_id: seg.segment_id.clone(),
                    score: seg.score,
                    content: seg.content.clone(),
                })
                .collect();
            callback.on_retrieved(resources).await;
        }

        let text = segments
            .iter()
            .map(|seg| seg.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Ok(vec![ToolInvokeMessage::text(text)])
    }
}

/// Build the retriever tool for an app's datasets.
pub fn dataset_retriever_tool(
    tenant_id: &str,
    invoke_from: InvokeFrom,
    settings: RetrievalSettings,
    retrieval: Arc<dyn DatasetRetrieval>,
    callback: Option<Arc<dyn RetrievalCallback>>,
) -> Tool {
    let spec = ToolSpec {
        identity: ToolIdentity {
            name: "dataset_retriever".into(),
            label: "Knowledge Retrieval".into(),
            provider: "dataset".into(),
            icon: None,
        },
        description: "A tool for querying the app's knowledge bases. \
                      Use it when the question may be answered by stored documents."
            .into(),
        parameters: vec![ToolParameter::new("query", ToolParameterType::String)
            .required()
            .help("the question to search the knowledge bases with")],
    };
    Tool::new(
        spec,
        ToolRuntime::new(tenant_id, invoke_from),
        Arc::new(DatasetRetrieverExec {
            settings,
            retrieval,
            callback,
        }),
    )
}
