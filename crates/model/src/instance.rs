use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;

use skein_domain::config::{ModelConfig, ModelFeature};
use skein_domain::stream::{BoxStream, LlmResult, LlmStreamEvent, LlmUsage};

use crate::backend::{ChatRequest, LlmBackend, RerankedDocument};
use crate::balancer::{Clock, LoadBalancer, SystemClock};
use crate::error::InvokeError;
use crate::openai::OpenAiCompatBackend;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ModelInstance
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One concrete provider+model deployment with its credential sets.
///
/// All model access in the workspace goes through this type. Each call
/// walks the credential rotation order, skipping sets in cooldown; a
/// rotatable failure (rate limit, auth, connection) cools the offending
/// set down and moves on, and only when every set has been tried or
/// skipped does the error surface as [`InvokeError::CredentialsExhausted`].
pub struct ModelInstance {
    provider: String,
    model: String,
    features: Vec<ModelFeature>,
    backends: Vec<Arc<dyn LlmBackend>>,
    balancer: LoadBalancer,
    input_price_per_1m: f64,
    output_price_per_1m: f64,
}

impl ModelInstance {
    /// Build an instance over explicit backends (one per credential set).
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        features: Vec<ModelFeature>,
        backends: Vec<Arc<dyn LlmBackend>>,
        cooldown: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let balancer = LoadBalancer::new(backends.len(), cooldown, clock);
        Self {
            provider: provider.into(),
            model: model.into(),
            features,
            backends,
            balancer,
            input_price_per_1m: 0.0,
            output_price_per_1m: 0.0,
        }
    }

    /// Build from config, instantiating one OpenAI-compatible backend per
    /// credential set.
    pub fn from_config(cfg: &ModelConfig) -> Result<Self, skein_domain::Error> {
        if cfg.credentials.is_empty() {
            return Err(skein_domain::Error::Config(format!(
                "model {}/{} has no credential sets",
                cfg.provider, cfg.model
            )));
        }
        let backends: Vec<Arc<dyn LlmBackend>> = cfg
            .credentials
            .iter()
            .enumerate()
            .map(|(i, cred)| {
                let id = if cred.name.is_empty() {
                    format!("{}#{}", cfg.provider, i)
                } else {
                    cred.name.clone()
                };
                Arc::new(OpenAiCompatBackend::new(
                    id,
                    cred.base_url.clone(),
                    cred.api_key.clone(),
                    cfg.model.clone(),
                )) as Arc<dyn LlmBackend>
            })
            .collect();

        let mut instance = Self::new(
            cfg.provider.clone(),
            cfg.model.clone(),
            cfg.features.clone(),
            backends,
            Duration::from_secs(cfg.cooldown_secs),
            Arc::new(SystemClock),
        );
        instance.input_price_per_1m = cfg.input_price_per_1m;
        instance.output_price_per_1m = cfg.output_price_per_1m;
        Ok(instance)
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn supports_tool_call(&self) -> bool {
        self.features.contains(&ModelFeature::ToolCall)
    }

    pub fn supports_stream_tool_call(&self) -> bool {
        self.features.contains(&ModelFeature::StreamToolCall)
    }

    pub fn supports_vision(&self) -> bool {
        self.features.contains(&ModelFeature::Vision)
    }

    /// Apply this deployment's unit pricing to a token usage.
    pub fn price_usage(&self, usage: LlmUsage) -> LlmUsage {
        usage.priced(self.input_price_per_1m, self.output_price_per_1m)
    }

    /// Approximate token count for text this model has not tokenized.
    ///
    /// Used only to backfill usage when a run was stopped before the
    /// backend reported real counts; four characters per token is the
    /// conventional rough estimate.
    pub fn count_tokens(&self, text: &str) -> u32 {
        (text.chars().count() as u32).div_ceil(4)
    }

    // ── Invocation entry points ────────────────────────────────────

    /// Blocking chat completion with credential rotation.
    pub async fn invoke_llm(&self, req: &ChatRequest) -> Result<LlmResult, InvokeError> {
        let started = std::time::Instant::now();
        let mut result = self
            .round_robin(|backend| {
                let req = req.clone();
                Box::pin(async move { backend.chat(req).await })
            })
            .await?;
        if let Some(usage) = result.usage.take() {
            let mut usage = self.price_usage(usage);
            usage.latency_ms = started.elapsed().as_millis() as u64;
            result.usage = Some(usage);
        }
        Ok(result)
    }

    /// Streaming chat completion. Rotation applies to establishing the
    /// stream; an error mid-stream surfaces to the consumer as a stream
    /// item, not a retried request.
    pub async fn invoke_llm_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<LlmStreamEvent, InvokeError>>, InvokeError> {
        self.round_robin(|backend| {
            let req = req.clone();
            Box::pin(async move { backend.chat_stream(req).await })
        })
        .await
    }

    /// Embedding generation with credential rotation.
    pub async fn invoke_text_embedding(
        &self,
        input: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, InvokeError> {
        self.round_robin(|backend| {
            let input = input.clone();
            Box::pin(async move { backend.embeddings(input).await })
        })
        .await
    }

    /// Rerank with credential rotation.
    pub async fn invoke_rerank(
        &self,
        query: String,
        documents: Vec<String>,
        top_n: Option<usize>,
    ) -> Result<Vec<RerankedDocument>, InvokeError> {
        self.round_robin(|backend| {
            let query = query.clone();
            let documents = documents.clone();
            Box::pin(async move { backend.rerank(query, documents, top_n).await })
        })
        .await
    }

    // ── Rotation core ──────────────────────────────────────────────

    async fn round_robin<T, F>(&self, op: F) -> Result<T, InvokeError>
    where
        F: Fn(Arc<dyn LlmBackend>) -> BoxFuture<'static, Result<T, InvokeError>>,
    {
        let mut attempts = 0usize;
        let mut last: Option<InvokeError> = None;

        for index in self.balancer.rotation_order() {
            if self.balancer.in_cooldown(index) {
                continue;
            }
            attempts += 1;
            let backend = Arc::clone(&self.backends[index]);
            match op(backend).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_rotatable() => {
                    tracing::warn!(
                        provider = %self.provider,
                        model = %self.model,
                        credential_set = index,
                        error = %e,
                        "credential set failed, rotating"
                    );
                    self.balancer.mark_cooldown(index);
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(InvokeError::CredentialsExhausted {
            attempts,
            last: last
                .map(|e| e.to_string())
                .unwrap_or_else(|| "all credential sets in cooldown".to_owned()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Instant;

    /// Manually advanced clock shared with the balancer.
    struct FakeClock {
        now: Mutex<Instant>,
    }

    impl FakeClock {
        fn new() -> Self {
            Self {
                now: Mutex::new(Instant::now()),
            }
        }

        fn advance(&self, by: Duration) {
            *self.now.lock() += by;
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            *self.now.lock()
        }
    }

    /// A backend that fails with a fixed error a number of times, then
    /// succeeds.
    struct FlakyBackend {
        id: String,
        failures_left: Mutex<u32>,
        error: fn(String) -> InvokeError,
        calls: Mutex<u32>,
    }

    impl FlakyBackend {
        fn failing(id: &str, failures: u32, error: fn(String) -> InvokeError) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_owned(),
                failures_left: Mutex::new(failures),
                error,
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock()
        }
    }

    #[async_trait::async_trait]
    impl LlmBackend for FlakyBackend {
        async fn chat(&self, _req: ChatRequest) -> Result<LlmResult, InvokeError> {
            *self.calls.lock() += 1;
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                return Err((self.error)(format!("backend {}", self.id)));
            }
            Ok(LlmResult {
                text: format!("answered by {}", self.id),
                usage: Some(LlmUsage::from_tokens(10, 2)),
                ..Default::default()
            })
        }

        async fn chat_stream(
            &self,
            _req: ChatRequest,
        ) -> Result<BoxStream<'static, Result<LlmStreamEvent, InvokeError>>, InvokeError>
        {
            unimplemented!("not used in these tests")
        }

        async fn embeddings(&self, _input: Vec<String>) -> Result<Vec<Vec<f32>>, InvokeError> {
            unimplemented!("not used in these tests")
        }

        async fn rerank(
            &self,
            _query: String,
            _documents: Vec<String>,
            _top_n: Option<usize>,
        ) -> Result<Vec<RerankedDocument>, InvokeError> {
            unimplemented!("not used in these tests")
        }

        fn backend_id(&self) -> &str {
            &self.id
        }
    }

    fn instance_with(
        backends: Vec<Arc<dyn LlmBackend>>,
        clock: Arc<dyn Clock>,
    ) -> ModelInstance {
        ModelInstance::new(
            "openai",
            "gpt-test",
            vec![ModelFeature::ToolCall],
            backends,
            Duration::from_secs(60),
            clock,
        )
    }

    #[tokio::test]
    async fn rate_limit_rotates_to_second_credential_set() {
        let clock = Arc::new(FakeClock::new());
        let first = FlakyBackend::failing("first", u32::MAX, InvokeError::RateLimit);
        let second = FlakyBackend::failing("second", 0, InvokeError::RateLimit);
        let instance = instance_with(
            vec![
                first.clone() as Arc<dyn LlmBackend>,
                second.clone() as Arc<dyn LlmBackend>,
            ],
            clock.clone(),
        );

        let result = instance.invoke_llm(&ChatRequest::default()).await.unwrap();
        assert!(result.text.contains("second"));

        // The failed set is excluded from selection for the cooldown
        // window: a second invocation must not touch it.
        let first_calls = first.calls();
        instance.invoke_llm(&ChatRequest::default()).await.unwrap();
        assert_eq!(first.calls(), first_calls);

        // After the cooldown expires the first set is selectable again.
        clock.advance(Duration::from_secs(61));
        instance.invoke_llm(&ChatRequest::default()).await.unwrap();
        instance.invoke_llm(&ChatRequest::default()).await.unwrap();
        assert!(first.calls() > first_calls);
    }

    #[tokio::test]
    async fn exhausting_all_sets_reports_last_error() {
        let clock = Arc::new(FakeClock::new());
        let a = FlakyBackend::failing("a", u32::MAX, InvokeError::Auth);
        let b = FlakyBackend::failing("b", u32::MAX, InvokeError::RateLimit);
        let instance = instance_with(
            vec![a as Arc<dyn LlmBackend>, b as Arc<dyn LlmBackend>],
            clock,
        );

        let err = instance
            .invoke_llm(&ChatRequest::default())
            .await
            .unwrap_err();
        match err {
            InvokeError::CredentialsExhausted { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("expected CredentialsExhausted, got {other}"),
        }
    }

    #[tokio::test]
    async fn non_rotatable_error_propagates_immediately() {
        let clock = Arc::new(FakeClock::new());
        let a = FlakyBackend::failing("a", u32::MAX, InvokeError::BadRequest);
        let instance = instance_with(vec![a.clone() as Arc<dyn LlmBackend>], clock);

        let err = instance
            .invoke_llm(&ChatRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::BadRequest(_)));
        assert_eq!(a.calls(), 1);
    }

    #[test]
    fn token_estimate_rounds_up() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let instance = instance_with(
            vec![FlakyBackend::failing("x", 0, InvokeError::RateLimit) as Arc<dyn LlmBackend>],
            clock,
        );
        assert_eq!(instance.count_tokens(""), 0);
        assert_eq!(instance.count_tokens("abcd"), 1);
        assert_eq!(instance.count_tokens("abcde"), 2);
    }
}
