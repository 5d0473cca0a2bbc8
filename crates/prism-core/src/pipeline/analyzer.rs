//! Request orchestration: validation, prompt resolution, caching, admission
//! control and extraction around one backend call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;

use super::admission::{AdmissionGate, GateStatus};
use super::hash::Fingerprint;
use super::inflight::{Claim, InFlight};
use super::validate::Validator;
use crate::cache::ResultCache;
use crate::config::{Config, LimitsConfig};
use crate::error::Result;
use crate::extract::extract;
use crate::llm::{BackendClient, ClientOptions, LlmProviderFactory};
use crate::prompt::PromptStore;
use crate::types::{AnalysisRequest, AnalysisResult, MimeType};

/// Orchestration settings.
#[derive(Debug, Clone)]
pub struct AnalyzerOptions {
    /// Requests allowed to call the backend at once
    pub max_concurrency: usize,
    /// Requests allowed to wait for a slot before new ones are refused
    pub max_queue_depth: usize,
    /// Share one backend call between identical concurrent requests
    pub single_flight: bool,
    /// Lifetime of cached results
    pub cache_ttl: Duration,
    /// Request validation limits
    pub limits: LimitsConfig,
    /// Prompt used by [`Analyzer::request`]
    pub default_prompt_id: String,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl AnalyzerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrency: config.pipeline.max_concurrency,
            max_queue_depth: config.pipeline.max_queue_depth,
            single_flight: config.pipeline.single_flight,
            cache_ttl: config.cache_ttl(),
            limits: config.limits.clone(),
            default_prompt_id: config.prompts.default_id.clone(),
        }
    }
}

/// The image-analysis pipeline.
///
/// Every failure is reported as an [`AnalysisResult::Failure`]; `analyze`
/// never returns an error or panics on bad input. Share one `Analyzer` (for
/// example behind an `Arc`) so that all callers go through the same gate,
/// cache and single-flight registry.
pub struct Analyzer {
    client: BackendClient,
    prompts: PromptStore,
    cache: ResultCache,
    validator: Validator,
    gate: AdmissionGate,
    inflight: Option<InFlight>,
    cache_ttl: Duration,
    default_prompt_id: String,
}

impl Analyzer {
    /// Assemble a pipeline from explicit collaborators.
    pub fn new(
        client: BackendClient,
        prompts: PromptStore,
        cache: ResultCache,
        options: AnalyzerOptions,
    ) -> Self {
        Self {
            client,
            prompts,
            cache,
            validator: Validator::new(options.limits),
            gate: AdmissionGate::new(options.max_concurrency, options.max_queue_depth),
            inflight: options.single_flight.then(InFlight::new),
            cache_ttl: options.cache_ttl,
            default_prompt_id: options.default_prompt_id,
        }
    }

    /// Build the configured provider, prompt directory and cache.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let provider = LlmProviderFactory::create(&config.backend, &config.llm)?;
        let client = BackendClient::new(provider, ClientOptions::from_config(&config.backend));
        tracing::debug!(
            provider = client.provider_name(),
            max_concurrency = config.pipeline.max_concurrency,
            cache = config.cache.enabled,
            "Initializing analyzer"
        );
        Ok(Self::new(
            client,
            PromptStore::from_config(config),
            ResultCache::from_config(&config.cache),
            AnalyzerOptions::from_config(config),
        ))
    }

    /// Build a request that uses the default prompt.
    pub fn request(
        &self,
        payload: impl Into<Arc<[u8]>>,
        mime_type: impl Into<String>,
    ) -> AnalysisRequest {
        AnalysisRequest::new(payload, mime_type, self.default_prompt_id.as_str())
    }

    /// Analyze one image.
    ///
    /// Dropping the returned future cancels the request: any backend call is
    /// aborted, its gate slot or queue position is released, and nothing is
    /// written to the cache.
    pub async fn analyze(&self, request: &AnalysisRequest) -> AnalysisResult {
        let mime_type = match self.validator.validate(request) {
            Ok(mime_type) => mime_type,
            Err(e) => {
                tracing::debug!(prompt_id = %request.prompt_id, "Rejected request: {e}");
                return e.into();
            }
        };

        let prompt = match self.prompts.load(&request.prompt_id).await {
            Ok(prompt) => prompt,
            Err(e) => {
                tracing::warn!(prompt_id = %request.prompt_id, "Prompt unavailable: {e}");
                return e.into();
            }
        };

        let fingerprint = Fingerprint::compute(&request.prompt_id, &request.payload);
        let Some(inflight) = &self.inflight else {
            if let Some(hit) = self.cache.get(&fingerprint) {
                return hit;
            }
            return self.run(fingerprint, &prompt.text, request, mime_type).await;
        };

        loop {
            if let Some(hit) = self.cache.get(&fingerprint) {
                return hit;
            }
            match inflight.claim(fingerprint) {
                Claim::Leader(leader) => {
                    let result = self.run(fingerprint, &prompt.text, request, mime_type).await;
                    leader.complete(&result);
                    return result;
                }
                Claim::Follower(follower) => {
                    if let Some(result) = follower.wait().await {
                        return result;
                    }
                    // Leader was cancelled; try to take over
                }
            }
        }
    }

    /// Analyze many images concurrently. Results are in input order.
    ///
    /// Requests share the admission gate with every other caller, so a batch
    /// larger than the gate's capacity plus queue depth sees `Overloaded`
    /// failures for the excess.
    pub async fn analyze_batch(&self, requests: &[AnalysisRequest]) -> Vec<AnalysisResult> {
        join_all(requests.iter().map(|request| self.analyze(request))).await
    }

    /// Admit, invoke, extract, and cache a single request.
    async fn run(
        &self,
        fingerprint: Fingerprint,
        prompt: &str,
        request: &AnalysisRequest,
        mime_type: MimeType,
    ) -> AnalysisResult {
        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(e) => return e.into(),
        };

        let start = Instant::now();
        let output = match self.client.invoke(prompt, &request.payload, mime_type).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(fingerprint = %fingerprint.short(), "Backend call failed: {e}");
                return e.into();
            }
        };

        let result = extract(&output.text);
        tracing::debug!(
            fingerprint = %fingerprint.short(),
            model = %output.model,
            attempts = output.attempts,
            success = result.is_success(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Analysis complete"
        );
        if result.is_cacheable() {
            self.cache.put(fingerprint, result.clone(), self.cache_ttl);
        }
        result
    }

    /// Current admission gate occupancy.
    pub fn gate_status(&self) -> GateStatus {
        self.gate.status()
    }

    pub fn prompts(&self) -> &PromptStore {
        &self.prompts
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn client(&self) -> &BackendClient {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::MockProvider;
    use crate::llm::LlmProvider;
    use crate::prompt::StaticSource;
    use crate::types::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

    fn request() -> AnalysisRequest {
        AnalysisRequest::new(JPEG, "image/jpeg", "learning")
    }

    fn client_options() -> ClientOptions {
        ClientOptions {
            timeout_ms: 5000,
            retry_attempts: 0,
            retry_delay_ms: 5,
            max_retry_delay_ms: 20,
            ..ClientOptions::default()
        }
    }

    fn analyzer_with(
        provider: impl LlmProvider + 'static,
        client: ClientOptions,
        options: AnalyzerOptions,
    ) -> Analyzer {
        let prompts = StaticSource::new().with("learning", "Describe the image as JSON.");
        Analyzer::new(
            BackendClient::new(Arc::new(provider), client),
            PromptStore::new(Arc::new(prompts)),
            ResultCache::new(16),
            options,
        )
    }

    fn analyzer(provider: MockProvider) -> (Analyzer, Arc<AtomicU32>) {
        let calls = provider.call_count_handle();
        let analyzer = analyzer_with(provider, client_options(), AnalyzerOptions::default());
        (analyzer, calls)
    }

    #[tokio::test]
    async fn test_analyze_success() {
        let (analyzer, calls) = analyzer(MockProvider::success("```json\n{\"a\": 1}\n```"));
        let result = analyzer.analyze(&request()).await;
        assert!(result.is_success(), "{result:?}");
        assert_eq!(result.data().unwrap()["a"], 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_prompt_request() {
        let (analyzer, _) = analyzer(MockProvider::success("{}"));
        let request = analyzer.request(JPEG, "image/jpeg");
        assert_eq!(request.prompt_id, "learning");
        assert!(analyzer.analyze(&request).await.is_success());
    }

    #[tokio::test]
    async fn test_identical_requests_hit_cache() {
        let (analyzer, calls) = analyzer(MockProvider::success(r#"{"label": "cat"}"#));
        let first = analyzer.analyze(&request()).await;
        let second = analyzer.analyze(&request()).await;
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(analyzer.cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn test_prompt_id_is_part_of_cache_key() {
        let provider = MockProvider::success("{}");
        let calls = provider.call_count_handle();
        let prompts = StaticSource::new()
            .with("learning", "Describe.")
            .with("receipts", "Itemize.");
        let analyzer = Analyzer::new(
            BackendClient::new(Arc::new(provider), client_options()),
            PromptStore::new(Arc::new(prompts)),
            ResultCache::new(16),
            AnalyzerOptions::default(),
        );

        analyzer.analyze(&request()).await;
        analyzer
            .analyze(&AnalysisRequest::new(JPEG, "image/jpeg", "receipts"))
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_payload_never_reaches_backend() {
        let (analyzer, calls) = analyzer(MockProvider::success("{}"));
        let result = analyzer
            .analyze(&AnalysisRequest::new(Vec::new(), "image/jpeg", "learning"))
            .await;
        assert_eq!(result.kind(), Some(ErrorKind::InvalidRequest));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_prompt() {
        let (analyzer, calls) = analyzer(MockProvider::success("{}"));
        let result = analyzer
            .analyze(&AnalysisRequest::new(JPEG, "image/jpeg", "missing"))
            .await;
        assert_eq!(result.kind(), Some(ErrorKind::PromptMissing));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeouts_exhaust_retries_and_are_not_cached() {
        let provider = MockProvider::success("{}").with_delay(Duration::from_secs(5));
        let calls = provider.call_count_handle();
        let client = ClientOptions {
            timeout_ms: 20,
            retry_attempts: 2,
            ..client_options()
        };
        let analyzer = analyzer_with(provider, client, AnalyzerOptions::default());

        let result = analyzer.analyze(&request()).await;
        assert_eq!(result.kind(), Some(ErrorKind::BackendUnavailable));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(analyzer.cache().is_empty());

        // Not memoized: the next call goes back to the backend
        analyzer.analyze(&request()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_rejection_not_cached() {
        let (analyzer, calls) = analyzer(MockProvider::failing(Some(403), "forbidden"));
        let result = analyzer.analyze(&request()).await;
        assert_eq!(result.kind(), Some(ErrorKind::BackendRejected));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(analyzer.cache().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_output_is_cached() {
        let (analyzer, calls) = analyzer(MockProvider::success("I can't see any image."));
        let first = analyzer.analyze(&request()).await;
        assert_eq!(first.kind(), Some(ErrorKind::MalformedOutput));
        assert_eq!(first.raw_text(), Some("I can't see any image."));

        let second = analyzer.analyze(&request()).await;
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_overloaded_when_gate_full_and_no_queue() {
        let provider = MockProvider::success("{}").with_delay(Duration::from_millis(300));
        let options = AnalyzerOptions {
            max_concurrency: 1,
            max_queue_depth: 0,
            single_flight: false,
            ..AnalyzerOptions::default()
        };
        let analyzer = Arc::new(analyzer_with(provider, client_options(), options));

        let busy = {
            let analyzer = analyzer.clone();
            tokio::spawn(async move { analyzer.analyze(&request()).await })
        };
        while analyzer.gate_status().in_flight == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let other = AnalysisRequest::new(
            [0xFF, 0xD8, 0xFF, 0xDB].as_slice(),
            "image/jpeg",
            "learning",
        );
        let started = Instant::now();
        let result = analyzer.analyze(&other).await;
        assert_eq!(result.kind(), Some(ErrorKind::Overloaded));
        assert!(started.elapsed() < Duration::from_millis(200));

        assert!(busy.await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_concurrency_bounded_by_gate() {
        let mut provider = MockProvider::success("{}").with_delay(Duration::from_millis(30));
        let (_, max_concurrent) = provider.track_concurrency();
        let calls = provider.call_count_handle();
        let options = AnalyzerOptions {
            max_concurrency: 2,
            max_queue_depth: 16,
            ..AnalyzerOptions::default()
        };
        let analyzer = analyzer_with(provider, client_options(), options);

        // Distinct payloads so nothing is shared or cached
        let requests: Vec<_> = (0..8u8)
            .map(|i| AnalysisRequest::new(vec![0xFF, 0xD8, 0xFF, i], "image/jpeg", "learning"))
            .collect();
        let results = analyzer.analyze_batch(&requests).await;

        assert!(results.iter().all(AnalysisResult::is_success));
        assert_eq!(calls.load(Ordering::SeqCst), 8);
        assert!(max_concurrent.load(Ordering::SeqCst) <= 2);
        assert_eq!(analyzer.gate_status().in_flight, 0);
        assert_eq!(analyzer.gate_status().queued, 0);
    }

    #[tokio::test]
    async fn test_batch_preserves_input_order() {
        let provider = MockProvider::success(r#"{"ok": true}"#);
        let (analyzer, _) = analyzer(provider);
        let requests = vec![
            request(),
            AnalysisRequest::new(Vec::new(), "image/jpeg", "learning"),
            AnalysisRequest::new(JPEG, "image/jpeg", "missing"),
        ];
        let results = analyzer.analyze_batch(&requests).await;
        assert!(results[0].is_success());
        assert_eq!(results[1].kind(), Some(ErrorKind::InvalidRequest));
        assert_eq!(results[2].kind(), Some(ErrorKind::PromptMissing));
    }

    #[tokio::test]
    async fn test_single_flight_shares_one_call() {
        let provider = MockProvider::success(r#"{"label": "cat"}"#)
            .with_delay(Duration::from_millis(50));
        let calls = provider.call_count_handle();
        let analyzer = analyzer_with(provider, client_options(), AnalyzerOptions::default());

        let requests = vec![request(); 5];
        let results = analyzer.analyze_batch(&requests).await;
        assert!(results.iter().all(|r| r == &results[0]));
        assert!(results[0].is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_flight_shares_failures_without_caching() {
        let provider = MockProvider::failing(Some(503), "unavailable")
            .with_delay(Duration::from_millis(50));
        let calls = provider.call_count_handle();
        let analyzer = analyzer_with(provider, client_options(), AnalyzerOptions::default());

        let results = analyzer.analyze_batch(&vec![request(); 3]).await;
        assert!(results
            .iter()
            .all(|r| r.kind() == Some(ErrorKind::BackendUnavailable)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(analyzer.cache().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_releases_gate_slot() {
        let provider = MockProvider::success("{}").with_delay(Duration::from_millis(200));
        let calls = provider.call_count_handle();
        let options = AnalyzerOptions {
            max_concurrency: 1,
            max_queue_depth: 0,
            ..AnalyzerOptions::default()
        };
        let analyzer = Arc::new(analyzer_with(provider, client_options(), options));

        let task = {
            let analyzer = analyzer.clone();
            tokio::spawn(async move { analyzer.analyze(&request()).await })
        };
        while analyzer.gate_status().in_flight == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        assert_eq!(analyzer.gate_status().in_flight, 0);
        assert!(analyzer.cache().is_empty());

        // The slot is usable again and the cancelled work was not cached
        let result = analyzer.analyze(&request()).await;
        assert!(result.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_follower_takes_over_from_cancelled_leader() {
        let provider = MockProvider::success("{}").with_delay(Duration::from_millis(100));
        let calls = provider.call_count_handle();
        let analyzer = Arc::new(analyzer_with(
            provider,
            client_options(),
            AnalyzerOptions::default(),
        ));

        let leader = {
            let analyzer = analyzer.clone();
            tokio::spawn(async move { analyzer.analyze(&request()).await })
        };
        while analyzer.gate_status().in_flight == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let follower = {
            let analyzer = analyzer.clone();
            tokio::spawn(async move { analyzer.analyze(&request()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        leader.abort();
        let result = follower.await.unwrap();
        assert!(result.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_huge_cache_ttl_from_config() {
        let config = Config::from_toml("[cache]\nttl_secs = 9223372036854775807\n").unwrap();
        let provider = MockProvider::success(r#"{"label": "cat"}"#);
        let calls = provider.call_count_handle();
        let analyzer = analyzer_with(
            provider,
            client_options(),
            AnalyzerOptions::from_config(&config),
        );

        assert!(analyzer.analyze(&request()).await.is_success());
        assert!(analyzer.analyze(&request()).await.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_options_from_config() {
        let config = Config::from_toml(
            r#"
[pipeline]
max_concurrency = 8
max_queue_depth = 0
single_flight = false

[cache]
ttl_secs = 60
"#,
        )
        .unwrap();
        let options = AnalyzerOptions::from_config(&config);
        assert_eq!(options.max_concurrency, 8);
        assert_eq!(options.max_queue_depth, 0);
        assert!(!options.single_flight);
        assert_eq!(options.cache_ttl, Duration::from_secs(60));
    }

    #[test]
    fn test_from_config_without_api_key_fails() {
        let config = Config::from_toml(
            r#"
[llm.gemini]
api_key = "${PRISM_TEST_UNSET_GEMINI_KEY}"
"#,
        )
        .unwrap();
        assert!(Analyzer::from_config(&config).is_err());
    }

    #[test]
    fn test_from_config_local_provider() {
        let config = Config::from_toml(
            r#"
[backend]
provider = "ollama"

[pipeline]
max_concurrency = 3
"#,
        )
        .unwrap();
        let analyzer = Analyzer::from_config(&config).unwrap();
        assert_eq!(analyzer.client().provider_name(), "ollama");
        assert_eq!(analyzer.gate_status().max_concurrency, 3);
        assert!(analyzer.cache().is_enabled());
    }
}
