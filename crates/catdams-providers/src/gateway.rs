use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use catdams_core::cache::TtlCache;
use catdams_core::config::{CacheConfig, CircuitConfig, GatewayConfig};

use crate::breaker::{CircuitBreaker, CircuitState};
use crate::chat::ChatCompletionsClient;
use crate::error::{GatewayError, Result};
use crate::provider::{ClassifyProvider, TextProvider, TextService, TextSignals};
use crate::text::TextAnalyticsClient;

/// Backoff schedule for transient failures.
const BACKOFF_MS: [u64; 3] = [100, 400, 1600];

/// Top-level keys a classification response must carry to be accepted.
/// Anything else from the model is treated as a provider failure.
#[derive(Debug, Clone, Copy)]
pub struct ResponseSchema {
    pub required: &'static [&'static str],
}

impl ResponseSchema {
    pub const fn new(required: &'static [&'static str]) -> Self {
        Self { required }
    }

    fn validate(&self, value: &serde_json::Value) -> Result<()> {
        let obj = value
            .as_object()
            .ok_or_else(|| GatewayError::Schema("response is not a JSON object".to_string()))?;
        for key in self.required {
            if !obj.contains_key(*key) {
                return Err(GatewayError::Schema(format!("missing required key: {}", key)));
            }
        }
        Ok(())
    }
}

struct Guarded<P: ?Sized> {
    provider: Box<P>,
    breaker: CircuitBreaker,
}

/// Tuning knobs shared by both provider slots.
#[derive(Debug, Clone, Copy)]
pub struct GatewayOptions {
    pub timeout: Duration,
    pub max_retries: u32,
    pub failure_threshold: u32,
    pub recovery: Duration,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_retries: 3,
            failure_threshold: 5,
            recovery: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 1000,
        }
    }
}

/// Uniform facade over the external analysis providers.
///
/// Applies, in order: response cache, circuit breaker, per-call timeout,
/// bounded retry with exponential backoff for transient failures, and
/// schema validation on the way out. With no providers configured every
/// call fails fast with `Unavailable` and analyzers take their fallback
/// path.
pub struct AnalysisGateway {
    llm: Option<Guarded<dyn ClassifyProvider>>,
    text: Option<Guarded<dyn TextProvider>>,
    cache: TtlCache<serde_json::Value>,
    timeout: Duration,
    max_retries: u32,
}

impl AnalysisGateway {
    pub fn new(
        llm: Option<Box<dyn ClassifyProvider>>,
        text: Option<Box<dyn TextProvider>>,
        opts: GatewayOptions,
    ) -> Self {
        let guard = |name: String| CircuitBreaker::new(name, opts.failure_threshold, opts.recovery);
        Self {
            llm: llm.map(|p| {
                let breaker = guard(p.name().to_string());
                Guarded { provider: p, breaker }
            }),
            text: text.map(|p| {
                let breaker = guard(p.name().to_string());
                Guarded { provider: p, breaker }
            }),
            cache: TtlCache::new(opts.cache_capacity, opts.cache_ttl),
            timeout: opts.timeout,
            max_retries: opts.max_retries,
        }
    }

    /// Build from config. Unconfigured provider slots stay empty.
    pub fn from_config(gateway: &GatewayConfig, circuit: &CircuitConfig, cache: &CacheConfig) -> Self {
        let opts = GatewayOptions {
            timeout: Duration::from_millis(gateway.timeout_ms),
            max_retries: gateway.max_retries,
            failure_threshold: circuit.failure_threshold,
            recovery: Duration::from_secs(circuit.recovery_seconds),
            cache_ttl: Duration::from_secs(cache.ttl_seconds),
            cache_capacity: cache.capacity,
        };
        let llm: Option<Box<dyn ClassifyProvider>> = gateway.llm.as_ref().map(|c| {
            Box::new(ChatCompletionsClient::new(
                c.endpoint.clone(),
                c.api_key.clone(),
                c.model.clone(),
            )) as Box<dyn ClassifyProvider>
        });
        let text: Option<Box<dyn TextProvider>> = gateway.text_analytics.as_ref().map(|c| {
            Box::new(TextAnalyticsClient::new(c.endpoint.clone(), c.api_key.clone()))
                as Box<dyn TextProvider>
        });
        Self::new(llm, text, opts)
    }

    /// A gateway with no providers — everything fails fast.
    pub fn disabled() -> Self {
        Self::new(None, None, GatewayOptions::default())
    }

    /// True when the LLM slot exists and its circuit is not open.
    pub fn llm_available(&self) -> bool {
        self.llm
            .as_ref()
            .map(|g| g.breaker.state() != CircuitState::Open)
            .unwrap_or(false)
    }

    /// True when the text-analytics slot exists and its circuit is not open.
    pub fn text_available(&self) -> bool {
        self.text
            .as_ref()
            .map(|g| g.breaker.state() != CircuitState::Open)
            .unwrap_or(false)
    }

    /// Circuit states for the health surface: (provider, state as str).
    pub fn circuit_report(&self) -> Vec<(String, &'static str)> {
        let label = |s: CircuitState| match s {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        let mut out = Vec::new();
        if let Some(g) = &self.llm {
            out.push((g.provider.name().to_string(), label(g.breaker.state())));
        }
        if let Some(g) = &self.text {
            out.push((g.provider.name().to_string(), label(g.breaker.state())));
        }
        out
    }

    /// Run a classification prompt and validate the response shape.
    pub async fn classify(&self, prompt: &str, schema: &ResponseSchema) -> Result<serde_json::Value> {
        let guarded = self
            .llm
            .as_ref()
            .ok_or_else(|| GatewayError::Unavailable("llm".to_string()))?;

        let key = cache_key(guarded.provider.name(), guarded.provider.model(), prompt);
        if let Some(hit) = self.cache.get(&key) {
            debug!("classification served from cache");
            return Ok(hit);
        }

        let value = self
            .call_with_retry(&guarded.breaker, || {
                let p = &guarded.provider;
                async move { p.classify(prompt).await }
            })
            .await?;

        if let Err(e) = schema.validate(&value) {
            // A malformed response is a provider failure, not retryable.
            guarded.breaker.record_failure();
            return Err(e);
        }

        self.cache.insert(key, value.clone());
        Ok(value)
    }

    /// Run the requested text-analytics services over one text.
    pub async fn analyze_text(&self, text: &str, services: &[TextService]) -> Result<TextSignals> {
        let guarded = self
            .text
            .as_ref()
            .ok_or_else(|| GatewayError::Unavailable("text-analytics".to_string()))?;

        let signals = self
            .call_with_retry(&guarded.breaker, || {
                let p = &guarded.provider;
                async move { p.analyze(text, services).await }
            })
            .await?;

        Ok(signals)
    }

    /// Shared timeout + retry + breaker plumbing.
    async fn call_with_retry<T, F, Fut>(&self, breaker: &CircuitBreaker, call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_err: Option<GatewayError> = None;

        for attempt in 0..=self.max_retries {
            breaker.check()?;

            let result = match tokio::time::timeout(self.timeout, call()).await {
                Ok(r) => r,
                Err(_) => Err(GatewayError::Timeout {
                    ms: self.timeout.as_millis() as u64,
                }),
            };

            match result {
                Ok(value) => {
                    breaker.record_success();
                    return Ok(value);
                }
                Err(e) => {
                    breaker.record_failure();
                    let transient = e.is_transient();
                    warn!(attempt, transient, error = %e, "gateway call failed");
                    if !transient {
                        return Err(e);
                    }
                    let backoff = match &e {
                        GatewayError::RateLimited { retry_after_ms } => {
                            (*retry_after_ms).min(2_000)
                        }
                        _ => BACKOFF_MS[(attempt as usize).min(BACKOFF_MS.len() - 1)],
                    };
                    last_err = Some(e);
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| GatewayError::Unavailable("retries exhausted".to_string())))
    }
}

/// SHA-256(provider ∥ model ∥ prompt), hex-encoded.
fn cache_key(provider: &str, model: &str, prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider.as_bytes());
    hasher.update([0]);
    hasher.update(model.as_bytes());
    hasher.update([0]);
    hasher.update(prompt.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Scripted provider: pops one canned result per call.
    struct ScriptedLlm {
        calls: AtomicU32,
        script: Mutex<VecDeque<Result<serde_json::Value>>>,
    }

    impl ScriptedLlm {
        fn new(script: Vec<Result<serde_json::Value>>) -> Self {
            Self {
                calls: AtomicU32::new(0),
                script: Mutex::new(script.into()),
            }
        }
    }

    #[async_trait]
    impl ClassifyProvider for ScriptedLlm {
        fn name(&self) -> &str {
            "scripted"
        }
        fn model(&self) -> &str {
            "test-model"
        }
        async fn classify(&self, _prompt: &str) -> Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(serde_json::json!({ "risk_score": 0.0 })))
        }
    }

    const SCHEMA: ResponseSchema = ResponseSchema::new(&["risk_score"]);

    fn fast_opts() -> GatewayOptions {
        GatewayOptions {
            timeout: Duration::from_millis(500),
            max_retries: 2,
            failure_threshold: 3,
            recovery: Duration::from_millis(50),
            cache_ttl: Duration::from_secs(60),
            cache_capacity: 16,
        }
    }

    fn gateway_with(script: Vec<Result<serde_json::Value>>) -> (AnalysisGateway, &'static ScriptedLlm) {
        let llm: &'static ScriptedLlm = Box::leak(Box::new(ScriptedLlm::new(script)));
        // A second boxed handle onto the same leaked provider keeps the
        // call counter observable from the test.
        struct Fwd(&'static ScriptedLlm);
        #[async_trait]
        impl ClassifyProvider for Fwd {
            fn name(&self) -> &str {
                self.0.name()
            }
            fn model(&self) -> &str {
                self.0.model()
            }
            async fn classify(&self, prompt: &str) -> Result<serde_json::Value> {
                self.0.classify(prompt).await
            }
        }
        let gw = AnalysisGateway::new(Some(Box::new(Fwd(llm))), None, fast_opts());
        (gw, llm)
    }

    #[tokio::test]
    async fn disabled_gateway_fails_fast() {
        let gw = AnalysisGateway::disabled();
        let err = gw.classify("anything", &SCHEMA).await.unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
        assert!(!gw.llm_available());
    }

    #[tokio::test]
    async fn second_identical_prompt_hits_cache() {
        let (gw, llm) = gateway_with(vec![Ok(serde_json::json!({ "risk_score": 0.7 }))]);
        let a = gw.classify("same prompt", &SCHEMA).await.unwrap();
        let b = gw.classify("same prompt", &SCHEMA).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let (gw, llm) = gateway_with(vec![
            Err(GatewayError::Api {
                status: 503,
                message: "unavailable".to_string(),
            }),
            Ok(serde_json::json!({ "risk_score": 0.2 })),
        ]);
        let value = gw.classify("p", &SCHEMA).await.unwrap();
        assert_eq!(value["risk_score"], 0.2);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn schema_violation_is_not_retried() {
        let (gw, llm) = gateway_with(vec![
            Ok(serde_json::json!({ "unexpected": true })),
            Ok(serde_json::json!({ "risk_score": 0.9 })),
        ]);
        let err = gw.classify("p", &SCHEMA).await.unwrap_err();
        assert!(matches!(err, GatewayError::Schema(_)));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn consecutive_failures_open_the_circuit() {
        let mut script: Vec<Result<serde_json::Value>> = Vec::new();
        for _ in 0..6 {
            script.push(Err(GatewayError::Api {
                status: 500,
                message: "boom".to_string(),
            }));
        }
        let (gw, _) = gateway_with(script);
        // threshold 3 is crossed inside the retry loop of the first call
        let _ = gw.classify("p", &SCHEMA).await;
        assert!(!gw.llm_available());
        let err = gw.classify("p2", &SCHEMA).await.unwrap_err();
        assert!(matches!(err, GatewayError::CircuitOpen { .. }));
    }

    #[tokio::test]
    async fn circuit_recovers_after_quiescence() {
        let (gw, llm) = gateway_with(vec![
            Err(GatewayError::Api {
                status: 500,
                message: "a".to_string(),
            }),
            Err(GatewayError::Api {
                status: 500,
                message: "b".to_string(),
            }),
            Err(GatewayError::Api {
                status: 500,
                message: "c".to_string(),
            }),
            Ok(serde_json::json!({ "risk_score": 0.1 })),
        ]);
        let _ = gw.classify("p", &SCHEMA).await;
        assert!(!gw.llm_available());

        // wait out the recovery window, then the half-open probe succeeds
        tokio::time::sleep(Duration::from_millis(80)).await;
        let value = gw.classify("p-after", &SCHEMA).await.unwrap();
        assert_eq!(value["risk_score"], 0.1);
        assert!(gw.llm_available());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn cache_key_is_sensitive_to_all_parts() {
        let base = cache_key("p", "m", "prompt");
        assert_ne!(base, cache_key("p2", "m", "prompt"));
        assert_ne!(base, cache_key("p", "m2", "prompt"));
        assert_ne!(base, cache_key("p", "m", "prompt2"));
        assert_eq!(base, cache_key("p", "m", "prompt"));
    }
}
