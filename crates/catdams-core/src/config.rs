use std::collections::BTreeMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Hard limits of the ingest contract
pub const DEFAULT_PORT: u16 = 8788;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const MAX_SESSION_ID_BYTES: usize = 128;
pub const MAX_TEXT_BYTES: usize = 256 * 1024; // 256 KB per text field

// Detection pipeline defaults
pub const CONTEXT_WINDOW: usize = 10;
pub const SESSION_IDLE_CLOSE_SECS: i64 = 300; // idle sessions count as closed
pub const DEFAULT_MODULE_TIMEOUT_MS: u64 = 2_500;
pub const CORRELATOR_TIMEOUT_MS: u64 = 1_500; // escalation + explainability
pub const WAVE_DEADLINE_MS: u64 = 8_000; // first-wave global deadline
pub const PROCESS_DEADLINE_MS: u64 = 10_000; // whole-event caller deadline
pub const SHUTDOWN_DRAIN_SECS: u64 = 30;

/// Top-level config (catdams.toml + CATDAMS_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CatdamsConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub circuit: CircuitConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    /// Per-module overrides keyed by module label (e.g. "tdc4-adversarial").
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// W: analyses in flight across all events.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Q: events allowed to queue behind the W slots.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Global deadline for the parallel first wave.
    #[serde(default = "default_wave_deadline_ms")]
    pub wave_deadline_ms: u64,
    /// Whole-event deadline when the caller does not supply one.
    #[serde(default = "default_process_deadline_ms")]
    pub process_deadline_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            queue_capacity: default_queue_capacity(),
            wave_deadline_ms: default_wave_deadline_ms(),
            process_deadline_ms: default_process_deadline_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_cache_ttl(),
            capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive failures before a provider's circuit opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds an open circuit waits before the half-open probe.
    #[serde(default = "default_recovery_seconds")]
    pub recovery_seconds: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_seconds: default_recovery_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Days interaction records stay queryable.
    #[serde(default = "default_retention_days")]
    pub interaction_days: u32,
    /// Days verdicts stay queryable. Independent of interactions.
    #[serde(default = "default_retention_days")]
    pub verdict_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            interaction_days: default_retention_days(),
            verdict_days: default_retention_days(),
        }
    }
}

/// External analysis providers. Both slots optional — with neither
/// configured the gateway reports unavailable and analyzers run their
/// keyword-only fallback paths.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    pub llm: Option<LlmConfig>,
    pub text_analytics: Option<TextAnalyticsConfig>,
    /// Per-call timeout.
    #[serde(default = "default_gateway_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries on transient failures (network, 5xx, 429 with Retry-After).
    #[serde(default = "default_gateway_retries")]
    pub max_retries: u32,
}

/// OpenAI-compatible chat-completions provider used for semantic
/// classification prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub endpoint: String,
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
}

/// Azure-style text analytics provider (sentiment, entities, key phrases,
/// PII).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextAnalyticsConfig {
    pub endpoint: String,
    pub api_key: String,
}

/// Fusion weights. The defaults are deliberate: user-risk, adversarial,
/// conditioning, and the cross-module correlator carry more weight than the
/// single-signal modules; explainability and intervention carry none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    #[serde(default = "default_weight_user_risk")]
    pub user_risk_weight: f64,
    #[serde(default = "default_weight_adversarial")]
    pub adversarial_weight: f64,
    #[serde(default = "default_weight_conditioning")]
    pub conditioning_weight: f64,
    #[serde(default = "default_weight_escalation")]
    pub escalation_weight: f64,
    #[serde(default = "default_weight_other")]
    pub default_weight: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            user_risk_weight: default_weight_user_risk(),
            adversarial_weight: default_weight_adversarial(),
            conditioning_weight: default_weight_conditioning(),
            escalation_weight: default_weight_escalation(),
            default_weight: default_weight_other(),
        }
    }
}

/// Per-module knobs from the `[modules."<label>"]` tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSettings {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    pub timeout_ms: Option<u64>,
}

impl Default for ModuleSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: None,
        }
    }
}

impl CatdamsConfig {
    /// Load config from a TOML file with CATDAMS_* env var overrides
    /// (double underscore separates nesting levels, e.g.
    /// CATDAMS_SERVER__PORT=9000).
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CatdamsConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CATDAMS_").split("__"))
            .extract()
            .map_err(|e| crate::error::CatdamsError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Effective settings for one module (defaults when not configured).
    pub fn module(&self, label: &str) -> ModuleSettings {
        self.modules.get(label).cloned().unwrap_or_default()
    }
}

fn bool_true() -> bool {
    true
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.catdams/catdams.db", home)
}
fn default_max_concurrent() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    100
}
fn default_wave_deadline_ms() -> u64 {
    WAVE_DEADLINE_MS
}
fn default_process_deadline_ms() -> u64 {
    PROCESS_DEADLINE_MS
}
fn default_cache_ttl() -> u64 {
    300
}
fn default_cache_capacity() -> usize {
    1000
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_recovery_seconds() -> u64 {
    30
}
fn default_retention_days() -> u32 {
    30
}
fn default_gateway_timeout_ms() -> u64 {
    5_000
}
fn default_gateway_retries() -> u32 {
    3
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_weight_user_risk() -> f64 {
    1.3
}
fn default_weight_adversarial() -> f64 {
    1.2
}
fn default_weight_conditioning() -> f64 {
    1.1
}
fn default_weight_escalation() -> f64 {
    1.4
}
fn default_weight_other() -> f64 {
    1.0
}
fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.catdams/catdams.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_budgets() {
        let cfg = CatdamsConfig::default();
        assert_eq!(cfg.orchestrator.max_concurrent, 4);
        assert_eq!(cfg.orchestrator.queue_capacity, 100);
        assert_eq!(cfg.cache.ttl_seconds, 300);
        assert_eq!(cfg.cache.capacity, 1000);
        assert_eq!(cfg.circuit.failure_threshold, 5);
        assert_eq!(cfg.circuit.recovery_seconds, 30);
        assert_eq!(cfg.retention.interaction_days, 30);
        assert_eq!(cfg.gateway.timeout_ms, 5_000);
    }

    #[test]
    fn unknown_module_gets_default_settings() {
        let cfg = CatdamsConfig::default();
        let m = cfg.module("tdc4-adversarial");
        assert!(m.enabled);
        assert!(m.timeout_ms.is_none());
    }

    #[test]
    fn fusion_defaults() {
        let f = FusionConfig::default();
        assert!((f.user_risk_weight - 1.3).abs() < 1e-12);
        assert!((f.escalation_weight - 1.4).abs() < 1e-12);
        assert!((f.default_weight - 1.0).abs() < 1e-12);
    }
}
