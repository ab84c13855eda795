use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque session identifier supplied by the ingress.
///
/// The core never generates session ids — capture surfaces (browser
/// extension, desktop agent, session-ID bridge) own that. The only
/// validation applied here is the length cap at ingest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Who produced the text in an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sender {
    User,
    Ai,
    Mixed,
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sender::User => write!(f, "USER"),
            Sender::Ai => write!(f, "AI"),
            Sender::Mixed => write!(f, "MIXED"),
        }
    }
}

impl std::str::FromStr for Sender {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "USER" => Ok(Sender::User),
            "AI" => Ok(Sender::Ai),
            "MIXED" => Ok(Sender::Mixed),
            other => Err(format!("unknown sender: {}", other)),
        }
    }
}

/// Where the event was captured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Platform tag, e.g. "chatgpt-web", "desktop-agent".
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// One ingest unit: a user turn and/or an AI turn in a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub user_text: String,
    #[serde(default)]
    pub ai_text: String,
    pub sender: Sender,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Event {
    /// At least one of the two texts must be non-empty for the event to be
    /// analyzable.
    pub fn has_text(&self) -> bool {
        !self.user_text.trim().is_empty() || !self.ai_text.trim().is_empty()
    }

    /// Derive the sender tag from which texts are present.
    pub fn infer_sender(user_text: &str, ai_text: &str) -> Sender {
        match (user_text.trim().is_empty(), ai_text.trim().is_empty()) {
            (false, false) => Sender::Mixed,
            (false, true) => Sender::User,
            _ => Sender::Ai,
        }
    }
}

/// An `Event` as stored in the interaction log.
///
/// Created on ingestion and never mutated afterwards, except to attach the
/// verdict id once analysis completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub session_id: SessionId,
    /// Monotonic per-session sequence assigned at append time. Ordering
    /// within a session relies on this, never on timestamps.
    pub seq: u64,
    pub sender: Sender,
    pub user_text: String,
    pub ai_text: String,
    pub source: Source,
    pub metadata: BTreeMap<String, String>,
    /// Timestamp carried by the event itself.
    pub event_time: DateTime<Utc>,
    /// When the store accepted the record.
    pub ingest_time: DateTime<Utc>,
    pub verdict_id: Option<String>,
}

/// Message totals over a session's history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTotals {
    pub messages: u64,
    pub user_messages: u64,
    pub ai_messages: u64,
}

/// Derived view of a session's recent history, rebuilt per event and handed
/// to every analyzer. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub session_id: SessionId,
    pub totals: ContextTotals,
    /// Seconds between the first and the most recent record.
    pub duration_seconds: f64,
    /// Seconds since the session was first seen.
    pub session_age_seconds: f64,
    /// Last N records, newest-last.
    pub recent: Vec<InteractionRecord>,
    /// Advisory threat-pattern tags from the fast regex scan over recent
    /// user text. Analyzers are free to ignore them.
    pub hints: BTreeSet<String>,
    /// True when the store was unreachable and only the current event is
    /// represented. Downstream outputs become `degraded`.
    pub degraded: bool,
}

impl ConversationContext {
    /// Number of AI turns visible in the recent window.
    pub fn ai_turns(&self) -> usize {
        self.recent
            .iter()
            .filter(|r| !r.ai_text.trim().is_empty())
            .count()
    }

    /// Canonical hint string used in fingerprints: sorted tags joined by ','.
    /// BTreeSet iteration order makes this deterministic.
    pub fn hint_key(&self) -> String {
        self.hints.iter().cloned().collect::<Vec<_>>().join(",")
    }
}

/// The eleven TDC analyzer modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Module {
    UserRisk,
    AiManipulation,
    TemporalSentiment,
    Adversarial,
    MultiModal,
    Conditioning,
    Agentic,
    Escalation,
    Explainability,
    CognitiveBias,
    Intervention,
}

impl Module {
    /// All eleven modules in TDC order.
    pub const ALL: [Module; 11] = [
        Module::UserRisk,
        Module::AiManipulation,
        Module::TemporalSentiment,
        Module::Adversarial,
        Module::MultiModal,
        Module::Conditioning,
        Module::Agentic,
        Module::Escalation,
        Module::Explainability,
        Module::CognitiveBias,
        Module::Intervention,
    ];

    /// First-wave modules: run in parallel directly over the event pair.
    pub const FIRST_WAVE: [Module; 8] = [
        Module::UserRisk,
        Module::AiManipulation,
        Module::TemporalSentiment,
        Module::Adversarial,
        Module::MultiModal,
        Module::Conditioning,
        Module::Agentic,
        Module::CognitiveBias,
    ];

    /// Stable wire/config name, e.g. "tdc4-adversarial".
    pub fn label(&self) -> &'static str {
        match self {
            Module::UserRisk => "tdc1-user-risk",
            Module::AiManipulation => "tdc2-ai-manipulation",
            Module::TemporalSentiment => "tdc3-temporal-sentiment",
            Module::Adversarial => "tdc4-adversarial",
            Module::MultiModal => "tdc5-multimodal",
            Module::Conditioning => "tdc6-conditioning",
            Module::Agentic => "tdc7-agentic",
            Module::Escalation => "tdc8-escalation",
            Module::Explainability => "tdc9-explainability",
            Module::CognitiveBias => "tdc10-cognitive-bias",
            Module::Intervention => "tdc11-intervention",
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How a module output was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Normal path, external dependencies available.
    Full,
    /// Partial context (e.g. store unreachable).
    Degraded,
    /// Served from the verdict cache.
    Cached,
    /// Keyword-only path after an external dependency failed.
    Fallback,
    /// Skipped because the input side the module inspects was empty.
    NotApplicable,
    /// Skipped because the session history is too short.
    InsufficientContext,
}

/// Graduated response levels, weakest first. `Ord` so "strongest action
/// proposed" is a `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendedAction {
    Monitor,
    Review,
    Alert,
    Escalate,
    Block,
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecommendedAction::Monitor => write!(f, "monitor"),
            RecommendedAction::Review => write!(f, "review"),
            RecommendedAction::Alert => write!(f, "alert"),
            RecommendedAction::Escalate => write!(f, "escalate"),
            RecommendedAction::Block => write!(f, "block"),
        }
    }
}

impl std::str::FromStr for RecommendedAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "monitor" => Ok(RecommendedAction::Monitor),
            "review" => Ok(RecommendedAction::Review),
            "alert" => Ok(RecommendedAction::Alert),
            "escalate" => Ok(RecommendedAction::Escalate),
            "block" => Ok(RecommendedAction::Block),
            other => Err(format!("unknown action: {}", other)),
        }
    }
}

/// Final threat severity, ordered so promotion rules are comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Map an aggregate score to a severity band (inclusive upper bounds).
    pub fn from_score(score: f64) -> Self {
        if score <= 0.25 {
            Severity::Low
        } else if score <= 0.55 {
            Severity::Medium
        } else if score <= 0.8 {
            Severity::High
        } else {
            Severity::Critical
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// What kind of supporting material an evidence entry carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    TextSpan,
    PatternMatch,
    ExternalResult,
    TemporalPattern,
}

/// One piece of evidence attached to a module output. The payload stays a
/// JSON blob — shapes differ per module and the sink stores them verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub kind: EvidenceKind,
    pub data: serde_json::Value,
}

impl Evidence {
    pub fn pattern(pattern: &str, matched: &str) -> Self {
        Self {
            kind: EvidenceKind::PatternMatch,
            data: serde_json::json!({ "pattern": pattern, "matched": matched }),
        }
    }

    pub fn span(text: &str) -> Self {
        Self {
            kind: EvidenceKind::TextSpan,
            data: serde_json::json!({ "text": text }),
        }
    }

    pub fn external(provider: &str, result: serde_json::Value) -> Self {
        Self {
            kind: EvidenceKind::ExternalResult,
            data: serde_json::json!({ "provider": provider, "result": result }),
        }
    }

    pub fn temporal(description: &str, values: &[f64]) -> Self {
        Self {
            kind: EvidenceKind::TemporalPattern,
            data: serde_json::json!({ "description": description, "values": values }),
        }
    }
}

/// Version stamp for the `ModuleOutput` shape itself.
pub const MODULE_OUTPUT_SCHEMA_VERSION: u32 = 3;

/// Uniform result record every analyzer returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleOutput {
    pub module: Module,
    pub schema_version: u32,
    /// Risk contribution in [0,1].
    pub score: f64,
    /// How sure the module is of its score, in [0,1].
    pub confidence: f64,
    /// Short tags drawn from the module's declared vocabulary.
    pub flags: BTreeSet<String>,
    /// One-line human-readable summary.
    pub notes: String,
    pub recommended_action: RecommendedAction,
    pub evidence: Vec<Evidence>,
    pub timestamp: DateTime<Utc>,
    pub processing_ms: u64,
    pub analysis_mode: AnalysisMode,
}

/// Version stamp for the fusion algorithm written into every verdict.
pub const FUSION_VERSION: u32 = 2;

/// Fused result of one event across all eleven modules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub verdict_id: String,
    pub session_id: SessionId,
    /// Sequence of the interaction record this verdict covers.
    pub seq: u64,
    pub severity: Severity,
    pub aggregate_score: f64,
    pub aggregate_confidence: f64,
    pub recommended_action: RecommendedAction,
    /// Eleven entries, possibly degraded or skipped.
    pub outputs: Vec<ModuleOutput>,
    /// Human-readable narrative assembled by the explainability module.
    pub narrative: String,
    /// Machine-scannable condition tags, e.g. "degraded", "conflict".
    pub synthesis_notes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub fusion_version: u32,
}

impl Verdict {
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Look up a single module's output.
    pub fn output(&self, module: Module) -> Option<&ModuleOutput> {
        self.outputs.iter().find(|o| o.module == module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_bands_have_inclusive_upper_bounds() {
        assert_eq!(Severity::from_score(0.0), Severity::Low);
        assert_eq!(Severity::from_score(0.25), Severity::Low);
        assert_eq!(Severity::from_score(0.250001), Severity::Medium);
        assert_eq!(Severity::from_score(0.55), Severity::Medium);
        assert_eq!(Severity::from_score(0.8), Severity::High);
        assert_eq!(Severity::from_score(0.81), Severity::Critical);
        assert_eq!(Severity::from_score(1.0), Severity::Critical);
    }

    #[test]
    fn action_ordering_matches_escalation_ladder() {
        assert!(RecommendedAction::Monitor < RecommendedAction::Review);
        assert!(RecommendedAction::Review < RecommendedAction::Alert);
        assert!(RecommendedAction::Alert < RecommendedAction::Escalate);
        assert!(RecommendedAction::Escalate < RecommendedAction::Block);
    }

    #[test]
    fn severity_promotion_is_a_max() {
        let s = Severity::Medium.max(Severity::High);
        assert_eq!(s, Severity::High);
    }

    #[test]
    fn sender_round_trips_upper_case() {
        let json = serde_json::to_string(&Sender::Ai).unwrap();
        assert_eq!(json, r#""AI""#);
        let back: Sender = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Sender::Ai);
    }

    #[test]
    fn infer_sender_from_texts() {
        assert_eq!(Event::infer_sender("hi", ""), Sender::User);
        assert_eq!(Event::infer_sender("", "hello"), Sender::Ai);
        assert_eq!(Event::infer_sender("hi", "hello"), Sender::Mixed);
    }

    #[test]
    fn module_labels_are_unique() {
        let mut labels: Vec<_> = Module::ALL.iter().map(|m| m.label()).collect();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), 11);
    }

    #[test]
    fn hint_key_is_deterministic() {
        let mut ctx = ConversationContext {
            session_id: "s".into(),
            totals: ContextTotals::default(),
            duration_seconds: 0.0,
            session_age_seconds: 0.0,
            recent: Vec::new(),
            hints: BTreeSet::new(),
            degraded: false,
        };
        ctx.hints.insert("manipulation".to_string());
        ctx.hints.insert("elicitation".to_string());
        assert_eq!(ctx.hint_key(), "elicitation,manipulation");
    }
}
