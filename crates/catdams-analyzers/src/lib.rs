//! The eleven TDC analyzer modules.
//!
//! Every module implements the same `Analyzer` contract over an
//! `AnalyzerInput`. The first wave (TDC-1..7 and TDC-10) sees an empty
//! `prior`; the correlator wave (TDC-8, TDC-11) sees the first wave's
//! outputs; explainability (TDC-9) sees everything before it. The
//! orchestrator enforces that layering — no module ever reads a later
//! wave, which keeps the module graph a DAG by construction.

use std::time::Duration;

use async_trait::async_trait;

use catdams_core::config::DEFAULT_MODULE_TIMEOUT_MS;
use catdams_core::types::{AnalysisMode, ConversationContext, Module, ModuleOutput};
use catdams_providers::AnalysisGateway;

pub mod output;

mod adversarial;
mod agentic;
mod ai_manipulation;
mod cognitive_bias;
mod conditioning;
mod escalation;
mod explainability;
mod intervention;
mod multimodal;
mod temporal;
mod user_risk;

pub use adversarial::AdversarialAnalyzer;
pub use agentic::AgenticAnalyzer;
pub use ai_manipulation::AiManipulationAnalyzer;
pub use cognitive_bias::CognitiveBiasAnalyzer;
pub use conditioning::ConditioningAnalyzer;
pub use escalation::EscalationAnalyzer;
pub use explainability::ExplainabilityAnalyzer;
pub use intervention::InterventionAnalyzer;
pub use multimodal::MultiModalAnalyzer;
pub use temporal::TemporalSentimentAnalyzer;
pub use user_risk::UserRiskAnalyzer;

/// Everything a module gets to look at for one event.
#[derive(Debug, Clone)]
pub struct AnalyzerInput {
    pub user_text: String,
    pub ai_text: String,
    pub context: ConversationContext,
    /// Outputs of already-completed waves, empty for the first wave.
    pub prior: Vec<ModuleOutput>,
}

impl AnalyzerInput {
    pub fn prior_output(&self, module: Module) -> Option<&ModuleOutput> {
        self.prior.iter().find(|o| o.module == module)
    }

    /// Mode for a normal analysis over this input: `Degraded` when the
    /// context was built without store access, `Full` otherwise. Every
    /// module's analyze path starts from this.
    pub fn base_mode(&self) -> AnalysisMode {
        if self.context.degraded {
            AnalysisMode::Degraded
        } else {
            AnalysisMode::Full
        }
    }
}

/// Uniform analyzer contract.
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn module(&self) -> Module;

    /// Whether the module calls out through the analysis gateway when it
    /// is available. Modules that do must still produce a sane keyword-only
    /// result through `fallback`.
    fn requires_gateway(&self) -> bool {
        false
    }

    /// Wall-time budget enforced by the orchestrator.
    fn budget(&self) -> Duration {
        Duration::from_millis(DEFAULT_MODULE_TIMEOUT_MS)
    }

    /// Every flag the module may emit. Outputs are checked against this in
    /// tests; an out-of-vocabulary flag is a bug.
    fn vocabulary(&self) -> &'static [&'static str];

    /// Full analysis, possibly using the gateway.
    async fn analyze(&self, input: &AnalyzerInput, gateway: &AnalysisGateway) -> ModuleOutput;

    /// Deterministic keyword-only result for when external dependencies are
    /// down or the module ran out of time. Confidence is capped at 0.5 by
    /// the output builder.
    fn fallback(&self, input: &AnalyzerInput) -> ModuleOutput;
}

/// All eleven analyzers in TDC order.
pub fn registry() -> Vec<std::sync::Arc<dyn Analyzer>> {
    use std::sync::Arc;
    vec![
        Arc::new(UserRiskAnalyzer) as Arc<dyn Analyzer>,
        Arc::new(AiManipulationAnalyzer),
        Arc::new(TemporalSentimentAnalyzer),
        Arc::new(AdversarialAnalyzer),
        Arc::new(MultiModalAnalyzer),
        Arc::new(ConditioningAnalyzer),
        Arc::new(AgenticAnalyzer),
        Arc::new(EscalationAnalyzer),
        Arc::new(ExplainabilityAnalyzer),
        Arc::new(CognitiveBiasAnalyzer),
        Arc::new(InterventionAnalyzer),
    ]
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::collections::{BTreeMap, BTreeSet};

    use catdams_core::types::{
        ContextTotals, ConversationContext, Event, InteractionRecord, Sender, Source,
    };

    use super::AnalyzerInput;

    /// Context over explicit (user, ai) turns, newest-last.
    pub fn context_over(turns: &[(&str, &str)]) -> ConversationContext {
        let now = chrono::Utc::now();
        let recent: Vec<InteractionRecord> = turns
            .iter()
            .enumerate()
            .map(|(i, (user, ai))| InteractionRecord {
                session_id: "test".into(),
                seq: (i + 1) as u64,
                sender: Event::infer_sender(user, ai),
                user_text: user.to_string(),
                ai_text: ai.to_string(),
                source: Source::default(),
                metadata: BTreeMap::new(),
                event_time: now,
                ingest_time: now,
                verdict_id: None,
            })
            .collect();

        let user_messages = recent
            .iter()
            .filter(|r| !r.user_text.trim().is_empty())
            .count() as u64;
        let ai_messages = recent
            .iter()
            .filter(|r| !r.ai_text.trim().is_empty())
            .count() as u64;

        ConversationContext {
            session_id: "test".into(),
            totals: ContextTotals {
                messages: recent.len() as u64,
                user_messages,
                ai_messages,
            },
            duration_seconds: 60.0,
            session_age_seconds: 60.0,
            recent,
            hints: BTreeSet::new(),
            degraded: false,
        }
    }

    pub fn input(user: &str, ai: &str) -> AnalyzerInput {
        AnalyzerInput {
            user_text: user.to_string(),
            ai_text: ai.to_string(),
            context: context_over(&[(user, ai)]),
            prior: Vec::new(),
        }
    }

    pub fn input_with_context(user: &str, ai: &str, turns: &[(&str, &str)]) -> AnalyzerInput {
        AnalyzerInput {
            user_text: user.to_string(),
            ai_text: ai.to_string(),
            context: context_over(turns),
            prior: Vec::new(),
        }
    }

    /// Assert the output's flags all come from the declared vocabulary.
    pub fn assert_flags_in_vocabulary(
        output: &catdams_core::types::ModuleOutput,
        vocabulary: &[&str],
    ) {
        for flag in &output.flags {
            assert!(
                vocabulary.contains(&flag.as_str()),
                "flag '{}' not in declared vocabulary",
                flag
            );
        }
    }

    #[allow(dead_code)]
    pub fn sender_of(record: &InteractionRecord) -> Sender {
        record.sender
    }
}
