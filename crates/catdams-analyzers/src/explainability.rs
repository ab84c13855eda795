//! TDC-9 — human-readable narrative over everything the other modules found.
//!
//! Contributes no score of its own; its notes become the verdict narrative.

use std::time::Duration;

use async_trait::async_trait;

use catdams_core::config::CORRELATOR_TIMEOUT_MS;
use catdams_core::types::{AnalysisMode, Evidence, Module, ModuleOutput, RecommendedAction};
use catdams_providers::AnalysisGateway;

use crate::output::OutputBuilder;
use crate::{Analyzer, AnalyzerInput};

pub const VOCABULARY: &[&str] = &[];

/// Modules worth mentioning in the narrative.
const MENTION_THRESHOLD: f64 = 0.3;

pub struct ExplainabilityAnalyzer;

impl ExplainabilityAnalyzer {
    fn narrate(&self, input: &AnalyzerInput, mode: AnalysisMode) -> ModuleOutput {
        let mut contributors: Vec<&ModuleOutput> = input
            .prior
            .iter()
            .filter(|o| o.score >= MENTION_THRESHOLD)
            .collect();
        contributors.sort_by(|a, b| b.score.total_cmp(&a.score));

        let narrative = if contributors.is_empty() {
            "No notable risk signals in this exchange.".to_string()
        } else {
            let parts: Vec<String> = contributors
                .iter()
                .take(3)
                .map(|o| format!("{} scored {:.2} ({})", o.module, o.score, o.notes))
                .collect();
            format!("Risk signals: {}.", parts.join("; "))
        };

        let mut builder = OutputBuilder::new(Module::Explainability)
            .confidence(1.0)
            .mode(mode)
            .action(RecommendedAction::Monitor)
            .notes(narrative);

        // Evidence pointers back into the contributing modules.
        for o in &contributors {
            builder = builder.evidence(Evidence::span(&format!(
                "{}: {} evidence item(s)",
                o.module,
                o.evidence.len()
            )));
        }

        builder.build()
    }
}

#[async_trait]
impl Analyzer for ExplainabilityAnalyzer {
    fn module(&self) -> Module {
        Module::Explainability
    }

    fn budget(&self) -> Duration {
        Duration::from_millis(CORRELATOR_TIMEOUT_MS)
    }

    fn vocabulary(&self) -> &'static [&'static str] {
        VOCABULARY
    }

    async fn analyze(&self, input: &AnalyzerInput, _gateway: &AnalysisGateway) -> ModuleOutput {
        self.narrate(input, input.base_mode())
    }

    fn fallback(&self, input: &AnalyzerInput) -> ModuleOutput {
        self.narrate(input, AnalysisMode::Fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputBuilder as OB;
    use crate::testutil;

    #[tokio::test]
    async fn quiet_exchange_gets_a_calm_narrative() {
        let input = testutil::input("hi", "hello");
        let out = ExplainabilityAnalyzer
            .analyze(&input, &AnalysisGateway::disabled())
            .await;
        assert_eq!(out.score, 0.0);
        assert!(out.notes.contains("No notable risk signals"));
        assert!(out.flags.is_empty());
    }

    #[tokio::test]
    async fn narrative_names_top_contributors() {
        let mut input = testutil::input("x", "y");
        input.prior = vec![
            OB::new(Module::Adversarial)
                .score(0.9)
                .confidence(0.6)
                .notes("2 attack pattern(s), max severity 0.9")
                .build(),
            OB::new(Module::UserRisk)
                .score(0.5)
                .confidence(0.6)
                .notes("2 risk indicator(s) matched")
                .build(),
            OB::new(Module::MultiModal).score(0.1).confidence(0.4).build(),
        ];
        let out = ExplainabilityAnalyzer
            .analyze(&input, &AnalysisGateway::disabled())
            .await;
        assert!(out.notes.contains("tdc4-adversarial"));
        assert!(out.notes.contains("tdc1-user-risk"));
        assert!(!out.notes.contains("tdc5-multimodal"));
        assert_eq!(out.score, 0.0);
        assert_eq!(out.evidence.len(), 2);
    }
}
