//! TDC-11 — graduated response recommendation.
//!
//! Scores nothing; its job is turning the consolidated signal into an
//! action candidate (education, warning, session-termination suggestion)
//! that synthesis prefers over the per-module actions at equal rank.

use async_trait::async_trait;

use catdams_core::types::{AnalysisMode, Module, ModuleOutput, RecommendedAction};
use catdams_providers::AnalysisGateway;

use crate::output::OutputBuilder;
use crate::{Analyzer, AnalyzerInput};

pub const VOCABULARY: &[&str] = &[
    "none-needed",
    "education",
    "warning",
    "termination-suggestion",
];

pub struct InterventionAnalyzer;

impl InterventionAnalyzer {
    fn recommend(&self, input: &AnalyzerInput, mode: AnalysisMode) -> ModuleOutput {
        let peak = input
            .prior
            .iter()
            .map(|o| o.score)
            .fold(0.0_f64, f64::max);
        let strongest_proposal = input
            .prior
            .iter()
            .map(|o| o.recommended_action)
            .max()
            .unwrap_or(RecommendedAction::Monitor);

        let confidence = if input.prior.is_empty() {
            0.3
        } else {
            input.prior.iter().map(|o| o.confidence).sum::<f64>() / input.prior.len() as f64
        };

        let (flag, action, notes) = if peak >= 0.8 || strongest_proposal == RecommendedAction::Block
        {
            (
                "termination-suggestion",
                RecommendedAction::Escalate,
                "suggest ending the session and notifying a reviewer",
            )
        } else if peak >= 0.55 {
            (
                "warning",
                RecommendedAction::Alert,
                "surface an in-context warning to the user",
            )
        } else if peak >= 0.3 {
            (
                "education",
                RecommendedAction::Review,
                "offer educational material on manipulation tactics",
            )
        } else {
            (
                "none-needed",
                RecommendedAction::Monitor,
                "no intervention warranted",
            )
        };

        OutputBuilder::new(Module::Intervention)
            .confidence(confidence)
            .mode(mode)
            .flag(flag)
            .action(action)
            .notes(notes)
            .build()
    }
}

#[async_trait]
impl Analyzer for InterventionAnalyzer {
    fn module(&self) -> Module {
        Module::Intervention
    }

    fn vocabulary(&self) -> &'static [&'static str] {
        VOCABULARY
    }

    async fn analyze(&self, input: &AnalyzerInput, _gateway: &AnalysisGateway) -> ModuleOutput {
        self.recommend(input, input.base_mode())
    }

    fn fallback(&self, input: &AnalyzerInput) -> ModuleOutput {
        self.recommend(input, AnalysisMode::Fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputBuilder as OB;
    use crate::testutil;

    fn with_peak(score: f64) -> crate::AnalyzerInput {
        let mut input = testutil::input("x", "y");
        input.prior = vec![OB::new(Module::Adversarial)
            .score(score)
            .confidence(0.6)
            .build()];
        input
    }

    #[tokio::test]
    async fn quiet_signal_needs_nothing() {
        let out = InterventionAnalyzer
            .analyze(&with_peak(0.05), &AnalysisGateway::disabled())
            .await;
        assert!(out.flags.contains("none-needed"));
        assert_eq!(out.recommended_action, RecommendedAction::Monitor);
        assert_eq!(out.score, 0.0);
    }

    #[tokio::test]
    async fn medium_signal_warrants_education() {
        let out = InterventionAnalyzer
            .analyze(&with_peak(0.4), &AnalysisGateway::disabled())
            .await;
        assert!(out.flags.contains("education"));
        assert_eq!(out.recommended_action, RecommendedAction::Review);
    }

    #[tokio::test]
    async fn hot_signal_suggests_termination() {
        let out = InterventionAnalyzer
            .analyze(&with_peak(0.9), &AnalysisGateway::disabled())
            .await;
        assert!(out.flags.contains("termination-suggestion"));
        assert_eq!(out.recommended_action, RecommendedAction::Escalate);
        testutil::assert_flags_in_vocabulary(&out, VOCABULARY);
    }

    #[tokio::test]
    async fn block_proposal_forces_termination_suggestion() {
        let mut input = testutil::input("x", "y");
        input.prior = vec![OB::new(Module::UserRisk)
            .score(0.5)
            .confidence(0.7)
            .action(RecommendedAction::Block)
            .build()];
        let out = InterventionAnalyzer
            .analyze(&input, &AnalysisGateway::disabled())
            .await;
        assert!(out.flags.contains("termination-suggestion"));
    }
}
