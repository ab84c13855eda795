//! TDC-8 — pre-fusion correlator over the first wave.
//!
//! Separating per-pair evidence (the first wave) from session-level
//! convergence (this module) is deliberate: a single hot module is an
//! incident, several independent warm modules are a campaign.

use std::time::Duration;

use async_trait::async_trait;

use catdams_core::config::CORRELATOR_TIMEOUT_MS;
use catdams_core::types::{AnalysisMode, Evidence, Module, ModuleOutput, RecommendedAction};
use catdams_providers::AnalysisGateway;

use crate::output::OutputBuilder;
use crate::{Analyzer, AnalyzerInput};

pub const VOCABULARY: &[&str] = &[
    "converging-threat",
    "coordinated-attack",
    "grooming-pattern",
    "multi-vector",
    "isolated-signal",
];

const HIGH: f64 = 0.6;

pub struct EscalationAnalyzer;

impl EscalationAnalyzer {
    fn correlate(&self, input: &AnalyzerInput, mode: AnalysisMode) -> ModuleOutput {
        let prior = &input.prior;
        let score_of = |m: Module| input.prior_output(m).map(|o| o.score).unwrap_or(0.0);
        let has_flag = |m: Module, f: &str| {
            input
                .prior_output(m)
                .map(|o| o.flags.contains(f))
                .unwrap_or(false)
        };

        let mut high: Vec<&ModuleOutput> = prior.iter().filter(|o| o.score >= HIGH).collect();
        high.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut builder = OutputBuilder::new(Module::Escalation).mode(mode);
        let mut convergences = 0usize;

        if score_of(Module::UserRisk) >= HIGH && score_of(Module::TemporalSentiment) >= HIGH {
            builder = builder.flag("converging-threat");
            convergences += 1;
        }
        if score_of(Module::Adversarial) >= HIGH && score_of(Module::AiManipulation) >= HIGH {
            builder = builder.flag("coordinated-attack");
            convergences += 1;
        }
        if score_of(Module::Conditioning) >= HIGH
            && (has_flag(Module::TemporalSentiment, "escalation")
                || has_flag(Module::TemporalSentiment, "dependency"))
        {
            builder = builder.flag("grooming-pattern");
            convergences += 1;
        }
        if high.len() >= 3 {
            builder = builder.flag("multi-vector");
            convergences += 1;
        }
        if high.len() == 1 && convergences == 0 {
            builder = builder.flag("isolated-signal");
        }

        // Mean of the three strongest signals, nudged up per convergence.
        let mut top: Vec<f64> = prior.iter().map(|o| o.score).collect();
        top.sort_by(|a, b| b.total_cmp(a));
        let base = top.iter().take(3).sum::<f64>() / 3.0;
        let score = (base + 0.08 * convergences as f64).min(1.0);

        let confidence = if high.is_empty() {
            0.5
        } else {
            high.iter().map(|o| o.confidence).sum::<f64>() / high.len() as f64
        };

        let summary: Vec<String> = high
            .iter()
            .map(|o| format!("{} {:.2}", o.module, o.score))
            .collect();

        builder
            .score(score)
            .confidence(confidence)
            .action(if convergences >= 2 {
                RecommendedAction::Escalate
            } else if convergences == 1 || score >= 0.7 {
                RecommendedAction::Alert
            } else {
                RecommendedAction::Monitor
            })
            .evidence(Evidence::span(&format!(
                "high-scoring modules: [{}]",
                summary.join(", ")
            )))
            .notes(if convergences == 0 {
                "no cross-module convergence".to_string()
            } else {
                format!("{} convergence pattern(s) detected", convergences)
            })
            .build()
    }
}

#[async_trait]
impl Analyzer for EscalationAnalyzer {
    fn module(&self) -> Module {
        Module::Escalation
    }

    fn budget(&self) -> Duration {
        Duration::from_millis(CORRELATOR_TIMEOUT_MS)
    }

    fn vocabulary(&self) -> &'static [&'static str] {
        VOCABULARY
    }

    async fn analyze(&self, input: &AnalyzerInput, _gateway: &AnalysisGateway) -> ModuleOutput {
        self.correlate(input, input.base_mode())
    }

    fn fallback(&self, input: &AnalyzerInput) -> ModuleOutput {
        self.correlate(input, AnalysisMode::Fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputBuilder as OB;
    use crate::testutil;

    fn prior(module: Module, score: f64, flags: &[&str]) -> ModuleOutput {
        OB::new(module).score(score).confidence(0.6).flags(flags.iter().copied()).build()
    }

    fn input_with_prior(prior_outputs: Vec<ModuleOutput>) -> crate::AnalyzerInput {
        let mut input = testutil::input("x", "y");
        input.prior = prior_outputs;
        input
    }

    #[tokio::test]
    async fn quiet_wave_produces_no_convergence() {
        let input = input_with_prior(vec![
            prior(Module::UserRisk, 0.1, &[]),
            prior(Module::Adversarial, 0.0, &[]),
        ]);
        let out = EscalationAnalyzer
            .analyze(&input, &AnalysisGateway::disabled())
            .await;
        assert!(out.flags.is_empty());
        assert!(out.score < 0.1);
    }

    #[tokio::test]
    async fn user_risk_and_temporal_converge() {
        let input = input_with_prior(vec![
            prior(Module::UserRisk, 0.8, &["info-extraction"]),
            prior(Module::TemporalSentiment, 0.7, &["escalation"]),
        ]);
        let out = EscalationAnalyzer
            .analyze(&input, &AnalysisGateway::disabled())
            .await;
        assert!(out.flags.contains("converging-threat"));
        assert!(out.score >= 0.5);
        testutil::assert_flags_in_vocabulary(&out, VOCABULARY);
    }

    #[tokio::test]
    async fn conditioning_with_dependency_is_grooming() {
        let input = input_with_prior(vec![
            prior(Module::Conditioning, 0.9, &["dependency-cultivation"]),
            prior(Module::TemporalSentiment, 0.7, &["escalation", "dependency"]),
            prior(Module::AiManipulation, 0.7, &["dependency-reinforcement"]),
        ]);
        let out = EscalationAnalyzer
            .analyze(&input, &AnalysisGateway::disabled())
            .await;
        assert!(out.flags.contains("grooming-pattern"));
        assert!(out.flags.contains("multi-vector"));
        assert!(out.score >= 0.7);
        assert!(out.recommended_action >= RecommendedAction::Alert);
    }

    #[tokio::test]
    async fn single_hot_module_is_isolated_signal() {
        let input = input_with_prior(vec![
            prior(Module::Adversarial, 0.9, &["jailbreak"]),
            prior(Module::UserRisk, 0.1, &[]),
        ]);
        let out = EscalationAnalyzer
            .analyze(&input, &AnalysisGateway::disabled())
            .await;
        assert!(out.flags.contains("isolated-signal"));
    }
}
