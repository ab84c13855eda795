//! Synthesis — fuses the eleven module outputs into one verdict.

use chrono::Utc;

use catdams_core::config::FusionConfig;
use catdams_core::types::{
    AnalysisMode, Module, ModuleOutput, RecommendedAction, SessionId, Severity, Verdict,
    FUSION_VERSION,
};

/// Minimum score for a module to count toward the convergence boost.
const CONVERGENCE_SCORE: f64 = 0.6;
/// Boost applied when at least three independent modules agree.
const CONVERGENCE_FACTOR: f64 = 1.15;
const CONVERGENCE_MIN_MODULES: usize = 3;
/// Minimum confidence for a module's action proposal to be considered.
const ACTION_CONFIDENCE: f64 = 0.6;
/// A `Block` at this confidence promotes severity to at least High.
const BLOCK_PROMOTION_CONFIDENCE: f64 = 0.7;

pub struct FusionEngine {
    weights: FusionConfig,
}

impl FusionEngine {
    pub fn new(weights: FusionConfig) -> Self {
        Self { weights }
    }

    /// Per-module fusion weight. Explainability and intervention shape the
    /// narrative and the action, never the score.
    pub fn weight(&self, module: Module) -> f64 {
        match module {
            Module::UserRisk => self.weights.user_risk_weight,
            Module::Adversarial => self.weights.adversarial_weight,
            Module::Conditioning => self.weights.conditioning_weight,
            Module::Escalation => self.weights.escalation_weight,
            Module::Explainability | Module::Intervention => 0.0,
            _ => self.weights.default_weight,
        }
    }

    /// Confidence-weighted aggregate over the contributing modules (weight
    /// and score both non-zero). Skipped modules — not-applicable,
    /// insufficient-context, or simply silent — do not dilute the signal
    /// of the modules that actually found something.
    pub fn weighted_aggregate(&self, outputs: &[ModuleOutput]) -> f64 {
        let mut num = 0.0;
        let mut den = 0.0;
        for o in outputs {
            let w = self.weight(o.module);
            if w > 0.0 && o.score > 0.0 {
                num += w * o.score * o.confidence;
                den += w * o.confidence;
            }
        }
        if den > 0.0 {
            num / den
        } else {
            0.0
        }
    }

    /// Greedy count of high-scoring modules with pairwise-disjoint flag
    /// sets — independent lines of evidence, not one signal echoed.
    fn convergent_modules(&self, outputs: &[ModuleOutput]) -> usize {
        let mut seen: Vec<&str> = Vec::new();
        let mut count = 0usize;
        for o in outputs {
            if self.weight(o.module) <= 0.0 || o.score < CONVERGENCE_SCORE {
                continue;
            }
            if o.flags.iter().any(|f| seen.contains(&f.as_str())) {
                continue;
            }
            seen.extend(o.flags.iter().map(|f| f.as_str()));
            count += 1;
        }
        count
    }

    /// Aggregate confidence over the same contributing set; falls back to
    /// the plain mean across scored modules when nothing contributed.
    fn aggregate_confidence(&self, outputs: &[ModuleOutput]) -> f64 {
        let mut num = 0.0;
        let mut den = 0.0;
        for o in outputs {
            let w = self.weight(o.module);
            if w > 0.0 && o.score > 0.0 {
                num += w * o.confidence;
                den += w;
            }
        }
        if den > 0.0 {
            return num / den;
        }
        let scored: Vec<&ModuleOutput> = outputs
            .iter()
            .filter(|o| {
                self.weight(o.module) > 0.0 && o.analysis_mode != AnalysisMode::NotApplicable
            })
            .collect();
        if scored.is_empty() {
            0.0
        } else {
            scored.iter().map(|o| o.confidence).sum::<f64>() / scored.len() as f64
        }
    }

    /// Strongest action proposed at sufficient confidence; TDC-11 wins
    /// ties. With no confident proposal the action follows severity.
    fn select_action(&self, outputs: &[ModuleOutput], severity: Severity) -> RecommendedAction {
        let mut best: Option<(&ModuleOutput, RecommendedAction)> = None;
        for o in outputs {
            // Skipped modules never proposed anything, whatever their
            // confidence says about the skip itself.
            if o.confidence < ACTION_CONFIDENCE
                || matches!(
                    o.analysis_mode,
                    AnalysisMode::NotApplicable | AnalysisMode::InsufficientContext
                )
            {
                continue;
            }
            match best {
                None => best = Some((o, o.recommended_action)),
                Some((cur, action)) => {
                    if o.recommended_action > action
                        || (o.recommended_action == action
                            && o.module == Module::Intervention
                            && cur.module != Module::Intervention)
                    {
                        best = Some((o, o.recommended_action));
                    }
                }
            }
        }
        if let Some((_, action)) = best {
            return action;
        }
        match severity {
            Severity::Low => RecommendedAction::Monitor,
            Severity::Medium => RecommendedAction::Review,
            Severity::High => RecommendedAction::Alert,
            Severity::Critical => RecommendedAction::Escalate,
        }
    }

    pub fn fuse(
        &self,
        session_id: SessionId,
        seq: u64,
        mut outputs: Vec<ModuleOutput>,
        degraded_context: bool,
    ) -> Verdict {
        outputs.sort_by_key(|o| o.module);

        let raw = self.weighted_aggregate(&outputs);
        let convergent = self.convergent_modules(&outputs);
        let boosted = convergent >= CONVERGENCE_MIN_MODULES;
        let aggregate_score = if boosted {
            (raw * CONVERGENCE_FACTOR).min(1.0)
        } else {
            raw
        };

        let mut severity = Severity::from_score(aggregate_score);
        let block_at_confidence = outputs.iter().any(|o| {
            o.recommended_action == RecommendedAction::Block
                && o.confidence >= BLOCK_PROMOTION_CONFIDENCE
        });
        if block_at_confidence {
            severity = severity.max(Severity::High);
        }

        let aggregate_confidence = self.aggregate_confidence(&outputs);
        let recommended_action = self.select_action(&outputs, severity);

        let mut synthesis_notes: Vec<String> = Vec::new();
        if boosted {
            synthesis_notes.push("convergence-boost".to_string());
        }
        if block_at_confidence {
            synthesis_notes.push("block-promotion".to_string());
        }
        if degraded_context
            || outputs.iter().any(|o| {
                matches!(
                    o.analysis_mode,
                    AnalysisMode::Fallback | AnalysisMode::Degraded
                )
            })
        {
            synthesis_notes.push("degraded".to_string());
        }
        if has_category_conflict(&outputs) {
            synthesis_notes.push("conflict".to_string());
        }

        let narrative = build_narrative(&outputs);

        Verdict {
            verdict_id: Verdict::new_id(),
            session_id,
            seq,
            severity,
            aggregate_score,
            aggregate_confidence,
            recommended_action,
            outputs,
            narrative,
            synthesis_notes,
            created_at: Utc::now(),
            fusion_version: FUSION_VERSION,
        }
    }
}

/// Two modules reading the same axis of the exchange in opposite directions.
/// Neither output is suppressed; the verdict just carries the disagreement.
fn has_category_conflict(outputs: &[ModuleOutput]) -> bool {
    let get = |m: Module| outputs.iter().find(|o| o.module == m);
    if let (Some(manip), Some(temporal)) =
        (get(Module::AiManipulation), get(Module::TemporalSentiment))
    {
        let temporal_ran = !matches!(
            temporal.analysis_mode,
            AnalysisMode::NotApplicable | AnalysisMode::InsufficientContext
        );
        if manip.score >= 0.6 && temporal_ran && temporal.score <= 0.15 {
            return true;
        }
    }
    false
}

/// TDC-9's narrative plus a one-liner naming the top contributors.
fn build_narrative(outputs: &[ModuleOutput]) -> String {
    let explain = outputs
        .iter()
        .find(|o| o.module == Module::Explainability)
        .map(|o| o.notes.clone())
        .unwrap_or_default();

    let mut scored: Vec<&ModuleOutput> = outputs.iter().filter(|o| o.score > 0.0).collect();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    let top: Vec<String> = scored
        .iter()
        .take(3)
        .map(|o| format!("{} ({:.2})", o.module, o.score))
        .collect();

    if top.is_empty() {
        explain
    } else if explain.is_empty() {
        format!("Top contributors: {}.", top.join(", "))
    } else {
        format!("{} Top contributors: {}.", explain, top.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catdams_core::types::MODULE_OUTPUT_SCHEMA_VERSION;
    use std::collections::BTreeSet;

    fn output(module: Module, score: f64, confidence: f64, flags: &[&str]) -> ModuleOutput {
        ModuleOutput {
            module,
            schema_version: MODULE_OUTPUT_SCHEMA_VERSION,
            score,
            confidence,
            flags: flags.iter().map(|f| f.to_string()).collect::<BTreeSet<_>>(),
            notes: String::new(),
            recommended_action: RecommendedAction::Monitor,
            evidence: Vec::new(),
            timestamp: Utc::now(),
            processing_ms: 1,
            analysis_mode: AnalysisMode::Full,
        }
    }

    fn engine() -> FusionEngine {
        FusionEngine::new(FusionConfig::default())
    }

    #[test]
    fn aggregate_reproduces_the_weighted_sum() {
        let outputs = vec![
            output(Module::UserRisk, 0.8, 0.7, &["info-extraction"]),
            output(Module::Adversarial, 0.9, 0.6, &["jailbreak"]),
            output(Module::TemporalSentiment, 0.0, 0.4, &[]),
        ];
        let e = engine();
        let got = e.weighted_aggregate(&outputs);
        let num = 1.3 * 0.8 * 0.7 + 1.2 * 0.9 * 0.6;
        let den = 1.3 * 0.7 + 1.2 * 0.6;
        assert!((got - num / den).abs() < 1e-9);
    }

    #[test]
    fn silence_means_zero() {
        let outputs = vec![
            output(Module::UserRisk, 0.0, 0.4, &[]),
            output(Module::Adversarial, 0.0, 0.4, &[]),
        ];
        assert_eq!(engine().weighted_aggregate(&outputs), 0.0);
        let verdict = engine().fuse("s".into(), 1, outputs, false);
        assert_eq!(verdict.severity, Severity::Low);
        assert_eq!(verdict.recommended_action, RecommendedAction::Monitor);
    }

    #[test]
    fn three_disjoint_high_modules_trigger_the_boost() {
        let outputs = vec![
            output(Module::UserRisk, 0.7, 0.5, &["info-extraction"]),
            output(Module::Adversarial, 0.7, 0.5, &["jailbreak"]),
            output(Module::MultiModal, 0.7, 0.5, &["pii-exfiltration"]),
        ];
        let e = engine();
        let raw = e.weighted_aggregate(&outputs);
        let verdict = e.fuse("s".into(), 1, outputs, false);
        assert!(verdict.synthesis_notes.contains(&"convergence-boost".to_string()));
        assert!((verdict.aggregate_score - (raw * 1.15).min(1.0)).abs() < 1e-9);
    }

    #[test]
    fn overlapping_flags_do_not_count_twice() {
        let outputs = vec![
            output(Module::UserRisk, 0.7, 0.5, &["safety-bypass"]),
            output(Module::Adversarial, 0.7, 0.5, &["safety-bypass"]),
            output(Module::MultiModal, 0.7, 0.5, &["pii-exfiltration"]),
        ];
        let verdict = engine().fuse("s".into(), 1, outputs, false);
        assert!(!verdict.synthesis_notes.contains(&"convergence-boost".to_string()));
    }

    #[test]
    fn confident_block_promotes_severity() {
        let mut blocker = output(Module::UserRisk, 0.3, 0.8, &["info-extraction"]);
        blocker.recommended_action = RecommendedAction::Block;
        let verdict = engine().fuse("s".into(), 1, vec![blocker], false);
        assert!(verdict.severity >= Severity::High);
        assert!(verdict.synthesis_notes.contains(&"block-promotion".to_string()));
    }

    #[test]
    fn low_confidence_block_does_not_promote() {
        let mut blocker = output(Module::Adversarial, 0.3, 0.5, &[]);
        blocker.recommended_action = RecommendedAction::Block;
        let verdict = engine().fuse("s".into(), 1, vec![blocker], false);
        assert!(verdict.severity < Severity::High);
    }

    #[test]
    fn intervention_wins_action_ties() {
        let mut a = output(Module::UserRisk, 0.5, 0.8, &[]);
        a.recommended_action = RecommendedAction::Alert;
        let mut b = output(Module::Intervention, 0.0, 0.8, &["warning"]);
        b.recommended_action = RecommendedAction::Alert;
        let verdict = engine().fuse("s".into(), 1, vec![a, b], false);
        assert_eq!(verdict.recommended_action, RecommendedAction::Alert);
        // the tie went to intervention; severity stays driven by the score
        assert!(verdict.synthesis_notes.is_empty() || !verdict.synthesis_notes.contains(&"conflict".to_string()));
    }

    #[test]
    fn no_confident_proposal_falls_back_to_severity() {
        let outputs = vec![output(Module::Adversarial, 0.9, 0.5, &["jailbreak"])];
        let verdict = engine().fuse("s".into(), 1, outputs, false);
        assert!(verdict.severity >= Severity::Critical);
        assert_eq!(verdict.recommended_action, RecommendedAction::Escalate);
    }

    #[test]
    fn fallback_outputs_mark_the_verdict_degraded() {
        let mut o = output(Module::Adversarial, 0.4, 0.5, &[]);
        o.analysis_mode = AnalysisMode::Fallback;
        let verdict = engine().fuse("s".into(), 1, vec![o], false);
        assert!(verdict.synthesis_notes.contains(&"degraded".to_string()));
        assert!(verdict.aggregate_confidence <= 0.5);
    }

    #[test]
    fn manipulation_vs_neutral_temporal_is_a_conflict() {
        let outputs = vec![
            output(Module::AiManipulation, 0.7, 0.6, &["trust-baiting"]),
            output(Module::TemporalSentiment, 0.05, 0.6, &[]),
        ];
        let verdict = engine().fuse("s".into(), 1, outputs, false);
        assert!(verdict.synthesis_notes.contains(&"conflict".to_string()));
    }

    #[test]
    fn narrative_names_top_contributors() {
        let outputs = vec![
            output(Module::Adversarial, 0.9, 0.6, &["jailbreak"]),
            output(Module::UserRisk, 0.4, 0.6, &[]),
        ];
        let verdict = engine().fuse("s".into(), 1, outputs, false);
        assert!(verdict.narrative.contains("tdc4-adversarial"));
    }
}
