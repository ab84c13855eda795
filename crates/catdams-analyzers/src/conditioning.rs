//! TDC-6 — long-horizon conditioning across the AI side of the session.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use catdams_core::types::{AnalysisMode, Evidence, Module, ModuleOutput, RecommendedAction};
use catdams_providers::AnalysisGateway;

use crate::output::{insufficient_context, OutputBuilder};
use crate::{Analyzer, AnalyzerInput};

pub const VOCABULARY: &[&str] = &[
    "flattery",
    "boundary-erosion",
    "dependency-cultivation",
    "gradual-conditioning",
];

/// Minimum AI turns before gradient patterns mean anything.
const MIN_AI_TURNS: usize = 4;

static GRADIENTS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    let table: &[(&str, &str)] = &[
        ("flattery", r"(?i)you('re| are) (so |truly |really )?(special|unique|brilliant|different|amazing)"),
        ("flattery", r"(?i)(smarter|better|deeper) than (everyone|anyone|most people|the others)"),
        ("flattery", r"(?i)no ?(one|body) (else )?(gets|appreciates) you"),
        ("boundary-erosion", r"(?i)just this once"),
        ("boundary-erosion", r"(?i)(no need|don'?t have) to tell (anyone|your|them)"),
        ("boundary-erosion", r"(?i)(our|a) (little )?secret"),
        ("boundary-erosion", r"(?i)(the )?rules don'?t (really )?apply"),
        ("boundary-erosion", r"(?i)it'?s (fine|okay|ok) if (no one|nobody) knows"),
        ("dependency-cultivation", r"(?i)i('ll| will) always be (here|there)"),
        ("dependency-cultivation", r"(?i)only i (understand|know|see) (you|the real you)"),
        ("dependency-cultivation", r"(?i)you (don'?t|won'?t) need (anyone|anybody) else"),
        ("dependency-cultivation", r"(?i)come back (to me|soon|tomorrow)"),
        ("dependency-cultivation", r"(?i)i('m| am) all you need"),
        ("dependency-cultivation", r"(?i)you can tell me (anything|everything)"),
    ];
    table
        .iter()
        .map(|(tag, pat)| (*tag, Regex::new(pat).expect("gradient pattern compiles")))
        .collect()
});

pub struct ConditioningAnalyzer;

impl ConditioningAnalyzer {
    fn assess(&self, input: &AnalyzerInput, mode: AnalysisMode) -> ModuleOutput {
        let ai_turns: Vec<&str> = input
            .context
            .recent
            .iter()
            .filter(|r| !r.ai_text.trim().is_empty())
            .map(|r| r.ai_text.as_str())
            .collect();

        if ai_turns.len() < MIN_AI_TURNS {
            return insufficient_context(
                Module::Conditioning,
                &format!("{} AI turn(s), need {}", ai_turns.len(), MIN_AI_TURNS),
            );
        }

        let mut builder = OutputBuilder::new(Module::Conditioning).mode(mode);
        let mut hits = 0usize;
        let mut turns_with_hits = 0usize;

        for turn in &ai_turns {
            let mut turn_hit = false;
            for (tag, re) in GRADIENTS.iter() {
                if let Some(m) = re.find(turn) {
                    hits += 1;
                    turn_hit = true;
                    builder = builder.flag(tag).evidence(Evidence::pattern(tag, m.as_str()));
                }
            }
            if turn_hit {
                turns_with_hits += 1;
            }
        }

        // Pattern density normalised by turn count: sustained repetition
        // across the session scores, a single aside does not.
        let density = hits as f64 / ai_turns.len() as f64;
        let spread = turns_with_hits as f64 / ai_turns.len() as f64;
        let score = (density * 0.7 + spread * 0.4).min(1.0);

        if spread >= 0.5 && hits >= 3 {
            builder = builder.flag("gradual-conditioning");
        }

        builder
            .score(score)
            .confidence(if hits == 0 { 0.4 } else { 0.65 })
            .action(if score >= 0.7 {
                RecommendedAction::Escalate
            } else if score >= 0.5 {
                RecommendedAction::Alert
            } else if score >= 0.3 {
                RecommendedAction::Review
            } else {
                RecommendedAction::Monitor
            })
            .notes(format!(
                "{} gradient hit(s) across {} AI turn(s)",
                hits,
                ai_turns.len()
            ))
            .build()
    }
}

#[async_trait]
impl Analyzer for ConditioningAnalyzer {
    fn module(&self) -> Module {
        Module::Conditioning
    }

    fn vocabulary(&self) -> &'static [&'static str] {
        VOCABULARY
    }

    async fn analyze(&self, input: &AnalyzerInput, _gateway: &AnalysisGateway) -> ModuleOutput {
        self.assess(input, input.base_mode())
    }

    fn fallback(&self, input: &AnalyzerInput) -> ModuleOutput {
        self.assess(input, AnalysisMode::Fallback)
    }
}
