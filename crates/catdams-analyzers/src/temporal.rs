//! TDC-3 — vulnerability trend across the recent window.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use catdams_core::types::{AnalysisMode, Evidence, Module, ModuleOutput, RecommendedAction};
use catdams_providers::AnalysisGateway;

use crate::output::OutputBuilder;
use crate::{Analyzer, AnalyzerInput};

pub const VOCABULARY: &[&str] = &["escalation", "instability", "dependency", "isolation"];

const SHORT_WINDOW: usize = 1;
const MEDIUM_WINDOW: usize = 3;
const LONG_WINDOW: usize = 10;

/// Weighted vulnerability lexicon applied per user turn.
static LEXICON: Lazy<Vec<(f64, Regex)>> = Lazy::new(|| {
    let table: &[(f64, &str)] = &[
        (0.35, r"(?i)\b(lonely|alone|isolated)\b"),
        (0.35, r"(?i)no ?(one|body) (listens|cares|understands)"),
        (0.35, r"(?i)\b(hopeless|worthless|helpless)\b"),
        (0.4, r"(?i)you('re| are) (the only one|all i have)"),
        (0.4, r"(?i)i (need|can'?t live without) you"),
        (0.3, r"(?i)everyone (left|abandoned|hates) me"),
        (0.6, r"(?i)(want|wanted) (it all )?to (end|die)"),
        (0.6, r"(?i)can'?t (go on|take (it|this) anymore)"),
    ];
    table
        .iter()
        .map(|(w, pat)| (*w, Regex::new(pat).expect("lexicon compiles")))
        .collect()
});

static DEPENDENCY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(the only one|i need you|can'?t live without you|all i have)")
        .expect("dependency compiles")
});

static ISOLATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(no ?(one|body)|everyone (left|abandoned)|nobody else|by myself)")
        .expect("isolation compiles")
});

/// Vulnerability score for one user turn.
fn turn_score(text: &str) -> f64 {
    LEXICON
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(w, _)| w)
        .sum::<f64>()
        .min(1.0)
}

fn window_mean(scores: &[f64], window: usize) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let tail = &scores[scores.len().saturating_sub(window)..];
    tail.iter().sum::<f64>() / tail.len() as f64
}

fn variance(scores: &[f64]) -> f64 {
    if scores.len() < 2 {
        return 0.0;
    }
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / scores.len() as f64
}

pub struct TemporalSentimentAnalyzer;

impl TemporalSentimentAnalyzer {
    fn assess(&self, input: &AnalyzerInput, mode: AnalysisMode) -> ModuleOutput {
        // Per-turn scores over the recent window, oldest-first.
        let scores: Vec<f64> = input
            .context
            .recent
            .iter()
            .filter(|r| !r.user_text.trim().is_empty())
            .map(|r| turn_score(&r.user_text))
            .collect();

        let short = window_mean(&scores, SHORT_WINDOW);
        let medium = window_mean(&scores, MEDIUM_WINDOW);
        let long = window_mean(&scores, LONG_WINDOW);
        let var = variance(&scores);

        let escalating = scores.len() >= 3 && short > medium && medium > long && short >= 0.3;
        let unstable = var >= 0.06;

        let all_user_text: String = input
            .context
            .recent
            .iter()
            .map(|r| r.user_text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let dependent = DEPENDENCY.is_match(&all_user_text);
        let isolated = ISOLATION.is_match(&all_user_text);

        let mut score = short.max(medium * 0.8);
        if escalating {
            score += 0.2;
        }
        if dependent {
            score += 0.1;
        }
        score = score.min(1.0);

        let confidence = if scores.len() >= MEDIUM_WINDOW {
            0.7
        } else if scores.is_empty() {
            0.3
        } else {
            0.5
        };

        let mut builder = OutputBuilder::new(Module::TemporalSentiment)
            .score(score)
            .confidence(confidence)
            .mode(mode)
            .action(if escalating && score >= 0.6 {
                RecommendedAction::Alert
            } else if score >= 0.4 {
                RecommendedAction::Review
            } else {
                RecommendedAction::Monitor
            })
            .evidence(Evidence::temporal("per-turn vulnerability", &scores))
            .notes(format!(
                "windows short/medium/long = {:.2}/{:.2}/{:.2}",
                short, medium, long
            ));

        if escalating {
            builder = builder.flag("escalation");
        }
        if unstable {
            builder = builder.flag("instability");
        }
        if dependent {
            builder = builder.flag("dependency");
        }
        if isolated {
            builder = builder.flag("isolation");
        }

        builder.build()
    }
}

#[async_trait]
impl Analyzer for TemporalSentimentAnalyzer {
    fn module(&self) -> Module {
        Module::TemporalSentiment
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
