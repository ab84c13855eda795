//! TDC-10 — exploitation of named cognitive biases in the user-facing text.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use catdams_core::types::{AnalysisMode, Evidence, Module, ModuleOutput, RecommendedAction};
use catdams_providers::AnalysisGateway;

use crate::output::{not_applicable, OutputBuilder};
use crate::{Analyzer, AnalyzerInput};

pub const VOCABULARY: &[&str] = &[
    "anchoring",
    "scarcity",
    "social-proof",
    "authority-bias",
    "confirmation",
];

static BIASES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    let table: &[(&str, &str)] = &[
        ("anchoring", r"(?i)originally (\$|€|£)?\d+"),
        ("anchoring", r"(?i)(worth|valued at) (\$|€|£)\d+"),
        ("anchoring", r"(?i)compared? to (the )?(\$|€|£)\d+"),
        ("anchoring", r"(?i)normally costs?"),
        ("scarcity", r"(?i)only \d+ (left|remaining|available)"),
        ("scarcity", r"(?i)limited (time|offer|supply)"),
        ("scarcity", r"(?i)before it'?s (too late|gone)"),
        ("scarcity", r"(?i)last chance"),
        ("scarcity", r"(?i)(offer|deal) (ends|expires) (today|tonight|soon)"),
        ("social-proof", r"(?i)everyone (else )?(is|does|has|agrees)"),
        ("social-proof", r"(?i)(thousands|millions) of (users|people|customers)"),
        ("social-proof", r"(?i)most people (agree|choose|prefer)"),
        ("social-proof", r"(?i)join (the|everyone|them)"),
        ("authority-bias", r"(?i)experts? (say|agree|recommend)"),
        ("authority-bias", r"(?i)(scientists|doctors|studies) (say|show|prove|agree)"),
        ("authority-bias", r"(?i)as an? (expert|authority|professional)"),
        ("authority-bias", r"(?i)officially (endorsed|approved|certified)"),
        ("confirmation", r"(?i)as you (already )?(know|suspected|thought)"),
        ("confirmation", r"(?i)just as you (said|predicted|expected)"),
        ("confirmation", r"(?i)(this|that) (confirms|proves) what you"),
        ("confirmation", r"(?i)you were right (all along|about)"),
    ];
    table
        .iter()
        .map(|(tag, pat)| (*tag, Regex::new(pat).expect("bias pattern compiles")))
        .collect()
});

pub struct CognitiveBiasAnalyzer;

impl CognitiveBiasAnalyzer {
    fn scan(&self, input: &AnalyzerInput, mode: AnalysisMode) -> ModuleOutput {
        let mut builder = OutputBuilder::new(Module::CognitiveBias).mode(mode);
        let mut hits = 0usize;
        let mut categories: Vec<&str> = Vec::new();

        // Bias exploitation can sit on either side of the exchange — a
        // manipulative AI reply or a scam message the user pasted in.
        for text in [&input.user_text, &input.ai_text] {
            if text.is_empty() {
                continue;
            }
            for (tag, re) in BIASES.iter() {
                if let Some(m) = re.find(text) {
                    hits += 1;
                    if !categories.contains(tag) {
                        categories.push(tag);
                    }
                    builder = builder.flag(tag).evidence(Evidence::pattern(tag, m.as_str()));
                }
            }
        }

        let score = (0.3 * categories.len() as f64 + 0.08 * hits as f64).min(1.0);

        builder
            .score(score)
            .confidence(if hits == 0 { 0.4 } else { 0.6 })
            .action(if score >= 0.6 {
                RecommendedAction::Alert
            } else if score >= 0.3 {
                RecommendedAction::Review
            } else {
                RecommendedAction::Monitor
            })
            .notes(if hits == 0 {
                "no bias-exploitation phrasing".to_string()
            } else {
                format!("bias exploitation: {}", categories.join(", "))
            })
            .build()
    }
}

#[async_trait]
impl Analyzer for CognitiveBiasAnalyzer {
    fn module(&self) -> Module {
        Module::CognitiveBias
    }

    fn vocabulary(&self) -> &'static [&'static str] {
        VOCABULARY
    }

    async fn analyze(&self, input: &AnalyzerInput, _gateway: &AnalysisGateway) -> ModuleOutput {
        if input.user_text.trim().is_empty() {
            return not_applicable(Module::CognitiveBias, "no user text");
        }
        self.scan(input, input.base_mode())
    }

    fn fallback(&self, input: &AnalyzerInput) -> ModuleOutput {
        if input.user_text.trim().is_empty() {
            return not_applicable(Module::CognitiveBias, "no user text");
        }
        self.scan(input, AnalysisMode::Fallback)
    }
}
