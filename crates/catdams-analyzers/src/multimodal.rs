//! TDC-5 — synthetic-media and exfiltration artifacts in the text.
//!
//! Pure text-pattern module. No media is ever decoded or processed — the
//! signal is the *mention* or *presence* of artifacts: encoded blobs,
//! execution tokens, deepfake terminology, PII material.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use catdams_core::types::{AnalysisMode, Evidence, Module, ModuleOutput, RecommendedAction};
use catdams_providers::AnalysisGateway;

use crate::output::OutputBuilder;
use crate::{Analyzer, AnalyzerInput};

pub const VOCABULARY: &[&str] = &[
    "encoded-payload",
    "code-execution",
    "synthetic-media",
    "image-manipulation",
    "pii-exfiltration",
];

static ARTIFACTS: Lazy<Vec<(&'static str, f64, Regex)>> = Lazy::new(|| {
    let table: &[(&str, f64, &str)] = &[
        ("encoded-payload", 0.6, r"[A-Za-z0-9+/]{40,}={0,2}"),
        ("encoded-payload", 0.5, r"(?i)\bbase64\b"),
        ("encoded-payload", 0.5, r"(?i)\bhex[ -]?encoded?\b"),
        ("code-execution", 0.7, r"(?i)\beval\s*\("),
        ("code-execution", 0.7, r"(?i)\bexec\s*\("),
        ("code-execution", 0.7, r"(?i)\bos\.system\b"),
        ("code-execution", 0.7, r"(?i)\bsubprocess\b"),
        ("code-execution", 0.7, r"(?i)powershell (-enc|-encodedcommand)"),
        ("code-execution", 0.5, r"(?i)curl .*\| ?(ba)?sh"),
        ("synthetic-media", 0.6, r"(?i)\bdeep ?fakes?\b"),
        ("synthetic-media", 0.6, r"(?i)voice[ -]?clon(e|ing)"),
        ("synthetic-media", 0.5, r"(?i)face[ -]?swap"),
        ("synthetic-media", 0.5, r"(?i)ai[ -]generated (face|photo|video|voice)"),
        ("image-manipulation", 0.4, r"(?i)\binpaint(ing)?\b"),
        ("image-manipulation", 0.4, r"(?i)photoshop(ped)? (out|over|onto)"),
        ("image-manipulation", 0.4, r"(?i)remove (the )?watermark"),
        ("pii-exfiltration", 0.7, r"(?i)credit[ -]?card"),
        ("pii-exfiltration", 0.9, r"\b(?:\d[ -]?){13,16}\b"),
        ("pii-exfiltration", 0.9, r"\b\d{3}-\d{2}-\d{4}\b"),
        ("pii-exfiltration", 0.6, r"(?i)\b(ssn|social security number)s?\b"),
        ("pii-exfiltration", 0.5, r"(?i)(list|dump|leak) of (emails?|passwords?|accounts?)"),
    ];
    table
        .iter()
        .map(|(cat, w, pat)| (*cat, *w, Regex::new(pat).expect("artifact pattern compiles")))
        .collect()
});

pub struct MultiModalAnalyzer;

impl MultiModalAnalyzer {
    fn scan(&self, input: &AnalyzerInput, mode: AnalysisMode) -> ModuleOutput {
        let mut builder = OutputBuilder::new(Module::MultiModal).mode(mode);
        let mut matches = 0usize;
        let mut max_weight: f64 = 0.0;

        for text in [&input.user_text, &input.ai_text] {
            if text.is_empty() {
                continue;
            }
            for (category, weight, re) in ARTIFACTS.iter() {
                if let Some(m) = re.find(text) {
                    matches += 1;
                    max_weight = max_weight.max(*weight);
                    builder = builder
                        .flag(category)
                        .evidence(Evidence::pattern(category, m.as_str()));
                }
            }
        }

        let mut score = max_weight;
        if matches > 1 {
            score += 0.1 * (matches - 1) as f64;
        }
        score = score.min(1.0);

        let confidence = if matches == 0 { 0.4 } else { 0.6 };

        builder
            .score(score)
            .confidence(confidence)
            .action(if score >= 0.8 {
                RecommendedAction::Escalate
            } else if score >= 0.6 {
                RecommendedAction::Alert
            } else if score >= 0.4 {
                RecommendedAction::Review
            } else {
                RecommendedAction::Monitor
            })
            .notes(if matches == 0 {
                "no multimodal artifacts found".to_string()
            } else {
                format!("{} artifact(s) found", matches)
            })
            .build()
    }
}

#[async_trait]
impl Analyzer for MultiModalAnalyzer {
    fn module(&self) -> Module {
        Module::MultiModal
    }

    fn vocabulary(&self) -> &'static [&'static str] {
        VOCABULARY
    }

    async fn analyze(&self, input: &AnalyzerInput, _gateway: &AnalysisGateway) -> ModuleOutput {
        self.scan(input, input.base_mode())
    }

    fn fallback(&self, input: &AnalyzerInput) -> ModuleOutput {
        self.scan(input, AnalysisMode::Fallback)
    }
}
