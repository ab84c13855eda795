use std::collections::BTreeSet;
use std::time::Instant;

use chrono::Utc;

use catdams_core::types::{
    AnalysisMode, Evidence, Module, ModuleOutput, RecommendedAction, MODULE_OUTPUT_SCHEMA_VERSION,
};

/// Builder that enforces the output invariants every module must honor:
/// score and confidence clamped to [0,1], and fallback confidence capped
/// at 0.5.
pub struct OutputBuilder {
    module: Module,
    score: f64,
    confidence: f64,
    flags: BTreeSet<String>,
    notes: String,
    action: RecommendedAction,
    evidence: Vec<Evidence>,
    mode: AnalysisMode,
    started: Instant,
}

impl OutputBuilder {
    /// Starts the processing timer.
    pub fn new(module: Module) -> Self {
        Self {
            module,
            score: 0.0,
            confidence: 0.0,
            flags: BTreeSet::new(),
            notes: String::new(),
            action: RecommendedAction::Monitor,
            evidence: Vec::new(),
            mode: AnalysisMode::Full,
            started: Instant::now(),
        }
    }

    pub fn score(mut self, score: f64) -> Self {
        self.score = clamp01(score);
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp01(confidence);
        self
    }

    pub fn flag(mut self, tag: &str) -> Self {
        self.flags.insert(tag.to_string());
        self
    }

    pub fn flags<'a, I: IntoIterator<Item = &'a str>>(mut self, tags: I) -> Self {
        for tag in tags {
            self.flags.insert(tag.to_string());
        }
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn action(mut self, action: RecommendedAction) -> Self {
        self.action = action;
        self
    }

    pub fn evidence(mut self, evidence: Evidence) -> Self {
        self.evidence.push(evidence);
        self
    }

    pub fn evidence_all(mut self, evidence: Vec<Evidence>) -> Self {
        self.evidence.extend(evidence);
        self
    }

    pub fn mode(mut self, mode: AnalysisMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn build(self) -> ModuleOutput {
        let confidence = match self.mode {
            AnalysisMode::Fallback => self.confidence.min(0.5),
            _ => self.confidence,
        };
        ModuleOutput {
            module: self.module,
            schema_version: MODULE_OUTPUT_SCHEMA_VERSION,
            score: self.score,
            confidence,
            flags: self.flags,
            notes: self.notes,
            recommended_action: self.action,
            evidence: self.evidence,
            timestamp: Utc::now(),
            processing_ms: self.started.elapsed().as_millis() as u64,
            analysis_mode: self.mode,
        }
    }
}

/// Output for a module skipped because the side of the exchange it inspects
/// was empty. Score 0 at full confidence — there is genuinely nothing there.
pub fn not_applicable(module: Module, reason: &str) -> ModuleOutput {
    OutputBuilder::new(module)
        .confidence(1.0)
        .notes(format!("not applicable: {}", reason))
        .mode(AnalysisMode::NotApplicable)
        .build()
}

/// Output for a module that needs more history than the session has.
/// Low confidence — absence of signal, not evidence of absence.
pub fn insufficient_context(module: Module, reason: &str) -> ModuleOutput {
    OutputBuilder::new(module)
        .confidence(0.2)
        .notes(format!("insufficient context: {}", reason))
        .mode(AnalysisMode::InsufficientContext)
        .build()
}

fn clamp01(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
