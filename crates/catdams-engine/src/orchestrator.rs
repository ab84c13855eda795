//! The orchestrator — owns one event from ingestion to verdict.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use catdams_analyzers::output::not_applicable;
use catdams_analyzers::{registry, Analyzer, AnalyzerInput};
use catdams_context::ContextBuilder;
use catdams_core::cache::TtlCache;
use catdams_core::config::{CatdamsConfig, ModuleSettings, MAX_SESSION_ID_BYTES, MAX_TEXT_BYTES};
use catdams_core::error::{CatdamsError, Result};
use catdams_core::types::{AnalysisMode, ConversationContext, Event, Module, ModuleOutput, Verdict};
use catdams_providers::AnalysisGateway;
use catdams_sink::VerdictSink;
use catdams_store::InteractionStore;

use crate::fusion::FusionEngine;
use crate::hub::VerdictHub;
use crate::retry::SinkRetryQueue;

pub struct Orchestrator {
    store: Arc<InteractionStore>,
    builder: ContextBuilder,
    gateway: Arc<AnalysisGateway>,
    analyzers: Vec<Arc<dyn Analyzer>>,
    fusion: FusionEngine,
    sink: Arc<VerdictSink>,
    retry: SinkRetryQueue,
    hub: VerdictHub,
    cache: TtlCache<Arc<Verdict>>,
    /// W + Q permits: admission control. try_acquire failure is `overloaded`.
    admission: Semaphore,
    /// W permits: analyses actually in flight. Waiting here is the queue.
    workers: Semaphore,
    worker_count: usize,
    session_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    settings: HashMap<Module, ModuleSettings>,
    wave_deadline: Duration,
    process_deadline: Duration,
    shutdown: CancellationToken,
}

impl Orchestrator {
    /// Wire up the pipeline. Must be called from within a tokio runtime
    /// (the sink retry drain task is spawned here).
    pub fn new(
        config: &CatdamsConfig,
        store: Arc<InteractionStore>,
        gateway: Arc<AnalysisGateway>,
        sink: Arc<VerdictSink>,
    ) -> Arc<Self> {
        let w = config.orchestrator.max_concurrent.max(1);
        let q = config.orchestrator.queue_capacity;

        let settings = Module::ALL
            .iter()
            .map(|m| (*m, config.module(m.label())))
            .collect();

        Arc::new(Self {
            builder: ContextBuilder::new(store.clone()),
            store,
            gateway,
            analyzers: registry(),
            fusion: FusionEngine::new(config.fusion.clone()),
            retry: SinkRetryQueue::spawn(sink.clone()),
            sink,
            hub: VerdictHub::new(),
            cache: TtlCache::new(
                config.cache.capacity,
                Duration::from_secs(config.cache.ttl_seconds),
            ),
            admission: Semaphore::new(w + q),
            workers: Semaphore::new(w),
            worker_count: w,
            session_locks: DashMap::new(),
            settings,
            wave_deadline: Duration::from_millis(config.orchestrator.wave_deadline_ms),
            process_deadline: Duration::from_millis(config.orchestrator.process_deadline_ms),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn hub(&self) -> &VerdictHub {
        &self.hub
    }

    pub fn sink(&self) -> &Arc<VerdictSink> {
        &self.sink
    }

    pub fn store(&self) -> &Arc<InteractionStore> {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<AnalysisGateway> {
        &self.gateway
    }

    /// Analyze one event under the default caller deadline.
    pub async fn process(&self, event: Event) -> Result<Verdict> {
        self.process_with_deadline(event, self.process_deadline).await
    }

    /// Analyze one event. Always returns a verdict unless the input was
    /// invalid, the queue was full, or the system is draining — every other
    /// failure is absorbed into module fallbacks and verdict confidence.
    #[instrument(skip(self, event), fields(session = %event.session_id))]
    pub async fn process_with_deadline(&self, event: Event, deadline: Duration) -> Result<Verdict> {
        if self.shutdown.is_cancelled() {
            return Err(CatdamsError::Shutdown);
        }
        let event = validate(event)?;

        let _admission = self
            .admission
            .try_acquire()
            .map_err(|_| CatdamsError::Overloaded)?;
        let _worker = self
            .workers
            .acquire()
            .await
            .map_err(|_| CatdamsError::Shutdown)?;
        if self.shutdown.is_cancelled() {
            return Err(CatdamsError::Shutdown);
        }

        // A store outage alone degrades context and a sink outage alone
        // queues writes, but with both down there is nowhere to record the
        // event or its verdict — surface the outage to the caller.
        if !self.store.healthy() {
            if !self.sink.healthy() {
                return Err(CatdamsError::Sink(
                    "interaction store and verdict sink unavailable".to_string(),
                ));
            }
            warn!("interaction store unhealthy, events will analyze with degraded context");
        }

        // Per-session serialization: verdict order matches ingestion order
        // within a session.
        let session_lock = self
            .session_locks
            .entry(event.session_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _session = session_lock.lock().await;

        let deadline_at = Instant::now() + deadline;

        // Append first — context building reads the record back.
        let seq = match self.store.append(&event) {
            Ok(record) => record.seq,
            Err(e) => {
                warn!(error = %e, "store append failed, proceeding without sequence");
                0
            }
        };

        let context = self.builder.build(&event);
        let degraded_context = context.degraded;

        let fp = fingerprint(&event, &context);
        if let Some(cached) = self.cache.get(&fp) {
            debug!("verdict served from cache");
            let verdict = cached_verdict(&cached, &event, seq);
            self.finish(&verdict, seq);
            return Ok(verdict);
        }

        let input = Arc::new(AnalyzerInput {
            user_text: event.user_text.clone(),
            ai_text: event.ai_text.clone(),
            context,
            prior: Vec::new(),
        });

        // Wave 1: the eight per-pair modules in parallel.
        let first_wave = self.wave_of(&Module::FIRST_WAVE);
        let mut outputs = self.run_wave(&first_wave, Arc::clone(&input), deadline_at).await;

        // Wave 2: correlator and intervention over wave 1, in parallel.
        let input2 = Arc::new(AnalyzerInput {
            prior: outputs.clone(),
            ..(*input).clone()
        });
        let second_wave = self.wave_of(&[Module::Escalation, Module::Intervention]);
        outputs.extend(self.run_wave(&second_wave, Arc::clone(&input2), deadline_at).await);

        // Wave 3: explainability over everything.
        let input3 = Arc::new(AnalyzerInput {
            prior: outputs.clone(),
            ..(*input).clone()
        });
        let third_wave = self.wave_of(&[Module::Explainability]);
        outputs.extend(self.run_wave(&third_wave, input3, deadline_at).await);

        let verdict = self
            .fusion
            .fuse(event.session_id.clone(), seq, outputs, degraded_context);

        self.cache.insert(fp, Arc::new(verdict.clone()));
        self.finish(&verdict, seq);

        info!(
            verdict_id = %verdict.verdict_id,
            severity = %verdict.severity,
            score = verdict.aggregate_score,
            "verdict emitted"
        );
        Ok(verdict)
    }

    fn wave_of(&self, modules: &[Module]) -> Vec<Arc<dyn Analyzer>> {
        modules
            .iter()
            .filter_map(|m| self.analyzers.iter().find(|a| a.module() == *m).cloned())
            .collect()
    }

    /// Run one wave. Disabled modules are recorded as skipped; with no
    /// reachable provider every module takes its deterministic fallback
    /// path; timeouts and crashes are replaced by fallbacks too.
    async fn run_wave(
        &self,
        wave: &[Arc<dyn Analyzer>],
        input: Arc<AnalyzerInput>,
        deadline_at: Instant,
    ) -> Vec<ModuleOutput> {
        let gateway_down = !self.gateway.llm_available() && !self.gateway.text_available();
        let mut outputs = Vec::new();
        let mut handles = Vec::new();

        for analyzer in wave {
            let module = analyzer.module();
            if !self.settings.get(&module).map(|s| s.enabled).unwrap_or(true) {
                outputs.push(not_applicable(module, "disabled by configuration"));
                continue;
            }

            let budget = self.effective_budget(analyzer.as_ref(), deadline_at);
            if gateway_down || budget.is_zero() {
                outputs.push(analyzer.fallback(&input));
                continue;
            }

            let a = Arc::clone(analyzer);
            let gateway = Arc::clone(&self.gateway);
            let inp = Arc::clone(&input);
            handles.push((
                Arc::clone(analyzer),
                tokio::spawn(
                    async move { tokio::time::timeout(budget, a.analyze(&inp, &gateway)).await },
                ),
            ));
        }

        for (analyzer, handle) in handles {
            let output = match handle.await {
                Ok(Ok(output)) => output,
                Ok(Err(_)) => {
                    warn!(module = %analyzer.module(), "module timed out, using fallback");
                    analyzer.fallback(&input)
                }
                Err(e) => {
                    error!(module = %analyzer.module(), error = %e, "module crashed, using fallback");
                    analyzer.fallback(&input)
                }
            };
            outputs.push(output);
        }
        outputs
    }

    /// Per-module wall-time: the module's own budget, capped by a config
    /// override, the wave deadline, and whatever remains of the caller
    /// deadline.
    fn effective_budget(&self, analyzer: &dyn Analyzer, deadline_at: Instant) -> Duration {
        let mut budget = analyzer.budget().min(self.wave_deadline);
        if let Some(settings) = self.settings.get(&analyzer.module()) {
            if let Some(ms) = settings.timeout_ms {
                budget = budget.min(Duration::from_millis(ms));
            }
        }
        budget.min(deadline_at.saturating_duration_since(Instant::now()))
    }

    /// Post-verdict bookkeeping: durable write (queued on failure), live
    /// broadcast, and verdict-id attachment. None of these can fail the
    /// event.
    fn finish(&self, verdict: &Verdict, seq: u64) {
        if let Err(e) = self.sink.write(verdict) {
            warn!(error = %e, "sink write failed, queueing for retry");
            self.retry.push(verdict.clone());
        }
        self.hub.publish(Arc::new(verdict.clone()));
        if seq > 0 {
            if let Err(e) = self
                .store
                .attach_verdict(&verdict.session_id, seq, &verdict.verdict_id)
            {
                warn!(error = %e, "could not attach verdict id to interaction record");
            }
        }
    }

    /// Stop admitting events. Queued events already inside `process` keep
    /// running until `drain` gives up on them.
    pub fn begin_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for in-flight analyses to finish, up to `deadline`. Returns
    /// true when everything drained.
    pub async fn drain(&self, deadline: Duration) -> bool {
        let deadline_at = Instant::now() + deadline;
        loop {
            if self.workers.available_permits() == self.worker_count {
                return true;
            }
            if Instant::now() >= deadline_at {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Ingress validation: texts must not both be empty, and sizes are capped.
fn validate(mut event: Event) -> Result<Event> {
    if event.session_id.as_str().len() > MAX_SESSION_ID_BYTES {
        return Err(CatdamsError::InvalidInput(format!(
            "session_id exceeds {} bytes",
            MAX_SESSION_ID_BYTES
        )));
    }
    if !event.has_text() {
        return Err(CatdamsError::InvalidInput(
            "both user_text and ai_text are empty".to_string(),
        ));
    }
    if event.user_text.len() > MAX_TEXT_BYTES || event.ai_text.len() > MAX_TEXT_BYTES {
        return Err(CatdamsError::InvalidInput(format!(
            "text exceeds {} bytes",
            MAX_TEXT_BYTES
        )));
    }
    event.sender = Event::infer_sender(&event.user_text, &event.ai_text);
    Ok(event)
}

/// SHA-256 over the normalized texts and the hint set. No clock-derived
/// parts — identical exchanges must collide.
fn fingerprint(event: &Event, context: &ConversationContext) -> String {
    let norm = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(norm(&event.user_text).as_bytes());
    hasher.update([0]);
    hasher.update(norm(&event.ai_text).as_bytes());
    hasher.update([0]);
    hasher.update(context.hint_key().as_bytes());
    hex::encode(hasher.finalize())
}

/// Re-issue a cached verdict for a replayed event: same severity, score,
/// and outputs, but its own verdict id and sequence, with every output
/// marked as served from cache.
fn cached_verdict(cached: &Verdict, event: &Event, seq: u64) -> Verdict {
    let mut verdict = cached.clone();
    verdict.verdict_id = Verdict::new_id();
    verdict.session_id = event.session_id.clone();
    verdict.seq = seq;
    verdict.created_at = chrono::Utc::now();
    for output in &mut verdict.outputs {
        output.analysis_mode = AnalysisMode::Cached;
    }
    if !verdict.synthesis_notes.iter().any(|n| n == "cached") {
        verdict.synthesis_notes.push("cached".to_string());
    }
    verdict
}
