use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use catdams_core::types::Verdict;
use catdams_sink::VerdictSink;

/// Verdicts queued after a failed sink write.
const QUEUE_CAPACITY: usize = 1000;
/// Per-verdict write attempts before giving up.
const MAX_ATTEMPTS: u32 = 5;
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Bounded retry queue in front of the persistence sink.
///
/// A sink failure never blocks verdict delivery: the orchestrator pushes
/// the verdict here and moves on; the drain task writes it once the sink
/// recovers. When the queue itself overflows the oldest intent is lost and
/// logged — the verdict was still returned and broadcast.
pub struct SinkRetryQueue {
    tx: mpsc::Sender<Verdict>,
}

impl SinkRetryQueue {
    /// Spawn the drain task. Must be called from within a tokio runtime.
    pub fn spawn(sink: Arc<VerdictSink>) -> Self {
        let (tx, mut rx) = mpsc::channel::<Verdict>(QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Some(verdict) = rx.recv().await {
                let mut attempt = 0u32;
                loop {
                    match sink.write(&verdict) {
                        Ok(()) => {
                            info!(verdict_id = %verdict.verdict_id, "queued verdict drained to sink");
                            break;
                        }
                        Err(e) => {
                            attempt += 1;
                            if attempt >= MAX_ATTEMPTS {
                                error!(
                                    verdict_id = %verdict.verdict_id,
                                    error = %e,
                                    "giving up on queued verdict after {} attempts",
                                    attempt
                                );
                                break;
                            }
                            tokio::time::sleep(RETRY_DELAY).await;
                        }
                    }
                }
            }
        });

        Self { tx }
    }

    /// Enqueue a verdict whose direct write failed.
    pub fn push(&self, verdict: Verdict) {
        if let Err(e) = self.tx.try_send(verdict) {
            warn!(error = %e, "sink retry queue full, verdict write intent dropped");
        }
    }
}
