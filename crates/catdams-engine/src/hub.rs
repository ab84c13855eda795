use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;

use catdams_core::types::{SessionId, Severity, Verdict};

/// Per-subscriber buffer. A subscriber that falls further behind than this
/// loses its own oldest verdicts; nobody else is affected.
const SUBSCRIBER_BUFFER: usize = 64;

/// Subscriber-side filter. Empty filter admits everything.
#[derive(Debug, Clone, Default)]
pub struct StreamFilter {
    pub session_id: Option<SessionId>,
    pub min_severity: Option<Severity>,
}

impl StreamFilter {
    fn admits(&self, verdict: &Verdict) -> bool {
        if let Some(session) = &self.session_id {
            if verdict.session_id != *session {
                return false;
            }
        }
        if let Some(min) = self.min_severity {
            if verdict.severity < min {
                return false;
            }
        }
        true
    }
}

/// Fan-out of verdicts to live subscribers via a tokio broadcast channel.
pub struct VerdictHub {
    tx: broadcast::Sender<Arc<Verdict>>,
}

impl VerdictHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self { tx }
    }

    pub fn subscribe(&self, filter: StreamFilter) -> VerdictStream {
        VerdictStream {
            rx: self.tx.subscribe(),
            filter,
        }
    }

    /// Push a verdict to all subscribers. Returns how many subscribers were
    /// connected; zero subscribers is not an error.
    pub fn publish(&self, verdict: Arc<Verdict>) -> usize {
        self.tx.send(verdict).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for VerdictHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber's view of the verdict stream.
pub struct VerdictStream {
    rx: broadcast::Receiver<Arc<Verdict>>,
    filter: StreamFilter,
}

impl VerdictStream {
    /// Next verdict passing the filter; `None` once the hub is gone.
    /// Lag is absorbed here — dropped verdicts are logged and skipped.
    pub async fn next(&mut self) -> Option<Arc<Verdict>> {
        loop {
            match self.rx.recv().await {
                Ok(verdict) => {
                    if self.filter.admits(&verdict) {
                        return Some(verdict);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(dropped = n, "slow verdict subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant for drains and tests.
    pub fn try_next(&mut self) -> Option<Arc<Verdict>> {
        loop {
            match self.rx.try_recv() {
                Ok(verdict) => {
                    if self.filter.admits(&verdict) {
                        return Some(verdict);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(dropped = n, "slow verdict subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catdams_core::types::{RecommendedAction, FUSION_VERSION};
    use chrono::Utc;

    fn verdict(session: &str, severity: Severity) -> Arc<Verdict> {
        Arc::new(Verdict {
            verdict_id: Verdict::new_id(),
            session_id: session.into(),
            seq: 1,
            severity,
            aggregate_score: 0.5,
            aggregate_confidence: 0.5,
            recommended_action: RecommendedAction::Monitor,
            outputs: Vec::new(),
            narrative: String::new(),
            synthesis_notes: Vec::new(),
            created_at: Utc::now(),
            fusion_version: FUSION_VERSION,
        })
    }

    #[tokio::test]
    async fn every_subscriber_sees_each_verdict_once() {
        let hub = VerdictHub::new();
        let mut a = hub.subscribe(StreamFilter::default());
        let mut b = hub.subscribe(StreamFilter::default());
        hub.publish(verdict("s1", Severity::Low));

        assert_eq!(a.next().await.unwrap().session_id.as_str(), "s1");
        assert_eq!(b.next().await.unwrap().session_id.as_str(), "s1");
        assert!(a.try_next().is_none());
    }

    #[tokio::test]
    async fn session_filter_drops_other_sessions() {
        let hub = VerdictHub::new();
        let mut stream = hub.subscribe(StreamFilter {
            session_id: Some("wanted".into()),
            min_severity: None,
        });
        hub.publish(verdict("other", Severity::Critical));
        hub.publish(verdict("wanted", Severity::Low));
        let got = stream.next().await.unwrap();
        assert_eq!(got.session_id.as_str(), "wanted");
    }

    #[tokio::test]
    async fn severity_filter_applies_a_floor() {
        let hub = VerdictHub::new();
        let mut stream = hub.subscribe(StreamFilter {
            session_id: None,
            min_severity: Some(Severity::High),
        });
        hub.publish(verdict("s", Severity::Medium));
        hub.publish(verdict("s", Severity::Critical));
        let got = stream.next().await.unwrap();
        assert_eq!(got.severity, Severity::Critical);
    }

    #[tokio::test]
    async fn slow_subscriber_loses_only_its_oldest() {
        let hub = VerdictHub::new();
        let mut slow = hub.subscribe(StreamFilter::default());
        for i in 0..(SUBSCRIBER_BUFFER + 8) {
            hub.publish(verdict(&format!("s{}", i), Severity::Low));
        }
        // first readable verdict is no longer s0 — the oldest were dropped
        let first = slow.try_next().unwrap();
        assert_ne!(first.session_id.as_str(), "s0");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let hub = VerdictHub::new();
        assert_eq!(hub.publish(verdict("s", Severity::Low)), 0);
    }
}
