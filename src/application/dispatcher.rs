//! Batch accumulation and dispatch through the sync relay.
//!
//! Records accumulate in an in-memory ordered buffer; a full buffer is
//! flushed as one batch. Flushes run as spawned tasks so a slow relay call
//! never blocks the extraction loop; outstanding flushes are awaited when
//! the dispatcher finishes. A failed batch is logged and dropped, never
//! requeued, and never aborts the run.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::record::HarvestRecord;
use crate::infrastructure::relay::{OutgoingRecord, RelayRequest, SyncRelay};

/// Final accounting for one run's dispatches. `delivered` lags `pushed`
/// while flushes are in flight; it is exact only after `finish`.
#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    pub pushed: u64,
    pub delivered: u64,
    pub delivered_batches: u64,
    pub dropped_batches: u64,
}

pub struct BatchDispatcher {
    relay: Arc<dyn SyncRelay>,
    batch_size: usize,
    buffer: Vec<HarvestRecord>,
    credential: String,
    identity_claim: Option<String>,
    endpoint_url: String,
    pushed: u64,
    delivered: Arc<AtomicU64>,
    delivered_batches: Arc<AtomicU64>,
    dropped_batches: Arc<AtomicU64>,
    /// Tail of the flush chain. Each flush awaits its predecessor, so
    /// batches reach the relay in the order their buffers filled while still
    /// overlapping with extraction.
    in_flight: Option<JoinHandle<()>>,
}

impl BatchDispatcher {
    pub fn new(
        relay: Arc<dyn SyncRelay>,
        batch_size: usize,
        credential: String,
        identity_claim: Option<String>,
        endpoint_url: String,
    ) -> Self {
        Self {
            relay,
            batch_size: batch_size.max(1),
            buffer: Vec::new(),
            credential,
            identity_claim,
            endpoint_url,
            pushed: 0,
            delivered: Arc::new(AtomicU64::new(0)),
            delivered_batches: Arc::new(AtomicU64::new(0)),
            dropped_batches: Arc::new(AtomicU64::new(0)),
            in_flight: None,
        }
    }

    /// Switches from the fast-path size used for the immediate pass to the
    /// regular batch size.
    pub fn set_batch_size(&mut self, batch_size: usize) {
        self.batch_size = batch_size.max(1);
    }

    /// Takes ownership of one record. A full buffer flushes before the next
    /// push lands in a fresh one.
    pub fn push(&mut self, record: HarvestRecord) {
        self.buffer.push(record);
        self.pushed += 1;
        if self.buffer.len() >= self.batch_size {
            self.flush();
        }
    }

    /// Hands the current buffer to the relay as one batch. Non-blocking; the
    /// relay round-trip runs concurrently with further extraction.
    pub fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        let batch = std::mem::take(&mut self.buffer);
        let owner_id = self.identity_claim.clone();
        let request = RelayRequest {
            records: batch
                .into_iter()
                .map(|record| OutgoingRecord {
                    record,
                    owner_id: owner_id.clone(),
                })
                .collect(),
            credential: self.credential.clone(),
            identity_claim: self.identity_claim.clone(),
            endpoint_url: self.endpoint_url.clone(),
        };

        let relay = Arc::clone(&self.relay);
        let delivered = Arc::clone(&self.delivered);
        let delivered_batches = Arc::clone(&self.delivered_batches);
        let dropped_batches = Arc::clone(&self.dropped_batches);
        let predecessor = self.in_flight.take();

        self.in_flight = Some(tokio::spawn(async move {
            if let Some(previous) = predecessor {
                if let Err(err) = previous.await {
                    warn!(error = %err, "flush task failed");
                }
            }
            let size = request.records.len() as u64;
            let response = relay.forward(request).await;
            if response.success {
                delivered.fetch_add(size, Ordering::SeqCst);
                delivered_batches.fetch_add(1, Ordering::SeqCst);
                debug!(records = size, "batch delivered");
            } else {
                // Dropped, not retried: forward progress over completeness.
                dropped_batches.fetch_add(1, Ordering::SeqCst);
                warn!(
                    records = size,
                    error = response.error.as_deref().unwrap_or("unknown"),
                    "batch dropped after relay failure"
                );
            }
        }));
    }

    /// Eventually-consistent count of records confirmed delivered.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }

    /// Flushes the remainder and waits for every in-flight relay call.
    pub async fn finish(mut self) -> DispatchStats {
        self.flush();
        if let Some(tail) = self.in_flight.take() {
            if let Err(err) = tail.await {
                warn!(error = %err, "flush task failed");
            }
        }
        DispatchStats {
            pushed: self.pushed,
            delivered: self.delivered.load(Ordering::SeqCst),
            delivered_batches: self.delivered_batches.load(Ordering::SeqCst),
            dropped_batches: self.dropped_batches.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::infrastructure::relay::RelayResponse;

    #[derive(Default)]
    struct RecordingRelay {
        batch_sizes: Mutex<Vec<usize>>,
        fail_calls: Vec<usize>,
    }

    impl RecordingRelay {
        fn failing_on(calls: Vec<usize>) -> Self {
            Self {
                fail_calls: calls,
                ..Default::default()
            }
        }

        fn batch_sizes(&self) -> Vec<usize> {
            self.batch_sizes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SyncRelay for RecordingRelay {
        async fn forward(&self, request: RelayRequest) -> RelayResponse {
            let mut sizes = self.batch_sizes.lock().unwrap();
            let call_index = sizes.len();
            sizes.push(request.records.len());
            if self.fail_calls.contains(&call_index) {
                RelayResponse::failure("injected failure")
            } else {
                RelayResponse::ok(None)
            }
        }
    }

    fn record(name: &str) -> HarvestRecord {
        HarvestRecord {
            first_name: name.to_string(),
            ..Default::default()
        }
    }

    fn dispatcher(relay: Arc<RecordingRelay>, batch_size: usize) -> BatchDispatcher {
        BatchDispatcher::new(
            relay,
            batch_size,
            "tok-1".to_string(),
            Some("member:42".to_string()),
            "https://example.test/api".to_string(),
        )
    }

    #[tokio::test]
    async fn full_buffer_flushes_exactly_once_into_fresh_buffer() {
        let relay = Arc::new(RecordingRelay::default());
        let mut dispatcher = dispatcher(Arc::clone(&relay), 3);

        for i in 0..3 {
            dispatcher.push(record(&format!("r{i}")));
        }
        // The next push lands in a fresh, empty buffer.
        dispatcher.push(record("r3"));

        let stats = dispatcher.finish().await;
        assert_eq!(relay.batch_sizes(), vec![3, 1]);
        assert_eq!(stats.pushed, 4);
        assert_eq!(stats.delivered, 4);
        assert_eq!(stats.delivered_batches, 2);
    }

    #[tokio::test]
    async fn remainder_flushes_on_finish() {
        let relay = Arc::new(RecordingRelay::default());
        let mut dispatcher = dispatcher(Arc::clone(&relay), 10);

        dispatcher.push(record("a"));
        dispatcher.push(record("b"));

        let stats = dispatcher.finish().await;
        assert_eq!(relay.batch_sizes(), vec![2]);
        assert_eq!(stats.delivered, 2);
    }

    #[tokio::test]
    async fn failed_batch_is_dropped_without_blocking_later_batches() {
        let relay = Arc::new(RecordingRelay::failing_on(vec![0]));
        let mut dispatcher = dispatcher(Arc::clone(&relay), 2);

        for i in 0..4 {
            dispatcher.push(record(&format!("r{i}")));
        }

        let stats = dispatcher.finish().await;
        assert_eq!(relay.batch_sizes(), vec![2, 2]);
        assert_eq!(stats.dropped_batches, 1);
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.delivered_batches, 1);
    }

    #[tokio::test]
    async fn records_carry_identity_claim_annotation() {
        struct AssertingRelay;

        #[async_trait]
        impl SyncRelay for AssertingRelay {
            async fn forward(&self, request: RelayRequest) -> RelayResponse {
                assert!(
                    request
                        .records
                        .iter()
                        .all(|r| r.owner_id.as_deref() == Some("member:42"))
                );
                assert_eq!(request.identity_claim.as_deref(), Some("member:42"));
                RelayResponse::ok(None)
            }
        }

        let mut dispatcher = BatchDispatcher::new(
            Arc::new(AssertingRelay),
            1,
            "tok-1".to_string(),
            Some("member:42".to_string()),
            "https://example.test/api".to_string(),
        );
        dispatcher.push(record("a"));
        let stats = dispatcher.finish().await;
        assert_eq!(stats.delivered, 1);
    }

    #[tokio::test]
    async fn empty_finish_sends_nothing() {
        let relay = Arc::new(RecordingRelay::default());
        let stats = dispatcher(Arc::clone(&relay), 5).finish().await;
        assert!(relay.batch_sizes().is_empty());
        assert_eq!(stats.pushed, 0);
    }
}
