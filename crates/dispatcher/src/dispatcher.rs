//! Dispatcher - receipt issuance and worker coordination

use anyhow::Result;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, instrument, warn};

use crate::progress::ProgressTracker;
use scouter_common::{
    batch_size, Batch, JobRecord, JobStore, ProbeEngine, ProbeOutcome, ProbeRequest, ProbeType,
    Receipt, ScouterError,
};

/// Accepts batches, runs them in the background and publishes the results
/// into a [`JobStore`].
pub struct Dispatcher {
    executor: Executor,
    max_test_count: usize,
    submitted: AtomicU64,
}

/// The detached half: everything a background job needs.
#[derive(Clone)]
struct Executor {
    engine: Arc<dyn ProbeEngine>,
    store: Arc<dyn JobStore>,
    max_procs: usize,
}

impl Dispatcher {
    /// `max_test_count` caps probes per batch, `max_procs` caps parallel
    /// probes per batch.
    pub fn new(
        engine: Arc<dyn ProbeEngine>,
        store: Arc<dyn JobStore>,
        max_test_count: usize,
        max_procs: usize,
    ) -> Self {
        Self {
            executor: Executor {
                engine,
                store,
                max_procs: max_procs.max(1),
            },
            max_test_count,
            submitted: AtomicU64::new(0),
        }
    }

    pub fn jobs_submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn engine_name(&self) -> &str {
        self.executor.engine.name()
    }

    /// Accept a batch and return its receipt before any probe runs.
    pub async fn submit(&self, batch: Batch) -> Result<Receipt> {
        let (receipt, _job) = self.dispatch(batch).await?;
        Ok(receipt)
    }

    /// Like [`Dispatcher::submit`], also handing back the background job.
    pub async fn dispatch(&self, batch: Batch) -> Result<(Receipt, JoinHandle<()>)> {
        let total = batch_size(&batch);
        if total == 0 {
            return Err(ScouterError::validation("No tests were provided.").into());
        }
        if total > self.max_test_count {
            return Err(ScouterError::Capacity {
                max: self.max_test_count,
            }
            .into());
        }

        let receipt = Receipt::generate();
        let record = JobRecord::running(receipt.clone(), batch.keys().copied());
        self.executor.store.create(record.clone()).await?;
        self.submitted.fetch_add(1, Ordering::Relaxed);
        info!(receipt = %receipt, probes = total, "accepted batch");

        let requests = flatten(batch);
        let executor = self.executor.clone();
        let job = tokio::spawn(async move {
            let receipt = record.receipt.clone();
            if let Err(e) = executor.run(record, requests).await {
                warn!(receipt = %receipt, "failed to publish job results: {e:#}");
            }
        });
        Ok((receipt, job))
    }

    /// Current record for `receipt`, or [`ScouterError::NotFound`].
    pub async fn status(&self, receipt: &str) -> Result<JobRecord> {
        self.executor
            .store
            .get(receipt)
            .await?
            .ok_or_else(|| ScouterError::NotFound(receipt.to_string()).into())
    }

    /// Forget `receipt`. In-flight probes keep running; their results are
    /// dropped on completion.
    pub async fn delete(&self, receipt: &str) -> Result<bool> {
        let existed = self.executor.store.delete(receipt).await?;
        debug!(receipt, existed, "deleted receipt");
        Ok(existed)
    }
}

impl Executor {
    #[instrument(skip_all, fields(receipt = %record.receipt, probes = requests.len()))]
    async fn run(&self, record: JobRecord, requests: Vec<ProbeRequest>) -> Result<()> {
        let total = requests.len();
        let progress = Arc::new(ProgressTracker::new(total));
        let queue = Arc::new(Mutex::new(
            requests.into_iter().enumerate().collect::<VecDeque<_>>(),
        ));
        let slots: Arc<Mutex<Vec<Option<(ProbeType, ProbeOutcome)>>>> =
            Arc::new(Mutex::new(vec![None; total]));

        let mut workers = Vec::new();
        for _ in 0..total.min(self.max_procs) {
            let queue = Arc::clone(&queue);
            let slots = Arc::clone(&slots);
            let progress = Arc::clone(&progress);
            let engine = Arc::clone(&self.engine);

            workers.push(tokio::spawn(async move {
                loop {
                    let next = queue.lock().await.pop_front();
                    let Some((index, request)) = next else {
                        break;
                    };
                    let probe_type = request.probe_type;
                    let outcome = run_probe(Arc::clone(&engine), request).await;
                    progress.record(outcome.failed);
                    slots.lock().await[index] = Some((probe_type, outcome));
                }
            }));
        }
        for worker in workers {
            worker.await?;
        }

        let mut results: BTreeMap<ProbeType, Vec<ProbeOutcome>> = BTreeMap::new();
        for (probe_type, outcome) in slots.lock().await.drain(..).flatten() {
            results.entry(probe_type).or_default().push(outcome);
        }
        progress.log_summary(record.receipt.as_str());

        let receipt = record.receipt.clone();
        if !self.store.update(record.complete(results)).await? {
            debug!(receipt = %receipt, "receipt gone before completion, results dropped");
        }
        Ok(())
    }
}

/// One request per option object, grouped by type in batch order.
fn flatten(batch: Batch) -> Vec<ProbeRequest> {
    batch
        .into_iter()
        .flat_map(|(probe_type, options)| {
            options
                .into_iter()
                .map(move |raw| ProbeRequest::new(probe_type, raw))
        })
        .collect()
}

/// Run one probe on its own task so a panic is contained to its outcome.
async fn run_probe(engine: Arc<dyn ProbeEngine>, request: ProbeRequest) -> ProbeOutcome {
    let ProbeRequest {
        probe_type,
        id,
        options,
    } = request;
    let task = tokio::spawn(async move { engine.execute(probe_type, options).await });
    match task.await {
        Ok(Ok(payload)) => ProbeOutcome::completed(id, payload),
        Ok(Err(e)) => {
            debug!(probe = %probe_type, id = %id, "probe failed: {e}");
            ProbeOutcome::errored(id, e.to_string())
        }
        Err(e) => {
            let message = panic_message(e);
            warn!(probe = %probe_type, id = %id, "probe aborted: {message}");
            ProbeOutcome::errored(id, message)
        }
    }
}

fn panic_message(error: JoinError) -> String {
    match error.try_into_panic() {
        Ok(panic) => panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "Probe panicked.".to_string()),
        Err(error) => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use scouter_common::report::ProbePayload;
    use scouter_common::{PingReport, RawOptions, RttSummary, ScouterResult};
    use scouter_storage::MemoryJobStore;
    use serde_json::{json, Value};
    use std::collections::HashSet;
    use std::time::Duration;

    /// Echoes `dst` back as a ping report; `delay_ms`, `fail` and `panic`
    /// steer its behaviour.
    struct FakeEngine;

    #[async_trait]
    impl ProbeEngine for FakeEngine {
        async fn execute(
            &self,
            _probe_type: ProbeType,
            options: RawOptions,
        ) -> ScouterResult<ProbePayload> {
            if let Some(ms) = options.get("delay_ms").and_then(Value::as_u64) {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            if options.contains_key("panic") {
                panic!("probe exploded");
            }
            if options.contains_key("fail") {
                return Err(ScouterError::validation("bad option"));
            }
            let dst = options
                .get("dst")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(ProbePayload::Ping(PingReport {
                dst,
                sent: 1,
                recv: Some(1),
                payload_size: 56,
                packet_size: 84,
                loss: Some(0.0),
                rtt: RttSummary::from_samples(&[1.0]),
                replies: Vec::new(),
                comment: None,
                failed: false,
            }))
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    fn dispatcher(max_test_count: usize, max_procs: usize) -> Dispatcher {
        Dispatcher::new(
            Arc::new(FakeEngine),
            Arc::new(MemoryJobStore::new(Duration::from_secs(600))),
            max_test_count,
            max_procs,
        )
    }

    fn batch(value: Value) -> Batch {
        serde_json::from_value(value).unwrap()
    }

    fn dst(outcome: &ProbeOutcome) -> &str {
        match &outcome.result {
            ProbePayload::Ping(report) => &report.dst,
            _ => "",
        }
    }

    #[tokio::test]
    async fn outcomes_keep_submission_order() {
        let dispatcher = dispatcher(10, 4);
        let (receipt, job) = dispatcher
            .dispatch(batch(json!({
                "ping": [{"dst": "A", "delay_ms": 50}, {"dst": "B"}],
                "dns_lookup": [{"DST": "C"}]
            })))
            .await
            .unwrap();
        job.await.unwrap();

        let record = dispatcher.status(receipt.as_str()).await.unwrap();
        assert!(!record.is_running);
        let pings = &record.results[&ProbeType::Ping];
        assert_eq!(pings.iter().map(dst).collect::<Vec<_>>(), ["A", "B"]);
        assert_eq!(dst(&record.results[&ProbeType::DnsLookup][0]), "C");
        assert_eq!(record.outcome_count(), 3);
        assert_eq!(dispatcher.jobs_submitted(), 1);
    }

    #[tokio::test]
    async fn running_record_has_one_bucket_per_type() {
        let dispatcher = dispatcher(10, 1);
        let receipt = dispatcher
            .submit(batch(json!({
                "traceroute": [{"dst": "A", "delay_ms": 200}],
                "http_request": [{"dst": "B"}]
            })))
            .await
            .unwrap();

        let record = dispatcher.status(receipt.as_str()).await.unwrap();
        assert!(record.is_running);
        let keys: Vec<_> = record.results.keys().copied().collect();
        assert_eq!(keys, [ProbeType::Traceroute, ProbeType::HttpRequest]);
        assert!(record.results.values().all(Vec::is_empty));
    }

    #[tokio::test]
    async fn failures_and_panics_stay_in_their_outcome() {
        let dispatcher = dispatcher(10, 2);
        let (receipt, job) = dispatcher
            .dispatch(batch(json!({
                "ping": [
                    {"id": "boom", "panic": true},
                    {"id": 7, "fail": true},
                    {"id": "ok", "dst": "A"}
                ]
            })))
            .await
            .unwrap();
        job.await.unwrap();

        let record = dispatcher.status(receipt.as_str()).await.unwrap();
        let pings = &record.results[&ProbeType::Ping];
        assert_eq!(pings[0].id, "boom");
        assert!(pings[0].failed);
        assert_eq!(pings[0].message.as_deref(), Some("probe exploded"));
        assert_eq!(pings[1].id, "7");
        assert_eq!(pings[1].message.as_deref(), Some("bad option"));
        assert!(!pings[2].failed);
        assert!(pings[2].message.is_none());
    }

    #[tokio::test]
    async fn rejects_oversized_and_empty_batches() {
        let dispatcher = dispatcher(2, 2);
        let err = dispatcher
            .submit(batch(json!({"ping": [{}, {}], "traceroute": [{}]})))
            .await
            .unwrap_err();
        let err = err.downcast::<ScouterError>().unwrap();
        assert!(matches!(err, ScouterError::Capacity { max: 2 }));
        assert!(err.is_batch_error());

        let err = dispatcher.submit(batch(json!({"ping": []}))).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<ScouterError>(), Some(ScouterError::Validation(_))));
        assert_eq!(dispatcher.jobs_submitted(), 0);
    }

    #[tokio::test]
    async fn unknown_receipt_is_not_found() {
        let dispatcher = dispatcher(10, 2);
        let err = dispatcher.status("0123456789abcdef0123456789abcdef").await.unwrap_err();
        assert!(matches!(err.downcast_ref::<ScouterError>(), Some(ScouterError::NotFound(_))));
        assert!(!dispatcher.delete("0123456789abcdef0123456789abcdef").await.unwrap());
    }

    #[tokio::test]
    async fn delete_before_completion_is_not_resurrected() {
        let dispatcher = dispatcher(10, 2);
        let (receipt, job) = dispatcher
            .dispatch(batch(json!({"ping": [{"dst": "A", "delay_ms": 50}]})))
            .await
            .unwrap();
        assert!(dispatcher.delete(receipt.as_str()).await.unwrap());
        job.await.unwrap();

        assert!(dispatcher.status(receipt.as_str()).await.is_err());
        assert!(!dispatcher.delete(receipt.as_str()).await.unwrap());
    }

    #[tokio::test]
    async fn worker_count_is_bounded() {
        use std::sync::atomic::AtomicUsize;

        struct CountingEngine {
            active: AtomicUsize,
            peak: AtomicUsize,
        }

        #[async_trait]
        impl ProbeEngine for CountingEngine {
            async fn execute(&self, _: ProbeType, _: RawOptions) -> ScouterResult<ProbePayload> {
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                self.active.fetch_sub(1, Ordering::SeqCst);
                Ok(ProbePayload::Empty {})
            }

            fn name(&self) -> &str {
                "counting"
            }
        }

        let engine = Arc::new(CountingEngine {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let dispatcher = Dispatcher::new(
            engine.clone(),
            Arc::new(MemoryJobStore::new(Duration::from_secs(600))),
            50,
            3,
        );
        let (receipt, job) = dispatcher
            .dispatch(batch(json!({"ping": vec![json!({}); 12]})))
            .await
            .unwrap();
        job.await.unwrap();

        assert!(engine.peak.load(Ordering::SeqCst) <= 3);
        let record = dispatcher.status(receipt.as_str()).await.unwrap();
        assert_eq!(record.results[&ProbeType::Ping].len(), 12);
        assert!(record.results[&ProbeType::Ping].iter().all(|o| o.failed));
    }

    #[tokio::test]
    async fn receipts_are_unique() {
        let dispatcher = Arc::new(dispatcher(1, 1));
        let mut handles = Vec::new();
        for _ in 0..10_000 {
            let dispatcher = Arc::clone(&dispatcher);
            handles.push(tokio::spawn(async move {
                dispatcher
                    .submit(batch(json!({"ping": [{"dst": "A"}]})))
                    .await
                    .unwrap()
            }));
        }
        let mut seen = HashSet::new();
        for handle in handles {
            let receipt = handle.await.unwrap();
            assert_eq!(receipt.as_str().len(), 32);
            assert!(receipt.as_str().chars().all(|c| c.is_ascii_hexdigit()));
            seen.insert(receipt);
        }
        assert_eq!(seen.len(), 10_000);
    }

    #[tokio::test]
    async fn native_loopback_ping_completes() {
        use scouter_fabric::RawChannel;
        use scouter_probes::{NativeEngine, ProbeContext};

        if !RawChannel::is_available() {
            return;
        }
        let dispatcher = Dispatcher::new(
            Arc::new(NativeEngine::new(ProbeContext::new("/nonexistent.mmdb"))),
            Arc::new(MemoryJobStore::new(Duration::from_secs(600))),
            10,
            2,
        );
        let (receipt, job) = dispatcher
            .dispatch(batch(json!({"ping": [{"dst": "127.0.0.1", "count": 1}]})))
            .await
            .unwrap();
        job.await.unwrap();

        let record = dispatcher.status(receipt.as_str()).await.unwrap();
        assert!(!record.is_running);
        let pings = &record.results[&ProbeType::Ping];
        assert_eq!(pings.len(), 1);
        assert!(!pings[0].failed, "{:?}", pings[0].message);
        match &pings[0].result {
            ProbePayload::Ping(report) => {
                assert_eq!(report.recv, Some(1));
                assert!(report.rtt.min.is_some());
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
