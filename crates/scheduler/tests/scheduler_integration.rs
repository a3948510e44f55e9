//! End-to-end scheduler tests driven by a controllable mock engine.
//!
//! These exercise the ordering and liveness guarantees: preemption of a
//! running summary by an interactive chat, automatic resumption, explicit
//! cancellation, and mutual exclusion over the engine.

use async_trait::async_trait;
use quillvault_config::{AppConfig, SummarizerConfig};
use quillvault_core::engine::{InferenceEngine, SamplingProfile};
use quillvault_core::error::EngineError;
use quillvault_core::{FailureCode, RequestId};
use quillvault_scheduler::{FailureFn, Scheduler, SuccessFn};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// A mock engine with a configurable per-call delay and a cooperative stop
/// flag, mirroring the real engine's between-token polling.
struct SlowEngine {
    delay: Duration,
    stop: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl SlowEngine {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            stop: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl InferenceEngine for SlowEngine {
    fn name(&self) -> &str {
        "slow"
    }

    async fn complete(
        &self,
        prompt: &str,
        _profile: &SamplingProfile,
    ) -> Result<String, EngineError> {
        // A stop raised before this call belongs to a previous generation
        self.stop.store(false, Ordering::SeqCst);
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(prompt.to_string());
            calls.len()
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let step = Duration::from_millis(5);
        let mut waited = Duration::ZERO;
        let mut stopped = false;
        while waited < self.delay {
            if self.stop.load(Ordering::SeqCst) {
                stopped = true;
                break;
            }
            tokio::time::sleep(step).await;
            waited += step;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if stopped {
            Ok(String::new())
        } else {
            Ok(format!("Generated reply number {n}."))
        }
    }

    fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

type Settlement = (String, Result<String, (FailureCode, String)>);

fn callbacks(id: &str, tx: mpsc::UnboundedSender<Settlement>) -> (SuccessFn, FailureFn) {
    let id1 = id.to_string();
    let id2 = id.to_string();
    let tx2 = tx.clone();
    (
        Box::new(move |text| {
            let _ = tx.send((id1, Ok(text)));
        }),
        Box::new(move |code, msg| {
            let _ = tx2.send((id2, Err((code, msg))));
        }),
    )
}

fn test_config() -> AppConfig {
    AppConfig {
        summarizer: SummarizerConfig {
            input_ceiling: 24_000,
            // Small enough that the three-paragraph fixture splits into
            // three chunks
            chunk_target: 50,
            combine_threshold: 6,
            combine_group_size: 5,
        },
        ..AppConfig::default()
    }
}

/// Three paragraphs, each larger than half the chunk target.
fn summary_payload() -> String {
    let paragraphs: Vec<String> = (0..3).map(|i| format!("{} {i}", "lorem ipsum".repeat(4))).collect();
    format!("<<<SUMMARY_REQUEST>>>{}", paragraphs.join("\n\n"))
}

#[tokio::test(start_paused = true)]
async fn chat_preempts_running_summary_and_summary_resumes() {
    let engine = SlowEngine::new(Duration::from_millis(100));
    let (scheduler, worker) = Scheduler::spawn(engine.clone(), &test_config());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let (ok, err) = callbacks("S1", tx.clone());
    scheduler.submit(RequestId::from("S1"), &summary_payload(), ok, err);

    // Let the worker get into the first chunk call
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(engine.call_count(), 1);

    let (ok, err) = callbacks("C1", tx.clone());
    scheduler.submit(RequestId::from("C1"), "quick question", ok, err);

    // The chat settles first, while the summary's ledger entry stays open
    let (id, result) = rx.recv().await.unwrap();
    assert_eq!(id, "C1");
    assert!(result.is_ok());
    assert!(scheduler.ledger().is_pending(&RequestId::from("S1")));

    // With no further user prompt queued, the summary resumes on its own
    let (id, result) = rx.recv().await.unwrap();
    assert_eq!(id, "S1");
    assert!(result.is_ok(), "resumed summary should settle successfully: {result:?}");
    assert!(!scheduler.ledger().is_pending(&RequestId::from("S1")));

    // Never more than one generation at a time
    assert_eq!(engine.max_in_flight.load(Ordering::SeqCst), 1);
    worker.abort();
}

#[tokio::test(start_paused = true)]
async fn preempting_chat_settles_before_previously_queued_jobs() {
    let engine = SlowEngine::new(Duration::from_millis(100));
    let (scheduler, worker) = Scheduler::spawn(engine.clone(), &test_config());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let (ok, err) = callbacks("S1", tx.clone());
    scheduler.submit(RequestId::from("S1"), &summary_payload(), ok, err);
    tokio::time::sleep(Duration::from_millis(20)).await;

    // T1 is queued behind the running summary; C1 arrives after T1 but
    // jumps the queue entirely
    let (ok, err) = callbacks("T1", tx.clone());
    scheduler.submit(RequestId::from("T1"), "<<<TAG_REQUEST>>>doc body", ok, err);
    let (ok, err) = callbacks("C1", tx.clone());
    scheduler.submit(RequestId::from("C1"), "quick question", ok, err);

    let mut order = Vec::new();
    for _ in 0..3 {
        let (id, result) = rx.recv().await.unwrap();
        assert!(result.is_ok(), "{id} settled with {result:?}");
        order.push(id);
    }
    // The chat wins; the interrupted summary resumes at the front, ahead
    // of the tag job that was queued before the preemption
    assert_eq!(order, vec!["C1", "S1", "T1"]);
    worker.abort();
}

#[tokio::test(start_paused = true)]
async fn chat_arriving_behind_queued_summary_does_not_preempt() {
    let engine = SlowEngine::new(Duration::from_millis(50));
    let (scheduler, worker) = Scheduler::spawn(engine.clone(), &test_config());
    let (tx, mut rx) = mpsc::unbounded_channel();

    // A name job holds the engine; the summary is queued, not running
    let (ok, err) = callbacks("N1", tx.clone());
    scheduler.submit(RequestId::from("N1"), "<<<NAME_REQUEST>>>doc body", ok, err);
    tokio::time::sleep(Duration::from_millis(10)).await;

    let (ok, err) = callbacks("S1", tx.clone());
    scheduler.submit(RequestId::from("S1"), &summary_payload(), ok, err);
    let (ok, err) = callbacks("C1", tx.clone());
    scheduler.submit(RequestId::from("C1"), "question", ok, err);

    let mut order = Vec::new();
    for _ in 0..3 {
        let (id, _) = rx.recv().await.unwrap();
        order.push(id);
    }
    // No preemption occurred — plain FIFO
    assert_eq!(order, vec!["N1", "S1", "C1"]);
    worker.abort();
}

#[tokio::test(start_paused = true)]
async fn cancel_matches_only_the_running_chat() {
    let engine = SlowEngine::new(Duration::from_millis(200));
    let (scheduler, worker) = Scheduler::spawn(engine.clone(), &test_config());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let (ok, err) = callbacks("C1", tx.clone());
    scheduler.submit(RequestId::from("C1"), "long question", ok, err);
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Wrong id: rejected
    assert!(!scheduler.cancel(&RequestId::from("other")));
    // Right id while running: accepted
    assert!(scheduler.cancel(&RequestId::from("C1")));

    let (id, result) = rx.recv().await.unwrap();
    assert_eq!(id, "C1");
    let (code, _) = result.unwrap_err();
    assert_eq!(code, FailureCode::Cancelled);

    // A cancelled exchange never reaches the conversation
    assert_eq!(scheduler.conversation_len(), 0);
    // Nothing is running anymore, so the same cancel no longer matches
    assert!(!scheduler.cancel(&RequestId::from("C1")));
    worker.abort();
}

#[tokio::test(start_paused = true)]
async fn cancel_of_running_summary_is_rejected() {
    let engine = SlowEngine::new(Duration::from_millis(100));
    let (scheduler, worker) = Scheduler::spawn(engine.clone(), &test_config());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let (ok, err) = callbacks("S1", tx.clone());
    scheduler.submit(RequestId::from("S1"), &summary_payload(), ok, err);
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Cancel only ever matches the running chat job
    assert!(!scheduler.cancel(&RequestId::from("S1")));

    let (id, result) = rx.recv().await.unwrap();
    assert_eq!(id, "S1");
    assert!(result.is_ok());
    worker.abort();
}

#[tokio::test(start_paused = true)]
async fn second_preemption_overwrites_resume_slot() {
    let engine = SlowEngine::new(Duration::from_millis(100));
    let (scheduler, worker) = Scheduler::spawn(engine.clone(), &test_config());
    let (tx, mut rx) = mpsc::unbounded_channel();

    // First summary, preempted by a chat
    let (ok, err) = callbacks("S1", tx.clone());
    scheduler.submit(RequestId::from("S1"), &summary_payload(), ok, err);
    tokio::time::sleep(Duration::from_millis(20)).await;
    let (ok, err) = callbacks("C1", tx.clone());
    scheduler.submit(RequestId::from("C1"), "first question", ok, err);

    // C1 settles, S1 resumes
    let (id, _) = rx.recv().await.unwrap();
    assert_eq!(id, "C1");

    // While S1 runs again, preempt once more
    tokio::time::sleep(Duration::from_millis(20)).await;
    let (ok, err) = callbacks("C2", tx.clone());
    scheduler.submit(RequestId::from("C2"), "second question", ok, err);

    let (id, _) = rx.recv().await.unwrap();
    assert_eq!(id, "C2");

    // S1 resumes a second time and finally settles
    let (id, result) = rx.recv().await.unwrap();
    assert_eq!(id, "S1");
    assert!(result.is_ok());
    worker.abort();
}

#[tokio::test(start_paused = true)]
async fn conversation_grows_only_from_chat_jobs() {
    let engine = SlowEngine::new(Duration::from_millis(10));
    let (scheduler, worker) = Scheduler::spawn(engine.clone(), &test_config());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let (ok, err) = callbacks("C1", tx.clone());
    scheduler.submit(RequestId::from("C1"), "hello", ok, err);
    let (ok, err) = callbacks("N1", tx.clone());
    scheduler.submit(RequestId::from("N1"), "<<<NAME_REQUEST>>>doc", ok, err);
    let (ok, err) = callbacks("C2", tx.clone());
    scheduler.submit(RequestId::from("C2"), "follow-up", ok, err);

    for _ in 0..3 {
        let (_, result) = rx.recv().await.unwrap();
        assert!(result.is_ok());
    }
    // Two chat turns, four messages; the name job added nothing
    assert_eq!(scheduler.conversation_len(), 4);
    worker.abort();
}
