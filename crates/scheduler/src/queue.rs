//! The scheduler — a single-worker queue over the shared model context.
//!
//! One worker task drains a FIFO queue one job at a time; while it drains,
//! no second job may run. Interactive chat jobs preempt a running summary:
//! the summary is aborted cooperatively, remembered in a single resume
//! slot, and requeued once the interaction quiets down.
//!
//! All queue mutation, preemption bookkeeping, and conversation state live
//! behind one lock; the caller-facing `submit` never blocks on inference —
//! settlement arrives later through the ledger's callbacks.

use quillvault_config::{AppConfig, SchedulerConfig};
use quillvault_core::engine::InferenceEngine;
use quillvault_core::{
    ConversationContext, Error, FailureCode, Job, JobKind, JobState, RequestId, ScheduleError,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::classify::classify;
use crate::ledger::{FailureFn, RequestLedger, SuccessFn};
use crate::summarize::{Outcome, Summarizer};
use crate::{prompt, sanitize};

/// The job currently holding the model context.
struct RunningJob {
    request_id: RequestId,
    kind: JobKind,
    raw_payload: String,
}

/// An interrupted summary remembered for later resumption. Single slot: a
/// second preemption overwrites rather than queues.
#[derive(Debug, Clone)]
struct PendingResume {
    request_id: RequestId,
    raw_payload: String,
}

struct SchedulerState {
    queue: VecDeque<Job>,
    running: Option<RunningJob>,
    pending_resume: Option<PendingResume>,
    cancel_requested: Option<RequestId>,
    conversation: ConversationContext,
}

enum JobOutcome {
    Completed(String),
    Aborted,
}

/// The inference request scheduler.
///
/// Entry points are `submit`, `cancel`, and `reset_context`; everything
/// else happens on the worker task.
pub struct Scheduler {
    state: Mutex<SchedulerState>,
    notify: Notify,
    /// Abort flag observed by the chunked summarizer between model calls.
    abort: AtomicBool,
    engine: Arc<dyn InferenceEngine>,
    ledger: Arc<RequestLedger>,
    summarizer: Summarizer,
    timeouts: SchedulerConfig,
}

impl Scheduler {
    /// Create the scheduler and start its worker task.
    pub fn spawn(engine: Arc<dyn InferenceEngine>, config: &AppConfig) -> (Arc<Self>, JoinHandle<()>) {
        let scheduler = Arc::new(Self {
            state: Mutex::new(SchedulerState {
                queue: VecDeque::new(),
                running: None,
                pending_resume: None,
                cancel_requested: None,
                conversation: ConversationContext::new(),
            }),
            notify: Notify::new(),
            abort: AtomicBool::new(false),
            ledger: RequestLedger::new(),
            summarizer: Summarizer::new(engine.clone(), config.summarizer.clone()),
            engine,
            timeouts: config.scheduler.clone(),
        });

        let worker = tokio::spawn(scheduler.clone().worker_loop());
        (scheduler, worker)
    }

    /// The request ledger backing this scheduler.
    pub fn ledger(&self) -> Arc<RequestLedger> {
        self.ledger.clone()
    }

    /// Number of jobs waiting in the queue (not counting the running one).
    pub fn queue_depth(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    /// Number of turns in the conversation context.
    pub fn conversation_len(&self) -> usize {
        self.state.lock().unwrap().conversation.len()
    }

    /// Replace the conversation context wholesale.
    pub fn reset_context(&self) {
        info!("Conversation context reset");
        self.state.lock().unwrap().conversation.reset();
    }

    /// Submit a request. Fire-and-forget: the caller gets exactly one of
    /// `on_success(text)` or `on_failure(code, message)` later, via the
    /// ledger — including when the input is rejected up front.
    pub fn submit(
        self: &Arc<Self>,
        request_id: RequestId,
        raw_payload: &str,
        on_success: SuccessFn,
        on_failure: FailureFn,
    ) {
        let classified = classify(raw_payload);
        let timeout = match classified.kind {
            JobKind::Summary => Duration::from_secs(self.timeouts.summary_timeout_secs),
            _ => Duration::from_secs(self.timeouts.chat_timeout_secs),
        };
        self.ledger
            .submit(request_id.clone(), on_success, on_failure, timeout);

        if classified.content.trim().is_empty() {
            debug!(request_id = %request_id, "Rejecting empty input before enqueue");
            self.ledger.fail(
                &request_id,
                FailureCode::EmptyInput,
                ScheduleError::EmptyInput(request_id.to_string()).to_string(),
            );
            return;
        }

        let job = Job::new(
            request_id,
            classified.kind,
            raw_payload,
            classified.content,
            classified.flags,
        );

        let mut state = self.state.lock().unwrap();

        // Priority preemption: an interactive chat interrupts a running
        // summary and jumps the queue entirely. Name/Tag never preempt.
        let preempted = match &state.running {
            Some(r) if job.kind == JobKind::Chat && r.kind == JobKind::Summary => {
                Some(PendingResume {
                    request_id: r.request_id.clone(),
                    raw_payload: r.raw_payload.clone(),
                })
            }
            _ => None,
        };

        if let Some(pending) = preempted {
            info!(
                chat = %job.request_id,
                summary = %pending.request_id,
                "Chat preempts running summary"
            );
            state.pending_resume = Some(pending);
            self.abort.store(true, Ordering::SeqCst);
            self.engine.request_stop();
            state.queue.push_front(job);
        } else {
            debug!(request_id = %job.request_id, kind = ?job.kind, "Job enqueued");
            state.queue.push_back(job);
        }

        drop(state);
        self.notify.notify_one();
    }

    /// Cancel a request. Accepted only while `request_id` is the currently
    /// running chat job; returns whether the cancel matched.
    pub fn cancel(&self, request_id: &RequestId) -> bool {
        let mut state = self.state.lock().unwrap();
        match &state.running {
            Some(r) if r.kind == JobKind::Chat && &r.request_id == request_id => {
                info!(request_id = %request_id, "Cancelling running chat job");
                state.cancel_requested = Some(request_id.clone());
                self.engine.request_stop();
                true
            }
            _ => false,
        }
    }

    // ── Worker ─────────────────────────────────────────────────────────

    async fn worker_loop(self: Arc<Self>) {
        loop {
            let job = { self.state.lock().unwrap().queue.pop_front() };
            match job {
                Some(mut job) => self.run_job(&mut job).await,
                None => self.notify.notified().await,
            }
        }
    }

    async fn run_job(&self, job: &mut Job) {
        job.state = JobState::Running;
        {
            let mut state = self.state.lock().unwrap();
            if job.kind == JobKind::Summary {
                // A stale abort from an earlier preemption must not kill
                // this run.
                self.abort.store(false, Ordering::SeqCst);
            }
            state.running = Some(RunningJob {
                request_id: job.request_id.clone(),
                kind: job.kind,
                raw_payload: job.raw_payload.clone(),
            });
        }
        info!(request_id = %job.request_id, kind = ?job.kind, "Job started");

        let outcome = self.process(job).await;

        let cancelled = {
            let mut state = self.state.lock().unwrap();
            state.running = None;
            state
                .cancel_requested
                .take()
                .is_some_and(|id| id == job.request_id)
        };

        match outcome {
            _ if cancelled => {
                job.state = JobState::Aborted;
                info!(request_id = %job.request_id, "Chat job dropped after cancel");
                self.ledger.fail(
                    &job.request_id,
                    FailureCode::Cancelled,
                    ScheduleError::Cancelled(job.request_id.to_string()).to_string(),
                );
            }
            Ok(JobOutcome::Completed(text)) => {
                job.state = JobState::Completed;
                if job.kind == JobKind::Chat {
                    self.state
                        .lock()
                        .unwrap()
                        .conversation
                        .push_turn(&job.content, &text);
                }
                info!(request_id = %job.request_id, chars = text.len(), "Job completed");
                self.ledger.settle(&job.request_id, text);
            }
            Ok(JobOutcome::Aborted) => {
                // Preempted summary: its ledger entry stays open for the
                // resumed attempt (or its timeout).
                job.state = JobState::Aborted;
                info!(request_id = %job.request_id, "Summary aborted for preemption");
            }
            Err(err) => {
                job.state = JobState::Failed;
                let code = match &err {
                    Error::Engine(_) => FailureCode::GenerationError,
                    _ => FailureCode::QueueError,
                };
                warn!(request_id = %job.request_id, error = %err, code = %code, "Job failed");
                self.ledger.fail(&job.request_id, code, err.to_string());
            }
        }

        // A finished chat is the moment a preempted summary may resume.
        if job.kind == JobKind::Chat {
            self.maybe_resume_pending();
        }
    }

    async fn process(&self, job: &Job) -> Result<JobOutcome, Error> {
        if job.kind == JobKind::Summary {
            return match self.summarizer.run(&job.content, &self.abort).await? {
                Outcome::Done(text) => Ok(JobOutcome::Completed(text)),
                Outcome::Aborted => Ok(JobOutcome::Aborted),
            };
        }

        let (prompt_text, profile) = {
            let state = self.state.lock().unwrap();
            (
                prompt::assemble(job, &state.conversation),
                prompt::profile_for(job.kind, job.flags.detail),
            )
        };

        let raw = self.engine.complete(&prompt_text, &profile).await?;
        let cleaned = sanitize::clean(job.kind, &raw);

        let repaired = if sanitize::needs_truncation_repair(job.kind) {
            let continuation = prompt::continuation_profile(job.kind, job.flags.detail);
            sanitize::repair_truncation(self.engine.as_ref(), &prompt_text, cleaned, &continuation)
                .await
        } else {
            cleaned
        };

        Ok(JobOutcome::Completed(sanitize::finish(job.kind, &repaired)))
    }

    /// Resume the preempted summary if no further user prompt is waiting.
    ///
    /// The check runs once, here; a chat arriving a moment later queues
    /// behind the resumed summary and preempts it again on arrival.
    fn maybe_resume_pending(&self) {
        let mut state = self.state.lock().unwrap();
        if state.pending_resume.is_none() {
            return;
        }
        if state.queue.iter().any(|j| j.kind.is_user_prompt()) {
            debug!("User prompt still queued; summary resume deferred");
            return;
        }
        if let Some(pending) = state.pending_resume.take() {
            let classified = classify(&pending.raw_payload);
            info!(request_id = %pending.request_id, "Resuming preempted summary");
            let job = Job::new(
                pending.request_id,
                classified.kind,
                pending.raw_payload.clone(),
                classified.content,
                classified.flags,
            );
            state.queue.push_front(job);
            drop(state);
            self.notify.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use quillvault_core::SamplingProfile;
    use quillvault_core::error::EngineError;
    use tokio::sync::mpsc;

    /// Echo engine: replies instantly with a fixed transform of nothing.
    struct EchoEngine;

    #[async_trait]
    impl InferenceEngine for EchoEngine {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(
            &self,
            _prompt: &str,
            _profile: &SamplingProfile,
        ) -> Result<String, EngineError> {
            Ok("A fine reply.".to_string())
        }

        fn request_stop(&self) {}
    }

    /// Engine that always errors.
    struct FailingEngine;

    #[async_trait]
    impl InferenceEngine for FailingEngine {
        fn name(&self) -> &str {
            "failing"
        }

        async fn complete(
            &self,
            _prompt: &str,
            _profile: &SamplingProfile,
        ) -> Result<String, EngineError> {
            Err(EngineError::Generation("out of memory".into()))
        }

        fn request_stop(&self) {}
    }

    type Settlement = (String, Result<String, (FailureCode, String)>);

    fn callbacks(
        id: &str,
        tx: mpsc::UnboundedSender<Settlement>,
    ) -> (SuccessFn, FailureFn) {
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

    #[tokio::test]
    async fn empty_input_rejected_before_enqueue() {
        let (scheduler, worker) = Scheduler::spawn(Arc::new(EchoEngine), &AppConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let (ok, err) = callbacks("e1", tx);
        scheduler.submit(RequestId::from("e1"), "   ", ok, err);

        let (id, result) = rx.recv().await.unwrap();
        assert_eq!(id, "e1");
        let (code, _) = result.unwrap_err();
        assert_eq!(code, FailureCode::EmptyInput);
        assert_eq!(scheduler.queue_depth(), 0);
        worker.abort();
    }

    #[tokio::test]
    async fn empty_after_markers_rejected() {
        let (scheduler, worker) = Scheduler::spawn(Arc::new(EchoEngine), &AppConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let (ok, err) = callbacks("e2", tx);
        scheduler.submit(RequestId::from("e2"), "<<<SUMMARY_REQUEST>>>  ", ok, err);

        let (_, result) = rx.recv().await.unwrap();
        assert_eq!(result.unwrap_err().0, FailureCode::EmptyInput);
        worker.abort();
    }

    #[tokio::test]
    async fn chat_completion_updates_conversation() {
        let (scheduler, worker) = Scheduler::spawn(Arc::new(EchoEngine), &AppConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let (ok, err) = callbacks("c1", tx);
        scheduler.submit(RequestId::from("c1"), "Hello there", ok, err);

        let (_, result) = rx.recv().await.unwrap();
        assert_eq!(result.unwrap(), "A fine reply.");
        assert_eq!(scheduler.conversation_len(), 2);

        scheduler.reset_context();
        assert_eq!(scheduler.conversation_len(), 0);
        worker.abort();
    }

    #[tokio::test]
    async fn background_jobs_leave_conversation_untouched() {
        let (scheduler, worker) = Scheduler::spawn(Arc::new(EchoEngine), &AppConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let (ok, err) = callbacks("n1", tx.clone());
        scheduler.submit(RequestId::from("n1"), "<<<NAME_REQUEST>>>doc text", ok, err);
        let (_, result) = rx.recv().await.unwrap();
        assert_eq!(result.unwrap(), "A fine reply");

        let (ok, err) = callbacks("t1", tx);
        scheduler.submit(RequestId::from("t1"), "<<<TAG_REQUEST>>>doc text", ok, err);
        let (_, result) = rx.recv().await.unwrap();
        assert_eq!(result.unwrap(), "a fine reply");

        assert_eq!(scheduler.conversation_len(), 0);
        worker.abort();
    }

    #[tokio::test]
    async fn engine_failure_settles_with_generation_error() {
        let (scheduler, worker) = Scheduler::spawn(Arc::new(FailingEngine), &AppConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let (ok, err) = callbacks("f1", tx.clone());
        scheduler.submit(RequestId::from("f1"), "will fail", ok, err);
        let (_, result) = rx.recv().await.unwrap();
        let (code, msg) = result.unwrap_err();
        assert_eq!(code, FailureCode::GenerationError);
        assert!(msg.contains("out of memory"));

        // The worker survives a failed job and keeps processing
        let (ok, err) = callbacks("f2", tx);
        scheduler.submit(RequestId::from("f2"), "also fails", ok, err);
        let (id, result) = rx.recv().await.unwrap();
        assert_eq!(id, "f2");
        assert!(result.is_err());
        worker.abort();
    }

    #[tokio::test]
    async fn cancel_without_running_chat_is_rejected() {
        let (scheduler, worker) = Scheduler::spawn(Arc::new(EchoEngine), &AppConfig::default());
        assert!(!scheduler.cancel(&RequestId::from("nobody")));
        worker.abort();
    }

    #[tokio::test]
    async fn jobs_settle_in_fifo_order() {
        let (scheduler, worker) = Scheduler::spawn(Arc::new(EchoEngine), &AppConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        for id in ["q1", "q2", "q3"] {
            let (ok, err) = callbacks(id, tx.clone());
            scheduler.submit(RequestId::from(id), &format!("prompt {id}"), ok, err);
        }

        let mut order = Vec::new();
        for _ in 0..3 {
            let (id, result) = rx.recv().await.unwrap();
            assert!(result.is_ok());
            order.push(id);
        }
        assert_eq!(order, vec!["q1", "q2", "q3"]);
        worker.abort();
    }
}
