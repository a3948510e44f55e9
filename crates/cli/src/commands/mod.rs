//! CLI command implementations.

pub mod chat;
pub mod onboard;
pub mod summarize;

use quillvault_config::AppConfig;
use quillvault_core::engine::InferenceEngine;
use quillvault_core::{FailureCode, RequestId};
use quillvault_engine::LocalEngine;
use quillvault_scheduler::Scheduler;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One settled request, ready for display.
pub type Settlement = (RequestId, Result<String, (FailureCode, String)>);

/// Load config (with an optional model override) and start the scheduler.
pub fn start_scheduler(
    model_override: Option<String>,
) -> Result<(Arc<Scheduler>, JoinHandle<()>), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(model) = model_override {
        config.model = model;
    }

    let engine: Arc<dyn InferenceEngine> = Arc::new(LocalEngine::new(&config.model));
    Ok(Scheduler::spawn(engine, &config))
}

/// Submit one request and bridge its settlement onto a channel.
pub fn submit_with_channel(
    scheduler: &Arc<Scheduler>,
    request_id: RequestId,
    payload: &str,
    tx: mpsc::UnboundedSender<Settlement>,
) {
    let tx2 = tx.clone();
    let id1 = request_id.clone();
    let id2 = request_id.clone();
    scheduler.submit(
        request_id,
        payload,
        Box::new(move |text| {
            let _ = tx.send((id1, Ok(text)));
        }),
        Box::new(move |code, msg| {
            let _ = tx2.send((id2, Err((code, msg))));
        }),
    );
}
