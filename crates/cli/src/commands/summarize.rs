//! `quillvault summarize` — summarize a document from disk.

use quillvault_core::RequestId;
use quillvault_scheduler::classify;
use std::path::Path;
use tokio::sync::mpsc;

use super::{Settlement, start_scheduler, submit_with_channel};

pub async fn run(
    model_override: Option<String>,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;

    let (scheduler, worker) = start_scheduler(model_override)?;
    let (tx, mut rx) = mpsc::unbounded_channel::<Settlement>();

    let payload = format!("{}{text}", classify::SUMMARY_MARKER);
    submit_with_channel(&scheduler, RequestId::generate(), &payload, tx);

    let result = rx.recv().await;
    worker.abort();

    match result {
        Some((_, Ok(summary))) => {
            println!("{summary}");
            Ok(())
        }
        Some((_, Err((code, msg)))) => Err(format!("[{code}] {msg}").into()),
        None => Err("scheduler shut down before settling the request".into()),
    }
}
