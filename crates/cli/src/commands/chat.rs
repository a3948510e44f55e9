//! `quillvault chat` — interactive session against the local model.
//!
//! Plain lines are chat turns. Slash commands wrap the rest of the line in
//! the matching protocol marker, so the whole scheduler path — classifier
//! included — is exercised exactly as the vault UI would drive it.

use quillvault_core::RequestId;
use quillvault_scheduler::classify;
use tokio::sync::mpsc;

use super::{Settlement, start_scheduler, submit_with_channel};

const HELP: &str = "\
Commands:
  /summary <text>   Summarize the given text
  /name <text>      Suggest a title for the given text
  /tag <text>       Suggest tags for the given text
  /reset            Clear the conversation context
  /help             Show this help
  /quit             Exit";

pub async fn run(
    model_override: Option<String>,
    detailed: bool,
    no_history: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (scheduler, worker) = start_scheduler(model_override)?;
    let (tx, mut rx) = mpsc::unbounded_channel::<Settlement>();

    println!("quillvault — chat with your vault (/help for commands)");

    let mut next_id: u64 = 0;
    loop {
        let Some(line) = read_line().await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        let payload = match line.split_once(' ') {
            _ if line == "/quit" || line == "/exit" => break,
            _ if line == "/help" => {
                println!("{HELP}");
                continue;
            }
            _ if line == "/reset" => {
                scheduler.reset_context();
                println!("(context cleared)");
                continue;
            }
            Some(("/summary", rest)) => format!("{}{rest}", classify::SUMMARY_MARKER),
            Some(("/name", rest)) => format!("{}{rest}", classify::NAME_MARKER),
            Some(("/tag", rest)) => format!("{}{rest}", classify::TAG_MARKER),
            _ => {
                let mut payload = String::new();
                if no_history {
                    payload.push_str(classify::NO_HISTORY_MARKER);
                }
                if detailed {
                    payload.push_str(classify::DETAILED_MARKER);
                }
                payload.push_str(&line);
                payload
            }
        };

        next_id += 1;
        let request_id = RequestId::from(&format!("cli-{next_id}"));
        submit_with_channel(&scheduler, request_id, &payload, tx.clone());

        match rx.recv().await {
            Some((_, Ok(text))) => println!("{text}"),
            Some((_, Err((code, msg)))) => eprintln!("[{code}] {msg}"),
            None => break,
        }
    }

    worker.abort();
    Ok(())
}

/// Read one line from stdin without blocking the runtime.
async fn read_line() -> Result<Option<String>, Box<dyn std::error::Error>> {
    print_prompt();
    let line = tokio::task::spawn_blocking(|| {
        let mut buf = String::new();
        match std::io::stdin().read_line(&mut buf) {
            Ok(0) => Ok(None), // EOF
            Ok(_) => Ok(Some(buf)),
            Err(e) => Err(e),
        }
    })
    .await??;
    Ok(line)
}

fn print_prompt() {
    use std::io::Write;
    print!("> ");
    let _ = std::io::stdout().flush();
}
