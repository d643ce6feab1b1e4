//! Interactive stdin loop: one session from start to export.

use std::io::{self, BufRead, Write};

use anyhow::Result;

use atelier_runtime::Runtime;

pub async fn run(
    runtime: &Runtime,
    mode: &str,
    participant: &str,
    skill: &str,
    brief: &str,
) -> Result<()> {
    let session_id = runtime.start_session(mode, participant, skill, brief)?;
    println!("session {session_id} started ({mode})");
    println!("type your message; /end finishes the session and writes exports\n");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("you> ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "/end" {
            break;
        }

        match runtime.submit_turn(session_id, trimmed, &[]).await {
            Ok(outcome) => {
                println!("\n{}\n", outcome.assistant_text);
                println!(
                    "  [route={} phase={} step={} effectiveness={:.2}]\n",
                    outcome.route.as_str(),
                    outcome.phase.current.as_str(),
                    outcome.phase.step,
                    outcome.metrics.effectiveness,
                );
                if outcome.session_closed {
                    println!("session reached its time limit.");
                    break;
                }
            }
            Err(err) => {
                eprintln!("turn failed ({}): {err}", err.code());
                if err.code() == "SESSION_NOT_FOUND" {
                    return Ok(());
                }
            }
        }
    }

    let manifest = runtime.end_session(session_id).await?;
    println!("session ended; exports written:");
    println!("  {}", manifest.interactions.display());
    println!("  {}", manifest.moves.display());
    println!("  {}", manifest.linkography.display());
    println!("  {}", manifest.metrics.display());
    println!("  {}", manifest.session.display());
    Ok(())
}
