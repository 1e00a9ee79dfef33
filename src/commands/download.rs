//! Download command handler

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use modeldepot::{DownloadState, DownloadStatus, ModelDepot};

use crate::utils::{format_bytes, format_eta, format_speed};

pub async fn run_download(depot: &ModelDepot, model_id: &str) -> Result<()> {
    let mut rx = depot.download(model_id).await?;

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} {prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
        )?
        .progress_chars("=> "),
    );
    bar.set_prefix(model_id.to_string());

    let mut cancel_requested = false;
    let state = loop {
        let state = rx.borrow_and_update().clone();
        render(&bar, &state);
        if state.status.is_terminal() {
            break state;
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break rx.borrow().clone();
                }
            }
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                cancel_requested = true;
                bar.set_message("cancelling...");
                depot.cancel(model_id);
            }
        }
    };
    bar.finish_and_clear();

    match state.status {
        DownloadStatus::Completed => {
            println!(
                "\x1b[32m✓\x1b[0m Downloaded {} ({})",
                model_id,
                format_bytes(state.bytes_downloaded)
            );
            if let Some(entry) = depot.known_catalog().await.find(model_id) {
                println!("  {}", depot.store().model_path(&entry.filename).display());
            }
        }
        DownloadStatus::Cancelled => {
            println!("Download of {} cancelled.", model_id);
        }
        _ => {
            anyhow::bail!(
                "Download of {} failed: {}",
                model_id,
                state.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(())
}

fn render(bar: &ProgressBar, state: &DownloadState) {
    if let Some(total) = state.total_bytes {
        bar.set_length(total);
    }
    bar.set_position(state.bytes_downloaded);

    let message = match state.status {
        DownloadStatus::Pending => "waiting...".to_string(),
        DownloadStatus::Downloading => {
            let mut parts = vec![format_speed(state.speed_bytes_per_sec)];
            if let Some(eta) = state.eta_secs {
                parts.push(format!("ETA {}", format_eta(eta)));
            }
            if let Some(mirror) = &state.current_mirror {
                parts.push(format!("via {}", mirror));
            }
            parts.join("  ")
        }
        DownloadStatus::Verifying => "verifying checksum...".to_string(),
        other => other.name().to_string(),
    };
    bar.set_message(message);
    bar.tick();
}
