use anyhow::Result;
use scanwatch_core::{HistoryEntry, ScanPhase, ScanResult, ScanView};

/// Prints a line whenever the phase or progress of the watched scan moves
#[derive(Default)]
pub struct ProgressLine {
    phase: Option<ScanPhase>,
    percent: Option<u8>,
}

impl ProgressLine {
    pub fn update(&mut self, view: &ScanView) {
        if self.phase != Some(view.phase) {
            self.phase = Some(view.phase);
            match view.phase {
                ScanPhase::Submitting => eprintln!("Submitting..."),
                ScanPhase::Polling => match view.handle {
                    Some(ref handle) => eprintln!("Waiting for analysis {}", handle.id),
                    None => eprintln!("Waiting for analysis"),
                },
                ScanPhase::Enriching => eprintln!("Fetching metadata..."),
                ScanPhase::Idle => eprintln!("Cancelled"),
                ScanPhase::Completed | ScanPhase::Failed => {}
            }
        }

        if let Some(progress) = view.progress {
            if self.percent != Some(progress.percent) {
                self.percent = Some(progress.percent);
                eprintln!(
                    "[{:>3}%{}] poll {}/{}",
                    progress.percent,
                    if progress.approximate { "~" } else { "" },
                    progress.attempt,
                    progress.max_attempts
                );
            }
        }
    }
}

fn print_result(result: &ScanResult) {
    let counts = result.verdict_counts;
    println!("Analysis:   {}", result.id);
    println!(
        "Verdict:    {} ({}/{} engines flagged)",
        counts.verdict(),
        counts.total_detections(),
        counts.total_engines()
    );
    println!(
        "Counts:     malicious={} suspicious={} harmless={} undetected={}",
        counts.malicious, counts.suspicious, counts.harmless, counts.undetected
    );
    if let Some(ref sha) = result.sha256 {
        println!("SHA-256:    {}", sha);
    }

    let flagged: Vec<&str> = result.malicious_engines().collect();
    if !flagged.is_empty() {
        println!("Flagged by: {}", flagged.join(", "));
    }
}

pub fn print_view(view: &ScanView, json: bool) -> Result<()> {
    if json {
        let out = serde_json::json!({
            "result": view.result,
            "metadata": view.metadata,
            "hits": view.hits.iter().map(|h| &h.result).collect::<Vec<_>>(),
            "error": view.error.as_ref().map(|e| e.to_string()),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if let Some(ref e) = view.error {
        eprintln!("Error: {}", e);
        if e.is_retryable() {
            eprintln!("The scan can be retried.");
        }
        return Ok(());
    }

    match view.result {
        Some(ref result) => print_result(result),
        None if view.phase == ScanPhase::Completed => println!("No results"),
        None => {}
    }

    if let Some(ref metadata) = view.metadata {
        println!(
            "Metadata:   {} {} ({} attributes)",
            metadata.kind.path_segment(),
            metadata.identifier,
            metadata.attributes.len()
        );
    }
    if view.hits.len() > 1 {
        println!("Other hits:");
        for hit in view.hits.iter().skip(1) {
            println!(
                "  {} {}",
                hit.result.id,
                hit.result.verdict_counts.verdict()
            );
        }
    }
    Ok(())
}

pub fn print_history(entries: &[HistoryEntry], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No scans yet");
        return Ok(());
    }
    for entry in entries {
        println!(
            "{}  {:<6}  {:<10}  {}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.kind.as_str(),
            entry.verdict_counts.verdict().to_string(),
            entry.name
        );
    }
    Ok(())
}
