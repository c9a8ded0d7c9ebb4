use anyhow::{bail, Context, Result};
use scanwatch_core::{
    FileUpload, HistoryStore, HttpAnalysisClient, Poller, ScanConfig, ScanOrchestrator, ScanPhase,
    ScanRequest, ScanView,
};
use std::env;
use std::sync::Arc;

mod render;

fn print_usage() {
    eprintln!("Usage: scanwatch [--json] <command>");
    eprintln!("Commands:");
    eprintln!("  url <url>          submit a URL and wait for the verdict");
    eprintln!("  file <path>        upload a file and wait for the verdict");
    eprintln!("  search <query>     look up a hash, domain, IP or URL");
    eprintln!("  history            show recent scans");
    eprintln!("  clear              clear the local scan history");
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let mut rest: Vec<String> = env::args().skip(1).collect();
    let json = rest.iter().any(|s| s == "--json");
    rest.retain(|s| s != "--json");

    if rest.is_empty() {
        print_usage();
        return Ok(());
    }

    let config = ScanConfig::from_env();
    log::debug!(
        "base_url={} api_key_present={} durable_history={}",
        config.base_url,
        config.api_key.is_some(),
        config.history_url.is_some()
    );
    let history = Arc::new(HistoryStore::from_config(&config));

    let verb = rest.remove(0);
    let request = match verb.as_str() {
        "url" => match rest.first() {
            Some(url) => ScanRequest::Url(url.clone()),
            None => bail!("url requires <url>"),
        },
        "file" => match rest.first() {
            Some(path) => ScanRequest::File(
                FileUpload::from_path(path).with_context(|| format!("Cannot upload {}", path))?,
            ),
            None => bail!("file requires <path>"),
        },
        "search" => {
            if rest.is_empty() {
                bail!("search requires <query>");
            }
            ScanRequest::Query(rest.join(" "))
        }
        "history" => {
            let entries = history.load().await;
            render::print_history(&entries, json)?;
            return Ok(());
        }
        "clear" => {
            history.clear();
            println!("Local history cleared; older scans stay hidden until the next scan");
            return Ok(());
        }
        _ => {
            print_usage();
            return Ok(());
        }
    };

    let client = Arc::new(HttpAnalysisClient::from_config(&config));
    let orchestrator = ScanOrchestrator::new(
        client,
        history,
        Poller::new(config.poll),
        config.max_file_bytes,
    );

    let view = run_to_completion(&orchestrator, request).await?;
    render::print_view(&view, json)?;

    match view.error {
        Some(e) if view.phase == ScanPhase::Failed => bail!("scan failed: {}", e),
        _ => Ok(()),
    }
}

/// Start `request` and print phase/progress changes until the scan settles
async fn run_to_completion<C, D>(
    orchestrator: &ScanOrchestrator<C, D>,
    request: ScanRequest,
) -> Result<ScanView>
where
    C: scanwatch_core::AnalysisClient + 'static,
    D: scanwatch_core::history::DurableSink + 'static,
{
    let mut rx = orchestrator.subscribe();
    let generation = match orchestrator.start(request) {
        Ok(generation) => generation,
        Err(_) => return Ok(orchestrator.view()),
    };

    let mut last = render::ProgressLine::default();
    loop {
        let view = rx.borrow_and_update().clone();
        if view.generation == generation {
            last.update(&view);
            if view.phase.is_terminal() || view.phase == ScanPhase::Idle {
                return Ok(view);
            }
        }
        if rx.changed().await.is_err() {
            return Ok(orchestrator.view());
        }
    }
}
