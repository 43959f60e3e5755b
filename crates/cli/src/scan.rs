use tabled::Table;
use tracing::info;

use crate::Session;
use crate::view::BackendRow;

pub async fn run(session: &Session, backend: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let (reports, failures) = match backend {
        Some(name) => {
            info!("Scanning backend '{}'...", name);
            (vec![session.library.discover_backend(&name).await?], Vec::new())
        }
        None => {
            info!("Scanning all backends...");
            let summary = session.library.scan_all().await?;
            println!(
                "Pipeline: {} processed, {} rendered, {} enriched, {} failed, {} pruned",
                summary.pipeline.processed,
                summary.pipeline.rendered,
                summary.pipeline.enriched,
                summary.pipeline.track_failures,
                summary.pruned
            );
            (summary.backends, summary.failures)
        }
    };

    // Completed backends are saved even when others failed
    session.catalog.persist()?;
    if let Some(path) = session.catalog.snapshot_path() {
        info!("Catalog saved to {} ({} assets)", path.display(), session.catalog.len());
    }

    let rows: Vec<BackendRow> = reports.iter().map(BackendRow::from).collect();
    println!("{}", Table::new(rows));

    if failures.is_empty() {
        return Ok(());
    }
    for failure in &failures {
        eprintln!("backend '{}' not scanned: {}", failure.backend, failure.error);
    }
    Err(format!("{} backend(s) could not be scanned", failures.len()).into())
}
