//! Sitemap acquisition harness.
//!
//! ```text
//! postcraft-sitemap <site> [config.toml]
//! ```
//!
//! Crawls the sitemap tree of `<site>` with the configured strategies and
//! prints the crawl report as JSON on stdout. Progress goes to stderr.
//! Ctrl-C stops the crawl and prints what was found so far.

use std::path::PathBuf;

use anyhow::Context;
use postcraft::{Acquisition, PostcraftConfig, telemetry};
use postcraft_fetch::{CrawlObserver, CrawlProgress};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing("info");

    let mut args = std::env::args().skip(1);
    let Some(site) = args.next() else {
        anyhow::bail!("usage: postcraft-sitemap <site> [config.toml]");
    };
    let config = match args.next().map(PathBuf::from) {
        Some(path) => PostcraftConfig::from_file(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => {
            let path = PostcraftConfig::default_config_path();
            if path.exists() {
                PostcraftConfig::from_file(&path)
                    .with_context(|| format!("loading {}", path.display()))?
            } else {
                PostcraftConfig::default()
            }
        }
    };

    let acquisition = Acquisition::new(&config).context("invalid configuration")?;
    let shutdown = acquisition.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; stopping crawl");
            shutdown.shutdown();
        }
    });

    let observer = CrawlObserver::new().on_progress(|p: CrawlProgress| {
        eprintln!(
            "sitemaps {processed} done, {queued} queued, {failed} failed; {discovered} urls",
            processed = p.processed,
            queued = p.queued,
            failed = p.failed,
            discovered = p.discovered,
        );
    });

    tracing::info!(site = %site, "acquiring sitemap");
    let report = acquisition
        .acquire_sitemap(&site, &observer)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "sitemap acquisition failed");
            anyhow::anyhow!("sitemap acquisition failed: {e}")
        })?;

    tracing::info!(
        urls = report.urls.len(),
        sitemaps = report.sitemaps_processed,
        failures = report.failures.len(),
        stop_reason = ?report.stop_reason,
        "crawl finished"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
