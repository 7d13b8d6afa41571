//! Subcommand implementations for the `humble-sync` binary.
//!
//! Commands own all terminal output; the library layer only logs. Each
//! handler builds the collaborators it needs (tool wrapper, database,
//! coordinator) from the loaded [`Config`] and returns `anyhow` errors for
//! `main` to render.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result, bail};
use tracing::info;

use humble_sync::{
    Config, Database, DownloadCoordinator, DownloadRequest, HumbleCli, HumbleCliFetcher, Ledger,
    LifecycleCallbacks,
};

/// Options for the `download` subcommand after CLI parsing.
#[derive(Debug)]
pub struct DownloadOptions {
    pub bundle_key: String,
    pub format: String,
    pub items: Vec<u32>,
    pub concurrency: Option<u8>,
    pub output_dir: Option<PathBuf>,
    pub force: bool,
}

/// Lists purchased bundles.
pub async fn bundles() -> Result<()> {
    let cli = connected_cli().await?;
    let bundles = cli.list_bundles().await?;

    if bundles.is_empty() {
        println!("No bundles found.");
        return Ok(());
    }

    println!("{:<24} Name", "Key");
    for bundle in &bundles {
        println!("{:<24} {}", bundle.key, bundle.name);
    }
    println!("\n{} bundle(s)", bundles.len());
    Ok(())
}

/// Shows the items and keys in one bundle, marking formats already
/// downloaded according to the ledger.
pub async fn details(config: &Config, bundle_key: &str) -> Result<()> {
    let cli = connected_cli().await?;
    let details = cli.bundle_details(bundle_key).await?;
    let ledger = open_ledger(config).await?;

    println!("{}", details.name);
    if !details.purchased.is_empty() {
        println!("Purchased: {}", details.purchased);
    }
    if !details.amount.is_empty() {
        println!("Amount spent: {}", details.amount);
    }
    if !details.total_size.is_empty() {
        println!("Total size: {}", details.total_size);
    }

    if !details.items.is_empty() {
        println!("\nItems:");
        for item in &details.items {
            // Per-format ledger markers: "*" means already downloaded.
            let mut formats = Vec::with_capacity(item.formats.len());
            for format in &item.formats {
                let request = DownloadRequest::new(bundle_key, item.number, format.as_str());
                if ledger.is_completed(&request.resource_url()).await? {
                    formats.push(format!("{format}*"));
                } else {
                    formats.push(format.clone());
                }
            }
            println!(
                "  {:>3}  {:<50} {:<18} {}",
                item.number,
                item.name,
                formats.join(", "),
                item.size
            );
        }
        println!("\n  * already downloaded");
    }

    if !details.keys.is_empty() {
        println!("\nKeys:");
        for key in &details.keys {
            let status = if key.redeemed { "redeemed" } else { "unredeemed" };
            println!("  {:>3}  {:<50} {}", key.number, key.name, status);
        }
    }

    if details.items.is_empty() && details.keys.is_empty() {
        println!("\nNothing downloadable or redeemable in this bundle.");
    }
    Ok(())
}

/// Downloads items from a bundle with bounded concurrency.
pub async fn download(config: &Config, options: DownloadOptions) -> Result<()> {
    let cli = connected_cli().await?;
    let bundle = cli
        .bundle_details(&options.bundle_key)
        .await
        .with_context(|| format!("failed to resolve bundle '{}'", options.bundle_key))?;

    // Items to fetch: explicit numbers, or every item offering the format.
    let wanted_format = options.format.to_uppercase();
    let selected: Vec<u32> = if options.items.is_empty() {
        bundle
            .items
            .iter()
            .filter(|item| item.formats.iter().any(|format| *format == wanted_format))
            .map(|item| item.number)
            .collect()
    } else {
        for number in &options.items {
            if !bundle.items.iter().any(|item| item.number == *number) {
                bail!("bundle '{}' has no item {number}", options.bundle_key);
            }
        }
        options.items.clone()
    };

    if selected.is_empty() {
        println!(
            "No items in '{}' offer format '{}'.",
            options.bundle_key, options.format
        );
        return Ok(());
    }

    let mut config = config.clone();
    if let Some(concurrency) = options.concurrency {
        config.max_concurrent_downloads = usize::from(concurrency);
    }
    if let Some(output_dir) = options.output_dir {
        config.output_dir = output_dir;
    }

    let ledger = open_ledger(&config).await?;
    let fetcher = Arc::new(HumbleCliFetcher::new(cli));
    let coordinator = DownloadCoordinator::new(fetcher, ledger.clone(), &config)?;
    let collection_total = bundle.items_with_format(&options.format);

    info!(
        bundle = %options.bundle_key,
        items = selected.len(),
        concurrency = config.max_concurrent_downloads,
        "starting downloads"
    );

    let succeeded = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let mut skipped = 0usize;

    for number in selected {
        let request = DownloadRequest::new(&options.bundle_key, number, &options.format);

        // Display-level skip; the coordinator would fetch it again safely.
        if !options.force && ledger.is_completed(&request.resource_url()).await? {
            println!("  item {number}: already downloaded, skipping (--force to redo)");
            skipped += 1;
            continue;
        }

        let success_count = Arc::clone(&succeeded);
        let failure_count = Arc::clone(&failed);
        let label = format!("item {number} ({})", options.format);
        let started_label = label.clone();

        let callbacks = LifecycleCallbacks::new()
            .on_started(move || println!("  {started_label}: downloading..."))
            .on_completed(move |success, message| {
                if success {
                    success_count.fetch_add(1, Ordering::SeqCst);
                    println!("  {label}: done");
                } else {
                    failure_count.fetch_add(1, Ordering::SeqCst);
                    println!("  {label}: FAILED ({})", message.unwrap_or("unknown error"));
                }
            });

        coordinator.submit(request, Some(collection_total), callbacks);
    }

    tokio::select! {
        () = coordinator.join() => {}
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for interrupt signal")?;
            println!("\nInterrupted; waiting for in-flight downloads...");
            coordinator.shutdown(config.shutdown_grace()).await;
        }
    }

    let succeeded = succeeded.load(Ordering::SeqCst);
    let failed = failed.load(Ordering::SeqCst);
    println!("\n{succeeded} downloaded, {failed} failed, {skipped} skipped");

    let stats = ledger.stats_for(&options.bundle_key).await?;
    if let (Some(remaining), Some(total)) = (stats.remaining, stats.total) {
        println!(
            "Bundle progress: {}/{total} items downloaded ({remaining} remaining)",
            stats.completed
        );
    }

    if failed > 0 {
        bail!("{failed} download(s) failed");
    }
    Ok(())
}

/// Prints completed-download statistics from the ledger.
pub async fn stats(config: &Config, bundle_key: Option<&str>) -> Result<()> {
    let ledger = open_ledger(config).await?;

    if let Some(key) = bundle_key {
        let stats = ledger.stats_for(key).await?;
        println!("Bundle: {key}");
        println!("  Completed: {}", stats.completed);
        match (stats.remaining, stats.total) {
            (Some(remaining), Some(total)) => {
                println!("  Total:     {total}");
                println!("  Remaining: {remaining}");
            }
            _ => println!("  Total:     unknown (no full download run recorded)"),
        }

        let records = ledger.records(Some(key)).await?;
        if !records.is_empty() {
            println!("\n  {:<40} Completed", "File");
            for record in records {
                println!("  {:<40} {}", record.filename, record.completed_at);
            }
        }
        return Ok(());
    }

    let total = ledger.total_completed().await?;
    let collections = ledger.tracked_collections().await?;
    println!("{total} download(s) recorded across {} bundle(s)", collections.len());
    for collection in collections {
        let stats = ledger.stats_for(&collection).await?;
        match stats.total {
            Some(bundle_total) => {
                println!("  {:<24} {}/{bundle_total}", collection, stats.completed);
            }
            None => println!("  {:<24} {}", collection, stats.completed),
        }
    }
    Ok(())
}

/// Builds the tool wrapper and fails fast when `humble-cli` is missing.
async fn connected_cli() -> Result<HumbleCli> {
    let cli = HumbleCli::new();
    if !cli.check_available().await {
        bail!(
            "humble-cli not found on PATH; install it and run `humble-cli auth` first"
        );
    }
    Ok(cli)
}

/// Opens the ledger database at the configured or default path.
async fn open_ledger(config: &Config) -> Result<Ledger> {
    let path = match &config.database_path {
        Some(path) => path.clone(),
        None => humble_sync::db::default_database_path(),
    };
    let db = Database::new(&path)
        .await
        .with_context(|| format!("failed to open ledger database at {}", path.display()))?;
    Ok(Ledger::new(db))
}
