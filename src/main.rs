mod bundler;
mod grouper;
mod jobs;
mod layout;
mod ledger;
mod mirror;
mod pipeline;
mod settings;
mod sites;
mod uploader;

use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};

use ledger::Ledger;
use settings::Settings;
use sites::SiteRegistry;
use uploader::BlobUploader;

#[derive(Parser)]
#[command(name = "reg_scraper", about = "Regulatory site scraper and bundler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape pending keywords, bundle the results and upload them
    Run {
        /// Stop after bundling
        #[arg(long)]
        skip_upload: bool,
    },
    /// Scrape keywords not yet in the ledger
    Scrape,
    /// Mirror, group and zip the raw data
    Package,
    /// Upload the processed tree to blob storage
    Upload,
    /// Show executed and pending keywords per job
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;

    let result = match cli.command {
        Commands::Run { skip_upload } => {
            scrape(&settings).await?;
            package(&settings)?;
            if skip_upload {
                println!("Upload skipped.");
                Ok(())
            } else {
                upload(&settings).await
            }
        }
        Commands::Scrape => scrape(&settings).await,
        Commands::Package => package(&settings),
        Commands::Upload => upload(&settings).await,
        Commands::Status => {
            let jobs = jobs::load_jobs(&settings.jobs_path)?;
            let ledger = Ledger::load(&settings.ledger_path)?;
            if jobs.is_empty() {
                println!("No jobs in {}.", settings.jobs_path.display());
                return Ok(());
            }
            println!(
                "Ledger: {} ({} jobs recorded)\n",
                ledger.path().display(),
                ledger.entries().len()
            );
            for job in &jobs {
                let done = ledger.executed(&job.key()).map(|s| s.len()).unwrap_or(0);
                let pending = ledger.pending(job);
                println!("{} (page limit {})", job.key(), job.page_limit);
                println!("  Executed: {}", done);
                if pending.is_empty() {
                    println!("  Pending:  -");
                } else {
                    println!("  Pending:  {}", pending.join(", "));
                }
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn scrape(settings: &Settings) -> anyhow::Result<()> {
    let jobs = jobs::load_jobs(&settings.jobs_path)?;
    if jobs.is_empty() {
        println!("No jobs configured in {}.", settings.jobs_path.display());
        return Ok(());
    }
    let mut ledger = Ledger::load(&settings.ledger_path)?;
    let registry = SiteRegistry::new(settings.raw_root(), settings.browser())?;

    let t_scrape = Instant::now();
    println!("Scraping {} jobs...", jobs.len());
    let summary = pipeline::run_jobs(&jobs, &mut ledger, &registry).await?;
    println!(
        "Ran {} keywords: {} results ({} saved, {} errors) in {:.1}s",
        summary.keywords_run,
        summary.found,
        summary.saved,
        summary.errors,
        t_scrape.elapsed().as_secs_f64()
    );
    if summary.already_done > 0 || summary.unknown > 0 {
        println!(
            "Skipped {} finished jobs and {} with unknown scripts.",
            summary.already_done, summary.unknown
        );
    }
    Ok(())
}

fn package(settings: &Settings) -> anyhow::Result<()> {
    let t_package = Instant::now();
    let summary = pipeline::package(&settings.raw_root(), &settings.processed_root())?;
    println!(
        "Mirrored {} sites / {} keywords, {} groups -> {} archives ({} failed) in {:.1}s",
        summary.mirror.sites,
        summary.mirror.keywords,
        summary.groups,
        summary.archives.written,
        summary.archives.failed,
        t_package.elapsed().as_secs_f64()
    );
    Ok(())
}

async fn upload(settings: &Settings) -> anyhow::Result<()> {
    let Some((account_url, sas_token)) = settings.azure_credentials() else {
        println!("No Azure credentials configured; nothing uploaded.");
        return Ok(());
    };
    let uploader = BlobUploader::new(account_url, sas_token)?;
    let root = settings.processed_root();
    let stats = uploader
        .upload_tree(&root)
        .await
        .with_context(|| format!("Upload of {} failed", root.display()))?;
    println!(
        "Uploaded {} files ({} already present, {} failed).",
        stats.uploaded, stats.skipped, stats.failed
    );
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
