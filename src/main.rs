mod config;
mod export;
mod models;
mod pipeline;
mod scraper;
mod storage;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::pipeline::{spawn_scheduler, Pipeline};
use crate::scraper::{BookstoreScraper, HttpClient};
use crate::storage::{BookFilter, Repository};

#[derive(Parser)]
#[command(name = "book-tracker", about = "Bookstore catalog price tracker", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Run one synchronization pass and exit
    Update {
        /// Only sync the first N discovered books (smoke runs)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Keep synchronizing: one pass now, then one per configured interval
    Run,

    /// Show database statistics
    Stats,

    /// List stored books, cheapest first
    Books {
        /// Only books at or under this price
        #[arg(long)]
        max_price: Option<f64>,

        /// Category substring filter (case-insensitive)
        #[arg(long)]
        category: Option<String>,

        /// Availability substring filter (case-insensitive)
        #[arg(long)]
        availability: Option<String>,

        /// Rating filter: One, Two, Three, Four or Five
        #[arg(long)]
        rating: Option<String>,

        /// Show at most N rows
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show the recorded price history of one book
    History {
        /// Detail page URL of the book
        url: String,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List categories with book counts
    Categories,

    /// Export books and price history as CSV
    Export {
        /// Target directory
        #[arg(short, long, default_value = "export")]
        dir: PathBuf,
    },

    /// Remove one book and its price history
    Remove {
        /// Detail page URL of the book
        url: String,
    },

    /// Apply schema migrations without syncing
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "book_tracker=info,warn",
        1 => "book_tracker=debug,info",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .compact()
        .with_target(false)
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Update { limit } => {
            let _t = utils::Timer::start("Synchronization pass");
            let pipeline = build_pipeline(&config, limit.or(config.pipeline.item_limit))?;
            let stats = pipeline.run().await?;
            info!(
                "Done: {} discovered, {} synced, {} skipped, {} errors",
                stats.discovered, stats.synced, stats.skipped, stats.errors
            );
        }

        Command::Run => {
            let pipeline = build_pipeline(&config, config.pipeline.item_limit)?;
            let period = Duration::from_secs(config.pipeline.interval_hours * 3600);
            info!(
                "Synchronizing every {}h; Ctrl-C to stop",
                config.pipeline.interval_hours
            );
            let scheduler = spawn_scheduler(pipeline, period);
            tokio::signal::ctrl_c().await?;
            info!("Shutting down");
            scheduler.abort();
        }

        Command::Stats => {
            let repo = Repository::open(&config.storage.db_path)?;
            let books = repo.book_count()?;
            let samples = repo.history_count()?;
            let (min, max) = repo.price_range()?;
            let (first, last) = repo.observed_range()?;
            let status = repo.last_run_status()?;
            println!("─────────────────────────────────");
            println!("  book-tracker — Database Stats");
            println!("─────────────────────────────────");
            println!("  Books     : {}", utils::fmt_count(books));
            println!("  Samples   : {}", utils::fmt_count(samples));
            println!("  Cheapest  : {}", min.map(|p| format!("£{:.2}", p)).unwrap_or("—".into()));
            println!("  Priciest  : {}", max.map(|p| format!("£{:.2}", p)).unwrap_or("—".into()));
            println!("  From      : {}", first.map(|t| t.to_string()).unwrap_or("—".into()));
            println!("  To        : {}", last.map(|t| t.to_string()).unwrap_or("—".into()));
            println!("  Last run  : {}", status.unwrap_or("—".into()));
            println!("─────────────────────────────────");
        }

        Command::Books {
            max_price,
            category,
            availability,
            rating,
            limit,
            json,
        } => {
            let repo = Repository::open(&config.storage.db_path)?;
            let filter = BookFilter {
                max_price,
                category,
                availability,
                rating,
            };
            let books = repo.search_books(&filter, Some(limit))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&books)?);
            } else if books.is_empty() {
                println!("No books matched — run `book-tracker update` first.");
            } else {
                for b in &books {
                    let delta = match b.price_change {
                        Some(d) if d != 0.0 => format!(" ({:+.2})", d),
                        _ => String::new(),
                    };
                    println!(
                        "  £{:>6.2}{}  {}  [{}]",
                        b.price,
                        delta,
                        b.title,
                        b.rating.as_deref().unwrap_or("unrated"),
                    );
                }
            }
        }

        Command::History { url, json } => {
            let repo = Repository::open(&config.storage.db_path)?;
            let points = repo.price_history(&url)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&points)?);
            } else if points.is_empty() {
                println!("No history for {}", url);
            } else {
                for p in &points {
                    println!("  {}  £{:.2}", p.observed_at, p.price);
                }
            }
        }

        Command::Categories => {
            let repo = Repository::open(&config.storage.db_path)?;
            let cats = repo.list_categories()?;
            if cats.is_empty() {
                println!("No categories — run `book-tracker update` first.");
            } else {
                for (name, count) in &cats {
                    println!("  {:<30} {}", name, count);
                }
            }
        }

        Command::Export { dir } => {
            let _t = utils::Timer::start("CSV export");
            let repo = Repository::open(&config.storage.db_path)?;
            let books = repo.search_books(&BookFilter::default(), None)?;
            let history = repo.all_history()?;
            let (books_path, history_path) = export::export_to_dir(&dir, &books, &history)?;
            println!("Wrote {:?} and {:?}", books_path, history_path);
        }

        Command::Remove { url } => {
            let repo = Repository::open(&config.storage.db_path)?;
            if repo.delete_book(&url)? {
                println!("Removed {}", url);
            } else {
                println!("No such book: {}", url);
            }
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}

fn build_pipeline(config: &AppConfig, item_limit: Option<usize>) -> Result<Pipeline<HttpClient>> {
    let repo = Repository::open(&config.storage.db_path)?;
    if config.storage.run_migrations {
        repo.run_migrations()?;
    }
    let scraper =
        BookstoreScraper::from_config(&config.scraper).context("Failed to build scraper")?;
    Ok(Pipeline::new(
        scraper,
        Arc::new(Mutex::new(repo)),
        config.scraper.max_pages,
        item_limit,
    ))
}
