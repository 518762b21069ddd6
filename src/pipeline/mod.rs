//! Pipeline orchestrator: one synchronization pass, and the scheduler that
//! repeats it.
//!
//! ## Pass shape
//!
//! `run()` — a single crawl-and-sync pass:
//!   1. Walk listing pages → ordered, deduplicated detail URLs (fatal on error)
//!   2. Fetch each detail page → extract fields (a failed page skips that book)
//!   3. Commit every priced observation in one transaction, all stamped with
//!      the pass timestamp
//!   Idempotent: re-running against an unchanged site records 0.00 deltas and
//!   one extra history sample per book.
//!
//! `spawn_scheduler()` repeats `run()` forever on a fixed period, first pass
//! immediately. Passes never overlap; a tick that lands mid-pass is skipped.

use crate::scraper::{BookstoreScraper, PageSource};
use crate::storage::Repository;
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

pub struct Pipeline<S> {
    scraper: BookstoreScraper<S>,
    repo: Arc<Mutex<Repository>>,
    max_pages: u32,
    item_limit: Option<usize>,
}

impl<S: PageSource> Pipeline<S> {
    pub fn new(
        scraper: BookstoreScraper<S>,
        repo: Arc<Mutex<Repository>>,
        max_pages: u32,
        item_limit: Option<usize>,
    ) -> Self {
        Self {
            scraper,
            repo,
            max_pages,
            item_limit,
        }
    }

    pub async fn run(&self) -> Result<SyncStats> {
        let run_id = self.repo.lock().await.begin_sync_run().unwrap_or(0);

        match self.run_inner().await {
            Ok(stats) => {
                let error = (stats.errors > 0).then(|| format!("{} detail errors", stats.errors));
                self.repo
                    .lock()
                    .await
                    .finish_sync_run(run_id, stats.synced, stats.skipped, error.as_deref())
                    .ok();
                info!(
                    "=== Done: {} discovered | {} synced | {} skipped | {} errors ===",
                    stats.discovered, stats.synced, stats.skipped, stats.errors
                );
                Ok(stats)
            }
            Err(e) => {
                self.repo
                    .lock()
                    .await
                    .finish_sync_run(run_id, 0, 0, Some(&format!("{:#}", e)))
                    .ok();
                Err(e)
            }
        }
    }

    async fn run_inner(&self) -> Result<SyncStats> {
        // One timestamp for the whole pass: every book synced by this pass
        // carries the same last_checked and history instant.
        let observed_at = Utc::now().naive_utc();

        info!("=== Step 1: Crawling catalogue listing ===");
        let urls = self.scraper.discover_books(self.max_pages).await?;
        let discovered = urls.len();

        let targets: Vec<String> = match self.item_limit {
            Some(n) if n < urls.len() => {
                info!("Limiting pass to first {} of {} books", n, urls.len());
                urls.into_iter().take(n).collect()
            }
            _ => urls,
        };

        info!("=== Step 2: Fetching {} detail pages ===", targets.len());
        let mut observed = Vec::with_capacity(targets.len());
        let mut skipped = 0usize;
        let mut errors = 0usize;

        for url in &targets {
            match self.scraper.fetch_book(url).await {
                Ok(detail) => match detail.into_observed() {
                    Some(book) => observed.push(book),
                    None => {
                        warn!("{}: no price found, skipping", url);
                        skipped += 1;
                    }
                },
                Err(e) => {
                    warn!("{}: {:#}", url, e);
                    errors += 1;
                }
            }
        }

        info!("=== Step 3: Committing {} observations ===", observed.len());
        let synced = {
            let repo = self.repo.lock().await;
            repo.commit_pass(&observed, observed_at)
                .context("Pass commit failed")?
        };

        Ok(SyncStats {
            discovered,
            synced,
            skipped,
            errors,
        })
    }
}

#[derive(Debug)]
pub struct SyncStats {
    pub discovered: usize,
    pub synced: usize,
    pub skipped: usize,
    pub errors: usize,
}

// ── Scheduler ─────────────────────────────────────────────────────────────────

/// Run passes forever: one immediately, then one per period. A failed pass is
/// logged and the next tick retries from scratch.
pub fn spawn_scheduler<S: PageSource + 'static>(
    pipeline: Pipeline<S>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticks.tick().await;
            info!("Scheduled synchronization pass starting");
            if let Err(e) = pipeline.run().await {
                error!("Synchronization pass failed: {:#}", e);
            }
        }
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::testing::{detail_page, listing_page, StaticSite};
    use crate::storage::BookFilter;

    const BASE: &str = "http://books.toscrape.com/";

    fn fixture(
        item_limit: Option<usize>,
    ) -> (StaticSite, Arc<Mutex<Repository>>, Pipeline<StaticSite>) {
        let site = StaticSite::new();
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        let repo = Arc::new(Mutex::new(repo));
        let pipeline = Pipeline::new(
            BookstoreScraper::new(site.clone(), BASE).unwrap(),
            Arc::clone(&repo),
            50,
            item_limit,
        );
        (site, repo, pipeline)
    }

    fn detail_url(slug: &str) -> String {
        format!("{}catalogue/{}/index.html", BASE, slug)
    }

    /// Seed listing page 1 with the given books and terminate on page 2.
    /// A book with the last field false is listed but its detail page 404s.
    fn seed_catalog(site: &StaticSite, books: &[(&str, &str, Option<f64>, bool)]) {
        let hrefs: Vec<String> = books
            .iter()
            .map(|(slug, ..)| format!("catalogue/{}/index.html", slug))
            .collect();
        let href_refs: Vec<&str> = hrefs.iter().map(|s| s.as_str()).collect();
        site.set_page(format!("{}index.html", BASE), listing_page(&href_refs));
        site.set_page(format!("{}catalogue/page-2.html", BASE), listing_page(&[]));
        for (slug, title, price, has_page) in books {
            if *has_page {
                site.set_page(detail_url(slug), detail_page(title, *price));
            }
        }
    }

    #[tokio::test]
    async fn price_rise_is_recorded_across_passes() {
        let (site, repo, pipeline) = fixture(None);
        seed_catalog(
            &site,
            &[
                ("a_1", "Book A", Some(10.00), true),
                ("b_2", "Book B", None, true),
            ],
        );

        let stats = pipeline.run().await.unwrap();
        assert_eq!(stats.discovered, 2);
        assert_eq!(stats.synced, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.errors, 0);

        {
            let repo = repo.lock().await;
            let a = repo.get_book(&detail_url("a_1")).unwrap().unwrap();
            assert_eq!(a.title, "Book A");
            assert_eq!(a.price, 10.00);
            assert_eq!(a.prev_price, None);
            assert_eq!(a.price_change, None);
            assert!(repo.get_book(&detail_url("b_2")).unwrap().is_none());
        }

        // the shop raises A's price before the next pass
        site.set_page(detail_url("a_1"), detail_page("Book A", Some(12.50)));
        pipeline.run().await.unwrap();

        let repo = repo.lock().await;
        let a = repo.get_book(&detail_url("a_1")).unwrap().unwrap();
        assert_eq!(a.price, 12.50);
        assert_eq!(a.prev_price, Some(10.00));
        assert_eq!(a.price_change, Some(2.50));

        let hist = repo.price_history(&detail_url("a_1")).unwrap();
        assert_eq!(
            hist.iter().map(|p| p.price).collect::<Vec<_>>(),
            vec![10.00, 12.50],
        );
        assert!(repo.get_book(&detail_url("b_2")).unwrap().is_none());
    }

    #[tokio::test]
    async fn repeated_passes_are_stable() {
        let (site, repo, pipeline) = fixture(None);
        seed_catalog(&site, &[("a_1", "Book A", Some(10.00), true)]);

        for _ in 0..3 {
            pipeline.run().await.unwrap();
        }

        let repo = repo.lock().await;
        assert_eq!(repo.book_count().unwrap(), 1);
        let a = repo.get_book(&detail_url("a_1")).unwrap().unwrap();
        assert_eq!(a.price, 10.00);
        assert_eq!(a.prev_price, Some(10.00));
        assert_eq!(a.price_change, Some(0.00));
        assert_eq!(repo.price_history(&detail_url("a_1")).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn every_book_in_a_pass_shares_one_timestamp() {
        let (site, repo, pipeline) = fixture(None);
        seed_catalog(
            &site,
            &[
                ("a_1", "Book A", Some(10.00), true),
                ("b_2", "Book B", Some(4.00), true),
            ],
        );

        pipeline.run().await.unwrap();

        let repo = repo.lock().await;
        let a = repo.get_book(&detail_url("a_1")).unwrap().unwrap();
        let b = repo.get_book(&detail_url("b_2")).unwrap().unwrap();
        assert_eq!(a.last_checked, b.last_checked);

        let hist = repo.price_history(&detail_url("a_1")).unwrap();
        assert_eq!(hist[0].observed_at, a.last_checked);
    }

    #[tokio::test]
    async fn listing_failure_aborts_before_any_write() {
        let (site, repo, pipeline) = fixture(None);
        // listing page 1 advertises a book, but page 2 404s mid-crawl
        site.set_page(
            format!("{}index.html", BASE),
            listing_page(&["catalogue/a_1/index.html"]),
        );
        site.set_page(detail_url("a_1"), detail_page("Book A", Some(10.00)));

        assert!(pipeline.run().await.is_err());

        // index + failed page 2, never a detail page
        assert_eq!(site.fetch_count(), 2);
        let repo = repo.lock().await;
        assert_eq!(repo.book_count().unwrap(), 0);
        assert_eq!(repo.history_count().unwrap(), 0);
        assert_eq!(repo.last_run_status().unwrap().as_deref(), Some("error"));
    }

    #[tokio::test]
    async fn detail_failure_skips_only_that_book() {
        let (site, repo, pipeline) = fixture(None);
        // the broken book comes first; the pass must carry on past it
        seed_catalog(
            &site,
            &[
                ("gone_9", "Gone", Some(5.00), false),
                ("a_1", "Book A", Some(10.00), true),
            ],
        );

        let stats = pipeline.run().await.unwrap();
        assert_eq!(stats.synced, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.skipped, 0);

        let repo = repo.lock().await;
        assert!(repo.get_book(&detail_url("a_1")).unwrap().is_some());
        assert!(repo.get_book(&detail_url("gone_9")).unwrap().is_none());
        assert_eq!(repo.last_run_status().unwrap().as_deref(), Some("error"));
    }

    #[tokio::test]
    async fn unpriced_page_keeps_previous_state() {
        let (site, repo, pipeline) = fixture(None);
        seed_catalog(&site, &[("a_1", "Book A", Some(10.00), true)]);
        pipeline.run().await.unwrap();

        // the price disappears from the page; the book stays listed
        site.set_page(detail_url("a_1"), detail_page("Book A", None));
        let stats = pipeline.run().await.unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.synced, 0);

        let repo = repo.lock().await;
        let a = repo.get_book(&detail_url("a_1")).unwrap().unwrap();
        assert_eq!(a.price, 10.00);
        assert_eq!(repo.price_history(&detail_url("a_1")).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn item_limit_truncates_the_pass() {
        let (site, repo, pipeline) = fixture(Some(2));
        seed_catalog(
            &site,
            &[
                ("a_1", "Book A", Some(1.00), true),
                ("b_2", "Book B", Some(2.00), true),
                ("c_3", "Book C", Some(3.00), true),
            ],
        );

        let stats = pipeline.run().await.unwrap();
        assert_eq!(stats.discovered, 3);
        assert_eq!(stats.synced, 2);

        let repo = repo.lock().await;
        let all = repo.search_books(&BookFilter::default(), None).unwrap();
        assert_eq!(
            all.iter().map(|b| b.url.clone()).collect::<Vec<_>>(),
            vec![detail_url("a_1"), detail_url("b_2")],
        );
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_runs_at_startup_and_then_per_period() {
        let (site, repo, pipeline) = fixture(None);
        seed_catalog(&site, &[("a_1", "Book A", Some(10.00), true)]);

        let handle = spawn_scheduler(pipeline, Duration::from_secs(12 * 3600));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(repo.lock().await.history_count().unwrap(), 1);

        // half a period later nothing new has run
        tokio::time::sleep(Duration::from_secs(6 * 3600)).await;
        assert_eq!(repo.lock().await.history_count().unwrap(), 1);

        tokio::time::sleep(Duration::from_secs(7 * 3600)).await;
        assert_eq!(repo.lock().await.history_count().unwrap(), 2);

        handle.abort();
    }
}
