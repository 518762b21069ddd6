pub mod cleaner;
pub mod http_client;
pub mod parsers;

use crate::config::ScraperConfig;
use crate::models::BookDetail;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{debug, info, warn};
use url::Url;

pub use self::http_client::{FetchError, HttpClient};

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable page fetch abstraction. Everything above this seam (pagination,
/// link resolution, extraction) runs unchanged against canned pages in tests.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn get_text(&self, url: &str) -> Result<String, FetchError>;
}

// ── Bookstore scraper ─────────────────────────────────────────────────────────

pub struct BookstoreScraper<S> {
    source: S,
    base_url: Url,
}

impl BookstoreScraper<HttpClient> {
    /// Production scraper over a real HTTP client.
    pub fn from_config(config: &ScraperConfig) -> Result<Self> {
        Self::new(HttpClient::new(config)?, &config.base_url)
    }
}

impl<S: PageSource> BookstoreScraper<S> {
    pub fn new(source: S, base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("invalid base url {:?}", base_url))?;
        Ok(Self { source, base_url })
    }

    /// URL for one listing page. Page 1 is the site index.
    fn listing_url(&self, page: u32) -> Result<Url> {
        let path = if page <= 1 {
            "index.html".to_string()
        } else {
            format!("catalogue/page-{}.html", page)
        };
        self.base_url
            .join(&path)
            .with_context(|| format!("bad listing url for page {}", page))
    }

    /// Resolve a listing href against the page it appeared on, then force the
    /// base scheme when the host matches. The site links to itself as https
    /// in places while serving plain http.
    fn canonicalize(&self, page_url: &Url, href: &str) -> Option<Url> {
        let mut resolved = page_url.join(href).ok()?;
        if resolved.host_str() == self.base_url.host_str() {
            resolved.set_scheme(self.base_url.scheme()).ok()?;
        }
        Some(resolved)
    }

    /// Walk listing pages collecting detail URLs: first-seen order, no
    /// duplicates. A page with zero product links ends the walk. A fetch or
    /// parse failure on any listing page is fatal to the whole pass.
    pub async fn discover_books(&self, max_pages: u32) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut urls = Vec::new();
        let mut page = 1u32;

        loop {
            if page > max_pages {
                warn!("Reached page limit ({}), stopping", max_pages);
                break;
            }

            let page_url = self.listing_url(page)?;
            info!("Fetching listing page {} ({})", page, page_url);

            let html = self
                .source
                .get_text(page_url.as_str())
                .await
                .with_context(|| format!("Failed to fetch listing page {}", page))?;

            let hrefs = parsers::parse_listing_links(&html)?;
            if hrefs.is_empty() {
                debug!("Empty page {} — stopping pagination", page);
                break;
            }

            let mut new_on_page = 0usize;
            for href in &hrefs {
                let Some(link) = self.canonicalize(&page_url, href) else {
                    warn!("Unresolvable href {:?} on page {}", href, page);
                    continue;
                };
                let link = link.to_string();
                if seen.insert(link.clone()) {
                    urls.push(link);
                    new_on_page += 1;
                }
            }
            debug!("  Page {}: {} links, {} new", page, hrefs.len(), new_on_page);
            page += 1;
        }

        info!("Total books discovered: {}", urls.len());
        Ok(urls)
    }

    /// Fetch one detail page and extract whatever it offers.
    pub async fn fetch_book(&self, url: &str) -> Result<BookDetail> {
        let html = self.source.get_text(url).await?;
        Ok(parsers::parse_book_page(url, &html))
    }
}

// ── Test fixtures ─────────────────────────────────────────────────────────────
