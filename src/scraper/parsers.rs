use crate::models::BookDetail;
use crate::scraper::cleaner;
use anyhow::Result;
use scraper::{Html, Selector};

// ── Listing page ──────────────────────────────────────────────────────────────

/// Pull detail-page hrefs out of one catalogue listing page, in document
/// order. An empty result on a well-formed page means the listing ran out.
pub fn parse_listing_links(html: &str) -> Result<Vec<String>> {
    let doc = Html::parse_document(html);

    let link_sel = Selector::parse("article.product_pod h3 a")
        .map_err(|e| anyhow::anyhow!("link selector: {:?}", e))?;

    Ok(doc
        .select(&link_sel)
        .filter_map(|a| a.value().attr("href"))
        .map(|h| h.to_string())
        .collect())
}

// ── Detail page ───────────────────────────────────────────────────────────────

/// Extract what a detail page offers. Never fails: fields the page does not
/// carry come back absent, and a missing heading falls back to the `<title>`
/// tag, then to "Unknown".
pub fn parse_book_page(url: &str, html: &str) -> BookDetail {
    let doc = Html::parse_document(html);

    let title = first_text(&doc, "h1")
        .or_else(|| {
            first_text(&doc, "title").and_then(|t| cleaner::strip_title_suffix(&t))
        })
        .unwrap_or_else(|| "Unknown".to_string());

    BookDetail {
        url: url.to_string(),
        title,
        category: breadcrumb_category(&doc),
        availability: first_text(&doc, "p.instock.availability"),
        rating: rating_class(&doc),
        // The price is hunted in the raw page text, not a specific node, so
        // a relocated price tag still resolves.
        price: cleaner::find_price(html),
    }
}

/// Collapsed text of the first element matching `selector`, or None when the
/// element is missing or its text is empty.
fn first_text(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    let el = doc.select(&sel).next()?;
    let text = cleaner::collapse_ws(&el.text().collect::<String>());
    if text.is_empty() { None } else { Some(text) }
}

/// Third breadcrumb link: Home > Books > category.
fn breadcrumb_category(doc: &Html) -> Option<String> {
    let sel = Selector::parse("ul.breadcrumb li a").ok()?;
    let el = doc.select(&sel).nth(2)?;
    let text = cleaner::collapse_ws(&el.text().collect::<String>());
    if text.is_empty() { None } else { Some(text) }
}

/// The non-marker class on `p.star-rating`, e.g. "Three".
fn rating_class(doc: &Html) -> Option<String> {
    let sel = Selector::parse("p.star-rating").ok()?;
    let el = doc.select(&sel).next()?;
    el.value()
        .classes()
        .find(|c| *c != "star-rating")
        .map(|c| c.to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
