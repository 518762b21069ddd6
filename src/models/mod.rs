use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ── Catalog book ──────────────────────────────────────────────────────────────

/// Current state of one tracked book. `prev_price` and `price_change` are
/// absent until the book has been priced in at least two passes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Book {
    pub url: String,
    pub title: String,
    pub category: Option<String>,
    pub availability: Option<String>,
    pub rating: Option<String>,    // "One" .. "Five"
    pub price: f64,
    pub prev_price: Option<f64>,
    pub price_change: Option<f64>,
    pub last_checked: NaiveDateTime,
}

// ── Price history sample ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    pub url: String,
    pub price: f64,
    pub observed_at: NaiveDateTime,
}

// ── Raw extraction result ─────────────────────────────────────────────────────

/// What the detail-page extractor could recover. Every field except the URL
/// is best-effort; a page with no recognizable price still yields a detail.
#[derive(Debug, Clone, Default)]
pub struct BookDetail {
    pub url: String,
    pub title: String,
    pub category: Option<String>,
    pub availability: Option<String>,
    pub rating: Option<String>,
    pub price: Option<f64>,
}

/// A detail whose price resolved. Only this shape reaches the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedBook {
    pub url: String,
    pub title: String,
    pub category: Option<String>,
    pub availability: Option<String>,
    pub rating: Option<String>,
    pub price: f64,
}

impl BookDetail {
    /// Promote to an observation, or `None` when the page had no price.
    pub fn into_observed(self) -> Option<ObservedBook> {
        let price = self.price?;
        Some(ObservedBook {
            url: self.url,
            title: self.title,
            category: self.category,
            availability: self.availability,
            rating: self.rating,
            price,
        })
    }
}
