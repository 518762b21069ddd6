use crate::models::{Book, ObservedBook, PricePoint};
use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use duckdb::types::Value;
use duckdb::{params, params_from_iter, Connection};
use std::path::Path;
use tracing::info;

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS price_history_id_seq;
CREATE SEQUENCE IF NOT EXISTS sync_runs_id_seq;

CREATE TABLE IF NOT EXISTS books (
    url           VARCHAR PRIMARY KEY,
    title         VARCHAR NOT NULL DEFAULT '',
    category      VARCHAR,
    availability  VARCHAR,
    rating        VARCHAR,
    price         DOUBLE NOT NULL,
    -- Absent until the second priced pass
    prev_price    DOUBLE,
    price_change  DOUBLE,
    last_checked  TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS price_history (
    id           BIGINT PRIMARY KEY DEFAULT nextval('price_history_id_seq'),
    url          VARCHAR NOT NULL,
    price        DOUBLE NOT NULL,
    observed_at  TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_runs (
    id             BIGINT PRIMARY KEY DEFAULT nextval('sync_runs_id_seq'),
    started_at     TIMESTAMP NOT NULL,
    finished_at    TIMESTAMP,
    status         VARCHAR NOT NULL DEFAULT 'running',
    books_synced   INTEGER DEFAULT 0,
    books_skipped  INTEGER DEFAULT 0,
    error_msg      VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_history_url     ON price_history (url);
CREATE INDEX IF NOT EXISTS idx_books_category  ON books (category);
"#;

// ── Query filters ─────────────────────────────────────────────────────────────

/// Catalog query filters. All optional, combined with AND. Text filters are
/// case-insensitive substring matches.
#[derive(Debug, Clone, Default)]
pub struct BookFilter {
    pub max_price: Option<f64>,
    pub category: Option<String>,
    pub availability: Option<String>,
    pub rating: Option<String>,
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn
            .execute_batch(INDEXES)
            .context("Index creation failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Synchronization ───────────────────────────────────────────────────────

    /// Land one pass in a single transaction: upsert every observation and
    /// append it to the price history. Either the whole pass commits or none
    /// of it does.
    ///
    /// `prev_price` and `price_change` are computed inside the upsert from
    /// the row being replaced, so the delta always compares against the state
    /// previous passes left behind.
    pub fn commit_pass(&self, books: &[ObservedBook], observed_at: NaiveDateTime) -> Result<usize> {
        if books.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;

        let upsert = r#"
            INSERT INTO books
                (url, title, category, availability, rating, price, prev_price, price_change, last_checked)
            VALUES (?, ?, ?, ?, ?, ?, NULL, NULL, ?)
            ON CONFLICT (url) DO UPDATE SET
                title        = excluded.title,
                category     = excluded.category,
                availability = excluded.availability,
                rating       = excluded.rating,
                prev_price   = books.price,
                price_change = round(excluded.price - books.price, 2),
                price        = excluded.price,
                last_checked = excluded.last_checked
        "#;

        let history = "INSERT INTO price_history (url, price, observed_at) VALUES (?, ?, ?)";

        for b in books {
            tx.execute(
                upsert,
                params![
                    b.url,
                    b.title,
                    b.category,
                    b.availability,
                    b.rating,
                    b.price,
                    observed_at,
                ],
            )
            .with_context(|| format!("upsert book {}", b.url))?;

            tx.execute(history, params![b.url, b.price, observed_at])
                .with_context(|| format!("record price for {}", b.url))?;
        }

        tx.commit()?;
        Ok(books.len())
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    pub fn get_book(&self, url: &str) -> Result<Option<Book>> {
        let mut stmt = self.conn.prepare(
            "SELECT url, title, category, availability, rating, price, prev_price, price_change, last_checked
             FROM books WHERE url = ?",
        )?;
        match stmt.query_row(params![url], row_to_book) {
            Ok(b) => Ok(Some(b)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Filtered catalog listing, cheapest first.
    pub fn search_books(&self, filter: &BookFilter, limit: Option<usize>) -> Result<Vec<Book>> {
        let mut sql = String::from(
            "SELECT url, title, category, availability, rating, price, prev_price, price_change, last_checked
             FROM books",
        );

        let mut clauses: Vec<&str> = Vec::new();
        let mut binds: Vec<Value> = Vec::new();

        if let Some(p) = filter.max_price {
            clauses.push("price <= ?");
            binds.push(Value::Double(p));
        }
        if let Some(c) = &filter.category {
            clauses.push("category ILIKE ?");
            binds.push(Value::Text(format!("%{}%", c)));
        }
        if let Some(a) = &filter.availability {
            clauses.push("availability ILIKE ?");
            binds.push(Value::Text(format!("%{}%", a)));
        }
        if let Some(rt) = &filter.rating {
            clauses.push("rating ILIKE ?");
            binds.push(Value::Text(format!("%{}%", rt)));
        }

        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY price, title");
        if let Some(n) = limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(binds.iter()), row_to_book)?;
        Ok(rows.collect::<duckdb::Result<Vec<_>>>()?)
    }

    /// All recorded observations for one book, oldest first. Samples from the
    /// same instant keep their insertion order.
    pub fn price_history(&self, url: &str) -> Result<Vec<PricePoint>> {
        let mut stmt = self.conn.prepare(
            "SELECT url, price, observed_at FROM price_history
             WHERE url = ? ORDER BY observed_at, id",
        )?;
        let rows = stmt.query_map(params![url], row_to_point)?;
        Ok(rows.collect::<duckdb::Result<Vec<_>>>()?)
    }

    /// Every observation in the store, grouped by book, for exports.
    pub fn all_history(&self) -> Result<Vec<PricePoint>> {
        let mut stmt = self.conn.prepare(
            "SELECT url, price, observed_at FROM price_history ORDER BY url, observed_at, id",
        )?;
        let rows = stmt.query_map([], row_to_point)?;
        Ok(rows.collect::<duckdb::Result<Vec<_>>>()?)
    }

    pub fn list_categories(&self) -> Result<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT category, COUNT(*) FROM books
             WHERE category IS NOT NULL GROUP BY category ORDER BY category",
        )?;
        let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
        Ok(rows.collect::<duckdb::Result<Vec<_>>>()?)
    }

    pub fn book_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM books")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn history_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM price_history")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn price_range(&self) -> Result<(Option<f64>, Option<f64>)> {
        let mut s = self.conn.prepare("SELECT MIN(price), MAX(price) FROM books")?;
        Ok(s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }

    /// First and last observation instants across the whole history.
    pub fn observed_range(&self) -> Result<(Option<NaiveDateTime>, Option<NaiveDateTime>)> {
        let mut s = self
            .conn
            .prepare("SELECT MIN(observed_at), MAX(observed_at) FROM price_history")?;
        Ok(s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }

    // ── Administration ────────────────────────────────────────────────────────

    /// Remove a book and its history. Administrative only; a sync pass never
    /// deletes anything.
    pub fn delete_book(&self, url: &str) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM price_history WHERE url = ?", params![url])?;
        let n = tx.execute("DELETE FROM books WHERE url = ?", params![url])?;
        tx.commit()?;
        Ok(n > 0)
    }

    // ── Sync run log ──────────────────────────────────────────────────────────

    pub fn begin_sync_run(&self) -> Result<i64> {
        let id = self.conn.query_row(
            "INSERT INTO sync_runs (started_at, status) VALUES (?, 'running') RETURNING id",
            params![Utc::now().naive_utc()],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_sync_run(
        &self,
        run_id: i64,
        synced: usize,
        skipped: usize,
        error: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            r#"UPDATE sync_runs SET
               finished_at = ?, status = ?,
               books_synced = ?, books_skipped = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "error" },
                synced as i64,
                skipped as i64,
                error,
                run_id,
            ],
        )?;
        Ok(())
    }

    pub fn last_run_status(&self) -> Result<Option<String>> {
        let mut s = self
            .conn
            .prepare("SELECT status FROM sync_runs ORDER BY id DESC LIMIT 1")?;
        match s.query_row([], |r| r.get(0)) {
            Ok(v) => Ok(Some(v)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

// ── Row mappers ───────────────────────────────────────────────────────────────

fn row_to_book(r: &duckdb::Row<'_>) -> duckdb::Result<Book> {
    Ok(Book {
        url: r.get(0)?,
        title: r.get(1)?,
        category: r.get(2)?,
        availability: r.get(3)?,
        rating: r.get(4)?,
        price: r.get(5)?,
        prev_price: r.get(6)?,
        price_change: r.get(7)?,
        last_checked: r.get(8)?,
    })
}

fn row_to_point(r: &duckdb::Row<'_>) -> duckdb::Result<PricePoint> {
    Ok(PricePoint {
        url: r.get(0)?,
        price: r.get(1)?,
        observed_at: r.get(2)?,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
