//! CSV export of the mirrored catalog and its price history.

use crate::models::{Book, PricePoint};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Serialize books to CSV, header row first.
pub fn write_books<W: Write>(out: W, books: &[Book]) -> Result<()> {
    let mut w = csv::Writer::from_writer(out);
    for b in books {
        w.serialize(b).context("serialize book row")?;
    }
    w.flush()?;
    Ok(())
}

/// Serialize price samples to CSV, header row first.
pub fn write_history<W: Write>(out: W, points: &[PricePoint]) -> Result<()> {
    let mut w = csv::Writer::from_writer(out);
    for p in points {
        w.serialize(p).context("serialize history row")?;
    }
    w.flush()?;
    Ok(())
}

/// Write books.csv and price_history.csv under `dir`, creating it if needed.
pub fn export_to_dir(
    dir: &Path,
    books: &[Book],
    points: &[PricePoint],
) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir).with_context(|| format!("Could not create dir {:?}", dir))?;

    let books_path = dir.join("books.csv");
    let file = std::fs::File::create(&books_path)
        .with_context(|| format!("Could not create {:?}", books_path))?;
    write_books(file, books)?;

    let history_path = dir.join("price_history.csv");
    let file = std::fs::File::create(&history_path)
        .with_context(|| format!("Could not create {:?}", history_path))?;
    write_history(file, points)?;

    info!(
        "Exported {} books and {} price samples to {:?}",
        books.len(),
        points.len(),
        dir
    );
    Ok((books_path, history_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_book() -> Book {
        Book {
            url: "http://books.toscrape.com/catalogue/a_1/index.html".into(),
            title: "A Light in the Attic".into(),
            category: Some("Poetry".into()),
            availability: Some("In stock (22 available)".into()),
            rating: Some("Three".into()),
            price: 51.77,
            prev_price: None,
            price_change: None,
            last_checked: NaiveDate::from_ymd_opt(2026, 1, 15)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
        }
    }

    #[test]
    fn books_csv_has_header_and_rows() {
        let mut buf = Vec::new();
        write_books(&mut buf, &[sample_book()]).unwrap();
        let text = String::from_utf8(buf).unwrap();

        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "url,title,category,availability,rating,price,prev_price,price_change,last_checked",
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("http://books.toscrape.com/catalogue/a_1/index.html,"));
        assert!(row.contains("51.77"));
        assert!(lines.next().is_none());
    }

    #[test]
    fn absent_fields_serialize_as_empty_columns() {
        let mut buf = Vec::new();
        write_books(&mut buf, &[sample_book()]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        // prev_price and price_change sit between price and last_checked
        assert!(text.lines().nth(1).unwrap().contains("51.77,,,"));
    }

    #[test]
    fn history_csv_has_header_and_rows() {
        let point = PricePoint {
            url: "http://books.toscrape.com/catalogue/a_1/index.html".into(),
            price: 10.0,
            observed_at: NaiveDate::from_ymd_opt(2026, 1, 15)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
        };
        let mut buf = Vec::new();
        write_history(&mut buf, &[point]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().next().unwrap(), "url,price,observed_at");
        assert_eq!(text.lines().count(), 2);
    }
}
