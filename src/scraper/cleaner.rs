// ── Text cleanup helpers ──────────────────────────────────────────────────────

/// Find the first sterling amount in a block of text.
/// "£51.77" → 51.77 | "£ 12.00" → 12.00 | "£12.345" → 12.34 (extra digits dropped)
///
/// An amount needs at least one digit before the dot and two after it, so
/// "£12.5" and "£.99" are not amounts. Scanning continues past a failed
/// candidate: "was £x now £3.50" still yields 3.50.
pub fn find_price(text: &str) -> Option<f64> {
    let mut rest = text;
    while let Some(pos) = rest.find('£') {
        rest = &rest[pos + '£'.len_utf8()..];
        if let Some(price) = amount_at(rest) {
            return Some(price);
        }
    }
    None
}

fn amount_at(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let whole: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    if whole.is_empty() {
        return None;
    }
    let rest = &s[whole.len()..];
    if !rest.starts_with('.') {
        return None;
    }
    let frac: String = rest[1..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if frac.len() < 2 {
        return None;
    }
    format!("{}.{}", whole, &frac[..2]).parse().ok()
}

/// Take the part of a page `<title>` before the site-name suffix.
/// "A Light in the Attic | Books to Scrape - Sandbox" → Some("A Light in the Attic")
///
/// Returns None when no `| Books to Scrape` tail is present, in any case.
pub fn strip_title_suffix(title: &str) -> Option<String> {
    for (idx, _) in title.match_indices('|') {
        let tail = &title[idx + 1..];
        if tail.trim_start().to_lowercase().starts_with("books to scrape") {
            return Some(title[..idx].trim().to_string());
        }
    }
    None
}

/// Collapse runs of whitespace (including newlines) into single spaces.
/// "  In stock\n   (22 available)\n" → "In stock (22 available)"
pub fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
