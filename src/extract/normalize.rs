use rust_decimal::Decimal;
use std::str::FromStr;

/// Currency markers stripped from price text
///
/// `Â` is what a UTF-8 `£` turns into when the page is decoded as Latin-1;
/// it is only ever stripped, never interpreted.
const CURRENCY_MARKERS: &[char] = &['£', '$', '€', 'Â'];

/// Collapses every run of whitespace to a single space and trims the ends
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parses catalog price text such as `£51.77` into a fixed-point decimal
///
/// Returns None unless what remains after removing whitespace and currency
/// markers is `digits` or `digits.digits`. Signs, thousands separators,
/// exponents, and stray characters are all refused rather than guessed at.
pub fn parse_price(text: &str) -> Option<Decimal> {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && !CURRENCY_MARKERS.contains(c))
        .collect();

    let (whole, fraction) = match cleaned.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (cleaned.as_str(), None),
    };

    if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    if let Some(fraction) = fraction {
        if fraction.is_empty() || !fraction.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
    }

    Decimal::from_str(&cleaned).ok()
}

/// Canonicalizes a raw UPC into the natural key
///
/// Keys are trimmed and lowercased; anything other than ASCII letters and
/// digits makes the key invalid.
pub fn canonical_key(raw: &str) -> Option<String> {
    let key = raw.trim().to_ascii_lowercase();
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(key)
}
