use crate::ingest::provider::ListingEntry;

// Frequently asked names, resolved without touching the listing.
const NAME_TO_CODE: &[(&str, &str)] = &[
    ("삼성전자", "005930"),
    ("카카오", "035720"),
    ("LG에너지솔루션", "373220"),
];

/// Normalize a user-supplied ticker or company name into a 6-digit
/// instrument code. Names fall back to an exact-name search over the full
/// listing; `None` means the instrument could not be resolved.
pub fn normalize_ticker(ticker: &str, listing: &[ListingEntry]) -> Option<String> {
    let t = ticker.trim();
    if t.is_empty() {
        return None;
    }

    if let Some((_, code)) = NAME_TO_CODE.iter().find(|(name, _)| *name == t) {
        return Some((*code).to_string());
    }

    if t.len() == 6 && t.bytes().all(|b| b.is_ascii_digit()) {
        return Some(t.to_string());
    }

    listing
        .iter()
        .find(|entry| entry.name == t)
        .map(|entry| entry.code.clone())
}
