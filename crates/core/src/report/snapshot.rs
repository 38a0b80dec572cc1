use crate::domain::report::Snapshot;
use crate::ingest::provider::{DailyBar, ListingEntry};

// Trailing-return windows in trading days.
const DAYS_1M: usize = 20;
const DAYS_3M: usize = 60;
const DAYS_1Y: usize = 240;

/// Build the point-in-time snapshot for one instrument from the full listing
/// and its daily bars (ascending by date). `None` when the instrument is not
/// listed or has no usable price history; missing data, not an error.
pub fn build_snapshot(
    code: &str,
    listing: &[ListingEntry],
    bars: &[DailyBar],
    chart_market_cap: Option<i64>,
) -> Option<Snapshot> {
    let entry = listing.iter().find(|e| e.code == code)?;

    if bars.is_empty() {
        tracing::info!(ticker = %code, "no daily bars; snapshot not produced");
        return None;
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let current = *closes.last()?;
    if current <= 0.0 {
        return None;
    }

    let high_52w = bars.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let low_52w = bars.iter().map(|b| b.low).fold(f64::MAX, f64::min);

    let pct_from_n_days = |n: usize| -> Option<f64> {
        if closes.len() <= n {
            return None;
        }
        let past = closes[closes.len() - 1 - n];
        if past <= 0.0 {
            return None;
        }
        Some((current / past - 1.0) * 100.0)
    };

    let from_high = if high_52w > 0.0 {
        Some((current / high_52w - 1.0) * 100.0)
    } else {
        None
    };

    let market_cap = chart_market_cap.or(entry.market_cap);

    Some(Snapshot {
        ticker: code.to_string(),
        name: entry.name.clone(),
        current_price: current as i64,
        market_cap,
        market_cap_rank: market_cap_rank(code, listing, market_cap),
        ret_1m: pct_from_n_days(DAYS_1M),
        ret_3m: pct_from_n_days(DAYS_3M),
        ret_1y: pct_from_n_days(DAYS_1Y),
        high_52w: high_52w as i64,
        low_52w: low_52w as i64,
        from_high,
    })
}

/// Rank among all instruments with a known market cap, 1-based. `None` when
/// this instrument's market cap is unknown.
fn market_cap_rank(
    code: &str,
    listing: &[ListingEntry],
    market_cap: Option<i64>,
) -> Option<usize> {
    let own = market_cap?;
    let larger = listing
        .iter()
        .filter(|e| e.code != code)
        .filter_map(|e| e.market_cap)
        .filter(|cap| *cap > own)
        .count();
    Some(larger + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn entry(code: &str, name: &str, market_cap: Option<i64>) -> ListingEntry {
        ListingEntry {
            code: code.to_string(),
            name: name.to_string(),
            market_cap,
        }
    }

    fn flat_bars(n: usize, close: f64) -> Vec<DailyBar> {
        let start = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        (0..n)
            .map(|i| DailyBar {
                date: start + chrono::Duration::days(i as i64),
                close,
                high: close + 100.0,
                low: close - 100.0,
            })
            .collect()
    }

    #[test]
    fn unlisted_code_produces_no_snapshot() {
        let listing = vec![entry("005930", "삼성전자", None)];
        assert!(build_snapshot("999999", &listing, &flat_bars(10, 100.0), None).is_none());
    }

    #[test]
    fn empty_bars_produce_no_snapshot() {
        let listing = vec![entry("005930", "삼성전자", None)];
        assert!(build_snapshot("005930", &listing, &[], None).is_none());
    }

    #[test]
    fn short_history_leaves_long_returns_absent() {
        let listing = vec![entry("005930", "삼성전자", None)];
        let snapshot = build_snapshot("005930", &listing, &flat_bars(30, 70_000.0), None).unwrap();
        assert_eq!(snapshot.current_price, 70_000);
        assert_eq!(snapshot.ret_1m, Some(0.0));
        assert_eq!(snapshot.ret_3m, None);
        assert_eq!(snapshot.ret_1y, None);
        assert_eq!(snapshot.high_52w, 70_100);
        assert_eq!(snapshot.low_52w, 69_900);
    }

    #[test]
    fn returns_and_from_high_are_percentages() {
        let listing = vec![entry("005930", "삼성전자", None)];
        let mut bars = flat_bars(25, 50_000.0);
        let last = bars.last_mut().unwrap();
        last.close = 55_000.0;
        last.high = 55_000.0;
        let snapshot = build_snapshot("005930", &listing, &bars, None).unwrap();
        // 20 trading days back is a 50,000 close.
        assert_eq!(snapshot.ret_1m, Some(10.000000000000009));
        assert_eq!(snapshot.high_52w, 55_000);
        assert_eq!(snapshot.from_high, Some(0.0));
    }

    #[test]
    fn rank_counts_strictly_larger_caps() {
        let listing = vec![
            entry("000001", "A", Some(300)),
            entry("000002", "B", Some(200)),
            entry("000003", "C", Some(100)),
            entry("000004", "D", None),
        ];
        let bars = flat_bars(5, 10.0);
        let snapshot = build_snapshot("000002", &listing, &bars, None).unwrap();
        assert_eq!(snapshot.market_cap_rank, Some(2));

        // Chart-side market cap wins over the listing figure.
        let snapshot = build_snapshot("000003", &listing, &bars, Some(400)).unwrap();
        assert_eq!(snapshot.market_cap, Some(400));
        assert_eq!(snapshot.market_cap_rank, Some(1));

        let snapshot = build_snapshot("000004", &listing, &bars, None).unwrap();
        assert_eq!(snapshot.market_cap_rank, None);
    }
}
