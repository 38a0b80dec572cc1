use crate::domain::report::ValuationMetrics;
use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One row of the full market listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingEntry {
    pub code: String,
    pub name: String,
    pub market_cap: Option<i64>,
}

/// One daily price bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub close: f64,
    pub high: f64,
    pub low: f64,
}

/// Daily chart data for one instrument: bars ascending by date, plus whatever
/// summary figures the provider precomputes. `metrics` may be all-absent;
/// resolution against the filing fallback happens downstream.
#[derive(Debug, Clone)]
pub struct DailyChart {
    pub bars: Vec<DailyBar>,
    pub market_cap: Option<i64>,
    pub metrics: ValuationMetrics,
}

#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Full listing of instruments (code, display name, market cap when the
    /// source carries it).
    async fn fetch_listing(&self) -> Result<Vec<ListingEntry>>;

    /// Daily bars for `[start, end]` plus provider-side summary figures.
    async fn fetch_daily_chart(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<DailyChart>;
}
