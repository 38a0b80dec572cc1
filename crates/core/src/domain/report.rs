use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time market data for one instrument. Built once per report from
/// the listing and the daily price history; never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub ticker: String,
    pub name: String,
    pub current_price: i64,
    pub market_cap: Option<i64>,
    pub market_cap_rank: Option<usize>,
    pub ret_1m: Option<f64>,
    pub ret_3m: Option<f64>,
    pub ret_1y: Option<f64>,
    pub high_52w: i64,
    pub low_52w: i64,
    /// Percentage distance of the current price from the 52-week high.
    pub from_high: Option<f64>,
}

/// The five valuation quantities. A whole set comes from exactly one source
/// (quote provider or filing-derived calculation); fields are never merged
/// across sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValuationMetrics {
    pub per: Option<f64>,
    pub pbr: Option<f64>,
    pub roe: Option<f64>,
    pub eps: Option<i64>,
    pub bps: Option<i64>,
}

impl ValuationMetrics {
    pub fn absent() -> Self {
        Self::default()
    }

    /// A single present field is enough to trust the whole set.
    pub fn has_any(&self) -> bool {
        self.per.is_some()
            || self.pbr.is_some()
            || self.roe.is_some()
            || self.eps.is_some()
            || self.bps.is_some()
    }
}

/// The five fixed narrative sections of a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSections {
    pub summary: String,
    pub price_analysis: String,
    pub financial_analysis: String,
    pub valuation: String,
    pub investment_opinion: String,
}

/// Canonical internal report. Either fully populated or not produced at all;
/// there is no partially-built report. Owned by a single report-generation
/// call and never persisted by the core pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalReport {
    pub ticker: String,
    pub name: String,
    pub generated_at: DateTime<Utc>,
    pub snapshot: Snapshot,
    pub metrics: ValuationMetrics,
    pub sections: ReportSections,
    /// Rendered key accounts of the filing the fallback path loaded, if any.
    pub financial_text: Option<String>,
}
