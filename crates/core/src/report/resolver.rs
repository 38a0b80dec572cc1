use crate::domain::filing;
use crate::domain::report::ValuationMetrics;
use crate::domain::valuation;
use crate::ingest::dart::FilingProvider;
use chrono::{DateTime, Datelike, Utc};
use std::sync::Arc;

const KST_OFFSET_SECS: i32 = 9 * 3600;

// Annual filings lag the calendar; try the current fiscal year and two back.
const YEARS_BACK: i32 = 2;

/// Decides which valuation-metrics source to trust.
///
/// If the primary (quote-provider) set has any present field, the whole
/// primary set wins and the filing path never runs. Only a fully absent
/// primary set, combined with a configured filing capability and a positive
/// price, triggers the filing-derived calculation, which again replaces the
/// set wholesale or not at all. Failures on the fallback path are
/// missing-data conditions, never fatal to the report.
pub struct MetricsResolver {
    filing: Option<Arc<dyn FilingProvider>>,
}

impl MetricsResolver {
    pub fn new(filing: Option<Arc<dyn FilingProvider>>) -> Self {
        Self { filing }
    }

    /// Resolve the metrics set for one instrument. Returns the chosen set and
    /// the rendered filing text when a filing was loaded (even if the
    /// calculation on it failed).
    pub async fn resolve(
        &self,
        code: &str,
        primary: ValuationMetrics,
        current_price: f64,
        now: DateTime<Utc>,
    ) -> (ValuationMetrics, Option<String>) {
        if primary.has_any() {
            return (primary, None);
        }

        let Some(provider) = self.filing.as_ref() else {
            tracing::debug!(ticker = %code, "filing lookup not configured; keeping absent metrics");
            return (primary, None);
        };
        if current_price <= 0.0 {
            return (primary, None);
        }

        tracing::info!(ticker = %code, "primary metrics absent; trying filing-derived calculation");

        let Some(items) = self.load_first_filing(provider.as_ref(), code, now).await else {
            return (primary, None);
        };

        let financial_text = Some(filing::render_financial_text(code, &items));

        match valuation::calculate(&items, current_price) {
            Some(metrics) => {
                tracing::info!(
                    ticker = %code,
                    per = ?metrics.per,
                    pbr = ?metrics.pbr,
                    roe = ?metrics.roe,
                    "filing-derived metrics adopted"
                );
                (metrics, financial_text)
            }
            None => {
                tracing::info!(ticker = %code, "filing-derived calculation preconditions unmet");
                (primary, financial_text)
            }
        }
    }

    /// First non-empty annual consolidated filing, walking fiscal years
    /// backwards from the current KST year.
    async fn load_first_filing(
        &self,
        provider: &dyn FilingProvider,
        code: &str,
        now: DateTime<Utc>,
    ) -> Option<Vec<filing::LineItem>> {
        let kst = chrono::FixedOffset::east_opt(KST_OFFSET_SECS)?;
        let current_year = now.with_timezone(&kst).year();

        for year in (current_year - YEARS_BACK..=current_year).rev() {
            match provider.fetch_annual_financials(code, year).await {
                Ok(Some(items)) if !items.is_empty() => {
                    tracing::info!(ticker = %code, year, items = items.len(), "filing loaded");
                    return Some(items);
                }
                Ok(_) => {
                    tracing::debug!(ticker = %code, year, "no filing for year");
                }
                Err(err) => {
                    tracing::warn!(ticker = %code, year, error = %format!("{err:#}"), "filing lookup failed");
                }
            }
        }

        None
    }
}
