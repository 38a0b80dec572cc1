use crate::domain::report::InternalReport;
use crate::ingest::dart::FilingProvider;
use crate::ingest::provider::MarketDataProvider;
use crate::lookup;
use crate::report::kakao::KakaoResponse;
use crate::report::resolver::MetricsResolver;
use crate::report::{assembler, formatter, snapshot};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

const KST_OFFSET_SECS: i32 = 9 * 3600;

// One calendar year of daily bars covers the 52-week statistics.
const HISTORY_DAYS: i64 = 365;

/// The one exposed operation: ticker or company name in, well-formed card
/// payload out. Total from the caller's perspective: every failure mode maps
/// to one of the three response classes, nothing escapes.
pub struct ReportService {
    market: Arc<dyn MarketDataProvider>,
    resolver: MetricsResolver,
}

impl ReportService {
    pub fn new(
        market: Arc<dyn MarketDataProvider>,
        filing: Option<Arc<dyn FilingProvider>>,
    ) -> Self {
        Self {
            market,
            resolver: MetricsResolver::new(filing),
        }
    }

    pub async fn generate_report(&self, ticker: &str) -> KakaoResponse {
        match self.build_report(ticker, Utc::now()).await {
            Ok(Some(report)) => formatter::success_response(&report),
            Ok(None) => {
                tracing::info!(ticker = %ticker.trim(), "no report data for instrument");
                formatter::no_data_response(ticker.trim())
            }
            Err(err) => {
                tracing::error!(
                    ticker = %ticker.trim(),
                    error = %format!("{err:#}"),
                    "report generation failed"
                );
                formatter::error_response()
            }
        }
    }

    /// `Ok(None)` is the missing-data class; `Err` is the upstream-failure
    /// class. Exposed to the batch driver so it can count outcomes.
    pub async fn build_report(
        &self,
        ticker: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<InternalReport>> {
        let ticker = ticker.trim();
        if ticker.is_empty() {
            return Ok(None);
        }

        let listing = self.market.fetch_listing().await?;

        let Some(code) = lookup::normalize_ticker(ticker, &listing) else {
            return Ok(None);
        };

        let kst = chrono::FixedOffset::east_opt(KST_OFFSET_SECS)
            .ok_or_else(|| anyhow::anyhow!("invalid KST offset"))?;
        let end = now.with_timezone(&kst).date_naive();
        let start = end - Duration::days(HISTORY_DAYS);

        let chart = self.market.fetch_daily_chart(&code, start, end).await?;

        let Some(snapshot) = snapshot::build_snapshot(&code, &listing, &chart.bars, chart.market_cap)
        else {
            return Ok(None);
        };

        let (metrics, financial_text) = self
            .resolver
            .resolve(&code, chart.metrics.clone(), snapshot.current_price as f64, now)
            .await;

        Ok(Some(assembler::assemble(
            snapshot,
            metrics,
            financial_text,
            now,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::filing::LineItem;
    use crate::domain::report::ValuationMetrics;
    use crate::ingest::provider::{DailyBar, DailyChart, ListingEntry};
    use anyhow::Result;
    use chrono::{NaiveDate, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockMarket {
        listing: Vec<ListingEntry>,
        bars: Vec<DailyBar>,
        market_cap: Option<i64>,
        metrics: ValuationMetrics,
        fail_chart: bool,
        fail_listing: bool,
    }

    impl MockMarket {
        fn for_005930() -> Self {
            Self {
                listing: vec![
                    ListingEntry {
                        code: "005930".to_string(),
                        name: "삼성전자".to_string(),
                        market_cap: None,
                    },
                    ListingEntry {
                        code: "000660".to_string(),
                        name: "SK하이닉스".to_string(),
                        market_cap: Some(1_000_000_000_000),
                    },
                ],
                bars: year_of_bars(70_000.0),
                market_cap: Some(4_000_000_000_000),
                metrics: ValuationMetrics::absent(),
                fail_chart: false,
                fail_listing: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl crate::ingest::provider::MarketDataProvider for MockMarket {
        fn provider_name(&self) -> &'static str {
            "mock"
        }

        async fn fetch_listing(&self) -> Result<Vec<ListingEntry>> {
            if self.fail_listing {
                anyhow::bail!("listing outage");
            }
            Ok(self.listing.clone())
        }

        async fn fetch_daily_chart(
            &self,
            _code: &str,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<DailyChart> {
            if self.fail_chart {
                anyhow::bail!("quote outage");
            }
            Ok(DailyChart {
                bars: self.bars.clone(),
                market_cap: self.market_cap,
                metrics: self.metrics.clone(),
            })
        }
    }

    struct MockFiling {
        items: Vec<LineItem>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl FilingProvider for MockFiling {
        fn provider_name(&self) -> &'static str {
            "mock"
        }

        async fn fetch_annual_financials(
            &self,
            _stock_code: &str,
            _year: i32,
        ) -> Result<Option<Vec<LineItem>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(self.items.clone()))
        }
    }

    /// 241 flat bars, then a final bar at `last_close` so the 1-year return
    /// is exactly +10% when the flat stretch sits at last_close / 1.1.
    fn year_of_bars(last_close: f64) -> Vec<DailyBar> {
        let start = NaiveDate::from_ymd_opt(2025, 8, 7).unwrap();
        let past = last_close / 1.1;
        let mut bars: Vec<DailyBar> = (0..241)
            .map(|i| DailyBar {
                date: start + chrono::Duration::days(i),
                close: past,
                high: past,
                low: past,
            })
            .collect();
        bars.push(DailyBar {
            date: start + chrono::Duration::days(241),
            close: last_close,
            high: last_close,
            low: past,
        });
        bars
    }

    fn filing_005930() -> Vec<LineItem> {
        vec![
            LineItem::new("당기순이익", Some(1_000.0), "FY2025"),
            LineItem::new("자본총계", Some(5_000.0), "FY2025"),
            LineItem::new("기본주당순이익", Some(100.0), "FY2025"),
        ]
    }

    fn service(market: MockMarket, filing: Option<MockFiling>) -> ReportService {
        ReportService::new(
            Arc::new(market),
            filing.map(|f| Arc::new(f) as Arc<dyn FilingProvider>),
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 7, 1, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn full_fallback_round_trip_renders_valuation_card() {
        let svc = service(
            MockMarket::for_005930(),
            Some(MockFiling {
                items: filing_005930(),
                calls: AtomicUsize::new(0),
            }),
        );

        let report = svc.build_report("005930", now()).await.unwrap().unwrap();
        assert_eq!(report.snapshot.current_price, 70_000);
        assert_eq!(report.metrics.per, Some(700.0));
        assert_eq!(report.metrics.pbr, Some(140.0));
        assert_eq!(report.metrics.roe, Some(20.0));
        assert_eq!(report.metrics.bps, Some(500));

        let v = formatter::success_response(&report).to_safe_json();
        let items = v["template"]["outputs"][3]["itemCard"]["itemList"]
            .as_array()
            .unwrap();
        assert_eq!(items[0]["description"], "700.0배");
        assert_eq!(items[2]["description"], "20.0%");
        assert_eq!(items[3]["description"], "EPS 100 / BPS 500");

        let summary = v["template"]["outputs"][0]["itemCard"]["itemList"]
            .as_array()
            .unwrap();
        assert_eq!(summary[0]["description"], "최근 1년 수익률: +10.00%");
    }

    #[tokio::test]
    async fn present_primary_metrics_skip_the_filing_entirely() {
        let mut market = MockMarket::for_005930();
        market.metrics = ValuationMetrics {
            eps: Some(5_777),
            ..Default::default()
        };
        let filing = MockFiling {
            items: filing_005930(),
            calls: AtomicUsize::new(0),
        };
        let calls_handle = Arc::new(filing);
        let svc = ReportService::new(
            Arc::new(market),
            Some(calls_handle.clone() as Arc<dyn FilingProvider>),
        );

        let report = svc.build_report("005930", now()).await.unwrap().unwrap();
        assert_eq!(report.metrics.eps, Some(5_777));
        assert_eq!(report.metrics.per, None);
        assert_eq!(calls_handle.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_and_unknown_tickers_are_missing_data() {
        let svc = service(MockMarket::for_005930(), None);
        assert!(svc.build_report("", now()).await.unwrap().is_none());
        assert!(svc.build_report("   ", now()).await.unwrap().is_none());
        assert!(svc.build_report("없는회사", now()).await.unwrap().is_none());

        let v = svc.generate_report("없는회사").await.to_safe_json();
        assert_eq!(v["version"], "2.0");
        assert!(v["template"]["outputs"][0]["simpleText"]["text"]
            .as_str()
            .unwrap()
            .contains("없는회사"));
    }

    #[tokio::test]
    async fn no_price_history_is_missing_data() {
        let mut market = MockMarket::for_005930();
        market.bars = Vec::new();
        let svc = service(market, None);
        assert!(svc.build_report("005930", now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn provider_outage_maps_to_error_response() {
        let mut market = MockMarket::for_005930();
        market.fail_chart = true;
        let svc = service(market, None);

        assert!(svc.build_report("005930", now()).await.is_err());

        let v = svc.generate_report("005930").await.to_safe_json();
        assert_eq!(v["version"], "2.0");
        assert!(v["template"].get("outputs").is_some());
        let text = v["template"]["outputs"][0]["simpleText"]["text"]
            .as_str()
            .unwrap();
        assert!(text.contains("문제가 발생했어요"));
        assert!(!text.contains("quote outage"));
    }

    #[tokio::test]
    async fn listing_outage_maps_to_error_response() {
        let mut market = MockMarket::for_005930();
        market.fail_listing = true;
        let svc = service(market, None);

        let v = svc.generate_report("삼성전자").await.to_safe_json();
        assert_eq!(v["version"], "2.0");
        assert!(v["template"]["outputs"][0].get("simpleText").is_some());
    }

    #[tokio::test]
    async fn name_input_resolves_through_the_listing() {
        let svc = service(MockMarket::for_005930(), None);
        let report = svc.build_report("SK하이닉스", now()).await.unwrap().unwrap();
        assert_eq!(report.ticker, "000660");
        assert_eq!(report.name, "SK하이닉스");
    }
}
