use crate::config::Settings;
use crate::domain::report::ValuationMetrics;
use crate::ingest::provider::{DailyBar, DailyChart, ListingEntry, MarketDataProvider};
use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone};
use encoding_rs::EUC_KR;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const PROD_BASE_URL: &str = "https://openapi.koreainvestment.com:9443";

const KOSPI_MASTER_ZIP: &str =
    "https://new.real.download.dws.co.kr/common/master/kospi_code.mst.zip";
const KOSDAQ_MASTER_ZIP: &str =
    "https://new.real.download.dws.co.kr/common/master/kosdaq_code.mst.zip";

// The daily item-chart endpoint caps one response at ~100 bars; a one-year
// history is fetched in calendar windows below that cap.
const CHART_WINDOW_DAYS: i64 = 120;

#[derive(Debug)]
pub struct KisClient {
    http: reqwest::Client,
    base_url: String,
    appkey: String,
    appsecret: String,
    req_delay: Duration,

    // Cache token and listing within a single process run. The master files
    // update once per day; the API process restart cycle is shorter than that.
    token_cache: tokio::sync::Mutex<Option<CachedToken>>,
    listing_cache: tokio::sync::Mutex<Option<Arc<Vec<ListingEntry>>>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: KisToken,
    fetched_at: chrono::DateTime<chrono::Utc>,
}

impl KisClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let appkey = settings.require_kis_appkey()?.to_string();
        let appsecret = settings.require_kis_appsecret()?.to_string();

        let base_url = settings
            .kis_base_url
            .clone()
            .unwrap_or_else(|| PROD_BASE_URL.to_string());
        let req_delay_ms = std::env::var("KIS_REQ_DELAY_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(150);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build KIS http client")?;

        Ok(Self {
            http,
            base_url,
            appkey,
            appsecret,
            req_delay: Duration::from_millis(req_delay_ms),
            token_cache: tokio::sync::Mutex::new(None),
            listing_cache: tokio::sync::Mutex::new(None),
        })
    }

    async fn get_access_token_cached(&self) -> Result<KisToken> {
        let mut guard = self.token_cache.lock().await;
        if let Some(cached) = guard.as_ref() {
            if !cached.token.is_expired_or_stale(cached.fetched_at) {
                return Ok(cached.token.clone());
            }
        }

        let fetched_at = chrono::Utc::now();
        let token = self.fetch_access_token().await?;
        *guard = Some(CachedToken {
            token: token.clone(),
            fetched_at,
        });
        Ok(token)
    }

    async fn fetch_access_token(&self) -> Result<KisToken> {
        let url = format!("{}/oauth2/tokenP", self.base_url.trim_end_matches('/'));
        let req = KisTokenRequest {
            grant_type: "client_credentials",
            appkey: &self.appkey,
            appsecret: &self.appsecret,
        };

        let res = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/plain")
            .header("charset", "UTF-8")
            .json(&req)
            .send()
            .await
            .context("KIS token request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read KIS token response")?;
        if !status.is_success() {
            anyhow::bail!("KIS token HTTP {status}: {text}");
        }

        serde_json::from_str::<KisToken>(&text).context("failed to parse KIS token response")
    }

    fn chart_headers(&self, token: &KisToken) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {}", token.access_token))?,
        );
        headers.insert("appkey", HeaderValue::from_str(&self.appkey)?);
        headers.insert("appsecret", HeaderValue::from_str(&self.appsecret)?);
        headers.insert("tr_id", HeaderValue::from_static("FHKST03010100"));
        headers.insert("custtype", HeaderValue::from_static("P"));
        headers.insert("tr_cont", HeaderValue::from_static(""));
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        headers.insert("Accept", HeaderValue::from_static("text/plain"));
        headers.insert("charset", HeaderValue::from_static("UTF-8"));
        Ok(headers)
    }

    async fn fetch_chart_window(
        &self,
        token: &KisToken,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<KisDailyItemChartPriceResponse> {
        let url = format!(
            "{}/uapi/domestic-stock/v1/quotations/inquire-daily-itemchartprice",
            self.base_url.trim_end_matches('/')
        );
        let headers = self.chart_headers(token)?;

        let start = start.format("%Y%m%d").to_string();
        let end = end.format("%Y%m%d").to_string();
        let params = [
            ("FID_COND_MRKT_DIV_CODE", "J"),
            ("FID_INPUT_ISCD", code),
            ("FID_INPUT_DATE_1", start.as_str()),
            ("FID_INPUT_DATE_2", end.as_str()),
            ("FID_PERIOD_DIV_CODE", "D"),
            ("FID_ORG_ADJ_PRC", "1"),
        ];

        let max_attempts: u32 = 3;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            let res = self
                .http
                .get(url.clone())
                .headers(headers.clone())
                .query(&params)
                .send()
                .await;

            let res = match res {
                Ok(r) => r,
                Err(err) => {
                    if attempt >= max_attempts {
                        return Err(err).context("KIS daily itemchartprice request failed");
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(
                        attempt,
                        ?backoff,
                        ticker = %code,
                        error = %err,
                        "KIS daily request failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            };

            let status = res.status();
            let text = res
                .text()
                .await
                .context("failed to read KIS daily response")?;

            if !status.is_success() {
                let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                if retryable && attempt < max_attempts {
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(
                        attempt,
                        ?backoff,
                        ticker = %code,
                        http_status = %status,
                        "KIS daily HTTP error; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                anyhow::bail!("KIS daily itemchartprice HTTP {status}: {text}");
            }

            match serde_json::from_str::<KisDailyItemChartPriceResponse>(&text) {
                Ok(body) => return Ok(body),
                Err(err) => {
                    if attempt >= max_attempts {
                        return Err(err).context("failed to parse KIS daily itemchartprice response");
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(
                        attempt,
                        ?backoff,
                        ticker = %code,
                        error = %err,
                        "KIS daily response parse failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for KisClient {
    fn provider_name(&self) -> &'static str {
        "kis"
    }

    async fn fetch_listing(&self) -> Result<Vec<ListingEntry>> {
        {
            let guard = self.listing_cache.lock().await;
            if let Some(cached) = guard.as_ref() {
                return Ok(cached.as_ref().clone());
            }
        }

        let mut out = Vec::new();
        for url in [KOSPI_MASTER_ZIP, KOSDAQ_MASTER_ZIP] {
            out.extend(fetch_and_parse_master_zip(&self.http, url).await?);
        }
        anyhow::ensure!(!out.is_empty(), "KIS master listing is empty");

        let mut guard = self.listing_cache.lock().await;
        *guard = Some(Arc::new(out.clone()));
        Ok(out)
    }

    async fn fetch_daily_chart(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<DailyChart> {
        anyhow::ensure!(start <= end, "chart start {start} is after end {end}");
        let token = self.get_access_token_cached().await?;

        let mut bars = BTreeMap::<NaiveDate, DailyBar>::new();
        let mut summary: Option<KisChartSummary> = None;

        let mut window_start = start;
        let mut first = true;
        while window_start <= end {
            if !first {
                tokio::time::sleep(self.req_delay).await;
            }
            first = false;

            let window_end = (window_start + ChronoDuration::days(CHART_WINDOW_DAYS - 1)).min(end);
            let body = self
                .fetch_chart_window(&token, code, window_start, window_end)
                .await?;

            for bar in &body.output2 {
                let Some(parsed) = parse_bar(bar) else {
                    continue;
                };
                bars.insert(parsed.date, parsed);
            }
            if body.output1.is_some() {
                // Later windows are more recent; keep the last summary seen.
                summary = body.output1;
            }

            window_start = window_end + ChronoDuration::days(1);
        }

        let (market_cap, metrics) = match summary {
            Some(s) => (s.market_cap(), s.into_metrics()),
            None => (None, ValuationMetrics::absent()),
        };

        Ok(DailyChart {
            bars: bars.into_values().collect(),
            market_cap,
            metrics,
        })
    }
}

fn parse_bar(bar: &KisDailyBar) -> Option<DailyBar> {
    let date = NaiveDate::parse_from_str(bar.stck_bsop_date.trim(), "%Y%m%d").ok()?;
    Some(DailyBar {
        date,
        close: parse_num(&bar.stck_clpr)?,
        high: parse_num(&bar.stck_hgpr)?,
        low: parse_num(&bar.stck_lwpr)?,
    })
}

#[derive(Debug, Serialize)]
struct KisTokenRequest<'a> {
    grant_type: &'a str,
    appkey: &'a str,
    appsecret: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KisToken {
    pub access_token: String,
    #[serde(default)]
    pub access_token_token_expired: String,

    #[serde(default)]
    pub expires_in: u64,
}

impl KisToken {
    fn is_expired_or_stale(&self, fetched_at: chrono::DateTime<chrono::Utc>) -> bool {
        // Prefer the server-provided absolute expiry when available.
        if let Some(exp) = parse_kis_expiry_utc(&self.access_token_token_expired) {
            // Refresh a bit early to avoid edge races.
            return chrono::Utc::now() + chrono::Duration::minutes(2) >= exp;
        }

        if self.expires_in > 0 {
            let exp = fetched_at + chrono::Duration::seconds(self.expires_in as i64);
            return chrono::Utc::now() + chrono::Duration::minutes(2) >= exp;
        }

        // Unknown expiry counts as stale.
        true
    }
}

fn parse_kis_expiry_utc(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }

    // Observed format: "YYYY-MM-DD HH:MM:SS" (KST). Convert to UTC.
    let naive = chrono::NaiveDateTime::parse_from_str(t, "%Y-%m-%d %H:%M:%S").ok()?;
    let kst = chrono::FixedOffset::east_opt(9 * 3600)?;
    let dt = kst.from_local_datetime(&naive).single()?;
    Some(dt.with_timezone(&chrono::Utc))
}

#[derive(Debug, Clone, Deserialize)]
struct KisDailyItemChartPriceResponse {
    #[serde(default)]
    output1: Option<KisChartSummary>,
    #[serde(default)]
    output2: Vec<KisDailyBar>,
}

/// `output1` of FHKST03010100: instrument-level summary figures.
#[derive(Debug, Clone, Deserialize)]
struct KisChartSummary {
    #[serde(default)]
    hts_avls: String,
    #[serde(default)]
    per: String,
    #[serde(default)]
    pbr: String,
    #[serde(default)]
    eps: String,
}

impl KisChartSummary {
    fn market_cap(&self) -> Option<i64> {
        // hts_avls is quoted in hundred-million-won units.
        parse_num(&self.hts_avls).map(|v| (v * 100_000_000.0) as i64)
    }

    fn into_metrics(self) -> ValuationMetrics {
        ValuationMetrics {
            per: parse_num(&self.per),
            pbr: parse_num(&self.pbr),
            roe: None,
            eps: parse_num(&self.eps).map(|v| v as i64),
            bps: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct KisDailyBar {
    #[serde(default)]
    stck_bsop_date: String,
    #[serde(default)]
    stck_clpr: String,
    #[serde(default)]
    stck_hgpr: String,
    #[serde(default)]
    stck_lwpr: String,
}

#[derive(Debug, Clone)]
struct KisMasterRecord {
    code: String,
    name: String,
}

fn parse_num(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    t.parse::<f64>().ok()
}

async fn fetch_and_parse_master_zip(
    http: &reqwest::Client,
    url: &str,
) -> Result<Vec<ListingEntry>> {
    let res = http
        .get(url)
        .send()
        .await
        .context("master zip download failed")?;
    let status = res.status();
    let bytes = res.bytes().await.context("read master zip bytes failed")?;
    if !status.is_success() {
        anyhow::bail!("master zip HTTP {status}");
    }

    let bytes_vec = bytes.to_vec();
    let records = tokio::task::spawn_blocking(move || unzip_and_parse_master(&bytes_vec))
        .await
        .context("join unzip task failed")??;

    // The master file carries no market cap; that figure comes from the daily
    // chart summary per instrument.
    Ok(records
        .into_iter()
        .map(|r| ListingEntry {
            code: r.code,
            name: r.name,
            market_cap: None,
        })
        .collect())
}

fn unzip_and_parse_master(zip_bytes: &[u8]) -> Result<Vec<KisMasterRecord>> {
    use std::io::{Cursor, Read};

    let reader = Cursor::new(zip_bytes);
    let mut zip = zip::ZipArchive::new(reader).context("open zip archive failed")?;
    anyhow::ensure!(zip.len() >= 1, "zip has no entries");

    let mut mst_idx: Option<usize> = None;
    for i in 0..zip.len() {
        let name = {
            let f = zip.by_index(i).context("open zip entry failed")?;
            f.name().to_string()
        };
        if name.to_ascii_lowercase().ends_with(".mst") {
            mst_idx = Some(i);
            break;
        }
    }
    let idx = mst_idx.unwrap_or(0);

    let mut file = zip.by_index(idx).context("open zip entry failed")?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).context("read zip entry failed")?;

    parse_master_lines(&buf)
}

fn parse_master_lines(buf: &[u8]) -> Result<Vec<KisMasterRecord>> {
    let mut out = Vec::new();
    for line in buf.split(|b| *b == b'\n') {
        let line = if line.last().copied() == Some(b'\r') {
            &line[..line.len().saturating_sub(1)]
        } else {
            line
        };
        if line.len() < 6 {
            continue;
        }

        let code_bytes = &line[0..6];
        if !code_bytes.iter().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let code = std::str::from_utf8(code_bytes).unwrap_or("").to_string();

        // After the 6-digit code: spaces, then a fixed-width (12 byte) ISIN,
        // then the issuer name, then a market marker (ST...).
        let mut i = 6;
        while i < line.len() && line[i].is_ascii_whitespace() {
            i += 1;
        }

        let isin_start = i;
        let name_start = if line.len() >= isin_start + 12 {
            isin_start + 12
        } else {
            while i < line.len() && !line[i].is_ascii_whitespace() {
                i += 1;
            }
            i
        };

        if name_start >= line.len() {
            continue;
        }

        let after_name = &line[name_start..];
        let st_pos = find_st_marker(after_name).unwrap_or(after_name.len());
        let name = decode_euc_kr_trim(&after_name[..st_pos]);
        if name.is_empty() {
            continue;
        }

        out.push(KisMasterRecord { code, name });
    }
    Ok(out)
}

fn find_st_marker(bytes: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'S' && bytes[i + 1] == b'T' {
            // Heuristic: require preceding space.
            if i == 0 || bytes[i - 1].is_ascii_whitespace() {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

fn decode_euc_kr_trim(bytes: &[u8]) -> String {
    // Trim ASCII whitespace and NULs.
    let mut start = 0;
    let mut end = bytes.len();
    while start < end && (bytes[start].is_ascii_whitespace() || bytes[start] == 0) {
        start += 1;
    }
    while end > start && (bytes[end - 1].is_ascii_whitespace() || bytes[end - 1] == 0) {
        end -= 1;
    }
    let slice = &bytes[start..end];

    let (cow, _, _) = EUC_KR.decode(slice);
    cow.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_master_line_with_code_prefix() {
        // Minimal synthetic line similar to: "005930   KR7005930003...<name>...ST..."
        let mut line = b"005930   KR7005930003".to_vec();
        let (name_bytes, _, _) = EUC_KR.encode("삼성전자");
        line.extend_from_slice(&name_bytes);
        line.extend_from_slice(b"                ST1002700\n");

        let parsed = parse_master_lines(&line).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].code, "005930");
        assert_eq!(parsed[0].name, "삼성전자");
    }

    #[test]
    fn parses_token_expiry_fields() {
        let s = r#"{
            "access_token": "secret",
            "token_type": "Bearer",
            "expires_in": 86400,
            "access_token_token_expired": "2026-01-30 05:00:44"
        }"#;

        let tok: KisToken = serde_json::from_str(s).unwrap();
        assert_eq!(tok.expires_in, 86400);
        assert_eq!(tok.access_token, "secret");
        let dt = parse_kis_expiry_utc(&tok.access_token_token_expired).unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-01-29T20:00:44+00:00");
    }

    #[test]
    fn chart_summary_maps_into_partial_metrics() {
        let s = KisChartSummary {
            hts_avls: "4100000".to_string(),
            per: "12.53".to_string(),
            pbr: "1.41".to_string(),
            eps: "5777".to_string(),
        };
        assert_eq!(s.market_cap(), Some(410_000_000_000_000));
        let m = s.into_metrics();
        assert_eq!(m.per, Some(12.53));
        assert_eq!(m.pbr, Some(1.41));
        assert_eq!(m.eps, Some(5777));
        assert_eq!(m.roe, None);
        assert_eq!(m.bps, None);
        assert!(m.has_any());
    }

    #[test]
    fn blank_summary_maps_to_absent_metrics() {
        let s = KisChartSummary {
            hts_avls: String::new(),
            per: " ".to_string(),
            pbr: String::new(),
            eps: String::new(),
        };
        assert_eq!(s.market_cap(), None);
        assert!(!s.into_metrics().has_any());
    }

    #[test]
    fn parses_daily_bar_fields() {
        let bar = KisDailyBar {
            stck_bsop_date: "20260115".to_string(),
            stck_clpr: "70000".to_string(),
            stck_hgpr: "71200".to_string(),
            stck_lwpr: "69400".to_string(),
        };
        let parsed = parse_bar(&bar).unwrap();
        assert_eq!(parsed.date, NaiveDate::from_ymd_opt(2026, 1, 15).unwrap());
        assert_eq!(parsed.close, 70_000.0);
        assert_eq!(parsed.high, 71_200.0);
        assert_eq!(parsed.low, 69_400.0);
    }

    #[test]
    fn skips_bars_with_unparseable_close() {
        let bar = KisDailyBar {
            stck_bsop_date: "20260115".to_string(),
            stck_clpr: String::new(),
            stck_hgpr: "71200".to_string(),
            stck_lwpr: "69400".to_string(),
        };
        assert!(parse_bar(&bar).is_none());
    }
}
