use crate::config::Settings;
use crate::domain::filing::LineItem;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://opendart.fss.or.kr";

// Annual business report, consolidated statements.
const REPRT_CODE_ANNUAL: &str = "11011";
const FS_DIV_CONSOLIDATED: &str = "CFS";

// DART status code for "no data for this filter".
const STATUS_OK: &str = "000";
const STATUS_NO_DATA: &str = "013";

/// Statutory-filing lookup capability. Constructed once at process start when
/// a credential is present; callers receive it as an `Option` and treat the
/// unconfigured case as "no filing data".
#[async_trait::async_trait]
pub trait FilingProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Line items of the annual consolidated statements for one fiscal year,
    /// or `None` when the issuer has no such filing.
    async fn fetch_annual_financials(
        &self,
        stock_code: &str,
        year: i32,
    ) -> Result<Option<Vec<LineItem>>>;
}

#[derive(Debug)]
pub struct DartClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,

    // The corp-code table (stock code -> DART corp code) is a daily-updated
    // bulk file; fetch it once per process run.
    corp_codes: tokio::sync::Mutex<Option<Arc<HashMap<String, String>>>>,
}

impl DartClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let api_key = settings.require_dart_api_key()?.to_string();
        let base_url = settings
            .dart_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let timeout_secs = std::env::var("DART_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(30);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build DART http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            corp_codes: tokio::sync::Mutex::new(None),
        })
    }

    async fn corp_code_for(&self, stock_code: &str) -> Result<Option<String>> {
        let table = self.corp_code_table().await?;
        Ok(table.get(stock_code).cloned())
    }

    async fn corp_code_table(&self) -> Result<Arc<HashMap<String, String>>> {
        {
            let guard = self.corp_codes.lock().await;
            if let Some(cached) = guard.as_ref() {
                return Ok(cached.clone());
            }
        }

        let url = format!(
            "{}/api/corpCode.xml?crtfc_key={}",
            self.base_url.trim_end_matches('/'),
            self.api_key
        );
        let res = self
            .http
            .get(url)
            .send()
            .await
            .context("DART corpCode request failed")?;
        let status = res.status();
        let bytes = res
            .bytes()
            .await
            .context("failed to read DART corpCode response")?;
        if !status.is_success() {
            anyhow::bail!("DART corpCode HTTP {status}");
        }

        let bytes_vec = bytes.to_vec();
        let table = tokio::task::spawn_blocking(move || unzip_and_parse_corp_codes(&bytes_vec))
            .await
            .context("join corpCode unzip task failed")??;
        anyhow::ensure!(!table.is_empty(), "DART corpCode table is empty");

        tracing::info!(entries = table.len(), "loaded DART corp code table");

        let table = Arc::new(table);
        let mut guard = self.corp_codes.lock().await;
        *guard = Some(table.clone());
        Ok(table)
    }
}

#[async_trait::async_trait]
impl FilingProvider for DartClient {
    fn provider_name(&self) -> &'static str {
        "dart"
    }

    async fn fetch_annual_financials(
        &self,
        stock_code: &str,
        year: i32,
    ) -> Result<Option<Vec<LineItem>>> {
        let Some(corp_code) = self.corp_code_for(stock_code).await? else {
            tracing::debug!(ticker = %stock_code, "no DART corp code for stock code");
            return Ok(None);
        };

        let url = format!(
            "{}/api/fnlttSinglAcntAll.json",
            self.base_url.trim_end_matches('/')
        );
        let res = self
            .http
            .get(url)
            .query(&[
                ("crtfc_key", self.api_key.as_str()),
                ("corp_code", corp_code.as_str()),
                ("bsns_year", &year.to_string()),
                ("reprt_code", REPRT_CODE_ANNUAL),
                ("fs_div", FS_DIV_CONSOLIDATED),
            ])
            .send()
            .await
            .context("DART financials request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read DART financials response")?;
        if !status.is_success() {
            anyhow::bail!("DART financials HTTP {status}: {text}");
        }

        let body = serde_json::from_str::<DartFinancialsResponse>(&text)
            .with_context(|| format!("failed to parse DART financials response: {text}"))?;

        match body.status.as_str() {
            STATUS_OK => {}
            STATUS_NO_DATA => return Ok(None),
            other => anyhow::bail!("DART financials status {other}: {}", body.message),
        }

        let period = format!("FY{year}");
        let items: Vec<LineItem> = body
            .list
            .into_iter()
            .map(|row| LineItem::new(row.account_nm.trim(), parse_amount(&row.thstrm_amount), &period))
            .collect();

        if items.is_empty() {
            return Ok(None);
        }
        Ok(Some(items))
    }
}

#[derive(Debug, Deserialize)]
struct DartFinancialsResponse {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    list: Vec<DartAccountRow>,
}

#[derive(Debug, Deserialize)]
struct DartAccountRow {
    #[serde(default)]
    account_nm: String,
    #[serde(default)]
    thstrm_amount: String,
}

fn parse_amount(s: &str) -> Option<f64> {
    let t: String = s.trim().chars().filter(|c| *c != ',').collect();
    if t.is_empty() {
        return None;
    }
    t.parse::<f64>().ok()
}

fn unzip_and_parse_corp_codes(zip_bytes: &[u8]) -> Result<HashMap<String, String>> {
    use std::io::{Cursor, Read};

    let reader = Cursor::new(zip_bytes);
    let mut zip = zip::ZipArchive::new(reader).context("open corpCode zip failed")?;
    anyhow::ensure!(zip.len() >= 1, "corpCode zip has no entries");

    let mut xml_idx: Option<usize> = None;
    for i in 0..zip.len() {
        let name = {
            let f = zip.by_index(i).context("open corpCode zip entry failed")?;
            f.name().to_string()
        };
        if name.to_ascii_lowercase().ends_with(".xml") {
            xml_idx = Some(i);
            break;
        }
    }
    let idx = xml_idx.unwrap_or(0);

    let mut file = zip.by_index(idx).context("open corpCode zip entry failed")?;
    let mut xml = String::new();
    file.read_to_string(&mut xml)
        .context("read corpCode xml failed")?;

    Ok(parse_corp_code_xml(&xml))
}

// The corpCode file is a flat list of <list> blocks with fixed child tags; a
// plain tag scan is enough, the way the KIS master file is scanned byte-wise.
fn parse_corp_code_xml(xml: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for block in xml.split("<list>").skip(1) {
        let Some(corp_code) = tag_text(block, "corp_code") else {
            continue;
        };
        let Some(stock_code) = tag_text(block, "stock_code") else {
            continue;
        };
        let stock_code = stock_code.trim();
        // Unlisted issuers carry a blank stock code.
        if stock_code.len() != 6 || !stock_code.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        out.insert(stock_code.to_string(), corp_code.trim().to_string());
    }
    out
}

fn tag_text<'a>(block: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = block.find(&open)? + open.len();
    let end = block[start..].find(&close)? + start;
    Some(&block[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_corp_code_blocks_and_skips_unlisted() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<result>
  <list>
    <corp_code>00126380</corp_code>
    <corp_name>삼성전자</corp_name>
    <stock_code>005930</stock_code>
    <modify_date>20260101</modify_date>
  </list>
  <list>
    <corp_code>00999999</corp_code>
    <corp_name>비상장회사</corp_name>
    <stock_code> </stock_code>
    <modify_date>20260101</modify_date>
  </list>
</result>"#;

        let table = parse_corp_code_xml(xml);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("005930").map(String::as_str), Some("00126380"));
    }

    #[test]
    fn parses_comma_separated_amounts() {
        assert_eq!(parse_amount("1,234,567"), Some(1_234_567.0));
        assert_eq!(parse_amount("-5,000"), Some(-5_000.0));
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("n/a"), None);
    }

    #[test]
    fn no_data_status_maps_to_none() {
        let text = r#"{"status":"013","message":"조회된 데이타가 없습니다."}"#;
        let body: DartFinancialsResponse = serde_json::from_str(text).unwrap();
        assert_eq!(body.status, STATUS_NO_DATA);
        assert!(body.list.is_empty());
    }

    #[test]
    fn account_rows_map_to_line_items() {
        let text = r#"{
            "status": "000",
            "message": "정상",
            "list": [
                {"account_nm": " 자본총계 ", "thstrm_amount": "5,000"},
                {"account_nm": "기본주당순이익", "thstrm_amount": ""}
            ]
        }"#;
        let body: DartFinancialsResponse = serde_json::from_str(text).unwrap();
        assert_eq!(body.status, STATUS_OK);
        assert_eq!(body.list.len(), 2);
        assert_eq!(parse_amount(&body.list[0].thstrm_amount), Some(5_000.0));
        assert_eq!(parse_amount(&body.list[1].thstrm_amount), None);
    }
}
