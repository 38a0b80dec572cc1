use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use std::collections::HashSet;
use uuid::Uuid;

/// Upsert one rendered card payload into the daily cache.
pub async fn upsert_cached_report(
    pool: &sqlx::PgPool,
    as_of_date: NaiveDate,
    ticker: &str,
    name: Option<&str>,
    report: &Value,
) -> anyhow::Result<()> {
    anyhow::ensure!(!ticker.trim().is_empty(), "ticker must be non-empty");

    sqlx::query(
        "INSERT INTO cached_reports (as_of_date, ticker, name, report, generated_at) \
         VALUES ($1, $2, $3, $4, now()) \
         ON CONFLICT (as_of_date, ticker) DO UPDATE \
           SET name = EXCLUDED.name, report = EXCLUDED.report, generated_at = EXCLUDED.generated_at",
    )
    .persistent(false)
    .bind(as_of_date)
    .bind(ticker.trim())
    .bind(name)
    .bind(report)
    .execute(pool)
    .await
    .context("upsert cached_reports failed")?;

    Ok(())
}

/// Tickers already cached for the date. Lets a re-run resume where the
/// previous one stopped.
pub async fn fetch_cached_tickers(
    pool: &sqlx::PgPool,
    as_of_date: NaiveDate,
) -> anyhow::Result<HashSet<String>> {
    let rows = sqlx::query_as::<_, (String,)>(
        "SELECT ticker FROM cached_reports WHERE as_of_date = $1",
    )
    .persistent(false)
    .bind(as_of_date)
    .fetch_all(pool)
    .await
    .context("select cached tickers failed")?;

    Ok(rows.into_iter().map(|(t,)| t).collect())
}

/// Most recent cached payload for one ticker, across dates.
pub async fn fetch_latest_cached(
    pool: &sqlx::PgPool,
    ticker: &str,
) -> anyhow::Result<Option<(NaiveDate, Value)>> {
    let row = sqlx::query_as::<_, (NaiveDate, Value)>(
        "SELECT as_of_date, report FROM cached_reports \
         WHERE ticker = $1 \
         ORDER BY as_of_date DESC \
         LIMIT 1",
    )
    .persistent(false)
    .bind(ticker)
    .fetch_optional(pool)
    .await
    .context("select latest cached report failed")?;

    Ok(row)
}

/// Terminal record of one batch run.
pub async fn record_batch_run(
    pool: &sqlx::PgPool,
    as_of_date: NaiveDate,
    status: &str,
    error: Option<&str>,
    processed: u64,
    succeeded: u64,
    failed: u64,
) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    let generated_at: DateTime<Utc> = Utc::now();

    sqlx::query(
        "INSERT INTO report_batch_runs (id, as_of_date, generated_at, status, error, processed, succeeded, failed) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .persistent(false)
    .bind(id)
    .bind(as_of_date)
    .bind(generated_at)
    .bind(status)
    .bind(error)
    .bind(processed as i64)
    .bind(succeeded as i64)
    .bind(failed as i64)
    .execute(pool)
    .await
    .context("insert report_batch_runs failed")?;

    Ok(id)
}
