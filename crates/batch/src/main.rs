use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jongmok_core::ingest::dart::{DartClient, FilingProvider};
use jongmok_core::ingest::kis::KisClient;
use jongmok_core::ingest::provider::MarketDataProvider;
use jongmok_core::report::{formatter, ReportService};
use jongmok_core::storage;

/// Daily batch: render one card report per listed instrument and cache the
/// payloads under the market as-of date. Re-runs resume past already-cached
/// tickers.
#[derive(Debug, Parser)]
#[command(name = "jongmok_batch")]
struct Args {
    /// Market as-of date (YYYY-MM-DD). Defaults to the current KST market
    /// date with close-time cutoff.
    #[arg(long)]
    as_of_date: Option<String>,

    /// Resolve the universe and report sizes without writing to the database.
    #[arg(long)]
    dry_run: bool,

    /// Cap the number of instruments processed this run.
    #[arg(long)]
    limit: Option<usize>,

    /// Delay between instruments, to stay polite to the upstream APIs.
    #[arg(long, default_value_t = 200)]
    delay_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = jongmok_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let as_of_date =
        jongmok_core::time::kr_market::resolve_as_of_date(args.as_of_date.as_deref(), chrono::Utc::now())?;

    let market: Arc<KisClient> = Arc::new(KisClient::from_settings(&settings)?);

    let filing: Option<Arc<dyn FilingProvider>> = if settings.dart_api_key.is_some() {
        Some(Arc::new(DartClient::from_settings(&settings)?))
    } else {
        tracing::info!("DART_API_KEY not set; filing fallback disabled for this run");
        None
    };

    let service = ReportService::new(market.clone(), filing);

    let mut universe: Vec<String> = market
        .fetch_listing()
        .await?
        .into_iter()
        .map(|entry| entry.code)
        .collect();
    universe.sort();
    universe.dedup();

    if let Some(limit) = args.limit {
        if universe.len() > limit {
            universe.truncate(limit);
        }
    }

    if args.dry_run {
        tracing::info!(
            %as_of_date,
            dry_run = true,
            universe_len = universe.len(),
            "dry-run: universe resolved, nothing written"
        );
        return Ok(());
    }

    let db_url = settings.require_database_url()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    storage::migrate(&pool).await?;

    let acquired = storage::lock::try_acquire_as_of_date_lock(&pool, as_of_date).await?;
    if !acquired {
        tracing::warn!(%as_of_date, "as_of_date lock not acquired; another run in progress");
        return Ok(());
    }

    let run_result = run_batch(&pool, &service, as_of_date, &universe, args.delay_ms).await;

    let _ = storage::lock::release_as_of_date_lock(&pool, as_of_date).await;

    match run_result {
        Ok(stats) => {
            let run_id = storage::reports::record_batch_run(
                &pool,
                as_of_date,
                "success",
                None,
                stats.processed,
                stats.succeeded,
                stats.failed,
            )
            .await?;
            tracing::info!(
                %as_of_date,
                %run_id,
                processed = stats.processed,
                succeeded = stats.succeeded,
                failed = stats.failed,
                "batch run complete"
            );
            Ok(())
        }
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            let _ = storage::reports::record_batch_run(
                &pool,
                as_of_date,
                "error",
                Some(&format!("{err:#}")),
                0,
                0,
                0,
            )
            .await;
            tracing::error!(%as_of_date, error = %format!("{err:#}"), "batch run failed");
            Err(err)
        }
    }
}

#[derive(Debug, Default)]
struct BatchStats {
    processed: u64,
    succeeded: u64,
    failed: u64,
}

async fn run_batch(
    pool: &sqlx::PgPool,
    service: &ReportService,
    as_of_date: chrono::NaiveDate,
    universe: &[String],
    delay_ms: u64,
) -> anyhow::Result<BatchStats> {
    let existing = storage::reports::fetch_cached_tickers(pool, as_of_date).await?;
    let remaining: Vec<&String> = universe.iter().filter(|t| !existing.contains(*t)).collect();

    tracing::info!(
        %as_of_date,
        universe = universe.len(),
        cached = existing.len(),
        remaining = remaining.len(),
        "batch starting"
    );

    let progress_every = std::env::var("BATCH_PROGRESS_EVERY")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(100);

    let delay = Duration::from_millis(delay_ms);
    let total = remaining.len();
    let mut stats = BatchStats::default();

    for (idx, ticker) in remaining.into_iter().enumerate() {
        if idx != 0 && delay_ms != 0 {
            tokio::time::sleep(delay).await;
        }

        stats.processed += 1;

        // The service is total: a missing instrument or an upstream outage
        // still yields a schema-valid payload worth caching for the channel.
        let (payload, name) = match service.build_report(ticker, chrono::Utc::now()).await {
            Ok(Some(report)) => {
                let name = report.name.clone();
                (formatter::success_response(&report), Some(name))
            }
            Ok(None) => (formatter::no_data_response(ticker), None),
            Err(err) => {
                tracing::warn!(ticker = %ticker, error = %format!("{err:#}"), "report failed; caching error card");
                (formatter::error_response(), None)
            }
        };

        match storage::reports::upsert_cached_report(
            pool,
            as_of_date,
            ticker,
            name.as_deref(),
            &payload.to_safe_json(),
        )
        .await
        {
            Ok(()) => stats.succeeded += 1,
            Err(err) => {
                stats.failed += 1;
                tracing::warn!(ticker = %ticker, error = %format!("{err:#}"), "cache upsert failed; continuing");
            }
        }

        if progress_every != 0 {
            let n = idx + 1;
            if n == 1 || n == total || (n % progress_every == 0) {
                tracing::info!(
                    processed = n,
                    total,
                    succeeded = stats.succeeded,
                    failed = stats.failed,
                    %as_of_date,
                    "batch progress"
                );
            }
        }
    }

    Ok(stats)
}

fn init_sentry(settings: &jongmok_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
