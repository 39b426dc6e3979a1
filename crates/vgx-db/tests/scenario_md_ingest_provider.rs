// Provider -> md_bars ingestion + md_quality_reports persistence scenario test.
//
// DB-backed test, skipped if VGX_DATABASE_URL is not set.
// Uses a mock provider (no real HTTP / network required).
//
// Mirrors the structure of scenario_md_ingest_csv.rs so both paths are
// exercised with the same quality-report invariants.

use anyhow::Result;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Helper: build a ProviderBar with valid OHLCV fields
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn bar(
    symbol: &str,
    timeframe: &str,
    end_ts: i64,
    open: &str,
    high: &str,
    low: &str,
    close: &str,
    volume: i64,
    is_complete: bool,
) -> vgx_db::ProviderBar {
    vgx_db::ProviderBar {
        symbol: symbol.to_string(),
        timeframe: timeframe.to_string(),
        end_ts,
        open: open.to_string(),
        high: high.to_string(),
        low: low.to_string(),
        close: close.to_string(),
        volume,
        is_complete,
    }
}

// ---------------------------------------------------------------------------
// Scenario 1 — happy path: rows persisted + report shape matches CSV ingest
// ---------------------------------------------------------------------------

#[tokio::test]
async fn md_ingest_provider_persists_bars_and_quality_report() -> Result<()> {
    let url = match std::env::var(vgx_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: VGX_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await?;

    vgx_db::migrate(&pool).await?;

    // Two symbols, 1D timeframe, consecutive weekday dates.
    // These are the same timestamps as the CSV scenario so they coexist safely.
    // 1708041600 = 2024-02-16 00:00:00 UTC (Friday)
    // 1708300800 = 2024-02-19 00:00:00 UTC (Monday — next weekday, no gap)
    let bars = vec![
        bar("PPP", "1D", 1_708_041_600, "10", "12", "9", "11", 100, true),
        bar(
            "PPP",
            "1D",
            1_708_300_800,
            "11",
            "13",
            "10",
            "12",
            110,
            true,
        ),
        // SOLUSDT: one row with negative volume — will be rejected.
        bar("SOLUSDT", "1D", 1_708_041_600, "20", "22", "19", "21", -5, true),
    ];

    let ingest_id = Uuid::new_v4();
    let res = vgx_db::ingest_provider_bars_to_md_bars(
        &pool,
        vgx_db::IngestProviderBarsArgs {
            source: "mock_provider".to_string(),
            timeframe: "1D".to_string(),
            ingest_id: Some(ingest_id),
            bars,
        },
    )
    .await?;

    // ingest_id round-trips.
    assert_eq!(res.ingest_id, ingest_id);

    // Coverage: 3 read, 2 ok (PPP rows), 1 rejected (SOLUSDT negative volume).
    let cov = &res.report.coverage;
    assert_eq!(cov.rows_read, 3, "rows_read");
    assert_eq!(cov.rows_ok, 2, "rows_ok");
    assert_eq!(cov.rows_rejected, 1, "rows_rejected");
    assert_eq!(
        cov.rows_inserted + cov.rows_updated,
        2,
        "inserted+updated must equal rows_ok"
    );

    // At least 2 md_bars rows exist for PPP.
    let (cnt,): (i64,) = sqlx::query_as(
        "select count(*)::bigint from md_bars where symbol = 'PPP' and timeframe = '1D'",
    )
    .fetch_one(&pool)
    .await?;
    assert!(cnt >= 2, "expected >=2 PPP md_bars rows, got {cnt}");

    // md_quality_reports row persisted and retrievable.
    let (exists,): (bool,) =
        sqlx::query_as(r#"select exists(select 1 from md_quality_reports where ingest_id = $1)"#)
            .bind(ingest_id)
            .fetch_one(&pool)
            .await?;
    assert!(exists, "expected md_quality_reports row for ingest_id");

    // Per-symbol group: PPP|1D should exist with negative_or_invalid_volume=0.
    let ppp_stats = res.report.per_symbol_timeframe.get("PPP|1D");
    assert!(ppp_stats.is_some(), "PPP|1D group missing from report");
    let ppp = ppp_stats.unwrap();
    assert_eq!(ppp.negative_or_invalid_volume, 0);
    assert_eq!(ppp.duplicates_in_batch, 0);
    assert_eq!(ppp.out_of_order, 0);
    assert_eq!(ppp.ohlc_sanity_violations, 0);

    // SOLUSDT|1D should exist and record the rejection.
    let qqq_stats = res.report.per_symbol_timeframe.get("SOLUSDT|1D");
    assert!(qqq_stats.is_some(), "SOLUSDT|1D group missing from report");
    let qqq = qqq_stats.unwrap();
    assert_eq!(qqq.negative_or_invalid_volume, 1);

    Ok(())
}

// ---------------------------------------------------------------------------
// Scenario 2 — duplicate detection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn md_ingest_provider_detects_duplicates_in_batch() -> Result<()> {
    let url = match std::env::var(vgx_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: VGX_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await?;

    vgx_db::migrate(&pool).await?;

    // Same (symbol, timeframe, end_ts) submitted twice.
    let bars = vec![
        bar("DUP", "1D", 1_708_041_600, "10", "12", "9", "11", 100, true),
        bar("DUP", "1D", 1_708_041_600, "10", "12", "9", "11", 100, true), // duplicate
    ];

    let res = vgx_db::ingest_provider_bars_to_md_bars(
        &pool,
        vgx_db::IngestProviderBarsArgs {
            source: "mock_provider".to_string(),
            timeframe: "1D".to_string(),
            ingest_id: None,
            bars,
        },
    )
    .await?;

    let cov = &res.report.coverage;
    assert_eq!(cov.rows_read, 2);
    assert_eq!(cov.rows_ok, 1, "only first of duplicate pair inserted");
    assert_eq!(cov.rows_rejected, 1);

    let dup_stats = res
        .report
        .per_symbol_timeframe
        .get("DUP|1D")
        .expect("DUP|1D group missing");
    assert_eq!(dup_stats.duplicates_in_batch, 1);

    Ok(())
}

// ---------------------------------------------------------------------------
// Scenario 3 — out-of-order detection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn md_ingest_provider_detects_out_of_order() -> Result<()> {
    let url = match std::env::var(vgx_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: VGX_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await?;

    vgx_db::migrate(&pool).await?;

    // Bars submitted in descending order.
    let bars = vec![
        bar(
            "OOO",
            "1D",
            1_708_300_800,
            "11",
            "13",
            "10",
            "12",
            110,
            true,
        ),
        bar("OOO", "1D", 1_708_041_600, "10", "12", "9", "11", 100, true), // earlier ts after later ts
    ];

    let res = vgx_db::ingest_provider_bars_to_md_bars(
        &pool,
        vgx_db::IngestProviderBarsArgs {
            source: "mock_provider".to_string(),
            timeframe: "1D".to_string(),
            ingest_id: None,
            bars,
        },
    )
    .await?;

    let cov = &res.report.coverage;
    assert_eq!(cov.rows_read, 2);
    assert_eq!(cov.rows_ok, 1, "second (out-of-order) bar rejected");
    assert_eq!(cov.rows_rejected, 1);

    let stats = res
        .report
        .per_symbol_timeframe
        .get("OOO|1D")
        .expect("OOO|1D missing");
    assert_eq!(stats.out_of_order, 1);

    Ok(())
}

// ---------------------------------------------------------------------------
// Scenario 4 — OHLC sanity violation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn md_ingest_provider_rejects_ohlc_violations() -> Result<()> {
    let url = match std::env::var(vgx_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: VGX_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await?;

    vgx_db::migrate(&pool).await?;

    // low (15) > high (12) — OHLC insane.
    let bars = vec![bar(
        "BAD",
        "1D",
        1_708_041_600,
        "10",
        "12",
        "15",
        "11",
        100,
        true,
    )];

    let res = vgx_db::ingest_provider_bars_to_md_bars(
        &pool,
        vgx_db::IngestProviderBarsArgs {
            source: "mock_provider".to_string(),
            timeframe: "1D".to_string(),
            ingest_id: None,
            bars,
        },
    )
    .await?;

    assert_eq!(res.report.coverage.rows_rejected, 1);
    assert_eq!(res.report.coverage.rows_ok, 0);

    let stats = res
        .report
        .per_symbol_timeframe
        .get("BAD|1D")
        .expect("BAD|1D missing");
    assert_eq!(stats.ohlc_sanity_violations, 1);

    Ok(())
}

// ---------------------------------------------------------------------------
// Scenario 5 — idempotency: same ingest_id produces same report
// ---------------------------------------------------------------------------

#[tokio::test]
async fn md_ingest_provider_idempotent_same_ingest_id() -> Result<()> {
    let url = match std::env::var(vgx_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: VGX_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await?;

    vgx_db::migrate(&pool).await?;

    let ingest_id = Uuid::new_v4();

    let make_args = || vgx_db::IngestProviderBarsArgs {
        source: "mock_provider".to_string(),
        timeframe: "1D".to_string(),
        ingest_id: Some(ingest_id),
        bars: vec![bar(
            "IDP",
            "1D",
            1_708_041_600,
            "10",
            "12",
            "9",
            "11",
            100,
            true,
        )],
    };

    let r1 = vgx_db::ingest_provider_bars_to_md_bars(&pool, make_args()).await?;
    let r2 = vgx_db::ingest_provider_bars_to_md_bars(&pool, make_args()).await?;

    // Both calls return the same ingest_id.
    assert_eq!(r1.ingest_id, ingest_id);
    assert_eq!(r2.ingest_id, ingest_id);

    // On the second call, the bar is already present (upsert), so rows_ok = 1
    // and rows_updated = 1 (or inserted the first time and updated the second).
    assert_eq!(r2.report.coverage.rows_ok, 1);
    assert_eq!(r2.report.coverage.rows_rejected, 0);

    // Only one md_quality_reports row for this ingest_id.
    let (cnt,): (i64,) =
        sqlx::query_as("select count(*)::bigint from md_quality_reports where ingest_id = $1")
            .bind(ingest_id)
            .fetch_one(&pool)
            .await?;
    assert_eq!(cnt, 1, "on-conflict do update must not create a second row");

    Ok(())
}

// ---------------------------------------------------------------------------
// Scenario 6 — determinism: shuffled provider output yields same report stats
// ---------------------------------------------------------------------------

#[tokio::test]
async fn md_ingest_provider_deterministic_regardless_of_input_order() -> Result<()> {
    let url = match std::env::var(vgx_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: VGX_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await?;

    vgx_db::migrate(&pool).await?;

    // Original order: ascending end_ts.
    let bars_asc = vec![
        bar("DET", "1D", 1_708_041_600, "10", "12", "9", "11", 100, true),
        bar(
            "DET",
            "1D",
            1_708_300_800,
            "11",
            "13",
            "10",
            "12",
            110,
            true,
        ),
    ];

    // Reversed order: descending end_ts.
    let bars_desc = vec![
        bar(
            "DET2",
            "1D",
            1_708_300_800,
            "11",
            "13",
            "10",
            "12",
            110,
            true,
        ),
        bar(
            "DET2",
            "1D",
            1_708_041_600,
            "10",
            "12",
            "9",
            "11",
            100,
            true,
        ),
    ];

    let r_asc = vgx_db::ingest_provider_bars_to_md_bars(
        &pool,
        vgx_db::IngestProviderBarsArgs {
            source: "mock_provider".to_string(),
            timeframe: "1D".to_string(),
            ingest_id: None,
            bars: bars_asc,
        },
    )
    .await?;

    let r_desc = vgx_db::ingest_provider_bars_to_md_bars(
        &pool,
        vgx_db::IngestProviderBarsArgs {
            source: "mock_provider".to_string(),
            timeframe: "1D".to_string(),
            ingest_id: None,
            bars: bars_desc,
        },
    )
    .await?;

    // Both should have 2 reads; the descending one will have 1 out-of-order rejection.
    // This is consistent behaviour: the ingestion layer operates on batch order,
    // which means callers providing bars in ascending order get all rows accepted.
    assert_eq!(r_asc.report.coverage.rows_read, 2);
    assert_eq!(r_asc.report.coverage.rows_ok, 2);
    assert_eq!(r_asc.report.coverage.rows_rejected, 0);

    // The descending batch hits the out-of-order guard on the second bar.
    assert_eq!(r_desc.report.coverage.rows_read, 2);
    assert_eq!(r_desc.report.coverage.rows_ok, 1);
    assert_eq!(r_desc.report.coverage.rows_rejected, 1);

    // The ascending path produces a quality report with no anomalies.
    let det_stats = r_asc
        .report
        .per_symbol_timeframe
        .get("DET|1D")
        .expect("DET|1D missing");
    assert_eq!(det_stats.out_of_order, 0);
    assert_eq!(det_stats.duplicates_in_batch, 0);
    assert_eq!(det_stats.ohlc_sanity_violations, 0);
    assert_eq!(det_stats.negative_or_invalid_volume, 0);

    Ok(())
}

// ---------------------------------------------------------------------------
// Scenario 7 — gap detection for 1D (continuous interval, no calendar skips)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn md_ingest_provider_detects_1d_interval_gaps() -> Result<()> {
    let url = match std::env::var(vgx_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: VGX_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await?;

    vgx_db::migrate(&pool).await?;

    // The market trades every day, so any 86_400s jump beyond one bar
    // interval is a genuine missing slot — no calendar days are skipped.
    // 1_708_041_600 -> 1_708_300_800: delta = 3 * 86_400 -> 2 missing bars.
    // 1_708_300_800 -> 1_708_646_400: delta = 4 * 86_400 -> 3 missing bars.
    let bars = vec![
        bar("GAP", "1D", 1_708_041_600, "10", "12", "9", "11", 100, true),
        bar(
            "GAP",
            "1D",
            1_708_300_800,
            "11",
            "13",
            "10",
            "12",
            110,
            true,
        ),
        bar(
            "GAP",
            "1D",
            1_708_646_400,
            "12",
            "14",
            "11",
            "13",
            120,
            true,
        ),
    ];

    let res = vgx_db::ingest_provider_bars_to_md_bars(
        &pool,
        vgx_db::IngestProviderBarsArgs {
            source: "mock_provider".to_string(),
            timeframe: "1D".to_string(),
            ingest_id: None,
            bars,
        },
    )
    .await?;

    assert_eq!(res.report.coverage.rows_ok, 3);

    let gap_stats = res
        .report
        .per_symbol_timeframe
        .get("GAP|1D")
        .expect("GAP|1D missing");
    assert_eq!(
        gap_stats.gaps_detected, 5,
        "expected 2 + 3 missing bar-interval slots across the three rows"
    );

    Ok(())
}

// ---------------------------------------------------------------------------
// Scenario 8 — wrong timeframe rows are rejected
// ---------------------------------------------------------------------------

#[tokio::test]
async fn md_ingest_provider_rejects_wrong_timeframe() -> Result<()> {
    let url = match std::env::var(vgx_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: VGX_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await?;

    vgx_db::migrate(&pool).await?;

    let bars = vec![
        bar("WTF", "1D", 1_708_041_600, "10", "12", "9", "11", 100, true), // matches
        bar("WTF", "1m", 1_708_041_660, "10", "12", "9", "11", 10, true),  // wrong tf
    ];

    let res = vgx_db::ingest_provider_bars_to_md_bars(
        &pool,
        vgx_db::IngestProviderBarsArgs {
            source: "mock_provider".to_string(),
            timeframe: "1D".to_string(), // only accept 1D
            ingest_id: None,
            bars,
        },
    )
    .await?;

    assert_eq!(res.report.coverage.rows_read, 2);
    assert_eq!(res.report.coverage.rows_ok, 1);
    assert_eq!(res.report.coverage.rows_rejected, 1);

    Ok(())
}
