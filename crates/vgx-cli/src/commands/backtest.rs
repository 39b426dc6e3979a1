//! Market-data ingestion command handlers.
//!
//! Covers `vgx md ingest-csv`. Live/historical market data itself comes from
//! the exchange websocket boundary, not a CLI-driven REST vendor pull — this
//! module only covers the CSV replay path used to seed backtests.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Execute `vgx md ingest-csv`: parse a CSV file and ingest into `md_bars`.
pub async fn md_ingest_csv(path: &str, timeframe: &str, source: &str) -> Result<()> {
    let pool = vgx_db::connect_from_env().await?;

    let res = vgx_db::md::ingest_csv_to_md_bars(
        &pool,
        vgx_db::md::IngestCsvArgs {
            path: PathBuf::from(path),
            timeframe: timeframe.to_string(),
            source: source.to_string(),
            ingest_id: None,
        },
    )
    .await
    .with_context(|| format!("ingest-csv failed for {path}"))?;

    let out_dir = Path::new("exports")
        .join("md_ingest")
        .join(res.ingest_id.to_string());
    fs::create_dir_all(&out_dir).context("create md_ingest export dir failed")?;

    let out_path = out_dir.join("data_quality.json");
    let json = serde_json::to_string_pretty(&res.report).context("serialize report json failed")?;
    fs::write(&out_path, json)
        .with_context(|| format!("write report failed: {}", out_path.display()))?;

    println!("md_ingest_ok=true ingest_id={}", res.ingest_id);
    println!(
        "coverage rows_read={} rows_ok={} rows_rejected={} rows_inserted={} rows_updated={}",
        res.report.coverage.rows_read,
        res.report.coverage.rows_ok,
        res.report.coverage.rows_rejected,
        res.report.coverage.rows_inserted,
        res.report.coverage.rows_updated
    );
    println!("report_path={}", out_path.display());

    Ok(())
}
