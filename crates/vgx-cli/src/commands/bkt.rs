//! Deterministic backtest / replay command handlers.
//!
//! `md_bars` keys market data by a `symbol: String` column; every domain
//! table downstream of it (and `vgx_schemas::Bar`) keys by a numeric
//! `symbol_id`. There is no mapping table between the two, so this module
//! defines the bridge as a CLI-level convention: a backtest config file
//! declares its symbol universe as an explicit list, and `symbol_id` is the
//! 1-based index of each symbol in that list sorted lexically. This keeps
//! symbol_id assignment deterministic across re-runs without touching the
//! schema.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;
use vgx_backtest::{BacktestConfig, BacktestEngine, BacktestReport};
use vgx_db::md::MdBarRow;
use vgx_schemas::{Bar, Timeframe};

use crate::{get_git_hash, host_fingerprint};

/// Backtest run definition, loaded from a JSON file and stored verbatim in
/// `runs.config_json` so `run replay` can reproduce the exact same inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestCliConfig {
    /// Symbol universe, in the order the operator wants them declared.
    /// `symbol_id` is assigned as the 1-based index into this list sorted
    /// lexically, independent of declaration order.
    pub symbols: Vec<String>,
    pub timeframe: String,
    pub start_end_ts: i64,
    pub end_end_ts: i64,
    #[serde(default)]
    pub initial_equity: Option<f64>,
}

fn parse_timeframe(s: &str) -> Result<Timeframe> {
    match s {
        "1h" => Ok(Timeframe::H1),
        "4h" => Ok(Timeframe::H4),
        "8h" => Ok(Timeframe::H8),
        "1d" => Ok(Timeframe::D1),
        other => anyhow::bail!("unknown timeframe '{other}', expected one of 1h|4h|8h|1d"),
    }
}

fn symbol_id_map(symbols: &[String]) -> BTreeMap<String, i64> {
    let mut sorted: Vec<&String> = symbols.iter().collect();
    sorted.sort();
    sorted
        .into_iter()
        .enumerate()
        .map(|(i, s)| (s.clone(), (i + 1) as i64))
        .collect()
}

fn rows_to_bars(rows: Vec<MdBarRow>, timeframe: Timeframe, ids: &BTreeMap<String, i64>) -> Result<Vec<Bar>> {
    let tf_ms = vgx_backtest::types::timeframe_ms(timeframe);
    let mut bars: Vec<Bar> = Vec::with_capacity(rows.len());
    for row in rows {
        let symbol_id = *ids
            .get(&row.symbol)
            .with_context(|| format!("row symbol '{}' not in declared symbol universe", row.symbol))?;
        bars.push(Bar {
            symbol_id,
            timeframe,
            open_time_ms: row.end_ts - tf_ms,
            close_time_ms: row.end_ts,
            open: row.open_micros as f64 / vgx_risk::MICROS_SCALE as f64,
            high: row.high_micros as f64 / vgx_risk::MICROS_SCALE as f64,
            low: row.low_micros as f64 / vgx_risk::MICROS_SCALE as f64,
            close: row.close_micros as f64 / vgx_risk::MICROS_SCALE as f64,
            volume: row.volume as f64,
            is_complete: row.is_complete,
        });
    }
    bars.sort_by_key(|b| (b.symbol_id, b.close_time_ms));
    Ok(bars)
}

async fn run_engine(cli_cfg: &BacktestCliConfig) -> Result<(BacktestReport, usize)> {
    let timeframe = parse_timeframe(&cli_cfg.timeframe)?;
    let ids = symbol_id_map(&cli_cfg.symbols);

    let pool = vgx_db::connect_from_env().await?;
    let rows = vgx_db::md::load_md_bars_for_backtest(
        &pool,
        &cli_cfg.timeframe,
        cli_cfg.start_end_ts,
        cli_cfg.end_end_ts,
        &cli_cfg.symbols,
    )
    .await?;

    let bars = rows_to_bars(rows, timeframe, &ids)?;

    let mut cfg = BacktestConfig::test_defaults();
    if let Some(eq) = cli_cfg.initial_equity {
        cfg.initial_equity = eq;
    }

    let mut engine = BacktestEngine::new(cfg);
    for (symbol, id) in &ids {
        engine.register_symbol(*id, symbol.clone());
    }

    let report = engine.run(&bars).context("backtest engine run failed")?;
    Ok((report, bars.len()))
}

fn hash_report(report: &BacktestReport) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{report:?}").as_bytes());
    hex::encode(hasher.finalize())
}

pub async fn run_backtest(config_path: &str) -> Result<()> {
    let raw = std::fs::read_to_string(config_path)
        .with_context(|| format!("read backtest config failed: {config_path}"))?;
    let cli_cfg: BacktestCliConfig =
        serde_json::from_str(&raw).context("backtest config must be valid JSON")?;

    let (report, bars_processed) = run_engine(&cli_cfg).await?;
    let result_hash = hash_report(&report);

    let pool = vgx_db::connect_from_env().await?;
    let git_hash = get_git_hash().unwrap_or_else(|| "UNKNOWN".to_string());
    let config_json: Value = serde_json::to_value(&cli_cfg)?;
    let config_hash = {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_string(&config_json)?.as_bytes());
        hex::encode(hasher.finalize())
    };
    let run_id = Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        format!("vgx-cli.backtest.v1|{config_hash}|{git_hash}").as_bytes(),
    );

    let new_run = vgx_db::NewRun {
        run_id,
        engine_id: "BACKTEST".to_string(),
        mode: "BACKTEST".to_string(),
        started_at_utc: Utc::now(),
        git_hash: git_hash.clone(),
        config_hash: config_hash.clone(),
        config_json,
        host_fingerprint: host_fingerprint(),
    };
    vgx_db::insert_run(&pool, &new_run).await?;

    let default_equity = cli_cfg.initial_equity.unwrap_or(10_000.0);
    let final_equity = report.equity_curve.last().map(|(_, eq)| *eq).unwrap_or(default_equity);

    println!("run_id={run_id}");
    println!("bars_processed={bars_processed}");
    println!("trades={}", report.trades.len());
    println!("halted={}", report.halted);
    if let Some(reason) = &report.halt_reason {
        println!("halt_reason={reason}");
    }
    println!("final_equity={final_equity}");
    println!("result_hash={result_hash}");

    Ok(())
}

pub async fn run_replay(run_id: Uuid) -> Result<()> {
    let pool = vgx_db::connect_from_env().await?;
    let run = vgx_db::fetch_run(&pool, run_id).await?;

    let cli_cfg: BacktestCliConfig = serde_json::from_value(run.config_json.clone())
        .context("recorded run config_json is not a backtest config")?;

    let (report_a, _) = run_engine(&cli_cfg).await?;
    let (report_b, _) = run_engine(&cli_cfg).await?;

    let hash_a = hash_report(&report_a);
    let hash_b = hash_report(&report_b);
    let replay_equivalent = hash_a == hash_b;

    println!("run_id={run_id}");
    println!("hash_a={hash_a}");
    println!("hash_b={hash_b}");
    println!("replay_equivalent={replay_equivalent}");

    if !replay_equivalent {
        anyhow::bail!("replay mismatch: backtest is not deterministic for run {run_id}");
    }

    Ok(())
}
