//! Run-lifecycle command handlers.
//!
//! Covers all subcommands of `vgx run`: start, arm, begin, stop, halt,
//! heartbeat, status, deadman-check, deadman-enforce, backtest, and replay.

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::{derive_cli_run_id, get_git_hash, host_fingerprint, KillSwitchCmd, RunCmd};

use super::bkt;

pub async fn dispatch(cmd: RunCmd) -> Result<()> {
    match cmd {
        RunCmd::Start { engine, mode } => run_start(engine, mode).await,
        RunCmd::Arm { run_id, confirm } => run_arm(run_id, confirm).await,
        RunCmd::Begin { run_id } => run_begin(run_id).await,
        RunCmd::Stop { run_id } => run_stop(run_id).await,
        RunCmd::Halt { run_id, reason } => run_halt(run_id, reason).await,
        RunCmd::Heartbeat { run_id } => run_heartbeat(run_id).await,
        RunCmd::Status { run_id } => run_status(run_id).await,
        RunCmd::DeadmanCheck { run_id, ttl_seconds } => run_deadman_check(run_id, ttl_seconds).await,
        RunCmd::DeadmanEnforce { run_id, ttl_seconds } => {
            run_deadman_enforce(run_id, ttl_seconds).await
        }
        RunCmd::Backtest { config_path } => bkt::run_backtest(&config_path).await,
        RunCmd::Replay { run_id } => bkt::run_replay(run_id).await,
    }
}

pub async fn kill_switch(cmd: KillSwitchCmd) -> Result<()> {
    let pool = vgx_db::connect_from_env().await?;
    let (value, reason) = match cmd {
        KillSwitchCmd::On { reason } => (true, reason),
        KillSwitchCmd::Off { reason } => (false, reason),
    };
    let flag = vgx_schemas::RuntimeFlag {
        flag: vgx_schemas::FlagKind::KillSwitch,
        value,
        reason,
        set_at_ms: Utc::now().timestamp_millis(),
    };
    vgx_db::entities::set_runtime_flag(&pool, &flag).await?;
    println!("kill_switch={}", value);
    Ok(())
}

// ---------------------------------------------------------------------------
// run start
// ---------------------------------------------------------------------------

async fn run_start(engine: String, mode: String) -> Result<()> {
    let pool = vgx_db::connect_from_env().await?;

    let cfg = vgx_config::Config::from_env()?;
    let hashed = cfg.hashed()?;

    let git_hash = get_git_hash().unwrap_or_else(|| "UNKNOWN".to_string());
    let run_id = derive_cli_run_id(&engine, &mode, &hashed.config_hash, &git_hash);
    let host_fp = host_fingerprint();

    let config_json: Value = serde_json::from_str(&hashed.canonical_json)
        .context("canonical config JSON must parse")?;

    let new_run = vgx_db::NewRun {
        run_id,
        engine_id: engine.clone(),
        mode: mode.clone(),
        started_at_utc: Utc::now(),
        git_hash: git_hash.clone(),
        config_hash: hashed.config_hash.clone(),
        config_json,
        host_fingerprint: host_fp.clone(),
    };

    vgx_db::insert_run(&pool, &new_run).await?;

    println!("run_id={}", run_id);
    println!("engine_id={}", engine);
    println!("mode={}", mode);
    println!("git_hash={}", git_hash);
    println!("config_hash={}", hashed.config_hash);
    println!("host_fingerprint={}", host_fp);

    Ok(())
}

// ---------------------------------------------------------------------------
// run arm
// ---------------------------------------------------------------------------

async fn run_arm(run_id: Uuid, confirm: Option<String>) -> Result<()> {
    let pool = vgx_db::connect_from_env().await?;

    let r = vgx_db::fetch_run(&pool, run_id).await?;
    enforce_manual_confirmation_if_required(&r, confirm.as_deref())?;

    vgx_db::arm_preflight(&pool, run_id).await?;
    println!("armed=true run_id={} status=ARMED", run_id);

    Ok(())
}

// ---------------------------------------------------------------------------
// run begin / stop / halt / heartbeat
// ---------------------------------------------------------------------------

async fn run_begin(run_id: Uuid) -> Result<()> {
    let pool = vgx_db::connect_from_env().await?;
    vgx_db::begin_run(&pool, run_id).await?;
    println!("begun=true run_id={} status=RUNNING", run_id);
    Ok(())
}

async fn run_stop(run_id: Uuid) -> Result<()> {
    let pool = vgx_db::connect_from_env().await?;
    vgx_db::stop_run(&pool, run_id).await?;
    println!("stopped=true run_id={} status=STOPPED", run_id);
    Ok(())
}

async fn run_halt(run_id: Uuid, reason: String) -> Result<()> {
    let pool = vgx_db::connect_from_env().await?;
    vgx_db::halt_run(&pool, run_id).await?;
    println!(
        "halted=true run_id={} status=HALTED reason={}",
        run_id, reason
    );
    Ok(())
}

async fn run_heartbeat(run_id: Uuid) -> Result<()> {
    let pool = vgx_db::connect_from_env().await?;
    vgx_db::heartbeat_run(&pool, run_id).await?;
    println!("heartbeat=true run_id={}", run_id);
    Ok(())
}

// ---------------------------------------------------------------------------
// run status
// ---------------------------------------------------------------------------

async fn run_status(run_id: Uuid) -> Result<()> {
    let pool = vgx_db::connect_from_env().await?;
    let r = vgx_db::fetch_run(&pool, run_id).await?;
    println!("run_id={}", r.run_id);
    println!("engine_id={}", r.engine_id);
    println!("mode={}", r.mode);
    println!("status={}", r.status.as_str());
    println!("started_at_utc={}", r.started_at_utc.to_rfc3339());
    println!("armed_at_utc={}", opt_dt(&r.armed_at_utc));
    println!("running_at_utc={}", opt_dt(&r.running_at_utc));
    println!("stopped_at_utc={}", opt_dt(&r.stopped_at_utc));
    println!("halted_at_utc={}", opt_dt(&r.halted_at_utc));
    println!("last_heartbeat_utc={}", opt_dt(&r.last_heartbeat_utc));
    println!("git_hash={}", r.git_hash);
    println!("config_hash={}", r.config_hash);
    println!("host_fingerprint={}", r.host_fingerprint);
    Ok(())
}

// ---------------------------------------------------------------------------
// run deadman-check / deadman-enforce
// ---------------------------------------------------------------------------

async fn run_deadman_check(run_id: Uuid, ttl_seconds: i64) -> Result<()> {
    let pool = vgx_db::connect_from_env().await?;
    let expired = vgx_db::deadman_expired(&pool, run_id, ttl_seconds).await?;
    println!(
        "deadman_expired={} run_id={} ttl_seconds={}",
        expired, run_id, ttl_seconds
    );
    Ok(())
}

async fn run_deadman_enforce(run_id: Uuid, ttl_seconds: i64) -> Result<()> {
    let pool = vgx_db::connect_from_env().await?;
    let halted = vgx_db::enforce_deadman_or_halt(&pool, run_id, ttl_seconds).await?;
    println!(
        "deadman_halted={} run_id={} ttl_seconds={}",
        halted, run_id, ttl_seconds
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn enforce_manual_confirmation_if_required(
    run: &vgx_db::RunRow,
    confirm: Option<&str>,
) -> Result<()> {
    if run.mode.to_uppercase() != "LIVE" {
        return Ok(());
    }

    let require = run
        .config_json
        .pointer("/arming/require_manual_confirmation")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    if !require {
        return Ok(());
    }

    let fmt = run
        .config_json
        .pointer("/arming/confirmation_format")
        .and_then(|v| v.as_str())
        .unwrap_or("ARM LIVE {account_last4} {daily_loss_limit}");

    let account_last4 = run
        .config_json
        .pointer("/broker/account_last4")
        .and_then(|v| v.as_str())
        .unwrap_or("0000");

    let daily_loss_limit = run
        .config_json
        .pointer("/risk/daily_loss_limit")
        .map(|v| match v {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            _ => "".to_string(),
        })
        .unwrap_or_default();

    let expected = fmt
        .replace("{account_last4}", account_last4)
        .replace("{daily_loss_limit}", daily_loss_limit.trim());

    let confirm = confirm
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "manual confirmation required for LIVE arming. expected: \"{}\" (use --confirm)",
                expected
            )
        })?;

    if confirm != expected {
        return Err(anyhow::anyhow!(
            "manual confirmation mismatch. expected: \"{}\" got: \"{}\"",
            expected,
            confirm
        ));
    }

    Ok(())
}

fn opt_dt(dt: &Option<chrono::DateTime<Utc>>) -> String {
    dt.as_ref().map(|d| d.to_rfc3339()).unwrap_or_default()
}
