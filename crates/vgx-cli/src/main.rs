mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;
use uuid::Uuid;

use commands::{backtest, run};

#[derive(Parser)]
#[command(name = "vgx")]
#[command(about = "Operator CLI for the trading engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Print the hashed, secret-redacted effective configuration
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },

    /// Run lifecycle commands
    Run {
        #[command(subcommand)]
        cmd: RunCmd,
    },

    /// Risk controls
    Risk {
        #[command(subcommand)]
        cmd: RiskCmd,
    },

    /// Market data ingestion
    Md {
        #[command(subcommand)]
        cmd: MdCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    Migrate {
        /// Required when a LIVE run is currently active
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCmd {
    Show,
}

#[derive(Subcommand)]
enum RunCmd {
    /// Create a new run row from the process environment's configuration.
    Start {
        /// Engine ID (e.g. MAIN, EXP)
        #[arg(long)]
        engine: String,

        /// Mode (PAPER | LIVE | BACKTEST)
        #[arg(long)]
        mode: String,
    },

    /// Transition CREATED/STOPPED -> ARMED.
    Arm {
        #[arg(long)]
        run_id: Uuid,

        /// Manual confirmation phrase, required when the run's config demands it.
        #[arg(long)]
        confirm: Option<String>,
    },

    /// Transition ARMED -> RUNNING.
    Begin {
        #[arg(long)]
        run_id: Uuid,
    },

    /// Transition RUNNING -> STOPPED.
    Stop {
        #[arg(long)]
        run_id: Uuid,
    },

    /// Halt a run unconditionally.
    Halt {
        #[arg(long)]
        run_id: Uuid,

        #[arg(long)]
        reason: String,
    },

    /// Record a heartbeat for a running engine.
    Heartbeat {
        #[arg(long)]
        run_id: Uuid,
    },

    /// Print the current run row.
    Status {
        #[arg(long)]
        run_id: Uuid,
    },

    /// Check (without mutating) whether a run's deadman timer has expired.
    DeadmanCheck {
        #[arg(long)]
        run_id: Uuid,

        #[arg(long)]
        ttl_seconds: i64,
    },

    /// Halt the run if its deadman timer has expired.
    DeadmanEnforce {
        #[arg(long)]
        run_id: Uuid,

        #[arg(long)]
        ttl_seconds: i64,
    },

    /// Run a deterministic backtest from a JSON config file, recording the
    /// run and its result hash.
    Backtest {
        config_path: String,
    },

    /// Re-run a recorded backtest run from its stored config and confirm the
    /// result reproduces bit-for-bit.
    Replay {
        #[arg(long)]
        run_id: Uuid,
    },
}

#[derive(Subcommand)]
enum RiskCmd {
    KillSwitch {
        #[command(subcommand)]
        cmd: KillSwitchCmd,
    },
}

#[derive(Subcommand)]
enum KillSwitchCmd {
    On {
        #[arg(long)]
        reason: Option<String>,
    },
    Off {
        #[arg(long)]
        reason: Option<String>,
    },
}

#[derive(Subcommand)]
enum MdCmd {
    /// Ingest bars from a CSV file into md_bars.
    IngestCsv {
        path: String,

        #[arg(long)]
        timeframe: String,

        #[arg(long)]
        source: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = vgx_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = vgx_db::status(&pool).await?;
                    println!("db_ok={} has_runs_table={}", s.ok, s.has_runs_table);
                }
                DbCmd::Migrate { yes } => {
                    if vgx_db::has_active_live_runs(&pool).await? && !yes {
                        anyhow::bail!(
                            "REFUSING MIGRATE: a LIVE run is currently active; pass --yes to override"
                        );
                    }
                    vgx_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::Config { cmd } => match cmd {
            ConfigCmd::Show => {
                let cfg = vgx_config::Config::from_env()?;
                let hashed = cfg.hashed()?;
                println!("config_hash={}", hashed.config_hash);
                println!("{}", hashed.canonical_json);
            }
        },

        Commands::Run { cmd } => run::dispatch(cmd).await?,

        Commands::Risk { cmd } => match cmd {
            RiskCmd::KillSwitch { cmd } => run::kill_switch(cmd).await?,
        },

        Commands::Md { cmd } => match cmd {
            MdCmd::IngestCsv {
                path,
                timeframe,
                source,
            } => backtest::md_ingest_csv(&path, &timeframe, &source).await?,
        },
    }

    Ok(())
}

/// Best-effort git hash (short).
pub(crate) fn get_git_hash() -> Option<String> {
    let out = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;

    if !out.status.success() {
        return None;
    }
    let s = String::from_utf8(out.stdout).ok()?;
    Some(s.trim().to_string())
}

/// Stable-ish, non-sensitive host fingerprint for run attribution.
pub(crate) fn host_fingerprint() -> String {
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "UNKNOWN_HOST".to_string());
    let username = std::env::var("USER").unwrap_or_else(|_| "UNKNOWN_USER".to_string());
    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;
    format!("{hostname}|{username}|{os}|{arch}")
}

/// Derive a deterministic run ID from engine identity and loaded
/// configuration — no RNG, no wall-clock dependency. Uses `Uuid::new_v5`
/// over the DNS namespace so it can't collide with other UUIDv5 uses in the
/// system.
pub(crate) fn derive_cli_run_id(engine_id: &str, mode: &str, config_hash: &str, git_hash: &str) -> Uuid {
    let data = format!("vgx-cli.run.v1|{engine_id}|{mode}|{config_hash}|{git_hash}");
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, data.as_bytes())
}
