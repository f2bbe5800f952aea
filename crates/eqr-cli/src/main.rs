mod paper_account;

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use eqr_audit::{verify_hash_chain, TracingNotifier, VerifyResult};
use eqr_backtest::{load_closes_csv, run_walk_forward, MomentumSource};
use eqr_config::UnusedKeyPolicy;
use eqr_runtime::{engine_status, load_engine_config, resume_reconciler, EngineConfig, SessionFile, SessionRunner};

use crate::paper_account::{open_paper_broker, save_paper_broker};

#[derive(Parser)]
#[command(name = "eqr")]
#[command(about = "Equity risk engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum UnusedKeys {
    Warn,
    Fail,
}

impl From<UnusedKeys> for UnusedKeyPolicy {
    fn from(v: UnusedKeys) -> Self {
        match v {
            UnusedKeys::Warn => UnusedKeyPolicy::Warn,
            UnusedKeys::Fail => UnusedKeyPolicy::Fail,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> overrides)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Run one daily session against the paper broker kept in the state dir
    RunSession {
        /// Layered config paths in merge order
        #[arg(long = "config")]
        config_paths: Vec<String>,

        /// Session JSON: market header plus each strategy's signals
        #[arg(long)]
        session: PathBuf,

        #[arg(long, value_enum, default_value_t = UnusedKeys::Warn)]
        unused_keys: UnusedKeys,
    },

    /// Walk-forward backtest of the momentum demo source over a closes CSV
    Backtest {
        #[arg(long = "config")]
        config_paths: Vec<String>,

        /// CSV with columns date,symbol,close
        #[arg(long)]
        closes: PathBuf,

        /// Write the full report as JSON here
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Re-check a finished run directory (terminal states, gating, snapshots)
    CheckInvariants {
        #[arg(long)]
        run_dir: PathBuf,
    },

    /// Verify the hash chain of an event log
    VerifyAudit {
        #[arg(long)]
        path: PathBuf,
    },

    /// Print drawdown breaker and reconciler state
    DrawdownStatus {
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },

    /// Resume a PAUSED reconciler (operator override)
    Resume {
        #[arg(long = "config")]
        config_paths: Vec<String>,

        /// Why the discrepancy is safe to clear; recorded in the operator log
        #[arg(long)]
        reason: String,
    },
}

fn main() -> Result<()> {
    // Silent if the file does not exist.
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();
    match cli.cmd {
        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = eqr_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::RunSession {
            config_paths,
            session,
            unused_keys,
        } => {
            let (cfg, config_hash) = engine_config(&config_paths, unused_keys.into())?;
            let file = SessionFile::load(&session)?;
            let inputs = file.inputs();
            let mut sources = file.sources();

            let state_dir = cfg.paths.state_dir.clone();
            fs::create_dir_all(&state_dir)
                .with_context(|| format!("create state dir {}", state_dir.display()))?;
            let mut broker = open_paper_broker(&state_dir, cfg.engine.initial_cash_micros, cfg.cost.clone())?;
            broker.set_marks(&inputs.closes);

            let runner = SessionRunner::new(cfg, config_hash);
            let outcome = runner.run(&inputs, &mut sources, &mut broker, &TracingNotifier)?;
            save_paper_broker(&state_dir, &mut broker, inputs.now_or_system())?;

            println!("run_id={}", outcome.run_id);
            println!("run_dir={}", outcome.run_dir.display());
            println!("signals={}", outcome.invariants.signals_generated);
            println!("executed={}", outcome.report.signals.executed);
            println!("rejected={}", outcome.report.signals.rejected);
            println!("invalid={}", outcome.report.signals.invalid);
            println!("trades={}", outcome.trades.len());
            for (state, n) in &outcome.terminal_counts {
                println!("terminal.{}={}", state.as_str(), n);
            }
            println!("drawdown_mode={}", outcome.drawdown.mode);
            println!("reconciler_status={}", outcome.report.health.reconciler_status.as_str());
            println!("start_reconciliation_passed={}", outcome.start_reconciliation_passed);
            println!("end_reconciliation_passed={}", outcome.end_reconciliation_passed);
            println!("invariants_passed={}", outcome.invariants.passed());
            if !outcome.invariants.passed() {
                bail!(
                    "run {} violated invariants: {}",
                    outcome.run_id,
                    outcome.invariants.violations.join("; ")
                );
            }
        }

        Commands::Backtest {
            config_paths,
            closes,
            out,
        } => {
            let (cfg, _) = engine_config(&config_paths, UnusedKeyPolicy::Warn)?;
            let history = load_closes_csv(&closes)?;
            let momentum = cfg.backtest.momentum.clone();
            let report = run_walk_forward(&cfg.backtest_config(), &history, |_| {
                Box::new(MomentumSource::new("momentum", momentum.clone()))
            })?;

            println!("sessions={}", history.len());
            println!("windows={}", report.windows.len());
            println!("trades={}", report.aggregate.num_trades);
            println!("total_return={:.6}", report.aggregate.total_return);
            println!("sharpe={:.4}", report.aggregate.sharpe);
            println!("max_drawdown={:.6}", report.aggregate.max_drawdown);
            if let Some(path) = out {
                let json = serde_json::to_string_pretty(&report).context("serialize backtest report")?;
                fs::write(&path, json).with_context(|| format!("write {}", path.display()))?;
                println!("report={}", path.display());
            }
        }

        Commands::CheckInvariants { run_dir } => {
            let report = eqr_artifacts::check_run_dir(&run_dir)?;
            println!("run_id={}", report.run_id);
            println!("signals={}", report.signals_generated);
            println!("terminal_states={}", report.terminal_states);
            println!("trades={}", report.trades);
            println!("gating_reconciliation_failed={}", report.gating_reconciliation_failed);
            println!("passed={}", report.passed());
            for v in &report.violations {
                println!("violation={v}");
            }
            if !report.passed() {
                bail!("{} invariant violation(s)", report.violations.len());
            }
        }

        Commands::VerifyAudit { path } => match verify_hash_chain(&path)? {
            VerifyResult::Valid { lines } => {
                println!("audit_valid=true lines={lines}");
            }
            VerifyResult::Broken { line, reason } => {
                println!("audit_valid=false line={line} reason={reason}");
                bail!("hash chain broken at line {line}: {reason}");
            }
        },

        Commands::DrawdownStatus { config_paths } => {
            let (cfg, _) = engine_config(&config_paths, UnusedKeyPolicy::Warn)?;
            let s = engine_status(&cfg)?;
            println!("drawdown_mode={}", s.drawdown.mode);
            println!("peak_value_micros={}", s.drawdown.peak_value_micros);
            println!("sizing_multiplier={}", s.drawdown.sizing_multiplier);
            println!("cooldown_end={}", opt(s.drawdown.cooldown_end));
            println!("rampup_end={}", opt(s.drawdown.rampup_end));
            println!("transitions={}", s.transitions.len());
            println!("reconciler_status={}", s.reconciler.status.as_str());
            println!("discrepancies={}", s.reconciler.discrepancies.len());
        }

        Commands::Resume {
            config_paths,
            reason,
        } => {
            let (cfg, _) = engine_config(&config_paths, UnusedKeyPolicy::Warn)?;
            let state = resume_reconciler(&cfg, &reason, Utc::now())?;
            println!("reconciler_status={}", state.status.as_str());
            println!("reason={}", reason.trim());
        }
    }

    Ok(())
}

fn init_tracing() {
    // stdout carries key=value output; logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn engine_config(paths: &[String], policy: UnusedKeyPolicy) -> Result<(EngineConfig, String)> {
    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    let (cfg, loaded, _unused) = load_engine_config(&path_refs, policy)?;
    Ok((cfg, loaded.config_hash))
}

fn opt<T: std::fmt::Display>(v: Option<T>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}
