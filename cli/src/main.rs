use std::path::{Component, Path, PathBuf};
use std::sync::Once;
use std::time::Instant;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tidal_core::{
    Runtime, RuntimeConfig,
    perf::scenarios::{self, PreparedScenario},
};
use tracing::{debug, info};


static TRACE_INIT: Once = Once::new();
const DEFAULT_TRACE_FILTER: &str = "tidal::vm::slowpath=debug,tidal::vm::coroutine=debug,tidal_core=info,tidal_cli=info";

#[derive(Debug, Parser)]
#[command(
    name = "tidal",
    author,
    version,
    about = "Scenario runner for the tidal call/return core",
    long_about = None
)]
struct CliArgs {
    /// Runtime config (TOML); defaults apply to missing fields
    #[arg(long, global = true, value_name = "FILE", value_parser = parse_sanitized_path)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List scenario keys and titles.
    List,
    /// Run scenarios and verify their results.
    Run {
        /// Scenario keys; all scenarios when omitted
        #[arg(value_name = "KEYS")]
        keys: Vec<String>,
        /// Runs per scenario
        #[arg(long, short = 'n', default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        iterations: u32,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective runtime config as TOML.
    Config,
}

#[derive(Debug, Serialize)]
struct ScenarioReport {
    key: &'static str,
    title: &'static str,
    iterations: u32,
    total_ms: f64,
    mean_us: f64,
    value: Option<String>,
    stack_slots: usize,
    ok: bool,
    error: Option<String>,
}

fn sanitize_path(raw: &str) -> anyhow::Result<PathBuf> {
    let p = Path::new(raw);

    for comp in p.components() {
        if matches!(comp, Component::ParentDir) {
            return Err(anyhow::anyhow!(
                "Parent directory components ('..') are not allowed in file paths."
            ));
        }
    }

    Ok(p.to_path_buf())
}

fn parse_sanitized_path(raw: &str) -> Result<PathBuf, String> {
    sanitize_path(raw).map_err(|e| e.to_string())
}

fn env_toggle_enabled(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return false;
    }
    !(trimmed.eq_ignore_ascii_case("0") || trimmed.eq_ignore_ascii_case("false") || trimmed.eq_ignore_ascii_case("off"))
}

/// `TIDAL_TRACE=1` selects the default filter; any other value is a filter expression.
fn filter_expr_from(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("1")
        || trimmed.eq_ignore_ascii_case("true")
        || trimmed.eq_ignore_ascii_case("on")
    {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn maybe_init_tracing() {
    let raw = match std::env::var("TIDAL_TRACE") {
        Ok(value) => value,
        Err(_) => return,
    };

    if !env_toggle_enabled(&raw) {
        return;
    }

    TRACE_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        use tracing_subscriber::fmt;

        let filter_expr = filter_expr_from(&raw).or_else(|| std::env::var("RUST_LOG").ok());

        let builder = fmt().with_writer(std::io::stderr);

        let builder = match filter_expr.and_then(|expr| EnvFilter::try_new(expr).ok()) {
            Some(filter) => builder.with_env_filter(filter),
            None => builder.with_env_filter(DEFAULT_TRACE_FILTER),
        };

        let _ = builder.try_init();
    });
}

fn load_config(path: Option<&Path>) -> anyhow::Result<RuntimeConfig> {
    let Some(path) = path else {
        return Ok(RuntimeConfig::default());
    };
    let source =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config '{}'", path.display()))?;
    RuntimeConfig::from_toml_str(&source).with_context(|| format!("in '{}'", path.display()))
}

/// Scenarios named by `keys` in the order given, or all of them.
fn select_scenarios(all: Vec<PreparedScenario>, keys: &[String]) -> anyhow::Result<Vec<PreparedScenario>> {
    if keys.is_empty() {
        return Ok(all);
    }
    keys.iter()
        .map(|key| {
            all.iter()
                .find(|s| s.key() == key)
                .cloned()
                .with_context(|| format!("unknown scenario '{key}' (see `tidal list`)"))
        })
        .collect()
}

fn run_scenario(scenario: &PreparedScenario, config: &RuntimeConfig, iterations: u32) -> anyhow::Result<ScenarioReport> {
    let mut runtime = Runtime::with_config(config.clone());
    tidal_stdlib::install(&mut runtime)?;

    let mut report = ScenarioReport {
        key: scenario.key(),
        title: scenario.title(),
        iterations: 0,
        total_ms: 0.0,
        mean_us: 0.0,
        value: None,
        stack_slots: runtime.stack_capacity(),
        ok: true,
        error: None,
    };

    let started = Instant::now();
    for _ in 0..iterations {
        match scenario.run_with(&mut runtime) {
            Ok(outcome) => {
                report.iterations += 1;
                report.value = Some(outcome.value.to_display_string());
                report.stack_slots = outcome.stack_slots;
            }
            Err(err) => {
                report.ok = false;
                report.error = Some(format!("{err:#}"));
                break;
            }
        }
    }
    let elapsed = started.elapsed();
    report.total_ms = elapsed.as_secs_f64() * 1e3;
    if report.iterations > 0 {
        report.mean_us = elapsed.as_secs_f64() * 1e6 / report.iterations as f64;
    }
    debug!(scenario = report.key, ok = report.ok, total_ms = report.total_ms, "scenario finished");
    Ok(report)
}

fn print_table(reports: &[ScenarioReport]) {
    for r in reports {
        match &r.error {
            None => println!(
                "{:<22} {:>12.1} us/iter  x{:<6} => {}",
                r.key,
                r.mean_us,
                r.iterations,
                r.value.as_deref().unwrap_or("nil")
            ),
            Some(err) => println!("{:<22} FAILED: {err}", r.key),
        }
    }
}

fn main() -> anyhow::Result<()> {
    maybe_init_tracing();

    let CliArgs { config, command } = CliArgs::parse();
    let config = load_config(config.as_deref())?;

    match command {
        Commands::List => {
            for scenario in scenarios::prepare_scenarios(&config)? {
                println!("{:<22} {}", scenario.key(), scenario.title());
            }
        }
        Commands::Run { keys, iterations, json } => {
            let selected = select_scenarios(scenarios::prepare_scenarios(&config)?, &keys)?;
            info!(count = selected.len(), iterations, "running scenarios");
            let reports = selected
                .iter()
                .map(|scenario| run_scenario(scenario, &config, iterations))
                .collect::<anyhow::Result<Vec<_>>>()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                print_table(&reports);
            }

            let failed = reports.iter().filter(|r| !r.ok).count();
            if failed > 0 {
                bail!("{failed} of {} scenario(s) failed verification", reports.len());
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
        }
    }
    Ok(())
}
