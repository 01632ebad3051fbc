//! Exchange Ledger - replay runner
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌─────────────┐    ┌──────────┐
//! │  Config  │───▶│  Script  │───▶│ Coordinator │───▶│  Output  │
//! │  (YAML)  │    │ (JSONL)  │    │ (Tx+Locks)  │    │ (JSONL)  │
//! └──────────┘    └──────────┘    └─────────────┘    └──────────┘
//! ```
//!
//! Usage: `exchange_ledger [--env dev] [--input fixtures/commands.jsonl] [--output out.jsonl]`

use std::fs;
use std::io::Write;
use std::sync::Arc;

use anyhow::Context;

use exchange_ledger::config::AppConfig;
use exchange_ledger::coordinator::ExchangeCoordinator;
use exchange_ledger::identity::SessionRegistry;
use exchange_ledger::replay::Replay;
use exchange_ledger::store::InMemoryStore;

// ============================================================
// ARGUMENTS
// ============================================================

fn get_arg(names: &[&str]) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if names.contains(&args[i].as_str()) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

fn get_env() -> String {
    get_arg(&["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

fn get_input() -> String {
    get_arg(&["--input", "-i"]).unwrap_or_else(|| "fixtures/commands.jsonl".to_string())
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = exchange_ledger::logging::init_logging(&app_config);

    tracing::info!("Starting exchange ledger replay in {} mode", env);

    let input = get_input();
    let script =
        fs::read_to_string(&input).with_context(|| format!("Failed to read script: {}", input))?;

    let exchange = ExchangeCoordinator::new(
        Arc::new(InMemoryStore::new()),
        app_config.exchange.clone(),
    );
    let identity = SessionRegistry::new(app_config.exchange.session_ttl());
    let mut replay = Replay::new(exchange, identity);

    let outcomes = replay.run_script(&script).await?;

    let mut out: Box<dyn Write> = match get_arg(&["--output", "-o"]) {
        Some(path) => Box::new(
            fs::File::create(&path).with_context(|| format!("Failed to create {}", path))?,
        ),
        None => Box::new(std::io::stdout().lock()),
    };
    for outcome in &outcomes {
        writeln!(out, "{}", serde_json::to_string(outcome)?)?;
    }
    out.flush()?;

    let failed = outcomes.iter().filter(|o| !o.ok).count();
    let audit = replay.exchange().audit().await?;
    tracing::info!(
        commands = outcomes.len(),
        failed,
        ledger_entries = audit.entries,
        issued = audit.issued,
        clean = audit.is_clean(),
        "Replay finished"
    );
    if !audit.is_clean() {
        anyhow::bail!("ledger audit found {} drifted balances", audit.drift.len());
    }
    Ok(())
}
