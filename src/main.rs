//! Vaultline bank server
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────┐    ┌──────────┐
//! │  Config  │───▶│ DataDir  │───▶│ Recovery │───▶│ Listener │
//! │  (YAML)  │    │  (lock)  │    │  (WAL)   │    │  (TCP)   │
//! └──────────┘    └──────────┘    └──────────┘    └──────────┘
//! ```
//!
//! Recovery runs once, synchronously, before the listener binds.

use anyhow::Context;
use std::sync::Arc;

use vaultline::Bank;
use vaultline::config::AppConfig;
use vaultline::server::{self, ServerContext};

/// Value following the first of `flags` on the command line
fn flag_value(args: &[String], flags: &[&str]) -> Option<String> {
    args.windows(2)
        .find(|pair| flags.contains(&pair[0].as_str()))
        .map(|pair| pair[1].clone())
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let env = flag_value(&args, &["--env", "-e"]).unwrap_or_else(|| "dev".to_string());
    let mut app_config = AppConfig::load(&env)?;
    if let Some(port) = flag_value(&args, &["--port"]) {
        app_config.server.port = port
            .parse()
            .with_context(|| format!("Invalid --port value '{}'", port))?;
    }
    let _log_guard = vaultline::logging::init_logging(&app_config);

    tracing::info!(
        git_hash = env!("GIT_HASH"),
        "Starting Vaultline in {} mode",
        env
    );

    let bank = Bank::open(&app_config.storage).context("Failed to open bank storage")?;

    let report = bank
        .recover(app_config.recovery.max_pending)
        .context("Transfer recovery failed")?;
    tracing::info!(
        entries = report.entries,
        resolved = report.resolved(),
        rolled_back = report.rolled_back,
        rolled_forward = report.rolled_forward,
        unresolvable = report.unresolvable,
        "Transfer recovery complete"
    );

    if let Some(password) = app_config.bootstrap.admin_password.as_deref() {
        if let Some(admin) = bank.ensure_admin(password)? {
            println!("Bootstrap administrator created: user id {}", admin.user_id);
        }
    }

    let ctx = Arc::new(ServerContext::new(bank, app_config.server.max_sessions));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    runtime.block_on(server::run(&app_config.server, ctx))
}
