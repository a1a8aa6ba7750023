//! # cpuprof - Main Entry Point
//!
//! Parses the command line, runs the preflight checks and hands control to
//! the [`Controller`] until a signal or `--duration` ends the session.

use std::io;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::info;
use tokio_util::sync::CancellationToken;

use cpuprof::cli::Args;
use cpuprof::config::ProfilerConfig;
use cpuprof::controller::{Controller, ShutdownSignal};
use cpuprof::domain::ProfilerError;
use cpuprof::preflight::run_preflight_checks;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if matches!(err.downcast_ref::<ProfilerError>(), Some(ProfilerError::InvalidConfig(_))) {
        return EXIT_USAGE;
    }

    let denied = err.chain().any(|cause| {
        cause
            .downcast_ref::<io::Error>()
            .is_some_and(|e| e.kind() == io::ErrorKind::PermissionDenied)
    });
    let msg = format!("{err:#}").to_lowercase();
    if denied || msg.contains("permission denied") || msg.contains("requires root") {
        EXIT_NOPERM
    } else {
        EXIT_ERROR
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let config = ProfilerConfig::from_args(&args)?;

    run_preflight_checks(&config.object_path)?;

    let shutdown = ShutdownSignal::install(config.duration)
        .context("Failed to install signal handlers")?;
    let cancel = CancellationToken::new();
    let shutdown_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown.wait().await;
            cancel.cancel();
        })
    };

    let mut controller = Controller::new(config);
    let result = controller.run(cancel).await;
    shutdown_task.abort();

    let stats = result?;
    info!("Collected {} samples", stats.decoded);
    Ok(())
}
