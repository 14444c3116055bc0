mod args;
mod backend;
mod driver;
mod logging;
mod model;
mod oracle;
mod scheduler;

use std::process::ExitCode;

use clap::Parser;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::Level;

use crate::args::{Args, SimConfig};
use crate::driver::run;
use crate::logging::RunLog;

fn main() -> ExitCode {
    let config = SimConfig::from_args(Args::parse());
    let log = match RunLog::open(config.log.as_deref()) {
        Ok(log) => log,
        Err(err) => {
            eprintln!("failed to open log file: {err}");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_writer(log.clone())
        .with_target(false)
        .with_max_level(Level::INFO)
        .init();

    let config_json = serde_json::to_string(&config).unwrap_or_else(|_| "{}".to_string());
    tracing::info!(seed = config.seed, preset = ?config.preset, "config: {}", config_json);
    tracing::info!(
        hosts = %config.host_names().join(","),
        write_master = config.write_master,
        tasks = config.tasks,
        "topology"
    );

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let code = match run(&config, &mut rng) {
        Ok(summary) => {
            tracing::info!(seed = config.seed, "run passed: {}", summary);
            ExitCode::SUCCESS
        }
        Err(reason) => {
            tracing::error!(seed = config.seed, "run failed: {}", reason);
            ExitCode::FAILURE
        }
    };

    if let Err(err) = log.sync() {
        eprintln!("failed to flush log file: {err}");
        return ExitCode::FAILURE;
    }
    code
}
