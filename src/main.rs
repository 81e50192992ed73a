use clap::Parser;
use mimalloc::MiMalloc;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use notes_stack::cli::{self, Cli};
use notes_stack::config::Config;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let args = Cli::parse();
    let cfg = Config::load(&args.config)?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.basic.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(workers) = args.command.worker_threads(&cfg) {
        builder.worker_threads(workers.max(1));
    }
    let runtime = builder.build()?;

    match runtime.block_on(cli::run(args.command, cfg)) {
        Ok(code) => Ok(code),
        Err(e) => {
            error!(error = %e, "command failed");
            Ok(ExitCode::FAILURE)
        }
    }
}
