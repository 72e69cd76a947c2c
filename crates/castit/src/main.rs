mod chromecast;
mod cli;
mod processes;

use std::path::PathBuf;
use std::sync::Arc;

use castit_core::config::Config;
use castit_core::orchestrator::{Orchestrator, PlayOptions};
use castit_core::platform;
use castit_core::reaper::{self, ProcessTable};
use castit_core::resolver::{self, ResolveOptions};
use castit_core::shutdown::ShutdownHandle;
use castit_core::signal;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::chromecast::ChromecastBackend;
use crate::cli::Cli;
use crate::processes::SysinfoTable;

/// stderr + append-only file under the data dir.  Returns the log path when
/// the file layer could be installed.
fn init_logging(debug: bool) -> Result<PathBuf, (PathBuf, std::io::Error)> {
    let default_filter = if debug {
        "info,castit=debug,castit_core=debug,hyper=warn,hyper_util=warn"
    } else {
        "info,hyper=warn,hyper_util=warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let data_dir = platform::data_dir();
    let log_path = data_dir.join("castit.log");
    let log_file = std::fs::create_dir_all(&data_dir).and_then(|_| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
    });

    match log_file {
        Ok(file) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(file)
                .with_ansi(false);
            tracing_subscriber::registry()
                .with(stderr_layer)
                .with(file_layer)
                .with(filter)
                .init();
            Ok(log_path)
        }
        Err(e) => {
            tracing_subscriber::registry()
                .with(stderr_layer)
                .with(filter)
                .init();
            Err((log_path, e))
        }
    }
}

async fn quit_others(config: &Config) -> i32 {
    let Some(exe_name) = platform::current_executable_name() else {
        error!("Reaper: cannot determine own executable name");
        return 1;
    };
    let mut table = SysinfoTable::new(exe_name);
    let siblings = table.find_siblings();
    reaper::reap(
        &mut table,
        &siblings,
        config.reaper.grace_period(),
        config.reaper.poll_interval(),
    )
    .await;
    0
}

async fn play(cli: Cli, config: Config) -> anyhow::Result<i32> {
    let (Some(device_name), Some(uri)) = (cli.device, cli.uri) else {
        anyhow::bail!("--device and --uri are required unless --quit is given");
    };
    let serve_port = cli.serve_port.unwrap_or(config.server.port);

    let opts = ResolveOptions {
        serve_port,
        host: platform::local_address(),
        autoplay: config.cast.autoplay && !cli.no_autoplay,
        volume: cli.device_volume,
    };
    let media = match resolver::resolve(&uri, &opts) {
        Ok(m) => m,
        Err(e) => {
            error!("Resolve: {}", e);
            return Ok(1);
        }
    };
    info!(
        "Resolve: '{}' → {} ({})",
        media.raw_uri, media.resolved_uri, media.content_type
    );

    let (shutdown, shutdown_rx) = ShutdownHandle::channel();
    let _signals = signal::spawn(shutdown.clone());

    let backend = Arc::new(ChromecastBackend::new(config.cast.discovery_timeout()));
    let orchestrator = Orchestrator::new(backend, shutdown, shutdown_rx);
    let play_opts = PlayOptions {
        device_name,
        bind_address: config.server.bind_address.clone(),
        serve_port,
    };
    Ok(orchestrator.run(&media, &play_opts).await)
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let config_path = cli.config.clone().unwrap_or_else(Config::config_path);
    info!("Config loaded from: {:?}", config_path);

    if cli.quit {
        return Ok(quit_others(&config).await);
    }
    play(cli, config).await
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match init_logging(cli.debug) {
        Ok(path) => info!("Log file: {:?}", path),
        Err((path, e)) => warn!("Log file {:?} unavailable, logging to stderr only: {}", path, e),
    }

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };
    std::process::exit(code);
}
