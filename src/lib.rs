use std::env;
use std::path::PathBuf;
use log::info;
use tokio_util::sync::CancellationToken;

use crate::config::io::{resolve_log_directory, ConfigIO};
use crate::device::connection::connect_device;
use crate::error::AppRunError;
use crate::storage::csv::CsvFileSink;

pub mod config;
pub mod device;
pub mod error;
pub mod storage;

pub fn init_logging(level: log::LevelFilter) {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(
            fern::log_file(log_file).expect("Failed to open LOG_FILE")
        );
    }

    dispatch.apply().expect("Failed to initialize logger");
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_path: Option<PathBuf>,
    pub log_directory: Option<PathBuf>,
    pub write_default_config: bool,
}

pub async fn run(options: RunOptions) -> Result<(), AppRunError> {
    let config_io = ConfigIO::new_sync(options.config_path)?;
    let mut locker = config_io.locker()?;
    let _guard = locker.lock()?;

    let config = config_io.read().await?;
    if options.write_default_config {
        config_io.save(&config).await?;
        info!("Wrote config to {}", config_io.path().to_string_lossy());
        return Ok(());
    }

    let log_directory = resolve_log_directory(&config, options.log_directory.as_deref())?;
    let sink = CsvFileSink::new(log_directory)?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
            interrupt.cancel();
        }
    });

    connect_device(&config, Box::new(sink), cancel).await?;
    Ok(())
}
