use std::path::PathBuf;
use clap::Parser;
use log::{error, info, LevelFilter};
use ppg_ring_collector::{init_logging, run, RunOptions};
use ppg_ring_collector::error::{AppRunError, ConfigError};

#[derive(Parser, Debug)]
#[command(author, version)]
#[command(about = "Scans for a PPG ring, streams its telemetry and writes it to CSV logs.", long_about = None)]
struct Args {
    /// Use this config file instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write logs to this directory, overriding the config file
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Log debug output, including every telemetry payload
    #[arg(short, long)]
    verbose: bool,

    /// Fill the config file with every setting (defaults for missing ones) and exit
    #[arg(long)]
    write_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), AppRunError> {
    let args = Args::parse();
    init_logging(if args.verbose { LevelFilter::Debug } else { LevelFilter::Info });
    info!(concat!("PPG ring collector ", env!("CARGO_PKG_VERSION")));

    let options = RunOptions {
        config_path: args.config,
        log_directory: args.log_dir,
        write_default_config: args.write_default_config,
    };

    match run(options).await {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            error!("Another collector is already running");
            Ok(())
        },
        Err(err) => {
            error!("Unexpected error: {}", err);
            Err(err)
        },
        Ok(_) => Ok(()),
    }
}
