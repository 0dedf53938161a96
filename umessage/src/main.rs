use clap::{Args, Parser};
use std::path::PathBuf;
use std::process;

mod config;
mod telemetry;

use config::Config;

#[derive(Parser)]
#[command(name = "umessage", about = "Anonymous message inbox service")]
enum CliCommand {
    /// Serve the API and admin listeners
    Serve(ConfigArgs),
    /// Load and validate a config file, then exit
    ValidateConfig(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long)]
    config_file_path: PathBuf,
}

fn load_config(path: &std::path::Path) -> Config {
    match Config::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Could not load {}: {e}", path.display());
            process::exit(1);
        }
    }
}

fn main() {
    let cli = CliCommand::parse();

    match cli {
        CliCommand::Serve(args) => {
            let config = load_config(&args.config_file_path);
            serve(config);
        }
        CliCommand::ValidateConfig(args) => {
            load_config(&args.config_file_path);
            println!("{} is valid", args.config_file_path.display());
        }
    }
}

fn serve(config: Config) {
    // Dropping the guard flushes queued Sentry events.
    let sentry_guard = telemetry::init_logging(config.common.logging.as_ref());

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Could not start the tokio runtime: {e}");
            drop(sentry_guard);
            process::exit(1);
        }
    };

    let result = runtime.block_on(async move {
        telemetry::init_metrics(config.common.metrics.as_ref())?;
        tracing::info!("Starting umessage");
        inbox::run(config.inbox, inbox::shutdown_signal()).await?;
        Ok::<_, Box<dyn std::error::Error>>(())
    });

    if let Err(e) = result {
        tracing::error!("umessage exited with error: {e}");
        drop(sentry_guard);
        process::exit(1);
    }
    tracing::info!("umessage stopped");
}
