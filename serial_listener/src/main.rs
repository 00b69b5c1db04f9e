use std::{process::ExitCode, time::Duration};

use clap::Parser;
use serial_logger::{Config, SerialLogger};
use tokio::time::interval;
use tracing::{error, info, Level};

/// Print every `D;key:value;...` line a serial device sends.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Serial port to listen on. Detected automatically if omitted.
    #[arg(short, long)]
    port: Option<String>,

    /// Look for the device even if a port is given.
    #[arg(long)]
    detect: bool,

    #[arg(short, long, default_value_t = 115_200)]
    baud: u32,

    /// Read timeout in milliseconds.
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Log every raw line and probe.
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(if args.debug { Level::DEBUG } else { Level::INFO })
        .init();

    let config = Config {
        port: args.port.clone().unwrap_or_else(|| Config::default().port),
        baud_rate: args.baud,
        timeout: Duration::from_millis(args.timeout_ms),
        debug: args.debug,
    };
    if let Err(e) = config.validate() {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    let mut logger = SerialLogger::new(config);

    if args.detect || args.port.is_none() {
        match logger.detect_port().await {
            Ok(Some(_)) => {}
            Ok(None) => {
                eprintln!("Please plug in your device, or pass --port.");
                return ExitCode::FAILURE;
            }
            Err(e) => {
                error!("{e}");
                return ExitCode::FAILURE;
            }
        }
    }

    logger.set_callback(|record| {
        let fields: Vec<String> = record.iter().map(|(k, v)| format!("{k}={v}")).collect();
        println!("{}", fields.join(" "));
    });

    if let Err(e) = logger.start() {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    // The listener only reports a dead port through its state, so poll it.
    let mut check = interval(Duration::from_millis(500));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let code = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Ctrl+C received, stopping");
                break ExitCode::SUCCESS;
            }
            _ = check.tick() => {
                if !logger.is_listening() {
                    error!("Listener stopped on its own");
                    break ExitCode::FAILURE;
                }
            }
        }
    };

    if let Err(e) = logger.stop_and_wait(Duration::from_secs(2)).await {
        error!("{e}");
    }
    code
}
