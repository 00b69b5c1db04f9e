use std::{process::ExitCode, time::Duration};

use clap::Parser;
use futures_util::SinkExt;
use rand::Rng;
use serial_logger::{LineCodec, Record, SerialTransport, Transport};
use tokio::time::interval;
use tokio_util::codec::FramedWrite;
use tracing::{error, info};

/// Pretend to be a sensor board: write `D;key:value;...` lines to a serial port.
///
/// Pair with `socat -d -d pty,raw,echo=0 pty,raw,echo=0` to test without hardware.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Serial port to write to.
    #[arg(short, long)]
    port: String,

    #[arg(short, long, default_value_t = 115_200)]
    baud: u32,

    /// Time between lines in milliseconds.
    #[arg(short, long, default_value_t = 1000)]
    interval_ms: u64,
}

fn random_line(rng: &mut impl Rng, count: u64) -> String {
    // Every so often, something that isn't data.
    if rng.gen_ratio(1, 8) {
        return format!("status: uptime {count}");
    }

    let record: Record = [
        ("seq", count.to_string()),
        ("temp", format!("{:.1}", rng.gen_range(15.0..30.0))),
        ("hum", rng.gen_range(20..80).to_string()),
    ]
    .into_iter()
    .collect();
    record.to_string()
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let port = match SerialTransport.open(&args.port, args.baud, Duration::from_secs(1)) {
        Ok(port) => port,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    info!("Writing to {} at {} baud", args.port, args.baud);

    let mut lines = FramedWrite::new(port, LineCodec::new());
    let mut interval = interval(Duration::from_millis(args.interval_ms));

    for count in 0.. {
        interval.tick().await;
        let line = random_line(&mut rand::thread_rng(), count);
        eprintln!("Sending {line}");
        if let Err(e) = lines.send(line).await {
            error!("Failed to send line: {e}");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}
