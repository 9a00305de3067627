//! tickfan CLI: record one exchange stream over K parallel connections into
//! a merged, update-id-ordered NDJSON file, with per-connection latency
//! files for offline analysis.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tickfan::runner::{self, Mode, RunOptions};
use tickfan::url::parse_wss_url;

#[derive(Parser, Debug)]
#[command(name = "tickfan")]
#[command(about = "Multi-connection WebSocket market-data recorder")]
struct Args {
    /// Endpoint, wss://HOST[:PORT]/TARGET
    #[arg(
        short = 'u',
        long,
        default_value = "wss://fstream.binance.com/ws/btcusdt@bookTicker"
    )]
    url: String,

    /// Number of parallel connections
    #[arg(short = 'n', long = "num", default_value_t = 2)]
    connections: usize,

    /// Merged NDJSON output path
    #[arg(short = 'o', long = "out", default_value = "stream.ndjson")]
    out: PathBuf,

    /// Session scheduling variant
    #[arg(short = 'm', long, value_enum, default_value_t = ModeArg::Async)]
    mode: ModeArg,

    /// Run duration in seconds (0 = run until killed)
    #[arg(short = 't', long = "seconds", default_value_t = 0)]
    seconds: u64,

    /// Comma-separated CPU ids for worker pinning (advisory); falls back to
    /// the TICKFAN_PIN_CPUS environment variable
    #[arg(long)]
    pin_cpus: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ModeArg {
    Async,
    Sync,
}

impl From<ModeArg> for Mode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Async => Mode::Async,
            ModeArg::Sync => Mode::Sync,
        }
    }
}

fn parse_pin_list(raw: &str) -> Option<Vec<usize>> {
    raw.split(',')
        .map(|part| part.trim().parse::<usize>().ok())
        .collect()
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let Some(url) = parse_wss_url(&args.url) else {
        error!("invalid URL (expected wss://host[:port]/path): {}", args.url);
        return ExitCode::from(2);
    };

    let pin_source = args
        .pin_cpus
        .clone()
        .or_else(|| std::env::var("TICKFAN_PIN_CPUS").ok());
    let pin_cpus = pin_source.as_deref().and_then(|raw| {
        let parsed = parse_pin_list(raw);
        if parsed.is_none() {
            warn!("ignoring unparseable CPU pin list: {raw}");
        }
        parsed
    });

    info!(
        "connecting to {}:{}{} with n={}, mode={}, output={}",
        url.host,
        url.port,
        url.target,
        args.connections.max(1),
        Mode::from(args.mode),
        args.out.display()
    );

    let opts = RunOptions {
        url,
        connections: args.connections.max(1),
        out_file: args.out,
        mode: args.mode.into(),
        seconds: args.seconds,
        pin_cpus,
    };

    match runner::run(opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(e.exit_code())
        }
    }
}
