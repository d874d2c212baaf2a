//! Offline tick log replay.
//!
//! Prints every stored tick for one trading day as a JSON line, labelled
//! with its instrument when the day's instrument map is available.

use std::collections::HashMap;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use persistence::paths::parse_date_stamp;
use persistence::{read_instrument_map, read_log, StorageError};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use types::tick::Tick;

#[derive(Parser)]
#[command(name = "tick-replay")]
#[command(about = "Replay a stored tick log as JSON lines")]
struct Args {
    /// Directory holding market_data_<date>.log and map_<date>.snapshot.
    #[arg(long, default_value = "./binary")]
    data_dir: PathBuf,

    /// Trading date as YYYYMMDD.
    #[arg(long)]
    date: String,

    /// Stop after this many ticks.
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Serialize)]
struct ReplayLine<'a> {
    symbol: Option<&'a str>,
    #[serde(flatten)]
    tick: &'a Tick,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let date = parse_date_stamp(&args.date)?;

    let symbols: HashMap<u32, String> = match read_instrument_map(&args.data_dir, date) {
        Ok(instruments) => instruments.into_iter().map(|i| (i.token, i.key())).collect(),
        Err(StorageError::NotFound { path }) => {
            warn!(path = %path.display(), "No instrument map, ticks will be unlabelled");
            HashMap::new()
        }
        Err(e) => return Err(e).context("reading instrument map"),
    };

    let reader = read_log(&args.data_dir, date)
        .with_context(|| format!("opening tick log in {}", args.data_dir.display()))?;
    let limit = args.limit.unwrap_or(usize::MAX);

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut printed = 0usize;
    for tick in reader.take(limit) {
        let tick = tick.context("reading tick log")?;
        let line = ReplayLine {
            symbol: symbols.get(&tick.token).map(String::as_str),
            tick: &tick,
        };
        serde_json::to_writer(&mut out, &line)?;
        out.write_all(b"\n")?;
        printed += 1;
    }
    out.flush()?;

    info!(date = %args.date, ticks = printed, instruments = symbols.len(), "Replay complete");
    Ok(())
}
