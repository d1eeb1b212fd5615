use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use icesat2_core::atl03::datasets;
use icesat2_core::atl03::worker::OrbitContext;
use icesat2_core::config::RequestParams;
use icesat2_core::granule::{parse_granule_name, ScOrient};
use icesat2_core::indexer;
use icesat2_core::lazy::{read_many, DirectoryColumnReader, FileAsset};
use icesat2_core::log_format::TargetFirstFormat;
use icesat2_core::pipeline::{self, PipelineHandles};
use icesat2_core::queue::PublishQueue;
use icesat2_core::region::RasterRegistry;

#[derive(Parser)]
#[command(name = "icesat2-core", version, about = "ATL03 -> ATL06 photon-to-surface-fit pipeline")]
struct Cli {
    /// Root directory local granule datasets are read from.
    #[arg(long, global = true, default_value = ".")]
    base_dir: PathBuf,

    /// Per-read timeout in milliseconds.
    #[arg(long, global = true, default_value_t = 30_000)]
    read_timeout_ms: u64,

    /// Per-post timeout in milliseconds, before a full output queue is retried.
    #[arg(long, global = true, default_value_t = 5_000)]
    post_timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process one ATL03 granule into ATL06 elevation records.
    Process {
        /// Granule name, parsed for (rgt, cycle, region) per the §11 naming scheme.
        granule: String,
        /// Request parameters as JSON or TOML; defaults are used if omitted.
        #[arg(long)]
        config: Option<PathBuf>,
        /// File the elevation/extent/exception byte stream is appended to.
        #[arg(long)]
        out: PathBuf,
    },
    /// Build an overview index over a list of granules.
    Index {
        /// Granule names to index.
        granules: Vec<String>,
        /// Worker thread count for the indexer pool.
        #[arg(long, default_value_t = 4)]
        workers: usize,
        /// File index records are appended to.
        #[arg(long)]
        out: PathBuf,
    },
}

fn init_logging() {
    tracing_subscriber::fmt()
        .event_format(TargetFirstFormat)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn load_params(config: Option<PathBuf>) -> Result<RequestParams> {
    let params = match config {
        Some(path) => {
            let body = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            if path.extension().and_then(|e| e.to_str()) == Some("toml") {
                RequestParams::from_toml(&body)
            } else {
                RequestParams::from_json(&body)
            }
            .map_err(|e| anyhow::anyhow!("{e}"))?
        }
        None => RequestParams::default(),
    };
    params.validate().map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(params)
}

/// Drain `rx` to `out_path`, appending every posted record's raw bytes.
/// This plays the role of the "external formatter" §5 assumes owns the
/// consuming end of each [`PublishQueue`].
fn spawn_drain(rx: flume::Receiver<bytes::Bytes>, out_path: PathBuf) -> std::thread::JoinHandle<Result<()>> {
    std::thread::spawn(move || -> Result<()> {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&out_path)
            .with_context(|| format!("opening output file {}", out_path.display()))?;
        while let Ok(payload) = rx.recv() {
            file.write_all(&payload)?;
        }
        Ok(())
    })
}

fn run_process(base_dir: PathBuf, granule: String, config: Option<PathBuf>, out: PathBuf, read_timeout: Duration, post_timeout: Duration) -> Result<()> {
    let params = load_params(config)?;
    let granule_id = parse_granule_name(&granule).context("parsing granule name")?;

    let asset = FileAsset::rooted_at(base_dir);
    let reader = DirectoryColumnReader::new();
    let registry = RasterRegistry::new();

    let sc_orient_reads = read_many(&reader, &asset, &granule, &[(datasets::SC_ORIENT, 0, 1)], read_timeout);
    let sc_orient_raw = sc_orient_reads
        .into_iter()
        .next()
        .unwrap()
        .map(|arr| arr.as_doubles().first().copied().unwrap_or(1.0) as i8)
        .unwrap_or(1);
    let orbit = OrbitContext {
        rgt: granule_id.rgt,
        cycle: granule_id.cycle,
        region: granule_id.region,
        sc_orient: ScOrient::from_raw(sc_orient_raw),
    };

    let (atl03_queue, atl03_rx) = PublishQueue::new("atl03", 256);
    let (atl06_queue, atl06_rx) = PublishQueue::new("atl06", 256);
    let atl03_out = out.clone();
    let mut atl06_out = out;
    atl06_out.set_extension("atl06.bin");
    let atl03_drain = spawn_drain(atl03_rx, atl03_out);
    let atl06_drain = spawn_drain(atl06_rx, atl06_out);

    let handles = PipelineHandles {
        atl03_queue: &atl03_queue,
        atl06_queue: &atl06_queue,
        active: Arc::new(AtomicBool::new(true)),
        post_timeout,
        read_timeout,
    };

    let stats = pipeline::run_granule(&asset, &reader, &granule, orbit, &params, &registry, &handles);
    info!(
        beams_completed = stats.beams_completed,
        extents_emitted = stats.extents_emitted,
        elevations_emitted = stats.elevations_emitted,
        exceptions = stats.exceptions,
        "granule processed"
    );

    drop(atl03_queue);
    drop(atl06_queue);
    atl03_drain.join().expect("atl03 drain thread panicked")?;
    atl06_drain.join().expect("atl06 drain thread panicked")?;
    Ok(())
}

fn run_index(base_dir: PathBuf, granules: Vec<String>, workers: usize, out: PathBuf, read_timeout: Duration, post_timeout: Duration) -> Result<()> {
    let asset = FileAsset::rooted_at(base_dir);
    let reader = DirectoryColumnReader::new();
    let (queue, rx) = PublishQueue::new("index", 256);
    let drain = spawn_drain(rx, out);
    let active = AtomicBool::new(true);

    let stats = indexer::index_granules(&asset, &reader, &granules, workers, &queue, &active, post_timeout, read_timeout);
    info!(granules_indexed = stats.granules_indexed, exceptions = stats.exceptions, "indexing complete");

    drop(queue);
    drain.join().expect("index drain thread panicked")?;
    Ok(())
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let read_timeout = Duration::from_millis(cli.read_timeout_ms);
    let post_timeout = Duration::from_millis(cli.post_timeout_ms);

    match cli.command {
        Command::Process { granule, config, out } => {
            run_process(cli.base_dir, granule, config, out, read_timeout, post_timeout)
        }
        Command::Index { granules, workers, out } => {
            run_index(cli.base_dir, granules, workers, out, read_timeout, post_timeout)
        }
    }
}
