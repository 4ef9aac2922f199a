//! chainarchive CLI: stream block archives and recover payloads from the terminal.
//!
//! Usage:
//! ```bash
//! # Stream blocks 1000..=1299 from a local directory of archive files
//! chainarchive stream --store ./merged-blocks --start 1000 --stop 1299
//!
//! # Fall back to a second directory, download 4 files ahead
//! chainarchive stream --store ./hot --secondary ./cold --start 1000 --parallel-downloads 4
//!
//! # Recover one block payload straight from the archive
//! chainarchive payload --store ./merged-blocks --id 000003ef --num 1007
//! ```
//!
//! Logs go to stderr, filtered by `RUST_LOG` (default `info`). Pass
//! `--log-json` for JSON logs.

use std::env;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chainarchive_core::{ArchiveError, Block, FileSourceConfig, GateConfig, Handler, ObjectStore};
use chainarchive_source::{FileSourceBuilder, PayloadCacheContext};
use chainarchive_storage::{LocalObjectStore, MemoryPayloadCache};

/// Recent-write budget of the `payload` command's cache; the recovered
/// payload is warmed into it and read back from it.
const PAYLOAD_CACHE_BYTES: usize = 16 << 20;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let rest = &args[2..];
    if matches!(args[1].as_str(), "stream" | "payload") {
        init_tracing(has_flag(rest, "--log-json"));
    }

    let result = match args[1].as_str() {
        "stream" => cmd_stream(rest).await,
        "payload" => cmd_payload(rest).await,
        "info" => {
            cmd_info();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("chainarchive {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

fn print_usage() {
    println!("chainarchive {}", env!("CARGO_PKG_VERSION"));
    println!("Ordered, parallel streaming of block archive files\n");
    println!("USAGE:");
    println!("    chainarchive <COMMAND> [FLAGS]\n");
    println!("COMMANDS:");
    println!("    stream   Stream blocks to stdout, one line per block");
    println!("    payload  Recover one block payload from the archive");
    println!("    info     Show ChainArchive defaults");
    println!("    version  Print version");
    println!("    help     Print this help\n");
    println!("COMMON FLAGS:");
    println!("    --store <DIR>          Primary archive directory  [required]");
    println!("    --secondary <DIR>      Fallback archive directory (repeatable, tried in order)");
    println!("    --extension <EXT>      Archive file extension, e.g. .jsonl");
    println!("    --retry-ms <MS>        Delay before looking for a missing file again");
    println!("    --retry-limit <N>      Give up after N retries of the same missing file");
    println!("    --log-json             Emit JSON logs\n");
    println!("STREAM FLAGS:");
    println!("    --config <FILE>             JSON file source configuration (flags override it)");
    println!("    --start <N>                 First block to deliver");
    println!("    --stop <N>                  Last block to deliver");
    println!("    --parallel-downloads <N>    Archive files downloaded ahead");
    println!("    --concurrency <N>           Blocks preprocessed concurrently per file");
    println!("    --recency-secs <S>          Only deliver blocks younger than S seconds\n");
    println!("PAYLOAD FLAGS:");
    println!("    --id <ID>    Block id  [required]");
    println!("    --num <N>    Block number  [required]");
}

fn cmd_info() {
    let defaults = FileSourceConfig::default();
    println!("ChainArchive v{}", env!("CARGO_PKG_VERSION"));
    println!("  Blocks per archive file: {}", chainarchive_core::types::FILE_BLOCKS_STRIDE);
    println!("  Archive file names: 10-digit zero-padded base block number");
    println!("  Default parallel downloads: {}", defaults.parallel_downloads);
    println!("  Default preprocess concurrency: {}", defaults.preprocess_concurrency);
    println!("  Default missing-file retry delay: {}ms", defaults.retry_delay_ms);
    println!("  Archive format: JSON lines (hex payloads)");
    println!("  Stores: local directory, memory");
}

/// Prints one line per delivered block.
struct PrintHandler;

#[async_trait]
impl Handler for PrintHandler {
    async fn process_block(&self, block: &Block, _obj: Option<&Value>) -> Result<(), ArchiveError> {
        let size = block.payload.len().await;
        println!(
            "{block} parent={} time={} payload_bytes={size}",
            block.parent_id,
            block.timestamp.to_rfc3339()
        );
        Ok(())
    }
}

async fn cmd_stream(args: &[String]) -> anyhow::Result<()> {
    let mut config = match parse_flag(args, "--config") {
        Some(path) => {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {path}"))?;
            serde_json::from_str::<FileSourceConfig>(&raw).with_context(|| format!("parsing {path}"))?
        }
        None => FileSourceConfig::default(),
    };

    if let Some(start) = parse_num(args, "--start")? {
        config.start_block = start;
    }
    if let Some(stop) = parse_num(args, "--stop")? {
        config.stop_block = Some(stop);
    }
    if let Some(n) = parse_num(args, "--parallel-downloads")? {
        config.parallel_downloads = narrow(n, "--parallel-downloads")?;
    }
    if let Some(n) = parse_num(args, "--concurrency")? {
        config.preprocess_concurrency = narrow(n, "--concurrency")?;
    }
    if let Some(ms) = parse_num(args, "--retry-ms")? {
        config.retry_delay_ms = ms;
    }
    if let Some(limit) = parse_num(args, "--retry-limit")? {
        config.missing_file_retry_limit = Some(narrow(limit, "--retry-limit")?);
    }
    if let Some(secs) = parse_num(args, "--recency-secs")? {
        config.gate = GateConfig::RecencyThreshold { threshold_secs: secs };
    }

    let (primary, secondaries) = stores(args)?;
    let source = FileSourceBuilder::new(primary, Arc::new(PrintHandler))
        .config(config)
        .secondary_blocks_stores(secondaries)
        .not_found_callback(|base| info!(base_block_num = base, "waiting for archive file"))
        .build()?;

    let mut run = tokio::spawn(Arc::clone(&source).run());
    let finished = tokio::select! {
        res = &mut run => Some(res),
        _ = tokio::signal::ctrl_c() => None,
    };
    let joined = match finished {
        Some(res) => res,
        None => {
            info!("interrupted, shutting down");
            source.shutdown(None);
            run.await
        }
    };
    let outcome = joined.map_err(|e| anyhow!("file source task: {e}"))?;

    let metrics = serde_json::to_string(&source.metrics())?;
    eprintln!("{metrics}");
    outcome.map_err(Into::into)
}

async fn cmd_payload(args: &[String]) -> anyhow::Result<()> {
    let id = parse_flag(args, "--id").ok_or_else(|| anyhow!("--id is required"))?;
    let num = parse_num(args, "--num")?.ok_or_else(|| anyhow!("--num is required"))?;

    let retry_limit = match parse_num(args, "--retry-limit")? {
        Some(limit) => narrow(limit, "--retry-limit")?,
        None => 0,
    };

    let (primary, secondaries) = stores(args)?;
    let cache = Arc::new(MemoryPayloadCache::new(PAYLOAD_CACHE_BYTES, 0));
    let mut ctx = PayloadCacheContext::new(cache.clone(), primary)
        .with_secondary_blocks_stores(secondaries)
        .with_recovery_retry_limit(retry_limit);
    if let Some(ms) = parse_num(args, "--retry-ms")? {
        ctx = ctx.with_retry_delay(Duration::from_millis(ms));
    }

    let data = ctx.fetch_payload(&id, num).await?;
    info!(block_id = %id, cached = cache.contains(&id), "payload retrieved");
    println!("#{num} ({id}) payload_bytes={}", data.len());
    println!("{}", hex::encode(&data));
    Ok(())
}

/// Converts a parsed flag value to a narrower integer type, rejecting values
/// that do not fit.
fn narrow<T: TryFrom<u64>>(n: u64, flag: &str) -> anyhow::Result<T>
where
    T::Error: std::error::Error + Send + Sync + 'static,
{
    T::try_from(n).with_context(|| format!("{flag} value {n} is out of range"))
}

type Stores = (Arc<dyn ObjectStore>, Vec<Arc<dyn ObjectStore>>);

fn stores(args: &[String]) -> anyhow::Result<Stores> {
    let root = parse_flag(args, "--store").ok_or_else(|| anyhow!("--store is required"))?;
    let extension = parse_flag(args, "--extension");
    let open = |dir: String| -> Arc<dyn ObjectStore> {
        let store = LocalObjectStore::new(dir);
        match &extension {
            Some(ext) => Arc::new(store.with_extension(ext.clone())),
            None => Arc::new(store),
        }
    };

    let secondaries = parse_flags(args, "--secondary").into_iter().map(&open).collect();
    Ok((open(root), secondaries))
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

/// Every value given for a repeatable flag, in order.
fn parse_flags(args: &[String], flag: &str) -> Vec<String> {
    args.windows(2)
        .filter(|pair| pair[0] == flag)
        .map(|pair| pair[1].clone())
        .collect()
}

fn parse_num(args: &[String], flag: &str) -> anyhow::Result<Option<u64>> {
    match parse_flag(args, flag) {
        Some(raw) => {
            let n = raw
                .replace('_', "")
                .parse::<u64>()
                .with_context(|| format!("{flag} expects a number, got {raw:?}"))?;
            Ok(Some(n))
        }
        None => Ok(None),
    }
}
