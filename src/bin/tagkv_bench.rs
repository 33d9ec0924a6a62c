//! In-process load generator for tagkv.
//!
//! Runs set/get/incr/del and packed zset increments against an in-memory or
//! on-disk database and prints one timing row per workload.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tagkv::packed::encode_blob;
use tagkv::{
    Config, CounterMetrics, Db, DbOptions, MergeStrategy, OpMetrics, PackedRecord, SyncMode,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() {
    init_tracing();
    if let Err(err) = try_main() {
        eprintln!("tagkv-bench failed: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TAGKV_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

#[derive(Parser, Debug)]
struct Args {
    /// Database directory; runs in memory when omitted.
    #[arg(long)]
    dir: Option<PathBuf>,

    /// TOML config file; command-line flags override it.
    #[arg(long, env = "TAGKV_CONFIG")]
    config: Option<PathBuf>,

    /// Number of operations per workload.
    #[arg(long, default_value_t = 10_000)]
    ops: usize,

    /// Distinct keys the workload draws from.
    #[arg(long, default_value_t = 1_000)]
    keys: usize,

    /// Records per packed zset increment.
    #[arg(long, default_value_t = 16)]
    batch: usize,

    /// Member lookup used by packed zset merges.
    #[arg(long, value_enum)]
    merge: Option<MergeArg>,

    /// Engine sync policy for on-disk runs.
    #[arg(long, value_enum)]
    sync: Option<SyncArg>,

    /// RNG seed for repeatable workloads.
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[derive(Clone, Copy, Debug, ValueEnum, Eq, PartialEq)]
#[value(rename_all = "kebab_case")]
enum MergeArg {
    Linear,
    Hashed,
}

#[derive(Clone, Copy, Debug, ValueEnum, Eq, PartialEq)]
#[value(rename_all = "kebab_case")]
enum SyncArg {
    Full,
    Normal,
    Off,
}

/// Benchmark result
#[derive(Debug)]
struct BenchResult {
    name: &'static str,
    ops: usize,
    time: Duration,
}

impl BenchResult {
    fn print_header(section: &str) {
        println!("\n{}", section.to_uppercase());
        println!(
            "{:<12} {:>10} {:>15} {:>15}",
            "WORKLOAD", "OPS", "TIME", "OPS/SEC"
        );
    }

    fn print(&self) {
        let secs = self.time.as_secs_f64();
        let rate = if secs > 0.0 {
            self.ops as f64 / secs
        } else {
            0.0
        };
        println!(
            "{:<12} {:>10} {:>15} {:>15.0}",
            self.name,
            self.ops,
            format_duration(self.time),
            rate
        );
    }
}

fn format_duration(d: Duration) -> String {
    let micros = d.as_micros();
    if micros < 1_000 {
        format!("{} µs", micros)
    } else if micros < 1_000_000 {
        format!("{:.2} ms", micros as f64 / 1_000.0)
    } else {
        format!("{:.2} s", micros as f64 / 1_000_000.0)
    }
}

fn bench<F>(name: &'static str, ops: usize, f: F) -> Result<BenchResult, Box<dyn Error>>
where
    F: FnOnce() -> Result<(), Box<dyn Error>>,
{
    let start = Instant::now();
    f()?;
    Ok(BenchResult {
        name,
        ops,
        time: start.elapsed(),
    })
}

fn options(args: &Args) -> Result<DbOptions, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(merge) = args.merge {
        config.merge_strategy = match merge {
            MergeArg::Linear => MergeStrategy::Linear,
            MergeArg::Hashed => MergeStrategy::Hashed,
        };
    }
    if let Some(sync) = args.sync {
        config.sync_mode = match sync {
            SyncArg::Full => SyncMode::Full,
            SyncArg::Normal => SyncMode::Normal,
            SyncArg::Off => SyncMode::Off,
        };
    }
    Ok(config.into_options())
}

fn key(i: usize) -> Vec<u8> {
    format!("key:{i:08}").into_bytes()
}

fn try_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let metrics = Arc::new(CounterMetrics::default());
    let options = options(&args)?.metrics(metrics.clone());
    let db = match &args.dir {
        Some(dir) => Db::open(dir, options)?,
        None => Db::open_in_memory(options)?,
    };
    info!(
        ops = args.ops,
        keys = args.keys,
        batch = args.batch,
        merge = db.options().merge_strategy.label(),
        "bench.start"
    );

    let keys = args.keys.max(1);
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let mut results = Vec::new();

    results.push(bench("set", args.ops, || {
        for i in 0..args.ops {
            db.set(&key(i % keys), format!("value-{i}").as_bytes())?;
        }
        Ok(())
    })?);

    let mut reads = ChaCha8Rng::seed_from_u64(args.seed);
    results.push(bench("get", args.ops, || {
        for _ in 0..args.ops {
            db.get(&key(reads.gen_range(0..keys)))?;
        }
        Ok(())
    })?);

    results.push(bench("incr", args.ops, || {
        for i in 0..args.ops {
            db.incr(format!("counter:{}", i % keys).as_bytes(), 1)?;
        }
        Ok(())
    })?);

    results.push(bench("zincr", args.ops, || {
        for _ in 0..args.ops {
            let records: Vec<PackedRecord> = (0..args.batch)
                .map(|_| PackedRecord::new(rng.gen_range(1..100), rng.gen_range(0..10_000)))
                .collect();
            let board = rng.gen_range(0..keys.min(64));
            db.incr_zset(format!("board:{board}").as_bytes(), &encode_blob(&records))?;
        }
        Ok(())
    })?);

    results.push(bench("del", args.ops, || {
        for i in 0..args.ops {
            db.del(&key(i % keys))?;
        }
        Ok(())
    })?);

    BenchResult::print_header("tagkv");
    for result in &results {
        result.print();
    }
    if let Some(report) = metrics.report() {
        println!("\n{report}");
    }
    println!("{}", db.binlogs().stats());
    Ok(())
}
