//! Demand pager - Main Entry Point
//!
//! Loads each image as its own process, replays an access trace against them
//! and writes the physical address of every access (or -1) to the output file.
//!
//! Usage: demand-pager [OPTIONS] --image <FILE>... <INPUT> <OUTPUT>

use std::collections::HashMap;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{ArgAction, Parser};
use log::{info, warn, LevelFilter};

use demand_pager::io::{read_trace, write_results};
use demand_pager::{
    AddressSpace, Error, EvictionKind, FileImage, Machine, PagerConfig, ProcessId, Result, TranslationUnit,
    INVALID_ADDRESS,
};

/// Demand-paged virtual memory simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Executable image in NOFF format, repeatable; the n-th image runs as pid n
    #[arg(short, long = "image", value_name = "FILE", required = true)]
    images: Vec<PathBuf>,

    /// Access trace: whitespace-separated `pid vaddr` pairs
    input: PathBuf,

    /// Output file for physical addresses
    output: PathBuf,

    /// TOML machine configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of physical frames
    #[arg(long)]
    frames: Option<usize>,

    /// Page size in bytes
    #[arg(long)]
    page_size: Option<usize>,

    /// Eviction policy (random, lru)
    #[arg(long)]
    policy: Option<EvictionKind>,

    /// Seed for the random eviction policy
    #[arg(long)]
    seed: Option<u64>,

    /// Map pages lying entirely in the code segment read-only
    #[arg(long)]
    read_only_code: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(&cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

/// File values first, command-line flags on top.
fn load_config(cli: &Cli) -> Result<PagerConfig> {
    let mut config = match &cli.config {
        Some(path) => PagerConfig::from_file(path)?,
        None => PagerConfig::default(),
    };
    if let Some(frames) = cli.frames {
        config.num_phys_pages = frames;
    }
    if let Some(page_size) = cli.page_size {
        config.page_size = page_size;
    }
    if let Some(policy) = cli.policy {
        config.eviction = policy;
    }
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }
    if cli.read_only_code {
        config.read_only_code = true;
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let machine = Machine::new(config)?;

    let mut spaces: HashMap<ProcessId, Arc<AddressSpace>> = HashMap::new();
    for path in &cli.images {
        let image = FileImage::open(path)?;
        let space = AddressSpace::create(&machine, Box::new(image))?;
        info!("{} loaded from {}", space.pid(), path.display());
        spaces.insert(space.pid(), space);
    }

    let accesses = read_trace(&cli.input)?;
    info!("replaying {} accesses", accesses.len());

    let mut unit = TranslationUnit::new(Arc::clone(&machine));
    let mut current: Option<ProcessId> = None;
    let mut results = Vec::with_capacity(accesses.len());

    for access in &accesses {
        let space = match spaces.get(&access.pid).ok_or(Error::UnknownProcess(access.pid)) {
            Ok(space) => space,
            Err(e) => {
                warn!("access to {:#x}: {}", access.vaddr, e);
                results.push(INVALID_ADDRESS);
                continue;
            }
        };
        if current != Some(access.pid) {
            if let Some(prev) = current.and_then(|pid| spaces.get(&pid)) {
                prev.save_state();
            }
            space.restore_state(&mut unit);
            current = Some(access.pid);
        }

        match unit.translate_with_demand_paging(space, access.vaddr, false) {
            Ok(paddr) => results.push(paddr as i64),
            Err(e) => {
                warn!("{}: {}", access.pid, e);
                results.push(INVALID_ADDRESS);
            }
        }
    }

    let failures = results.iter().filter(|&&r| r < 0).count();
    info!(
        "{} successful translations, {} failed",
        results.len() - failures,
        failures
    );
    info!("{}", machine.stats());

    write_results(&cli.output, &results)?;
    info!("results written to {}", cli.output.display());
    Ok(())
}
