//! exthash CLI: inspect and edit a map's records from the command line.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use exthash::HashMap;

#[derive(Parser)]
#[command(name = "exthash", version, about = "Memory-mapped key/value store backed by an extendible hash index")]
struct Cli {
    /// Base path for the map; subfiles are `<base>.dat` and `<base>.cat`.
    map: PathBuf,

    /// Emit debug-level logs.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the value stored for a key, if any.
    Get { key: String },
    /// Store a value for a key, creating it if absent.
    Put { key: String, value: String },
    /// Delete a key. Exits non-zero if it was not present.
    Remove { key: String },
    /// Print every stored key and value.
    Scan,
    /// Print bucket/directory byte usage.
    Stats,
}

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

fn main() -> Result<()> {
    let start = Instant::now();
    let cli = Cli::parse();
    exthash::utils::setup_logging(cli.verbose);

    let read_only = matches!(cli.command, Commands::Get { .. } | Commands::Scan | Commands::Stats);
    let mut map = HashMap::open(&cli.map, read_only)
        .with_context(|| format!("opening map at {}", cli.map.display()))?;

    match cli.command {
        Commands::Get { key } => {
            let hash = fnv1a(key.as_bytes());
            match map.find(hash, key.as_bytes()) {
                Some(value) => println!("{}", String::from_utf8_lossy(value)),
                None => {
                    log::warn!("key not found: {key}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Put { key, value } => {
            let hash = fnv1a(key.as_bytes());
            map.get(hash, key.as_bytes(), value.as_bytes())
                .context("storing record")?;
        }
        Commands::Remove { key } => {
            let hash = fnv1a(key.as_bytes());
            if !map.remove(hash, key.as_bytes()).context("removing record")? {
                log::warn!("key not found: {key}");
                std::process::exit(1);
            }
        }
        Commands::Scan => {
            for (key, value) in map.iter() {
                println!("{}\t{}", String::from_utf8_lossy(&key), String::from_utf8_lossy(&value));
            }
        }
        Commands::Stats => {
            println!("bytes allocated: {}", map.bytes_allocated());
        }
    }

    map.close().context("closing map")?;
    log::debug!("total time: {:?}", start.elapsed());
    Ok(())
}
