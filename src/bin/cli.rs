//! mapkv CLI
//!
//! Local administration tool: inspect and edit a store directly on disk.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use mapkv::wal::WalRecovery;
use mapkv::{Config, ProcessMode, Store};
use tracing_subscriber::{fmt, EnvFilter};

/// mapkv CLI
#[derive(Parser, Debug)]
#[command(name = "mapkv-cli")]
#[command(about = "Inspect and edit mapkv stores")]
#[command(version)]
struct Args {
    /// Root directory holding the store files
    #[arg(short, long, default_value = "./mapkv_data")]
    root: PathBuf,

    /// Store id
    #[arg(short, long, default_value = "mapkv.default")]
    id: String,

    /// Take file locks so running processes can share the store
    #[arg(short, long)]
    multi_process: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        key: String,

        /// Print the value as hex instead of text
        #[arg(long)]
        hex: bool,
    },

    /// Set a key to a string value
    Set { key: String, value: String },

    /// Set a key to the contents of a file
    SetFile { key: String, path: PathBuf },

    /// Remove one or more keys
    Remove {
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// List all keys
    Keys,

    /// Remove every key
    Clear,

    /// Rewrite the log to live entries only
    Compact,

    /// Print size and count statistics
    Stats,

    /// Scan the data file without opening the store
    Verify,
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,mapkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> mapkv::Result<ExitCode> {
    let config = Config::builder()
        .root_dir(&args.root)
        .store_id(&args.id)
        .mode(if args.multi_process {
            ProcessMode::MultiProcess
        } else {
            ProcessMode::SingleProcess
        })
        .build();

    if let Commands::Verify = args.command {
        let result = WalRecovery::verify(&config.data_path())?;
        println!("frames:     {}", result.frames_recovered);
        println!("tombstones: {}", result.tombstones);
        println!("valid end:  {}", result.end_offset);
        if result.was_truncated {
            println!("torn tail:  {} bytes", result.discarded_bytes);
            return Ok(ExitCode::FAILURE);
        }
        println!("ok");
        return Ok(ExitCode::SUCCESS);
    }

    let store = Store::open(config)?;

    match args.command {
        Commands::Get { key, hex } => match store.get_bytes(&key)? {
            Some(value) if hex => println!("{}", to_hex(&value)),
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => {
                println!("(nil)");
                return Ok(ExitCode::FAILURE);
            }
        },
        Commands::Set { key, value } => {
            store.set(&key, &value)?;
            println!("OK");
        }
        Commands::SetFile { key, path } => {
            let value = std::fs::read(&path)?;
            store.set(&key, &value)?;
            println!("OK ({} bytes)", value.len());
        }
        Commands::Remove { keys } => {
            let removed = store.remove_many(&keys)?;
            println!("{}", removed);
        }
        Commands::Keys => {
            for key in store.all_keys()? {
                println!("{}", String::from_utf8_lossy(&key));
            }
        }
        Commands::Clear => {
            store.clear_all()?;
            println!("OK");
        }
        Commands::Compact => {
            if store.compact()? {
                println!("compacted");
            } else {
                println!("nothing to reclaim");
            }
        }
        Commands::Stats => {
            let stats = store.stats()?;
            println!("id:          {}", stats.id);
            println!("keys:        {}", stats.count);
            println!("tombstones:  {}", stats.tombstones);
            println!("actual size: {}", stats.actual_size);
            println!("total size:  {}", stats.total_size);
            println!("live bytes:  {}", stats.live_bytes);
            println!("stale bytes: {}", stats.stale_bytes);
            println!("generation:  {}", stats.generation);
            println!("epoch:       {}", stats.epoch);
        }
        Commands::Verify => unreachable!("handled before opening the store"),
    }

    store.close()?;
    Ok(ExitCode::SUCCESS)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        write!(out, "{:02x}", b).ok();
        out
    })
}
