//! target-s3-jsonl
//!
//! Reads Singer messages from stdin, writes one JSON Lines file per stream
//! and uploads the files to S3. The last STATE is echoed on stdout once
//! everything is uploaded.
//!
//! Usage:
//!   target-s3-jsonl --config config.json < messages.jsonl

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use clap::Parser;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use target_s3_jsonl::observability::{init_tracing, LoggingConfig};
use target_s3_jsonl::streaming::SystemClock;
use target_s3_jsonl::upload::S3ObjectStore;
use target_s3_jsonl::{run, Config, TargetError};
use tracing::error;

#[derive(Debug, Parser)]
#[command(name = "target-s3-jsonl", version, about = "Singer target writing JSON Lines files to S3")]
struct Args {
    /// Config file
    #[arg(short, long)]
    config: PathBuf,
}

async fn execute(args: Args) -> Result<(), TargetError> {
    let config = Config::from_file(&args.config)?;
    let store = S3ObjectStore::from_config(&config)?;

    let input = BufReader::new(std::io::stdin());
    let mut output = std::io::stdout();
    run(&config, Arc::new(store), &SystemClock, input, &mut output).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing(&LoggingConfig::from_env());
    let args = Args::parse();

    match execute(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
