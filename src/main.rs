use anyhow::Result;
use clap::{Parser, Subcommand};
use proxy_checker::proxy::engine::{DEFAULT_TEST_URL, DEFAULT_TIMEOUT_MS, DEFAULT_WORKERS};
use proxy_checker::{EngineConfig, EngineEvent, ProxyParser, VerificationEngine};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// A concurrent proxy liveness checker
#[derive(Parser)]
#[command(name = "proxy-checker")]
#[command(about = "Checks proxy lists for live endpoints with a layered TCP/HTTP(S) probe")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify every proxy in a list file
    Check {
        /// Input file containing proxies (host:port or host:port:kind)
        input: PathBuf,
        /// Output file for valid proxies
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Probe timeout in milliseconds
        #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS)]
        timeout_ms: u64,
        /// Number of concurrent workers
        #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
        workers: usize,
        /// URL to test proxies against
        #[arg(long, default_value = DEFAULT_TEST_URL)]
        test_url: String,
        /// Skip the HTTPS stage of the probe
        #[arg(long)]
        no_https: bool,
    },
    /// Parse a proxy list without checking it
    Parse {
        /// Input file containing proxies
        input: PathBuf,
        /// Output file for parsed proxies
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check {
            input,
            output,
            timeout_ms,
            workers,
            test_url,
            no_https,
        } => check(input, output, timeout_ms, workers, test_url, no_https).await,
        Commands::Parse { input, output } => parse(input, output),
    }
}

async fn check(
    input: PathBuf,
    output: Option<PathBuf>,
    timeout_ms: u64,
    workers: usize,
    test_url: String,
    no_https: bool,
) -> Result<()> {
    let config = EngineConfig::new()
        .with_timeout(Duration::from_millis(timeout_ms))
        .with_workers(workers)
        .with_test_url(test_url)
        .with_test_https(!no_https);

    let (engine, mut events) = VerificationEngine::with_config(config);

    let loaded = engine.load_from_file(&input)?;
    if loaded == 0 {
        println!("No proxies found in {:?}", input);
        return Ok(());
    }

    println!("Checking {} proxies, press Ctrl+C to cancel", loaded);
    println!();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(EngineEvent::Checked(record)) => {
                    println!("{} - {}", record.address(), record.status_string());
                }
                Some(EngineEvent::Status(message)) => println!(">> {}", message),
                Some(EngineEvent::Completed) | None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                engine.cancel().await;
                break;
            }
        }
    }

    println!();
    print!("{}", engine.statistics());

    if let Some(path) = output {
        let written = engine.export_valid(&path)?;
        println!("Saved {} valid proxies to {:?}", written, path);
    }

    Ok(())
}

fn parse(input: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let records = ProxyParser::parse_file(&input)?;
    println!("Parsed {} proxies from {:?}", records.len(), input);

    match output {
        Some(path) => {
            let written = ProxyParser::write_export(&path, "parsed proxies", &records)?;
            println!("Saved {} proxies to {:?}", written, path);
        }
        None => {
            for record in &records {
                println!("{}", record.to_file_format());
            }
        }
    }

    Ok(())
}
