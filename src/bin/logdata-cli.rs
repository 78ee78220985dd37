use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use telemetry_agent::config::{LogReportingConfig, ObservabilityConfig, TransportConfig};
use telemetry_agent::logging::store::{self, LogFileState};
use telemetry_agent::logging::{LogForwarder, LogReporter};
use telemetry_agent::observability::{init_tracing, SupportabilityStats};

#[derive(Parser)]
#[command(name = "logdata-cli")]
#[command(about = "Maintenance CLI for the telemetry agent's log data store", long_about = None)]
struct Cli {
    /// Agent data directory (the store lives in its `logreporting` subdirectory)
    #[arg(short, long, default_value_os_t = std::env::temp_dir())]
    data_dir: PathBuf,

    /// Payload budget used when merging closed files
    #[arg(long, default_value_t = 1024 * 1000)]
    payload_limit: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List log data files with their state and size
    List,
    /// Close the working file
    Roll,
    /// Merge closed files into an upload-ready rollup
    Rollup,
    /// Soft-delete files older than the given age
    Expire {
        #[arg(long, default_value_t = 2 * 24 * 60 * 60)]
        ttl_secs: u64,
    },
    /// Physically remove soft-deleted files
    Cleanup,
    /// Restore soft-deleted files
    Recover,
    /// Upload every pending rollup
    Upload {
        #[arg(long)]
        collector_host: String,

        #[arg(long, default_value = "")]
        token: String,

        /// Use plain http
        #[arg(long)]
        insecure: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&ObservabilityConfig {
        log_level: "warn".to_string(),
        ..ObservabilityConfig::default()
    });

    let config = LogReportingConfig {
        enabled: true,
        data_dir: cli.data_dir.clone(),
        payload_limit_bytes: cli.payload_limit,
        ..LogReportingConfig::default()
    };
    let mut transport = TransportConfig::default();
    if let Commands::Upload {
        collector_host,
        token,
        insecure,
    } = &cli.command
    {
        transport.collector_host = collector_host.clone();
        transport.application_token = token.clone();
        transport.use_ssl = !insecure;
    }

    let stats = Arc::new(SupportabilityStats::new());
    let forwarder = Arc::new(LogForwarder::new(&transport)?);
    let reporter = LogReporter::new(&config, stats.clone(), forwarder)?;

    match cli.command {
        Commands::List => {
            let mut files = store::list_all(reporter.store_dir())?;
            files.sort_by_key(|(path, _)| (store::timestamp_of(path).unwrap_or(0), path.clone()));
            println!("{:<10} {:>10}  FILE", "STATE", "BYTES");
            for (path, state) in files {
                let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                let name = path.file_name().unwrap_or_default().to_string_lossy();
                println!("{:<10} {:>10}  {}", state.as_str(), size, name);
            }
        }
        Commands::Roll => match reporter.roll_working_file()? {
            Some(path) => println!("Closed {}", path.display()),
            None => println!("Working file is empty"),
        },
        Commands::Rollup => match reporter.rollup()? {
            Some(path) => println!("Created {}", path.display()),
            None => println!("Nothing to roll up"),
        },
        Commands::Expire { ttl_secs } => {
            let expired = reporter.expire(Duration::from_secs(ttl_secs))?;
            println!("Expired {} file(s)", expired.len());
        }
        Commands::Cleanup => {
            let removed = reporter.cleanup()?;
            println!("Removed {} file(s)", removed.len());
        }
        Commands::Recover => {
            for path in reporter.recover()? {
                println!("Recovered {}", path.display());
            }
        }
        Commands::Upload { .. } => {
            let rollups = store::list(reporter.store_dir(), LogFileState::Rollup)?;
            if rollups.is_empty() {
                println!("No rollups to upload");
            }
            for rollup in rollups {
                let outcome = reporter.upload(&rollup).await?;
                println!("{:?}: {}", outcome, rollup.display());
            }
        }
    }

    for (name, sample) in stats.snapshot() {
        println!("{name}: {}", sample.count);
    }

    Ok(())
}
