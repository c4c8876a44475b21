mod handlers;
mod runner;
mod server;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use kvsem_core::config::SemaphoreConfig;
use kvsem_core::infrastructure_consul::ConsulKvStore;
use kvsem_core::semaphore::Semaphore;
use kvsem_core::types::ResourceDescriptor;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "kvsem",
    about = "kvsem: distributed counting semaphore over a Consul-compatible KV store",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a local Consul-compatible session/KV server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8500")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Storage backend: "memory" or "sqlite:<path>"
        #[arg(long, default_value = "memory", env = "KVSEM_STORAGE")]
        storage: String,
    },

    /// Acquire slots, run a command while holding them, then release
    Run {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        semaphore: SemaphoreArgs,

        /// Command to run while the slots are held
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    /// Print the holder maps of the given resources as JSON
    Status {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        semaphore: SemaphoreArgs,
    },

    /// Print version information
    Version,
}

#[derive(Args)]
struct TargetArgs {
    /// Address of the Consul agent or `kvsem serve`
    #[arg(long, default_value = "http://127.0.0.1:8500", env = "KVSEM_CONSUL_ADDR")]
    addr: String,

    /// ACL token
    #[arg(long, env = "KVSEM_TOKEN")]
    token: Option<String>,
}

#[derive(Args)]
struct SemaphoreArgs {
    /// Resource as name:limit[:slots]; repeat for several, order matters
    #[arg(short, long = "resource")]
    resources: Vec<ResourceDescriptor>,

    /// JSON semaphore config; flags given alongside override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Key prefix for flag entries and holder maps
    #[arg(long, env = "KVSEM_PREFIX")]
    prefix: Option<String>,

    /// Session TTL in seconds
    #[arg(long)]
    ttl: Option<u64>,
}

impl TargetArgs {
    fn store(&self) -> ConsulKvStore {
        let store = ConsulKvStore::new(&self.addr);
        match &self.token {
            Some(token) => store.with_token(token),
            None => store,
        }
    }
}

impl SemaphoreArgs {
    fn load(self) -> Result<SemaphoreConfig, String> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| format!("Failed to read config '{}': {}", path.display(), e))?;
                serde_json::from_str(&raw)
                    .map_err(|e| format!("Invalid config '{}': {}", path.display(), e))?
            }
            None => SemaphoreConfig::new(Vec::new(), 15, "kvsem"),
        };

        if !self.resources.is_empty() {
            config.resources = self.resources;
        }
        if let Some(prefix) = self.prefix {
            config.key_prefix = prefix;
        }
        if let Some(ttl) = self.ttl {
            config.ttl_secs = ttl;
        }

        config.validate().map_err(|e| e.to_string())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve { port, host, storage } => server::run(&host, port, &storage)
            .await
            .map(|_| ExitCode::SUCCESS),
        Commands::Run {
            target,
            semaphore,
            command,
        } => match semaphore.load() {
            Ok(config) => runner::run(target.store(), config, command).await,
            Err(e) => Err(e),
        },
        Commands::Status { target, semaphore } => status(target, semaphore).await,
        Commands::Version => {
            println!("kvsem {}", env!("CARGO_PKG_VERSION"));
            println!("Distributed counting semaphore over a session/CAS key-value store");
            Ok(ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn status(target: TargetArgs, semaphore: SemaphoreArgs) -> Result<ExitCode, String> {
    let config = semaphore.load()?;
    let store = target.store();

    let statuses = tokio::task::spawn_blocking(move || {
        Semaphore::new(store, config)
            .and_then(|sem| sem.holder_maps())
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| e.to_string())??;

    let json = serde_json::to_string_pretty(&statuses).map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(ExitCode::SUCCESS)
}
