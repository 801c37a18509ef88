use clap::Parser;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;
use vaporkv_server::config::DEFAULT_PORT;
use vaporkv_server::store::StoreConfig;
use vaporkv_server::{Server, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "vaporkv-server")]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Maximum number of records held in RAM.
    #[arg(long)]
    max_records: Option<usize>,

    /// Maximum size of a single record's data in bytes.
    #[arg(long)]
    max_data_size: Option<usize>,

    /// Strict upper bound on record id and idempotency token length.
    #[arg(long)]
    max_id_size: Option<usize>,

    /// Seconds a record may sit untouched before eviction.
    #[arg(long)]
    eviction_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut store = StoreConfig::default();
    if let Some(max_records) = args.max_records {
        store.max_records = max_records;
    }
    if let Some(max_size) = args.max_data_size {
        store.max_size = max_size;
    }
    if let Some(max_id_size) = args.max_id_size {
        store.max_id_size = max_id_size;
    }
    if let Some(eviction_secs) = args.eviction_secs {
        store.eviction_secs = eviction_secs;
    }

    let address: SocketAddr = ([0, 0, 0, 0], args.port).into();
    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

    // Report the bound address once the listener is accepting connections.
    tokio::spawn(async move {
        if let Ok(addr) = ready_rx.await {
            tracing::info!(%addr, "server ready");
        }
    });

    Server::new(ServerConfig { address, store }).run(ready_tx).await?;
    Ok(())
}
