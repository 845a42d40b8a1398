//! Binary entrypoint
//!
//! Parses the connection bootstrap flags, wires the collaborators, and
//! runs the service until SIGINT. This binary wires the in-memory
//! reference backends; a deployment swaps in the relational store, the
//! shared cache backend, and the real task-queue dispatcher behind the
//! same traits.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use candle_store::{
    BackfillCoordinator, BackfillMarkers, ChannelDispatcher, KvCandleCache, MemoryCandleStore,
    MemoryKvStore,
};
use streamer::catalog::{StaticCatalog, StaticWatchlist};
use streamer::config::{Credentials, EndpointConfig, StreamerConfig};
use streamer::runtime::{self, Collaborators};
use types::asset::{AssetClass, AssetInfo};
use types::ids::AssetId;

/// Live candle streaming service.
#[derive(Debug, Parser)]
#[command(name = "streamer", version = streamer::SERVICE_VERSION)]
struct Args {
    /// Connect to the vendor sandbox stream.
    #[arg(long)]
    sandbox: bool,

    /// Data feed segment of the stream path.
    #[arg(long, default_value = "iex")]
    feed: String,

    /// Stream key id.
    #[arg(long, env = "APCA_API_KEY", hide_env_values = true)]
    key: String,

    /// Stream secret.
    #[arg(long, env = "APCA_API_SECRET_KEY", hide_env_values = true)]
    secret: String,

    /// Symbols for the built-in static watchlist.
    #[arg(long, value_delimiter = ',', default_value = "AAPL,MSFT")]
    symbols: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    info!(
        version = streamer::SERVICE_VERSION,
        sandbox = args.sandbox,
        feed = %args.feed,
        "starting candle streaming service"
    );

    let config = StreamerConfig {
        endpoint: EndpointConfig {
            sandbox: args.sandbox,
            feed: args.feed.clone(),
        },
        ..StreamerConfig::default()
    };
    let credentials = Credentials {
        key: args.key.clone(),
        secret: args.secret.clone(),
    };

    // In-memory reference wiring. Symbols with a slash are treated as
    // crypto pairs, everything else as listed equities.
    let kv = Arc::new(MemoryKvStore::new());
    let store = Arc::new(MemoryCandleStore::with_cache(Arc::new(KvCandleCache::new(
        kv.clone(),
    ))));
    let catalog = Arc::new(StaticCatalog::new(args.symbols.iter().enumerate().map(
        |(idx, symbol)| {
            let class = if symbol.contains('/') {
                AssetClass::Crypto
            } else {
                AssetClass::UsEquity
            };
            AssetInfo::new(AssetId::new(idx as i64 + 1), symbol.clone(), class)
        },
    )));
    let watchlists = Arc::new(StaticWatchlist::new(args.symbols.iter().cloned()));

    let markers = BackfillMarkers::new(kv.clone());
    let (dispatcher, mut backfill_rx) = ChannelDispatcher::new();
    let coordinator = Arc::new(BackfillCoordinator::new(markers, dispatcher));

    // The historical backfill job runs as a separate process; here the
    // queue end just logs what would be dispatched to it.
    tokio::spawn(async move {
        while let Some(request) = backfill_rx.recv().await {
            info!(
                job_id = %request.job_id,
                asset_id = %request.asset_id,
                source = %request.source,
                "backfill request queued for external worker"
            );
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let service = tokio::spawn(runtime::run(
        config,
        credentials,
        Collaborators {
            store,
            kv,
            catalog,
            watchlists,
            coordinator,
        },
        shutdown_rx,
    ));

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");
    let _ = shutdown_tx.send(true);
    service.await?;
    Ok(())
}
