use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use firehose::jetstream::{DefaultJetstreamEndpoints, JetstreamConfig, JetstreamSource};
use firehose::subscribe_repos::{SubscribeReposConfig, SubscribeReposSource, DEFAULT_RELAY};
use firehose::{EventSource, RecordOpener};
use ingester::cache::{DEFAULT_REFRESH_TIMEOUT, DEFAULT_SYNC_INTERVAL};
use ingester::handler::DEFAULT_SUBJECT_DID;
use ingester::{telemetry, ActorCache, FirehoseIngester, IngesterConfig, MemStore, SqliteStore, Store};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tagger::record::nsid;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Follow the atproto firehose and index posts from tracked accounts
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Upstream protocol to consume
    #[arg(long)]
    #[clap(value_enum, default_value_t = Transport::Jetstream)]
    transport: Transport,
    /// Upstream server. For jetstream, a wss:// URL or one of the shorthands
    /// 'us-east-1', 'us-east-2', 'us-west-1', 'us-west-2'. Defaults to the
    /// transport's public endpoint
    #[arg(short, long)]
    endpoint: Option<String>,
    /// Storage backend to use
    #[arg(short, long)]
    #[clap(value_enum, default_value_t = StorageBackend::Sqlite)]
    backend: StorageBackend,
    /// Database file, for backends that use disk storage
    #[arg(short, long, default_value = "ingester.sqlite")]
    data: PathBuf,
    /// Number of event handling workers
    #[arg(long, default_value_t = 8)]
    workers: usize,
    /// Give up on a single commit after this many seconds
    #[arg(long, default_value_t = 30)]
    work_item_timeout: u64,
    /// Seconds between cursor flushes
    #[arg(long, default_value_t = 10)]
    cursor_flush_interval: u64,
    /// Seconds between full actor cache refreshes
    #[arg(long, default_value_t = DEFAULT_SYNC_INTERVAL.as_secs())]
    actor_sync_interval: u64,
    /// Give up on a single actor cache refresh after this many seconds
    #[arg(long, default_value_t = DEFAULT_REFRESH_TIMEOUT.as_secs())]
    actor_refresh_timeout: u64,
    /// Accounts following this DID are tracked
    #[arg(long, default_value = DEFAULT_SUBJECT_DID)]
    subject_did: String,
    /// Skip record hash verification on the firehose transport
    #[arg(long, action)]
    trust_relay: bool,
    /// Sent along with the connection request
    #[arg(long)]
    user_agent: Option<String>,
    /// Serve prometheus metrics on this address
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,
}

#[derive(Debug, Clone, ValueEnum)]
enum Transport {
    /// JSON events from a jetstream instance
    Jetstream,
    /// CBOR frames from a relay's com.atproto.sync.subscribeRepos
    Firehose,
}

#[derive(Debug, Clone, ValueEnum)]
enum StorageBackend {
    Memory,
    Sqlite,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if let Some(addr) = args.metrics_addr {
        telemetry::install(addr).context("starting metrics server")?;
        info!(%addr, "serving metrics");
    } else {
        telemetry::describe_metrics();
    }

    let store: Arc<dyn Store> = match args.backend {
        StorageBackend::Memory => Arc::new(MemStore::new()),
        StorageBackend::Sqlite => Arc::new(
            SqliteStore::open(&args.data)
                .with_context(|| format!("opening database at {:?}", args.data))?,
        ),
    };
    info!(backend = ?args.backend, "storage ready");

    let (source, opener) = build_source(&args)?;

    let cache = Arc::new(
        ActorCache::new(store.clone())
            .with_refresh_timeout(Duration::from_secs(args.actor_refresh_timeout)),
    );
    let tracked = cache.sync().await.context("initial actor cache load")?;
    info!(tracked, "actor cache loaded");

    let stay_alive = CancellationToken::new();
    ctrlc::set_handler({
        let mut desperation: u8 = 0;
        let stay_alive = stay_alive.clone();
        move || match desperation {
            0 => {
                info!("ok, shutting down...");
                stay_alive.cancel();
                desperation += 1;
            }
            1.. => panic!("fine, panicking!"),
        }
    })?;

    let refresher = tokio::spawn({
        let cache = cache.clone();
        let stay_alive = stay_alive.clone();
        let interval = Duration::from_secs(args.actor_sync_interval);
        async move { cache.start(interval, stay_alive).await }
    });

    let config = IngesterConfig {
        worker_count: args.workers,
        work_item_timeout: Duration::from_secs(args.work_item_timeout),
        cursor_flush_interval: Duration::from_secs(args.cursor_flush_interval),
        subject_did: args.subject_did,
    };
    let ingester = FirehoseIngester::new(store, cache, source, opener, config);
    let result = ingester.start(stay_alive.clone()).await;

    stay_alive.cancel();
    refresher.await?;

    match result {
        Ok(()) => {
            info!("byeeee");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "ingester finished with error");
            Err(e.into())
        }
    }
}

fn build_source(args: &Args) -> Result<(Arc<dyn EventSource>, RecordOpener)> {
    match args.transport {
        Transport::Jetstream => {
            let endpoint = args
                .endpoint
                .as_deref()
                .map(DefaultJetstreamEndpoints::endpoint_or_shortcut)
                .unwrap_or_else(|| DefaultJetstreamEndpoints::USEastOne.into());
            info!(%endpoint, "using jetstream");
            let config = JetstreamConfig {
                endpoint,
                wanted_collections: [
                    nsid::FEED_POST,
                    nsid::FEED_LIKE,
                    nsid::GRAPH_FOLLOW,
                    nsid::ACTOR_PROFILE,
                ]
                .map(String::from)
                .to_vec(),
                wanted_dids: vec![],
                user_agent: args.user_agent.clone(),
            };
            let source = JetstreamSource::new(config).context("jetstream config")?;
            // jetstream ships decoded json, there is no block to check
            Ok((Arc::new(source), RecordOpener::trusting()))
        }
        Transport::Firehose => {
            let endpoint = args.endpoint.clone().unwrap_or_else(|| DEFAULT_RELAY.into());
            info!(%endpoint, trust_relay = args.trust_relay, "using relay firehose");
            let source = SubscribeReposSource::new(SubscribeReposConfig {
                endpoint,
                user_agent: args.user_agent.clone(),
            })
            .context("relay config")?;
            let opener = if args.trust_relay {
                RecordOpener::trusting()
            } else {
                RecordOpener::verifying()
            };
            Ok((Arc::new(source), opener))
        }
    }
}
