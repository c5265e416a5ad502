//! mies - resident/building agent engine

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mies::{
    acting::{Coordinator, RandomActionChooser, Stores},
    cache::{spawn_cleanup_task, BuildingMirror, ContentCache},
    config::Args,
    db::MongoClient,
    dispatch::{ActionHandlers, LocalDispatcher, NatsDispatcher, TaskDispatcher},
    life::{FloorNavigator, LifeCycle, Scheduler},
    nats::NatsClient,
    seed::seed_floor,
    smell::{LogPropagator, NatsPropagator, SmellPropagator},
    stats::{MemoryFloorStats, MongoFloorStats},
    store::{MemoryBuildingStore, MemoryResidentStore, MongoBuildingStore, MongoResidentStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    init_tracing(&args);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  mies - resident engine");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {}", args.mongodb_uri);
    info!("NATS: {}", args.nats.nats_url);
    info!("Tick: {}ms", args.tick_interval_ms);
    info!("Discard after: {}s", args.discard_after_secs);
    info!("======================================");

    // Connect to MongoDB (optional in dev mode)
    let mongo = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => {
            info!("MongoDB connected successfully");
            Some(client)
        }
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, using memory stores): {}", e);
                None
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    // Connect to NATS (optional in dev mode)
    let nats = match NatsClient::new(&args.nats, &format!("mies-{}", args.node_id)).await {
        Ok(client) => Some(client),
        Err(e) => {
            if args.dev_mode {
                warn!("NATS connection failed (dev mode, using in-process workers): {}", e);
                None
            } else {
                error!("NATS connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let cache = Arc::new(ContentCache::new(args.cache_config()));
    let _cleanup = spawn_cleanup_task(Arc::clone(&cache));
    let mirror = Arc::new(BuildingMirror::new(cache, &args.cache_config()));

    let stores = match &mongo {
        Some(client) => Stores {
            buildings: Arc::new(MongoBuildingStore::new(client).await?),
            residents: Arc::new(MongoResidentStore::new(client).await?),
            stats: Arc::new(MongoFloorStats::new(client).await?),
            mirror,
        },
        None => Stores {
            buildings: Arc::new(MemoryBuildingStore::new()),
            residents: Arc::new(MemoryResidentStore::new()),
            stats: Arc::new(MemoryFloorStats::new()),
            mirror,
        },
    };

    let dispatcher: Arc<dyn TaskDispatcher>;
    let smell: Arc<dyn SmellPropagator>;
    match nats {
        Some(client) => {
            dispatcher = Arc::new(NatsDispatcher::new(client.clone(), args.dispatcher_config()).await?);
            smell = Arc::new(NatsPropagator::new(client));
        }
        None => {
            dispatcher = Arc::new(LocalDispatcher::new(args.pool_config(), ActionHandlers::default()));
            smell = Arc::new(LogPropagator);
        }
    }
    info!("Dispatching actions via {}", dispatcher.name());

    let coordinator = Arc::new(Coordinator::new(
        stores.clone(),
        dispatcher,
        smell,
        args.lifecycle_config(),
        args.energy_config(),
    ));

    if args.dev_mode && (args.seed_buildings > 0 || args.seed_residents > 0) {
        seed_floor(
            &coordinator,
            &args.seed_floor,
            args.seed_buildings,
            args.seed_residents,
        )
        .await?;
    }

    let life = Arc::new(LifeCycle::new(
        coordinator,
        Arc::new(FloorNavigator::with_lots(Arc::clone(&stores.buildings), args.floor_lots)),
        Arc::new(RandomActionChooser::default()),
    ));
    let scheduler = Scheduler::new(life, stores.residents, args.scheduler_config());

    scheduler
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
        })
        .await;

    Ok(())
}

fn init_tracing(args: &Args) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("mies={},info", args.log_level).into());

    if args.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
