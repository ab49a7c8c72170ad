mod api;
mod battle;
mod care;
mod catalog;
mod config;
mod db;
mod error;
mod ledger;
mod rng;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::battle::BattleResolver;
use crate::care::CareService;
use crate::catalog::LoadoutCatalog;
use crate::config::AppConfig;
use crate::db::Database;
use crate::ledger::RewardLedger;
use crate::rng::{BattleRng, OsBattleRng, SeededBattleRng};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub ledger: RewardLedger,
    pub care: CareService,
    pub battles: BattleResolver,
    pub catalog: LoadoutCatalog,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Wire every service over one store.
    pub fn new(config: AppConfig, db: Database, catalog: LoadoutCatalog, rng: Box<dyn BattleRng>) -> Self {
        let ledger = RewardLedger::new(db.clone(), config.ledger.enabled);
        let care = CareService::new(db.clone(), ledger.clone(), config.care.clone());
        let battles = BattleResolver::new(
            db.clone(),
            ledger.clone(),
            catalog.clone(),
            config.care.clone(),
            config.battle.clone(),
            config.ledger.treasury_address.clone(),
            rng,
        );
        Self {
            db,
            ledger,
            care,
            battles,
            catalog,
            config: Arc::new(config),
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(api::create_router())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arena=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
        .init();

    println!("================================================");
    println!("         BLOBLET ARENA - Starting Up            ");
    println!("================================================");

    let config = AppConfig::load().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    println!("[CONFIG] Server: {}:{}", config.server.host, config.server.port);
    println!("[CONFIG] Database: {}", config.database.path);
    println!("[CONFIG] Ledger enabled: {}", config.ledger.enabled);
    println!("[CONFIG] Treasury: {}", config.ledger.treasury_address);
    if !config.ledger.enabled {
        println!("[CONFIG] *** LEDGER DISABLED - balance writes will be refused (ARENA__LEDGER__ENABLED) ***");
    }

    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        ledger_enabled = config.ledger.enabled,
        min_stake = %config.battle.min_stake,
        cooldown_secs = config.care.cooldown_secs,
        "Starting Bloblet Arena"
    );

    println!("[DB] Initializing SQLite store...");
    let db = Database::open(&config.database).map_err(|e| anyhow::anyhow!("Failed to open database: {}", e))?;
    match db.health_check().await {
        Ok(_) => tracing::info!("Store ready"),
        Err(e) => tracing::warn!(error = %e, "Store health check failed, running in degraded mode"),
    }

    let catalog = LoadoutCatalog::with_defaults();
    let addr: SocketAddr = config.server_addr().parse()?;
    let rng: Box<dyn BattleRng> = match config.rng_seed {
        Some(seed) => {
            tracing::warn!(seed, "Battle draws are seeded and predictable");
            Box::new(SeededBattleRng::new(seed))
        }
        None => Box::new(OsBattleRng),
    };
    let state = AppState::new(config, db, catalog, rng);

    println!("[ROUTER] Setting up API routes...");
    let app = build_app(state);
    println!("[ROUTER] Routes configured: /health, /api/v1/balances, /api/v1/ledger/*, /api/v1/bloblets/{{address}}/*, /api/v1/battles");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    println!("================================================");
    println!("  Server listening on http://{}", addr);
    println!("================================================");
    println!();

    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
