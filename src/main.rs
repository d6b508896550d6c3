use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::http::{header, Method};
use clap::{Parser, Subcommand};
use clickhouse::Client;
use tokio::net::TcpListener;
use tokio::time::{sleep, Duration};
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

use holderledger::api::routes::create_router;
use holderledger::api::state::AppState;
use holderledger::api::telegram::TelegramClient;
use holderledger::config::{AppConfig, DatabaseConfig};
use holderledger::db::init::init_database;
use holderledger::db::{ClickHouseStore, LedgerStore};
use holderledger::services::commands::CommandRegistry;
use holderledger::services::engine::MaterializationEngine;
use holderledger::services::excluded_accounts::{sync_excluded_accounts, AddressExclusionSet};
use holderledger::services::explorer::EtherscanClient;
use holderledger::services::monitor;
use holderledger::services::prices::CoinGeckoClient;
use holderledger::services::query::QueryFacade;

#[derive(Parser)]
#[command(name = "holderledger", about = "Token holder ledger and circulating supply service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler and the HTTP API (default)
    Serve,
    /// Run one materialization cycle and exit
    Cycle,
    /// Create the ClickHouse tables and exit
    InitDb,
}

async fn connect_to_clickhouse(config: &DatabaseConfig, max_retries: u32) -> Result<Client> {
    let mut client = Client::default()
        .with_url(&config.url)
        .with_database(&config.database);
    if let Some(user) = &config.user {
        client = client.with_user(user);
    }
    if let Some(password) = &config.password {
        client = client.with_password(password);
    }

    for attempt in 1..=max_retries {
        match client.query("SELECT 1").execute().await {
            Ok(_) => {
                tracing::info!("Connected to ClickHouse at {}", config.url);
                return Ok(client);
            }
            Err(e) => {
                if attempt == max_retries {
                    return Err(anyhow::anyhow!("Failed to connect to ClickHouse after {} attempts: {}", max_retries, e));
                }
                tracing::warn!("Failed to connect to ClickHouse (attempt {}/{}): {}", attempt, max_retries, e);
                sleep(Duration::from_secs(2)).await;
            }
        }
    }
    unreachable!()
}

fn build_engine(
    config: &AppConfig,
    store: Arc<dyn LedgerStore>,
    exclusions: Arc<AddressExclusionSet>,
) -> Result<MaterializationEngine> {
    let explorer = Arc::new(EtherscanClient::new(config.explorer.clone())?);
    let mut engine = MaterializationEngine::new(
        Arc::new(config.ledger.clone()),
        store,
        explorer.clone(),
        explorer,
        exclusions,
        config.scheduler.max_concurrent_pools,
    );
    if let Some(prices) = &config.prices {
        engine = engine.with_prices(Arc::new(CoinGeckoClient::new(prices.clone())?));
    }
    Ok(engine)
}

async fn serve(
    config: AppConfig,
    store: Arc<dyn LedgerStore>,
    engine: MaterializationEngine,
) -> Result<()> {
    let query = QueryFacade::new(
        store,
        Arc::new(config.ledger.clone()),
        config.api.staleness_minutes,
    );
    let link_prefix = config.telegram.as_ref().map(|t| t.explorer_token_url.clone());
    let telegram = match config.telegram.clone() {
        Some(telegram) => Some(Arc::new(TelegramClient::new(telegram)?)),
        None => None,
    };
    let state = AppState {
        commands: Arc::new(CommandRegistry::with_defaults(query.clone(), link_prefix)),
        query,
        telegram,
    };

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(config.api.requests_per_second)
            .burst_size(config.api.burst)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("API_REQUESTS_PER_SECOND and API_BURST must be non-zero"))?,
    );
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .allow_origin(Any);

    let app = create_router(state)
        .layer(GovernorLayer {
            config: governor_conf,
        })
        .layer(cors);

    tracing::info!("Listening on {}", config.api.bind_addr);
    let listener = TcpListener::bind(config.api.bind_addr).await?;

    // Start the monitoring service in a separate task
    let monitor_handle = tokio::spawn({
        let engine = Arc::new(engine);
        let interval = config.scheduler.cycle_interval;
        async move {
            monitor::start_monitoring(engine, interval).await;
        }
    });

    // Run both the API server and monitoring service concurrently
    tokio::select! {
        result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()) => {
            if let Err(e) = result {
                tracing::error!("Failed to serve API: {:?}", e);
            }
        }
        _ = monitor_handle => {
            tracing::info!("Monitoring service finished");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    // Connect to ClickHouse with retries
    let client = connect_to_clickhouse(&config.database, 5).await?;

    // Initialize database tables
    init_database(&client).await?;
    if let Some(Command::InitDb) = cli.command {
        tracing::info!("Database initialized");
        return Ok(());
    }

    let store: Arc<dyn LedgerStore> = Arc::new(ClickHouseStore::new(client));
    let exclusions = Arc::new(AddressExclusionSet::from_config(&config.ledger));
    sync_excluded_accounts(store.as_ref(), &exclusions).await?;

    let engine = build_engine(&config, store.clone(), exclusions)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Cycle => {
            let report = engine.run_cycle().await?;
            tracing::info!(
                "Cycle done: {}/{} pools published",
                report.published(),
                report.pools.len()
            );
            Ok(())
        }
        _ => serve(config, store, engine).await,
    }
}
