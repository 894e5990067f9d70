use anyhow::Context;
use coinledger::datasource::CryptoCompareProvider;
use coinledger::{
    api, config::Config, db::init_db, PortfolioService, PriceHistoryService, PriceProvider,
    Repository, TransactionProcessor,
};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("Configuration error")?;
    let port = config.port;

    let pool = init_db(&config.database_path)
        .await
        .with_context(|| format!("Failed to initialize database at {}", config.database_path))?;

    let repo = Arc::new(Repository::new(pool));
    let provider: Arc<dyn PriceProvider> = Arc::new(CryptoCompareProvider::new(
        config.price_api_url.clone(),
        config.price_api_key.clone(),
    ));
    let prices = Arc::new(PriceHistoryService::new(
        provider,
        repo.clone(),
        config.price_settings(),
    ));
    let service = Arc::new(PortfolioService::new(
        repo,
        prices.clone(),
        TransactionProcessor::new(config.replay_policy),
    )
    .with_defaults(config.portfolio_defaults()));

    tracing::info!(
        default_currency = %config.default_currency,
        cost_basis_method = %config.cost_basis_method,
        replay_policy = %config.replay_policy,
        "Starting coinledger"
    );

    let app = api::create_router(api::AppState::new(service, prices, config));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
