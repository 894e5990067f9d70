pub mod health;
pub mod portfolios;
pub mod prices;

use crate::config::Config;
use crate::engine::PriceHistoryService;
use crate::orchestration::PortfolioService;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PortfolioService>,
    pub prices: Arc<PriceHistoryService>,
    pub config: Config,
}

impl AppState {
    pub fn new(
        service: Arc<PortfolioService>,
        prices: Arc<PriceHistoryService>,
        config: Config,
    ) -> Self {
        Self {
            service,
            prices,
            config,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/portfolios", post(portfolios::create_portfolio))
        .route(
            "/v1/portfolios/:id/recalculate",
            post(portfolios::recalculate),
        )
        .route("/v1/portfolios/:id/holdings", get(portfolios::get_holdings))
        .route("/v1/prices/current", get(prices::get_current_prices))
        .layer(cors)
        .with_state(state)
}
