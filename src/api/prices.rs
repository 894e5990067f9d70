use crate::api::AppState;
use crate::domain::CurrencyCode;
use crate::error::AppError;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
pub struct CurrentPricesQuery {
    /// Comma separated, e.g. `BTC,ETH`.
    pub symbols: String,
    pub quote: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentPricesResponse {
    pub quote: String,
    pub prices: BTreeMap<String, String>,
    /// Requested symbols the provider could not price.
    pub missing: Vec<String>,
}

pub async fn get_current_prices(
    Query(params): Query<CurrentPricesQuery>,
    State(state): State<AppState>,
) -> Result<Json<CurrentPricesResponse>, AppError> {
    let mut symbols: Vec<CurrencyCode> = params
        .symbols
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(CurrencyCode::new)
        .collect();
    if symbols.is_empty() {
        return Err(AppError::BadRequest("symbols must not be empty".into()));
    }
    symbols.sort();
    symbols.dedup();

    let quote = params
        .quote
        .as_deref()
        .map(CurrencyCode::new)
        .unwrap_or_else(|| state.config.default_currency.clone());

    let prices = state.prices.get_current_prices(&symbols, &quote).await?;

    let missing = symbols
        .iter()
        .filter(|s| *s != &quote && !prices.contains_key(*s))
        .map(|s| s.to_string())
        .collect();

    Ok(Json(CurrentPricesResponse {
        quote: quote.to_string(),
        prices: prices
            .into_iter()
            .map(|(symbol, price)| (symbol.to_string(), price.to_canonical_string()))
            .collect(),
        missing,
    }))
}
