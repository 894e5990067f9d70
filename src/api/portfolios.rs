use crate::api::AppState;
use crate::domain::{CostBasisMethod, CurrencyCode, Decimal, PortfolioId};
use crate::engine::RecalculationReport;
use crate::error::AppError;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePortfolioRequest {
    pub name: String,
    pub default_currency: Option<String>,
    pub cost_basis_method: Option<CostBasisMethod>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioResponse {
    pub id: String,
    pub name: String,
    pub default_currency: String,
    pub cost_basis_method: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingsResponse {
    pub portfolio_id: String,
    pub default_currency: String,
    pub cost_basis_method: String,
    pub holdings: Vec<HoldingDto>,
    /// Sum of the market values that could be priced.
    pub total_value: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingDto {
    pub asset: String,
    pub balance: String,
    pub average_bought_price: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

pub async fn create_portfolio(
    State(state): State<AppState>,
    Json(request): Json<CreatePortfolioRequest>,
) -> Result<(StatusCode, Json<PortfolioResponse>), AppError> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("name must not be empty".into()));
    }
    let default_currency = match request.default_currency.as_deref().map(str::trim) {
        None => None,
        Some(code) if !code.is_empty() && code.chars().all(|c| c.is_ascii_alphanumeric()) => {
            Some(CurrencyCode::new(code))
        }
        Some(code) => {
            return Err(AppError::BadRequest(format!(
                "Invalid defaultCurrency: {:?}",
                code
            )))
        }
    };

    let portfolio = state
        .service
        .open_portfolio(name, default_currency, request.cost_basis_method)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(PortfolioResponse {
            id: portfolio.id.to_string(),
            name: portfolio.name,
            default_currency: portfolio.default_currency.to_string(),
            cost_basis_method: portfolio.cost_basis_method.to_string(),
        }),
    ))
}

pub async fn recalculate(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<RecalculationReport>, AppError> {
    let id = parse_id(&id)?;
    let report = state.service.recalculate(&id).await?;
    Ok(Json(report))
}

pub async fn get_holdings(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<HoldingsResponse>, AppError> {
    let id = parse_id(&id)?;
    let portfolio = state.service.valuate(&id).await?;

    let mut total_value = Decimal::zero();
    let holdings = portfolio
        .holdings
        .iter()
        .map(|h| {
            let market_value = h.market_value();
            if let Some(value) = &market_value {
                total_value += value.amount;
            }
            HoldingDto {
                asset: h.asset.to_string(),
                balance: h.balance.to_canonical_string(),
                average_bought_price: h.average_bought_price.to_canonical_string(),
                current_price: h
                    .current_price
                    .as_ref()
                    .map(|p| p.amount.to_canonical_string()),
                market_value: market_value.map(|v| v.amount.to_canonical_string()),
                error_message: (!h.error_message.is_empty()).then(|| h.error_message.clone()),
            }
        })
        .collect();

    Ok(Json(HoldingsResponse {
        portfolio_id: portfolio.id.to_string(),
        default_currency: portfolio.default_currency.to_string(),
        cost_basis_method: portfolio.cost_basis_method.to_string(),
        holdings,
        total_value: total_value.to_canonical_string(),
    }))
}

fn parse_id(raw: &str) -> Result<PortfolioId, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest("Invalid portfolio id".into()));
    }
    Ok(PortfolioId::new(trimmed))
}
