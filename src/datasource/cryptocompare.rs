//! CryptoCompare price API client.

use super::{DataSourceError, PriceProvider};
use crate::domain::{CurrencyCode, CurrencyPair, Decimal, PriceRecord};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Days, NaiveDate, Utc};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum number of daily candles returned by one histoday request.
const HISTODAY_PAGE: u64 = 2000;

/// Price provider backed by the CryptoCompare REST API.
#[derive(Debug, Clone)]
pub struct CryptoCompareProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl CryptoCompareProvider {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn default_url() -> Self {
        Self::new("https://min-api.cryptocompare.com".to_string(), None)
    }

    async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, DataSourceError> {
        let url = format!("{}{}", self.base_url, path);
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        retry(backoff, || async {
            let mut request = self.client.get(&url).query(query);
            if let Some(key) = &self.api_key {
                request = request.header("authorization", format!("Apikey {}", key));
            }

            let response = request.send().await.map_err(|e| {
                backoff::Error::transient(DataSourceError::NetworkError(e.to_string()))
            })?;

            let status = response.status();
            if status == 429 {
                return Err(backoff::Error::transient(DataSourceError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(DataSourceError::HttpError {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(DataSourceError::HttpError {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| backoff::Error::permanent(DataSourceError::ParseError(e.to_string())))
        })
        .await
    }
}

#[async_trait]
impl PriceProvider for CryptoCompareProvider {
    async fn fetch_price_history(
        &self,
        base: &CurrencyCode,
        quote: &CurrencyCode,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceRecord>, DataSourceError> {
        debug!(%base, %quote, %start, %end, "Fetching price history");

        let pair = CurrencyPair::new(base.clone(), quote.clone());
        let mut records = Vec::new();
        let mut page_end = end;

        // histoday pages backwards from `toTs`.
        while page_end >= start {
            let remaining_days = (page_end - start).num_days() as u64;
            let limit = remaining_days.min(HISTODAY_PAGE - 1);
            let to_ts = page_end
                .and_hms_opt(23, 59, 59)
                .map(|dt| dt.and_utc().timestamp())
                .ok_or_else(|| DataSourceError::Other(format!("invalid date {}", page_end)))?;

            let response = self
                .get_json(
                    "/data/v2/histoday",
                    &[
                        ("fsym", base.to_string()),
                        ("tsym", quote.to_string()),
                        ("limit", limit.to_string()),
                        ("toTs", to_ts.to_string()),
                    ],
                )
                .await?;

            let mut page = parse_histoday(&response, &pair)?;
            page.retain(|r| r.close_date >= start && r.close_date <= end);
            let page_len = page.len();
            records.extend(page);

            if page_len == 0 {
                break;
            }
            match page_end.checked_sub_days(Days::new(limit + 1)) {
                Some(next) => page_end = next,
                None => break,
            }
        }

        records.sort_by_key(|r| r.close_date);
        records.dedup_by_key(|r| r.close_date);
        Ok(records)
    }

    async fn fetch_current_price(
        &self,
        symbols: &[CurrencyCode],
        quote: &CurrencyCode,
    ) -> Result<Vec<PriceRecord>, DataSourceError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        debug!(symbols = symbols.len(), %quote, "Fetching current prices");

        let fsyms = symbols
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let response = self
            .get_json(
                "/data/pricemulti",
                &[("fsyms", fsyms), ("tsyms", quote.to_string())],
            )
            .await?;

        parse_pricemulti(&response, symbols, quote, Utc::now().date_naive())
    }
}

fn check_api_error(response: &serde_json::Value) -> Result<(), DataSourceError> {
    if response.get("Response").and_then(|v| v.as_str()) == Some("Error") {
        let message = response
            .get("Message")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error");
        return Err(DataSourceError::Other(message.to_string()));
    }
    Ok(())
}

fn parse_decimal(value: &serde_json::Value) -> Result<Decimal, DataSourceError> {
    let text = match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        other => {
            return Err(DataSourceError::ParseError(format!(
                "expected number, got {}",
                other
            )))
        }
    };
    Decimal::from_str_canonical(&text)
        .or_else(|_| rust_decimal::Decimal::from_scientific(&text).map(Decimal::new))
        .map_err(|e| DataSourceError::ParseError(format!("invalid price {}: {}", text, e)))
}

fn parse_histoday(
    response: &serde_json::Value,
    pair: &CurrencyPair,
) -> Result<Vec<PriceRecord>, DataSourceError> {
    check_api_error(response)?;

    let candles = response
        .get("Data")
        .and_then(|d| d.get("Data"))
        .and_then(|d| d.as_array())
        .ok_or_else(|| DataSourceError::ParseError("Expected Data.Data array".to_string()))?;

    let mut records = Vec::with_capacity(candles.len());
    for candle in candles {
        let Some(time) = candle.get("time").and_then(|v| v.as_i64()) else {
            warn!("Skipping candle without time field");
            continue;
        };
        let Some(close) = candle.get("close") else {
            warn!(time, "Skipping candle without close field");
            continue;
        };
        let close = parse_decimal(close)?;
        // Days before the asset was listed come back as zero candles.
        if close.is_zero() {
            continue;
        }
        let Some(date) = DateTime::<Utc>::from_timestamp(time, 0).map(|dt| dt.date_naive()) else {
            warn!(time, "Skipping candle with out-of-range time");
            continue;
        };
        records.push(PriceRecord::new(pair.clone(), date, close));
    }
    Ok(records)
}

fn parse_pricemulti(
    response: &serde_json::Value,
    symbols: &[CurrencyCode],
    quote: &CurrencyCode,
    today: NaiveDate,
) -> Result<Vec<PriceRecord>, DataSourceError> {
    check_api_error(response)?;

    let mut records = Vec::new();
    for symbol in symbols {
        let Some(price) = response
            .get(symbol.as_str())
            .and_then(|quotes| quotes.get(quote.as_str()))
        else {
            debug!(%symbol, "No current price returned");
            continue;
        };
        match parse_decimal(price) {
            Ok(price) => records.push(PriceRecord::new(
                CurrencyPair::new(symbol.clone(), quote.clone()),
                today,
                price,
            )),
            Err(e) => warn!(%symbol, error = %e, "Ignoring unparseable current price"),
        }
    }
    Ok(records)
}
