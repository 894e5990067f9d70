//! Mock price provider for testing without network calls.

use super::{DataSourceError, PriceProvider};
use crate::domain::{CurrencyCode, CurrencyPair, Decimal, PriceRecord};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Mock provider returning predefined prices and counting remote calls.
#[derive(Debug, Clone, Default)]
pub struct MockPriceProvider {
    history: HashMap<CurrencyCode, BTreeMap<NaiveDate, Decimal>>,
    current: HashMap<CurrencyCode, Decimal>,
    failure: Option<DataSourceError>,
    latency: Option<Duration>,
    history_calls: Arc<AtomicUsize>,
    current_calls: Arc<AtomicUsize>,
}

impl MockPriceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a historical close for `symbol`.
    pub fn with_close(mut self, symbol: &str, date: NaiveDate, price: Decimal) -> Self {
        self.history
            .entry(CurrencyCode::new(symbol))
            .or_default()
            .insert(date, price);
        self
    }

    /// Set the current price returned for `symbol`.
    pub fn with_current(mut self, symbol: &str, price: Decimal) -> Self {
        self.current.insert(CurrencyCode::new(symbol), price);
        self
    }

    /// Make every call fail with `error`.
    pub fn failing(mut self, error: DataSourceError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Delay every response, to exercise timeouts and concurrent callers.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    pub fn current_calls(&self) -> usize {
        self.current_calls.load(Ordering::SeqCst)
    }

    async fn respond(&self) -> Result<(), DataSourceError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PriceProvider for MockPriceProvider {
    async fn fetch_price_history(
        &self,
        base: &CurrencyCode,
        quote: &CurrencyCode,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceRecord>, DataSourceError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await?;

        let pair = CurrencyPair::new(base.clone(), quote.clone());
        Ok(self
            .history
            .get(base)
            .map(|closes| {
                closes
                    .range(start..=end)
                    .map(|(date, price)| PriceRecord::new(pair.clone(), *date, *price))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_current_price(
        &self,
        symbols: &[CurrencyCode],
        quote: &CurrencyCode,
    ) -> Result<Vec<PriceRecord>, DataSourceError> {
        self.current_calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await?;

        let today = Utc::now().date_naive();
        Ok(symbols
            .iter()
            .filter_map(|symbol| {
                self.current.get(symbol).map(|price| {
                    PriceRecord::new(
                        CurrencyPair::new(symbol.clone(), quote.clone()),
                        today,
                        *price,
                    )
                })
            })
            .collect())
    }
}
