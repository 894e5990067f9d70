//! Price resolution with an in-process cache, durable storage and a remote
//! provider behind it.

use crate::datasource::{DataSourceError, PriceProvider};
use crate::db::Repository;
use crate::domain::{CurrencyCode, CurrencyPair, Decimal};
use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Currencies that are not traded on weekends and holidays. Lookups for these
/// may fall back to the nearest earlier close.
pub const FIAT_CURRENCIES: &[&str] = &[
    "USD", "EUR", "GBP", "CHF", "JPY", "CAD", "AUD", "NZD", "PLN", "SEK", "NOK", "DKK", "CZK",
    "HUF", "CNY", "HKD", "SGD", "KRW", "INR", "BRL", "MXN", "TRY", "ZAR",
];

/// A failed history fetch is not retried for this long.
const FAILED_FETCH_COOLDOWN: Duration = Duration::from_secs(300);

pub fn is_fiat(symbol: &CurrencyCode) -> bool {
    FIAT_CURRENCIES.contains(&symbol.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PriceError {
    #[error("cannot price {0} in itself: same symbols")]
    SameSymbols(CurrencyCode),
    #[error("no price found for {pair} on {date}")]
    NotFound { pair: CurrencyPair, date: NaiveDate },
    #[error("price storage error: {0}")]
    Storage(String),
    #[error("price cache error: {0}")]
    Cache(String),
    #[error("price provider error: {0}")]
    Provider(#[from] DataSourceError),
}

impl From<sqlx::Error> for PriceError {
    fn from(err: sqlx::Error) -> Self {
        PriceError::Storage(err.to_string())
    }
}

/// A resolved close price and the day it actually belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceQuote {
    pub price: Decimal,
    pub close_date: NaiveDate,
}

impl PriceQuote {
    /// False when a nearest-prior-day fallback supplied the price.
    pub fn is_exact_for(&self, date: NaiveDate) -> bool {
        self.close_date == date
    }
}

/// Point-in-time price lookups used by the transaction strategies.
#[async_trait]
pub trait PriceLookup: Send + Sync {
    /// Close price of `symbol` in `quote` on `date`.
    async fn price_at_close(
        &self,
        symbol: &CurrencyCode,
        quote: &CurrencyCode,
        date: NaiveDate,
    ) -> Result<PriceQuote, PriceError>;
}

#[derive(Debug, Clone)]
pub struct PriceServiceSettings {
    /// First day requested when a symbol's history is fetched.
    pub history_start: NaiveDate,
    /// How many earlier days a fiat lookup may walk back.
    pub fallback_days: u32,
    pub current_price_ttl: Duration,
    pub fetch_timeout: Duration,
}

impl Default for PriceServiceSettings {
    fn default() -> Self {
        Self {
            history_start: NaiveDate::from_ymd_opt(2010, 7, 17).unwrap_or_default(),
            fallback_days: 7,
            current_price_ttl: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

struct CurrentPriceEntry {
    created: Instant,
    prices: OnceCell<BTreeMap<CurrencyCode, Decimal>>,
}

#[derive(Debug, Clone, Copy)]
enum Coverage {
    /// History stored through this day.
    Through(NaiveDate),
    /// Last fetch failed at this instant.
    Failed(Instant),
}

pub struct PriceHistoryService {
    provider: Arc<dyn PriceProvider>,
    repo: Arc<Repository>,
    settings: PriceServiceSettings,
    closes: RwLock<HashMap<(CurrencyPair, NaiveDate), Decimal>>,
    coverage: Mutex<HashMap<CurrencyPair, Coverage>>,
    refresh_locks: Mutex<HashMap<CurrencyPair, Arc<tokio::sync::Mutex<()>>>>,
    current: Mutex<HashMap<String, Arc<CurrentPriceEntry>>>,
}

impl PriceHistoryService {
    pub fn new(
        provider: Arc<dyn PriceProvider>,
        repo: Arc<Repository>,
        settings: PriceServiceSettings,
    ) -> Self {
        Self {
            provider,
            repo,
            settings,
            closes: RwLock::new(HashMap::new()),
            coverage: Mutex::new(HashMap::new()),
            refresh_locks: Mutex::new(HashMap::new()),
            current: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the close price of `symbol` in `quote` for `date`.
    ///
    /// Order: cache, storage, remote history fetch (which also fills storage
    /// and cache), then for fiat symbols the nearest earlier close within
    /// the fallback window.
    pub async fn get_price_at_close_time(
        &self,
        symbol: &CurrencyCode,
        quote: &CurrencyCode,
        date: NaiveDate,
    ) -> Result<PriceQuote, PriceError> {
        if symbol == quote {
            return Err(PriceError::SameSymbols(symbol.clone()));
        }
        let pair = CurrencyPair::new(symbol.clone(), quote.clone());

        if let Some(price) = self.lookup_exact(&pair, date).await? {
            return Ok(PriceQuote {
                price,
                close_date: date,
            });
        }

        if self.refresh_history(&pair, date).await {
            if let Some(price) = self.cached(&pair, date)? {
                return Ok(PriceQuote {
                    price,
                    close_date: date,
                });
            }
        }

        if is_fiat(symbol) {
            for back in 1..=u64::from(self.settings.fallback_days) {
                let Some(earlier) = date.checked_sub_days(Days::new(back)) else {
                    break;
                };
                if let Some(price) = self.lookup_exact(&pair, earlier).await? {
                    debug!(%pair, %date, %earlier, "Using nearest prior close");
                    return Ok(PriceQuote {
                        price,
                        close_date: earlier,
                    });
                }
            }
        }

        Err(PriceError::NotFound { pair, date })
    }

    /// Latest prices for a batch of symbols.
    ///
    /// Results are cached per distinct symbol set for the configured TTL and
    /// concurrent callers asking for the same set share one remote fetch.
    /// Symbols the provider cannot price, and `quote` itself, are omitted.
    pub async fn get_current_prices(
        &self,
        symbols: &[CurrencyCode],
        quote: &CurrencyCode,
    ) -> Result<BTreeMap<CurrencyCode, Decimal>, PriceError> {
        let mut wanted: Vec<CurrencyCode> =
            symbols.iter().filter(|s| *s != quote).cloned().collect();
        wanted.sort();
        wanted.dedup();
        if wanted.is_empty() {
            return Ok(BTreeMap::new());
        }

        let key = format!(
            "{}:{}",
            quote,
            wanted
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(",")
        );
        let entry = self.current_entry(&key)?;

        let prices = entry
            .prices
            .get_or_try_init(|| async {
                info!(%quote, symbols = %key, "Fetching current prices");
                let records = self
                    .with_timeout(self.provider.fetch_current_price(&wanted, quote))
                    .await?;
                Ok::<_, PriceError>(
                    records
                        .into_iter()
                        .map(|r| (r.currency_pair.base, r.close_price))
                        .collect::<BTreeMap<_, _>>(),
                )
            })
            .await?;

        Ok(prices.clone())
    }

    fn current_entry(&self, key: &str) -> Result<Arc<CurrentPriceEntry>, PriceError> {
        let ttl = self.settings.current_price_ttl;
        let mut entries = self
            .current
            .lock()
            .map_err(|e| PriceError::Cache(e.to_string()))?;
        entries.retain(|_, entry| entry.created.elapsed() < ttl);

        Ok(entries
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(CurrentPriceEntry {
                    created: Instant::now(),
                    prices: OnceCell::new(),
                })
            })
            .clone())
    }

    fn cached(&self, pair: &CurrencyPair, date: NaiveDate) -> Result<Option<Decimal>, PriceError> {
        let closes = self
            .closes
            .read()
            .map_err(|e| PriceError::Cache(e.to_string()))?;
        Ok(closes.get(&(pair.clone(), date)).copied())
    }

    fn remember(&self, pair: &CurrencyPair, date: NaiveDate, price: Decimal) -> Result<(), PriceError> {
        let mut closes = self
            .closes
            .write()
            .map_err(|e| PriceError::Cache(e.to_string()))?;
        closes.insert((pair.clone(), date), price);
        Ok(())
    }

    /// Cache, then storage. Storage hits are cached.
    async fn lookup_exact(
        &self,
        pair: &CurrencyPair,
        date: NaiveDate,
    ) -> Result<Option<Decimal>, PriceError> {
        if let Some(price) = self.cached(pair, date)? {
            return Ok(Some(price));
        }
        match self.repo.get_price_record(pair, date).await? {
            Some(record) => {
                self.remember(pair, date, record.close_price)?;
                Ok(Some(record.close_price))
            }
            None => Ok(None),
        }
    }

    fn needs_refresh(&self, pair: &CurrencyPair, date: NaiveDate) -> bool {
        let Ok(coverage) = self.coverage.lock() else {
            return false;
        };
        match coverage.get(pair) {
            Some(Coverage::Through(end)) => *end < date,
            Some(Coverage::Failed(at)) => at.elapsed() >= FAILED_FETCH_COOLDOWN,
            None => true,
        }
    }

    fn set_coverage(&self, pair: &CurrencyPair, value: Coverage) {
        if let Ok(mut coverage) = self.coverage.lock() {
            coverage.insert(pair.clone(), value);
        }
    }

    fn refresh_lock(&self, pair: &CurrencyPair) -> Option<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self.refresh_locks.lock().ok()?;
        Some(locks.entry(pair.clone()).or_default().clone())
    }

    /// Fetch the full history of `pair` once and store it. Returns whether
    /// fresh data was loaded into the cache.
    async fn refresh_history(&self, pair: &CurrencyPair, date: NaiveDate) -> bool {
        if !self.needs_refresh(pair, date) {
            return false;
        }
        let Some(lock) = self.refresh_lock(pair) else {
            return false;
        };
        let _guard = lock.lock().await;
        // Another caller may have refreshed while we waited.
        if !self.needs_refresh(pair, date) {
            return true;
        }

        let start = self.settings.history_start;
        let end = Utc::now().date_naive().max(date);
        info!(%pair, %start, %end, "Fetching price history from remote provider");

        let records = match self
            .with_timeout(
                self.provider
                    .fetch_price_history(&pair.base, &pair.quote, start, end),
            )
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(%pair, error = %e, "Price history fetch failed");
                self.set_coverage(pair, Coverage::Failed(Instant::now()));
                return false;
            }
        };

        if let Err(e) = self
            .repo
            .replace_price_records(pair, start, end, &records)
            .await
        {
            warn!(%pair, error = %e, "Failed to store fetched price history");
        }
        for record in &records {
            if self
                .remember(pair, record.close_date, record.close_price)
                .is_err()
            {
                break;
            }
        }
        self.set_coverage(pair, Coverage::Through(end));
        true
    }

    async fn with_timeout<T>(
        &self,
        fut: impl Future<Output = Result<T, DataSourceError>>,
    ) -> Result<T, PriceError> {
        match tokio::time::timeout(self.settings.fetch_timeout, fut).await {
            Ok(result) => result.map_err(PriceError::from),
            Err(_) => Err(PriceError::Provider(DataSourceError::Timeout)),
        }
    }
}

#[async_trait]
impl PriceLookup for PriceHistoryService {
    async fn price_at_close(
        &self,
        symbol: &CurrencyCode,
        quote: &CurrencyCode,
        date: NaiveDate,
    ) -> Result<PriceQuote, PriceError> {
        self.get_price_at_close_time(symbol, quote, date).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::MockPriceProvider;
    use crate::db::migrations::init_db;
    use tempfile::TempDir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn usd() -> CurrencyCode {
        CurrencyCode::new("USD")
    }

    async fn setup_repo() -> (Arc<Repository>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (Arc::new(Repository::new(pool)), temp_dir)
    }

    fn service(mock: &MockPriceProvider, repo: Arc<Repository>) -> PriceHistoryService {
        PriceHistoryService::new(
            Arc::new(mock.clone()),
            repo,
            PriceServiceSettings {
                history_start: date(2020, 1, 1),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_same_symbols_rejected() {
        let (repo, _temp) = setup_repo().await;
        let mock = MockPriceProvider::new();
        let svc = service(&mock, repo);

        let err = svc
            .get_price_at_close_time(&usd(), &usd(), date(2024, 1, 1))
            .await
            .unwrap_err();
        assert_eq!(err, PriceError::SameSymbols(usd()));
        assert!(err.to_string().contains("same symbols"));
        assert_eq!(mock.history_calls(), 0);
    }

    #[tokio::test]
    async fn test_remote_fetch_populates_cache() {
        let (repo, _temp) = setup_repo().await;
        let mock = MockPriceProvider::new()
            .with_close("BTC", date(2024, 1, 1), Decimal::from(42000))
            .with_close("BTC", date(2024, 1, 2), Decimal::from(43000));
        let svc = service(&mock, repo);
        let btc = CurrencyCode::new("BTC");

        let quote = svc
            .get_price_at_close_time(&btc, &usd(), date(2024, 1, 1))
            .await
            .unwrap();
        assert_eq!(quote.price, Decimal::from(42000));
        assert!(quote.is_exact_for(date(2024, 1, 1)));

        let quote = svc
            .get_price_at_close_time(&btc, &usd(), date(2024, 1, 2))
            .await
            .unwrap();
        assert_eq!(quote.price, Decimal::from(43000));
        assert_eq!(mock.history_calls(), 1);
    }

    #[tokio::test]
    async fn test_crypto_gap_is_not_found_without_refetch() {
        let (repo, _temp) = setup_repo().await;
        let mock = MockPriceProvider::new().with_close("BTC", date(2024, 1, 1), Decimal::from(1));
        let svc = service(&mock, repo);
        let btc = CurrencyCode::new("BTC");

        let err = svc
            .get_price_at_close_time(&btc, &usd(), date(2024, 1, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, PriceError::NotFound { .. }));

        let _ = svc
            .get_price_at_close_time(&btc, &usd(), date(2024, 1, 4))
            .await;
        assert_eq!(mock.history_calls(), 1);
    }

    #[tokio::test]
    async fn test_fiat_weekend_uses_prior_day() {
        let (repo, _temp) = setup_repo().await;
        // Friday close only; Sunday is requested.
        let mock = MockPriceProvider::new().with_close(
            "EUR",
            date(2024, 3, 8),
            Decimal::from_str_canonical("1.09").unwrap(),
        );
        let svc = service(&mock, repo);

        let quote = svc
            .get_price_at_close_time(&CurrencyCode::new("EUR"), &usd(), date(2024, 3, 10))
            .await
            .unwrap();
        assert_eq!(quote.close_date, date(2024, 3, 8));
        assert!(!quote.is_exact_for(date(2024, 3, 10)));
    }

    #[tokio::test]
    async fn test_fiat_fallback_window_is_bounded() {
        let (repo, _temp) = setup_repo().await;
        let mock = MockPriceProvider::new().with_close("EUR", date(2024, 3, 1), Decimal::one());
        let svc = service(&mock, repo);

        let result = svc
            .get_price_at_close_time(&CurrencyCode::new("EUR"), &usd(), date(2024, 3, 20))
            .await;
        assert!(matches!(result, Err(PriceError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_provider_timeout_is_a_lookup_failure() {
        let (repo, _temp) = setup_repo().await;
        let mock = MockPriceProvider::new()
            .with_close("BTC", date(2024, 1, 1), Decimal::one())
            .with_latency(Duration::from_millis(200));
        let svc = PriceHistoryService::new(
            Arc::new(mock.clone()),
            repo,
            PriceServiceSettings {
                history_start: date(2020, 1, 1),
                fetch_timeout: Duration::from_millis(20),
                ..Default::default()
            },
        );

        let result = svc
            .get_price_at_close_time(&CurrencyCode::new("BTC"), &usd(), date(2024, 1, 1))
            .await;
        assert!(matches!(result, Err(PriceError::NotFound { .. })));

        // Failed fetches are not retried immediately.
        let _ = svc
            .get_price_at_close_time(&CurrencyCode::new("BTC"), &usd(), date(2024, 1, 1))
            .await;
        assert_eq!(mock.history_calls(), 1);
    }

    #[tokio::test]
    async fn test_current_prices_cached_per_symbol_set() {
        let (repo, _temp) = setup_repo().await;
        let mock = MockPriceProvider::new()
            .with_current("BTC", Decimal::from(60000))
            .with_current("ETH", Decimal::from(3000));
        let svc = service(&mock, repo);
        let btc = CurrencyCode::new("BTC");
        let eth = CurrencyCode::new("ETH");

        let first = svc
            .get_current_prices(&[eth.clone(), btc.clone(), eth.clone()], &usd())
            .await
            .unwrap();
        let second = svc
            .get_current_prices(&[btc.clone(), eth.clone()], &usd())
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(first.get(&btc), Some(&Decimal::from(60000)));
        assert_eq!(mock.current_calls(), 1);
    }

    #[tokio::test]
    async fn test_current_prices_omit_unknown_and_quote() {
        let (repo, _temp) = setup_repo().await;
        let mock = MockPriceProvider::new().with_current("BTC", Decimal::from(60000));
        let svc = service(&mock, repo);

        let prices = svc
            .get_current_prices(
                &[CurrencyCode::new("BTC"), CurrencyCode::new("NOPE"), usd()],
                &usd(),
            )
            .await
            .unwrap();
        assert_eq!(prices.len(), 1);
        assert!(prices.contains_key(&CurrencyCode::new("BTC")));
    }

    #[tokio::test]
    async fn test_current_prices_expire_after_ttl() {
        let (repo, _temp) = setup_repo().await;
        let mock = MockPriceProvider::new().with_current("BTC", Decimal::from(1));
        let svc = PriceHistoryService::new(
            Arc::new(mock.clone()),
            repo,
            PriceServiceSettings {
                current_price_ttl: Duration::from_millis(10),
                ..Default::default()
            },
        );

        let symbols = [CurrencyCode::new("BTC")];
        svc.get_current_prices(&symbols, &usd()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        svc.get_current_prices(&symbols, &usd()).await.unwrap();
        assert_eq!(mock.current_calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_current_fetch_is_not_cached() {
        let (repo, _temp) = setup_repo().await;
        let mock = MockPriceProvider::new().failing(DataSourceError::RateLimited);
        let svc = service(&mock, repo);
        let symbols = [CurrencyCode::new("BTC")];

        assert!(svc.get_current_prices(&symbols, &usd()).await.is_err());
        assert!(svc.get_current_prices(&symbols, &usd()).await.is_err());
        assert_eq!(mock.current_calls(), 2);
    }
}
