use crate::db::Repository;
use crate::domain::{
    CostBasisMethod, CurrencyCode, Decimal, FinancialTransaction, Money, PortfolioError,
    PortfolioId, TransactionId, UserPortfolio, WalletId,
};
use crate::engine::{
    PriceError, PriceHistoryService, ProcessingError, RecalculationReport, TransactionProcessor,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RecalculationError {
    #[error("portfolio not found: {0}")]
    NotFound(PortfolioId),
    #[error("portfolio already exists: {0}")]
    AlreadyExists(PortfolioId),
    #[error(transparent)]
    Portfolio(#[from] PortfolioError),
    #[error(transparent)]
    Processing(#[from] ProcessingError),
    #[error(transparent)]
    Price(#[from] PriceError),
    #[error(transparent)]
    Storage(#[from] sqlx::Error),
}

/// Settings a new portfolio starts with unless the caller overrides them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortfolioDefaults {
    pub default_currency: CurrencyCode,
    pub cost_basis_method: CostBasisMethod,
}

impl Default for PortfolioDefaults {
    fn default() -> Self {
        Self {
            default_currency: CurrencyCode::new("USD"),
            cost_basis_method: CostBasisMethod::default(),
        }
    }
}

/// Owns the load, replay and save cycle for portfolios.
///
/// Work on one portfolio is serialized by a per-portfolio async lock, so a
/// mutation and a recalculation can never interleave. Different portfolios
/// proceed in parallel.
pub struct PortfolioService {
    repo: Arc<Repository>,
    prices: Arc<PriceHistoryService>,
    processor: TransactionProcessor,
    defaults: PortfolioDefaults,
    locks: Mutex<HashMap<PortfolioId, Arc<Mutex<()>>>>,
}

impl PortfolioService {
    pub fn new(
        repo: Arc<Repository>,
        prices: Arc<PriceHistoryService>,
        processor: TransactionProcessor,
    ) -> Self {
        Self {
            repo,
            prices,
            processor,
            defaults: PortfolioDefaults::default(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_defaults(mut self, defaults: PortfolioDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn processor(&self) -> &TransactionProcessor {
        &self.processor
    }

    pub fn defaults(&self) -> &PortfolioDefaults {
        &self.defaults
    }

    /// Round-trip to the database.
    pub async fn ping(&self) -> Result<(), RecalculationError> {
        sqlx::query("SELECT 1").execute(self.repo.pool()).await?;
        Ok(())
    }

    pub async fn create_portfolio(
        &self,
        portfolio: UserPortfolio,
    ) -> Result<UserPortfolio, RecalculationError> {
        if !self.repo.insert_portfolio(&portfolio).await? {
            return Err(RecalculationError::AlreadyExists(portfolio.id));
        }
        info!(portfolio_id = %portfolio.id, name = %portfolio.name, "Created portfolio");
        Ok(portfolio)
    }

    /// Create an empty portfolio, filling anything not given from the
    /// configured defaults.
    pub async fn open_portfolio(
        &self,
        name: &str,
        default_currency: Option<CurrencyCode>,
        cost_basis_method: Option<CostBasisMethod>,
    ) -> Result<UserPortfolio, RecalculationError> {
        let portfolio = UserPortfolio::new(
            name,
            default_currency.unwrap_or_else(|| self.defaults.default_currency.clone()),
        )
        .with_cost_basis_method(cost_basis_method.unwrap_or(self.defaults.cost_basis_method));
        self.create_portfolio(portfolio).await
    }

    pub async fn portfolio(&self, id: &PortfolioId) -> Result<UserPortfolio, RecalculationError> {
        self.repo
            .load_portfolio(id)
            .await?
            .ok_or_else(|| RecalculationError::NotFound(id.clone()))
    }

    pub async fn add_wallet(
        &self,
        id: &PortfolioId,
        name: &str,
    ) -> Result<WalletId, RecalculationError> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let mut portfolio = self.portfolio(id).await?;
        let wallet_id = portfolio.add_wallet(name);
        self.repo.save_portfolio(&portfolio).await?;
        Ok(wallet_id)
    }

    /// Replay the portfolio from its transaction log and persist the result.
    ///
    /// Under the halt policy a hard failure leaves the stored portfolio as it
    /// was before the call.
    pub async fn recalculate(
        &self,
        id: &PortfolioId,
    ) -> Result<RecalculationReport, RecalculationError> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let mut portfolio = self.portfolio(id).await?;
        self.replay_and_save(&mut portfolio).await
    }

    /// Import transactions into one wallet and recalculate.
    ///
    /// The batch is all-or-nothing: a duplicate or malformed transaction
    /// rejects every transaction in the call.
    pub async fn add_transactions(
        &self,
        id: &PortfolioId,
        wallet_id: &WalletId,
        transactions: Vec<FinancialTransaction>,
    ) -> Result<RecalculationReport, RecalculationError> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let mut portfolio = self.portfolio(id).await?;
        let added = transactions.len();
        for transaction in transactions {
            portfolio.add_transaction(wallet_id, transaction)?;
        }
        info!(portfolio_id = %id, wallet_id = %wallet_id, added, "Imported transactions");

        self.replay_and_save(&mut portfolio).await
    }

    /// Remove transactions and recalculate. The rows are deleted in the same
    /// save as the replayed holdings, so a halted replay deletes nothing.
    pub async fn delete_transactions(
        &self,
        id: &PortfolioId,
        transaction_ids: &[TransactionId],
    ) -> Result<RecalculationReport, RecalculationError> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let mut portfolio = self.portfolio(id).await?;
        for transaction_id in transaction_ids {
            portfolio.remove_transaction(transaction_id)?;
        }
        let report = self.replay_and_save(&mut portfolio).await?;
        info!(portfolio_id = %id, deleted = transaction_ids.len(), "Deleted transactions");
        Ok(report)
    }

    pub async fn set_cost_basis_method(
        &self,
        id: &PortfolioId,
        method: CostBasisMethod,
    ) -> Result<RecalculationReport, RecalculationError> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let mut portfolio = self.portfolio(id).await?;
        portfolio.cost_basis_method = method;
        self.replay_and_save(&mut portfolio).await
    }

    /// Load a portfolio and price every holding at the latest market price.
    ///
    /// Holdings in the reporting currency are priced at one. A holding the
    /// provider cannot price keeps `current_price` empty and carries an
    /// error message; the rest of the batch is still valued.
    pub async fn valuate(&self, id: &PortfolioId) -> Result<UserPortfolio, RecalculationError> {
        let mut portfolio = self.portfolio(id).await?;
        let quote = portfolio.default_currency.clone();
        let symbols: Vec<CurrencyCode> = portfolio
            .holdings
            .assets()
            .into_iter()
            .filter(|asset| asset != &quote)
            .collect();

        let (prices, batch_error) = if symbols.is_empty() {
            (Default::default(), None)
        } else {
            match self.prices.get_current_prices(&symbols, &quote).await {
                Ok(prices) => (prices, None),
                Err(e) => {
                    warn!(portfolio_id = %id, error = %e, "Current price fetch failed");
                    (Default::default(), Some(e.to_string()))
                }
            }
        };

        for holding in portfolio.holdings.iter_mut() {
            if holding.asset == quote {
                holding.current_price = Some(Money::new(Decimal::one(), quote.clone()));
                continue;
            }
            match prices.get(&holding.asset) {
                Some(price) => {
                    holding.current_price = Some(Money::new(*price, quote.clone()));
                    holding.error_message.clear();
                }
                None => {
                    holding.current_price = None;
                    holding.error_message = match &batch_error {
                        Some(e) => format!("current price unavailable: {}", e),
                        None => format!("no current price for {} in {}", holding.asset, quote),
                    };
                }
            }
        }
        Ok(portfolio)
    }

    async fn replay_and_save(
        &self,
        portfolio: &mut UserPortfolio,
    ) -> Result<RecalculationReport, RecalculationError> {
        let report = portfolio
            .recalculate(&self.processor, self.prices.as_ref())
            .await?;
        self.repo.save_portfolio(portfolio).await?;
        Ok(report)
    }

    /// Entries nobody holds are pruned on the way in, so ids that were only
    /// ever looked up do not accumulate.
    async fn lock_for(&self, id: &PortfolioId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(id.clone()).or_default().clone()
    }
}
