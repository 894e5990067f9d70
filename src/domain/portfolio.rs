//! Portfolio aggregate: wallets own transactions, the portfolio owns holdings.

use crate::domain::{
    AssetHolding, CurrencyCode, FinancialTransaction, PortfolioId, TransactionId,
    TransactionShapeError, WalletId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lot-matching rule applied when a disposal is turned into a realized gain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostBasisMethod {
    #[default]
    Average,
    Fifo,
    Lifo,
}

impl CostBasisMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostBasisMethod::Average => "average",
            CostBasisMethod::Fifo => "fifo",
            CostBasisMethod::Lifo => "lifo",
        }
    }
}

impl fmt::Display for CostBasisMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CostBasisMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "average" | "avg" => Ok(CostBasisMethod::Average),
            "fifo" => Ok(CostBasisMethod::Fifo),
            "lifo" => Ok(CostBasisMethod::Lifo),
            other => Err(format!("must be average, fifo, or lifo, got {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortfolioError {
    #[error("transaction {0} already exists in portfolio")]
    DuplicateTransaction(TransactionId),
    #[error("transaction reference {reference} already imported as {existing}")]
    DuplicateReference {
        reference: String,
        existing: TransactionId,
    },
    #[error("wallet not found: {0}")]
    WalletNotFound(WalletId),
    #[error("transaction not found: {0}")]
    TransactionNotFound(TransactionId),
    #[error(transparent)]
    InvalidShape(#[from] TransactionShapeError),
}

/// Holdings keyed by asset, iterated in asset order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldingBook {
    holdings: BTreeMap<CurrencyCode, AssetHolding>,
}

impl HoldingBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, asset: &CurrencyCode) -> &mut AssetHolding {
        self.holdings
            .entry(asset.clone())
            .or_insert_with(|| AssetHolding::new(asset.clone()))
    }

    pub fn get(&self, asset: &CurrencyCode) -> Option<&AssetHolding> {
        self.holdings.get(asset)
    }

    pub fn insert(&mut self, holding: AssetHolding) {
        self.holdings.insert(holding.asset.clone(), holding);
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssetHolding> {
        self.holdings.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut AssetHolding> {
        self.holdings.values_mut()
    }

    pub fn assets(&self) -> Vec<CurrencyCode> {
        self.holdings.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.holdings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holdings.is_empty()
    }

    pub fn clear(&mut self) {
        self.holdings.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub id: WalletId,
    pub name: String,
    transactions: Vec<FinancialTransaction>,
}

impl Wallet {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(WalletId::generate(), name)
    }

    pub fn with_id(id: WalletId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            transactions: Vec::new(),
        }
    }

    /// Rebuild a wallet from persisted state without re-running the
    /// import checks.
    pub fn from_parts(
        id: WalletId,
        name: impl Into<String>,
        transactions: Vec<FinancialTransaction>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            transactions,
        }
    }

    pub fn transactions(&self) -> &[FinancialTransaction] {
        &self.transactions
    }

    pub fn transactions_mut(&mut self) -> impl Iterator<Item = &mut FinancialTransaction> {
        self.transactions.iter_mut()
    }

    /// Add a transaction, rejecting anything already present in this wallet.
    ///
    /// Identity is the transaction id, any shared exchange reference, or, for
    /// transactions without references, the content fingerprint.
    pub fn add_transaction(&mut self, transaction: FinancialTransaction) -> Result<(), PortfolioError> {
        transaction.validate_shape()?;
        self.check_unique(&transaction)?;
        self.transactions.push(transaction);
        Ok(())
    }

    fn check_unique(&self, candidate: &FinancialTransaction) -> Result<(), PortfolioError> {
        let fingerprint = candidate
            .transaction_ids
            .is_empty()
            .then(|| candidate.fingerprint());

        for existing in &self.transactions {
            if existing.id == candidate.id {
                return Err(PortfolioError::DuplicateTransaction(candidate.id.clone()));
            }
            if let Some(reference) = candidate
                .transaction_ids
                .intersection(&existing.transaction_ids)
                .next()
            {
                return Err(PortfolioError::DuplicateReference {
                    reference: reference.clone(),
                    existing: existing.id.clone(),
                });
            }
            if let Some(fingerprint) = &fingerprint {
                if existing.transaction_ids.is_empty() && &existing.fingerprint() == fingerprint {
                    return Err(PortfolioError::DuplicateReference {
                        reference: fingerprint.clone(),
                        existing: existing.id.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn remove_transaction(&mut self, id: &TransactionId) -> Option<FinancialTransaction> {
        let index = self.transactions.iter().position(|t| &t.id == id)?;
        Some(self.transactions.remove(index))
    }
}

/// Borrowed view of a portfolio handed to one replay.
pub struct ReplayParts<'a> {
    pub transactions: Vec<&'a mut FinancialTransaction>,
    pub holdings: &'a mut HoldingBook,
    pub default_currency: &'a CurrencyCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPortfolio {
    pub id: PortfolioId,
    pub name: String,
    /// Reporting currency every valuation is normalized into.
    pub default_currency: CurrencyCode,
    pub cost_basis_method: CostBasisMethod,
    pub wallets: Vec<Wallet>,
    pub holdings: HoldingBook,
}

impl UserPortfolio {
    pub fn new(name: impl Into<String>, default_currency: CurrencyCode) -> Self {
        Self {
            id: PortfolioId::generate(),
            name: name.into(),
            default_currency,
            cost_basis_method: CostBasisMethod::default(),
            wallets: Vec::new(),
            holdings: HoldingBook::new(),
        }
    }

    pub fn with_cost_basis_method(mut self, method: CostBasisMethod) -> Self {
        self.cost_basis_method = method;
        self
    }

    pub fn add_wallet(&mut self, name: impl Into<String>) -> WalletId {
        let wallet = Wallet::new(name);
        let id = wallet.id.clone();
        self.wallets.push(wallet);
        id
    }

    pub fn wallet_mut(&mut self, id: &WalletId) -> Result<&mut Wallet, PortfolioError> {
        self.wallets
            .iter_mut()
            .find(|w| &w.id == id)
            .ok_or_else(|| PortfolioError::WalletNotFound(id.clone()))
    }

    /// Add a transaction to one wallet. Ids are unique across the whole
    /// portfolio; references and fingerprints are checked per wallet.
    pub fn add_transaction(
        &mut self,
        wallet_id: &WalletId,
        transaction: FinancialTransaction,
    ) -> Result<(), PortfolioError> {
        if self.transactions().any(|t| t.id == transaction.id) {
            return Err(PortfolioError::DuplicateTransaction(transaction.id));
        }
        self.wallet_mut(wallet_id)?.add_transaction(transaction)
    }

    /// Explicit user deletion; the caller must replay afterwards.
    pub fn remove_transaction(
        &mut self,
        id: &TransactionId,
    ) -> Result<FinancialTransaction, PortfolioError> {
        self.wallets
            .iter_mut()
            .find_map(|w| w.remove_transaction(id))
            .ok_or_else(|| PortfolioError::TransactionNotFound(id.clone()))
    }

    pub fn transactions(&self) -> impl Iterator<Item = &FinancialTransaction> {
        self.wallets.iter().flat_map(|w| w.transactions().iter())
    }

    pub fn transaction_count(&self) -> usize {
        self.wallets.iter().map(|w| w.transactions().len()).sum()
    }

    pub fn holding(&self, asset: &CurrencyCode) -> Option<&AssetHolding> {
        self.holdings.get(asset)
    }

    /// Discard derived holdings and lend out everything a replay mutates.
    pub fn prepare_replay(&mut self) -> ReplayParts<'_> {
        self.holdings.clear();
        let transactions = self
            .wallets
            .iter_mut()
            .flat_map(|w| w.transactions.iter_mut())
            .collect();
        ReplayParts {
            transactions,
            holdings: &mut self.holdings,
            default_currency: &self.default_currency,
        }
    }
}
