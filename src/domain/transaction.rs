//! Canonical ledger transaction consumed by the replay engine.

use crate::domain::{Money, TransactionId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Trade,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "Deposit",
            TransactionType::Withdrawal => "Withdrawal",
            TransactionType::Trade => "Trade",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown transaction type: {0}")]
pub struct UnknownTransactionType(pub String);

impl FromStr for TransactionType {
    type Err = UnknownTransactionType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Deposit" => Ok(TransactionType::Deposit),
            "Withdrawal" => Ok(TransactionType::Withdrawal),
            "Trade" => Ok(TransactionType::Trade),
            other => Err(UnknownTransactionType(other.to_string())),
        }
    }
}

/// Data-quality annotation recorded on a transaction during replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorType {
    #[default]
    None,
    /// Price lookup degraded to a fallback (average cost, previous day, omitted).
    PriceHistoryUnavailable,
    /// Balance went negative, or lots could not explain a disposal.
    InsufficientFunds,
    /// Non-positive amount where a positive one is required.
    InvalidCurrency,
    DataCorruption,
    ManualReviewRequired,
    /// A realization event could not be recorded.
    EventCreationFailed,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::None => "None",
            ErrorType::PriceHistoryUnavailable => "PriceHistoryUnavailable",
            ErrorType::InsufficientFunds => "InsufficientFunds",
            ErrorType::InvalidCurrency => "InvalidCurrency",
            ErrorType::DataCorruption => "DataCorruption",
            ErrorType::ManualReviewRequired => "ManualReviewRequired",
            ErrorType::EventCreationFailed => "EventCreationFailed",
        }
    }
}

impl FromStr for ErrorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "None" => Ok(ErrorType::None),
            "PriceHistoryUnavailable" => Ok(ErrorType::PriceHistoryUnavailable),
            "InsufficientFunds" => Ok(ErrorType::InsufficientFunds),
            "InvalidCurrency" => Ok(ErrorType::InvalidCurrency),
            "DataCorruption" => Ok(ErrorType::DataCorruption),
            "ManualReviewRequired" => Ok(ErrorType::ManualReviewRequired),
            "EventCreationFailed" => Ok(ErrorType::EventCreationFailed),
            other => Err(format!("unknown error type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionShapeError {
    #[error("{0} must not carry a sent amount")]
    UnexpectedSent(TransactionType),
    #[error("{0} must not carry a received amount")]
    UnexpectedReceived(TransactionType),
    #[error("{0} requires a received amount")]
    MissingReceived(TransactionType),
    #[error("{0} requires a sent amount")]
    MissingSent(TransactionType),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialTransaction {
    pub id: TransactionId,
    pub date_time: DateTime<Utc>,
    pub transaction_type: TransactionType,
    pub received_amount: Option<Money>,
    pub sent_amount: Option<Money>,
    pub fee_amount: Option<Money>,
    pub value_in_default_currency: Option<Money>,
    pub fee_value_in_default_currency: Option<Money>,
    /// Free-text origin label (exchange, wallet name).
    pub account: String,
    /// Reference identifiers from the source exchange.
    pub transaction_ids: BTreeSet<String>,
    pub error_type: ErrorType,
    pub error_message: String,
}

impl FinancialTransaction {
    fn base(date_time: DateTime<Utc>, transaction_type: TransactionType) -> Self {
        Self {
            id: TransactionId::generate(),
            date_time,
            transaction_type,
            received_amount: None,
            sent_amount: None,
            fee_amount: None,
            value_in_default_currency: None,
            fee_value_in_default_currency: None,
            account: String::new(),
            transaction_ids: BTreeSet::new(),
            error_type: ErrorType::None,
            error_message: String::new(),
        }
    }

    pub fn deposit(date_time: DateTime<Utc>, received: Money) -> Self {
        Self {
            received_amount: Some(received),
            ..Self::base(date_time, TransactionType::Deposit)
        }
    }

    pub fn withdrawal(date_time: DateTime<Utc>, sent: Money) -> Self {
        Self {
            sent_amount: Some(sent),
            ..Self::base(date_time, TransactionType::Withdrawal)
        }
    }

    pub fn trade(date_time: DateTime<Utc>, received: Money, sent: Money) -> Self {
        Self {
            received_amount: Some(received),
            sent_amount: Some(sent),
            ..Self::base(date_time, TransactionType::Trade)
        }
    }

    pub fn with_id(mut self, id: TransactionId) -> Self {
        self.id = id;
        self
    }

    pub fn with_fee(mut self, fee: Money) -> Self {
        self.fee_amount = Some(fee);
        self
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = account.into();
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.transaction_ids.insert(reference.into());
        self
    }

    /// UTC calendar day used for close-price lookups.
    pub fn close_date(&self) -> NaiveDate {
        self.date_time.date_naive()
    }

    /// Check the per-type amount shape.
    pub fn validate_shape(&self) -> Result<(), TransactionShapeError> {
        let kind = self.transaction_type;
        match kind {
            TransactionType::Deposit => {
                if self.sent_amount.is_some() {
                    return Err(TransactionShapeError::UnexpectedSent(kind));
                }
                if self.received_amount.is_none() {
                    return Err(TransactionShapeError::MissingReceived(kind));
                }
            }
            TransactionType::Withdrawal => {
                if self.received_amount.is_some() {
                    return Err(TransactionShapeError::UnexpectedReceived(kind));
                }
                if self.sent_amount.is_none() {
                    return Err(TransactionShapeError::MissingSent(kind));
                }
            }
            TransactionType::Trade => {
                if self.received_amount.is_none() {
                    return Err(TransactionShapeError::MissingReceived(kind));
                }
                if self.sent_amount.is_none() {
                    return Err(TransactionShapeError::MissingSent(kind));
                }
            }
        }
        Ok(())
    }

    /// Record a soft error. The latest type wins; messages accumulate.
    pub fn flag(&mut self, error_type: ErrorType, message: impl AsRef<str>) {
        self.error_type = error_type;
        let message = message.as_ref();
        if message.is_empty() {
            return;
        }
        if !self.error_message.is_empty() {
            self.error_message.push_str("; ");
        }
        self.error_message.push_str(message);
    }

    pub fn has_error(&self) -> bool {
        self.error_type != ErrorType::None
    }

    /// Clear everything a replay derives, leaving only the imported facts.
    pub fn reset_derived(&mut self) {
        self.value_in_default_currency = None;
        self.fee_value_in_default_currency = None;
        self.error_type = ErrorType::None;
        self.error_message.clear();
    }

    /// Content fingerprint used for duplicate detection when the source
    /// exchange supplied no reference identifiers.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};

        fn hash_var(hasher: &mut Sha256, data: &str) {
            hasher.update((data.len() as u32).to_le_bytes());
            hasher.update(data.as_bytes());
        }

        fn hash_money(hasher: &mut Sha256, money: Option<&Money>) {
            match money {
                Some(m) => {
                    hash_var(hasher, &m.amount.to_canonical_string());
                    hash_var(hasher, m.currency_code.as_str());
                }
                None => hash_var(hasher, "-"),
            }
        }

        let mut hasher = Sha256::new();
        hasher.update(self.date_time.timestamp_millis().to_le_bytes());
        hash_var(&mut hasher, self.transaction_type.as_str());
        hash_money(&mut hasher, self.received_amount.as_ref());
        hash_money(&mut hasher, self.sent_amount.as_ref());
        hash_money(&mut hasher, self.fee_amount.as_ref());
        hash_var(&mut hasher, self.account.trim());

        let hash = hasher.finalize();
        format!("hash:{}", hex::encode(&hash[..16]))
    }
}
