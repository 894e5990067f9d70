//! Portfolio aggregate persistence: portfolios, wallets, transactions and the
//! holdings a replay derived from them.

use crate::domain::{
    AssetHolding, CostBasisMethod, CurrencyCode, ErrorType, FinancialTransaction, HoldingBook,
    PortfolioId, PurchaseRecord, TransactionId, TransactionType, UserPortfolio, Wallet, WalletId,
};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use std::collections::{BTreeSet, HashSet};
use std::str::FromStr;

use super::{
    corrupt, money_columns, parse_decimal, parse_money, parse_time_ms, rejected, Repository,
};

impl Repository {
    /// Insert a new portfolio with everything it owns.
    ///
    /// Returns false, writing nothing, if a portfolio with the same id exists.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn insert_portfolio(&self, portfolio: &UserPortfolio) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO portfolios (id, name, default_currency, cost_basis_method, created_at_ms)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(portfolio.id.as_str())
        .bind(&portfolio.name)
        .bind(portfolio.default_currency.as_str())
        .bind(portfolio.cost_basis_method.as_str())
        .bind(Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        write_contents(&mut tx, portfolio).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Persist a portfolio after a mutation or replay.
    ///
    /// The portfolio row, wallets and transactions are upserted, and stored
    /// transactions no longer in the aggregate are deleted. Holdings and
    /// purchase records are replaced wholesale. Everything happens in one SQL
    /// transaction, so a caller that never saves leaves storage untouched.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn save_portfolio(&self, portfolio: &UserPortfolio) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO portfolios (id, name, default_currency, cost_basis_method, created_at_ms)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                default_currency = excluded.default_currency,
                cost_basis_method = excluded.cost_basis_method
            "#,
        )
        .bind(portfolio.id.as_str())
        .bind(&portfolio.name)
        .bind(portfolio.default_currency.as_str())
        .bind(portfolio.cost_basis_method.as_str())
        .bind(Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await?;

        write_contents(&mut tx, portfolio).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Load a portfolio with its wallets, transactions and last saved holdings.
    ///
    /// # Errors
    /// Returns an error if a query fails or a stored value is corrupt.
    pub async fn load_portfolio(
        &self,
        id: &PortfolioId,
    ) -> Result<Option<UserPortfolio>, sqlx::Error> {
        let Some(row) = sqlx::query(
            "SELECT id, name, default_currency, cost_basis_method FROM portfolios WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let method_str: String = row.get("cost_basis_method");
        let cost_basis_method = CostBasisMethod::from_str(&method_str)
            .map_err(|e| corrupt("cost_basis_method", &method_str, e))?;

        let wallet_rows = sqlx::query(
            "SELECT id, name FROM wallets WHERE portfolio_id = ? ORDER BY position ASC",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut wallets = Vec::with_capacity(wallet_rows.len());
        for wallet_row in wallet_rows {
            let wallet_id = WalletId::new(wallet_row.get::<String, _>("id"));
            let transactions = self.load_wallet_transactions(&wallet_id).await?;
            wallets.push(Wallet::from_parts(
                wallet_id,
                wallet_row.get::<String, _>("name"),
                transactions,
            ));
        }

        Ok(Some(UserPortfolio {
            id: PortfolioId::new(row.get::<String, _>("id")),
            name: row.get("name"),
            default_currency: CurrencyCode::new(row.get::<String, _>("default_currency")),
            cost_basis_method,
            wallets,
            holdings: self.load_holdings(id).await?,
        }))
    }

    /// All portfolio ids, oldest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn list_portfolio_ids(&self) -> Result<Vec<PortfolioId>, sqlx::Error> {
        let rows = sqlx::query("SELECT id FROM portfolios ORDER BY created_at_ms ASC, id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| PortfolioId::new(row.get::<String, _>("id")))
            .collect())
    }

    /// Delete transactions by id. Returns the number of rows removed.
    ///
    /// Holdings are not touched; the owning portfolio must be recalculated.
    /// Removing transactions through the aggregate and calling
    /// [`Repository::save_portfolio`] does both in one transaction.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn delete_transactions(&self, ids: &[TransactionId]) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut deleted = 0u64;
        let mut tx = self.pool.begin().await?;
        for id in ids {
            let result = sqlx::query("DELETE FROM transactions WHERE id = ?")
                .bind(id.as_str())
                .execute(&mut *tx)
                .await?;
            deleted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(deleted)
    }

    async fn load_wallet_transactions(
        &self,
        wallet_id: &WalletId,
    ) -> Result<Vec<FinancialTransaction>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, date_time_ms, transaction_type,
                   received_amount, received_currency, sent_amount, sent_currency,
                   fee_amount, fee_currency, value_amount, value_currency,
                   fee_value_amount, fee_value_currency,
                   account, transaction_ids, error_type, error_message
            FROM transactions
            WHERE wallet_id = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(wallet_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn load_holdings(&self, id: &PortfolioId) -> Result<HoldingBook, sqlx::Error> {
        let holding_rows = sqlx::query(
            r#"
            SELECT asset, balance, average_bought_price
            FROM asset_holdings
            WHERE portfolio_id = ?
            ORDER BY asset ASC
            "#,
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let lot_rows = sqlx::query(
            r#"
            SELECT asset, amount, price_per_unit, purchase_date_ms
            FROM purchase_records
            WHERE portfolio_id = ?
            ORDER BY asset ASC, seq ASC
            "#,
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut book = HoldingBook::new();
        for row in holding_rows {
            let asset: String = row.get("asset");
            let balance: String = row.get("balance");
            let average: String = row.get("average_bought_price");

            let mut lots = Vec::new();
            for lot in lot_rows
                .iter()
                .filter(|lot| lot.get::<String, _>("asset") == asset)
            {
                let amount: String = lot.get("amount");
                let price: String = lot.get("price_per_unit");
                lots.push(PurchaseRecord::new(
                    parse_decimal("amount", &amount)?,
                    parse_decimal("price_per_unit", &price)?,
                    parse_time_ms("purchase_date_ms", lot.get("purchase_date_ms"))?,
                ));
            }

            book.insert(AssetHolding::from_parts(
                CurrencyCode::new(&asset),
                parse_decimal("balance", &balance)?,
                parse_decimal("average_bought_price", &average)?,
                lots,
            ));
        }
        Ok(book)
    }
}

async fn write_contents(
    conn: &mut SqliteConnection,
    portfolio: &UserPortfolio,
) -> Result<(), sqlx::Error> {
    let current: HashSet<&str> = portfolio.transactions().map(|t| t.id.as_str()).collect();
    let stored = sqlx::query(
        r#"
        SELECT t.id
        FROM transactions t
        JOIN wallets w ON w.id = t.wallet_id
        WHERE w.portfolio_id = ?
        "#,
    )
    .bind(portfolio.id.as_str())
    .fetch_all(&mut *conn)
    .await?;
    for row in stored {
        let id: String = row.get("id");
        if !current.contains(id.as_str()) {
            sqlx::query("DELETE FROM transactions WHERE id = ?")
                .bind(&id)
                .execute(&mut *conn)
                .await?;
        }
    }

    for (position, wallet) in portfolio.wallets.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO wallets (id, portfolio_id, name, position)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name, position = excluded.position
            "#,
        )
        .bind(wallet.id.as_str())
        .bind(portfolio.id.as_str())
        .bind(&wallet.name)
        .bind(position as i64)
        .execute(&mut *conn)
        .await?;

        for (seq, transaction) in wallet.transactions().iter().enumerate() {
            upsert_transaction(&mut *conn, &wallet.id, seq as i64, transaction).await?;
        }
    }

    sqlx::query("DELETE FROM purchase_records WHERE portfolio_id = ?")
        .bind(portfolio.id.as_str())
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM asset_holdings WHERE portfolio_id = ?")
        .bind(portfolio.id.as_str())
        .execute(&mut *conn)
        .await?;

    for holding in portfolio.holdings.iter() {
        sqlx::query(
            r#"
            INSERT INTO asset_holdings (portfolio_id, asset, balance, average_bought_price)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(portfolio.id.as_str())
        .bind(holding.asset.as_str())
        .bind(holding.balance.to_canonical_string())
        .bind(holding.average_bought_price.to_canonical_string())
        .execute(&mut *conn)
        .await?;

        for (seq, lot) in holding.purchase_records().iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO purchase_records
                    (portfolio_id, asset, seq, amount, price_per_unit, purchase_date_ms)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(portfolio.id.as_str())
            .bind(holding.asset.as_str())
            .bind(seq as i64)
            .bind(lot.amount.to_canonical_string())
            .bind(lot.price_per_unit.to_canonical_string())
            .bind(lot.purchase_date.timestamp_millis())
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}

async fn upsert_transaction(
    conn: &mut SqliteConnection,
    wallet_id: &WalletId,
    seq: i64,
    transaction: &FinancialTransaction,
) -> Result<(), sqlx::Error> {
    let (received_amount, received_currency) = money_columns(transaction.received_amount.as_ref());
    let (sent_amount, sent_currency) = money_columns(transaction.sent_amount.as_ref());
    let (fee_amount, fee_currency) = money_columns(transaction.fee_amount.as_ref());
    let (value_amount, value_currency) =
        money_columns(transaction.value_in_default_currency.as_ref());
    let (fee_value_amount, fee_value_currency) =
        money_columns(transaction.fee_value_in_default_currency.as_ref());
    let transaction_ids = serde_json::to_string(&transaction.transaction_ids)
        .map_err(|e| rejected("transaction_ids", e))?;

    // A transaction never moves between wallets; a clash on id leaves the
    // stored row alone and fails the save.
    let result = sqlx::query(
        r#"
        INSERT INTO transactions (
            id, wallet_id, seq, date_time_ms, transaction_type,
            received_amount, received_currency, sent_amount, sent_currency,
            fee_amount, fee_currency, value_amount, value_currency,
            fee_value_amount, fee_value_currency,
            account, transaction_ids, error_type, error_message
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            wallet_id = excluded.wallet_id,
            seq = excluded.seq,
            date_time_ms = excluded.date_time_ms,
            transaction_type = excluded.transaction_type,
            received_amount = excluded.received_amount,
            received_currency = excluded.received_currency,
            sent_amount = excluded.sent_amount,
            sent_currency = excluded.sent_currency,
            fee_amount = excluded.fee_amount,
            fee_currency = excluded.fee_currency,
            value_amount = excluded.value_amount,
            value_currency = excluded.value_currency,
            fee_value_amount = excluded.fee_value_amount,
            fee_value_currency = excluded.fee_value_currency,
            account = excluded.account,
            transaction_ids = excluded.transaction_ids,
            error_type = excluded.error_type,
            error_message = excluded.error_message
        WHERE transactions.wallet_id = excluded.wallet_id
        "#,
    )
    .bind(transaction.id.as_str())
    .bind(wallet_id.as_str())
    .bind(seq)
    .bind(transaction.date_time.timestamp_millis())
    .bind(transaction.transaction_type.as_str())
    .bind(received_amount)
    .bind(received_currency)
    .bind(sent_amount)
    .bind(sent_currency)
    .bind(fee_amount)
    .bind(fee_currency)
    .bind(value_amount)
    .bind(value_currency)
    .bind(fee_value_amount)
    .bind(fee_value_currency)
    .bind(&transaction.account)
    .bind(transaction_ids)
    .bind(transaction.error_type.as_str())
    .bind(&transaction.error_message)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(rejected(
            "transaction",
            format!("{} is already stored in another wallet", transaction.id),
        ));
    }
    Ok(())
}

fn transaction_from_row(row: &SqliteRow) -> Result<FinancialTransaction, sqlx::Error> {
    let type_str: String = row.get("transaction_type");
    let transaction_type = TransactionType::from_str(&type_str)
        .map_err(|e| corrupt("transaction_type", &type_str, e))?;
    let error_str: String = row.get("error_type");
    let error_type =
        ErrorType::from_str(&error_str).map_err(|e| corrupt("error_type", &error_str, e))?;
    let ids_str: String = row.get("transaction_ids");
    let transaction_ids: BTreeSet<String> =
        serde_json::from_str(&ids_str).map_err(|e| corrupt("transaction_ids", &ids_str, e))?;

    Ok(FinancialTransaction {
        id: TransactionId::new(row.get::<String, _>("id")),
        date_time: parse_time_ms("date_time_ms", row.get("date_time_ms"))?,
        transaction_type,
        received_amount: parse_money(
            "received",
            row.get("received_amount"),
            row.get("received_currency"),
        )?,
        sent_amount: parse_money("sent", row.get("sent_amount"), row.get("sent_currency"))?,
        fee_amount: parse_money("fee", row.get("fee_amount"), row.get("fee_currency"))?,
        value_in_default_currency: parse_money(
            "value",
            row.get("value_amount"),
            row.get("value_currency"),
        )?,
        fee_value_in_default_currency: parse_money(
            "fee_value",
            row.get("fee_value_amount"),
            row.get("fee_value_currency"),
        )?,
        account: row.get("account"),
        transaction_ids,
        error_type,
        error_message: row.get("error_message"),
    })
}
