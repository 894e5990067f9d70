//! Daily close price storage.

use crate::domain::{CurrencyPair, PriceRecord};
use chrono::NaiveDate;
use sqlx::Row;

use super::{corrupt, parse_decimal, Repository};

const DATE_FORMAT: &str = "%Y-%m-%d";

impl Repository {
    /// Stored close for `pair` on `date`, if any.
    ///
    /// # Errors
    /// Returns an error if the query fails or the stored price is corrupt.
    pub async fn get_price_record(
        &self,
        pair: &CurrencyPair,
        date: NaiveDate,
    ) -> Result<Option<PriceRecord>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT close_price FROM price_records WHERE currency_pair = ? AND close_date = ?",
        )
        .bind(pair.to_string())
        .bind(date.format(DATE_FORMAT).to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let price: String = row.get("close_price");
                Ok(Some(PriceRecord::new(
                    pair.clone(),
                    date,
                    parse_decimal("close_price", &price)?,
                )))
            }
            None => Ok(None),
        }
    }

    /// Replace every stored close of `pair` in `[start, end]` with `records`.
    ///
    /// Runs in one SQL transaction so readers never see a half-written range.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn replace_price_records(
        &self,
        pair: &CurrencyPair,
        start: NaiveDate,
        end: NaiveDate,
        records: &[PriceRecord],
    ) -> Result<(), sqlx::Error> {
        let pair_key = pair.to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM price_records
            WHERE currency_pair = ? AND close_date >= ? AND close_date <= ?
            "#,
        )
        .bind(&pair_key)
        .bind(start.format(DATE_FORMAT).to_string())
        .bind(end.format(DATE_FORMAT).to_string())
        .execute(&mut *tx)
        .await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO price_records (currency_pair, close_date, close_price)
                VALUES (?, ?, ?)
                ON CONFLICT(currency_pair, close_date) DO UPDATE SET close_price = excluded.close_price
                "#,
            )
            .bind(&pair_key)
            .bind(record.close_date.format(DATE_FORMAT).to_string())
            .bind(record.close_price.to_canonical_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Stored closes of `pair` in `[start, end]`, oldest first.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored value is corrupt.
    pub async fn query_price_records(
        &self,
        pair: &CurrencyPair,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceRecord>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT close_date, close_price
            FROM price_records
            WHERE currency_pair = ? AND close_date >= ? AND close_date <= ?
            ORDER BY close_date ASC
            "#,
        )
        .bind(pair.to_string())
        .bind(start.format(DATE_FORMAT).to_string())
        .bind(end.format(DATE_FORMAT).to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let date: String = row.get("close_date");
                let price: String = row.get("close_price");
                let close_date = NaiveDate::parse_from_str(&date, DATE_FORMAT)
                    .map_err(|e| corrupt("close_date", &date, e))?;
                Ok(PriceRecord::new(
                    pair.clone(),
                    close_date,
                    parse_decimal("close_price", &price)?,
                ))
            })
            .collect()
    }
}
