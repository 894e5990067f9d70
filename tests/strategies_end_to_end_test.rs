use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use coinledger::datasource::MockPriceProvider;
use coinledger::db::init_db;
use coinledger::domain::{
    CostBasisMethod, CurrencyCode, Decimal, ErrorType, FinancialTransaction, Money, UserPortfolio,
};
use coinledger::engine::{
    DomainEvent, PriceHistoryService, PriceServiceSettings, ReplayPolicy, TransactionProcessor,
};
use coinledger::Repository;
use std::sync::Arc;
use tempfile::TempDir;

fn d(s: &str) -> Decimal {
    Decimal::from_str_canonical(s).unwrap()
}

fn money(amount: &str, code: &str) -> Money {
    Money::new(d(amount), CurrencyCode::new(code))
}

fn day(y: i32, m: u32, dd: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, dd).unwrap()
}

fn at(y: i32, m: u32, dd: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, dd, 15, 30, 0).unwrap()
}

async fn price_service(mock: MockPriceProvider) -> (PriceHistoryService, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let service = PriceHistoryService::new(
        Arc::new(mock),
        Arc::new(Repository::new(pool)),
        PriceServiceSettings {
            history_start: day(2023, 1, 1),
            ..Default::default()
        },
    );
    (service, temp_dir)
}

fn usd_portfolio(transactions: Vec<FinancialTransaction>) -> UserPortfolio {
    let mut portfolio = UserPortfolio::new("e2e", CurrencyCode::new("USD"));
    let wallet = portfolio.add_wallet("exchange");
    for tx in transactions {
        portfolio.add_transaction(&wallet, tx).unwrap();
    }
    portfolio
}

#[tokio::test]
async fn test_deposit_then_sell_for_reporting_currency() {
    let mock = MockPriceProvider::new().with_close("BTC", day(2024, 1, 1), d("20000"));
    let (prices, _temp) = price_service(mock).await;

    let sale = FinancialTransaction::trade(at(2024, 1, 5), money("30000", "USD"), money("1", "BTC"));
    let sale_id = sale.id.clone();
    let mut portfolio = usd_portfolio(vec![
        FinancialTransaction::deposit(at(2024, 1, 1), money("1", "BTC")),
        sale,
    ]);

    let report = portfolio
        .recalculate(&TransactionProcessor::default(), &prices)
        .await
        .unwrap();

    let btc = portfolio.holding(&CurrencyCode::new("BTC")).unwrap();
    assert!(btc.balance.is_zero());
    assert!(btc.average_bought_price.is_zero());
    let usd = portfolio.holding(&CurrencyCode::new("USD")).unwrap();
    assert_eq!(usd.balance, d("30000"));

    let sale = portfolio.transactions().find(|t| t.id == sale_id).unwrap();
    assert_eq!(sale.value_in_default_currency, Some(money("30000", "USD")));
    assert!(!sale.has_error());

    let realizations: Vec<_> = report
        .events
        .iter()
        .filter_map(DomainEvent::as_realization)
        .collect();
    assert_eq!(realizations.len(), 1);
    assert_eq!(realizations[0].proceeds(), money("30000", "USD"));

    assert_eq!(report.realized_gains.len(), 1);
    assert_eq!(report.realized_gains[0].cost_basis, money("20000", "USD"));
    assert_eq!(report.realized_gains[0].gain, money("10000", "USD"));
}

#[tokio::test]
async fn test_withdrawal_with_fee_in_other_asset() {
    let mock = MockPriceProvider::new()
        .with_close("BTC", day(2024, 2, 1), d("20000"))
        .with_close("BTC", day(2024, 2, 2), d("21000"))
        .with_close("ETH", day(2024, 2, 1), d("1000"))
        .with_close("ETH", day(2024, 2, 2), d("1100"));
    let (prices, _temp) = price_service(mock).await;

    let withdrawal = FinancialTransaction::withdrawal(at(2024, 2, 2), money("1", "BTC"))
        .with_fee(money("0.01", "ETH"));
    let withdrawal_id = withdrawal.id.clone();
    let mut portfolio = usd_portfolio(vec![
        FinancialTransaction::deposit(at(2024, 2, 1), money("2", "BTC")),
        FinancialTransaction::deposit(at(2024, 2, 1), money("10", "ETH")),
        withdrawal,
    ]);

    let report = portfolio
        .recalculate(&TransactionProcessor::default(), &prices)
        .await
        .unwrap();

    let tx = portfolio
        .transactions()
        .find(|t| t.id == withdrawal_id)
        .unwrap();
    assert_eq!(tx.value_in_default_currency, Some(money("21000", "USD")));
    assert_eq!(tx.fee_value_in_default_currency, Some(money("11", "USD")));

    assert_eq!(
        portfolio.holding(&CurrencyCode::new("BTC")).unwrap().balance,
        d("1")
    );
    assert_eq!(
        portfolio.holding(&CurrencyCode::new("ETH")).unwrap().balance,
        d("9.99")
    );
    assert_eq!(report.realized_gains[0].gain, money("1000", "USD"));
}

#[tokio::test]
async fn test_unpriceable_deposit_is_flagged_not_fatal() {
    let (prices, _temp) = price_service(MockPriceProvider::new()).await;
    let mut portfolio = usd_portfolio(vec![FinancialTransaction::deposit(
        at(2024, 3, 1),
        money("5", "XYZ"),
    )]);

    let report = portfolio
        .recalculate(&TransactionProcessor::default(), &prices)
        .await
        .unwrap();

    assert_eq!(report.flagged, 1);
    let tx = portfolio.transactions().next().unwrap();
    assert_eq!(tx.error_type, ErrorType::PriceHistoryUnavailable);
    assert_eq!(tx.value_in_default_currency, Some(money("0", "USD")));
    assert_eq!(
        portfolio.holding(&CurrencyCode::new("XYZ")).unwrap().balance,
        d("5")
    );
}

#[tokio::test]
async fn test_weekend_fiat_deposit_uses_prior_close() {
    // 2024-06-08 is a Saturday.
    let mock = MockPriceProvider::new().with_close("EUR", day(2024, 6, 7), d("1.08"));
    let (prices, _temp) = price_service(mock).await;
    let mut portfolio = usd_portfolio(vec![FinancialTransaction::deposit(
        at(2024, 6, 8),
        money("100", "EUR"),
    )]);

    portfolio
        .recalculate(&TransactionProcessor::default(), &prices)
        .await
        .unwrap();

    let tx = portfolio.transactions().next().unwrap();
    assert_eq!(tx.value_in_default_currency, Some(money("108", "USD")));
    assert_eq!(tx.error_type, ErrorType::PriceHistoryUnavailable);
    assert!(tx.error_message.contains("2024-06-07"));
}

#[tokio::test]
async fn test_crypto_to_crypto_trade_values_sent_leg() {
    let mock = MockPriceProvider::new()
        .with_close("BTC", day(2024, 4, 1), d("60000"))
        .with_close("BTC", day(2024, 4, 2), d("64000"));
    let (prices, _temp) = price_service(mock).await;
    let mut portfolio = usd_portfolio(vec![
        FinancialTransaction::deposit(at(2024, 4, 1), money("1", "BTC")),
        FinancialTransaction::trade(at(2024, 4, 2), money("20", "ETH"), money("0.5", "BTC")),
    ]);

    let report = portfolio
        .recalculate(&TransactionProcessor::default(), &prices)
        .await
        .unwrap();

    let eth = portfolio.holding(&CurrencyCode::new("ETH")).unwrap();
    assert_eq!(eth.balance, d("20"));
    assert_eq!(eth.average_bought_price, d("1600"));
    assert_eq!(report.realized_gains[0].gain, money("2000", "USD"));
}

#[tokio::test]
async fn test_continue_policy_keeps_going_after_lot_exhaustion() {
    let mock = MockPriceProvider::new()
        .with_close("BTC", day(2024, 5, 1), d("50000"))
        .with_close("BTC", day(2024, 5, 2), d("51000"));
    let (prices, _temp) = price_service(mock).await;

    let oversell = FinancialTransaction::withdrawal(at(2024, 5, 1), money("1", "BTC"));
    let oversell_id = oversell.id.clone();
    let mut portfolio = usd_portfolio(vec![
        oversell,
        FinancialTransaction::deposit(at(2024, 5, 2), money("2", "BTC")),
    ]);
    portfolio.cost_basis_method = CostBasisMethod::Fifo;

    let halted = portfolio
        .clone()
        .recalculate(&TransactionProcessor::new(ReplayPolicy::Halt), &prices)
        .await;
    assert!(halted.is_err());

    let report = portfolio
        .recalculate(&TransactionProcessor::new(ReplayPolicy::Continue), &prices)
        .await
        .unwrap();
    assert_eq!(report.failed, vec![oversell_id]);
    assert_eq!(
        portfolio.holding(&CurrencyCode::new("BTC")).unwrap().balance,
        d("1")
    );
}
