use chrono::{NaiveDate, TimeZone, Utc};
use coinledger::datasource::MockPriceProvider;
use coinledger::db::init_db;
use coinledger::domain::{CostBasisMethod, CurrencyCode, Decimal, FinancialTransaction, Money};
use coinledger::engine::{PriceHistoryService, PriceServiceSettings, TransactionProcessor};
use coinledger::{PortfolioService, Repository, UserPortfolio};
use std::sync::Arc;
use tempfile::TempDir;

fn d(s: &str) -> Decimal {
    Decimal::from_str_canonical(s).unwrap()
}

fn money(amount: &str, code: &str) -> Money {
    Money::new(d(amount), CurrencyCode::new(code))
}

fn day(dd: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 7, dd).unwrap()
}

struct Harness {
    repo: Arc<Repository>,
    service: PortfolioService,
    _temp: TempDir,
}

async fn setup() -> Harness {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));

    let mock = MockPriceProvider::new()
        .with_close("BTC", day(1), d("60000"))
        .with_close("BTC", day(2), d("62000"))
        .with_close("BTC", day(3), d("58000"))
        .with_close("ETH", day(2), d("3100"))
        .with_close("ETH", day(3), d("2900"));
    let prices = Arc::new(PriceHistoryService::new(
        Arc::new(mock),
        repo.clone(),
        PriceServiceSettings {
            history_start: day(1),
            ..Default::default()
        },
    ));
    let service = PortfolioService::new(repo.clone(), prices, TransactionProcessor::default());

    Harness {
        repo,
        service,
        _temp: temp_dir,
    }
}

fn log() -> Vec<FinancialTransaction> {
    let at = |dd: u32, h: u32| Utc.with_ymd_and_hms(2024, 7, dd, h, 0, 0).unwrap();
    vec![
        // Deliberately out of order; replay sorts by time.
        FinancialTransaction::trade(at(3, 9), money("10", "ETH"), money("0.5", "BTC"))
            .with_fee(money("0.001", "BTC")),
        FinancialTransaction::deposit(at(1, 9), money("100000", "USD")),
        FinancialTransaction::trade(at(1, 10), money("1", "BTC"), money("60000", "USD"))
            .with_fee(money("30", "USD")),
        FinancialTransaction::trade(at(2, 9), money("0.5", "BTC"), money("31000", "USD")),
        FinancialTransaction::trade(at(2, 10), money("30938", "USD"), money("0.499", "BTC")),
        FinancialTransaction::withdrawal(at(3, 12), money("2", "ETH")),
    ]
}

#[tokio::test]
async fn test_replay_is_identical_across_reloads() {
    let h = setup().await;
    let portfolio = h
        .service
        .create_portfolio(
            UserPortfolio::new("determinism", CurrencyCode::new("USD"))
                .with_cost_basis_method(CostBasisMethod::Fifo),
        )
        .await
        .unwrap();
    let wallet = h.service.add_wallet(&portfolio.id, "main").await.unwrap();

    let first = h
        .service
        .add_transactions(&portfolio.id, &wallet, log())
        .await
        .unwrap();
    let stored_first = h.repo.load_portfolio(&portfolio.id).await.unwrap().unwrap();

    let second = h.service.recalculate(&portfolio.id).await.unwrap();
    let stored_second = h.repo.load_portfolio(&portfolio.id).await.unwrap().unwrap();

    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert_eq!(
        serde_json::to_string(&stored_first).unwrap(),
        serde_json::to_string(&stored_second).unwrap()
    );
}

#[tokio::test]
async fn test_method_switch_changes_gains_not_holdings() {
    let h = setup().await;
    let portfolio = h
        .service
        .create_portfolio(UserPortfolio::new("switch", CurrencyCode::new("USD")))
        .await
        .unwrap();
    let wallet = h.service.add_wallet(&portfolio.id, "main").await.unwrap();
    let average = h
        .service
        .add_transactions(&portfolio.id, &wallet, log())
        .await
        .unwrap();
    let holdings_average = h
        .repo
        .load_portfolio(&portfolio.id)
        .await
        .unwrap()
        .unwrap()
        .holdings;

    let lifo = h
        .service
        .set_cost_basis_method(&portfolio.id, CostBasisMethod::Lifo)
        .await
        .unwrap();
    let reloaded = h.repo.load_portfolio(&portfolio.id).await.unwrap().unwrap();

    assert_eq!(reloaded.cost_basis_method, CostBasisMethod::Lifo);
    assert_eq!(reloaded.holdings, holdings_average);
    assert_eq!(average.realized_gains.len(), lifo.realized_gains.len());
    assert_ne!(
        average.realized_gains[0].cost_basis,
        lifo.realized_gains[0].cost_basis
    );
}

#[tokio::test]
async fn test_expected_balances_after_replay() {
    let h = setup().await;
    let portfolio = h
        .service
        .create_portfolio(UserPortfolio::new("balances", CurrencyCode::new("USD")))
        .await
        .unwrap();
    let wallet = h.service.add_wallet(&portfolio.id, "main").await.unwrap();
    let report = h
        .service
        .add_transactions(&portfolio.id, &wallet, log())
        .await
        .unwrap();
    assert_eq!(report.flagged, 0);

    let stored = h.repo.load_portfolio(&portfolio.id).await.unwrap().unwrap();
    let balance = |code: &str| stored.holding(&CurrencyCode::new(code)).unwrap().balance;

    // 100000 - 60000 - 30 fee - 31000 + 30938
    assert_eq!(balance("USD"), d("39908"));
    // 1 + 0.5 - 0.499 sold for USD - 0.5 traded for ETH - 0.001 fee
    assert_eq!(balance("BTC"), d("0.5"));
    assert_eq!(balance("ETH"), d("8"));
}
