mod common;

use common::{opportunity, Harness};
use rust_decimal_macros::dec;
use tokio_test::{assert_err, assert_ok};
use xrp_arb_bot::{
    errors::BotError,
    exchange::FillMode,
    storage::Store,
    types::{Currency, ExecutionOutcome, ExecutionStatus, Pair, TradeSide, TradeStatus},
};

#[tokio::test]
async fn completed_arbitrage_settles_both_legs() {
    let harness = Harness::funded();
    let executor = harness.executor();
    let opp = opportunity(dec!(100));
    assert_ok!(harness.store.record_opportunity(&opp));

    let outcome = assert_ok!(executor.execute(&opp).await);
    let ExecutionOutcome::Completed(result) = outcome else {
        panic!("expected a completed arbitrage");
    };
    assert_eq!(result.profit_loss, dec!(0.20));

    let xrp = harness.balance(Currency::Xrp);
    let usdt = harness.balance(Currency::Usdt);
    let usdc = harness.balance(Currency::Usdc);
    assert_eq!((xrp.total, xrp.locked), (dec!(1000), dec!(0)));
    assert_eq!((usdt.total, usdt.locked), (dec!(552.10), dec!(0)));
    assert_eq!((usdc.total, usdc.locked), (dec!(448.10), dec!(0)));

    for id in [&result.sell_trade.id, &result.buy_trade.id] {
        let stored = harness.store.trade(id).unwrap().unwrap();
        assert_eq!(stored.status, TradeStatus::Completed);
        assert_eq!(stored.profit_loss, Some(dec!(0.10)));
    }
    assert!(harness.store.opportunity(&opp.id).unwrap().unwrap().executed);

    let journal = harness.store.executions();
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn buy_failure_after_sell_is_a_partial_failure() {
    let harness = Harness::funded();
    harness
        .exchange
        .set_fill_mode(TradeSide::Buy, FillMode::Reject("insufficient liquidity".into()));
    let executor = harness.executor();

    let outcome = assert_ok!(executor.execute(&opportunity(dec!(100))).await);
    let ExecutionOutcome::PartialFailure { sell_trade, buy_trade, reason } = outcome else {
        panic!("expected a partial failure");
    };
    assert!(reason.contains("insufficient liquidity"));

    let sell = harness.store.trade(&sell_trade.id).unwrap().unwrap();
    assert_eq!(sell.status, TradeStatus::Completed);
    if let Some(buy) = buy_trade {
        let stored = harness.store.trade(&buy.id).unwrap().unwrap();
        assert_eq!(stored.status, TradeStatus::Failed);
    }

    // The sell settled; the buy reservation was released.
    assert_eq!(harness.balance(Currency::Xrp).total, dec!(900));
    assert_eq!(harness.balance(Currency::Usdt).total, dec!(552.10));
    let usdc = harness.balance(Currency::Usdc);
    assert_eq!((usdc.total, usdc.locked), (dec!(500), dec!(0)));
}

#[tokio::test]
async fn an_opportunity_executes_at_most_once() {
    let harness = Harness::funded();
    let opp = opportunity(dec!(100));
    harness.store.record_opportunity(&opp).unwrap();

    let executor = harness.executor();
    assert_ok!(executor.execute(&opp).await);
    assert!(matches!(
        executor.execute(&opp).await,
        Err(BotError::DuplicateExecution { .. })
    ));

    // A fresh executor sees the executed flag in the store.
    let other = harness.executor();
    assert!(matches!(
        other.execute(&opp).await,
        Err(BotError::DuplicateExecution { .. })
    ));

    let creates = harness
        .exchange
        .calls()
        .iter()
        .filter(|c| c.operation == "create_order")
        .count();
    assert_eq!(creates, 2);
}

#[tokio::test]
async fn buy_is_submitted_only_after_sell_completed() {
    let harness = Harness::funded();
    harness.exchange.set_fill_mode(TradeSide::Sell, FillMode::AfterPolls(2));
    let executor = harness.executor();

    assert_ok!(executor.execute(&opportunity(dec!(100))).await);

    let calls = harness.exchange.calls();
    let sell_closed = calls
        .iter()
        .position(|c| {
            c.operation == "get_order_status"
                && c.side == Some(TradeSide::Sell)
                && c.state == Some(xrp_arb_bot::exchange::OrderState::Closed)
        })
        .expect("sell leg observed closed");
    let buy_created = calls
        .iter()
        .position(|c| c.operation == "create_order" && c.side == Some(TradeSide::Buy))
        .expect("buy leg submitted");
    assert!(sell_closed < buy_created);
    assert!(calls[sell_closed].at <= calls[buy_created].at);
}

#[tokio::test]
async fn rejected_sell_releases_the_reservation() {
    let harness = Harness::funded();
    harness
        .exchange
        .set_fill_mode(TradeSide::Sell, FillMode::Reject("market closed".into()));
    let executor = harness.executor();

    let err = assert_err!(executor.execute(&opportunity(dec!(100))).await);
    assert!(err.is_exchange_failure());

    let xrp = harness.balance(Currency::Xrp);
    assert_eq!((xrp.total, xrp.locked), (dec!(1000), dec!(0)));
    let trades = harness.store.all_trades();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].status, TradeStatus::Failed);
    assert!(harness.exchange.calls().iter().all(|c| c.side != Some(TradeSide::Buy)));
}

#[tokio::test]
async fn insufficient_xrp_never_reaches_the_exchange() {
    let harness = Harness::new(dec!(50), dec!(500), dec!(500));
    let executor = harness.executor();

    let result = executor.execute(&opportunity(dec!(100))).await;
    assert!(matches!(result, Err(BotError::InsufficientFunds { currency: Currency::Xrp, .. })));
    assert!(harness.exchange.calls().is_empty());
    assert!(harness.store.all_trades().is_empty());
    assert_eq!(harness.balance(Currency::Xrp).locked, dec!(0));
}

#[tokio::test]
async fn unfilled_sell_is_handed_to_the_supervisor() {
    let harness = Harness::funded();
    harness.exchange.set_fill_mode(TradeSide::Sell, FillMode::Never);
    let executor = harness.executor();

    let outcome = assert_ok!(executor.execute(&opportunity(dec!(100))).await);
    assert_eq!(outcome.status(), ExecutionStatus::SellPending);
    assert_eq!(harness.balance(Currency::Xrp).locked, dec!(100));

    let supervisor = harness.supervisor();
    assert_eq!(assert_ok!(supervisor.force_cancel_all().await), 1);

    let sell = harness.store.trade(&outcome.sell_trade().id).unwrap().unwrap();
    assert_eq!(sell.status, TradeStatus::Cancelled);
    let xrp = harness.balance(Currency::Xrp);
    assert_eq!((xrp.total, xrp.locked), (dec!(1000), dec!(0)));
}

#[tokio::test]
async fn buy_filled_above_its_reservation_is_failed_not_completed() {
    let harness = Harness::new(dec!(1000), dec!(500), dec!(51.90));
    harness.exchange.set_price(Pair::XRP_USDC, dec!(0.53));
    let executor = harness.executor();

    let outcome = assert_ok!(executor.execute(&opportunity(dec!(100))).await);
    let ExecutionOutcome::PartialFailure { buy_trade: Some(buy), .. } = outcome else {
        panic!("expected a partial failure with a buy leg");
    };

    let stored = harness.store.trade(&buy.id).unwrap().unwrap();
    assert_eq!(stored.status, TradeStatus::Failed);
    assert!(stored.error_message.unwrap().starts_with("fill could not be settled"));

    // The sell settled; the buy left no trace in the ledger.
    let xrp = harness.balance(Currency::Xrp);
    assert_eq!((xrp.total, xrp.locked), (dec!(900), dec!(0)));
    assert_eq!(harness.balance(Currency::Usdt).total, dec!(552.10));
    let usdc = harness.balance(Currency::Usdc);
    assert_eq!((usdc.total, usdc.locked), (dec!(51.90), dec!(0)));
}
