//! Display and printing utilities

use rust_decimal::Decimal;
use tracing::{error, info, warn};
use crate::{
    analytics::MarketInsight,
    engine::SessionStats,
    errors::BreakerState,
    types::{ExecutionOutcome, Opportunity},
};

fn pct(part: u64, whole: u64) -> f64 {
    if whole > 0 {
        part as f64 / whole as f64 * 100.0
    } else {
        0.0
    }
}

pub fn display_session_stats(stats: &SessionStats, breakers: &[BreakerState]) {
    let runtime = stats.started.elapsed().as_secs() / 60;

    info!("\n📊 Session Statistics ({} minutes, {} cycles)", runtime, stats.cycles);
    info!("   📈 OPPORTUNITIES:");
    info!("     Detected: {}", stats.opportunities);
    info!("     Rejected by risk: {}", stats.rejected);
    info!("     Hit rate: {:.1}%", pct(stats.opportunities, stats.cycles));

    info!("   🚀 EXECUTION:");
    info!("     Executions: {}", stats.executions);
    info!("     Completed: {}", stats.completed);
    info!("     Partial failures: {}", stats.partial_failures);
    info!("     Success rate: {:.1}%", pct(stats.completed, stats.executions));
    info!("     Cumulative P&L: {:.6}", stats.cumulative_pnl);

    info!("   ⚙️  SYSTEM:");
    let active: Vec<&BreakerState> = breakers.iter().filter(|b| b.active).collect();
    if active.is_empty() {
        info!("     Circuit breakers: all clear");
    } else {
        for breaker in active {
            warn!(
                "     Circuit breaker {} ACTIVE: {}",
                breaker.category,
                breaker.reason.as_deref().unwrap_or("no reason recorded")
            );
        }
    }
    info!("");
}

pub fn display_opportunity(opportunity: &Opportunity, insight: &MarketInsight) {
    warn!("\n🎯 ARBITRAGE OPPORTUNITY {}", opportunity.id);
    warn!("📋 Strategy: {} ({:?} prices)", opportunity.direction, opportunity.price_source);
    warn!("💰 Profit Analysis:");
    warn!("   Sell {}: {:.6}", opportunity.sell_pair(), opportunity.sell_price);
    warn!("   Buy  {}: {:.6}", opportunity.buy_pair(), opportunity.buy_price);
    warn!("   Spread: {:.4}%", opportunity.spread_pct);
    warn!("   Amount: {} XRP", opportunity.amount);
    warn!("   Fees: {:.6}", opportunity.fees);
    warn!("   Net Profit: {:.6}", opportunity.net_profit);
    warn!("   ROI: {:.3}%", opportunity.roi_pct());
    match &insight.spread {
        Some(stats) => warn!(
            "📊 Spread z-score {:.2}, trend {:.2}, signal {:?}",
            stats.z_score, stats.trend, insight.signal
        ),
        None => warn!("📊 Spread history still warming up"),
    }
}

pub fn display_execution(outcome: &ExecutionOutcome) {
    let sell = outcome.sell_trade();
    match outcome {
        ExecutionOutcome::Completed(result) => {
            warn!("\n✅ ARBITRAGE EXECUTED");
            warn!("   Sell: {} {} @ {:.6} ({})", sell.amount, sell.pair, sell.price, sell.id);
            warn!(
                "   Buy:  {} {} @ {:.6} ({})",
                result.buy_trade.amount, result.buy_trade.pair, result.buy_trade.price, result.buy_trade.id
            );
            let sign = if result.profit_loss >= Decimal::ZERO { "+" } else { "" };
            warn!("   P&L: {}{:.6}", sign, result.profit_loss);
        }
        ExecutionOutcome::SellPending { .. } => {
            warn!("\n⏳ Sell leg {} pending, supervisor will resolve it", sell.id);
        }
        ExecutionOutcome::BuyPending { buy_trade, .. } => {
            warn!("\n⏳ Sell {} filled, buy leg {} pending", sell.id, buy_trade.id);
        }
        ExecutionOutcome::PartialFailure { reason, .. } => {
            error!("\n❌ PARTIAL EXECUTION: sell {} filled, buy leg failed", sell.id);
            error!("   Unhedged: {} XRP sold on {}", sell.amount, sell.pair);
            error!("   Error: {}", reason);
        }
    }
}
