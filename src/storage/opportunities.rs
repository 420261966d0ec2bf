//! Arbitrage opportunity journal

use anyhow::Result;
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::debug;
use crate::types::OpportunityRecord;

pub fn save_opportunity(output_dir: &Path, record: &OpportunityRecord) -> Result<()> {
    let dir = output_dir.join("opportunities");
    fs::create_dir_all(&dir)?;
    let filename = dir.join(format!("arbitrage_{}.jsonl", Utc::now().format("%Y-%m-%d")));

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&filename)?;

    writeln!(file, "{}", serde_json::to_string(record)?)?;

    debug!(
        opportunity_id = %record.opportunity.id,
        spread_pct = %record.opportunity.spread_pct,
        net_profit = %record.opportunity.net_profit,
        "Saved arbitrage opportunity"
    );

    Ok(())
}
