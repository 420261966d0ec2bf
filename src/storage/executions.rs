//! Trade and execution journals

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::debug;
use crate::types::{ExecutionRecord, Trade};

fn append_line<T: Serialize>(output_dir: &Path, folder: &str, prefix: &str, value: &T) -> Result<()> {
    let dir = output_dir.join(folder);
    fs::create_dir_all(&dir)?;
    let filename = dir.join(format!("{}_{}.jsonl", prefix, Utc::now().format("%Y-%m-%d")));

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&filename)?;

    writeln!(file, "{}", serde_json::to_string(value)?)?;
    Ok(())
}

/// Appends the current state of a trade. The journal keeps every transition.
pub fn save_trade(output_dir: &Path, trade: &Trade) -> Result<()> {
    append_line(output_dir, "trades", "trades", trade)?;
    debug!(
        trade_id = %trade.id,
        side = %trade.side,
        status = ?trade.status,
        "Saved trade"
    );
    Ok(())
}

pub fn save_trade_execution(output_dir: &Path, execution: &ExecutionRecord) -> Result<()> {
    append_line(output_dir, "executions", "executions", execution)?;
    debug!(
        execution_id = %execution.id,
        status = ?execution.status,
        profit_loss = ?execution.profit_loss,
        "Saved trade execution"
    );
    Ok(())
}
