//! Logging setup and configuration

use anyhow::Result;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub struct LoggingGuard {
    pub _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Console plus an hourly rolling file under `<output_dir>/logs`. Keep the
/// returned guard alive for as long as logs should be flushed.
pub fn setup_logging(output_dir: &Path) -> Result<LoggingGuard> {
    let file_appender = tracing_appender::rolling::hourly(output_dir.join("logs"), "xrp-arb-bot.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_ansi(true)
                .with_level(true)
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(false)
                .with_level(true)
                .with_ansi(false)
                .compact()
        )
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse()?)
        )
        .try_init()?;

    Ok(LoggingGuard { _guard: guard })
}

pub fn setup_output_directories(output_dir: &Path) -> Result<()> {
    use std::fs;

    for sub in ["logs", "opportunities", "trades", "executions"] {
        fs::create_dir_all(output_dir.join(sub))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_journal_directories() {
        let root = std::env::temp_dir().join(format!("xrp-arb-dirs-{}", uuid::Uuid::new_v4()));
        setup_output_directories(&root).unwrap();
        for sub in ["logs", "opportunities", "trades", "executions"] {
            assert!(root.join(sub).is_dir());
        }
        std::fs::remove_dir_all(&root).unwrap();
    }
}
