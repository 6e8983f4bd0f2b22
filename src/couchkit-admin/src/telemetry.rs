//! File and console logging for the admin tool
//!
//! - JSON formatted logs to `./logs/couchkit-admin.log`
//! - Human-readable output on stderr, so stdout stays pure JSON
//! - Size-based rotation (10MB per file) plus daily rotation

use anyhow::Result;
use rolling_file::{RollingConditionBasic, RollingFileAppender};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Install the subscriber; keep the guard alive until exit so logs get flushed
pub fn init_telemetry() -> Result<WorkerGuard> {
    let log_dir = Path::new("./logs");
    std::fs::create_dir_all(log_dir)?;

    // Rotates at 10MB or daily, whichever comes first
    let file_appender = RollingFileAppender::new(
        log_dir.join("couchkit-admin.log"),
        RollingConditionBasic::new()
            .daily()
            .max_size(10 * 1024 * 1024),
        9,
    )?;

    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("couchkit_admin=info,couchkit_rs=debug,couchkit_core=debug")
    });

    let file_layer = fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_span_events(FmtSpan::CLOSE)
        .with_current_span(true)
        .with_target(true)
        .with_thread_ids(true);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    tracing::debug!("telemetry initialized, logging to {:?}", log_dir);

    Ok(guard)
}
