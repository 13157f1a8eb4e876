use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::config::EngineConfig;

pub struct TelemetryGuard {
    pub session_id: Uuid,
    pub log_path: Option<PathBuf>,
    _file_guard: Option<WorkerGuard>,
}

/// Installs the global subscriber described by `config.diagnostics`. Logs go to
/// `log_dir` when given, otherwise `config.paths.logs_dir`.
pub fn init_tracing(
    config: &EngineConfig,
    log_dir: Option<&Path>,
) -> anyhow::Result<TelemetryGuard> {
    let diagnostics = &config.diagnostics;
    let session_id = Uuid::new_v4();

    let (file_layer, log_path, file_guard) = if diagnostics.file_logging {
        let log_dir = log_dir.unwrap_or(&config.paths.logs_dir);
        fs::create_dir_all(log_dir)
            .with_context(|| format!("failed to create log directory: {}", log_dir.display()))?;

        let file_name = session_log_file_name(&diagnostics.trace_file_prefix, Utc::now());
        let log_path = log_dir.join(&file_name);
        let (writer, guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, file_name));
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(writer);
        (Some(layer), Some(log_path), Some(guard))
    } else {
        (None, None, None)
    };

    // stdout belongs to CLI progress lines.
    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_thread_names(true)
        .with_target(false)
        .with_writer(std::io::stderr);

    if let Err(error) = tracing_subscriber::registry()
        .with(env_filter(&diagnostics.rust_log_filter))
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
    {
        warn!(?error, "global tracing subscriber already initialized");
    } else {
        info!(
            %session_id,
            log_path = log_path.as_ref().map(|path| path.display().to_string()),
            "tracing initialized"
        );
    }

    Ok(TelemetryGuard {
        session_id,
        log_path,
        _file_guard: file_guard,
    })
}

fn session_log_file_name(prefix: &str, started_at: DateTime<Utc>) -> String {
    format!("{prefix}-{}.log", started_at.format("%Y%m%d-%H%M%S"))
}

fn env_filter(configured: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
