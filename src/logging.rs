// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Tracing subscriber bootstrap: daily-rolling file appender plus an
// optional stderr mirror, both honoring `cfg.log_level` (overridable via
// `RUST_LOG`).

use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::{LogType, ProxyConfig};
use crate::error::LoggingError;

/// Holds the non-blocking writer's flush guard(s); must be kept alive for
/// the lifetime of the process, or buffered log lines are lost on exit.
pub struct LoggingGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

struct MillisLocalTimer;

impl FormatTime for MillisLocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        let secs = now.as_secs();
        let millis = now.subsec_millis();
        let days = secs / 86_400;
        let tod = secs % 86_400;
        let (h, m, s) = (tod / 3600, (tod % 3600) / 60, tod % 60);
        write!(w, "{days}d {h:02}:{m:02}:{s:02}.{millis:03}")
    }
}

pub fn init(cfg: &ProxyConfig) -> Result<LoggingGuard, LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    let want_file = matches!(cfg.log_type, LogType::File | LogType::Both);
    let want_stderr = matches!(cfg.log_type, LogType::Stderr | LogType::Both);

    let mut file_guard = None;
    let file_layer = if want_file {
        std::fs::create_dir_all(&cfg.log_path)
            .map_err(|e| LoggingError::CreateDir(cfg.log_path.display().to_string(), e))?;
        let appender = tracing_appender::rolling::daily(&cfg.log_path, &cfg.log_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);
        Some(
            tracing_subscriber::fmt::layer()
                .with_timer(MillisLocalTimer)
                .with_thread_ids(true)
                .with_writer(writer)
                .with_ansi(false),
        )
    } else {
        None
    };

    let stderr_layer = if want_stderr {
        Some(
            tracing_subscriber::fmt::layer()
                .with_timer(MillisLocalTimer)
                .with_thread_ids(true)
                .with_writer(std::io::stderr),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|_| LoggingError::SetGlobalDefault)?;

    Ok(LoggingGuard { _file_guard: file_guard })
}
