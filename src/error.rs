// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error taxonomy shared across the reactor, proxy, and PAT subsystems.
// Every failing operation returns one of these instead of panicking or
// throwing; per-connection errors never propagate past the reactor pass
// that observed them.

use thiserror::Error;

/// Errors produced by the slot pool (biqueue).
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("slot pool capacity exhausted (max {max_pages} pages)")]
    CapacityExhausted { max_pages: usize },
    #[error("invalid slot id {0:#x}: page index out of range")]
    InvalidId(u32),
}

/// Errors produced by the time wheel.
#[derive(Debug, Error)]
pub enum TimerError {
    #[error("out of timer slots")]
    OutOfTimers,
}

/// Transport-level errors surfaced by connection/PAT I/O.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer closed the connection")]
    Closed,
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport timed out")]
    Timeout,
    #[error("would block")]
    WouldBlock,
}

/// SOCKS5 / tunnel / PAT protocol parsing errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unsupported SOCKS version {0}")]
    UnsupportedVersion(u8),
    #[error("no acceptable authentication method")]
    NoAcceptableMethod,
    #[error("unsupported address type {0}")]
    UnsupportedAddressType(u8),
    #[error("unsupported command {0} (only CONNECT is supported)")]
    UnsupportedCommand(u8),
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
    #[error("authentication failed")]
    AuthFailed,
}

/// Configuration load/validation errors. Fatal at bootstrap: the process
/// exits with code -1 without ever starting the reactor pool.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse ini syntax: {0}")]
    Parse(String),
    #[error("missing required field [{section}] {key}")]
    MissingField { section: &'static str, key: &'static str },
    #[error("invalid value for [{section}] {key}: {value}")]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        value: String,
    },
}

/// Logging initialization errors. Also fatal at bootstrap.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to create log directory {0}: {1}")]
    CreateDir(String, std::io::Error),
    #[error("failed to install global tracing subscriber")]
    SetGlobalDefault,
}
