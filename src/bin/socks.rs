// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// CLI bootstrap: load config, init logging, wire up the reactor pool and
// proxy state machine for the configured mode, run until Ctrl-C.

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use socks_reactor::config::ProxyConfig;
use socks_reactor::crypto;
use socks_reactor::logging;
use socks_reactor::proxy::{ProxyDriver, ProxyModeConfig};
use socks_reactor::reactor_pool::ReactorPool;
use socks_reactor::socket_config::SocketTuning;

#[derive(Parser)]
#[command(name = "socks", about = "Encrypting SOCKS-style TCP proxy")]
struct Cli {
    /// Path to the INI config file.
    #[arg(short = 'c', long = "config")]
    config: PathBuf,
}

const TICK_MILLIS: u64 = 100;

fn ticks_from_secs(secs: u64) -> u32 {
    ((secs * 1000) / TICK_MILLIS).max(1) as u32
}

fn run() -> Result<(), i32> {
    let cli = Cli::parse();

    let cfg = ProxyConfig::load(&cli.config).map_err(|e| {
        eprintln!("config error: {e}");
        -1
    })?;

    let _log_guard = logging::init(&cfg).map_err(|e| {
        eprintln!("logging init error: {e}");
        -1
    })?;

    tracing::info!(mode = ?cfg.mode, port = cfg.port, "starting proxy");

    let tuning = SocketTuning { buf_size: cfg.socket_buf_size, ..SocketTuning::default() };

    let mode_config = ProxyModeConfig {
        mode: cfg.mode,
        encrypt: cfg.encrypt_type,
        username: cfg.username.clone(),
        password: cfg.password.clone(),
        aes_key: crypto::auth_tag(&cfg.username, &cfg.password),
        xor_key: crypto::DEFAULT_XOR_KEY,
        remote_host: cfg.remote.as_ref().map(|r| r.host.clone()).unwrap_or_default(),
        remote_port: cfg.remote.as_ref().map(|r| r.port).unwrap_or_default(),
        connect_timeout_ticks: ticks_from_secs(cfg.connect_timeout_secs),
        poll_timeout_ticks: ticks_from_secs(cfg.poll_timeout_secs),
    };

    let reactors = Arc::new(ReactorPool::new(cfg.thread_count, tuning.clone()).map_err(|e| {
        tracing::error!(error = %e, "failed to create reactor pool");
        -1
    })?);

    let driver = Arc::new(ProxyDriver::new(Arc::clone(&reactors), mode_config, tuning, cfg.socket_buf_size.min(64 * 1024)));

    let reactor_threads = reactors.start_poll(driver.clone());

    let listener = TcpListener::bind((cfg.bind_address, cfg.port)).map_err(|e| {
        tracing::error!(error = %e, "failed to bind listener");
        -1
    })?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_for_handler = Arc::clone(&shutdown);
    ctrlc_shim::set_handler(move || {
        shutdown_for_handler.store(true, Ordering::Release);
    });

    let shutdown_for_acceptor = Arc::clone(&shutdown);
    let acceptor_result = reactors.run_acceptor(listener, driver.clone(), move || shutdown_for_acceptor.load(Ordering::Acquire));

    reactors.request_stop_all();
    for h in reactor_threads {
        let _ = h.join();
    }

    acceptor_result.map_err(|e| {
        tracing::error!(error = %e, "acceptor loop failed");
        -1
    })?;

    tracing::info!("shutdown complete");
    Ok(())
}

/// Minimal SIGINT handler. A dedicated `ctrlc` crate dependency isn't worth
/// the ambient-signal-handler stack for a single signal; this mirrors what
/// the wrapped syscall does on Unix. The multiplexer itself is Unix-only
/// (see `multiplexer.rs`), so this binary makes no attempt at a Windows
/// console-control-handler equivalent.
#[cfg(unix)]
mod ctrlc_shim {
    use std::sync::OnceLock;

    static HANDLER: OnceLock<Box<dyn Fn() + Send + Sync>> = OnceLock::new();

    pub fn set_handler<F: Fn() + Send + Sync + 'static>(f: F) {
        let _ = HANDLER.set(Box::new(f));
        unsafe {
            libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t);
        }
    }

    extern "C" fn handle_sigint(_sig: libc::c_int) {
        if let Some(f) = HANDLER.get() {
            f();
        }
    }
}

#[cfg(not(unix))]
mod ctrlc_shim {
    pub fn set_handler<F: Fn() + Send + Sync + 'static>(_f: F) {}
}

fn main() {
    match run() {
        Ok(()) => std::process::exit(0),
        Err(code) => std::process::exit(code),
    }
}
