// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Encrypting SOCKS-style TCP proxy built on a hand-rolled reactor pool and
// time wheel. No async runtime: concurrency is plain OS threads plus a
// `mio::Poll`-backed multiplexer per reactor.

pub mod error;

pub mod spin_lock;
pub use spin_lock::SpinLock;

pub mod mem;

pub mod slot_pool;
pub use slot_pool::SlotPool;

pub mod time_wheel;
pub use time_wheel::{TimeWheel, TimerId};

pub mod os_event;
pub use os_event::OsEvent;

pub mod socket_config;

pub mod multiplexer;
pub use multiplexer::Multiplexer;

pub mod reactor;
pub use reactor::Reactor;

pub mod reactor_pool;
pub use reactor_pool::ReactorPool;

pub mod crypto;

pub mod connection;
pub use connection::ProxyConnection;

pub mod proxy;

pub mod pat;

pub mod thread_pool;
pub use thread_pool::ThreadPool;

pub mod thread_group;
pub use thread_group::ThreadGroup;

pub mod config;
pub use config::ProxyConfig;

pub mod logging;
