// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Proxy connection objects, pooled by id via `SlotPool` so the reactor can
// carry a stable 32-bit id in its payload instead of a raw pointer.

use std::net::TcpStream;
use std::os::fd::RawFd;

use crate::error::PoolError;
use crate::proxy::state_machine::ProxyState;
use crate::slot_pool::SlotPool;

/// One half of a proxy connection (client-facing or server-facing).
pub struct Endpoint {
    pub stream: Option<TcpStream>,
    pub inactive: bool,
}

impl Endpoint {
    pub fn empty() -> Self {
        Self { stream: None, inactive: true }
    }

    pub fn fd(&self) -> Option<RawFd> {
        use std::os::fd::AsRawFd;
        self.stream.as_ref().map(|s| s.as_raw_fd())
    }

    pub fn take(&mut self) -> Option<TcpStream> {
        self.inactive = true;
        self.stream.take()
    }

    pub fn set(&mut self, stream: TcpStream) {
        self.inactive = false;
        self.stream = Some(stream);
    }
}

/// Address type parsed out of a SOCKS5 request, per RFC 1928 §5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    Ipv4,
    Domain,
    Ipv6,
}

/// A single proxied connection: client endpoint, server endpoint, scratch
/// buffer, parsed request fields, and the state-machine tag.
pub struct ProxyConnection {
    pub id: u32,
    pub client: Endpoint,
    pub server: Endpoint,
    pub scratch: Vec<u8>,
    pub offset: usize,
    pub state: ProxyState,
    pub is_first_content: bool,
    pub addr_type: Option<AddressType>,
    pub host: String,
    pub port: u16,
}

impl ProxyConnection {
    pub fn new(id: u32, scratch_size: usize) -> Self {
        Self {
            id,
            client: Endpoint::empty(),
            server: Endpoint::empty(),
            scratch: vec![0u8; scratch_size],
            offset: 0,
            state: ProxyState::Conn,
            is_first_content: true,
            addr_type: None,
            host: String::new(),
            port: 0,
        }
    }

    pub fn reset(&mut self, scratch_size: usize) {
        self.client.take();
        self.server.take();
        self.offset = 0;
        self.state = ProxyState::Conn;
        self.is_first_content = true;
        self.addr_type = None;
        self.host.clear();
        self.port = 0;
        if self.scratch.len() != scratch_size {
            self.scratch.resize(scratch_size, 0);
        }
    }
}

/// Pool of [`ProxyConnection`] objects keyed by id-stable slot ids.
pub struct ConnectionPool {
    pool: SlotPool<ProxyConnection>,
    scratch_size: usize,
}

impl ConnectionPool {
    pub fn new(capacity_hint: usize, scratch_size: usize) -> Self {
        Self {
            pool: SlotPool::new(capacity_hint, 0),
            scratch_size,
        }
    }

    pub fn alloc(&self) -> Result<u32, PoolError> {
        let id = self.pool.alloc()?;
        unsafe {
            let ptr = self.pool.get_by_id(id).expect("just allocated");
            std::ptr::write(ptr, ProxyConnection::new(id, self.scratch_size));
        }
        Ok(id)
    }

    /// # Safety
    /// Same contract as [`SlotPool::get_by_id`]: `id` must currently be
    /// allocated and the caller must not alias mutable access across threads.
    pub unsafe fn get(&self, id: u32) -> Result<*mut ProxyConnection, PoolError> {
        self.pool.get_by_id(id)
    }

    pub fn free(&self, id: u32) {
        self.pool.free(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_initializes_fresh_state() {
        let pool = ConnectionPool::new(4, 256);
        let id = pool.alloc().unwrap();
        unsafe {
            let conn = &*pool.get(id).unwrap();
            assert_eq!(conn.id, id);
            assert_eq!(conn.state, ProxyState::Conn);
            assert!(conn.is_first_content);
            assert_eq!(conn.scratch.len(), 256);
        }
        pool.free(id);
    }
}
