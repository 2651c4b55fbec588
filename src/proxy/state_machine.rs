// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The three-mode proxy state machine: SOCKS direct, local-proxy (L)
// encrypting relay, remote-proxy (R) decrypting relay. Driven by
// `Reactor` callbacks; every handler is non-blocking and leaves the
// connection armed for its next expected event before returning.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;

use crate::connection::{AddressType, ConnectionPool, Endpoint};
use crate::crypto::{self, EncryptType};
use crate::reactor::{Reactor, ReactorEvent, ReactorHandler, ReactorPayload, Side};
use crate::reactor_pool::{AcceptHandler, ReactorPool};
use crate::socket_config::{tune_outbound, SocketTuning};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Conn,
    Auth,
    Host,
    ConnServer,
    ConnServerCheck,
    Content,
    LContent,
    RConnServerCheck,
    RContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyMode {
    Socks,
    Local,
    Remote,
}

#[derive(Debug, Clone)]
pub struct ProxyModeConfig {
    pub mode: ProxyMode,
    pub encrypt: EncryptType,
    pub username: String,
    pub password: String,
    pub aes_key: [u8; 16],
    pub xor_key: u8,
    pub remote_host: String,
    pub remote_port: u16,
    pub connect_timeout_ticks: u32,
    pub poll_timeout_ticks: u32,
}

impl ProxyModeConfig {
    fn requires_socks_auth(&self) -> bool {
        !self.username.is_empty()
    }

    fn auth_tag(&self) -> [u8; 16] {
        crypto::auth_tag(&self.username, &self.password)
    }
}

/// Length-prefixed tunnel frame header shared by L/R modes, per the wire
/// format in the L↔R tunnel spec: `u32 len || u8 is_first || 16B auth ||
/// (is_first ? u8 hlen || host || u16 port : ε) || payload`.
struct TunnelHeader {
    is_first: bool,
    auth: [u8; 16],
    host: Option<(String, u16)>,
}

fn encode_tunnel_plaintext(header: &TunnelHeader, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + 16 + payload.len() + 32);
    buf.push(header.is_first as u8);
    buf.extend_from_slice(&header.auth);
    if let Some((host, port)) = &header.host {
        buf.push(host.len() as u8);
        buf.extend_from_slice(host.as_bytes());
        buf.extend_from_slice(&port.to_be_bytes());
    }
    buf.extend_from_slice(payload);
    buf
}

fn encrypt_frame(plaintext: &[u8], cfg: &ProxyModeConfig) -> Vec<u8> {
    let mut body = match cfg.encrypt {
        EncryptType::None => plaintext.to_vec(),
        EncryptType::Aes => crypto::aes_encrypt(plaintext, &cfg.aes_key),
        EncryptType::Xor => {
            let mut v = plaintext.to_vec();
            crypto::xor_in_place(&mut v, cfg.xor_key);
            v
        }
    };
    let mut framed = Vec::with_capacity(4 + body.len());
    framed.extend_from_slice(&(body.len() as u32).to_be_bytes());
    framed.append(&mut body);
    framed
}

fn decrypt_frame(body: &[u8], cfg: &ProxyModeConfig) -> Option<Vec<u8>> {
    match cfg.encrypt {
        EncryptType::None => Some(body.to_vec()),
        EncryptType::Aes => crypto::aes_decrypt(body, &cfg.aes_key),
        EncryptType::Xor => {
            let mut v = body.to_vec();
            crypto::xor_in_place(&mut v, cfg.xor_key);
            Some(v)
        }
    }
}

/// Parsed first-content tunnel payload: auth tag + optional host/port + rest.
struct ParsedTunnel {
    is_first: bool,
    auth: [u8; 16],
    host: Option<(String, u16)>,
    payload_start: usize,
}

fn parse_tunnel_plaintext(plain: &[u8]) -> Option<ParsedTunnel> {
    if plain.is_empty() {
        return None;
    }
    let is_first = plain[0] != 0;
    if plain.len() < 17 {
        return None;
    }
    let mut auth = [0u8; 16];
    auth.copy_from_slice(&plain[1..17]);
    let mut pos = 17;
    let host = if is_first {
        if plain.len() < pos + 1 {
            return None;
        }
        let hlen = plain[pos] as usize;
        pos += 1;
        if plain.len() < pos + hlen + 2 {
            return None;
        }
        let h = String::from_utf8_lossy(&plain[pos..pos + hlen]).into_owned();
        pos += hlen;
        let port = u16::from_be_bytes([plain[pos], plain[pos + 1]]);
        pos += 2;
        Some((h, port))
    } else {
        None
    };
    Some(ParsedTunnel { is_first, auth, host, payload_start: pos })
}

/// Drives the proxy state machine for every connection accepted by the
/// reactor pool in this process. One driver instance is shared across all
/// reactors.
pub struct ProxyDriver {
    pub connections: ConnectionPool,
    pub reactors: Arc<ReactorPool>,
    pub config: ProxyModeConfig,
    pub tuning: SocketTuning,
}

impl ProxyDriver {
    pub fn new(reactors: Arc<ReactorPool>, config: ProxyModeConfig, tuning: SocketTuning, scratch_size: usize) -> Self {
        Self {
            connections: ConnectionPool::new(1024, scratch_size),
            reactors,
            config,
            tuning,
        }
    }

    fn close_connection(&self, reactor: &Reactor, conn_id: u32) {
        unsafe {
            if let Ok(ptr) = self.connections.get(conn_id) {
                let conn = &mut *ptr;
                if let Some(fd) = conn.client.fd() {
                    reactor.del(fd);
                }
                if let Some(fd) = conn.server.fd() {
                    reactor.del(fd);
                }
                conn.client.take();
                conn.server.take();
            }
        }
        self.connections.free(conn_id);
    }

    fn arm_client_read(&self, reactor: &Reactor, conn_id: u32, fd: RawFd) {
        let _ = reactor.mod_timed_read(fd, ReactorPayload::Proxy { conn_id, side: Side::Client }, self.config.poll_timeout_ticks);
    }

    fn arm_server_read_timed(&self, reactor: &Reactor, conn_id: u32, fd: RawFd) {
        let _ = reactor.mod_timed_read(fd, ReactorPayload::Proxy { conn_id, side: Side::Server }, self.config.poll_timeout_ticks);
    }

    pub fn on_accept_new(&self, reactor: &Arc<Reactor>, stream: TcpStream, _peer: std::net::SocketAddr) -> bool {
        let Ok(conn_id) = self.connections.alloc() else {
            tracing::warn!("proxy: connection pool exhausted, dropping accept");
            return false;
        };
        let fd = stream.as_raw_fd();
        unsafe {
            let conn = &mut *self.connections.get(conn_id).expect("just allocated");
            conn.client.set(stream);
            // R-mode listeners only ever see already-framed tunnel traffic
            // (never a SOCKS greeting), so they must skip straight past the
            // SOCKS states to awaiting the first tunnel frame.
            if self.config.mode == ProxyMode::Remote {
                conn.state = ProxyState::RContent;
            }
        }
        let _ = reactor.add_timed_read(fd, ReactorPayload::Proxy { conn_id, side: Side::Client }, self.config.poll_timeout_ticks);
        true
    }

    fn handle_timeout(&self, reactor: &Reactor, conn_id: u32) {
        tracing::debug!(conn_id, "proxy: connection timed out");
        self.close_connection(reactor, conn_id);
    }

    fn read_client(&self, conn_id: u32) -> std::io::Result<usize> {
        unsafe {
            let conn = &mut *self.connections.get(conn_id).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            let stream = conn.client.stream.as_mut().ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotConnected))?;
            let offset = conn.offset;
            stream.read(&mut conn.scratch[offset..])
        }
    }

    fn handle_conn(&self, reactor: &Reactor, conn_id: u32) {
        match self.read_client(conn_id) {
            Ok(0) => self.close_connection(reactor, conn_id),
            Ok(n) => unsafe {
                let conn = &mut *self.connections.get(conn_id).unwrap();
                conn.offset += n;
                match crate::proxy::socks::parse_greeting(&conn.scratch[..conn.offset]) {
                    Ok(Some((greeting, _))) => {
                        let requires_auth = self.config.requires_socks_auth();
                        let method = crate::proxy::socks::choose_method(&greeting.methods, requires_auth);
                        let fd = conn.client.fd().unwrap();
                        if let Some(stream) = conn.client.stream.as_mut() {
                            let _ = stream.write_all(&crate::proxy::socks::encode_method_reply(method));
                        }
                        conn.offset = 0;
                        if method == crate::proxy::socks::METHOD_NONE_ACCEPTABLE {
                            drop(conn);
                            self.close_connection(reactor, conn_id);
                            return;
                        }
                        conn.state = if requires_auth { ProxyState::Auth } else { ProxyState::Host };
                        drop(conn);
                        self.arm_client_read(reactor, conn_id, fd);
                    }
                    Ok(None) => {
                        let fd = conn.client.fd().unwrap();
                        drop(conn);
                        self.arm_client_read(reactor, conn_id, fd);
                    }
                    Err(e) => {
                        tracing::warn!(conn_id, error = %e, "proxy: bad SOCKS greeting");
                        drop(conn);
                        self.close_connection(reactor, conn_id);
                    }
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                let fd = unsafe { (*self.connections.get(conn_id).unwrap()).client.fd().unwrap() };
                self.arm_client_read(reactor, conn_id, fd);
            }
            Err(_) => self.close_connection(reactor, conn_id),
        }
    }

    fn handle_auth(&self, reactor: &Reactor, conn_id: u32) {
        match self.read_client(conn_id) {
            Ok(0) => self.close_connection(reactor, conn_id),
            Ok(n) => unsafe {
                let conn = &mut *self.connections.get(conn_id).unwrap();
                conn.offset += n;
                match crate::proxy::socks::parse_auth(&conn.scratch[..conn.offset]) {
                    Ok(Some((req, _))) => {
                        let ok = req.user == self.config.username && req.pass == self.config.password;
                        let fd = conn.client.fd().unwrap();
                        if let Some(stream) = conn.client.stream.as_mut() {
                            let _ = stream.write_all(&crate::proxy::socks::encode_auth_reply(ok));
                        }
                        conn.offset = 0;
                        if !ok {
                            drop(conn);
                            self.close_connection(reactor, conn_id);
                            return;
                        }
                        conn.state = ProxyState::Host;
                        drop(conn);
                        self.arm_client_read(reactor, conn_id, fd);
                    }
                    Ok(None) => {
                        let fd = conn.client.fd().unwrap();
                        drop(conn);
                        self.arm_client_read(reactor, conn_id, fd);
                    }
                    Err(e) => {
                        tracing::warn!(conn_id, error = %e, "proxy: bad auth sub-negotiation");
                        drop(conn);
                        self.close_connection(reactor, conn_id);
                    }
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                let fd = unsafe { (*self.connections.get(conn_id).unwrap()).client.fd().unwrap() };
                self.arm_client_read(reactor, conn_id, fd);
            }
            Err(_) => self.close_connection(reactor, conn_id),
        }
    }

    fn handle_host(&self, reactor: &Reactor, conn_id: u32) {
        match self.read_client(conn_id) {
            Ok(0) => self.close_connection(reactor, conn_id),
            Ok(n) => unsafe {
                let conn = &mut *self.connections.get(conn_id).unwrap();
                conn.offset += n;
                match crate::proxy::socks::parse_request(&conn.scratch[..conn.offset]) {
                    Ok(Some((req, _))) => {
                        conn.host = req.host;
                        conn.port = req.port;
                        conn.addr_type = Some(req.atype);
                        let fd = conn.client.fd().unwrap();
                        if let Some(stream) = conn.client.stream.as_mut() {
                            let _ = stream.write_all(&crate::proxy::socks::encode_request_reply_ok());
                        }
                        conn.offset = 0;
                        conn.state = ProxyState::ConnServer;
                        drop(conn);
                        self.begin_connect_server(reactor, conn_id, fd);
                    }
                    Ok(None) => {
                        let fd = conn.client.fd().unwrap();
                        drop(conn);
                        self.arm_client_read(reactor, conn_id, fd);
                    }
                    Err(e) => {
                        tracing::warn!(conn_id, error = %e, "proxy: bad SOCKS request");
                        drop(conn);
                        self.close_connection(reactor, conn_id);
                    }
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                let fd = unsafe { (*self.connections.get(conn_id).unwrap()).client.fd().unwrap() };
                self.arm_client_read(reactor, conn_id, fd);
            }
            Err(_) => self.close_connection(reactor, conn_id),
        }
    }

    fn begin_connect_server(&self, reactor: &Reactor, conn_id: u32, client_fd: RawFd) {
        let (target_host, target_port) = match self.config.mode {
            ProxyMode::Local => (self.config.remote_host.clone(), self.config.remote_port),
            _ => unsafe {
                let conn = &*self.connections.get(conn_id).unwrap();
                (conn.host.clone(), conn.port)
            },
        };

        let addr = match (target_host.as_str(), target_port).to_socket_addrs() {
            Ok(mut it) => it.next(),
            Err(e) => {
                tracing::warn!(conn_id, error = %e, "proxy: address resolution failed");
                None
            }
        };
        let Some(addr) = addr else {
            self.close_connection(reactor, conn_id);
            return;
        };

        match TcpStream::connect(addr) {
            Ok(stream) => {
                tune_outbound(&stream, &self.tuning);
                let _ = stream.set_nonblocking(true);
                let server_fd = stream.as_raw_fd();
                unsafe {
                    let conn = &mut *self.connections.get(conn_id).unwrap();
                    conn.server.set(stream);
                    conn.state = ProxyState::ConnServerCheck;
                }
                let _ = reactor.add_timed_write(
                    server_fd,
                    ReactorPayload::Proxy { conn_id, side: Side::Server },
                    self.config.connect_timeout_ticks,
                );
                let _ = client_fd;
            }
            Err(e) => {
                tracing::warn!(conn_id, error = %e, "proxy: connect to target failed");
                self.close_connection(reactor, conn_id);
            }
        }
    }

    fn handle_conn_server_check(&self, reactor: &Reactor, conn_id: u32) {
        let (server_fd, client_fd, so_error) = unsafe {
            let conn = &*self.connections.get(conn_id).unwrap();
            let server_fd = conn.server.fd().unwrap();
            let client_fd = conn.client.fd().unwrap();
            let so_error = socket2::SockRef::from(conn.server.stream.as_ref().unwrap())
                .take_error()
                .ok()
                .flatten();
            (server_fd, client_fd, so_error)
        };
        if so_error.is_some() {
            self.close_connection(reactor, conn_id);
            return;
        }
        unsafe {
            let conn = &mut *self.connections.get(conn_id).unwrap();
            conn.state = match self.config.mode {
                ProxyMode::Socks => ProxyState::Content,
                ProxyMode::Local => {
                    conn.is_first_content = true;
                    ProxyState::LContent
                }
                ProxyMode::Remote => ProxyState::RContent,
            };
        }
        self.arm_client_read(reactor, conn_id, client_fd);
        self.arm_server_read_timed(reactor, conn_id, server_fd);
    }

    fn handle_plain_forward(&self, reactor: &Reactor, conn_id: u32, side: Side) {
        let result = unsafe {
            let conn = &mut *self.connections.get(conn_id).unwrap();
            let (src, dst) = match side {
                Side::Client => (&mut conn.client, &mut conn.server),
                Side::Server => (&mut conn.server, &mut conn.client),
            };
            let src_stream = match src.stream.as_mut() {
                Some(s) => s,
                None => return,
            };
            let mut buf = [0u8; 16 * 1024];
            match src_stream.read(&mut buf) {
                Ok(0) => None,
                Ok(n) => {
                    if let Some(dst_stream) = dst.stream.as_mut() {
                        let _ = dst_stream.write_all(&buf[..n]);
                    }
                    Some(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Some(()),
                Err(_) => None,
            }
        };
        let Some(fd) = (unsafe {
            let conn = &*self.connections.get(conn_id).unwrap();
            match side {
                Side::Client => conn.client.fd(),
                Side::Server => conn.server.fd(),
            }
        }) else {
            return;
        };
        match result {
            Some(()) => match side {
                Side::Client => self.arm_client_read(reactor, conn_id, fd),
                Side::Server => self.arm_server_read_timed(reactor, conn_id, fd),
            },
            None => self.close_connection(reactor, conn_id),
        }
    }

    fn handle_l_content(&self, reactor: &Reactor, conn_id: u32, side: Side) {
        match side {
            Side::Client => {
                let plaintext = unsafe {
                    let conn = &mut *self.connections.get(conn_id).unwrap();
                    let mut buf = [0u8; 16 * 1024];
                    let n = match conn.client.stream.as_mut().unwrap().read(&mut buf) {
                        Ok(0) => return self.close_connection(reactor, conn_id),
                        Ok(n) => n,
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                            let fd = conn.client.fd().unwrap();
                            drop(conn);
                            self.arm_client_read(reactor, conn_id, fd);
                            return;
                        }
                        Err(_) => return self.close_connection(reactor, conn_id),
                    };
                    let is_first = conn.is_first_content;
                    let header = TunnelHeader {
                        is_first,
                        auth: self.config.auth_tag(),
                        host: is_first.then(|| (conn.host.clone(), conn.port)),
                    };
                    let plain = encode_tunnel_plaintext(&header, &buf[..n]);
                    conn.is_first_content = false;
                    plain
                };
                let frame = encrypt_frame(&plaintext, &self.config);
                let fd = unsafe {
                    let conn = &mut *self.connections.get(conn_id).unwrap();
                    if let Some(s) = conn.server.stream.as_mut() {
                        let _ = s.write_all(&frame);
                    }
                    conn.client.fd().unwrap()
                };
                self.arm_client_read(reactor, conn_id, fd);
            }
            Side::Server => self.handle_l_server_frame(reactor, conn_id),
        }
    }

    /// L's server-facing leg: `conn.server` is the tunnel link to the R
    /// side, not the real target, so incoming bytes are already
    /// length-framed and encrypted. Reads the 4-byte length, reads the body,
    /// decrypts, and forwards the raw plaintext to the client untouched.
    fn handle_l_server_frame(&self, reactor: &Reactor, conn_id: u32) {
        let frame_len = unsafe {
            let conn = &mut *self.connections.get(conn_id).unwrap();
            let mut len_buf = [0u8; 4];
            match conn.server.stream.as_mut().unwrap().read_exact(&mut len_buf) {
                Ok(()) => u32::from_be_bytes(len_buf) as usize,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    let fd = conn.server.fd().unwrap();
                    drop(conn);
                    self.arm_server_read_timed(reactor, conn_id, fd);
                    return;
                }
                Err(_) => {
                    drop(conn);
                    self.close_connection(reactor, conn_id);
                    return;
                }
            }
        };

        let body = unsafe {
            let conn = &mut *self.connections.get(conn_id).unwrap();
            let mut body = vec![0u8; frame_len];
            match conn.server.stream.as_mut().unwrap().read_exact(&mut body) {
                Ok(()) => body,
                Err(_) => {
                    drop(conn);
                    self.close_connection(reactor, conn_id);
                    return;
                }
            }
        };

        let Some(plain) = decrypt_frame(&body, &self.config) else {
            self.close_connection(reactor, conn_id);
            return;
        };

        let fd = unsafe {
            let conn = &mut *self.connections.get(conn_id).unwrap();
            if let Some(s) = conn.client.stream.as_mut() {
                let _ = s.write_all(&plain);
            }
            conn.server.fd().unwrap()
        };
        self.arm_server_read_timed(reactor, conn_id, fd);
    }

    fn handle_r_content(&self, reactor: &Reactor, conn_id: u32, side: Side) {
        match side {
            Side::Client => self.handle_r_client_frame(reactor, conn_id),
            Side::Server => self.handle_tunnel_server_side(reactor, conn_id),
        }
    }

    /// R's server-facing leg: `conn.server` is the real target, so plain
    /// bytes read from it get length-framed and encrypted before going back
    /// to the client over the tunnel.
    fn handle_tunnel_server_side(&self, reactor: &Reactor, conn_id: u32) {
        let result = unsafe {
            let conn = &mut *self.connections.get(conn_id).unwrap();
            let mut buf = [0u8; 16 * 1024];
            match conn.server.stream.as_mut().unwrap().read(&mut buf) {
                Ok(0) => None,
                Ok(n) => Some(buf[..n].to_vec()),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Some(Vec::new()),
                Err(_) => None,
            }
        };
        match result {
            Some(data) => {
                if !data.is_empty() {
                    let frame = encrypt_frame(&data, &self.config);
                    unsafe {
                        let conn = &mut *self.connections.get(conn_id).unwrap();
                        if let Some(s) = conn.client.stream.as_mut() {
                            let _ = s.write_all(&frame);
                        }
                    }
                }
                let fd = unsafe { (*self.connections.get(conn_id).unwrap()).server.fd().unwrap() };
                self.arm_server_read_timed(reactor, conn_id, fd);
            }
            None => self.close_connection(reactor, conn_id),
        }
    }

    fn handle_r_client_frame(&self, reactor: &Reactor, conn_id: u32) {
        let frame_len = unsafe {
            let conn = &mut *self.connections.get(conn_id).unwrap();
            let mut len_buf = [0u8; 4];
            match conn.client.stream.as_mut().unwrap().read_exact(&mut len_buf) {
                Ok(()) => u32::from_be_bytes(len_buf) as usize,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    let fd = conn.client.fd().unwrap();
                    drop(conn);
                    self.arm_client_read(reactor, conn_id, fd);
                    return;
                }
                Err(_) => {
                    drop(conn);
                    self.close_connection(reactor, conn_id);
                    return;
                }
            }
        };

        let body = unsafe {
            let conn = &mut *self.connections.get(conn_id).unwrap();
            let mut body = vec![0u8; frame_len];
            match conn.client.stream.as_mut().unwrap().read_exact(&mut body) {
                Ok(()) => body,
                Err(_) => {
                    drop(conn);
                    self.close_connection(reactor, conn_id);
                    return;
                }
            }
        };

        let Some(plain) = decrypt_frame(&body, &self.config) else {
            self.close_connection(reactor, conn_id);
            return;
        };
        let Some(parsed) = parse_tunnel_plaintext(&plain) else {
            self.close_connection(reactor, conn_id);
            return;
        };
        if parsed.auth != self.config.auth_tag() {
            tracing::warn!(conn_id, "proxy: R-mode auth mismatch");
            self.close_connection(reactor, conn_id);
            return;
        }

        let payload = &plain[parsed.payload_start..];
        if parsed.is_first {
            let Some((host, port)) = parsed.host else {
                self.close_connection(reactor, conn_id);
                return;
            };
            unsafe {
                let conn = &mut *self.connections.get(conn_id).unwrap();
                conn.host = host;
                conn.port = port;
                conn.state = ProxyState::RConnServerCheck;
            }
            let client_fd = unsafe { (*self.connections.get(conn_id).unwrap()).client.fd().unwrap() };
            self.begin_connect_server(reactor, conn_id, client_fd);
            if !payload.is_empty() {
                unsafe {
                    let conn = &mut *self.connections.get(conn_id).unwrap();
                    if let Some(s) = conn.server.stream.as_mut() {
                        let _ = s.write_all(payload);
                    }
                }
            }
        } else {
            unsafe {
                let conn = &mut *self.connections.get(conn_id).unwrap();
                if let Some(s) = conn.server.stream.as_mut() {
                    let _ = s.write_all(payload);
                }
            }
            let fd = unsafe { (*self.connections.get(conn_id).unwrap()).client.fd().unwrap() };
            self.arm_client_read(reactor, conn_id, fd);
        }
    }
}

impl ReactorHandler for ProxyDriver {
    fn on_event(&self, reactor: &Reactor, _fd: RawFd, payload: ReactorPayload, event: ReactorEvent) {
        let ReactorPayload::Proxy { conn_id, side } = payload else { return };
        if event == ReactorEvent::Timeout || event == ReactorEvent::Error {
            self.handle_timeout(reactor, conn_id);
            return;
        }
        let state = unsafe {
            match self.connections.get(conn_id) {
                Ok(ptr) => (*ptr).state,
                Err(_) => return,
            }
        };
        match (state, side) {
            (ProxyState::Conn, _) => self.handle_conn(reactor, conn_id),
            (ProxyState::Auth, _) => self.handle_auth(reactor, conn_id),
            (ProxyState::Host, _) => self.handle_host(reactor, conn_id),
            (ProxyState::ConnServer, _) | (ProxyState::ConnServerCheck, _) | (ProxyState::RConnServerCheck, _) => {
                self.handle_conn_server_check(reactor, conn_id)
            }
            (ProxyState::Content, _) => self.handle_plain_forward(reactor, conn_id, side),
            (ProxyState::LContent, _) => self.handle_l_content(reactor, conn_id, side),
            (ProxyState::RContent, _) => self.handle_r_content(reactor, conn_id, side),
        }
    }
}

impl AcceptHandler for ProxyDriver {
    fn on_accept(&self, reactor: &Arc<Reactor>, stream: TcpStream, peer: std::net::SocketAddr) -> bool {
        self.on_accept_new(reactor, stream, peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(mode: ProxyMode, encrypt: EncryptType) -> ProxyModeConfig {
        ProxyModeConfig {
            mode,
            encrypt,
            username: "u".into(),
            password: "p".into(),
            aes_key: *b"0123456789abcdef",
            xor_key: crypto::DEFAULT_XOR_KEY,
            remote_host: "127.0.0.1".into(),
            remote_port: 9000,
            connect_timeout_ticks: 100,
            poll_timeout_ticks: 1200,
        }
    }

    #[test]
    fn tunnel_frame_round_trips_first_content() {
        let config = cfg(ProxyMode::Local, EncryptType::Aes);
        let header = TunnelHeader {
            is_first: true,
            auth: config.auth_tag(),
            host: Some(("example.com".into(), 80)),
        };
        let plain = encode_tunnel_plaintext(&header, b"GET / HTTP/1.0\r\n\r\n");
        let frame = encrypt_frame(&plain, &config);

        let len = u32::from_be_bytes(frame[0..4].try_into().unwrap()) as usize;
        assert_eq!(len, frame.len() - 4);
        let decrypted = decrypt_frame(&frame[4..], &config).unwrap();
        let parsed = parse_tunnel_plaintext(&decrypted).unwrap();
        assert!(parsed.is_first);
        assert_eq!(parsed.auth, config.auth_tag());
        assert_eq!(parsed.host, Some(("example.com".to_string(), 80)));
        assert_eq!(&decrypted[parsed.payload_start..], b"GET / HTTP/1.0\r\n\r\n");
    }

    #[test]
    fn tunnel_frame_round_trips_xor() {
        let config = cfg(ProxyMode::Remote, EncryptType::Xor);
        let header = TunnelHeader { is_first: false, auth: config.auth_tag(), host: None };
        let plain = encode_tunnel_plaintext(&header, b"more data");
        let frame = encrypt_frame(&plain, &config);
        let decrypted = decrypt_frame(&frame[4..], &config).unwrap();
        let parsed = parse_tunnel_plaintext(&decrypted).unwrap();
        assert!(!parsed.is_first);
        assert_eq!(&decrypted[parsed.payload_start..], b"more data");
    }

    #[test]
    fn wrong_auth_tag_is_detected() {
        let config = cfg(ProxyMode::Remote, EncryptType::None);
        let header = TunnelHeader { is_first: false, auth: [0xAA; 16], host: None };
        let plain = encode_tunnel_plaintext(&header, b"data");
        let frame = encrypt_frame(&plain, &config);
        let decrypted = decrypt_frame(&frame[4..], &config).unwrap();
        let parsed = parse_tunnel_plaintext(&decrypted).unwrap();
        assert_ne!(parsed.auth, config.auth_tag());
    }
}
