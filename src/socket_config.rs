// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Socket option tuning for accepted connections, applied via `socket2` so it
// works uniformly across platforms without hand-written `cfg(unix)`/`cfg(windows)`
// ioctl branches.

use std::net::TcpStream;
use std::time::Duration;

use socket2::SockRef;

/// Socket tuning parameters applied to every accepted connection.
#[derive(Debug, Clone, Copy)]
pub struct SocketTuning {
    pub buf_size: usize,
    pub keepalive_idle: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_retries: u32,
    pub linger: Duration,
}

impl Default for SocketTuning {
    fn default() -> Self {
        Self {
            buf_size: 8 * 1024 * 1024,
            keepalive_idle: Duration::from_secs(120),
            keepalive_interval: Duration::from_secs(5),
            keepalive_retries: 3,
            linger: Duration::from_secs(1),
        }
    }
}

/// Apply non-blocking mode plus the standard proxy socket options
/// (`TCP_NODELAY`, send/recv buffers, keepalive, linger) to an accepted
/// stream. Failures are logged, not propagated: a socket that can't take an
/// option can still usually carry traffic.
pub fn tune_accepted(stream: &TcpStream, tuning: &SocketTuning) {
    if let Err(e) = stream.set_nonblocking(true) {
        tracing::warn!(error = %e, "socket_config: failed to set nonblocking");
    }
    let sock = SockRef::from(stream);
    apply(&sock, tuning);
}

/// Apply the same tuning to a socket we are about to connect out from (the
/// L-mode/R-mode remote leg and SOCKS CONN_SERVER leg).
pub fn tune_outbound(stream: &TcpStream, tuning: &SocketTuning) {
    let sock = SockRef::from(stream);
    apply(&sock, tuning);
}

fn apply(sock: &SockRef<'_>, tuning: &SocketTuning) {
    if let Err(e) = sock.set_nodelay(true) {
        tracing::warn!(error = %e, "socket_config: TCP_NODELAY failed");
    }
    if let Err(e) = sock.set_send_buffer_size(tuning.buf_size) {
        tracing::warn!(error = %e, "socket_config: SO_SNDBUF failed");
    }
    if let Err(e) = sock.set_recv_buffer_size(tuning.buf_size) {
        tracing::warn!(error = %e, "socket_config: SO_RCVBUF failed");
    }
    let keepalive = socket2::TcpKeepalive::new()
        .with_time(tuning.keepalive_idle)
        .with_interval(tuning.keepalive_interval);
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    let keepalive = keepalive.with_retries(tuning.keepalive_retries);
    if let Err(e) = sock.set_tcp_keepalive(&keepalive) {
        tracing::warn!(error = %e, "socket_config: keepalive failed");
    }
    if let Err(e) = sock.set_linger(Some(tuning.linger)) {
        tracing::warn!(error = %e, "socket_config: SO_LINGER failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    #[test]
    fn tune_accepted_does_not_panic() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        let tuning = SocketTuning::default();
        tune_accepted(&server, &tuning);
        tune_outbound(&client, &tuning);
    }
}
