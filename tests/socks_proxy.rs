// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// End-to-end scenarios over real loopback TCP, driving a genuine reactor
// pool rather than calling state-machine handlers directly.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use socks_reactor::crypto::{self, EncryptType};
use socks_reactor::proxy::{ProxyDriver, ProxyMode, ProxyModeConfig};
use socks_reactor::reactor_pool::ReactorPool;
use socks_reactor::socket_config::SocketTuning;

fn spawn_echo_target() -> (String, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut buf = [0u8; 1024];
            loop {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => return,
                    Ok(n) => {
                        let _ = stream.write_all(&buf[..n]);
                    }
                }
            }
        }
    });
    (addr.ip().to_string(), addr.port())
}

fn base_config(mode: ProxyMode, username: &str, password: &str) -> ProxyModeConfig {
    ProxyModeConfig {
        mode,
        encrypt: EncryptType::None,
        username: username.to_string(),
        password: password.to_string(),
        aes_key: *b"0123456789abcdef",
        xor_key: crypto::DEFAULT_XOR_KEY,
        remote_host: String::new(),
        remote_port: 0,
        connect_timeout_ticks: 50,
        poll_timeout_ticks: 20,
    }
}

/// Stands up a one-reactor proxy listening on an ephemeral port; returns the
/// bound address. The acceptor and reactor threads run for the test's
/// duration and are simply leaked (process-exit reclaims them), matching
/// the short-lived nature of `#[test]` processes.
fn spawn_proxy(config: ProxyModeConfig) -> (String, u16) {
    let tuning = SocketTuning::default();
    let reactors = Arc::new(ReactorPool::new(1, tuning).unwrap());
    let driver = Arc::new(ProxyDriver::new(Arc::clone(&reactors), config, SocketTuning::default(), 16 * 1024));

    let _reactor_threads = reactors.start_poll(driver.clone());

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let driver_for_acceptor = driver.clone();
    let reactors_for_acceptor = reactors.clone();
    std::thread::spawn(move || {
        let _ = reactors_for_acceptor.run_acceptor(listener, driver_for_acceptor, || false);
    });

    (addr.ip().to_string(), addr.port())
}

#[test]
fn s1_socks_no_auth_ipv4_roundtrip() {
    let (target_ip, target_port) = spawn_echo_target();
    let (proxy_ip, proxy_port) = spawn_proxy(base_config(ProxyMode::Socks, "", ""));
    std::thread::sleep(Duration::from_millis(100));

    let mut client = TcpStream::connect((proxy_ip.as_str(), proxy_port)).unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).unwrap();
    let mut greet_reply = [0u8; 2];
    client.read_exact(&mut greet_reply).unwrap();
    assert_eq!(greet_reply, [0x05, 0x00]);

    let mut req = vec![0x05, 0x01, 0x00, 0x01];
    req.extend_from_slice(&target_ip.parse::<std::net::Ipv4Addr>().unwrap().octets());
    req.extend_from_slice(&target_port.to_be_bytes());
    client.write_all(&req).unwrap();

    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).unwrap();
    assert_eq!(reply[0..4], [0x05, 0x00, 0x00, 0x01]);

    client.write_all(b"PING").unwrap();
    let mut echoed = [0u8; 4];
    client.read_exact(&mut echoed).unwrap();
    assert_eq!(&echoed, b"PING");
}

#[test]
fn s2_socks_user_pass_fail_closes_connection() {
    let (proxy_ip, proxy_port) = spawn_proxy(base_config(ProxyMode::Socks, "u", "p"));
    std::thread::sleep(Duration::from_millis(100));

    let mut client = TcpStream::connect((proxy_ip.as_str(), proxy_port)).unwrap();
    client.write_all(&[0x05, 0x01, 0x02]).unwrap();
    let mut greet_reply = [0u8; 2];
    client.read_exact(&mut greet_reply).unwrap();
    assert_eq!(greet_reply, [0x05, 0x02]);

    client.write_all(&[0x01, 0x01, b'x', 0x01, b'y']).unwrap();
    let mut auth_reply = [0u8; 2];
    client.read_exact(&mut auth_reply).unwrap();
    assert_eq!(auth_reply, [0x01, 0x01]);

    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut buf = [0u8; 1];
    let n = client.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0);
}

#[test]
fn s3_socks_domain_request_resolves_and_forwards() {
    let (_target_ip, target_port) = spawn_echo_target();
    let (proxy_ip, proxy_port) = spawn_proxy(base_config(ProxyMode::Socks, "", ""));
    std::thread::sleep(Duration::from_millis(100));

    let mut client = TcpStream::connect((proxy_ip.as_str(), proxy_port)).unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).unwrap();
    let mut greet_reply = [0u8; 2];
    client.read_exact(&mut greet_reply).unwrap();

    let host = b"localhost";
    let mut req = vec![0x05, 0x01, 0x00, 0x03, host.len() as u8];
    req.extend_from_slice(host);
    req.extend_from_slice(&target_port.to_be_bytes());
    client.write_all(&req).unwrap();

    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).unwrap();
    assert_eq!(reply[0], 0x05);
    assert_eq!(reply[1], 0x00);

    client.write_all(b"hi").unwrap();
    let mut echoed = [0u8; 2];
    client.read_exact(&mut echoed).unwrap();
    assert_eq!(&echoed, b"hi");
}

#[test]
fn s5_idle_connection_times_out() {
    let (proxy_ip, proxy_port) = spawn_proxy(ProxyModeConfig {
        poll_timeout_ticks: 3,
        ..base_config(ProxyMode::Socks, "", "")
    });
    std::thread::sleep(Duration::from_millis(100));

    let mut client = TcpStream::connect((proxy_ip.as_str(), proxy_port)).unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).unwrap();
    let mut greet_reply = [0u8; 2];
    client.read_exact(&mut greet_reply).unwrap();
    assert_eq!(greet_reply, [0x05, 0x00]);

    // Idle past the 3-tick (~300ms) poll timeout without sending a request.
    let mut buf = [0u8; 1];
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let n = client.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0);
}

#[test]
fn s4_local_to_remote_tunnel_roundtrips_plaintext() {
    let (target_ip, target_port) = spawn_echo_target();

    let r_config = ProxyModeConfig {
        remote_host: String::new(),
        remote_port: 0,
        ..base_config(ProxyMode::Remote, "u", "p")
    };
    let (r_ip, r_port) = spawn_proxy(r_config);
    std::thread::sleep(Duration::from_millis(100));

    let l_config = ProxyModeConfig {
        remote_host: r_ip,
        remote_port: r_port,
        ..base_config(ProxyMode::Local, "u", "p")
    };
    let (l_ip, l_port) = spawn_proxy(l_config);
    std::thread::sleep(Duration::from_millis(100));

    let mut client = TcpStream::connect((l_ip.as_str(), l_port)).unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).unwrap();
    let mut greet_reply = [0u8; 2];
    client.read_exact(&mut greet_reply).unwrap();
    assert_eq!(greet_reply, [0x05, 0x00]);

    let mut req = vec![0x05, 0x01, 0x00, 0x03, target_ip.len() as u8];
    req.extend_from_slice(target_ip.as_bytes());
    req.extend_from_slice(&target_port.to_be_bytes());
    client.write_all(&req).unwrap();
    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).unwrap();

    let body = b"GET / HTTP/1.0\r\n\r\n";
    client.write_all(body).unwrap();
    let mut echoed = vec![0u8; body.len()];
    client.read_exact(&mut echoed).unwrap();
    assert_eq!(&echoed, body);
}
