// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// S6: a PAT client peer configured against an address nobody is listening
// on yet must retry with back-off, then succeed and flush queued frames in
// order once a listener appears.

use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use socks_reactor::pat::PatManager;

#[test]
fn s6_client_peer_reconnects_and_flushes_queued_frames() {
    // Reserve a port, then release it immediately: nothing is listening yet,
    // so the first connect attempts fail and the sender thread backs off.
    let probe = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let client_mgr = PatManager::new("u", "p");
    let client_peer = client_mgr.add_client_peer(1, addr.ip().to_string(), addr.port(), Arc::new(|_, _, _| {}));

    // Queue frames before the listener exists; the sender thread should
    // hold them until a connection succeeds.
    client_peer.send(9, b"first");
    client_peer.send(9, b"second");

    // Let at least one failed connect attempt happen before standing up the
    // listener.
    std::thread::sleep(Duration::from_millis(200));

    let listener = TcpListener::bind(addr).unwrap();
    let received = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
    let received_cb = Arc::clone(&received);
    let server_mgr = PatManager::new("u", "p");
    server_mgr.add_server_peer(9, Arc::new(move |_src, _tag, data: &[u8]| {
        received_cb.lock().unwrap().push(data.to_vec());
    }));
    let server_mgr_for_listener = Arc::clone(&server_mgr);
    std::thread::spawn(move || {
        let _ = server_mgr_for_listener.run_listener(&listener);
    });

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        if received.lock().unwrap().len() >= 2 || std::time::Instant::now() > deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    let got = received.lock().unwrap();
    assert_eq!(got.len(), 2, "expected both queued frames to flush after reconnect");
    assert_eq!(got[0], b"first");
    assert_eq!(got[1], b"second");

    client_mgr.shutdown();
    server_mgr.shutdown();
}
