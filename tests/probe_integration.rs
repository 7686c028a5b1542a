//! End-to-end probe runs against a scripted HTTP/2 peer over TLS
//!
//! Each test starts a peer thread with the built-in certificate, runs the
//! probe against it in the test thread and checks both the event log and
//! what the peer saw on the wire.

mod common;

use common::*;
use h2delay::http::h2::frames::Frame;
use h2delay::http::h2::ErrorCode;
use std::net::TcpListener;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_delayed_window_update_released_once() {
    let (port, peer) = spawn_tls_peer(&["h2"], |mut peer| {
        let request = peer.handshake();
        peer.send_response(1, 206, false);

        let sent = Instant::now();
        peer.send_data(1, 1500, false);
        let connection_credit = peer.expect_window_update(0, PEER_TIMEOUT);
        let stream_credit = peer.expect_window_update(1, PEER_TIMEOUT);
        let waited = sent.elapsed();

        peer.send_data(1, 0, true);
        let goaway = peer.expect(PEER_TIMEOUT, |f| matches!(f, Frame::Goaway(_)));
        (request, connection_credit, stream_credit, waited, goaway)
    });

    let mut config = local_config(port);
    config.start_after_bytes = 1000;
    config.delay = Duration::from_secs(2);
    let (code, log) = run_probe(&config);
    let (request, connection_credit, stream_credit, waited, goaway) = peer.join().unwrap();

    assert_eq!(code, 0);

    // Request as sent
    let header = |name: &str| {
        request
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    };
    assert_eq!(header(":method"), "GET");
    assert_eq!(header(":authority"), "localhost");
    assert_eq!(header(":scheme"), "https");
    assert_eq!(header(":path"), "/big.bin");
    assert_eq!(header("range"), "bytes=0-");
    assert_eq!(header("accept"), "*/*");
    assert!(header("user-agent").starts_with("h2delay/"));

    // One flush for everything withheld, no earlier than the delay
    assert_eq!(connection_credit, Some(1500));
    assert_eq!(stream_credit, Some(1500));
    assert!(waited >= Duration::from_millis(1990), "credit after {:?}", waited);

    // Graceful completion says goodbye
    match goaway {
        Some(Frame::Goaway(g)) => assert_eq!(g.error_code, ErrorCode::NoError.as_u32()),
        other => panic!("expected GOAWAY, got {:?}", other),
    }

    // Event log
    assert_eq!(log.find("CONN", "cert_verification").field("enabled"), Some("0"));
    assert_eq!(log.find("CONN", "tls_ready").field("alpn"), Some("h2"));
    assert_eq!(log.find("CONN", "peer_confirmed").field("ip_arg"), Some("127.0.0.1"));
    assert_eq!(
        log.find("H2", "request_sent").field("url"),
        Some("https://localhost/big.bin")
    );
    assert!(log.has("H2", "settings_received"));
    assert!(log.has("H2", "settings_ack"));
    assert_eq!(log.find("H2", "response_headers").field("status"), Some("206"));

    let started = log.all("STATE", "delay_started");
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].field("total_received"), Some("1500"));
    assert_eq!(started[0].field("withhold_seconds"), Some("2.000"));

    let data = log.find("DATA", "data");
    assert_eq!(data.field("sz"), Some("1500"));
    assert_eq!(data.field("pending_ack"), Some("1500"));
    assert_eq!(data.field("stream_window"), Some("64035"));
    assert_eq!(data.field("delaying"), Some("1"));

    let complete = log.all("STATE", "delay_complete");
    assert_eq!(complete.len(), 1);
    assert_eq!(complete[0].field("window_update_sent_bytes"), Some("1500"));

    assert_eq!(log.find("H2", "stream_ended").field("total_received"), Some("1500"));
    assert!(log.position("STATE", "delay_started") < log.position("DATA", "data"));
    assert!(log.position("DATA", "data") < log.position("STATE", "delay_complete"));
    assert!(log.position("STATE", "delay_complete") < log.position("H2", "stream_ended"));

    assert!(!log.has("ERR", "unexpected"));
    assert!(log.last().is("STATE", "exit"));
    assert_eq!(log.last().field("code"), Some("0"));
}

#[test]
fn test_keepalive_pings_then_peer_reset() {
    let (port, peer) = spawn_tls_peer(&["h2"], |mut peer| {
        peer.handshake();
        peer.send_response(1, 200, false);

        // Silent: read, never answer
        let pings = peer
            .collect_for(Duration::from_millis(1000))
            .iter()
            .filter(|f| matches!(f, Frame::Ping(p) if !p.ack))
            .count();

        peer.send_rst(1, ErrorCode::Cancel.as_u32());
        pings
    });

    let mut config = local_config(port);
    config.ping_interval = Some(Duration::from_millis(300));
    let (code, log) = run_probe(&config);
    let pings = peer.join().unwrap();

    assert_eq!(code, 1);
    assert!(pings >= 2, "peer saw {} pings", pings);
    assert!(log.all("PING", "ping_sent").len() >= 2);
    assert!(log.all("PING", "ping_sent").iter().all(|l| l.field("keepalive") == Some("1")));

    let reset = log.find("H2", "reset_stream");
    assert_eq!(reset.field("error_code"), Some("CANCEL"));
    assert_eq!(reset.field("total_received"), Some("0"));

    // Reported by the H2 line alone
    assert!(log.lines.iter().all(|l| l.tag != "ERR"));
    assert_eq!(log.last().field("code"), Some("1"));
}

#[test]
fn test_alpn_mismatch_aborts_before_request() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let peer = std::thread::spawn(move || {
        let (tcp, _) = listener.accept().unwrap();
        let config = h2delay::http::tls::TlsConfig::server()
            .alpn(&["http/1.1"])
            .build()
            .unwrap();
        match config.accept(tcp) {
            Ok(tls) => MockPeer::new(tls).next_frame(PEER_TIMEOUT).is_none(),
            // Client hung up mid-handshake: nothing was sent either
            Err(_) => true,
        }
    });

    let (code, log) = run_probe(&local_config(port));
    let nothing_received = peer.join().unwrap();

    assert_eq!(code, 4);
    assert!(nothing_received);
    assert_eq!(log.find("CONN", "tls_ready").field("alpn"), Some("<none>"));
    assert!(log.has("ERR", "alpn_mismatch"));
    assert!(!log.has("H2", "request_sent"));
    assert!(log.lines.iter().all(|l| l.tag != "DATA"));
    assert_eq!(log.last().field("code"), Some("4"));
}

#[test]
fn test_max_runtime_ends_run_on_time() {
    let (port, peer) = spawn_tls_peer(&["h2"], |mut peer| {
        peer.handshake();
        peer.send_response(1, 200, false);
        peer.send_data(1, 100, false);
        // Stay connected until the client leaves
        peer.collect_for(Duration::from_secs(5))
            .into_iter()
            .find_map(|f| match f {
                Frame::Goaway(g) => Some(g.error_code),
                _ => None,
            })
    });

    let mut config = local_config(port);
    config.max_runtime = Some(Duration::from_millis(800));
    let start = Instant::now();
    let (code, log) = run_probe(&config);
    let elapsed = start.elapsed();

    assert_eq!(code, 0);
    assert!(elapsed >= Duration::from_millis(800));
    // Well before the 5s read timeout
    assert!(elapsed < Duration::from_millis(2500), "took {:?}", elapsed);

    let reached = log.find("STATE", "max_runtime_reached");
    assert_eq!(reached.field("max_runtime"), Some("0.8"));
    assert_eq!(log.find("STATE", "params").field("max_runtime"), Some("0.8"));
    assert_eq!(log.last().field("code"), Some("0"));

    assert_eq!(peer.join().unwrap(), Some(ErrorCode::NoError.as_u32()));
}

#[test]
fn test_silent_peer_is_not_an_error() {
    let (port, peer) = spawn_tls_peer(&["h2"], |mut peer| {
        peer.handshake();
        peer.send_response(1, 200, false);
        peer.collect_for(Duration::from_secs(3));
    });

    let mut config = local_config(port);
    config.read_timeout = Duration::from_millis(200);
    config.max_runtime = Some(Duration::from_millis(600));
    let start = Instant::now();
    let (code, log) = run_probe(&config);
    let elapsed = start.elapsed();

    assert_eq!(code, 0);
    assert!(elapsed >= Duration::from_millis(600));
    assert!(elapsed < Duration::from_millis(2000), "took {:?}", elapsed);
    assert!(log.has("STATE", "max_runtime_reached"));
    assert!(log.lines.iter().all(|l| l.tag != "ERR"));
    assert_eq!(log.last().field("code"), Some("0"));
    peer.join().unwrap();
}

#[test]
fn test_stalled_handshake_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let peer = thread::spawn(move || {
        // Accept, then never answer the ClientHello
        let (_stream, _) = listener.accept().unwrap();
        thread::sleep(Duration::from_millis(1500));
    });

    let mut config = local_config(port);
    config.read_timeout = Duration::from_millis(300);
    let (code, log) = run_probe(&config);

    assert_eq!(code, 2);
    assert_eq!(log.find("ERR", "socket_timeout").field("total_received"), Some("0"));
    assert!(!log.has("H2", "request_sent"));
    assert_eq!(log.last().field("code"), Some("2"));
    peer.join().unwrap();
}

#[test]
fn test_zero_delay_acknowledges_every_chunk() {
    let (port, peer) = spawn_tls_peer(&["h2"], |mut peer| {
        peer.handshake();
        peer.send_response(1, 200, false);

        let mut credits = Vec::new();
        for _ in 0..3 {
            peer.send_data(1, 1000, false);
            credits.push((
                peer.expect_window_update(0, PEER_TIMEOUT),
                peer.expect_window_update(1, PEER_TIMEOUT),
            ));
        }

        // Padding is credited back too
        peer.send_padded_data(1, 100, 27);
        credits.push((
            peer.expect_window_update(0, PEER_TIMEOUT),
            peer.expect_window_update(1, PEER_TIMEOUT),
        ));

        peer.send_data(1, 0, true);
        credits
    });

    let mut config = local_config(port);
    config.start_after_bytes = 1;
    let (code, log) = run_probe(&config);
    let credits = peer.join().unwrap();

    assert_eq!(code, 0);
    assert_eq!(
        credits,
        vec![
            (Some(1000), Some(1000)),
            (Some(1000), Some(1000)),
            (Some(1000), Some(1000)),
            (Some(128), Some(128)),
        ]
    );

    assert!(!log.has("STATE", "delay_started"));
    let data = log.all("DATA", "data");
    assert_eq!(data.len(), 5);
    assert!(data.iter().all(|l| l.field("delaying") == Some("0") && l.field("pending_ack") == Some("0")));
    assert_eq!(data[3].field("total"), Some("3100"));
    assert_eq!(log.find("H2", "stream_ended").field("total_received"), Some("3100"));
}

#[test]
fn test_clean_close_is_success() {
    let (port, peer) = spawn_tls_peer(&["h2"], |mut peer| {
        peer.handshake();
        peer.send_response(1, 200, false);
        peer.send_data(1, 10, false);
        // Let the data land before close_notify
        std::thread::sleep(Duration::from_millis(100));
        peer.close();
    });

    let (code, log) = run_probe(&local_config(port));
    peer.join().unwrap();

    assert_eq!(code, 0);
    assert_eq!(log.find("H2", "eof").field("server_closed_cleanly"), Some("1"));
    assert_eq!(log.find("DATA", "data").field("total"), Some("10"));
    assert_eq!(log.last().field("code"), Some("0"));
}

#[test]
fn test_goaway_ends_run() {
    let (port, peer) = spawn_tls_peer(&["h2"], |mut peer| {
        peer.handshake();
        peer.send_response(1, 200, false);
        peer.send_goaway(1, ErrorCode::EnhanceYourCalm.as_u32());
        peer.collect_for(Duration::from_millis(500));
    });

    let (code, log) = run_probe(&local_config(port));
    peer.join().unwrap();

    assert_eq!(code, 1);
    let goaway = log.find("H2", "goaway");
    assert_eq!(goaway.field("error_code"), Some("ENHANCE_YOUR_CALM"));
    assert_eq!(goaway.field("last_stream_id"), Some("1"));
    assert!(log.lines.iter().all(|l| l.tag != "ERR"));
    assert_eq!(log.last().field("code"), Some("1"));
}

#[test]
fn test_pings_in_both_directions() {
    const OPAQUE: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];

    let (port, peer) = spawn_tls_peer(&["h2"], |mut peer| {
        peer.handshake();
        peer.send_response(1, 200, false);
        peer.send_ping(OPAQUE);

        let mut acked = false;
        let mut answered = false;
        while let Some(frame) = peer.next_frame(PEER_TIMEOUT) {
            match frame {
                Frame::Ping(p) if p.ack => acked |= p.data == OPAQUE,
                Frame::Ping(p) if !answered => {
                    peer.send_ping_ack(p.data);
                    answered = true;
                }
                _ => {}
            }
        }
        acked
    });

    let mut config = local_config(port);
    config.ping_interval = Some(Duration::from_millis(200));
    config.max_runtime = Some(Duration::from_millis(1000));
    let (code, log) = run_probe(&config);

    assert_eq!(code, 0);
    assert!(peer.join().unwrap(), "peer PING was not acknowledged");
    assert_eq!(log.find("PING", "ping_received").field("ack_sent"), Some("1"));
    assert!(log.has("PING", "ping_ack_received"));
    assert!(log.has("STATE", "max_runtime_reached"));
}
