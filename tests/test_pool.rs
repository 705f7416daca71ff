mod common;

use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

use common::{Reply, add_page, connect, read_all, start, test_config};

#[test]
fn test_connection_beyond_capacity_is_dropped() {
    let root = tempfile::tempdir().unwrap();
    add_page(&root, "held", b"held page");

    let mut cfg = test_config(&root);
    cfg.pool.capacity = 2;
    let server = start(cfg);

    let mut held: Vec<_> = (0..2).map(|_| connect(server.addr)).collect();
    // One accept per tick; give the loop time to admit both.
    thread::sleep(Duration::from_millis(200));

    let mut extra = connect(server.addr);
    assert!(read_all(&mut extra).is_empty());

    for stream in &mut held {
        stream.write_all(b"GET /held HTTP/1.0\r\n\r\n").unwrap();
        let reply = Reply::parse(&read_all(stream));
        assert_eq!(reply.status_line(), "HTTP/1.1 200 OK");
        assert_eq!(reply.body, b"held page".to_vec());
    }

    // Slots are free again once the held connections completed.
    let mut after = connect(server.addr);
    after.write_all(b"GET /held HTTP/1.0\r\n\r\n").unwrap();
    let reply = Reply::parse(&read_all(&mut after));
    assert_eq!(reply.status_line(), "HTTP/1.1 200 OK");

    server.stop().unwrap();
}

#[test]
fn test_idle_connection_is_swept() {
    let root = tempfile::tempdir().unwrap();
    let mut cfg = test_config(&root);
    cfg.connection.idle_timeout_secs = 1;
    let server = start(cfg);

    let mut silent = connect(server.addr);
    silent.write_all(b"GET /slow").unwrap();

    let started = Instant::now();
    assert!(read_all(&mut silent).is_empty());
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(900), "closed after {waited:?}");
    assert!(waited < Duration::from_secs(4), "closed after {waited:?}");
}

#[test]
fn test_idle_sweep_disabled_keeps_connection() {
    let root = tempfile::tempdir().unwrap();
    add_page(&root, "late", b"worth the wait");

    let mut cfg = test_config(&root);
    cfg.connection.idle_timeout_secs = 0;
    let server = start(cfg);

    let mut stream = connect(server.addr);
    stream.write_all(b"GET /la").unwrap();
    thread::sleep(Duration::from_millis(1500));
    stream.write_all(b"te HTTP/1.0\r\n\r\n").unwrap();

    let reply = Reply::parse(&read_all(&mut stream));
    assert_eq!(reply.status_line(), "HTTP/1.1 200 OK");
}

#[test]
fn test_shutdown_releases_active_connections() {
    let root = tempfile::tempdir().unwrap();
    let server = start(test_config(&root));

    let mut pending = connect(server.addr);
    pending.write_all(b"GET /never-fin").unwrap();
    thread::sleep(Duration::from_millis(100));

    server.stop().unwrap();
    assert!(read_all(&mut pending).is_empty());
}

#[test]
fn test_bind_rejects_invalid_config() {
    let root = tempfile::tempdir().unwrap();
    let mut cfg = test_config(&root);
    cfg.pool.capacity = 0;

    assert!(matches!(
        pageserve::Server::bind(&cfg),
        Err(pageserve::ServerError::Config(_))
    ));
}

#[test]
fn test_bind_reports_unusable_address() {
    let root = tempfile::tempdir().unwrap();
    let mut cfg = test_config(&root);
    cfg.server.listen_addr = "not an address".to_string();

    assert!(pageserve::Server::bind(&cfg).is_err());
}
