mod common;

use common::{Reply, add_page, start, test_config};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::test]
async fn test_many_concurrent_clients() {
    let root = tempfile::tempdir().unwrap();
    let pages: Vec<(String, Vec<u8>)> = (0..8)
        .map(|i| (format!("page{i}"), vec![b'a' + i as u8; 1000 + i * 777]))
        .collect();
    for (route, body) in &pages {
        add_page(&root, route, body);
    }

    let mut cfg = test_config(&root);
    cfg.pool.capacity = 64;
    cfg.static_files.chunk_size = 256;
    let server = start(cfg);
    let addr = server.addr;

    let mut tasks = Vec::new();
    for n in 0..40 {
        let (route, body) = pages[n % pages.len()].clone();
        tasks.push(tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let line = format!("GET /{route} HTTP/1.0\r\n\r\n");
            stream.write_all(line.as_bytes()).await.unwrap();
            let mut raw = Vec::new();
            stream.read_to_end(&mut raw).await.unwrap();
            (body, raw)
        }));
    }

    for task in tasks {
        let (body, raw) = task.await.unwrap();
        let reply = Reply::parse(&raw);
        assert_eq!(reply.status_line(), "HTTP/1.1 200 OK");
        assert_eq!(
            reply.header("Content-Length"),
            Some(body.len().to_string().as_str())
        );
        assert!(reply.body == body);
    }

    tokio::task::spawn_blocking(move || server.stop())
        .await
        .unwrap()
        .unwrap();
}
