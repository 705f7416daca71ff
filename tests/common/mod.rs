#![allow(dead_code)]

use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use pageserve::{Config, Server, ServerError, ShutdownHandle};
use tempfile::TempDir;

pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// A server running on a background thread.
pub struct Running {
    pub addr: SocketAddr,
    shutdown: ShutdownHandle,
    handle: Option<JoinHandle<Result<(), ServerError>>>,
}

impl Running {
    pub fn stop(mut self) -> Result<(), ServerError> {
        self.shutdown.shutdown();
        match self.handle.take() {
            Some(handle) => handle.join().expect("server thread panicked"),
            None => Ok(()),
        }
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.shutdown.shutdown();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Writes `<root>/<route>/page.html`.
pub fn add_page(root: &TempDir, route: &str, body: &[u8]) {
    let dir = root.path().join(route.trim_start_matches('/'));
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("page.html"), body).unwrap();
}

pub fn test_config(root: &TempDir) -> Config {
    let mut cfg = Config::default();
    cfg.server.listen_addr = "127.0.0.1:0".to_string();
    cfg.static_files.routes_root = root.path().to_string_lossy().into_owned();
    cfg
}

pub fn start(cfg: Config) -> Running {
    let server = Server::bind(&cfg).expect("bind test server");
    let addr = server.local_addr();
    let shutdown = server.shutdown_handle();
    let handle = thread::spawn(move || server.run());
    Running {
        addr,
        shutdown,
        handle: Some(handle),
    }
}

pub fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(READ_TIMEOUT)).unwrap();
    stream
}

/// Reads until the server closes. A reset counts as end of stream.
pub fn read_all(stream: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return out,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::ConnectionReset => return out,
            Err(e) => panic!("read from server failed: {e}"),
        }
    }
}

pub fn request(addr: SocketAddr, raw: &[u8]) -> Vec<u8> {
    let mut stream = connect(addr);
    stream.write_all(raw).unwrap();
    read_all(&mut stream)
}

pub struct Reply {
    pub head: String,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn parse(raw: &[u8]) -> Reply {
        let split = raw
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("response has no header terminator");
        Reply {
            head: String::from_utf8(raw[..split].to_vec()).unwrap(),
            body: raw[split + 4..].to_vec(),
        }
    }

    pub fn status_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }
}
