// Common test utilities to reduce code duplication

use std::fs;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use cgigate::application::config::models::{Config, GatewayConfig, ScriptDirConfig};
use cgigate::application::dispatcher::{DispatchReport, RequestDispatcher};
use cgigate::application::server::Server;
use cgigate::common::cancel::CancelToken;
use cgigate::http::request::Request;
use tempfile::TempDir;

/// A document root with a `cgi-bin` directory mapped at `/cgi-bin`.
pub struct TestGateway {
    pub dir: TempDir,
    pub config: Config,
}

impl TestGateway {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("cgi-bin")).unwrap();

        let mut gateway = GatewayConfig::new(dir.path().to_path_buf());
        gateway.timeout_secs = 5;
        gateway.grace_period_ms = 200;
        let mut config = Config {
            gateway,
            scripts: vec![ScriptDirConfig::new("/cgi-bin", "cgi-bin")],
            ..Config::default()
        };
        config.server.listen = "127.0.0.1:0".parse().unwrap();
        config.server.client_timeout_secs = 5;

        Self { dir, config }
    }

    #[allow(dead_code)]
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn cgi_bin(&self) -> PathBuf {
        self.dir.path().join("cgi-bin")
    }

    /// Write an executable `/bin/sh` script into cgi-bin.
    pub fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.cgi_bin().join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[allow(dead_code)] // Used in cgi_tests.rs and dispatcher_tests.rs
    pub fn dispatcher(&self) -> RequestDispatcher {
        RequestDispatcher::new(&self.config, 8080).unwrap()
    }

    /// Bind on an ephemeral port and serve in a background thread.
    #[allow(dead_code)] // Used in integration_tests.rs and error_tests.rs
    pub fn start(&self) -> SocketAddr {
        let server = Server::bind(&self.config).unwrap();
        let addr = server.local_addr();
        thread::spawn(move || {
            let _ = server.run();
        });
        addr
    }
}

/// Dispatch in-process and return the report plus raw response bytes.
#[allow(dead_code)] // Used in cgi_tests.rs and dispatcher_tests.rs
pub fn dispatch(dispatcher: &RequestDispatcher, request: &Request) -> (DispatchReport, Vec<u8>) {
    let mut out = Vec::new();
    let report = dispatcher.dispatch(request, &mut out, &CancelToken::new());
    (report, out)
}

/// Send HTTP request and get response
#[allow(dead_code)] // Used in integration_tests.rs and error_tests.rs
pub fn send_request(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).expect("Failed to connect to server");
    stream.set_read_timeout(Some(Duration::from_secs(30))).unwrap();

    stream.write_all(request).unwrap();
    stream.flush().unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

/// Split a serialized response into status line, header lines and body.
#[allow(dead_code)]
pub fn split_response(response: &str) -> (String, Vec<String>, String) {
    let (head, body) = response
        .split_once("\r\n\r\n")
        .expect("response has no header terminator");
    let mut lines = head.split("\r\n");
    let status = lines.next().unwrap_or_default().to_string();
    let headers = lines.map(|l| l.to_string()).collect();
    (status, headers, body.to_string())
}

/// Value of the first header called `name`, case-insensitively.
#[allow(dead_code)]
pub fn header<'a>(headers: &'a [String], name: &str) -> Option<&'a str> {
    headers.iter().find_map(|line| {
        let (n, v) = line.split_once(':')?;
        n.eq_ignore_ascii_case(name).then(|| v.trim())
    })
}
