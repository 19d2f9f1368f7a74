// Error handling tests - verify the gateway answers bad input with proper statuses

use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

mod common;
use common::{send_request, TestGateway};

#[test]
fn test_malformed_request_line() {
    let gateway = TestGateway::new();
    let addr = gateway.start();

    let response = send_request(addr, b"INVALID REQUEST LINE\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
}

#[test]
fn test_extension_method_reaches_script() {
    let gateway = TestGateway::new();
    gateway.script("pot", "printf 'Status: 418 Teapot\\r\\n\\r\\n%s' \"$REQUEST_METHOD\"");
    let addr = gateway.start();

    let response = send_request(addr, b"BREW /cgi-bin/pot HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 418 Teapot\r\n"));
    assert!(response.ends_with("\r\n\r\nBREW"));
}

#[test]
fn test_invalid_method_token() {
    let gateway = TestGateway::new();
    let addr = gateway.start();

    let response = send_request(addr, b"BR(EW /cgi-bin/pot HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
}

#[test]
fn test_error_page_hides_filesystem_paths() {
    let gateway = TestGateway::new();
    let addr = gateway.start();
    let root = gateway.root().to_string_lossy().into_owned();

    for target in ["/cgi-bin/nothing", "/cgi-bin/%2e%2e/%2e%2e/bin/sh"] {
        let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", target);
        let response = send_request(addr, request.as_bytes());
        assert!(!response.contains(&root), "{}", response);
        assert!(!response.contains("/bin/sh"), "{}", response);
    }
}

#[test]
fn test_body_too_large() {
    let mut gateway = TestGateway::new();
    gateway.config.server.max_body_size = 16;
    gateway.script("echo", "cat");
    let addr = gateway.start();

    let response = send_request(
        addr,
        b"POST /cgi-bin/echo HTTP/1.1\r\nHost: localhost\r\nContent-Length: 64\r\n\r\n",
    );
    assert!(response.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
}

#[test]
fn test_unmapped_path() {
    let gateway = TestGateway::new();
    let addr = gateway.start();

    let response = send_request(addr, b"GET /static/index.html HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
}

#[test]
fn test_traversal_forbidden() {
    let gateway = TestGateway::new();
    let addr = gateway.start();

    let response = send_request(
        addr,
        b"GET /cgi-bin/%2e%2e/%2e%2e/bin/sh HTTP/1.1\r\nHost: localhost\r\n\r\n",
    );
    assert!(response.starts_with("HTTP/1.1 403 Forbidden\r\n"));
}

#[test]
fn test_script_failure_is_bad_gateway() {
    let gateway = TestGateway::new();
    gateway.script("crash", "kill -SEGV $$");
    let addr = gateway.start();

    let response = send_request(addr, b"GET /cgi-bin/crash HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
}

#[test]
fn test_slow_client_times_out() {
    let mut gateway = TestGateway::new();
    gateway.config.server.client_timeout_secs = 1;
    let addr = gateway.start();

    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    // Never finish the header block.
    stream.write_all(b"GET /cgi-bin/x HTTP/1.1\r\nHost: loc").unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    assert!(response.starts_with("HTTP/1.1 408 Request Timeout\r\n"));
}

#[test]
fn test_silent_close_gets_no_response() {
    let gateway = TestGateway::new();
    let addr = gateway.start();

    let stream = TcpStream::connect(addr).unwrap();
    drop(stream);
    thread::sleep(Duration::from_millis(50));

    // The server keeps serving afterwards.
    let response = send_request(addr, b"GET /nowhere HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
}
