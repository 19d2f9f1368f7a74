use crate::http::headers::{names as header_names, Headers};
use crate::http::method::Method;
use crate::http::version::Version;
use std::net::SocketAddr;

/// Inbound HTTP request. The dispatcher only ever borrows it immutably.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,

    /// Request target (path + query string), as sent by the client
    pub target: String,

    pub version: Version,

    pub headers: Headers,

    /// Decoded body (chunked transfer coding already removed)
    pub body: Vec<u8>,

    /// Peer address, when the request came in over a socket
    pub remote_addr: Option<SocketAddr>,
}

impl Request {
    pub fn new(method: Method, target: &str, version: Version) -> Self {
        Self {
            method,
            target: target.to_string(),
            version,
            headers: Headers::new(),
            body: Vec::new(),
            remote_addr: None,
        }
    }

    /// Path part of the target (without query string)
    pub fn path(&self) -> &str {
        match self.target.find('?') {
            Some(pos) => &self.target[..pos],
            None => &self.target,
        }
    }

    /// Everything after the first `?`, if any
    pub fn query_string(&self) -> Option<&str> {
        self.target.find('?').map(|pos| &self.target[pos + 1..])
    }

    /// Value of an explicit `Content-Length` header
    pub fn declared_content_length(&self) -> Option<usize> {
        self.headers
            .get(header_names::CONTENT_LENGTH)
            .and_then(|v| v.trim().parse().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(header_names::CONTENT_TYPE)
    }

    pub fn host(&self) -> Option<&str> {
        self.headers.get(header_names::HOST)
    }

    pub fn is_chunked(&self) -> bool {
        self.headers
            .get(header_names::TRANSFER_ENCODING)
            .map(|v| v.eq_ignore_ascii_case("chunked"))
            .unwrap_or(false)
    }
}
