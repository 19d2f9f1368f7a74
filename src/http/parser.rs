use crate::common::buffer::Buffer;
use crate::common::constants::{CRLF_BYTES, DEFAULT_MAX_BODY_SIZE, DEFAULT_MAX_HEADER_SIZE};
use crate::common::error::{GatewayError, Result};
use crate::http::headers::Headers;
use crate::http::method::Method;
use crate::http::request::Request;
use crate::http::version::Version;
use std::str;
use std::str::FromStr;

/// Parser state machine
#[derive(Debug, Clone, PartialEq)]
pub enum ParseState {
    RequestLine,
    Headers,
    Body { remaining: usize },
    ChunkSize,
    ChunkData { remaining: usize },
    ChunkTrailer,
    Complete,
}

/// Incremental HTTP/1.1 request parser. Feed bytes with [`add_data`]
/// and call [`parse`] until it yields a request.
///
/// [`add_data`]: RequestParser::add_data
/// [`parse`]: RequestParser::parse
pub struct RequestParser {
    state: ParseState,
    buffer: Buffer,
    request: Option<Request>,
    header_lines: Vec<String>,
    header_bytes: usize,
    max_header_size: usize,
    max_body_size: usize,
}

impl RequestParser {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_HEADER_SIZE, DEFAULT_MAX_BODY_SIZE)
    }

    pub fn with_limits(max_header_size: usize, max_body_size: usize) -> Self {
        Self {
            state: ParseState::RequestLine,
            buffer: Buffer::new(),
            request: None,
            header_lines: Vec::new(),
            header_bytes: 0,
            max_header_size,
            max_body_size,
        }
    }

    pub fn add_data(&mut self, data: &[u8]) {
        self.buffer.extend(data);
    }

    pub fn state(&self) -> &ParseState {
        &self.state
    }

    /// Parse buffered data; `Ok(None)` means more input is needed.
    pub fn parse(&mut self) -> Result<Option<Request>> {
        loop {
            match self.state {
                ParseState::RequestLine => match self.take_line()? {
                    Some(line) => {
                        // Tolerate stray empty lines before the request line (RFC 9112 2.2)
                        if line.is_empty() {
                            continue;
                        }
                        self.request = Some(parse_request_line(&line)?);
                        self.state = ParseState::Headers;
                    }
                    None => return Ok(None),
                },
                ParseState::Headers => match self.take_line()? {
                    Some(line) if line.is_empty() => self.finish_headers()?,
                    Some(line) => self.header_lines.push(line),
                    None => return Ok(None),
                },
                ParseState::Body { remaining } => {
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }
                    let body = self.buffer.drain(remaining);
                    self.request_mut()?.body = body;
                    self.state = ParseState::Complete;
                }
                ParseState::ChunkSize => match self.take_line()? {
                    Some(line) => {
                        let size_str = line.split(';').next().unwrap_or("").trim();
                        let size = usize::from_str_radix(size_str, 16).map_err(|_| {
                            GatewayError::Parse(format!("Invalid chunk size: {:?}", line))
                        })?;
                        if size == 0 {
                            self.state = ParseState::ChunkTrailer;
                        } else {
                            let max_body_size = self.max_body_size;
                            let received = self.request_mut()?.body.len();
                            match received.checked_add(size) {
                                Some(total) if total <= max_body_size => {}
                                _ => return Err(GatewayError::PayloadTooLarge(max_body_size)),
                            }
                            self.state = ParseState::ChunkData { remaining: size };
                        }
                    }
                    None => return Ok(None),
                },
                ParseState::ChunkData { remaining } => {
                    if self.buffer.len() < remaining.saturating_add(CRLF_BYTES.len()) {
                        return Ok(None);
                    }
                    let chunk = self.buffer.drain(remaining);
                    if self.buffer.drain(CRLF_BYTES.len()) != CRLF_BYTES {
                        return Err(GatewayError::Parse("Chunk not terminated by CRLF".to_string()));
                    }
                    self.request_mut()?.body.extend_from_slice(&chunk);
                    self.state = ParseState::ChunkSize;
                }
                ParseState::ChunkTrailer => match self.take_line()? {
                    // Trailer fields are discarded.
                    Some(line) if line.is_empty() => self.state = ParseState::Complete,
                    Some(_) => continue,
                    None => return Ok(None),
                },
                ParseState::Complete => {
                    return Ok(self.request.take());
                }
            }
        }
    }

    /// Reset parser for a new request
    pub fn reset(&mut self) {
        self.state = ParseState::RequestLine;
        self.buffer.clear();
        self.request = None;
        self.header_lines.clear();
        self.header_bytes = 0;
    }

    fn request_mut(&mut self) -> Result<&mut Request> {
        self.request
            .as_mut()
            .ok_or_else(|| GatewayError::Parse("No request in progress".to_string()))
    }

    /// Pop one CRLF-terminated line, enforcing the head size limit.
    fn take_line(&mut self) -> Result<Option<String>> {
        let in_head = matches!(self.state, ParseState::RequestLine | ParseState::Headers);
        match self.buffer.find(CRLF_BYTES) {
            Some(pos) => {
                let bytes = self.buffer.drain(pos + CRLF_BYTES.len());
                if in_head {
                    self.header_bytes += bytes.len();
                    if self.header_bytes > self.max_header_size {
                        return Err(GatewayError::Parse("Request head too large".to_string()));
                    }
                }
                let line = str::from_utf8(&bytes[..pos])
                    .map_err(|e| GatewayError::Parse(format!("Invalid UTF-8 in request head: {}", e)))?;
                Ok(Some(line.to_string()))
            }
            None => {
                if in_head && self.header_bytes + self.buffer.len() > self.max_header_size {
                    return Err(GatewayError::Parse("Request head too large".to_string()));
                }
                Ok(None)
            }
        }
    }

    fn finish_headers(&mut self) -> Result<()> {
        let headers = Headers::from_lines(&self.header_lines)
            .map_err(|e| GatewayError::Parse(e.to_string()))?;
        let max_body_size = self.max_body_size;
        let request = self.request_mut()?;
        request.headers = headers;

        if request.is_chunked() {
            self.state = ParseState::ChunkSize;
            return Ok(());
        }

        let length = match request.headers.get_all("Content-Length").as_slice() {
            [] => 0,
            [value] => value
                .trim()
                .parse::<usize>()
                .map_err(|_| GatewayError::Parse(format!("Invalid Content-Length: {:?}", value)))?,
            _ => return Err(GatewayError::Parse("Duplicate Content-Length".to_string())),
        };
        if length > max_body_size {
            return Err(GatewayError::PayloadTooLarge(max_body_size));
        }
        self.state = ParseState::Body { remaining: length };
        Ok(())
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

/// `METHOD target HTTP/x.y`
fn parse_request_line(line: &str) -> Result<Request> {
    let parts: Vec<&str> = line.split(' ').collect();
    if parts.len() != 3 {
        return Err(GatewayError::Parse(format!("Invalid request line: {:?}", line)));
    }

    let method = Method::from_str(parts[0]).map_err(|e| GatewayError::Parse(e.to_string()))?;
    let target = parts[1];
    if !target.starts_with('/') {
        return Err(GatewayError::Parse(format!("Unsupported request target: {:?}", target)));
    }
    let version = Version::from_str(parts[2]).map_err(|e| GatewayError::Parse(e.to_string()))?;

    Ok(Request::new(method, target, version))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> Result<Option<Request>> {
        let mut parser = RequestParser::new();
        parser.add_data(input);
        parser.parse()
    }

    #[test]
    fn test_parse_simple_request() {
        let request = parse_all(b"GET /cgi-bin/hello?x=1 HTTP/1.1\r\nHost: localhost\r\nX-Test: abc\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.path(), "/cgi-bin/hello");
        assert_eq!(request.headers.get("x-test"), Some("abc"));
        assert!(request.body.is_empty());
    }

    #[test]
    fn test_parse_incrementally() {
        let mut parser = RequestParser::new();
        parser.add_data(b"POST /echo HTTP/1.1\r\nContent-Le");
        assert!(parser.parse().unwrap().is_none());
        parser.add_data(b"ngth: 5\r\n\r\nhel");
        assert!(parser.parse().unwrap().is_none());
        parser.add_data(b"lo");
        let request = parser.parse().unwrap().unwrap();
        assert_eq!(request.body, b"hello");
    }

    #[test]
    fn test_parse_chunked_body_split_across_reads() {
        let mut parser = RequestParser::new();
        parser.add_data(b"POST /echo HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhel");
        assert!(parser.parse().unwrap().is_none());
        parser.add_data(b"lo\r\n6\r\n world\r\n0\r\n\r\n");
        let request = parser.parse().unwrap().unwrap();
        assert_eq!(request.body, b"hello world");
    }

    #[test]
    fn test_rejects_malformed_request_line() {
        assert!(matches!(parse_all(b"INVALID\r\n\r\n"), Err(GatewayError::Parse(_))));
        assert!(matches!(parse_all(b"GE(T /pot HTTP/1.1\r\n\r\n"), Err(GatewayError::Parse(_))));
    }

    #[test]
    fn test_extension_method_is_kept() {
        let request = parse_all(b"BREW /pot HTTP/1.1\r\n\r\n").unwrap().unwrap();
        assert_eq!(request.method.as_str(), "BREW");
    }

    #[test]
    fn test_rejects_oversized_body() {
        let mut parser = RequestParser::with_limits(1024, 4);
        parser.add_data(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello");
        assert!(matches!(parser.parse(), Err(GatewayError::PayloadTooLarge(4))));
    }

    #[test]
    fn test_rejects_huge_chunk_size() {
        let mut parser = RequestParser::with_limits(1024, 1024);
        parser.add_data(
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n1\r\na\r\nffffffffffffffff\r\n",
        );
        assert!(matches!(parser.parse(), Err(GatewayError::PayloadTooLarge(1024))));

        let mut parser = RequestParser::with_limits(1024, 1024);
        parser.add_data(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\n");
        assert!(matches!(parser.parse(), Err(GatewayError::PayloadTooLarge(1024))));
    }

    #[test]
    fn test_rejects_chunks_over_limit() {
        let mut parser = RequestParser::with_limits(1024, 8);
        parser.add_data(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n5\r\n");
        assert!(matches!(parser.parse(), Err(GatewayError::PayloadTooLarge(8))));
    }

    #[test]
    fn test_rejects_oversized_head() {
        let mut parser = RequestParser::with_limits(32, 1024);
        parser.add_data(b"GET / HTTP/1.1\r\nX-Long: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n\r\n");
        assert!(matches!(parser.parse(), Err(GatewayError::Parse(_))));
    }
}
