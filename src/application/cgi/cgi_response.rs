use crate::common::buffer::find_subslice;
use crate::common::constants::{CGI_HEADER_END, CGI_HEADER_END_LENIENT};
use crate::http::headers::{is_field_value, names as header_names, HeaderParseError, Headers};
use crate::http::response::Response;
use crate::http::status::StatusCode;
use log::{debug, warn};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResponseParseError {
    #[error("malformed header line: {0}")]
    Header(#[from] HeaderParseError),

    #[error("invalid Status header: {0:?}")]
    InvalidStatus(String),

    #[error("header block is not valid UTF-8")]
    NotUtf8,
}

/// A program's output split into status, headers and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgiResponse {
    pub status: StatusCode,

    /// Reason phrase from the `Status:` header, if it carried one
    pub reason: Option<String>,

    pub headers: Headers,

    pub body: Vec<u8>,
}

impl CgiResponse {
    /// Whole output as an HTML body, used when there is no usable header block.
    pub fn raw_body(output: &[u8]) -> Self {
        let mut headers = Headers::new();
        headers.add(header_names::CONTENT_TYPE, "text/html");
        Self {
            status: StatusCode::OK,
            reason: None,
            headers,
            body: output.to_vec(),
        }
    }

    /// `(declared, actual)` when the program's own Content-Length disagrees
    /// with the body it wrote.
    pub fn declared_length_mismatch(&self) -> Option<(usize, usize)> {
        let declared = self
            .headers
            .get(header_names::CONTENT_LENGTH)?
            .trim()
            .parse::<usize>()
            .ok()?;
        (declared != self.body.len()).then_some((declared, self.body.len()))
    }

    pub fn into_response(self) -> Response {
        let mut response = Response::new(self.status);
        response.reason = self.reason;
        response.headers = self.headers;
        response.body = self.body;
        response
    }
}

/// Parses raw CGI output.
pub struct ResponseParser;

impl ResponseParser {
    /// Split `output` at the first blank line.
    ///
    /// Output without a blank line is all body. A malformed header block
    /// is an error; see [`parse_lenient`](ResponseParser::parse_lenient).
    pub fn parse(output: &[u8]) -> Result<CgiResponse, ResponseParseError> {
        let (header_block, body) = match split_header_block(output) {
            Some(parts) => parts,
            None => {
                debug!("CGI output has no header block, sending it as body");
                return Ok(CgiResponse::raw_body(output));
            }
        };

        let text = std::str::from_utf8(header_block).map_err(|_| ResponseParseError::NotUtf8)?;
        let mut headers = Headers::new();
        let mut last: Option<(String, String)> = None;
        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                continue;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                // obsolete line folding
                if let Some((ref name, ref mut value)) = last {
                    if !is_field_value(line) {
                        return Err(HeaderParseError::InvalidValue(name.clone()).into());
                    }
                    value.push(' ');
                    value.push_str(line.trim());
                    continue;
                }
            }
            if let Some((name, value)) = last.take() {
                headers.add(&name, &value);
            }
            last = Some(Headers::parse_line(line)?);
        }
        if let Some((name, value)) = last {
            headers.add(&name, &value);
        }

        let (status, reason) = match headers.get(header_names::STATUS) {
            Some(value) => parse_status(value)?,
            None if headers.contains(header_names::LOCATION) => (StatusCode::FOUND, None),
            None => (StatusCode::OK, None),
        };
        headers.remove(header_names::STATUS);

        Ok(CgiResponse {
            status,
            reason,
            headers,
            body: body.to_vec(),
        })
    }

    /// Like [`parse`](ResponseParser::parse), but a malformed header block
    /// degrades to the whole output sent as body.
    pub fn parse_lenient(output: &[u8]) -> CgiResponse {
        match Self::parse(output) {
            Ok(response) => response,
            Err(e) => {
                warn!("unparseable CGI header block ({}), sending output as body", e);
                CgiResponse::raw_body(output)
            }
        }
    }
}

/// Header block and body around the earliest blank line.
fn split_header_block(output: &[u8]) -> Option<(&[u8], &[u8])> {
    // A blank first line means no headers at all.
    if let Some(body) = output.strip_prefix(b"\r\n") {
        return Some((&[], body));
    }
    if let Some(body) = output.strip_prefix(b"\n") {
        return Some((&[], body));
    }

    let strict = find_subslice(output, CGI_HEADER_END).map(|i| (i, CGI_HEADER_END.len()));
    let lenient =
        find_subslice(output, CGI_HEADER_END_LENIENT).map(|i| (i, CGI_HEADER_END_LENIENT.len()));
    let (at, len) = match (strict, lenient) {
        (Some(s), Some(l)) => {
            if s.0 <= l.0 {
                s
            } else {
                l
            }
        }
        (Some(s), None) => s,
        (None, Some(l)) => l,
        (None, None) => return None,
    };
    Some((&output[..at], &output[at + len..]))
}

/// `"404 Not Found"` -> (404, Some("Not Found")); `"404"` -> (404, None)
fn parse_status(value: &str) -> Result<(StatusCode, Option<String>), ResponseParseError> {
    let value = value.trim();
    let (code, reason) = match value.split_once(' ') {
        Some((code, reason)) => (code, reason.trim()),
        None => (value, ""),
    };
    let status = code
        .parse::<u16>()
        .ok()
        .filter(|_| code.len() == 3)
        .and_then(StatusCode::new)
        .ok_or_else(|| ResponseParseError::InvalidStatus(value.to_string()))?;
    let reason = (!reason.is_empty()).then(|| reason.to_string());
    Ok((status, reason))
}
