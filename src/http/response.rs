use crate::common::constants::SERVER_SOFTWARE;
use crate::common::time::http_date_now;
use crate::http::headers::{names as header_names, Headers};
use crate::http::status::StatusCode;
use crate::http::version::Version;

/// Outbound HTTP response
#[derive(Debug, Clone)]
pub struct Response {
    pub version: Version,

    pub status: StatusCode,

    /// Reason phrase supplied by a CGI `Status:` header; canonical phrase otherwise
    pub reason: Option<String>,

    pub headers: Headers,

    pub body: Vec<u8>,

    /// Send headers only (responses to HEAD)
    pub omit_body: bool,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            version: Version::Http11,
            status,
            reason: None,
            headers: Headers::new(),
            body: Vec::new(),
            omit_body: false,
        }
    }

    /// Gateway-generated page for an aborted or rejected request.
    pub fn synthetic(status: StatusCode, detail: &str) -> Self {
        let mut response = Self::new(status);
        let title = format!("{} {}", status, status.reason_phrase());
        let html = format!(
            "<!DOCTYPE html>\n<html><head><title>{title}</title></head>\
             <body><h1>{title}</h1><p>{}</p></body></html>\n",
            escape_html(detail)
        );
        response.headers.set(header_names::CONTENT_TYPE, "text/html; charset=utf-8");
        response.body = html.into_bytes();
        response
    }

    pub fn reason_phrase(&self) -> &str {
        self.reason
            .as_deref()
            .unwrap_or_else(|| self.status.reason_phrase())
    }

    pub fn set_content_type(&mut self, content_type: &str) {
        self.headers.set(header_names::CONTENT_TYPE, content_type);
    }

    /// Whether body bytes go on the wire
    pub fn sends_body(&self) -> bool {
        !self.omit_body && self.status.allows_body()
    }

    /// Merge in the headers the gateway owns: framing and connection
    /// management always, `Date` and `Server` only where the program did
    /// not set them.
    pub fn apply_gateway_headers(&mut self) {
        if !self.headers.contains(header_names::DATE) {
            self.headers.add(header_names::DATE, &http_date_now());
        }
        if !self.headers.contains(header_names::SERVER) {
            self.headers.add(header_names::SERVER, SERVER_SOFTWARE);
        }
        self.headers.remove(header_names::TRANSFER_ENCODING);
        if self.status.allows_body() {
            self.headers
                .set(header_names::CONTENT_LENGTH, &self.body.len().to_string());
        } else {
            self.headers.remove(header_names::CONTENT_LENGTH);
        }
        self.headers.set(header_names::CONNECTION, "close");
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
