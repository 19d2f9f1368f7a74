use std::fmt;
use thiserror::Error;

/// Ordered, multi-valued header list with case-insensitive lookup.
///
/// Entries keep the spelling and order in which they were added, so a
/// header repeated by a client or a CGI program is forwarded exactly as
/// it arrived.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Replace all values of `name` with a single value.
    pub fn set(&mut self, name: &str, value: &str) {
        self.remove(name);
        self.add(name, value);
    }

    /// Append a value, keeping existing ones.
    pub fn add(&mut self, name: &str, value: &str) {
        self.entries.push((name.to_string(), value.to_string()));
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Distinct names in order of first appearance, original spelling.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for (name, _) in &self.entries {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                names.push(name);
            }
        }
        names
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries, counting repeats.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Parse a single `Name: Value` line.
    pub fn parse_line(line: &str) -> Result<(String, String), HeaderParseError> {
        let colon = line
            .find(':')
            .ok_or_else(|| HeaderParseError::MissingColon(line.to_string()))?;
        let name = &line[..colon];
        if !is_token(name) {
            return Err(HeaderParseError::InvalidName(name.to_string()));
        }
        let value = line[colon + 1..].trim();
        if !is_field_value(value) {
            return Err(HeaderParseError::InvalidValue(name.to_string()));
        }
        Ok((name.to_string(), value.to_string()))
    }

    pub fn from_lines<S: AsRef<str>>(lines: &[S]) -> Result<Self, HeaderParseError> {
        let mut headers = Headers::new();
        for line in lines {
            let (name, value) = Self::parse_line(line.as_ref())?;
            headers.add(&name, &value);
        }
        Ok(headers)
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            write!(f, "{}: {}\r\n", name, value)?;
        }
        Ok(())
    }
}

/// RFC 9110 token: a non-empty run of visible characters other than separators.
pub fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^'
                        | b'_' | b'`' | b'|' | b'~'
                )
        })
}

/// Field value without control characters; horizontal tab is allowed.
pub fn is_field_value(s: &str) -> bool {
    s.bytes().all(|b| b == b'\t' || !b.is_ascii_control())
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HeaderParseError {
    #[error("header line without ':': {0:?}")]
    MissingColon(String),

    #[error("invalid header name: {0:?}")]
    InvalidName(String),

    #[error("control character in value of {0:?}")]
    InvalidValue(String),
}

pub mod names {
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
    pub const CONNECTION: &str = "Connection";
    pub const HOST: &str = "Host";
    pub const COOKIE: &str = "Cookie";
    pub const LOCATION: &str = "Location";
    pub const PROXY: &str = "Proxy";
    pub const SERVER: &str = "Server";
    pub const DATE: &str = "Date";
    pub const STATUS: &str = "Status";
}
