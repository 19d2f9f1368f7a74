use crate::common::constants::CRLF;
use crate::http::response::Response;
use std::io::{self, Write};

/// Serialize HTTP responses to bytes
pub struct ResponseSerializer;

impl ResponseSerializer {
    pub fn serialize(response: &Response) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(256 + response.body.len());

        // Writing into a Vec cannot fail.
        let _ = Self::write_head(&mut buffer, response);
        if response.sends_body() {
            buffer.extend_from_slice(&response.body);
        }
        buffer
    }

    /// Status line, header block and the blank line.
    fn write_head<W: Write>(out: &mut W, response: &Response) -> io::Result<()> {
        write!(
            out,
            "{} {} {}{}",
            response.version,
            response.status,
            response.reason_phrase(),
            CRLF
        )?;
        write!(out, "{}", response.headers)?;
        out.write_all(CRLF.as_bytes())
    }
}
