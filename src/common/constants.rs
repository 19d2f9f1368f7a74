pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";
pub const DEFAULT_SERVER_NAME: &str = "localhost";
pub const DEFAULT_CLIENT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024; // 10MB
pub const DEFAULT_BUFFER_SIZE: usize = 8192; // 8KB
pub const DEFAULT_MAX_HEADER_SIZE: usize = 8192; // 8KB

pub const DEFAULT_CGI_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 2000;
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;
pub const DEFAULT_QUEUE_DEPTH: usize = 64;
pub const DEFAULT_SAFE_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
pub const DEFAULT_MAX_OUTPUT_SIZE: usize = 64 * 1024 * 1024; // 64MB
/// Upper bound for any configured script timeout (one day).
pub const MAX_CGI_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// How often the supervisor polls a running program for exit.
pub const SUPERVISOR_POLL_INTERVAL_MS: u64 = 10;
/// How long stdout may stay open after the program itself has exited.
pub const OUTPUT_DRAIN_MS: u64 = 200;
/// How often the disconnect watch re-checks an idle client socket.
pub const DISCONNECT_POLL_INTERVAL_MS: u64 = 100;

pub const GATEWAY_INTERFACE: &str = "CGI/1.1";
pub const SERVER_SOFTWARE: &str = concat!("cgigate/", env!("CARGO_PKG_VERSION"));

pub const CRLF: &str = "\r\n";
pub const CRLF_BYTES: &[u8] = b"\r\n";
pub const CGI_HEADER_END: &[u8] = b"\r\n\r\n";
pub const CGI_HEADER_END_LENIENT: &[u8] = b"\n\n";
