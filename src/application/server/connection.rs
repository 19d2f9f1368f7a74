use crate::application::config::models::ServerConfig;
use crate::application::dispatcher::RequestDispatcher;
use crate::common::cancel::CancelToken;
use crate::common::constants::{
    DEFAULT_BUFFER_SIZE, DEFAULT_MAX_HEADER_SIZE, DISCONNECT_POLL_INTERVAL_MS,
};
use crate::common::error::{GatewayError, Result};
use crate::http::parser::RequestParser;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::serializer::ResponseSerializer;
use crate::http::status::StatusCode;
use log::{debug, warn};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Per-connection limits
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub client_timeout: Duration,
    pub max_header_size: usize,
    pub max_body_size: usize,
}

impl ConnectionSettings {
    pub fn from_config(server: &ServerConfig) -> Self {
        Self {
            client_timeout: Duration::from_secs(server.client_timeout_secs),
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            max_body_size: server.max_body_size,
        }
    }
}

/// Serve exactly one request on `stream`, then close it.
pub fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    dispatcher: &RequestDispatcher,
    settings: &ConnectionSettings,
) -> Result<()> {
    stream.set_read_timeout(Some(settings.client_timeout))?;
    stream.set_write_timeout(Some(settings.client_timeout))?;

    let mut request = match read_request(&mut stream, settings) {
        Ok(Some(request)) => request,
        Ok(None) => {
            debug!("{} closed the connection without a request", peer);
            return Ok(());
        }
        Err(e) => {
            let (status, message) = match e {
                GatewayError::Io(ref io) if is_timeout(io) => {
                    (StatusCode::REQUEST_TIMEOUT, "The request was not received in time.")
                }
                ref other => (
                    other.status_code().unwrap_or(StatusCode::BAD_REQUEST),
                    other.client_message(),
                ),
            };
            debug!("rejecting request from {}: {}", peer, e);
            let mut response = Response::synthetic(status, message);
            response.apply_gateway_headers();
            // The client may already be gone.
            let _ = stream.write_all(&ResponseSerializer::serialize(&response));
            let _ = stream.shutdown(Shutdown::Write);
            return Ok(());
        }
    };
    request.remote_addr = Some(peer);

    let cancel = CancelToken::new();
    let watch = DisconnectWatch::start(&stream, cancel.clone())?;
    let report = dispatcher.dispatch(&request, &mut stream, &cancel);
    watch.stop();

    debug!(
        "[#{}] {} done: {:?}, {} bytes",
        report.invocation_id,
        peer,
        report.final_state(),
        report.bytes_written
    );
    let _ = stream.shutdown(Shutdown::Write);
    Ok(())
}

/// Read until one full request is parsed. `None` when the peer closed
/// before sending anything.
fn read_request(stream: &mut TcpStream, settings: &ConnectionSettings) -> Result<Option<Request>> {
    let mut parser = RequestParser::with_limits(settings.max_header_size, settings.max_body_size);
    let mut buf = [0u8; DEFAULT_BUFFER_SIZE];
    let mut received = 0usize;

    loop {
        let n = match stream.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            if received == 0 {
                return Ok(None);
            }
            return Err(GatewayError::Parse(
                "connection closed mid-request".to_string(),
            ));
        }
        received += n;
        parser.add_data(&buf[..n]);
        if let Some(request) = parser.parse()? {
            return Ok(Some(request));
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Watches the client socket while a request is being served and trips
/// the cancel token when the peer hangs up.
///
/// A peer that half-closes its side counts as gone. Bytes sent after the
/// request are read and dropped, since only one request is served per
/// connection.
struct DisconnectWatch {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DisconnectWatch {
    fn start(stream: &TcpStream, cancel: CancelToken) -> io::Result<Self> {
        let mut socket = stream.try_clone()?;
        socket.set_read_timeout(Some(Duration::from_millis(DISCONNECT_POLL_INTERVAL_MS)))?;
        let stop = Arc::new(AtomicBool::new(false));
        let stopped = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("disconnect-watch".to_string())
            .spawn(move || {
                let mut discard = [0u8; 512];
                while !stopped.load(Ordering::SeqCst) {
                    match socket.read(&mut discard) {
                        Ok(0) => {
                            cancel.cancel();
                            break;
                        }
                        Ok(n) => debug!("ignoring {} pipelined bytes", n),
                        Err(ref e) if is_timeout(e) || e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => {
                            debug!("client socket error: {}", e);
                            cancel.cancel();
                            break;
                        }
                    }
                }
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("disconnect watch thread panicked");
            }
        }
    }
}

impl Drop for DisconnectWatch {
    fn drop(&mut self) {
        self.shutdown();
    }
}
