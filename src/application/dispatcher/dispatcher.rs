use crate::application::cgi::{
    CgiExecutor, EnvironmentBuilder, ResponseParser, ScriptResolver, ServerIdentity,
};
use crate::application::config::models::Config;
use crate::application::dispatcher::admission::AdmissionControl;
use crate::common::cancel::CancelToken;
use crate::common::error::{GatewayError, Result};
use crate::http::method::Method;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::serializer::ResponseSerializer;
use crate::http::status::StatusCode;
use log::{debug, error, info, warn};
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Stages a request passes through. `Aborted` can follow any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Received,
    EnvironmentBuilt,
    ProcessSpawned,
    OutputCaptured,
    ResponseParsed,
    Written,
    Aborted(AbortReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Configuration,
    Spawn,
    Execution,
    Timeout,
    ClientDisconnect,
    Overloaded,
    Internal,
}

impl From<&GatewayError> for AbortReason {
    fn from(err: &GatewayError) -> Self {
        match err {
            GatewayError::Configuration(_) => AbortReason::Configuration,
            GatewayError::Spawn { .. } => AbortReason::Spawn,
            GatewayError::Execution { .. } | GatewayError::OutputTooLarge { .. } => {
                AbortReason::Execution
            }
            GatewayError::Timeout { .. } => AbortReason::Timeout,
            GatewayError::ClientDisconnect => AbortReason::ClientDisconnect,
            GatewayError::Overloaded => AbortReason::Overloaded,
            _ => AbortReason::Internal,
        }
    }
}

/// What happened to one dispatched request.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub invocation_id: u64,

    /// Every state entered, in order
    pub trace: Vec<DispatchState>,

    /// Status sent to the client, if a response went out
    pub status: Option<StatusCode>,

    pub bytes_written: usize,
}

impl DispatchReport {
    pub fn final_state(&self) -> DispatchState {
        self.trace
            .last()
            .copied()
            .unwrap_or(DispatchState::Received)
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.final_state(), DispatchState::Aborted(_))
    }
}

/// Drives one request at a time from environment to written response.
pub struct RequestDispatcher {
    builder: EnvironmentBuilder,
    executor: CgiExecutor,
    admission: AdmissionControl,
    default_timeout: Duration,
    next_id: AtomicU64,
}

impl RequestDispatcher {
    pub fn new(config: &Config, server_port: u16) -> Result<Self> {
        let gateway = &config.gateway;
        let resolver = ScriptResolver::new(gateway, &config.scripts)?;
        let identity = ServerIdentity {
            server_name: config.server.server_name.clone(),
            server_port,
            safe_path: gateway.safe_path.clone(),
        };

        Ok(Self {
            builder: EnvironmentBuilder::new(resolver, identity),
            executor: CgiExecutor::from_config(gateway),
            admission: AdmissionControl::new(
                gateway.max_concurrency,
                gateway.overload,
                gateway.queue_depth,
            ),
            default_timeout: gateway.timeout(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config, config.server.listen.port())
    }

    pub fn admission(&self) -> &AdmissionControl {
        &self.admission
    }

    /// Run `request` through its CGI program and write the response to `out`.
    ///
    /// Never fails: errors become a synthetic response while nothing has
    /// reached the client yet, and are otherwise only reported.
    pub fn dispatch<W: Write>(
        &self,
        request: &Request,
        out: &mut W,
        cancel: &CancelToken,
    ) -> DispatchReport {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let mut writer = CountingWriter::new(out);
        let mut trace = vec![DispatchState::Received];

        let status = match self.run(id, request, &mut writer, cancel, &mut trace) {
            Ok(status) => {
                trace.push(DispatchState::Written);
                Some(status)
            }
            Err(err) => {
                trace.push(DispatchState::Aborted(AbortReason::from(&err)));
                self.abort(id, request, &err, &mut writer, cancel)
            }
        };

        match status {
            Some(status) => info!(
                "{} {} -> {} ({:?}) [#{}]",
                request.method,
                request.target,
                status,
                started.elapsed(),
                id
            ),
            None => info!(
                "{} {} -> aborted ({:?}) [#{}]",
                request.method,
                request.target,
                started.elapsed(),
                id
            ),
        }

        DispatchReport {
            invocation_id: id,
            trace,
            status,
            bytes_written: writer.written,
        }
    }

    fn run<W: Write>(
        &self,
        id: u64,
        request: &Request,
        writer: &mut CountingWriter<W>,
        cancel: &CancelToken,
        trace: &mut Vec<DispatchState>,
    ) -> Result<StatusCode> {
        let (script, env) = self.builder.prepare(request)?;
        trace.push(DispatchState::EnvironmentBuilt);

        let permit = self.admission.acquire(cancel)?;
        let timeout = script.timeout.unwrap_or(self.default_timeout);
        let invocation = self
            .executor
            .spawn(id, &script, &env, &request.body, timeout)?;
        trace.push(DispatchState::ProcessSpawned);

        let captured = invocation.run(self.executor.supervisor(), cancel)?;
        // The process is reaped; its slot is free.
        drop(permit);
        trace.push(DispatchState::OutputCaptured);

        let cgi = ResponseParser::parse_lenient(&captured.stdout);
        if let Some((declared, actual)) = cgi.declared_length_mismatch() {
            warn!(
                "[#{}] '{}' declared Content-Length {} but wrote {} bytes",
                id, script.script_name, declared, actual
            );
        }
        trace.push(DispatchState::ResponseParsed);

        let mut response = cgi.into_response();
        response.version = request.version;
        response.omit_body = request.method == Method::HEAD;
        response.apply_gateway_headers();
        let status = response.status;

        if cancel.is_cancelled() {
            return Err(GatewayError::ClientDisconnect);
        }
        write_response(writer, &response).map_err(|e| {
            debug!("[#{}] write failed: {}", id, e);
            GatewayError::ClientDisconnect
        })?;
        Ok(status)
    }

    /// Answer with a synthetic error page when that is still possible.
    fn abort<W: Write>(
        &self,
        id: u64,
        request: &Request,
        err: &GatewayError,
        writer: &mut CountingWriter<W>,
        cancel: &CancelToken,
    ) -> Option<StatusCode> {
        match err {
            GatewayError::ClientDisconnect => debug!("[#{}] client went away", id),
            GatewayError::Configuration(_) | GatewayError::Overloaded => {
                warn!("[#{}] {}", id, err)
            }
            _ => error!("[#{}] {}", id, err),
        }

        let status = err.status_code()?;
        if writer.written > 0 || cancel.is_cancelled() {
            debug!(
                "[#{}] {} bytes already sent, closing without a response",
                id, writer.written
            );
            return None;
        }

        let mut response = Response::synthetic(status, err.client_message());
        response.version = request.version;
        response.omit_body = request.method == Method::HEAD;
        response.apply_gateway_headers();
        match write_response(writer, &response) {
            Ok(()) => Some(status),
            Err(e) => {
                debug!("[#{}] could not send {} response: {}", id, status, e);
                None
            }
        }
    }
}

fn write_response<W: Write>(out: &mut W, response: &Response) -> io::Result<()> {
    out.write_all(&ResponseSerializer::serialize(response))?;
    out.flush()
}

/// Counts bytes that reached the underlying writer.
struct CountingWriter<'a, W: Write> {
    inner: &'a mut W,
    written: usize,
}

impl<'a, W: Write> CountingWriter<'a, W> {
    fn new(inner: &'a mut W) -> Self {
        Self { inner, written: 0 }
    }
}

impl<W: Write> Write for CountingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
