use crate::application::cgi::cgi_env::{search_arguments, CgiEnvironment};
use crate::application::cgi::cgi_io::{feed_stdin, forward_stderr, OutputCapture};
use crate::application::cgi::cgi_process::CgiProcess;
use crate::application::cgi::cgi_supervisor::{Supervision, TimeoutSupervisor};
use crate::application::cgi::script_resolver::ResolvedScript;
use crate::application::config::models::GatewayConfig;
use crate::common::cancel::CancelToken;
use crate::common::constants::DEFAULT_MAX_OUTPUT_SIZE;
use crate::common::error::{GatewayError, Result};
use crate::common::time::Deadline;
use log::{debug, warn};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

/// Everything a finished program wrote to stdout.
#[derive(Debug)]
pub struct CapturedOutput {
    pub stdout: Vec<u8>,
    pub status: ExitStatus,
    pub elapsed: Duration,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// One running program serving one request.
pub struct Invocation {
    id: u64,
    script: PathBuf,
    process: CgiProcess,
    capture: OutputCapture,
    deadline: Deadline,
}

impl Invocation {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pid(&self) -> u32 {
        self.process.id()
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    pub fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    /// Supervise the program to completion and collect its output.
    ///
    /// Non-zero exit with some output is forwarded; no output at all is an
    /// `Execution` error whatever the exit status.
    pub fn run(
        mut self,
        supervisor: &TimeoutSupervisor,
        cancel: &CancelToken,
    ) -> Result<CapturedOutput> {
        let outcome = supervisor.supervise(
            &mut self.process,
            &mut self.capture,
            &self.deadline,
            cancel,
        )?;

        let status = match outcome {
            Supervision::Exited(status) => status,
            Supervision::TimedOut(_) => {
                return Err(GatewayError::Timeout {
                    script: self.script,
                    after: self.deadline.budget(),
                })
            }
            Supervision::Cancelled(_) => return Err(GatewayError::ClientDisconnect),
            Supervision::OutputTooLarge(_) => {
                return Err(GatewayError::OutputTooLarge {
                    script: self.script,
                    limit: self.capture.limit(),
                })
            }
        };

        let stdout = self.capture.into_output()?;
        if stdout.is_empty() {
            return Err(GatewayError::Execution {
                script: self.script,
                exit: status,
                captured: 0,
            });
        }
        if !status.success() {
            warn!(
                "[#{}] '{}' exited with {}, forwarding {} captured bytes",
                self.id,
                self.script.display(),
                status,
                stdout.len()
            );
        }
        debug!(
            "[#{}] '{}' finished in {:?}",
            self.id,
            self.script.display(),
            self.deadline.elapsed()
        );

        Ok(CapturedOutput {
            stdout,
            status,
            elapsed: self.deadline.elapsed(),
        })
    }
}

/// Starts CGI programs and runs them under a [`TimeoutSupervisor`].
#[derive(Debug, Clone)]
pub struct CgiExecutor {
    supervisor: TimeoutSupervisor,
    max_output_size: usize,
}

impl CgiExecutor {
    pub fn new(supervisor: TimeoutSupervisor) -> Self {
        Self {
            supervisor,
            max_output_size: DEFAULT_MAX_OUTPUT_SIZE,
        }
    }

    pub fn from_config(gateway: &GatewayConfig) -> Self {
        Self::new(TimeoutSupervisor::new(gateway.grace_period()))
            .with_max_output_size(gateway.max_output_size)
    }

    /// Cap on what one program may write to stdout.
    pub fn with_max_output_size(mut self, limit: usize) -> Self {
        self.max_output_size = limit;
        self
    }

    pub fn supervisor(&self) -> &TimeoutSupervisor {
        &self.supervisor
    }

    /// Start the program. The request body, if any, is fed on a helper
    /// thread; without one the program's stdin is at EOF from the start.
    pub fn spawn(
        &self,
        id: u64,
        script: &ResolvedScript,
        env: &CgiEnvironment,
        body: &[u8],
        timeout: Duration,
    ) -> Result<Invocation> {
        let args = search_arguments(env.get("QUERY_STRING").unwrap_or(""));
        let deadline = Deadline::after(timeout);
        let mut process = CgiProcess::spawn(script, env, &args, !body.is_empty())?;

        if let Some(stdin) = process.take_stdin() {
            feed_stdin(stdin, body.to_vec())?;
        }
        if let Some(stderr) = process.take_stderr() {
            forward_stderr(stderr, script.script_name.clone())?;
        }
        let stdout = process
            .take_stdout()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stdout was not piped"))?;
        let capture = OutputCapture::start(stdout, self.max_output_size)?;

        debug!(
            "[#{}] started '{}' (pid {}, budget {:?})",
            id,
            script.script_filename.display(),
            process.id(),
            timeout
        );

        Ok(Invocation {
            id,
            script: script.script_filename.clone(),
            process,
            capture,
            deadline,
        })
    }

    /// Spawn and run in one step.
    pub fn execute(
        &self,
        id: u64,
        script: &ResolvedScript,
        env: &CgiEnvironment,
        body: &[u8],
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<CapturedOutput> {
        self.spawn(id, script, env, body, timeout)?
            .run(&self.supervisor, cancel)
    }
}
