use crate::application::cgi::cgi_io::OutputCapture;
use crate::application::cgi::cgi_process::CgiProcess;
use crate::common::cancel::CancelToken;
use crate::common::constants::{OUTPUT_DRAIN_MS, SUPERVISOR_POLL_INTERVAL_MS};
use crate::common::time::Deadline;
use log::{debug, warn};
use std::io;
use std::process::ExitStatus;
use std::thread;
use std::time::Duration;

/// How a supervised invocation ended. The process is reaped in every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Supervision {
    Exited(ExitStatus),
    TimedOut(ExitStatus),
    Cancelled(ExitStatus),
    /// Stdout went past the capture limit and the group was terminated.
    OutputTooLarge(ExitStatus),
}

impl Supervision {
    pub fn exit_status(&self) -> ExitStatus {
        match *self {
            Supervision::Exited(status)
            | Supervision::TimedOut(status)
            | Supervision::Cancelled(status)
            | Supervision::OutputTooLarge(status) => status,
        }
    }
}

/// Enforces the wall-clock budget of a CGI invocation.
///
/// Termination is SIGTERM to the process group, then SIGKILL once the
/// grace period runs out.
#[derive(Debug, Clone)]
pub struct TimeoutSupervisor {
    grace_period: Duration,
    poll_interval: Duration,
}

impl TimeoutSupervisor {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            grace_period,
            poll_interval: Duration::from_millis(SUPERVISOR_POLL_INTERVAL_MS),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Wait for stdout EOF and process exit, whichever the deadline or the
    /// cancel token allow.
    ///
    /// A leader that exits while a descendant still holds stdout open gets
    /// a short drain window, after which the rest of its group is killed.
    pub fn supervise(
        &self,
        process: &mut CgiProcess,
        capture: &mut OutputCapture,
        deadline: &Deadline,
        cancel: &CancelToken,
    ) -> io::Result<Supervision> {
        loop {
            if cancel.is_cancelled() {
                debug!("client gone, terminating pid {}", process.id());
                return self.terminate(process).map(Supervision::Cancelled);
            }
            if deadline.is_expired() {
                warn!(
                    "'{}' exceeded {:?}, terminating",
                    process.script_path().display(),
                    deadline.budget()
                );
                return self.terminate(process).map(Supervision::TimedOut);
            }

            let slice = self.poll_interval.min(deadline.remaining());
            if !capture.is_complete() {
                if !capture.wait(slice) && process.has_exited()? {
                    return self.drain_after_exit(process, capture, deadline);
                }
                continue;
            }
            if capture.exceeded_limit() {
                warn!(
                    "'{}' wrote more than {} bytes, terminating",
                    process.script_path().display(),
                    capture.limit()
                );
                return self.terminate(process).map(Supervision::OutputTooLarge);
            }
            if let Some(status) = process.try_wait()? {
                return Ok(Supervision::Exited(status));
            }
            thread::sleep(slice);
        }
    }

    fn drain_after_exit(
        &self,
        process: &mut CgiProcess,
        capture: &mut OutputCapture,
        deadline: &Deadline,
    ) -> io::Result<Supervision> {
        let drain = Duration::from_millis(OUTPUT_DRAIN_MS).min(deadline.remaining());
        if !capture.wait(drain) {
            debug!(
                "pid {} exited with stdout still open, killing its group",
                process.id()
            );
            // The leader is not reaped yet, so the group id still refers to it.
            process.signal_group(libc::SIGKILL)?;
            capture.wait(self.grace_period.max(self.poll_interval));
        }
        let status = process.wait()?;
        if capture.exceeded_limit() {
            return Ok(Supervision::OutputTooLarge(status));
        }
        Ok(Supervision::Exited(status))
    }

    /// SIGTERM the group, give it the grace period, SIGKILL what is left
    /// and reap the leader.
    pub fn terminate(&self, process: &mut CgiProcess) -> io::Result<ExitStatus> {
        if let Some(status) = process.exit_status() {
            return Ok(status);
        }
        process.signal_group(libc::SIGTERM)?;

        let grace = Deadline::after(self.grace_period);
        while !grace.is_expired() {
            if process.has_exited()? {
                break;
            }
            thread::sleep(self.poll_interval.min(grace.remaining()));
        }

        // The unreaped leader still pins the group id, so stragglers in the
        // group can be killed even when the leader itself is gone.
        if !process.has_exited()? {
            debug!("pid {} ignored SIGTERM, sending SIGKILL", process.id());
        }
        process.signal_group(libc::SIGKILL)?;
        process.wait()
    }
}
