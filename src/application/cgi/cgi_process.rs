use crate::application::cgi::cgi_env::CgiEnvironment;
use crate::application::cgi::script_resolver::ResolvedScript;
use crate::common::error::{GatewayError, Result};
use log::{debug, warn};
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};

/// A running CGI program: the leader of its own process group.
///
/// Only the owning thread waits on the child, and signals go out only
/// while the child is unreaped, so the pid/pgid can't have been recycled
/// when we signal it. Dropping an unreaped process kills and reaps it.
pub struct CgiProcess {
    child: Child,
    script_path: PathBuf,
    exit: Option<ExitStatus>,
}

impl CgiProcess {
    /// Start the program with exactly `env` as its environment.
    pub fn spawn(
        script: &ResolvedScript,
        env: &CgiEnvironment,
        args: &[String],
        has_body: bool,
    ) -> Result<Self> {
        let mut command = match script.interpreter {
            Some(ref interpreter) => {
                let mut command = Command::new(interpreter);
                command.arg(&script.script_filename);
                command
            }
            None => Command::new(&script.script_filename),
        };
        command.args(args);

        command.env_clear();
        command.envs(env.iter());

        command.stdin(if has_body { Stdio::piped() } else { Stdio::null() });
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        if let Some(parent) = script.script_filename.parent() {
            command.current_dir(parent);
        }
        command.process_group(0);

        let child = command.spawn().map_err(|source| GatewayError::Spawn {
            script: script.script_filename.clone(),
            source,
        })?;
        debug!(
            "spawned '{}' as pid {}",
            script.script_filename.display(),
            child.id()
        );

        Ok(Self {
            child,
            script_path: script.script_filename.clone(),
            exit: None,
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit
    }

    /// Reap the process if it has exited.
    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        if let Some(status) = self.exit {
            return Ok(Some(status));
        }
        let status = self.child.try_wait()?;
        self.exit = status;
        Ok(status)
    }

    /// Block until the process exits and reap it.
    pub fn wait(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.exit {
            return Ok(status);
        }
        let status = self.child.wait()?;
        self.exit = Some(status);
        Ok(status)
    }

    /// Whether the leader has exited, without reaping it.
    ///
    /// A zombie leader keeps its process group id reserved, so the group
    /// can still be signalled safely afterwards.
    pub fn has_exited(&self) -> io::Result<bool> {
        if self.exit.is_some() {
            return Ok(true);
        }
        // SAFETY: siginfo_t is plain data; waitid only writes into it.
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                self.child.id() as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOHANG | libc::WNOWAIT,
            )
        };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(siginfo_pid(&info) != 0)
    }

    /// Send `signal` to the whole process group. No-op once reaped.
    pub fn signal_group(&self, signal: libc::c_int) -> io::Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        let pgid = self.child.id() as libc::pid_t;
        // SAFETY: plain syscall; the group id is pinned by our unreaped child.
        let rc = unsafe { libc::kill(-pgid, signal) };
        if rc == -1 {
            let err = io::Error::last_os_error();
            // ESRCH: every member is already gone.
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(err);
            }
        }
        Ok(())
    }

    /// SIGKILL the group and reap.
    pub fn kill(&mut self) -> io::Result<ExitStatus> {
        self.signal_group(libc::SIGKILL)?;
        self.wait()
    }
}

impl Drop for CgiProcess {
    fn drop(&mut self) {
        if self.exit.is_none() {
            if let Err(e) = self.kill() {
                warn!(
                    "failed to reap CGI process '{}' (pid {}): {}",
                    self.script_path.display(),
                    self.child.id(),
                    e
                );
            }
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn siginfo_pid(info: &libc::siginfo_t) -> libc::pid_t {
    // SAFETY: waitid filled in a SIGCHLD siginfo, or left it zeroed.
    unsafe { info.si_pid() }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn siginfo_pid(info: &libc::siginfo_t) -> libc::pid_t {
    info.si_pid
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::thread;
    use std::time::Duration;

    fn script(dir: &Path, body: &str) -> ResolvedScript {
        let path = dir.join("prog.sh");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        ResolvedScript {
            script_name: "/cgi-bin/prog.sh".to_string(),
            script_filename: path,
            path_info: String::new(),
            interpreter: None,
            timeout: None,
        }
    }

    fn base_env() -> CgiEnvironment {
        let mut env = CgiEnvironment::new();
        env.insert("PATH", "/usr/bin:/bin").unwrap();
        env
    }

    #[test]
    fn test_environment_is_not_inherited() {
        let dir = tempfile::tempdir().unwrap();
        let script = script(dir.path(), "env");
        let mut env = base_env();
        env.insert("ONLY_ME", "1").unwrap();

        let mut process = CgiProcess::spawn(&script, &env, &[], false).unwrap();
        let mut out = String::new();
        io::Read::read_to_string(&mut process.take_stdout().unwrap(), &mut out).unwrap();
        assert!(process.wait().unwrap().success());

        assert!(out.lines().any(|l| l == "ONLY_ME=1"));
        // cargo sets these for the test binary; the program must not see them.
        assert!(!out.lines().any(|l| l.starts_with("CARGO")));
        assert!(!out.lines().any(|l| l.starts_with("HOME=")));
    }

    #[test]
    fn test_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut script = script(dir.path(), "true");
        script.interpreter = Some(PathBuf::from("/no/such/interpreter"));
        let result = CgiProcess::spawn(&script, &base_env(), &[], false);
        assert!(matches!(result, Err(GatewayError::Spawn { .. })));
    }

    #[test]
    fn test_has_exited_does_not_reap() {
        let dir = tempfile::tempdir().unwrap();
        let script = script(dir.path(), "exit 3");
        let mut process = CgiProcess::spawn(&script, &base_env(), &[], false).unwrap();

        while !process.has_exited().unwrap() {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(process.exit_status().is_none());
        assert_eq!(process.wait().unwrap().code(), Some(3));
    }

    #[test]
    fn test_kill_reaps_long_runner() {
        let dir = tempfile::tempdir().unwrap();
        let script = script(dir.path(), "sleep 30");
        let mut process = CgiProcess::spawn(&script, &base_env(), &[], false).unwrap();
        let status = process.kill().unwrap();
        assert!(!status.success());
        // Signalling after reaping is a no-op.
        assert!(process.signal_group(libc::SIGTERM).is_ok());
    }
}
