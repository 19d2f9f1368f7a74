use crate::common::constants::DEFAULT_BUFFER_SIZE;
use log::{debug, warn};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::{ChildStderr, ChildStdin, ChildStdout};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// Write the request body to the program's stdin on a helper thread, then
/// close it. A program that exits without reading everything is not an
/// error.
pub fn feed_stdin(mut stdin: ChildStdin, body: Vec<u8>) -> io::Result<()> {
    thread::Builder::new()
        .name("cgi-stdin".to_string())
        .spawn(move || {
            match stdin.write_all(&body).and_then(|_| stdin.flush()) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    debug!("CGI program closed stdin before reading the whole body");
                }
                Err(e) => warn!("failed to write request body to CGI program: {}", e),
            }
            // stdin dropped here: the program sees EOF.
        })?;
    Ok(())
}

/// Forward each line the program writes to stderr into the log.
pub fn forward_stderr(stderr: ChildStderr, script: String) -> io::Result<()> {
    thread::Builder::new()
        .name("cgi-stderr".to_string())
        .spawn(move || {
            let reader = BufReader::new(stderr);
            for line in reader.split(b'\n') {
                match line {
                    Ok(line) => warn!("[{}] {}", script, String::from_utf8_lossy(&line).trim_end()),
                    Err(_) => break,
                }
            }
        })?;
    Ok(())
}

/// Drains the program's stdout on a helper thread until EOF, or until more
/// than `limit` bytes have arrived.
pub struct OutputCapture {
    rx: Receiver<io::Result<Vec<u8>>>,
    result: Option<io::Result<Vec<u8>>>,
    limit: usize,
}

impl OutputCapture {
    pub fn start(stdout: ChildStdout, limit: usize) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("cgi-stdout".to_string())
            .spawn(move || {
                let capacity = DEFAULT_BUFFER_SIZE.min(limit.saturating_add(1));
                let mut output = Vec::with_capacity(capacity);
                // One byte past the limit is enough to tell an overflow apart.
                let result = stdout
                    .take((limit as u64).saturating_add(1))
                    .read_to_end(&mut output)
                    .map(|_| output);
                // The receiver is gone when the invocation was abandoned.
                let _ = tx.send(result);
            })?;
        Ok(Self {
            rx,
            result: None,
            limit,
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Whether the program wrote more than the limit. Reading stopped there.
    pub fn exceeded_limit(&self) -> bool {
        matches!(self.result, Some(Ok(ref output)) if output.len() > self.limit)
    }

    /// Wait up to `timeout` for EOF. Returns true once the output is complete.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        if self.result.is_some() {
            return true;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(result) => {
                self.result = Some(result);
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                self.result = Some(Err(io::Error::new(
                    io::ErrorKind::Other,
                    "stdout reader thread exited without a result",
                )));
                true
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.result.is_some()
    }

    /// The captured bytes. Call after [`wait`](OutputCapture::wait) returned true.
    pub fn into_output(self) -> io::Result<Vec<u8>> {
        self.result.unwrap_or_else(|| {
            Err(io::Error::new(
                io::ErrorKind::Other,
                "stdout capture did not complete",
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    #[test]
    fn test_capture_and_feed() {
        let mut child = Command::new("cat")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        feed_stdin(child.stdin.take().unwrap(), b"ping".to_vec()).unwrap();
        let mut capture = OutputCapture::start(child.stdout.take().unwrap(), 1024).unwrap();

        assert!(capture.wait(Duration::from_secs(10)));
        assert!(capture.is_complete());
        assert!(!capture.exceeded_limit());
        assert_eq!(capture.into_output().unwrap(), b"ping");
        assert!(child.wait().unwrap().success());
    }

    #[test]
    fn test_incomplete_capture() {
        let mut child = Command::new("sleep")
            .arg("5")
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let mut capture = OutputCapture::start(child.stdout.take().unwrap(), 1024).unwrap();
        assert!(!capture.wait(Duration::from_millis(20)));
        assert!(capture.into_output().is_err());
        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn test_capture_stops_past_limit() {
        let mut child = Command::new("sh")
            .args(["-c", "head -c 100000 /dev/zero"])
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let mut capture = OutputCapture::start(child.stdout.take().unwrap(), 16).unwrap();

        assert!(capture.wait(Duration::from_secs(10)));
        assert!(capture.exceeded_limit());
        assert_eq!(capture.into_output().unwrap().len(), 17);
        child.kill().ok();
        child.wait().unwrap();
    }

    #[test]
    fn test_output_at_limit_is_complete() {
        let mut child = Command::new("printf")
            .arg("0123456789")
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let mut capture = OutputCapture::start(child.stdout.take().unwrap(), 10).unwrap();

        assert!(capture.wait(Duration::from_secs(10)));
        assert!(!capture.exceeded_limit());
        assert_eq!(capture.into_output().unwrap(), b"0123456789");
        child.wait().unwrap();
    }
}
