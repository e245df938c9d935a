//! External process invocation with a bounded timeout

use std::io::{self, Read};
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Interval between child status polls
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `None` if killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.status, Some(0))
    }

    /// Short failure description for error reporting
    #[must_use]
    pub fn failure_detail(&self) -> String {
        let code = self
            .status
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("exited with code {code}")
        } else {
            format!("exited with code {code}: {stderr}")
        }
    }
}

/// Runs external programs on behalf of capability drivers
///
/// Implementations block the calling thread until the program exits or
/// the timeout elapses
pub trait ProcessRunner: Send + Sync {
    /// Run `program` with `args`, waiting at most `timeout`
    ///
    /// # Errors
    ///
    /// Returns error if the program cannot be spawned, or
    /// `io::ErrorKind::TimedOut` if it did not finish in time
    fn run(&self, program: &str, args: &[String], timeout: Duration) -> io::Result<ProcessOutput>;
}

/// Runs programs as real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String], timeout: Duration) -> io::Result<ProcessOutput> {
        tracing::debug!(program, ?args, "running external command");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Pipes are drained while the child runs so a chatty tool never
        // blocks on a full pipe buffer
        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                // Readers finish on their own once every holder of the pipes exits
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("{program} timed out after {timeout:?}"),
                ));
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        Ok(ProcessOutput {
            status: status.code(),
            stdout: collect(stdout),
            stderr: collect(stderr),
        })
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn collect(reader: Option<JoinHandle<String>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}
