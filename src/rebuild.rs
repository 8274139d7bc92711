//! # Library Rebuild Supervisor
//!
//! When the player's track count and the mirrored `library` table disagree at
//! startup, an external updater process is launched to clear and reload the
//! table. The reconciliation loop keeps running meanwhile and calls
//! [`RebuildSupervisor::drain`] once per tick.
//!
//! ## Protocol
//!
//! - argv: the library field list, pipe-delimited, as the last argument
//! - stdin: closed right after spawn
//! - stdout: free-form progress (`12.5%...25%...`), terminated by the
//!   literal [`SENTINEL`]
//! - stderr: diagnostics only, never parsed
//!
//! ## States
//!
//! ```text
//! Idle → Launched → Draining → Done
//!                      ↓
//!                    Failed   (stdout closed without the sentinel)
//! ```
//!
//! Each drain waits at most the configured poll timeout (100ms by default) on
//! both pipes, so the loop is never held up by a quiet child.

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::io::{self, Read};
use std::os::unix::io::{AsRawFd, RawFd};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::time::Duration;

/// Completion marker written by the updater as its last output.
pub const SENTINEL: &str = "snagglepuss";

const READ_CHUNK: usize = 1024;

/// Whether a rebuild should run for the given counts.
///
/// A remote count of -1 means the store could not be queried; rebuilding
/// against it would wipe a table we can't see.
pub fn should_rebuild(local_count: i64, remote_count: i64) -> bool {
    local_count >= 0 && remote_count >= 0 && local_count != remote_count
}

/// Result of one non-blocking read from a pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Nothing available yet.
    Pending,
    Data(Vec<u8>),
    /// The writer closed its end.
    Closed,
}

/// What both pipes produced during one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReads {
    pub stdout: ReadOutcome,
    pub stderr: ReadOutcome,
}

/// A running updater as seen by the supervisor.
pub trait RebuildProcess {
    /// Wait at most one poll timeout for output on either pipe, then read
    /// whatever is available without blocking.
    fn poll_output(&mut self) -> io::Result<StreamReads>;

    /// Reap the process once it is done.
    fn close(&mut self) -> io::Result<Option<ExitStatus>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildPhase {
    Idle,
    Launched,
    Draining,
    Done,
    Failed,
}

impl RebuildPhase {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Launched | Self::Draining)
    }
}

/// Output gathered by one [`RebuildSupervisor::drain`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Text for the operator, forwarded as-is.
    pub progress: Option<String>,
    pub diagnostics: Option<String>,
    /// The job left the active states during this drain.
    pub finished: bool,
}

/// Owns at most one updater job.
pub struct RebuildSupervisor {
    phase: RebuildPhase,
    job: Option<Box<dyn RebuildProcess>>,
    /// Tail of stdout that could be the start of a split sentinel.
    carry: Vec<u8>,
}

impl Default for RebuildSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl RebuildSupervisor {
    pub fn new() -> Self {
        Self {
            phase: RebuildPhase::Idle,
            job: None,
            carry: Vec::new(),
        }
    }

    pub fn phase(&self) -> RebuildPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase.is_active()
    }

    /// Start a job with `launcher`. Ignored while another job is active; a
    /// launch failure is logged and leaves the supervisor idle.
    pub fn launch<F>(&mut self, launcher: F) -> bool
    where
        F: FnOnce() -> Result<Box<dyn RebuildProcess>>,
    {
        if self.is_active() {
            debug!("Library rebuild already running, ignoring new request");
            return false;
        }

        match launcher() {
            Ok(job) => {
                info!("Library updater has opened successfully.");
                self.job = Some(job);
                self.carry.clear();
                self.phase = RebuildPhase::Launched;
                true
            }
            Err(e) => {
                error!("Unable to open library updater: {e:#}");
                self.phase = RebuildPhase::Idle;
                false
            }
        }
    }

    /// Pull whatever the job has written since the last tick.
    ///
    /// Returns `None` when no job is active.
    pub fn drain(&mut self) -> Option<DrainReport> {
        if !self.is_active() {
            return None;
        }
        self.phase = RebuildPhase::Draining;

        let job = self.job.as_mut()?;
        let reads = match job.poll_output() {
            Ok(reads) => reads,
            Err(e) => {
                error!("Reading library updater output failed: {e}");
                return Some(self.finish(RebuildPhase::Failed, DrainReport::default()));
            }
        };

        let mut report = DrainReport {
            diagnostics: match reads.stderr {
                ReadOutcome::Data(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
                ReadOutcome::Pending | ReadOutcome::Closed => None,
            },
            ..Default::default()
        };

        match reads.stdout {
            ReadOutcome::Pending => Some(report),
            ReadOutcome::Data(bytes) => {
                self.carry.extend_from_slice(&bytes);
                let (progress, done) = scan_for_sentinel(&mut self.carry);
                report.progress = progress;
                if done {
                    Some(self.finish(RebuildPhase::Done, report))
                } else {
                    Some(report)
                }
            }
            ReadOutcome::Closed => {
                let leftover = std::mem::take(&mut self.carry);
                if !leftover.is_empty() {
                    report.progress = Some(String::from_utf8_lossy(&leftover).into_owned());
                }
                warn!("Library updater closed its output without finishing");
                Some(self.finish(RebuildPhase::Failed, report))
            }
        }
    }

    fn finish(&mut self, phase: RebuildPhase, mut report: DrainReport) -> DrainReport {
        if let Some(mut job) = self.job.take() {
            match job.close() {
                Ok(Some(status)) => debug!("Library updater exited with {status}"),
                Ok(None) => debug!("Library updater closed"),
                Err(e) => warn!("Failed to reap library updater: {e}"),
            }
        }
        self.carry.clear();
        self.phase = phase;
        report.finished = true;
        report
    }
}

/// Look for the sentinel in `buffer`.
///
/// Found: returns the trimmed text before it and `true`, emptying the buffer.
/// Not found: returns everything except a trailing partial sentinel, which
/// stays in `buffer` for the next read.
pub fn scan_for_sentinel(buffer: &mut Vec<u8>) -> (Option<String>, bool) {
    let token = SENTINEL.as_bytes();

    if let Some(pos) = buffer.windows(token.len()).position(|w| w == token) {
        let text = String::from_utf8_lossy(&buffer[..pos]).trim().to_string();
        buffer.clear();
        return ((!text.is_empty()).then_some(text), true);
    }

    let keep = (1..token.len())
        .rev()
        .find(|&n| buffer.len() >= n && buffer.ends_with(&token[..n]))
        .unwrap_or(0);
    let ready: Vec<u8> = buffer.drain(..buffer.len() - keep).collect();

    if ready.is_empty() {
        (None, false)
    } else {
        (Some(String::from_utf8_lossy(&ready).into_owned()), false)
    }
}

/// An updater spawned as a real child process.
pub struct SpawnedRebuild {
    child: Child,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    poll_timeout: Duration,
    reaped: bool,
}

impl SpawnedRebuild {
    /// Spawn `program args... field_list`, close its stdin and switch both
    /// output pipes to non-blocking mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the process can't be started or its pipes can't
    /// be configured.
    pub fn spawn(
        program: &str,
        args: &[String],
        field_list: &str,
        poll_timeout: Duration,
    ) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .arg(field_list)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start library updater `{program}`"))?;

        // The updater reads nothing.
        drop(child.stdin.take());

        let stdout = child.stdout.take().context("Failed to capture updater stdout")?;
        let stderr = child.stderr.take().context("Failed to capture updater stderr")?;
        set_nonblocking(stdout.as_raw_fd()).context("Failed to make updater stdout non-blocking")?;
        set_nonblocking(stderr.as_raw_fd()).context("Failed to make updater stderr non-blocking")?;

        Ok(Self {
            child,
            stdout: Some(stdout),
            stderr: Some(stderr),
            poll_timeout,
            reaped: false,
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }
}

impl RebuildProcess for SpawnedRebuild {
    fn poll_output(&mut self) -> io::Result<StreamReads> {
        let fds: Vec<RawFd> = [
            self.stdout.as_ref().map(AsRawFd::as_raw_fd),
            self.stderr.as_ref().map(AsRawFd::as_raw_fd),
        ]
        .into_iter()
        .flatten()
        .collect();
        wait_readable(&fds, self.poll_timeout)?;

        Ok(StreamReads {
            stdout: read_stream(&mut self.stdout)?,
            stderr: read_stream(&mut self.stderr)?,
        })
    }

    fn close(&mut self) -> io::Result<Option<ExitStatus>> {
        self.stdout = None;
        self.stderr = None;
        if self.reaped {
            return Ok(None);
        }
        let status = self.child.wait()?;
        self.reaped = true;
        Ok(Some(status))
    }
}

impl Drop for SpawnedRebuild {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        if let Ok(None) = self.child.try_wait() {
            warn!("Terminating unfinished library updater (PID {})", self.child.id());
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

/// Read a pipe until it would block; `None` means it was closed earlier.
fn read_stream<R: Read>(stream: &mut Option<R>) -> io::Result<ReadOutcome> {
    let Some(reader) = stream.as_mut() else {
        return Ok(ReadOutcome::Closed);
    };

    let outcome = read_available(reader)?;
    if outcome == ReadOutcome::Closed {
        *stream = None;
    }
    Ok(outcome)
}

/// Non-blocking read of everything currently in the pipe.
pub fn read_available<R: Read>(reader: &mut R) -> io::Result<ReadOutcome> {
    let mut buf = [0u8; READ_CHUNK];
    let mut data = Vec::new();

    loop {
        match reader.read(&mut buf) {
            // EOF after data: report the data now, the close on the next call.
            Ok(0) if data.is_empty() => return Ok(ReadOutcome::Closed),
            Ok(0) => return Ok(ReadOutcome::Data(data)),
            Ok(n) => data.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Ok(if data.is_empty() {
                    ReadOutcome::Pending
                } else {
                    ReadOutcome::Data(data)
                });
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: `fd` is an open pipe owned by the caller for the whole call.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Block until one of `fds` is readable or `timeout` passes.
fn wait_readable(fds: &[RawFd], timeout: Duration) -> io::Result<()> {
    if fds.is_empty() {
        return Ok(());
    }

    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();
    let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);

    // SAFETY: `pollfds` is a live, correctly sized buffer of pollfd structs.
    let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::time::Instant;

    /// Replays scripted reads, records `close` calls.
    struct ScriptedProcess {
        reads: VecDeque<StreamReads>,
        closed: Rc<RefCell<u32>>,
    }

    impl RebuildProcess for ScriptedProcess {
        fn poll_output(&mut self) -> io::Result<StreamReads> {
            Ok(self.reads.pop_front().unwrap_or(StreamReads {
                stdout: ReadOutcome::Pending,
                stderr: ReadOutcome::Pending,
            }))
        }

        fn close(&mut self) -> io::Result<Option<ExitStatus>> {
            *self.closed.borrow_mut() += 1;
            Ok(None)
        }
    }

    fn stdout(text: &str) -> StreamReads {
        StreamReads {
            stdout: ReadOutcome::Data(text.as_bytes().to_vec()),
            stderr: ReadOutcome::Pending,
        }
    }

    fn supervisor_with(reads: Vec<StreamReads>) -> (RebuildSupervisor, Rc<RefCell<u32>>) {
        let closed = Rc::new(RefCell::new(0));
        let process = ScriptedProcess {
            reads: reads.into(),
            closed: Rc::clone(&closed),
        };
        let mut supervisor = RebuildSupervisor::new();
        assert!(supervisor.launch(|| Ok(Box::new(process) as Box<dyn RebuildProcess>)));
        (supervisor, closed)
    }

    #[test]
    fn test_should_rebuild() {
        assert!(should_rebuild(120, 100));
        assert!(should_rebuild(0, 5));
        assert!(!should_rebuild(100, 100));
        assert!(!should_rebuild(-1, 100));
        assert!(!should_rebuild(100, -1));
        assert!(!should_rebuild(-1, -1));
    }

    #[test]
    fn test_sentinel_ends_job() {
        let (mut supervisor, closed) = supervisor_with(vec![stdout("Updating library...done.snagglepuss")]);
        assert_eq!(supervisor.phase(), RebuildPhase::Launched);

        let report = supervisor.drain().expect("job is active");

        assert_eq!(report.progress.as_deref(), Some("Updating library...done."));
        assert!(report.finished);
        assert_eq!(supervisor.phase(), RebuildPhase::Done);
        assert_eq!(*closed.borrow(), 1);
        assert!(supervisor.drain().is_none());
    }

    #[test]
    fn test_progress_without_sentinel_is_forwarded_verbatim() {
        let (mut supervisor, closed) = supervisor_with(vec![stdout("12.5%...25%...")]);

        let report = supervisor.drain().expect("job is active");

        assert_eq!(report.progress.as_deref(), Some("12.5%...25%..."));
        assert!(!report.finished);
        assert_eq!(supervisor.phase(), RebuildPhase::Draining);
        assert_eq!(*closed.borrow(), 0);
    }

    #[test]
    fn test_sentinel_split_across_reads() {
        let (mut supervisor, _closed) =
            supervisor_with(vec![stdout("50%...snag"), stdout("glepuss")]);

        let first = supervisor.drain().expect("job is active");
        assert_eq!(first.progress.as_deref(), Some("50%..."));
        assert!(supervisor.is_active());

        let second = supervisor.drain().expect("job is active");
        assert_eq!(second.progress, None);
        assert!(second.finished);
        assert_eq!(supervisor.phase(), RebuildPhase::Done);
    }

    #[test]
    fn test_stderr_is_diagnostic_only() {
        let (mut supervisor, _closed) = supervisor_with(vec![StreamReads {
            stdout: ReadOutcome::Pending,
            stderr: ReadOutcome::Data(b"snagglepuss from stderr".to_vec()),
        }]);

        let report = supervisor.drain().expect("job is active");

        assert_eq!(report.diagnostics.as_deref(), Some("snagglepuss from stderr"));
        assert!(!report.finished);
        assert!(supervisor.is_active());
    }

    #[test]
    fn test_closed_without_sentinel_fails() {
        let (mut supervisor, closed) = supervisor_with(vec![
            stdout("10%..."),
            StreamReads {
                stdout: ReadOutcome::Closed,
                stderr: ReadOutcome::Closed,
            },
        ]);

        supervisor.drain();
        let report = supervisor.drain().expect("job is active");

        assert!(report.finished);
        assert_eq!(supervisor.phase(), RebuildPhase::Failed);
        assert_eq!(*closed.borrow(), 1);
    }

    #[test]
    fn test_launch_failure_stays_idle() {
        let mut supervisor = RebuildSupervisor::new();
        let launched = supervisor.launch(|| anyhow::bail!("no such file"));

        assert!(!launched);
        assert_eq!(supervisor.phase(), RebuildPhase::Idle);
        assert!(supervisor.drain().is_none());
    }

    #[test]
    fn test_second_launch_ignored_while_active() {
        let (mut supervisor, _closed) = supervisor_with(vec![]);
        let mut called = false;

        let launched = supervisor.launch(|| {
            called = true;
            anyhow::bail!("should not run")
        });

        assert!(!launched);
        assert!(!called);
        assert!(supervisor.is_active());
    }

    #[test]
    fn test_scan_keeps_only_sentinel_prefix() {
        let mut buffer = b"99%...sn".to_vec();
        let (text, done) = scan_for_sentinel(&mut buffer);

        assert_eq!(text.as_deref(), Some("99%..."));
        assert!(!done);
        assert_eq!(buffer, b"sn");
    }

    #[test]
    fn test_spawned_process_reaches_done() -> Result<()> {
        let mut supervisor = RebuildSupervisor::new();
        let launched = supervisor.launch(|| {
            let args = vec!["-c".to_string(), "printf 'fields=%s ' \"$0\"; printf snagglepuss".to_string()];
            Ok(Box::new(SpawnedRebuild::spawn(
                "sh",
                &args,
                "artist|title",
                Duration::from_millis(100),
            )?) as Box<dyn RebuildProcess>)
        });
        assert!(launched);

        let mut progress = String::new();
        let deadline = Instant::now() + Duration::from_secs(10);
        while supervisor.is_active() && Instant::now() < deadline {
            if let Some(text) = supervisor.drain().and_then(|r| r.progress) {
                progress.push_str(&text);
            }
        }

        assert_eq!(supervisor.phase(), RebuildPhase::Done);
        assert_eq!(progress.trim(), "fields=artist|title");
        Ok(())
    }

    #[test]
    fn test_spawn_failure_is_an_error() {
        let result = SpawnedRebuild::spawn("/nonexistent/updater", &[], "a|b", Duration::from_millis(10));
        assert!(result.is_err());
    }

    #[test]
    fn test_read_available_reports_close() -> Result<()> {
        let mut empty: &[u8] = b"";
        assert_eq!(read_available(&mut empty)?, ReadOutcome::Closed);

        let mut some: &[u8] = b"abc";
        assert_eq!(read_available(&mut some)?, ReadOutcome::Data(b"abc".to_vec()));
        Ok(())
    }
}
