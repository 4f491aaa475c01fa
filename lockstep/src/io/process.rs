//! Execution harness: run the learner's program once per test.
//!
//! Each test gets a fresh child with piped stdin/stdout. Input is written a
//! line at a time (flushing after each) from a writer thread while a reader
//! thread drains stdout, so neither side can deadlock on a full pipe.
//!
//! On unix the child leads its own process group. The deadline covers both
//! the child's exit and the end of its stdout; when either overruns, the
//! whole group is killed so nothing the program started outlives the test.
//! The group is also killed after a normal exit, which reaps background
//! jobs left holding the pipes.

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::types::TestDescription;
use crate::io::config::{DEFAULT_OUTPUT_LIMIT_BYTES, ProjectConfig};

/// Why the target program could not be driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnCause {
    NotFound,
    PermissionDenied,
    /// The program exited before reading its input.
    BrokenPipe,
    Other,
}

impl SpawnCause {
    pub fn classify(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => SpawnCause::NotFound,
            io::ErrorKind::PermissionDenied => SpawnCause::PermissionDenied,
            io::ErrorKind::BrokenPipe => SpawnCause::BrokenPipe,
            _ => SpawnCause::Other,
        }
    }
}

#[derive(Debug, Error)]
#[error("could not run {program:?}: {source}")]
pub struct SpawnError {
    pub cause: SpawnCause,
    pub program: String,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error("test [{test}] timed out after {}s", .timeout.as_secs_f32())]
    Timeout { test: String, timeout: Duration },
    #[error("test [{test}] printed more than {limit} bytes")]
    OutputLimit { test: String, limit: usize },
    #[error("no target program configured")]
    EmptyCommand,
}

/// How to launch the target and feed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub args: Vec<String>,
    pub shell: bool,
    pub input_path: Option<PathBuf>,
    pub skip_lines: usize,
    pub timeout: Duration,
    pub output_limit: usize,
}

impl Target {
    pub fn from_config(cfg: &ProjectConfig) -> Self {
        Self {
            args: cfg.target.args.clone(),
            shell: cfg.target.shell,
            input_path: cfg.input_path(),
            skip_lines: cfg.skip_lines,
            timeout: Duration::from_secs(cfg.timeout_secs),
            output_limit: cfg.output_limit_bytes,
        }
    }

    /// Run `args` directly with the default deadline and output limit.
    pub fn new(args: Vec<String>) -> Self {
        Self {
            args,
            shell: false,
            input_path: None,
            skip_lines: 0,
            timeout: Duration::from_secs(5),
            output_limit: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }

    /// Name used in error messages: the command itself, not the shell.
    pub fn program(&self) -> String {
        match self.args.split_first() {
            Some((flag, rest)) if flag == "-c" => rest.first().cloned().unwrap_or_default(),
            Some((first, _)) => first.clone(),
            None => String::new(),
        }
    }

    fn command(&self) -> Result<Command, HarnessError> {
        let (shell, words): (bool, &[String]) = match self.args.split_first() {
            Some((flag, rest)) if flag == "-c" => (true, rest),
            _ => (self.shell, &self.args),
        };
        if words.is_empty() || words[0].trim().is_empty() {
            return Err(HarnessError::EmptyCommand);
        }
        let mut cmd = if shell {
            shell_command(&words.join(" "))
        } else {
            let mut cmd = Command::new(&words[0]);
            cmd.args(&words[1..]);
            cmd
        };
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        Ok(cmd)
    }
}

#[cfg(unix)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(line);
    cmd
}

#[cfg(windows)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(line.replace('/', "\\"));
    cmd
}

/// Run one test and return its normalized output lines.
///
/// With `input_path` set, the input lines are written to that file before
/// spawning and the child's stdin is closed immediately.
#[instrument(skip_all, fields(test = %test.name, timeout_secs = target.timeout.as_secs()))]
pub fn run_test(target: &Target, test: &TestDescription) -> Result<Vec<String>, HarnessError> {
    let mut cmd = target.command()?;
    let spawn_err = |source: io::Error| SpawnError {
        cause: SpawnCause::classify(&source),
        program: target.program(),
        source,
    };

    if let Some(path) = &target.input_path {
        fs::write(path, joined_lines(&test.ilines)).map_err(spawn_err)?;
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());

    debug!(program = %target.program(), "spawning target");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn target");
            return Err(spawn_err(e).into());
        }
    };

    let stdin = child.stdin.take();
    let feed = if target.input_path.is_some() {
        Vec::new()
    } else {
        test.ilines.clone()
    };
    let writer = thread::spawn(move || -> io::Result<()> {
        let Some(mut stdin) = stdin else {
            return Ok(());
        };
        for line in &feed {
            stdin.write_all(line.as_bytes())?;
            stdin.write_all(b"\n")?;
            stdin.flush()?;
        }
        Ok(())
    });

    let started = Instant::now();
    let stdout = child.stdout.take();
    let limit = target.output_limit;
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let result = match stdout {
            Some(stdout) => read_stream_limited(stdout, limit),
            None => Ok((Vec::new(), 0)),
        };
        // The receiver is gone once the deadline has passed.
        let _ = tx.send(result);
    });

    let timed_out = || HarnessError::Timeout {
        test: test.name.clone(),
        timeout: target.timeout,
    };

    let status = match child.wait_timeout(target.timeout).map_err(spawn_err)? {
        Some(status) => status,
        None => {
            warn!(timeout_secs = target.timeout.as_secs_f32(), "target timed out, killing");
            stop(&mut child).map_err(spawn_err)?;
            return Err(timed_out());
        }
    };

    let remaining = target.timeout.saturating_sub(started.elapsed());
    let drained = match rx.recv_timeout(remaining) {
        Ok(drained) => drained,
        Err(RecvTimeoutError::Timeout) => {
            warn!(
                timeout_secs = target.timeout.as_secs_f32(),
                "target exited but its output stayed open, killing"
            );
            stop(&mut child).map_err(spawn_err)?;
            return Err(timed_out());
        }
        Err(RecvTimeoutError::Disconnected) => Err(io::Error::other("output reader panicked")),
    };
    kill_group(&child);

    if let Err(e) = join(writer) {
        warn!(err = %e, "target stopped reading input");
        return Err(spawn_err(e).into());
    }
    let (raw, truncated) = drained.map_err(spawn_err)?;
    if truncated > 0 {
        warn!(limit, truncated, "target output over limit");
        return Err(HarnessError::OutputLimit {
            test: test.name.clone(),
            limit,
        });
    }

    debug!(exit_code = ?status.code(), bytes = raw.len(), "target finished");
    Ok(normalize_output(
        &String::from_utf8_lossy(&raw),
        target.skip_lines,
    ))
}

/// Kill the child and everything in its process group, then reap it.
fn stop(child: &mut Child) -> io::Result<()> {
    kill_group(child);
    match child.kill() {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::InvalidInput => {}
        Err(e) => return Err(e),
    }
    child.wait().map(drop)
}

#[cfg(unix)]
fn kill_group(child: &Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: kill(2) takes no pointers. The negated pid addresses the group
    // this child was placed in by `process_group(0)`.
    #[allow(unsafe_code)]
    let result = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if result != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(err = %err, pgid, "could not kill target process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

/// Read to EOF, keeping at most `limit` bytes. Returns what was kept and
/// how many bytes were dropped.
fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> io::Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

fn join<T>(handle: thread::JoinHandle<io::Result<T>>) -> io::Result<T> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(io::Error::other("pipe thread panicked")),
    }
}

fn joined_lines(lines: &[String]) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Trim each line, drop `skip` leading lines, then drop trailing blanks.
pub fn normalize_output(raw: &str, skip: usize) -> Vec<String> {
    let mut lines: Vec<String> = raw
        .lines()
        .skip(skip)
        .map(|line| line.trim().to_string())
        .collect();
    while lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }
    lines
}
