//! Interactive child-process plumbing
//!
//! [`ShellProcess`] owns one spawned shell: piped stdin for sending lines,
//! and one pipe shared by stdout and stderr. The shell writes both streams
//! into the same pipe, so their relative order survives. A reader thread
//! drains that pipe into a bounded channel so the caller can block on a
//! pattern without deadlocking on a full pipe.
//!
//! Matching works against an accumulating buffer of decoded output. A match
//! consumes everything up to its end; the consumed text before the match and
//! the matched text itself stay available as `before`/`after` for
//! diagnostics.
//!
//! ## Memory ceiling
//!
//! The channel holds at most `max_buffer / read_chunk + 1` chunks. Once it
//! is full the reader stops draining the pipe and the shell blocks on its
//! next write, so a runaway producer costs at most the buffer ceiling plus
//! one channel's worth of chunks, whether or not an expectation is running.
//!
//! ## Termination
//!
//! Teardown never waits for the shell to finish on its own. On Unix the child
//! gets SIGINT, then SIGTERM, then SIGKILL, each after a short grace period.
//! On Windows it is killed outright.

use std::ffi::OsString;
use std::io::{PipeReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use regex::Regex;
use wait_timeout::ChildExt;

use crate::error::HarnessError;

#[cfg(windows)]
const LINE_ENDING: &str = "\r\n";
#[cfg(not(windows))]
const LINE_ENDING: &str = "\n";

/// Everything needed to start a [`ShellProcess`].
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// The child's complete environment; nothing is inherited
    pub env: Vec<(OsString, OsString)>,
    pub timeout: Duration,
    pub read_chunk: usize,
    pub max_buffer: usize,
    pub kill_grace: Duration,
}

impl SpawnSpec {
    /// Chunks the reader may queue ahead of the consumer.
    fn channel_capacity(&self) -> usize {
        self.max_buffer / self.read_chunk.max(1) + 1
    }
}

/// What an expectation looks for.
#[derive(Debug, Clone)]
pub enum Pattern {
    Regex(Regex),
    Exact(String),
}

impl Pattern {
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self::Regex)
    }

    pub fn exact(literal: impl Into<String>) -> Self {
        Self::Exact(literal.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Regex(regex) => regex.as_str(),
            Self::Exact(literal) => literal,
        }
    }

    /// Leftmost match in `haystack` as (start, end, capture groups).
    fn find(&self, haystack: &str) -> Option<(usize, usize, Vec<Option<String>>)> {
        match self {
            Self::Regex(regex) => {
                let captures = regex.captures(haystack)?;
                let whole = captures.get(0)?;
                let groups = captures
                    .iter()
                    .map(|group| group.map(|m| m.as_str().to_string()))
                    .collect();
                Some((whole.start(), whole.end(), groups))
            }
            Self::Exact(literal) => {
                let start = haystack.find(literal.as_str())?;
                let end = start + literal.len();
                Some((start, end, vec![Some(literal.clone())]))
            }
        }
    }
}

/// A successful expectation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Output consumed ahead of the match
    pub before: String,
    /// The matched text
    pub after: String,
    groups: Vec<Option<String>>,
}

impl Match {
    /// Capture group `index`; 0 is the whole match.
    pub fn group(&self, index: usize) -> Option<&str> {
        self.groups.get(index)?.as_deref()
    }
}

/// Result of one blocking expectation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectOutcome {
    Matched(Match),
    /// The deadline passed without a match
    TimedOut,
    /// The shell's output reached end of file
    Closed,
    /// Unconsumed output exceeded the buffer ceiling
    Overflow,
}

enum ReadEvent {
    Data(Vec<u8>),
    Eof,
}

/// Incremental UTF-8 decoding that tolerates sequences split across reads.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Incomplete sequence at the end: wait for more bytes
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            log::warn!("Replacing invalid UTF-8 in shell output");
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// A spawned shell with exclusive ownership of its I/O.
pub struct ShellProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    events: Receiver<ReadEvent>,
    decoder: Utf8Decoder,
    closed: bool,
    buffer: String,
    before: String,
    after: String,
    timeout: Duration,
    max_buffer: usize,
    kill_grace: Duration,
    status: Option<ExitStatus>,
}

impl ShellProcess {
    pub fn spawn(spec: &SpawnSpec) -> Result<Self, HarnessError> {
        log::debug!(
            "$ {} {} [cwd={}]",
            spec.program.display(),
            spec.args.join(" "),
            spec.cwd.display()
        );

        let (output, writer) =
            std::io::pipe().map_err(|e| HarnessError::io("Failed to create output pipe", e))?;
        let stderr = writer
            .try_clone()
            .map_err(|e| HarnessError::io("Failed to create output pipe", e))?;

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .env_clear()
            .envs(spec.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(writer)
            .stderr(stderr);
        let spawned = command.spawn();
        // The command holds our copies of the write end; EOF only arrives once they are gone
        drop(command);
        let mut child = spawned.map_err(|e| {
            HarnessError::io(format!("Failed to spawn {}", spec.program.display()), e)
        })?;

        let (tx, events) = crossbeam_channel::bounded(spec.channel_capacity());
        if let Err(e) = spawn_reader(output, spec.read_chunk, tx) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(HarnessError::io("Failed to start output reader", e));
        }

        Ok(Self {
            stdin: child.stdin.take(),
            child,
            events,
            decoder: Utf8Decoder::default(),
            closed: false,
            buffer: String::new(),
            before: String::new(),
            after: String::new(),
            timeout: spec.timeout,
            max_buffer: spec.max_buffer,
            kill_grace: spec.kill_grace,
            status: None,
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Output consumed ahead of the last match, or all unconsumed output after a failure.
    pub fn before(&self) -> &str {
        &self.before
    }

    /// Text of the last match; empty after a failure.
    pub fn after(&self) -> &str {
        &self.after
    }

    /// Output received but not yet consumed by a match.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Write `line` plus the host line terminator.
    pub fn send_line(&mut self, line: &str) -> Result<(), HarnessError> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(HarnessError::io(
                "Failed to write to shell",
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin is closed"),
            ));
        };
        log::debug!("> {line}");
        stdin
            .write_all(line.as_bytes())
            .and_then(|()| stdin.write_all(LINE_ENDING.as_bytes()))
            .and_then(|()| stdin.flush())
            .map_err(|e| HarnessError::io("Failed to write to shell", e))
    }

    /// Block until `pattern` appears in unconsumed output, or the deadline,
    /// end of output, or the buffer ceiling is reached.
    pub fn expect(&mut self, pattern: &Pattern) -> ExpectOutcome {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some((start, end, groups)) = pattern.find(&self.buffer) {
                let rest = self.buffer.split_off(end);
                let matched = std::mem::replace(&mut self.buffer, rest);
                self.before = matched[..start].to_string();
                self.after = matched[start..].to_string();
                return ExpectOutcome::Matched(Match {
                    before: self.before.clone(),
                    after: self.after.clone(),
                    groups,
                });
            }

            if self.buffer.len() > self.max_buffer {
                return self.fail(ExpectOutcome::Overflow);
            }
            if self.closed {
                return self.fail(ExpectOutcome::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return self.fail(ExpectOutcome::TimedOut);
            }

            match self.events.recv_timeout(deadline - now) {
                Ok(event) => {
                    self.ingest(event);
                    // Take whatever else already arrived, up to the ceiling, before scanning again
                    while self.buffer.len() <= self.max_buffer {
                        let Ok(event) = self.events.try_recv() else {
                            break;
                        };
                        self.ingest(event);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => self.closed = true,
            }
        }
    }

    fn fail(&mut self, outcome: ExpectOutcome) -> ExpectOutcome {
        self.before = self.buffer.clone();
        self.after.clear();
        outcome
    }

    fn ingest(&mut self, event: ReadEvent) {
        match event {
            ReadEvent::Data(bytes) => {
                let text = self.decoder.decode(&bytes);
                log::trace!("< {text:?}");
                self.buffer.push_str(&text);
            }
            ReadEvent::Eof => {
                let rest = self.decoder.finish();
                self.buffer.push_str(&rest);
                self.closed = true;
                log::trace!("< EOF");
            }
        }
    }

    pub fn is_alive(&mut self) -> bool {
        self.status.is_none() && matches!(self.child.try_wait(), Ok(None))
    }

    /// Stop the child without waiting for it to exit on its own.
    ///
    /// Idempotent: later calls return the first exit status.
    pub fn terminate(&mut self) -> Result<ExitStatus, HarnessError> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let pid = self.pid();
        let status = interrupt_with_escalation(&mut self.child, self.kill_grace)
            .map_err(|e| HarnessError::io(format!("Failed to terminate shell {pid}"), e))?;
        drop(self.stdin.take());
        log::debug!("Shell {pid} exited: {status}");
        self.status = Some(status);
        Ok(status)
    }
}

impl Drop for ShellProcess {
    fn drop(&mut self) {
        if self.status.is_none()
            && let Err(e) = self.terminate()
        {
            log::warn!("{e}");
        }
    }
}

/// Drain the shared output pipe. Blocks on `send` while the channel is full,
/// which in turn stops the shell at its next write.
fn spawn_reader(
    mut source: PipeReader,
    chunk: usize,
    tx: Sender<ReadEvent>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("shell-output".into())
        .spawn(move || {
            let mut buf = vec![0u8; chunk.max(1)];
            loop {
                match source.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(ReadEvent::Data(buf[..n].to_vec())).is_err() {
                            return;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        log::debug!("Shell output read error: {e}");
                        break;
                    }
                }
            }
            let _ = tx.send(ReadEvent::Eof);
        })
}

#[cfg(unix)]
fn interrupt_with_escalation(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let pid = Pid::from_raw(child.id() as i32);
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        match kill(pid, signal) {
            Ok(()) => {}
            // Already reaped elsewhere
            Err(nix::errno::Errno::ESRCH) => return child.wait(),
            Err(e) => return Err(e.into()),
        }
        if let Some(status) = child.wait_timeout(grace)? {
            return Ok(status);
        }
        log::debug!("Shell {pid} ignored {signal}; escalating");
    }
    child.kill()?;
    child.wait()
}

#[cfg(not(unix))]
fn interrupt_with_escalation(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }
    child.kill()?;
    match child.wait_timeout(grace)? {
        Some(status) => Ok(status),
        None => child.wait(),
    }
}

/// Execute a one-shot command with timing and debug logging.
///
/// ```text
/// $ cygpath -u C:\Users [path]
/// [harness-trace] context=path cmd="..." dur=12.3ms ok=true
/// ```
pub fn run(cmd: &mut Command, context: Option<&str>) -> std::io::Result<std::process::Output> {
    let program = cmd.get_program().to_string_lossy();
    let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy()).collect();
    let cmd_str = if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    };

    match context {
        Some(ctx) => log::debug!("$ {} [{}]", cmd_str, ctx),
        None => log::debug!("$ {}", cmd_str),
    }

    let t0 = Instant::now();
    let result = cmd.output();
    let duration_ms = t0.elapsed().as_secs_f64() * 1000.0;

    let context = context.map(|ctx| format!("context={ctx} ")).unwrap_or_default();
    match &result {
        Ok(output) => log::debug!(
            "[harness-trace] {context}cmd=\"{cmd_str}\" dur={duration_ms:.1}ms ok={}",
            output.status.success()
        ),
        Err(e) => log::debug!(
            "[harness-trace] {context}cmd=\"{cmd_str}\" dur={duration_ms:.1}ms err=\"{e}\""
        ),
    }

    result
}
