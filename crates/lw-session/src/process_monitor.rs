//! ProcessOutputMonitor: one reader task per monitored process.
//!
//! Every output line is kept in a bounded history. Lines that match a
//! diagnostic rule are also recorded as errors and forwarded as process
//! [`Signal`]s. Matching happens inline on the reader task, so it is a single
//! pass over a precompiled rule table.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lw_core::config::{ProcessCommand, ProcessConfig};
use lw_core::types::{IssueType, Severity, Signal, SignalSource};
use lw_harness::{ShutdownListener, ShutdownSignal};
use lw_intelligence::rules;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bounded::ProcessError;

/// Longest line kept from a monitored stream. The rest of an overlong line is
/// read and discarded.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputLine {
    pub process: String,
    pub stream: Stream,
    pub line: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEntry {
    pub process: String,
    pub issue_type: IssueType,
    pub severity: Severity,
    pub line: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessStatus {
    pub name: String,
    pub pid: Option<u32>,
    pub running: bool,
    pub exit_code: Option<i32>,
    pub lines_seen: u64,
    pub error_count: u64,
    pub started_at: DateTime<Utc>,
}

struct Shared {
    sink: flume::Sender<Signal>,
    history: Mutex<VecDeque<OutputLine>>,
    errors: Mutex<VecDeque<ErrorEntry>>,
    procs: Mutex<HashMap<String, ProcessStatus>>,
    history_capacity: usize,
    error_capacity: usize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn push_bounded<T>(buf: &mut VecDeque<T>, item: T, capacity: usize) {
    if buf.len() >= capacity {
        buf.pop_front();
    }
    buf.push_back(item);
}

impl Shared {
    fn ingest(&self, process: &str, stream: Stream, line: String) {
        let at = Utc::now();
        let matched = rules::match_diagnostic(&line);

        if let Some(status) = lock(&self.procs).get_mut(process) {
            status.lines_seen += 1;
            if matched.is_some() {
                status.error_count += 1;
            }
        }

        if let Some(rule) = matched {
            push_bounded(
                &mut lock(&self.errors),
                ErrorEntry {
                    process: process.to_string(),
                    issue_type: rule.issue_type,
                    severity: rule.severity,
                    line: line.clone(),
                    at,
                },
                self.error_capacity,
            );
            let signal = Signal::text(SignalSource::Process, line.clone()).with_file(process);
            if self.sink.send(signal).is_err() {
                debug!(process, "signal sink closed, dropping process error");
            }
        }

        push_bounded(
            &mut lock(&self.history),
            OutputLine {
                process: process.to_string(),
                stream,
                line,
                at,
            },
            self.history_capacity,
        );
    }

    fn mark_exited(&self, process: &str, exit_code: Option<i32>) {
        if let Some(status) = lock(&self.procs).get_mut(process) {
            status.running = false;
            status.exit_code = exit_code;
        }
    }
}

struct Monitored {
    stop: ShutdownSignal,
    task: JoinHandle<()>,
}

/// Watches the output of any number of named processes.
pub struct ProcessOutputMonitor {
    shared: Arc<Shared>,
    tasks: Mutex<HashMap<String, Monitored>>,
}

impl ProcessOutputMonitor {
    pub fn new(config: &ProcessConfig, sink: flume::Sender<Signal>) -> Self {
        Self {
            shared: Arc::new(Shared {
                sink,
                history: Mutex::new(VecDeque::new()),
                errors: Mutex::new(VecDeque::new()),
                procs: Mutex::new(HashMap::new()),
                history_capacity: config.history_capacity.max(1),
                error_capacity: config.error_log_capacity.max(1),
            }),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn register(&self, name: &str, pid: Option<u32>) -> Result<ShutdownSignal, ProcessError> {
        let tasks = lock(&self.tasks);
        if tasks.get(name).is_some_and(|m| !m.task.is_finished()) {
            return Err(ProcessError::AlreadyMonitored(name.to_string()));
        }
        lock(&self.shared.procs).insert(
            name.to_string(),
            ProcessStatus {
                name: name.to_string(),
                pid,
                running: true,
                exit_code: None,
                lines_seen: 0,
                error_count: 0,
                started_at: Utc::now(),
            },
        );
        Ok(ShutdownSignal::new())
    }

    fn track(&self, name: &str, stop: ShutdownSignal, task: JoinHandle<()>) {
        lock(&self.tasks).insert(name.to_string(), Monitored { stop, task });
    }

    /// Spawn `command` (relative `cwd` resolved against `project_dir`) and
    /// monitor its output. Returns the child's pid.
    pub fn spawn(
        &self,
        command: &ProcessCommand,
        project_dir: &Path,
    ) -> Result<Option<u32>, ProcessError> {
        let cwd = match &command.cwd {
            Some(dir) => project_dir.join(dir),
            None => project_dir.to_path_buf(),
        };
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: command.program.clone(),
            source,
        })?;
        let pid = child.id();
        self.attach(&command.name, child)?;
        info!(process = %command.name, ?pid, cwd = %cwd.display(), "monitoring process");
        Ok(pid)
    }

    /// Monitor an already-running child. Its piped stdout and stderr are
    /// read until the child exits or [`stop`](Self::stop) is called.
    pub fn attach(&self, name: &str, mut child: Child) -> Result<(), ProcessError> {
        let stop = self.register(name, child.id())?;
        let stdout = child.stdout.take().map(LineReader::new);
        let stderr = child.stderr.take().map(LineReader::new);
        let shared = Arc::clone(&self.shared);
        let process = name.to_string();
        let listener = stop.listener();

        let task = tokio::spawn(async move {
            read_child(shared, process, child, stdout, stderr, listener).await;
        });
        self.track(name, stop, task);
        Ok(())
    }

    /// Monitor an arbitrary line-oriented stream, such as a log file tail.
    pub fn watch_stream<R>(&self, name: &str, reader: R) -> Result<(), ProcessError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let stop = self.register(name, None)?;
        let shared = Arc::clone(&self.shared);
        let process = name.to_string();
        let mut listener = stop.listener();
        let mut lines = Some(LineReader::new(reader));

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = listener.wait() => break,
                    line = next_line(&mut lines) => match line {
                        Some(line) => shared.ingest(&process, Stream::Stdout, line),
                        None => break,
                    },
                }
            }
            shared.mark_exited(&process, None);
        });
        self.track(name, stop, task);
        Ok(())
    }

    /// Stop monitoring `name`, killing the child if it was spawned or
    /// attached. Never blocks longer than a couple of seconds.
    pub async fn stop(&self, name: &str) -> Result<(), ProcessError> {
        let monitored = lock(&self.tasks)
            .remove(name)
            .ok_or_else(|| ProcessError::UnknownProcess(name.to_string()))?;
        finish(name, monitored).await;
        Ok(())
    }

    pub async fn stop_all(&self) {
        let all: Vec<(String, Monitored)> = lock(&self.tasks).drain().collect();
        for (name, monitored) in all {
            finish(&name, monitored).await;
        }
    }

    pub fn status(&self) -> Vec<ProcessStatus> {
        let mut all: Vec<ProcessStatus> = lock(&self.shared.procs).values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn running_count(&self) -> usize {
        lock(&self.shared.procs).values().filter(|s| s.running).count()
    }

    /// Most recent error lines, newest last.
    pub fn recent_errors(&self, process: Option<&str>, limit: usize) -> Vec<ErrorEntry> {
        let errors = lock(&self.shared.errors);
        let matching: Vec<&ErrorEntry> = errors
            .iter()
            .filter(|e| process.is_none_or(|p| e.process == p))
            .collect();
        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).cloned().collect()
    }

    pub fn history(&self, process: Option<&str>, limit: usize) -> Vec<OutputLine> {
        let history = lock(&self.shared.history);
        let matching: Vec<&OutputLine> = history
            .iter()
            .filter(|l| process.is_none_or(|p| l.process == p))
            .collect();
        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).cloned().collect()
    }
}

async fn finish(name: &str, monitored: Monitored) {
    monitored.stop.trigger();
    let mut task = monitored.task;
    if tokio::time::timeout(Duration::from_secs(2), &mut task)
        .await
        .is_err()
    {
        warn!(process = name, "reader did not stop in time, aborting");
        task.abort();
    }
    debug!(process = name, "monitoring stopped");
}

/// Newline-delimited reader over raw bytes. Invalid UTF-8 is replaced
/// rather than rejected, so one binary byte never ends the stream.
struct LineReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
        }
    }

    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        let mut line = Vec::new();
        let mut saw_bytes = false;
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                if !saw_bytes {
                    return Ok(None);
                }
                break;
            }
            saw_bytes = true;
            let (chunk, used, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (&available[..i], i + 1, true),
                None => (available, available.len(), false),
            };
            let room = MAX_LINE_BYTES.saturating_sub(line.len());
            line.extend_from_slice(&chunk[..chunk.len().min(room)]);
            self.inner.consume(used);
            if complete {
                break;
            }
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }
}

async fn next_line<R>(lines: &mut Option<LineReader<R>>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    match lines {
        Some(reader) => match reader.next_line().await {
            Ok(Some(line)) => Some(line),
            Ok(None) => None,
            Err(e) => {
                debug!(error = %e, "output stream read failed");
                None
            }
        },
        None => std::future::pending().await,
    }
}

async fn read_child<O, E>(
    shared: Arc<Shared>,
    process: String,
    mut child: Child,
    mut stdout: Option<LineReader<O>>,
    mut stderr: Option<LineReader<E>>,
    mut stop: ShutdownListener,
) where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    loop {
        tokio::select! {
            _ = stop.wait() => {
                if let Err(e) = child.start_kill() {
                    debug!(process = %process, error = %e, "kill failed, process already gone");
                }
                let code = child.wait().await.ok().and_then(|s| s.code());
                shared.mark_exited(&process, code);
                return;
            }
            line = next_line(&mut stdout), if stdout.is_some() => match line {
                Some(line) => shared.ingest(&process, Stream::Stdout, line),
                None => stdout = None,
            },
            line = next_line(&mut stderr), if stderr.is_some() => match line {
                Some(line) => shared.ingest(&process, Stream::Stderr, line),
                None => stderr = None,
            },
            status = child.wait(), if stdout.is_none() && stderr.is_none() => {
                let code = status.ok().and_then(|s| s.code());
                info!(process = %process, ?code, "process exited");
                shared.mark_exited(&process, code);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(history: usize) -> (ProcessOutputMonitor, flume::Receiver<Signal>) {
        let (tx, rx) = flume::unbounded();
        let config = ProcessConfig {
            history_capacity: history,
            error_log_capacity: 2,
            commands: Vec::new(),
        };
        (ProcessOutputMonitor::new(&config, tx), rx)
    }

    #[tokio::test]
    async fn line_reader_survives_invalid_utf8() {
        let mut reader = LineReader::new(&b"ok\r\n\xff\xfe junk\nlast"[..]);
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("ok"));
        let bad = reader.next_line().await.unwrap().unwrap();
        assert!(bad.ends_with(" junk"));
        assert!(bad.contains('\u{FFFD}'));
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("last"));
        assert_eq!(reader.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn line_reader_caps_overlong_lines() {
        let mut input = vec![b'x'; MAX_LINE_BYTES * 3];
        input.extend_from_slice(b"\nnext\n");
        let mut reader = LineReader::new(&input[..]);
        assert_eq!(reader.next_line().await.unwrap().unwrap().len(), MAX_LINE_BYTES);
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("next"));
    }

    #[test]
    fn history_is_ring_buffered() {
        let (m, _rx) = monitor(3);
        for i in 0..5 {
            m.shared.ingest("dev", Stream::Stdout, format!("line {i}"));
        }
        let lines: Vec<String> = m.history(None, 10).into_iter().map(|l| l.line).collect();
        assert_eq!(lines, vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn error_lines_are_forwarded_and_capped() {
        let (m, rx) = monitor(10);
        m.shared.ingest("api", Stream::Stderr, "TypeError: a is undefined".into());
        m.shared.ingest("api", Stream::Stdout, "GET /health 200".into());
        m.shared.ingest("web", Stream::Stderr, "Module not found: ./x".into());
        m.shared.ingest("web", Stream::Stderr, "npm ERR! missing script".into());

        assert_eq!(rx.len(), 3);
        let first = rx.try_recv().unwrap();
        assert_eq!(first.source, SignalSource::Process);
        assert_eq!(first.file.as_deref(), Some("api"));

        let errors = m.recent_errors(None, 10);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].issue_type, IssueType::ModuleNotFound);
        assert_eq!(m.recent_errors(Some("web"), 1)[0].issue_type, IssueType::PackageError);
    }
}
