// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Driving the external relay process.
//!
//! The relay is launched through `sh -c` with the record JSON appended as a
//! single shell-quoted argument. Output from both pipes is collected line by
//! line into a shared buffer so whatever was printed before the bounded wait
//! expired is still available to [`classify_transcript`]. Bytes that are not
//! UTF-8 are replaced, never treated as the end of the stream.

use std::{collections::VecDeque, path::PathBuf, process::Stdio, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    sync::Mutex,
    task::JoinHandle,
    time::{timeout, Instant},
};
use tracing::{debug, info, warn};

use super::{
    transcript::{classify_transcript, is_labeled, RelayError, RelayOutcome, RelayTranscript},
    RelayInvoker,
};
use crate::{config::RelayConfig, models::DeviceRecord};

/// How long to wait for the pipe readers once the process is gone.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Labeled lines kept per run.
const MAX_LABELED_LINES: usize = 10_000;

/// Unlabeled lines kept per run, newest first to survive.
const MAX_UNLABELED_LINES: usize = 256;

type LineBuffer = Arc<Mutex<CapturedOutput>>;

/// Output of one run: every labeled line plus a tail of everything else.
#[derive(Debug, Default)]
struct CapturedOutput {
    next_seq: u64,
    labeled: Vec<(u64, String)>,
    tail: VecDeque<(u64, String)>,
    dropped: usize,
}

impl CapturedOutput {
    fn push(&mut self, line: String) {
        let seq = self.next_seq;
        self.next_seq += 1;

        if is_labeled(&line) {
            if self.labeled.len() < MAX_LABELED_LINES {
                self.labeled.push((seq, line));
            } else {
                self.dropped += 1;
            }
            return;
        }

        if self.tail.len() == MAX_UNLABELED_LINES {
            self.tail.pop_front();
            self.dropped += 1;
        }
        self.tail.push_back((seq, line));
    }

    /// Kept lines in the order they were read.
    fn into_lines(self) -> Vec<String> {
        let mut lines: Vec<_> = self.labeled.into_iter().chain(self.tail).collect();
        lines.sort_unstable_by_key(|(seq, _)| *seq);
        lines.into_iter().map(|(_, line)| line).collect()
    }
}

/// Relay invoker backed by a local subprocess.
#[derive(Debug, Clone)]
pub struct ProcessRelay {
    command: String,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl ProcessRelay {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            command: config.command.clone(),
            working_dir: config.working_dir.clone(),
            timeout: config.timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the relay with `argument` and capture its transcript.
    ///
    /// Only spawn and wait failures are errors here; timeouts and exit
    /// codes are recorded in the transcript.
    pub async fn run(&self, argument: &str) -> Result<RelayTranscript, RelayError> {
        let script = format!("{} {}", self.command, shell_quote(argument));

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| RelayError::Process(format!("failed to spawn relay: {e}")))?;
        // `Child::id` is gone once the child has been reaped.
        let pid = child.id();
        debug!(pid = ?pid, timeout_secs = self.timeout.as_secs(), "Relay started");

        let lines: LineBuffer = Arc::default();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(collect_lines(stdout, lines.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(collect_lines(stderr, lines.clone()));
        }

        let (timed_out, exit_code) = match timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => {
                // Descendants may still hold the pipes open.
                kill_group(pid);
                (false, status.code())
            }
            Ok(Err(e)) => {
                terminate(&mut child, pid).await;
                return Err(RelayError::Process(format!("failed to wait on relay: {e}")));
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "Relay still running at deadline, killing process group"
                );
                terminate(&mut child, pid).await;
                (true, None)
            }
        };

        let drained = timeout(READER_GRACE, async {
            for reader in readers {
                let _ = reader.await;
            }
        })
        .await;
        if drained.is_err() {
            debug!("Relay output pipes still open after grace period");
        }

        let captured = std::mem::take(&mut *lines.lock().await);
        if captured.dropped > 0 {
            debug!(dropped = captured.dropped, "Relay output truncated");
        }
        let lines = captured.into_lines();
        Ok(RelayTranscript {
            lines,
            timed_out,
            exit_code,
            elapsed: started.elapsed(),
        })
    }
}

#[async_trait]
impl RelayInvoker for ProcessRelay {
    async fn invoke(&self, record: &DeviceRecord) -> Result<RelayOutcome, RelayError> {
        let argument = serde_json::to_string(record)
            .map_err(|e| RelayError::Process(format!("failed to serialize record: {e}")))?;

        let transcript = self.run(&argument).await?;
        let result = classify_transcript(&transcript);

        match &result {
            Ok(outcome) => info!(
                node_id = %record.node_id,
                timed_out = transcript.timed_out,
                exit_code = ?transcript.exit_code,
                sent = outcome.sent_message_ids.len(),
                network_up = outcome.network_up,
                "Relay delivered record"
            ),
            Err(e) => warn!(
                node_id = %record.node_id,
                timed_out = transcript.timed_out,
                exit_code = ?transcript.exit_code,
                lines = transcript.lines.len(),
                error = %e,
                "Relay produced no usable output"
            ),
        }

        result
    }
}

fn collect_lines<R>(reader: R, sink: LineBuffer) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']).to_string();
                    sink.lock().await.push(line);
                }
                Err(e) => {
                    debug!(error = %e, "Relay pipe read failed");
                    break;
                }
            }
        }
    })
}

/// Kill the relay and everything it spawned.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    kill_group(pid);

    if let Err(e) = child.kill().await {
        debug!(error = %e, "Relay already exited");
    }
}

/// SIGKILL the process group led by the relay. A group that has already
/// emptied is not an error.
fn kill_group(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) {
        use nix::{
            errno::Errno,
            sys::signal::{killpg, Signal},
            unistd::Pid,
        };

        match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => debug!(pid, error = %e, "Failed to signal relay process group"),
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Quote `value` as one POSIX shell word.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
