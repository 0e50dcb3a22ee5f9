//! Subprocess execution for converter invocations.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::ChildStderr;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, warn};

use super::progress::{ProgressParser, ProgressReporter, is_stats_line};
use super::records::RecordCodec;
use super::{Converter, Invocation, MediaKind, RunOutcome};
use crate::{Error, Result};

/// Number of trailing stderr lines kept for error reports.
pub const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// How long stderr may stay open after the converter exits. Anything still
/// holding it afterwards is a leftover helper and gets killed.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Runs converters as child processes in their own process group.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

/// Drain converter stderr, feeding the progress parser, and return the
/// last [`DIAGNOSTIC_TAIL_LINES`] records.
async fn drain_stderr(stderr: ChildStderr, kind: MediaKind, reporter: ProgressReporter) -> String {
    let mut records = FramedRead::new(stderr, RecordCodec);
    let mut parser = ProgressParser::new(kind);
    let mut tail: VecDeque<String> = VecDeque::with_capacity(DIAGNOSTIC_TAIL_LINES);

    while let Some(record) = records.next().await {
        let line = match record {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to read converter output");
                break;
            }
        };

        if !is_stats_line(&line) {
            debug!("converter: {}", line);
        }
        if let Some(update) = parser.feed(&line) {
            reporter.report(update);
        }

        if tail.len() == DIAGNOSTIC_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    Vec::from(tail).join("\n")
}

/// Kill whatever is left of the converter's process group, then collect
/// the reader's tail. Gives up on the tail if stderr still does not close.
async fn kill_stragglers(pid: Option<u32>, mut reader: JoinHandle<String>) -> String {
    if let Some(pid) = pid {
        process_utils::kill_group(pid).await;
    }
    match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut reader).await {
        Ok(tail) => tail.unwrap_or_default(),
        Err(_) => {
            warn!("Converter output did not close after killing its process group");
            reader.abort();
            String::new()
        }
    }
}

#[async_trait]
impl Converter for ProcessRunner {
    async fn run(
        &self,
        invocation: &Invocation,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        debug!(command = %invocation.display(), "Starting converter");

        let mut child = process_utils::tokio_group_command(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::from_spawn(&invocation.program, e))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::other("Converter stderr was not captured"))?;
        let pid = child.id();
        let mut reader = tokio::spawn(
            drain_stderr(stderr, invocation.kind, reporter.clone()).in_current_span(),
        );

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = process_utils::kill_tree(&mut child).await {
                    warn!(error = %e, "Failed to kill converter process tree");
                }
                if let Err(e) = child.wait().await {
                    warn!(error = %e, "Failed to reap cancelled converter");
                }
                reader.abort();
                debug!("Converter cancelled");
                return Ok(RunOutcome::Cancelled);
            }
            status = child.wait() => status?,
        };

        // Helpers forked by the converter may still hold stderr open.
        let drained = tokio::select! {
            tail = &mut reader => Some(tail.unwrap_or_default()),
            _ = cancel.cancelled() => None,
            _ = tokio::time::sleep(STDERR_DRAIN_TIMEOUT) => None,
        };
        let tail = match drained {
            Some(tail) => tail,
            None if cancel.is_cancelled() => {
                kill_stragglers(pid, reader).await;
                debug!("Converter cancelled while its output was draining");
                return Ok(RunOutcome::Cancelled);
            }
            None => {
                warn!("Converter exited but its output is still open, killing leftover processes");
                kill_stragglers(pid, reader).await
            }
        };

        if status.success() {
            debug!("Converter finished successfully");
            Ok(RunOutcome::Completed)
        } else {
            warn!(code = ?status.code(), "Converter exited with failure");
            Err(Error::ConverterExitFailure {
                code: status.code(),
                tail,
            })
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::convert::ProgressUpdate;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn shell(script: &str, kind: MediaKind) -> Invocation {
        Invocation {
            program: "sh".to_string(),
            args: vec!["-c".into(), script.into()],
            kind,
        }
    }

    #[tokio::test]
    async fn reports_progress_and_completes() {
        let (tx, mut rx) = mpsc::channel(16);
        let invocation = shell(
            "printf '  Duration: 00:00:10.00, start: 0.000000\\n' >&2; \
             printf 'frame=1 fps=0 size=1kB time=00:00:05.00 bitrate=1kbits/s speed=2.0x\\r' >&2; \
             printf 'frame=2 fps=0 size=2kB time=00:00:10.00 bitrate=1kbits/s speed=2.5x\\r' >&2",
            MediaKind::Video,
        );

        let outcome = ProcessRunner
            .run(&invocation, &ProgressReporter::new(tx), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Completed);

        let mut updates = Vec::new();
        while let Ok(update) = rx.try_recv() {
            updates.push(update);
        }
        assert_eq!(
            updates,
            vec![
                ProgressUpdate {
                    percent: 50,
                    speed: Some("2.0x".to_string())
                },
                ProgressUpdate {
                    percent: 100,
                    speed: Some("2.5x".to_string())
                },
            ]
        );
    }

    #[tokio::test]
    async fn non_zero_exit_carries_tail() {
        let invocation = shell("echo 'Invalid data found' >&2; exit 3", MediaKind::Video);

        let err = ProcessRunner
            .run(&invocation, &ProgressReporter::noop(), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            Error::ConverterExitFailure { code, tail } => {
                assert_eq!(code, Some(3));
                assert_eq!(tail, "Invalid data found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn tail_keeps_last_lines() {
        let invocation = shell(
            "i=1; while [ $i -le 30 ]; do echo line$i >&2; i=$((i+1)); done; exit 1",
            MediaKind::Image,
        );

        let err = ProcessRunner
            .run(&invocation, &ProgressReporter::noop(), &CancellationToken::new())
            .await
            .unwrap_err();

        let Error::ConverterExitFailure { tail, .. } = err else {
            panic!("expected exit failure");
        };
        let lines: Vec<&str> = tail.lines().collect();
        assert_eq!(lines.len(), DIAGNOSTIC_TAIL_LINES);
        assert_eq!(lines.first(), Some(&"line11"));
        assert_eq!(lines.last(), Some(&"line30"));
    }

    #[tokio::test]
    async fn missing_binary_is_converter_not_found() {
        let invocation = Invocation {
            program: "/nonexistent/shareconv-ffmpeg".to_string(),
            args: Vec::new(),
            kind: MediaKind::Video,
        };

        let err = ProcessRunner
            .run(&invocation, &ProgressReporter::noop(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConverterNotFound { .. }));
    }

    #[tokio::test]
    async fn cancel_after_exit_with_helper_holding_stderr() {
        let cancel = CancellationToken::new();
        let invocation = shell("sleep 20 & exit 0", MediaKind::Video);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            ProcessRunner.run(&invocation, &ProgressReporter::noop(), &cancel),
        )
        .await
        .expect("cancel should not wait for the helper")
        .unwrap();
        assert_eq!(outcome, RunOutcome::Cancelled);
    }

    #[tokio::test]
    async fn leftover_helper_is_killed_after_exit() {
        let invocation = shell("echo 'muxing done' >&2; sleep 20 & exit 0", MediaKind::Video);

        let outcome = tokio::time::timeout(
            Duration::from_secs(10),
            ProcessRunner.run(&invocation, &ProgressReporter::noop(), &CancellationToken::new()),
        )
        .await
        .expect("run should not wait for the helper")
        .unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
    }

    #[tokio::test]
    async fn cancel_terminates_process() {
        let cancel = CancellationToken::new();
        let invocation = shell("sleep 30 & sleep 30; wait", MediaKind::Video);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            ProcessRunner.run(&invocation, &ProgressReporter::noop(), &cancel),
        )
        .await
        .expect("cancel should end the run promptly")
        .unwrap();
        assert_eq!(outcome, RunOutcome::Cancelled);
    }
}
