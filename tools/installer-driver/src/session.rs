//! One interactive child process on a pty, with its transcript and event log.

use crate::errors::DriverError;
use crate::logging::JsonlLogger;
use crate::matcher::{Matcher, PatternSet, Resolved};
use crate::runtime::{PtyChannel, PtySpawner, SpawnRequest};
use serde_json::json;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

pub const LINE_TERMINATOR: &str = "\n";

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub name: String,
    pub request: SpawnRequest,
    pub log_path: PathBuf,
    pub timeout: Duration,
}

pub struct Session {
    name: String,
    channel: Box<dyn PtyChannel>,
    matcher: Matcher,
    transcript: Option<BufWriter<File>>,
    timeout: Duration,
    logger: JsonlLogger,
    may_send: bool,
    closed: bool,
}

impl Session {
    /// Opens the transcript, then starts the child. When the spawn fails the
    /// transcript handle is closed before the error is returned.
    pub fn spawn(
        spawner: &dyn PtySpawner,
        options: SessionOptions,
        logger: &JsonlLogger,
    ) -> Result<Self, DriverError> {
        let file = File::create(&options.log_path)
            .map_err(|e| DriverError::Io(format!("{}: {e}", options.log_path.display())))?;
        let channel = match spawner.spawn(&options.request) {
            Ok(channel) => channel,
            Err(err) => {
                drop(file);
                logger.error(
                    "spawn_failed",
                    json!({
                        "session": options.name,
                        "program": options.request.program,
                        "reason": err.reason(),
                    }),
                )?;
                return Err(err);
            }
        };
        logger.info(
            "session_spawned",
            json!({
                "session": options.name,
                "program": options.request.program,
                "args": options.request.args,
                "cwd": options.request.cwd,
                "log": options.log_path,
                "timeout_secs": options.timeout.as_secs(),
            }),
        )?;

        Ok(Self {
            name: options.name,
            channel,
            matcher: Matcher::new(),
            transcript: Some(BufWriter::new(file)),
            timeout: options.timeout,
            logger: logger.clone(),
            may_send: false,
            closed: false,
        })
    }

    pub fn expect(&mut self, set: &PatternSet) -> Result<Resolved, DriverError> {
        for overlap in set.overlaps() {
            self.logger.warn(
                "pattern_overlap",
                json!({
                    "session": self.name,
                    "earlier": overlap.earlier_label,
                    "later": overlap.later_label,
                }),
            )?;
        }

        self.may_send = false;
        let transcript = &mut self.transcript;
        let result = self.matcher.expect(
            self.channel.as_mut(),
            set,
            self.timeout,
            &mut |bytes: &[u8]| match transcript.as_mut() {
                Some(out) => out
                    .write_all(bytes)
                    .map_err(|e| DriverError::Io(format!("transcript write failed: {e}"))),
                None => Ok(()),
            },
        );

        match &result {
            Ok(resolved) => {
                self.may_send = true;
                self.logger.info(
                    "expect_matched",
                    json!({
                        "session": self.name,
                        "index": resolved.index,
                        "pattern": resolved.label,
                    }),
                )?;
            }
            Err(err @ DriverError::Timeout { .. }) => {
                self.flush_transcript()?;
                self.logger.error(
                    "expect_timeout",
                    json!({"session": self.name, "error": err.to_string()}),
                )?;
            }
            Err(err @ DriverError::UnexpectedEof { .. }) => {
                self.flush_transcript()?;
                self.logger.warn(
                    "expect_eof",
                    json!({"session": self.name, "error": err.to_string()}),
                )?;
            }
            Err(_) => {}
        }
        result
    }

    /// Sends `text` plus the line terminator. Only valid directly after an
    /// expectation resolved. Secret values are redacted from the event log.
    pub fn send_line(&mut self, text: &str, secret: bool) -> Result<(), DriverError> {
        if !self.may_send {
            return Err(DriverError::Protocol(format!(
                "{}: input sent without a resolved expectation",
                self.name
            )));
        }
        if self.matcher.stream_closed() {
            return Err(DriverError::Protocol(format!(
                "{}: input sent after end of stream",
                self.name
            )));
        }
        let mut line = String::with_capacity(text.len() + LINE_TERMINATOR.len());
        line.push_str(text);
        line.push_str(LINE_TERMINATOR);
        self.channel.write_all(line.as_bytes())?;
        self.may_send = false;

        let shown = if secret { "<redacted>" } else { text };
        self.logger.info(
            "line_sent",
            json!({"session": self.name, "value": shown, "bytes": line.len()}),
        )
    }

    /// Waits for the child's output to close and reaps it.
    pub fn expect_eof(&mut self) -> Result<Option<u32>, DriverError> {
        self.expect(&PatternSet::eof())?;
        let exit_code = self.channel.wait_exit()?;
        self.logger.info(
            "child_exited",
            json!({"session": self.name, "exit_code": exit_code}),
        )?;
        Ok(exit_code)
    }

    fn flush_transcript(&mut self) -> Result<(), DriverError> {
        if let Some(out) = self.transcript.as_mut() {
            out.flush()
                .map_err(|e| DriverError::Io(format!("transcript flush failed: {e}")))?;
        }
        Ok(())
    }

    /// Flushes and closes the transcript and stops the child if it is still running.
    pub fn close(mut self) -> Result<(), DriverError> {
        self.closed = true;
        let flushed = self.flush_transcript();
        self.transcript = None;
        let terminated = self.channel.terminate();
        flushed.and(terminated)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let _ = self.flush_transcript();
        self.transcript = None;
        let _ = self.channel.terminate();
    }
}
