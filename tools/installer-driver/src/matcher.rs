//! Prompt matching against a pty output stream. The lowest-indexed pattern
//! in a [`PatternSet`] that matches anywhere in the buffer wins.

use crate::errors::DriverError;
use crate::runtime::{PtyChannel, ReadEvent};
use regex::Regex;
use std::time::{Duration, Instant};

/// Upper bound on retained unmatched output.
pub const MAX_BUFFER_BYTES: usize = 1024 * 1024;
const ERROR_TAIL_CHARS: usize = 240;

#[derive(Debug, Clone)]
enum Needle {
    Text { regex: Regex, probe: String },
    Eof,
}

#[derive(Debug, Clone)]
pub struct Pattern {
    label: String,
    needle: Needle,
}

impl Pattern {
    pub fn is_eof(&self) -> bool {
        matches!(self.needle, Needle::Eof)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternOverlap {
    pub earlier: usize,
    pub later: usize,
    pub earlier_label: String,
    pub later_label: String,
}

#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    entries: Vec<Pattern>,
    overlaps: Vec<PatternOverlap>,
}

impl PatternSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(pattern: &str) -> Result<Self, DriverError> {
        Self::new().then(pattern)
    }

    pub fn eof() -> Self {
        Self::new().then_eof()
    }

    pub fn then(mut self, pattern: &str) -> Result<Self, DriverError> {
        let regex =
            Regex::new(pattern).map_err(|e| DriverError::Pattern(format!("{pattern}: {e}")))?;
        let probe = literal_probe(pattern);
        let later = self.entries.len();
        for (earlier, entry) in self.entries.iter().enumerate() {
            let Needle::Text {
                regex: earlier_regex,
                probe: earlier_probe,
            } = &entry.needle
            else {
                continue;
            };
            if regex.is_match(earlier_probe) || earlier_regex.is_match(&probe) {
                self.overlaps.push(PatternOverlap {
                    earlier,
                    later,
                    earlier_label: entry.label.clone(),
                    later_label: pattern.to_string(),
                });
            }
        }
        self.entries.push(Pattern {
            label: pattern.to_string(),
            needle: Needle::Text { regex, probe },
        });
        Ok(self)
    }

    pub fn then_eof(mut self) -> Self {
        if self.eof_index().is_none() {
            self.entries.push(Pattern {
                label: "<eof>".to_string(),
                needle: Needle::Eof,
            });
        }
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Pattern> {
        self.entries.get(index)
    }

    pub fn labels(&self) -> Vec<&str> {
        self.entries.iter().map(|p| p.label.as_str()).collect()
    }

    pub fn overlaps(&self) -> &[PatternOverlap] {
        &self.overlaps
    }

    pub fn eof_index(&self) -> Option<usize> {
        self.entries.iter().position(Pattern::is_eof)
    }

    fn has_text_patterns(&self) -> bool {
        self.entries.iter().any(|p| !p.is_eof())
    }

    fn describe(&self) -> String {
        self.labels().join(", ")
    }

    pub fn first_match(&self, text: &str) -> Option<(usize, usize, usize)> {
        self.entries
            .iter()
            .enumerate()
            .find_map(|(index, pattern)| match &pattern.needle {
                Needle::Text { regex, .. } => {
                    regex.find(text).map(|m| (index, m.start(), m.end()))
                }
                Needle::Eof => None,
            })
    }
}

/// Text an unanchored regex would most plausibly be written to match:
/// wildcard runs dropped, escapes resolved.
fn literal_probe(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            }
            '.' if matches!(chars.peek(), Some('*') | Some('+') | Some('?')) => {
                chars.next();
            }
            '^' | '$' => {}
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherState {
    Idle,
    Waiting,
    Matched(usize),
    TimedOut,
    EndOfStream,
}

pub fn validate_transition(from: MatcherState, to: MatcherState) -> Result<(), DriverError> {
    use MatcherState as S;

    let allowed = match from {
        S::Idle | S::Matched(_) => matches!(to, S::Waiting),
        S::Waiting => matches!(to, S::Matched(_) | S::TimedOut | S::EndOfStream),
        S::TimedOut | S::EndOfStream => false,
    };

    if !allowed {
        return Err(DriverError::Protocol(format!(
            "illegal matcher transition: {from:?} -> {to:?}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub index: usize,
    pub label: String,
    /// Text consumed by the match itself; empty for end of stream.
    pub matched: String,
    /// Unmatched output preceding the match.
    pub before: String,
}

#[derive(Debug)]
pub struct Matcher {
    state: MatcherState,
    buffer: String,
    pending: Vec<u8>,
    stream_closed: bool,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher {
    pub fn new() -> Self {
        Self {
            state: MatcherState::Idle,
            buffer: String::new(),
            pending: Vec::new(),
            stream_closed: false,
        }
    }

    pub fn state(&self) -> MatcherState {
        self.state
    }

    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    pub fn stream_closed(&self) -> bool {
        self.stream_closed
    }

    fn transition(&mut self, next: MatcherState) -> Result<(), DriverError> {
        validate_transition(self.state, next)?;
        self.state = next;
        Ok(())
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                self.buffer.push_str(text);
                self.pending.clear();
            }
            Err(err) if err.error_len().is_none() => {
                let valid = err.valid_up_to();
                self.buffer.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                self.pending.drain(..valid);
            }
            Err(_) => {
                self.buffer.push_str(&String::from_utf8_lossy(&self.pending));
                self.pending.clear();
            }
        }
        self.enforce_cap();
    }

    fn enforce_cap(&mut self) {
        if self.buffer.len() <= MAX_BUFFER_BYTES {
            return;
        }
        let mut cut = self.buffer.len() - MAX_BUFFER_BYTES;
        while !self.buffer.is_char_boundary(cut) {
            cut += 1;
        }
        self.buffer.drain(..cut);
    }

    fn flush_pending(&mut self) {
        if !self.pending.is_empty() {
            self.buffer.push_str(&String::from_utf8_lossy(&self.pending));
            self.pending.clear();
        }
    }

    fn take_match(&mut self, set: &PatternSet) -> Option<Resolved> {
        let (index, start, end) = set.first_match(&self.buffer)?;
        let matched = self.buffer[start..end].to_string();
        let before = self.buffer[..start].to_string();
        self.buffer.drain(..end);
        Some(Resolved {
            index,
            label: set.get(index).map(|p| p.label.clone()).unwrap_or_default(),
            matched,
            before,
        })
    }

    fn resolve(&mut self, resolved: Resolved) -> Result<Resolved, DriverError> {
        self.transition(MatcherState::Matched(resolved.index))?;
        Ok(resolved)
    }

    fn on_stream_closed(&mut self, set: &PatternSet) -> Result<Resolved, DriverError> {
        self.stream_closed = true;
        self.flush_pending();
        if let Some(resolved) = self.take_match(set) {
            return self.resolve(resolved);
        }
        if let Some(index) = set.eof_index() {
            let before = std::mem::take(&mut self.buffer);
            return self.resolve(Resolved {
                index,
                label: "<eof>".to_string(),
                matched: String::new(),
                before,
            });
        }
        self.transition(MatcherState::EndOfStream)?;
        Err(DriverError::UnexpectedEof {
            expected: set.describe(),
            tail: self.tail(),
        })
    }

    /// Blocks until `set` resolves or `timeout` elapses.
    pub fn expect(
        &mut self,
        channel: &mut dyn PtyChannel,
        set: &PatternSet,
        timeout: Duration,
        on_output: &mut dyn FnMut(&[u8]) -> Result<(), DriverError>,
    ) -> Result<Resolved, DriverError> {
        if set.is_empty() {
            return Err(DriverError::Pattern("empty pattern set".to_string()));
        }
        self.transition(MatcherState::Waiting)?;

        if let Some(resolved) = self.take_match(set) {
            return self.resolve(resolved);
        }
        if self.stream_closed {
            return self.on_stream_closed(set);
        }

        let keep_output = set.has_text_patterns();
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                self.transition(MatcherState::TimedOut)?;
                return Err(DriverError::Timeout {
                    expected: set.describe(),
                    seconds: timeout.as_secs(),
                    tail: self.tail(),
                });
            }
            match channel.read(deadline - now)? {
                ReadEvent::Data(bytes) => {
                    on_output(&bytes)?;
                    if !keep_output {
                        continue;
                    }
                    self.feed(&bytes);
                    if let Some(resolved) = self.take_match(set) {
                        return self.resolve(resolved);
                    }
                }
                ReadEvent::Idle => {}
                ReadEvent::Eof => return self.on_stream_closed(set),
            }
        }
    }

    fn tail(&self) -> String {
        let count = self.buffer.chars().count();
        self.buffer
            .chars()
            .skip(count.saturating_sub(ERROR_TAIL_CHARS))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{FakePtySpawner, PtySpawner, ScriptedRead, SpawnRequest};
    use std::path::PathBuf;

    fn channel(reads: Vec<ScriptedRead>) -> Box<dyn PtyChannel> {
        let spawner = FakePtySpawner::default();
        spawner.push_script(reads);
        spawner
            .spawn(&SpawnRequest {
                program: PathBuf::from("/bin/true"),
                args: vec![],
                cwd: PathBuf::from("/"),
                env: vec![],
            })
            .expect("spawn")
    }

    fn out(text: &str) -> ScriptedRead {
        ScriptedRead::Output(text.to_string())
    }

    fn ignore(_: &[u8]) -> Result<(), DriverError> {
        Ok(())
    }

    const WAIT: Duration = Duration::from_millis(200);

    #[test]
    fn lowest_registered_index_wins_when_several_match() {
        let set = PatternSet::new()
            .then("root@.*")
            .expect("root")
            .then(".*continue connecting.*")
            .expect("host key");
        let text = "Are you sure you want to continue connecting (yes/no)? root@vcsa";
        assert_eq!(set.first_match(text).map(|m| m.0), Some(0));

        let reversed = PatternSet::new()
            .then(".*continue connecting.*")
            .expect("host key")
            .then("root@.*")
            .expect("root");
        assert_eq!(reversed.first_match(text).map(|m| m.0), Some(0));
    }

    #[test]
    fn priority_beats_buffer_position() {
        let mut ch = channel(vec![out("Error early\nlater successful\n")]);
        let set = PatternSet::new()
            .then(".*successful")
            .expect("ok")
            .then("Error")
            .expect("err");
        let mut matcher = Matcher::new();
        let resolved = matcher
            .expect(ch.as_mut(), &set, WAIT, &mut ignore)
            .expect("match");
        assert_eq!(resolved.index, 0);
        assert_eq!(resolved.matched, "later successful");
        assert_eq!(matcher.state(), MatcherState::Matched(0));
    }

    #[test]
    fn match_spanning_chunks_consumes_through_match_end() {
        let mut ch = channel(vec![
            out("Enter your vCenter Admin"),
            out("istrator Username: Enter your"),
        ]);
        let set = PatternSet::single("Enter your vCenter Administrator Username: ").expect("set");
        let mut matcher = Matcher::new();
        matcher
            .expect(ch.as_mut(), &set, WAIT, &mut ignore)
            .expect("match");
        assert_eq!(matcher.buffered(), "Enter your");
    }

    #[test]
    fn silence_times_out_and_is_terminal() {
        let mut ch = channel(vec![out("still working")]);
        let set = PatternSet::single("root@.*").expect("set");
        let mut matcher = Matcher::new();
        let err = matcher
            .expect(ch.as_mut(), &set, Duration::from_millis(30), &mut ignore)
            .expect_err("timeout");
        assert!(matches!(err, DriverError::Timeout { ref tail, .. } if tail == "still working"));
        assert_eq!(matcher.state(), MatcherState::TimedOut);

        let again = matcher
            .expect(ch.as_mut(), &set, WAIT, &mut ignore)
            .expect_err("terminal");
        assert!(matches!(again, DriverError::Protocol(_)));
    }

    #[test]
    fn eof_without_registered_marker_fails() {
        let mut ch = channel(vec![out("Uninstall complete\n"), ScriptedRead::Eof]);
        let set = PatternSet::single(".*Error.*").expect("set");
        let mut matcher = Matcher::new();
        let err = matcher
            .expect(ch.as_mut(), &set, WAIT, &mut ignore)
            .expect_err("eof");
        assert!(matches!(err, DriverError::UnexpectedEof { .. }));
        assert_eq!(matcher.state(), MatcherState::EndOfStream);
    }

    #[test]
    fn eof_marker_resolves_with_remaining_output() {
        let mut ch = channel(vec![out("bye"), ScriptedRead::Eof]);
        let set = PatternSet::single("never").expect("set").then_eof();
        let mut matcher = Matcher::new();
        let resolved = matcher
            .expect(ch.as_mut(), &set, WAIT, &mut ignore)
            .expect("eof");
        assert_eq!(resolved.index, 1);
        assert_eq!(resolved.before, "bye");
    }

    #[test]
    fn eof_only_set_skips_buffering_while_text_set_matches() {
        let mut ch = channel(vec![out("Error: bad host"), ScriptedRead::Eof]);
        let set = PatternSet::eof();
        let mut matcher = Matcher::new();
        matcher
            .expect(ch.as_mut(), &set, WAIT, &mut ignore)
            .expect("eof");
        let mut ch = channel(vec![out("Error: bad host"), ScriptedRead::Eof]);
        let mut matcher = Matcher::new();
        let set = PatternSet::single(".*Error.*").expect("set").then_eof();
        let resolved = matcher
            .expect(ch.as_mut(), &set, WAIT, &mut ignore)
            .expect("error");
        assert_eq!(resolved.index, 0);
    }

    #[test]
    fn on_output_sees_every_chunk() {
        let mut ch = channel(vec![out("a"), out("b"), ScriptedRead::Eof]);
        let mut seen = Vec::new();
        let mut matcher = Matcher::new();
        matcher
            .expect(ch.as_mut(), &PatternSet::eof(), WAIT, &mut |bytes: &[u8]| {
                seen.extend_from_slice(bytes);
                Ok(())
            })
            .expect("eof");
        assert_eq!(seen, b"ab");
    }

    #[test]
    fn split_utf8_sequences_are_reassembled() {
        let mut matcher = Matcher::new();
        let bytes = "héllo".as_bytes();
        matcher.feed(&bytes[..2]);
        matcher.feed(&bytes[2..]);
        assert_eq!(matcher.buffered(), "héllo");
    }

    #[test]
    fn registration_flags_overlapping_patterns() {
        let set = PatternSet::new()
            .then(".*Error.*")
            .expect("generic")
            .then("Error! Could not unregister.*")
            .expect("specific");
        assert_eq!(
            set.overlaps(),
            &[PatternOverlap {
                earlier: 0,
                later: 1,
                earlier_label: ".*Error.*".to_string(),
                later_label: "Error! Could not unregister.*".to_string(),
            }]
        );

        let disjoint = PatternSet::new()
            .then(".*successful")
            .expect("ok")
            .then("Error! Could not unregister.*")
            .expect("err");
        assert!(disjoint.overlaps().is_empty());

        let host_key = PatternSet::new()
            .then("root@.*")
            .expect("root")
            .then(".*continue connecting.*")
            .expect("host key");
        assert!(host_key.overlaps().is_empty());
    }

    #[test]
    fn invalid_regex_is_rejected_at_registration() {
        let err = PatternSet::single("root@(").expect_err("bad regex");
        assert!(matches!(err, DriverError::Pattern(message) if message.contains("root@(")));
    }

    #[test]
    fn transition_validator_rejects_invalid_edges() {
        validate_transition(MatcherState::Idle, MatcherState::Waiting).expect("arm");
        validate_transition(MatcherState::Matched(1), MatcherState::Waiting).expect("re-arm");
        let err = validate_transition(MatcherState::Idle, MatcherState::Matched(0))
            .expect_err("must reject");
        match err {
            DriverError::Protocol(message) => {
                assert!(message.contains("illegal matcher transition"), "{message}")
            }
            other => panic!("expected a protocol error, got {other:?}"),
        }
        validate_transition(MatcherState::EndOfStream, MatcherState::Waiting)
            .expect_err("terminal");
    }

    #[test]
    fn literal_probe_strips_wildcards_and_escapes() {
        assert_eq!(literal_probe(".*When all done.*"), "When all done");
        assert_eq!(literal_probe(r"Error\! Could not\.$"), "Error! Could not.");
    }
}
