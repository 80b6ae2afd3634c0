//! The transport side of the batch query tool.
//!
//! Run with `-gui --guipgnstdout`, the tool interleaves free-text messages, error blocks,
//! progress variables and whole-game result payloads on its stdout, each framed by start/end
//! marker lines. [`QueryDemux`] untangles that stream into typed events; the query language
//! itself is none of our business.
//
//  Copyright 2021 Michael Leany
//
//  This Source Code Form is subject to the terms of the Mozilla Public
//  License, v. 2.0. If a copy of the MPL was not distributed with this
//  file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
////////////////////////////////////////////////////////////////////////////////////////////////////
use std::ffi::OsStr;
use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;
use crate::io;

const OPEN_MESSAGE: &str = "<CqlGuiMessage>";
const CLOSE_MESSAGE: &str = "</CqlGuiMessage>";
const OPEN_ERROR: &str = "<CqlGuiError>";
const CLOSE_ERROR: &str = "</CqlGuiError>";
const VARIABLE: &str = "<CqlGuiVariable>";
const NORMAL_EXIT: &str = "<CqlGuiNormalExit>";
const OPEN_GAMES: &str = "<CqlGuiPgn";
const CLOSE_GAMES: &str = "</CqlGuiPgn>";

/// The variable name under which the tool reports which game it is looking at.
const PROGRESS_VARIABLE: &str = "currentgamenumber";

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Events demultiplexed out of the query tool's output stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryEvent {
    /// A free-text message for the user.
    Message(String),
    /// An error report from the tool.
    Error(String),
    /// A named progress variable, other than the game counter.
    Variable(String, String),
    /// The number of the game the tool is currently examining.
    Progress(u32),
    /// A payload of matched games, as raw PGN text.
    Games(String),
    /// The tool announced a clean end of its run.
    Finished,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Where in the tagged stream the demultiplexer currently is.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum State {
    Idle,
    Message,
    Error,
    Games,
}

impl State {
    fn block_name(self) -> &'static str {
        match self {
            State::Idle => "",
            State::Message => "message",
            State::Error => "error",
            State::Games => "game batch",
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// The stream ended (or the subprocess was killed) with a block still open, so part of the
/// output never arrived. A truncated game batch in particular is something the caller must know
/// about rather than silently lose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncompleteStream {
    block: &'static str,
}

impl IncompleteStream {
    /// Returns the kind of block that was left open.
    pub fn block(&self) -> &str {
        self.block
    }
}

impl fmt::Display for IncompleteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format!("output stream ended inside an open {} block", self.block).fmt(f)
    }
}

impl std::error::Error for IncompleteStream { }

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Demultiplexes the query tool's tagged output stream into [`QueryEvent`]s.
///
/// A small state machine over line-delimited input. The input arrives in arbitrary read-sized
/// chunks; an incomplete trailing line is kept and finished by the next chunk. One demultiplexer
/// serves one subprocess invocation: call [`reset`](QueryDemux::reset) before reusing it, and
/// [`finish`](QueryDemux::finish) once the stream ends to learn whether it was cut short.
#[derive(Debug)]
pub struct QueryDemux {
    state: State,
    buffer: Vec<String>,
    games: String,
    partial: String,
}

impl QueryDemux {
    /// Returns a demultiplexer in its idle state.
    pub fn new() -> QueryDemux {
        QueryDemux {
            state: State::Idle,
            buffer: Vec::new(),
            games: String::new(),
            partial: String::new(),
        }
    }

    /// Consumes one decoded chunk of tool output and returns the events of every line it
    /// completed.
    pub fn feed(&mut self, chunk: &str) -> Vec<QueryEvent> {
        let mut events = Vec::new();

        self.partial.push_str(chunk);
        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            self.parse_line(line.trim_end_matches(|c| c == '\n' || c == '\r'), &mut events);
        }

        events
    }

    /// Marks the end of the stream. A last line without a newline is still processed (its
    /// events are returned); a block left open means the output was truncated.
    pub fn finish(&mut self) -> Result<Vec<QueryEvent>, IncompleteStream> {
        let mut events = Vec::new();

        if !self.partial.is_empty() {
            let line = std::mem::replace(&mut self.partial, String::new());
            self.parse_line(line.trim_end_matches(|c| c == '\n' || c == '\r'), &mut events);
        }

        match self.state {
            State::Idle => Ok(events),
            state => Err(IncompleteStream{ block: state.block_name() }),
        }
    }

    /// Returns the demultiplexer to its initial state, ready for a new subprocess invocation.
    pub fn reset(&mut self) {
        *self = QueryDemux::new();
    }

    fn parse_line(&mut self, line: &str, events: &mut Vec<QueryEvent>) {
        match self.state {
            State::Message => {
                if line.starts_with(CLOSE_MESSAGE) {
                    events.push(QueryEvent::Message(self.take_buffer()));
                    self.state = State::Idle;
                } else {
                    self.buffer.push(line.trim().to_owned());
                }
            },

            State::Error => {
                if line.starts_with(CLOSE_ERROR) {
                    events.push(QueryEvent::Error(self.take_buffer()));
                    self.state = State::Idle;
                } else {
                    self.buffer.push(line.trim().to_owned());
                }
            },

            State::Games => {
                if line.starts_with(CLOSE_GAMES) {
                    events.push(QueryEvent::Games(
                        std::mem::replace(&mut self.games, String::new())));
                    self.state = State::Idle;
                } else if line.trim_start().starts_with(OPEN_GAMES) {
                    // a repeated opening marker is framing, not payload
                } else {
                    self.games.push_str(line);
                    self.games.push('\n');
                }
            },

            State::Idle => {
                if line.starts_with(OPEN_MESSAGE) {
                    self.buffer.clear();
                    self.state = State::Message;
                } else if line.starts_with(OPEN_ERROR) {
                    self.buffer.clear();
                    self.state = State::Error;
                } else if line.starts_with(VARIABLE) {
                    Self::variable(&line[VARIABLE.len()..], events);
                } else if line.starts_with(NORMAL_EXIT) {
                    events.push(QueryEvent::Finished);
                } else if line.starts_with(OPEN_GAMES) {
                    self.games.clear();
                    self.state = State::Games;
                }
                // anything else is an unrecognized tag or chatter; skip it
            },
        }
    }

    /// Handles the payload of a variable marker line: a name and a value. The game counter
    /// becomes a progress event; a counter that doesn't parse is dropped.
    fn variable(payload: &str, events: &mut Vec<QueryEvent>) {
        let payload = payload.trim();
        let (name, value) = match payload.find(char::is_whitespace) {
            Some(pos) => (&payload[..pos], payload[pos..].trim()),
            None => return, // no value; nothing to report
        };

        if name == PROGRESS_VARIABLE {
            if let Ok(number) = value.parse() {
                events.push(QueryEvent::Progress(number));
            }
        } else {
            events.push(QueryEvent::Variable(name.to_owned(), value.to_owned()));
        }
    }

    fn take_buffer(&mut self) -> String {
        let text = self.buffer.join("\n");
        self.buffer.clear();

        text
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// A running query tool subprocess together with its demultiplexer.
///
/// Invocations run for seconds to minutes; output is consumed incrementally with
/// [`recv`](QueryRunner::recv) until it returns `None`, after which
/// [`finish`](QueryRunner::finish) tells whether the stream ended cleanly and
/// [`wait`](QueryRunner::wait) reaps the subprocess. Cancellation is
/// [`terminate`](QueryRunner::terminate); the demultiplexer treats it like any other end of
/// stream.
#[derive(Debug)]
pub struct QueryRunner {
    proc: io::Subprocess,
    demux: QueryDemux,
}

impl QueryRunner {
    /// Runs a single query against a PGN database file.
    pub fn search<T, U, V>(cmd: T, pgn_file: U, query_file: V) -> std::io::Result<Self>
    where T: AsRef<OsStr>, U: AsRef<OsStr>, V: AsRef<OsStr> {
        let args = [
            OsStr::new("-gui"),
            OsStr::new("--guipgnstdout"),
            OsStr::new("-input"),
            pgn_file.as_ref(),
            query_file.as_ref(),
        ];

        Ok(QueryRunner {
            proc: io::Subprocess::launch(cmd, &args, "cql")?,
            demux: QueryDemux::new(),
        })
    }

    /// Re-runs a prepared query for the games numbered `start` through `end`.
    pub fn paginate<T, V>(cmd: T, start: u32, end: u32, query_file: V) -> std::io::Result<Self>
    where T: AsRef<OsStr>, V: AsRef<OsStr> {
        let start = start.to_string();
        let end = end.to_string();
        let args = [
            OsStr::new("-gui"),
            OsStr::new("--guipgnstdout"),
            OsStr::new("-gamenumber"),
            OsStr::new(&start),
            OsStr::new(&end),
            query_file.as_ref(),
        ];

        Ok(QueryRunner {
            proc: io::Subprocess::launch(cmd, &args, "cql")?,
            demux: QueryDemux::new(),
        })
    }

    /// Blocks until the tool produces at least one event. Returns `None` once the output stream
    /// has closed; call [`finish`](QueryRunner::finish) then.
    pub fn recv(&mut self) -> Option<Vec<QueryEvent>> {
        loop {
            match self.proc.recv() {
                Ok(chunk) => {
                    let events = self.demux.feed(&chunk);
                    if !events.is_empty() {
                        return Some(events);
                    }
                },
                Err(_) => return None,
            }
        }
    }

    /// Collects whatever output is available right now, without blocking. `None` means the
    /// stream has closed.
    pub fn poll(&mut self) -> Option<Vec<QueryEvent>> {
        use std::sync::mpsc::TryRecvError;

        let mut events = Vec::new();
        loop {
            match self.proc.try_recv() {
                Ok(chunk) => events.extend(self.demux.feed(&chunk)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if events.is_empty() {
                        return None;
                    }
                    break;
                },
            }
        }

        Some(events)
    }

    /// Like [`recv`](QueryRunner::recv), but gives up after `timeout` without any output.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<Vec<QueryEvent>> {
        use std::sync::mpsc::RecvTimeoutError;

        loop {
            match self.proc.recv_timeout(timeout) {
                Ok(chunk) => {
                    let events = self.demux.feed(&chunk);
                    if !events.is_empty() {
                        return Some(events);
                    }
                },
                Err(RecvTimeoutError::Timeout) => return Some(Vec::new()),
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Closes out the stream, reporting truncated output. See [`QueryDemux::finish`].
    pub fn finish(&mut self) -> Result<Vec<QueryEvent>, IncompleteStream> {
        self.demux.finish()
    }

    /// Drains whatever the tool has written to its standard error so far.
    pub fn stderr_output(&mut self) -> String {
        self.proc.recv_err()
    }

    /// Kills the subprocess. The stream simply ends; a block left open shows up in
    /// [`finish`](QueryRunner::finish).
    pub fn terminate(&mut self) -> std::io::Result<ExitStatus> {
        self.proc.terminate()
    }

    /// Waits for the subprocess to exit and returns its status.
    pub fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.proc.wait()
    }
}
