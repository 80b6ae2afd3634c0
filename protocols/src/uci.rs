//! The client side of the [Universal Chess Interface](https://www.chessprogramming.org/UCI).
//!
//! Only the slice of the protocol a position analyzer needs is covered: we send the position and
//! a search command, and pick depth, score, principal variation and best move back out of the
//! engine's output. Anything else the engine prints is ignored.
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
use std::sync::mpsc::{RecvError, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::Duration;
use log::warn;
use lazy_static::lazy_static;
use regex::Regex;
use gametree::MoveToken;
use crate::{io, Score};

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Commands which can be sent to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Tells the engine to use the UCI protocol. Must be the first command sent.
    ///
    /// ```text
    /// uci
    /// ```
    Uci,

    /// Asks the engine to answer `readyok` once it has caught up.
    ///
    /// ```text
    /// isready
    /// ```
    IsReady,

    /// Sets the position to analyze.
    ///
    /// ```text
    /// position fen <fen>
    /// ```
    Position(String),

    /// Starts a search limited to the given depth.
    ///
    /// ```text
    /// go depth <plies>
    /// ```
    GoDepth(u32),

    /// Starts a search limited to the given amount of time, in milliseconds.
    ///
    /// ```text
    /// go time <ms>
    /// ```
    GoTime(u64),

    /// Sets the number of search threads the engine may use.
    ///
    /// ```text
    /// setoption name Threads value <n>
    /// ```
    Threads(usize),

    /// Stops the current search. The engine will still report its best move.
    ///
    /// ```text
    /// stop
    /// ```
    Stop,

    /// Tells the engine to exit.
    ///
    /// ```text
    /// quit
    /// ```
    Quit,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Command::*;

        match self {
            Uci => "uci".fmt(f),
            IsReady => "isready".fmt(f),
            Position(fen) => format!("position fen {}", fen).fmt(f),
            GoDepth(depth) => format!("go depth {}", depth).fmt(f),
            GoTime(ms) => format!("go time {}", ms).fmt(f),
            Threads(n) => format!("setoption name Threads value {}", n).fmt(f),
            Stop => "stop".fmt(f),
            Quit => "quit".fmt(f),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Search output picked out of the engine's stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The engine reached the given search depth.
    Depth(u32),
    /// The engine settled on a move; the search is over.
    BestMove(MoveToken),
    /// The engine's predicted line of play.
    Pv(Vec<MoveToken>),
    /// The engine's evaluation, relative to the side to move.
    Score(Score),
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Extracts [`EngineEvent`]s from the engine's output stream.
///
/// The stream arrives in arbitrary chunks: a chunk may hold many lines, none, or end in the
/// middle of one. An incomplete trailing line is kept and finished by the next chunk, so feeding
/// the same bytes split at different points produces the same events.
///
/// The parser has exactly one piece of write-back traffic: the engine's `uciok` handshake line
/// queues an [`IsReady`](Command::IsReady) probe in the parser's outbox, which the owner of the
/// engine's stdin is expected to drain with [`take_replies`](UciParser::take_replies) after each
/// feed. The parser itself never touches the pipe.
#[derive(Debug, Default)]
pub struct UciParser {
    partial: String,
    outbox: Vec<Command>,
}

impl UciParser {
    /// Returns a parser with no buffered input.
    pub fn new() -> UciParser {
        UciParser::default()
    }

    /// Consumes one decoded chunk of engine output and returns the events of every line it
    /// completed.
    pub fn feed(&mut self, chunk: &str) -> Vec<EngineEvent> {
        let mut events = Vec::new();

        self.partial.push_str(chunk);
        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            self.parse_line(line.trim(), &mut events);
        }

        events
    }

    /// Takes the commands the parser wants sent back to the engine.
    pub fn take_replies(&mut self) -> Vec<Command> {
        std::mem::replace(&mut self.outbox, Vec::new())
    }

    /// Extracts the events of a single complete line. A line can carry depth, score and pv at
    /// once; each category is reported at most once per line.
    fn parse_line(&mut self, line: &str, events: &mut Vec<EngineEvent>) {
        lazy_static! {
            static ref DEPTH: Regex = Regex::new(r"\bdepth\s+(\d+)").expect("INFALLIBLE");
            static ref CP: Regex = Regex::new(r"\bscore\s+cp\s+(-?\d+)").expect("INFALLIBLE");
            static ref MATE: Regex = Regex::new(r"\bscore\s+mate\s+(-?\d+)").expect("INFALLIBLE");
            static ref PV: Regex = Regex::new(r"\bpv\s+(.+)$").expect("INFALLIBLE");
            static ref BESTMOVE: Regex = Regex::new(r"^bestmove\s+(\S+)").expect("INFALLIBLE");
            static ref UCI_MOVE: Regex
                = Regex::new(r"^(?:[a-h][1-8][a-h][1-8][qrbn]?|0000)$").expect("INFALLIBLE");
        }

        if line.is_empty() {
            return;
        }

        if line == "uciok" {
            self.outbox.push(Command::IsReady);
            return;
        }

        if let Some(caps) = DEPTH.captures(line) {
            if let Ok(depth) = caps[1].parse() {
                events.push(EngineEvent::Depth(depth));
            }
        }

        if let Some(caps) = CP.captures(line) {
            if let Ok(val) = caps[1].parse() {
                events.push(EngineEvent::Score(Score::Centipawns(val)));
            }
        } else if let Some(caps) = MATE.captures(line) {
            if let Ok(plies) = caps[1].parse() {
                events.push(EngineEvent::Score(Score::MateIn(plies)));
            }
        }

        if let Some(caps) = PV.captures(line) {
            let moves: Vec<MoveToken> = caps[1].split_whitespace()
                .take_while(|word| UCI_MOVE.is_match(word))
                .map(|word| word.parse().expect("INFALLIBLE"))
                .collect();
            if !moves.is_empty() {
                events.push(EngineEvent::Pv(moves));
            }
        }

        if let Some(caps) = BESTMOVE.captures(line) {
            if UCI_MOVE.is_match(&caps[1]) {
                events.push(EngineEvent::BestMove(caps[1].parse().expect("INFALLIBLE")));
            } else {
                // "bestmove (none)" and friends carry no move
                warn!("unusable best move: {}", line);
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Error in communication with the engine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Lost communication with the engine
    Disconnected,
    /// The engine did not respond in time
    Timeout,
    /// Could not write to the engine
    Io,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use EngineError::*;

        match self {
            Disconnected => "lost communication with the engine",
            Timeout => "the engine did not respond in time",
            Io => "could not write to the engine",
        }.fmt(f)
    }
}

impl std::error::Error for EngineError { }

impl From<std::io::Error> for EngineError {
    fn from(_: std::io::Error) -> EngineError {
        EngineError::Io
    }
}

impl From<RecvError> for EngineError {
    fn from(_: RecvError) -> EngineError {
        EngineError::Disconnected
    }
}

impl From<RecvTimeoutError> for EngineError {
    fn from(error: RecvTimeoutError) -> EngineError {
        match error {
            RecvTimeoutError::Disconnected => EngineError::Disconnected,
            RecvTimeoutError::Timeout => EngineError::Timeout,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Search limit for [`UciEngine::analyze`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Go {
    /// Search to the given depth in plies.
    Depth(u32),
    /// Search for the given number of milliseconds.
    Time(u64),
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// A running engine subprocess together with its output parser.
///
/// The engine's stdout and stderr are read as one merged stream. Every receive drains the
/// parser's outbox back into the engine's stdin, which is all the handshake needs.
#[derive(Debug)]
pub struct UciEngine {
    proc: io::Subprocess,
    parser: UciParser,
    quit_sent: bool,
}

impl UciEngine {
    /// Launches an engine and starts the protocol handshake.
    pub fn launch<T, U>(cmd: T, args: &[U], name: &str) -> std::io::Result<Self>
    where T: AsRef<OsStr>, U: AsRef<OsStr> {
        let mut engine = UciEngine {
            proc: io::Subprocess::launch_merged(cmd, args, name)?,
            parser: UciParser::new(),
            quit_sent: false,
        };
        engine.send(&Command::Uci)?;

        Ok(engine)
    }

    /// Sends a command to the engine.
    pub fn send(&mut self, cmd: &Command) -> std::io::Result<()> {
        self.proc.send(&cmd.to_string())
    }

    /// Sets the number of search threads.
    pub fn set_threads(&mut self, threads: usize) -> std::io::Result<()> {
        self.send(&Command::Threads(threads))
    }

    /// Sends a position and starts a search with the given limit.
    pub fn analyze(&mut self, fen: &str, go: Go) -> std::io::Result<()> {
        self.send(&Command::Position(fen.to_owned()))?;
        match go {
            Go::Depth(depth) => self.send(&Command::GoDepth(depth)),
            Go::Time(ms) => self.send(&Command::GoTime(ms)),
        }
    }

    /// Collects whatever output is available right now, without blocking.
    ///
    /// # Errors
    ///
    /// Fails with [`EngineError::Disconnected`] once the engine's output has closed and
    /// everything before the close has been returned.
    pub fn poll(&mut self) -> Result<Vec<EngineEvent>, EngineError> {
        let mut events = Vec::new();

        loop {
            match self.proc.try_recv() {
                Ok(chunk) => events.extend(self.parser.feed(&chunk)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if events.is_empty() {
                        return Err(EngineError::Disconnected);
                    }
                    break;
                },
            }
        }
        self.flush_replies()?;

        Ok(events)
    }

    /// Blocks until the engine produces at least one event, or `timeout` passes without any
    /// output at all.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Vec<EngineEvent>, EngineError> {
        loop {
            let chunk = self.proc.recv_timeout(timeout)?;
            let events = self.parser.feed(&chunk);
            self.flush_replies()?;
            if !events.is_empty() {
                return Ok(events);
            }
        }
    }

    /// Blocks until the engine produces at least one event.
    pub fn recv(&mut self) -> Result<Vec<EngineEvent>, EngineError> {
        loop {
            let chunk = self.proc.recv()?;
            let events = self.parser.feed(&chunk);
            self.flush_replies()?;
            if !events.is_empty() {
                return Ok(events);
            }
        }
    }

    /// Interrupts the current search.
    pub fn stop(&mut self) -> std::io::Result<()> {
        self.send(&Command::Stop)
    }

    /// Asks the engine to exit and reaps the subprocess.
    pub fn quit(&mut self) -> std::io::Result<std::process::ExitStatus> {
        let _ = self.send(&Command::Quit);
        self.quit_sent = true;
        self.proc.wait()
    }

    fn flush_replies(&mut self) -> Result<(), EngineError> {
        for cmd in self.parser.take_replies() {
            self.proc.send(&cmd.to_string())?;
        }

        Ok(())
    }
}

impl Drop for UciEngine {
    /// Sends the `quit` command to the attached engine.
    fn drop(&mut self) {
        if !self.quit_sent {
            let _ = self.send(&Command::Quit);
            thread::yield_now();
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ***************************************** UNIT TESTS ***************************************** //
////////////////////////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod test {
    use super::*;
    use EngineEvent::*;

    fn mv(s: &str) -> MoveToken {
        s.parse().expect("INFALLIBLE")
    }

    #[test]
    fn format_command() {
        use Command::*;

        assert_eq!(Uci.to_string(), "uci");
        assert_eq!(IsReady.to_string(), "isready");
        assert_eq!(
            Position("8/8/8/8/8/4k3/8/4K2R w K - 0 1".to_string()).to_string(),
            "position fen 8/8/8/8/8/4k3/8/4K2R w K - 0 1"
        );
        assert_eq!(GoDepth(18).to_string(), "go depth 18");
        assert_eq!(GoTime(5000).to_string(), "go time 5000");
        assert_eq!(Threads(4).to_string(), "setoption name Threads value 4");
        assert_eq!(Stop.to_string(), "stop");
        assert_eq!(Quit.to_string(), "quit");
    }

    #[test]
    fn one_info_line_yields_every_category() {
        let mut parser = UciParser::new();
        let events = parser.feed("info depth 12 seldepth 18 score cp 34 pv e2e4 e7e5\n");

        assert_eq!(events.len(), 3);
        assert!(events.contains(&Depth(12)));
        assert!(events.contains(&Score(crate::Score::Centipawns(34))));
        assert!(events.contains(&Pv(vec![mv("e2e4"), mv("e7e5")])));
    }

    #[test]
    fn chunk_boundaries_are_invisible() {
        let text = "info depth 6 score cp -13 pv d2d4 d7d5 c2c4\n\
                    info depth 7 score mate 3 pv g1f3\n\
                    bestmove d2d4 ponder d7d5\n";

        let mut whole = UciParser::new();
        let expected = whole.feed(text);

        // feed the same bytes one byte at a time, splitting inside every token
        let mut tiny = UciParser::new();
        let mut events = Vec::new();
        for i in 0..text.len() {
            events.extend(tiny.feed(&text[i..=i]));
        }
        assert_eq!(events, expected);

        // and in two uneven halves
        let mut halves = UciParser::new();
        let mut events = halves.feed(&text[..17]);
        events.extend(halves.feed(&text[17..]));
        assert_eq!(events, expected);
    }

    #[test]
    fn mate_scores_come_through_signed() {
        let mut parser = UciParser::new();
        let events = parser.feed("info depth 10 score mate -2 pv h7h8q\n");

        assert!(events.contains(&Score(crate::Score::MateIn(-2))));
    }

    #[test]
    fn best_move_ends_the_search() {
        let mut parser = UciParser::new();
        let events = parser.feed("bestmove e2e4 ponder e7e5\n");

        assert_eq!(events, vec![BestMove(mv("e2e4"))]);
    }

    #[test]
    fn a_mated_engine_reports_no_best_move() {
        let mut parser = UciParser::new();
        assert_eq!(parser.feed("bestmove (none)\n"), vec![]);
    }

    #[test]
    fn handshake_queues_a_readiness_probe() {
        let mut parser = UciParser::new();

        assert_eq!(parser.feed("id name somefish\nuciok\n"), vec![]);
        assert_eq!(parser.take_replies(), vec![Command::IsReady]);
        assert_eq!(parser.take_replies(), vec![]);
    }

    #[test]
    fn unrecognized_lines_are_ignored() {
        let mut parser = UciParser::new();
        let events = parser.feed("id author somebody\nreadyok\ninfo string talking to myself\n");

        assert_eq!(events, vec![]);
    }

    #[test]
    fn incomplete_lines_wait_for_their_ending() {
        let mut parser = UciParser::new();

        assert_eq!(parser.feed("info depth 9 score cp 1"), vec![]);
        let events = parser.feed("01\n");
        assert_eq!(events, vec![Depth(9), Score(crate::Score::Centipawns(101))]);
    }

    #[test]
    fn seldepth_is_not_depth() {
        let mut parser = UciParser::new();
        let events = parser.feed("info seldepth 21\n");

        assert_eq!(events, vec![]);
    }

    #[test]
    fn pv_stops_at_the_first_non_move() {
        let mut parser = UciParser::new();
        let events = parser.feed("info multipv 1 pv e2e4 e7e5 g1f3 string noise\n");

        assert_eq!(events, vec![Pv(vec![mv("e2e4"), mv("e7e5"), mv("g1f3")])]);
    }
}
