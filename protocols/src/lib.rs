//! Adapters for the external analysis tools: a UCI chess engine and the batch query tool.
//!
//! Both tools run as subprocesses whose line-oriented output arrives in arbitrary read-sized
//! chunks. The parsers here ([`uci::UciParser`] and [`cql::QueryDemux`]) turn those chunks into
//! typed events for the caller to match on; the adapters ([`uci::UciEngine`] and
//! [`cql::QueryRunner`]) own the subprocess and feed its output through the matching parser.
//
//  Copyright 2021 Michael Leany
//
//  This Source Code Form is subject to the terms of the Mozilla Public
//  License, v. 2.0. If a copy of the MPL was not distributed with this
//  file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
////////////////////////////////////////////////////////////////////////////////////////////////////
#![warn(missing_docs, missing_debug_implementations, unused_extern_crates)]
#![warn(clippy::unimplemented, clippy::todo)]

use std::fmt;
use std::ops::Neg;
use gametree::{Color, MoveToken};

pub mod io;
pub mod uci;
pub mod cql;

////////////////////////////////////////////////////////////////////////////////////////////////////
/// An engine's evaluation of a position.
///
/// Scores are relative to the side to move, as the engine reports them: positive means the mover
/// is better. Use [`white_relative`](Score::white_relative) to convert to the fixed
/// white-positive convention used for display.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Score {
    /// The score in centipawns.
    Centipawns(i32),
    /// If positive, the mover mates in the given number of plies. If zero or negative, the mover
    /// is mated in the given number of plies (taking the absolute value).
    MateIn(i32),
}

impl Score {
    /// Converts a mover-relative score into a white-relative one, given the side to move.
    pub fn white_relative(self, mover: Color) -> Score {
        match mover {
            Color::White => self,
            Color::Black => -self,
        }
    }
}

impl Neg for Score {
    type Output = Score;

    fn neg(self) -> Score {
        match self {
            Score::Centipawns(val) => Score::Centipawns(-val),
            Score::MateIn(plies) => Score::MateIn(-plies),
        }
    }
}

impl From<Score> for i32 {
    /// Collapses the score to a single comparable value, mapping mates just inside `±10_000`.
    fn from(score: Score) -> Self {
        match score {
            Score::MateIn(plies) if plies > 0 => 10_000 - plies,
            Score::Centipawns(val) => val,
            Score::MateIn(plies) /* plies <= 0 */ => -10_000 - plies,
        }
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Centipawns(val) => format!("{:+.2}", f64::from(*val)/100.0).fmt(f),
            Score::MateIn(plies) if *plies > 0 => format!("+M{}", plies).fmt(f),
            Score::MateIn(plies) => format!("-M{}", plies.abs()).fmt(f),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// The engine's view of one search, accumulated from its events.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    depth: u32,
    score: Option<Score>,
    pv: Vec<MoveToken>,
    best: Option<MoveToken>,
}

impl Analysis {
    /// Returns an empty `Analysis`, representing no search output yet.
    pub fn new() -> Analysis {
        Analysis::default()
    }

    /// Folds one engine event into the running state.
    pub fn apply(&mut self, event: &uci::EngineEvent) {
        use uci::EngineEvent::*;

        match event {
            Depth(depth) => self.depth = *depth,
            Score(score) => self.score = Some(*score),
            Pv(moves) => self.pv = moves.clone(),
            BestMove(mv) => self.best = Some(mv.clone()),
        }
    }

    /// Returns the search depth that was reached.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Returns the latest reported score, if any.
    pub fn score(&self) -> Option<Score> {
        self.score
    }

    /// Returns the principal variation.
    pub fn pv(&self) -> &[MoveToken] {
        &self.pv
    }

    /// Returns the move the engine settled on. The search is over once this is set.
    pub fn best_move(&self) -> Option<&MoveToken> {
        self.best.as_ref()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ***************************************** UNIT TESTS ***************************************** //
////////////////////////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn score_normalization() {
        assert_eq!(Score::Centipawns(34).white_relative(Color::White), Score::Centipawns(34));
        assert_eq!(Score::Centipawns(34).white_relative(Color::Black), Score::Centipawns(-34));
        assert_eq!(Score::MateIn(5).white_relative(Color::Black), Score::MateIn(-5));
    }

    #[test]
    fn score_ordering_value() {
        assert!(i32::from(Score::MateIn(3)) > i32::from(Score::Centipawns(900)));
        assert!(i32::from(Score::MateIn(-3)) < i32::from(Score::Centipawns(-900)));
        assert!(i32::from(Score::MateIn(2)) > i32::from(Score::MateIn(4)));
        assert_eq!(i32::from(Score::Centipawns(-25)), -25);
    }

    #[test]
    fn score_display() {
        assert_eq!(Score::Centipawns(34).to_string(), "+0.34");
        assert_eq!(Score::Centipawns(-150).to_string(), "-1.50");
        assert_eq!(Score::MateIn(5).to_string(), "+M5");
        assert_eq!(Score::MateIn(-2).to_string(), "-M2");
    }
}
