//! A model of a chess game as a tree of positions connected by moves.
//!
//! A game is a tree: the mainline plus any number of nested variations, with
//! optional comments attached to individual moves. This crate provides the
//! tree itself ([`tree::GameTree`]), a deterministic flattening into movetext
//! print order ([`flatten`]), and reading and writing of standard movetext
//! ([`movetext`]).
//!
//! Move legality is out of scope: moves are opaque, validated tokens, and the
//! host application is expected to derive board positions from the move path
//! using its own rules library.
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

pub mod tree;
pub mod flatten;
pub mod movetext;

pub use tree::{Color, GameResult, GameTree, MoveToken, Setup, Variation};
pub use flatten::{flatten, FlatEntry, FlatIndex};
pub use movetext::{parse_game, read_games};

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Error type used throughout the crate
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The requested variation index doesn't exist at the cursor
    NoSuchVariation,
    /// The handle belongs to a flattening that a later edit invalidated
    StaleHandle,
    /// The string is not a usable move token
    InvalidMoveToken,
    /// Cannot parse the position setup string
    InvalidSetup,
    /// A variation was opened before any move was played
    VariationAtStart,
    /// Unbalanced variation parentheses in movetext
    UnbalancedVariation,
    /// A comment was opened but never closed
    UnterminatedComment,
    /// A tag pair line is malformed
    InvalidTagPair,
    /// Cannot parse a game result token
    InvalidResult,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Error::*;

        match self {
            NoSuchVariation => "no such variation at the current position",
            StaleHandle => "move handle is stale; the tree was edited since it was issued",
            InvalidMoveToken => "not a usable move token",
            InvalidSetup => "cannot parse the position setup string",
            VariationAtStart => "variation opened before any move",
            UnbalancedVariation => "unbalanced variation parentheses",
            UnterminatedComment => "unterminated comment",
            InvalidTagPair => "malformed tag pair",
            InvalidResult => "cannot parse game result",
        }.fmt(f)
    }
}

impl std::error::Error for Error { }

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Result type used by methods in this crate
pub type Result<T> = std::result::Result<T, Error>;
