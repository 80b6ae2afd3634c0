//! The game tree and its navigation and editing operations.
//
//  Copyright 2021 Michael Leany
//
//  This Source Code Form is subject to the terms of the Mozilla Public
//  License, v. 2.0. If a copy of the MPL was not distributed with this
//  file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
////////////////////////////////////////////////////////////////////////////////////////////////////
use std::collections::HashMap;
use std::fmt;
use std::ops::Not;
use std::str::FromStr;
use lazy_static::lazy_static;
use regex::Regex;
use crate::flatten::FlatIndex;
use crate::{Error, Result};

////////////////////////////////////////////////////////////////////////////////////////////////////
/// The color of a player
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Color {
    /// The player who moves first
    White,
    /// The player who moves second
    Black,
}

impl Not for Color {
    type Output = Color;

    fn not(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::White => "white",
            Color::Black => "black",
        }.fmt(f)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// The final result of a game
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GameResult {
    /// White won the game
    WhiteWins,
    /// Black won the game
    BlackWins,
    /// The game was drawn
    Draw,
}

impl fmt::Display for GameResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameResult::WhiteWins => "1-0",
            GameResult::BlackWins => "0-1",
            GameResult::Draw => "1/2-1/2",
        }.fmt(f)
    }
}

impl FromStr for GameResult {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1-0" => Ok(GameResult::WhiteWins),
            "0-1" => Ok(GameResult::BlackWins),
            "1/2-1/2" => Ok(GameResult::Draw),
            _ => Err(Error::InvalidResult),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// A single move as it is written in movetext.
///
/// Tokens are opaque: `e4`, `Nf3+`, `O-O` and coordinate moves like `e2e4` are all acceptable.
/// Whether a token is a legal move in any particular position is the host's rules library's
/// business, not ours. Two moves are the same move exactly when their tokens are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MoveToken(String);

impl MoveToken {
    /// Returns the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for MoveToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        lazy_static! {
            static ref TOKEN: Regex
                = Regex::new(r"^[A-Za-z0-9][-A-Za-z0-9+#=/]*[!?]{0,2}$").expect("INFALLIBLE");
        }

        // move numbers and result tokens would otherwise slip through the pattern
        if s.chars().all(|c| c.is_ascii_digit())
            || s == "1-0" || s == "0-1" || s == "1/2-1/2"
            || !TOKEN.is_match(s) {
            return Err(Error::InvalidMoveToken);
        }

        Ok(MoveToken(s.to_owned()))
    }
}

impl fmt::Display for MoveToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// The initial-position setup of a game that doesn't start from the standard position.
///
/// Only the side-to-move and fullmove-number fields are interpreted (they drive move numbering);
/// the setup string itself is carried verbatim into the `SetUp`/`FEN` tags on output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setup {
    fen: String,
    mover: Color,
    fullmove: u32,
}

impl Setup {
    /// Parses a setup from a Forsyth-Edwards Notation string.
    pub fn parse(fen: &str) -> Result<Setup> {
        let fields: Vec<&str> = fen.split_whitespace().collect();

        if fields.len() < 2 || fields[0].split('/').count() != 8 {
            return Err(Error::InvalidSetup);
        }

        let mover = match fields[1] {
            "w" => Color::White,
            "b" => Color::Black,
            _ => return Err(Error::InvalidSetup),
        };

        let fullmove = match fields.get(5) {
            Some(s) => s.parse().map_err(|_| Error::InvalidSetup)?,
            None => 1,
        };
        if fullmove == 0 {
            return Err(Error::InvalidSetup);
        }

        Ok(Setup{ fen: fen.trim().to_owned(), mover, fullmove })
    }

    /// Returns the setup string.
    pub fn fen(&self) -> &str {
        &self.fen
    }

    /// Returns the side to move in the initial position.
    pub fn mover(&self) -> Color {
        self.mover
    }

    /// Returns the fullmove number of the initial position.
    pub fn fullmove(&self) -> u32 {
        self.fullmove
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// One continuation available at the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variation {
    /// The child index to pass to [`GameTree::redo`]. Index 0 is the mainline continuation.
    pub index: usize,
    /// The move that enters the variation.
    pub mv: MoveToken,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// A node of the game tree: the move that led here, where we came from, and what follows.
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) mv: Option<MoveToken>,
    pub(crate) parent: Option<usize>,
    pub(crate) children: Vec<usize>,
    pub(crate) comment: Option<String>,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// A chess game as a tree of positions connected by moves.
///
/// Nodes live in an arena and refer to each other by index, so parent links are plain
/// back-references with no ownership cycle. The tree tracks a cursor (the current position) and a
/// revision counter which is bumped by every edit; flattenings record the revision they were built
/// from, which is how stale display handles are detected.
#[derive(Debug, Clone)]
pub struct GameTree {
    nodes: Vec<Node>,
    cursor: usize,
    tags: HashMap<String, String>,
    setup: Option<Setup>,
    result: Option<GameResult>,
    revision: u64,
}

const ROOT: usize = 0;

impl GameTree {
    /// Creates an empty game starting from the standard position.
    pub fn new() -> GameTree {
        GameTree {
            nodes: vec![Node{ mv: None, parent: None, children: Vec::new(), comment: None }],
            cursor: ROOT,
            tags: HashMap::new(),
            setup: None,
            result: None,
            revision: 0,
        }
    }

    /// Creates an empty game starting from the position given in Forsyth-Edwards Notation.
    pub fn from_fen(fen: &str) -> Result<GameTree> {
        let mut tree = GameTree::new();
        tree.setup = Some(Setup::parse(fen)?);

        Ok(tree)
    }

    /// Returns the current revision. Any edit makes the revision grow.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Returns the total number of nodes, counting the root.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the game contains no moves at all.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Returns the setup of a game that doesn't start from the standard position.
    pub fn setup(&self) -> Option<&Setup> {
        self.setup.as_ref()
    }

    /// Plays `mv` from the current position.
    ///
    /// If the cursor already has a child reached by this exact move, the cursor simply moves into
    /// that child; no duplicate is created. Otherwise the move is appended as the newest variation
    /// (which makes it the mainline only if it is the first continuation) and the cursor moves to
    /// it. Adding a node invalidates all previously issued display handles.
    pub fn make_move(&mut self, mv: MoveToken) {
        if let Some(&child) = self.nodes[self.cursor].children.iter()
            .find(|&&child| self.nodes[child].mv.as_ref() == Some(&mv)) {
            self.cursor = child;
            return;
        }

        let child = self.nodes.len();
        self.nodes.push(Node{
            mv: Some(mv),
            parent: Some(self.cursor),
            children: Vec::new(),
            comment: None,
        });
        self.nodes[self.cursor].children.push(child);
        self.cursor = child;
        self.revision += 1;
    }

    /// Moves the cursor back to the parent position. Returns `false` (and stays put) if the
    /// cursor is already at the start of the game.
    pub fn undo(&mut self) -> bool {
        match self.nodes[self.cursor].parent {
            Some(parent) => {
                self.cursor = parent;
                true
            },
            None => false,
        }
    }

    /// Moves the cursor forward into the continuation with the given index (0 is the mainline).
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NoSuchVariation`] if there is no such continuation. The caller is
    /// expected to consult [`variations`](GameTree::variations) first when more than one exists.
    pub fn redo(&mut self, variation: usize) -> Result<()> {
        match self.nodes[self.cursor].children.get(variation) {
            Some(&child) => {
                self.cursor = child;
                Ok(())
            },
            None => Err(Error::NoSuchVariation),
        }
    }

    /// Moves the cursor directly to the move addressed by `handle` in the given flattening.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::StaleHandle`] if the tree was edited after `flat` was built; the
    /// caller must re-flatten after any edit before jumping.
    ///
    /// # Panics
    ///
    /// A handle that is out of range for an up-to-date flattening cannot have been issued by it,
    /// so this is a programming error and panics.
    pub fn jump_to(&mut self, flat: &FlatIndex, handle: usize) -> Result<()> {
        self.cursor = self.resolve(flat, handle)?;

        Ok(())
    }

    /// Moves the cursor to the start of the game.
    pub fn jump_to_start(&mut self) {
        self.cursor = ROOT;
    }

    /// Moves the cursor to the final position of the mainline.
    pub fn jump_to_end(&mut self) {
        let mut node = ROOT;
        while let Some(&child) = self.nodes[node].children.first() {
            node = child;
        }
        self.cursor = node;
    }

    /// Returns the continuations available at the cursor, mainline first. The host derives the
    /// resulting position of each from [`moves_to_cursor`](GameTree::moves_to_cursor) plus the
    /// candidate move.
    pub fn variations(&self) -> Vec<Variation> {
        self.nodes[self.cursor].children.iter()
            .enumerate()
            .map(|(index, &child)| {
                let mv = self.nodes[child].mv.clone().expect("INFALLIBLE");
                Variation{ index, mv }
            })
            .collect()
    }

    /// Returns `true` if at least one continuation exists at the cursor.
    pub fn has_variations(&self) -> bool {
        !self.nodes[self.cursor].children.is_empty()
    }

    /// Returns the moves leading from the start of the game to the cursor.
    pub fn moves_to_cursor(&self) -> Vec<MoveToken> {
        let mut moves = Vec::new();
        let mut node = self.cursor;
        while let Some(parent) = self.nodes[node].parent {
            moves.push(self.nodes[node].mv.clone().expect("INFALLIBLE"));
            node = parent;
        }
        moves.reverse();

        moves
    }

    /// Returns the number of moves played to reach the cursor.
    pub fn ply(&self) -> usize {
        let mut count = 0;
        let mut node = self.cursor;
        while let Some(parent) = self.nodes[node].parent {
            count += 1;
            node = parent;
        }

        count
    }

    /// Replaces the comment of the move addressed by `handle` in the given flattening. An empty
    /// or all-whitespace `text` removes the comment. Editing a comment invalidates all
    /// previously issued display handles.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::StaleHandle`] if the tree was edited after `flat` was built.
    ///
    /// # Panics
    ///
    /// Panics on an out-of-range handle, like [`jump_to`](GameTree::jump_to).
    pub fn attach_comment(&mut self, flat: &FlatIndex, handle: usize, text: &str) -> Result<()> {
        let node = self.resolve(flat, handle)?;
        self.nodes[node].comment = if text.trim().is_empty() {
            None
        } else {
            Some(text.to_owned())
        };
        self.revision += 1;

        Ok(())
    }

    /// Returns the game result, if the game is over.
    pub fn result(&self) -> Option<GameResult> {
        self.result
    }

    /// Sets the game result. `None` marks the game as still in progress.
    pub fn set_result(&mut self, result: Option<GameResult>) {
        self.result = result;
    }

    /// Returns the tag pairs of the game.
    pub fn tags(&self) -> &HashMap<String, String> {
        &self.tags
    }

    /// Returns the value of the named tag pair, if present.
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(|value| value.as_str())
    }

    /// Sets a tag pair.
    pub fn set_tag(&mut self, name: &str, value: &str) {
        self.tags.insert(name.to_owned(), value.to_owned());
    }

    /// Serializes the whole tree (mainline, variations and comments) to movetext, including the
    /// trailing result token.
    pub fn to_movetext(&self) -> String {
        crate::movetext::movetext_to_string(self)
    }

    /// Returns a full PGN representation of the game: tag pairs, then movetext.
    ///
    /// `Result` and, for games with a non-standard start, `SetUp` and `FEN` tags are filled in
    /// from the tree's own state, overriding any stored values.
    pub fn to_pgn(&self) -> String {
        crate::movetext::game_to_string(self)
    }

    /// Resolves a display handle against the current revision.
    fn resolve(&self, flat: &FlatIndex, handle: usize) -> Result<usize> {
        if flat.revision() != self.revision {
            return Err(Error::StaleHandle);
        }

        match flat.node_at(handle) {
            Some(node) => Ok(node),
            None => panic!("handle {} out of range for a flattening of {} moves",
                handle, flat.len()),
        }
    }

    // ------------------------------------------------------------------------------------------
    // crate-internal access for the flattener and the movetext reader/writer

    pub(crate) fn root(&self) -> usize {
        ROOT
    }

    pub(crate) fn cursor_index(&self) -> usize {
        self.cursor
    }

    pub(crate) fn set_cursor(&mut self, node: usize) {
        debug_assert!(node < self.nodes.len());
        self.cursor = node;
    }

    pub(crate) fn parent_of(&self, node: usize) -> Option<usize> {
        self.nodes[node].parent
    }

    pub(crate) fn children_of(&self, node: usize) -> &[usize] {
        &self.nodes[node].children
    }

    pub(crate) fn token_of(&self, node: usize) -> Option<&MoveToken> {
        self.nodes[node].mv.as_ref()
    }

    pub(crate) fn comment_of(&self, node: usize) -> Option<&str> {
        self.nodes[node].comment.as_deref()
    }

    /// Merges parsed comment text into a node, joining multiple blocks with a space.
    pub(crate) fn append_comment(&mut self, node: usize, text: &str) {
        match &mut self.nodes[node].comment {
            Some(comment) => {
                comment.push(' ');
                comment.push_str(text);
            },
            None => self.nodes[node].comment = Some(text.to_owned()),
        }
        self.revision += 1;
    }

    /// The ply index of the first move of the game, taking a non-standard setup into account.
    /// Even plies are white moves.
    pub(crate) fn base_ply(&self) -> u32 {
        match &self.setup {
            Some(setup) => 2*(setup.fullmove - 1) + (setup.mover == Color::Black) as u32,
            None => 0,
        }
    }
}

impl Default for GameTree {
    fn default() -> Self {
        Self::new()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ***************************************** UNIT TESTS ***************************************** //
////////////////////////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::flatten;

    fn mv(s: &str) -> MoveToken {
        s.parse().expect("INFALLIBLE")
    }

    #[test]
    fn repeated_move_reuses_the_node() {
        let mut tree = GameTree::new();
        tree.make_move(mv("e2e4"));
        tree.undo();
        tree.make_move(mv("e2e4"));

        assert_eq!(tree.node_count(), 2);
        assert_eq!(tree.ply(), 1);
    }

    #[test]
    fn new_move_becomes_newest_variation() {
        let mut tree = GameTree::new();
        tree.make_move(mv("e4"));
        tree.undo();
        tree.make_move(mv("d4"));
        tree.undo();

        let vars = tree.variations();
        assert_eq!(vars.len(), 2);
        assert_eq!(vars[0].mv, mv("e4"));
        assert_eq!(vars[1].mv, mv("d4"));
    }

    #[test]
    fn undo_then_redo_returns_to_the_same_node() {
        let mut tree = GameTree::new();
        tree.make_move(mv("e4"));
        tree.make_move(mv("e5"));
        let before = tree.moves_to_cursor();

        assert!(tree.undo());
        tree.redo(0).expect("INFALLIBLE");
        assert_eq!(tree.moves_to_cursor(), before);
    }

    #[test]
    fn undo_at_the_root_is_a_no_op() {
        let mut tree = GameTree::new();
        assert!(!tree.undo());
        assert_eq!(tree.ply(), 0);
    }

    #[test]
    fn redo_without_a_variation_fails() {
        let mut tree = GameTree::new();
        assert_eq!(tree.redo(0), Err(Error::NoSuchVariation));

        tree.make_move(mv("e4"));
        tree.undo();
        assert_eq!(tree.redo(1), Err(Error::NoSuchVariation));
        assert!(tree.redo(0).is_ok());
    }

    #[test]
    fn jump_to_follows_the_flattening() {
        let mut tree = GameTree::new();
        tree.make_move(mv("e4"));
        tree.make_move(mv("e5"));
        tree.make_move(mv("Nf3"));

        let flat = flatten(&tree);
        tree.jump_to(&flat, 1).expect("INFALLIBLE");
        assert_eq!(tree.moves_to_cursor(), vec![mv("e4"), mv("e5")]);
    }

    #[test]
    fn edits_invalidate_handles() {
        let mut tree = GameTree::new();
        tree.make_move(mv("e4"));

        let flat = flatten(&tree);
        tree.make_move(mv("e5"));
        assert_eq!(tree.jump_to(&flat, 0), Err(Error::StaleHandle));

        let flat = flatten(&tree);
        tree.attach_comment(&flat, 1, "the open game").expect("INFALLIBLE");
        assert_eq!(tree.jump_to(&flat, 0), Err(Error::StaleHandle));
    }

    #[test]
    fn reentering_a_variation_keeps_handles_valid() {
        let mut tree = GameTree::new();
        tree.make_move(mv("e4"));
        tree.undo();

        let flat = flatten(&tree);
        tree.make_move(mv("e4"));
        assert!(tree.jump_to(&flat, 0).is_ok());
    }

    #[test]
    fn jump_to_end_follows_the_mainline() {
        let mut tree = GameTree::new();
        tree.make_move(mv("e4"));
        tree.make_move(mv("e5"));
        tree.undo();
        tree.make_move(mv("c5"));   // variation stays off the mainline

        tree.jump_to_end();
        assert_eq!(tree.moves_to_cursor(), vec![mv("e4"), mv("e5")]);
    }

    #[test]
    fn setup_parsing() {
        let setup = Setup::parse("8/8/8/8/8/4k3/8/4K2R b K - 3 40").expect("INFALLIBLE");
        assert_eq!(setup.mover(), Color::Black);
        assert_eq!(setup.fullmove(), 40);

        assert!(Setup::parse("not a fen").is_err());
        assert!(Setup::parse("8/8/8/8/8/4k3/8 x - - 0 1").is_err());
    }

    #[test]
    fn move_tokens_reject_numbers_and_results() {
        assert!("e4".parse::<MoveToken>().is_ok());
        assert!("Nf3+".parse::<MoveToken>().is_ok());
        assert!("O-O-O".parse::<MoveToken>().is_ok());
        assert!("a7a8q".parse::<MoveToken>().is_ok());

        assert!("12".parse::<MoveToken>().is_err());
        assert!("1-0".parse::<MoveToken>().is_err());
        assert!("1/2-1/2".parse::<MoveToken>().is_err());
        assert!("{oops}".parse::<MoveToken>().is_err());
        assert!("".parse::<MoveToken>().is_err());
    }
}
