//! Flattening of a game tree into movetext print order.
//
//  Copyright 2021 Michael Leany
//
//  This Source Code Form is subject to the terms of the Mozilla Public
//  License, v. 2.0. If a copy of the MPL was not distributed with this
//  file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
////////////////////////////////////////////////////////////////////////////////////////////////////
use crate::tree::{Color, GameTree, MoveToken};

////////////////////////////////////////////////////////////////////////////////////////////////////
/// One displayable move of a flattened game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatEntry {
    /// The move's position in the flattening; its display handle.
    pub handle: usize,
    /// The move itself.
    pub token: MoveToken,
    /// The fullmove number of the move.
    pub number: u32,
    /// The color that played the move.
    pub color: Color,
    /// Variation nesting depth; 0 for the mainline.
    pub depth: usize,
    /// The comment attached to the move, if any.
    pub comment: Option<String>,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// The result of flattening a game tree: every displayable move in exact movetext print order,
/// addressable by a stable integer handle.
///
/// A `FlatIndex` is a derived artifact. It records the tree revision it was built from, and any
/// edit to the tree makes it stale; handles from a stale index are refused by the tree's
/// navigation operations, so the caller must re-flatten after every edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatIndex {
    revision: u64,
    order: Vec<usize>,
    entries: Vec<FlatEntry>,
}

impl FlatIndex {
    /// Returns the entries in print order. An entry's position equals its handle.
    pub fn entries(&self) -> &[FlatEntry] {
        &self.entries
    }

    /// Returns the entry for the given handle, if it exists.
    pub fn get(&self, handle: usize) -> Option<&FlatEntry> {
        self.entries.get(handle)
    }

    /// Returns the number of displayable moves.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the flattened game has no moves.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the tree revision this index was built from.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub(crate) fn node_at(&self, handle: usize) -> Option<usize> {
        self.order.get(handle).copied()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Flattens `tree` into movetext print order: at every position the mainline move comes first,
/// then each variation in full (recursively), then the mainline continues.
///
/// Flattening an unedited tree twice yields identical handles. An empty tree yields an empty
/// index.
pub fn flatten(tree: &GameTree) -> FlatIndex {
    let mut order = Vec::new();
    walk(tree, tree.root(), 0, 0, &mut order);

    let base = tree.base_ply();
    let entries = order.iter()
        .enumerate()
        .map(|(handle, &(node, depth, moves_in))| {
            let ply = base + moves_in - 1;
            FlatEntry {
                handle,
                token: tree.token_of(node).expect("INFALLIBLE").clone(),
                number: ply/2 + 1,
                color: if ply % 2 == 0 { Color::White } else { Color::Black },
                depth,
                comment: tree.comment_of(node).map(|s| s.to_owned()),
            }
        })
        .collect();

    FlatIndex{ revision: tree.revision(), order: order.into_iter().map(|(node, ..)| node).collect(), entries }
}

/// Records the continuations of `node` in print order. `moves_in` counts the moves played from
/// the start of the game to reach `node`.
fn walk(tree: &GameTree, node: usize, depth: usize, moves_in: u32, out: &mut Vec<(usize, usize, u32)>) {
    let children = tree.children_of(node);
    let (&main, variations) = match children.split_first() {
        Some(split) => split,
        None => return,
    };

    out.push((main, depth, moves_in + 1));
    for &var in variations {
        out.push((var, depth + 1, moves_in + 1));
        walk(tree, var, depth + 1, moves_in + 1, out);
    }
    walk(tree, main, depth, moves_in + 1, out);
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ***************************************** UNIT TESTS ***************************************** //
////////////////////////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::MoveToken;

    fn mv(s: &str) -> MoveToken {
        s.parse().expect("INFALLIBLE")
    }

    /// 1. e4 e5 ( 1... c5 2. Nf3 ) 2. Nf3
    fn sample() -> GameTree {
        let mut tree = GameTree::new();
        tree.make_move(mv("e4"));
        tree.make_move(mv("e5"));
        tree.make_move(mv("Nf3"));
        tree.jump_to_start();
        tree.make_move(mv("e4"));
        tree.make_move(mv("c5"));
        tree.make_move(mv("Nf3"));

        tree
    }

    #[test]
    fn empty_tree_flattens_to_nothing() {
        let flat = flatten(&GameTree::new());
        assert!(flat.is_empty());
    }

    #[test]
    fn variations_come_right_after_their_mainline_move() {
        let flat = flatten(&sample());
        let tokens: Vec<_> = flat.entries().iter().map(|e| e.token.to_string()).collect();
        assert_eq!(tokens, ["e4", "e5", "c5", "Nf3", "Nf3"]);

        let depths: Vec<_> = flat.entries().iter().map(|e| e.depth).collect();
        assert_eq!(depths, [0, 0, 1, 1, 0]);
    }

    #[test]
    fn handles_match_positions() {
        let flat = flatten(&sample());
        for (i, entry) in flat.entries().iter().enumerate() {
            assert_eq!(entry.handle, i);
        }
    }

    #[test]
    fn flattening_twice_is_deterministic() {
        let tree = sample();
        assert_eq!(flatten(&tree), flatten(&tree));
    }

    #[test]
    fn numbering_follows_the_setup() {
        let mut tree = GameTree::from_fen("rnbqkbnr/pp1ppppp/8/2p5/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 12")
            .expect("INFALLIBLE");
        tree.make_move(mv("Nc6"));
        tree.make_move(mv("Nf3"));

        let flat = flatten(&tree);
        assert_eq!(flat.get(0).map(|e| (e.number, e.color)), Some((12, Color::Black)));
        assert_eq!(flat.get(1).map(|e| (e.number, e.color)), Some((13, Color::White)));
    }
}
