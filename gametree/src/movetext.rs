//! Reading and writing of games in standard movetext notation.
//
//  Copyright 2021 Michael Leany
//
//  This Source Code Form is subject to the terms of the Mozilla Public
//  License, v. 2.0. If a copy of the MPL was not distributed with this
//  file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
////////////////////////////////////////////////////////////////////////////////////////////////////
use std::io;
use std::io::{BufRead, BufReader, Read};
use lazy_static::lazy_static;
use regex::Regex;
use crate::tree::{GameResult, GameTree, MoveToken};
use crate::{Error, Result};

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Returns an iterator over the games of a file containing any number of concatenated PGN games.
pub fn read_games<R: Read>(reader: R) -> ReadGames<R> {
    ReadGames{ reader: BufReader::new(reader), buffer: String::new() }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// An iterator over PGN games read from a `Read`er. Reading can fail, so the item is a
/// `std::io::Result`.
#[derive(Debug)]
pub struct ReadGames<R: Read> {
    reader: BufReader<R>,
    buffer: String,
}

impl<R: Read> Iterator for ReadGames<R> {
    type Item = io::Result<GameText>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut tags = Vec::new();
        let mut move_text = String::new();

        loop {
            let s = self.buffer.trim();

            if s.starts_with('[') {
                if move_text.is_empty() {
                    tags.push(s.to_owned());
                    self.buffer = String::new();
                } else {
                    // a tag pair after movetext starts the next game
                    return Some(Ok(GameText{ tags, move_text }));
                }
            } else if !s.is_empty() {
                move_text += " ";
                move_text += s;
            }

            self.buffer.clear();
            match self.reader.read_line(&mut self.buffer) {
                Ok(0) => {
                    if tags.is_empty() && move_text.is_empty() {
                        return None;
                    } else {
                        return Some(Ok(GameText{ tags, move_text }));
                    }
                },
                Err(error) => return Some(Err(error)),
                _ => {},
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// The raw text of an individual game, split from its neighbors but not yet parsed.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GameText {
    tags: Vec<String>,
    move_text: String,
}

impl GameText {
    /// Returns the list of tag pair lines as raw (unparsed) strings.
    pub fn tag_text(&self) -> &[String] {
        &self.tags
    }

    /// Returns the raw movetext.
    pub fn move_text(&self) -> &str {
        &self.move_text
    }

    /// Parses the game into a [`GameTree`].
    pub fn parse(&self) -> Result<GameTree> {
        parse_parts(&self.tags, &self.move_text)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Parses the text of a single game (tag pairs followed by movetext) into a [`GameTree`].
///
/// The cursor of the returned tree is at the start of the game.
pub fn parse_game(text: &str) -> Result<GameTree> {
    let mut tags = Vec::new();
    let mut move_text = String::new();

    for line in text.lines() {
        let s = line.trim();
        if s.starts_with('[') && move_text.is_empty() {
            tags.push(s.to_owned());
        } else if !s.is_empty() {
            move_text += " ";
            move_text += s;
        }
    }

    parse_parts(&tags, &move_text)
}

fn parse_parts(tags: &[String], move_text: &str) -> Result<GameTree> {
    lazy_static! {
        static ref TAG: Regex = Regex::new(r#"^\[\s*(\w+)\s+"(.*)"\s*\]$"#).expect("INFALLIBLE");
    }

    let mut pairs = Vec::new();
    for line in tags {
        let caps = TAG.captures(line).ok_or(Error::InvalidTagPair)?;
        pairs.push((caps[1].to_owned(), caps[2].to_owned()));
    }

    let mut tree = match pairs.iter().find(|(name, _)| name == "FEN") {
        Some((_, fen)) => GameTree::from_fen(fen)?,
        None => GameTree::new(),
    };

    for (name, value) in &pairs {
        tree.set_tag(name, value);
    }

    // the Result tag is a fallback; a trailing result token overrides it
    if let Some((_, value)) = pairs.iter().find(|(name, _)| name == "Result") {
        if let Ok(result) = value.parse() {
            tree.set_result(Some(result));
        }
    }

    parse_movetext(&mut tree, move_text)?;
    tree.jump_to_start();

    Ok(tree)
}

/// Builds out the tree from movetext. Moves advance the cursor, `(` backs up to the branch point,
/// `)` returns to where the variation interrupted the line, comments attach to the move just
/// played (or to the root, before any move). NAGs and `;` comments are consumed and dropped.
fn parse_movetext(tree: &mut GameTree, text: &str) -> Result<()> {
    let mut stack: Vec<usize> = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => { },
            '{' => {
                let rest = &text[i + c.len_utf8()..];
                let end = rest.find('}').ok_or(Error::UnterminatedComment)?;
                let comment = rest[..end].trim();
                if !comment.is_empty() {
                    tree.append_comment(tree.cursor_index(), comment);
                }
                let close = i + c.len_utf8() + end;
                while let Some(&(j, _)) = chars.peek() {
                    if j > close {
                        break;
                    }
                    chars.next();
                }
            },
            '}' => return Err(Error::UnterminatedComment),
            '(' => {
                let cursor = tree.cursor_index();
                let parent = tree.parent_of(cursor).ok_or(Error::VariationAtStart)?;
                stack.push(cursor);
                tree.set_cursor(parent);
            },
            ')' => {
                let node = stack.pop().ok_or(Error::UnbalancedVariation)?;
                tree.set_cursor(node);
            },
            ';' => {
                while let Some(&(_, d)) = chars.peek() {
                    if d == '\n' {
                        break;
                    }
                    chars.next();
                }
            },
            '$' => {
                while let Some(&(_, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    chars.next();
                }
            },
            _ => {
                let start = i;
                let mut end = i + c.len_utf8();
                while let Some(&(j, d)) = chars.peek() {
                    if d.is_whitespace() || "(){};".contains(d) {
                        break;
                    }
                    end = j + d.len_utf8();
                    chars.next();
                }
                word(tree, &text[start..end])?;
            },
        }
    }

    if stack.is_empty() {
        Ok(())
    } else {
        Err(Error::UnbalancedVariation)
    }
}

/// Handles one whitespace-delimited movetext word: a result token, a move number (possibly glued
/// to its move, as in `1.e4`), or a move.
fn word(tree: &mut GameTree, word: &str) -> Result<()> {
    if word == "*" {
        tree.set_result(None);
        return Ok(());
    }
    if let Ok(result) = word.parse::<GameResult>() {
        tree.set_result(Some(result));
        return Ok(());
    }

    let mut token = word;
    if token.starts_with(|c: char| c.is_ascii_digit()) {
        let digits = token.find(|c: char| !c.is_ascii_digit()).unwrap_or(token.len());
        let rest = &token[digits..];

        if rest.is_empty() {
            return Ok(()); // a bare move number
        }
        if rest.starts_with('.') {
            let dots = rest.find(|c| c != '.').unwrap_or(rest.len());
            token = &rest[dots..];
            if token.is_empty() {
                return Ok(());
            }
        }
        // anything else (eg. 0-0) is the move itself
    }

    tree.make_move(token.parse::<MoveToken>()?);

    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Serializes the tree's movetext, including the trailing result token. This is the print order
/// the flattener and the display handles follow: every variation is written in full, in
/// parentheses, immediately after the move it is an alternative to.
pub(crate) fn movetext_to_string(tree: &GameTree) -> String {
    let mut words = Vec::new();

    if let Some(comment) = tree.comment_of(tree.root()) {
        push_comment(&mut words, comment);
    }
    write_line(tree, tree.root(), tree.base_ply(), true, &mut words);

    words.push(match tree.result() {
        Some(result) => result.to_string(),
        None => "*".to_owned(),
    });

    words.join(" ")
}

/// Writes the continuation of `node`. `ply` is the global ply index of the next move; `force`
/// requires a `N...` number in front of a black move (after a comment, a variation, or at the
/// start of a line).
fn write_line(tree: &GameTree, node: usize, ply: u32, force: bool, words: &mut Vec<String>) {
    let children = tree.children_of(node);
    let (&main, variations) = match children.split_first() {
        Some(split) => split,
        None => return,
    };

    emit_move(tree, main, ply, force, words);
    let mut cont_force = false;
    if let Some(comment) = tree.comment_of(main) {
        push_comment(words, comment);
        cont_force = true;
    }

    for &var in variations {
        words.push("(".to_owned());
        emit_move(tree, var, ply, true, words);
        let mut var_force = false;
        if let Some(comment) = tree.comment_of(var) {
            push_comment(words, comment);
            var_force = true;
        }
        write_line(tree, var, ply + 1, var_force, words);
        words.push(")".to_owned());
        cont_force = true;
    }

    write_line(tree, main, ply + 1, cont_force, words);
}

fn emit_move(tree: &GameTree, node: usize, ply: u32, force: bool, words: &mut Vec<String>) {
    if ply % 2 == 0 {
        words.push(format!("{}.", ply/2 + 1));
    } else if force {
        words.push(format!("{}...", ply/2 + 1));
    }

    words.push(tree.token_of(node).expect("INFALLIBLE").to_string());
}

fn push_comment(words: &mut Vec<String>, comment: &str) {
    // braces cannot be escaped inside a comment
    let text: String = comment.chars()
        .map(|c| if c == '}' || c == '\n' { ' ' } else { c })
        .collect();
    words.push(format!("{{{}}}", text.trim()));
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Returns a full PGN representation of the game, in the shape produced for every saved game:
/// the seven-tag roster (filling in `?` placeholders), any further tags in sorted order, a blank
/// line, then movetext wrapped at 80 bytes.
pub(crate) fn game_to_string(tree: &GameTree) -> String {
    let mut tags = tree.tags().clone();

    if let Some(setup) = tree.setup() {
        tags.insert("SetUp".to_owned(), "1".to_owned());
        tags.insert("FEN".to_owned(), setup.fen().to_owned());
    }

    let result = match tree.result() {
        Some(result) => result.to_string(),
        None => "*".to_owned(),
    };
    tags.insert("Result".to_owned(), result);

    let mut tag_list = String::new();
    for &name in &["Event", "Site", "Date", "Round", "White", "Black", "Result"] {
        let value = match (name, tags.remove(name)) {
            (_, Some(value)) => value,
            ("Date", None) => "????.??.??".to_owned(),
            (_, None) => "?".to_owned(),
        };

        tag_list += &format!("[{} \"{}\"]\n", name, value);
    }

    let mut names: Vec<_> = tags.keys().cloned().collect();
    names.sort_unstable();
    for name in &names {
        tag_list += &format!("[{} \"{}\"]\n", name, tags[name]);
    }

    let mut move_text = String::new();
    let mut width = 0;
    for word in movetext_to_string(tree).split(' ') {
        // split into lines of no more than 80 bytes each
        if width + word.len() < 80 && width > 0 {
            move_text += " ";
            width += 1;
        } else if width > 0 {
            move_text += "\n";
            width = 0;
        }
        move_text += word;
        width += word.len();
    }

    format!("{}\n{}\n", tag_list, move_text)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ***************************************** UNIT TESTS ***************************************** //
////////////////////////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use super::*;

    fn mv(s: &str) -> MoveToken {
        s.parse().expect("INFALLIBLE")
    }

    #[test]
    fn writes_variations_and_comments() {
        let mut tree = GameTree::new();
        tree.make_move(mv("e4"));
        tree.make_move(mv("e5"));
        tree.make_move(mv("Nf3"));
        tree.jump_to_start();
        tree.make_move(mv("e4"));
        tree.make_move(mv("c5"));
        tree.make_move(mv("Nf3"));

        let flat = crate::flatten::flatten(&tree);
        tree.attach_comment(&flat, 1, "the open game").expect("INFALLIBLE");

        assert_eq!(
            tree.to_movetext(),
            "1. e4 e5 {the open game} ( 1... c5 2. Nf3 ) 2. Nf3 *"
        );
    }

    #[test]
    fn empty_tree_serializes_to_a_result_token() {
        assert_eq!(GameTree::new().to_movetext(), "*");
    }

    #[test]
    fn parses_nested_variations() {
        let tree = parse_game("1. e4 e5 (1... c5 2. Nf3 (2. c3 d5)) 2. Nf3 1-0")
            .expect("INFALLIBLE");

        assert_eq!(tree.result(), Some(GameResult::WhiteWins));
        assert_eq!(
            tree.to_movetext(),
            "1. e4 e5 ( 1... c5 2. Nf3 ( 2. c3 d5 ) ) 2. Nf3 1-0"
        );
    }

    #[test]
    fn parses_glued_move_numbers() {
        let tree = parse_game("1.e4 e5 2.Nf3 *").expect("INFALLIBLE");
        assert_eq!(tree.to_movetext(), "1. e4 e5 2. Nf3 *");
    }

    #[test]
    fn a_leading_comment_attaches_to_the_root() {
        let tree = parse_game("{a fresh start} 1. e4 *").expect("INFALLIBLE");
        assert_eq!(tree.to_movetext(), "{a fresh start} 1. e4 *");
    }

    #[test]
    fn nags_and_line_comments_are_dropped() {
        let tree = parse_game("1. e4 $1 e5 ; best by test\n2. Nf3 *").expect("INFALLIBLE");
        assert_eq!(tree.to_movetext(), "1. e4 e5 2. Nf3 *");
    }

    #[test]
    fn setup_games_restate_the_number() {
        let mut tree = GameTree::from_fen("8/8/8/8/8/4k3/8/4K2R b K - 3 40").expect("INFALLIBLE");
        tree.make_move(mv("Kd3"));
        tree.make_move(mv("O-O"));
        assert_eq!(tree.to_movetext(), "40... Kd3 41. O-O *");
    }

    #[test]
    fn malformed_movetext_is_rejected() {
        assert_eq!(parse_game("(1. e4)").unwrap_err(), Error::VariationAtStart);
        assert_eq!(parse_game("1. e4 (1. d4").unwrap_err(), Error::UnbalancedVariation);
        assert_eq!(parse_game("1. e4 ) e5").unwrap_err(), Error::UnbalancedVariation);
        assert_eq!(parse_game("1. e4 {never closed").unwrap_err(), Error::UnterminatedComment);
    }

    #[test]
    fn round_trip_is_a_fixed_point() {
        let text = "\
            [Event \"casual blitz\"]\n\
            [White \"us\"]\n\
            [Black \"them\"]\n\
            \n\
            1. e4 {main} e5 (1... c5 2. Nf3 d6 {najdorf next}) (1... e6) 2. Nf3 Nc6 1/2-1/2\n";

        let first = parse_game(text).expect("INFALLIBLE").to_pgn();
        let second = parse_game(&first).expect("INFALLIBLE").to_pgn();
        assert_eq!(first, second);
    }

    #[test]
    fn tags_round_trip_through_the_roster() {
        let tree = parse_game("[Site \"somewhere\"]\n[ECO \"B20\"]\n\n1. e4 c5 *")
            .expect("INFALLIBLE");
        let pgn = tree.to_pgn();

        assert!(pgn.starts_with("[Event \"?\"]\n[Site \"somewhere\"]\n"));
        assert!(pgn.contains("[ECO \"B20\"]"));
        assert!(pgn.ends_with("1. e4 c5 *\n"));
    }

    #[test]
    fn read_games_splits_concatenated_games() {
        let text = "\
            [Event \"one\"]\n\
            \n\
            1. e4 e5 *\n\
            \n\
            [Event \"two\"]\n\
            [Site \"here\"]\n\
            \n\
            1. d4 d5 1/2-1/2\n";

        let games: Vec<_> = read_games(text.as_bytes())
            .map(|game| game.expect("INFALLIBLE"))
            .collect();
        assert_eq!(games.len(), 2);

        let first = games[0].parse().expect("INFALLIBLE");
        assert_eq!(first.tag("Event"), Some("one"));
        assert_eq!(first.result(), None);

        let second = games[1].parse().expect("INFALLIBLE");
        assert_eq!(second.tag("Event"), Some("two"));
        assert_eq!(second.result(), Some(GameResult::Draw));
    }

    #[test]
    fn bad_tag_pairs_are_rejected() {
        assert_eq!(parse_game("[Event no quotes]\n\n1. e4 *").unwrap_err(), Error::InvalidTagPair);
    }
}
