//! Tests reading and writing complete games (gametree crate)
//
//  Copyright 2021 Michael Leany
//
//  This Source Code Form is subject to the terms of the Mozilla Public
//  License, v. 2.0. If a copy of the MPL was not distributed with this
//  file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
////////////////////////////////////////////////////////////////////////////////////////////////////

use gametree::{flatten, parse_game, read_games};

const ANNOTATED: &str = r#"[Event "Hoogovens Group A"]
[Site "Wijk aan Zee NED"]
[Date "1999.01.20"]
[Round "4"]
[White "Kasparov, Garry"]
[Black "Topalov, Veselin"]
[Result "1-0"]
[ECO "B07"]

1. e4 d6 2. d4 Nf6 3. Nc3 g6 {the Pirc} 4. Be3 Bg7 (4... c6 5. Qd2 b5
(5... Nbd7)) 5. Qd2 c6 1-0
"#;

#[test]
fn annotated_game_round_trips() {
    let tree = parse_game(ANNOTATED).expect("INFALLIBLE");
    let first = tree.to_pgn();
    let second = parse_game(&first).expect("INFALLIBLE").to_pgn();

    assert_eq!(first, second);
}

#[test]
fn flattening_matches_print_order() {
    let tree = parse_game(ANNOTATED).expect("INFALLIBLE");
    let flat = flatten(&tree);

    let tokens: Vec<_> = flat.entries().iter().map(|e| e.token.to_string()).collect();
    assert_eq!(
        tokens,
        ["e4", "d6", "d4", "Nf6", "Nc3", "g6", "Be3", "Bg7", "c6", "Qd2", "b5", "Nbd7",
            "Qd2", "c6"]
    );

    // the comment stays on its move through a parse
    assert_eq!(flat.entries()[5].comment.as_deref(), Some("the Pirc"));

    // variation nesting depths follow the parentheses
    let depths: Vec<_> = flat.entries().iter().map(|e| e.depth).collect();
    assert_eq!(depths, [0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 2, 0, 0]);
}

#[test]
fn navigation_by_handle_after_a_reload() {
    let mut tree = parse_game(ANNOTATED).expect("INFALLIBLE");
    let flat = flatten(&tree);

    // jump to 4... c6, the first move of the first variation
    tree.jump_to(&flat, 8).expect("INFALLIBLE");
    let path: Vec<_> = tree.moves_to_cursor().iter().map(|m| m.to_string()).collect();
    assert_eq!(path, ["e4", "d6", "d4", "Nf6", "Nc3", "g6", "Be3", "c6"]);
}

#[test]
fn a_batch_of_games_loads_one_tree_per_game() {
    let batch = format!("{}\n{}", ANNOTATED, "[Event \"second\"]\n\n1. c4 e5 *\n");

    let trees: Vec<_> = read_games(batch.as_bytes())
        .map(|game| game.expect("io").parse().expect("INFALLIBLE"))
        .collect();

    assert_eq!(trees.len(), 2);
    assert_eq!(trees[0].tag("White"), Some("Kasparov, Garry"));
    assert_eq!(trees[1].tag("Event"), Some("second"));
}
