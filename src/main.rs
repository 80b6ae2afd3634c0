//! The tabiya driver: engine analysis and batch queries, headless.
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

use std::fs::{write, File};
use std::path::PathBuf;
use clap::{crate_version, App, AppSettings, Arg, ArgMatches, SubCommand};
use log::{debug, error, info, warn};
use simplelog::{Config, LevelFilter, WriteLogger};
use chrono::Local;
use gametree::{flatten, read_games, Color, GameTree, Setup};
use protocols::cql::{QueryEvent, QueryRunner};
use protocols::uci::{EngineEvent, Go, UciEngine};
use protocols::Analysis;
use tabiya::config;
use tabiya::config::Tools;

const STARTPOS: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

fn main() -> Result<(), Error> {
    let matches =
        App::new("Tabiya")
            .version(crate_version!())
            .author("Mike Leany")
            .about("Headless core of a chess study tool: engine analysis of positions and \
                    batch queries over PGN databases.")
            .setting(AppSettings::SubcommandRequired)
            .arg(Arg::with_name("log")
                .long("log")
                .short("l")
                .global(true)
                .help("Turns on logging"))
            .arg(Arg::with_name("log-file")
                .long("log-file")
                .global(true)
                .value_name("LOG_FILE")
                .takes_value(true)
                .default_value("tabiya.log")
                .help("Sets the log file if logging is turned on"))
            .arg(Arg::with_name("log-level")
                .long("log-level")
                .global(true)
                .value_name("LEVEL")
                .takes_value(true)
                .default_value("info")
                .help("Sets the log level if logging is turned on"))
            .arg(Arg::with_name("tools")
                .long("tools")
                .global(true)
                .value_name("FILE")
                .takes_value(true)
                .help("Sets the tools file (defaults to ~/.tabiya/tools.yaml)"))
            .subcommand(SubCommand::with_name("analyze")
                .about("Analyzes a position with the configured engine")
                .arg(Arg::with_name("depth")
                    .long("depth")
                    .short("d")
                    .value_name("PLIES")
                    .takes_value(true)
                    .default_value("20")
                    .help("Depth to search the position"))
                .arg(Arg::with_name("time")
                    .long("time")
                    .short("t")
                    .value_name("MS")
                    .takes_value(true)
                    .conflicts_with("depth")
                    .help("Searches for a fixed time instead of a fixed depth"))
                .arg(Arg::with_name("threads")
                    .long("threads")
                    .value_name("N")
                    .takes_value(true)
                    .default_value("1")
                    .help("Number of search threads the engine may use"))
                .arg(Arg::with_name("engine")
                    .long("engine")
                    .value_name("EXECUTABLE")
                    .takes_value(true)
                    .help("Overrides the configured engine executable"))
                .arg(Arg::with_name("out")
                    .long("out")
                    .short("o")
                    .value_name("PGN_FILE")
                    .takes_value(true)
                    .help("Writes the analysis as a PGN game"))
                .arg(Arg::with_name("fen")
                    .value_name("FEN_STRING")
                    .default_value(STARTPOS)
                    .hide_default_value(true)
                    .help("Position to analyze in Forsyth-Edwards Notation (FEN)")))
            .subcommand(SubCommand::with_name("query")
                .about("Runs a query file over a PGN database and collects the matching games")
                .arg(Arg::with_name("input")
                    .long("input")
                    .short("i")
                    .value_name("PGN_FILE")
                    .takes_value(true)
                    .required_unless("games")
                    .help("The PGN database to search"))
                .arg(Arg::with_name("games")
                    .long("games")
                    .value_names(&["START", "END"])
                    .number_of_values(2)
                    .conflicts_with("input")
                    .help("Re-runs a prepared query for the given game number range"))
                .arg(Arg::with_name("cql")
                    .long("cql")
                    .value_name("EXECUTABLE")
                    .takes_value(true)
                    .help("Overrides the configured query tool executable"))
                .arg(Arg::with_name("out")
                    .long("out")
                    .short("o")
                    .value_name("PGN_FILE")
                    .takes_value(true)
                    .help("Writes the matching games to a file"))
                .arg(Arg::with_name("query")
                    .value_name("QUERY_FILE")
                    .required(true)
                    .help("The query to run")))
            .subcommand(SubCommand::with_name("show")
                .about("Prints the move list of the first game of a PGN file, with its \
                        display handles")
                .arg(Arg::with_name("file")
                    .value_name("PGN_FILE")
                    .required(true)
                    .help("The file to read")))
            .get_matches();

    let log_file = PathBuf::from(matches.value_of_os("log-file").expect("INFALLIBLE"));
    let log_level = match matches.value_of("log-level") {
        Some("off") => LevelFilter::Off,
        Some("error") => LevelFilter::Error,
        Some("warn") => LevelFilter::Warn,
        Some("info") => LevelFilter::Info,
        Some("debug") => LevelFilter::Debug,
        Some("trace") => LevelFilter::Trace,
        Some(level) => return Err(Error(format!("{}: invalid log level", level))),
        None => unreachable!(),
    };
    let _logger = if matches.is_present("log") {
        WriteLogger::init(
            log_level,
            Config::default(),
            File::create(&log_file).map_err(|err| {
                Error(format!("{}: {}", log_file.display(), err))
            })?)
    } else {
        WriteLogger::init(LevelFilter::Off, Config::default(), std::io::sink())
    };

    let tools_file = match matches.value_of_os("tools") {
        Some(path) => PathBuf::from(path),
        None => config::default_tools_file(),
    };
    let tools = config::read_tools_file(&tools_file)?;

    match matches.subcommand() {
        ("analyze", Some(matches)) => analyze(matches, &tools),
        ("query", Some(matches)) => query(matches, &tools),
        ("show", Some(matches)) => show(matches),
        _ => unreachable!(),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Runs the engine on a position and streams its findings to stdout.
fn analyze(matches: &ArgMatches, tools: &Tools) -> Result<(), Error> {
    let fen = matches.value_of("fen").expect("INFALLIBLE");
    let setup = Setup::parse(fen)?;
    let mover = setup.mover();

    let threads: usize = matches.value_of("threads").expect("INFALLIBLE").parse()?;
    let go = match matches.value_of("time") {
        Some(ms) => Go::Time(ms.parse()?),
        None => Go::Depth(matches.value_of("depth").expect("INFALLIBLE").parse()?),
    };

    let cmd = config::tool_command(tools, "engine", matches.value_of("engine"));
    let mut engine = UciEngine::launch(&cmd[0], &cmd[1..], "engine")?;
    engine.set_threads(threads)?;
    engine.analyze(fen, go)?;

    let mut analysis = Analysis::new();
    while analysis.best_move().is_none() {
        for event in engine.recv()? {
            match &event {
                EngineEvent::Depth(depth) => println!("depth {}", depth),
                EngineEvent::Score(score) =>
                    println!("score {} (white: {})", score, score.white_relative(mover)),
                EngineEvent::Pv(moves) => {
                    let line: Vec<_> = moves.iter().map(|mv| mv.to_string()).collect();
                    println!("pv {}", line.join(" "));
                },
                EngineEvent::BestMove(mv) => println!("bestmove {}", mv),
            }
            analysis.apply(&event);
        }
    }
    engine.quit()?;

    if let Some(out) = matches.value_of("out") {
        write(out, analysis_to_pgn(fen, mover, &analysis)?)?;
        println!("wrote {}", out);
    }

    Ok(())
}

/// Turns a finished analysis into a PGN game: the principal variation as the mainline, with the
/// evaluation attached to its first move as a comment.
fn analysis_to_pgn(fen: &str, mover: Color, analysis: &Analysis)
-> Result<String, Error> {
    let mut tree = if fen == STARTPOS {
        GameTree::new()
    } else {
        GameTree::from_fen(fen)?
    };

    for mv in analysis.pv() {
        tree.make_move(mv.clone());
    }
    if tree.is_empty() {
        if let Some(mv) = analysis.best_move() {
            tree.make_move(mv.clone());
        }
    }

    tree.set_tag("Event", "Engine analysis");
    if let Ok(host) = hostname::get() {
        if let Ok(host) = host.into_string() {
            tree.set_tag("Site", &host);
        }
    }
    tree.set_tag("Date", &Local::today().format("%Y.%m.%d").to_string());
    tree.set_tag("Annotator", "tabiya");

    if let Some(score) = analysis.score() {
        let flat = flatten(&tree);
        if !flat.is_empty() {
            let note = format!("{} at depth {}", score.white_relative(mover), analysis.depth());
            tree.attach_comment(&flat, 0, &note)?;
        }
    }

    Ok(tree.to_pgn())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Runs the query tool, relaying its messages and collecting the matched games.
fn query(matches: &ArgMatches, tools: &Tools) -> Result<(), Error> {
    let query_file = matches.value_of("query").expect("INFALLIBLE");
    let cmd = config::tool_command(tools, "cql", matches.value_of("cql"));

    let mut runner = match matches.values_of("games") {
        Some(mut range) => {
            let start = range.next().expect("INFALLIBLE").parse()?;
            let end = range.next().expect("INFALLIBLE").parse()?;
            QueryRunner::paginate(&cmd[0], start, end, query_file)?
        },
        None => {
            let input = matches.value_of("input").expect("INFALLIBLE");
            QueryRunner::search(&cmd[0], input, query_file)?
        },
    };

    let mut batches = Vec::new();
    while let Some(events) = runner.recv() {
        for event in events {
            handle_query_event(event, &mut batches);
        }
    }

    let truncated = match runner.finish() {
        Ok(events) => {
            for event in events {
                handle_query_event(event, &mut batches);
            }
            None
        },
        Err(err) => Some(err),
    };

    let stderr = runner.stderr_output();
    if !stderr.trim().is_empty() {
        eprintln!("cql: {}", stderr.trim_end());
    }

    let status = runner.wait()?;
    if let Some(err) = truncated {
        return Err(Error(err.to_string()));
    }
    if !status.success() {
        return Err(Error(format!("query tool exited with {}", status)));
    }

    let mut count = 0;
    let mut collected = String::new();
    for batch in &batches {
        for game in read_games(batch.as_bytes()) {
            let tree = game?.parse()?;
            count += 1;
            collected += &tree.to_pgn();
            collected += "\n";
        }
    }
    println!("{} matching game(s)", count);

    if let Some(out) = matches.value_of("out") {
        write(out, collected)?;
        println!("wrote {}", out);
    }

    Ok(())
}

fn handle_query_event(event: QueryEvent, batches: &mut Vec<String>) {
    match event {
        QueryEvent::Message(text) => println!("{}", text),
        QueryEvent::Error(text) => {
            eprintln!("cql: {}", text);
            error!("cql: {}", text);
        },
        QueryEvent::Variable(name, value) => debug!("cql variable {} = {}", name, value),
        QueryEvent::Progress(number) => info!("searching game {}", number),
        QueryEvent::Games(text) => batches.push(text),
        QueryEvent::Finished => info!("query reported a clean exit"),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Prints the flattened move list of the first game of a file.
fn show(matches: &ArgMatches) -> Result<(), Error> {
    let path = matches.value_of("file").expect("INFALLIBLE");
    let game = match read_games(File::open(path)?).next() {
        Some(game) => game?,
        None => return Err(Error(format!("{}: no games found", path))),
    };
    let tree = game.parse()?;

    let flat = flatten(&tree);
    for entry in flat.entries() {
        let number = match entry.color {
            Color::White => format!("{}.", entry.number),
            Color::Black => format!("{}...", entry.number),
        };

        print!("{:4}  {}{} {}", entry.handle, "  ".repeat(entry.depth), number, entry.token);
        if let Some(comment) = &entry.comment {
            print!("  {{{}}}", comment);
        }
        println!();
    }

    println!();
    println!("{}", tree.to_movetext());
    if flat.is_empty() {
        warn!("{}: the game has no moves", path);
    }

    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
#[derive(Debug)]
struct Error(String);

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        self.0.fmt(f)
    }
}

impl std::error::Error for Error { }

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error(err.to_string())
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(err: std::num::ParseIntError) -> Self {
        Error(err.to_string())
    }
}

impl From<gametree::Error> for Error {
    fn from(err: gametree::Error) -> Self {
        Error(err.to_string())
    }
}

impl From<protocols::uci::EngineError> for Error {
    fn from(err: protocols::uci::EngineError) -> Self {
        Error(err.to_string())
    }
}

impl From<config::Error> for Error {
    fn from(err: config::Error) -> Self {
        Error(err.to_string())
    }
}
