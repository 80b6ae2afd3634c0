//! Locating and reading the tool configuration.
//
//  Copyright 2021 Michael Leany
//
//  This Source Code Form is subject to the terms of the Mozilla Public
//  License, v. 2.0. If a copy of the MPL was not distributed with this
//  file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
////////////////////////////////////////////////////////////////////////////////////////////////////
use std::collections::HashMap;
use std::fs::{create_dir_all, read_to_string, write};
use std::path::{Path, PathBuf};

/// The command lines of the external tools, keyed by tool name (`engine` and `cql`), as stored
/// in the tools file. Each entry is the executable followed by any fixed arguments.
pub type Tools = HashMap<String, Vec<String>>;

/// Returns the default tools file location: `.tabiya/tools.yaml` under the home directory, or
/// under the current directory when there is no home.
pub fn default_tools_file() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tabiya")
        .join("tools.yaml")
}

/// Reads a tools file. A missing file yields an empty map rather than an error, so a fresh
/// installation works with command-line overrides alone.
pub fn read_tools_file(path: &Path) -> Result<Tools, Error> {
    if !path.exists() {
        return Ok(Tools::new());
    }
    let s = read_to_string(path)?;

    Ok(serde_yaml::from_str(&s)?)
}

/// Writes a tools file, creating its directory if needed.
pub fn write_tools_file(path: &Path, tools: &Tools) -> Result<(), Error> {
    if let Some(dir) = path.parent() {
        create_dir_all(dir)?;
    }
    let s = serde_yaml::to_string(tools)?;
    write(path, s)?;

    Ok(())
}

/// Picks the command line for `name`: an explicit override wins, then the tools file, then the
/// bare tool name itself (found through `PATH`).
pub fn tool_command(tools: &Tools, name: &str, fallback_override: Option<&str>) -> Vec<String> {
    if let Some(cmd) = fallback_override {
        return vec![cmd.to_string()];
    }
    match tools.get(name) {
        Some(cmd) if !cmd.is_empty() => cmd.clone(),
        _ => vec![name.to_string()],
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Error reading or writing the configuration
#[derive(Debug)]
pub struct Error(String);

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

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error(err.to_string())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ***************************************** UNIT TESTS ***************************************** //
////////////////////////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn overrides_beat_the_tools_file() {
        let mut tools = Tools::new();
        tools.insert("engine".to_owned(), vec!["stockfish".to_owned(), "--uci".to_owned()]);

        assert_eq!(tool_command(&tools, "engine", None), ["stockfish", "--uci"]);
        assert_eq!(tool_command(&tools, "engine", Some("/opt/other")), ["/opt/other"]);
        assert_eq!(tool_command(&tools, "cql", None), ["cql"]);
    }
}
