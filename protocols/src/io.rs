//! Handles the input and output of the external tool subprocesses.
//
//  Copyright 2021 Michael Leany
//
//  This Source Code Form is subject to the terms of the Mozilla Public
//  License, v. 2.0. If a copy of the MPL was not distributed with this
//  file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
////////////////////////////////////////////////////////////////////////////////////////////////////
use std::ffi::OsStr;
use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::mpsc::*;
use std::thread;
use std::time::Duration;
use log::{debug, error, info};

/// Provides a pollable interface with a subprocess. Output is forwarded from reader threads in
/// raw read-sized chunks (decoded as UTF-8 with replacement), so the receiving parser, not the
/// pipe, decides what a line is. A closed channel means the corresponding pipe reached its end.
/// All traffic is logged using the log crate (assuming a logger is set up).
#[derive(Debug)]
pub struct Subprocess {
    name: String,
    child: Child,
    stdin: ChildStdin,
    output: Receiver<String>,
    errors: Option<Receiver<String>>,
}

impl Subprocess {
    /// Launches a subprocess, keeping its standard error on a channel of its own (see
    /// [`recv_err`](Subprocess::recv_err)).
    pub fn launch<T, U>(cmd: T, args: &[U], name: &str) -> std::io::Result<Self>
    where T: AsRef<OsStr>, U: AsRef<OsStr> {
        Self::spawn(cmd, args, name, false)
    }

    /// Launches a subprocess with its standard error chunks interleaved into the output channel,
    /// for tools which are read as one merged stream.
    pub fn launch_merged<T, U>(cmd: T, args: &[U], name: &str) -> std::io::Result<Self>
    where T: AsRef<OsStr>, U: AsRef<OsStr> {
        Self::spawn(cmd, args, name, true)
    }

    fn spawn<T, U>(cmd: T, args: &[U], name: &str, merge: bool) -> std::io::Result<Self>
    where T: AsRef<OsStr>, U: AsRef<OsStr> {
        let mut child = Command::new(&cmd)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        info!("[{}] launched: {}", name, cmd.as_ref().to_string_lossy());

        let stdin = child.stdin.take().expect("INFALLIBLE");
        let stdout = child.stdout.take().expect("INFALLIBLE");
        let stderr = child.stderr.take().expect("INFALLIBLE");

        let (sender, output) = channel();
        Self::reader(stdout, sender.clone(), name.to_owned());

        let errors = if merge {
            Self::reader(stderr, sender, name.to_owned());
            None
        } else {
            let (err_sender, err_receiver) = channel();
            Self::reader(stderr, err_sender, name.to_owned());
            Some(err_receiver)
        };

        Ok(Subprocess {
            name: name.to_owned(),
            child,
            stdin,
            output,
            errors,
        })
    }

    /// A thread which forwards raw chunks from `pipe` until it closes or the receiver goes away.
    fn reader<R>(mut pipe: R, sender: Sender<String>, name: String)
    where R: Read + Send + 'static {
        thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match pipe.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                        debug!("[{}] -> {}", name, chunk.trim_end());
                        if sender.send(chunk).is_err() {
                            break;
                        }
                    },
                    Err(err) => {
                        error!("[{}] read error: {}", name, err);
                        break;
                    },
                }
            }
        });
    }

    /// Returns the name the subprocess was launched under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sends one command line to the subprocess.
    pub fn send(&mut self, line: &str) -> std::io::Result<()> {
        info!("[{}] <- {}", self.name, line);
        writeln!(self.stdin, "{}", line)?;
        self.stdin.flush()
    }

    /// Retrieves an output chunk. Blocks until one is available; an error means the output pipe
    /// has closed.
    pub fn recv(&self) -> Result<String, RecvError> {
        self.output.recv()
    }

    /// Tries to retrieve an output chunk without blocking.
    pub fn try_recv(&self) -> Result<String, TryRecvError> {
        self.output.try_recv()
    }

    /// Retrieves an output chunk, giving up after `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<String, RecvTimeoutError> {
        self.output.recv_timeout(timeout)
    }

    /// Drains whatever the subprocess has written to its standard error so far. Returns an empty
    /// string for merged-stream subprocesses.
    pub fn recv_err(&self) -> String {
        let mut text = String::new();
        if let Some(errors) = &self.errors {
            while let Ok(chunk) = errors.try_recv() {
                text += &chunk;
            }
        }

        text
    }

    /// Kills the subprocess and reaps it. Used for cancellation; any partially parsed output is
    /// the parser's problem, exactly as for a stream that ends on its own.
    pub fn terminate(&mut self) -> std::io::Result<ExitStatus> {
        if self.child.try_wait()?.is_none() {
            self.child.kill()?;
        }
        self.child.wait()
    }

    /// Waits for the subprocess to exit on its own.
    pub fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait()
    }
}
