//! Step command execution
//!
//! Runs a literal argument vector in the current directory and turns its
//! output and exit code into [`Byproducts`]. No timeout and no
//! cancellation: the command runs to completion.

use std::io::{self, Read, Write};
use std::process::{Command, Stdio};
use std::thread;

use steplink_metadata::Byproducts;

use crate::error::{RecordError, RecordResult};

/// What happens to the child's stdout and stderr
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamPolicy {
    /// Inherit the terminal, capture nothing
    #[default]
    Passthrough,

    /// Copy to the terminal and capture
    Tee,
}

impl StreamPolicy {
    pub fn from_record_streams(record_streams: bool) -> Self {
        if record_streams {
            Self::Tee
        } else {
            Self::Passthrough
        }
    }
}

/// Runs step commands under a fixed stream policy
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandRunner {
    policy: StreamPolicy,
}

impl CommandRunner {
    pub fn new(policy: StreamPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> StreamPolicy {
        self.policy
    }

    /// Run `command` to completion.
    ///
    /// An empty command runs nothing and yields empty byproducts.
    pub fn run(&self, command: &[String]) -> RecordResult<Byproducts> {
        let Some((program, args)) = command.split_first() else {
            return Ok(Byproducts::default());
        };

        tracing::info!(command = ?command, policy = ?self.policy, "running step command");

        let byproducts = match self.policy {
            StreamPolicy::Passthrough => run_passthrough(program, args)?,
            StreamPolicy::Tee => run_tee(program, args)?,
        };

        tracing::debug!(return_value = ?byproducts.return_value, "step command finished");
        Ok(byproducts)
    }
}

fn spawn_error(program: &str, source: io::Error) -> RecordError {
    RecordError::ProcessSpawn {
        program: program.to_string(),
        source,
    }
}

fn run_passthrough(program: &str, args: &[String]) -> RecordResult<Byproducts> {
    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|e| spawn_error(program, e))?;

    Ok(Byproducts {
        stdout: String::new(),
        stderr: String::new(),
        return_value: status.code(),
    })
}

fn run_tee(program: &str, args: &[String]) -> RecordResult<Byproducts> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    // One reader per stream so a full stderr pipe cannot stall stdout
    let stdout_handle = thread::spawn(move || match stdout {
        Some(stdout) => tee(stdout, io::stdout()),
        None => Ok(Vec::new()),
    });
    let stderr_handle = thread::spawn(move || match stderr {
        Some(stderr) => tee(stderr, io::stderr()),
        None => Ok(Vec::new()),
    });

    let status = child.wait().map_err(|e| RecordError::io(program, e))?;
    let stdout = join_capture(stdout_handle).map_err(|e| RecordError::io(program, e))?;
    let stderr = join_capture(stderr_handle).map_err(|e| RecordError::io(program, e))?;

    Ok(Byproducts {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        return_value: status.code(),
    })
}

fn join_capture(handle: thread::JoinHandle<io::Result<Vec<u8>>>) -> io::Result<Vec<u8>> {
    handle
        .join()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "stream reader thread panicked"))?
}

/// Copy everything from `reader` into `sink`, returning a copy of the bytes.
///
/// Write failures on the sink (a closed terminal) do not stop the capture.
pub(crate) fn tee<R: Read, W: Write>(mut reader: R, mut sink: W) -> io::Result<Vec<u8>> {
    let mut captured = Vec::new();
    let mut buffer = [0u8; 8192];
    let mut sink_ok = true;

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        captured.extend_from_slice(&buffer[..n]);
        if sink_ok {
            sink_ok = sink.write_all(&buffer[..n]).and_then(|_| sink.flush()).is_ok();
        }
    }

    Ok(captured)
}
