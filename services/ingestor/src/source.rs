//! Snapshot sources.
//!
//! A source produces one complete [`Snapshot`] per call. Two sources exist:
//! a JSON file re-read on every poll, and an external command whose stdout
//! is one JSON snapshot (a scheduler dump wrapper, or `mock-feed --once`).

use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use clusterboard_model::Snapshot;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors produced while fetching a snapshot.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read snapshot file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to run snapshot command {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot command {program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("snapshot command {program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("snapshot is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Something that can be asked for the current scheduler snapshot.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self) -> Result<Snapshot, SourceError>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Reads a JSON snapshot from a file on every fetch.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SnapshotSource for FileSource {
    async fn fetch(&self) -> Result<Snapshot, SourceError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| SourceError::Read {
                path: self.path.clone(),
                source,
            })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

/// Runs a command and parses its stdout as one snapshot.
#[derive(Debug, Clone)]
pub struct CommandSource {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandSource {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

#[async_trait]
impl SnapshotSource for CommandSource {
    async fn fetch(&self) -> Result<Snapshot, SourceError> {
        debug!(program = %self.program, "Running snapshot command");

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SourceError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| SourceError::Timeout {
                program: self.program.clone(),
                timeout: self.timeout,
            })?
            .map_err(|source| SourceError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SourceError::CommandFailed {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }

    fn describe(&self) -> String {
        format!("cmd:{}", self.program)
    }
}

/// Parsed form of `CLUSTERBOARD_SOURCE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    File(PathBuf),
    Command { program: String, args: Vec<String> },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SourceSpecError {
    #[error("source must start with file: or cmd:, got {0:?}")]
    UnknownScheme(String),

    #[error("source {0:?} names nothing to read or run")]
    Empty(String),
}

impl FromStr for SourceSpec {
    type Err = SourceSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("file:") {
            let path = path.trim();
            if path.is_empty() {
                return Err(SourceSpecError::Empty(s.to_string()));
            }
            return Ok(SourceSpec::File(PathBuf::from(path)));
        }

        if let Some(command) = s.strip_prefix("cmd:") {
            // Arguments are whitespace separated; wrap anything fancier in a script.
            let mut words = command.split_whitespace().map(str::to_string);
            let Some(program) = words.next() else {
                return Err(SourceSpecError::Empty(s.to_string()));
            };
            return Ok(SourceSpec::Command {
                program,
                args: words.collect(),
            });
        }

        Err(SourceSpecError::UnknownScheme(s.to_string()))
    }
}

impl SourceSpec {
    /// Build the source described here.
    pub fn into_source(self, timeout: Duration) -> Box<dyn SnapshotSource> {
        match self {
            SourceSpec::File(path) => Box::new(FileSource::new(path)),
            SourceSpec::Command { program, args } => {
                Box::new(CommandSource::new(program, args, timeout))
            }
        }
    }
}
