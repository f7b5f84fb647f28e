use std::path::PathBuf;

use thiserror::Error;

use crate::transport::CommandResult;

/// Errors raised across the deployment pipeline.
///
/// Connection and transfer failures are fatal to a deployment. A non-zero
/// exit from a captured command is never raised by the transport itself;
/// callers that decide to treat one as fatal wrap the result in
/// [`DeployError::CommandExecution`].
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("connection to {host}:{port} failed: {reason}")]
    Connection {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("remote command `{command}` exited with {}", .result.describe_exit())]
    CommandExecution {
        command: String,
        result: CommandResult,
    },

    #[error("transfer failed while running `{command}`: {reason}")]
    Transfer { command: String, reason: String },

    #[error("working directory is dirty")]
    DirtyWorkingTree,

    #[error("no local branch `{0}`")]
    BranchNotFound(String),

    #[error("revision marker `{marker}` does not name an existing release")]
    RevisionInconsistency { marker: String },

    #[error("invalid revision id `{0}`: only [A-Za-z0-9._-] is allowed")]
    InvalidRevision(String),

    #[error("private key `{path}` could not be loaded: {reason}")]
    KeyFile { path: PathBuf, reason: String },

    #[error("local git invocation failed: {0}")]
    Git(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployError {
    pub(crate) fn connection(host: &str, port: u16, reason: impl ToString) -> DeployError {
        DeployError::Connection {
            host: host.to_string(),
            port,
            reason: reason.to_string(),
        }
    }
}
