use std::borrow::Cow;
use std::path::Path;

use async_trait::async_trait;

use crate::error::DeployError;

/// Captured output of one remote command run to completion.
///
/// The exit code is `None` when the remote side never reported one (for
/// example when the process was killed); the terminating signal, if any, is
/// carried alongside. A non-zero exit is data, not an error.
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<u32>,
    pub signal: Option<String>,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn describe_exit(&self) -> String {
        match (self.exit_code, &self.signal) {
            (Some(code), _) => format!("code {}", code),
            (None, Some(signal)) => format!("signal {}", signal),
            (None, None) => "no exit status".into(),
        }
    }
}

/// Options for a bulk directory sync.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Flag string handed to the sync tool, split on whitespace.
    pub flags: String,
    /// Pattern passed as a single `--exclude`.
    pub exclude: Option<String>,
}

impl Default for SyncOptions {
    fn default() -> SyncOptions {
        SyncOptions {
            flags: "-az --delete".into(),
            exclude: None,
        }
    }
}

/// One persistent session to a single remote host.
///
/// Exactly one transport is owned by one deployment. `run` and `put_file`
/// are single-flight per connection; the only sanctioned overlap is the
/// upload phase, where file uploads ride independent sub-channels while the
/// sync subprocess runs locally.
#[async_trait]
pub trait Transport {
    /// Runs a remote command without awaiting completion or exit status.
    /// Resolves once the command channel opens. Used for operations whose
    /// completion is not otherwise observed, such as a restart signal.
    async fn exec(&self, command: &str) -> Result<(), DeployError>;

    /// Runs a remote command to completion and captures both output streams.
    /// Never errors solely because the command exited non-zero; callers
    /// inspect the [`CommandResult`].
    async fn run(&self, command: &str) -> Result<CommandResult, DeployError>;

    /// Transfers a single local file, creating missing remote parent
    /// directories first. Re-uploading into an existing directory is fine.
    async fn put_file(&self, local: &Path, remote: &str) -> Result<(), DeployError>;

    /// Synchronizes a local directory tree to a remote destination via the
    /// external sync tool, using this transport's connection parameters for
    /// its remote shell.
    async fn sync_dir(
        &self,
        local: &Path,
        remote: &str,
        options: &SyncOptions,
    ) -> Result<(), DeployError>;

    /// Closes the session. Outstanding operations fail afterwards.
    async fn disconnect(&self) -> Result<(), DeployError>;
}

#[async_trait]
impl<T: Transport + Sync> Transport for &T {
    async fn exec(&self, command: &str) -> Result<(), DeployError> {
        (**self).exec(command).await
    }

    async fn run(&self, command: &str) -> Result<CommandResult, DeployError> {
        (**self).run(command).await
    }

    async fn put_file(&self, local: &Path, remote: &str) -> Result<(), DeployError> {
        (**self).put_file(local, remote).await
    }

    async fn sync_dir(
        &self,
        local: &Path,
        remote: &str,
        options: &SyncOptions,
    ) -> Result<(), DeployError> {
        (**self).sync_dir(local, remote, options).await
    }

    async fn disconnect(&self) -> Result<(), DeployError> {
        (**self).disconnect().await
    }
}

/// Shell-escapes a value interpolated into a remote command line.
pub(crate) fn quoted(value: &str) -> Cow<'_, str> {
    shell_escape::unix::escape(Cow::Borrowed(value))
}

/// Joins remote POSIX path segments regardless of trailing separators.
pub(crate) fn remote_join(base: &str, rest: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        rest.trim_start_matches('/')
    )
}
