use std::path::Path;

use async_trait::async_trait;
use bytes::BytesMut;
use russh::client;
use russh::{ChannelMsg, Disconnect};
use tracing::debug;

use crate::error::DeployError;
use crate::transport::{CommandResult, SyncOptions, Transport};

use super::RusshTransport;

#[async_trait]
impl<H> Transport for RusshTransport<H>
where
    H: client::Handler,
{
    async fn exec(&self, command: &str) -> Result<(), DeployError> {
        debug!(command, "exec (fire-and-forget)");
        let handle = self.handle.lock().await;
        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|err| DeployError::connection(&self.host, self.port, err))?;
        drop(handle);
        channel
            .exec(true, command)
            .await
            .map_err(|err| DeployError::connection(&self.host, self.port, err))?;
        // Completion is deliberately not awaited, but the channel must
        // outlive this call or the session layer may close it before the
        // remote command starts; a detached task drains it to EOF.
        tokio::spawn(async move { while channel.wait().await.is_some() {} });
        Ok(())
    }

    async fn run(&self, command: &str) -> Result<CommandResult, DeployError> {
        debug!(command, "run (captured)");
        let handle = self.handle.lock().await;
        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|err| DeployError::connection(&self.host, self.port, err))?;
        drop(handle);
        channel
            .exec(true, command)
            .await
            .map_err(|err| DeployError::connection(&self.host, self.port, err))?;

        let mut stdout = BytesMut::new();
        let mut stderr = BytesMut::new();
        let mut exit_code = None;
        let mut signal = None;

        loop {
            match channel.wait().await {
                None => break,
                Some(ChannelMsg::Data { ref data }) => stdout.extend_from_slice(data),
                Some(ChannelMsg::ExtendedData { ref data, ext: 1 }) => {
                    stderr.extend_from_slice(data)
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => exit_code = Some(exit_status),
                Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                    signal = Some(format!("{:?}", signal_name))
                }
                Some(_) => {}
            }
        }

        Ok(CommandResult {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
            signal,
        })
    }

    async fn put_file(&self, local: &Path, remote: &str) -> Result<(), DeployError> {
        // Parent creation must complete before any byte is written.
        if let Some(mkdir) = ensure_parent_command(remote) {
            let result = self.run(&mkdir).await?;
            if !result.success() {
                return Err(DeployError::Transfer {
                    command: mkdir,
                    reason: result.stderr,
                });
            }
        }

        let data = tokio::fs::read(local)
            .await
            .map_err(|err| DeployError::Transfer {
                command: format!("read {}", local.display()),
                reason: err.to_string(),
            })?;

        debug!(local = %local.display(), remote, bytes = data.len(), "uploading file");
        self.sftp_session
            .write(sftp_path(remote), &data)
            .await
            .map_err(|err| DeployError::Transfer {
                command: format!("sftp put {}", remote),
                reason: err.to_string(),
            })?;
        Ok(())
    }

    async fn sync_dir(
        &self,
        local: &Path,
        remote: &str,
        options: &SyncOptions,
    ) -> Result<(), DeployError> {
        let mut source = local.to_string_lossy().into_owned();
        if !source.ends_with('/') {
            source.push('/');
        }

        let mut args: Vec<String> = options.flags.split_whitespace().map(String::from).collect();
        args.push("-e".into());
        args.push(format!("ssh -p {}", self.port));
        if let Some(pattern) = &options.exclude {
            args.push(format!("--exclude={}", pattern));
        }
        args.push(source);
        args.push(format!("{}@{}:{}", self.username, self.host, remote));

        let command_line = format!("rsync {}", args.join(" "));
        debug!(command = %command_line, "syncing directory");

        let output = tokio::process::Command::new("rsync")
            .args(&args)
            .output()
            .await
            .map_err(|err| DeployError::Transfer {
                command: command_line.clone(),
                reason: err.to_string(),
            })?;

        if !output.status.success() {
            return Err(DeployError::Transfer {
                command: command_line,
                reason: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DeployError> {
        let handle = self.handle.lock().await;
        handle
            .disconnect(Disconnect::ByApplication, "deployment finished", "en")
            .await
            .map_err(|err| DeployError::connection(&self.host, self.port, err))?;
        Ok(())
    }
}

/// SFTP has no shell behind it, so `~` never expands; a `~/`-prefixed path
/// becomes a home-relative one, which the server resolves against the login
/// directory.
fn sftp_path(remote: &str) -> &str {
    match remote.strip_prefix("~/") {
        Some(stripped) => stripped,
        None if remote == "~" => ".",
        None => remote,
    }
}

/// Directory component of a remote path, `None` when there is nothing to
/// create: a bare file name lands in the working directory and `/` always
/// exists.
fn parent_dir(remote: &str) -> Option<&str> {
    match remote.rsplit_once('/') {
        Some(("", _)) => None,
        Some((parent, _)) => Some(parent),
        None => None,
    }
}

fn ensure_parent_command(remote: &str) -> Option<String> {
    parent_dir(remote).map(|parent| format!("mkdir -p {}", parent))
}
