#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use capstan::error::DeployError;
use capstan::guard::Guard;
use capstan::transport::{CommandResult, SyncOptions, Transport};

/// One remote operation observed by the mock transport, in issue order.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    Exec(String),
    Run(String),
    PutFile { local: PathBuf, remote: String },
    SyncDir { local: PathBuf, remote: String },
}

/// Transport double with canned command results and a full call log.
/// Commands without a matching rule succeed with empty output.
#[derive(Default)]
pub struct MockTransport {
    rules: Mutex<Vec<(String, CommandResult)>>,
    sync_failure: Mutex<Option<String>>,
    calls: Mutex<Vec<RemoteCall>>,
}

impl MockTransport {
    pub fn new() -> MockTransport {
        MockTransport::default()
    }

    /// Makes captured commands containing `fragment` resolve to `result`.
    pub fn respond(&self, fragment: &str, result: CommandResult) {
        self.rules.lock().unwrap().push((fragment.into(), result));
    }

    pub fn respond_output(&self, fragment: &str, stdout: &str) {
        self.respond(fragment, exited(0, stdout, ""));
    }

    pub fn respond_failure(&self, fragment: &str, code: u32, stderr: &str) {
        self.respond(fragment, exited(code, "", stderr));
    }

    pub fn fail_sync(&self, reason: &str) {
        *self.sync_failure.lock().unwrap() = Some(reason.into());
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: RemoteCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn lookup(&self, command: &str) -> CommandResult {
        let rules = self.rules.lock().unwrap();
        for (fragment, result) in rules.iter() {
            if command.contains(fragment.as_str()) {
                return result.clone();
            }
        }
        exited(0, "", "")
    }
}

pub fn exited(code: u32, stdout: &str, stderr: &str) -> CommandResult {
    CommandResult {
        stdout: stdout.into(),
        stderr: stderr.into(),
        exit_code: Some(code),
        signal: None,
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn exec(&self, command: &str) -> Result<(), DeployError> {
        self.record(RemoteCall::Exec(command.into()));
        Ok(())
    }

    async fn run(&self, command: &str) -> Result<CommandResult, DeployError> {
        self.record(RemoteCall::Run(command.into()));
        Ok(self.lookup(command))
    }

    async fn put_file(&self, local: &Path, remote: &str) -> Result<(), DeployError> {
        self.record(RemoteCall::PutFile {
            local: local.to_path_buf(),
            remote: remote.into(),
        });
        Ok(())
    }

    async fn sync_dir(
        &self,
        local: &Path,
        remote: &str,
        _options: &SyncOptions,
    ) -> Result<(), DeployError> {
        self.record(RemoteCall::SyncDir {
            local: local.to_path_buf(),
            remote: remote.into(),
        });
        match self.sync_failure.lock().unwrap().clone() {
            Some(reason) => Err(DeployError::Transfer {
                command: format!("sync {}", remote),
                reason,
            }),
            None => Ok(()),
        }
    }

    async fn disconnect(&self) -> Result<(), DeployError> {
        Ok(())
    }
}

/// Guard double recording how it was driven.
#[derive(Default)]
pub struct ScriptedGuard {
    pub deny_dirty: bool,
    pub fail_teardown: bool,
    pub seen_branch: Mutex<Option<String>>,
    pub seen_force: Mutex<Option<bool>>,
    pub teardown_calls: Mutex<u32>,
}

#[async_trait]
impl Guard for ScriptedGuard {
    async fn before_build(&mut self, branch: &str, force: bool) -> Result<(), DeployError> {
        *self.seen_branch.lock().unwrap() = Some(branch.into());
        *self.seen_force.lock().unwrap() = Some(force);
        if self.deny_dirty && !force {
            return Err(DeployError::DirtyWorkingTree);
        }
        Ok(())
    }

    async fn after_teardown(&mut self) -> Result<(), DeployError> {
        *self.teardown_calls.lock().unwrap() += 1;
        if self.fail_teardown {
            return Err(DeployError::Git("checkout failed".into()));
        }
        Ok(())
    }
}
