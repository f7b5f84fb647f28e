use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{error, info, warn};

use crate::error::DeployError;
use crate::guard::Guard;
use crate::revision::{
    activation_command, valid_revision_id, RevisionSet, RevisionTracker, RELEASES_DIR,
};
use crate::transport::{quoted, remote_join, SyncOptions, Transport};

/// A single file shipped next to the synced tree, addressed relative to the
/// release directory.
#[derive(Debug, Clone)]
pub struct AuxFile {
    pub local: PathBuf,
    pub remote: String,
}

/// Everything one deployment run needs to know about itself.
#[derive(Debug, Clone)]
pub struct DeploymentContext {
    pub build_dir: PathBuf,
    pub revision: String,
    pub target: String,
    pub branch: Option<String>,
    pub force: bool,
    pub aux_files: Vec<AuxFile>,
}

impl DeploymentContext {
    /// Context for a deployment of `build_dir` to environment `target`, with
    /// a timestamp revision id. Callers deploying a VCS commit replace the
    /// id via [`DeploymentContext::revision`].
    pub fn new(build_dir: PathBuf, target: String) -> DeploymentContext {
        DeploymentContext {
            build_dir,
            revision: Utc::now().format("%Y%m%d%H%M%S").to_string(),
            target,
            branch: None,
            force: false,
            aux_files: Vec::new(),
        }
    }

    pub fn revision(&mut self, revision: String) -> &mut Self {
        self.revision = revision;
        self
    }

    pub fn branch(&mut self, branch: String) -> &mut Self {
        self.branch = Some(branch);
        self
    }

    pub fn force(&mut self) -> &mut Self {
        self.force = true;
        self
    }

    pub fn aux_file(&mut self, local: PathBuf, remote: String) -> &mut Self {
        self.aux_files.push(AuxFile { local, remote });
        self
    }
}

/// Remote layout and per-target policy of a deployment destination.
#[derive(Debug, Clone)]
pub struct DeployTarget {
    /// Remote base path holding `releases/`, the marker file and the dist dir.
    pub base_path: String,
    /// Dist-dir path relative to the base path; always a symlink into
    /// `releases/` once at least one deployment activated.
    pub dist_dir: String,
    /// Branch deployed when the context does not override it.
    pub deploy_branch: String,
    pub sync: SyncOptions,
    /// Overrides the default reload signal (a touch of `tmp/restart.txt`
    /// under the dist dir).
    pub reload_command: Option<String>,
    /// Overrides the default provisioning command (`npm install` in the dist
    /// dir).
    pub provision_command: Option<String>,
    /// Keep `shared/assets` alive across releases and symlink each fresh
    /// release's assets directory back to it.
    pub shared_assets: bool,
    /// Local generic environment file swapped to its target-specific
    /// counterpart before upload.
    pub environment_file: Option<PathBuf>,
}

impl DeployTarget {
    pub fn new(base_path: impl Into<String>) -> DeployTarget {
        DeployTarget {
            base_path: base_path.into(),
            dist_dir: "current".into(),
            deploy_branch: "main".into(),
            sync: SyncOptions::default(),
            reload_command: None,
            provision_command: None,
            shared_assets: false,
            environment_file: None,
        }
    }

    fn dist_path(&self) -> String {
        remote_join(&self.base_path, &self.dist_dir)
    }

    fn release_path(&self, revision: &str) -> String {
        remote_join(&self.base_path, &format!("{}/{}", RELEASES_DIR, revision))
    }
}

/// Sequences one deployment: guard, upload, activate, reload, provision, and
/// the unconditional guard teardown. Owns the single transport for the
/// deployment's lifetime.
pub struct Deployer<T: Transport, G: Guard> {
    transport: T,
    guard: G,
    target: DeployTarget,
}

impl<T: Transport, G: Guard> Deployer<T, G> {
    pub fn new(transport: T, guard: G, target: DeployTarget) -> Deployer<T, G> {
        Deployer {
            transport,
            guard,
            target,
        }
    }

    /// Runs the full pipeline for one context. Pre-flight failures abort
    /// before any remote mutation; later failures are reported without
    /// undoing prior phases (recovery is re-activating an earlier revision);
    /// branch restoration runs no matter what.
    pub async fn deploy(&mut self, context: &DeploymentContext) -> Result<(), DeployError> {
        // The id names the release directory and rides inside shell command
        // lines; rejecting it here keeps the upload and activation paths
        // identical and keeps the remote untouched.
        if !valid_revision_id(&context.revision) {
            return Err(DeployError::InvalidRevision(context.revision.clone()));
        }

        let branch = context
            .branch
            .clone()
            .unwrap_or_else(|| self.target.deploy_branch.clone());

        info!(revision = %context.revision, environment = %context.target, %branch, "starting deployment");
        self.guard.before_build(&branch, context.force).await?;

        let outcome = self.run_remote_phases(context).await;
        let restored = self.guard.after_teardown().await;
        if let Err(err) = &restored {
            // Surfaced here even when the pipeline error below wins.
            warn!(%err, "branch restoration failed");
        }

        match &outcome {
            Ok(()) => info!(revision = %context.revision, "deployment finished"),
            Err(err) => error!(revision = %context.revision, %err, "deployment failed"),
        }
        outcome.and(restored)
    }

    /// Answers revision queries without running any deployment phase.
    pub async fn list_revisions(&self) -> Result<RevisionSet, DeployError> {
        RevisionTracker::new(&self.transport, &self.target.base_path)
            .describe()
            .await
    }

    async fn run_remote_phases(&self, context: &DeploymentContext) -> Result<(), DeployError> {
        if let Some(generic) = &self.target.environment_file {
            select_environment(generic, &context.target).await?;
        }

        self.upload(context).await?;
        self.activate(&context.revision).await?;
        if self.target.shared_assets {
            self.link_shared_assets(&context.revision).await?;
        }
        self.reload().await;
        self.provision().await?;
        Ok(())
    }

    async fn upload(&self, context: &DeploymentContext) -> Result<(), DeployError> {
        let release_path = self.target.release_path(&context.revision);

        let mkdir = format!("mkdir -p {}", release_path);
        let prepared = self.transport.run(&mkdir).await?;
        if !prepared.success() {
            return Err(DeployError::CommandExecution {
                command: mkdir,
                result: prepared,
            });
        }

        info!(release = %release_path, "uploading build");
        let sync = self
            .transport
            .sync_dir(&context.build_dir, &release_path, &self.target.sync);
        let uploads = futures_util::future::try_join_all(context.aux_files.iter().map(|aux| {
            let remote = remote_join(&release_path, &aux.remote);
            async move { self.transport.put_file(&aux.local, &remote).await }
        }));
        futures_util::try_join!(sync, uploads)?;
        Ok(())
    }

    async fn activate(&self, revision: &str) -> Result<(), DeployError> {
        let command = activation_command(&self.target.base_path, &self.target.dist_dir, revision);
        info!(%revision, "activating release");
        let result = self.transport.run(&command).await?;
        if !result.success() {
            // No automatic rollback: the previous release stays on disk and
            // can be re-activated manually.
            return Err(DeployError::CommandExecution { command, result });
        }
        Ok(())
    }

    async fn link_shared_assets(&self, revision: &str) -> Result<(), DeployError> {
        let command = shared_assets_command(&self.target.base_path, revision);
        info!(%revision, "linking shared assets");
        let result = self.transport.run(&command).await?;
        if !result.success() {
            return Err(DeployError::CommandExecution { command, result });
        }
        Ok(())
    }

    /// Signals the application server against the now-active dist path.
    /// Fire-and-forget: a missing tmp directory or a stopped app must not
    /// fail the deployment, so only channel-open errors are even observable,
    /// and those are logged rather than propagated.
    async fn reload(&self) {
        let command = match &self.target.reload_command {
            Some(command) => command.clone(),
            None => format!("touch {}/tmp/restart.txt", self.target.dist_path()),
        };
        info!("sending reload signal");
        if let Err(err) = self.transport.exec(&command).await {
            warn!(%err, %command, "reload signal could not be sent");
        }
    }

    async fn provision(&self) -> Result<(), DeployError> {
        let command = match &self.target.provision_command {
            Some(command) => command.clone(),
            None => format!("cd {} && npm install", self.target.dist_path()),
        };
        info!("provisioning dependencies");
        let result = self.transport.run(&command).await?;
        if !result.success() {
            return Err(DeployError::CommandExecution { command, result });
        }
        Ok(())
    }
}

/// Command keeping `shared/assets` alive across releases: seed it from the
/// fresh release's assets (first deployment wins for existing files), then
/// replace that directory with a symlink back into shared. Skips the copy
/// when the release ships no assets directory.
pub fn shared_assets_command(root: &str, revision: &str) -> String {
    let id = quoted(revision);
    format!(
        "cd {root} && mkdir -p shared/assets && \
         if [ -d {releases}/{id}/assets ] && [ ! -L {releases}/{id}/assets ]; then \
         cp -R {releases}/{id}/assets/. shared/assets/ && rm -rf {releases}/{id}/assets; fi && \
         ln -sfn ../../shared/assets {releases}/{id}/assets",
        root = root,
        releases = RELEASES_DIR,
        id = id,
    )
}

/// Points the generic environment file at its target-specific sibling via a
/// local symlink swap. The specific file must already exist.
pub async fn select_environment(generic: &Path, target: &str) -> Result<(), DeployError> {
    let specific = target_environment_path(generic, target);
    tokio::fs::metadata(&specific).await.map_err(|err| {
        DeployError::Io(io::Error::new(
            err.kind(),
            format!("environment file {} missing", specific.display()),
        ))
    })?;

    match tokio::fs::remove_file(generic).await {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }

    // Relative link target keeps the pair relocatable.
    let link_target = specific
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| specific.clone());
    tokio::fs::symlink(link_target, generic).await?;
    info!(environment = target, file = %generic.display(), "selected environment");
    Ok(())
}

fn target_environment_path(generic: &Path, target: &str) -> PathBuf {
    let mut name = generic
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push('.');
    name.push_str(target);
    generic.with_file_name(name)
}
