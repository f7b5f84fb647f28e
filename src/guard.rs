use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::DeployError;

/// Local pre-flight seam around a deployment. `before_build` runs before any
/// artifact is produced or any remote host is touched; `after_teardown` runs
/// unconditionally once the deployment finished or failed.
#[async_trait]
pub trait Guard {
    async fn before_build(&mut self, branch: &str, force: bool) -> Result<(), DeployError>;

    async fn after_teardown(&mut self) -> Result<(), DeployError>;
}

#[async_trait]
impl<G: Guard + Send> Guard for &mut G {
    async fn before_build(&mut self, branch: &str, force: bool) -> Result<(), DeployError> {
        (**self).before_build(branch, force).await
    }

    async fn after_teardown(&mut self) -> Result<(), DeployError> {
        (**self).after_teardown().await
    }
}

/// Guard over a local git working tree.
///
/// Refuses to deploy from a dirty tree unless forced, switches to the deploy
/// branch, and restores whatever branch was checked out before. The original
/// branch is state of this one instance, scoped to one deployment.
pub struct GitGuard {
    workdir: PathBuf,
    original_branch: Option<String>,
}

impl GitGuard {
    pub fn new(workdir: impl Into<PathBuf>) -> GitGuard {
        GitGuard {
            workdir: workdir.into(),
            original_branch: None,
        }
    }

    async fn is_dirty(&self) -> Result<bool, DeployError> {
        let status = git(&self.workdir, &["status", "--porcelain"]).await?;
        Ok(!status.stdout.is_empty())
    }

    async fn current_branch(&self) -> Result<String, DeployError> {
        let head = git(&self.workdir, &["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        Ok(String::from_utf8_lossy(&head.stdout).trim().to_string())
    }

    async fn branch_exists(&self, branch: &str) -> Result<bool, DeployError> {
        let listing = git(&self.workdir, &["branch", "--list", branch]).await?;
        Ok(!listing.stdout.is_empty())
    }
}

#[async_trait]
impl Guard for GitGuard {
    async fn before_build(&mut self, branch: &str, force: bool) -> Result<(), DeployError> {
        if self.is_dirty().await? {
            if !force {
                return Err(DeployError::DirtyWorkingTree);
            }
            info!("working directory is dirty, proceeding because of force");
        }

        if !self.branch_exists(branch).await? {
            return Err(DeployError::BranchNotFound(branch.to_string()));
        }

        let current = self.current_branch().await?;
        if current == branch {
            debug!(branch, "already on deploy branch");
            return Ok(());
        }

        git(&self.workdir, &["checkout", branch]).await?;
        info!(from = %current, to = %branch, "switched to deploy branch");
        self.original_branch = Some(current);
        Ok(())
    }

    async fn after_teardown(&mut self) -> Result<(), DeployError> {
        let Some(branch) = self.original_branch.take() else {
            return Ok(());
        };
        git(&self.workdir, &["checkout", &branch]).await?;
        info!(branch = %branch, "restored original branch");
        Ok(())
    }
}

async fn git(workdir: &Path, args: &[&str]) -> Result<Output, DeployError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(workdir)
        .output()
        .await?;
    if !output.status.success() {
        return Err(DeployError::Git(format!(
            "`git {}` failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output)
}
