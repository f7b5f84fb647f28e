use std::path::Path;

use capstan::error::DeployError;
use capstan::guard::{Guard, GitGuard};
use tempfile::TempDir;

async fn git(workdir: &Path, args: &[&str]) {
    let output = tokio::process::Command::new("git")
        .args(args)
        .current_dir(workdir)
        .output()
        .await
        .expect("git could not be spawned");
    assert!(
        output.status.success(),
        "`git {}` failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
}

async fn current_branch(workdir: &Path) -> String {
    let output = tokio::process::Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(workdir)
        .output()
        .await
        .unwrap();
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Fresh repository on branch `main` with one commit.
async fn init_repo() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path();
    git(path, &["init", "--quiet"]).await;
    git(path, &["config", "user.email", "deploy@example.com"]).await;
    git(path, &["config", "user.name", "deploy"]).await;
    // Pin the unborn branch name regardless of the git default.
    git(path, &["symbolic-ref", "HEAD", "refs/heads/main"]).await;
    tokio::fs::write(path.join("README"), "hello\n").await.unwrap();
    git(path, &["add", "README"]).await;
    git(path, &["commit", "-q", "-m", "initial"]).await;
    dir
}

#[tokio::test]
async fn dirty_tree_is_rejected_without_force() {
    let repo = init_repo().await;
    tokio::fs::write(repo.path().join("untracked"), "wip").await.unwrap();

    let mut guard = GitGuard::new(repo.path());
    let result = guard.before_build("main", false).await;
    assert!(matches!(result, Err(DeployError::DirtyWorkingTree)));
}

#[tokio::test]
async fn dirty_tree_is_accepted_with_force() {
    let repo = init_repo().await;
    tokio::fs::write(repo.path().join("untracked"), "wip").await.unwrap();

    let mut guard = GitGuard::new(repo.path());
    guard
        .before_build("main", true)
        .await
        .expect("forced pre-flight failed");
}

#[tokio::test]
async fn unknown_branch_is_rejected_by_name() {
    let repo = init_repo().await;

    let mut guard = GitGuard::new(repo.path());
    let result = guard.before_build("no-such-branch", false).await;
    assert!(matches!(
        result,
        Err(DeployError::BranchNotFound(name)) if name == "no-such-branch"
    ));
}

#[tokio::test]
async fn deploy_branch_is_checked_out_and_restored() {
    let repo = init_repo().await;
    git(repo.path(), &["branch", "deploy"]).await;

    let mut guard = GitGuard::new(repo.path());
    guard.before_build("deploy", false).await.expect("pre-flight failed");
    assert_eq!(current_branch(repo.path()).await, "deploy");

    guard.after_teardown().await.expect("teardown failed");
    assert_eq!(current_branch(repo.path()).await, "main");
}

#[tokio::test]
async fn restoration_runs_even_when_the_deployment_failed() {
    let repo = init_repo().await;
    git(repo.path(), &["branch", "deploy"]).await;

    let mut guard = GitGuard::new(repo.path());
    guard.before_build("deploy", false).await.expect("pre-flight failed");

    // A failing deployment never reaches back into the guard; the caller
    // still runs teardown.
    let failed: Result<(), DeployError> = Err(DeployError::Transfer {
        command: "rsync".into(),
        reason: "interrupted".into(),
    });
    assert!(failed.is_err());

    guard.after_teardown().await.expect("teardown failed");
    assert_eq!(current_branch(repo.path()).await, "main");
}

#[tokio::test]
async fn teardown_is_idempotent_without_a_switch() {
    let repo = init_repo().await;

    let mut guard = GitGuard::new(repo.path());
    guard.before_build("main", false).await.expect("pre-flight failed");
    assert_eq!(current_branch(repo.path()).await, "main");

    guard.after_teardown().await.expect("first teardown failed");
    guard.after_teardown().await.expect("second teardown failed");
    assert_eq!(current_branch(repo.path()).await, "main");
}
