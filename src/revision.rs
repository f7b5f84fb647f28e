use tracing::warn;

use crate::error::DeployError;
use crate::transport::{quoted, remote_join, CommandResult, Transport};

/// Name of the single-line file recording the active release id.
pub const MARKER_FILE: &str = "REVISION";
/// Directory under the base path holding one subdirectory per release.
pub const RELEASES_DIR: &str = "releases";

/// One release directory, with the derived active flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub id: String,
    pub active: bool,
}

/// All known releases plus the marker inconsistency, if any.
///
/// `stale_marker` is set when the marker file names a release directory that
/// does not exist; in that state no entry is flagged active.
#[derive(Debug, Clone, Default)]
pub struct RevisionSet {
    pub revisions: Vec<Revision>,
    pub stale_marker: Option<String>,
}

impl RevisionSet {
    pub fn active(&self) -> Option<&Revision> {
        self.revisions.iter().find(|revision| revision.active)
    }

    /// Turns a stale marker into the error callers can surface.
    pub fn verify(&self) -> Result<(), DeployError> {
        match &self.stale_marker {
            Some(marker) => Err(DeployError::RevisionInconsistency {
                marker: marker.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// A revision id doubles as a release directory name and is interpolated
/// into remote shell commands, so it is restricted to characters that are
/// safe in both roles. Commit hashes and timestamps always qualify.
pub fn valid_revision_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'))
}

/// Builds the all-or-nothing activation command: drop the dist path, point
/// it at the release, rewrite the marker. The `&&` chain stops at the first
/// failing step, so a half-applied activation never reports success; a crash
/// mid-chain can still leave the symlink and marker disagreeing, which is an
/// accepted limitation of the shell-level protocol.
///
/// Configured paths are interpolated verbatim so that `~` keeps expanding in
/// the remote shell; only the revision id is escaped.
pub fn activation_command(root: &str, dist_dir: &str, revision: &str) -> String {
    let id = quoted(revision);
    format!(
        "cd {root} && rm -rf {dist} && ln -s {releases}/{id} {dist} && echo {id} > {marker}",
        root = root,
        dist = dist_dir,
        releases = RELEASES_DIR,
        id = id,
        marker = MARKER_FILE,
    )
}

/// Reads and interprets the remote release-tracking state over a transport.
pub struct RevisionTracker<'a, T: Transport> {
    transport: &'a T,
    root: &'a str,
}

impl<'a, T: Transport> RevisionTracker<'a, T> {
    pub fn new(transport: &'a T, root: &'a str) -> RevisionTracker<'a, T> {
        RevisionTracker { transport, root }
    }

    /// Lists release directory names in the order the remote shell reports
    /// them. A missing or empty releases directory yields an empty list.
    pub async fn list_releases(&self) -> Result<Vec<String>, DeployError> {
        let releases_path = remote_join(self.root, RELEASES_DIR);
        let listing = self
            .transport
            .run(&format!("ls -1 {}", releases_path))
            .await?;
        Ok(parse_listing(&listing))
    }

    /// Reads the first line of the marker file; `None` when the file is
    /// missing or empty (first deployment).
    pub async fn read_active(&self) -> Result<Option<String>, DeployError> {
        let marker_path = remote_join(self.root, MARKER_FILE);
        let read = self.transport.run(&format!("cat {}", marker_path)).await?;
        Ok(parse_marker(&read))
    }

    /// Composes the listing and the marker into revision records.
    pub async fn describe(&self) -> Result<RevisionSet, DeployError> {
        let releases = self.list_releases().await?;
        let marker = self.read_active().await?;

        let revisions: Vec<Revision> = releases
            .iter()
            .map(|id| Revision {
                id: id.clone(),
                active: marker.as_deref() == Some(id.as_str()),
            })
            .collect();

        let stale_marker = match marker {
            Some(marker) if !releases.iter().any(|id| *id == marker) => {
                warn!(%marker, "revision marker names a nonexistent release");
                Some(marker)
            }
            _ => None,
        };

        Ok(RevisionSet {
            revisions,
            stale_marker,
        })
    }
}

fn parse_listing(listing: &CommandResult) -> Vec<String> {
    if !listing.success() {
        // `ls` on a missing directory; treated the same as an empty root.
        return Vec::new();
    }
    listing
        .stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

fn parse_marker(read: &CommandResult) -> Option<String> {
    if !read.success() {
        return None;
    }
    read.stdout
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
}
