//! Tree store backed by the `ostree` command-line tool.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::DateTime;
use osupdate_ipc::{CommitMetadata, UpdateInfo, UpdateOrigin};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::error::{Result, TreeStoreError};
use super::{split_refspec, BootedDeployment, PollResult, PollSource, TreeStore};

/// Marker created by the initramfs when the system booted from a deployment.
const OSTREE_BOOTED_MARKER: &str = "/run/ostree-booted";

/// Repository path inside an exported volume.
const VOLUME_REPO_DIR: &str = ".ostree/repo";

/// `ostree` CLI backend.
pub struct OstreeCli {
    binary: String,
    sysroot: PathBuf,
    os_name: Option<String>,
}

/// A deployment line from `ostree admin status`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DeploymentEntry {
    os_name: String,
    checksum: String,
    serial: String,
}

impl OstreeCli {
    pub fn new(binary: impl Into<String>, sysroot: impl Into<PathBuf>, os_name: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            sysroot: sysroot.into(),
            os_name,
        }
    }

    fn repo(&self) -> PathBuf {
        self.sysroot.join("ostree/repo")
    }

    fn repo_arg(&self) -> String {
        format!("--repo={}", self.repo().display())
    }

    fn sysroot_arg(&self) -> String {
        format!("--sysroot={}", self.sysroot.display())
    }

    /// Run `ostree` with `args` and return its stdout.
    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!(binary = %self.binary, ?args, "Running ostree");

        let output = Command::new(&self.binary).args(args).output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(TreeStoreError::CommandFailed {
                command: format!("{} {}", self.binary, args.join(" ")),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn rev_parse(&self, repo_arg: &str, reference: &str) -> Result<String> {
        let out = self.run(&["rev-parse", repo_arg, reference]).await?;
        Ok(out.trim().to_string())
    }

    async fn commit_metadata(&self, repo_arg: &str, checksum: &str) -> Result<CommitMetadata> {
        let out = self.run(&["show", repo_arg, checksum]).await?;
        parse_show(&out)
    }
}

#[async_trait]
impl TreeStore for OstreeCli {
    fn name(&self) -> &'static str {
        "ostree"
    }

    #[instrument(skip(self), fields(sysroot = %self.sysroot.display()))]
    async fn booted(&self) -> Result<BootedDeployment> {
        if self.sysroot == Path::new("/") && !Path::new(OSTREE_BOOTED_MARKER).exists() {
            return Err(TreeStoreError::NotOstreeSystem(format!(
                "{OSTREE_BOOTED_MARKER} does not exist"
            )));
        }

        let status = match self.run(&["admin", "status", &self.sysroot_arg()]).await {
            Ok(out) => out,
            Err(TreeStoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TreeStoreError::NotOstreeSystem(format!(
                    "{} is not installed",
                    self.binary
                )));
            }
            Err(e) => return Err(e),
        };

        let entry = parse_admin_status(&status)
            .ok_or_else(|| TreeStoreError::NotOstreeSystem("no booted deployment".to_string()))?;

        let origin_path = self.sysroot.join(format!(
            "ostree/deploy/{}/deploy/{}.{}.origin",
            entry.os_name, entry.checksum, entry.serial
        ));
        let origin = tokio::fs::read_to_string(&origin_path).await.map_err(|e| {
            TreeStoreError::WrongConfiguration(format!(
                "cannot read {}: {e}",
                origin_path.display()
            ))
        })?;
        let refspec = parse_origin(&origin).ok_or_else(|| {
            TreeStoreError::WrongConfiguration(format!(
                "{} has no refspec",
                origin_path.display()
            ))
        })?;

        let metadata = self.commit_metadata(&self.repo_arg(), &entry.checksum).await?;

        let remote_url = match split_refspec(&refspec).0 {
            Some(remote) => match self
                .run(&["remote", "show-url", &self.repo_arg(), remote])
                .await
            {
                Ok(url) => Some(url.trim().to_string()),
                Err(e) => {
                    warn!(remote, error = %e, "Failed to look up remote URL");
                    None
                }
            },
            None => None,
        };

        Ok(BootedDeployment {
            checksum: entry.checksum,
            refspec,
            commit_timestamp: metadata.timestamp,
            remote_url,
        })
    }

    #[instrument(skip(self), fields(refspec = %source.refspec()))]
    async fn poll(&self, source: &PollSource, booted_checksum: &str) -> Result<Option<PollResult>> {
        let (checksum, metadata) = match source {
            PollSource::Remote { refspec } => {
                let (remote, reference) = split_refspec(refspec);
                let remote = remote.ok_or_else(|| {
                    TreeStoreError::WrongConfiguration(format!("refspec {refspec} names no remote"))
                })?;

                self.run(&["pull", &self.repo_arg(), "--commit-metadata-only", remote, reference])
                    .await
                    .map_err(|e| TreeStoreError::Fetching(e.to_string()))?;

                let repo_arg = self.repo_arg();
                let checksum = self.rev_parse(&repo_arg, refspec).await?;
                let metadata = self.commit_metadata(&repo_arg, &checksum).await?;
                (checksum, metadata)
            }
            PollSource::Volume { path, refspec } => {
                let volume_repo = path.join(VOLUME_REPO_DIR);
                if !volume_repo.is_dir() {
                    return Err(TreeStoreError::Fetching(format!(
                        "no repository found at {}",
                        volume_repo.display()
                    )));
                }

                let repo_arg = format!("--repo={}", volume_repo.display());
                let (_, reference) = split_refspec(refspec);
                let checksum = self.rev_parse(&repo_arg, reference).await?;
                let metadata = self.commit_metadata(&repo_arg, &checksum).await?;
                (checksum, metadata)
            }
        };

        if checksum == booted_checksum {
            debug!("Already running the latest commit");
            return Ok(None);
        }

        info!(checksum = %checksum, version = ?metadata.version, "Found update");
        Ok(Some(PollResult {
            checksum,
            refspec: source.refspec().to_string(),
            metadata,
        }))
    }

    #[instrument(skip(self, update), fields(checksum = %update.checksum))]
    async fn fetch(&self, update: &UpdateInfo) -> Result<()> {
        let (remote, reference) = split_refspec(&update.refspec);
        let repo_arg = self.repo_arg();

        let result = match (&update.origin, remote) {
            (UpdateOrigin::Remote, Some(remote)) => {
                self.run(&["pull", &repo_arg, remote, reference]).await
            }
            (UpdateOrigin::Remote, None) => {
                return Err(TreeStoreError::WrongConfiguration(format!(
                    "refspec {} names no remote",
                    update.refspec
                )))
            }
            (UpdateOrigin::Volume { path }, remote) => {
                let volume_repo = path.join(VOLUME_REPO_DIR).display().to_string();
                let remote_arg = remote.map(|remote| format!("--remote={remote}"));
                let mut args = vec!["pull-local", repo_arg.as_str()];
                if let Some(arg) = &remote_arg {
                    args.push(arg);
                }
                args.push(&volume_repo);
                args.push(reference);
                self.run(&args).await
            }
        };

        result.map_err(|e| TreeStoreError::Fetching(e.to_string()))?;
        info!("Fetch complete");
        Ok(())
    }

    #[instrument(skip(self, update), fields(checksum = %update.checksum))]
    async fn apply(&self, update: &UpdateInfo) -> Result<()> {
        // Deploy the fetched commit itself; the origin file keeps the
        // deployment following the refspec.
        let origin_file = self
            .repo()
            .join("tmp")
            .join(format!("osupdate-{}.origin", update.checksum));
        tokio::fs::write(&origin_file, origin_contents(&update.refspec))
            .await
            .map_err(|e| TreeStoreError::DeployFailed(format!("cannot write {}: {e}", origin_file.display())))?;

        let args = deploy_args(
            &self.sysroot_arg(),
            self.os_name.as_deref(),
            &origin_file,
            &update.checksum,
        );
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let result = self.run(&args).await;

        if let Err(e) = tokio::fs::remove_file(&origin_file).await {
            warn!(path = %origin_file.display(), error = %e, "Failed to remove temporary origin file");
        }
        result.map_err(|e| TreeStoreError::DeployFailed(e.to_string()))?;
        info!("New deployment written");
        Ok(())
    }
}

/// Find the booted deployment in `ostree admin status` output.
///
/// The booted line is marked with `*`:
/// `* myos 3a5f...c2.0`
fn parse_admin_status(output: &str) -> Option<DeploymentEntry> {
    output.lines().find_map(|line| {
        let rest = line.trim_start().strip_prefix("* ")?;
        let mut fields = rest.split_whitespace();
        let os_name = fields.next()?;
        let (checksum, serial) = fields.next()?.rsplit_once('.')?;
        Some(DeploymentEntry {
            os_name: os_name.to_string(),
            checksum: checksum.to_string(),
            serial: serial.to_string(),
        })
    })
}

/// Arguments for `ostree admin deploy` of a single commit.
fn deploy_args(sysroot_arg: &str, os_name: Option<&str>, origin_file: &Path, checksum: &str) -> Vec<String> {
    let mut args = vec!["admin".to_string(), "deploy".to_string(), sysroot_arg.to_string()];
    if let Some(os) = os_name {
        args.push(format!("--os={os}"));
    }
    args.push(format!("--origin-file={}", origin_file.display()));
    args.push(checksum.to_string());
    args
}

fn origin_contents(refspec: &str) -> String {
    format!("[origin]\nrefspec={refspec}\n")
}

/// Extract `refspec=` from the `[origin]` group of a deployment origin file.
fn parse_origin(contents: &str) -> Option<String> {
    let mut in_origin = false;
    for line in contents.lines().map(str::trim) {
        if line.starts_with('[') {
            in_origin = line == "[origin]";
        } else if in_origin {
            if let Some(value) = line.strip_prefix("refspec=") {
                let value = value.trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

/// Parse `ostree show` output into commit metadata.
fn parse_show(output: &str) -> Result<CommitMetadata> {
    let mut metadata = CommitMetadata::default();
    let mut seen_date = false;
    let mut in_body = false;

    for line in output.lines() {
        if in_body {
            let text = line.trim();
            if !text.is_empty() {
                metadata.subject = text.to_string();
                break;
            }
            continue;
        }

        if line.trim().is_empty() {
            in_body = true;
        } else if let Some(date) = line.strip_prefix("Date:") {
            let parsed = DateTime::parse_from_str(date.trim(), "%Y-%m-%d %H:%M:%S %z").map_err(|e| {
                TreeStoreError::Parse {
                    what: "commit date",
                    detail: format!("{}: {e}", date.trim()),
                }
            })?;
            metadata.timestamp = parsed.timestamp();
            seen_date = true;
        } else if let Some(version) = line.strip_prefix("Version:") {
            metadata.version = Some(version.trim().to_string());
        }
    }

    if !seen_date {
        return Err(TreeStoreError::Parse {
            what: "ostree show output",
            detail: "missing Date line".to_string(),
        });
    }
    Ok(metadata)
}
