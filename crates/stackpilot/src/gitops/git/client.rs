//! Git transport used by the sync engine.

use std::path::{Component, Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command as TokioCommand;

use super::auth::{build_auth_env, AuthEnv};
use super::parse::{format_git_error, parse_ls_remote_heads};
use super::types::{BranchInfo, GitAuthConfig, TreeEntry, TreeEntryKind};
use crate::gitops::error::{classify_git_error, GitOpsError, Result};
use crate::sanitize::redact_repo_url;

/// Read-only access to remote repositories through scratch checkouts.
#[async_trait]
pub trait GitClient: Send + Sync {
    /// Shallow-clones `branch` into a fresh scratch directory and returns it.
    async fn clone_branch(&self, url: &str, branch: &str, auth: &GitAuthConfig) -> Result<PathBuf>;

    /// Removes a checkout returned by [`GitClient::clone_branch`].
    async fn cleanup(&self, checkout: &Path);

    async fn current_commit(&self, checkout: &Path) -> Result<String>;

    async fn file_exists(&self, checkout: &Path, relative: &str) -> Result<bool>;

    async fn read_file(&self, checkout: &Path, relative: &str) -> Result<String>;

    /// Lists one directory of the checkout, directories first.
    async fn browse_tree(&self, checkout: &Path, relative: &str) -> Result<Vec<TreeEntry>>;

    async fn list_branches(&self, url: &str, auth: &GitAuthConfig) -> Result<Vec<BranchInfo>>;

    /// Succeeds when the remote is reachable and has `branch`.
    async fn test_connection(&self, url: &str, branch: &str, auth: &GitAuthConfig) -> Result<()>;
}

/// Resolves a repository-relative path inside `checkout`, rejecting
/// absolute paths and `..` segments that climb out of it.
pub fn resolve_in_checkout(checkout: &Path, relative: &str) -> Result<PathBuf> {
    let mut resolved = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return Err(GitOpsError::PathTraversal(relative.to_string()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(GitOpsError::PathTraversal(relative.to_string()));
            }
        }
    }
    Ok(checkout.join(resolved))
}

/// [`GitClient`] backed by the `git` binary.
pub struct CliGitClient {
    binary: String,
    work_dir: PathBuf,
    timeout: Duration,
}

impl CliGitClient {
    pub fn new(work_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: "git".to_string(),
            work_dir: work_dir.into(),
            timeout,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    async fn run_git(&self, args: &[&str], cwd: Option<&Path>, auth: &AuthEnv) -> Result<Output> {
        let mut cmd = TokioCommand::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &auth.env_vars {
            cmd.env(key, value);
        }

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| GitOpsError::GitTimeout(self.timeout.as_secs()))?
            .map_err(|e| GitOpsError::GitOperation(format!("failed to run git: {}", e)))?;

        if output.status.success() {
            Ok(output)
        } else {
            Err(classify_git_error(&format_git_error(&output)))
        }
    }
}

#[async_trait]
impl GitClient for CliGitClient {
    async fn clone_branch(&self, url: &str, branch: &str, auth: &GitAuthConfig) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let dest = self
            .work_dir
            .join(format!("stackpilot-sync-{}", uuid::Uuid::new_v4()));
        let dest_str = dest.to_string_lossy().into_owned();

        log::debug!("Cloning {} ({}) into {}", redact_repo_url(url), branch, dest.display());
        let env = build_auth_env(auth)?;
        let result = self
            .run_git(
                &[
                    "clone",
                    "--depth",
                    "1",
                    "--branch",
                    branch,
                    "--single-branch",
                    "--",
                    url,
                    &dest_str,
                ],
                None,
                &env,
            )
            .await;
        drop(env);

        match result {
            Ok(_) => Ok(dest),
            Err(e) => {
                self.cleanup(&dest).await;
                Err(e)
            }
        }
    }

    async fn cleanup(&self, checkout: &Path) {
        if !checkout.starts_with(&self.work_dir) || checkout == self.work_dir {
            log::warn!(
                "Refusing to remove {}: not a checkout below {}",
                checkout.display(),
                self.work_dir.display()
            );
            return;
        }
        match tokio::fs::remove_dir_all(checkout).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove checkout {}: {}", checkout.display(), e),
        }
    }

    async fn current_commit(&self, checkout: &Path) -> Result<String> {
        let env = build_auth_env(&GitAuthConfig::default())?;
        let output = self.run_git(&["rev-parse", "HEAD"], Some(checkout), &env).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn file_exists(&self, checkout: &Path, relative: &str) -> Result<bool> {
        let path = resolve_in_checkout(checkout, relative)?;
        Ok(tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false))
    }

    async fn read_file(&self, checkout: &Path, relative: &str) -> Result<String> {
        let path = resolve_in_checkout(checkout, relative)?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| GitOpsError::FileOperation(format!("{}: {}", relative, e)))
    }

    async fn browse_tree(&self, checkout: &Path, relative: &str) -> Result<Vec<TreeEntry>> {
        let dir = resolve_in_checkout(checkout, relative)?;
        let base = relative.trim_matches('/');

        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| GitOpsError::FileOperation(format!("{}: {}", relative, e)))?;
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == ".git" {
                continue;
            }
            let metadata = entry.metadata().await?;
            let path = if base.is_empty() || base == "." {
                name.clone()
            } else {
                format!("{}/{}", base, name)
            };
            let (kind, size) = if metadata.is_dir() {
                (TreeEntryKind::Directory, None)
            } else {
                (TreeEntryKind::File, Some(metadata.len()))
            };
            entries.push(TreeEntry { name, path, kind, size });
        }

        entries.sort_by(|a, b| {
            let a_dir = a.kind == TreeEntryKind::Directory;
            let b_dir = b.kind == TreeEntryKind::Directory;
            b_dir.cmp(&a_dir).then_with(|| a.name.cmp(&b.name))
        });
        Ok(entries)
    }

    async fn list_branches(&self, url: &str, auth: &GitAuthConfig) -> Result<Vec<BranchInfo>> {
        let env = build_auth_env(auth)?;
        let output = self
            .run_git(&["ls-remote", "--heads", "--", url], None, &env)
            .await?;
        Ok(parse_ls_remote_heads(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn test_connection(&self, url: &str, branch: &str, auth: &GitAuthConfig) -> Result<()> {
        let env = build_auth_env(auth)?;
        let reference = format!("refs/heads/{}", branch);
        let output = self
            .run_git(&["ls-remote", "--heads", "--", url, &reference], None, &env)
            .await?;
        if parse_ls_remote_heads(&String::from_utf8_lossy(&output.stdout)).is_empty() {
            return Err(GitOpsError::GitOperation(format!(
                "branch '{}' not found in {}",
                branch,
                redact_repo_url(url)
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_in_checkout() {
        let checkout = Path::new("/tmp/co");
        assert_eq!(
            resolve_in_checkout(checkout, "stacks/web/compose.yaml").unwrap(),
            PathBuf::from("/tmp/co/stacks/web/compose.yaml")
        );
        assert_eq!(
            resolve_in_checkout(checkout, "./a/../compose.yaml").unwrap(),
            PathBuf::from("/tmp/co/compose.yaml")
        );
        assert_eq!(resolve_in_checkout(checkout, "").unwrap(), PathBuf::from("/tmp/co"));
    }

    #[test]
    fn test_resolve_in_checkout_rejects_escape() {
        let checkout = Path::new("/tmp/co");
        assert!(matches!(
            resolve_in_checkout(checkout, "../secrets"),
            Err(GitOpsError::PathTraversal(_))
        ));
        assert!(matches!(
            resolve_in_checkout(checkout, "/etc/passwd"),
            Err(GitOpsError::PathTraversal(_))
        ));
    }

    #[tokio::test]
    async fn test_browse_tree_and_read() {
        let work = TempDir::new().unwrap();
        let checkout = work.path().join("co");
        std::fs::create_dir_all(checkout.join(".git")).unwrap();
        std::fs::create_dir_all(checkout.join("stacks")).unwrap();
        std::fs::write(checkout.join("README.md"), "hi").unwrap();
        std::fs::write(checkout.join("stacks/compose.yaml"), "services: {}\n").unwrap();

        let client = CliGitClient::new(work.path(), Duration::from_secs(5));

        let root = client.browse_tree(&checkout, "").await.unwrap();
        let names: Vec<&str> = root.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["stacks", "README.md"]);
        assert_eq!(root[1].size, Some(2));

        let nested = client.browse_tree(&checkout, "stacks").await.unwrap();
        assert_eq!(nested[0].path, "stacks/compose.yaml");

        assert!(client.file_exists(&checkout, "stacks/compose.yaml").await.unwrap());
        assert!(!client.file_exists(&checkout, "stacks").await.unwrap());
        assert_eq!(
            client.read_file(&checkout, "stacks/compose.yaml").await.unwrap(),
            "services: {}\n"
        );
    }

    #[tokio::test]
    async fn test_cleanup_only_below_work_dir() {
        let work = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let client = CliGitClient::new(work.path(), Duration::from_secs(5));

        client.cleanup(outside.path()).await;
        assert!(outside.path().exists());

        let checkout = work.path().join("stackpilot-sync-x");
        std::fs::create_dir_all(&checkout).unwrap();
        client.cleanup(&checkout).await;
        assert!(!checkout.exists());
    }
}
