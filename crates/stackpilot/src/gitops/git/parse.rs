//! Git output parsing helpers.

use std::process::Output;

use super::types::BranchInfo;

/// Formats a git error with both stdout and stderr for better debugging.
pub fn format_git_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "git exited with code {}",
            output.status.code().unwrap_or(-1)
        ),
        (true, false) => stdout,
        (false, true) => stderr,
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}

/// Parses `git ls-remote --heads` output into branch heads sorted by name.
///
/// Lines look like `<sha>\trefs/heads/<name>`; anything else is skipped.
pub fn parse_ls_remote_heads(output: &str) -> Vec<BranchInfo> {
    let mut branches: Vec<BranchInfo> = output
        .lines()
        .filter_map(|line| {
            let (commit, reference) = line.trim().split_once(char::is_whitespace)?;
            let name = reference.trim().strip_prefix("refs/heads/")?;
            if commit.is_empty() || name.is_empty() {
                return None;
            }
            Some(BranchInfo {
                name: name.to_string(),
                commit: commit.to_string(),
            })
        })
        .collect();
    branches.sort_by(|a, b| a.name.cmp(&b.name));
    branches
}
