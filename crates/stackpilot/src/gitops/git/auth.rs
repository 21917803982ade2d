//! Credentials for git subprocesses.

use std::path::PathBuf;

use secrecy::ExposeSecret;

use super::types::GitAuthConfig;
use crate::gitops::error::{GitOpsError, Result};
use crate::model::GitAuthType;

/// Escapes a value for use inside a single-quoted shell string.
pub fn shell_escape(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Deletes the askpass script when dropped so tokens never outlive the
/// git command on disk.
#[derive(Debug)]
pub struct AskpassCleanup {
    path: Option<PathBuf>,
}

impl AskpassCleanup {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn empty() -> Self {
        Self { path: None }
    }
}

impl Drop for AskpassCleanup {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Failed to remove askpass script: {}", e);
            }
        }
    }
}

/// Environment for one git command. Keep it alive until the command exits.
#[derive(Debug)]
pub struct AuthEnv {
    pub env_vars: Vec<(String, String)>,
    pub _cleanup: AskpassCleanup,
}

impl AuthEnv {
    fn plain(env_vars: Vec<(String, String)>) -> Self {
        Self {
            env_vars,
            _cleanup: AskpassCleanup::empty(),
        }
    }
}

/// Builds the git environment for `auth`.
///
/// Tokens are served through a throwaway `GIT_ASKPASS` script that answers
/// the username prompt with the configured username and every other prompt
/// with the token. SSH keys go through `GIT_SSH_COMMAND`.
pub fn build_auth_env(auth: &GitAuthConfig) -> Result<AuthEnv> {
    let mut env = vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())];

    match auth.auth_type {
        GitAuthType::None => Ok(AuthEnv::plain(env)),
        GitAuthType::Token => {
            let token = auth.token.as_ref().ok_or_else(|| {
                GitOpsError::GitAuthFailed("token authentication selected but no token is set".to_string())
            })?;

            let script = askpass_script(auth.username.as_deref(), token.expose_secret());
            let path = std::env::temp_dir().join(format!(".stackpilot-askpass-{}.sh", uuid::Uuid::new_v4()));
            write_script(&path, &script)?;
            let cleanup = AskpassCleanup::new(path.clone());

            let path_str = path
                .to_str()
                .ok_or_else(|| {
                    GitOpsError::GitAuthFailed("temp directory path is not valid UTF-8".to_string())
                })?
                .to_string();
            env.push(("GIT_ASKPASS".to_string(), path_str));

            Ok(AuthEnv {
                env_vars: env,
                _cleanup: cleanup,
            })
        }
        GitAuthType::SshKey => {
            let key_path = resolve_ssh_key_path(auth.ssh_key_path.as_deref());
            if !key_path.exists() {
                return Err(GitOpsError::GitAuthFailed(format!(
                    "SSH key file not found: {}",
                    key_path.display()
                )));
            }

            let display = shell_escape(&key_path.display().to_string());
            let quoted = if display.starts_with('-') {
                format!("'./{}'", display)
            } else {
                format!("'{}'", display)
            };
            env.push((
                "GIT_SSH_COMMAND".to_string(),
                format!("ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new", quoted),
            ));
            Ok(AuthEnv::plain(env))
        }
    }
}

fn askpass_script(username: Option<&str>, token: &str) -> String {
    let token = shell_escape(token);
    match username {
        Some(user) => format!(
            "#!/bin/sh\ncase \"$1\" in\n  Username*) echo '{}' ;;\n  *) echo '{}' ;;\nesac\n",
            shell_escape(user),
            token
        ),
        None => format!("#!/bin/sh\necho '{}'\n", token),
    }
}

#[cfg(unix)]
fn write_script(path: &std::path::Path, script: &str) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o700)
        .open(path)?;
    file.write_all(script.as_bytes())?;
    Ok(())
}

#[cfg(not(unix))]
fn write_script(path: &std::path::Path, script: &str) -> Result<()> {
    std::fs::write(path, script)?;
    Ok(())
}

fn resolve_ssh_key_path(configured: Option<&str>) -> PathBuf {
    let home = dirs::home_dir();
    match configured {
        None => home
            .map(|h| h.join(".ssh").join("id_ed25519"))
            .unwrap_or_else(|| PathBuf::from(".ssh/id_ed25519")),
        Some("~") => home.unwrap_or_default(),
        Some(path) => match path.strip_prefix("~/") {
            Some(rest) => home
                .map(|h| h.join(rest))
                .unwrap_or_else(|| PathBuf::from(path)),
            None => PathBuf::from(path),
        },
    }
}
