//! `docker` CLI backed runtime.
//!
//! Compose commands receive the (possibly rewritten) compose document on
//! stdin via `-f -` with `--project-directory` pointing at the project, so
//! relative paths and `include:` entries resolve as usual.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use super::{ComposeRuntime, ContainerRuntime, LoadedComposeProject, LogOptions, Mount, UpOptions};
use crate::error::RuntimeError;
use crate::model::{ComposeContainer, PortMapping};

const PROJECT_LABEL: &str = "com.docker.compose.project";
const SERVICE_LABEL: &str = "com.docker.compose.service";

static RE_PUBLISHED_PORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(.*):)?(\d+)(?:-\d+)?->(\d+)(?:-\d+)?/(\w+)$").unwrap()
});
static RE_EXPOSED_PORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)(?:-\d+)?/(\w+)$").unwrap());
static RE_HEALTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((healthy|unhealthy|health: starting)\)").unwrap());

/// Runtime that shells out to the docker CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: PathBuf,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.kill_on_drop(true);
        cmd
    }

    fn compose_args(project: &LoadedComposeProject) -> Vec<String> {
        let mut args = vec![
            "compose".to_string(),
            "-p".to_string(),
            project.name.clone(),
            "--project-directory".to_string(),
            project.working_dir.to_string_lossy().into_owned(),
            "-f".to_string(),
            "-".to_string(),
        ];
        if let Some(env_file) = &project.env_file {
            args.push("--env-file".to_string());
            args.push(env_file.to_string_lossy().into_owned());
        }
        args
    }

    fn render(project: &LoadedComposeProject) -> Result<String, RuntimeError> {
        serde_yaml::to_string(&project.document).map_err(|e| RuntimeError::ParseCompose {
            path: project.compose_file.clone(),
            message: e.to_string(),
        })
    }

    /// Runs docker with `args`, feeding `stdin` when given.
    async fn run(&self, args: &[String], stdin: Option<String>) -> Result<Output, RuntimeError> {
        let mut cmd = self.command();
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| RuntimeError::Spawn {
            program: self.binary.display().to_string(),
            source: e,
        })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|e| RuntimeError::Spawn {
                    program: self.binary.display().to_string(),
                    source: e,
                })?;
        }

        child.wait_with_output().await.map_err(|e| RuntimeError::Spawn {
            program: self.binary.display().to_string(),
            source: e,
        })
    }

    async fn run_checked(
        &self,
        args: &[String],
        stdin: Option<String>,
    ) -> Result<Output, RuntimeError> {
        let output = self.run(args, stdin).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(RuntimeError::CommandFailed {
                command: describe(args),
                message: format_command_error(&output),
            })
        }
    }

    async fn compose(
        &self,
        project: &LoadedComposeProject,
        subcommand: &[&str],
    ) -> Result<Output, RuntimeError> {
        let mut args = Self::compose_args(project);
        args.extend(subcommand.iter().map(|s| s.to_string()));
        self.run_checked(&args, Some(Self::render(project)?)).await
    }
}

fn describe(args: &[String]) -> String {
    let shown: Vec<&str> = args.iter().take(3).map(String::as_str).collect();
    format!("docker {}", shown.join(" "))
}

/// Formats a failed command's output, preferring stderr.
pub fn format_command_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "Command failed with exit code {}",
            output.status.code().unwrap_or(-1)
        ),
        (true, false) => stdout,
        (false, true) => stderr,
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}

#[async_trait]
impl ComposeRuntime for DockerCli {
    async fn up(
        &self,
        project: &LoadedComposeProject,
        options: &UpOptions,
    ) -> Result<(), RuntimeError> {
        let mut sub = vec!["up", "-d", "--wait"];
        if options.remove_orphans {
            sub.push("--remove-orphans");
        }
        self.compose(project, &sub).await.map(|_| ())
    }

    async fn down(
        &self,
        project: &LoadedComposeProject,
        remove_volumes: bool,
    ) -> Result<(), RuntimeError> {
        let mut sub = vec!["down"];
        if remove_volumes {
            sub.push("--volumes");
        }
        self.compose(project, &sub).await.map(|_| ())
    }

    async fn restart(&self, project: &LoadedComposeProject) -> Result<(), RuntimeError> {
        self.compose(project, &["restart"]).await.map(|_| ())
    }

    async fn ps(
        &self,
        project: &LoadedComposeProject,
    ) -> Result<Vec<ComposeContainer>, RuntimeError> {
        let output = self
            .compose(project, &["ps", "--all", "--format", "json"])
            .await?;
        parse_compose_ps(&String::from_utf8_lossy(&output.stdout))
    }

    async fn logs(
        &self,
        project: &LoadedComposeProject,
        options: &LogOptions,
        sink: mpsc::Sender<String>,
    ) -> Result<(), RuntimeError> {
        let mut args = Self::compose_args(project);
        args.push("logs".to_string());
        args.push("--no-color".to_string());
        if options.follow {
            args.push("--follow".to_string());
        }
        if options.timestamps {
            args.push("--timestamps".to_string());
        }
        if let Some(tail) = options.tail {
            args.push("--tail".to_string());
            args.push(tail.to_string());
        }

        let spawn_err = |e| RuntimeError::Spawn {
            program: self.binary.display().to_string(),
            source: e,
        };

        let mut child = self
            .command()
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(Self::render(project)?.as_bytes())
                .await
                .map_err(spawn_err)?;
        }

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut collected = String::new();
                let _ = stderr.read_to_string(&mut collected).await;
                collected
            })
        });

        let mut receiver_gone = false;
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if sink.send(line).await.is_err() {
                    receiver_gone = true;
                    break;
                }
            }
        }

        if receiver_gone {
            let _ = child.kill().await;
            return Ok(());
        }

        let status = child.wait().await.map_err(spawn_err)?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if status.success() {
            Ok(())
        } else {
            Err(RuntimeError::CommandFailed {
                command: "docker compose logs".to_string(),
                message: stderr.trim().to_string(),
            })
        }
    }

    async fn list_global_compose_containers(&self) -> Result<Vec<ComposeContainer>, RuntimeError> {
        let args: Vec<String> = [
            "ps",
            "--all",
            "--no-trunc",
            "--filter",
            &format!("label={}", PROJECT_LABEL),
            "--format",
            "{{json .}}",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let output = self.run_checked(&args, None).await?;
        parse_global_ps(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        let args = vec!["image".to_string(), "inspect".to_string(), image.to_string()];
        let output = self.run(&args, None).await?;
        Ok(output.status.success())
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let args = vec!["pull".to_string(), image.to_string()];
        self.run_checked(&args, None).await.map(|_| ())
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        let args = vec!["start".to_string(), id.to_string()];
        self.run_checked(&args, None).await.map(|_| ())
    }

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        let args = vec!["stop".to_string(), id.to_string()];
        self.run_checked(&args, None).await.map(|_| ())
    }

    async fn self_mounts(&self) -> Result<Vec<Mount>, RuntimeError> {
        if !Path::new("/.dockerenv").exists() {
            return Err(RuntimeError::Unavailable(
                "not running inside a container".to_string(),
            ));
        }
        let container_id = std::env::var("HOSTNAME").map_err(|_| {
            RuntimeError::Unavailable("HOSTNAME is not set; cannot identify own container".to_string())
        })?;

        let args = vec![
            "inspect".to_string(),
            "--format".to_string(),
            "{{json .Mounts}}".to_string(),
            container_id,
        ];
        let output = self.run_checked(&args, None).await?;
        parse_mounts(&String::from_utf8_lossy(&output.stdout))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ComposePsEntry {
    #[serde(rename = "ID")]
    id: String,
    name: String,
    #[serde(default)]
    project: String,
    #[serde(default)]
    service: String,
    #[serde(default)]
    image: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    health: String,
    #[serde(default)]
    publishers: Option<Vec<Publisher>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Publisher {
    #[serde(rename = "URL", default)]
    url: String,
    target_port: u16,
    #[serde(default)]
    published_port: u16,
    #[serde(default)]
    protocol: String,
}

impl ComposePsEntry {
    fn into_container(self) -> ComposeContainer {
        let ports = self
            .publishers
            .unwrap_or_default()
            .into_iter()
            .map(|p| PortMapping {
                host_ip: Some(p.url).filter(|u| !u.is_empty()),
                host_port: Some(p.published_port).filter(|port| *port != 0),
                container_port: p.target_port,
                protocol: if p.protocol.is_empty() {
                    "tcp".to_string()
                } else {
                    p.protocol
                },
            })
            .collect();

        ComposeContainer {
            id: self.id,
            name: self.name,
            project: self.project,
            service: self.service,
            image: self.image,
            state: self.state,
            status: self.status,
            health: Some(self.health).filter(|h| !h.is_empty()),
            ports,
        }
    }
}

/// Parses `docker compose ps --format json`, which is a JSON array on some
/// versions and one object per line on others.
pub fn parse_compose_ps(stdout: &str) -> Result<Vec<ComposeContainer>, RuntimeError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let entries: Vec<ComposePsEntry> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).map_err(|e| RuntimeError::ParseOutput(e.to_string()))?
    } else {
        trimmed
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()
            .map_err(|e| RuntimeError::ParseOutput(e.to_string()))?
    };

    Ok(entries.into_iter().map(ComposePsEntry::into_container).collect())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DockerPsEntry {
    #[serde(rename = "ID")]
    id: String,
    names: String,
    #[serde(default)]
    image: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    labels: String,
    #[serde(default)]
    ports: String,
}

fn label_value<'a>(labels: &'a str, key: &str) -> Option<&'a str> {
    labels
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| k.trim() == key)
        .map(|(_, v)| v.trim())
}

/// Parses the `Ports` column of `docker ps`, e.g.
/// `0.0.0.0:8080->80/tcp, :::8080->80/tcp, 443/tcp`.
pub fn parse_ports(ports: &str) -> Vec<PortMapping> {
    ports
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter_map(|entry| {
            if let Some(caps) = RE_PUBLISHED_PORT.captures(entry) {
                Some(PortMapping {
                    host_ip: caps
                        .get(1)
                        .map(|m| m.as_str().to_string())
                        .filter(|ip| !ip.is_empty()),
                    host_port: caps[2].parse().ok(),
                    container_port: caps[3].parse().ok()?,
                    protocol: caps[4].to_string(),
                })
            } else {
                RE_EXPOSED_PORT.captures(entry).and_then(|caps| {
                    Some(PortMapping {
                        host_ip: None,
                        host_port: None,
                        container_port: caps[1].parse().ok()?,
                        protocol: caps[2].to_string(),
                    })
                })
            }
        })
        .collect()
}

/// Parses `docker ps --format '{{json .}}'` output, one object per line.
pub fn parse_global_ps(stdout: &str) -> Result<Vec<ComposeContainer>, RuntimeError> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let entry: DockerPsEntry =
                serde_json::from_str(line).map_err(|e| RuntimeError::ParseOutput(e.to_string()))?;
            let health = RE_HEALTH
                .captures(&entry.status)
                .map(|caps| caps[1].trim_start_matches("health: ").to_string());
            Ok(ComposeContainer {
                project: label_value(&entry.labels, PROJECT_LABEL)
                    .unwrap_or_default()
                    .to_string(),
                service: label_value(&entry.labels, SERVICE_LABEL)
                    .unwrap_or_default()
                    .to_string(),
                ports: parse_ports(&entry.ports),
                id: entry.id,
                name: entry.names,
                image: entry.image,
                state: entry.state,
                status: entry.status,
                health,
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectMount {
    #[serde(default)]
    source: String,
    destination: String,
}

/// Parses `docker inspect --format '{{json .Mounts}}'`.
pub fn parse_mounts(stdout: &str) -> Result<Vec<Mount>, RuntimeError> {
    let mounts: Vec<InspectMount> = serde_json::from_str(stdout.trim())
        .map_err(|e| RuntimeError::ParseOutput(e.to_string()))?;
    Ok(mounts
        .into_iter()
        .filter(|m| !m.source.is_empty())
        .map(|m| Mount {
            source: PathBuf::from(m.source),
            destination: PathBuf::from(m.destination),
        })
        .collect())
}
