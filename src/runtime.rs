//! Container runtime boundary: probing compose projects and launching them

use crate::config::RuntimeConfig;
use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::Docker;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Label Compose puts on every container of a project
pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

/// The two primitives the activator needs from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Number of running containers labelled with the given compose project
    async fn count_project_containers(&self, project: &str) -> anyhow::Result<usize>;

    /// Spawn a detached `compose up` for the file and project.
    ///
    /// Returns once the process is spawned. The outcome of the launch is
    /// never reported back.
    async fn compose_up(&self, compose_file: &Path, project: &str) -> anyhow::Result<()>;
}

/// Wrapper to share a runtime across tasks
pub type SharedRuntime = Arc<dyn ContainerRuntime>;

/// Whether any container of `project` is running.
///
/// Runtime errors are logged and read as "not running" so that an
/// unreachable daemon never blocks an activation attempt.
pub async fn is_running(runtime: &dyn ContainerRuntime, project: &str) -> bool {
    match runtime.count_project_containers(project).await {
        Ok(count) => {
            debug!(project, count, "Probed compose project");
            count > 0
        }
        Err(e) => {
            warn!(project, error = %e, "Cannot query container runtime, assuming stack is not running");
            false
        }
    }
}

/// Docker-backed runtime: bollard for queries, the compose CLI for launches
pub struct DockerRuntime {
    client: Docker,
    launcher: ComposeLauncher,
}

/// Seconds bollard waits on a Docker API call
const DOCKER_TIMEOUT_SECS: u64 = 120;

/// Where to reach the Docker API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerEndpoint {
    Socket(PathBuf),
    Http(String),
}

impl DockerEndpoint {
    /// Parse a `unix://`, `tcp://` or `http://` address
    pub fn parse(host: &str) -> anyhow::Result<Self> {
        if let Some(path) = host.strip_prefix("unix://") {
            Ok(Self::Socket(PathBuf::from(path)))
        } else if host.starts_with("tcp://") || host.starts_with("http://") {
            Ok(Self::Http(host.to_string()))
        } else {
            anyhow::bail!(
                "Invalid docker_host format: '{}'. Expected 'unix:///path/to/socket' or 'tcp://host:port'",
                host
            )
        }
    }

    fn client(&self) -> anyhow::Result<Docker> {
        match self {
            Self::Socket(path) => {
                let path = path.to_string_lossy();
                Docker::connect_with_socket(&path, DOCKER_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
                    .map_err(|e| anyhow::anyhow!("Cannot open Docker socket '{}': {}", path, e))
            }
            Self::Http(url) => {
                Docker::connect_with_http(url, DOCKER_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
                    .map_err(|e| anyhow::anyhow!("Cannot reach Docker at '{}': {}", url, e))
            }
        }
    }
}

/// Existing sockets of the usual local engines, most common first
fn local_sockets() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from("/var/run/docker.sock")];
    if let Some(home) = std::env::var_os("HOME").filter(|h| !h.is_empty()) {
        let home = PathBuf::from(home);
        candidates.push(home.join(".docker/run/docker.sock"));
        candidates.push(home.join(".colima/default/docker.sock"));
        candidates.push(home.join(".rd/docker.sock"));
    }
    if let Some(runtime_dir) = std::env::var_os("XDG_RUNTIME_DIR").filter(|d| !d.is_empty()) {
        candidates.push(PathBuf::from(runtime_dir).join("podman/podman.sock"));
    }
    candidates.retain(|path| path.exists());
    candidates
}

impl DockerRuntime {
    /// Create a runtime for the configured Docker endpoint: the
    /// `docker_host` setting, then DOCKER_HOST, then local sockets.
    ///
    /// The daemon does not have to be up yet; probes made while it is
    /// down fail and are treated as "not running".
    pub async fn connect(config: &RuntimeConfig) -> anyhow::Result<Self> {
        let explicit = config
            .docker_host
            .clone()
            .or_else(|| std::env::var("DOCKER_HOST").ok().filter(|h| !h.is_empty()));

        let client = match explicit {
            Some(host) => DockerEndpoint::parse(&host)?.client()?,
            None => Self::connect_local().await?,
        };

        Ok(Self {
            client,
            launcher: ComposeLauncher::from_config(config)?,
        })
    }

    /// First local socket whose daemon answers, else the first that opens
    async fn connect_local() -> anyhow::Result<Docker> {
        let mut idle = None;
        for path in local_sockets() {
            let client = match DockerEndpoint::Socket(path.clone()).client() {
                Ok(client) => client,
                Err(e) => {
                    debug!(error = %e, "Skipping Docker socket");
                    continue;
                }
            };
            if client.ping().await.is_ok() {
                debug!(path = %path.display(), "Using Docker socket");
                return Ok(client);
            }
            debug!(path = %path.display(), "Docker socket present but daemon silent");
            idle.get_or_insert(client);
        }

        match idle {
            Some(client) => Ok(client),
            None => Docker::connect_with_socket_defaults().map_err(|e| {
                anyhow::anyhow!(
                    "Cannot set up a Docker client. Set DOCKER_HOST or runtime.docker_host: {}",
                    e
                )
            }),
        }
    }

    /// Check that the daemon answers
    pub async fn ping(&self) -> anyhow::Result<()> {
        self.client
            .ping()
            .await
            .map_err(|e| anyhow::anyhow!("Docker daemon is not responding: {}", e))?;
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn count_project_containers(&self, project: &str) -> anyhow::Result<usize> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{}={}", COMPOSE_PROJECT_LABEL, project)],
        );

        let options = ListContainersOptions::<String> {
            all: false,
            filters,
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to list containers of project '{}': {}", project, e))?;

        Ok(containers.len())
    }

    async fn compose_up(&self, compose_file: &Path, project: &str) -> anyhow::Result<()> {
        self.launcher.spawn(compose_file, project).map(|_| ())
    }
}

/// Spawns `<compose command> -f <file> -p <project> up -d` as a detached process
#[derive(Debug, Clone)]
pub struct ComposeLauncher {
    argv: Vec<String>,
    docker_host: Option<String>,
}

impl ComposeLauncher {
    pub fn new(argv: Vec<String>, docker_host: Option<String>) -> anyhow::Result<Self> {
        if argv.is_empty() {
            anyhow::bail!("Compose command must not be empty");
        }
        Ok(Self { argv, docker_host })
    }

    pub fn from_config(config: &RuntimeConfig) -> anyhow::Result<Self> {
        Self::new(config.compose_argv()?, config.docker_host.clone())
    }

    /// Arguments passed after the program name
    pub fn args(&self, compose_file: &Path, project: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.argv[1..].iter().map(OsString::from).collect();
        args.push("-f".into());
        args.push(compose_file.as_os_str().to_owned());
        args.push("-p".into());
        args.push(project.into());
        args.push("up".into());
        args.push("-d".into());
        args
    }

    /// Spawn the launch and hand the child to a background task that
    /// reaps it. Returns the pid when the platform reports one.
    pub fn spawn(&self, compose_file: &Path, project: &str) -> anyhow::Result<Option<u32>> {
        let program = &self.argv[0];

        let mut cmd = Command::new(program);
        cmd.args(self.args(compose_file, project));
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());

        if let Some(ref host) = self.docker_host {
            cmd.env("DOCKER_HOST", host);
        }

        let child = cmd.spawn().map_err(|e| {
            anyhow::anyhow!(
                "Failed to run '{}' for project '{}': {}",
                program, project, e
            )
        })?;

        let pid = child.id();
        info!(
            project,
            pid = pid.unwrap_or(0),
            file = %compose_file.display(),
            "Compose launch spawned"
        );

        tokio::spawn(watch_launch(child, project.to_string()));

        Ok(pid)
    }
}

/// Forward compose output to tracing and log how the launch ended
async fn watch_launch(mut child: Child, project: String) {
    if let Some(stderr) = child.stderr.take() {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim_end();
                    if !line.is_empty() {
                        debug!(target: "compose", project = %project, "{}", line);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(project = %project, error = %e, "Error reading compose output");
                    break;
                }
            }
        }
    }

    match child.wait().await {
        Ok(status) if status.success() => {
            info!(project = %project, "Compose launch finished");
        }
        Ok(status) => {
            warn!(project = %project, code = ?status.code(), "Compose launch exited with failure");
        }
        Err(e) => {
            warn!(project = %project, error = %e, "Failed to wait for compose launch");
        }
    }
}
