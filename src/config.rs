use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides the stack store location
pub const STACKS_FILE_ENV: &str = "FAROLERO_CONFIG";

/// Global configuration for the gateway
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// HTTP listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Where the stack definitions live
    #[serde(default)]
    pub stacks: StacksConfig,

    /// Container runtime settings
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// HTTP port (default: 8080)
    #[serde(default = "default_listen_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_listen_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StacksConfig {
    /// Path to the YAML stack store
    #[serde(default = "default_stacks_file")]
    pub file: PathBuf,

    /// Write an example store when the file is missing at startup
    #[serde(default = "default_true")]
    pub create_example: bool,
}

impl Default for StacksConfig {
    fn default() -> Self {
        Self {
            file: default_stacks_file(),
            create_example: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// Docker endpoint, `unix:///path` or `tcp://host:port`
    /// (default: DOCKER_HOST, then the usual socket locations)
    pub docker_host: Option<String>,

    /// Command line that runs Compose, split shell-style
    #[serde(default = "default_compose_command")]
    pub compose_command: String,

    /// Seconds after a launch during which a stack that is not yet
    /// visible in the runtime is reported as starting instead of being
    /// launched again
    #[serde(default = "default_launch_grace")]
    pub launch_grace_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            docker_host: None,
            compose_command: default_compose_command(),
            launch_grace_secs: default_launch_grace(),
        }
    }
}

impl RuntimeConfig {
    pub fn launch_grace(&self) -> Duration {
        Duration::from_secs(self.launch_grace_secs)
    }

    /// Program and leading arguments of the compose command
    pub fn compose_argv(&self) -> anyhow::Result<Vec<String>> {
        let argv = shell_words::split(&self.compose_command).map_err(|e| {
            anyhow::anyhow!("Invalid compose_command '{}': {}", self.compose_command, e)
        })?;
        if argv.is_empty() {
            anyhow::bail!("'compose_command' must not be empty");
        }
        Ok(argv)
    }
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    8080
}

fn default_stacks_file() -> PathBuf {
    PathBuf::from("config.yaml")
}

fn default_true() -> bool {
    true
}

fn default_compose_command() -> String {
    "docker compose".to_string()
}

fn default_launch_grace() -> u64 {
    30
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise start from defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply overrides taken from the process environment
    pub fn apply_env(mut self) -> Self {
        if let Ok(file) = std::env::var(STACKS_FILE_ENV) {
            if !file.trim().is_empty() {
                self.stacks.file = PathBuf::from(file);
            }
        }
        self
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("'server.port' must be greater than 0".to_string());
        }

        if self.stacks.file.as_os_str().is_empty() {
            errors.push("'stacks.file' must not be empty".to_string());
        }

        if let Err(e) = self.runtime.compose_argv() {
            errors.push(e.to_string());
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
port = 9000
bind = "127.0.0.1"

[stacks]
file = "/etc/farolero/stacks.yaml"
create_example = false

[runtime]
docker_host = "unix:///run/user/1000/docker.sock"
compose_command = "docker-compose"
launch_grace_secs = 5
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.stacks.file, PathBuf::from("/etc/farolero/stacks.yaml"));
        assert!(!config.stacks.create_example);
        assert_eq!(
            config.runtime.docker_host.as_deref(),
            Some("unix:///run/user/1000/docker.sock")
        );
        assert_eq!(config.runtime.compose_argv().unwrap(), vec!["docker-compose"]);
        assert_eq!(config.runtime.launch_grace(), Duration::from_secs(5));
    }

    #[test]
    fn test_empty_config() {
        let config: Config = toml::from_str("").unwrap();

        // Should use all defaults
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.stacks.file, PathBuf::from("config.yaml"));
        assert!(config.stacks.create_example);
        assert!(config.runtime.docker_host.is_none());
        assert_eq!(config.runtime.launch_grace_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_compose_command_splits() {
        let runtime = RuntimeConfig::default();
        assert_eq!(runtime.compose_argv().unwrap(), vec!["docker", "compose"]);
    }

    #[test]
    fn test_compose_command_with_quotes() {
        let runtime = RuntimeConfig {
            compose_command: r#"podman "compose""#.to_string(),
            ..Default::default()
        };
        assert_eq!(runtime.compose_argv().unwrap(), vec!["podman", "compose"]);
    }

    #[test]
    fn test_validate_multiple_errors() {
        let toml = r#"
[server]
port = 0

[runtime]
compose_command = "   "
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err().to_string();

        assert!(err.contains("'server.port' must be greater than 0"));
        assert!(err.contains("'compose_command' must not be empty"));
    }

    #[test]
    fn test_validate_unbalanced_quotes() {
        let runtime = RuntimeConfig {
            compose_command: r#"docker "compose"#.to_string(),
            ..Default::default()
        };
        assert!(runtime.compose_argv().is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("farolero.toml");
        std::fs::write(&path, "[server]\nport = 0\n").unwrap();

        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("'server.port' must be greater than 0"));
    }
}
