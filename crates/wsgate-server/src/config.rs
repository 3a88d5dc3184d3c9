//! Server configuration: TOML file + CLI overrides.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;
use wsgate_core::{GatewayError, GatewayResult};

/// Top-level config file structure.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendSection>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            backends: default_backends(),
        }
    }
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

/// Which handler implementation a `[[backends]]` entry uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKindConfig {
    Http,
    Udp,
    Peer,
    Service,
}

/// One `[[backends]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendSection {
    pub name: String,
    pub kind: BackendKindConfig,
    /// Default endpoint for `udp` (`host:port`) and `peer` (`ws://...`) backends.
    #[serde(default)]
    pub target: Option<String>,
    /// When set, requests must pass a bearer-token POST here before any call runs.
    #[serde(default)]
    pub handshake_url: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8081
}
fn default_max_frame_size() -> usize {
    1_048_576
}
fn default_backends() -> Vec<BackendSection> {
    let entry = |name: &str, kind| BackendSection {
        name: name.to_string(),
        kind,
        target: None,
        handshake_url: None,
    };
    vec![
        entry("echo", BackendKindConfig::Service),
        entry("math", BackendKindConfig::Service),
        entry("http", BackendKindConfig::Http),
    ]
}

/// Resolved server configuration (CLI overrides applied, validated).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_frame_size: usize,
    pub backends: Vec<BackendSection>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let file = ConfigFile::default();
        Self {
            host: file.server.host,
            port: file.server.port,
            max_frame_size: file.server.max_frame_size,
            backends: file.backends,
        }
    }
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_host: Option<&str>,
        cli_port: Option<u16>,
    ) -> GatewayResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    Self::parse(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        let config = Self {
            host: cli_host
                .map(|s| s.to_string())
                .unwrap_or(file_config.server.host),
            port: cli_port.unwrap_or(file_config.server.port),
            max_frame_size: file_config.server.max_frame_size,
            backends: file_config.backends,
        };
        config.validate()?;
        Ok(config)
    }

    fn parse(content: &str) -> GatewayResult<ConfigFile> {
        toml::from_str::<ConfigFile>(content)
            .map_err(|e| GatewayError::Config(format!("config parse error: {e}")))
    }

    fn validate(&self) -> GatewayResult<()> {
        if self.port == 0 {
            return Err(GatewayError::Config("invalid listen port 0".into()));
        }
        if self.max_frame_size == 0 {
            return Err(GatewayError::Config("max_frame_size must be positive".into()));
        }
        let mut seen = HashSet::new();
        for backend in &self.backends {
            if backend.name.is_empty() {
                return Err(GatewayError::Config("backend with empty name".into()));
            }
            if !seen.insert(backend.name.as_str()) {
                return Err(GatewayError::Config(format!(
                    "duplicate backend name '{}'",
                    backend.name
                )));
            }
        }
        Ok(())
    }

    /// `host:port` string for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let cfg = ServerConfig::load(None, None, None).unwrap();
        assert_eq!(cfg.port, 8081);
        assert_eq!(cfg.host, "127.0.0.1");
        let names: Vec<_> = cfg.backends.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["echo", "math", "http"]);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg =
            ServerConfig::load(Some(Path::new("/nonexistent/wsgate.toml")), None, Some(9000))
                .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.backends.len(), 3);
    }

    #[test]
    fn parses_backends_table() {
        let file = ServerConfig::parse(
            r#"
            [server]
            port = 7000

            [[backends]]
            name = "metrics"
            kind = "udp"
            target = "127.0.0.1:9000"

            [[backends]]
            name = "peer"
            kind = "peer"
            target = "ws://127.0.0.1:5001"
            handshake_url = "https://auth.example/handshake"
            "#,
        )
        .unwrap();
        assert_eq!(file.server.port, 7000);
        assert_eq!(file.server.host, "127.0.0.1");
        assert_eq!(file.backends.len(), 2);
        assert_eq!(file.backends[0].kind, BackendKindConfig::Udp);
        assert_eq!(file.backends[1].target.as_deref(), Some("ws://127.0.0.1:5001"));
        assert!(file.backends[1].handshake_url.is_some());
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = ServerConfig::parse("[[backends]]\nname = \"x\"\nkind = \"ftp\"\n").unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn rejects_duplicate_names_and_port_zero() {
        let mut cfg = ServerConfig::default();
        cfg.backends.push(cfg.backends[0].clone());
        assert!(cfg.validate().is_err());

        let cfg = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
