use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Manager endpoint and credentials
    pub connection: ConnectionConfig,
    /// Project (user group) new sessions are created in
    pub project: String,
    /// Preferred scaling group; the first allowed one is used when unset
    pub scaling_group: Option<String>,
    /// Initial values of the launcher form
    pub defaults: LaunchDefaults,
    /// Per-container caps applied on top of what the server allows
    pub limits: LimitsConfig,
    /// Path to user-defined resource templates
    pub templates_path: PathBuf,
    /// Path of the log file
    pub log_path: PathBuf,
}

/// Connection settings for the manager API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Manager API endpoint (e.g. https://api.example.com)
    pub endpoint: String,
    /// Keypair access key
    pub access_key: String,
    /// Keypair secret key
    pub secret_key: String,
    /// Value sent in the X-BackendAI-Version header
    pub api_version: String,
    /// Domain name sent with every request
    pub domain: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8081".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            api_version: "v8.20240915".to_string(),
            domain: "default".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Initial values for a freshly opened launcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchDefaults {
    pub cpu: u32,
    pub mem_gib: f64,
    pub shmem_gib: f64,
    /// Return right after the request is queued instead of waiting for startup
    pub enqueue_only: bool,
    /// Seconds the manager waits for startup when not enqueue-only
    pub max_wait_seconds: u32,
}

impl Default for LaunchDefaults {
    fn default() -> Self {
        Self {
            cpu: 1,
            mem_gib: 2.0,
            shmem_gib: 0.0625,
            enqueue_only: true,
            max_wait_seconds: 0,
        }
    }
}

/// Upper bounds the launcher never exceeds, whatever the server reports
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_cpu_cores_per_container: u32,
    pub max_memory_gib_per_container: f64,
    pub max_shmem_gib_per_container: f64,
    pub max_accelerators_per_container: f64,
    pub max_cluster_size: u32,
    pub max_session_count: u32,
    pub max_preopen_ports: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_cpu_cores_per_container: 64,
            max_memory_gib_per_container: 256.0,
            max_shmem_gib_per_container: 8.0,
            max_accelerators_per_container: 16.0,
            max_cluster_size: 4,
            max_session_count: 3,
            max_preopen_ports: 10,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| home.join(".config"))
            .join("session-launcher");
        let state_dir = dirs::state_dir()
            .or_else(dirs::cache_dir)
            .unwrap_or_else(|| home.join(".cache"))
            .join("session-launcher");

        Self {
            connection: ConnectionConfig::default(),
            project: "default".to_string(),
            scaling_group: None,
            defaults: LaunchDefaults::default(),
            limits: LimitsConfig::default(),
            templates_path: config_dir.join("templates.toml"),
            log_path: state_dir.join("session-launcher.log"),
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path())
    }

    /// Load configuration from an explicit path, falling back to defaults
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config from {:?}", config_path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", config_path))
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path())
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config to {:?}", config_path))?;

        Ok(())
    }

    /// Get the configuration file path
    pub fn config_file_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("session-launcher")
            .join("config.toml")
    }

    /// Apply BACKEND_* environment variables on top of the file values
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("BACKEND_ENDPOINT") {
            self.connection.endpoint = endpoint;
        }
        if let Some(access_key) = lookup("BACKEND_ACCESS_KEY") {
            self.connection.access_key = access_key;
        }
        if let Some(secret_key) = lookup("BACKEND_SECRET_KEY") {
            self.connection.secret_key = secret_key;
        }
        if let Some(project) = lookup("BACKEND_PROJECT") {
            self.project = project;
        }
    }

    /// Check that a keypair is configured
    pub fn ensure_credentials(&self) -> Result<()> {
        if self.connection.access_key.is_empty() || self.connection.secret_key.is_empty() {
            anyhow::bail!(
                "No keypair configured. Set BACKEND_ACCESS_KEY and BACKEND_SECRET_KEY or edit {:?}",
                Self::config_file_path()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.project, "default");
        assert_eq!(config.limits.max_preopen_ports, 10);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.connection.endpoint = "https://api.example.com".to_string();
        config.scaling_group = Some("gpu".to_string());
        config.limits.max_session_count = 5;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.connection.endpoint, "https://api.example.com");
        assert_eq!(loaded.scaling_group.as_deref(), Some("gpu"));
        assert_eq!(loaded.limits.max_session_count, 5);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "project = \"research\"\n[limits]\nmax_cluster_size = 8\n").unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.project, "research");
        assert_eq!(loaded.limits.max_cluster_size, 8);
        assert_eq!(loaded.limits.max_session_count, 3);
        assert_eq!(loaded.connection.api_version, "v8.20240915");
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("BACKEND_ENDPOINT", "https://cluster.local"),
            ("BACKEND_ACCESS_KEY", "AKIATEST"),
            ("BACKEND_SECRET_KEY", "secret"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.connection.endpoint, "https://cluster.local");
        assert_eq!(config.connection.access_key, "AKIATEST");
        assert_eq!(config.project, "default");
        assert!(config.ensure_credentials().is_ok());
    }

    #[test]
    fn test_missing_credentials_rejected() {
        assert!(Config::default().ensure_credentials().is_err());
    }
}
