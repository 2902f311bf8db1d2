use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_host: String,
    pub listen_port: u16,
    /// Largest chunk handed from a body reader to the worker.
    pub body_buffer_size: usize,
    pub body_channel_capacity: usize,
    /// Port appended to a `Host` header that does not carry one.
    pub default_port: u16,
    pub allowed_methods: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_host: "127.0.0.1".to_string(),
            listen_port: 8080,
            body_buffer_size: 4096,
            body_channel_capacity: 16,
            default_port: 80,
            allowed_methods: vec!["GET".to_string(), "HEAD".to_string()],
        }
    }
}

/// Per-worker settings projected out of [`Config`].
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerOptions {
    pub body_buffer_size: usize,
    pub body_channel_capacity: usize,
    pub default_port: u16,
    pub allowed_methods: Vec<String>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Config::default().worker_options()
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        Ok(config)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            body_buffer_size: self.body_buffer_size.max(1),
            body_channel_capacity: self.body_channel_capacity.max(1),
            default_port: self.default_port,
            allowed_methods: self.allowed_methods.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen_host, "127.0.0.1");
        assert_eq!(config.listen_port, 8080);
        assert_eq!(config.body_buffer_size, 4096);
        assert_eq!(config.allowed_methods, vec!["GET", "HEAD"]);
    }

    #[test]
    fn test_listen_addr() {
        let config = Config::default();
        assert_eq!(config.listen_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_worker_options_clamp_zero_sizes() {
        let config = Config {
            body_buffer_size: 0,
            body_channel_capacity: 0,
            ..Config::default()
        };
        let options = config.worker_options();
        assert_eq!(options.body_buffer_size, 1);
        assert_eq!(options.body_channel_capacity, 1);
        assert_eq!(options.default_port, 80);
    }

    #[test]
    fn test_file_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("fwdproxy.json");

        let config = Config {
            listen_port: 3128,
            body_buffer_size: 1024,
            ..Config::default()
        };
        config.to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("partial.toml");
        std::fs::write(&path, "listen_port = 9000\n").unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.listen_port, 9000);
        assert_eq!(loaded.listen_host, "127.0.0.1");
        assert_eq!(loaded.default_port, 80);
    }
}
