use cws_orchestrator::{ContainerSettings, ImageCatalog, OrchestratorConfig, StorageSettings};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("CWS_API_KEY must be set to a non-empty value")]
    MissingApiKey,
}

#[derive(Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_api_key")]
    pub api_key: String,

    #[serde(default = "default_cluster_timeout")]
    pub cluster_timeout_secs: u64,

    #[serde(default = "default_storage_size")]
    pub storage_size: String,

    #[serde(default = "default_storage_class")]
    pub storage_class: String,

    #[serde(default = "default_container_port")]
    pub container_port: i32,

    #[serde(default = "default_mount_path")]
    pub mount_path: String,

    #[serde(default = "default_templates_path")]
    pub templates_path: String,

    #[serde(default = "default_image_prefix")]
    pub image_prefix: String,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("api_key", &"<redacted>")
            .field("cluster_timeout_secs", &self.cluster_timeout_secs)
            .field("storage_size", &self.storage_size)
            .field("storage_class", &self.storage_class)
            .field("container_port", &self.container_port)
            .field("mount_path", &self.mount_path)
            .field("templates_path", &self.templates_path)
            .field("image_prefix", &self.image_prefix)
            .finish()
    }
}

fn env_or(name: &str, fallback: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| fallback.to_string())
}

fn env_parsed<T: std::str::FromStr>(name: &str, fallback: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(fallback)
}

fn default_bind_addr() -> String {
    env_or("CWS_API_BIND", "0.0.0.0:8001")
}

fn default_api_key() -> String {
    env_or("CWS_API_KEY", "")
}

fn default_cluster_timeout() -> u64 {
    env_parsed("CWS_CLUSTER_TIMEOUT_SECS", 30)
}

fn default_storage_size() -> String {
    env_or("CWS_STORAGE_SIZE", "10Gi")
}

fn default_storage_class() -> String {
    env_or("CWS_STORAGE_CLASS", "standard")
}

fn default_container_port() -> i32 {
    env_parsed("CWS_CONTAINER_PORT", 3000)
}

fn default_mount_path() -> String {
    env_or("CWS_MOUNT_PATH", "/workspace")
}

fn default_templates_path() -> String {
    env_or("CWS_TEMPLATES_PATH", "/opt/cloudcode/templates")
}

fn default_image_prefix() -> String {
    env_or("CWS_IMAGE_PREFIX", "cloudcode")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            api_key: default_api_key(),
            cluster_timeout_secs: default_cluster_timeout(),
            storage_size: default_storage_size(),
            storage_class: default_storage_class(),
            container_port: default_container_port(),
            mount_path: default_mount_path(),
            templates_path: default_templates_path(),
            image_prefix: default_image_prefix(),
        }
    }
}

impl Config {
    /// Read every setting from the environment. The API key is mandatory.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().validated()
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        Ok(self)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            operation_timeout: Duration::from_secs(self.cluster_timeout_secs.max(1)),
            storage: StorageSettings {
                size: self.storage_size.clone(),
                class_name: self.storage_class.clone(),
            },
            container: ContainerSettings {
                port: self.container_port,
                mount_path: self.mount_path.clone(),
                templates_path: self.templates_path.clone(),
            },
            images: ImageCatalog::with_prefix(&self.image_prefix),
            ..Default::default()
        }
    }
}
