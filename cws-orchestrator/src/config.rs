use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Everything the orchestrator needs to render manifests and bound cluster calls.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound for each cluster call and for the restart wait.
    pub operation_timeout: Duration,
    /// How often restart polls for the old deployment to disappear.
    pub poll_interval: Duration,
    pub storage: StorageSettings,
    pub container: ContainerSettings,
    pub compute: ComputeDefaults,
    pub images: ImageCatalog,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            storage: StorageSettings::default(),
            container: ContainerSettings::default(),
            compute: ComputeDefaults::default(),
            images: ImageCatalog::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    pub size: String,
    pub class_name: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            size: "10Gi".to_string(),
            class_name: "standard".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSettings {
    pub port: i32,
    pub mount_path: String,
    /// Directory in the workspace image holding one tree per template.
    pub templates_path: String,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            port: 3000,
            mount_path: "/workspace".to_string(),
            templates_path: "/opt/cloudcode/templates".to_string(),
        }
    }
}

/// Request/limit pairs used when a workspace does not override them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeDefaults {
    pub cpu_request: String,
    pub cpu_limit: String,
    pub memory_request: String,
    pub memory_limit: String,
}

impl Default for ComputeDefaults {
    fn default() -> Self {
        Self {
            cpu_request: "500m".to_string(),
            cpu_limit: "1000m".to_string(),
            memory_request: "1Gi".to_string(),
            memory_limit: "2Gi".to_string(),
        }
    }
}

/// Container image per `(template, language)`, with a fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCatalog {
    images: BTreeMap<(String, String), String>,
    base: String,
}

impl ImageCatalog {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            images: BTreeMap::new(),
            base: base.into(),
        }
    }

    /// The stock catalog with every image under `prefix/`.
    pub fn with_prefix(prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        let mut catalog = Self::new(format!("{prefix}/base:latest"));
        for template in ["react", "node"] {
            for language in ["typescript", "javascript"] {
                catalog = catalog.with_image(
                    template,
                    language,
                    format!("{prefix}/{template}-{language}:latest"),
                );
            }
        }
        catalog
            .with_image("python", "python", format!("{prefix}/python:latest"))
            .with_image("java", "java", format!("{prefix}/java:latest"))
    }

    pub fn with_image(mut self, template: &str, language: &str, image: impl Into<String>) -> Self {
        self.images
            .insert((template.to_string(), language.to_string()), image.into());
        self
    }

    pub fn image_for(&self, template: &str, language: &str) -> &str {
        self.images
            .get(&(template.to_string(), language.to_string()))
            .unwrap_or(&self.base)
    }
}

impl Default for ImageCatalog {
    fn default() -> Self {
        Self::with_prefix("cloudcode")
    }
}
