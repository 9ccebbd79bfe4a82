//! Input validation, applied before any cluster call.

use crate::error::{OrchestratorError, Result};
use crate::template::PackageManager;
use crate::workspace::{CreateWorkspaceRequest, ResourceRequest};
use regex::Regex;
use std::sync::OnceLock;

static WORKSPACE_ID_RE: OnceLock<Option<Regex>> = OnceLock::new();
static TOKEN_RE: OnceLock<Option<Regex>> = OnceLock::new();
static CPU_RE: OnceLock<Option<Regex>> = OnceLock::new();
static MEMORY_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn is_match(cell: &'static OnceLock<Option<Regex>>, pattern: &str, value: &str) -> bool {
    cell.get_or_init(|| Regex::new(pattern).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(value))
}

fn invalid(message: impl Into<String>) -> OrchestratorError {
    OrchestratorError::Validation(message.into())
}

/// Workspace ids become DNS labels (`workspace-{id}`, `{id}-deployment`), so
/// they follow the label rules.
pub fn validate_workspace_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(invalid("Workspace ID is required"));
    }
    if !is_match(&WORKSPACE_ID_RE, r"^[a-z0-9-]+$", id) {
        return Err(invalid(
            "Workspace ID must contain only lowercase letters, numbers, and hyphens",
        ));
    }
    if !(3..=63).contains(&id.len()) {
        return Err(invalid(
            "Workspace ID must be between 3 and 63 characters long",
        ));
    }
    if id.starts_with('-') || id.ends_with('-') {
        return Err(invalid("Workspace ID must not start or end with a hyphen"));
    }
    Ok(())
}

fn validate_token(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(invalid(format!("{field} is required")));
    }
    if value.len() > 63 || !is_match(&TOKEN_RE, r"^[A-Za-z0-9._+-]+$", value) {
        return Err(invalid(format!(
            "{field} must be at most 63 characters of letters, digits, '.', '_', '+' or '-'"
        )));
    }
    Ok(())
}

pub fn validate_resources(resources: &ResourceRequest) -> Result<()> {
    if let Some(cpu) = &resources.cpu {
        if !is_match(&CPU_RE, r"^\d+m$", cpu) {
            return Err(invalid(
                "CPU must be specified in millicores (e.g., \"500m\")",
            ));
        }
    }
    if let Some(memory) = &resources.memory {
        if !is_match(&MEMORY_RE, r"^\d+(Mi|Gi)$", memory) {
            return Err(invalid(
                "Memory must be specified in Mi or Gi (e.g., \"512Mi\" or \"2Gi\")",
            ));
        }
    }
    Ok(())
}

pub fn validate_create_request(req: &CreateWorkspaceRequest) -> Result<()> {
    validate_workspace_id(&req.workspace_id)?;
    validate_token("Template", &req.template)?;
    validate_token("Language", &req.language)?;

    // Libraries are joined with commas into a single env var and handed to a
    // package manager as a single argument.
    for library in &req.libraries {
        if library.is_empty()
            || library.starts_with('-')
            || library.contains(',')
            || library.chars().any(|c| c.is_control() || c.is_whitespace())
        {
            return Err(invalid(format!("Invalid library name: {library:?}")));
        }
    }
    if !req.libraries.is_empty() && PackageManager::for_language(&req.language).is_none() {
        return Err(invalid(format!(
            "Libraries are not supported for language: {}",
            req.language
        )));
    }

    if let Some(resources) = &req.resources {
        validate_resources(resources)?;
    }
    Ok(())
}
