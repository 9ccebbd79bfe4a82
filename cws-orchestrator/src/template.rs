//! First-boot seeding of a workspace volume.
//!
//! The deployment runs an init container from the workspace image that copies
//! the template tree onto the claim, records the language toolchain, installs
//! the requested libraries and commits the result to a fresh git repository.
//! A marker file makes later pod starts (stop/start, restart) skip all of it.

/// File left on the volume once seeding has completed.
pub const SEED_MARKER: &str = ".cloudcode-initialized";

/// Toolchain metadata written at the workspace root.
pub const LANGUAGE_CONFIG_FILE: &str = "language.config.json";

/// Installer used for a language's libraries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Npm,
    Pip,
    Maven,
}

impl PackageManager {
    pub fn for_language(language: &str) -> Option<Self> {
        match language {
            "typescript" | "javascript" => Some(Self::Npm),
            "python" => Some(Self::Pip),
            "java" => Some(Self::Maven),
            _ => None,
        }
    }

    /// Shell command installing the library named by `$lib`.
    pub fn install_command(self) -> &'static str {
        match self {
            Self::Npm => r#"npm install "$lib""#,
            Self::Pip => r#"pip install "$lib""#,
            Self::Maven => r#"mvn dependency:get -Dartifact="$lib""#,
        }
    }
}

fn version_command(language: &str) -> Option<&'static str> {
    match language {
        "typescript" => Some("tsc --version"),
        "javascript" => Some("node --version"),
        "python" => Some("python --version"),
        "java" => Some("java --version"),
        _ => None,
    }
}

/// `sh -c` script run by the init container.
///
/// Template, language, library list, workspace directory and template root
/// come from the container environment (`TEMPLATE`, `LANGUAGE`, `LIBRARIES`,
/// `WORKSPACE_DIR`, `TEMPLATES_PATH`), so request values never become script
/// text.
pub fn seed_script(language: &str) -> String {
    let version = version_command(language)
        .map(|cmd| format!("version=\"$({cmd} 2>/dev/null | head -n 1 || true)\""))
        .unwrap_or_else(|| "version=".to_string());

    let mut script = format!(
        r#"set -eu
set -f
cd "$WORKSPACE_DIR"
[ -f {SEED_MARKER} ] && exit 0
if [ -d "$TEMPLATES_PATH/$TEMPLATE" ]; then
  cp -R "$TEMPLATES_PATH/$TEMPLATE/." .
fi
{version}
[ -n "$version" ] || version=unknown
printf '{{\n  "language": "%s",\n  "version": "%s",\n  "timestamp": "%s"\n}}\n' \
  "$LANGUAGE" "$version" "$(date -u +%Y-%m-%dT%H:%M:%SZ)" > {LANGUAGE_CONFIG_FILE}
"#
    );

    if let Some(manager) = PackageManager::for_language(language) {
        script.push_str(&format!(
            "for lib in $(printf '%s' \"$LIBRARIES\" | tr ',' ' '); do\n  {}\ndone\n",
            manager.install_command()
        ));
    }

    script.push_str(&format!(
        r#"if command -v git >/dev/null 2>&1; then
  (git init -q && git add . \
    && git -c user.name=cloudcode -c user.email=cloudcode@localhost commit -q -m "Initial commit") \
    || echo "git initialization failed" >&2
fi
touch {SEED_MARKER}
"#
    ));
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn languages_map_to_their_package_manager() {
        assert_eq!(PackageManager::for_language("typescript"), Some(PackageManager::Npm));
        assert_eq!(PackageManager::for_language("javascript"), Some(PackageManager::Npm));
        assert_eq!(PackageManager::for_language("python"), Some(PackageManager::Pip));
        assert_eq!(PackageManager::for_language("java"), Some(PackageManager::Maven));
        assert_eq!(PackageManager::for_language("cobol"), None);
    }

    #[test]
    fn script_installs_with_the_language_package_manager() {
        let script = seed_script("python");
        assert!(script.contains(r#"pip install "$lib""#));
        assert!(script.contains("python --version"));
        assert!(!script.contains("npm install"));
    }

    #[test]
    fn script_seeds_once_and_commits() {
        let script = seed_script("javascript");
        let marker_check = script.find("[ -f .cloudcode-initialized ] && exit 0").unwrap();
        let copy = script.find(r#"cp -R "$TEMPLATES_PATH/$TEMPLATE/." ."#).unwrap();
        let commit = script.find(r#"commit -q -m "Initial commit""#).unwrap();
        let marker_write = script.rfind("touch .cloudcode-initialized").unwrap();
        assert!(marker_check < copy && copy < commit && commit < marker_write);
        assert!(script.contains("> language.config.json"));
    }

    #[test]
    fn unknown_language_skips_installs_and_records_unknown_version() {
        let script = seed_script("cobol");
        assert!(!script.contains("for lib in"));
        assert!(script.contains("version=\n"));
        assert!(script.contains("version=unknown"));
    }
}
