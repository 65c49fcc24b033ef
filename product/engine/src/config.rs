use crate::paths::{self, AppPaths};
use crate::tools::Packaging;
use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Default debug mode for jobs that do not choose one explicitly.
    #[serde(default)]
    pub debug: bool,
    /// Root the vendored tools are resolved against.
    #[serde(default)]
    pub resources_dir: Option<String>,
    /// Overrides the build-profile guess of whether we run from a package.
    #[serde(default)]
    pub packaged: Option<bool>,
    #[serde(default)]
    pub default_output_dir: Option<String>,
}

impl EngineSettings {
    pub fn packaging(&self) -> Packaging {
        match self.packaged {
            Some(true) => Packaging::Packaged,
            Some(false) => Packaging::Dev,
            None if cfg!(debug_assertions) => Packaging::Dev,
            None => Packaging::Packaged,
        }
    }

    pub fn resources_dir(&self) -> PathBuf {
        self.resources_dir
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(paths::executable_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

pub fn load_settings(paths: &AppPaths) -> Result<EngineSettings> {
    let path = paths.settings_path();
    if !path.exists() {
        return Ok(EngineSettings::default());
    }
    let bytes = std::fs::read(&path)?;
    let parsed: EngineSettings = serde_json::from_slice(&bytes).map_err(|e| {
        EngineError::Config(format!(
            "failed to parse settings at {}: {e}",
            path.to_string_lossy()
        ))
    })?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_settings_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        let settings = load_settings(&paths).expect("load");
        assert_eq!(settings, EngineSettings::default());
        assert!(!settings.debug);
    }

    #[test]
    fn settings_file_is_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        std::fs::create_dir_all(paths.config_dir()).expect("config dir");
        std::fs::write(
            paths.settings_path(),
            r#"{"debug": true, "resources_dir": "/opt/audiofetch", "packaged": true}"#,
        )
        .expect("write");

        let settings = load_settings(&paths).expect("load");
        assert_eq!(
            settings,
            EngineSettings {
                debug: true,
                resources_dir: Some("/opt/audiofetch".to_string()),
                packaged: Some(true),
                default_output_dir: None,
            }
        );
    }

    #[test]
    fn malformed_settings_are_a_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        std::fs::create_dir_all(paths.config_dir()).expect("config dir");
        std::fs::write(paths.settings_path(), "{ not json").expect("write");

        let err = load_settings(&paths).expect_err("should fail");
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn explicit_packaging_overrides_build_profile() {
        let mut settings = EngineSettings::default();
        settings.packaged = Some(true);
        assert_eq!(settings.packaging(), Packaging::Packaged);
        settings.packaged = Some(false);
        assert_eq!(settings.packaging(), Packaging::Dev);
    }

    #[test]
    fn blank_resources_dir_falls_back() {
        let settings = EngineSettings {
            resources_dir: Some("   ".to_string()),
            ..EngineSettings::default()
        };
        assert_ne!(settings.resources_dir(), PathBuf::from("   "));
    }
}
