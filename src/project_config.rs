//! Project configuration files.
//!
//! A project file is JSON or TOML holding a partial configuration, with an
//! optional `settings` table for the orchestrator.

use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::model::PartialConfiguration;
use crate::orchestrator::OrchestratorSettings;
use crate::resolve::ConfigResolver;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProjectConfig {
    pub config: PartialConfiguration,
    pub settings: OrchestratorSettings,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(ConfigFormat::Json),
            Some("toml") => Ok(ConfigFormat::Toml),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Parses text into an untyped value regardless of format.
pub fn parse_raw(text: &str, format: ConfigFormat) -> Result<serde_json::Value, ConfigError> {
    match format {
        ConfigFormat::Json => Ok(serde_json::from_str(text)?),
        ConfigFormat::Toml => {
            let value: toml::Value = toml::from_str(text)?;
            Ok(serde_json::to_value(value)?)
        }
    }
}

/// Validates a raw value, then deserializes it. Validation warnings are kept on
/// the result; errors reject the whole file.
pub fn from_value(
    value: serde_json::Value,
    resolver: &ConfigResolver,
) -> Result<ProjectConfig, ConfigError> {
    let validation = resolver.validate_raw(&value);
    if !validation.valid {
        return Err(ConfigError::Invalid(validation.errors));
    }
    for warning in &validation.warnings {
        warn!(warning = %warning, "project configuration");
    }

    let settings = match value.get("settings") {
        Some(raw) => serde_json::from_value(raw.clone())?,
        None => OrchestratorSettings::default(),
    };
    let config: PartialConfiguration = serde_json::from_value(value)?;
    Ok(ProjectConfig {
        config,
        settings,
        warnings: validation.warnings,
    })
}

pub fn parse_str(
    text: &str,
    format: ConfigFormat,
    resolver: &ConfigResolver,
) -> Result<ProjectConfig, ConfigError> {
    from_value(parse_raw(text, format)?, resolver)
}

pub fn load(
    path: impl AsRef<Path>,
    resolver: &ConfigResolver,
) -> Result<ProjectConfig, ConfigError> {
    let path = path.as_ref();
    let format = ConfigFormat::from_path(path)?;
    let text = fs::read_to_string(path)?;
    debug!(path = %path.display(), "loading project configuration");
    parse_str(&text, format, resolver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheLimits;
    use crate::model::{SourceTypeMode, Target};
    use crate::registry::KnownModule;

    #[test]
    fn test_toml_project_file() {
        let text = r#"
            targetEnvironment = "es2019"
            sourceTypeMode = "module"
            modules = [
                "preset-typescript",
                { id = "preset-react", options = { runtime = "classic", pragma = "h" } },
            ]

            [perEnvironmentOverrides.legacy]
            targetEnvironment = "es5"

            [settings]
            chunkLines = 250
        "#;
        let project = parse_str(text, ConfigFormat::Toml, &ConfigResolver::default()).unwrap();
        assert_eq!(project.config.target_environment, Some(Target::Es2019));
        assert_eq!(project.config.source_type_mode, Some(SourceTypeMode::Module));
        let modules = project.config.modules.unwrap();
        assert_eq!(modules[1].id, KnownModule::PresetReact.into());
        assert_eq!(modules[1].options["pragma"], "h");
        assert_eq!(
            project.config.per_environment_overrides["legacy"].target_environment,
            Some(Target::Es5)
        );
        assert_eq!(project.settings.chunk_lines, 250);
        assert_eq!(
            project.settings.incremental_threshold_bytes,
            OrchestratorSettings::default().incremental_threshold_bytes
        );
    }

    #[test]
    fn test_partial_cache_settings_keep_defaults() {
        let project = parse_str(
            r#"{ "settings": { "cache": { "maxBytes": 1024 } } }"#,
            ConfigFormat::Json,
            &ConfigResolver::default(),
        )
        .unwrap();
        assert_eq!(project.settings.cache.max_bytes, 1024);
        assert_eq!(
            project.settings.cache.max_age_ms,
            CacheLimits::default().max_age_ms
        );
    }

    #[test]
    fn test_json_project_file_rejected_when_invalid() {
        let err = parse_str(
            r#"{ "modules": ["preset-react"], "sourceTypeMode": "esm" }"#,
            ConfigFormat::Json,
            &ConfigResolver::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref errors) if errors.len() == 1));
    }

    #[test]
    fn test_unknown_extension_rejected() {
        assert!(matches!(
            ConfigFormat::from_path(Path::new("transpile.yaml")),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }
}
