use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::registry::{DependencyKind, ModuleId};

pub type ModuleOptions = serde_json::Map<String, serde_json::Value>;

// ═══════════════════════════════════════════════════════════════════════════════
// TARGETS & SOURCE TYPE
// ═══════════════════════════════════════════════════════════════════════════════

/// Language edition the lowered output must run on. Ordered oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Es5,
    Es2015,
    Es2016,
    Es2017,
    Es2018,
    Es2019,
    Es2020,
    Es2021,
    Es2022,
    EsNext,
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Es5 => "es5",
            Target::Es2015 => "es2015",
            Target::Es2016 => "es2016",
            Target::Es2017 => "es2017",
            Target::Es2018 => "es2018",
            Target::Es2019 => "es2019",
            Target::Es2020 => "es2020",
            Target::Es2021 => "es2021",
            Target::Es2022 => "es2022",
            Target::EsNext => "esnext",
        }
    }
}

impl Default for Target {
    fn default() -> Self {
        Target::Es2015
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceTypeMode {
    Module,
    Script,
    #[default]
    Auto,
}

impl SourceTypeMode {
    pub const ALLOWED: [&'static str; 3] = ["module", "script", "auto"];
}

// ═══════════════════════════════════════════════════════════════════════════════
// MODULE SPECS & CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ModuleSpecRepr")]
pub struct ModuleSpec {
    pub id: ModuleId,
    #[serde(default)]
    pub options: ModuleOptions,
}

impl ModuleSpec {
    pub fn new(id: impl Into<ModuleId>) -> Self {
        Self {
            id: id.into(),
            options: ModuleOptions::new(),
        }
    }

    pub fn with_option(mut self, key: &str, value: serde_json::Value) -> Self {
        self.options.insert(key.to_string(), value);
        self
    }
}

/// Accepted spellings of a module entry: `"id"`, `["id", {options}]`, and
/// `{ "id": "...", "options": {...} }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ModuleSpecRepr {
    Name(String),
    Pair(String, ModuleOptions),
    Full {
        id: String,
        #[serde(default)]
        options: ModuleOptions,
    },
}

impl From<ModuleSpecRepr> for ModuleSpec {
    fn from(repr: ModuleSpecRepr) -> Self {
        match repr {
            ModuleSpecRepr::Name(id) => ModuleSpec::new(id),
            ModuleSpecRepr::Pair(id, options) | ModuleSpecRepr::Full { id, options } => {
                ModuleSpec {
                    id: id.into(),
                    options,
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvironmentOverride {
    pub modules: Vec<ModuleSpec>,
    pub target_environment: Option<Target>,
    pub source_type_mode: Option<SourceTypeMode>,
}

/// The canonical, fully resolved configuration handed to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TransformConfiguration {
    pub modules: Vec<ModuleSpec>,
    pub target_environment: Target,
    pub source_type_mode: SourceTypeMode,
    #[serde(default)]
    pub per_environment_overrides: BTreeMap<String, EnvironmentOverride>,
}

impl TransformConfiguration {
    pub fn has_module(&self, id: &ModuleId) -> bool {
        self.modules.iter().any(|m| &m.id == id)
    }

    pub fn module(&self, id: &ModuleId) -> Option<&ModuleSpec> {
        self.modules.iter().find(|m| &m.id == id)
    }

    pub fn module_names(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.id.to_string()).collect()
    }

    /// Stable serialization with sorted object keys; two configurations that
    /// differ only in field or option order produce the same string.
    pub fn canonical_json(&self) -> String {
        match serde_json::to_value(self) {
            Ok(value) => canonicalize(value).to_string(),
            Err(_) => format!("{:?}", self),
        }
    }
}

/// A configuration layer where every scalar is optional. Base project
/// configuration and explicit caller options both take this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PartialConfiguration {
    pub modules: Option<Vec<ModuleSpec>>,
    pub target_environment: Option<Target>,
    pub source_type_mode: Option<SourceTypeMode>,
    pub per_environment_overrides: BTreeMap<String, EnvironmentOverride>,
    /// Name of the per-environment override to apply, if any.
    pub environment: Option<String>,
}

impl PartialConfiguration {
    pub fn is_fully_explicit(&self) -> bool {
        self.modules.is_some()
            && self.target_environment.is_some()
            && self.source_type_mode.is_some()
    }
}

pub fn canonicalize(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<(String, serde_json::Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = serde_json::Map::new();
            for (k, v) in entries {
                sorted.insert(k, canonicalize(v));
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(canonicalize).collect())
        }
        other => other,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DETECTION TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
    Syntax,
    Api,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageFeature {
    pub name: String,
    pub kind: FeatureKind,
    pub supports_native: bool,
    pub requires_module: Option<ModuleId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameworkSignal {
    pub framework_name: String,
    pub confidence: f64,
    pub required_modules: Vec<ModuleId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    JavaScript,
    Jsx,
    TypeScript,
    Tsx,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::JavaScript => "javascript",
            Language::Jsx => "jsx",
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageDetection {
    pub language: Language,
    pub confidence: f64,
    pub requires_transpilation: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionPath {
    Ast,
    Regex,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub features: Vec<LanguageFeature>,
    pub frameworks: Vec<FrameworkSignal>,
    pub language: Option<LanguageDetection>,
    pub path: DetectionPath,
}

impl Detection {
    pub fn empty() -> Self {
        Self {
            features: Vec::new(),
            frameworks: Vec::new(),
            language: None,
            path: DetectionPath::Skipped,
        }
    }

    pub fn has_feature(&self, name: &str) -> bool {
        self.features.iter().any(|f| f.name == name)
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.features.iter().map(|f| f.name.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyInfo {
    pub module: ModuleId,
    pub kind: DependencyKind,
    /// Features that asked for this module, in detection order.
    pub features: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSFORM INPUT / OUTPUT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TransformOptions {
    #[serde(flatten)]
    pub config: PartialConfiguration,
    pub filename: Option<String>,
    /// Logical file identity; enables incremental compilation for large inputs.
    pub file_key: Option<String>,
    /// Only honoured together with a fully explicit configuration.
    pub skip_detection: bool,
    pub bypass_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalSummary {
    pub changed_chunks: usize,
    pub total_chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TransformMetadata {
    pub applied_modules: Vec<String>,
    pub warnings: Vec<String>,
    pub features: Vec<String>,
    pub frameworks: Vec<String>,
    pub recovered: bool,
    pub incremental: Option<IncrementalSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceInfo {
    pub transform_time_ms: f64,
    pub cache_hit: bool,
    pub memory_usage_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformResult {
    pub lowered_text: String,
    pub metadata: TransformMetadata,
    pub performance: PerformanceInfo,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::KnownModule;
    use serde_json::json;

    #[test]
    fn test_module_spec_accepts_all_spellings() {
        let specs: Vec<ModuleSpec> = serde_json::from_value(json!([
            "preset-typescript",
            ["preset-react", { "runtime": "automatic" }],
            { "id": "plugin-decorators", "options": { "version": "2023-05" } }
        ]))
        .unwrap();

        assert_eq!(specs[0].id, KnownModule::PresetTypescript.into());
        assert!(specs[0].options.is_empty());
        assert_eq!(specs[1].id, KnownModule::PresetReact.into());
        assert_eq!(specs[1].options["runtime"], "automatic");
        assert_eq!(specs[2].options["version"], "2023-05");
    }

    #[test]
    fn test_canonical_json_ignores_option_order() {
        let mut a = TransformConfiguration::default();
        a.modules.push(
            ModuleSpec::new(KnownModule::PresetReact)
                .with_option("runtime", json!("classic"))
                .with_option("pragma", json!("h")),
        );
        let mut b = TransformConfiguration::default();
        b.modules.push(
            ModuleSpec::new(KnownModule::PresetReact)
                .with_option("pragma", json!("h"))
                .with_option("runtime", json!("classic")),
        );
        assert_eq!(a.canonical_json(), b.canonical_json());
    }

    #[test]
    fn test_targets_are_ordered_by_edition() {
        assert!(Target::Es5 < Target::Es2015);
        assert!(Target::Es2020 < Target::EsNext);
        let t: Target = serde_json::from_value(json!("es2019")).unwrap();
        assert_eq!(t, Target::Es2019);
    }

    #[test]
    fn test_transform_options_flatten_config() {
        let opts: TransformOptions = serde_json::from_value(json!({
            "filename": "App.tsx",
            "fileKey": "src/App.tsx",
            "targetEnvironment": "es2017",
            "modules": ["preset-env"]
        }))
        .unwrap();
        assert_eq!(opts.filename.as_deref(), Some("App.tsx"));
        assert_eq!(opts.config.target_environment, Some(Target::Es2017));
        assert_eq!(opts.config.modules.as_ref().map(|m| m.len()), Some(1));
    }
}
