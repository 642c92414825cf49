//! Configuration Resolution
//!
//! Layers project configuration, detection-derived defaults and explicit
//! caller options into one canonical `TransformConfiguration`.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::collections::HashSet;
use tracing::debug;

use crate::model::{
    Detection, EnvironmentOverride, Language, ModuleOptions, ModuleSpec, PartialConfiguration,
    SourceTypeMode, Target, TransformConfiguration,
};
use crate::registry::{KnownModule, ModuleId, ModuleRegistry, Phase};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn from_parts(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

/// Appends `incoming` to `modules`, deduplicating by id. A duplicate keeps the
/// position of its first occurrence; its options are merged key by key with
/// the later value winning.
pub fn merge_modules(
    modules: &mut Vec<ModuleSpec>,
    incoming: impl IntoIterator<Item = ModuleSpec>,
) {
    for spec in incoming {
        match modules.iter_mut().find(|m| m.id == spec.id) {
            Some(existing) => {
                for (key, value) in spec.options {
                    existing.options.insert(key, value);
                }
            }
            None => modules.push(spec),
        }
    }
}

/// Default options a framework applies to its markup module.
fn framework_options(framework: &str) -> ModuleOptions {
    let value = match framework {
        "react" => json!({ "runtime": "automatic" }),
        "preact" => json!({ "runtime": "classic", "pragma": "h", "pragmaFrag": "Fragment" }),
        "solid" => json!({ "generate": "dom" }),
        _ => json!({}),
    };
    match value {
        serde_json::Value::Object(map) => map,
        _ => ModuleOptions::new(),
    }
}

pub struct ConfigResolver {
    registry: ModuleRegistry,
}

impl ConfigResolver {
    pub fn new(registry: ModuleRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ModuleRegistry {
        &mut self.registry
    }

    /// Stable sort into phase order.
    pub fn sort_by_phase(&self, modules: &mut [ModuleSpec]) {
        modules.sort_by_key(|m| self.registry.phase_of(&m.id));
    }

    /// Whether a lowering module is needed for `target`. Constructs that are
    /// never native always need their module; native ones only when the
    /// target predates the edition that introduced them.
    fn needs_module(&self, module: &ModuleId, supports_native: bool, target: Target) -> bool {
        if !supports_native {
            return true;
        }
        match self.registry.get(module).and_then(|d| d.introduced) {
            Some(introduced) => target < introduced,
            None => false,
        }
    }

    fn language_defaults(&self, detected: &Detection, target: Target) -> Vec<ModuleSpec> {
        let mut modules = Vec::new();
        let typed_language = matches!(
            detected.language.as_ref().map(|l| l.language),
            Some(Language::TypeScript) | Some(Language::Tsx)
        );
        if typed_language {
            modules.push(ModuleSpec::new(KnownModule::PresetTypescript));
        }
        for feature in &detected.features {
            let Some(module) = &feature.requires_module else {
                continue;
            };
            if self.needs_module(module, feature.supports_native, target) {
                let options = self
                    .registry
                    .get(module)
                    .map(|d| d.default_options.clone())
                    .unwrap_or_default();
                modules.push(ModuleSpec {
                    id: module.clone(),
                    options,
                });
            }
        }
        modules
    }

    fn framework_defaults(&self, detected: &Detection) -> Vec<ModuleSpec> {
        let has_markup = detected.has_feature(crate::detect::MARKUP_FEATURE);
        let Some(top) = detected.frameworks.first() else {
            return Vec::new();
        };
        if !has_markup {
            return Vec::new();
        }
        top.required_modules
            .iter()
            .map(|id| ModuleSpec {
                id: id.clone(),
                options: framework_options(&top.framework_name),
            })
            .collect()
    }

    /// Merge order: base, language defaults, framework defaults, explicit.
    /// Later layers win on scalars. The named environment override, if any,
    /// contributes its target and appends its modules last.
    pub fn resolve(
        &self,
        detected: &Detection,
        explicit: &PartialConfiguration,
        base: &PartialConfiguration,
    ) -> TransformConfiguration {
        let mut overrides: BTreeMap<String, EnvironmentOverride> =
            base.per_environment_overrides.clone();
        for (name, over) in &explicit.per_environment_overrides {
            overrides.insert(name.clone(), over.clone());
        }
        let environment = explicit.environment.as_ref().or(base.environment.as_ref());
        let active = environment.and_then(|name| overrides.get(name));

        let target = explicit
            .target_environment
            .or_else(|| active.and_then(|o| o.target_environment))
            .or(base.target_environment)
            .unwrap_or_default();

        let module_syntax =
            detected.has_feature("es-modules") || detected.has_feature("top-level-await");
        let detected_mode = if module_syntax {
            SourceTypeMode::Module
        } else {
            SourceTypeMode::Auto
        };
        let source_type_mode = explicit
            .source_type_mode
            .or_else(|| active.and_then(|o| o.source_type_mode))
            .or(base.source_type_mode)
            .unwrap_or(detected_mode);

        let mut modules = Vec::new();
        merge_modules(&mut modules, base.modules.clone().unwrap_or_default());
        merge_modules(&mut modules, self.language_defaults(detected, target));
        merge_modules(&mut modules, self.framework_defaults(detected));
        merge_modules(&mut modules, explicit.modules.clone().unwrap_or_default());
        if let Some(over) = active {
            merge_modules(&mut modules, over.modules.clone());
        }
        self.sort_by_phase(&mut modules);

        debug!(
            modules = modules.len(),
            target = %target,
            environment = environment.map(String::as_str).unwrap_or("-"),
            "configuration resolved"
        );

        TransformConfiguration {
            modules,
            target_environment: target,
            source_type_mode,
            per_environment_overrides: overrides,
        }
    }

    /// Checks a typed configuration. Never fails.
    pub fn validate(&self, config: &TransformConfiguration) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut seen = HashSet::new();
        let mut last_phase = Phase::Types;
        let mut markup_modules = Vec::new();

        for spec in &config.modules {
            if !self.registry.is_registered(&spec.id) {
                warnings.push(format!("Unregistered module '{}'", spec.id));
            }
            if !seen.insert(spec.id.clone()) {
                warnings.push(format!("Module '{}' is listed more than once", spec.id));
            }
            let phase = self.registry.phase_of(&spec.id);
            if phase < last_phase {
                errors.push(format!(
                    "Module '{}' ({:?} phase) is ordered after a {:?} phase module",
                    spec.id, phase, last_phase
                ));
            }
            last_phase = last_phase.max(phase);
            if self.registry.is_markup(&spec.id) {
                markup_modules.push(spec.id.to_string());
            }
        }
        if markup_modules.len() > 1 {
            warnings.push(format!(
                "Multiple markup modules configured: {}",
                markup_modules.join(", ")
            ));
        }
        for name in config.per_environment_overrides.keys() {
            if name.trim().is_empty() {
                errors.push("Environment override with an empty name".to_string());
            }
        }

        ValidationResult::from_parts(errors, warnings)
    }

    /// Checks an untyped configuration value before deserialization.
    pub fn validate_raw(&self, value: &serde_json::Value) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let Some(object) = value.as_object() else {
            return ValidationResult::from_parts(
                vec!["Configuration must be an object".to_string()],
                warnings,
            );
        };

        if let Some(modules) = object.get("modules") {
            match modules.as_array() {
                Some(entries) => {
                    for (index, entry) in entries.iter().enumerate() {
                        match raw_module_id(entry) {
                            Some(id) => {
                                if !self.registry.is_registered(&ModuleId::from(id)) {
                                    warnings.push(format!("Unregistered module '{}'", id));
                                }
                            }
                            None => errors.push(format!("Module entry {} has no id", index)),
                        }
                    }
                }
                None => errors.push("'modules' must be an array".to_string()),
            }
        }

        if let Some(mode) = object.get("sourceTypeMode") {
            let ok = mode
                .as_str()
                .map(|m| SourceTypeMode::ALLOWED.contains(&m))
                .unwrap_or(false);
            if !ok {
                errors.push(format!(
                    "'sourceTypeMode' must be one of {}",
                    SourceTypeMode::ALLOWED.join(", ")
                ));
            }
        }

        if let Some(target) = object.get("targetEnvironment") {
            if serde_json::from_value::<Target>(target.clone()).is_err() {
                errors.push(format!("Unknown target environment {}", target));
            }
        }

        if let Some(overrides) = object.get("perEnvironmentOverrides") {
            if !overrides.is_object() {
                errors.push("'perEnvironmentOverrides' must be an object".to_string());
            }
        }

        ValidationResult::from_parts(errors, warnings)
    }
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new(ModuleRegistry::builtin())
    }
}

fn raw_module_id(entry: &serde_json::Value) -> Option<&str> {
    let id = match entry {
        serde_json::Value::String(id) => Some(id.as_str()),
        serde_json::Value::Array(pair) => pair.first().and_then(|v| v.as_str()),
        serde_json::Value::Object(map) => map.get("id").and_then(|v| v.as_str()),
        _ => None,
    }?;
    if id.trim().is_empty() {
        None
    } else {
        Some(id)
    }
}
