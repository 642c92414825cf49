//! Module Registry
//!
//! Closed set of lowering modules the pipeline knows how to order and request,
//! plus the descriptor table the resolver consults for phase, kind and the
//! edition a module's construct was introduced in.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::model::Target;

// ═══════════════════════════════════════════════════════════════════════════════
// MODULE IDS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KnownModule {
    PresetTypescript,
    PluginFlowStripTypes,
    PresetReact,
    PresetSolid,
    PluginVueJsx,
    PluginDecorators,
    PluginClassProperties,
    PluginPrivateMethods,
    PluginClassStaticBlock,
    PluginOptionalChaining,
    PluginNullishCoalescing,
    PluginLogicalAssignment,
    PluginNumericSeparator,
    PluginExponentiationOperator,
    PluginObjectRestSpread,
    PluginAsyncGenerators,
    PluginAsyncToGenerator,
    PluginDynamicImport,
    PluginTemplateLiterals,
    PluginArrowFunctions,
    PluginBlockScoping,
    PluginClasses,
    PresetEnv,
    PluginTransformRuntime,
}

impl KnownModule {
    pub const ALL: [KnownModule; 24] = [
        KnownModule::PresetTypescript,
        KnownModule::PluginFlowStripTypes,
        KnownModule::PresetReact,
        KnownModule::PresetSolid,
        KnownModule::PluginVueJsx,
        KnownModule::PluginDecorators,
        KnownModule::PluginClassProperties,
        KnownModule::PluginPrivateMethods,
        KnownModule::PluginClassStaticBlock,
        KnownModule::PluginOptionalChaining,
        KnownModule::PluginNullishCoalescing,
        KnownModule::PluginLogicalAssignment,
        KnownModule::PluginNumericSeparator,
        KnownModule::PluginExponentiationOperator,
        KnownModule::PluginObjectRestSpread,
        KnownModule::PluginAsyncGenerators,
        KnownModule::PluginAsyncToGenerator,
        KnownModule::PluginDynamicImport,
        KnownModule::PluginTemplateLiterals,
        KnownModule::PluginArrowFunctions,
        KnownModule::PluginBlockScoping,
        KnownModule::PluginClasses,
        KnownModule::PresetEnv,
        KnownModule::PluginTransformRuntime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KnownModule::PresetTypescript => "preset-typescript",
            KnownModule::PluginFlowStripTypes => "plugin-flow-strip-types",
            KnownModule::PresetReact => "preset-react",
            KnownModule::PresetSolid => "preset-solid",
            KnownModule::PluginVueJsx => "plugin-vue-jsx",
            KnownModule::PluginDecorators => "plugin-decorators",
            KnownModule::PluginClassProperties => "plugin-class-properties",
            KnownModule::PluginPrivateMethods => "plugin-private-methods",
            KnownModule::PluginClassStaticBlock => "plugin-class-static-block",
            KnownModule::PluginOptionalChaining => "plugin-optional-chaining",
            KnownModule::PluginNullishCoalescing => "plugin-nullish-coalescing",
            KnownModule::PluginLogicalAssignment => "plugin-logical-assignment",
            KnownModule::PluginNumericSeparator => "plugin-numeric-separator",
            KnownModule::PluginExponentiationOperator => "plugin-exponentiation-operator",
            KnownModule::PluginObjectRestSpread => "plugin-object-rest-spread",
            KnownModule::PluginAsyncGenerators => "plugin-async-generators",
            KnownModule::PluginAsyncToGenerator => "plugin-async-to-generator",
            KnownModule::PluginDynamicImport => "plugin-dynamic-import",
            KnownModule::PluginTemplateLiterals => "plugin-template-literals",
            KnownModule::PluginArrowFunctions => "plugin-arrow-functions",
            KnownModule::PluginBlockScoping => "plugin-block-scoping",
            KnownModule::PluginClasses => "plugin-classes",
            KnownModule::PresetEnv => "preset-env",
            KnownModule::PluginTransformRuntime => "plugin-transform-runtime",
        }
    }

    pub fn from_name(name: &str) -> Option<KnownModule> {
        let bare = strip_scope(name);
        KnownModule::ALL.iter().copied().find(|m| m.as_str() == bare)
    }
}

/// Accepts scoped package spellings (`@scope/preset-react`) and the long
/// `transform-` plugin spelling (`plugin-transform-optional-chaining`).
fn strip_scope(name: &str) -> String {
    let name = name.trim();
    let bare = match name.rsplit_once('/') {
        Some((scope, rest)) if scope.starts_with('@') => rest,
        _ => name,
    };
    if let Some(rest) = bare.strip_prefix("plugin-transform-") {
        let candidate = format!("plugin-{}", rest);
        if KnownModule::ALL.iter().any(|m| m.as_str() == candidate) {
            return candidate;
        }
    }
    bare.to_string()
}

/// Identifier of a lowering module. Unknown names are carried verbatim so a
/// configuration can still reference modules this registry has never seen;
/// the resolver flags them with a validation warning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ModuleId {
    Known(KnownModule),
    Custom(String),
}

impl ModuleId {
    pub fn as_str(&self) -> &str {
        match self {
            ModuleId::Known(m) => m.as_str(),
            ModuleId::Custom(name) => name.as_str(),
        }
    }

    pub fn known(&self) -> Option<KnownModule> {
        match self {
            ModuleId::Known(m) => Some(*m),
            ModuleId::Custom(_) => None,
        }
    }

    /// Naming convention shared with the host: `preset-*` ids bundle several
    /// lowerings, everything else is a single plugin.
    pub fn dependency_kind(&self) -> DependencyKind {
        let name = self.as_str();
        let bare = name.rsplit('/').next().unwrap_or(name);
        if bare.starts_with("preset-") || bare.starts_with("preset_") {
            DependencyKind::Preset
        } else {
            DependencyKind::Plugin
        }
    }
}

impl From<KnownModule> for ModuleId {
    fn from(m: KnownModule) -> Self {
        ModuleId::Known(m)
    }
}

impl From<String> for ModuleId {
    fn from(name: String) -> Self {
        match KnownModule::from_name(&name) {
            Some(m) => ModuleId::Known(m),
            None => ModuleId::Custom(name),
        }
    }
}

impl From<&str> for ModuleId {
    fn from(name: &str) -> Self {
        ModuleId::from(name.to_string())
    }
}

impl From<ModuleId> for String {
    fn from(id: ModuleId) -> Self {
        id.as_str().to_string()
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Preset,
    Plugin,
}

/// Application phase. Lower phases run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Types = 0,
    Syntax = 1,
    Environment = 2,
}

// ═══════════════════════════════════════════════════════════════════════════════
// DESCRIPTORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDescriptor {
    pub id: ModuleId,
    pub phase: Phase,
    /// Edition that made the lowered construct native. `None` means the
    /// construct is never native (types, markup) or is target-independent.
    pub introduced: Option<Target>,
    pub markup: bool,
    pub description: String,
    pub default_options: serde_json::Map<String, serde_json::Value>,
}

fn descriptor(
    module: KnownModule,
    phase: Phase,
    introduced: Option<Target>,
    description: &str,
) -> ModuleDescriptor {
    ModuleDescriptor {
        id: ModuleId::Known(module),
        phase,
        introduced,
        markup: matches!(
            module,
            KnownModule::PresetReact | KnownModule::PresetSolid | KnownModule::PluginVueJsx
        ),
        description: description.to_string(),
        default_options: serde_json::Map::new(),
    }
}

lazy_static! {
    static ref BUILTIN_DESCRIPTORS: Vec<ModuleDescriptor> = {
        use KnownModule::*;
        use Phase::*;
        vec![
            descriptor(PresetTypescript, Types, None, "Strip static type syntax"),
            descriptor(PluginFlowStripTypes, Types, None, "Strip Flow annotations"),
            descriptor(PresetReact, Syntax, None, "Lower JSX markup to element factory calls"),
            descriptor(PresetSolid, Syntax, None, "Compile JSX markup to fine-grained DOM updates"),
            descriptor(PluginVueJsx, Syntax, None, "Lower JSX markup to Vue render functions"),
            descriptor(PluginDecorators, Syntax, None, "Lower class and member decorators"),
            descriptor(PluginClassProperties, Syntax, Some(Target::Es2022), "Lower class fields"),
            descriptor(PluginPrivateMethods, Syntax, Some(Target::Es2022), "Lower #private members"),
            descriptor(PluginClassStaticBlock, Syntax, Some(Target::Es2022), "Lower static initialization blocks"),
            descriptor(PluginOptionalChaining, Syntax, Some(Target::Es2020), "Lower optional member access and calls"),
            descriptor(PluginNullishCoalescing, Syntax, Some(Target::Es2020), "Lower the ?? operator"),
            descriptor(PluginLogicalAssignment, Syntax, Some(Target::Es2021), "Lower &&=, ||= and ??="),
            descriptor(PluginNumericSeparator, Syntax, Some(Target::Es2021), "Remove numeric separators"),
            descriptor(PluginExponentiationOperator, Syntax, Some(Target::Es2016), "Lower ** to Math.pow"),
            descriptor(PluginObjectRestSpread, Syntax, Some(Target::Es2018), "Lower object rest and spread"),
            descriptor(PluginAsyncGenerators, Syntax, Some(Target::Es2018), "Lower async generators and for-await"),
            descriptor(PluginAsyncToGenerator, Syntax, Some(Target::Es2017), "Lower async functions to generators"),
            descriptor(PluginDynamicImport, Syntax, Some(Target::Es2020), "Lower dynamic import()"),
            descriptor(PluginTemplateLiterals, Syntax, Some(Target::Es2015), "Lower template literals"),
            descriptor(PluginArrowFunctions, Syntax, Some(Target::Es2015), "Lower arrow functions"),
            descriptor(PluginBlockScoping, Syntax, Some(Target::Es2015), "Lower let/const to var"),
            descriptor(PluginClasses, Syntax, Some(Target::Es2015), "Lower class declarations"),
            descriptor(PresetEnv, Environment, None, "Target a runtime environment"),
            descriptor(PluginTransformRuntime, Environment, None, "Share runtime helpers"),
        ]
    };
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

/// Descriptor lookup by module id. The built-in table is process-wide and
/// read-only; each session clones it and may register custom modules.
#[derive(Debug, Clone)]
pub struct ModuleRegistry {
    descriptors: HashMap<ModuleId, ModuleDescriptor>,
}

impl ModuleRegistry {
    pub fn builtin() -> Self {
        let descriptors = BUILTIN_DESCRIPTORS
            .iter()
            .map(|d| (d.id.clone(), d.clone()))
            .collect();
        Self { descriptors }
    }

    pub fn register(&mut self, descriptor: ModuleDescriptor) {
        self.descriptors.insert(descriptor.id.clone(), descriptor);
    }

    pub fn get(&self, id: &ModuleId) -> Option<&ModuleDescriptor> {
        self.descriptors.get(id)
    }

    pub fn is_registered(&self, id: &ModuleId) -> bool {
        self.descriptors.contains_key(id)
    }

    /// Unregistered modules are ordered with the syntax lowerings.
    pub fn phase_of(&self, id: &ModuleId) -> Phase {
        self.get(id).map(|d| d.phase).unwrap_or(Phase::Syntax)
    }

    pub fn is_markup(&self, id: &ModuleId) -> bool {
        self.get(id).map(|d| d.markup).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_names_round_trip_through_strings() {
        for m in KnownModule::ALL {
            assert_eq!(ModuleId::from(m.as_str()), ModuleId::Known(m));
        }
        assert_eq!(
            ModuleId::from("my-private-plugin"),
            ModuleId::Custom("my-private-plugin".to_string())
        );
    }

    #[test]
    fn test_scoped_and_long_names_resolve() {
        assert_eq!(
            ModuleId::from("@babel/preset-react"),
            ModuleId::Known(KnownModule::PresetReact)
        );
        assert_eq!(
            ModuleId::from("@babel/plugin-transform-optional-chaining"),
            ModuleId::Known(KnownModule::PluginOptionalChaining)
        );
    }

    #[test]
    fn test_dependency_kind_follows_naming() {
        assert_eq!(
            ModuleId::from("preset-typescript").dependency_kind(),
            DependencyKind::Preset
        );
        assert_eq!(
            ModuleId::from("plugin-decorators").dependency_kind(),
            DependencyKind::Plugin
        );
        assert_eq!(
            ModuleId::from("@acme/preset-widgets").dependency_kind(),
            DependencyKind::Preset
        );
    }

    #[test]
    fn test_every_known_module_is_registered() {
        let registry = ModuleRegistry::builtin();
        assert_eq!(registry.len(), KnownModule::ALL.len());
        assert_eq!(
            registry.phase_of(&KnownModule::PresetTypescript.into()),
            Phase::Types
        );
        assert_eq!(
            registry.phase_of(&KnownModule::PresetEnv.into()),
            Phase::Environment
        );
        assert_eq!(registry.phase_of(&ModuleId::from("unknown")), Phase::Syntax);
    }
}
