//! Transformation backends.
//!
//! The pipeline treats a backend as a black box: source text plus a resolved
//! configuration in, lowered text or a `BackendError` out. `OxcBackend` is the
//! in-process default built on the oxc parser, transformer and codegen.

use async_trait::async_trait;
use oxc_allocator::Allocator;
use oxc_codegen::Codegen;
use oxc_parser::Parser;
use oxc_semantic::SemanticBuilder;
use oxc_span::SourceType;
use oxc_transformer::{JsxRuntime, TransformOptions, Transformer};
use std::path::Path;
use tracing::debug;

use crate::error::BackendError;
use crate::model::{ModuleOptions, SourceTypeMode, Target, TransformConfiguration};
use crate::registry::{KnownModule, ModuleId, ModuleRegistry};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BackendOutput {
    pub lowered_text: String,
    pub warnings: Vec<String>,
}

impl BackendOutput {
    pub fn new(lowered_text: impl Into<String>) -> Self {
        Self {
            lowered_text: lowered_text.into(),
            warnings: Vec::new(),
        }
    }
}

#[async_trait]
pub trait TransformBackend: Send + Sync {
    fn name(&self) -> &str {
        "backend"
    }

    async fn invoke(
        &self,
        source: &str,
        config: &TransformConfiguration,
    ) -> Result<BackendOutput, BackendError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// OXC BACKEND
// ═══════════════════════════════════════════════════════════════════════════════

/// Modules the oxc pipeline has no equivalent for.
const UNSUPPORTED: [KnownModule; 2] = [KnownModule::PresetSolid, KnownModule::PluginFlowStripTypes];

fn edition_before(target: Target) -> Target {
    match target {
        Target::Es5 | Target::Es2015 => Target::Es5,
        Target::Es2016 => Target::Es2015,
        Target::Es2017 => Target::Es2016,
        Target::Es2018 => Target::Es2017,
        Target::Es2019 => Target::Es2018,
        Target::Es2020 => Target::Es2019,
        Target::Es2021 => Target::Es2020,
        Target::Es2022 => Target::Es2021,
        Target::EsNext => Target::Es2022,
    }
}

fn option_str<'a>(options: &'a ModuleOptions, key: &str) -> Option<&'a str> {
    options.get(key).and_then(|v| v.as_str())
}

pub struct OxcBackend {
    registry: ModuleRegistry,
}

impl OxcBackend {
    pub fn new() -> Self {
        Self {
            registry: ModuleRegistry::builtin(),
        }
    }

    /// The configured target, lowered further when an explicitly requested
    /// plugin handles a construct that target still supports natively.
    pub fn effective_target(&self, config: &TransformConfiguration) -> Target {
        config
            .modules
            .iter()
            .filter_map(|m| self.registry.get(&m.id).and_then(|d| d.introduced))
            .map(edition_before)
            .fold(config.target_environment, Target::min)
    }

    fn check_supported(&self, config: &TransformConfiguration) -> Result<(), BackendError> {
        for spec in &config.modules {
            let supported = match &spec.id {
                ModuleId::Known(m) => !UNSUPPORTED.contains(m),
                ModuleId::Custom(_) => false,
            };
            if !supported {
                return Err(BackendError::UnsupportedModule(spec.id.to_string()));
            }
        }
        Ok(())
    }

    fn source_type(&self, config: &TransformConfiguration) -> SourceType {
        let typed = config.has_module(&ModuleId::Known(KnownModule::PresetTypescript));
        let markup = config.modules.iter().any(|m| self.registry.is_markup(&m.id));
        SourceType::default()
            .with_typescript(typed)
            .with_jsx(markup)
            .with_module(config.source_type_mode != SourceTypeMode::Script)
    }

    fn options(
        &self,
        config: &TransformConfiguration,
        target: Target,
    ) -> Result<TransformOptions, BackendError> {
        let mut options = TransformOptions::from_target(target.as_str())
            .map_err(|e| BackendError::Transform(format!("invalid target {}: {}", target, e)))?;

        let markup = config.modules.iter().find(|m| self.registry.is_markup(&m.id));
        if let Some(spec) = markup {
            options.jsx.runtime = match option_str(&spec.options, "runtime") {
                Some("classic") => JsxRuntime::Classic,
                _ => JsxRuntime::Automatic,
            };
            if let Some(pragma) = option_str(&spec.options, "pragma") {
                options.jsx.pragma = Some(pragma.to_string());
            }
            if let Some(frag) = option_str(&spec.options, "pragmaFrag") {
                options.jsx.pragma_frag = Some(frag.to_string());
            }
            if let Some(dev) = spec.options.get("development").and_then(|v| v.as_bool()) {
                options.jsx.development = dev;
            }
        }
        Ok(options)
    }

    /// Synchronous lowering. The arena never outlives this call.
    pub fn lower(
        &self,
        source: &str,
        config: &TransformConfiguration,
    ) -> Result<BackendOutput, BackendError> {
        self.check_supported(config)?;

        let source_type = self.source_type(config);
        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, source, source_type).parse();
        if ret.panicked || !ret.errors.is_empty() {
            let message = ret
                .errors
                .first()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "parser aborted".to_string());
            return Err(BackendError::Parse {
                message,
                location: None,
            });
        }
        let mut program = ret.program;

        let target = self.effective_target(config);
        let options = self.options(config, target)?;
        let scoping = SemanticBuilder::new().build(&program).semantic.into_scoping();
        let transformed = Transformer::new(&allocator, Path::new("input.js"), &options)
            .build_with_scoping(scoping, &mut program);
        if let Some(first) = transformed.errors.first() {
            return Err(BackendError::Transform(first.to_string()));
        }

        let code = Codegen::new().build(&program).code;
        debug!(
            target = %target,
            input_bytes = source.len(),
            output_bytes = code.len(),
            "oxc lowering finished"
        );

        let mut output = BackendOutput::new(code);
        if target < config.target_environment {
            output.warnings.push(format!(
                "Lowered to {} to honour explicitly configured plugins",
                target
            ));
        }
        Ok(output)
    }
}

impl Default for OxcBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransformBackend for OxcBackend {
    fn name(&self) -> &str {
        "oxc"
    }

    async fn invoke(
        &self,
        source: &str,
        config: &TransformConfiguration,
    ) -> Result<BackendOutput, BackendError> {
        self.lower(source, config)
    }
}
