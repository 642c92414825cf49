//! Error classification, suggestion generation and recovery.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::detect::MARKUP_FEATURE;
use crate::error::{
    BackendError, DetailedError, ErrorKind, ErrorStage, Priority, SourceLocation, Suggestion,
    SuggestionAction, SuggestionKind,
};
use crate::model::{Detection, ModuleSpec, TransformConfiguration};
use crate::registry::{KnownModule, ModuleId, ModuleRegistry};
use crate::rewrite::apply_rules;

lazy_static! {
    static ref DEPENDENCY_RE: Regex = Regex::new(
        r"(?i)cannot find (?:module|package)|module not found|could not resolve|failed to resolve|unknown (?:preset|plugin)|is not installed|unsupported module"
    )
    .unwrap();
    static ref CONFIGURATION_RE: Regex = Regex::new(
        r"(?i)unknown option|invalid option|invalid configuration|unrecognized option|option .* (?:is|are) not (?:valid|allowed|supported)"
    )
    .unwrap();
    static ref SYNTAX_RE: Regex = Regex::new(
        r"(?i)unexpected token|syntax ?error|unterminated|expected .+ but found|missing semicolon|parse error|invalid or unexpected"
    )
    .unwrap();
    static ref MISSING_PACKAGE_RE: Regex = Regex::new(
        r#"(?i)(?:cannot find (?:module|package)|module not found:?|could not resolve|failed to resolve|unsupported module:?|unknown (?:preset|plugin))\s*['"`]?([@\w./-]+)"#
    )
    .unwrap();
    static ref OUT_OF_MEMORY_RE: Regex = Regex::new(
        r"(?i)out of memory|heap (?:limit|out)|allocation failed|maximum call stack"
    )
    .unwrap();
    static ref MARKUP_MESSAGE_RE: Regex = Regex::new(r"(?i)jsx|unexpected token '?<").unwrap();
    static ref TYPED_MESSAGE_RE: Regex = Regex::new(
        r"(?i)type annotation|typescript|unexpected token '?:|\binterface\b|\benum\b"
    )
    .unwrap();
    static ref LOCATION_RE: Regex = Regex::new(
        r"(?i)\((\d+):(\d+)\)|line (\d+),? col(?:umn)? (\d+)"
    )
    .unwrap();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoApplyResult {
    pub updated_config: TransformConfiguration,
    pub applied_suggestions: Vec<Suggestion>,
}

fn add_module(
    kind: SuggestionKind,
    module: impl Into<ModuleId>,
    description: &str,
    priority: Priority,
) -> Suggestion {
    Suggestion {
        kind,
        description: description.to_string(),
        action: SuggestionAction::AddModule {
            module: module.into(),
        },
        auto_applicable: true,
        priority,
    }
}

pub fn parse_location(message: &str) -> Option<SourceLocation> {
    let caps = LOCATION_RE.captures(message)?;
    let line = caps.get(1).or_else(|| caps.get(3))?.as_str().parse().ok()?;
    let column = caps.get(2).or_else(|| caps.get(4))?.as_str().parse().ok()?;
    Some(SourceLocation { line, column })
}

pub struct ErrorEngine {
    registry: ModuleRegistry,
}

impl ErrorEngine {
    pub fn new(registry: ModuleRegistry) -> Self {
        Self { registry }
    }

    pub fn registry_mut(&mut self) -> &mut ModuleRegistry {
        &mut self.registry
    }

    pub fn classify(&self, error: &BackendError, config: &TransformConfiguration) -> ErrorKind {
        match error {
            BackendError::Parse { .. } => return ErrorKind::Syntax,
            BackendError::UnsupportedModule(_) => return ErrorKind::Dependency,
            BackendError::Timeout(_) => return ErrorKind::Runtime,
            BackendError::Transform(_) | BackendError::Other(_) => {}
        }
        let message = error.to_string();
        if DEPENDENCY_RE.is_match(&message) {
            ErrorKind::Dependency
        } else if CONFIGURATION_RE.is_match(&message) {
            ErrorKind::Configuration
        } else if SYNTAX_RE.is_match(&message) {
            ErrorKind::Syntax
        } else if config
            .modules
            .iter()
            .any(|m| message.contains(m.id.as_str()))
        {
            ErrorKind::Plugin
        } else {
            ErrorKind::Runtime
        }
    }

    /// Ranked suggestions for a failure, highest priority first.
    pub fn suggestions(
        &self,
        error: &BackendError,
        source: &str,
        config: &TransformConfiguration,
        detection: &Detection,
    ) -> Vec<Suggestion> {
        let message = error.to_string();
        let mut out = Vec::new();

        let has_markup_module = config.modules.iter().any(|m| self.registry.is_markup(&m.id));
        let markup_feature = detection.features.iter().find(|f| f.name == MARKUP_FEATURE);
        let markup_signalled = markup_feature.is_some() || MARKUP_MESSAGE_RE.is_match(&message);
        if !has_markup_module && markup_signalled {
            let module = markup_feature
                .and_then(|f| f.requires_module.clone())
                .unwrap_or(ModuleId::Known(KnownModule::PresetReact));
            out.push(add_module(
                SuggestionKind::Preset,
                module,
                "Add a markup preset to lower JSX",
                Priority::High,
            ));
        }

        let typescript = ModuleId::Known(KnownModule::PresetTypescript);
        let typed_feature = detection
            .features
            .iter()
            .any(|f| f.requires_module.as_ref() == Some(&typescript));
        let typed_signalled = typed_feature || TYPED_MESSAGE_RE.is_match(&message);
        if !config.has_module(&typescript) && typed_signalled {
            out.push(add_module(
                SuggestionKind::Preset,
                typescript,
                "Add the TypeScript preset to strip type syntax",
                Priority::High,
            ));
        }

        let lowerings = [
            (
                "optional-chaining",
                "?.",
                KnownModule::PluginOptionalChaining,
                "Add the optional chaining plugin",
            ),
            (
                "nullish-coalescing",
                "??",
                KnownModule::PluginNullishCoalescing,
                "Add the nullish coalescing plugin",
            ),
        ];
        for (feature, token, module, description) in lowerings {
            let id = ModuleId::Known(module);
            let used = detection.has_feature(feature) || source.contains(token);
            if !config.has_module(&id) && used {
                out.push(add_module(SuggestionKind::Plugin, id, description, Priority::Medium));
            }
        }

        if OUT_OF_MEMORY_RE.is_match(&message) {
            out.push(Suggestion {
                kind: SuggestionKind::Config,
                description: "Reduce the number of configured modules or split the input"
                    .to_string(),
                action: SuggestionAction::SimplifyConfig,
                auto_applicable: false,
                priority: Priority::Medium,
            });
        }

        let missing = match error {
            BackendError::UnsupportedModule(name) => Some(name.clone()),
            _ => MISSING_PACKAGE_RE
                .captures(&message)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim_end_matches(['.', '\'', '"']).to_string()),
        };
        if let Some(package) = missing {
            out.push(Suggestion {
                kind: SuggestionKind::Dependency,
                description: format!("Install '{}'", package),
                action: SuggestionAction::InstallPackage { package },
                auto_applicable: true,
                priority: Priority::High,
            });
        }

        if matches!(error, BackendError::Parse { .. }) && out.is_empty() {
            out.push(Suggestion {
                kind: SuggestionKind::Syntax,
                description: "Fix the reported syntax error".to_string(),
                action: SuggestionAction::EditSource {
                    hint: message.clone(),
                },
                auto_applicable: false,
                priority: Priority::Low,
            });
        }

        out.sort_by_key(|s| s.priority);
        out
    }

    /// Degraded rewrite for syntax-level failures. `None` when no rule applies.
    pub fn recover(
        &self,
        kind: ErrorKind,
        source: &str,
        message: &str,
    ) -> Option<crate::error::RecoveryResult> {
        if !matches!(kind, ErrorKind::Syntax | ErrorKind::Plugin) {
            return None;
        }
        apply_rules(source, message)
    }

    /// Adds the modules named by auto-applicable suggestions. Modules already
    /// present are skipped, each module is added at most once and phase order
    /// is re-established.
    pub fn auto_apply(
        &self,
        config: &TransformConfiguration,
        suggestions: &[Suggestion],
    ) -> AutoApplyResult {
        let mut updated = config.clone();
        let mut applied = Vec::new();
        for suggestion in suggestions.iter().filter(|s| s.auto_applicable) {
            let Some(module) = suggestion.action.target_module() else {
                continue;
            };
            if updated.has_module(&module) {
                continue;
            }
            let options = self
                .registry
                .get(&module)
                .map(|d| d.default_options.clone())
                .unwrap_or_default();
            updated.modules.push(ModuleSpec { id: module, options });
            applied.push(suggestion.clone());
        }
        updated
            .modules
            .sort_by_key(|m| self.registry.phase_of(&m.id));
        AutoApplyResult {
            updated_config: updated,
            applied_suggestions: applied,
        }
    }

    /// Runs one failure through every stage and returns the finished error.
    pub fn process(
        &self,
        error: &BackendError,
        source: &str,
        config: &TransformConfiguration,
        detection: &Detection,
    ) -> DetailedError {
        let message = error.to_string();
        let kind = self.classify(error, config);
        let mut detailed = DetailedError::new(kind, message.clone());
        detailed.source_location = error.location().or_else(|| parse_location(&message));
        detailed.advance(ErrorStage::Classified);

        detailed.suggestions = self.suggestions(error, source, config, detection);
        detailed.advance(ErrorStage::SuggestionsGenerated);

        match self.recover(kind, source, &message) {
            Some(result) => {
                warn!(
                    kind = %kind,
                    warnings = result.warnings.len(),
                    "backend failure recovered with degraded rewrite"
                );
                detailed.recovery_result = Some(result);
                detailed.advance(ErrorStage::RecoveryAttempted);
            }
            None => {
                debug!(kind = %kind, "backend failure not recoverable");
                detailed.advance(ErrorStage::Unrecovered);
            }
        }
        detailed.advance(ErrorStage::Reported);
        detailed
    }
}

impl Default for ErrorEngine {
    fn default() -> Self {
        Self::new(ModuleRegistry::builtin())
    }
}
