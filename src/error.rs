use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::model::{DetectionPath, PerformanceInfo};
use crate::registry::ModuleId;

// ═══════════════════════════════════════════════════════════════════════════════
// BACKEND & CONFIG ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Failure reported by a transformation backend. Only the variant and message
/// are inspected by the pipeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("parse error: {message}")]
    Parse {
        message: String,
        location: Option<SourceLocation>,
    },

    #[error("transform error: {0}")]
    Transform(String),

    #[error("unsupported module: {0}")]
    UnsupportedModule(String),

    #[error("backend timed out after {0} ms")]
    Timeout(u64),

    #[error("{0}")]
    Other(String),
}

impl BackendError {
    pub fn location(&self) -> Option<SourceLocation> {
        match self {
            BackendError::Parse { location, .. } => *location,
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    #[error("configuration rejected: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

// ═══════════════════════════════════════════════════════════════════════════════
// TAXONOMY
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Syntax,
    Plugin,
    Dependency,
    Configuration,
    Runtime,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Syntax => "syntax",
            ErrorKind::Plugin => "plugin",
            ErrorKind::Dependency => "dependency",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Runtime => "runtime",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SUGGESTIONS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    Preset,
    Plugin,
    Dependency,
    Config,
    Syntax,
}

/// Declared most urgent first, so ascending order sorts high priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SuggestionAction {
    AddModule { module: ModuleId },
    InstallPackage { package: String },
    SimplifyConfig,
    EditSource { hint: String },
}

impl SuggestionAction {
    /// The module this action would add to a configuration, if any.
    pub fn target_module(&self) -> Option<ModuleId> {
        match self {
            SuggestionAction::AddModule { module } => Some(module.clone()),
            SuggestionAction::InstallPackage { package } => match ModuleId::from(package.as_str()) {
                ModuleId::Known(m) => Some(ModuleId::Known(m)),
                ModuleId::Custom(_) => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for SuggestionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuggestionAction::AddModule { module } => write!(f, "add-module:{}", module),
            SuggestionAction::InstallPackage { package } => write!(f, "install:{}", package),
            SuggestionAction::SimplifyConfig => f.write_str("simplify-config"),
            SuggestionAction::EditSource { hint } => write!(f, "edit-source:{}", hint),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub kind: SuggestionKind,
    pub description: String,
    pub action: SuggestionAction,
    pub auto_applicable: bool,
    pub priority: Priority,
}

impl Suggestion {
    /// Identity used when merging suggestions from several failures.
    pub fn dedupe_key(&self) -> String {
        format!("{:?}:{}", self.kind, self.action)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DETAILED ERROR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryResult {
    pub lowered_text: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorStage {
    Raised,
    Classified,
    SuggestionsGenerated,
    RecoveryAttempted,
    Unrecovered,
    Reported,
}

/// Extra context attached when debug mode is on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfo {
    pub detection_path: DetectionPath,
    pub features: Vec<String>,
    pub frameworks: Vec<String>,
    pub configuration: String,
    pub backend_message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("{kind} error: {message}")]
pub struct DetailedError {
    pub kind: ErrorKind,
    pub message: String,
    pub source_location: Option<SourceLocation>,
    pub suggestions: Vec<Suggestion>,
    pub recovery_result: Option<RecoveryResult>,
    pub stages: Vec<ErrorStage>,
    pub debug: Option<DebugInfo>,
    pub performance: Option<PerformanceInfo>,
}

impl DetailedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source_location: None,
            suggestions: Vec::new(),
            recovery_result: None,
            stages: vec![ErrorStage::Raised],
            debug: None,
            performance: None,
        }
    }

    pub fn advance(&mut self, stage: ErrorStage) {
        self.stages.push(stage);
    }

    pub fn stage(&self) -> ErrorStage {
        self.stages.last().copied().unwrap_or(ErrorStage::Raised)
    }

    pub fn add_suggestion(&mut self, suggestion: Suggestion) {
        self.suggestions.push(suggestion);
    }

    pub fn is_recovered(&self) -> bool {
        self.recovery_result.is_some()
    }
}
