use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::cache::compute_hash;
use crate::error::{DetailedError, ErrorKind, SourceLocation, Suggestion};
use crate::model::{PerformanceInfo, TransformConfiguration, TransformResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentInfo {
    pub crate_version: String,
    pub os: String,
    pub arch: String,
    pub debug_mode: bool,
}

impl EnvironmentInfo {
    pub fn current(debug_mode: bool) -> Self {
        Self {
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            debug_mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSummary {
    pub bytes: usize,
    pub lines: usize,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureSummary {
    pub kind: ErrorKind,
    pub message: String,
    pub location: Option<SourceLocation>,
    pub recovered: bool,
}

/// Aggregated view over one input and any number of failed attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticReport {
    pub generated_at_ms: u64,
    pub environment: EnvironmentInfo,
    pub source: SourceSummary,
    pub configuration: String,
    pub modules: Vec<String>,
    pub failures: Vec<FailureSummary>,
    pub suggestions: Vec<Suggestion>,
    pub timings: Vec<PerformanceInfo>,
    pub output_bytes: Option<usize>,
    pub warnings: Vec<String>,
}

impl DiagnosticReport {
    pub fn new(source: &str, config: &TransformConfiguration, debug_mode: bool) -> Self {
        let generated_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            generated_at_ms,
            environment: EnvironmentInfo::current(debug_mode),
            source: SourceSummary {
                bytes: source.len(),
                lines: source.split('\n').count(),
                hash: compute_hash(source),
            },
            configuration: config.canonical_json(),
            modules: config.module_names(),
            failures: Vec::new(),
            suggestions: Vec::new(),
            timings: Vec::new(),
            output_bytes: None,
            warnings: Vec::new(),
        }
    }

    pub fn with_result(mut self, result: &TransformResult) -> Self {
        self.output_bytes = Some(result.lowered_text.len());
        self.warnings.extend(result.metadata.warnings.iter().cloned());
        self.timings.push(result.performance.clone());
        self
    }

    /// Folds one failed attempt in. Suggestions already present under the
    /// same kind and action are skipped.
    pub fn add_error(&mut self, error: &DetailedError) {
        self.failures.push(FailureSummary {
            kind: error.kind,
            message: error.message.clone(),
            location: error.source_location,
            recovered: error.is_recovered(),
        });
        let mut seen: HashSet<String> =
            self.suggestions.iter().map(Suggestion::dedupe_key).collect();
        for suggestion in &error.suggestions {
            if seen.insert(suggestion.dedupe_key()) {
                self.suggestions.push(suggestion.clone());
            }
        }
        self.suggestions.sort_by_key(|s| s.priority);
        if let Some(recovery) = &error.recovery_result {
            self.warnings.extend(recovery.warnings.iter().cloned());
        }
        if let Some(perf) = &error.performance {
            self.timings.push(perf.clone());
        }
    }

    pub fn with_errors<'a>(mut self, errors: impl IntoIterator<Item = &'a DetailedError>) -> Self {
        for error in errors {
            self.add_error(error);
        }
        self
    }

    pub fn total_time_ms(&self) -> f64 {
        self.timings.iter().map(|t| t.transform_time_ms).sum()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Transform Diagnostic Report ===")?;
        writeln!(
            f,
            "Environment: transpile-native {} ({}/{}), debug={}",
            self.environment.crate_version,
            self.environment.os,
            self.environment.arch,
            self.environment.debug_mode
        )?;
        writeln!(f, "Generated at: {} ms", self.generated_at_ms)?;
        writeln!(
            f,
            "Source: {} bytes, {} lines, sha256 {}",
            self.source.bytes, self.source.lines, self.source.hash
        )?;
        let modules = if self.modules.is_empty() {
            "(none)".to_string()
        } else {
            self.modules.join(", ")
        };
        writeln!(f, "Modules: {}", modules)?;
        writeln!(f, "Configuration: {}", self.configuration)?;
        if let Some(bytes) = self.output_bytes {
            writeln!(f, "Output: {} bytes", bytes)?;
        }
        writeln!(
            f,
            "Total time: {:.2} ms over {} attempt(s)",
            self.total_time_ms(),
            self.timings.len()
        )?;

        if !self.failures.is_empty() {
            writeln!(f, "\nFailures ({}):", self.failures.len())?;
            for (i, failure) in self.failures.iter().enumerate() {
                let location = failure
                    .location
                    .map(|l| format!(" at {}:{}", l.line, l.column))
                    .unwrap_or_default();
                writeln!(
                    f,
                    "  {}. [{}]{} {}{}",
                    i + 1,
                    failure.kind,
                    location,
                    failure.message,
                    if failure.recovered { " (recovered)" } else { "" }
                )?;
            }
        }

        if !self.suggestions.is_empty() {
            writeln!(f, "\nSuggestions:")?;
            for s in &self.suggestions {
                writeln!(
                    f,
                    "  - [{:?}] {} ({}){}",
                    s.priority,
                    s.description,
                    s.action,
                    if s.auto_applicable { " [auto]" } else { "" }
                )?;
            }
        }

        if !self.warnings.is_empty() {
            writeln!(f, "\nWarnings:")?;
            for w in &self.warnings {
                writeln!(f, "  - {}", w)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Priority, SuggestionAction, SuggestionKind};
    use crate::registry::KnownModule;

    fn failure(message: &str) -> DetailedError {
        let mut error = DetailedError::new(ErrorKind::Syntax, message);
        error.add_suggestion(Suggestion {
            kind: SuggestionKind::Preset,
            description: "Add a markup preset".to_string(),
            action: SuggestionAction::AddModule {
                module: KnownModule::PresetReact.into(),
            },
            auto_applicable: true,
            priority: Priority::High,
        });
        error
    }

    #[test]
    fn test_suggestions_deduplicated_across_failures() {
        let report = DiagnosticReport::new("<a/>", &TransformConfiguration::default(), false)
            .with_errors(&[failure("first"), failure("second")]);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.suggestions.len(), 1);

        let text = report.to_string();
        assert!(text.contains("Failures (2)"));
        assert!(text.contains("add-module:preset-react"));
        assert!(text.contains(std::env::consts::OS));
    }
}
