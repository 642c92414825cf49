// ═══════════════════════════════════════════════════════════════════════════════
// NAPI EXPORTS
// ═══════════════════════════════════════════════════════════════════════════════
//
// Every method takes and returns JSON strings so the host can keep its own
// types. `transform` answers with `{ "result": ... }` or `{ "error": ... }`.

use napi_derive::napi;
use serde::Serialize;
use std::sync::Arc;

use crate::backend::OxcBackend;
use crate::error::DetailedError;
use crate::model::{PartialConfiguration, TransformOptions, TransformResult};
use crate::orchestrator::TransformOrchestrator;
use crate::project_config::from_value;
use crate::resolve::ConfigResolver;

fn to_json<T: Serialize>(value: &T) -> napi::Result<String> {
    serde_json::to_string(value).map_err(|e| napi::Error::from_reason(e.to_string()))
}

fn parse_options(options_json: Option<String>) -> napi::Result<TransformOptions> {
    match options_json {
        Some(text) if !text.trim().is_empty() => {
            serde_json::from_str(&text).map_err(|e| {
                napi::Error::from_reason(format!("invalid transform options: {}", e))
            })
        }
        _ => Ok(TransformOptions::default()),
    }
}

#[derive(Serialize)]
enum Outcome<'a> {
    #[serde(rename = "result")]
    Success(&'a TransformResult),
    #[serde(rename = "error")]
    Failure(&'a DetailedError),
}

#[napi]
pub struct NativeTransformer {
    orchestrator: TransformOrchestrator,
    runtime: tokio::runtime::Runtime,
}

#[napi]
impl NativeTransformer {
    /// `base_config_json` is a project configuration object, optionally with a
    /// `settings` member.
    #[napi(constructor)]
    pub fn new(base_config_json: Option<String>) -> napi::Result<Self> {
        let project = match base_config_json {
            Some(text) if !text.trim().is_empty() => {
                let value: serde_json::Value = serde_json::from_str(&text)
                    .map_err(|e| napi::Error::from_reason(e.to_string()))?;
                from_value(value, &ConfigResolver::default())
                    .map_err(|e| napi::Error::from_reason(e.to_string()))?
            }
            _ => Default::default(),
        };
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| napi::Error::from_reason(e.to_string()))?;
        let orchestrator = TransformOrchestrator::builder(Arc::new(OxcBackend::new()))
            .settings(project.settings)
            .base_config(project.config)
            .build();
        Ok(Self {
            orchestrator,
            runtime,
        })
    }

    #[napi]
    pub fn transform(&self, source: String, options_json: Option<String>) -> napi::Result<String> {
        let options = parse_options(options_json)?;
        let outcome = self.runtime.block_on(self.orchestrator.transform(&source, &options));
        match &outcome {
            Ok(result) => to_json(&Outcome::Success(result)),
            Err(error) => to_json(&Outcome::Failure(error)),
        }
    }

    #[napi]
    pub fn detect(&self, source: String, filename: Option<String>) -> napi::Result<String> {
        to_json(&self.orchestrator.detect(&source, filename.as_deref()))
    }

    #[napi]
    pub fn resolve_config(
        &self,
        source: String,
        options_json: Option<String>,
    ) -> napi::Result<String> {
        let options = parse_options(options_json)?;
        to_json(&self.orchestrator.resolve_config(&source, &options))
    }

    #[napi]
    pub fn cache_stats(&self) -> napi::Result<String> {
        to_json(&self.orchestrator.get_cache_stats())
    }

    #[napi]
    pub fn pipeline_stats(&self) -> napi::Result<String> {
        to_json(&self.orchestrator.stats())
    }

    #[napi]
    pub fn clear_cache(&self) {
        self.orchestrator.clear_cache();
    }

    #[napi]
    pub fn cleanup(&self) -> u32 {
        self.orchestrator.cleanup() as u32
    }

    #[napi]
    pub fn enable_debug_mode(&self, enabled: bool) {
        self.orchestrator.enable_debug_mode(enabled);
    }

    #[napi]
    pub fn diagnostic_report(
        &self,
        source: String,
        options_json: Option<String>,
        result_json: Option<String>,
        error_json: Option<String>,
    ) -> napi::Result<String> {
        let options = parse_options(options_json)?;
        let config = self.orchestrator.resolve_config(&source, &options);
        let result: Option<TransformResult> = result_json
            .map(|text| serde_json::from_str(&text))
            .transpose()
            .map_err(|e| napi::Error::from_reason(e.to_string()))?;
        let error: Option<DetailedError> = error_json
            .map(|text| serde_json::from_str(&text))
            .transpose()
            .map_err(|e| napi::Error::from_reason(e.to_string()))?;
        Ok(self
            .orchestrator
            .create_diagnostic_report(&source, &config, result.as_ref(), error.as_ref()))
    }
}

/// Validates a raw configuration object without constructing a transformer.
#[napi]
pub fn validate_config_native(config_json: String) -> napi::Result<String> {
    let value: serde_json::Value =
        serde_json::from_str(&config_json).map_err(|e| napi::Error::from_reason(e.to_string()))?;
    let resolver = ConfigResolver::default();
    let mut result = resolver.validate_raw(&value);
    if result.valid {
        if let Err(e) = serde_json::from_value::<PartialConfiguration>(value) {
            result.valid = false;
            result.errors.push(e.to_string());
        }
    }
    to_json(&result)
}
