use crate::detect::{
    combine_language, derive_dependencies, detect_from_extension, regex_events, FeatureDetector,
    MARKUP_FEATURE,
};
use crate::model::{
    DetectionPath, FeatureKind, Language, LanguageDetection, LanguageFeature, PartialConfiguration,
};
use crate::registry::{DependencyKind, KnownModule, ModuleId};
use crate::resolve::ConfigResolver;

fn detector() -> FeatureDetector {
    FeatureDetector::new()
}

#[test]
fn test_interface_feature() {
    let detection = detector().detect("interface Foo { x: number }", None);
    assert_eq!(detection.path, DetectionPath::Ast);
    assert!(detection.has_feature("typescript-interface"));
    let interface = detection
        .features
        .iter()
        .find(|f| f.name == "typescript-interface")
        .unwrap();
    assert!(!interface.supports_native);
    assert_eq!(
        interface.requires_module,
        Some(ModuleId::Known(KnownModule::PresetTypescript))
    );
    assert_eq!(
        detection.language.as_ref().map(|l| l.language),
        Some(Language::TypeScript)
    );
}

#[test]
fn test_optional_chain_and_nullish() {
    let detection = detector().detect("const v = a?.b ?? c", None);
    assert!(detection.has_feature("optional-chaining"));
    assert!(detection.has_feature("nullish-coalescing"));
    assert!(detection.has_feature("block-scoping"));
    assert!(detection.frameworks.is_empty());
}

#[test]
fn test_features_are_deduplicated() {
    let detection = detector().detect("const a = x?.y;\nconst b = z?.w;", None);
    let count = detection
        .features
        .iter()
        .filter(|f| f.name == "optional-chaining")
        .count();
    assert_eq!(count, 1);
}

#[test]
fn test_react_component() {
    let source = r#"
import React, { useState } from "react";

export function Counter() {
  const [n, setN] = useState(0);
  return <button onClick={() => setN(n + 1)}>{n}</button>;
}
"#;
    let detection = detector().detect(source, Some("Counter.jsx"));
    assert_eq!(detection.frameworks.len(), 1);
    assert_eq!(detection.frameworks[0].framework_name, "react");

    let jsx = detection
        .features
        .iter()
        .find(|f| f.name == MARKUP_FEATURE)
        .unwrap();
    assert_eq!(
        jsx.requires_module,
        Some(ModuleId::Known(KnownModule::PresetReact))
    );
    assert!(detection.has_feature("es-modules"));

    let language = detection.language.unwrap();
    assert_eq!(language.language, Language::Jsx);
    assert!(language.confidence > 0.9);
    assert!(language.requires_transpilation);
}

#[test]
fn test_markup_scoped_to_strongest_framework() {
    let source = r#"
import { createSignal } from "solid-js";

const [count, setCount] = createSignal(0);
const App = () => <div onClick={() => setCount(count() + 1)}>{count()}</div>;
"#;
    let detection = detector().detect(source, Some("App.jsx"));
    assert_eq!(detection.frameworks[0].framework_name, "solid");
    let jsx = detection
        .features
        .iter()
        .find(|f| f.name == MARKUP_FEATURE)
        .unwrap();
    assert_eq!(
        jsx.requires_module,
        Some(ModuleId::Known(KnownModule::PresetSolid))
    );
}

#[test]
fn test_regex_fallback_on_malformed_input() {
    let source = "const x = a?.b ??;\ninterface Foo { y: string";
    let detection = detector().detect(source, None);
    assert_eq!(detection.path, DetectionPath::Regex);
    assert!(detection.has_feature("optional-chaining"));
    assert!(detection.has_feature("nullish-coalescing"));
    assert!(detection.has_feature("block-scoping"));
}

#[test]
fn test_regex_fallback_never_panics() {
    let inputs = [
        "",
        "\u{0}\u{1}\u{2}<<<>>>",
        "((((((((",
        "`unterminated ${",
        "import from from from",
        "@@@ class extends {",
    ];
    for input in inputs {
        let _ = regex_events(input);
        let detection = detector().detect(input, Some("weird.tsx"));
        assert!(detection.features.len() < 64);
    }
}

#[test]
fn test_regex_fallback_detects_framework_imports() {
    let source = "import { useState } from 'react';\nfunction A() { const [a] = useState(; }";
    let detection = detector().detect(source, None);
    assert_eq!(detection.path, DetectionPath::Regex);
    assert_eq!(detection.frameworks[0].framework_name, "react");
}

#[test]
fn test_extension_table() {
    let tsx = detect_from_extension("src/App.tsx").unwrap();
    assert_eq!(tsx.language, Language::Tsx);
    assert!(tsx.requires_transpilation);

    let mjs = detect_from_extension("lib/util.MJS").unwrap();
    assert_eq!(mjs.language, Language::JavaScript);
    assert!(!mjs.requires_transpilation);

    assert!(detect_from_extension("main.py").is_none());
    assert!(detect_from_extension("Makefile").is_none());
}

#[test]
fn test_corroborating_guesses_combine() {
    let ext = LanguageDetection {
        language: Language::TypeScript,
        confidence: 0.9,
        requires_transpilation: true,
    };
    let content = LanguageDetection {
        language: Language::TypeScript,
        confidence: 0.8,
        requires_transpilation: true,
    };
    let combined = combine_language(Some(ext.clone()), Some(content.clone())).unwrap();
    assert!((combined.confidence - 0.98).abs() < 1e-9);
    assert!(combined.confidence > ext.confidence);
    assert!(combined.confidence > content.confidence);
}

#[test]
fn test_conflicting_guesses_prefer_stronger() {
    let ext = LanguageDetection {
        language: Language::JavaScript,
        confidence: 0.7,
        requires_transpilation: false,
    };
    let content = LanguageDetection {
        language: Language::Jsx,
        confidence: 0.8,
        requires_transpilation: true,
    };
    let combined = combine_language(Some(ext), Some(content)).unwrap();
    assert_eq!(combined.language, Language::Jsx);
    assert!(combined.confidence < 0.8);
}

#[test]
fn test_dependencies_deduplicated_by_module() {
    let features = vec![
        LanguageFeature {
            name: "typescript-interface".to_string(),
            kind: FeatureKind::Syntax,
            supports_native: false,
            requires_module: Some(KnownModule::PresetTypescript.into()),
        },
        LanguageFeature {
            name: "type-annotations".to_string(),
            kind: FeatureKind::Syntax,
            supports_native: false,
            requires_module: Some(KnownModule::PresetTypescript.into()),
        },
        LanguageFeature {
            name: "decorators".to_string(),
            kind: FeatureKind::Syntax,
            supports_native: false,
            requires_module: Some(KnownModule::PluginDecorators.into()),
        },
        LanguageFeature {
            name: "bigint".to_string(),
            kind: FeatureKind::Syntax,
            supports_native: true,
            requires_module: None,
        },
    ];
    let deps = derive_dependencies(&features);
    assert_eq!(deps.len(), 2);
    assert_eq!(deps[0].kind, DependencyKind::Preset);
    assert_eq!(deps[0].features, vec!["typescript-interface", "type-annotations"]);
    assert_eq!(deps[1].kind, DependencyKind::Plugin);
}

#[test]
fn test_api_calls_reported_as_api_features() {
    let detection = detector().detect("const o = Object.fromEntries(pairs);", None);
    let api = detection
        .features
        .iter()
        .find(|f| f.name == "object-from-entries")
        .unwrap();
    assert_eq!(api.kind, FeatureKind::Api);
    assert!(api.requires_module.is_none());
}

#[test]
fn test_detect_then_resolve_is_deterministic() {
    let source = "import { h } from 'preact';\n\
                  export const A = (p: { x?: number }) => <div>{p.x ?? 0}</div>;";
    let resolver = ConfigResolver::default();
    let base = PartialConfiguration::default();
    let first = resolver.resolve(
        &detector().detect(source, Some("A.tsx")),
        &PartialConfiguration::default(),
        &base,
    );
    let second = resolver.resolve(
        &detector().detect(source, Some("A.tsx")),
        &PartialConfiguration::default(),
        &base,
    );
    assert_eq!(first, second);
    assert_eq!(first.canonical_json(), second.canonical_json());
    assert_eq!(first.modules[0].id, KnownModule::PresetTypescript.into());
}
