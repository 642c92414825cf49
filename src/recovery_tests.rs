use crate::detect::FeatureDetector;
use crate::diagnostics::DiagnosticReport;
use crate::error::{
    BackendError, ErrorKind, ErrorStage, Priority, SuggestionAction, SuggestionKind,
};
use crate::model::{Detection, ModuleSpec, TransformConfiguration};
use crate::recovery::{parse_location, ErrorEngine};
use crate::registry::{KnownModule, ModuleId};

fn engine() -> ErrorEngine {
    ErrorEngine::default()
}

fn parse_error(message: &str) -> BackendError {
    BackendError::Parse {
        message: message.to_string(),
        location: None,
    }
}

#[test]
fn test_classification_taxonomy() {
    let engine = engine();
    let config = TransformConfiguration {
        modules: vec![ModuleSpec::new(KnownModule::PluginDecorators)],
        ..Default::default()
    };
    let cases = [
        (parse_error("Unexpected token"), ErrorKind::Syntax),
        (
            BackendError::UnsupportedModule("preset-solid".into()),
            ErrorKind::Dependency,
        ),
        (
            BackendError::Transform("Cannot find module 'left-pad'".into()),
            ErrorKind::Dependency,
        ),
        (
            BackendError::Transform("Unknown option: loose".into()),
            ErrorKind::Configuration,
        ),
        (
            BackendError::Transform("SyntaxError: missing ) after argument list".into()),
            ErrorKind::Syntax,
        ),
        (
            BackendError::Transform("plugin-decorators: visitor failed".into()),
            ErrorKind::Plugin,
        ),
        (BackendError::Timeout(50), ErrorKind::Runtime),
        (BackendError::Other("boom".into()), ErrorKind::Runtime),
    ];
    for (error, expected) in cases {
        assert_eq!(engine.classify(&error, &config), expected, "{}", error);
    }
}

#[test]
fn test_optional_access_recovered_with_warning() {
    let engine = engine();
    let source = "const name = obj?.prop;";
    let detection = FeatureDetector::new().detect(source, None);
    let config = TransformConfiguration::default();

    let error = parse_error("Unexpected token '?.'");
    let detailed = engine.process(&error, source, &config, &detection);

    assert_eq!(detailed.kind, ErrorKind::Syntax);
    let recovery = detailed.recovery_result.as_ref().unwrap();
    assert_eq!(recovery.lowered_text, "const name = (obj && obj.prop);");
    assert_eq!(recovery.warnings.len(), 1);
    assert_eq!(
        detailed.stages,
        vec![
            ErrorStage::Raised,
            ErrorStage::Classified,
            ErrorStage::SuggestionsGenerated,
            ErrorStage::RecoveryAttempted,
            ErrorStage::Reported,
        ]
    );

    let applied = engine.auto_apply(&config, &detailed.suggestions);
    assert_eq!(applied.applied_suggestions.len(), 1);
    let optional = ModuleId::Known(KnownModule::PluginOptionalChaining);
    assert_eq!(
        applied
            .updated_config
            .modules
            .iter()
            .filter(|m| m.id == optional)
            .count(),
        1
    );

    let again = engine.auto_apply(&applied.updated_config, &detailed.suggestions);
    assert!(again.applied_suggestions.is_empty());
    assert_eq!(again.updated_config, applied.updated_config);
}

#[test]
fn test_optional_call_recovered_inside_guard() {
    let engine = engine();
    let source = "const s = \"a?.b\";\nuser?.greet();";
    let detailed = engine.process(
        &parse_error("Unexpected token '?.'"),
        source,
        &TransformConfiguration::default(),
        &FeatureDetector::new().detect(source, None),
    );
    let recovery = detailed.recovery_result.unwrap();
    assert_eq!(recovery.lowered_text, "const s = \"a?.b\";\n(user && user.greet());");
    assert_eq!(recovery.warnings.len(), 1);
}

#[test]
fn test_ambiguous_nullish_left_unrecovered() {
    let engine = engine();
    let source = "const v = load() ?? pick(first());";
    let detailed = engine.process(
        &parse_error("Unexpected token '??'"),
        source,
        &TransformConfiguration::default(),
        &Detection::empty(),
    );
    assert_eq!(detailed.kind, ErrorKind::Syntax);
    assert!(detailed.recovery_result.is_none());
    assert!(detailed.stages.contains(&ErrorStage::Unrecovered));
}

#[test]
fn test_unrecoverable_syntax_error() {
    let engine = engine();
    let detailed = engine.process(
        &parse_error("Unexpected token (3:7)"),
        "let x = ;",
        &TransformConfiguration::default(),
        &Detection::empty(),
    );
    assert!(detailed.recovery_result.is_none());
    assert_eq!(detailed.stage(), ErrorStage::Reported);
    assert!(detailed.stages.contains(&ErrorStage::Unrecovered));
    assert_eq!(detailed.source_location.map(|l| (l.line, l.column)), Some((3, 7)));
    assert_eq!(detailed.suggestions[0].kind, SuggestionKind::Syntax);
    assert!(!detailed.suggestions[0].auto_applicable);
}

#[test]
fn test_markup_and_types_suggest_presets() {
    let engine = engine();
    let source = "const el: JSX.Element = <div/>;";
    let detection = FeatureDetector::new().detect(source, Some("el.tsx"));
    let suggestions = engine.suggestions(
        &parse_error("Unexpected token '<'"),
        source,
        &TransformConfiguration::default(),
        &detection,
    );
    let modules: Vec<ModuleId> = suggestions
        .iter()
        .filter_map(|s| s.action.target_module())
        .collect();
    assert!(modules.contains(&KnownModule::PresetReact.into()));
    assert!(modules.contains(&KnownModule::PresetTypescript.into()));
    assert!(suggestions.iter().all(|s| s.priority == Priority::High && s.auto_applicable));
}

#[test]
fn test_present_modules_not_suggested() {
    let engine = engine();
    let config = TransformConfiguration {
        modules: vec![
            ModuleSpec::new(KnownModule::PresetTypescript),
            ModuleSpec::new(KnownModule::PresetReact),
            ModuleSpec::new(KnownModule::PluginOptionalChaining),
        ],
        ..Default::default()
    };
    let source = "const a: number = b?.c;";
    let detection = FeatureDetector::new().detect(source, None);
    let error = BackendError::Other("boom".into());
    let suggestions = engine.suggestions(&error, source, &config, &detection);
    assert!(suggestions.is_empty());
}

#[test]
fn test_out_of_memory_is_not_auto_applicable() {
    let engine = engine();
    let error = BackendError::Transform("FATAL: JavaScript heap out of memory".into());
    let config = TransformConfiguration::default();
    assert_eq!(engine.classify(&error, &config), ErrorKind::Runtime);

    let suggestions = engine.suggestions(&error, "x", &config, &Detection::empty());
    let simplify = suggestions
        .iter()
        .find(|s| s.action == SuggestionAction::SimplifyConfig)
        .unwrap();
    assert!(!simplify.auto_applicable);

    let applied = engine.auto_apply(&config, &suggestions);
    assert!(applied.applied_suggestions.is_empty());
}

#[test]
fn test_missing_module_installs_once() {
    let engine = engine();
    let error = BackendError::Transform("Cannot find module 'preset-react'".into());
    let detection = FeatureDetector::new().detect("<div/>", Some("a.jsx"));
    let config = TransformConfiguration {
        modules: vec![ModuleSpec::new(KnownModule::PluginDecorators)],
        ..Default::default()
    };
    let suggestions = engine.suggestions(&error, "<div/>", &config, &detection);
    assert!(suggestions.iter().any(|s| s.action
        == SuggestionAction::InstallPackage {
            package: "preset-react".into()
        }));

    let applied = engine.auto_apply(&config, &suggestions);
    assert_eq!(
        applied.updated_config.module_names(),
        vec!["plugin-decorators", "preset-react"]
    );
    assert_eq!(applied.applied_suggestions.len(), 1);
}

#[test]
fn test_unknown_package_not_applied() {
    let engine = engine();
    let error = BackendError::Transform("Cannot find module 'left-pad'".into());
    let config = TransformConfiguration::default();
    let suggestions = engine.suggestions(&error, "pad()", &config, &Detection::empty());
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0].kind, SuggestionKind::Dependency);
    let applied = engine.auto_apply(&config, &suggestions);
    assert!(applied.updated_config.modules.is_empty());
}

#[test]
fn test_auto_apply_restores_phase_order() {
    let engine = engine();
    let config = TransformConfiguration {
        modules: vec![
            ModuleSpec::new(KnownModule::PluginDecorators),
            ModuleSpec::new(KnownModule::PresetEnv),
        ],
        ..Default::default()
    };
    let detection = FeatureDetector::new().detect("interface A {}", None);
    let error = parse_error("Unexpected token");
    let suggestions = engine.suggestions(&error, "interface A {}", &config, &detection);
    let applied = engine.auto_apply(&config, &suggestions);
    assert_eq!(
        applied.updated_config.module_names(),
        vec!["preset-typescript", "plugin-decorators", "preset-env"]
    );
}

#[test]
fn test_location_formats() {
    assert_eq!(parse_location("Unexpected token (12:4)").map(|l| l.line), Some(12));
    let loc = parse_location("error at line 3, column 9").unwrap();
    assert_eq!((loc.line, loc.column), (3, 9));
    assert!(parse_location("no location here").is_none());
}

#[test]
fn test_report_aggregates_attempts() {
    let engine = engine();
    let source = "const v = a?.b;";
    let detection = FeatureDetector::new().detect(source, None);
    let config = TransformConfiguration::default();
    let first = engine.process(&parse_error("Unexpected token '?.'"), source, &config, &detection);
    let retry_error = BackendError::Other("still failing".into());
    let second = engine.process(&retry_error, source, &config, &detection);

    let report = DiagnosticReport::new(source, &config, true).with_errors([&first, &second]);
    assert_eq!(report.failures.len(), 2);
    assert!(report.failures[0].recovered);
    assert_eq!(
        report
            .suggestions
            .iter()
            .filter(|s| {
                s.action.target_module() == Some(KnownModule::PluginOptionalChaining.into())
            })
            .count(),
        1
    );
    assert!(report.environment.debug_mode);
}
