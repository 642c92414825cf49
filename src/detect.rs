//! Feature Detection
//!
//! Parses source text with oxc and reduces the traversal events to language
//! features. Input oxc cannot parse goes through regex detectors that emit the
//! same events, so malformed code still gets a best-effort answer.

use lazy_static::lazy_static;
use oxc_allocator::Allocator;
use oxc_parser::Parser;
use oxc_span::SourceType;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::debug;

use crate::frameworks::score_frameworks;
use crate::model::{
    Detection, DetectionPath, DependencyInfo, FeatureKind, Language, LanguageDetection,
    LanguageFeature,
};
use crate::registry::{KnownModule, ModuleId};
use crate::visitor::{AstEvent, EventCollector, NodeKind};

// ═══════════════════════════════════════════════════════════════════════════════
// FEATURE TABLE
// ═══════════════════════════════════════════════════════════════════════════════

pub struct FeatureDef {
    pub name: &'static str,
    pub kind: FeatureKind,
    pub supports_native: bool,
    pub requires: Option<KnownModule>,
}

const fn syntax(
    name: &'static str,
    supports_native: bool,
    requires: Option<KnownModule>,
) -> FeatureDef {
    FeatureDef {
        name,
        kind: FeatureKind::Syntax,
        supports_native,
        requires,
    }
}

pub const MARKUP_FEATURE: &str = "jsx";

/// Maps a node kind to the feature it implies. Kinds that only feed framework
/// scoring map to nothing.
pub fn feature_for(kind: NodeKind) -> Option<FeatureDef> {
    use KnownModule::*;
    let def = match kind {
        NodeKind::OptionalChain => syntax("optional-chaining", true, Some(PluginOptionalChaining)),
        NodeKind::NullishCoalescing => {
            syntax("nullish-coalescing", true, Some(PluginNullishCoalescing))
        }
        NodeKind::LogicalAssignment => {
            syntax("logical-assignment", true, Some(PluginLogicalAssignment))
        }
        NodeKind::Exponentiation => syntax(
            "exponentiation-operator",
            true,
            Some(PluginExponentiationOperator),
        ),
        NodeKind::ClassField => syntax("class-properties", true, Some(PluginClassProperties)),
        NodeKind::PrivateMember => syntax("private-members", true, Some(PluginPrivateMethods)),
        NodeKind::StaticBlock => syntax("class-static-block", true, Some(PluginClassStaticBlock)),
        NodeKind::Decorator => syntax("decorators", false, Some(PluginDecorators)),
        NodeKind::AsyncFunction => syntax("async-functions", true, Some(PluginAsyncToGenerator)),
        NodeKind::AsyncGenerator => syntax("async-generators", true, Some(PluginAsyncGenerators)),
        NodeKind::ForAwait => syntax("async-iteration", true, Some(PluginAsyncGenerators)),
        NodeKind::TopLevelAwait => syntax("top-level-await", true, None),
        NodeKind::ObjectSpread => syntax("object-spread", true, Some(PluginObjectRestSpread)),
        NodeKind::ObjectRest => syntax("object-rest", true, Some(PluginObjectRestSpread)),
        NodeKind::ArrowFunction => syntax("arrow-functions", true, Some(PluginArrowFunctions)),
        NodeKind::TemplateLiteral => {
            syntax("template-literals", true, Some(PluginTemplateLiterals))
        }
        NodeKind::BlockScopedDeclaration => syntax("block-scoping", true, Some(PluginBlockScoping)),
        NodeKind::Class => syntax("classes", true, Some(PluginClasses)),
        NodeKind::BigInt => syntax("bigint", true, None),
        NodeKind::NumericSeparator => {
            syntax("numeric-separator", true, Some(PluginNumericSeparator))
        }
        NodeKind::DynamicImport => syntax("dynamic-import", true, Some(PluginDynamicImport)),
        NodeKind::ImportMeta => syntax("import-meta", true, None),
        NodeKind::ModuleSyntax => syntax("es-modules", true, None),
        NodeKind::TypeAnnotation => syntax("type-annotations", false, Some(PresetTypescript)),
        NodeKind::Interface => syntax("typescript-interface", false, Some(PresetTypescript)),
        NodeKind::TypeAlias => syntax("type-aliases", false, Some(PresetTypescript)),
        NodeKind::Enum => syntax("typescript-enum", false, Some(PresetTypescript)),
        NodeKind::TypeAssertion => syntax("type-assertions", false, Some(PresetTypescript)),
        NodeKind::MarkupElement | NodeKind::MarkupFragment => {
            syntax(MARKUP_FEATURE, false, Some(PresetReact))
        }
        NodeKind::ImportSource | NodeKind::ClassExtends | NodeKind::Call => return None,
    };
    Some(def)
}

/// Runtime APIs recognised from call sites. These need no lowering module; they
/// are reported so the host can decide on polyfills.
static API_FEATURES: &[(&str, &str)] = &[
    ("Object.fromEntries", "object-from-entries"),
    ("Object.entries", "object-entries"),
    ("Object.values", "object-values"),
    ("Promise.allSettled", "promise-all-settled"),
    ("Promise.any", "promise-any"),
    ("Array.from", "array-from"),
    ("structuredClone", "structured-clone"),
    ("queueMicrotask", "queue-microtask"),
];

fn api_feature(call: &str) -> Option<LanguageFeature> {
    API_FEATURES
        .iter()
        .find(|(callee, _)| *callee == call)
        .map(|(_, name)| LanguageFeature {
            name: name.to_string(),
            kind: FeatureKind::Api,
            supports_native: true,
            requires_module: None,
        })
}

/// Pure reducer from traversal events to a deduplicated feature list in
/// first-seen order.
pub fn reduce_events(events: &[AstEvent]) -> Vec<LanguageFeature> {
    let mut seen = HashSet::new();
    let mut features = Vec::new();
    for event in events {
        let feature = match feature_for(event.node_kind) {
            Some(def) => Some(LanguageFeature {
                name: def.name.to_string(),
                kind: def.kind,
                supports_native: def.supports_native,
                requires_module: def.requires.map(ModuleId::Known),
            }),
            None if event.node_kind == NodeKind::Call => {
                event.node_data.as_deref().and_then(api_feature)
            }
            None => None,
        };
        if let Some(feature) = feature {
            if seen.insert(feature.name.clone()) {
                features.push(feature);
            }
        }
    }
    features
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGEX FALLBACK
// ═══════════════════════════════════════════════════════════════════════════════

lazy_static! {
    /// One detector per node kind. Detectors with a capture group record the
    /// captured text as event data.
    static ref REGEX_DETECTORS: Vec<(NodeKind, Regex)> = vec![
        (NodeKind::OptionalChain, Regex::new(r"\?\.[A-Za-z_$\[(]").unwrap()),
        (NodeKind::NullishCoalescing, Regex::new(r"\?\?(?:[^=]|$)").unwrap()),
        (NodeKind::LogicalAssignment, Regex::new(r"(?:\|\||&&|\?\?)=").unwrap()),
        (NodeKind::Exponentiation, Regex::new(r"[\w)\]]\s*\*\*=?\s*[\w(\-]").unwrap()),
        (NodeKind::ClassField, Regex::new(r"(?m)^\s*static\s+[A-Za-z_$#][\w$]*\s*=").unwrap()),
        (NodeKind::PrivateMember, Regex::new(r"(?m)(?:\.|^\s*|\bstatic\s+)#[A-Za-z_$][\w$]*").unwrap()),
        (NodeKind::StaticBlock, Regex::new(r"\bstatic\s*\{").unwrap()),
        (NodeKind::Decorator, Regex::new(r"(?m)^\s*@[A-Za-z_$][\w$.]*").unwrap()),
        (NodeKind::AsyncGenerator, Regex::new(r"\basync\s+function\s*\*").unwrap()),
        (NodeKind::AsyncFunction, Regex::new(r"\basync\s+(?:function\b|\(|[A-Za-z_$][\w$]*\s*=>)").unwrap()),
        (NodeKind::ForAwait, Regex::new(r"\bfor\s+await\s*\(").unwrap()),
        (NodeKind::ObjectSpread, Regex::new(r"\{\s*\.\.\.[A-Za-z_$]|,\s*\.\.\.[A-Za-z_$][\w$.]*\s*\}").unwrap()),
        (NodeKind::ArrowFunction, Regex::new(r"=>").unwrap()),
        (NodeKind::TemplateLiteral, Regex::new(r"`").unwrap()),
        (NodeKind::BlockScopedDeclaration, Regex::new(r"\b(let|const)\s+[A-Za-z_$\[{]").unwrap()),
        (NodeKind::Class, Regex::new(r"\bclass\s+[A-Za-z_$]").unwrap()),
        (NodeKind::ClassExtends, Regex::new(r"\bclass\s+[A-Za-z_$][\w$]*\s+extends\s+([A-Za-z_$][\w$]*(?:\.[A-Za-z_$][\w$]*)?)").unwrap()),
        (NodeKind::BigInt, Regex::new(r"\b\d[\d_]*n\b").unwrap()),
        (NodeKind::NumericSeparator, Regex::new(r"\b\d+_\d").unwrap()),
        (NodeKind::DynamicImport, Regex::new(r"\bimport\s*\(").unwrap()),
        (NodeKind::ImportMeta, Regex::new(r"\bimport\.meta\b").unwrap()),
        (NodeKind::ModuleSyntax, Regex::new(r"(?m)^\s*(?:import\s+[\w*{'\x22]|export\s+)").unwrap()),
        (NodeKind::ImportSource, Regex::new(r#"(?m)^\s*import\s+(?:[\w*{}\s,$]+\s+from\s+)?['"]([^'"]+)['"]"#).unwrap()),
        (NodeKind::TypeAnnotation, Regex::new(r"[A-Za-z_$)][\w$]*\??\s*:\s*(?:string|number|boolean|any|unknown|void|never|object|[A-Z][\w$]*(?:<[^<>]*>)?)(?:\[\])?\s*[,)=;{]").unwrap()),
        (NodeKind::Interface, Regex::new(r"\binterface\s+([A-Za-z_$][\w$]*)\s*(?:<[^>]*>)?\s*(?:extends\s+[^{]+)?\{").unwrap()),
        (NodeKind::TypeAlias, Regex::new(r"(?m)^\s*(?:export\s+)?type\s+([A-Za-z_$][\w$]*)\s*(?:<[^>]*>)?\s*=").unwrap()),
        (NodeKind::Enum, Regex::new(r"\benum\s+([A-Za-z_$][\w$]*)\s*\{").unwrap()),
        (NodeKind::TypeAssertion, Regex::new(r"\bas\s+(?:const|string|number|boolean|any|unknown|[A-Z][\w$]*)\b|\bsatisfies\s+[A-Za-z_$]").unwrap()),
        (NodeKind::MarkupElement, Regex::new(r"(?m)(?:^|[(=?:,&|]|\breturn)\s*<[A-Za-z][\w.:-]*(?:\s[^<>]*)?/?>").unwrap()),
        (NodeKind::MarkupFragment, Regex::new(r"<>|</>").unwrap()),
        (NodeKind::Call, Regex::new(r"\b([A-Za-z_$][\w$]*(?:\.[A-Za-z_$][\w$]*)?)\s*\(").unwrap()),
    ];

    static ref CALL_KEYWORDS: HashSet<&'static str> = [
        "if", "for", "while", "switch", "catch", "function", "return", "typeof", "import",
        "super", "new", "await", "with", "do", "else", "in", "of", "void", "delete",
    ]
    .into_iter()
    .collect();
}

/// Regex-only event extraction. Never panics; unknown or binary input yields
/// an empty list.
pub fn regex_events(source: &str) -> Vec<AstEvent> {
    let mut events = Vec::new();
    for (kind, re) in REGEX_DETECTORS.iter() {
        match kind {
            NodeKind::ImportSource
            | NodeKind::Call
            | NodeKind::ClassExtends
            | NodeKind::Interface
            | NodeKind::TypeAlias
            | NodeKind::Enum => {
                for cap in re.captures_iter(source) {
                    let Some(m) = cap.get(1) else { continue };
                    let data = m.as_str();
                    if *kind == NodeKind::Call && CALL_KEYWORDS.contains(data) {
                        continue;
                    }
                    events.push(AstEvent::with_data(*kind, data));
                }
            }
            NodeKind::BlockScopedDeclaration => {
                if let Some(cap) = re.captures(source) {
                    let keyword = cap.get(1).map(|m| m.as_str()).unwrap_or("let");
                    events.push(AstEvent::with_data(*kind, keyword));
                }
            }
            _ => {
                if re.is_match(source) {
                    events.push(AstEvent::new(*kind));
                }
            }
        }
    }
    events
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXTENSION TABLE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
pub struct ExtensionInfo {
    pub language: Language,
    pub confidence: f64,
    pub requires_transpilation: bool,
}

lazy_static! {
    static ref EXTENSIONS: HashMap<&'static str, ExtensionInfo> = {
        let mut m = HashMap::new();
        let mut add = |ext: &'static str, language: Language, confidence: f64| {
            m.insert(
                ext,
                ExtensionInfo {
                    language,
                    confidence,
                    requires_transpilation: language != Language::JavaScript,
                },
            );
        };
        add("js", Language::JavaScript, 0.7);
        add("mjs", Language::JavaScript, 0.9);
        add("cjs", Language::JavaScript, 0.9);
        add("jsx", Language::Jsx, 0.9);
        add("ts", Language::TypeScript, 0.9);
        add("mts", Language::TypeScript, 0.9);
        add("cts", Language::TypeScript, 0.9);
        add("tsx", Language::Tsx, 0.95);
        m
    };
}

pub fn extension_info(filename: &str) -> Option<ExtensionInfo> {
    let ext = Path::new(filename).extension()?.to_str()?.to_ascii_lowercase();
    EXTENSIONS.get(ext.as_str()).copied()
}

/// Language guess from a filename alone.
pub fn detect_from_extension(filename: &str) -> Option<LanguageDetection> {
    extension_info(filename).map(|info| LanguageDetection {
        language: info.language,
        confidence: info.confidence,
        requires_transpilation: info.requires_transpilation,
    })
}

/// Language guess from detected features.
pub fn detect_from_content(features: &[LanguageFeature], path: DetectionPath) -> LanguageDetection {
    let typed = features
        .iter()
        .any(|f| f.requires_module == Some(ModuleId::Known(KnownModule::PresetTypescript)));
    let markup = features.iter().any(|f| f.name == MARKUP_FEATURE);
    let (language, mut confidence) = match (typed, markup) {
        (true, true) => (Language::Tsx, 0.85),
        (true, false) => (Language::TypeScript, 0.8),
        (false, true) => (Language::Jsx, 0.8),
        (false, false) => (Language::JavaScript, 0.6),
    };
    if path == DetectionPath::Regex {
        confidence *= 0.75;
    }
    LanguageDetection {
        language,
        confidence,
        requires_transpilation: language != Language::JavaScript,
    }
}

/// Merges extension and content guesses. Agreement is treated as independent
/// evidence, `1 - (1-a)(1-b)`, which is strictly above either input. On
/// disagreement the stronger guess wins, discounted by half the weaker one.
pub fn combine_language(
    extension: Option<LanguageDetection>,
    content: Option<LanguageDetection>,
) -> Option<LanguageDetection> {
    match (extension, content) {
        (Some(ext), Some(content)) if ext.language == content.language => {
            let confidence = 1.0 - (1.0 - ext.confidence) * (1.0 - content.confidence);
            Some(LanguageDetection {
                confidence,
                ..content
            })
        }
        (Some(ext), Some(content)) => {
            let (winner, loser) = if content.confidence >= ext.confidence {
                (content, ext)
            } else {
                (ext, content)
            };
            let confidence = (winner.confidence - loser.confidence * 0.5).max(0.1);
            Some(LanguageDetection {
                confidence,
                ..winner
            })
        }
        (Some(only), None) | (None, Some(only)) => Some(only),
        (None, None) => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DETECTOR
// ═══════════════════════════════════════════════════════════════════════════════

fn superset_source_type() -> SourceType {
    SourceType::default()
        .with_typescript(true)
        .with_module(true)
        .with_jsx(true)
}

#[derive(Debug, Clone, Default)]
pub struct FeatureDetector;

impl FeatureDetector {
    pub fn new() -> Self {
        FeatureDetector
    }

    /// Parses with the filename's dialect when known, then with the permissive
    /// superset. Returns `None` when neither parse is clean.
    fn ast_events(&self, source: &str, filename: Option<&str>) -> Option<Vec<AstEvent>> {
        let mut candidates = Vec::with_capacity(2);
        if let Some(st) = filename.and_then(|f| SourceType::from_path(f).ok()) {
            candidates.push(st);
        }
        let superset = superset_source_type();
        if !candidates.contains(&superset) {
            candidates.push(superset);
        }

        for source_type in candidates {
            let allocator = Allocator::default();
            let ret = Parser::new(&allocator, source, source_type).parse();
            if ret.panicked || !ret.errors.is_empty() {
                debug!(
                    errors = ret.errors.len(),
                    "parse failed for detection dialect, trying next"
                );
                continue;
            }
            return Some(EventCollector::collect(source, &ret.program));
        }
        None
    }

    /// Single entry point: events from the AST when possible, regex otherwise,
    /// then the shared reducer and framework scoring.
    pub fn detect(&self, source: &str, filename: Option<&str>) -> Detection {
        let (events, path) = match self.ast_events(source, filename) {
            Some(events) => (events, DetectionPath::Ast),
            None => (regex_events(source), DetectionPath::Regex),
        };

        let mut features = reduce_events(&events);
        let frameworks = score_frameworks(&events);

        // Markup is lowered by the strongest framework's markup module.
        if let Some(top) = frameworks.first() {
            if let Some(module) = top.required_modules.first() {
                for feature in features.iter_mut().filter(|f| f.name == MARKUP_FEATURE) {
                    feature.requires_module = Some(module.clone());
                }
            }
        }

        let content_language = if source.trim().is_empty() {
            None
        } else {
            Some(detect_from_content(&features, path))
        };
        let language = combine_language(filename.and_then(detect_from_extension), content_language);

        debug!(
            path = ?path,
            features = features.len(),
            frameworks = frameworks.len(),
            "feature detection finished"
        );

        Detection {
            features,
            frameworks,
            language,
            path,
        }
    }
}

/// One entry per required module, tagged preset or plugin by its id.
pub fn derive_dependencies(features: &[LanguageFeature]) -> Vec<DependencyInfo> {
    let mut deps: Vec<DependencyInfo> = Vec::new();
    for feature in features {
        let Some(module) = &feature.requires_module else {
            continue;
        };
        match deps.iter_mut().find(|d| &d.module == module) {
            Some(dep) => dep.features.push(feature.name.clone()),
            None => deps.push(DependencyInfo {
                module: module.clone(),
                kind: module.dependency_kind(),
                features: vec![feature.name.clone()],
            }),
        }
    }
    deps
}
