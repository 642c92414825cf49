//! Framework confidence scoring.
//!
//! Each profile lists the evidence that points at a framework. Scores start at
//! a base per matched import and accumulate additively per call or class that
//! matches the framework's idioms.

use lazy_static::lazy_static;
use regex::Regex;

use crate::model::FrameworkSignal;
use crate::registry::{KnownModule, ModuleId};
use crate::visitor::{AstEvent, NodeKind};

/// Frameworks at or below this score are not reported.
pub const MIN_FRAMEWORK_CONFIDENCE: f64 = 0.3;

const IMPORT_SCORE: f64 = 0.5;
const HOOK_SCORE: f64 = 0.1;
const REACTIVE_SCORE: f64 = 0.15;
const COMPONENT_SCORE: f64 = 0.2;
const MARKUP_SCORE: f64 = 0.1;

lazy_static! {
    static ref HOOK_CALL_RE: Regex = Regex::new(r"^use[A-Z][A-Za-z0-9_$]*$").unwrap();
}

pub struct FrameworkProfile {
    pub name: &'static str,
    pub import_sources: &'static [&'static str],
    /// Calls to `use*` count as evidence.
    pub hook_calls: bool,
    pub reactive_primitives: &'static [&'static str],
    pub component_factories: &'static [&'static str],
    pub component_base_classes: &'static [&'static str],
    pub markup_module: KnownModule,
}

pub static FRAMEWORK_PROFILES: &[FrameworkProfile] = &[
    FrameworkProfile {
        name: "react",
        import_sources: &["react", "react-dom", "react-dom/client", "react/jsx-runtime"],
        hook_calls: true,
        reactive_primitives: &[],
        component_factories: &[
            "React.createElement",
            "createElement",
            "React.forwardRef",
            "forwardRef",
            "React.memo",
            "memo",
            "createRoot",
            "ReactDOM.createRoot",
            "ReactDOM.render",
        ],
        component_base_classes: &[
            "React.Component",
            "React.PureComponent",
            "Component",
            "PureComponent",
        ],
        markup_module: KnownModule::PresetReact,
    },
    FrameworkProfile {
        name: "preact",
        import_sources: &["preact", "preact/hooks", "preact/compat", "@preact/signals"],
        hook_calls: true,
        reactive_primitives: &["signal", "computed"],
        component_factories: &["h", "render"],
        component_base_classes: &["Component"],
        markup_module: KnownModule::PresetReact,
    },
    FrameworkProfile {
        name: "solid",
        import_sources: &["solid-js", "solid-js/web", "solid-js/store"],
        hook_calls: false,
        reactive_primitives: &[
            "createSignal",
            "createEffect",
            "createMemo",
            "createResource",
            "createStore",
        ],
        component_factories: &["render", "lazy"],
        component_base_classes: &[],
        markup_module: KnownModule::PresetSolid,
    },
    FrameworkProfile {
        name: "vue",
        import_sources: &["vue", "@vue/runtime-dom", "@vue/reactivity"],
        hook_calls: false,
        reactive_primitives: &["ref", "reactive", "computed", "watch", "watchEffect"],
        component_factories: &["defineComponent", "createApp", "Vue.createApp"],
        component_base_classes: &[],
        markup_module: KnownModule::PluginVueJsx,
    },
];

impl FrameworkProfile {
    fn matches_import(&self, source: &str) -> bool {
        self.import_sources.iter().any(|s| *s == source)
    }

    pub fn required_modules(&self) -> Vec<ModuleId> {
        vec![ModuleId::Known(self.markup_module)]
    }

    pub fn score(&self, events: &[AstEvent]) -> f64 {
        let mut imported = false;
        let mut score = 0.0;
        let mut has_markup = false;

        for event in events {
            let data = event.node_data.as_deref().unwrap_or("");
            match event.node_kind {
                NodeKind::ImportSource if self.matches_import(data) => {
                    if !imported {
                        score += IMPORT_SCORE;
                        imported = true;
                    }
                }
                NodeKind::Call => {
                    let bare = data.rsplit('.').next().unwrap_or(data);
                    if self.hook_calls && HOOK_CALL_RE.is_match(bare) {
                        score += HOOK_SCORE;
                    } else if self.reactive_primitives.contains(&bare) {
                        score += REACTIVE_SCORE;
                    } else if self.component_factories.contains(&data) {
                        score += COMPONENT_SCORE;
                    }
                }
                NodeKind::ClassExtends if self.component_base_classes.contains(&data) => {
                    score += COMPONENT_SCORE;
                }
                NodeKind::MarkupElement | NodeKind::MarkupFragment => has_markup = true,
                _ => {}
            }
        }

        // Markup only corroborates other evidence; on its own it says nothing
        // about which framework renders it.
        if has_markup && score > 0.0 {
            score += MARKUP_SCORE;
        }
        // Without an import, a framework has to earn its place through usage.
        if !imported {
            score *= 0.75;
        }
        score.min(1.0)
    }
}

/// Scores every known framework and returns those above the threshold,
/// strongest first.
pub fn score_frameworks(events: &[AstEvent]) -> Vec<FrameworkSignal> {
    let mut signals: Vec<FrameworkSignal> = FRAMEWORK_PROFILES
        .iter()
        .map(|profile| FrameworkSignal {
            framework_name: profile.name.to_string(),
            confidence: profile.score(events),
            required_modules: profile.required_modules(),
        })
        .filter(|s| s.confidence > MIN_FRAMEWORK_CONFIDENCE)
        .collect();
    signals.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    signals
}

pub fn profile(name: &str) -> Option<&'static FrameworkProfile> {
    FRAMEWORK_PROFILES.iter().find(|p| p.name == name)
}
