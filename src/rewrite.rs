//! Degraded source rewrites.
//!
//! Each rule is a named, deterministic, lossy text rewrite for one construct a
//! backend commonly rejects. A rule only runs when the failure message points
//! at its construct, and every applied rule contributes exactly one warning.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::error::RecoveryResult;

lazy_static! {
    static ref OPTIONAL_CHAIN_RE: Regex = Regex::new(concat!(
        r"[A-Za-z_$][\w$]*",
        r"(?:\.[A-Za-z_$][\w$]*|\([^()]*\)|\[[^\[\]]*\]",
        r"|\?\.(?:[A-Za-z_$][\w$]*|\([^()]*\)|\[[^\[\]]*\]))*",
        r"\?\.(?:[A-Za-z_$][\w$]*|\([^()]*\)|\[[^\[\]]*\])",
        r"(?:\.[A-Za-z_$][\w$]*|\([^()]*\)|\[[^\[\]]*\]",
        r"|\?\.(?:[A-Za-z_$][\w$]*|\([^()]*\)|\[[^\[\]]*\]))*",
    ))
    .unwrap();
    static ref CHAIN_SEGMENT_RE: Regex =
        Regex::new(r"(\?\.|\.)?([A-Za-z_$][\w$]*|\([^()]*\)|\[[^\[\]]*\])").unwrap();
    static ref NULLISH_RE: Regex = Regex::new(concat!(
        r#"((?:\([^()]*\)|"(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'|-?\d[\w.]*|[A-Za-z_$][\w$]*"#,
        r"|\[[^\[\]]*\]|\{\})",
        r"(?:\.[A-Za-z_$][\w$]*|\([^()]*\)|\[[^\[\]]*\])*)",
        r"\s*\?\?\s*",
        r#"((?:\([^()]*\)|"(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'|-?\d[\w.]*|[A-Za-z_$][\w$]*"#,
        r"|\[[^\[\]]*\]|\{\})",
        r"(?:\.[A-Za-z_$][\w$]*|\([^()]*\)|\[[^\[\]]*\])*)",
    ))
    .unwrap();
    static ref DECLARATION_RE: Regex = Regex::new(r"\b(?:const|let)(\s+)").unwrap();
    static ref ARROW_HEAD_RE: Regex =
        Regex::new(r"(?:\(([^()]*)\)|\b([A-Za-z_$][\w$]*))\s*=>\s*").unwrap();

    static ref OPTIONAL_LEFT_RE: Regex = Regex::new(r"\?\.[^\d]").unwrap();
    static ref NULLISH_LEFT_RE: Regex = Regex::new(r"\?\?(?:[^=]|$)").unwrap();
    static ref ARROW_LEFT_RE: Regex = Regex::new(r"=>").unwrap();

    static ref OPTIONAL_TRIGGER_RE: Regex = Regex::new(
        r"(?i)optional chain|\?\.|unexpected token '?\??\.'?|unexpected token '?\?'?"
    )
    .unwrap();
    static ref NULLISH_TRIGGER_RE: Regex =
        Regex::new(r"(?i)nullish|\?\?|unexpected token '?\?'?").unwrap();
    static ref DECLARATION_TRIGGER_RE: Regex = Regex::new(
        r"(?i)\b(?:const|let)\b|block-scoped|strict mode reserved word"
    )
    .unwrap();
    static ref ARROW_TRIGGER_RE: Regex = Regex::new(r"(?i)arrow|=>").unwrap();
}

const MAX_NULLISH_PASSES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RewriteRule {
    OptionalMemberAccess,
    NullishCoalescing,
    DeclarationKeywords,
    ArrowFunctions,
}

impl RewriteRule {
    /// Application order. Optional access runs before nullish coalescing so a
    /// guard chain can become the parenthesized left operand of `??`.
    pub const ALL: [RewriteRule; 4] = [
        RewriteRule::OptionalMemberAccess,
        RewriteRule::NullishCoalescing,
        RewriteRule::DeclarationKeywords,
        RewriteRule::ArrowFunctions,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RewriteRule::OptionalMemberAccess => "optional-member-access",
            RewriteRule::NullishCoalescing => "nullish-coalescing",
            RewriteRule::DeclarationKeywords => "declaration-keywords",
            RewriteRule::ArrowFunctions => "arrow-functions",
        }
    }

    pub fn is_triggered_by(&self, message: &str) -> bool {
        match self {
            RewriteRule::OptionalMemberAccess => OPTIONAL_TRIGGER_RE.is_match(message),
            RewriteRule::NullishCoalescing => NULLISH_TRIGGER_RE.is_match(message),
            RewriteRule::DeclarationKeywords => DECLARATION_TRIGGER_RE.is_match(message),
            RewriteRule::ArrowFunctions => ARROW_TRIGGER_RE.is_match(message),
        }
    }

    pub fn warning(&self) -> &'static str {
        match self {
            RewriteRule::OptionalMemberAccess => {
                "Optional member access rewritten to && guards; falsy values such as 0 or '' now \
                 short-circuit and calls inside the chain repeat in every guard"
            }
            RewriteRule::NullishCoalescing => {
                "Nullish coalescing rewritten to an explicit null/undefined check; the left \
                 operand is evaluated more than once"
            }
            RewriteRule::DeclarationKeywords => {
                "const/let rewritten to var; block scoping and reassignment checks are lost"
            }
            RewriteRule::ArrowFunctions => {
                "Arrow functions rewritten to function expressions; lexical this and arguments are \
                 not preserved"
            }
        }
    }

    /// Rewritten text, or `None` when the construct does not occur in code or
    /// an occurrence cannot be rewritten without changing its meaning.
    pub fn rewrite(&self, source: &str) -> Option<String> {
        match self {
            RewriteRule::OptionalMemberAccess => rewrite_optional_access(source),
            RewriteRule::NullishCoalescing => rewrite_nullish(source),
            RewriteRule::DeclarationKeywords => rewrite_declarations(source),
            RewriteRule::ArrowFunctions => rewrite_arrows(source),
        }
    }
}

/// Runs every rule the failure message triggers, in order. `None` when no
/// rule changed the text.
pub fn apply_rules(source: &str, message: &str) -> Option<RecoveryResult> {
    let mut text = source.to_string();
    let mut warnings = Vec::new();
    for rule in RewriteRule::ALL {
        if !rule.is_triggered_by(message) {
            continue;
        }
        if let Some(rewritten) = rule.rewrite(&text) {
            text = rewritten;
            warnings.push(rule.warning().to_string());
        }
    }
    if warnings.is_empty() {
        None
    } else {
        Some(RecoveryResult {
            lowered_text: text,
            warnings,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RULES
// ═══════════════════════════════════════════════════════════════════════════════

/// Source text with the byte ranges of string literals, template literals and
/// comments, so rules only touch code.
struct Code<'s> {
    text: &'s str,
    literals: Vec<Range<usize>>,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

impl<'s> Code<'s> {
    fn new(text: &'s str) -> Self {
        let bytes = text.as_bytes();
        let mut literals = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            let start = i;
            match bytes[i] {
                quote @ (b'\'' | b'"' | b'`') => {
                    i += 1;
                    while i < bytes.len() && bytes[i] != quote {
                        if bytes[i] == b'\\' {
                            i += 1;
                        }
                        i += 1;
                    }
                    i = (i + 1).min(bytes.len());
                }
                b'/' if bytes.get(i + 1) == Some(&b'/') => {
                    i = text[i..].find('\n').map_or(bytes.len(), |p| i + p);
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    i = text[i + 2..].find("*/").map_or(bytes.len(), |p| i + p + 4);
                }
                _ => {
                    i += 1;
                    continue;
                }
            }
            literals.push(start..i);
        }
        Self { text, literals }
    }

    /// The literal or comment `pos` falls strictly inside. An opening quote
    /// itself still counts as code.
    fn literal_at(&self, pos: usize) -> Option<&Range<usize>> {
        self.literals.iter().find(|r| r.start < pos && pos < r.end)
    }

    fn occurs(&self, re: &Regex) -> bool {
        re.find_iter(self.text)
            .any(|m| self.literal_at(m.start()).is_none())
    }

    fn before(&self, pos: usize) -> &'s str {
        self.text[..pos].trim_end()
    }

    fn prev_char(&self, pos: usize) -> Option<char> {
        self.before(pos).chars().next_back()
    }

    fn prev_word(&self, pos: usize) -> &'s str {
        let before = self.before(pos);
        &before[before.trim_end_matches(is_ident_char).len()..]
    }

    /// Next non-whitespace character at or after `pos`, and whether a line
    /// break was skipped to reach it.
    fn next_char(&self, pos: usize) -> (Option<char>, bool) {
        let after = &self.text[pos..];
        let trimmed = after.trim_start();
        let newline = after[..after.len() - trimmed.len()].contains('\n');
        (trimmed.chars().next(), newline)
    }

    /// Rewrites every match of `re` that starts in code. `None` from
    /// `replace` abandons the whole rewrite. Returns the text and the number
    /// of replacements.
    fn replace<F>(&self, re: &Regex, mut replace: F) -> Option<(String, usize)>
    where
        F: FnMut(&Captures<'_>) -> Option<String>,
    {
        let mut out = String::with_capacity(self.text.len());
        let mut last = 0;
        let mut pos = 0;
        let mut count = 0;
        while let Some(caps) = re.captures_at(self.text, pos) {
            let whole = caps.get(0)?;
            if let Some(literal) = self.literal_at(whole.start()) {
                pos = literal.end;
                continue;
            }
            out.push_str(&self.text[last..whole.start()]);
            out.push_str(&replace(&caps)?);
            count += 1;
            last = whole.end();
            pos = whole.end();
        }
        out.push_str(&self.text[last..]);
        Some((out, count))
    }
}

/// `a?.b.c?.d()` becomes `(a && a.b.c && a.b.c.d())`.
fn guard_chain(chain: &str) -> String {
    let base_end = chain.find(['.', '?', '(', '[']).unwrap_or(chain.len());
    let mut current = chain[..base_end].to_string();
    let mut guards = Vec::new();
    for cap in CHAIN_SEGMENT_RE.captures_iter(&chain[base_end..]) {
        let accessor = cap.get(1).map(|m| m.as_str());
        let segment = &cap[2];
        if accessor == Some("?.") {
            guards.push(current.clone());
        }
        if accessor.is_some() && !segment.starts_with(['(', '[']) {
            current.push('.');
        }
        current.push_str(segment);
    }
    guards.push(current);
    format!("({})", guards.join(" && "))
}

/// A chain is only rewritten when it is a whole operand: not the tail of a
/// longer member expression, not a `new`/`delete` target, and not followed by
/// a call, index or tagged template the pattern could not absorb.
fn chain_is_whole(code: &Code<'_>, start: usize, end: usize) -> bool {
    if code.prev_char(start) == Some('.') || matches!(code.prev_word(start), "new" | "delete") {
        return false;
    }
    !matches!(code.next_char(end).0, Some('(' | '[' | '`'))
}

fn rewrite_optional_access(source: &str) -> Option<String> {
    let code = Code::new(source);
    let (text, count) = code.replace(&OPTIONAL_CHAIN_RE, |caps| {
        let chain = caps.get(0)?;
        chain_is_whole(&code, chain.start(), chain.end()).then(|| guard_chain(chain.as_str()))
    })?;
    if count == 0 || Code::new(&text).occurs(&OPTIONAL_LEFT_RE) {
        return None;
    }
    Some(text)
}

/// Whether nothing to the left of `pos` binds tighter than `??`.
fn left_operand_is_whole(code: &Code<'_>, pos: usize) -> bool {
    match code.prev_char(pos) {
        None => true,
        Some('>') => code.before(pos).ends_with("=>"),
        Some('=') => {
            let before = code.before(pos);
            !matches!(
                before[..before.len() - 1].chars().next_back(),
                Some('=' | '!' | '<' | '>')
            )
        }
        Some(c) if is_ident_char(c) => matches!(code.prev_word(pos), "return" | "yield"),
        Some(c) => "(,:[{;?|&".contains(c),
    }
}

/// Whether nothing to the right of `pos` binds tighter than `??`.
fn right_operand_is_whole(code: &Code<'_>, pos: usize) -> bool {
    match code.next_char(pos) {
        (None, _) => true,
        (Some(c), _) if ";)]},:?".contains(c) => true,
        (Some(c), newline) => newline && !".([`".contains(c) && !is_operator_char(c),
    }
}

fn is_operator_char(c: char) -> bool {
    "+-*/%<>=!&|^".contains(c)
}

fn rewrite_nullish(source: &str) -> Option<String> {
    let mut text = source.to_string();
    let mut changed = false;
    for _ in 0..MAX_NULLISH_PASSES {
        let code = Code::new(&text);
        let (next, count) = code.replace(&NULLISH_RE, |caps| {
            let whole = caps.get(0)?;
            if !left_operand_is_whole(&code, whole.start())
                || !right_operand_is_whole(&code, whole.end())
            {
                return None;
            }
            Some(format!(
                "({l} !== null && {l} !== undefined ? {l} : {r})",
                l = &caps[1],
                r = &caps[2]
            ))
        })?;
        if count == 0 {
            break;
        }
        text = next;
        changed = true;
    }
    if !changed || Code::new(&text).occurs(&NULLISH_LEFT_RE) {
        return None;
    }
    Some(text)
}

fn rewrite_declarations(source: &str) -> Option<String> {
    let (text, count) =
        Code::new(source).replace(&DECLARATION_RE, |caps| Some(format!("var{}", &caps[1])))?;
    (count > 0).then_some(text)
}

/// Byte offset where an arrow's expression body ends: the first `,` `;` `\n`
/// or unmatched closing bracket outside nested brackets and string literals.
fn expression_end(body: &str) -> usize {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' if depth == 0 => return i,
            ')' | ']' | '}' => depth -= 1,
            ',' | ';' | '\n' if depth == 0 => return i,
            _ => {}
        }
    }
    body.len()
}

/// Rewrites every arrow in `source`. Expression bodies are lowered
/// recursively before they are wrapped; block bodies are scanned in place.
fn lower_arrows(source: &str) -> String {
    let code = Code::new(source);
    let mut out = String::with_capacity(source.len() + 32);
    let mut last = 0;
    let mut pos = 0;

    while let Some(caps) = ARROW_HEAD_RE.captures_at(source, pos) {
        let Some(head) = caps.get(0) else { break };
        if let Some(literal) = code.literal_at(head.start()) {
            pos = literal.end;
            continue;
        }
        let params = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().trim())
            .unwrap_or("");
        out.push_str(&source[last..head.start()]);
        let after = &source[head.end()..];

        if after.starts_with('{') {
            out.push_str(&format!("function({}) ", params));
            last = head.end();
        } else {
            let body = after[..expression_end(after)].trim_end();
            out.push_str(&format!(
                "function({}) {{ return {}; }}",
                params,
                lower_arrows(body)
            ));
            last = head.end() + body.len();
        }
        pos = last;
    }
    out.push_str(&source[last..]);
    out
}

fn rewrite_arrows(source: &str) -> Option<String> {
    let text = lower_arrows(source);
    if text == source || Code::new(&text).occurs(&ARROW_LEFT_RE) {
        return None;
    }
    Some(text)
}
