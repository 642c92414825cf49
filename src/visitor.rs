use oxc_ast::ast::*;
use oxc_ast_visit::{walk, Visit};
use oxc_syntax::operator::{AssignmentOperator, BinaryOperator, LogicalOperator};
use oxc_syntax::scope::ScopeFlags;
use serde::{Deserialize, Serialize};

/// Node kinds the detector cares about. Both the AST traversal and the regex
/// fallback speak this vocabulary so a single reducer serves both paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    OptionalChain,
    NullishCoalescing,
    LogicalAssignment,
    Exponentiation,
    ClassField,
    PrivateMember,
    StaticBlock,
    Decorator,
    AsyncFunction,
    AsyncGenerator,
    TopLevelAwait,
    ForAwait,
    ObjectSpread,
    ObjectRest,
    ArrowFunction,
    TemplateLiteral,
    BlockScopedDeclaration,
    Class,
    ClassExtends,
    BigInt,
    NumericSeparator,
    DynamicImport,
    ImportMeta,
    ModuleSyntax,
    ImportSource,
    TypeAnnotation,
    Interface,
    TypeAlias,
    Enum,
    TypeAssertion,
    MarkupElement,
    MarkupFragment,
    Call,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AstEvent {
    pub node_kind: NodeKind,
    pub node_data: Option<String>,
}

impl AstEvent {
    pub fn new(node_kind: NodeKind) -> Self {
        Self {
            node_kind,
            node_data: None,
        }
    }

    pub fn with_data(node_kind: NodeKind, data: impl Into<String>) -> Self {
        Self {
            node_kind,
            node_data: Some(data.into()),
        }
    }
}

/// Walks a parsed program once and records a flat list of events.
///
/// The collector never decides what an event means; that is the reducer's job.
pub struct EventCollector<'s> {
    source: &'s str,
    function_depth: u32,
    pub events: Vec<AstEvent>,
}

impl<'s> EventCollector<'s> {
    pub fn new(source: &'s str) -> Self {
        Self {
            source,
            function_depth: 0,
            events: Vec::new(),
        }
    }

    pub fn collect(source: &'s str, program: &Program<'_>) -> Vec<AstEvent> {
        let mut collector = EventCollector::new(source);
        collector.visit_program(program);
        collector.events
    }

    fn push(&mut self, kind: NodeKind) {
        self.events.push(AstEvent::new(kind));
    }

    fn push_data(&mut self, kind: NodeKind, data: impl Into<String>) {
        self.events.push(AstEvent::with_data(kind, data));
    }

    fn slice(&self, span: oxc_span::Span) -> &'s str {
        self.source
            .get(span.start as usize..span.end as usize)
            .unwrap_or("")
    }
}

fn expression_name(expr: &Expression<'_>) -> Option<String> {
    match expr {
        Expression::Identifier(ident) => Some(ident.name.to_string()),
        Expression::StaticMemberExpression(member) => match &member.object {
            Expression::Identifier(object) => {
                Some(format!("{}.{}", object.name, member.property.name))
            }
            _ => Some(member.property.name.to_string()),
        },
        _ => None,
    }
}

impl<'a, 's> Visit<'a> for EventCollector<'s> {
    fn visit_chain_expression(&mut self, it: &ChainExpression<'a>) {
        self.push(NodeKind::OptionalChain);
        walk::walk_chain_expression(self, it);
    }

    fn visit_logical_expression(&mut self, it: &LogicalExpression<'a>) {
        if it.operator == LogicalOperator::Coalesce {
            self.push(NodeKind::NullishCoalescing);
        }
        walk::walk_logical_expression(self, it);
    }

    fn visit_assignment_expression(&mut self, it: &AssignmentExpression<'a>) {
        match it.operator {
            AssignmentOperator::LogicalAnd
            | AssignmentOperator::LogicalOr
            | AssignmentOperator::LogicalNullish => self.push(NodeKind::LogicalAssignment),
            AssignmentOperator::Exponential => self.push(NodeKind::Exponentiation),
            _ => {}
        }
        walk::walk_assignment_expression(self, it);
    }

    fn visit_binary_expression(&mut self, it: &BinaryExpression<'a>) {
        if it.operator == BinaryOperator::Exponential {
            self.push(NodeKind::Exponentiation);
        }
        walk::walk_binary_expression(self, it);
    }

    fn visit_property_definition(&mut self, it: &PropertyDefinition<'a>) {
        self.push(NodeKind::ClassField);
        walk::walk_property_definition(self, it);
    }

    fn visit_private_identifier(&mut self, it: &PrivateIdentifier<'a>) {
        self.push_data(NodeKind::PrivateMember, it.name.to_string());
    }

    fn visit_static_block(&mut self, it: &StaticBlock<'a>) {
        self.push(NodeKind::StaticBlock);
        walk::walk_static_block(self, it);
    }

    fn visit_decorator(&mut self, it: &Decorator<'a>) {
        self.push(NodeKind::Decorator);
        walk::walk_decorator(self, it);
    }

    fn visit_function(&mut self, it: &Function<'a>, flags: ScopeFlags) {
        if it.r#async && it.generator {
            self.push(NodeKind::AsyncGenerator);
        } else if it.r#async {
            self.push(NodeKind::AsyncFunction);
        }
        self.function_depth += 1;
        walk::walk_function(self, it, flags);
        self.function_depth -= 1;
    }

    fn visit_arrow_function_expression(&mut self, it: &ArrowFunctionExpression<'a>) {
        self.push(NodeKind::ArrowFunction);
        if it.r#async {
            self.push(NodeKind::AsyncFunction);
        }
        self.function_depth += 1;
        walk::walk_arrow_function_expression(self, it);
        self.function_depth -= 1;
    }

    fn visit_await_expression(&mut self, it: &AwaitExpression<'a>) {
        if self.function_depth == 0 {
            self.push(NodeKind::TopLevelAwait);
        }
        walk::walk_await_expression(self, it);
    }

    fn visit_for_of_statement(&mut self, it: &ForOfStatement<'a>) {
        if it.r#await {
            self.push(NodeKind::ForAwait);
        }
        walk::walk_for_of_statement(self, it);
    }

    fn visit_object_expression(&mut self, it: &ObjectExpression<'a>) {
        if it
            .properties
            .iter()
            .any(|p| matches!(p, ObjectPropertyKind::SpreadProperty(_)))
        {
            self.push(NodeKind::ObjectSpread);
        }
        walk::walk_object_expression(self, it);
    }

    fn visit_object_pattern(&mut self, it: &ObjectPattern<'a>) {
        if it.rest.is_some() {
            self.push(NodeKind::ObjectRest);
        }
        walk::walk_object_pattern(self, it);
    }

    fn visit_template_literal(&mut self, it: &TemplateLiteral<'a>) {
        self.push(NodeKind::TemplateLiteral);
        walk::walk_template_literal(self, it);
    }

    fn visit_variable_declaration(&mut self, it: &VariableDeclaration<'a>) {
        match it.kind {
            VariableDeclarationKind::Let => self.push_data(NodeKind::BlockScopedDeclaration, "let"),
            VariableDeclarationKind::Const => {
                self.push_data(NodeKind::BlockScopedDeclaration, "const")
            }
            _ => {}
        }
        walk::walk_variable_declaration(self, it);
    }

    fn visit_class(&mut self, it: &Class<'a>) {
        self.push(NodeKind::Class);
        if let Some(name) = it.super_class.as_ref().and_then(expression_name) {
            self.push_data(NodeKind::ClassExtends, name);
        }
        walk::walk_class(self, it);
    }

    fn visit_big_int_literal(&mut self, it: &BigIntLiteral<'a>) {
        self.push(NodeKind::BigInt);
        if self.slice(it.span).contains('_') {
            self.push(NodeKind::NumericSeparator);
        }
    }

    fn visit_numeric_literal(&mut self, it: &NumericLiteral<'a>) {
        if self.slice(it.span).contains('_') {
            self.push(NodeKind::NumericSeparator);
        }
    }

    fn visit_import_expression(&mut self, it: &ImportExpression<'a>) {
        self.push(NodeKind::DynamicImport);
        walk::walk_import_expression(self, it);
    }

    fn visit_meta_property(&mut self, it: &MetaProperty<'a>) {
        if it.meta.name == "import" {
            self.push(NodeKind::ImportMeta);
        }
    }

    fn visit_import_declaration(&mut self, it: &ImportDeclaration<'a>) {
        self.push(NodeKind::ModuleSyntax);
        self.push_data(NodeKind::ImportSource, it.source.value.to_string());
        walk::walk_import_declaration(self, it);
    }

    fn visit_export_named_declaration(&mut self, it: &ExportNamedDeclaration<'a>) {
        self.push(NodeKind::ModuleSyntax);
        walk::walk_export_named_declaration(self, it);
    }

    fn visit_export_default_declaration(&mut self, it: &ExportDefaultDeclaration<'a>) {
        self.push(NodeKind::ModuleSyntax);
        walk::walk_export_default_declaration(self, it);
    }

    fn visit_export_all_declaration(&mut self, it: &ExportAllDeclaration<'a>) {
        self.push(NodeKind::ModuleSyntax);
        walk::walk_export_all_declaration(self, it);
    }

    fn visit_ts_type_annotation(&mut self, it: &TSTypeAnnotation<'a>) {
        self.push(NodeKind::TypeAnnotation);
        walk::walk_ts_type_annotation(self, it);
    }

    fn visit_ts_interface_declaration(&mut self, it: &TSInterfaceDeclaration<'a>) {
        self.push_data(NodeKind::Interface, it.id.name.to_string());
        walk::walk_ts_interface_declaration(self, it);
    }

    fn visit_ts_type_alias_declaration(&mut self, it: &TSTypeAliasDeclaration<'a>) {
        self.push_data(NodeKind::TypeAlias, it.id.name.to_string());
        walk::walk_ts_type_alias_declaration(self, it);
    }

    fn visit_ts_enum_declaration(&mut self, it: &TSEnumDeclaration<'a>) {
        self.push_data(NodeKind::Enum, it.id.name.to_string());
        walk::walk_ts_enum_declaration(self, it);
    }

    fn visit_ts_as_expression(&mut self, it: &TSAsExpression<'a>) {
        self.push(NodeKind::TypeAssertion);
        walk::walk_ts_as_expression(self, it);
    }

    fn visit_ts_satisfies_expression(&mut self, it: &TSSatisfiesExpression<'a>) {
        self.push(NodeKind::TypeAssertion);
        walk::walk_ts_satisfies_expression(self, it);
    }

    fn visit_ts_non_null_expression(&mut self, it: &TSNonNullExpression<'a>) {
        self.push(NodeKind::TypeAssertion);
        walk::walk_ts_non_null_expression(self, it);
    }

    fn visit_jsx_element(&mut self, it: &JSXElement<'a>) {
        self.push(NodeKind::MarkupElement);
        walk::walk_jsx_element(self, it);
    }

    fn visit_jsx_fragment(&mut self, it: &JSXFragment<'a>) {
        self.push(NodeKind::MarkupFragment);
        walk::walk_jsx_fragment(self, it);
    }

    fn visit_call_expression(&mut self, it: &CallExpression<'a>) {
        if let Some(name) = expression_name(&it.callee) {
            self.push_data(NodeKind::Call, name);
        }
        walk::walk_call_expression(self, it);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxc_allocator::Allocator;
    use oxc_parser::Parser;
    use oxc_span::SourceType;

    fn events_for(code: &str) -> Vec<AstEvent> {
        let allocator = Allocator::default();
        let source_type = SourceType::default()
            .with_typescript(true)
            .with_module(true)
            .with_jsx(true);
        let ret = Parser::new(&allocator, code, source_type).parse();
        assert!(ret.errors.is_empty(), "unexpected parse errors: {:?}", ret.errors);
        EventCollector::collect(code, &ret.program)
    }

    fn kinds(events: &[AstEvent]) -> Vec<NodeKind> {
        events.iter().map(|e| e.node_kind).collect()
    }

    #[test]
    fn test_optional_chain_and_coalesce() {
        let k = kinds(&events_for("const v = a?.b ?? c;"));
        assert!(k.contains(&NodeKind::OptionalChain));
        assert!(k.contains(&NodeKind::NullishCoalescing));
        assert!(k.contains(&NodeKind::BlockScopedDeclaration));
    }

    #[test]
    fn test_top_level_await_only_outside_functions() {
        let k = kinds(&events_for("async function f() { await g(); }"));
        assert!(k.contains(&NodeKind::AsyncFunction));
        assert!(!k.contains(&NodeKind::TopLevelAwait));

        let k = kinds(&events_for("const data = await fetch('/x');"));
        assert!(k.contains(&NodeKind::TopLevelAwait));
    }

    #[test]
    fn test_call_and_import_data_is_recorded() {
        let events = events_for(
            "import { useState } from 'react';\n\
             const [n, setN] = useState(0);\n\
             React.createElement('div');",
        );
        assert!(events.contains(&AstEvent::with_data(NodeKind::ImportSource, "react")));
        assert!(events.contains(&AstEvent::with_data(NodeKind::Call, "useState")));
        assert!(events.contains(&AstEvent::with_data(
            NodeKind::Call,
            "React.createElement"
        )));
    }

    #[test]
    fn test_numeric_separator_uses_source_text() {
        let k = kinds(&events_for("const big = 1_000_000;"));
        assert!(k.contains(&NodeKind::NumericSeparator));
        let k = kinds(&events_for("const small = 1000;"));
        assert!(!k.contains(&NodeKind::NumericSeparator));
    }
}
