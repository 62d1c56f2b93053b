//! Printer contract and the deterministic source printer.
//!
//! The engine consumes printing through [`ProgramPrinter`] so drivers can
//! swap in a full-fidelity printer with source maps; [`CanonicalPrinter`]
//! is the built-in implementation: compact, stable output with
//! conservative parenthesization and ASCII-only identifiers.
//!
//! [`SourceMapConsumer`] is the inverse contract: resolving generated
//! positions back to original sources so diagnostics point at the
//! author's files.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ast::{
    BlockStatement, Expression, ForInTarget, ForInit, MemberKey, Program, PropertyName, Statement,
};
use crate::values::format_number;

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintOptions {
    /// Request a source map. The canonical printer does not produce one.
    pub source_map: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintedProgram {
    pub code: String,
    pub map: Option<String>,
}

impl PrintedProgram {
    /// `sha256:`-prefixed fingerprint of the printed code.
    pub fn content_hash(&self) -> String {
        let digest = Sha256::digest(self.code.as_bytes());
        format!("sha256:{}", hex::encode(digest))
    }
}

/// AST-to-source printing contract.
pub trait ProgramPrinter {
    fn print(&self, program: &Program, options: &PrintOptions) -> PrintedProgram;
}

/// A generated-position resolved back into an original source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginalPosition {
    pub source: String,
    pub line: u64,
    pub column: u64,
}

/// Source-map consumption contract: used to rewrite locations after
/// parsing so diagnostics point at the author's sources.
pub trait SourceMapConsumer {
    fn resolve(&self, line: u64, column: u64) -> Option<OriginalPosition>;
}

// ---------------------------------------------------------------------------
// CanonicalPrinter
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
pub struct CanonicalPrinter;

impl ProgramPrinter for CanonicalPrinter {
    fn print(&self, program: &Program, _options: &PrintOptions) -> PrintedProgram {
        PrintedProgram {
            code: print_program(program),
            map: None,
        }
    }
}

pub fn print_program(program: &Program) -> String {
    let mut out = String::new();
    for statement in &program.body {
        print_statement(statement, 0, &mut out);
    }
    out
}

fn indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

pub fn print_statement(statement: &Statement, depth: usize, out: &mut String) {
    match statement {
        Statement::Empty { .. } => {
            indent(depth, out);
            out.push_str(";\n");
        }
        Statement::Expression(stmt) => {
            indent(depth, out);
            let text = print_expression(&stmt.expression);
            // An expression statement must not begin with `{` or `function`.
            if text.starts_with('{') || text.starts_with("function") {
                out.push('(');
                out.push_str(&text);
                out.push(')');
            } else {
                out.push_str(&text);
            }
            out.push_str(";\n");
        }
        Statement::Variable(declaration) => {
            indent(depth, out);
            out.push_str(declaration.kind.as_str());
            out.push(' ');
            for (index, declarator) in declaration.declarators.iter().enumerate() {
                if index > 0 {
                    out.push_str(", ");
                }
                out.push_str(&declarator.name);
                if let Some(init) = &declarator.init {
                    out.push_str(" = ");
                    out.push_str(&print_expression(init));
                }
            }
            out.push_str(";\n");
        }
        Statement::Function(declaration) => {
            indent(depth, out);
            out.push_str("function ");
            out.push_str(&declaration.name);
            out.push('(');
            out.push_str(&declaration.params.join(", "));
            out.push_str(") ");
            print_block(&declaration.body, depth, out);
            out.push('\n');
        }
        Statement::Block(block) => {
            indent(depth, out);
            print_block(block, depth, out);
            out.push('\n');
        }
        Statement::If(stmt) => {
            indent(depth, out);
            out.push_str("if (");
            out.push_str(&print_expression(&stmt.test));
            out.push_str(") ");
            print_nested(&stmt.consequent, depth, out);
            if let Some(alternate) = &stmt.alternate {
                indent(depth, out);
                out.push_str("else ");
                print_nested(alternate, depth, out);
            }
        }
        Statement::While(stmt) => {
            indent(depth, out);
            out.push_str("while (");
            out.push_str(&print_expression(&stmt.test));
            out.push_str(") ");
            print_nested(&stmt.body, depth, out);
        }
        Statement::DoWhile(stmt) => {
            indent(depth, out);
            out.push_str("do ");
            print_nested(&stmt.body, depth, out);
            indent(depth, out);
            out.push_str("while (");
            out.push_str(&print_expression(&stmt.test));
            out.push_str(");\n");
        }
        Statement::For(stmt) => {
            indent(depth, out);
            out.push_str("for (");
            match &stmt.init {
                Some(ForInit::Declaration(declaration)) => {
                    out.push_str(declaration.kind.as_str());
                    out.push(' ');
                    for (index, declarator) in declaration.declarators.iter().enumerate() {
                        if index > 0 {
                            out.push_str(", ");
                        }
                        out.push_str(&declarator.name);
                        if let Some(init) = &declarator.init {
                            out.push_str(" = ");
                            out.push_str(&print_expression(init));
                        }
                    }
                }
                Some(ForInit::Expression(expr)) => out.push_str(&print_expression(expr)),
                None => {}
            }
            out.push_str("; ");
            if let Some(test) = &stmt.test {
                out.push_str(&print_expression(test));
            }
            out.push_str("; ");
            if let Some(update) = &stmt.update {
                out.push_str(&print_expression(update));
            }
            out.push_str(") ");
            print_nested(&stmt.body, depth, out);
        }
        Statement::ForIn(stmt) => {
            indent(depth, out);
            out.push_str("for (");
            match &stmt.left {
                ForInTarget::Declaration(kind, name) => {
                    out.push_str(kind.as_str());
                    out.push(' ');
                    out.push_str(name);
                }
                ForInTarget::Pattern(expr) => out.push_str(&print_expression(expr)),
            }
            out.push_str(" in ");
            out.push_str(&print_expression(&stmt.right));
            out.push_str(") ");
            print_nested(&stmt.body, depth, out);
        }
        Statement::Switch(stmt) => {
            indent(depth, out);
            out.push_str("switch (");
            out.push_str(&print_expression(&stmt.discriminant));
            out.push_str(") {\n");
            for case in &stmt.cases {
                indent(depth + 1, out);
                match &case.test {
                    Some(test) => {
                        out.push_str("case ");
                        out.push_str(&print_expression(test));
                        out.push_str(":\n");
                    }
                    None => out.push_str("default:\n"),
                }
                for inner in &case.body {
                    print_statement(inner, depth + 2, out);
                }
            }
            indent(depth, out);
            out.push_str("}\n");
        }
        Statement::Try(stmt) => {
            indent(depth, out);
            out.push_str("try ");
            print_block(&stmt.block, depth, out);
            if let Some(handler) = &stmt.handler {
                out.push_str(" catch");
                if let Some(param) = &handler.param {
                    out.push_str(" (");
                    out.push_str(param);
                    out.push(')');
                }
                out.push(' ');
                print_block(&handler.body, depth, out);
            }
            if let Some(finalizer) = &stmt.finalizer {
                out.push_str(" finally ");
                print_block(finalizer, depth, out);
            }
            out.push('\n');
        }
        Statement::Throw(stmt) => {
            indent(depth, out);
            out.push_str("throw ");
            out.push_str(&print_expression(&stmt.argument));
            out.push_str(";\n");
        }
        Statement::Return(stmt) => {
            indent(depth, out);
            out.push_str("return");
            if let Some(argument) = &stmt.argument {
                out.push(' ');
                out.push_str(&print_expression(argument));
            }
            out.push_str(";\n");
        }
        Statement::Break { label, .. } => {
            indent(depth, out);
            out.push_str("break");
            if let Some(label) = label {
                out.push(' ');
                out.push_str(label);
            }
            out.push_str(";\n");
        }
        Statement::Continue { label, .. } => {
            indent(depth, out);
            out.push_str("continue");
            if let Some(label) = label {
                out.push(' ');
                out.push_str(label);
            }
            out.push_str(";\n");
        }
        Statement::Labeled(stmt) => {
            indent(depth, out);
            out.push_str(&stmt.label);
            out.push_str(": ");
            print_nested(&stmt.body, depth, out);
        }
    }
}

fn print_block(block: &BlockStatement, depth: usize, out: &mut String) {
    out.push_str("{\n");
    for statement in &block.body {
        print_statement(statement, depth + 1, out);
    }
    indent(depth, out);
    out.push('}');
}

/// Print a nested statement (loop/if body) on its own line or inline
/// block.
fn print_nested(statement: &Statement, depth: usize, out: &mut String) {
    match statement {
        Statement::Block(block) => {
            print_block(block, depth, out);
            out.push('\n');
        }
        other => {
            out.push_str("{\n");
            print_statement(other, depth + 1, out);
            indent(depth, out);
            out.push_str("}\n");
        }
    }
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

fn is_atomic(expression: &Expression) -> bool {
    matches!(
        expression,
        Expression::Identifier { .. }
            | Expression::NumberLiteral { .. }
            | Expression::StringLiteral { .. }
            | Expression::BooleanLiteral { .. }
            | Expression::NullLiteral { .. }
            | Expression::This { .. }
            | Expression::ArrayLiteral { .. }
            | Expression::Member { .. }
            | Expression::Call { .. }
            | Expression::Raw { .. }
    )
}

pub fn print_operand(expression: &Expression) -> String {
    if is_atomic(expression) {
        print_expression(expression)
    } else {
        format!("({})", print_expression(expression))
    }
}

pub fn quote_js_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

fn is_identifier_text(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

pub fn print_expression(expression: &Expression) -> String {
    match expression {
        Expression::Identifier { name, .. } => name.clone(),
        Expression::NumberLiteral { value, .. } => {
            if value.is_sign_negative() && *value != 0.0 {
                format!("({})", format_number(*value))
            } else {
                format_number(*value)
            }
        }
        Expression::StringLiteral { value, .. } => quote_js_string(value),
        Expression::BooleanLiteral { value, .. } => value.to_string(),
        Expression::NullLiteral { .. } => "null".to_string(),
        Expression::This { .. } => "this".to_string(),
        Expression::Raw { text, .. } => text.clone(),
        Expression::ArrayLiteral { elements, .. } => {
            let parts: Vec<String> = elements
                .iter()
                .map(|element| match element {
                    Some(expr) => print_expression(expr),
                    None => String::new(),
                })
                .collect();
            format!("[{}]", parts.join(", "))
        }
        Expression::ObjectLiteral { properties, .. } => {
            let parts: Vec<String> = properties
                .iter()
                .map(|property| {
                    let key = match &property.key {
                        PropertyName::Identifier(name) => name.clone(),
                        PropertyName::StringLiteral(text) => quote_js_string(text),
                        PropertyName::NumberLiteral(n) => format_number(*n),
                        PropertyName::Computed(expr) => {
                            format!("[{}]", print_expression(expr))
                        }
                    };
                    format!("{key}: {}", print_expression(&property.value))
                })
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
        Expression::Function(function) => {
            let mut out = String::from("function");
            if let Some(name) = &function.name {
                out.push(' ');
                out.push_str(name);
            }
            out.push('(');
            out.push_str(&function.params.join(", "));
            out.push_str(") ");
            print_block(&function.body, 0, &mut out);
            out
        }
        Expression::Member { object, key, .. } => {
            let base = print_operand(object);
            match key {
                MemberKey::Static(name) => format!("{base}.{name}"),
                MemberKey::Computed(expr) => {
                    // Prefer dot access for identifier-shaped string keys.
                    if let Expression::StringLiteral { value, .. } = expr.as_ref() {
                        if is_identifier_text(value) {
                            return format!("{base}.{value}");
                        }
                    }
                    format!("{base}[{}]", print_expression(expr))
                }
            }
        }
        Expression::Call {
            callee, arguments, ..
        } => {
            let args: Vec<String> = arguments.iter().map(print_expression).collect();
            format!("{}({})", print_operand(callee), args.join(", "))
        }
        Expression::New {
            callee, arguments, ..
        } => {
            let args: Vec<String> = arguments.iter().map(print_expression).collect();
            format!("new {}({})", print_operand(callee), args.join(", "))
        }
        Expression::Unary {
            operator, argument, ..
        } => {
            let op = operator.as_str();
            if op.chars().all(|c| c.is_ascii_alphabetic()) {
                format!("{op} {}", print_operand(argument))
            } else {
                format!("{op}{}", print_operand(argument))
            }
        }
        Expression::Binary {
            operator,
            left,
            right,
            ..
        } => format!(
            "{} {} {}",
            print_operand(left),
            operator.as_str(),
            print_operand(right)
        ),
        Expression::Logical {
            operator,
            left,
            right,
            ..
        } => format!(
            "{} {} {}",
            print_operand(left),
            operator.as_str(),
            print_operand(right)
        ),
        Expression::Conditional {
            test,
            consequent,
            alternate,
            ..
        } => format!(
            "{} ? {} : {}",
            print_operand(test),
            print_operand(consequent),
            print_operand(alternate)
        ),
        Expression::Assignment {
            operator,
            target,
            value,
            ..
        } => format!(
            "{} {} {}",
            print_expression(target),
            operator.as_str(),
            print_operand(value)
        ),
        Expression::Update {
            operator,
            prefix,
            argument,
            ..
        } => {
            if *prefix {
                format!("{}{}", operator.as_str(), print_operand(argument))
            } else {
                format!("{}{}", print_operand(argument), operator.as_str())
            }
        }
        Expression::Sequence { expressions, .. } => {
            let parts: Vec<String> = expressions.iter().map(print_expression).collect();
            parts.join(", ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        ExpressionStatement, ParseGoal, SourceSpan, ThrowStatement, VariableDeclaration,
        VariableDeclarator, VariableKind,
    };

    fn span() -> SourceSpan {
        SourceSpan::synthetic()
    }

    fn ident(name: &str) -> Expression {
        Expression::Identifier {
            name: name.to_string(),
            span: span(),
        }
    }

    fn number(value: f64) -> Expression {
        Expression::NumberLiteral { value, span: span() }
    }

    #[test]
    fn prints_var_declaration() {
        let program = Program::new(
            ParseGoal::Script,
            vec![Statement::Variable(VariableDeclaration {
                kind: VariableKind::Var,
                declarators: vec![VariableDeclarator {
                    name: "x".to_string(),
                    init: Some(number(3.0)),
                    span: span(),
                }],
                span: span(),
            })],
            span(),
        );
        assert_eq!(print_program(&program), "var x = 3;\n");
    }

    #[test]
    fn prints_member_and_call_chains() {
        let expr = Expression::Call {
            callee: Box::new(Expression::Member {
                object: Box::new(ident("console")),
                key: MemberKey::Static("log".to_string()),
                span: span(),
            }),
            arguments: vec![Expression::StringLiteral {
                value: "hi".to_string(),
                span: span(),
            }],
            span: span(),
        };
        assert_eq!(print_expression(&expr), "console.log(\"hi\")");
    }

    #[test]
    fn computed_member_with_identifier_key_prints_as_dot() {
        let expr = Expression::Member {
            object: Box::new(ident("o")),
            key: MemberKey::Computed(Box::new(Expression::StringLiteral {
                value: "name".to_string(),
                span: span(),
            })),
            span: span(),
        };
        assert_eq!(print_expression(&expr), "o.name");

        let odd = Expression::Member {
            object: Box::new(ident("o")),
            key: MemberKey::Computed(Box::new(Expression::StringLiteral {
                value: "a-b".to_string(),
                span: span(),
            })),
            span: span(),
        };
        assert_eq!(print_expression(&odd), "o[\"a-b\"]");
    }

    #[test]
    fn binary_operands_are_parenthesized_conservatively() {
        let expr = Expression::Binary {
            operator: crate::ast::BinaryOp::Mul,
            left: Box::new(Expression::Binary {
                operator: crate::ast::BinaryOp::Add,
                left: Box::new(number(1.0)),
                right: Box::new(number(2.0)),
                span: span(),
            }),
            right: Box::new(number(3.0)),
            span: span(),
        };
        assert_eq!(print_expression(&expr), "(1 + 2) * 3");
    }

    #[test]
    fn throw_statement_round_trip_text() {
        let program = Program::new(
            ParseGoal::Script,
            vec![Statement::Throw(ThrowStatement {
                argument: Expression::New {
                    callee: Box::new(ident("Error")),
                    arguments: vec![Expression::StringLiteral {
                        value: "boom".to_string(),
                        span: span(),
                    }],
                    span: span(),
                },
                span: span(),
            })],
            span(),
        );
        assert_eq!(print_program(&program), "throw new Error(\"boom\");\n");
    }

    #[test]
    fn string_escaping() {
        assert_eq!(quote_js_string("a\"b\\c\nd"), "\"a\\\"b\\\\c\\nd\"");
    }

    #[test]
    fn printed_program_hash_is_stable() {
        let program = Program::new(
            ParseGoal::Script,
            vec![Statement::Expression(ExpressionStatement {
                expression: number(1.0),
                span: span(),
            })],
            span(),
        );
        let printer = CanonicalPrinter;
        let first = printer.print(&program, &PrintOptions::default());
        let second = printer.print(&program, &PrintOptions::default());
        assert_eq!(first.content_hash(), second.content_hash());
        assert!(first.content_hash().starts_with("sha256:"));
    }
}
