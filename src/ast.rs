//! Parse / print boundary over the `glsl` crate.
//!
//! Every syntax tree in the linker is a `glsl::syntax` value owned by exactly one node
//! context; nothing else in the crate talks to the parser or printer directly.

pub mod visit;

use glsl::parser::Parse;
use glsl::syntax::{Declaration, Expr, ExternalDeclaration, PrecisionQualifier, Statement, TranslationUnit};
use glsl::transpiler::glsl as printer;

pub use visit::{Flow, walk_exprs, walk_exprs_mut};

pub fn parse_program(source: &str) -> Result<TranslationUnit, String> {
    // Directives must be newline-terminated for the parser.
    let mut text = source.trim_start().to_string();
    if !text.ends_with('\n') {
        text.push('\n');
    }
    TranslationUnit::parse(text.as_str()).map_err(|e| e.info)
}

pub fn parse_expression(source: &str) -> Result<Expr, String> {
    let source = source.trim();
    whole(source, glsl::parsers::expr(source))
}

pub fn parse_statement(source: &str) -> Result<Statement, String> {
    let source = source.trim();
    whole(source, glsl::parsers::statement(source))
}

/// Rejects input a fragment parser left unconsumed.
fn whole<T, E: std::fmt::Display>(source: &str, parsed: Result<(&str, T), E>) -> Result<T, String> {
    match parsed {
        Ok((rest, value)) => match rest.trim() {
            "" => Ok(value),
            rest => Err(format!("unexpected trailing input `{rest}`")),
        },
        Err(e) => Err(format!("cannot parse `{source}`: {e}")),
    }
}

/// Parses source that holds top-level declarations and returns them unwrapped.
pub fn parse_declarations(source: &str) -> Result<Vec<ExternalDeclaration>, String> {
    parse_program(source).map(|tu| (tu.0).0)
}

pub fn generate_program(tu: &TranslationUnit) -> String {
    let mut out = String::new();
    for decl in &(tu.0).0 {
        show_declaration(&mut out, decl);
    }
    out
}

pub fn generate_declaration(decl: &ExternalDeclaration) -> String {
    let mut out = String::new();
    show_declaration(&mut out, decl);
    out
}

/// The `glsl` printer omits the `precision` keyword, so default precision statements are
/// printed here.
fn show_declaration(out: &mut String, decl: &ExternalDeclaration) {
    match decl {
        ExternalDeclaration::Declaration(Declaration::Precision(qualifier, ty)) => {
            let qualifier = match qualifier {
                PrecisionQualifier::High => "highp",
                PrecisionQualifier::Medium => "mediump",
                PrecisionQualifier::Low => "lowp",
            };
            out.push_str("precision ");
            out.push_str(qualifier);
            out.push(' ');
            printer::show_type_specifier(out, ty);
            out.push_str(";\n");
        }
        other => printer::show_external_declaration(out, other),
    }
}

pub fn generate_expression(expr: &Expr) -> String {
    let mut out = String::new();
    printer::show_expr(&mut out, expr);
    out
}

/// Builds a translation unit from already-ordered declarations.
pub fn program_from(decls: Vec<ExternalDeclaration>) -> TranslationUnit {
    TranslationUnit(glsl::syntax::NonEmpty(decls))
}
