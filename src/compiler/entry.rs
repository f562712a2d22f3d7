//! Turns a node's side-effecting `main` into a `vec4`-returning function.

use glsl::syntax::{
    Declaration, Expr, ExternalDeclaration, FullySpecifiedType, Identifier, IterationStatement, JumpStatement,
    SelectionRestStatement, SimpleStatement, Statement, StorageQualifier, TranslationUnit, TypeSpecifier,
    TypeSpecifierNonArray,
};
use glsl::visitor::Host;

use crate::ast::{self, Flow, walk_exprs, walk_exprs_mut};
use crate::compiler::sections::has_storage;
use crate::dsl::Stage;
use crate::error::NodeError;

/// Function-local variable that replaces a node's output inside its entry function.
pub const ENTRY_RESULT: &str = "entryResult";

/// The output a node's `main` wrote to, and the local that now stands in for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryBinding {
    pub bound: String,
    pub local: String,
}

fn out_vec4_declaration(tu: &TranslationUnit) -> Option<(usize, String)> {
    (tu.0).0.iter().enumerate().find_map(|(i, d)| match d {
        ExternalDeclaration::Declaration(Declaration::InitDeclaratorList(list))
            if list.tail.is_empty()
                && matches!(list.head.ty.ty.ty, TypeSpecifierNonArray::Vec4)
                && has_storage(d, |q| matches!(q, StorageQualifier::Out)) =>
        {
            list.head.name.as_ref().map(|n| (i, n.0.clone()))
        }
        _ => None,
    })
}

fn references<H: Host>(host: &H, name: &str) -> bool {
    let mut found = false;
    walk_exprs(host, |e| {
        if ast::visit::variable_name(e) == Some(name) {
            found = true;
            return Flow::Stop;
        }
        Flow::Continue
    });
    found
}

fn main_index(tu: &TranslationUnit) -> Option<usize> {
    (tu.0)
        .0
        .iter()
        .position(|d| matches!(d, ExternalDeclaration::FunctionDefinition(f) if f.prototype.name.0 == "main"))
}

/// Rewrites `main` to return what it used to write to its output.
///
/// Fragment nodes must declare exactly one top-level `out vec4`; the declaration is removed.
/// With `allow_builtin_output`, a fragment node without one may bind `gl_FragColor` instead.
/// Vertex nodes bind `gl_Position`. Every reference to the bound output becomes
/// [`ENTRY_RESULT`], which the hygiene pass must treat as do-not-descope.
pub fn normalize_main(
    tu: &mut TranslationUnit,
    stage: Stage,
    allow_builtin_output: bool,
) -> Result<EntryBinding, NodeError> {
    if main_index(tu).is_none() {
        return Err(NodeError::NoMainFunction);
    }

    let bound = match stage {
        Stage::Vertex => "gl_Position".to_string(),
        Stage::Fragment => match out_vec4_declaration(tu) {
            Some((idx, name)) => {
                (tu.0).0.remove(idx);
                name
            }
            None if allow_builtin_output && references(&*tu, "gl_FragColor") => "gl_FragColor".to_string(),
            None => return Err(NodeError::NoOutDeclarationFound),
        },
    };
    let local = ENTRY_RESULT.to_string();

    // The local only exists inside `main`, so nothing else may touch the output.
    for decl in &(tu.0).0 {
        let location = match decl {
            ExternalDeclaration::FunctionDefinition(f) if f.prototype.name.0 == "main" => continue,
            ExternalDeclaration::FunctionDefinition(f) => format!("function `{}`", f.prototype.name.0),
            _ => "a global declaration".to_string(),
        };
        if references(decl, &bound) {
            return Err(NodeError::OutputOutsideMain { output: bound, location });
        }
    }

    let parse = |src: &str| {
        ast::parse_statement(src).map_err(|message| NodeError::Parse { stage, message })
    };
    let declare = parse(&format!("vec4 {local};"))?;
    let ret = parse(&format!("return {local};"))?;

    let idx = main_index(tu).ok_or(NodeError::NoMainFunction)?;
    if let ExternalDeclaration::FunctionDefinition(f) = &mut (tu.0).0[idx] {
        f.prototype.ty = FullySpecifiedType {
            qualifier: None,
            ty: TypeSpecifier {
                ty: TypeSpecifierNonArray::Vec4,
                array_specifier: None,
            },
        };
        walk_exprs_mut(&mut f.statement, |e| {
            if let Expr::Variable(id) = e {
                if id.0 == bound {
                    id.0 = local.clone();
                }
            }
            Flow::Continue
        });
        let body = &mut f.statement.statement_list;
        for s in body.iter_mut() {
            rewrite_bare_returns(s, &local);
        }
        body.insert(0, declare);
        body.push(ret);
    }

    Ok(EntryBinding { bound, local })
}

/// `return;` inside the old `void main` must now return the result.
fn rewrite_bare_returns(s: &mut Statement, local: &str) {
    match s {
        Statement::Compound(c) => {
            for s in &mut c.statement_list {
                rewrite_bare_returns(s, local);
            }
        }
        Statement::Simple(simple) => match &mut **simple {
            SimpleStatement::Jump(j @ JumpStatement::Return(None)) => {
                *j = JumpStatement::Return(Some(Box::new(Expr::Variable(Identifier(local.to_string())))));
            }
            SimpleStatement::Selection(sel) => match &mut sel.rest {
                SelectionRestStatement::Statement(s) => rewrite_bare_returns(s, local),
                SelectionRestStatement::Else(a, b) => {
                    rewrite_bare_returns(a, local);
                    rewrite_bare_returns(b, local);
                }
            },
            SimpleStatement::Switch(sw) => {
                for s in &mut sw.body {
                    rewrite_bare_returns(s, local);
                }
            }
            SimpleStatement::Iteration(it) => match it {
                IterationStatement::While(_, body)
                | IterationStatement::DoWhile(body, _)
                | IterationStatement::For(_, _, body) => rewrite_bare_returns(body, local),
            },
            _ => {}
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse_program;
    use crate::compiler::sections::split;
    use glsl::syntax::FunctionDefinition;

    fn main_of(tu: &TranslationUnit) -> &FunctionDefinition {
        (tu.0)
            .0
            .iter()
            .find_map(|d| match d {
                ExternalDeclaration::FunctionDefinition(f) if f.prototype.name.0 == "main" => Some(f),
                _ => None,
            })
            .expect("main")
    }

    #[test]
    fn out_vec4_becomes_a_returned_local() {
        let mut tu = parse_program("out vec4 color;\nvoid main() { color = vec4(1.0); }\n").unwrap();
        let binding = normalize_main(&mut tu, Stage::Fragment, false).unwrap();
        assert_eq!(binding.bound, "color");
        assert_eq!(binding.local, ENTRY_RESULT);

        let main = main_of(&tu);
        assert!(matches!(main.prototype.ty.ty.ty, TypeSpecifierNonArray::Vec4));
        let expected = parse_program(
            "vec4 main() { vec4 entryResult; entryResult = vec4(1.0); return entryResult; }\n",
        )
        .unwrap();
        assert_eq!(&tu, &expected);

        let sections = split(tu);
        assert!(sections.in_statements.is_empty());
    }

    #[test]
    fn missing_out_declaration_is_an_error() {
        let mut tu = parse_program("void main() { gl_FragColor = vec4(1.0); }\n").unwrap();
        assert!(matches!(
            normalize_main(&mut tu, Stage::Fragment, false),
            Err(NodeError::NoOutDeclarationFound)
        ));
    }

    #[test]
    fn legacy_fragment_can_bind_gl_frag_color() {
        let mut tu = parse_program("void main() { gl_FragColor = vec4(1.0); }\n").unwrap();
        let binding = normalize_main(&mut tu, Stage::Fragment, true).unwrap();
        assert_eq!(binding.bound, "gl_FragColor");
    }

    #[test]
    fn vertex_binds_gl_position_and_rewrites_bare_returns() {
        let mut tu = parse_program(
            "in vec3 position;\nvoid main() { if (position.x > 1.0) { return; } gl_Position = vec4(position, 1.0); }\n",
        )
        .unwrap();
        normalize_main(&mut tu, Stage::Vertex, false).unwrap();

        let expected = parse_program(
            "in vec3 position;\nvec4 main() { vec4 entryResult; if (position.x > 1.0) { return entryResult; } entryResult = vec4(position, 1.0); return entryResult; }\n",
        )
        .unwrap();
        assert_eq!(tu, expected);
    }

    #[test]
    fn output_written_by_a_helper_is_an_error() {
        let mut tu = parse_program(
            "out vec4 c;\nvoid paint() { c = vec4(1.0); }\nvoid main() { paint(); }\n",
        )
        .unwrap();
        match normalize_main(&mut tu, Stage::Fragment, false) {
            Err(NodeError::OutputOutsideMain { output, location }) => {
                assert_eq!(output, "c");
                assert_eq!(location, "function `paint`");
            }
            other => panic!("expected an output-outside-main error, got {other:?}"),
        }
    }

    #[test]
    fn missing_main_is_an_error() {
        let mut tu = parse_program("out vec4 c;\nfloat f() { return 1.0; }\n").unwrap();
        assert!(matches!(
            normalize_main(&mut tu, Stage::Fragment, false),
            Err(NodeError::NoMainFunction)
        ));
    }
}
