//! WebGL1-style GLSL to `#version 300 es`.

use glsl::syntax::{
    Declaration, Expr, ExternalDeclaration, FunIdentifier, Preprocessor, StorageQualifier, TranslationUnit,
    TypeQualifierSpec,
};

use crate::ast::{self, Flow, walk_exprs_mut};
use crate::compiler::sections::has_storage;
use crate::dsl::Stage;
use crate::error::NodeError;

pub const ES300_VERSION: &str = "#version 300 es\n";

/// Rewrites legacy built-ins and qualifiers in place.
///
/// `gl_FragColor` becomes `fragment_output`, which is declared as `out vec4` if the program
/// used it. `texture2D`/`textureCube` become `texture`. `attribute` becomes `in`; `varying`
/// becomes `in` for fragment and `out` for vertex. Any version directive is replaced.
pub fn upgrade_to_es300(tu: &mut TranslationUnit, stage: Stage, fragment_output: &str) -> Result<(), NodeError> {
    let mut wrote_frag_color = false;
    walk_exprs_mut(tu, |e| {
        match e {
            Expr::Variable(id) if id.0 == "gl_FragColor" => {
                id.0 = fragment_output.to_string();
                wrote_frag_color = true;
            }
            Expr::FunCall(FunIdentifier::Identifier(id), _) if id.0 == "texture2D" || id.0 == "textureCube" => {
                id.0 = "texture".to_string();
            }
            _ => {}
        }
        Flow::Continue
    });

    let varying_to = match stage {
        Stage::Vertex => StorageQualifier::Out,
        Stage::Fragment => StorageQualifier::In,
    };
    for decl in &mut (tu.0).0 {
        if let ExternalDeclaration::Declaration(Declaration::InitDeclaratorList(list)) = decl {
            for q in list.head.ty.qualifier.iter_mut().flat_map(|q| q.qualifiers.0.iter_mut()) {
                match q {
                    TypeQualifierSpec::Storage(s @ StorageQualifier::Attribute) => *s = StorageQualifier::In,
                    TypeQualifierSpec::Storage(s @ StorageQualifier::Varying) => *s = varying_to.clone(),
                    _ => {}
                }
            }
        }
    }

    let decls = &mut (tu.0).0;
    decls.retain(|d| !matches!(d, ExternalDeclaration::Preprocessor(Preprocessor::Version(_))));

    let parse = |src: &str| ast::parse_declarations(src).map_err(|message| NodeError::Parse { stage, message });
    let mut header = parse(ES300_VERSION)?;
    let declares_output = decls.iter().any(|d| {
        has_storage(d, |q| matches!(q, StorageQualifier::Out))
            && crate::compiler::sections::declared_names(d).iter().any(|n| n == fragment_output)
    });
    if stage == Stage::Fragment && wrote_frag_color && !declares_output {
        header.extend(parse(&format!("out vec4 {fragment_output};"))?);
    }
    // Precision statements and extensions must stay ahead of the new output declaration.
    let at = decls
        .iter()
        .take_while(|d| {
            matches!(
                d,
                ExternalDeclaration::Preprocessor(_) | ExternalDeclaration::Declaration(Declaration::Precision(..))
            )
        })
        .count();
    let version = header.remove(0);
    decls.insert(0, version);
    for (i, d) in header.into_iter().enumerate() {
        decls.insert(at + 1 + i, d);
    }
    log::debug!("upgraded {stage} node source to GLSL ES 3.00");
    Ok(())
}
