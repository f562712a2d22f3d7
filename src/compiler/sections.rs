//! Top-level statement buckets and the final program assembly.

use std::collections::{BTreeSet, HashSet};

use glsl::syntax::{
    Declaration, ExternalDeclaration, InitDeclaratorList, Preprocessor, StorageQualifier, TranslationUnit,
    TypeQualifierSpec,
};

use crate::ast;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShaderSections {
    pub precision: Vec<ExternalDeclaration>,
    pub version: Vec<ExternalDeclaration>,
    pub preprocessor: Vec<ExternalDeclaration>,
    /// Stage interface declarations (`in`, and `out` varyings of the vertex stage).
    pub in_statements: Vec<ExternalDeclaration>,
    /// Names declared by `in_statements`.
    pub existing_ins: BTreeSet<String>,
    pub program: Vec<ExternalDeclaration>,
}

/// Partitions a program's top-level statements. First matching rule wins:
/// precision, version, other preprocessor directives, interface declarations, everything else.
pub fn split(tu: TranslationUnit) -> ShaderSections {
    let mut s = ShaderSections::default();
    for decl in (tu.0).0 {
        match &decl {
            ExternalDeclaration::Declaration(Declaration::Precision(..)) => s.precision.push(decl),
            ExternalDeclaration::Preprocessor(Preprocessor::Version(_)) => s.version.push(decl),
            ExternalDeclaration::Preprocessor(_) => s.preprocessor.push(decl),
            _ => match interface_names(&decl) {
                Some(names) => {
                    s.existing_ins.extend(names);
                    s.in_statements.push(decl);
                }
                None => s.program.push(decl),
            },
        }
    }
    s
}

/// Concatenates every bucket, `a` first. Duplicate interface declarations are kept;
/// callers consult `existing_ins` before appending.
pub fn merge(a: ShaderSections, b: ShaderSections) -> ShaderSections {
    let ShaderSections {
        mut precision,
        mut version,
        mut preprocessor,
        mut in_statements,
        mut existing_ins,
        mut program,
    } = a;
    precision.extend(b.precision);
    version.extend(b.version);
    preprocessor.extend(b.preprocessor);
    in_statements.extend(b.in_statements);
    existing_ins.extend(b.existing_ins);
    program.extend(b.program);
    ShaderSections {
        precision,
        version,
        preprocessor,
        in_statements,
        existing_ins,
        program,
    }
}

fn storage_of(list: &InitDeclaratorList) -> Vec<&StorageQualifier> {
    list.head
        .ty
        .qualifier
        .iter()
        .flat_map(|q| q.qualifiers.0.iter())
        .filter_map(|q| match q {
            TypeQualifierSpec::Storage(s) => Some(s),
            _ => None,
        })
        .collect()
}

pub fn has_storage(decl: &ExternalDeclaration, pred: impl Fn(&StorageQualifier) -> bool) -> bool {
    match decl {
        ExternalDeclaration::Declaration(Declaration::InitDeclaratorList(list)) => {
            storage_of(list).into_iter().any(pred)
        }
        _ => false,
    }
}

pub fn is_interface_qualifier(q: &StorageQualifier) -> bool {
    matches!(
        q,
        StorageQualifier::In | StorageQualifier::Out | StorageQualifier::Attribute | StorageQualifier::Varying
    )
}

/// Declared names of a stage interface declaration, or `None` for anything else.
pub fn interface_names(decl: &ExternalDeclaration) -> Option<Vec<String>> {
    if has_storage(decl, is_interface_qualifier) {
        Some(declared_names(decl))
    } else {
        None
    }
}

/// Variable names introduced by a top-level declaration.
pub fn declared_names(decl: &ExternalDeclaration) -> Vec<String> {
    match decl {
        ExternalDeclaration::Declaration(Declaration::InitDeclaratorList(list)) => {
            let mut names: Vec<String> = list.head.name.iter().map(|n| n.0.clone()).collect();
            names.extend(list.tail.iter().map(|t| t.ident.ident.0.clone()));
            names
        }
        _ => Vec::new(),
    }
}

/// Directives that mean the same thing when repeated, so identical copies can be dropped.
/// Conditionals never are: each `#endif` closes its own block.
fn is_repeatable_directive(decl: &ExternalDeclaration) -> bool {
    match decl {
        ExternalDeclaration::Preprocessor(p) => matches!(
            p,
            Preprocessor::Version(_) | Preprocessor::Extension(_) | Preprocessor::Define(_)
        ),
        _ => true,
    }
}

/// Everything the final program needs besides the merged sections.
pub struct Assembly<'a> {
    pub default_version: &'a str,
    /// Emitted when no node supplied a float precision; fragment stage only.
    pub default_precision: Option<&'a str>,
    /// Declarations emitted after the interface section (e.g. the fragment output).
    pub outputs: Vec<String>,
    /// The synthesized driver `main`.
    pub driver: String,
}

/// Wraps merged sections into one program: version, preprocessor, precision, interface
/// declarations, outputs, program body, then the driver `main`.
pub fn assemble(sections: &ShaderSections, assembly: &Assembly<'_>) -> Result<String, String> {
    let mut decls: Vec<ExternalDeclaration> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut push_unique = |decls: &mut Vec<ExternalDeclaration>, d: &ExternalDeclaration| {
        if !is_repeatable_directive(d) || seen.insert(ast::generate_declaration(d)) {
            decls.push(d.clone());
        }
    };

    match sections.version.first() {
        Some(v) => push_unique(&mut decls, v),
        None if !assembly.default_version.is_empty() => {
            for d in ast::parse_declarations(assembly.default_version)? {
                push_unique(&mut decls, &d);
            }
        }
        None => {}
    }
    for d in &sections.preprocessor {
        push_unique(&mut decls, d);
    }
    for d in &sections.precision {
        push_unique(&mut decls, d);
    }
    if sections.precision.is_empty() {
        if let Some(p) = assembly.default_precision {
            for d in ast::parse_declarations(&format!("precision {p} float;"))? {
                push_unique(&mut decls, &d);
            }
        }
    }
    decls.extend(sections.in_statements.iter().cloned());
    for out in &assembly.outputs {
        decls.extend(ast::parse_declarations(out)?);
    }
    decls.extend(sections.program.iter().cloned());
    decls.extend(ast::parse_declarations(&assembly.driver)?);

    Ok(ast::generate_program(&ast::program_from(decls)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse_program;

    fn sections_of(src: &str) -> ShaderSections {
        split(parse_program(src).unwrap())
    }

    #[test]
    fn split_buckets_in_priority_order() {
        let s = sections_of(
            "#version 300 es\n#define PI 3.14\nprecision highp float;\nin vec2 vUv;\nuniform float t;\nfloat f() { return t; }\n",
        );
        assert_eq!(s.version.len(), 1);
        assert_eq!(s.preprocessor.len(), 1);
        assert_eq!(s.precision.len(), 1);
        assert_eq!(s.in_statements.len(), 1);
        assert_eq!(s.existing_ins, BTreeSet::from(["vUv".to_string()]));
        assert_eq!(s.program.len(), 2);
    }

    #[test]
    fn existing_ins_tracks_every_declared_name() {
        let s = sections_of("in vec3 a, b;\nout vec2 vUv;\n");
        let names: Vec<_> = s.existing_ins.iter().cloned().collect();
        assert_eq!(names, vec!["a", "b", "vUv"]);
    }

    #[test]
    fn merge_concatenates_and_unions() {
        let a = sections_of("in vec2 vUv;\nfloat x;\n");
        let b = sections_of("in vec2 vUv;\nfloat y;\n");
        let m = merge(a, b);
        assert_eq!(m.in_statements.len(), 2);
        assert_eq!(m.existing_ins.len(), 1);
        assert_eq!(
            m.program.iter().flat_map(declared_names).collect::<Vec<_>>(),
            vec!["x", "y"]
        );
    }

    #[test]
    fn assemble_synthesizes_version_precision_and_driver() {
        let s = sections_of("in vec2 vUv;\nvec4 main_1() { return vec4(vUv, 0.0, 1.0); }\n");
        let text = assemble(
            &s,
            &Assembly {
                default_version: "#version 300 es\n",
                default_precision: Some("highp"),
                outputs: vec!["out vec4 graphFragColor;".to_string()],
                driver: "void main() { graphFragColor = main_1(); }".to_string(),
            },
        )
        .unwrap();

        let tu = parse_program(&text).unwrap();
        let s2 = split(tu);
        assert_eq!(s2.version.len(), 1);
        assert_eq!(s2.precision.len(), 1);
        assert!(s2.existing_ins.contains("graphFragColor"));
        assert_eq!(s2.program.len(), 2);
        assert!(text.starts_with("#version 300 es"));
        assert!(text.contains("precision highp float;"), "{text}");
    }

    #[test]
    fn assemble_keeps_every_conditional_directive() {
        let s = sections_of(
            "#define USE_A\n#define USE_A\n#ifdef USE_A\n#endif\n#ifdef USE_B\n#endif\nvec4 main_1() { return vec4(1.0); }\n",
        );
        let text = assemble(
            &s,
            &Assembly {
                default_version: "",
                default_precision: None,
                outputs: Vec::new(),
                driver: "void main() { main_1(); }".to_string(),
            },
        )
        .unwrap();
        assert_eq!(text.matches("#define USE_A").count(), 1, "{text}");
        assert_eq!(text.matches("#ifdef").count(), 2, "{text}");
        assert_eq!(text.matches("#endif").count(), 2, "{text}");
    }
}
