use std::collections::HashSet;

use glsl::syntax::ExternalDeclaration;
use glsl_graph_linker::builder::GraphBuilder;
use glsl_graph_linker::compiler::sections::declared_names;
use glsl_graph_linker::engine::NoEngineContext;
use glsl_graph_linker::engine::generic::generic_adapter;
use glsl_graph_linker::{CompileOptions, Stage, compile_graph};
use proptest::prelude::*;

/// Every node declares the same helper, global and uniform names.
const LINK: &str = "uniform vec4 prev;\nfloat k = 0.5;\nfloat helper(float x) { return x * k; }\nout vec4 c;\nvoid main() { c = prev * helper(1.0); }";

fn top_level_names(decls: &[ExternalDeclaration]) -> Vec<String> {
    decls
        .iter()
        .flat_map(|d| match d {
            ExternalDeclaration::FunctionDefinition(f) => vec![f.prototype.name.0.clone()],
            other => declared_names(other),
        })
        .collect()
}

proptest! {
    #[test]
    fn merged_program_has_unique_top_level_names(chain in 1usize..7, fan in 0usize..3) {
        let mut b = GraphBuilder::new();
        b.output(Stage::Vertex);
        let out = b.output(Stage::Fragment);

        let mut prev: Option<String> = None;
        for _ in 0..chain {
            let id = b.source("link", Stage::Fragment, LINK);
            if let Some(p) = &prev {
                b.connect(p, &id, "uniform_prev");
            }
            prev = Some(id);
        }
        let Some(last) = prev else { unreachable!() };

        // Extra consumers of the same upstream exercise the single-visit path.
        let mut tail = last.clone();
        for _ in 0..fan {
            let id = b.add();
            b.connect(&last, &id, "a");
            b.connect(&tail, &id, "b");
            tail = id;
        }
        b.connect(&tail, &out, "color");

        let compiled = compile_graph(&b.build(), &generic_adapter(), &NoEngineContext, &CompileOptions::default())
            .unwrap();
        let names = top_level_names(&compiled.fragment.sections.program);
        let mut seen = HashSet::new();
        for n in &names {
            prop_assert!(seen.insert(n.clone()), "duplicate top-level name {n} in {names:?}");
        }
        // chain links plus the output each contribute a renamed entry point
        prop_assert_eq!(names.iter().filter(|n| n.starts_with("main_")).count(), chain + 1);
    }
}
