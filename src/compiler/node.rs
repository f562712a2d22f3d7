//! Per-node compilation: produce, upgrade, normalize, rename, discover.

use std::collections::{HashMap, HashSet};

use glsl::syntax::{Declaration, Expr, ExternalDeclaration, TranslationUnit};

use crate::ast::{self, Flow, walk_exprs};
use crate::compiler::CompileOptions;
use crate::compiler::entry::{EntryBinding, normalize_main};
use crate::compiler::hygiene::{RenameOptions, Renames, Scope, rename_bindings};
use crate::compiler::preprocess::preprocess;
use crate::compiler::strategy::{InputSlots, NameResolver, Splice, apply_splices};
use crate::compiler::upgrade::upgrade_to_es300;
use crate::dsl::{Edge, GlslVersion, Node, Stage, entry_function_name, id_suffix};
use crate::engine::{EngineAdapter, EngineContext};
use crate::error::NodeError;

/// A node's syntax tree: a whole program, or a bare expression for expression-only nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeTree {
    Program(TranslationUnit),
    Expression(Expr),
}

impl NodeTree {
    pub fn program(&self) -> Option<&TranslationUnit> {
        match self {
            NodeTree::Program(tu) => Some(tu),
            NodeTree::Expression(_) => None,
        }
    }

    pub fn is_expression(&self) -> bool {
        matches!(self, NodeTree::Expression(_))
    }

    pub fn walk(&self, f: impl FnMut(&Expr) -> Flow) {
        match self {
            NodeTree::Program(tu) => walk_exprs(tu, f),
            NodeTree::Expression(e) => walk_exprs(e, f),
        }
    }
}

/// Preprocesses (when the node asks for it) and parses a node's program text.
pub fn parse_node_source(node: &Node, stage: Stage, source: &str) -> Result<TranslationUnit, NodeError> {
    let text = if node.config.preprocess {
        preprocess(source, stage)?
    } else {
        source.to_string()
    };
    ast::parse_program(&text).map_err(|message| NodeError::Parse { stage, message })
}

/// The state of one node during one compile.
#[derive(Debug)]
pub struct NodeContext {
    pub node_id: String,
    pub tree: NodeTree,
    pub inputs: InputSlots,
    pub entry: Option<EntryBinding>,
    pub renames: Renames,
    pending: Vec<Splice>,
}

impl NodeContext {
    /// Queues `filler` for the slot `edge.input`. Nothing is written until [`NodeContext::finish`].
    pub fn fill(&mut self, edge: &Edge, filler: Expr) -> Result<(), NodeError> {
        let slot = self.inputs.get(&edge.input).ok_or_else(|| NodeError::MissingSlot {
            edge: edge.id.clone(),
            input: edge.input.clone(),
        })?;
        self.pending.push(Splice {
            slot: slot.id.clone(),
            target: slot.target.clone(),
            filler,
        });
        Ok(())
    }

    /// Writes every queued filler into the tree.
    pub fn finish(&mut self) {
        let count = self.pending.len();
        let pending = std::mem::take(&mut self.pending);
        for slot in apply_splices(&mut self.tree, pending) {
            log::warn!(
                "node {}: slot `{slot}` sits inside an expression that was already replaced; its filler was dropped",
                self.node_id
            );
        }
        if count > 0 {
            log::debug!("node {}: spliced {count} input(s)", self.node_id);
        }
    }
}

/// Declares `config.uniforms` the source does not already declare, after any leading
/// directives and precision statements.
fn inject_config_uniforms(tu: &mut TranslationUnit, node: &Node, stage: Stage) -> Result<(), NodeError> {
    if node.config.uniforms.is_empty() {
        return Ok(());
    }
    let declared = Scope::of(tu)?.bindings;
    let mut injected = Vec::new();
    for u in &node.config.uniforms {
        if declared.contains(&u.name) {
            continue;
        }
        let decls = ast::parse_declarations(&format!("uniform {} {};", u.glsl_type, u.name))
            .map_err(|message| NodeError::Parse { stage, message })?;
        injected.extend(decls);
    }
    let decls = &mut (tu.0).0;
    let at = decls
        .iter()
        .take_while(|d| {
            matches!(
                d,
                ExternalDeclaration::Preprocessor(_) | ExternalDeclaration::Declaration(Declaration::Precision(..))
            )
        })
        .count();
    let n = injected.len();
    for (i, d) in injected.into_iter().enumerate() {
        decls.insert(at + i, d);
    }
    if n > 0 {
        log::debug!("node {}: injected {n} configured uniform(s)", node.id);
    }
    Ok(())
}

/// Compiles one node for one stage.
///
/// The handler produces the tree. Programs with an entry point are then upgraded to the target
/// GLSL version if needed, get their `main` normalized into `main_<id>`, and have every
/// non-preserved top-level name suffixed with the node id. Finally the handler discovers the
/// node's input slots on the resulting tree.
pub fn compile_node(
    node: &Node,
    stage: Stage,
    adapter: &EngineAdapter,
    engine: &dyn EngineContext,
    options: &CompileOptions,
    input_edges: &[&Edge],
) -> Result<NodeContext, NodeError> {
    let handler = adapter.handler(node.node_type)?;
    let mut tree = handler.produce_tree(engine, node, stage, input_edges)?;

    let mut entry = None;
    let mut renames = Renames::default();
    if let NodeTree::Program(tu) = &mut tree {
        inject_config_uniforms(tu, node, stage)?;
        if handler.has_entry_point(node) {
            if node.config.version == GlslVersion::V2 && options.target_version == GlslVersion::V3 {
                upgrade_to_es300(tu, stage, &options.fragment_output)?;
            }
            let binding = normalize_main(tu, stage, options.target_version == GlslVersion::V2)?;
            let do_not_descope = HashSet::from([binding.local.clone()]);
            let function_names = HashMap::from([("main".to_string(), entry_function_name(node))]);
            let suffix = id_suffix(&node.id);
            renames = rename_bindings(
                tu,
                &RenameOptions {
                    preserve: adapter.preserve(),
                    do_not_descope: &do_not_descope,
                    suffix: &suffix,
                    function_names: &function_names,
                },
            )?;
            entry = Some(binding);
        }
    }

    let names = NameResolver::new(entry.clone(), renames.clone());
    let inputs = handler.find_inputs(engine, node, &tree, &names)?;
    log::debug!(
        "compiled node {} ({}) for {stage}: inputs [{}]",
        node.id,
        node.node_type,
        inputs.ids().join(", ")
    );

    Ok(NodeContext {
        node_id: node.id.clone(),
        tree,
        inputs,
        entry,
        renames,
        pending: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{GraphBuilder, binary_node};
    use crate::dsl::{NodeType, UniformDecl, find_node};
    use crate::engine::NoEngineContext;
    use crate::engine::generic::generic_adapter;

    fn compile(node: &Node, stage: Stage) -> Result<NodeContext, NodeError> {
        compile_node(
            node,
            stage,
            &generic_adapter(),
            &NoEngineContext,
            &CompileOptions::default(),
            &[],
        )
    }

    fn edge(input: &str) -> Edge {
        Edge {
            id: "e9".into(),
            from: "x".into(),
            to: "y".into(),
            output: "out".into(),
            input: input.into(),
            edge_type: None,
        }
    }

    #[test]
    fn legacy_source_is_upgraded_normalized_and_renamed() {
        let mut b = GraphBuilder::new();
        let id = b.legacy_source(
            "img",
            Stage::Fragment,
            "uniform sampler2D image;\nvarying vec2 vUv;\nvoid main() { gl_FragColor = texture2D(image, vUv); }",
        );
        let graph = b.build();
        let node = find_node(&graph, &id).unwrap();

        let ctx = compile(node, Stage::Fragment).unwrap();
        assert_eq!(ctx.inputs.ids(), vec!["uniform_image", "texture2d_0"]);
        assert_eq!(ctx.entry.as_ref().unwrap().bound, "graphFragColor");

        let expected = ast::parse_program(
            "#version 300 es\nuniform sampler2D image_1;\nin vec2 vUv;\nvec4 main_1() { vec4 entryResult; entryResult = texture(image_1, vUv); return entryResult; }\n",
        )
        .unwrap();
        assert_eq!(ctx.tree, NodeTree::Program(expected));
    }

    #[test]
    fn fill_rejects_unknown_slots_and_finish_splices() {
        let mut b = GraphBuilder::new();
        let id = b.output(Stage::Fragment);
        let graph = b.build();
        let node = find_node(&graph, &id).unwrap();

        let mut ctx = compile(node, Stage::Fragment).unwrap();
        assert_eq!(ctx.inputs.ids(), vec!["color"]);
        assert!(matches!(
            ctx.fill(&edge("nope"), ast::parse_expression("x").unwrap()),
            Err(NodeError::MissingSlot { edge, input }) if edge == "e9" && input == "nope"
        ));

        ctx.fill(&edge("color"), ast::parse_expression("main_2()").unwrap()).unwrap();
        ctx.finish();
        let text = ast::generate_program(ctx.tree.program().unwrap());
        assert!(text.contains("entryResult = main_2()"));
        assert!(text.contains("vec4 main_1()"));
    }

    #[test]
    fn expression_nodes_skip_normalization() {
        let node = binary_node("5".into(), NodeType::Add);
        let ctx = compile(&node, Stage::Fragment).unwrap();
        assert!(ctx.tree.is_expression());
        assert!(ctx.entry.is_none());
        assert_eq!(ctx.inputs.ids(), vec!["a", "b"]);
    }

    #[test]
    fn configured_uniforms_are_injected_once() {
        let mut b = GraphBuilder::new();
        let id = b.source(
            "tint",
            Stage::Fragment,
            "precision highp float;\nuniform float amount;\nout vec4 c;\nvoid main() { c = vec4(amount) * tint; }",
        );
        let node = b.node_mut(&id).unwrap();
        node.config.uniforms = vec![
            UniformDecl {
                name: "amount".into(),
                glsl_type: "float".into(),
                value: None,
            },
            UniformDecl {
                name: "tint".into(),
                glsl_type: "vec4".into(),
                value: None,
            },
        ];
        let graph = b.build();
        let ctx = compile(find_node(&graph, &id).unwrap(), Stage::Fragment).unwrap();
        assert_eq!(ctx.inputs.ids(), vec!["uniform_tint", "uniform_amount"]);
    }

    #[test]
    fn missing_out_declaration_fails_the_node() {
        let mut b = GraphBuilder::new();
        let id = b.source("bad", Stage::Fragment, "void main() { }");
        let graph = b.build();
        assert!(matches!(
            compile(find_node(&graph, &id).unwrap(), Stage::Fragment),
            Err(NodeError::NoOutDeclarationFound)
        ));
    }

    #[test]
    fn parse_errors_carry_the_stage() {
        let mut b = GraphBuilder::new();
        let id = b.source("bad", Stage::Vertex, "void main( {");
        let graph = b.build();
        assert!(matches!(
            compile(find_node(&graph, &id).unwrap(), Stage::Vertex),
            Err(NodeError::Parse { stage: Stage::Vertex, .. })
        ));
    }
}
