//! Node handlers shared by the built-in adapters.

use glsl::syntax::{Expr, FunIdentifier, Identifier};

use crate::ast;
use crate::compiler::node::{NodeTree, parse_node_source};
use crate::compiler::strategy::{InputSlot, InputSlots, NameResolver, SlotTarget, discover};
use crate::dsl::{Edge, Node, NodeType, Stage, data_uniform_name, entry_function_name};
use crate::engine::{EngineContext, NodeHandler};
use crate::error::NodeError;

fn configured_slots(node: &Node, tree: &NodeTree, names: &NameResolver) -> InputSlots {
    let mut slots = InputSlots::new();
    for strategy in &node.config.strategies {
        slots.extend(discover(strategy, tree, names));
    }
    slots
}

fn entry_call(node: &Node) -> Expr {
    Expr::FunCall(FunIdentifier::Identifier(Identifier(entry_function_name(node))), Vec::new())
}

/// Hand-written GLSL: whole programs, or bare expressions for expression-only nodes.
#[derive(Debug, Default, Clone, Copy)]
pub struct CodeHandler;

impl NodeHandler for CodeHandler {
    fn produce_tree(
        &self,
        _engine: &dyn EngineContext,
        node: &Node,
        stage: Stage,
        _input_edges: &[&Edge],
    ) -> Result<NodeTree, NodeError> {
        if node.expression_only {
            return ast::parse_expression(&node.source)
                .map(NodeTree::Expression)
                .map_err(|message| NodeError::Parse { stage, message });
        }
        parse_node_source(node, stage, &node.source).map(NodeTree::Program)
    }

    fn find_inputs(
        &self,
        _engine: &dyn EngineContext,
        node: &Node,
        tree: &NodeTree,
        names: &NameResolver,
    ) -> Result<InputSlots, NodeError> {
        Ok(configured_slots(node, tree, names))
    }

    fn produce_filler(&self, node: &Node, tree: &NodeTree) -> Result<Expr, NodeError> {
        Ok(match tree {
            NodeTree::Expression(e) => e.clone(),
            NodeTree::Program(_) => entry_call(node),
        })
    }
}

/// Constants and textures bound at runtime. The tree is a single uniform declaration; the
/// filler is that uniform's name.
#[derive(Debug, Default, Clone, Copy)]
pub struct DataHandler;

impl NodeHandler for DataHandler {
    fn produce_tree(
        &self,
        _engine: &dyn EngineContext,
        node: &Node,
        stage: Stage,
        _input_edges: &[&Edge],
    ) -> Result<NodeTree, NodeError> {
        let ty = node
            .node_type
            .data_glsl_type()
            .ok_or_else(|| NodeError::UnsupportedBindingKind(format!("`{}` is not a data node type", node.node_type)))?;
        ast::parse_program(&format!("uniform {ty} {};", data_uniform_name(node)))
            .map(NodeTree::Program)
            .map_err(|message| NodeError::Parse { stage, message })
    }

    fn find_inputs(
        &self,
        _engine: &dyn EngineContext,
        _node: &Node,
        _tree: &NodeTree,
        _names: &NameResolver,
    ) -> Result<InputSlots, NodeError> {
        Ok(InputSlots::new())
    }

    fn produce_filler(&self, node: &Node, _tree: &NodeTree) -> Result<Expr, NodeError> {
        Ok(Expr::Variable(Identifier(data_uniform_name(node))))
    }

    fn has_entry_point(&self, _node: &Node) -> bool {
        false
    }
}

/// Maps editor-facing material properties to the uniforms an engine's generated shader uses.
pub type PropertyTable = &'static [(&'static str, &'static str)];

/// Engine-native materials. The shader text comes from the host engine; each known material
/// property whose uniform appears in it becomes a `property_<name>` slot.
#[derive(Debug, Clone, Copy)]
pub struct EngineMaterialHandler {
    pub properties: PropertyTable,
}

impl EngineMaterialHandler {
    pub fn new(properties: PropertyTable) -> Self {
        Self { properties }
    }
}

impl NodeHandler for EngineMaterialHandler {
    fn produce_tree(
        &self,
        engine: &dyn EngineContext,
        node: &Node,
        stage: Stage,
        _input_edges: &[&Edge],
    ) -> Result<NodeTree, NodeError> {
        let source = engine
            .program_source(node, stage)
            .map_err(|message| NodeError::EngineSource { stage, message })?;
        parse_node_source(node, stage, &source).map(NodeTree::Program)
    }

    fn find_inputs(
        &self,
        _engine: &dyn EngineContext,
        node: &Node,
        tree: &NodeTree,
        names: &NameResolver,
    ) -> Result<InputSlots, NodeError> {
        let mut slots = InputSlots::new();
        if let NodeTree::Program(tu) = tree {
            let uniforms = crate::compiler::strategy::uniform_slots(tu, names);
            for (property, uniform) in self.properties {
                let Some(slot) = uniforms.get(&format!("uniform_{uniform}")) else {
                    continue;
                };
                if let SlotTarget::References { name, .. } = &slot.target {
                    slots.insert_if_absent(InputSlot::new(
                        format!("property_{property}"),
                        SlotTarget::References {
                            name: name.clone(),
                            drop_declaration: true,
                        },
                    ));
                }
            }
        }
        slots.extend(configured_slots(node, tree, names));
        Ok(slots)
    }

    fn produce_filler(&self, node: &Node, _tree: &NodeTree) -> Result<Expr, NodeError> {
        Ok(entry_call(node))
    }
}

/// Handlers every adapter registers.
pub fn register_defaults(adapter: &mut crate::engine::EngineAdapter) {
    for ty in [NodeType::Output, NodeType::Source, NodeType::Add, NodeType::Multiply] {
        adapter.register(ty, CodeHandler);
    }
    for ty in [
        NodeType::Number,
        NodeType::Vector2,
        NodeType::Vector3,
        NodeType::Vector4,
        NodeType::Rgb,
        NodeType::Rgba,
        NodeType::Texture,
    ] {
        adapter.register(ty, DataHandler);
    }
}
