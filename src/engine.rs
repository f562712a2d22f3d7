//! Engine adapters: which handler compiles each node type, and which names must survive renaming.

pub mod generic;
pub mod handlers;
pub mod three;

use std::collections::{HashMap, HashSet};

use glsl::syntax::Expr;

use crate::compiler::node::NodeTree;
use crate::compiler::strategy::{InputSlots, NameResolver};
use crate::dsl::{Edge, EngineSources, Node, NodeType, Stage};
use crate::error::NodeError;

/// The host side of engine-native nodes: returns the shader text the engine generated for a
/// node under the current scene configuration.
pub trait EngineContext {
    fn program_source(&self, node: &Node, stage: Stage) -> Result<String, String>;
}

/// For graphs without engine-native nodes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEngineContext;

impl EngineContext for NoEngineContext {
    fn program_source(&self, node: &Node, _stage: Stage) -> Result<String, String> {
        Err(format!("no engine attached; cannot materialize `{}` node", node.node_type))
    }
}

/// Engine sources captured ahead of time, keyed by node id.
impl EngineContext for HashMap<String, EngineSources> {
    fn program_source(&self, node: &Node, stage: Stage) -> Result<String, String> {
        let sources = self
            .get(&node.id)
            .ok_or_else(|| format!("no captured engine source for node {}", node.id))?;
        let text = match stage {
            Stage::Vertex => &sources.vertex,
            Stage::Fragment => &sources.fragment,
        };
        text.clone()
            .ok_or_else(|| format!("no captured {stage} source for node {}", node.id))
    }
}

/// Per-node-type compile hooks.
pub trait NodeHandler {
    /// Parsed tree for `node` in `stage`.
    fn produce_tree(
        &self,
        engine: &dyn EngineContext,
        node: &Node,
        stage: Stage,
        input_edges: &[&Edge],
    ) -> Result<NodeTree, NodeError>;

    /// Input slots on the normalized, renamed tree.
    fn find_inputs(
        &self,
        engine: &dyn EngineContext,
        node: &Node,
        tree: &NodeTree,
        names: &NameResolver,
    ) -> Result<InputSlots, NodeError>;

    /// What a downstream node splices in for this one, after this node's own inputs are filled.
    fn produce_filler(&self, node: &Node, tree: &NodeTree) -> Result<Expr, NodeError>;

    /// Whether the tree has a `main` to normalize and names to suffix.
    fn has_entry_point(&self, node: &Node) -> bool {
        !node.expression_only
    }
}

pub struct EngineAdapter {
    name: String,
    preserve: HashSet<String>,
    handlers: HashMap<NodeType, Box<dyn NodeHandler>>,
}

impl std::fmt::Debug for EngineAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().map(|t| t.as_str()).collect();
        types.sort_unstable();
        f.debug_struct("EngineAdapter")
            .field("name", &self.name)
            .field("preserve", &self.preserve.len())
            .field("handlers", &types)
            .finish()
    }
}

impl EngineAdapter {
    pub fn new<'a>(name: impl Into<String>, preserve: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            name: name.into(),
            preserve: preserve.into_iter().map(str::to_string).collect(),
            handlers: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn preserve(&self) -> &HashSet<String> {
        &self.preserve
    }

    pub fn extend_preserve<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        self.preserve.extend(names.into_iter().map(str::to_string));
    }

    /// Registers `handler` for `node_type`, replacing any previous one.
    pub fn register(&mut self, node_type: NodeType, handler: impl NodeHandler + 'static) -> &mut Self {
        self.handlers.insert(node_type, Box::new(handler));
        self
    }

    pub fn handler(&self, node_type: NodeType) -> Result<&dyn NodeHandler, NodeError> {
        self.handlers
            .get(&node_type)
            .map(|h| h.as_ref())
            .ok_or(NodeError::NoHandler(node_type))
    }

    /// Built-in adapter by name (`generic` or `three`).
    pub fn by_name(name: &str) -> Option<EngineAdapter> {
        match name {
            "generic" => Some(generic::generic_adapter()),
            "three" => Some(three::three_adapter()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_up_built_in_adapters() {
        assert_eq!(EngineAdapter::by_name("three").unwrap().name(), "three");
        assert!(EngineAdapter::by_name("babylon").is_none());
    }

    #[test]
    fn missing_handler_is_an_error() {
        let adapter = EngineAdapter::new("empty", ["time"]);
        assert!(adapter.preserve().contains("time"));
        assert!(matches!(
            adapter.handler(NodeType::Source),
            Err(NodeError::NoHandler(NodeType::Source))
        ));
    }

    #[test]
    fn captured_sources_answer_by_node_and_stage() {
        let node = crate::builder::engine_node("4".into(), NodeType::Phong, Stage::Fragment);
        let mut sources = HashMap::new();
        sources.insert(
            "4".to_string(),
            EngineSources {
                vertex: None,
                fragment: Some("void main() {}".into()),
            },
        );
        assert_eq!(sources.program_source(&node, Stage::Fragment).unwrap(), "void main() {}");
        assert!(sources.program_source(&node, Stage::Vertex).is_err());
        assert!(NoEngineContext.program_source(&node, Stage::Fragment).is_err());
    }
}
