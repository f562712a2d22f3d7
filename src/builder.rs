//! Node constructors and graph assembly.
//!
//! Ids come from an explicit [`IdGenerator`] owned by the builder, never from process-wide state.

use serde_json::json;

use crate::dsl::{Edge, GlslVersion, Graph, Node, NodeConfig, NodeType, Stage, Strategy};

pub const FRAGMENT_OUTPUT_SOURCE: &str = r#"#version 300 es
precision highp float;

out vec4 outputColor;

void main() {
    outputColor = vec4(1.0);
}
"#;

pub const VERTEX_OUTPUT_SOURCE: &str = r#"#version 300 es
precision highp float;

in vec3 position;
uniform mat4 modelViewMatrix;
uniform mat4 projectionMatrix;

void main() {
    gl_Position = projectionMatrix * modelViewMatrix * vec4(position, 1.0);
}
"#;

#[derive(Debug, Clone)]
pub struct IdGenerator {
    next: u64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(next: u64) -> Self {
        Self { next }
    }

    pub fn next_id(&mut self) -> String {
        let id = self.next;
        self.next += 1;
        id.to_string()
    }
}

pub fn output_node(id: String, stage: Stage) -> Node {
    let (source, variable, slot) = match stage {
        Stage::Fragment => (FRAGMENT_OUTPUT_SOURCE, "outputColor", "color"),
        Stage::Vertex => (VERTEX_OUTPUT_SOURCE, "gl_Position", "position"),
    };
    Node {
        id,
        name: "Output".to_string(),
        node_type: NodeType::Output,
        stage: Some(stage),
        source: source.to_string(),
        config: NodeConfig {
            strategies: vec![Strategy::AssignmentTo {
                variable: variable.to_string(),
                slot: Some(slot.to_string()),
            }],
            ..NodeConfig::default()
        },
        expression_only: false,
        value: None,
    }
}

/// A hand-written GLSL node. Exposes its uniforms and texture samples as inputs.
pub fn source_node(id: String, name: &str, stage: Stage, source: &str, version: GlslVersion) -> Node {
    Node {
        id,
        name: name.to_string(),
        node_type: NodeType::Source,
        stage: Some(stage),
        source: source.to_string(),
        config: NodeConfig {
            strategies: vec![Strategy::Uniform, Strategy::Texture2D],
            version,
            ..NodeConfig::default()
        },
        expression_only: false,
        value: None,
    }
}

pub fn binary_node(id: String, node_type: NodeType) -> Node {
    let (name, source) = match node_type {
        NodeType::Multiply => ("Multiply", "a * b"),
        _ => ("Add", "a + b"),
    };
    Node {
        id,
        name: name.to_string(),
        node_type,
        stage: None,
        source: source.to_string(),
        config: NodeConfig {
            strategies: vec![Strategy::Variable],
            ..NodeConfig::default()
        },
        expression_only: true,
        value: None,
    }
}

pub fn data_node(id: String, name: &str, node_type: NodeType, value: serde_json::Value) -> Node {
    Node {
        id,
        name: name.to_string(),
        node_type,
        stage: None,
        source: String::new(),
        config: NodeConfig::default(),
        expression_only: false,
        value: Some(value),
    }
}

/// Engine-native material; its source is extracted from the engine at compile time.
pub fn engine_node(id: String, node_type: NodeType, stage: Stage) -> Node {
    Node {
        id,
        name: node_type.as_str().to_string(),
        node_type,
        stage: Some(stage),
        source: String::new(),
        config: NodeConfig {
            strategies: vec![Strategy::Texture2D],
            ..NodeConfig::default()
        },
        expression_only: false,
        value: None,
    }
}

#[derive(Debug, Default)]
pub struct GraphBuilder {
    ids: IdGenerator,
    graph: Graph,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids(ids: IdGenerator) -> Self {
        Self {
            ids,
            graph: Graph::default(),
        }
    }

    pub fn push(&mut self, node: Node) -> String {
        let id = node.id.clone();
        self.graph.nodes.push(node);
        id
    }

    pub fn output(&mut self, stage: Stage) -> String {
        let id = self.ids.next_id();
        self.push(output_node(id, stage))
    }

    pub fn source(&mut self, name: &str, stage: Stage, source: &str) -> String {
        let id = self.ids.next_id();
        self.push(source_node(id, name, stage, source, GlslVersion::V3))
    }

    /// A WebGL1-style source node that gets upgraded to GLSL 3 when compiled.
    pub fn legacy_source(&mut self, name: &str, stage: Stage, source: &str) -> String {
        let id = self.ids.next_id();
        self.push(source_node(id, name, stage, source, GlslVersion::V2))
    }

    pub fn add(&mut self) -> String {
        let id = self.ids.next_id();
        self.push(binary_node(id, NodeType::Add))
    }

    pub fn multiply(&mut self) -> String {
        let id = self.ids.next_id();
        self.push(binary_node(id, NodeType::Multiply))
    }

    pub fn number(&mut self, name: &str, value: f64) -> String {
        let id = self.ids.next_id();
        self.push(data_node(id, name, NodeType::Number, json!(value)))
    }

    pub fn data(&mut self, name: &str, node_type: NodeType, value: serde_json::Value) -> String {
        let id = self.ids.next_id();
        self.push(data_node(id, name, node_type, value))
    }

    pub fn engine_material(&mut self, node_type: NodeType, stage: Stage) -> String {
        let id = self.ids.next_id();
        self.push(engine_node(id, node_type, stage))
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.graph.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Connects `from`'s output to the `input` slot on `to`; returns the edge id.
    pub fn connect(&mut self, from: &str, to: &str, input: &str) -> String {
        let id = format!("e{}", self.ids.next_id());
        self.graph.edges.push(Edge {
            id: id.clone(),
            from: from.to_string(),
            to: to.to_string(),
            output: "out".to_string(),
            input: input.to_string(),
            edge_type: None,
        });
        id
    }

    pub fn build(self) -> Graph {
        self.graph
    }
}
