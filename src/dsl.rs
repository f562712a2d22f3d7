use std::collections::HashMap;
use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::compiler::CompileOptions;
use crate::error::CompileError;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// A graph file as written by the editor: the graph itself, compile options, and
/// shader text the host already extracted from engine-native materials.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct GraphDocument {
    #[serde(flatten)]
    pub graph: Graph,
    #[serde(default)]
    pub options: CompileOptions,
    #[serde(default, rename = "engineSources")]
    pub engine_sources: HashMap<String, EngineSources>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct EngineSources {
    #[serde(default)]
    pub vertex: Option<String>,
    #[serde(default)]
    pub fragment: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Vertex,
    Fragment,
}

impl Stage {
    pub const ALL: [Stage; 2] = [Stage::Vertex, Stage::Fragment];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Vertex => "vertex",
            Stage::Fragment => "fragment",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Output,
    Source,
    Add,
    Multiply,
    Number,
    Vector2,
    Vector3,
    Vector4,
    Rgb,
    Rgba,
    Texture,
    Physical,
    Phong,
    Toon,
}

impl NodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Output => "output",
            NodeType::Source => "source",
            NodeType::Add => "add",
            NodeType::Multiply => "multiply",
            NodeType::Number => "number",
            NodeType::Vector2 => "vector2",
            NodeType::Vector3 => "vector3",
            NodeType::Vector4 => "vector4",
            NodeType::Rgb => "rgb",
            NodeType::Rgba => "rgba",
            NodeType::Texture => "texture",
            NodeType::Physical => "physical",
            NodeType::Phong => "phong",
            NodeType::Toon => "toon",
        }
    }

    /// Pure data nodes become runtime-bound uniforms.
    pub fn is_data(self) -> bool {
        self.data_glsl_type().is_some()
    }

    /// GLSL type of the uniform a data node declares.
    pub fn data_glsl_type(self) -> Option<&'static str> {
        match self {
            NodeType::Number => Some("float"),
            NodeType::Vector2 => Some("vec2"),
            NodeType::Vector3 | NodeType::Rgb => Some("vec3"),
            NodeType::Vector4 | NodeType::Rgba => Some("vec4"),
            NodeType::Texture => Some("sampler2D"),
            _ => None,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Node {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// `None` for nodes that may feed either stage (data, expressions).
    #[serde(default)]
    pub stage: Option<Stage>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub config: NodeConfig,
    #[serde(default, rename = "expressionOnly")]
    pub expression_only: bool,
    /// Runtime value for data nodes. Never read by the compiler.
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub strategies: Vec<Strategy>,
    #[serde(default)]
    pub uniforms: Vec<UniformDecl>,
    #[serde(default)]
    pub preprocess: bool,
    #[serde(default)]
    pub version: GlslVersion,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct UniformDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub glsl_type: String,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum GlslVersion {
    /// WebGL1-style: `attribute`/`varying`, `gl_FragColor`, `texture2D`.
    V2,
    /// `#version 300 es`.
    #[default]
    V3,
}

impl TryFrom<u8> for GlslVersion {
    type Error = String;

    fn try_from(v: u8) -> std::result::Result<Self, Self::Error> {
        match v {
            2 => Ok(GlslVersion::V2),
            3 => Ok(GlslVersion::V3),
            other => Err(format!("unsupported GLSL version {other} (expected 2 or 3)")),
        }
    }
}

impl From<GlslVersion> for u8 {
    fn from(v: GlslVersion) -> u8 {
        match v {
            GlslVersion::V2 => 2,
            GlslVersion::V3 => 3,
        }
    }
}

/// Input discovery policy; see `compiler::strategy`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Strategy {
    Uniform,
    #[serde(rename = "texture2D")]
    Texture2D,
    AssignmentTo {
        variable: String,
        /// Slot id override; defaults to `filler_<variable>`.
        #[serde(default)]
        slot: Option<String>,
    },
    NamedAttribute {
        attribute: String,
    },
    Variable,
    HardCode,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Edge {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(default = "default_output")]
    pub output: String,
    pub input: String,
    #[serde(default, rename = "type")]
    pub edge_type: Option<String>,
}

fn default_output() -> String {
    "out".to_string()
}

pub fn load_document_from_path(path: impl AsRef<std::path::Path>) -> Result<GraphDocument> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read graph json at {}", path.display()))?;
    parse_document(&text).with_context(|| format!("invalid graph json in {}", path.display()))
}

pub fn parse_document(text: &str) -> Result<GraphDocument> {
    serde_json::from_str(text).context("failed to parse graph json")
}

pub fn find_node<'a>(graph: &'a Graph, node_id: &str) -> Option<&'a Node> {
    graph.nodes.iter().find(|n| n.id == node_id)
}

/// Like [`find_node`], but a missing node is reported against the edge that named it.
pub fn require_node<'a>(graph: &'a Graph, node_id: &str, edge_id: &str) -> Result<&'a Node, CompileError> {
    find_node(graph, node_id).ok_or_else(|| CompileError::DanglingEdge {
        edge: edge_id.to_string(),
        node: node_id.to_string(),
    })
}

/// Edges into `node_id`, in edge-list order.
pub fn incoming_edges<'a>(graph: &'a Graph, node_id: &str) -> Vec<&'a Edge> {
    graph.edges.iter().filter(|e| e.to == node_id).collect()
}

/// Identifier-safe version of a node id or name.
pub fn sanitize_glsl_ident(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, 'n');
    }
    // GLSL reserves identifiers containing `__`.
    while out.contains("__") {
        out = out.replace("__", "_");
    }
    out
}

/// Name of the function a node's `main` is rewritten into.
pub fn entry_function_name(node: &Node) -> String {
    format!("main_{}", id_suffix(&node.id))
}

/// Suffix appended to a node's renamed identifiers.
pub fn id_suffix(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for ch in id.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    out
}

/// Uniform a data node declares; stable across compiles so the runtime can bind it.
pub fn data_uniform_name(node: &Node) -> String {
    format!("{}_{}", sanitize_glsl_ident(&node.name), id_suffix(&node.id))
}
