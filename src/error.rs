//! Error taxonomy for a compile pass.
//!
//! Every error aborts the whole pass; no partial program is ever produced.

use thiserror::Error;

use crate::dsl::{NodeType, Stage};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("no output node for the {0} stage")]
    NoOutputNode(Stage),

    #[error("multiple output nodes for the {stage} stage: {first} and {second}")]
    DuplicateOutputNode {
        stage: Stage,
        first: String,
        second: String,
    },

    #[error("edge {edge} references missing node {node}")]
    DanglingEdge { edge: String, node: String },

    #[error("edges {first} and {second} both target input `{input}` of node {node}")]
    DuplicateInput {
        node: String,
        input: String,
        first: String,
        second: String,
    },

    #[error("cycle detected in graph (nodes involved: {})", nodes.join(", "))]
    Cycle { nodes: Vec<String> },

    #[error("node {node}: {source}")]
    Node {
        node: String,
        #[source]
        source: NodeError,
    },
}

impl CompileError {
    pub fn node(node: impl Into<String>, source: NodeError) -> Self {
        CompileError::Node {
            node: node.into(),
            source,
        }
    }
}

/// Failures scoped to a single node; wrapped in [`CompileError::Node`] with the node id.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("no handler registered for node type `{0}`")]
    NoHandler(NodeType),

    #[error("parse error in {stage} source: {message}")]
    Parse { stage: Stage, message: String },

    #[error("preprocessor error: {0}")]
    Preprocess(String),

    #[error("no `out vec4` declaration found")]
    NoOutDeclarationFound,

    #[error("no `main` function found")]
    NoMainFunction,

    #[error("output `{output}` is used in {location}; only `main` may write the node output")]
    OutputOutsideMain { output: String, location: String },

    #[error("unsupported binding kind: {0}")]
    UnsupportedBindingKind(String),

    #[error("edge {edge} targets input `{input}`, which was not discovered on this node")]
    MissingSlot { edge: String, input: String },

    #[error("node belongs to the {node_stage} stage but was reached while compiling the {compiling} stage")]
    StageMismatch { node_stage: Stage, compiling: Stage },

    #[error("engine could not produce {stage} source: {message}")]
    EngineSource { stage: Stage, message: String },
}
