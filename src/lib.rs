//! Links a graph of independently authored GLSL nodes into one vertex and one fragment program.
//!
//! - `dsl`: graph data model and JSON loading
//! - `graph`: structural validation and graph queries
//! - `builder`: node constructors and id generation
//! - `ast`: parse / print boundary over the `glsl` crate, plus traversal helpers
//! - `compiler`: sections, hygiene, entry points, strategies, node and graph compilation
//! - `engine`: engine adapters mapping node types to tree producers and input discovery
//!
//! The main entry point is [`compiler::link_graph`].

pub mod ast;
pub mod builder;
pub mod compiler;
pub mod dsl;
pub mod engine;
pub mod error;
pub mod graph;

pub use compiler::{CompileOptions, LinkedProgram, compile_graph, link_graph};
pub use dsl::{Edge, Graph, Node, NodeType, Stage};
pub use engine::{EngineAdapter, EngineContext};
pub use error::{CompileError, NodeError};
