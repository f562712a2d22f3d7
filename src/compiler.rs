//! Node and graph compilation.
//!
//! A compile pass validates the graph, then walks each stage from its Output node. Every node
//! reached is compiled once (`node`), its inputs are filled with upstream fillers (`strategy`),
//! and its top-level statements are folded into the stage's sections (`sections`). The two
//! stages are then assembled into complete programs (`graph::generate`).

pub mod entry;
pub mod graph;
pub mod hygiene;
pub mod node;
pub mod preprocess;
pub mod sections;
pub mod strategy;
pub mod upgrade;

use serde::{Deserialize, Serialize};

use crate::dsl::GlslVersion;

pub use graph::{CompiledGraph, DataInput, LinkedProgram, StageOutput, compile_graph, generate, link_graph};

/// Knobs for one compile pass. Missing fields in JSON take the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompileOptions {
    /// GLSL flavour of the linked programs. Version 2 nodes are upgraded when this is 3.
    pub target_version: GlslVersion,
    /// Float precision declared in the fragment program when no node declares one.
    pub default_precision: String,
    /// Fragment output variable written by the driver `main`.
    pub fragment_output: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            target_version: GlslVersion::V3,
            default_precision: "highp".to_string(),
            fragment_output: "graphFragColor".to_string(),
        }
    }
}
