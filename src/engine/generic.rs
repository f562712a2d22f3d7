//! Engine-agnostic adapter: hand-written GLSL, expressions, and data nodes.

use crate::engine::EngineAdapter;
use crate::engine::handlers::register_defaults;

/// Attributes, matrices and varyings every node may share without renaming.
pub const GENERIC_PRESERVE: &[&str] = &[
    "position",
    "normal",
    "uv",
    "modelMatrix",
    "viewMatrix",
    "projectionMatrix",
    "modelViewMatrix",
    "normalMatrix",
    "cameraPosition",
    "time",
    "resolution",
    "vUv",
    "vPosition",
    "vNormal",
];

pub fn generic_adapter() -> EngineAdapter {
    let mut adapter = EngineAdapter::new("generic", GENERIC_PRESERVE.iter().copied());
    register_defaults(&mut adapter);
    adapter
}
