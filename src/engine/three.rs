//! three.js flavoured adapter. Adds the engine's built-in uniforms and attributes to the
//! preserve set and handles its native materials.

use crate::dsl::NodeType;
use crate::engine::EngineAdapter;
use crate::engine::generic::GENERIC_PRESERVE;
use crate::engine::handlers::{EngineMaterialHandler, PropertyTable, register_defaults};

pub const THREE_PRESERVE: &[&str] = &[
    "isOrthographic",
    "logDepthBufFC",
    "toneMappingExposure",
    "ambientLightColor",
    "directionalLights",
    "pointLights",
    "spotLights",
    "hemisphereLights",
    "lightProbe",
    "envMap",
    "envMapIntensity",
    "flipEnvMap",
    "reflectivity",
    "refractionRatio",
    "fogColor",
    "fogNear",
    "fogFar",
    "fogDensity",
    "uv2",
    "tangent",
    "skinIndex",
    "skinWeight",
    "instanceMatrix",
    "vViewPosition",
    "vWorldPosition",
];

pub const PHYSICAL_PROPERTIES: PropertyTable = &[
    ("map", "map"),
    ("normalMap", "normalMap"),
    ("roughness", "roughness"),
    ("metalness", "metalness"),
    ("color", "diffuse"),
    ("emissive", "emissive"),
    ("opacity", "opacity"),
    ("roughnessMap", "roughnessMap"),
    ("metalnessMap", "metalnessMap"),
    ("bumpMap", "bumpMap"),
    ("displacementMap", "displacementMap"),
];

pub const PHONG_PROPERTIES: PropertyTable = &[
    ("map", "map"),
    ("normalMap", "normalMap"),
    ("color", "diffuse"),
    ("shininess", "shininess"),
    ("specular", "specular"),
    ("emissive", "emissive"),
    ("opacity", "opacity"),
];

pub const TOON_PROPERTIES: PropertyTable = &[("map", "map"), ("color", "diffuse"), ("gradientMap", "gradientMap")];

pub fn three_adapter() -> EngineAdapter {
    let mut adapter = EngineAdapter::new("three", GENERIC_PRESERVE.iter().copied());
    adapter.extend_preserve(THREE_PRESERVE.iter().copied());
    register_defaults(&mut adapter);
    adapter
        .register(NodeType::Physical, EngineMaterialHandler::new(PHYSICAL_PROPERTIES))
        .register(NodeType::Phong, EngineMaterialHandler::new(PHONG_PROPERTIES))
        .register(NodeType::Toon, EngineMaterialHandler::new(TOON_PROPERTIES));
    adapter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_native_materials_on_top_of_the_defaults() {
        let adapter = three_adapter();
        for ty in [NodeType::Physical, NodeType::Phong, NodeType::Toon, NodeType::Source, NodeType::Number] {
            assert!(adapter.handler(ty).is_ok(), "{ty}");
        }
        assert!(adapter.preserve().contains("cameraPosition"));
        assert!(adapter.preserve().contains("toneMappingExposure"));
    }
}
