//! Input discovery and splicing.
//!
//! A slot is an address inside a node's tree, never a live reference into it. Discovery only
//! reads the tree. Fillers are queued per node and written in one pre-order pass, so the
//! ordinals discovery assigned still point at the same expressions when splicing happens.

use std::collections::HashMap;

use glsl::syntax::{AssignmentOp, Declaration, Expr, ExternalDeclaration, StorageQualifier, TranslationUnit};
use glsl::visitor::{HostMut, Visit, VisitorMut};

use crate::ast::visit::{is_texture_sample, variable_name};
use crate::ast::{Flow, walk_exprs};
use crate::compiler::entry::EntryBinding;
use crate::compiler::hygiene::Renames;
use crate::compiler::node::NodeTree;
use crate::compiler::sections::{declared_names, has_storage};
use crate::dsl::Strategy;

/// Where a filler goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotTarget {
    /// Every read of `name`. With `drop_declaration`, its top-level declaration is removed.
    References { name: String, drop_declaration: bool },
    /// The `ordinal`-th texture sample call, counted in traversal order. The whole call is replaced.
    TextureCall { ordinal: usize },
    /// Right-hand side of the `ordinal`-th plain assignment to `variable`.
    AssignmentRhs { variable: String, ordinal: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSlot {
    pub id: String,
    pub target: SlotTarget,
}

impl InputSlot {
    pub fn new(id: impl Into<String>, target: SlotTarget) -> Self {
        Self { id: id.into(), target }
    }
}

/// Slots in discovery order. The first slot discovered under an id keeps it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputSlots {
    slots: Vec<InputSlot>,
}

impl InputSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&InputSlot> {
        self.slots.iter().find(|s| s.id == id)
    }

    /// Returns false if the id was already taken.
    pub fn insert_if_absent(&mut self, slot: InputSlot) -> bool {
        if self.get(&slot.id).is_some() {
            return false;
        }
        self.slots.push(slot);
        true
    }

    pub fn extend(&mut self, other: InputSlots) {
        for slot in other.slots {
            self.insert_if_absent(slot);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &InputSlot> {
        self.slots.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Maps between the names a node author wrote and the names left after normalization and
/// renaming. Slot ids use the former, slot targets the latter.
#[derive(Debug, Clone, Default)]
pub struct NameResolver {
    entry: Option<EntryBinding>,
    renames: Renames,
}

impl NameResolver {
    pub fn new(entry: Option<EntryBinding>, renames: Renames) -> Self {
        Self { entry, renames }
    }

    pub fn identity() -> Self {
        Self::default()
    }

    pub fn renamed(&self, original: &str) -> String {
        match &self.entry {
            Some(e) if e.bound == original => e.local.clone(),
            _ => self.renames.resolve(original).to_string(),
        }
    }

    pub fn original(&self, renamed: &str) -> String {
        match &self.entry {
            Some(e) if e.local == renamed => e.bound.clone(),
            _ => self.renames.original_of(renamed).to_string(),
        }
    }
}

/// Runs one strategy over a tree. Never mutates.
pub fn discover(strategy: &Strategy, tree: &NodeTree, names: &NameResolver) -> InputSlots {
    match strategy {
        Strategy::Uniform => match tree {
            NodeTree::Program(tu) => uniform_slots(tu, names),
            NodeTree::Expression(_) => InputSlots::new(),
        },
        Strategy::Texture2D => texture_slots(tree),
        Strategy::AssignmentTo { variable, slot } => {
            let id = slot.clone().unwrap_or_else(|| format!("filler_{variable}"));
            assignment_slot(tree, &names.renamed(variable), id)
        }
        Strategy::NamedAttribute { attribute } => {
            let name = names.renamed(attribute);
            let mut slots = InputSlots::new();
            if references(tree, &name) {
                slots.insert_if_absent(InputSlot::new(
                    format!("attribute_{attribute}"),
                    SlotTarget::References {
                        name,
                        drop_declaration: false,
                    },
                ));
            }
            slots
        }
        Strategy::Variable => variable_slots(tree, names),
        Strategy::HardCode => InputSlots::new(),
    }
}

/// Every uniform becomes `uniform_<name>`; filling it replaces its reads and drops the declaration.
pub fn uniform_slots(tu: &TranslationUnit, names: &NameResolver) -> InputSlots {
    let mut slots = InputSlots::new();
    for decl in &(tu.0).0 {
        if !has_storage(decl, |q| matches!(q, StorageQualifier::Uniform)) {
            continue;
        }
        for name in declared_names(decl) {
            slots.insert_if_absent(InputSlot::new(
                format!("uniform_{}", names.original(&name)),
                SlotTarget::References {
                    name,
                    drop_declaration: true,
                },
            ));
        }
    }
    slots
}

fn texture_slots(tree: &NodeTree) -> InputSlots {
    let mut slots = InputSlots::new();
    let mut ordinal = 0;
    tree.walk(|e| {
        if is_texture_sample(e) {
            slots.insert_if_absent(InputSlot::new(
                format!("texture2d_{ordinal}"),
                SlotTarget::TextureCall { ordinal },
            ));
            ordinal += 1;
        }
        Flow::Continue
    });
    slots
}

fn assigned_variable(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Assignment(lhs, AssignmentOp::Equal, _) => variable_name(lhs),
        _ => None,
    }
}

fn assignment_slot(tree: &NodeTree, variable: &str, id: String) -> InputSlots {
    let mut slots = InputSlots::new();
    let mut found = false;
    tree.walk(|e| {
        if assigned_variable(e) == Some(variable) {
            found = true;
            return Flow::Stop;
        }
        Flow::Continue
    });
    if found {
        slots.insert_if_absent(InputSlot::new(
            id,
            SlotTarget::AssignmentRhs {
                variable: variable.to_string(),
                ordinal: 0,
            },
        ));
    } else {
        log::debug!("no assignment to `{variable}` found; slot `{id}` not exposed");
    }
    slots
}

fn references(tree: &NodeTree, name: &str) -> bool {
    let mut found = false;
    tree.walk(|e| {
        if variable_name(e) == Some(name) {
            found = true;
            return Flow::Stop;
        }
        Flow::Continue
    });
    found
}

/// One slot per distinct identifier. A name read twice is one slot; filling it replaces both reads.
fn variable_slots(tree: &NodeTree, names: &NameResolver) -> InputSlots {
    let mut slots = InputSlots::new();
    tree.walk(|e| {
        if let Some(name) = variable_name(e) {
            slots.insert_if_absent(InputSlot::new(
                names.original(name),
                SlotTarget::References {
                    name: name.to_string(),
                    drop_declaration: false,
                },
            ));
        }
        Flow::Continue
    });
    slots
}

/// A queued fill: the slot it came from, where it goes, and what goes there.
#[derive(Debug, Clone)]
pub struct Splice {
    pub slot: String,
    pub target: SlotTarget,
    pub filler: Expr,
}

/// Applies every splice in one traversal. Returns the slot ids whose target was never reached,
/// which happens when an enclosing expression was itself replaced first.
pub fn apply_splices(tree: &mut NodeTree, splices: Vec<Splice>) -> Vec<String> {
    if splices.is_empty() {
        return Vec::new();
    }

    if let NodeTree::Program(tu) = tree {
        for s in &splices {
            if let SlotTarget::References {
                name,
                drop_declaration: true,
            } = &s.target
            {
                drop_global_declaration(tu, name);
            }
        }
    }

    let mut splicer = Splicer::default();
    for (i, s) in splices.iter().enumerate() {
        match &s.target {
            SlotTarget::References { name, .. } => {
                splicer.references.insert(name.clone(), i);
                splicer.applied.push(true);
            }
            SlotTarget::TextureCall { ordinal } => {
                splicer.textures.insert(*ordinal, i);
                splicer.applied.push(false);
            }
            SlotTarget::AssignmentRhs { variable, ordinal } => {
                splicer.assignments.insert((variable.clone(), *ordinal), i);
                splicer.applied.push(false);
            }
        }
    }
    splicer.fillers = splices.iter().map(|s| s.filler.clone()).collect();

    match tree {
        NodeTree::Program(tu) => tu.visit_mut(&mut splicer),
        NodeTree::Expression(e) => e.visit_mut(&mut splicer),
    }

    splices
        .into_iter()
        .zip(splicer.applied)
        .filter(|(_, applied)| !applied)
        .map(|(s, _)| s.slot)
        .collect()
}

#[derive(Default)]
struct Splicer {
    references: HashMap<String, usize>,
    textures: HashMap<usize, usize>,
    assignments: HashMap<(String, usize), usize>,
    fillers: Vec<Expr>,
    applied: Vec<bool>,
    textures_seen: usize,
    assignments_seen: HashMap<String, usize>,
}

impl Splicer {
    /// Keeps ordinals aligned with discovery after a subtree disappears.
    fn skip_counted(&mut self, removed: &Expr) {
        walk_exprs(removed, |e| {
            if is_texture_sample(e) {
                self.textures_seen += 1;
            }
            if let Some(v) = assigned_variable(e) {
                *self.assignments_seen.entry(v.to_string()).or_default() += 1;
            }
            Flow::Continue
        });
    }
}

impl VisitorMut for Splicer {
    fn visit_expr(&mut self, expr: &mut Expr) -> Visit {
        if is_texture_sample(expr) {
            let ordinal = self.textures_seen;
            self.textures_seen += 1;
            if let Some(&i) = self.textures.get(&ordinal) {
                let old = std::mem::replace(expr, self.fillers[i].clone());
                if let Expr::FunCall(_, args) = &old {
                    for arg in args {
                        self.skip_counted(arg);
                    }
                }
                self.applied[i] = true;
                return Visit::Parent;
            }
            return Visit::Children;
        }

        if let Expr::Assignment(lhs, AssignmentOp::Equal, rhs) = expr {
            if let Some(variable) = variable_name(lhs).map(str::to_string) {
                let seen = self.assignments_seen.entry(variable.clone()).or_default();
                let ordinal = *seen;
                *seen += 1;
                if let Some(&i) = self.assignments.get(&(variable, ordinal)) {
                    let old = std::mem::replace(&mut **rhs, self.fillers[i].clone());
                    self.skip_counted(&old);
                    self.applied[i] = true;
                    return Visit::Parent;
                }
            }
            return Visit::Children;
        }

        if let Expr::Variable(id) = expr {
            if let Some(&i) = self.references.get(&id.0) {
                *expr = self.fillers[i].clone();
                return Visit::Parent;
            }
        }
        Visit::Children
    }
}

/// Removes one declarator named `name` from the top level, and the declaration with it when
/// nothing else is left.
fn drop_global_declaration(tu: &mut TranslationUnit, name: &str) {
    let decls = &mut (tu.0).0;
    let Some(idx) = decls.iter().position(|d| declared_names(d).iter().any(|n| n == name)) else {
        return;
    };
    let ExternalDeclaration::Declaration(Declaration::InitDeclaratorList(list)) = &mut decls[idx] else {
        return;
    };
    let head_matches = list.head.name.as_ref().is_some_and(|n| n.0 == name);
    if head_matches && list.tail.is_empty() {
        decls.remove(idx);
    } else if head_matches {
        let next = list.tail.remove(0);
        list.head.name = Some(next.ident.ident);
        list.head.array_specifier = next.ident.array_spec;
        list.head.initializer = next.initializer;
    } else {
        list.tail.retain(|t| t.ident.ident.0 != name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{generate_expression, generate_program, parse_expression, parse_program};

    fn program(src: &str) -> NodeTree {
        NodeTree::Program(parse_program(src).unwrap())
    }

    fn splice(slots: &InputSlots, id: &str, filler: &str) -> Splice {
        let slot = slots.get(id).unwrap();
        Splice {
            slot: slot.id.clone(),
            target: slot.target.clone(),
            filler: parse_expression(filler).unwrap(),
        }
    }

    #[test]
    fn two_texture_calls_give_two_ordered_slots() {
        let tree = program(
            "uniform sampler2D a;\nuniform sampler2D b;\nin vec2 vUv;\nout vec4 c;\nvoid main() { c = texture2D(a, vUv) + texture2D(b, vUv); }\n",
        );
        let slots = discover(&Strategy::Texture2D, &tree, &NameResolver::identity());
        assert_eq!(slots.ids(), vec!["texture2d_0", "texture2d_1"]);
        assert_eq!(
            slots.get("texture2d_1").unwrap().target,
            SlotTarget::TextureCall { ordinal: 1 }
        );
    }

    #[test]
    fn texture_splices_replace_whole_calls_in_order() {
        let mut tree = program(
            "uniform sampler2D a;\nin vec2 vUv;\nout vec4 c;\nvoid main() { c = texture(a, vUv) * texture(a, vUv * 2.0); }\n",
        );
        let slots = discover(&Strategy::Texture2D, &tree, &NameResolver::identity());
        let unapplied = apply_splices(
            &mut tree,
            vec![splice(&slots, "texture2d_1", "second()"), splice(&slots, "texture2d_0", "first()")],
        );
        assert!(unapplied.is_empty());

        let expected =
            parse_program("uniform sampler2D a;\nin vec2 vUv;\nout vec4 c;\nvoid main() { c = first() * second(); }\n")
                .unwrap();
        assert_eq!(tree, NodeTree::Program(expected));
    }

    #[test]
    fn nested_sample_inside_a_replaced_call_is_reported() {
        let mut tree = program("uniform sampler2D a;\nvoid main() { vec4 c = texture(a, texture(a, vec2(0.0)).xy); }\n");
        let slots = discover(&Strategy::Texture2D, &tree, &NameResolver::identity());
        assert_eq!(slots.len(), 2);
        let unapplied = apply_splices(
            &mut tree,
            vec![splice(&slots, "texture2d_0", "outer()"), splice(&slots, "texture2d_1", "inner()")],
        );
        assert_eq!(unapplied, vec!["texture2d_1".to_string()]);
    }

    #[test]
    fn uniform_slots_use_original_names_and_drop_declarations() {
        let mut tu = parse_program("uniform float speed_4, scale_4;\nfloat f() { return speed_4 * scale_4; }\n").unwrap();
        let renames = crate::compiler::hygiene::rename_bindings(
            &mut parse_program("uniform float speed, scale;\nfloat f() { return speed * scale; }\n").unwrap(),
            &crate::compiler::hygiene::RenameOptions {
                preserve: &Default::default(),
                do_not_descope: &Default::default(),
                suffix: "4",
                function_names: &Default::default(),
            },
        )
        .unwrap();
        let names = NameResolver::new(None, renames);
        let slots = uniform_slots(&tu, &names);
        assert_eq!(slots.ids(), vec!["uniform_speed", "uniform_scale"]);

        let mut tree = NodeTree::Program(tu.clone());
        apply_splices(&mut tree, vec![splice(&slots, "uniform_speed", "main_9()")]);
        let expected = parse_program("uniform float scale_4;\nfloat f() { return main_9() * scale_4; }\n").unwrap();
        assert_eq!(tree, NodeTree::Program(expected));

        drop_global_declaration(&mut tu, "scale_4");
        assert_eq!(declared_names(&(tu.0).0[0]), vec!["speed_4"]);
    }

    #[test]
    fn assignment_rhs_is_replaced() {
        let mut tree = program("vec4 main_1() { vec4 entryResult; entryResult = vec4(1.0); return entryResult; }\n");
        let names = NameResolver::new(
            Some(EntryBinding {
                bound: "outputColor".into(),
                local: "entryResult".into(),
            }),
            Renames::default(),
        );
        let strategy = Strategy::AssignmentTo {
            variable: "outputColor".into(),
            slot: Some("color".into()),
        };
        let slots = discover(&strategy, &tree, &names);
        assert_eq!(slots.ids(), vec!["color"]);

        apply_splices(&mut tree, vec![splice(&slots, "color", "main_2()")]);
        let expected =
            parse_program("vec4 main_1() { vec4 entryResult; entryResult = main_2(); return entryResult; }\n").unwrap();
        assert_eq!(tree, NodeTree::Program(expected));
    }

    #[test]
    fn assignment_slot_defaults_to_filler_prefix() {
        let tree = program("void main() { x = 1.0; }\n");
        let strategy = Strategy::AssignmentTo {
            variable: "x".into(),
            slot: None,
        };
        assert_eq!(discover(&strategy, &tree, &NameResolver::identity()).ids(), vec!["filler_x"]);
        let missing = Strategy::AssignmentTo {
            variable: "y".into(),
            slot: None,
        };
        assert!(discover(&missing, &tree, &NameResolver::identity()).is_empty());
    }

    #[test]
    fn named_attribute_replaces_reads() {
        let mut tree = program("in vec3 position;\nvoid main() { gl_Position = vec4(position, 1.0); }\n");
        let strategy = Strategy::NamedAttribute {
            attribute: "position".into(),
        };
        let slots = discover(&strategy, &tree, &NameResolver::identity());
        assert_eq!(slots.ids(), vec!["attribute_position"]);

        apply_splices(&mut tree, vec![splice(&slots, "attribute_position", "displaced")]);
        let expected = parse_program("in vec3 position;\nvoid main() { gl_Position = vec4(displaced, 1.0); }\n").unwrap();
        assert_eq!(tree, NodeTree::Program(expected));
    }

    #[test]
    fn variable_strategy_first_match_wins_and_fills_every_read() {
        let mut tree = NodeTree::Expression(parse_expression("a * b + a").unwrap());
        let slots = discover(&Strategy::Variable, &tree, &NameResolver::identity());
        assert_eq!(slots.ids(), vec!["a", "b"]);

        apply_splices(&mut tree, vec![splice(&slots, "a", "x"), splice(&slots, "b", "y")]);
        let NodeTree::Expression(e) = &tree else {
            panic!("expression tree expected");
        };
        assert_eq!(e, &parse_expression("x * y + x").unwrap());
        assert!(generate_expression(e).contains('x'));
    }

    #[test]
    fn hard_code_exposes_nothing() {
        let tree = program("uniform float t;\nvoid main() { gl_FragColor = vec4(t); }\n");
        assert!(discover(&Strategy::HardCode, &tree, &NameResolver::identity()).is_empty());
        let NodeTree::Program(tu) = &tree else { unreachable!() };
        assert!(generate_program(tu).contains("uniform float t"));
    }
}
