//! Per-node identifier hygiene.
//!
//! Every binding declared in a node's top-level scope (global variables, struct types, functions)
//! gets the node's suffix so independently authored nodes can share one program. Function-local
//! names are left alone except where they shadow a renamed global, and parameters are suffixed
//! together with their uses.

use std::collections::{BTreeSet, HashMap, HashSet};

use glsl::syntax::{
    CaseLabel, Condition, Declaration, Expr, ExternalDeclaration, ForInitStatement, FunIdentifier,
    FunctionDefinition, FunctionParameterDeclaration, FunctionPrototype, Identifier, IterationStatement,
    JumpStatement, SelectionRestStatement, SimpleStatement, Statement, TranslationUnit, TypeSpecifierNonArray,
};
use glsl::visitor::{HostMut, Visit, VisitorMut};

use crate::ast;
use crate::compiler::sections::{declared_names, has_storage, is_interface_qualifier};
use crate::error::NodeError;

/// What a node's top level declares.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Scope {
    pub bindings: BTreeSet<String>,
    pub functions: BTreeSet<String>,
    pub types: BTreeSet<String>,
    /// Stage interface variables; these link across stages and keep their names.
    pub interface: BTreeSet<String>,
}

impl Scope {
    pub fn of(tu: &TranslationUnit) -> Result<Scope, NodeError> {
        let mut scope = Scope::default();
        for decl in &(tu.0).0 {
            match decl {
                ExternalDeclaration::Preprocessor(_) => {}
                ExternalDeclaration::FunctionDefinition(f) => {
                    scope.functions.insert(f.prototype.name.0.clone());
                }
                ExternalDeclaration::Declaration(d) => match d {
                    Declaration::FunctionPrototype(p) => {
                        scope.functions.insert(p.name.0.clone());
                    }
                    Declaration::InitDeclaratorList(list) => {
                        if let TypeSpecifierNonArray::Struct(s) = &list.head.ty.ty.ty {
                            if let Some(name) = &s.name {
                                scope.types.insert(name.0.clone());
                            }
                        }
                        let names = declared_names(decl);
                        if has_storage(decl, is_interface_qualifier) {
                            scope.interface.extend(names);
                        } else {
                            scope.bindings.extend(names);
                        }
                    }
                    Declaration::Precision(..) | Declaration::Global(..) => {}
                    Declaration::Block(block) => {
                        return Err(NodeError::UnsupportedBindingKind(format!(
                            "interface block `{}`",
                            block.name.0
                        )));
                    }
                },
            }
        }
        Ok(scope)
    }
}

/// Original -> new name for every top-level binding that was renamed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Renames {
    forward: HashMap<String, String>,
}

impl Renames {
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.forward.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn original_of<'a>(&'a self, renamed: &'a str) -> &'a str {
        self.forward
            .iter()
            .find(|(_, new)| new.as_str() == renamed)
            .map(|(old, _)| old.as_str())
            .unwrap_or(renamed)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

pub struct RenameOptions<'a> {
    /// Engine built-ins; never renamed.
    pub preserve: &'a HashSet<String>,
    /// Names an earlier pass made function-local.
    pub do_not_descope: &'a HashSet<String>,
    pub suffix: &'a str,
    /// Forced function renames (e.g. `main` -> `main_<id>`), applied before suffixing.
    pub function_names: &'a HashMap<String, String>,
}

pub fn suffixed(name: &str, suffix: &str) -> String {
    if name.ends_with('_') {
        format!("{name}{suffix}")
    } else {
        format!("{name}_{suffix}")
    }
}

pub fn rename_bindings(tu: &mut TranslationUnit, opts: &RenameOptions<'_>) -> Result<Renames, NodeError> {
    let scope = Scope::of(tu)?;
    let keep = |n: &str| opts.preserve.contains(n) || opts.do_not_descope.contains(n);

    let rename_all = |names: &BTreeSet<String>| -> HashMap<String, String> {
        names
            .iter()
            .filter(|n| !keep(n))
            .map(|n| (n.clone(), suffixed(n, opts.suffix)))
            .collect()
    };
    let vars = rename_all(&scope.bindings);
    let types = rename_all(&scope.types);
    let mut functions = HashMap::new();
    for f in &scope.functions {
        if let Some(forced) = opts.function_names.get(f) {
            functions.insert(f.clone(), forced.clone());
        } else if !keep(f) {
            functions.insert(f.clone(), suffixed(f, opts.suffix));
        }
    }

    let mut renamer = Renamer {
        frames: vec![vars.clone()],
        functions,
        types,
        opts,
        error: None,
    };
    for decl in &mut (tu.0).0 {
        renamer.top_level(decl);
    }
    if let Some(e) = renamer.error {
        return Err(e);
    }

    let mut forward = vars;
    forward.extend(renamer.types);
    forward.extend(renamer.functions);
    log::debug!("renamed {} bindings with suffix `{}`", forward.len(), opts.suffix);
    Ok(Renames { forward })
}

type Frame = HashMap<String, String>;

fn lookup<'f>(frames: &'f [Frame], name: &str) -> Option<&'f String> {
    frames.iter().rev().find_map(|f| f.get(name))
}

fn shadowed(frames: &[Frame], name: &str) -> bool {
    frames.iter().skip(1).any(|f| f.contains_key(name))
}

fn root_identifier(expr: &Expr) -> Option<&Identifier> {
    match expr {
        Expr::Variable(id) => Some(id),
        Expr::Dot(e, _) | Expr::Bracket(e, _) => root_identifier(e),
        _ => None,
    }
}

fn root_identifier_mut(expr: &mut Expr) -> Option<&mut Identifier> {
    match expr {
        Expr::Variable(id) => Some(id),
        Expr::Dot(e, _) | Expr::Bracket(e, _) => root_identifier_mut(e),
        _ => None,
    }
}

/// Rewrites references inside expressions and type specifiers.
struct ExprRenamer<'r> {
    frames: &'r [Frame],
    functions: &'r HashMap<String, String>,
    types: &'r HashMap<String, String>,
    error: Option<NodeError>,
}

impl ExprRenamer<'_> {
    fn callee(&self, name: &str) -> Option<&String> {
        if shadowed(self.frames, name) {
            return None;
        }
        self.functions.get(name).or_else(|| self.types.get(name))
    }
}

impl VisitorMut for ExprRenamer<'_> {
    fn visit_expr(&mut self, expr: &mut Expr) -> Visit {
        match expr {
            Expr::Variable(id) => {
                if let Some(new) = lookup(self.frames, &id.0) {
                    id.0 = new.clone();
                }
            }
            Expr::FunCall(FunIdentifier::Identifier(id), _) => {
                if let Some(new) = self.callee(&id.0) {
                    id.0 = new.clone();
                }
            }
            Expr::FunCall(FunIdentifier::Expr(callee), _) => {
                // Postfix call: rename the specifier identifier nested inside, never the wrapper.
                let target = root_identifier(callee).map(|id| self.callee(&id.0).cloned());
                match target {
                    Some(Some(new)) => {
                        if let Some(id) = root_identifier_mut(callee) {
                            id.0 = new;
                        }
                    }
                    Some(None) => {}
                    None => {
                        let text = ast::generate_expression(callee);
                        self.error
                            .get_or_insert(NodeError::UnsupportedBindingKind(format!("call through `{text}`")));
                    }
                }
            }
            _ => {}
        }
        Visit::Children
    }

    fn visit_type_specifier_non_array(&mut self, ty: &mut TypeSpecifierNonArray) -> Visit {
        if let TypeSpecifierNonArray::TypeName(tn) = ty {
            if !shadowed(self.frames, &tn.0) {
                if let Some(new) = self.types.get(&tn.0) {
                    tn.0 = new.clone();
                }
            }
        }
        Visit::Children
    }
}

struct Renamer<'o> {
    /// `frames[0]` is the top-level scope; later frames are function and block scopes.
    frames: Vec<Frame>,
    functions: HashMap<String, String>,
    types: HashMap<String, String>,
    opts: &'o RenameOptions<'o>,
    error: Option<NodeError>,
}

impl Renamer<'_> {
    fn keep(&self, name: &str) -> bool {
        self.opts.preserve.contains(name) || self.opts.do_not_descope.contains(name)
    }

    fn fail(&mut self, e: NodeError) {
        self.error.get_or_insert(e);
    }

    fn refs<H: HostMut>(&mut self, host: &mut H) {
        let mut v = ExprRenamer {
            frames: &self.frames,
            functions: &self.functions,
            types: &self.types,
            error: None,
        };
        host.visit_mut(&mut v);
        if let Some(e) = v.error {
            self.fail(e);
        }
    }

    fn declare_local(&mut self, id: &Identifier) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(id.0.clone(), id.0.clone());
        }
    }

    fn rename_global(&self, id: &mut Identifier) {
        if let Some(new) = self.frames.first().and_then(|f| f.get(&id.0)) {
            id.0 = new.clone();
        }
    }

    fn top_level(&mut self, decl: &mut ExternalDeclaration) {
        match decl {
            ExternalDeclaration::Preprocessor(_) => {}
            ExternalDeclaration::Declaration(d) => self.declaration(d, true),
            ExternalDeclaration::FunctionDefinition(f) => self.function(f),
        }
    }

    fn declaration(&mut self, d: &mut Declaration, top_level: bool) {
        match d {
            Declaration::InitDeclaratorList(list) => {
                // Types and initializers resolve against the scope before this declaration.
                self.refs(list);
                if top_level {
                    if let TypeSpecifierNonArray::Struct(s) = &mut list.head.ty.ty.ty {
                        if let Some(tn) = &mut s.name {
                            if let Some(new) = self.types.get(&tn.0) {
                                tn.0 = new.clone();
                            }
                        }
                    }
                    if let Some(id) = &mut list.head.name {
                        self.rename_global(id);
                    }
                    for t in &mut list.tail {
                        self.rename_global(&mut t.ident.ident);
                    }
                } else {
                    if let Some(id) = &list.head.name {
                        self.declare_local(id);
                    }
                    for t in &list.tail {
                        self.declare_local(&t.ident.ident);
                    }
                }
            }
            Declaration::FunctionPrototype(p) => {
                let mut frame = Frame::new();
                self.prototype(p, &mut frame);
            }
            Declaration::Precision(..) => {}
            Declaration::Global(_, idents) => {
                for id in idents {
                    self.rename_global(id);
                }
            }
            Declaration::Block(block) => {
                let name = block.name.0.clone();
                self.fail(NodeError::UnsupportedBindingKind(format!("interface block `{name}`")));
            }
        }
    }

    fn prototype(&mut self, p: &mut FunctionPrototype, frame: &mut Frame) {
        if let Some(new) = self.functions.get(&p.name.0) {
            p.name.0 = new.clone();
        }
        self.refs(&mut p.ty);
        for param in &mut p.parameters {
            match param {
                FunctionParameterDeclaration::Named(_, decl) => {
                    self.refs(&mut decl.ty);
                    let id = &mut decl.ident.ident;
                    let new = if self.keep(&id.0) {
                        id.0.clone()
                    } else {
                        suffixed(&id.0, self.opts.suffix)
                    };
                    frame.insert(id.0.clone(), new.clone());
                    id.0 = new;
                }
                FunctionParameterDeclaration::Unnamed(_, ty) => self.refs(ty),
            }
        }
    }

    fn function(&mut self, f: &mut FunctionDefinition) {
        let mut frame = Frame::new();
        self.prototype(&mut f.prototype, &mut frame);
        self.frames.push(frame);
        self.frames.push(Frame::new());
        for s in &mut f.statement.statement_list {
            self.statement(s);
        }
        self.frames.pop();
        self.frames.pop();
    }

    fn scoped(&mut self, s: &mut Statement) {
        self.frames.push(Frame::new());
        self.statement(s);
        self.frames.pop();
    }

    fn statement(&mut self, s: &mut Statement) {
        match s {
            Statement::Compound(c) => {
                self.frames.push(Frame::new());
                for s in &mut c.statement_list {
                    self.statement(s);
                }
                self.frames.pop();
            }
            Statement::Simple(s) => self.simple(s),
        }
    }

    fn simple(&mut self, s: &mut SimpleStatement) {
        match s {
            SimpleStatement::Declaration(d) => self.declaration(d, false),
            SimpleStatement::Expression(e) => self.refs(e),
            SimpleStatement::Selection(sel) => {
                self.refs(&mut sel.cond);
                match &mut sel.rest {
                    SelectionRestStatement::Statement(s) => self.scoped(s),
                    SelectionRestStatement::Else(a, b) => {
                        self.scoped(a);
                        self.scoped(b);
                    }
                }
            }
            SimpleStatement::Switch(sw) => {
                self.refs(&mut sw.head);
                self.frames.push(Frame::new());
                for s in &mut sw.body {
                    self.statement(s);
                }
                self.frames.pop();
            }
            SimpleStatement::CaseLabel(label) => {
                if let CaseLabel::Case(e) = label {
                    self.refs(e);
                }
            }
            SimpleStatement::Iteration(it) => self.iteration(it),
            SimpleStatement::Jump(j) => {
                if let JumpStatement::Return(Some(e)) = j {
                    self.refs(e);
                }
            }
        }
    }

    fn iteration(&mut self, it: &mut IterationStatement) {
        match it {
            IterationStatement::While(cond, body) => {
                self.frames.push(Frame::new());
                self.condition(cond);
                self.statement(body);
                self.frames.pop();
            }
            IterationStatement::DoWhile(body, e) => {
                self.scoped(body);
                self.refs(e);
            }
            IterationStatement::For(init, rest, body) => {
                self.frames.push(Frame::new());
                match init {
                    ForInitStatement::Expression(e) => self.refs(e),
                    ForInitStatement::Declaration(d) => self.declaration(d, false),
                }
                if let Some(c) = &mut rest.condition {
                    self.condition(c);
                }
                if let Some(e) = &mut rest.post_expr {
                    self.refs(e);
                }
                self.statement(body);
                self.frames.pop();
            }
        }
    }

    fn condition(&mut self, c: &mut Condition) {
        match c {
            Condition::Expr(e) => self.refs(e),
            Condition::Assignment(ty, id, init) => {
                self.refs(ty);
                self.refs(init);
                self.declare_local(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{parse_program, walk_exprs, Flow};
    use crate::ast::visit::{called_function, variable_name};

    fn rename(src: &str, preserve: &[&str]) -> (TranslationUnit, Renames) {
        let mut tu = parse_program(src).unwrap();
        let preserve: HashSet<String> = preserve.iter().map(|s| s.to_string()).collect();
        let dnd = HashSet::new();
        let fnames = HashMap::from([("main".to_string(), "main_7".to_string())]);
        let renames = rename_bindings(
            &mut tu,
            &RenameOptions {
                preserve: &preserve,
                do_not_descope: &dnd,
                suffix: "7",
                function_names: &fnames,
            },
        )
        .unwrap();
        (tu, renames)
    }

    fn variables(tu: &TranslationUnit) -> Vec<String> {
        let mut out = Vec::new();
        walk_exprs(tu, |e| {
            if let Some(n) = variable_name(e) {
                out.push(n.to_string());
            }
            Flow::Continue
        });
        out
    }

    fn calls(tu: &TranslationUnit) -> Vec<String> {
        let mut out = Vec::new();
        walk_exprs(tu, |e| {
            if let Some(n) = called_function(e) {
                out.push(n.to_string());
            }
            Flow::Continue
        });
        out
    }

    #[test]
    fn scope_collects_top_level_bindings() {
        let tu = parse_program(
            "in vec2 vUv;\nuniform float speed;\nstruct Light { vec3 c; };\nfloat helper(float x);\nvoid main() { float local = speed; }\n",
        )
        .unwrap();
        let scope = Scope::of(&tu).unwrap();
        assert!(scope.bindings.contains("speed"));
        assert!(!scope.bindings.contains("local"));
        assert!(scope.interface.contains("vUv"));
        assert!(scope.types.contains("Light"));
        assert!(scope.functions.contains("helper") && scope.functions.contains("main"));
    }

    #[test]
    fn suffixes_globals_functions_and_uses() {
        let (tu, renames) = rename(
            "uniform float speed;\nuniform float time;\nfloat helper(float x) { return x * speed; }\nvoid main() { float v = helper(time); }\n",
            &["time"],
        );
        assert_eq!(renames.resolve("speed"), "speed_7");
        assert_eq!(renames.resolve("time"), "time");
        assert_eq!(renames.resolve("main"), "main_7");
        assert_eq!(renames.original_of("helper_7"), "helper");

        assert_eq!(calls(&tu), vec!["helper_7"]);
        assert_eq!(variables(&tu), vec!["x_7", "speed_7", "time"]);
    }

    #[test]
    fn locals_shadow_globals() {
        let (tu, _) = rename(
            "float speed = 1.0;\nvoid main() { float a = speed; { float speed = 2.0; a = speed; } a = speed; }\n",
            &[],
        );
        assert_eq!(variables(&tu), vec!["speed_7", "a", "speed", "a", "speed_7"]);
    }

    #[test]
    fn struct_types_and_constructors_are_renamed() {
        let (tu, renames) = rename(
            "struct Light { vec3 color; };\nvec3 shade(Light l) { return l.color; }\nvoid main() { Light l = Light(vec3(1.0)); }\n",
            &[],
        );
        assert_eq!(renames.resolve("Light"), "Light_7");
        assert!(calls(&tu).contains(&"Light_7".to_string()));
        assert!(!calls(&tu).contains(&"Light".to_string()));
    }

    #[test]
    fn preserved_and_do_not_descope_names_stay() {
        let mut tu = parse_program("uniform mat4 viewMatrix;\nvec4 result;\nvoid main() { result = viewMatrix[0]; }\n").unwrap();
        let preserve = HashSet::from(["viewMatrix".to_string()]);
        let dnd = HashSet::from(["result".to_string()]);
        rename_bindings(
            &mut tu,
            &RenameOptions {
                preserve: &preserve,
                do_not_descope: &dnd,
                suffix: "3",
                function_names: &HashMap::new(),
            },
        )
        .unwrap();
        assert_eq!(variables(&tu), vec!["result", "viewMatrix"]);
    }

    #[test]
    fn interface_blocks_are_unsupported() {
        let mut tu = parse_program("uniform Globals { float t; } globals;\nvoid main() {}\n").unwrap();
        let err = rename_bindings(
            &mut tu,
            &RenameOptions {
                preserve: &HashSet::new(),
                do_not_descope: &HashSet::new(),
                suffix: "1",
                function_names: &HashMap::new(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, NodeError::UnsupportedBindingKind(k) if k.contains("Globals")));
    }
}
