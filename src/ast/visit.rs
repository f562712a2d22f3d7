//! Expression traversal with explicit control flow.
//!
//! Traversal is pre-order in the `glsl` visitor's order, which is also source order. Both
//! input discovery and splicing walk through here so that ordinals agree between them.

use glsl::syntax::{Expr, FunIdentifier};
use glsl::visitor::{Host, HostMut, Visit, Visitor, VisitorMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Do not descend into the current expression's children.
    SkipSubtree,
    /// End the whole traversal.
    Stop,
}

struct ExprWalker<F> {
    f: F,
    stopped: bool,
}

impl<F> ExprWalker<F> {
    fn control(&mut self, flow: Flow) -> Visit {
        match flow {
            Flow::Continue => Visit::Children,
            Flow::SkipSubtree => Visit::Parent,
            Flow::Stop => {
                self.stopped = true;
                Visit::Parent
            }
        }
    }
}

impl<F: FnMut(&Expr) -> Flow> Visitor for ExprWalker<F> {
    fn visit_expr(&mut self, expr: &Expr) -> Visit {
        if self.stopped {
            return Visit::Parent;
        }
        let flow = (self.f)(expr);
        self.control(flow)
    }
}

impl<F: FnMut(&mut Expr) -> Flow> VisitorMut for ExprWalker<F> {
    fn visit_expr(&mut self, expr: &mut Expr) -> Visit {
        if self.stopped {
            return Visit::Parent;
        }
        let flow = (self.f)(expr);
        self.control(flow)
    }
}

pub fn walk_exprs<H: Host>(host: &H, f: impl FnMut(&Expr) -> Flow) {
    let mut walker = ExprWalker { f, stopped: false };
    host.visit(&mut walker);
}

pub fn walk_exprs_mut<H: HostMut>(host: &mut H, f: impl FnMut(&mut Expr) -> Flow) {
    let mut walker = ExprWalker { f, stopped: false };
    host.visit_mut(&mut walker);
}

/// Name of a plain identifier expression.
pub fn variable_name(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Variable(id) => Some(id.0.as_str()),
        _ => None,
    }
}

/// Name of the function a call expression invokes, when it is a plain identifier.
pub fn called_function(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::FunCall(FunIdentifier::Identifier(id), _) => Some(id.0.as_str()),
        Expr::FunCall(FunIdentifier::Expr(callee), _) => variable_name(callee),
        _ => None,
    }
}

pub fn is_texture_sample(expr: &Expr) -> bool {
    matches!(called_function(expr), Some("texture2D" | "texture"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse_program;

    #[test]
    fn visits_in_source_order_and_stops() {
        let tu = parse_program("void main() { float a = x; float b = y; float c = z; }").unwrap();
        let mut seen = Vec::new();
        walk_exprs(&tu, |e| {
            if let Some(name) = variable_name(e) {
                seen.push(name.to_string());
                if name == "y" {
                    return Flow::Stop;
                }
            }
            Flow::Continue
        });
        assert_eq!(seen, vec!["x", "y"]);
    }

    #[test]
    fn skip_subtree_hides_children() {
        let tu = parse_program("void main() { float a = f(x) + y; }").unwrap();
        let mut seen = Vec::new();
        walk_exprs(&tu, |e| {
            if called_function(e).is_some() {
                return Flow::SkipSubtree;
            }
            if let Some(name) = variable_name(e) {
                seen.push(name.to_string());
            }
            Flow::Continue
        });
        assert_eq!(seen, vec!["y"]);
    }
}
