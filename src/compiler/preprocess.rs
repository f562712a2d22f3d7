//! Minimal line-based GLSL preprocessor, run before parsing when a node asks for it.
//!
//! Object-like `#define`s are expanded and conditional blocks resolved. Function-like
//! macros, `#version`, `#extension` and `#pragma` are passed through for the parser.
//! The stage macro (`VERTEX` or `FRAGMENT`) is always defined.

use std::collections::{HashMap, HashSet};

use crate::dsl::Stage;
use crate::error::NodeError;

const MAX_EXPANSION_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy)]
struct Branch {
    parent_active: bool,
    active: bool,
    taken: bool,
    seen_else: bool,
}

#[derive(Debug, Default)]
struct Defines {
    object: HashMap<String, String>,
    function: HashSet<String>,
}

impl Defines {
    fn is_defined(&self, name: &str) -> bool {
        self.object.contains_key(name) || self.function.contains(name)
    }
}

pub fn preprocess(source: &str, stage: Stage) -> Result<String, NodeError> {
    let mut defines = Defines::default();
    let stage_macro = match stage {
        Stage::Vertex => "VERTEX",
        Stage::Fragment => "FRAGMENT",
    };
    defines.object.insert(stage_macro.to_string(), String::new());

    let mut stack: Vec<Branch> = Vec::new();
    let mut out = String::with_capacity(source.len());

    for (lineno, line) in logical_lines(source) {
        let active = stack.last().is_none_or(|b| b.active);
        let trimmed = line.trim_start();
        let Some(directive) = trimmed.strip_prefix('#') else {
            if active {
                out.push_str(&expand(&line, &defines));
            }
            out.push('\n');
            continue;
        };

        let directive = directive.trim_start();
        let (keyword, rest) = split_word(directive);
        let err = |msg: String| NodeError::Preprocess(format!("line {lineno}: {msg}"));
        match keyword {
            "ifdef" | "ifndef" => {
                let (name, _) = split_word(rest);
                let cond = defines.is_defined(name) == (keyword == "ifdef");
                stack.push(Branch {
                    parent_active: active,
                    active: active && cond,
                    taken: cond,
                    seen_else: false,
                });
            }
            "if" => {
                let cond = active && eval(rest, &defines).map_err(err)? != 0;
                stack.push(Branch {
                    parent_active: active,
                    active: cond,
                    taken: cond,
                    seen_else: false,
                });
            }
            "elif" => {
                let b = stack.last_mut().ok_or_else(|| err("#elif without #if".into()))?;
                if b.seen_else {
                    return Err(err("#elif after #else".into()));
                }
                if b.taken || !b.parent_active {
                    b.active = false;
                } else {
                    let cond = eval(rest, &defines).map_err(err)? != 0;
                    b.active = cond;
                    b.taken = cond;
                }
            }
            "else" => {
                let b = stack.last_mut().ok_or_else(|| err("#else without #if".into()))?;
                if b.seen_else {
                    return Err(err("duplicate #else".into()));
                }
                b.seen_else = true;
                b.active = b.parent_active && !b.taken;
                b.taken = true;
            }
            "endif" => {
                stack.pop().ok_or_else(|| err("#endif without #if".into()))?;
            }
            _ if !active => {}
            "define" => {
                let (name, function_like, body) = split_macro_name(rest);
                if name.is_empty() {
                    return Err(err("#define without a name".into()));
                }
                if function_like {
                    defines.function.insert(name.to_string());
                    out.push_str(&line);
                } else {
                    defines.object.insert(name.to_string(), body.trim().to_string());
                }
            }
            "undef" => {
                let (name, _) = split_word(rest);
                defines.object.remove(name);
                defines.function.remove(name);
            }
            "error" => return Err(err(format!("#error {}", rest.trim()))),
            _ => out.push_str(&line),
        }
        out.push('\n');
    }

    if !stack.is_empty() {
        return Err(NodeError::Preprocess(format!("{} unterminated conditional block(s)", stack.len())));
    }
    Ok(out)
}

/// Lines with backslash continuations joined, numbered from 1 by their first physical line.
fn logical_lines(source: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut pending: Option<(usize, String)> = None;
    for (i, raw) in source.lines().enumerate() {
        let (start, mut text) = pending.take().unwrap_or((i + 1, String::new()));
        match raw.strip_suffix('\\') {
            Some(head) => {
                text.push_str(head);
                pending = Some((start, text));
            }
            None => {
                text.push_str(raw);
                lines.push((start, text));
            }
        }
    }
    lines.extend(pending);
    lines
}

fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    let end = s.find(|c: char| !is_ident_char(c)).unwrap_or(s.len());
    (&s[..end], &s[end..])
}

/// Splits a `#define` into name, whether it is function-like, and body. Only a `(` directly
/// after the name makes a function-like macro; `#define X (a)` is object-like.
fn split_macro_name(s: &str) -> (&str, bool, &str) {
    let (name, rest) = split_word(s);
    let function_like = rest.starts_with('(');
    (name, function_like, rest.trim_start())
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn expand(line: &str, defines: &Defines) -> String {
    let (code, comment) = match line.find("//") {
        Some(at) => line.split_at(at),
        None => (line, ""),
    };
    let mut out = expand_code(code, defines, &mut Vec::new());
    out.push_str(comment);
    out
}

fn expand_code(code: &str, defines: &Defines, hiding: &mut Vec<String>) -> String {
    let mut out = String::with_capacity(code.len());
    let mut chars = code.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        if c.is_ascii_digit() || (c == '.' && chars.peek().is_some_and(|(_, n)| n.is_ascii_digit())) {
            // Numeric literals, including suffixes and exponents.
            let mut end = start + c.len_utf8();
            while let Some(&(i, n)) = chars.peek() {
                if is_ident_char(n) || n == '.' {
                    end = i + n.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            out.push_str(&code[start..end]);
        } else if c.is_ascii_alphabetic() || c == '_' {
            let mut end = start + c.len_utf8();
            while let Some(&(i, n)) = chars.peek() {
                if is_ident_char(n) {
                    end = i + n.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            let word = &code[start..end];
            match defines.object.get(word) {
                Some(body) if !hiding.iter().any(|h| h == word) && hiding.len() < MAX_EXPANSION_DEPTH => {
                    hiding.push(word.to_string());
                    out.push_str(&expand_code(body, defines, hiding));
                    hiding.pop();
                }
                _ => out.push_str(word),
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Int(i64),
    Ident(String),
    Op(&'static str),
}

const OPS: [&str; 17] = [
    "&&", "||", "==", "!=", "<=", ">=", "<", ">", "!", "(", ")", "+", "-", "*", "/", "%", ",",
];

fn tokenize(expr: &str) -> Result<Vec<Tok>, String> {
    let mut toks = Vec::new();
    let mut rest = expr.trim();
    while !rest.is_empty() {
        let c = rest.chars().next().unwrap_or(' ');
        if c.is_whitespace() {
            rest = rest.trim_start();
        } else if c.is_ascii_digit() {
            let end = rest.find(|c: char| !is_ident_char(c)).unwrap_or(rest.len());
            let lit = rest[..end].trim_end_matches(['u', 'U']);
            let value = if let Some(hex) = lit.strip_prefix("0x").or_else(|| lit.strip_prefix("0X")) {
                i64::from_str_radix(hex, 16)
            } else {
                lit.parse::<i64>()
            }
            .map_err(|_| format!("bad integer `{}`", &rest[..end]))?;
            toks.push(Tok::Int(value));
            rest = &rest[end..];
        } else if c.is_ascii_alphabetic() || c == '_' {
            let (word, tail) = split_word(rest);
            toks.push(Tok::Ident(word.to_string()));
            rest = tail;
        } else if rest.starts_with("//") {
            break;
        } else {
            let op = OPS
                .iter()
                .find(|op| rest.starts_with(**op))
                .ok_or_else(|| format!("unexpected `{c}` in #if expression"))?;
            toks.push(Tok::Op(*op));
            rest = &rest[op.len()..];
        }
    }
    Ok(toks)
}

fn eval(expr: &str, defines: &Defines) -> Result<i64, String> {
    eval_depth(expr, defines, 0)
}

fn eval_depth(expr: &str, defines: &Defines, depth: usize) -> Result<i64, String> {
    if depth > MAX_EXPANSION_DEPTH {
        return Err("macro expansion too deep in #if expression".into());
    }
    let toks = tokenize(expr)?;
    if toks.is_empty() {
        return Err("empty #if expression".into());
    }
    let mut p = CondParser {
        toks: &toks,
        pos: 0,
        defines,
        depth,
    };
    let v = p.or()?;
    if p.pos != toks.len() {
        return Err(format!("trailing tokens in #if expression `{}`", expr.trim()));
    }
    Ok(v)
}

/// Recursive descent over C preprocessor precedence, lowest first.
struct CondParser<'a> {
    toks: &'a [Tok],
    pos: usize,
    defines: &'a Defines,
    depth: usize,
}

impl CondParser<'_> {
    fn peek_op(&self, op: &str) -> bool {
        matches!(self.toks.get(self.pos), Some(Tok::Op(o)) if *o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        let hit = self.peek_op(op);
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn or(&mut self) -> Result<i64, String> {
        let mut v = self.and()?;
        while self.eat_op("||") {
            let r = self.and()?;
            v = i64::from(v != 0 || r != 0);
        }
        Ok(v)
    }

    fn and(&mut self) -> Result<i64, String> {
        let mut v = self.equality()?;
        while self.eat_op("&&") {
            let r = self.equality()?;
            v = i64::from(v != 0 && r != 0);
        }
        Ok(v)
    }

    fn equality(&mut self) -> Result<i64, String> {
        let mut v = self.relational()?;
        loop {
            if self.eat_op("==") {
                v = i64::from(v == self.relational()?);
            } else if self.eat_op("!=") {
                v = i64::from(v != self.relational()?);
            } else {
                return Ok(v);
            }
        }
    }

    fn relational(&mut self) -> Result<i64, String> {
        let mut v = self.additive()?;
        loop {
            if self.eat_op("<=") {
                v = i64::from(v <= self.additive()?);
            } else if self.eat_op(">=") {
                v = i64::from(v >= self.additive()?);
            } else if self.eat_op("<") {
                v = i64::from(v < self.additive()?);
            } else if self.eat_op(">") {
                v = i64::from(v > self.additive()?);
            } else {
                return Ok(v);
            }
        }
    }

    fn additive(&mut self) -> Result<i64, String> {
        let mut v = self.multiplicative()?;
        loop {
            if self.eat_op("+") {
                v = v.wrapping_add(self.multiplicative()?);
            } else if self.eat_op("-") {
                v = v.wrapping_sub(self.multiplicative()?);
            } else {
                return Ok(v);
            }
        }
    }

    fn multiplicative(&mut self) -> Result<i64, String> {
        let mut v = self.unary()?;
        loop {
            if self.eat_op("*") {
                v = v.wrapping_mul(self.unary()?);
            } else if self.eat_op("/") || self.eat_op("%") {
                let is_div = matches!(self.toks.get(self.pos - 1), Some(Tok::Op("/")));
                let r = self.unary()?;
                if r == 0 {
                    return Err("division by zero in #if expression".into());
                }
                v = if is_div { v.wrapping_div(r) } else { v.wrapping_rem(r) };
            } else {
                return Ok(v);
            }
        }
    }

    fn unary(&mut self) -> Result<i64, String> {
        if self.eat_op("!") {
            return Ok(i64::from(self.unary()? == 0));
        }
        if self.eat_op("-") {
            return Ok(self.unary()?.wrapping_neg());
        }
        if self.eat_op("+") {
            return self.unary();
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<i64, String> {
        let tok = self.toks.get(self.pos).cloned().ok_or("unexpected end of #if expression")?;
        self.pos += 1;
        match tok {
            Tok::Int(v) => Ok(v),
            Tok::Op("(") => {
                let v = self.or()?;
                if !self.eat_op(")") {
                    return Err("missing `)` in #if expression".into());
                }
                Ok(v)
            }
            Tok::Ident(name) if name == "defined" => {
                let paren = self.eat_op("(");
                let Some(Tok::Ident(target)) = self.toks.get(self.pos) else {
                    return Err("`defined` expects an identifier".into());
                };
                self.pos += 1;
                if paren && !self.eat_op(")") {
                    return Err("missing `)` after defined(".into());
                }
                Ok(i64::from(self.defines.is_defined(target)))
            }
            Tok::Ident(name) => match self.defines.object.get(&name) {
                Some(body) if !body.trim().is_empty() => eval_depth(body, self.defines, self.depth + 1),
                // Undefined identifiers and empty macros evaluate to zero.
                _ => Ok(0),
            },
            Tok::Op(op) => Err(format!("unexpected `{op}` in #if expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code_lines(s: &str) -> Vec<&str> {
        s.lines().map(str::trim).filter(|l| !l.is_empty()).collect()
    }

    #[test]
    fn expands_object_like_defines() {
        let out = preprocess(
            "#define SCALE 2.0\n#define TWICE (SCALE * SCALE)\nfloat f() { return TWICE; } // SCALE stays\n",
            Stage::Fragment,
        )
        .unwrap();
        assert_eq!(code_lines(&out), vec!["float f() { return (2.0 * 2.0); } // SCALE stays"]);
    }

    #[test]
    fn parenthesized_bodies_are_object_like() {
        let src = "#define N 3\n#define SQ_N (N * N)\n#define AREA(w) (w * w)\n#if SQ_N > 8\nbig\n#endif\nint x = SQ_N;\n";
        let out = preprocess(src, Stage::Fragment).unwrap();
        assert_eq!(
            code_lines(&out),
            vec!["#define AREA(w) (w * w)", "big", "int x = (3 * 3);"]
        );
    }

    #[test]
    fn resolves_conditionals() {
        let src = "#define USE_MAP\n#define LEVEL 2\n#ifdef USE_MAP\nA\n#else\nB\n#endif\n#if LEVEL > 1 && !defined(NOPE)\nC\n#elif 1\nD\n#endif\n#ifndef USE_MAP\nE\n#endif\n";
        let out = preprocess(src, Stage::Fragment).unwrap();
        assert_eq!(code_lines(&out), vec!["A", "C"]);
    }

    #[test]
    fn stage_macro_is_defined() {
        let src = "#ifdef VERTEX\nv\n#endif\n#ifdef FRAGMENT\nf\n#endif\n";
        assert_eq!(code_lines(&preprocess(src, Stage::Vertex).unwrap()), vec!["v"]);
        assert_eq!(code_lines(&preprocess(src, Stage::Fragment).unwrap()), vec!["f"]);
    }

    #[test]
    fn passes_through_other_directives() {
        let src = "#version 300 es\n#extension GL_OES_standard_derivatives : enable\n#define SQ(x) ((x) * (x))\n";
        let out = preprocess(src, Stage::Fragment).unwrap();
        assert_eq!(code_lines(&out), code_lines(src));
    }

    #[test]
    fn nested_inactive_blocks_stay_inactive() {
        let src = "#if 0\n#if 1\nA\n#else\nB\n#endif\n#else\nC\n#endif\n";
        assert_eq!(code_lines(&preprocess(src, Stage::Fragment).unwrap()), vec!["C"]);
    }

    #[test]
    fn reports_errors() {
        assert!(matches!(
            preprocess("#ifdef A\n", Stage::Fragment),
            Err(NodeError::Preprocess(_))
        ));
        assert!(matches!(
            preprocess("#endif\n", Stage::Fragment),
            Err(NodeError::Preprocess(_))
        ));
        assert!(matches!(
            preprocess("#error nope\n", Stage::Fragment),
            Err(NodeError::Preprocess(m)) if m.contains("nope")
        ));
        // Inactive #error lines are ignored.
        assert!(preprocess("#if 0\n#error nope\n#endif\n", Stage::Fragment).is_ok());
    }
}
