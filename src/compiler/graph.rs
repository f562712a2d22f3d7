//! Whole-graph compilation: one depth-first walk per stage from its Output node.

use std::collections::{BTreeMap, HashMap, HashSet};

use glsl::syntax::{Expr, ExternalDeclaration};
use serde::{Deserialize, Serialize};

use crate::compiler::CompileOptions;
use crate::compiler::node::{NodeTree, compile_node};
use crate::compiler::sections::{Assembly, ShaderSections, declared_names, interface_names, merge, split};
use crate::compiler::upgrade::ES300_VERSION;
use crate::dsl::{Graph, GlslVersion, Node, Stage, data_uniform_name, entry_function_name, incoming_edges, require_node};
use crate::engine::{EngineAdapter, EngineContext};
use crate::error::{CompileError, NodeError};
use crate::{ast, graph};

/// An edge whose upstream is a data node: the runtime binds `uniform` for `input` on the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataInput {
    pub input: String,
    pub from: String,
    pub uniform: String,
}

#[derive(Debug, Clone)]
pub struct StageOutput {
    pub sections: ShaderSections,
    pub output_node: String,
    /// Entry function of the Output node, called by the driver `main`.
    pub entry: String,
}

#[derive(Debug, Clone)]
pub struct CompiledGraph {
    pub vertex: StageOutput,
    pub fragment: StageOutput,
    /// Consumer node id -> its data-driven inputs.
    pub data_inputs: BTreeMap<String, Vec<DataInput>>,
}

impl CompiledGraph {
    pub fn stage(&self, stage: Stage) -> &StageOutput {
        match stage {
            Stage::Vertex => &self.vertex,
            Stage::Fragment => &self.fragment,
        }
    }
}

/// The two linked programs, plus what the runtime needs to bind data nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedProgram {
    pub vertex: String,
    pub fragment: String,
    pub data_inputs: BTreeMap<String, Vec<DataInput>>,
}

impl LinkedProgram {
    pub fn source(&self, stage: Stage) -> &str {
        match stage {
            Stage::Vertex => &self.vertex,
            Stage::Fragment => &self.fragment,
        }
    }
}

pub fn compile_graph(
    graph: &Graph,
    adapter: &EngineAdapter,
    engine: &dyn EngineContext,
    options: &CompileOptions,
) -> Result<CompiledGraph, CompileError> {
    graph::validate(graph)?;

    let mut data_inputs = BTreeMap::new();
    let mut used: HashSet<String> = HashSet::new();
    let mut stages = Vec::with_capacity(2);
    for stage in Stage::ALL {
        let output = graph::output_node(graph, stage)?;

        let mut compiler = StageCompiler {
            graph,
            stage,
            adapter,
            engine,
            options,
            fillers: HashMap::new(),
            sections: ShaderSections::default(),
            globals: HashSet::new(),
            data_inputs: &mut data_inputs,
        };
        compiler.visit(output)?;
        used.extend(compiler.fillers.keys().cloned());
        log::info!(
            "compiled {stage} stage: {} node(s), {} interface and {} program declaration(s)",
            compiler.fillers.len(),
            compiler.sections.in_statements.len(),
            compiler.sections.program.len()
        );
        stages.push(StageOutput {
            sections: compiler.sections,
            output_node: output.id.clone(),
            entry: entry_function_name(output),
        });
    }

    let unused = graph.nodes.iter().filter(|n| !used.contains(&n.id)).count();
    if unused > 0 {
        log::info!("{unused} node(s) feed neither output and were skipped");
    }

    let fragment = stages.pop();
    let vertex = stages.pop();
    match (vertex, fragment) {
        (Some(vertex), Some(fragment)) => Ok(CompiledGraph {
            vertex,
            fragment,
            data_inputs,
        }),
        _ => Err(CompileError::NoOutputNode(Stage::Vertex)),
    }
}

/// Compile state for one stage. Each node is compiled at most once; later visits reuse its filler.
struct StageCompiler<'a> {
    graph: &'a Graph,
    stage: Stage,
    adapter: &'a EngineAdapter,
    engine: &'a dyn EngineContext,
    options: &'a CompileOptions,
    fillers: HashMap<String, Expr>,
    sections: ShaderSections,
    /// Names declared by the accumulated program section.
    globals: HashSet<String>,
    data_inputs: &'a mut BTreeMap<String, Vec<DataInput>>,
}

impl StageCompiler<'_> {
    fn visit(&mut self, node: &Node) -> Result<Expr, CompileError> {
        if let Some(filler) = self.fillers.get(&node.id) {
            return Ok(filler.clone());
        }
        let fail = |e: NodeError| CompileError::node(node.id.clone(), e);

        if let Some(node_stage) = node.stage {
            if node_stage != self.stage {
                return Err(fail(NodeError::StageMismatch {
                    node_stage,
                    compiling: self.stage,
                }));
            }
        }

        let edges = incoming_edges(self.graph, &node.id);
        let mut ctx = compile_node(node, self.stage, self.adapter, self.engine, self.options, &edges).map_err(fail)?;

        for edge in &edges {
            let upstream = require_node(self.graph, &edge.from, &edge.id)?;
            let filler = self.visit(upstream)?;
            if upstream.node_type.is_data() {
                let input = DataInput {
                    input: edge.input.clone(),
                    from: upstream.id.clone(),
                    uniform: data_uniform_name(upstream),
                };
                let list = self.data_inputs.entry(node.id.clone()).or_default();
                if !list.contains(&input) {
                    list.push(input);
                }
            }
            ctx.fill(edge, filler).map_err(fail)?;
        }
        ctx.finish();

        let handler = self.adapter.handler(node.node_type).map_err(fail)?;
        let filler = handler.produce_filler(node, &ctx.tree).map_err(fail)?;
        if let NodeTree::Program(tu) = ctx.tree {
            self.fold(&node.id, split(tu));
        }

        self.fillers.insert(node.id.clone(), filler.clone());
        Ok(filler)
    }

    /// Merges a node's sections into the accumulator, dropping interface declarations already
    /// present and re-declarations of preserved globals.
    fn fold(&mut self, node_id: &str, incoming: ShaderSections) {
        let ShaderSections {
            precision,
            version,
            preprocessor,
            in_statements,
            program,
            ..
        } = incoming;

        let mut kept_ins = Vec::with_capacity(in_statements.len());
        let mut names = std::collections::BTreeSet::new();
        for decl in in_statements {
            let declared = interface_names(&decl).unwrap_or_default();
            let known = !declared.is_empty()
                && declared
                    .iter()
                    .all(|n| self.sections.existing_ins.contains(n) || names.contains(n));
            if known {
                log::debug!("node {node_id}: dropped duplicate interface declaration of {}", declared.join(", "));
                continue;
            }
            names.extend(declared);
            kept_ins.push(decl);
        }

        let preserve = self.adapter.preserve();
        let mut kept_program: Vec<ExternalDeclaration> = Vec::with_capacity(program.len());
        for decl in program {
            let declared = declared_names(&decl);
            let duplicate = !declared.is_empty()
                && declared
                    .iter()
                    .all(|n| preserve.contains(n) && self.globals.contains(n));
            if duplicate {
                log::warn!(
                    "node {node_id}: dropped re-declaration of shared global {}",
                    declared.join(", ")
                );
                continue;
            }
            self.globals.extend(declared);
            kept_program.push(decl);
        }

        let accumulated = std::mem::take(&mut self.sections);
        self.sections = merge(
            accumulated,
            ShaderSections {
                precision,
                version,
                preprocessor,
                in_statements: kept_ins,
                existing_ins: names,
                program: kept_program,
            },
        );
    }
}

/// Wraps each stage's sections into a complete program with a driver `main`.
pub fn generate(compiled: &CompiledGraph, options: &CompileOptions) -> Result<LinkedProgram, CompileError> {
    let vertex = assemble_stage(&compiled.vertex, Stage::Vertex, options)?;
    let fragment = assemble_stage(&compiled.fragment, Stage::Fragment, options)?;
    Ok(LinkedProgram {
        vertex,
        fragment,
        data_inputs: compiled.data_inputs.clone(),
    })
}

fn assemble_stage(out: &StageOutput, stage: Stage, options: &CompileOptions) -> Result<String, CompileError> {
    let legacy = options.target_version == GlslVersion::V2;
    let target = match (stage, legacy) {
        (Stage::Vertex, _) => "gl_Position".to_string(),
        (Stage::Fragment, true) => "gl_FragColor".to_string(),
        (Stage::Fragment, false) => options.fragment_output.clone(),
    };
    let mut outputs = Vec::new();
    if stage == Stage::Fragment && !legacy && !out.sections.existing_ins.contains(&target) {
        outputs.push(format!("out vec4 {target};"));
    }
    let assembly = Assembly {
        default_version: if legacy { "" } else { ES300_VERSION },
        default_precision: (stage == Stage::Fragment).then_some(options.default_precision.as_str()),
        outputs,
        driver: format!("void main() {{ {target} = {}(); }}", out.entry),
    };
    crate::compiler::sections::assemble(&out.sections, &assembly).map_err(|message| {
        CompileError::node(out.output_node.clone(), NodeError::Parse { stage, message })
    })
}

/// Compiles and assembles in one go; nothing is returned unless both stages succeed.
pub fn link_graph(
    graph: &Graph,
    adapter: &EngineAdapter,
    engine: &dyn EngineContext,
    options: &CompileOptions,
) -> Result<LinkedProgram, CompileError> {
    let compiled = compile_graph(graph, adapter, engine, options)?;
    let linked = generate(&compiled, options)?;
    log::debug!(
        "linked graph: {} vertex and {} fragment bytes",
        linked.vertex.len(),
        linked.fragment.len()
    );
    Ok(linked)
}

/// Re-parses generated text; used by tests and the CLI to reject output the parser cannot read.
pub fn check_syntax(source: &str, stage: Stage) -> Result<(), NodeError> {
    ast::parse_program(source)
        .map(|_| ())
        .map_err(|message| NodeError::Parse { stage, message })
}
