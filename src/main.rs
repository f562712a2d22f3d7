use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use glsl_graph_linker::compiler::graph::check_syntax;
use glsl_graph_linker::{EngineAdapter, Stage, dsl, link_graph};

#[derive(Debug, Clone)]
struct Cli {
    graph_json: PathBuf,
    engine: String,
    output_dir: Option<PathBuf>,
}

fn parse_cli(args: &[String]) -> Result<Cli> {
    let mut graph_json = None;
    let mut engine = "generic".to_string();
    let mut output_dir = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--graph" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --graph"));
                };
                graph_json = Some(PathBuf::from(v));
                i += 2;
            }
            "--engine" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --engine"));
                };
                engine = v.clone();
                i += 2;
            }
            "--out-dir" | "--outputdir" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --out-dir"));
                };
                output_dir = Some(PathBuf::from(v));
                i += 2;
            }
            other => {
                return Err(anyhow!(
                    "unknown argument: {other} (supported: --graph <graph.json>, --engine generic|three, --out-dir <dir>)"
                ));
            }
        }
    }
    let graph_json = graph_json.ok_or_else(|| anyhow!("--graph <graph.json> is required"))?;
    Ok(Cli {
        graph_json,
        engine,
        output_dir,
    })
}

fn write_output(dir: &Path, file_name: String, text: &str) -> Result<()> {
    let path = dir.join(file_name);
    std::fs::write(&path, text).with_context(|| format!("failed to write {}", path.display()))?;
    println!("[link] wrote {}", path.display());
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let doc = dsl::load_document_from_path(&cli.graph_json)?;
    let adapter = EngineAdapter::by_name(&cli.engine)
        .ok_or_else(|| anyhow!("unknown engine `{}` (supported: generic, three)", cli.engine))?;

    let linked = link_graph(&doc.graph, &adapter, &doc.engine_sources, &doc.options)
        .with_context(|| format!("failed to link {}", cli.graph_json.display()))?;
    for stage in Stage::ALL {
        check_syntax(linked.source(stage), stage).context("linked program does not re-parse")?;
    }

    let output_dir = cli.output_dir.unwrap_or_else(|| {
        cli.graph_json
            .parent()
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| PathBuf::from("."))
    });
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("failed to create output directory {}", output_dir.display()))?;

    let stem = cli
        .graph_json
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "graph".to_string());
    write_output(&output_dir, format!("{stem}.vert.glsl"), &linked.vertex)?;
    write_output(&output_dir, format!("{stem}.frag.glsl"), &linked.fragment)?;
    let inputs = serde_json::to_string_pretty(&linked.data_inputs).context("failed to encode data inputs")?;
    write_output(&output_dir, format!("{stem}.inputs.json"), &inputs)?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli(&argv)?;
    run(cli)
}
