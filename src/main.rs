mod builder;
mod cfg;
mod dataflow;
mod dominance;
#[cfg(test)]
mod fixtures;
mod graph;
mod ir;
mod label;
mod pdg;
mod scan;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::builder::{BuildOptions, build_graph};
use crate::cfg::BlockPolicy;
use crate::graph::LabeledMultiGraph;
use crate::label::LabelKind;
use crate::scan::scan_inputs;

/// CLI arguments for jpdg execution.
#[derive(Parser, Debug)]
#[command(
    name = "jpdg",
    about = "Program dependence graphs (CFG + CDG + DDG) for JVM methods.",
    version
)]
struct Cli {
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    #[arg(long, value_name = "PATH")]
    classpath: Vec<PathBuf>,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Skip classes matching PATTERN (`pkg`, `*suffix` or `*infix*`).
    #[arg(long, value_name = "PATTERN")]
    exclude: Vec<String>,
    #[arg(long, value_enum, default_value_t = LabelKind::default())]
    label_type: LabelKind,
    #[arg(long, value_enum, default_value_t = BlockPolicy::default())]
    blocks: BlockPolicy,
    #[arg(long, value_name = "N", default_value_t = 1)]
    jobs: usize,
    /// Re-read the serialized graph before writing it and fail if it differs.
    #[arg(long)]
    verify: bool,
    /// Write the backward slice of every node labeled LABEL instead of the whole graph.
    #[arg(long, value_name = "LABEL")]
    slice: Option<String>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet);
    run(cli)
}

/// Log to stderr, filtered by `JPDG_LOG` when set.
fn init_logging(quiet: bool) {
    let default = if quiet { "error" } else { "info" };
    let filter = EnvFilter::try_from_env("JPDG_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .try_init();
}

fn run(cli: Cli) -> Result<()> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }
    for entry in &cli.classpath {
        if !entry.exists() {
            anyhow::bail!("classpath entry not found: {}", entry.display());
        }
    }
    if cli.jobs == 0 {
        anyhow::bail!("--jobs must be at least 1");
    }

    let started_at = Instant::now();
    let context = scan_inputs(&cli.input, &cli.classpath)?;
    let options = BuildOptions {
        labels: cli.label_type,
        policy: cli.blocks,
        excluded: cli.exclude,
        jobs: cli.jobs,
    };
    let (graph, summary) = build_graph(&context, &options)?;
    let built_at = Instant::now();

    let mut writer = output_writer(cli.output.as_deref())?;
    match cli.slice.as_deref() {
        Some(label) => {
            let slices = graph
                .slice(label)
                .with_context(|| format!("failed to slice on {label:?}"))?;
            if slices.is_empty() {
                warn!("no node is labeled {:?}", label);
            }
            for (index, slice) in slices.iter().enumerate() {
                if index > 0 {
                    writeln!(writer).context("failed to write graph")?;
                }
                emit(slice, &mut writer, cli.verify)?;
            }
            info!("{} slices on {:?}", slices.len(), label);
        }
        None => emit(&graph, &mut writer, cli.verify)?,
    }
    writer.flush().context("failed to write graph")?;

    info!(
        "{} nodes, {} edges from {} methods ({} skipped, {} without body, {} classes excluded)",
        graph.node_count(),
        graph.edge_count(),
        summary.methods_built,
        summary.methods_skipped,
        summary.methods_without_body,
        summary.classes_excluded
    );
    if summary.cdg_abandoned > 0 || summary.cdg_blocks_dropped > 0 || summary.edges_skipped > 0 {
        info!(
            "{} methods without control dependences, {} blocks without an exit, {} data dependences skipped",
            summary.cdg_abandoned, summary.cdg_blocks_dropped, summary.edges_skipped
        );
    }

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: build_ms={} total_ms={} documents={} classes={} library_classes={} data_edges={}",
            built_at.duration_since(started_at).as_millis(),
            started_at.elapsed().as_millis(),
            context.document_count,
            summary.classes,
            context.library_classes.len(),
            summary.data_edges
        );
    }

    Ok(())
}

/// Serialize `graph` into `writer`, re-reading it first when `verify` is set.
fn emit(graph: &LabeledMultiGraph, writer: &mut dyn Write, verify: bool) -> Result<()> {
    if verify {
        let text = graph.serialize().context("failed to serialize graph")?;
        verify_round_trip(graph, &text)?;
        writer
            .write_all(text.as_bytes())
            .context("failed to write graph")?;
    } else {
        graph.write_to(writer).context("failed to write graph")?;
    }
    Ok(())
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        ))),
        None => Ok(Box::new(io::stdout())),
    }
}

/// Parse `text` back and check it describes `graph` exactly.
fn verify_round_trip(graph: &LabeledMultiGraph, text: &str) -> Result<()> {
    let reparsed = LabeledMultiGraph::deserialize(text.as_bytes())
        .context("failed to re-read serialized graph")?;
    if reparsed.node_count() != graph.node_count() {
        anyhow::bail!(
            "re-read graph has {} nodes, expected {}",
            reparsed.node_count(),
            graph.node_count()
        );
    }
    for id in 0..graph.node_count() {
        if reparsed.node(id)? != graph.node(id)? {
            anyhow::bail!("node {id} differs after re-reading");
        }
    }
    if reparsed.edges() != graph.edges() {
        anyhow::bail!("edges differ after re-reading");
    }
    if reparsed.serialize()? != text {
        anyhow::bail!("graph does not serialize to the same text twice");
    }
    Ok(())
}
