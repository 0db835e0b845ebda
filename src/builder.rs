use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::cfg::BlockPolicy;
use crate::graph::LabeledMultiGraph;
use crate::ir::{Class, Method};
use crate::label::{LabelKind, LabelMaker};
use crate::pdg::{MethodReport, PdgBuilder, entry_identity};
use crate::scan::{AnalysisContext, decode_body};

/// Settings for one run over the analyzed classes.
#[derive(Clone, Debug)]
pub(crate) struct BuildOptions {
    pub(crate) labels: LabelKind,
    pub(crate) policy: BlockPolicy,
    /// Exclude patterns, checked in order.
    pub(crate) excluded: Vec<String>,
    pub(crate) jobs: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            labels: LabelKind::default(),
            policy: BlockPolicy::default(),
            excluded: Vec::new(),
            jobs: 1,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct BuildSummary {
    pub(crate) classes: usize,
    pub(crate) classes_excluded: usize,
    pub(crate) methods_built: usize,
    pub(crate) methods_skipped: usize,
    pub(crate) methods_without_body: usize,
    pub(crate) data_edges: usize,
    pub(crate) cdg_abandoned: usize,
    pub(crate) cdg_blocks_dropped: usize,
    pub(crate) edges_skipped: usize,
}

impl BuildSummary {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Built(report) => {
                self.methods_built += 1;
                self.data_edges += report.data_edges;
                self.cdg_abandoned += usize::from(report.cdg_abandoned);
                self.cdg_blocks_dropped += report.cdg_dropped;
                self.edges_skipped += report.skipped_edges;
            }
            Outcome::NoBody => self.methods_without_body += 1,
            Outcome::Skipped => self.methods_skipped += 1,
        }
    }
}

enum Outcome {
    Built(MethodReport),
    NoBody,
    Skipped,
}

/// The first pattern excluding `class`, if any.
///
/// `*foo*` matches when the package or class name contains `foo`, `*foo` when
/// the package ends with `foo` or the class name contains it, and a plain
/// `foo` when the package starts with it.
pub(crate) fn excluded_by<'p>(class: &Class, patterns: &'p [String]) -> Option<&'p str> {
    let package = class.package_name.as_str();
    let name = class.name.as_str();
    patterns
        .iter()
        .map(String::as_str)
        .find(|pattern| match pattern.strip_prefix('*') {
            Some(rest) => match rest.strip_suffix('*') {
                Some(inner) => package.contains(inner) || name.contains(inner),
                None => package.ends_with(rest) || name.contains(rest),
            },
            None => package.starts_with(*pattern),
        })
}

/// Build the PDG of every method of every non-excluded class.
///
/// Entry nodes for all methods come first. With more than one job, each
/// method is built into its own fragment and fragments are merged in class
/// and method order, so ids match a sequential run.
pub(crate) fn build_graph(
    context: &AnalysisContext,
    options: &BuildOptions,
) -> Result<(LabeledMultiGraph, BuildSummary)> {
    let graph = LabeledMultiGraph::new();
    let mut summary = BuildSummary {
        classes: context.classes.len(),
        ..BuildSummary::default()
    };

    let mut allowed = Vec::new();
    for class in &context.classes {
        match excluded_by(class, &options.excluded) {
            Some(pattern) => {
                debug!("excluding {} (matches `{pattern}`)", class.name);
                summary.classes_excluded += 1;
            }
            None => allowed.push(class),
        }
    }

    let mut tasks = Vec::new();
    for class in &allowed {
        for method in &class.methods {
            graph.add_node(entry_identity(class, method));
            tasks.push((*class, method));
        }
    }

    let labels = options.labels.maker();
    if options.jobs > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.jobs)
            .build()
            .context("failed to start worker pool")?;
        let fragments: Vec<(LabeledMultiGraph, Outcome)> = pool.install(|| {
            tasks
                .par_iter()
                .map(|(class, method)| {
                    let fragment = LabeledMultiGraph::new();
                    let outcome = build_method(&fragment, labels, class, method, options.policy);
                    (fragment, outcome)
                })
                .collect()
        });
        for ((_, method), (fragment, outcome)) in tasks.iter().zip(fragments) {
            graph
                .absorb(fragment)
                .with_context(|| format!("failed to merge {}", method.signature))?;
            summary.record(&outcome);
        }
    } else {
        for (class, method) in &tasks {
            let outcome = build_method(&graph, labels, class, method, options.policy);
            summary.record(&outcome);
        }
    }

    Ok((graph, summary))
}

fn build_method(
    graph: &LabeledMultiGraph,
    labels: &dyn LabelMaker,
    class: &Class,
    method: &Method,
    policy: BlockPolicy,
) -> Outcome {
    let body = match decode_body(method) {
        Ok(Some(body)) => body,
        Ok(None) => {
            debug!("{}: no body", method.signature);
            return Outcome::NoBody;
        }
        Err(err) => {
            warn!("skipping method: {err}");
            return Outcome::Skipped;
        }
    };
    match PdgBuilder::build(graph, labels, class, method, &body, policy) {
        Ok(report) => Outcome::Built(report),
        Err(err) => {
            warn!("skipping {}: {err}", method.signature);
            Outcome::Skipped
        }
    }
}
