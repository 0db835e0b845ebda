use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, warn};

use crate::cfg::{BlockGraph, BlockPolicy, CfgError, UnitGraph, build_block_graph};
use crate::dataflow::{DefUse, LiveLocals, LocalId, LocalUses, Locals, UseSite};
use crate::dominance::DominanceFrontier;
use crate::graph::{GraphError, LabeledMultiGraph, NodeId, NodeIdentity};
use crate::ir::{Body, Class, Method};
use crate::label::{LabelMaker, instruction};

#[derive(Debug, Error)]
pub(crate) enum PdgError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Cfg(#[from] CfgError),
    #[error("local `{local}` is not an operand of instruction {instr}")]
    ParameterNotFound { local: String, instr: usize },
}

/// Per-method analysis results shared by the builder and the label strategies.
pub(crate) struct MethodContext<'a> {
    pub(crate) class: &'a Class,
    pub(crate) method: &'a Method,
    pub(crate) body: &'a Body,
    pub(crate) locals: Locals,
    pub(crate) facts: DefUse,
    pub(crate) units: UnitGraph,
    pub(crate) blocks: BlockGraph,
    pub(crate) live: LiveLocals,
    /// Node id of the method's entry node.
    pub(crate) entry: NodeId,
}

impl<'a> MethodContext<'a> {
    pub(crate) fn analyze(
        class: &'a Class,
        method: &'a Method,
        body: &'a Body,
        policy: BlockPolicy,
        entry: NodeId,
    ) -> Result<Self, CfgError> {
        let units = UnitGraph::build(body)?;
        let blocks = build_block_graph(body, &units, policy);
        let locals = Locals::collect(body);
        let facts = DefUse::compute(body, &locals);
        let live = LiveLocals::compute(&units, &facts);
        Ok(MethodContext {
            class,
            method,
            body,
            locals,
            facts,
            units,
            blocks,
            live,
            entry,
        })
    }
}

/// Identity of the synthetic entry node of a method.
pub(crate) fn entry_identity(class: &Class, method: &Method) -> NodeIdentity {
    NodeIdentity {
        label: format!("{}.{}", class.name, method.name),
        extra: String::new(),
        package_name: class.package_name.clone(),
        class_name: class.name.clone(),
        source_file: class.source_file.clone(),
        method_name: method.signature.clone(),
        node_type: "entry".to_string(),
        start_line: method.start_line,
        start_column: method.start_column,
        end_line: method.start_line,
        end_column: method.start_column,
    }
}

/// What happened while building one method.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct MethodReport {
    pub(crate) blocks: usize,
    /// Distinct data dependence edges this method added.
    pub(crate) data_edges: usize,
    pub(crate) cdg_abandoned: bool,
    /// Blocks left out of the CDG because they never reach an exit.
    pub(crate) cdg_dropped: usize,
    pub(crate) skipped_edges: usize,
}

/// Builds the CFG, CDG and DDG of one method into a shared graph.
pub(crate) struct PdgBuilder<'g, 'a> {
    graph: &'g LabeledMultiGraph,
    labels: &'g dyn LabelMaker,
    ctx: MethodContext<'a>,
    block_nodes: Vec<NodeId>,
    report: MethodReport,
}

impl<'g, 'a> PdgBuilder<'g, 'a> {
    pub(crate) fn build(
        graph: &'g LabeledMultiGraph,
        labels: &'g dyn LabelMaker,
        class: &'a Class,
        method: &'a Method,
        body: &'a Body,
        policy: BlockPolicy,
    ) -> Result<MethodReport, PdgError> {
        let entry = graph.add_node(entry_identity(class, method));
        let ctx = MethodContext::analyze(class, method, body, policy, entry)?;
        debug!(
            "building {} ({} instructions, {} blocks)",
            method.signature,
            body.instructions.len(),
            ctx.blocks.len()
        );

        let mut builder = PdgBuilder {
            graph,
            labels,
            ctx,
            block_nodes: Vec::new(),
            report: MethodReport::default(),
        };
        builder.add_blocks()?;
        builder.build_cfg()?;
        builder.build_cdg()?;
        builder.build_ddg()?;
        Ok(builder.report)
    }

    fn add_blocks(&mut self) -> Result<(), PdgError> {
        let ctx = &self.ctx;
        for block in &ctx.blocks.blocks {
            let label = self.labels.label_for(block, ctx);
            let head = ctx.body.instructions[block.head()].span;
            let tail = ctx.body.instructions[block.tail()].span;
            let node = self.graph.add_node(NodeIdentity {
                label: label.label,
                extra: instruction::dump(ctx.body, block),
                package_name: ctx.class.package_name.clone(),
                class_name: ctx.class.name.clone(),
                source_file: ctx.class.source_file.clone(),
                method_name: ctx.method.signature.clone(),
                node_type: label.node_type,
                start_line: head.start_line,
                start_column: head.start_column,
                end_line: tail.start_line,
                end_column: tail.start_column,
            });
            self.labels.post_process(self.graph, node, block, ctx)?;
            self.block_nodes.push(node);
        }
        self.report.blocks = self.block_nodes.len();
        Ok(())
    }

    fn build_cfg(&self) -> Result<(), PdgError> {
        // the first block is entered from the procedure entry even when it is
        // also a branch target
        if let Some(first) = self.block_nodes.first() {
            self.graph.add_edge(self.ctx.entry, *first, "cfg")?;
        }
        for head in self.ctx.blocks.heads() {
            self.graph
                .add_edge(self.ctx.entry, self.block_nodes[head.index], "cfg")?;
        }
        for block in &self.ctx.blocks.blocks {
            for succ in &block.succs {
                self.graph
                    .add_edge(self.block_nodes[block.index], self.block_nodes[*succ], "cfg")?;
            }
        }
        Ok(())
    }

    /// Y is control dependent on every X in its post-dominance frontier;
    /// blocks left without a parent depend on the entry node. Blocks that
    /// never reach an exit get no control dependences.
    fn build_cdg(&mut self) -> Result<(), PdgError> {
        let frontiers = match DominanceFrontier::compute(&self.ctx.blocks) {
            Ok(frontiers) => frontiers,
            Err(err) => {
                warn!(
                    "{}: abandoning control dependences: {err}",
                    self.ctx.method.signature
                );
                self.report.cdg_abandoned = true;
                return Ok(());
            }
        };

        let stuck = frontiers.stuck();
        if !stuck.is_empty() {
            warn!(
                "{}: blocks {} cannot reach an exit, dropping their control dependences",
                self.ctx.method.signature,
                block_ranges(stuck)
            );
            self.report.cdg_dropped = stuck.len();
        }

        let mut has_parent = vec![false; self.ctx.blocks.len()];
        for y in 0..self.ctx.blocks.len() {
            if stuck.binary_search(&y).is_ok() {
                continue;
            }
            for x in frontiers.frontier(y) {
                self.graph
                    .add_edge(self.block_nodes[*x], self.block_nodes[y], "cdg")?;
                if *x != y {
                    has_parent[y] = true;
                }
            }
        }
        for (y, parent) in has_parent.iter().enumerate() {
            if !parent && stuck.binary_search(&y).is_err() {
                self.graph
                    .add_edge(self.ctx.entry, self.block_nodes[y], "cdg")?;
            }
        }
        Ok(())
    }

    /// Edges from each block to the blocks reading the values it leaves live,
    /// tagged `<type>:<operand index>`.
    fn build_ddg(&mut self) -> Result<(), PdgError> {
        let ctx = &self.ctx;
        let chains = LocalUses::compute(&ctx.units, &ctx.facts);

        for block in &ctx.blocks.blocks {
            let mut defs: BTreeMap<LocalId, Vec<usize>> = BTreeMap::new();
            for instr in block.iter() {
                let stmt = &ctx.body.instructions[instr].stmt;
                if !stmt.is_definition() {
                    continue;
                }
                match ctx.facts.def(instr) {
                    Some(local) => defs.entry(local).or_default().push(instr),
                    None => debug!(
                        "{}: instruction {instr} writes a field or array element, not tracked",
                        ctx.method.signature
                    ),
                }
            }

            for local in ctx.live.live_after(block.tail()) {
                let Some(def_instrs) = defs.get(local) else {
                    continue;
                };
                for def in def_instrs {
                    for site in chains.uses_of(*def) {
                        let target = ctx.blocks.owner(site.instr);
                        // uses later in the same block never leave it
                        if target == block.index && site.instr > *def {
                            continue;
                        }
                        let tag = match data_tag(ctx, site) {
                            Ok(tag) => tag,
                            Err(err) => {
                                warn!("{}: skipping data dependence: {err}", ctx.method.signature);
                                self.report.skipped_edges += 1;
                                continue;
                            }
                        };
                        let (src, dst) = (self.block_nodes[block.index], self.block_nodes[target]);
                        if !self.graph.has_edge(src, dst, &tag) {
                            self.report.data_edges += 1;
                        }
                        self.graph.add_edge(src, dst, &tag)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// `<declared type>:<operand index>` of the local read at `site`.
fn data_tag(ctx: &MethodContext<'_>, site: &UseSite) -> Result<String, PdgError> {
    let name = ctx.locals.name(site.local);
    let stmt = &ctx.body.instructions[site.instr].stmt;
    let index = stmt
        .operand_index(name)
        .ok_or_else(|| PdgError::ParameterNotFound {
            local: name.to_string(),
            instr: site.instr,
        })?;
    Ok(format!("{}:{index}", ctx.locals.type_of(site.local)))
}

/// Sorted block indexes as runs, e.g. `2..=4, 7`.
fn block_ranges(blocks: &[usize]) -> String {
    let mut runs: Vec<(usize, usize)> = Vec::new();
    for &block in blocks {
        match runs.last_mut() {
            Some((_, end)) if *end + 1 == block => *end = block,
            _ => runs.push((block, block)),
        }
    }
    runs.iter()
        .map(|(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{start}..={end}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::label::LabelKind;
    use std::collections::BTreeSet;

    fn edge_set(graph: &LabeledMultiGraph, keep: impl Fn(&str) -> bool) -> BTreeSet<(NodeId, NodeId)> {
        graph
            .edges()
            .into_iter()
            .filter(|(_, _, tag)| keep(tag))
            .map(|(src, dst, _)| (src, dst))
            .collect()
    }

    fn build_fib(kind: LabelKind) -> (LabeledMultiGraph, MethodReport) {
        let class = fixtures::cfg_class();
        let body = fixtures::fib_body();
        let graph = LabeledMultiGraph::new();
        let report = PdgBuilder::build(
            &graph,
            kind.maker(),
            &class,
            &class.methods[0],
            &body,
            BlockPolicy::Expanded,
        )
        .expect("build fib");
        (graph, report)
    }

    #[test]
    fn fib_control_flow() {
        let (graph, report) = build_fib(LabelKind::Instruction);

        assert_eq!(report.blocks, 6);
        assert_eq!(graph.node_count(), 7);
        assert_eq!(
            edge_set(&graph, |tag| tag == "cfg"),
            BTreeSet::from([(0, 1), (1, 2), (1, 3), (2, 6), (3, 4), (4, 6), (4, 5), (5, 4)])
        );
        let entry = graph.node(0).expect("entry");
        assert_eq!(entry.label, "test.pDG.CFG.fib");
        assert_eq!(entry.node_type, "entry");
        assert_eq!(entry.method_name, "<test.pDG.CFG: int fib(int)>");
        assert_eq!((entry.start_line, entry.end_line), (33, 33));
    }

    #[test]
    fn fib_control_dependence() {
        let (graph, report) = build_fib(LabelKind::Instruction);

        assert!(!report.cdg_abandoned);
        assert_eq!(
            edge_set(&graph, |tag| tag == "cdg"),
            BTreeSet::from([(0, 1), (1, 2), (1, 3), (0, 6), (1, 4), (4, 5), (4, 4)])
        );
    }

    #[test]
    fn fib_data_dependence() {
        let (graph, report) = build_fib(LabelKind::Instruction);

        let ddg = edge_set(&graph, |tag| tag != "cfg" && tag != "cdg");
        for edge in [(1, 5), (1, 4), (1, 6), (2, 6), (3, 4), (3, 5), (5, 4), (5, 6)] {
            assert!(ddg.contains(&edge), "missing data dependence {edge:?}");
        }
        // `x` is the second operand of `i >= x`
        assert!(graph.has_edge(1, 4, "int:1"));
        // `cur` is the second operand of `prev + cur` and the first of `prev = cur`
        assert!(graph.has_edge(1, 5, "int:1"));
        assert!(graph.has_edge(1, 5, "int:0"));
        // the loop body feeds itself through `i`, `prev` and `cur`
        assert!(ddg.contains(&(5, 5)));
        assert!(!ddg.contains(&(1, 1)));
        assert_eq!(report.skipped_edges, 0);
        let tagged = graph
            .edges()
            .into_iter()
            .filter(|(_, _, tag)| tag != "cfg" && tag != "cdg")
            .count();
        assert_eq!(report.data_edges, tagged);
    }

    #[test]
    fn block_nodes_carry_position_and_listing() {
        let (graph, _) = build_fib(LabelKind::Instruction);

        let loop_body = graph.node(5).expect("loop body");
        assert_eq!(loop_body.node_type, "assignments");
        assert_eq!((loop_body.start_line, loop_body.end_line), (41, 40));
        assert_eq!(loop_body.extra, loop_body.label);
        assert!(loop_body.extra.starts_with("next = prev + cur\n"));
    }

    #[test]
    fn expression_trees_hoist_constants() {
        let (graph, _) = build_fib(LabelKind::ExpressionTree);

        let constants: Vec<NodeId> = (0..graph.node_count())
            .filter(|id| graph.node(*id).expect("node").node_type == "constant")
            .collect();
        // six occurrences; `i = 1` and `i + 1` share line 40 and collapse
        assert_eq!(constants.len(), 5);
        for constant in constants {
            assert!(graph.has_edge(0, constant, "cdg"));
        }
        let first_block = graph.node(1).expect("first block");
        assert_eq!(first_block.node_type, "branch");
        let zero = (0..graph.node_count())
            .find(|id| {
                let node = graph.node(*id).expect("node");
                node.node_type == "constant" && node.start_line == 35
            })
            .expect("constant of `prev = 0`");
        assert_eq!(graph.label(zero).expect("label"), "int:0");
        assert!(graph.has_edge(zero, 1, "int:0"));
    }

    #[test]
    fn field_writes_do_not_create_data_dependences() {
        let class = fixtures::cfg_class();
        let body: Body = serde_json::from_value(serde_json::json!({
            "locals": [{"name": "this", "type": "test.Buffer"}, {"name": "n", "type": "int"}],
            "instructions": [
                {"stmt": {"kind": "identity", "local": "this", "value": {"kind": "this", "type": "test.Buffer"}}},
                {"stmt": {"kind": "identity", "local": "n", "value": {"kind": "parameter", "index": 0, "type": "int"}}},
                {"stmt": {"kind": "invoke", "expr": {
                    "kind": "invoke", "class": "test.Log", "method": "log",
                    "params": ["int"], "returns": "void", "args": [{"kind": "local", "name": "n"}]}}},
                {"stmt": {"kind": "assign",
                          "lhs": {"kind": "field", "class": "test.Buffer", "name": "size", "type": "int",
                                  "base": {"kind": "local", "name": "this"}},
                          "rhs": {"kind": "local", "name": "n"}}},
                {"stmt": {"kind": "return"}}
            ]
        }))
        .expect("decode body");
        let graph = LabeledMultiGraph::new();
        PdgBuilder::build(
            &graph,
            LabelKind::Instruction.maker(),
            &class,
            &class.methods[0],
            &body,
            BlockPolicy::Expanded,
        )
        .expect("build");

        // blocks: [0, 1], [2], [3, 4]; the field write feeds nobody
        let ddg = edge_set(&graph, |tag| tag != "cfg" && tag != "cdg");
        assert_eq!(ddg, BTreeSet::from([(1, 2), (1, 3)]));
        assert!(graph.has_edge(1, 3, "test.Buffer:0"));
        assert!(graph.has_edge(1, 3, "int:1"));
    }

    #[test]
    fn endless_loop_keeps_flow_edges() {
        let class = fixtures::cfg_class();
        let body: Body = serde_json::from_value(serde_json::json!({
            "instructions": [
                {"stmt": {"kind": "nop"}},
                {"stmt": {"kind": "goto", "target": 0}}
            ]
        }))
        .expect("decode body");
        let graph = LabeledMultiGraph::new();
        let report = PdgBuilder::build(
            &graph,
            LabelKind::Operator.maker(),
            &class,
            &class.methods[0],
            &body,
            BlockPolicy::Expanded,
        )
        .expect("build");

        assert!(report.cdg_abandoned);
        assert!(graph.has_edge(1, 1, "cfg"));
        assert_eq!(edge_set(&graph, |tag| tag == "cdg"), BTreeSet::new());
    }

    #[test]
    fn bad_branch_target_fails_the_method() {
        let class = fixtures::cfg_class();
        let body: Body = serde_json::from_value(serde_json::json!({
            "instructions": [{"stmt": {"kind": "goto", "target": 3}}]
        }))
        .expect("decode body");
        let graph = LabeledMultiGraph::new();
        let err = PdgBuilder::build(
            &graph,
            LabelKind::Instruction.maker(),
            &class,
            &class.methods[0],
            &body,
            BlockPolicy::Expanded,
        )
        .expect_err("bad target");
        assert!(matches!(err, PdgError::Cfg(CfgError::BadBranchTarget { .. })));
    }

    fn build_body(body: &Body, policy: BlockPolicy) -> (LabeledMultiGraph, MethodReport) {
        let class = fixtures::cfg_class();
        let graph = LabeledMultiGraph::new();
        let report = PdgBuilder::build(
            &graph,
            LabelKind::Instruction.maker(),
            &class,
            &class.methods[0],
            body,
            policy,
        )
        .expect("build");
        (graph, report)
    }

    #[test]
    fn entry_reaches_a_first_block_that_is_also_a_loop_header() {
        // do { g(); } while (h());
        let call = |method: &str, returns: &str| {
            serde_json::json!({
                "kind": "invoke", "class": "test.Loop", "method": method,
                "params": [], "returns": returns, "args": []
            })
        };
        let body: Body = serde_json::from_value(serde_json::json!({
            "locals": [{"name": "z", "type": "boolean"}],
            "instructions": [
                {"stmt": {"kind": "invoke", "expr": call("g", "void")}},
                {"stmt": {"kind": "assign", "lhs": {"kind": "local", "name": "z"}, "rhs": call("h", "boolean")}},
                {"stmt": {"kind": "if", "target": 0, "condition": {
                    "kind": "binop", "op": "!=", "lhs": {"kind": "local", "name": "z"},
                    "rhs": {"kind": "constant", "type": "int", "text": "0"}
                }}},
                {"stmt": {"kind": "return"}}
            ]
        }))
        .expect("decode body");

        for policy in [BlockPolicy::Expanded, BlockPolicy::Unit] {
            let (graph, _) = build_body(&body, policy);
            assert_eq!(
                edge_set(&graph, |tag| tag == "cfg"),
                BTreeSet::from([(0, 1), (1, 2), (2, 3), (3, 1), (3, 4)]),
                "{policy:?}"
            );
        }
    }

    #[test]
    fn blocks_without_exit_lose_only_their_control_dependences() {
        // if (a) { while (true) {} } return;
        let body: Body = serde_json::from_value(serde_json::json!({
            "locals": [{"name": "a", "type": "boolean"}],
            "instructions": [
                {"stmt": {"kind": "if", "condition": {"kind": "local", "name": "a"}, "target": 2}},
                {"stmt": {"kind": "return"}},
                {"stmt": {"kind": "nop"}},
                {"stmt": {"kind": "goto", "target": 2}}
            ]
        }))
        .expect("decode body");
        let (graph, report) = build_body(&body, BlockPolicy::Expanded);

        assert!(!report.cdg_abandoned);
        assert_eq!(report.cdg_dropped, 1);
        assert_eq!(
            edge_set(&graph, |tag| tag == "cdg"),
            BTreeSet::from([(0, 1), (0, 2)])
        );
        assert!(graph.has_edge(3, 3, "cfg"));
    }

    #[test]
    fn fib_slices_keep_what_a_block_depends_on() {
        let (graph, _) = build_fib(LabelKind::Instruction);

        // block 2 is `cur = 0; goto 13`, reached only through the `x != 0` test
        let early_exit = graph.label(2).expect("label");
        let slices = graph.slice(&early_exit).expect("slice");
        assert_eq!(slices.len(), 1);
        let slice = &slices[0];
        assert_eq!(slice.node_count(), 3);
        assert_eq!(slice.node(0).expect("entry").node_type, "entry");
        assert_eq!(slice.label(2).expect("label"), early_exit);
        assert_eq!(
            slice.edges(),
            vec![
                (0, 1, "cdg".to_string()),
                (1, 2, "cdg".to_string()),
                (0, 1, "cfg".to_string()),
                (1, 2, "cfg".to_string()),
            ]
        );

        // everything flows into the return block
        let ret = graph.label(6).expect("label");
        let slices = graph.slice(&ret).expect("slice");
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].node_count(), graph.node_count());
        assert_eq!(slices[0].edges(), graph.edges());
    }

    #[test]
    fn block_ranges_collapse_runs() {
        assert_eq!(block_ranges(&[2, 3, 4, 7]), "2..=4, 7");
        assert_eq!(block_ranges(&[0]), "0");
    }

    #[test]
    fn data_tag_requires_the_local_among_the_operands() {
        let class = fixtures::cfg_class();
        let body = fixtures::fib_body();
        let ctx = MethodContext::analyze(&class, &class.methods[0], &body, BlockPolicy::Expanded, 0)
            .expect("analyze");
        let cur = ctx.locals.id("cur").expect("cur");
        let x = ctx.locals.id("x").expect("x");

        // instruction 13 is `return cur`
        let tag = data_tag(&ctx, &UseSite { instr: 13, local: cur }).expect("tag");
        assert_eq!(tag, "int:0");

        let err = data_tag(&ctx, &UseSite { instr: 13, local: x }).expect_err("x is not read");
        assert!(matches!(
            err,
            PdgError::ParameterNotFound { ref local, instr: 13 } if local == "x"
        ));
    }
}
