use std::collections::BTreeSet;
use std::ops::Range;

use clap::ValueEnum;
use thiserror::Error;

use crate::ir::Body;

/// Malformed control flow in a decoded body.
#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum CfgError {
    #[error("instruction {instr} branches to {target}, past the end of the body ({len} instructions)")]
    BadBranchTarget {
        instr: usize,
        target: usize,
        len: usize,
    },
}

/// Instruction-level control flow without exceptional edges.
#[derive(Clone, Debug)]
pub(crate) struct UnitGraph {
    succs: Vec<Vec<usize>>,
    preds: Vec<Vec<usize>>,
}

impl UnitGraph {
    pub(crate) fn build(body: &Body) -> Result<Self, CfgError> {
        let len = body.instructions.len();
        let mut succs = vec![Vec::new(); len];
        let mut preds = vec![Vec::new(); len];
        for (index, inst) in body.instructions.iter().enumerate() {
            let mut targets = BTreeSet::new();
            if inst.stmt.falls_through() && index + 1 < len {
                targets.insert(index + 1);
            }
            for target in inst.stmt.branch_targets() {
                if target >= len {
                    return Err(CfgError::BadBranchTarget {
                        instr: index,
                        target,
                        len,
                    });
                }
                targets.insert(target);
            }
            for target in targets {
                succs[index].push(target);
                preds[target].push(index);
            }
        }
        Ok(UnitGraph { succs, preds })
    }

    pub(crate) fn len(&self) -> usize {
        self.succs.len()
    }

    pub(crate) fn succs(&self, instr: usize) -> &[usize] {
        &self.succs[instr]
    }

    pub(crate) fn preds(&self, instr: usize) -> &[usize] {
        &self.preds[instr]
    }
}

/// Leader policy used when grouping instructions into blocks.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub(crate) enum BlockPolicy {
    /// One instruction per block.
    Unit,
    /// Maximal blocks, additionally split before and after every call.
    #[default]
    Expanded,
}

/// Basic block covering a contiguous range of instructions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct BasicBlock {
    pub(crate) index: usize,
    pub(crate) instructions: Range<usize>,
    pub(crate) succs: Vec<usize>,
    pub(crate) preds: Vec<usize>,
}

impl BasicBlock {
    pub(crate) fn head(&self) -> usize {
        self.instructions.start
    }

    pub(crate) fn tail(&self) -> usize {
        self.instructions.end - 1
    }

    pub(crate) fn iter(&self) -> Range<usize> {
        self.instructions.clone()
    }
}

/// Basic block graph for one method body.
#[derive(Clone, Debug)]
pub(crate) struct BlockGraph {
    pub(crate) blocks: Vec<BasicBlock>,
    owners: Vec<usize>,
}

impl BlockGraph {
    /// Index of the block owning `instr`.
    pub(crate) fn owner(&self, instr: usize) -> usize {
        self.owners[instr]
    }

    /// Blocks without predecessors.
    pub(crate) fn heads(&self) -> impl Iterator<Item = &BasicBlock> + '_ {
        self.blocks.iter().filter(|block| block.preds.is_empty())
    }

    /// Blocks without successors.
    pub(crate) fn tails(&self) -> impl Iterator<Item = &BasicBlock> + '_ {
        self.blocks.iter().filter(|block| block.succs.is_empty())
    }

    pub(crate) fn len(&self) -> usize {
        self.blocks.len()
    }
}

/// Partition a body into basic blocks.
pub(crate) fn build_block_graph(body: &Body, units: &UnitGraph, policy: BlockPolicy) -> BlockGraph {
    let len = units.len();
    let mut leaders = BTreeSet::new();
    if len > 0 {
        leaders.insert(0usize);
    }
    for (index, inst) in body.instructions.iter().enumerate() {
        if policy == BlockPolicy::Unit {
            leaders.insert(index);
            continue;
        }
        for target in inst.stmt.branch_targets() {
            leaders.insert(target);
        }
        if inst.stmt.ends_block() {
            leaders.insert(index + 1);
        }
        if units.preds(index).len() > 1 {
            leaders.insert(index);
        }
        if inst.stmt.invoke_expr().is_some() {
            leaders.insert(index);
            leaders.insert(index + 1);
        }
    }

    let mut leader_list: Vec<usize> = leaders.into_iter().collect();
    leader_list.retain(|offset| *offset < len);

    let mut ranges = Vec::with_capacity(leader_list.len());
    for window in leader_list.windows(2) {
        ranges.push(window[0]..window[1]);
    }
    if let Some(last_start) = leader_list.last().copied() {
        ranges.push(last_start..len);
    }

    let mut owners = vec![0; len];
    for (block, range) in ranges.iter().enumerate() {
        for instr in range.clone() {
            owners[instr] = block;
        }
    }

    let mut blocks: Vec<BasicBlock> = ranges
        .into_iter()
        .enumerate()
        .map(|(index, instructions)| BasicBlock {
            index,
            instructions,
            succs: Vec::new(),
            preds: Vec::new(),
        })
        .collect();

    for index in 0..blocks.len() {
        let tail = blocks[index].tail();
        let succs: BTreeSet<usize> = units.succs(tail).iter().map(|s| owners[*s]).collect();
        for succ in succs {
            blocks[index].succs.push(succ);
            blocks[succ].preds.push(index);
        }
    }

    BlockGraph { blocks, owners }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn edges(graph: &BlockGraph) -> Vec<(usize, usize)> {
        graph
            .blocks
            .iter()
            .flat_map(|block| block.succs.iter().map(move |succ| (block.index, *succ)))
            .collect()
    }

    #[test]
    fn fib_partitions_into_six_blocks() {
        let body = fixtures::fib_body();
        let units = UnitGraph::build(&body).expect("unit graph");
        let graph = build_block_graph(&body, &units, BlockPolicy::Expanded);

        let ranges: Vec<Range<usize>> = graph
            .blocks
            .iter()
            .map(|block| block.instructions.clone())
            .collect();
        assert_eq!(ranges, vec![0..4, 4..6, 6..7, 7..8, 8..13, 13..14]);
        assert_eq!(
            edges(&graph),
            vec![(0, 1), (0, 2), (1, 5), (2, 3), (3, 4), (3, 5), (4, 3)]
        );
        assert_eq!(graph.heads().map(|b| b.index).collect::<Vec<_>>(), vec![0]);
        assert_eq!(graph.tails().map(|b| b.index).collect::<Vec<_>>(), vec![5]);
        assert_eq!(graph.owner(10), 4);
        assert_eq!(graph.blocks[3].preds, vec![2, 4]);
    }

    #[test]
    fn unit_policy_gives_one_block_per_instruction() {
        let body = fixtures::fib_body();
        let units = UnitGraph::build(&body).expect("unit graph");
        let graph = build_block_graph(&body, &units, BlockPolicy::Unit);

        assert_eq!(graph.len(), body.instructions.len());
        for block in &graph.blocks {
            assert_eq!(block.head(), block.tail());
            assert_eq!(block.succs, units.succs(block.head()));
        }
    }

    #[test]
    fn expanded_policy_isolates_calls() {
        let body = fixtures::fib_caller_body();
        let units = UnitGraph::build(&body).expect("unit graph");
        let graph = build_block_graph(&body, &units, BlockPolicy::Expanded);

        let calls: Vec<usize> = body
            .instructions
            .iter()
            .enumerate()
            .filter(|(_, inst)| inst.stmt.invoke_expr().is_some())
            .map(|(index, _)| index)
            .collect();
        assert_eq!(calls.len(), 2);
        for call in calls {
            let block = &graph.blocks[graph.owner(call)];
            assert_eq!(block.instructions, call..call + 1);
        }
        assert_eq!(graph.len(), 5);
    }

    #[test]
    fn out_of_range_branch_is_rejected() {
        let body: Body = serde_json::from_value(serde_json::json!({
            "instructions": [
                {"stmt": {"kind": "goto", "target": 7}}
            ]
        }))
        .expect("decode body");

        let err = UnitGraph::build(&body).expect_err("bad target");
        assert_eq!(
            err,
            CfgError::BadBranchTarget {
                instr: 0,
                target: 7,
                len: 1
            }
        );
    }

    #[test]
    fn empty_body_has_no_blocks() {
        let body = Body::default();
        let units = UnitGraph::build(&body).expect("unit graph");
        let graph = build_block_graph(&body, &units, BlockPolicy::Expanded);
        assert_eq!(graph.len(), 0);
    }
}
