use std::cmp::Ordering;
use std::collections::BTreeSet;

use thiserror::Error;

use crate::cfg::BlockGraph;

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum DominanceError {
    /// No block of the method reaches an exit.
    #[error("block {block} cannot reach a method exit")]
    UnreachableExit { block: usize },
}

const UNDEFINED: usize = usize::MAX;

/// Immediate post-dominators of a block graph.
///
/// Every tail block is joined to a virtual exit, which roots the tree. A block
/// whose immediate post-dominator is the virtual exit reports `None`, and so
/// does a block with no path to an exit. Only paths reaching an exit count.
#[derive(Clone, Debug)]
pub(crate) struct PostDominators {
    ipdom: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    /// Blocks ordered so that every block precedes its post-dominator.
    bottom_up: Vec<usize>,
    /// Blocks that cannot reach an exit, ascending.
    stuck: Vec<usize>,
}

impl PostDominators {
    pub(crate) fn compute(graph: &BlockGraph) -> Result<Self, DominanceError> {
        let len = graph.len();
        let exit = len;

        // reverse postorder of the reverse CFG, starting at the virtual exit
        let order = reverse_postorder(graph, exit);
        let mut rpo_ids = vec![UNDEFINED; len + 1];
        for (id, node) in order.iter().enumerate() {
            rpo_ids[*node] = id;
        }
        let stuck: Vec<usize> = (0..len).filter(|block| rpo_ids[*block] == UNDEFINED).collect();
        if len > 0 && stuck.len() == len {
            return Err(DominanceError::UnreachableExit { block: 0 });
        }

        // ipdom over rpo ids; the root post-dominates itself
        let mut ipdom = vec![UNDEFINED; order.len()];
        ipdom[0] = 0;

        let mut changed = true;
        while changed {
            changed = false;
            for (id, node) in order.iter().enumerate().skip(1) {
                let mut processed = exits_of(graph, *node, exit)
                    .map(|succ| rpo_ids[succ])
                    .filter(|succ| *succ != UNDEFINED && ipdom[*succ] != UNDEFINED);
                let Some(first) = processed.next() else {
                    continue;
                };
                let new_ipdom = processed.fold(first, |acc, succ| intersect(&ipdom, acc, succ));
                if ipdom[id] != new_ipdom {
                    ipdom[id] = new_ipdom;
                    changed = true;
                }
            }
        }

        let mut result = vec![None; len];
        let mut children = vec![Vec::new(); len];
        for (id, node) in order.iter().enumerate().skip(1) {
            let dominator = order[ipdom[id]];
            if dominator != exit {
                result[*node] = Some(dominator);
                children[dominator].push(*node);
            }
        }
        for kids in &mut children {
            kids.sort_unstable();
        }
        let bottom_up = order.iter().rev().copied().filter(|node| *node != exit).collect();

        Ok(PostDominators {
            ipdom: result,
            children,
            bottom_up,
            stuck,
        })
    }

    /// Immediate post-dominator, `None` when it is the virtual exit.
    pub(crate) fn ipdom(&self, block: usize) -> Option<usize> {
        self.ipdom[block]
    }

    pub(crate) fn children(&self, block: usize) -> &[usize] {
        &self.children[block]
    }

    pub(crate) fn stuck(&self) -> &[usize] {
        &self.stuck
    }
}

/// Successors in the CFG, with the virtual exit standing in for tail blocks.
fn exits_of(graph: &BlockGraph, node: usize, exit: usize) -> impl Iterator<Item = usize> + '_ {
    let block = &graph.blocks[node];
    let virtual_exit = block.succs.is_empty().then_some(exit);
    block.succs.iter().copied().chain(virtual_exit)
}

fn reverse_postorder(graph: &BlockGraph, exit: usize) -> Vec<usize> {
    let len = graph.len();
    let tails: Vec<usize> = graph.tails().map(|block| block.index).collect();

    let mut visited = vec![false; len + 1];
    let mut postorder = Vec::with_capacity(len + 1);
    let mut stack = vec![(exit, 0usize)];
    visited[exit] = true;
    while let Some(top) = stack.len().checked_sub(1) {
        let (node, next) = stack[top];
        match reverse_succs(graph, &tails, node, exit).get(next).copied() {
            Some(succ) => {
                stack[top].1 += 1;
                if !visited[succ] {
                    visited[succ] = true;
                    stack.push((succ, 0));
                }
            }
            None => {
                postorder.push(node);
                stack.pop();
            }
        }
    }
    postorder.reverse();
    postorder
}

fn reverse_succs<'a>(graph: &'a BlockGraph, tails: &'a [usize], node: usize, exit: usize) -> &'a [usize] {
    if node == exit {
        tails
    } else {
        &graph.blocks[node].preds
    }
}

fn intersect(ipdom: &[usize], mut finger1: usize, mut finger2: usize) -> usize {
    loop {
        match finger1.cmp(&finger2) {
            Ordering::Greater => finger1 = ipdom[finger1],
            Ordering::Less => finger2 = ipdom[finger2],
            Ordering::Equal => return finger1,
        }
    }
}

/// Post-dominance frontiers (Cytron et al.), i.e. the blocks each block is
/// control dependent on.
#[derive(Clone, Debug)]
pub(crate) struct DominanceFrontier {
    frontiers: Vec<BTreeSet<usize>>,
    stuck: Vec<usize>,
}

impl DominanceFrontier {
    pub(crate) fn compute(graph: &BlockGraph) -> Result<Self, DominanceError> {
        let pdom = PostDominators::compute(graph)?;
        let mut frontiers = vec![BTreeSet::new(); graph.len()];

        for &node in &pdom.bottom_up {
            let mut frontier = BTreeSet::new();
            // DF_local: CFG predecessors not immediately post-dominated by node
            for &pred in &graph.blocks[node].preds {
                if pdom.ipdom(pred) != Some(node) {
                    frontier.insert(pred);
                }
            }
            // DF_up: inherited from the children in the post-dominator tree
            for &child in pdom.children(node) {
                for &block in &frontiers[child] {
                    if pdom.ipdom(block) != Some(node) {
                        frontier.insert(block);
                    }
                }
            }
            frontiers[node] = frontier;
        }

        Ok(DominanceFrontier {
            frontiers,
            stuck: pdom.stuck,
        })
    }

    /// Dominance frontier of `block` in the post-dominator tree.
    pub(crate) fn frontier(&self, block: usize) -> &BTreeSet<usize> {
        &self.frontiers[block]
    }

    /// Blocks left out because they cannot reach an exit, ascending.
    pub(crate) fn stuck(&self) -> &[usize] {
        &self.stuck
    }
}
