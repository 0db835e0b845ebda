use std::fmt::Write;

use crate::cfg::BasicBlock;
use crate::ir::Body;
use crate::label::{BlockLabel, LabelMaker, node_type};
use crate::pdg::MethodContext;

/// Labels a block with its raw instruction listing.
pub(crate) struct InstructionLabels;

impl LabelMaker for InstructionLabels {
    fn label_for(&self, block: &BasicBlock, ctx: &MethodContext<'_>) -> BlockLabel {
        BlockLabel {
            label: dump(ctx.body, block),
            node_type: node_type(ctx.body, block).to_string(),
        }
    }
}

/// One instruction per line, each terminated by a newline.
pub(crate) fn dump(body: &Body, block: &BasicBlock) -> String {
    let mut out = String::new();
    for instr in block.iter() {
        let _ = writeln!(out, "{}", body.instructions[instr].stmt);
    }
    out
}
