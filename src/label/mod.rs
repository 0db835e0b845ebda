use clap::ValueEnum;

use crate::cfg::BasicBlock;
use crate::graph::{GraphError, LabeledMultiGraph, NodeId};
use crate::ir::{Body, Stmt};
use crate::pdg::MethodContext;

pub(crate) mod expression_tree;
pub(crate) mod instruction;
pub(crate) mod operator;

/// Label and node type chosen for a block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct BlockLabel {
    pub(crate) label: String,
    pub(crate) node_type: String,
}

/// Strategy turning a basic block into a node label.
pub(crate) trait LabelMaker: Send + Sync {
    fn label_for(&self, block: &BasicBlock, ctx: &MethodContext<'_>) -> BlockLabel;

    /// Called right after the block's node is created.
    fn post_process(
        &self,
        _graph: &LabeledMultiGraph,
        _node: NodeId,
        _block: &BasicBlock,
        _ctx: &MethodContext<'_>,
    ) -> Result<(), GraphError> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub(crate) enum LabelKind {
    /// One instruction per line.
    Instruction,
    /// Expression trees of the values a block leaves live.
    #[default]
    ExpressionTree,
    /// One operator token per instruction.
    Operator,
}

impl LabelKind {
    pub(crate) fn maker(self) -> &'static dyn LabelMaker {
        match self {
            LabelKind::Instruction => &instruction::InstructionLabels,
            LabelKind::ExpressionTree => &expression_tree::ExpressionTreeLabels,
            LabelKind::Operator => &operator::OperatorLabels,
        }
    }
}

/// Node type of a block, shared by every strategy.
pub(crate) fn node_type(body: &Body, block: &BasicBlock) -> &'static str {
    match &body.instructions[block.tail()].stmt {
        Stmt::If { .. } => "branch",
        Stmt::Switch { .. } => "switch",
        Stmt::Return { .. } => "return",
        Stmt::Throw { .. } => "throw",
        _ if block
            .iter()
            .any(|instr| body.instructions[instr].stmt.invoke_expr().is_some()) =>
        {
            "call"
        }
        _ => "assignments",
    }
}
