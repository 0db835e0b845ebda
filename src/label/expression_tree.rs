use std::collections::HashMap;
use std::fmt::{self, Write};

use crate::cfg::BasicBlock;
use crate::dataflow::{LocalId, Locals};
use crate::graph::{GraphError, LabeledMultiGraph, NodeId, NodeIdentity};
use crate::ir::{Stmt, Value};
use crate::label::{BlockLabel, LabelMaker, node_type};
use crate::pdg::MethodContext;

/// Labels a block with the expression trees of the locals it leaves live,
/// followed by its branch condition and bare calls.
pub(crate) struct ExpressionTreeLabels;

impl LabelMaker for ExpressionTreeLabels {
    fn label_for(&self, block: &BasicBlock, ctx: &MethodContext<'_>) -> BlockLabel {
        let body = ctx.body;
        let mut trees = TreeBuilder::new(&ctx.locals);

        // the condition is rendered before any in-block substitution
        let mut tail = match &body.instructions[block.tail()].stmt {
            Stmt::If { condition, .. } => trees.build(condition).to_string(),
            _ => String::new(),
        };

        for instr in block.iter() {
            let stmt = &body.instructions[instr].stmt;
            match stmt {
                Stmt::Identity { local, value } => trees.define(local, value),
                Stmt::Assign { lhs, rhs } => {
                    if let Some(local) = lhs.local_name() {
                        trees.define(local, rhs);
                    }
                }
                _ => {
                    if let Some(expr) = stmt.invoke_expr() {
                        let _ = write!(tail, "{}", trees.build(expr));
                    }
                }
            }
        }

        let mut label = String::new();
        for local in ctx.live.live_after(block.tail()) {
            if let Some(tree) = trees.defs.get(local) {
                let _ = write!(label, "{tree};");
            }
        }
        label.push_str(&tail);

        BlockLabel {
            label,
            node_type: node_type(body, block).to_string(),
        }
    }

    /// Hoists every constant operand into its own `constant` node, fed by the
    /// method entry and feeding the block.
    fn post_process(
        &self,
        graph: &LabeledMultiGraph,
        node: NodeId,
        block: &BasicBlock,
        ctx: &MethodContext<'_>,
    ) -> Result<(), GraphError> {
        for instr in block.iter() {
            let inst = &ctx.body.instructions[instr];
            for (index, operand) in inst.stmt.operands().into_iter().enumerate() {
                let Value::Constant { ty, text } = operand else {
                    continue;
                };
                let constant = graph.add_node(NodeIdentity {
                    label: format!("{ty}:{text}"),
                    extra: text.clone(),
                    package_name: ctx.class.package_name.clone(),
                    class_name: ctx.class.name.clone(),
                    source_file: ctx.class.source_file.clone(),
                    method_name: ctx.method.signature.clone(),
                    node_type: "constant".to_string(),
                    start_line: inst.span.start_line,
                    start_column: inst.span.start_column,
                    end_line: inst.span.end_line,
                    end_column: inst.span.end_column,
                });
                graph.add_edge(ctx.entry, constant, "cdg")?;
                graph.add_edge(constant, node, &format!("{ty}:{index}"))?;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct Tree {
    label: String,
    kids: Vec<Tree>,
}

impl Tree {
    fn leaf(label: impl Into<String>) -> Self {
        Tree {
            label: label.into(),
            kids: Vec::new(),
        }
    }

    fn with(mut self, kid: Tree) -> Self {
        self.kids.push(kid);
        self
    }
}

/// `<kid count>:<label>` followed by every child, depth-first, comma separated.
impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kids.len(), self.label)?;
        for kid in &self.kids {
            write!(f, ",{kid}")?;
        }
        Ok(())
    }
}

struct TreeBuilder<'a> {
    locals: &'a Locals,
    /// Trees of the locals defined so far in the block.
    defs: HashMap<LocalId, Tree>,
}

impl<'a> TreeBuilder<'a> {
    fn new(locals: &'a Locals) -> Self {
        TreeBuilder {
            locals,
            defs: HashMap::new(),
        }
    }

    fn define(&mut self, local: &str, value: &Value) {
        let tree = self.build(value);
        if let Some(id) = self.locals.id(local) {
            self.defs.insert(id, tree);
        }
    }

    fn build(&self, value: &Value) -> Tree {
        match value {
            Value::Local { name } => match self.locals.id(name) {
                Some(id) => self
                    .defs
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| Tree::leaf(self.locals.type_of(id))),
                None => Tree::leaf("unknown"),
            },
            Value::Constant { ty, text } => Tree::leaf(ty.as_str()).with(Tree::leaf(text.as_str())),
            Value::Parameter { ty, .. }
            | Value::This { ty }
            | Value::CaughtException { ty }
            | Value::Field { ty, .. }
            | Value::Array { ty, .. } => Tree::leaf(ty.as_str()),
            Value::Binop { op, lhs, rhs } => Tree::leaf(op.trim())
                .with(self.build(lhs))
                .with(self.build(rhs)),
            Value::Neg { operand } => Tree::leaf("negate").with(self.build(operand)),
            Value::Length { operand } => Tree::leaf("length").with(self.build(operand)),
            Value::Cast { ty, operand } => Tree::leaf("cast")
                .with(Tree::leaf(ty.as_str()))
                .with(self.build(operand)),
            Value::InstanceOf { ty, operand } => Tree::leaf("instanceof")
                .with(self.build(operand))
                .with(Tree::leaf(ty.as_str())),
            Value::New { ty } => Tree::leaf("new").with(Tree::leaf(ty.as_str())),
            Value::NewArray { ty, size } => Tree::leaf("new-array")
                .with(Tree::leaf(ty.as_str()))
                .with(self.build(size)),
            Value::NewMultiArray { ty, sizes } => sizes.iter().fold(
                Tree::leaf("new-multi-array").with(Tree::leaf(ty.as_str())),
                |tree, size| tree.with(self.build(size)),
            ),
            Value::Invoke {
                class,
                method,
                params,
                returns,
                ..
            } => {
                let params = params
                    .iter()
                    .fold(Tree::leaf("params"), |tree, param| tree.with(Tree::leaf(param.as_str())));
                Tree::leaf("call")
                    .with(Tree::leaf(format!("{class}.{method}")))
                    .with(params)
                    .with(Tree::leaf("return").with(Tree::leaf(returns.as_str())))
            }
        }
    }
}
