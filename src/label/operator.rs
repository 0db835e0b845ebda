use crate::cfg::BasicBlock;
use crate::ir::{Stmt, Value};
use crate::label::{BlockLabel, LabelMaker, node_type};
use crate::pdg::MethodContext;

/// Labels a block with one operator token per instruction, `:`-joined.
pub(crate) struct OperatorLabels;

impl LabelMaker for OperatorLabels {
    fn label_for(&self, block: &BasicBlock, ctx: &MethodContext<'_>) -> BlockLabel {
        let label = block
            .iter()
            .map(|instr| stmt_token(&ctx.body.instructions[instr].stmt))
            .collect::<Vec<_>>()
            .join(":");
        BlockLabel {
            label,
            node_type: node_type(ctx.body, block).to_string(),
        }
    }
}

fn stmt_token(stmt: &Stmt) -> String {
    match stmt {
        Stmt::Identity { value, .. } => value_token(value),
        Stmt::Assign { lhs, rhs } => match (lhs, rhs) {
            (Value::Local { .. }, Value::Local { .. }) => "=".to_string(),
            (Value::Local { .. }, rhs) => value_token(rhs),
            (lhs, Value::Local { .. }) => format!("{}=", value_token(lhs)),
            (lhs, rhs) => format!("{}={}", value_token(lhs), value_token(rhs)),
        },
        Stmt::If { condition, .. } => value_token(condition),
        Stmt::Goto { .. } => "goto".to_string(),
        Stmt::Switch { .. } => "switch".to_string(),
        Stmt::Invoke { expr } => value_token(expr),
        Stmt::Return { .. } => "return".to_string(),
        Stmt::Throw { .. } => "throw".to_string(),
        Stmt::Nop => "nop".to_string(),
    }
}

fn value_token(value: &Value) -> String {
    match value {
        Value::Local { .. } => "=".to_string(),
        Value::Constant { text, .. } => text.clone(),
        Value::Parameter { index, .. } => format!("param({index})"),
        Value::This { .. } => "this".to_string(),
        Value::CaughtException { .. } => "caughtexception".to_string(),
        Value::Field { class, name, .. } => format!("{class}.{name}"),
        Value::Array { .. } => "array".to_string(),
        Value::Binop { op, .. } => op.trim().to_string(),
        Value::Neg { .. } => "negate".to_string(),
        Value::Length { .. } => "length".to_string(),
        Value::Cast { .. } => "cast".to_string(),
        Value::InstanceOf { .. } => "instanceof".to_string(),
        Value::New { .. } => "new".to_string(),
        Value::NewArray { .. } => "new-array".to_string(),
        Value::NewMultiArray { .. } => "new-multi-array".to_string(),
        Value::Invoke { class, method, .. } => format!("{class}.{method}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::BlockPolicy;
    use crate::fixtures;

    #[test]
    fn fib_operator_labels() {
        let class = fixtures::cfg_class();
        let body = fixtures::fib_body();
        let ctx = MethodContext::analyze(&class, &class.methods[0], &body, BlockPolicy::Expanded, 0)
            .expect("analyze");

        let labels: Vec<String> = ctx
            .blocks
            .blocks
            .iter()
            .map(|block| OperatorLabels.label_for(block, &ctx).label)
            .collect();
        assert_eq!(
            labels,
            vec!["param(0):0:1:!=", "0:goto", "1", ">=", "+:=:=:+:goto", "return"]
        );
    }

    #[test]
    fn field_writes_show_both_sides() {
        let stmt: Stmt = serde_json::from_value(serde_json::json!({
            "kind": "assign",
            "lhs": {"kind": "field", "class": "test.Buffer", "name": "size", "type": "int"},
            "rhs": {"kind": "local", "name": "n"}
        }))
        .expect("decode stmt");
        assert_eq!(stmt_token(&stmt), "test.Buffer.size=");
    }
}
