use std::fmt;

use serde::{Deserialize, Serialize};

/// Intermediate representation for classes supplied by the front end.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub(crate) struct Class {
    pub(crate) package_name: String,
    /// Fully qualified class name.
    pub(crate) name: String,
    #[serde(default = "unknown_source_file")]
    pub(crate) source_file: String,
    #[serde(default)]
    pub(crate) methods: Vec<Method>,
}

fn unknown_source_file() -> String {
    "unknown".to_string()
}

/// Method declaration; the body stays undecoded until the method is analyzed.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub(crate) struct Method {
    pub(crate) name: String,
    pub(crate) signature: String,
    #[serde(default)]
    pub(crate) start_line: i64,
    #[serde(default)]
    pub(crate) start_column: i64,
    /// Raw body document, `None` for abstract and native methods.
    #[serde(default)]
    pub(crate) body: Option<serde_json::Value>,
}

/// Decoded three-address method body.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub(crate) struct Body {
    #[serde(default)]
    pub(crate) locals: Vec<LocalDecl>,
    pub(crate) instructions: Vec<Instruction>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub(crate) struct LocalDecl {
    pub(crate) name: String,
    #[serde(rename = "type")]
    pub(crate) ty: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub(crate) struct Instruction {
    pub(crate) stmt: Stmt,
    #[serde(default)]
    pub(crate) span: Span,
}

/// Source position of an instruction or block.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub(crate) struct Span {
    pub(crate) start_line: i64,
    pub(crate) start_column: i64,
    pub(crate) end_line: i64,
    pub(crate) end_column: i64,
}

/// Statement kinds of the three-address IR. Branch targets are instruction indices.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum Stmt {
    Identity {
        local: String,
        value: Value,
    },
    Assign {
        lhs: Value,
        rhs: Value,
    },
    If {
        condition: Value,
        target: usize,
    },
    Goto {
        target: usize,
    },
    Switch {
        key: Value,
        targets: Vec<usize>,
        default: usize,
    },
    Invoke {
        expr: Value,
    },
    Return {
        #[serde(default)]
        value: Option<Value>,
    },
    Throw {
        value: Value,
    },
    Nop,
}

/// Values and expressions appearing as statement operands.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum Value {
    Local {
        name: String,
    },
    Constant {
        #[serde(rename = "type")]
        ty: String,
        text: String,
    },
    Parameter {
        index: usize,
        #[serde(rename = "type")]
        ty: String,
    },
    This {
        #[serde(rename = "type")]
        ty: String,
    },
    CaughtException {
        #[serde(rename = "type")]
        ty: String,
    },
    /// Instance field when `base` is present, static field otherwise.
    Field {
        class: String,
        name: String,
        #[serde(rename = "type")]
        ty: String,
        #[serde(default)]
        base: Option<Box<Value>>,
    },
    Array {
        base: Box<Value>,
        index: Box<Value>,
        #[serde(rename = "type")]
        ty: String,
    },
    Binop {
        op: String,
        lhs: Box<Value>,
        rhs: Box<Value>,
    },
    Neg {
        operand: Box<Value>,
    },
    Length {
        operand: Box<Value>,
    },
    Cast {
        #[serde(rename = "type")]
        ty: String,
        operand: Box<Value>,
    },
    InstanceOf {
        #[serde(rename = "type")]
        ty: String,
        operand: Box<Value>,
    },
    New {
        #[serde(rename = "type")]
        ty: String,
    },
    NewArray {
        #[serde(rename = "type")]
        ty: String,
        size: Box<Value>,
    },
    NewMultiArray {
        #[serde(rename = "type")]
        ty: String,
        sizes: Vec<Value>,
    },
    Invoke {
        class: String,
        method: String,
        #[serde(default)]
        params: Vec<String>,
        returns: String,
        #[serde(default)]
        base: Option<Box<Value>>,
        #[serde(default)]
        args: Vec<Value>,
    },
}

impl Value {
    /// Immediate operands (locals and constants), depth-first, left to right.
    pub(crate) fn collect_operands<'a>(&'a self, out: &mut Vec<&'a Value>) {
        match self {
            Value::Local { .. } | Value::Constant { .. } => out.push(self),
            Value::Parameter { .. }
            | Value::This { .. }
            | Value::CaughtException { .. }
            | Value::New { .. } => {}
            Value::Field { base, .. } => {
                if let Some(base) = base {
                    base.collect_operands(out);
                }
            }
            Value::Array { base, index, .. } => {
                base.collect_operands(out);
                index.collect_operands(out);
            }
            Value::Binop { lhs, rhs, .. } => {
                lhs.collect_operands(out);
                rhs.collect_operands(out);
            }
            Value::Neg { operand }
            | Value::Length { operand }
            | Value::Cast { operand, .. }
            | Value::InstanceOf { operand, .. } => operand.collect_operands(out),
            Value::NewArray { size, .. } => size.collect_operands(out),
            Value::NewMultiArray { sizes, .. } => {
                for size in sizes {
                    size.collect_operands(out);
                }
            }
            Value::Invoke { base, args, .. } => {
                if let Some(base) = base {
                    base.collect_operands(out);
                }
                for arg in args {
                    arg.collect_operands(out);
                }
            }
        }
    }

    pub(crate) fn local_name(&self) -> Option<&str> {
        match self {
            Value::Local { name } => Some(name.as_str()),
            _ => None,
        }
    }

    pub(crate) fn is_invoke(&self) -> bool {
        matches!(self, Value::Invoke { .. })
    }
}

impl Stmt {
    /// Ordered operand view used for argument-index tagging.
    pub(crate) fn operands(&self) -> Vec<&Value> {
        let mut out = Vec::new();
        match self {
            Stmt::Identity { value, .. } => value.collect_operands(&mut out),
            Stmt::Assign { lhs, rhs } => {
                if lhs.local_name().is_none() {
                    lhs.collect_operands(&mut out);
                }
                rhs.collect_operands(&mut out);
            }
            Stmt::If { condition, .. } => condition.collect_operands(&mut out),
            Stmt::Switch { key, .. } => key.collect_operands(&mut out),
            Stmt::Invoke { expr } => expr.collect_operands(&mut out),
            Stmt::Return { value } => {
                if let Some(value) = value {
                    value.collect_operands(&mut out);
                }
            }
            Stmt::Throw { value } => value.collect_operands(&mut out),
            Stmt::Goto { .. } | Stmt::Nop => {}
        }
        out
    }

    /// Local variables read by this statement, in operand order.
    pub(crate) fn used_locals(&self) -> Vec<&str> {
        self.operands()
            .into_iter()
            .filter_map(Value::local_name)
            .collect()
    }

    /// Position of `local` in the operand list, first occurrence wins.
    pub(crate) fn operand_index(&self, local: &str) -> Option<usize> {
        self.operands()
            .iter()
            .position(|value| value.local_name() == Some(local))
    }

    /// Local written by this statement. Field and array writes yield `None`.
    pub(crate) fn defined_local(&self) -> Option<&str> {
        match self {
            Stmt::Identity { local, .. } => Some(local.as_str()),
            Stmt::Assign { lhs, .. } => lhs.local_name(),
            _ => None,
        }
    }

    pub(crate) fn is_definition(&self) -> bool {
        matches!(self, Stmt::Identity { .. } | Stmt::Assign { .. })
    }

    pub(crate) fn invoke_expr(&self) -> Option<&Value> {
        match self {
            Stmt::Invoke { expr } => Some(expr),
            Stmt::Assign { rhs, .. } if rhs.is_invoke() => Some(rhs),
            _ => None,
        }
    }

    pub(crate) fn branch_targets(&self) -> Vec<usize> {
        match self {
            Stmt::If { target, .. } | Stmt::Goto { target } => vec![*target],
            Stmt::Switch {
                targets, default, ..
            } => {
                let mut all = targets.clone();
                all.push(*default);
                all
            }
            _ => Vec::new(),
        }
    }

    /// Whether control may continue with the next instruction.
    pub(crate) fn falls_through(&self) -> bool {
        !matches!(
            self,
            Stmt::Goto { .. } | Stmt::Switch { .. } | Stmt::Return { .. } | Stmt::Throw { .. }
        )
    }

    /// Whether the instruction ends a block regardless of partition policy.
    pub(crate) fn ends_block(&self) -> bool {
        !matches!(
            self,
            Stmt::Identity { .. } | Stmt::Assign { .. } | Stmt::Invoke { .. } | Stmt::Nop
        )
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Local { name } => write!(f, "{name}"),
            Value::Constant { text, .. } => write!(f, "{text}"),
            Value::Parameter { index, ty } => write!(f, "@parameter{index}: {ty}"),
            Value::This { ty } => write!(f, "@this: {ty}"),
            Value::CaughtException { .. } => write!(f, "@caughtexception"),
            Value::Field {
                class,
                name,
                ty,
                base: Some(base),
            } => write!(f, "{base}.<{class}: {ty} {name}>"),
            Value::Field {
                class,
                name,
                ty,
                base: None,
            } => write!(f, "<{class}: {ty} {name}>"),
            Value::Array { base, index, .. } => write!(f, "{base}[{index}]"),
            Value::Binop { op, lhs, rhs } => write!(f, "{lhs} {op} {rhs}"),
            Value::Neg { operand } => write!(f, "neg {operand}"),
            Value::Length { operand } => write!(f, "lengthof {operand}"),
            Value::Cast { ty, operand } => write!(f, "({ty}) {operand}"),
            Value::InstanceOf { ty, operand } => write!(f, "{operand} instanceof {ty}"),
            Value::New { ty } => write!(f, "new {ty}"),
            Value::NewArray { ty, size } => write!(f, "newarray ({ty})[{size}]"),
            Value::NewMultiArray { ty, sizes } => {
                write!(f, "newmultiarray ({ty})")?;
                for size in sizes {
                    write!(f, "[{size}]")?;
                }
                Ok(())
            }
            Value::Invoke {
                class,
                method,
                params,
                returns,
                base,
                args,
            } => {
                let args = args
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                let target = format!("<{class}: {returns} {method}({})>", params.join(","));
                match base {
                    Some(base) => write!(f, "virtualinvoke {base}.{target}({args})"),
                    None => write!(f, "staticinvoke {target}({args})"),
                }
            }
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Identity { local, value } => write!(f, "{local} := {value}"),
            Stmt::Assign { lhs, rhs } => write!(f, "{lhs} = {rhs}"),
            Stmt::If { condition, target } => write!(f, "if {condition} goto {target}"),
            Stmt::Goto { target } => write!(f, "goto {target}"),
            Stmt::Switch {
                key,
                targets,
                default,
            } => {
                let targets = targets
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "switch({key}) [{targets}] default {default}")
            }
            Stmt::Invoke { expr } => write!(f, "{expr}"),
            Stmt::Return { value: Some(value) } => write!(f, "return {value}"),
            Stmt::Return { value: None } => write!(f, "return"),
            Stmt::Throw { value } => write!(f, "throw {value}"),
            Stmt::Nop => write!(f, "nop"),
        }
    }
}
