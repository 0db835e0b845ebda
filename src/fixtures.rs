//! Hand-lowered method bodies shared by unit tests.

use serde_json::{Value as Json, json};

use crate::ir::{Body, Class};

fn local(name: &str) -> Json {
    json!({"kind": "local", "name": name})
}

fn int(text: &str) -> Json {
    json!({"kind": "constant", "type": "int", "text": text})
}

fn assign(lhs: &str, rhs: Json, line: i64) -> Json {
    json!({
        "stmt": {"kind": "assign", "lhs": local(lhs), "rhs": rhs},
        "span": span(line)
    })
}

fn binop(op: &str, lhs: Json, rhs: Json) -> Json {
    json!({"kind": "binop", "op": op, "lhs": lhs, "rhs": rhs})
}

fn span(line: i64) -> Json {
    json!({"start_line": line, "start_column": 9, "end_line": line, "end_column": 40})
}

fn fib_call() -> Json {
    json!({
        "kind": "invoke", "class": "test.pDG.CFG", "method": "fib",
        "params": ["int"], "returns": "int", "args": [local("x")]
    })
}

/// `fib(int)`: straight-line setup, an if/else, and a counting loop.
pub(crate) fn fib_body_json() -> Json {
    json!({
        "locals": [
            {"name": "x", "type": "int"},
            {"name": "prev", "type": "int"},
            {"name": "cur", "type": "int"},
            {"name": "i", "type": "int"},
            {"name": "next", "type": "int"}
        ],
        "instructions": [
            {
                "stmt": {"kind": "identity", "local": "x",
                         "value": {"kind": "parameter", "index": 0, "type": "int"}},
                "span": span(34)
            },
            assign("prev", int("0"), 35),
            assign("cur", int("1"), 36),
            {
                "stmt": {"kind": "if", "condition": binop("!=", local("x"), int("0")), "target": 6},
                "span": span(37)
            },
            assign("cur", int("0"), 38),
            {"stmt": {"kind": "goto", "target": 13}, "span": span(38)},
            assign("i", int("1"), 40),
            {
                "stmt": {"kind": "if", "condition": binop(">=", local("i"), local("x")), "target": 13},
                "span": span(40)
            },
            assign("next", binop("+", local("prev"), local("cur")), 41),
            assign("prev", local("cur"), 42),
            assign("cur", local("next"), 43),
            assign("i", binop("+", local("i"), int("1")), 40),
            {"stmt": {"kind": "goto", "target": 7}, "span": span(40)},
            {"stmt": {"kind": "return", "value": local("cur")}, "span": span(46)}
        ]
    })
}

pub(crate) fn fib_body() -> Body {
    serde_json::from_value(fib_body_json()).expect("decode fib body")
}

/// `fib_caller(int)`: two calls separated by plain arithmetic.
pub(crate) fn fib_caller_body_json() -> Json {
    json!({
        "locals": [
            {"name": "x", "type": "int"},
            {"name": "r", "type": "int"},
            {"name": "$t0", "type": "int"},
            {"name": "$t1", "type": "int"}
        ],
        "instructions": [
            {
                "stmt": {"kind": "identity", "local": "x",
                         "value": {"kind": "parameter", "index": 0, "type": "int"}},
                "span": span(50)
            },
            assign("r", int("0"), 51),
            assign("$t0", fib_call(), 52),
            assign("r", binop("+", local("r"), local("$t0")), 52),
            assign("r", binop("+", local("r"), int("1")), 53),
            assign("$t1", fib_call(), 54),
            assign("r", binop("+", local("r"), local("$t1")), 54),
            {"stmt": {"kind": "return", "value": local("r")}, "span": span(55)}
        ]
    })
}

pub(crate) fn fib_caller_body() -> Body {
    serde_json::from_value(fib_caller_body_json()).expect("decode fib_caller body")
}

/// Class `test.pDG.CFG` holding both methods.
pub(crate) fn cfg_class() -> Class {
    serde_json::from_value(json!({
        "package_name": "test.pDG",
        "name": "test.pDG.CFG",
        "source_file": "CFG.java",
        "methods": [
            {
                "name": "fib",
                "signature": "<test.pDG.CFG: int fib(int)>",
                "start_line": 33,
                "start_column": 5,
                "body": fib_body_json()
            },
            {
                "name": "fib_caller",
                "signature": "<test.pDG.CFG: int fib_caller(int)>",
                "start_line": 49,
                "start_column": 5,
                "body": fib_caller_body_json()
            }
        ]
    }))
    .expect("decode class")
}
