// expr.rs — Scalar expression and statement translation
//
// Both targets print expressions in C syntax; they differ only in how a
// variable, a port peek and a port write are spelled. Those three hooks form
// the `ExprTranslator` trait. Statement lowering walks the body once and
// defers `case` statements to the pattern compiler.
//
// A small evaluator over `Value` is kept here for pattern guards and for the
// simulator's scripted behaviors; it is not used by code generation.

use std::fmt;

use thiserror::Error;

use crate::am::{BinOp, Expr, Stmt, SumType, UnaryOp};
use crate::emit::Emitter;
use crate::pattern::{self, PatternError};

// ── Translation ─────────────────────────────────────────────────────────────

pub trait ExprTranslator {
    fn var(&self, name: &str) -> String;
    fn peek(&self, port: &str, offset: u32) -> String;
    /// A complete statement storing `value` on `port`.
    fn write(&self, port: &str, offset: u32, value: &str) -> String;
}

/// Names bound by a pattern shadow the enclosing translator's variables.
pub struct Shadowed<'a> {
    pub inner: &'a dyn ExprTranslator,
    pub names: &'a [String],
}

impl ExprTranslator for Shadowed<'_> {
    fn var(&self, name: &str) -> String {
        if self.names.iter().any(|n| n == name) {
            name.to_string()
        } else {
            self.inner.var(name)
        }
    }

    fn peek(&self, port: &str, offset: u32) -> String {
        self.inner.peek(port, offset)
    }

    fn write(&self, port: &str, offset: u32, value: &str) -> String {
        self.inner.write(port, offset, value)
    }
}

fn binop(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Rem => "%",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
        BinOp::And => "&&",
        BinOp::Or => "||",
    }
}

pub fn translate(tr: &dyn ExprTranslator, expr: &Expr) -> String {
    match expr {
        Expr::Var { name } => tr.var(name),
        Expr::Int { value } if *value < 0 => format!("({})", value),
        Expr::Int { value } => value.to_string(),
        Expr::Bool { value } => value.to_string(),
        Expr::Unary { op, operand } => {
            let op = match op {
                UnaryOp::Neg => "-",
                UnaryOp::Not => "!",
            };
            format!("({}{})", op, translate(tr, operand))
        }
        Expr::Binary { op, lhs, rhs } => format!(
            "({} {} {})",
            translate(tr, lhs),
            binop(*op),
            translate(tr, rhs)
        ),
        Expr::Call { function, args } => {
            let args: Vec<String> = args.iter().map(|a| translate(tr, a)).collect();
            format!("{}({})", function, args.join(", "))
        }
        Expr::Peek { port, offset } => tr.peek(port, *offset),
    }
}

pub fn emit_stmts(
    out: &mut Emitter,
    stmts: &[Stmt],
    tr: &dyn ExprTranslator,
    sum_types: &[SumType],
) -> Result<(), PatternError> {
    for stmt in stmts {
        emit_stmt(out, stmt, tr, sum_types)?;
    }
    Ok(())
}

fn emit_stmt(
    out: &mut Emitter,
    stmt: &Stmt,
    tr: &dyn ExprTranslator,
    sum_types: &[SumType],
) -> Result<(), PatternError> {
    match stmt {
        Stmt::Assign { target, value } => {
            out.line(format!("{} = {};", tr.var(target), translate(tr, value)));
        }
        Stmt::Write {
            port,
            offset,
            value,
        } => out.line(tr.write(port, *offset, &translate(tr, value))),
        Stmt::If {
            cond,
            then,
            otherwise,
        } => {
            out.open(format!("if ({}) {{", translate(tr, cond)));
            emit_stmts(out, then, tr, sum_types)?;
            if otherwise.is_empty() {
                out.close("}");
            } else {
                out.reopen("} else {");
                emit_stmts(out, otherwise, tr, sum_types)?;
                out.close("}");
            }
        }
        Stmt::Call { procedure, args } => {
            let args: Vec<String> = args.iter().map(|a| translate(tr, a)).collect();
            out.line(format!("{}({});", procedure, args.join(", ")));
        }
        Stmt::Case {
            scrutinee,
            sum_type,
            alternatives,
            default,
        } => {
            let plan = pattern::compile_case(sum_type, sum_types, alternatives)?;
            let subject = translate(tr, scrutinee);
            pattern::emit_case(out, &plan, &subject, tr, &mut |out, idx, scoped| {
                let body = match idx {
                    Some(i) => alternatives.get(i).map(|a| a.body.as_slice()).unwrap_or(&[]),
                    None => default.as_slice(),
                };
                emit_stmts(out, body, scoped, sum_types)
            })?;
        }
    }
    Ok(())
}

// ── Evaluation ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Variant { tag: String, fields: Vec<Value> },
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Variant { tag, fields } => {
                write!(f, "{}(", tag)?;
                for (i, v) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("unbound variable '{0}'")]
    Unbound(String),
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: Value },
    #[error("division by zero")]
    DivisionByZero,
    #[error("cannot evaluate {0} without a runtime")]
    Unsupported(&'static str),
}

/// Variable lookup for `eval`.
pub type Env<'a> = dyn Fn(&str) -> Option<Value> + 'a;

pub fn eval(expr: &Expr, env: &Env<'_>) -> Result<Value, EvalError> {
    match expr {
        Expr::Var { name } => env(name).ok_or_else(|| EvalError::Unbound(name.clone())),
        Expr::Int { value } => Ok(Value::Int(*value)),
        Expr::Bool { value } => Ok(Value::Bool(*value)),
        Expr::Unary { op, operand } => {
            let v = eval(operand, env)?;
            match op {
                UnaryOp::Neg => Ok(Value::Int(as_int(v)?.wrapping_neg())),
                UnaryOp::Not => Ok(Value::Bool(!as_bool(v)?)),
            }
        }
        Expr::Binary { op, lhs, rhs } => {
            // Short-circuit the logical operators like the generated C does.
            if matches!(op, BinOp::And | BinOp::Or) {
                let l = as_bool(eval(lhs, env)?)?;
                return match (op, l) {
                    (BinOp::And, false) => Ok(Value::Bool(false)),
                    (BinOp::Or, true) => Ok(Value::Bool(true)),
                    _ => Ok(Value::Bool(as_bool(eval(rhs, env)?)?)),
                };
            }
            let l = as_int(eval(lhs, env)?)?;
            let r = as_int(eval(rhs, env)?)?;
            Ok(match op {
                BinOp::Add => Value::Int(l.wrapping_add(r)),
                BinOp::Sub => Value::Int(l.wrapping_sub(r)),
                BinOp::Mul => Value::Int(l.wrapping_mul(r)),
                BinOp::Div | BinOp::Rem if r == 0 => return Err(EvalError::DivisionByZero),
                BinOp::Div => Value::Int(l.wrapping_div(r)),
                BinOp::Rem => Value::Int(l.wrapping_rem(r)),
                BinOp::Eq => Value::Bool(l == r),
                BinOp::Ne => Value::Bool(l != r),
                BinOp::Lt => Value::Bool(l < r),
                BinOp::Le => Value::Bool(l <= r),
                BinOp::Gt => Value::Bool(l > r),
                BinOp::Ge => Value::Bool(l >= r),
                BinOp::And | BinOp::Or => {
                    return Err(EvalError::TypeMismatch {
                        expected: "bool",
                        found: Value::Int(l),
                    })
                }
            })
        }
        Expr::Call { .. } => Err(EvalError::Unsupported("a function call")),
        Expr::Peek { .. } => Err(EvalError::Unsupported("a port peek")),
    }
}

pub fn as_int(v: Value) -> Result<i64, EvalError> {
    match v {
        Value::Int(i) => Ok(i),
        other => Err(EvalError::TypeMismatch {
            expected: "int",
            found: other,
        }),
    }
}

pub fn as_bool(v: Value) -> Result<bool, EvalError> {
    match v {
        Value::Bool(b) => Ok(b),
        other => Err(EvalError::TypeMismatch {
            expected: "bool",
            found: other,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain;

    impl ExprTranslator for Plain {
        fn var(&self, name: &str) -> String {
            format!("self_{}", name)
        }
        fn peek(&self, port: &str, offset: u32) -> String {
            format!("peek({}, {})", port, offset)
        }
        fn write(&self, port: &str, offset: u32, value: &str) -> String {
            format!("put({}, {}, {});", port, offset, value)
        }
    }

    #[test]
    fn translates_nested_expression() {
        let e = Expr::binary(
            BinOp::Add,
            Expr::var("acc"),
            Expr::Peek {
                port: "in".into(),
                offset: 1,
            },
        );
        assert_eq!(translate(&Plain, &e), "(self_acc + peek(in, 1))");
        assert_eq!(translate(&Plain, &Expr::int(-3)), "(-3)");
    }

    #[test]
    fn shadowed_names_stay_local() {
        let names = vec!["x".to_string()];
        let tr = Shadowed {
            inner: &Plain,
            names: &names,
        };
        assert_eq!(tr.var("x"), "x");
        assert_eq!(tr.var("y"), "self_y");
    }

    #[test]
    fn emits_if_else() {
        let mut out = Emitter::new();
        let body = vec![Stmt::If {
            cond: Expr::binary(BinOp::Gt, Expr::var("n"), Expr::int(0)),
            then: vec![Stmt::Write {
                port: "out".into(),
                offset: 0,
                value: Expr::var("n"),
            }],
            otherwise: vec![Stmt::Assign {
                target: "n".into(),
                value: Expr::int(1),
            }],
        }];
        emit_stmts(&mut out, &body, &Plain, &[]).unwrap();
        assert_eq!(
            out.finish(),
            "if ((self_n > 0)) {\n    put(out, 0, self_n);\n} else {\n    self_n = 1;\n}\n"
        );
    }

    #[test]
    fn case_subject_is_evaluated_once() {
        use crate::am::{Field, Variant};
        use crate::pattern::{Alternative, Pattern};

        let sum_types = vec![SumType {
            name: "T".into(),
            variants: vec![
                Variant {
                    name: "A".into(),
                    fields: vec![Field {
                        name: "x".into(),
                        ty: "int32_t".into(),
                    }],
                },
                Variant {
                    name: "B".into(),
                    fields: vec![],
                },
            ],
        }];
        let call = |procedure: &str| Stmt::Call {
            procedure: procedure.into(),
            args: vec![],
        };
        let body = vec![Stmt::Case {
            scrutinee: Expr::Call {
                function: "next_token".into(),
                args: vec![],
            },
            sum_type: "T".into(),
            alternatives: vec![
                Alternative {
                    pattern: Pattern::Variant {
                        tag: "A".into(),
                        fields: vec![Pattern::Binding { name: "x".into() }],
                    },
                    guards: vec![],
                    body: vec![call("on_a")],
                },
                Alternative {
                    pattern: Pattern::Variant {
                        tag: "B".into(),
                        fields: vec![],
                    },
                    guards: vec![],
                    body: vec![call("on_b")],
                },
            ],
            default: vec![],
        }];
        let mut out = Emitter::new();
        emit_stmts(&mut out, &body, &Plain, &sum_types).unwrap();
        let text = out.finish();
        assert_eq!(text.matches("next_token()").count(), 1, "{}", text);
        assert!(text.contains("T subject_1 = next_token();"));
        assert!(text.contains("if (subject_1.tag == TAG_T_B) {"));
    }

    #[test]
    fn eval_short_circuits() {
        let env = |_: &str| -> Option<Value> { None };
        // `false && unbound` never looks up the right-hand side.
        let e = Expr::binary(BinOp::And, Expr::Bool { value: false }, Expr::var("missing"));
        assert_eq!(eval(&e, &env), Ok(Value::Bool(false)));
        let e = Expr::binary(BinOp::Div, Expr::int(1), Expr::int(0));
        assert_eq!(eval(&e, &env), Err(EvalError::DivisionByZero));
    }
}
