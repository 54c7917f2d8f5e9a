// pattern.rs — Case-over-variant compilation
//
// Flattens each alternative's (possibly nested) pattern into a list of tag and
// literal checks plus the field paths it binds. Alternatives are tried in
// order; the first whose checks and guards all hold wins. A failing guard
// hands control to the next alternative, never straight to the default.
//
// Generated code carries a per-case `matched` flag so every alternative sits
// at the same nesting depth regardless of how many guards it has:
//
//     T subject_1 = <scrutinee>;
//     bool matched_0 = false;
//     if (!matched_0) { if (tag checks) { bind; if (guards) { matched_0 = true; body } } }
//     ...
//     if (!matched_0) { default }
//
// Preconditions: the scrutinee's sum type and every nested field type used in
//                a variant pattern is declared.
// Failure modes: PatternError (unknown type/variant, arity mismatch).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::am::{Expr, SumType};
use crate::emit::Emitter;
use crate::expr::{self, EvalError, ExprTranslator, Shadowed, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pattern {
    Wildcard,
    Binding {
        name: String,
    },
    Literal {
        value: i64,
    },
    Variant {
        tag: String,
        #[serde(default)]
        fields: Vec<Pattern>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alternative<B> {
    pub pattern: Pattern,
    #[serde(default)]
    pub guards: Vec<Expr>,
    pub body: B,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("'{0}' is not a declared sum type")]
    NotASumType(String),
    #[error("sum type '{ty}' has no variant '{tag}'")]
    UnknownVariant { ty: String, tag: String },
    #[error("variant '{tag}' has {expected} fields but the pattern lists {found}")]
    Arity {
        tag: String,
        expected: usize,
        found: usize,
    },
}

// ── Plan ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub variant: String,
    pub field: String,
    pub index: usize,
}

/// Field path from the scrutinee down to a sub-value.
pub type Path = Vec<Step>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    Tag {
        path: Path,
        sum_type: String,
        variant: String,
    },
    Literal {
        path: Path,
        value: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    pub ty: String,
    pub path: Path,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arm {
    /// Index of the source alternative.
    pub alternative: usize,
    pub checks: Vec<Check>,
    pub bindings: Vec<Binding>,
    pub guards: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPlan {
    pub sum_type: String,
    pub arms: Vec<Arm>,
}

pub fn compile_case<B>(
    sum_type: &str,
    sum_types: &[SumType],
    alternatives: &[Alternative<B>],
) -> Result<MatchPlan, PatternError> {
    let mut arms = Vec::with_capacity(alternatives.len());
    for (i, alt) in alternatives.iter().enumerate() {
        let mut checks = Vec::new();
        let mut bindings = Vec::new();
        flatten(
            &alt.pattern,
            sum_type,
            &Vec::new(),
            sum_types,
            &mut checks,
            &mut bindings,
        )?;
        arms.push(Arm {
            alternative: i,
            checks,
            bindings,
            guards: alt.guards.clone(),
        });
    }
    Ok(MatchPlan {
        sum_type: sum_type.to_string(),
        arms,
    })
}

fn flatten(
    pattern: &Pattern,
    ty: &str,
    path: &Path,
    sum_types: &[SumType],
    checks: &mut Vec<Check>,
    bindings: &mut Vec<Binding>,
) -> Result<(), PatternError> {
    match pattern {
        Pattern::Wildcard => {}
        Pattern::Binding { name } => bindings.push(Binding {
            name: name.clone(),
            ty: ty.to_string(),
            path: path.clone(),
        }),
        Pattern::Literal { value } => checks.push(Check::Literal {
            path: path.clone(),
            value: *value,
        }),
        Pattern::Variant { tag, fields } => {
            let st = sum_types
                .iter()
                .find(|t| t.name == ty)
                .ok_or_else(|| PatternError::NotASumType(ty.to_string()))?;
            let variant = st.variant(tag).ok_or_else(|| PatternError::UnknownVariant {
                ty: ty.to_string(),
                tag: tag.clone(),
            })?;
            if variant.fields.len() != fields.len() {
                return Err(PatternError::Arity {
                    tag: tag.clone(),
                    expected: variant.fields.len(),
                    found: fields.len(),
                });
            }
            checks.push(Check::Tag {
                path: path.clone(),
                sum_type: ty.to_string(),
                variant: tag.clone(),
            });
            for (index, (sub, decl)) in fields.iter().zip(&variant.fields).enumerate() {
                let mut inner = path.clone();
                inner.push(Step {
                    variant: tag.clone(),
                    field: decl.name.clone(),
                    index,
                });
                flatten(sub, &decl.ty, &inner, sum_types, checks, bindings)?;
            }
        }
    }
    Ok(())
}

// ── Selection ───────────────────────────────────────────────────────────────

fn project<'v>(value: &'v Value, path: &Path) -> Option<&'v Value> {
    path.iter().try_fold(value, |v, step| match v {
        Value::Variant { tag, fields } if *tag == step.variant => fields.get(step.index),
        _ => None,
    })
}

impl MatchPlan {
    /// Index of the alternative `value` selects, or `None` for the default.
    /// `env` resolves names the guards use besides the pattern's bindings.
    pub fn select(&self, value: &Value, env: &expr::Env<'_>) -> Result<Option<usize>, EvalError> {
        'arms: for arm in &self.arms {
            for check in &arm.checks {
                let hit = match check {
                    Check::Tag { path, variant, .. } => matches!(
                        project(value, path),
                        Some(Value::Variant { tag, .. }) if tag == variant
                    ),
                    Check::Literal { path, value: lit } => {
                        project(value, path) == Some(&Value::Int(*lit))
                    }
                };
                if !hit {
                    continue 'arms;
                }
            }
            let bound: Vec<(&str, Value)> = arm
                .bindings
                .iter()
                .filter_map(|b| project(value, &b.path).map(|v| (b.name.as_str(), v.clone())))
                .collect();
            let scoped = |name: &str| {
                bound
                    .iter()
                    .find(|(n, _)| *n == name)
                    .map(|(_, v)| v.clone())
                    .or_else(|| env(name))
            };
            for guard in &arm.guards {
                if !expr::as_bool(expr::eval(guard, &scoped)?)? {
                    continue 'arms;
                }
            }
            return Ok(Some(arm.alternative));
        }
        Ok(None)
    }
}

// ── C emission ──────────────────────────────────────────────────────────────

fn access(subject: &str, path: &Path) -> String {
    let mut s = subject.to_string();
    for step in path {
        s = format!("{}.data.{}.{}", s, step.variant, step.field);
    }
    s
}

fn check_text(subject: &str, check: &Check) -> String {
    match check {
        Check::Tag {
            path,
            sum_type,
            variant,
        } => format!("{}.tag == TAG_{}_{}", access(subject, path), sum_type, variant),
        Check::Literal { path, value } => format!("{} == {}", access(subject, path), value),
    }
}

/// Body callback: `None` selects the default body. The translator passed in
/// already resolves the arm's bound names.
pub type BodyFn<'a> =
    dyn FnMut(&mut Emitter, Option<usize>, &dyn ExprTranslator) -> Result<(), PatternError> + 'a;

pub fn emit_case(
    out: &mut Emitter,
    plan: &MatchPlan,
    subject: &str,
    tr: &dyn ExprTranslator,
    body: &mut BodyFn<'_>,
) -> Result<(), PatternError> {
    let flag = out.fresh("matched");
    out.open("{");
    // The subject may read a port or call a function; evaluate it once.
    let bound = out.fresh("subject");
    out.line(format!("{} {} = {};", plan.sum_type, bound, subject));
    let subject = bound.as_str();
    out.line(format!("bool {} = false;", flag));
    for arm in &plan.arms {
        out.open(format!("if (!{}) {{", flag));
        let mut depth = 0;
        if !arm.checks.is_empty() {
            let cond: Vec<String> = arm.checks.iter().map(|c| check_text(subject, c)).collect();
            out.open(format!("if ({}) {{", cond.join(" && ")));
            depth += 1;
        }
        for b in &arm.bindings {
            out.line(format!("{} {} = {};", b.ty, b.name, access(subject, &b.path)));
        }
        let names: Vec<String> = arm.bindings.iter().map(|b| b.name.clone()).collect();
        let scoped = Shadowed { inner: tr, names: &names };
        if !arm.guards.is_empty() {
            let cond: Vec<String> = arm
                .guards
                .iter()
                .map(|g| expr::translate(&scoped, g))
                .collect();
            out.open(format!("if ({}) {{", cond.join(" && ")));
            depth += 1;
        }
        out.line(format!("{} = true;", flag));
        body(out, Some(arm.alternative), &scoped)?;
        for _ in 0..depth {
            out.close("}");
        }
        out.close("}");
    }
    out.open(format!("if (!{}) {{", flag));
    body(out, None, tr)?;
    out.close("}");
    out.close("}");
    Ok(())
}
