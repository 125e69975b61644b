//! Compile-time constant evaluation
//!
//! Evaluates integer expressions under a stack of name bindings: the
//! module's parameters sit in the outermost scope, loop indices in inner
//! scopes pushed per unrolled iteration. Anything that does not reduce to
//! an integer here is, by definition, hardware.

use indexmap::IndexMap;
use pyhdl_frontend::ast::{BinOp, BoolOp, CmpOp, Expr, UnaryOp};
use thiserror::Error;

/// Constant evaluation failure
#[derive(Debug, Clone, Error)]
pub enum EvalError {
    #[error("name `{0}` is not a compile-time constant")]
    Unbound(String),

    #[error("expression cannot be evaluated at compile time: {0}")]
    NonStatic(String),

    #[error("division by zero in constant expression")]
    DivisionByZero,

    #[error("constant expression overflows")]
    Overflow,
}

/// Evaluator over a scope stack of integer bindings
#[derive(Debug, Default)]
pub struct ConstEvaluator {
    scopes: Vec<IndexMap<String, i64>>,
}

impl ConstEvaluator {
    pub fn new() -> Self {
        Self {
            scopes: vec![IndexMap::new()],
        }
    }

    /// Bind a name in the innermost scope
    pub fn bind(&mut self, name: impl Into<String>, value: i64) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.into(), value);
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(IndexMap::new());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    /// Innermost binding for `name`
    pub fn lookup(&self, name: &str) -> Option<i64> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    /// Evaluate an expression to an integer
    pub fn eval(&self, expr: &Expr) -> Result<i64, EvalError> {
        match expr {
            Expr::Int(v) => Ok(*v),
            Expr::Name(name) => self
                .lookup(name)
                .ok_or_else(|| EvalError::Unbound(name.clone())),
            Expr::UnaryOp { op, operand } => {
                let v = self.eval(operand)?;
                Ok(match op {
                    UnaryOp::Neg => v.checked_neg().ok_or(EvalError::Overflow)?,
                    UnaryOp::Pos => v,
                    UnaryOp::Invert => !v,
                    UnaryOp::Not => (v == 0) as i64,
                })
            }
            Expr::BinOp { left, op, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                self.eval_binop(l, *op, r)
            }
            Expr::Compare { left, op, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                let holds = match op {
                    CmpOp::Eq => l == r,
                    CmpOp::Ne => l != r,
                    CmpOp::Lt => l < r,
                    CmpOp::Le => l <= r,
                    CmpOp::Gt => l > r,
                    CmpOp::Ge => l >= r,
                };
                Ok(holds as i64)
            }
            Expr::BoolOp { op, values } => {
                let mut acc = matches!(op, BoolOp::And);
                for value in values {
                    let v = self.eval(value)? != 0;
                    acc = match op {
                        BoolOp::And => acc && v,
                        BoolOp::Or => acc || v,
                    };
                }
                Ok(acc as i64)
            }
            Expr::IfExp {
                test,
                body,
                orelse,
            } => {
                if self.eval(test)? != 0 {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            other => Err(EvalError::NonStatic(describe(other))),
        }
    }

    fn eval_binop(&self, l: i64, op: BinOp, r: i64) -> Result<i64, EvalError> {
        match op {
            BinOp::Add => l.checked_add(r).ok_or(EvalError::Overflow),
            BinOp::Sub => l.checked_sub(r).ok_or(EvalError::Overflow),
            BinOp::Mul => l.checked_mul(r).ok_or(EvalError::Overflow),
            // Floor semantics, matching the source dialect
            BinOp::Div => {
                if r == 0 {
                    Err(EvalError::DivisionByZero)
                } else {
                    Ok(l.div_euclid(r))
                }
            }
            BinOp::Mod => {
                if r == 0 {
                    Err(EvalError::DivisionByZero)
                } else {
                    Ok(l.rem_euclid(r))
                }
            }
            BinOp::Pow => {
                let exp = u32::try_from(r).map_err(|_| {
                    EvalError::NonStatic("negative exponent in constant expression".into())
                })?;
                l.checked_pow(exp).ok_or(EvalError::Overflow)
            }
            BinOp::Shl => {
                let sh = u32::try_from(r).map_err(|_| {
                    EvalError::NonStatic("negative shift in constant expression".into())
                })?;
                l.checked_shl(sh).ok_or(EvalError::Overflow)
            }
            BinOp::Shr => {
                let sh = u32::try_from(r).map_err(|_| {
                    EvalError::NonStatic("negative shift in constant expression".into())
                })?;
                l.checked_shr(sh).ok_or(EvalError::Overflow)
            }
            BinOp::BitAnd => Ok(l & r),
            BinOp::BitOr => Ok(l | r),
            BinOp::BitXor => Ok(l ^ r),
        }
    }

    /// Evaluate the 1–3 arguments of a `range(...)` call to
    /// `(start, stop, step)`
    pub fn eval_range_args(&self, args: &[Expr]) -> Result<(i64, i64, i64), EvalError> {
        match args {
            [stop] => Ok((0, self.eval(stop)?, 1)),
            [start, stop] => Ok((self.eval(start)?, self.eval(stop)?, 1)),
            [start, stop, step] => Ok((
                self.eval(start)?,
                self.eval(stop)?,
                self.eval(step)?,
            )),
            _ => Err(EvalError::NonStatic(
                "`range` takes one to three arguments".into(),
            )),
        }
    }
}

fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Call { .. } => "call expression".into(),
        Expr::Subscript { .. } => "subscript expression".into(),
        Expr::Attribute { .. } => "attribute access".into(),
        Expr::Tuple(_) => "tuple expression".into(),
        _ => "unsupported expression form".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyhdl_frontend::parse_source;

    fn value_expr(source: &str) -> Expr {
        let file = parse_source(&format!("x = {}\n", source)).unwrap();
        match file.body.into_iter().next().unwrap() {
            pyhdl_frontend::ast::Stmt::Assign(assign) => assign.value,
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_arithmetic() {
        let ev = ConstEvaluator::new();
        assert_eq!(ev.eval(&value_expr("2 + 3 * 4")).unwrap(), 14);
        assert_eq!(ev.eval(&value_expr("(1 << 4) - 1")).unwrap(), 15);
        assert_eq!(ev.eval(&value_expr("2 ** 10")).unwrap(), 1024);
        assert_eq!(ev.eval(&value_expr("7 / 2")).unwrap(), 3);
        assert_eq!(ev.eval(&value_expr("7 % 2")).unwrap(), 1);
    }

    #[test]
    fn test_name_binding_and_scopes() {
        let mut ev = ConstEvaluator::new();
        ev.bind("width", 8);
        assert_eq!(ev.eval(&value_expr("width - 1")).unwrap(), 7);

        ev.push_scope();
        ev.bind("width", 4);
        assert_eq!(ev.eval(&value_expr("width")).unwrap(), 4);
        ev.pop_scope();
        assert_eq!(ev.eval(&value_expr("width")).unwrap(), 8);
    }

    #[test]
    fn test_unbound_name() {
        let ev = ConstEvaluator::new();
        assert!(matches!(
            ev.eval(&value_expr("depth + 1")),
            Err(EvalError::Unbound(name)) if name == "depth"
        ));
    }

    #[test]
    fn test_division_by_zero() {
        let ev = ConstEvaluator::new();
        assert!(matches!(
            ev.eval(&value_expr("4 / 0")),
            Err(EvalError::DivisionByZero)
        ));
    }

    #[test]
    fn test_comparisons_yield_bits() {
        let ev = ConstEvaluator::new();
        assert_eq!(ev.eval(&value_expr("3 < 4")).unwrap(), 1);
        assert_eq!(ev.eval(&value_expr("3 == 4")).unwrap(), 0);
        assert_eq!(ev.eval(&value_expr("1 == 1 and 2 == 2")).unwrap(), 1);
    }

    #[test]
    fn test_non_static_forms() {
        let ev = ConstEvaluator::new();
        assert!(matches!(
            ev.eval(&value_expr("data[3]")),
            Err(EvalError::NonStatic(_))
        ));
    }

    #[test]
    fn test_range_args() {
        let ev = ConstEvaluator::new();
        let args = vec![Expr::Int(8)];
        assert_eq!(ev.eval_range_args(&args).unwrap(), (0, 8, 1));
        let args = vec![Expr::Int(2), Expr::Int(10), Expr::Int(2)];
        assert_eq!(ev.eval_range_args(&args).unwrap(), (2, 10, 2));
    }
}
