//! Symbolic expression AST and evaluation.
//!
//! Expressions are built by the restricted parser and evaluated against a
//! candidate assignment. Arithmetic stays in exact rationals and is demoted to
//! `f64` only when an operation leaves the rational field (fractional
//! exponents, non-perfect roots).

use num_bigint::BigInt;
use num_integer::Roots;
use num_rational::BigRational;
use num_traits::{Signed, ToPrimitive, Zero};
use thiserror::Error;

/// Fixed tolerance for comparisons and answer checks involving inexact
/// values. Part of the verification contract; golden outputs depend on it.
pub const EPSILON: f64 = 1e-6;

/// Largest integer exponent the exact evaluator accepts.
const MAX_EXPONENT: u32 = 4096;

/// Errors that can occur during expression evaluation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Complex result from negative base with fractional exponent")]
    ComplexResult,
    #[error("Even root of negative number")]
    EvenRootOfNegative,
    #[error("Zero raised to a negative power")]
    ZeroToNegativePower,
    #[error("Exponent too large")]
    ExponentOverflow,
    #[error("Non-finite intermediate result")]
    NonFinite,
}

/// Whitelisted functions, matched by exact (case-sensitive) name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Abs,
    Floor,
    Ceiling,
    Sqrt,
    Cbrt,
    Mod,
}

impl Func {
    pub fn from_name(name: &str) -> Option<Func> {
        match name {
            "Abs" => Some(Func::Abs),
            "floor" => Some(Func::Floor),
            "ceiling" => Some(Func::Ceiling),
            "sqrt" => Some(Func::Sqrt),
            "cbrt" => Some(Func::Cbrt),
            "Mod" => Some(Func::Mod),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Func::Abs => "Abs",
            Func::Floor => "floor",
            Func::Ceiling => "ceiling",
            Func::Sqrt => "sqrt",
            Func::Cbrt => "cbrt",
            Func::Mod => "Mod",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Func::Mod => 2,
            _ => 1,
        }
    }
}

/// A symbolic expression over the declared variables. Variables are referred
/// to by their index in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(BigRational),
    Var(usize),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Pow(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Call(Func, Vec<Expr>),
}

impl Expr {
    /// Whether any variable occurs in the expression.
    pub fn has_vars(&self) -> bool {
        match self {
            Expr::Number(_) => false,
            Expr::Var(_) => true,
            Expr::Add(l, r)
            | Expr::Sub(l, r)
            | Expr::Mul(l, r)
            | Expr::Div(l, r)
            | Expr::Pow(l, r) => l.has_vars() || r.has_vars(),
            Expr::Neg(e) => e.has_vars(),
            Expr::Call(_, args) => args.iter().any(Expr::has_vars),
        }
    }

    /// Evaluate under the given assignment (one value per declared variable).
    pub fn eval(&self, assignment: &[Value]) -> Result<Value, EvalError> {
        match self {
            Expr::Number(n) => Ok(Value::Exact(n.clone())),
            Expr::Var(i) => Ok(assignment[*i].clone()),
            Expr::Add(l, r) => Ok(add(l.eval(assignment)?, r.eval(assignment)?)),
            Expr::Sub(l, r) => Ok(sub(l.eval(assignment)?, r.eval(assignment)?)),
            Expr::Mul(l, r) => Ok(mul(l.eval(assignment)?, r.eval(assignment)?)),
            Expr::Div(l, r) => div(l.eval(assignment)?, r.eval(assignment)?),
            Expr::Pow(l, r) => pow(l.eval(assignment)?, r.eval(assignment)?),
            Expr::Neg(e) => Ok(neg(e.eval(assignment)?)),
            Expr::Call(func, args) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(arg.eval(assignment)?);
                }
                apply(*func, &values)
            }
        }
    }
}

/// A numeric value: exact rational, or `f64` once exactness is lost.
/// An exact value is never rebuilt from an approximate one.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Exact(BigRational),
    Approx(f64),
}

impl Value {
    pub fn from_int(n: i64) -> Value {
        Value::Exact(BigRational::from_integer(n.into()))
    }

    pub fn to_f64(&self) -> f64 {
        match self {
            Value::Exact(r) => r.to_f64().unwrap_or(f64::NAN),
            Value::Approx(x) => *x,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Value::Exact(r) => r.is_zero(),
            Value::Approx(x) => *x == 0.0,
        }
    }

    /// True when the value is an integer: exactly for rationals, within
    /// EPSILON of the nearest integer for approximations.
    pub fn is_integral(&self) -> bool {
        match self {
            Value::Exact(r) => r.is_integer(),
            Value::Approx(x) => x.is_finite() && (x - x.round()).abs() <= EPSILON,
        }
    }
}

fn add(l: Value, r: Value) -> Value {
    match (l, r) {
        (Value::Exact(a), Value::Exact(b)) => Value::Exact(a + b),
        (l, r) => Value::Approx(l.to_f64() + r.to_f64()),
    }
}

fn sub(l: Value, r: Value) -> Value {
    match (l, r) {
        (Value::Exact(a), Value::Exact(b)) => Value::Exact(a - b),
        (l, r) => Value::Approx(l.to_f64() - r.to_f64()),
    }
}

fn mul(l: Value, r: Value) -> Value {
    match (l, r) {
        (Value::Exact(a), Value::Exact(b)) => Value::Exact(a * b),
        (l, r) => Value::Approx(l.to_f64() * r.to_f64()),
    }
}

fn neg(v: Value) -> Value {
    match v {
        Value::Exact(a) => Value::Exact(-a),
        Value::Approx(x) => Value::Approx(-x),
    }
}

fn div(l: Value, r: Value) -> Result<Value, EvalError> {
    if r.is_zero() {
        return Err(EvalError::DivisionByZero);
    }
    match (l, r) {
        (Value::Exact(a), Value::Exact(b)) => Ok(Value::Exact(a / b)),
        (l, r) => finite(l.to_f64() / r.to_f64()),
    }
}

fn pow(l: Value, r: Value) -> Result<Value, EvalError> {
    if let (Value::Exact(base), Value::Exact(exp)) = (&l, &r) {
        if exp.is_integer() {
            let e = exp
                .to_integer()
                .to_i32()
                .ok_or(EvalError::ExponentOverflow)?;
            if e.unsigned_abs() > MAX_EXPONENT {
                return Err(EvalError::ExponentOverflow);
            }
            if e < 0 && base.is_zero() {
                return Err(EvalError::ZeroToNegativePower);
            }
            return Ok(Value::Exact(base.pow(e)));
        }
    }
    let b = l.to_f64();
    let e = r.to_f64();
    if b < 0.0 && e.fract() != 0.0 {
        return Err(EvalError::ComplexResult);
    }
    if b == 0.0 && e < 0.0 {
        return Err(EvalError::ZeroToNegativePower);
    }
    finite(b.powf(e))
}

fn finite(x: f64) -> Result<Value, EvalError> {
    if x.is_finite() {
        Ok(Value::Approx(x))
    } else {
        Err(EvalError::NonFinite)
    }
}

/// Exact square root of a non-negative rational, when one exists.
pub(crate) fn sqrt_exact(r: &BigRational) -> Option<BigRational> {
    if r.is_negative() {
        return None;
    }
    let sn: BigInt = r.numer().sqrt();
    let sd: BigInt = r.denom().sqrt();
    if &(&sn * &sn) == r.numer() && &(&sd * &sd) == r.denom() {
        Some(BigRational::new(sn, sd))
    } else {
        None
    }
}

/// Exact cube root of a rational, when one exists. Negative inputs are fine.
pub(crate) fn cbrt_exact(r: &BigRational) -> Option<BigRational> {
    let cn: BigInt = r.numer().cbrt();
    let cd: BigInt = r.denom().cbrt();
    if &(&cn * &cn * &cn) == r.numer() && &(&cd * &cd * &cd) == r.denom() {
        Some(BigRational::new(cn, cd))
    } else {
        None
    }
}

fn apply(func: Func, args: &[Value]) -> Result<Value, EvalError> {
    match func {
        Func::Abs => Ok(match &args[0] {
            Value::Exact(r) => Value::Exact(r.abs()),
            Value::Approx(x) => Value::Approx(x.abs()),
        }),
        Func::Floor => Ok(match &args[0] {
            Value::Exact(r) => Value::Exact(r.floor()),
            Value::Approx(x) => Value::Approx(x.floor()),
        }),
        Func::Ceiling => Ok(match &args[0] {
            Value::Exact(r) => Value::Exact(r.ceil()),
            Value::Approx(x) => Value::Approx(x.ceil()),
        }),
        Func::Sqrt => match &args[0] {
            Value::Exact(r) => {
                if r.is_negative() {
                    Err(EvalError::EvenRootOfNegative)
                } else if let Some(root) = sqrt_exact(r) {
                    Ok(Value::Exact(root))
                } else {
                    finite(r.to_f64().unwrap_or(f64::NAN).sqrt())
                }
            }
            Value::Approx(x) => {
                if *x < 0.0 {
                    Err(EvalError::EvenRootOfNegative)
                } else {
                    finite(x.sqrt())
                }
            }
        },
        Func::Cbrt => match &args[0] {
            Value::Exact(r) => {
                if let Some(root) = cbrt_exact(r) {
                    Ok(Value::Exact(root))
                } else {
                    finite(r.to_f64().unwrap_or(f64::NAN).cbrt())
                }
            }
            Value::Approx(x) => finite(x.cbrt()),
        },
        Func::Mod => {
            let b = &args[1];
            if b.is_zero() {
                return Err(EvalError::DivisionByZero);
            }
            match (&args[0], b) {
                (Value::Exact(a), Value::Exact(b)) => {
                    Ok(Value::Exact(a - b * (a / b).floor()))
                }
                (a, b) => {
                    let a = a.to_f64();
                    let b = b.to_f64();
                    finite(a - b * (a / b).floor())
                }
            }
        }
    }
}

/// Comparison operators allowed in constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ComparisonOp::Eq => "==",
            ComparisonOp::Ne => "!=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
        }
    }

    /// Decide the comparison. Exact pairs compare exactly; once an
    /// approximation is involved, equality uses the EPSILON tolerance.
    pub fn holds(self, lhs: &Value, rhs: &Value) -> bool {
        if let (Value::Exact(a), Value::Exact(b)) = (lhs, rhs) {
            return match self {
                ComparisonOp::Eq => a == b,
                ComparisonOp::Ne => a != b,
                ComparisonOp::Lt => a < b,
                ComparisonOp::Le => a <= b,
                ComparisonOp::Gt => a > b,
                ComparisonOp::Ge => a >= b,
            };
        }
        let a = lhs.to_f64();
        let b = rhs.to_f64();
        match self {
            ComparisonOp::Eq => (a - b).abs() <= EPSILON,
            ComparisonOp::Ne => (a - b).abs() > EPSILON,
            ComparisonOp::Lt => a < b,
            ComparisonOp::Le => a <= b,
            ComparisonOp::Gt => a > b,
            ComparisonOp::Ge => a >= b,
        }
    }
}

/// One parsed constraint: a single comparison between two expressions.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    /// Original source text, kept for diagnostics.
    pub text: String,
    pub lhs: Expr,
    pub op: ComparisonOp,
    pub rhs: Expr,
}

impl Constraint {
    pub fn is_equality(&self) -> bool {
        self.op == ComparisonOp::Eq
    }

    /// Whether the assignment satisfies the constraint. An evaluation error
    /// (division by zero, domain violation) falsifies it.
    pub fn holds(&self, assignment: &[Value]) -> bool {
        match (self.lhs.eval(assignment), self.rhs.eval(assignment)) {
            (Ok(l), Ok(r)) => self.op.holds(&l, &r),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: i64) -> Expr {
        Expr::Number(BigRational::from_integer(n.into()))
    }

    fn eval(expr: &Expr) -> Result<Value, EvalError> {
        expr.eval(&[])
    }

    #[test]
    fn test_exact_arithmetic() {
        let expr = Expr::Add(
            Box::new(Expr::Mul(Box::new(num(3)), Box::new(num(4)))),
            Box::new(num(5)),
        );
        assert_eq!(eval(&expr).unwrap(), Value::from_int(17));
    }

    #[test]
    fn test_division_stays_exact() {
        let expr = Expr::Div(Box::new(num(1)), Box::new(num(3)));
        match eval(&expr).unwrap() {
            Value::Exact(r) => assert_eq!(r, BigRational::new(1.into(), 3.into())),
            Value::Approx(_) => panic!("1/3 should stay exact"),
        }
    }

    #[test]
    fn test_division_by_zero() {
        let expr = Expr::Div(Box::new(num(1)), Box::new(num(0)));
        assert_eq!(eval(&expr), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn test_pow_negative_exponent() {
        let expr = Expr::Pow(Box::new(num(2)), Box::new(num(-2)));
        match eval(&expr).unwrap() {
            Value::Exact(r) => assert_eq!(r, BigRational::new(1.into(), 4.into())),
            Value::Approx(_) => panic!("2**-2 should stay exact"),
        }

        let expr = Expr::Pow(Box::new(num(0)), Box::new(num(-1)));
        assert_eq!(eval(&expr), Err(EvalError::ZeroToNegativePower));
    }

    #[test]
    fn test_sqrt_perfect_square_is_exact() {
        let expr = Expr::Call(Func::Sqrt, vec![num(49)]);
        assert_eq!(eval(&expr).unwrap(), Value::from_int(7));

        // Perfect square of a fraction.
        let quarter = Expr::Div(Box::new(num(1)), Box::new(num(4)));
        let expr = Expr::Call(Func::Sqrt, vec![quarter]);
        match eval(&expr).unwrap() {
            Value::Exact(r) => assert_eq!(r, BigRational::new(1.into(), 2.into())),
            Value::Approx(_) => panic!("sqrt(1/4) should stay exact"),
        }
    }

    #[test]
    fn test_sqrt_irrational_demotes() {
        let expr = Expr::Call(Func::Sqrt, vec![num(2)]);
        match eval(&expr).unwrap() {
            Value::Approx(x) => assert!((x - 2.0_f64.sqrt()).abs() < 1e-12),
            Value::Exact(_) => panic!("sqrt(2) is not rational"),
        }
    }

    #[test]
    fn test_sqrt_of_negative() {
        let expr = Expr::Call(Func::Sqrt, vec![num(-4)]);
        assert_eq!(eval(&expr), Err(EvalError::EvenRootOfNegative));
    }

    #[test]
    fn test_cbrt_of_negative_cube() {
        let expr = Expr::Call(Func::Cbrt, vec![num(-27)]);
        assert_eq!(eval(&expr).unwrap(), Value::from_int(-3));
    }

    #[test]
    fn test_mod_follows_floored_division() {
        let expr = Expr::Call(Func::Mod, vec![num(7), num(3)]);
        assert_eq!(eval(&expr).unwrap(), Value::from_int(1));

        let expr = Expr::Call(Func::Mod, vec![num(-7), num(3)]);
        assert_eq!(eval(&expr).unwrap(), Value::from_int(2));

        let expr = Expr::Call(Func::Mod, vec![num(7), num(0)]);
        assert_eq!(eval(&expr), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn test_floor_and_ceiling() {
        let half = Expr::Div(Box::new(num(7)), Box::new(num(2)));
        let expr = Expr::Call(Func::Floor, vec![half.clone()]);
        assert_eq!(eval(&expr).unwrap(), Value::from_int(3));
        let expr = Expr::Call(Func::Ceiling, vec![half]);
        assert_eq!(eval(&expr).unwrap(), Value::from_int(4));
    }

    #[test]
    fn test_eval_error_falsifies_constraint() {
        // 1/x == 1 at x = 0 must be false, not an abort.
        let constraint = Constraint {
            text: "1/x == 1".to_string(),
            lhs: Expr::Div(Box::new(num(1)), Box::new(Expr::Var(0))),
            op: ComparisonOp::Eq,
            rhs: num(1),
        };
        assert!(!constraint.holds(&[Value::from_int(0)]));
        assert!(constraint.holds(&[Value::from_int(1)]));
    }

    #[test]
    fn test_exact_comparison_has_no_tolerance() {
        let a = Value::Exact(BigRational::new(1.into(), 1_000_000_000.into()));
        let b = Value::Exact(BigRational::from_integer(0.into()));
        assert!(!ComparisonOp::Eq.holds(&a, &b));
    }

    #[test]
    fn test_approx_comparison_uses_epsilon() {
        let a = Value::Approx(1.0 + EPSILON / 2.0);
        let b = Value::Exact(BigRational::from_integer(1.into()));
        assert!(ComparisonOp::Eq.holds(&a, &b));
        assert!(!ComparisonOp::Ne.holds(&a, &b));
    }

    #[test]
    fn test_is_integral() {
        assert!(Value::from_int(5).is_integral());
        assert!(!Value::Exact(BigRational::new(1.into(), 2.into())).is_integral());
        assert!(Value::Approx(3.0000000001).is_integral());
        assert!(!Value::Approx(3.5).is_integral());
    }
}
