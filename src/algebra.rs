//! Closed-form machinery for the continuous/mixed solving path.
//!
//! Everything here is pure and exact: affine forms are extracted from the
//! AST, linear systems are eliminated over rationals, and quadratic roots
//! stay exact whenever the discriminant is a perfect square.

use num_rational::BigRational;
use num_traits::{One, Signed, ToPrimitive, Zero};

use crate::expr::{sqrt_exact, Expr, Value};

/// coeffs · x + constant, over the full declared variable vector.
#[derive(Debug, Clone, PartialEq)]
pub struct AffineForm {
    pub coeffs: Vec<BigRational>,
    pub constant: BigRational,
}

impl AffineForm {
    fn constant_only(n_vars: usize, constant: BigRational) -> Self {
        Self {
            coeffs: vec![BigRational::zero(); n_vars],
            constant,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.coeffs.iter().all(Zero::is_zero)
    }

    fn combine(mut self, other: &AffineForm, sign: i32) -> Self {
        for (a, b) in self.coeffs.iter_mut().zip(&other.coeffs) {
            if sign > 0 {
                *a += b;
            } else {
                *a -= b;
            }
        }
        if sign > 0 {
            self.constant += &other.constant;
        } else {
            self.constant -= &other.constant;
        }
        self
    }

    fn scale(mut self, factor: &BigRational) -> Self {
        for a in self.coeffs.iter_mut() {
            *a *= factor;
        }
        self.constant *= factor;
        self
    }
}

/// Affine form of `lhs - rhs`, when both sides are affine.
pub fn equation_form(lhs: &Expr, rhs: &Expr, n_vars: usize) -> Option<AffineForm> {
    let l = affine_form(lhs, n_vars)?;
    let r = affine_form(rhs, n_vars)?;
    Some(l.combine(&r, -1))
}

/// Exact evaluation of a variable-free subexpression. Anything that demotes
/// to floating point (or errors) is not usable as an exact coefficient.
fn const_eval(expr: &Expr) -> Option<BigRational> {
    if expr.has_vars() {
        return None;
    }
    match expr.eval(&[]) {
        Ok(Value::Exact(r)) => Some(r),
        _ => None,
    }
}

/// Extract coeffs · x + constant from an expression, or `None` if it is not
/// affine in the declared variables.
pub fn affine_form(expr: &Expr, n_vars: usize) -> Option<AffineForm> {
    match expr {
        Expr::Number(n) => Some(AffineForm::constant_only(n_vars, n.clone())),
        Expr::Var(i) => {
            let mut form = AffineForm::constant_only(n_vars, BigRational::zero());
            form.coeffs[*i] = BigRational::one();
            Some(form)
        }
        Expr::Add(l, r) => {
            let rf = affine_form(r, n_vars)?;
            Some(affine_form(l, n_vars)?.combine(&rf, 1))
        }
        Expr::Sub(l, r) => {
            let rf = affine_form(r, n_vars)?;
            Some(affine_form(l, n_vars)?.combine(&rf, -1))
        }
        Expr::Neg(e) => {
            let minus_one = -BigRational::one();
            Some(affine_form(e, n_vars)?.scale(&minus_one))
        }
        Expr::Mul(l, r) => {
            let lf = affine_form(l, n_vars)?;
            let rf = affine_form(r, n_vars)?;
            if lf.is_constant() {
                Some(rf.scale(&lf.constant))
            } else if rf.is_constant() {
                Some(lf.scale(&rf.constant))
            } else {
                None
            }
        }
        Expr::Div(l, r) => {
            let divisor = const_eval(r)?;
            if divisor.is_zero() {
                return None;
            }
            Some(affine_form(l, n_vars)?.scale(&divisor.recip()))
        }
        Expr::Pow(..) | Expr::Call(..) => {
            const_eval(expr).map(|c| AffineForm::constant_only(n_vars, c))
        }
    }
}

/// Outcome of exact Gaussian elimination.
#[derive(Debug, Clone, PartialEq)]
pub enum LinearOutcome {
    Unique(Vec<BigRational>),
    Inconsistent,
    Underdetermined,
}

/// Solve the system `coeffs · x + constant = 0`, one AffineForm per equation.
pub fn solve_linear_system(equations: &[AffineForm], n_vars: usize) -> LinearOutcome {
    // Augmented matrix rows: coefficients followed by the right-hand side.
    let mut rows: Vec<Vec<BigRational>> = equations
        .iter()
        .map(|eq| {
            let mut row = eq.coeffs.clone();
            row.push(-eq.constant.clone());
            row
        })
        .collect();

    let mut rank = 0;
    for col in 0..n_vars {
        let Some(pivot) = (rank..rows.len()).find(|&r| !rows[r][col].is_zero()) else {
            continue;
        };
        rows.swap(rank, pivot);

        let pivot_value = rows[rank][col].clone();
        for cell in rows[rank].iter_mut() {
            *cell /= &pivot_value;
        }
        for r in 0..rows.len() {
            if r != rank && !rows[r][col].is_zero() {
                let factor = rows[r][col].clone();
                for c in 0..=n_vars {
                    let delta = &factor * &rows[rank][c];
                    rows[r][c] -= delta;
                }
            }
        }
        rank += 1;
    }

    for row in &rows {
        if row[..n_vars].iter().all(Zero::is_zero) && !row[n_vars].is_zero() {
            return LinearOutcome::Inconsistent;
        }
    }
    if rank < n_vars {
        return LinearOutcome::Underdetermined;
    }

    // Reduced row echelon form: each of the first n rows reads x_i = rhs.
    let mut solution = vec![BigRational::zero(); n_vars];
    for row in &rows {
        if let Some(col) = (0..n_vars).find(|&c| !row[c].is_zero()) {
            solution[col] = row[n_vars].clone();
        }
    }
    LinearOutcome::Unique(solution)
}

/// Real roots of a univariate polynomial equation `p(x) = 0`.
#[derive(Debug, Clone, PartialEq)]
pub enum RootSet {
    Finite(Vec<Value>),
    /// The equation is identically zero: every real satisfies it.
    AllReals,
}

/// Dense coefficients of the expression as a polynomial in `Var(0)`,
/// lowest degree first, or `None` when the expression is not a polynomial
/// of degree <= `max_degree`.
pub fn poly_coeffs(expr: &Expr, max_degree: usize) -> Option<Vec<BigRational>> {
    let coeffs = extract_poly(expr, max_degree)?;
    Some(trim(coeffs))
}

fn extract_poly(expr: &Expr, max_degree: usize) -> Option<Vec<BigRational>> {
    match expr {
        Expr::Number(n) => Some(vec![n.clone()]),
        Expr::Var(0) => Some(vec![BigRational::zero(), BigRational::one()]),
        Expr::Var(_) => None,
        Expr::Add(l, r) => Some(add_polys(
            extract_poly(l, max_degree)?,
            &extract_poly(r, max_degree)?,
            1,
        )),
        Expr::Sub(l, r) => Some(add_polys(
            extract_poly(l, max_degree)?,
            &extract_poly(r, max_degree)?,
            -1,
        )),
        Expr::Neg(e) => {
            let mut poly = extract_poly(e, max_degree)?;
            for c in poly.iter_mut() {
                *c = -c.clone();
            }
            Some(poly)
        }
        Expr::Mul(l, r) => mul_polys(
            &extract_poly(l, max_degree)?,
            &extract_poly(r, max_degree)?,
            max_degree,
        ),
        Expr::Div(l, r) => {
            let divisor = const_eval(r)?;
            if divisor.is_zero() {
                return None;
            }
            let mut poly = extract_poly(l, max_degree)?;
            for c in poly.iter_mut() {
                *c /= &divisor;
            }
            Some(poly)
        }
        Expr::Pow(base, exp) => {
            if !expr.has_vars() {
                return const_eval(expr).map(|c| vec![c]);
            }
            let e = const_eval(exp)?;
            if !e.is_integer() || e.is_negative() {
                return None;
            }
            let e = e.to_integer().to_usize()?;
            if e > max_degree {
                return None;
            }
            let base = extract_poly(base, max_degree)?;
            let mut acc = vec![BigRational::one()];
            for _ in 0..e {
                acc = mul_polys(&acc, &base, max_degree)?;
            }
            Some(acc)
        }
        Expr::Call(..) => const_eval(expr).map(|c| vec![c]),
    }
}

fn add_polys(mut a: Vec<BigRational>, b: &[BigRational], sign: i32) -> Vec<BigRational> {
    if a.len() < b.len() {
        a.resize(b.len(), BigRational::zero());
    }
    for (i, c) in b.iter().enumerate() {
        if sign > 0 {
            a[i] += c;
        } else {
            a[i] -= c;
        }
    }
    a
}

fn mul_polys(
    a: &[BigRational],
    b: &[BigRational],
    max_degree: usize,
) -> Option<Vec<BigRational>> {
    let a = trim(a.to_vec());
    let b = trim(b.to_vec());
    if a.is_empty() || b.is_empty() {
        return Some(vec![]);
    }
    if (a.len() - 1) + (b.len() - 1) > max_degree {
        return None;
    }
    let mut out = vec![BigRational::zero(); a.len() + b.len() - 1];
    for (i, ca) in a.iter().enumerate() {
        for (j, cb) in b.iter().enumerate() {
            out[i + j] += ca * cb;
        }
    }
    Some(out)
}

fn trim(mut coeffs: Vec<BigRational>) -> Vec<BigRational> {
    while coeffs.last().is_some_and(Zero::is_zero) {
        coeffs.pop();
    }
    coeffs
}

/// Solve `p(x) = 0` for a trimmed coefficient vector of degree <= 2.
/// Roots are returned in ascending order.
pub fn poly_roots(coeffs: &[BigRational]) -> RootSet {
    match coeffs.len() {
        0 => RootSet::AllReals,
        1 => RootSet::Finite(vec![]),
        2 => {
            let root = -&coeffs[0] / &coeffs[1];
            RootSet::Finite(vec![Value::Exact(root)])
        }
        _ => {
            let a = &coeffs[2];
            let b = &coeffs[1];
            let c = &coeffs[0];
            let discriminant = b * b - BigRational::from_integer(4.into()) * a * c;
            if discriminant.is_negative() {
                return RootSet::Finite(vec![]);
            }
            let two_a = BigRational::from_integer(2.into()) * a;
            if discriminant.is_zero() {
                return RootSet::Finite(vec![Value::Exact(-b / &two_a)]);
            }
            if let Some(s) = sqrt_exact(&discriminant) {
                let r1 = (-b - &s) / &two_a;
                let r2 = (-b + &s) / &two_a;
                let (lo, hi) = if r1 <= r2 { (r1, r2) } else { (r2, r1) };
                RootSet::Finite(vec![Value::Exact(lo), Value::Exact(hi)])
            } else {
                let a = a.to_f64().unwrap_or(f64::NAN);
                let b = b.to_f64().unwrap_or(f64::NAN);
                let d = discriminant.to_f64().unwrap_or(f64::NAN).sqrt();
                let r1 = (-b - d) / (2.0 * a);
                let r2 = (-b + d) / (2.0 * a);
                let (lo, hi) = if r1 <= r2 { (r1, r2) } else { (r2, r1) };
                RootSet::Finite(vec![Value::Approx(lo), Value::Approx(hi)])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Domain;
    use crate::descriptor::Variable;
    use crate::parse::parse_expression;

    fn real_vars(names: &[&str]) -> Vec<Variable> {
        names
            .iter()
            .map(|n| Variable {
                name: n.to_string(),
                domain: Domain::Real,
                lo: None,
                hi: None,
            })
            .collect()
    }

    fn affine(text: &str, names: &[&str]) -> Option<AffineForm> {
        let vs = real_vars(names);
        let expr = parse_expression(text, &vs).unwrap();
        affine_form(&expr, names.len())
    }

    fn rat(n: i64) -> BigRational {
        BigRational::from_integer(n.into())
    }

    #[test]
    fn test_affine_extraction() {
        let form = affine("2*x + 3*y - 5", &["x", "y"]).unwrap();
        assert_eq!(form.coeffs, vec![rat(2), rat(3)]);
        assert_eq!(form.constant, rat(-5));

        let form = affine("(x + 4)/2", &["x"]).unwrap();
        assert_eq!(form.coeffs, vec![BigRational::new(1.into(), 2.into())]);
        assert_eq!(form.constant, rat(2));
    }

    #[test]
    fn test_nonlinear_is_not_affine() {
        assert!(affine("x*y", &["x", "y"]).is_none());
        assert!(affine("x*x", &["x"]).is_none());
        assert!(affine("sqrt(x)", &["x"]).is_none());
    }

    #[test]
    fn test_constant_subexpressions_fold() {
        let form = affine("sqrt(4)*x + 2**3", &["x"]).unwrap();
        assert_eq!(form.coeffs, vec![rat(2)]);
        assert_eq!(form.constant, rat(8));
    }

    #[test]
    fn test_linear_system_unique() {
        // x + y = 10, x - y = 4  =>  x = 7, y = 3
        let eqs = vec![
            AffineForm {
                coeffs: vec![rat(1), rat(1)],
                constant: rat(-10),
            },
            AffineForm {
                coeffs: vec![rat(1), rat(-1)],
                constant: rat(-4),
            },
        ];
        assert_eq!(
            solve_linear_system(&eqs, 2),
            LinearOutcome::Unique(vec![rat(7), rat(3)])
        );
    }

    #[test]
    fn test_linear_system_inconsistent() {
        // x + y = 1, x + y = 2
        let eqs = vec![
            AffineForm {
                coeffs: vec![rat(1), rat(1)],
                constant: rat(-1),
            },
            AffineForm {
                coeffs: vec![rat(1), rat(1)],
                constant: rat(-2),
            },
        ];
        assert_eq!(solve_linear_system(&eqs, 2), LinearOutcome::Inconsistent);
    }

    #[test]
    fn test_linear_system_underdetermined() {
        let eqs = vec![AffineForm {
            coeffs: vec![rat(1), rat(1)],
            constant: rat(-10),
        }];
        assert_eq!(solve_linear_system(&eqs, 2), LinearOutcome::Underdetermined);
    }

    #[test]
    fn test_poly_extraction_and_degree_cap() {
        let vs = real_vars(&["x"]);
        let expr = parse_expression("x*x - 9", &vs).unwrap();
        let coeffs = poly_coeffs(&expr, 2).unwrap();
        assert_eq!(coeffs, vec![rat(-9), rat(0), rat(1)]);

        let expr = parse_expression("x**3 - 8", &vs).unwrap();
        assert!(poly_coeffs(&expr, 2).is_none());
    }

    #[test]
    fn test_quadratic_exact_roots() {
        // x^2 - 9 = 0
        let roots = poly_roots(&[rat(-9), rat(0), rat(1)]);
        assert_eq!(
            roots,
            RootSet::Finite(vec![Value::Exact(rat(-3)), Value::Exact(rat(3))])
        );
    }

    #[test]
    fn test_quadratic_double_root() {
        // x^2 - 4x + 4 = 0
        let roots = poly_roots(&[rat(4), rat(-4), rat(1)]);
        assert_eq!(roots, RootSet::Finite(vec![Value::Exact(rat(2))]));
    }

    #[test]
    fn test_quadratic_no_real_roots() {
        // x^2 + 1 = 0
        let roots = poly_roots(&[rat(1), rat(0), rat(1)]);
        assert_eq!(roots, RootSet::Finite(vec![]));
    }

    #[test]
    fn test_quadratic_irrational_roots_demote() {
        // x^2 - 2 = 0
        match poly_roots(&[rat(-2), rat(0), rat(1)]) {
            RootSet::Finite(roots) => {
                assert_eq!(roots.len(), 2);
                assert!(matches!(roots[0], Value::Approx(_)));
                assert!((roots[1].to_f64() - 2.0_f64.sqrt()).abs() < 1e-9);
            }
            RootSet::AllReals => panic!("finite root set expected"),
        }
    }

    #[test]
    fn test_identically_zero_polynomial() {
        let vs = real_vars(&["x"]);
        let expr = parse_expression("x - x", &vs).unwrap();
        let coeffs = poly_coeffs(&expr, 2).unwrap();
        assert_eq!(poly_roots(&coeffs), RootSet::AllReals);
    }

    #[test]
    fn test_linear_root() {
        // 2x - 6 = 0
        let roots = poly_roots(&[rat(-6), rat(2)]);
        assert_eq!(roots, RootSet::Finite(vec![Value::Exact(rat(3))]));
    }
}
