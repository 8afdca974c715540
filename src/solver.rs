//! Uniqueness solver with explicit strategy dispatch.
//!
//! A parsed problem is classified once — every domain discrete and bounded,
//! or mixed/continuous — and handed to the matching pure solving function:
//! capped Cartesian enumeration, or closed-form solving of the equality
//! constraints with inequalities applied as filters. The solver certifies
//! uniqueness; it never asserts it when the search could not be completed.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, ToPrimitive};
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

use crate::algebra::{
    equation_form, poly_coeffs, poly_roots, solve_linear_system, AffineForm, LinearOutcome,
    RootSet,
};
use crate::descriptor::{ProblemDescriptor, Variable};
use crate::expr::{ComparisonOp, Constraint, Expr, Value, EPSILON};
use crate::parse::{parse_problem, ParsedProblem};

/// Default cap on the number of candidate assignments the enumeration
/// examines. Part of the verification contract.
pub const DEFAULT_MAX_CANDIDATES: u64 = 200_000;

/// Configuration for the solver
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Maximum candidate tuples enumerated before reporting budget exhaustion
    pub max_candidates: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }
}

/// Terminal state of one verification call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    BudgetExceeded,
    Indeterminate,
    ParseError,
}

/// The boundary contract returned to the request-handling layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub unique: bool,
    pub consistent_with_llm_answer: bool,
    pub computed_variables: Option<BTreeMap<String, f64>>,
    pub computed_answer: Option<f64>,
    pub status: Status,
}

impl Verdict {
    /// A verdict for a verification that did not certify the problem.
    pub fn failure(status: Status) -> Self {
        Self {
            unique: false,
            consistent_with_llm_answer: false,
            computed_variables: None,
            computed_answer: None,
            status,
        }
    }
}

/// Solving strategy, decided once per descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Every variable has a bounded discrete domain: enumerate.
    AllDiscreteBounded,
    /// At least one Real variable: solve equalities in closed form.
    MixedOrContinuous,
}

/// Classify a descriptor into its solving strategy. A descriptor with no
/// variables enumerates the single empty assignment.
pub fn classify(variables: &[Variable]) -> Strategy {
    if variables.iter().all(|v| v.domain.is_discrete()) {
        Strategy::AllDiscreteBounded
    } else {
        Strategy::MixedOrContinuous
    }
}

/// One satisfying assignment, in variable declaration order.
pub type Assignment = Vec<Value>;

/// Raw result of the search, before the verdict is assembled. Solutions are
/// retained up to the second one found: two already refute uniqueness.
#[derive(Debug, Clone, PartialEq)]
pub enum SolveOutcome {
    Solutions(Vec<Assignment>),
    BudgetExceeded,
    Indeterminate,
}

/// Verify a descriptor end to end: parse, classify, solve, compare the
/// claimed answer. Never panics on untrusted input; every failure maps to a
/// Verdict status.
pub fn verify(descriptor: &ProblemDescriptor, config: &SolverConfig) -> Verdict {
    let problem = match parse_problem(descriptor) {
        Ok(problem) => problem,
        Err(e) => {
            warn!("descriptor rejected: {e}");
            return Verdict::failure(Status::ParseError);
        }
    };

    match solve(&problem, config) {
        SolveOutcome::BudgetExceeded => Verdict::failure(Status::BudgetExceeded),
        SolveOutcome::Indeterminate => Verdict::failure(Status::Indeterminate),
        SolveOutcome::Solutions(solutions) => build_verdict(&problem, &solutions),
    }
}

/// Run the strategy-appropriate search on a parsed problem.
pub fn solve(problem: &ParsedProblem, config: &SolverConfig) -> SolveOutcome {
    let strategy = classify(&problem.variables);
    debug!("dispatching {:?}", strategy);
    match strategy {
        Strategy::AllDiscreteBounded => solve_discrete(problem, config),
        Strategy::MixedOrContinuous => solve_continuous(problem),
    }
}

fn build_verdict(problem: &ParsedProblem, solutions: &[Assignment]) -> Verdict {
    if solutions.len() != 1 {
        info!(
            "{} satisfying assignment(s): not unique",
            if solutions.len() > 1 { "multiple" } else { "zero" }
        );
        return Verdict::failure(Status::Ok);
    }

    let solution = &solutions[0];
    let computed_variables: BTreeMap<String, f64> = problem
        .variables
        .iter()
        .zip(solution)
        .map(|(var, value)| (var.name.clone(), value.to_f64()))
        .collect();

    let (computed_answer, consistent) = match problem.final_expression.eval(solution) {
        Ok(value) => {
            let consistent = answers_match(&value, problem.claimed_answer);
            (Some(value.to_f64()), consistent)
        }
        Err(e) => {
            warn!("final expression failed to evaluate at the solution: {e}");
            (None, false)
        }
    };

    Verdict {
        unique: true,
        consistent_with_llm_answer: consistent,
        computed_variables: Some(computed_variables),
        computed_answer,
        status: Status::Ok,
    }
}

/// Integer-valued exact answers compare exactly against the claim; anything
/// else compares within EPSILON.
fn answers_match(computed: &Value, claimed: f64) -> bool {
    if let Value::Exact(r) = computed {
        if r.is_integer() {
            return BigRational::from_float(claimed).is_some_and(|c| &c == r);
        }
    }
    (computed.to_f64() - claimed).abs() <= EPSILON
}

/// Capped enumeration of the full Cartesian product of the discrete ranges,
/// ascending per variable, nested by declaration order.
fn solve_discrete(problem: &ParsedProblem, config: &SolverConfig) -> SolveOutcome {
    let mut ranges: Vec<(BigInt, BigInt)> = Vec::with_capacity(problem.variables.len());
    for var in &problem.variables {
        // The parser guarantees bounds on discrete domains.
        let Some((lo, hi)) = var.int_range() else {
            return SolveOutcome::Indeterminate;
        };
        if hi < lo {
            debug!("empty domain for '{}'", var.name);
            return SolveOutcome::Solutions(vec![]);
        }
        ranges.push((lo, hi));
    }

    let mut sizes: SmallVec<[u64; 8]> = SmallVec::new();
    let mut total: u128 = 1;
    for (lo, hi) in &ranges {
        let Some(size) = (hi - lo + BigInt::one()).to_u64() else {
            return SolveOutcome::BudgetExceeded;
        };
        total = total.saturating_mul(u128::from(size));
        sizes.push(size);
    }
    if total > u128::from(config.max_candidates) {
        warn!(
            "search space of {total} candidates exceeds cap {}",
            config.max_candidates
        );
        return SolveOutcome::BudgetExceeded;
    }

    let n = ranges.len();
    let mut counters: SmallVec<[u64; 8]> = smallvec![0; n];
    let mut assignment: Assignment = ranges
        .iter()
        .map(|(lo, _)| Value::Exact(BigRational::from_integer(lo.clone())))
        .collect();
    let mut solutions: Vec<Assignment> = Vec::new();
    let mut tested: u64 = 0;

    loop {
        tested += 1;
        if problem.constraints.iter().all(|c| c.holds(&assignment)) {
            solutions.push(assignment.clone());
            if solutions.len() > 1 {
                debug!("second satisfying assignment after {tested} candidates");
                return SolveOutcome::Solutions(solutions);
            }
        }

        // Advance the odometer; the last variable varies fastest.
        let mut i = n;
        loop {
            if i == 0 {
                info!(
                    "enumerated {tested} candidate(s), found {} solution(s)",
                    solutions.len()
                );
                return SolveOutcome::Solutions(solutions);
            }
            i -= 1;
            counters[i] += 1;
            if counters[i] < sizes[i] {
                let value = &ranges[i].0 + BigInt::from(counters[i]);
                assignment[i] = Value::Exact(BigRational::from_integer(value));
                break;
            }
            counters[i] = 0;
            assignment[i] = Value::Exact(BigRational::from_integer(ranges[i].0.clone()));
        }
    }
}

/// Closed-form path: solve the equalities, then filter the finite candidate
/// set against every constraint and the declared domains.
fn solve_continuous(problem: &ParsedProblem) -> SolveOutcome {
    let n = problem.variables.len();
    let equalities: Vec<&Constraint> = problem
        .constraints
        .iter()
        .filter(|c| c.is_equality())
        .collect();

    if equalities.is_empty() {
        info!("no equality constraints over a continuous domain: indeterminate");
        return SolveOutcome::Indeterminate;
    }

    let affine: Option<Vec<AffineForm>> = equalities
        .iter()
        .map(|c| equation_form(&c.lhs, &c.rhs, n))
        .collect();

    let candidates: Vec<Assignment> = if let Some(equations) = affine {
        match solve_linear_system(&equations, n) {
            LinearOutcome::Inconsistent => vec![],
            LinearOutcome::Underdetermined => {
                info!("linear system is underdetermined: indeterminate");
                return SolveOutcome::Indeterminate;
            }
            LinearOutcome::Unique(values) => {
                vec![values.into_iter().map(Value::Exact).collect()]
            }
        }
    } else if n == 1 {
        match univariate_candidates(&equalities) {
            Some(roots) => roots.into_iter().map(|root| vec![root]).collect(),
            None => return SolveOutcome::Indeterminate,
        }
    } else {
        info!("nonlinear multivariate system: indeterminate");
        return SolveOutcome::Indeterminate;
    };

    let survivors: Vec<Assignment> = candidates
        .into_iter()
        .filter(|assignment| satisfies_all(problem, assignment))
        .collect();
    info!(
        "{} closed-form candidate(s) survive filtering",
        survivors.len()
    );
    SolveOutcome::Solutions(survivors)
}

/// Finite root set for a single-variable system: the first equality that
/// reduces to a polynomial of degree 1..=2 bounds the candidates; the rest
/// act as filters. `None` when no equality pins the variable down.
fn univariate_candidates(equalities: &[&Constraint]) -> Option<Vec<Value>> {
    for constraint in equalities {
        let difference = Expr::Sub(
            Box::new(constraint.lhs.clone()),
            Box::new(constraint.rhs.clone()),
        );
        let Some(coeffs) = poly_coeffs(&difference, 2) else {
            continue;
        };
        match poly_roots(&coeffs) {
            RootSet::AllReals => continue,
            RootSet::Finite(roots) => {
                debug!(
                    "'{}' bounds the variable to {} candidate(s)",
                    constraint.text,
                    roots.len()
                );
                return Some(roots);
            }
        }
    }
    info!("no equality yields a finite candidate set: indeterminate");
    None
}

fn satisfies_all(problem: &ParsedProblem, assignment: &[Value]) -> bool {
    problem.constraints.iter().all(|c| c.holds(assignment))
        && problem
            .variables
            .iter()
            .zip(assignment)
            .all(|(var, value)| within_domain(var, value))
}

fn within_domain(var: &Variable, value: &Value) -> bool {
    if var.domain.is_discrete() && !value.is_integral() {
        return false;
    }
    if let Some(lo) = &var.lo {
        if !ComparisonOp::Ge.holds(value, &Value::Exact(lo.clone())) {
            return false;
        }
    }
    if let Some(hi) = &var.hi {
        if !ComparisonOp::Le.holds(value, &Value::Exact(hi.clone())) {
            return false;
        }
    }
    true
}
