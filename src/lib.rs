//! Uniqueness verification for generated math word-problems.
//!
//! This crate provides the verification core used by the problem generator:
//! given a structured descriptor (variables with domains and bounds,
//! constraint strings, a final-answer expression, and the generator's claimed
//! answer), it decides whether the constraint system has exactly one solution
//! and whether that solution matches the claim. Bounded discrete domains are
//! enumerated under a fixed candidate cap; continuous systems are solved in
//! closed form where possible and reported indeterminate otherwise.

pub mod algebra;
pub mod descriptor;
pub mod expr;
pub mod parse;
pub mod solver;

// Re-export main types
pub use descriptor::{Domain, ProblemDescriptor, Variable, VariableSpec};
pub use expr::{ComparisonOp, Constraint, EvalError, Expr, Func, Value, EPSILON};
pub use parse::{parse_problem, ParseError, ParsedProblem};
pub use solver::{
    classify, solve, verify, Assignment, SolveOutcome, SolverConfig, Status, Strategy, Verdict,
    DEFAULT_MAX_CANDIDATES,
};
