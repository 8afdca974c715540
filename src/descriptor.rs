//! Problem descriptor types that match the generator's JSON format.
//!
//! These types are designed to deserialize directly from the JSON emitted by
//! the upstream problem generator, and to validate into the typed variables
//! the solver works with.

use num_bigint::BigInt;
use num_rational::BigRational;
use serde::{Deserialize, Serialize};

use crate::parse::ParseError;

/// Variable domain tag. Matched case-sensitively against the descriptor JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Domain {
    Integer,
    Natural,
    Real,
}

impl Domain {
    /// Discrete domains are enumerable and require finite bounds.
    pub fn is_discrete(self) -> bool {
        matches!(self, Domain::Integer | Domain::Natural)
    }
}

/// One variable declaration as sent by the generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableSpec {
    pub name: String,
    pub domain: Domain,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

/// The complete problem descriptor for one verification call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDescriptor {
    pub variables: Vec<VariableSpec>,
    pub constraints_sympy: Vec<String>,
    pub final_expression_sympy: String,
    pub answer: f64,
}

/// A validated variable. Bounds are inclusive and exact; discrete domains
/// always carry both bounds once validation has passed.
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub domain: Domain,
    pub lo: Option<BigRational>,
    pub hi: Option<BigRational>,
}

impl Variable {
    /// Integer range for a discrete variable, with fractional bounds
    /// tightened inward. Returns `None` for unbounded (Real) variables.
    pub fn int_range(&self) -> Option<(BigInt, BigInt)> {
        let lo = self.lo.as_ref()?;
        let hi = self.hi.as_ref()?;
        Some((lo.ceil().to_integer(), hi.floor().to_integer()))
    }
}

fn bound_to_rational(name: &str, bound: f64) -> Result<BigRational, ParseError> {
    BigRational::from_float(bound).ok_or_else(|| ParseError::InvalidBounds {
        name: name.to_string(),
    })
}

/// Validate the declared variables: unique names, domain bounds invariants,
/// and the implicit Natural lower bound of zero.
pub fn resolve_variables(specs: &[VariableSpec]) -> Result<Vec<Variable>, ParseError> {
    let mut variables: Vec<Variable> = Vec::with_capacity(specs.len());

    for spec in specs {
        if variables.iter().any(|v| v.name == spec.name) {
            return Err(ParseError::DuplicateVariable(spec.name.clone()));
        }

        let mut lo = spec
            .min
            .map(|b| bound_to_rational(&spec.name, b))
            .transpose()?;
        let hi = spec
            .max
            .map(|b| bound_to_rational(&spec.name, b))
            .transpose()?;

        if let (Some(lo), Some(hi)) = (&lo, &hi) {
            if lo > hi {
                return Err(ParseError::InvalidBounds {
                    name: spec.name.clone(),
                });
            }
        }

        match spec.domain {
            Domain::Integer => {
                if lo.is_none() || hi.is_none() {
                    return Err(ParseError::MissingBounds {
                        name: spec.name.clone(),
                    });
                }
            }
            Domain::Natural => {
                // Natural implies min >= 0 in addition to any declared bound.
                let zero = BigRational::from_integer(0.into());
                lo = Some(match lo {
                    Some(declared) if declared > zero => declared,
                    _ => zero,
                });
                if hi.is_none() {
                    return Err(ParseError::MissingBounds {
                        name: spec.name.clone(),
                    });
                }
                if let (Some(lo), Some(hi)) = (&lo, &hi) {
                    if lo > hi {
                        return Err(ParseError::InvalidBounds {
                            name: spec.name.clone(),
                        });
                    }
                }
            }
            Domain::Real => {}
        }

        variables.push(Variable {
            name: spec.name.clone(),
            domain: spec.domain,
            lo,
            hi,
        });
    }

    Ok(variables)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, domain: Domain, min: Option<f64>, max: Option<f64>) -> VariableSpec {
        VariableSpec {
            name: name.to_string(),
            domain,
            min,
            max,
        }
    }

    #[test]
    fn test_integer_requires_bounds() {
        let err = resolve_variables(&[spec("x", Domain::Integer, Some(1.0), None)]);
        assert!(matches!(err, Err(ParseError::MissingBounds { .. })));

        let err = resolve_variables(&[spec("x", Domain::Integer, None, Some(10.0))]);
        assert!(matches!(err, Err(ParseError::MissingBounds { .. })));

        let ok = resolve_variables(&[spec("x", Domain::Integer, Some(1.0), Some(10.0))]);
        assert!(ok.is_ok());
    }

    #[test]
    fn test_natural_implicit_lower_bound() {
        let vars = resolve_variables(&[spec("n", Domain::Natural, None, Some(5.0))]).unwrap();
        let (lo, hi) = vars[0].int_range().unwrap();
        assert_eq!(lo, 0.into());
        assert_eq!(hi, 5.into());

        // A declared negative min is clamped to zero.
        let vars = resolve_variables(&[spec("n", Domain::Natural, Some(-3.0), Some(5.0))]).unwrap();
        let (lo, _) = vars[0].int_range().unwrap();
        assert_eq!(lo, 0.into());

        // A declared positive min wins over the implicit zero.
        let vars = resolve_variables(&[spec("n", Domain::Natural, Some(2.0), Some(5.0))]).unwrap();
        let (lo, _) = vars[0].int_range().unwrap();
        assert_eq!(lo, 2.into());
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let err = resolve_variables(&[spec("x", Domain::Integer, Some(10.0), Some(1.0))]);
        assert!(matches!(err, Err(ParseError::InvalidBounds { .. })));
    }

    #[test]
    fn test_non_finite_bounds_rejected() {
        let err = resolve_variables(&[spec("x", Domain::Integer, Some(f64::NAN), Some(10.0))]);
        assert!(matches!(err, Err(ParseError::InvalidBounds { .. })));

        let err = resolve_variables(&[spec("x", Domain::Integer, Some(1.0), Some(f64::INFINITY))]);
        assert!(matches!(err, Err(ParseError::InvalidBounds { .. })));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = resolve_variables(&[
            spec("x", Domain::Integer, Some(1.0), Some(10.0)),
            spec("x", Domain::Real, None, None),
        ]);
        assert!(matches!(err, Err(ParseError::DuplicateVariable(_))));
    }

    #[test]
    fn test_fractional_bounds_tightened_inward() {
        let vars =
            resolve_variables(&[spec("x", Domain::Integer, Some(1.2), Some(9.8))]).unwrap();
        let (lo, hi) = vars[0].int_range().unwrap();
        assert_eq!(lo, 2.into());
        assert_eq!(hi, 9.into());
    }

    #[test]
    fn test_domain_tags_deserialize_case_sensitively() {
        let ok: Result<Domain, _> = serde_json::from_str("\"Integer\"");
        assert!(ok.is_ok());
        let err: Result<Domain, _> = serde_json::from_str("\"integer\"");
        assert!(err.is_err());
    }
}
