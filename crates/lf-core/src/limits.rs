//! Rectangular fit domains.
//!
//! A [`Domain`] is the canonical form of a fit range: per-axis lower and upper
//! bounds plus the axis indices they apply to. User input arrives as [`Limits`]
//! and is canonicalized once through [`Domain::from_limits`].

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Raw, not yet canonicalized fit-range input.
#[derive(Debug, Clone, PartialEq)]
pub enum Limits {
    /// One-dimensional `(lower, upper)` pair.
    Interval(f64, f64),
    /// Per-axis bounds.
    Box {
        /// Lower bound for each axis.
        lower: Vec<f64>,
        /// Upper bound for each axis.
        upper: Vec<f64>,
    },
    /// An already canonical domain.
    Domain(Domain),
}

impl From<(f64, f64)> for Limits {
    fn from((lower, upper): (f64, f64)) -> Self {
        Limits::Interval(lower, upper)
    }
}

impl From<(Vec<f64>, Vec<f64>)> for Limits {
    fn from((lower, upper): (Vec<f64>, Vec<f64>)) -> Self {
        Limits::Box { lower, upper }
    }
}

impl From<Domain> for Limits {
    fn from(d: Domain) -> Self {
        Limits::Domain(d)
    }
}

impl From<&Domain> for Limits {
    fn from(d: &Domain) -> Self {
        Limits::Domain(d.clone())
    }
}

/// Canonical rectangular domain over a set of observable axes.
///
/// Invariants: `lower.len() == upper.len() == dims.len()`, no NaN bounds and
/// `lower[i] <= upper[i]`. Infinite bounds are allowed and mean "unconstrained".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDomain", into = "RawDomain")]
pub struct Domain {
    lower: Vec<f64>,
    upper: Vec<f64>,
    dims: Vec<usize>,
}

/// Wire form of [`Domain`]; validated on the way in.
#[derive(Serialize, Deserialize)]
struct RawDomain {
    lower: Vec<Bound>,
    upper: Vec<Bound>,
    dims: Vec<usize>,
}

impl TryFrom<RawDomain> for Domain {
    type Error = Error;

    fn try_from(raw: RawDomain) -> Result<Self> {
        let lower = raw.lower.into_iter().map(|b| b.0).collect();
        let upper = raw.upper.into_iter().map(|b| b.0).collect();
        Domain::from_limits(Limits::Box { lower, upper }, Some(&raw.dims))
    }
}

impl From<Domain> for RawDomain {
    fn from(d: Domain) -> Self {
        Self {
            lower: d.lower.into_iter().map(Bound).collect(),
            upper: d.upper.into_iter().map(Bound).collect(),
            dims: d.dims,
        }
    }
}

impl Domain {
    /// Canonicalize raw limits.
    ///
    /// `dims` defaults to `0..n` for `n` bounds. Passing a [`Limits::Domain`]
    /// returns an equal domain; supplying `dims` that disagree with it is an error.
    pub fn from_limits(limits: impl Into<Limits>, dims: Option<&[usize]>) -> Result<Self> {
        let (lower, upper) = match limits.into() {
            Limits::Domain(d) => {
                if let Some(dims) = dims
                    && dims != d.dims.as_slice()
                {
                    return Err(Error::Value(format!(
                        "domain dims {:?} do not match requested dims {dims:?}",
                        d.dims
                    )));
                }
                return Ok(d);
            }
            Limits::Interval(lo, hi) => (vec![lo], vec![hi]),
            Limits::Box { lower, upper } => (lower, upper),
        };

        if lower.len() != upper.len() {
            return Err(Error::Value(format!(
                "lower/upper length mismatch: {} != {}",
                lower.len(),
                upper.len()
            )));
        }
        if lower.is_empty() {
            return Err(Error::Value("domain requires at least one axis".into()));
        }
        let dims = match dims {
            Some(d) => {
                if d.len() != lower.len() {
                    return Err(Error::Value(format!(
                        "bounds have {} axes but dims has {} entries",
                        lower.len(),
                        d.len()
                    )));
                }
                d.to_vec()
            }
            None => (0..lower.len()).collect(),
        };
        for (i, &d) in dims.iter().enumerate() {
            if dims[..i].contains(&d) {
                return Err(Error::Value(format!("duplicate axis {d} in dims {dims:?}")));
            }
        }
        for (axis, (&lo, &hi)) in lower.iter().zip(&upper).enumerate() {
            if lo.is_nan() || hi.is_nan() || lo > hi {
                return Err(Error::Value(format!(
                    "invalid bounds on axis {}: expected lower <= upper, got ({lo}, {hi})",
                    dims[axis]
                )));
            }
        }

        Ok(Self { lower, upper, dims })
    }

    /// Domain spanning `(-inf, inf)` on axes `0..n_dims`.
    pub fn unbounded(n_dims: usize) -> Self {
        Self {
            lower: vec![f64::NEG_INFINITY; n_dims],
            upper: vec![f64::INFINITY; n_dims],
            dims: (0..n_dims).collect(),
        }
    }

    /// Lower bounds (one per entry in [`Domain::dims`]).
    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    /// Upper bounds (one per entry in [`Domain::dims`]).
    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    /// Axis indices the bounds apply to.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Number of axes described.
    pub fn n_dims(&self) -> usize {
        self.dims.len()
    }

    /// Bounds on `axis`; axes the domain does not mention are unbounded.
    pub fn axis_bounds(&self, axis: usize) -> (f64, f64) {
        match self.dims.iter().position(|&d| d == axis) {
            Some(i) => (self.lower[i], self.upper[i]),
            None => (f64::NEG_INFINITY, f64::INFINITY),
        }
    }

    /// True if every bound is infinite.
    pub fn is_unbounded(&self) -> bool {
        self.lower.iter().chain(&self.upper).all(|b| b.is_infinite())
    }

    /// Compare against possibly raw limits.
    ///
    /// Only canonical domains are comparable. Raw limits fail with
    /// [`Error::Type`] so that callers canonicalize before comparing.
    pub fn try_eq(&self, other: &Limits) -> Result<bool> {
        match other {
            Limits::Domain(d) => Ok(self == d),
            raw => Err(Error::Type(format!(
                "cannot compare a Domain with raw limits {raw:?}; canonicalize with Domain::from_limits first"
            ))),
        }
    }
}

/// A bound that may be infinite.
///
/// JSON has no infinity literal; non-finite bounds round-trip as `"inf"` / `"-inf"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bound(pub f64);

impl Serialize for Bound {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        if self.0 == f64::INFINITY {
            s.serialize_str("inf")
        } else if self.0 == f64::NEG_INFINITY {
            s.serialize_str("-inf")
        } else {
            s.serialize_f64(self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Bound {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(f64),
            Text(String),
        }
        match Raw::deserialize(d)? {
            Raw::Num(x) => Ok(Bound(x)),
            Raw::Text(t) => match t.as_str() {
                "inf" | "+inf" => Ok(Bound(f64::INFINITY)),
                "-inf" => Ok(Bound(f64::NEG_INFINITY)),
                other => Err(serde::de::Error::custom(format!("invalid bound '{other}'"))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_defaults_to_axis_zero() {
        let d = Domain::from_limits((1.0, 4.0), None).unwrap();
        assert_eq!(d.lower(), &[1.0]);
        assert_eq!(d.upper(), &[4.0]);
        assert_eq!(d.dims(), &[0]);
        assert_eq!(d, Domain::from_limits((1.0, 4.0), Some(&[0])).unwrap());
    }

    #[test]
    fn test_canonicalization_is_idempotent() {
        let d = Domain::from_limits((vec![0.0, -1.0], vec![2.0, 1.0]), Some(&[1, 0])).unwrap();
        let again = Domain::from_limits(d.clone(), None).unwrap();
        assert_eq!(again, d);
        let with_dims = Domain::from_limits(&d, Some(&[1, 0])).unwrap();
        assert_eq!(with_dims, d);
        assert!(Domain::from_limits(&d, Some(&[0, 1])).is_err());
    }

    #[test]
    fn test_length_mismatch_is_value_error() {
        let err = Domain::from_limits((vec![0.0, 1.0], vec![2.0]), None).unwrap_err();
        assert!(matches!(err, Error::Value(_)));
        let err = Domain::from_limits((0.0, 1.0), Some(&[0, 1])).unwrap_err();
        assert!(matches!(err, Error::Value(_)));
    }

    #[test]
    fn test_reversed_or_nan_bounds_rejected() {
        assert!(Domain::from_limits((2.0, 1.0), None).is_err());
        assert!(Domain::from_limits((f64::NAN, 1.0), None).is_err());
        assert!(Domain::from_limits((1.0, 1.0), None).is_ok());
    }

    #[test]
    fn test_infinite_domain_allowed() {
        let d = Domain::from_limits((f64::NEG_INFINITY, f64::INFINITY), None).unwrap();
        assert!(d.is_unbounded());
        assert_eq!(d, Domain::unbounded(1));
    }

    #[test]
    fn test_compare_with_raw_limits_is_type_error() {
        let d = Domain::from_limits((1.0, 4.0), None).unwrap();
        let err = d.try_eq(&Limits::from((1.0, 4.0))).unwrap_err();
        assert!(matches!(err, Error::Type(_)));
        assert!(d.try_eq(&Limits::from(&d)).unwrap());
    }

    #[test]
    fn test_axis_bounds_missing_axis_is_unbounded() {
        let d = Domain::from_limits((vec![0.0], vec![5.0]), Some(&[1])).unwrap();
        assert_eq!(d.axis_bounds(1), (0.0, 5.0));
        assert_eq!(d.axis_bounds(0), (f64::NEG_INFINITY, f64::INFINITY));
    }

    #[test]
    fn test_serde_keeps_infinities() {
        let d = Domain::from_limits((f64::NEG_INFINITY, 3.5), None).unwrap();
        let s = serde_json::to_string(&d).unwrap();
        assert!(s.contains("\"-inf\""));
        let back: Domain = serde_json::from_str(&s).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn test_deserialize_validates() {
        let bad = r#"{"lower":[3.0],"upper":[1.0],"dims":[0]}"#;
        assert!(serde_json::from_str::<Domain>(bad).is_err());
    }
}
