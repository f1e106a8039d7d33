//! Parameter handles, parameter sets and the evaluation context.
//!
//! A [`Parameter`] is identified by its name: equality, ordering and hashing all
//! use the name, so a name must denote a single parameter within one fit. The
//! current value is never stored on the handle; it lives in [`ParamValues`],
//! which the minimizer rebuilds for every trial point.

use crate::limits::Bound;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Debug)]
struct ParameterInner {
    name: String,
    init: f64,
    bounds: (f64, f64),
    floating: bool,
}

/// Shared handle to a model parameter.
#[derive(Clone)]
pub struct Parameter(Arc<ParameterInner>);

impl Parameter {
    /// Create a floating, unbounded parameter.
    pub fn new(name: impl Into<String>, init: f64) -> Self {
        Self(Arc::new(ParameterInner {
            name: name.into(),
            init,
            bounds: (f64::NEG_INFINITY, f64::INFINITY),
            floating: true,
        }))
    }

    /// Create a floating parameter with box bounds.
    pub fn bounded(name: impl Into<String>, init: f64, low: f64, high: f64) -> Result<Self> {
        let name = name.into();
        if low.is_nan() || high.is_nan() || low > high {
            return Err(Error::Validation(format!(
                "parameter '{name}' has invalid bounds ({low}, {high})"
            )));
        }
        if !init.is_finite() || init < low || init > high {
            return Err(Error::Validation(format!(
                "parameter '{name}' init {init} outside bounds ({low}, {high})"
            )));
        }
        Ok(Self(Arc::new(ParameterInner { name, init, bounds: (low, high), floating: true })))
    }

    /// Create a parameter that is held constant during minimization.
    pub fn fixed(name: impl Into<String>, value: f64) -> Self {
        Self(Arc::new(ParameterInner {
            name: name.into(),
            init: value,
            bounds: (value, value),
            floating: false,
        }))
    }

    /// Stable, unique name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Initial (default) value.
    pub fn init(&self) -> f64 {
        self.0.init
    }

    /// `(low, high)` bounds; unbounded sides are infinite.
    pub fn bounds(&self) -> (f64, f64) {
        self.0.bounds
    }

    /// Whether the minimizer may vary this parameter.
    pub fn is_floating(&self) -> bool {
        self.0.floating
    }

    /// True if both handles point at the same parameter object.
    pub fn same_handle(&self, other: &Parameter) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn same_definition(&self, other: &Parameter) -> bool {
        let (a, b) = (&self.0, &other.0);
        a.init.to_bits() == b.init.to_bits()
            && a.bounds.0.to_bits() == b.bounds.0.to_bits()
            && a.bounds.1.to_bits() == b.bounds.1.to_bits()
            && a.floating == b.floating
    }

    /// Serializable description of this parameter.
    pub fn to_spec(&self) -> ParameterSpec {
        ParameterSpec {
            name: self.0.name.clone(),
            init: self.0.init,
            bounds: [self.0.bounds.0, self.0.bounds.1].map(Bound),
            floating: self.0.floating,
        }
    }

    /// Build a parameter from its serialized description.
    pub fn from_spec(spec: &ParameterSpec) -> Result<Self> {
        let [low, high] = spec.bounds.map(|b| b.0);
        if !spec.floating {
            return Ok(Self::fixed(spec.name.clone(), spec.init));
        }
        Self::bounded(spec.name.clone(), spec.init, low, high)
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.0.name)
            .field("init", &self.0.init)
            .field("bounds", &self.0.bounds)
            .field("floating", &self.0.floating)
            .finish()
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

impl PartialEq for Parameter {
    fn eq(&self, other: &Self) -> bool {
        self.0.name == other.0.name
    }
}

impl Eq for Parameter {}

impl PartialOrd for Parameter {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Parameter {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.name.cmp(&other.0.name)
    }
}

impl Hash for Parameter {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.name.hash(state);
    }
}

fn default_open_bounds() -> [Bound; 2] {
    [Bound(f64::NEG_INFINITY), Bound(f64::INFINITY)]
}

fn default_true() -> bool {
    true
}

/// Serialized form of a [`Parameter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter name.
    pub name: String,
    /// Initial value.
    pub init: f64,
    /// `[low, high]`.
    #[serde(default = "default_open_bounds")]
    pub bounds: [Bound; 2],
    /// Floating (true) or fixed (false).
    #[serde(default = "default_true")]
    pub floating: bool,
}

/// Name-ordered set of parameters.
///
/// Inserting a different parameter object under a name that is already taken
/// is rejected unless both describe the same parameter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSet {
    by_name: BTreeMap<String, Parameter>,
}

impl ParamSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a parameter. Returns `true` if it was not already present.
    pub fn insert(&mut self, p: Parameter) -> Result<bool> {
        if let Some(existing) = self.by_name.get(p.name()) {
            if existing.same_handle(&p) || existing.same_definition(&p) {
                return Ok(false);
            }
            return Err(Error::Validation(format!(
                "parameter name '{}' is bound to two different parameters",
                p.name()
            )));
        }
        self.by_name.insert(p.name().to_string(), p);
        Ok(true)
    }

    /// Merge another set into this one.
    pub fn union(&mut self, other: &ParamSet) -> Result<()> {
        for p in other.iter() {
            self.insert(p.clone())?;
        }
        Ok(())
    }

    /// Look up by name.
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.by_name.get(name)
    }

    /// Membership by name.
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Parameters in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.by_name.values()
    }

    /// Parameter names in name order.
    pub fn names(&self) -> Vec<String> {
        self.by_name.keys().cloned().collect()
    }

    /// Parameters as a vector in name order.
    pub fn to_vec(&self) -> Vec<Parameter> {
        self.by_name.values().cloned().collect()
    }
}

/// Current parameter values, keyed by name.
///
/// Parameters without an explicit entry evaluate at their `init` value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamValues {
    values: HashMap<String, f64>,
}

impl ParamValues {
    /// Context where every parameter sits at its initial value.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context from an ordered parameter list and a matching value vector.
    pub fn from_vector(params: &[Parameter], x: &[f64]) -> Result<Self> {
        let mut out = Self::new();
        out.assign(params, x)?;
        Ok(out)
    }

    /// Overwrite the values of `params` with `x` (same order).
    pub fn assign(&mut self, params: &[Parameter], x: &[f64]) -> Result<()> {
        if params.len() != x.len() {
            return Err(Error::Value(format!(
                "parameter vector length mismatch: {} parameters, {} values",
                params.len(),
                x.len()
            )));
        }
        for (p, &v) in params.iter().zip(x) {
            self.values.insert(p.name().to_string(), v);
        }
        Ok(())
    }

    /// Set one value.
    pub fn set(&mut self, p: &Parameter, value: f64) {
        self.values.insert(p.name().to_string(), value);
    }

    /// Builder-style [`ParamValues::set`].
    pub fn with(mut self, p: &Parameter, value: f64) -> Self {
        self.set(p, value);
        self
    }

    /// Current value of `p`.
    pub fn get(&self, p: &Parameter) -> f64 {
        self.values.get(p.name()).copied().unwrap_or_else(|| p.init())
    }

    /// Current values of `params` in order.
    pub fn vector(&self, params: &[Parameter]) -> Vec<f64> {
        params.iter().map(|p| self.get(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_is_by_name() {
        let a = Parameter::new("mu", 1.0);
        let b = Parameter::new("mu", 2.0);
        assert_eq!(a, b);
        assert!(!a.same_handle(&b));
        assert!(a.same_handle(&a.clone()));
    }

    #[test]
    fn test_bounded_validation() {
        assert!(Parameter::bounded("s", 1.0, 0.0, 2.0).is_ok());
        assert!(Parameter::bounded("s", 3.0, 0.0, 2.0).is_err());
        assert!(Parameter::bounded("s", 1.0, 2.0, 0.0).is_err());
    }

    #[test]
    fn test_param_set_rejects_conflicting_handles() {
        let mut set = ParamSet::new();
        let a = Parameter::new("mu", 1.0);
        assert!(set.insert(a.clone()).unwrap());
        assert!(!set.insert(a.clone()).unwrap());
        // Same definition, distinct handle: accepted as the same parameter.
        assert!(!set.insert(Parameter::new("mu", 1.0)).unwrap());
        let err = set.insert(Parameter::new("mu", 5.0)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_values_default_to_init() {
        let mu = Parameter::new("mu", 1.5);
        let sigma = Parameter::new("sigma", 2.0);
        let values = ParamValues::new().with(&sigma, 3.0);
        assert_eq!(values.get(&mu), 1.5);
        assert_eq!(values.get(&sigma), 3.0);
        assert_eq!(values.vector(&[mu, sigma]), vec![1.5, 3.0]);
    }

    #[test]
    fn test_from_vector_length_mismatch() {
        let mu = Parameter::new("mu", 0.0);
        let err = ParamValues::from_vector(&[mu], &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, Error::Value(_)));
    }

    #[test]
    fn test_spec_roundtrip_keeps_open_bounds() {
        let p = Parameter::new("mu", 0.3);
        let json = serde_json::to_string(&p.to_spec()).unwrap();
        let spec: ParameterSpec = serde_json::from_str(&json).unwrap();
        let back = Parameter::from_spec(&spec).unwrap();
        assert_eq!(back.bounds(), (f64::NEG_INFINITY, f64::INFINITY));
        assert!(back.is_floating());

        let fixed = Parameter::fixed("c", 2.0);
        let back = Parameter::from_spec(&fixed.to_spec()).unwrap();
        assert!(!back.is_floating());
        assert_eq!(back.init(), 2.0);
    }
}
