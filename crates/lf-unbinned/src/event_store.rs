//! Columnar event storage for unbinned likelihood evaluation.

use lf_core::{Error, Result};
use std::collections::{BTreeMap, HashMap};

/// Columnar event storage (Structure-of-Arrays / SoA).
///
/// Every column has one entry per event. Fit ranges are not stored here: the
/// same events can be evaluated over different domains.
#[derive(Debug, Clone, PartialEq)]
pub struct EventStore {
    n_events: usize,
    column_names: Vec<String>,
    columns: Vec<Vec<f64>>,
    name_to_index: HashMap<String, usize>,
    weights: Option<Vec<f64>>,
}

impl EventStore {
    /// Create an [`EventStore`] from already materialized columns.
    ///
    /// `observables` defines which columns are kept and in which order. Extra
    /// columns are accepted but ignored.
    pub fn from_columns(
        observables: &[&str],
        columns: impl IntoIterator<Item = (String, Vec<f64>)>,
        weights: Option<Vec<f64>>,
    ) -> Result<Self> {
        if observables.is_empty() {
            return Err(Error::Validation("EventStore requires at least one observable".into()));
        }

        let mut by_name: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for (name, col) in columns {
            by_name.insert(name, col);
        }

        let mut column_names = Vec::with_capacity(observables.len());
        let mut cols = Vec::with_capacity(observables.len());
        let mut n_events: Option<usize> = None;
        for &obs in observables {
            if column_names.iter().any(|n| n == obs) {
                return Err(Error::Validation(format!("duplicate observable '{obs}'")));
            }
            let col = by_name
                .remove(obs)
                .ok_or_else(|| Error::Validation(format!("missing observable column '{obs}'")))?;
            match n_events {
                Some(ne) if ne != col.len() => {
                    return Err(Error::Value(format!(
                        "column length mismatch for '{obs}': expected {ne}, got {}",
                        col.len()
                    )));
                }
                _ => n_events = Some(col.len()),
            }
            if col.iter().any(|x| !x.is_finite()) {
                return Err(Error::Validation(format!(
                    "observable '{obs}' contains non-finite values"
                )));
            }
            column_names.push(obs.to_string());
            cols.push(col);
        }

        let n_events = n_events.unwrap_or(0);

        if let Some(w) = &weights {
            if w.len() != n_events {
                return Err(Error::Value(format!(
                    "weights length mismatch: expected {}, got {}",
                    n_events,
                    w.len()
                )));
            }
            if w.iter().any(|x| !x.is_finite()) {
                return Err(Error::Validation("weights must be finite".into()));
            }
            if w.iter().any(|x| *x < 0.0) {
                return Err(Error::Validation("negative event weights are not supported".into()));
            }
        }

        let name_to_index =
            column_names.iter().enumerate().map(|(i, n)| (n.clone(), i)).collect::<HashMap<_, _>>();

        Ok(Self { n_events, column_names, columns: cols, name_to_index, weights })
    }

    /// Single unweighted column.
    pub fn from_values(observable: &str, values: Vec<f64>) -> Result<Self> {
        Self::from_columns(&[observable], [(observable.to_string(), values)], None)
    }

    /// One event with one value per observable.
    pub fn single(observables: &[&str], point: &[f64]) -> Result<Self> {
        if observables.len() != point.len() {
            return Err(Error::Value(format!(
                "point has {} coordinates for {} observables",
                point.len(),
                observables.len()
            )));
        }
        let columns = observables.iter().zip(point).map(|(name, &x)| (name.to_string(), vec![x]));
        Self::from_columns(observables, columns, None)
    }

    /// Number of events.
    pub fn n_events(&self) -> usize {
        self.n_events
    }

    /// Names of stored columns (stable order).
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Get a column by name.
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        let idx = self.name_to_index.get(name).copied()?;
        self.columns.get(idx).map(|c| c.as_slice())
    }

    /// Get a column by name, failing with a validation error if absent.
    pub fn require_column(&self, name: &str) -> Result<&[f64]> {
        self.column(name).ok_or_else(|| Error::Validation(format!("missing column '{name}'")))
    }

    /// Optional per-event weights.
    pub fn weights(&self) -> Option<&[f64]> {
        self.weights.as_deref()
    }

    /// Sum of weights (event count when unweighted).
    pub fn sum_weights(&self) -> f64 {
        match &self.weights {
            Some(w) => w.iter().sum(),
            None => self.n_events as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_columns_keeps_observable_order() {
        let store = EventStore::from_columns(
            &["y", "x"],
            vec![
                ("x".to_string(), vec![1.0, 2.0]),
                ("y".to_string(), vec![3.0, 4.0]),
                ("z".to_string(), vec![0.0, 0.0]),
            ],
            None,
        )
        .unwrap();
        assert_eq!(store.n_events(), 2);
        assert_eq!(store.column_names(), &["y".to_string(), "x".to_string()]);
        assert_eq!(store.column("x"), Some(&[1.0, 2.0][..]));
        assert!(store.column("z").is_none());
    }

    #[test]
    fn test_column_length_mismatch() {
        let err = EventStore::from_columns(
            &["x", "y"],
            vec![("x".to_string(), vec![1.0]), ("y".to_string(), vec![1.0, 2.0])],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Value(_)));
    }

    #[test]
    fn test_rejects_missing_and_non_finite() {
        assert!(EventStore::from_values("x", vec![1.0, f64::NAN]).is_err());
        assert!(EventStore::from_columns(&["x"], Vec::new(), None).is_err());
    }

    #[test]
    fn test_weights_validation() {
        let cols = || vec![("x".to_string(), vec![1.0, 2.0])];
        assert!(EventStore::from_columns(&["x"], cols(), Some(vec![1.0])).is_err());
        assert!(EventStore::from_columns(&["x"], cols(), Some(vec![1.0, -1.0])).is_err());
        let store = EventStore::from_columns(&["x"], cols(), Some(vec![0.5, 1.5])).unwrap();
        assert_eq!(store.sum_weights(), 2.0);
    }

    #[test]
    fn test_single_point() {
        let store = EventStore::single(&["x"], &[0.25]).unwrap();
        assert_eq!(store.n_events(), 1);
        assert_eq!(store.column("x"), Some(&[0.25][..]));
        assert!(EventStore::single(&["x"], &[0.0, 1.0]).is_err());
    }
}
