//! Parameter grid: parsing of `name=v1,v2,...` tokens and odometer expansion.

use crate::core::error::SweepError;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashSet;

/// One swept parameter and its candidate values, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: String,
    pub values: Vec<String>,
}

impl ParameterSpec {
    /// Parse a single `name=v1,v2,...` token.
    ///
    /// # Examples
    ///
    /// ```
    /// use gsweep::core::grid::ParameterSpec;
    ///
    /// let spec = ParameterSpec::parse("lr=0.01,0.1").unwrap();
    /// assert_eq!(spec.name, "lr");
    /// assert_eq!(spec.values, vec!["0.01", "0.1"]);
    /// assert!(ParameterSpec::parse("lr").is_err());
    /// assert!(ParameterSpec::parse("lr=").is_err());
    /// ```
    pub fn parse(token: &str) -> Result<Self, SweepError> {
        let (name, raw_values) = token.split_once('=').ok_or_else(|| {
            SweepError::malformed(format!("'{token}' is not of the form name=v1,v2,..."))
        })?;

        let name = name.trim();
        if name.is_empty() {
            return Err(SweepError::malformed(format!(
                "'{token}' has an empty parameter name"
            )));
        }

        let raw_values = raw_values.trim();
        if raw_values.is_empty() {
            return Err(SweepError::malformed(format!(
                "parameter '{name}' has an empty value list"
            )));
        }

        let values: Vec<String> = raw_values.split(',').map(|v| v.trim().to_string()).collect();
        if values.iter().any(|v| v.is_empty()) {
            return Err(SweepError::malformed(format!(
                "parameter '{name}' contains an empty value in '{raw_values}'"
            )));
        }

        Ok(Self {
            name: name.to_string(),
            values,
        })
    }
}

/// A single point of the grid: exactly one value per parameter, kept in the
/// order the parameters were declared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    params: Vec<(String, String)>,
}

impl Assignment {
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl<N, V> FromIterator<(N, V)> for Assignment
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut assignment = Assignment::default();
        for (name, value) in iter {
            assignment.push(name, value);
        }
        assignment
    }
}

// Serialized as a JSON object whose keys keep declaration order.
impl Serialize for Assignment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.params.len()))?;
        for (name, value) in &self.params {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Largest grid a sweep may expand to. Every point becomes a job with its own
/// run directory, so anything past this is a typo rather than a plan, and
/// expanding it would exhaust memory before the first job starts.
pub const MAX_GRID_SIZE: usize = 100_000;

/// The validated set of parameter specs of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentGrid {
    specs: Vec<ParameterSpec>,
}

impl ArgumentGrid {
    /// Parse `--args` tokens. A token may itself hold several whitespace
    /// separated specs (`"lr=1,2 depth=3"`), which happens when the whole list
    /// is quoted on the command line or read from a config file.
    pub fn parse<I, S>(tokens: I) -> Result<Self, SweepError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut specs = Vec::new();
        let mut seen = HashSet::new();

        for token in tokens {
            for part in token.as_ref().split_whitespace() {
                let spec = ParameterSpec::parse(part)?;
                if !seen.insert(spec.name.clone()) {
                    return Err(SweepError::malformed(format!(
                        "parameter '{}' is declared more than once",
                        spec.name
                    )));
                }
                specs.push(spec);
            }
        }

        if specs.is_empty() {
            return Err(SweepError::malformed(
                "--args requires at least one name=v1,v2,... spec",
            ));
        }

        Ok(Self { specs })
    }

    pub fn specs(&self) -> &[ParameterSpec] {
        &self.specs
    }

    /// Number of grid points, or `None` if the product overflows `usize`.
    pub fn grid_size(&self) -> Option<usize> {
        self.specs
            .iter()
            .try_fold(1usize, |total, spec| total.checked_mul(spec.values.len()))
    }

    /// Cartesian product in odometer order: the last declared parameter
    /// varies fastest, the first declared one slowest.
    pub fn expand(&self) -> Vec<Assignment> {
        let mut result = vec![Assignment::default()];
        for spec in &self.specs {
            let mut next = Vec::with_capacity(result.len() * spec.values.len());
            for existing in &result {
                for value in &spec.values {
                    let mut combo = existing.clone();
                    combo.push(spec.name.as_str(), value.as_str());
                    next.push(combo);
                }
            }
            result = next;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(a: &Assignment) -> Vec<(String, String)> {
        a.iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_splits_on_first_equals() {
        let spec = ParameterSpec::parse("expr=a=b,c").unwrap();
        assert_eq!(spec.name, "expr");
        assert_eq!(spec.values, vec!["a=b", "c"]);
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let spec = ParameterSpec::parse(" lr = 0.1 , 0.2 ").unwrap();
        assert_eq!(spec.name, "lr");
        assert_eq!(spec.values, vec!["0.1", "0.2"]);
    }

    #[test]
    fn test_parse_rejects_malformed_tokens() {
        for token in ["lr", "lr=", "=1,2", "lr=1,,2", "lr=1,"] {
            let err = ParameterSpec::parse(token).unwrap_err();
            assert!(
                matches!(err, SweepError::MalformedArgument(_)),
                "{token} should be malformed"
            );
        }
    }

    #[test]
    fn test_grid_rejects_duplicates() {
        let err = ArgumentGrid::parse(["lr=1,2", "lr=3"]).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_grid_rejects_empty_input() {
        let empty: [&str; 0] = [];
        assert!(ArgumentGrid::parse(empty).is_err());
        assert!(ArgumentGrid::parse(["   "]).is_err());
    }

    #[test]
    fn test_grid_accepts_quoted_list() {
        let grid = ArgumentGrid::parse(["lr=0.01,0.1 n_layers=2,4,6"]).unwrap();
        assert_eq!(grid.specs().len(), 2);
        assert_eq!(grid.grid_size(), Some(6));
    }

    #[test]
    fn test_expand_odometer_order() {
        let grid = ArgumentGrid::parse(["lr=0.01,0.1", "n_layers=2,4,6"]).unwrap();
        let assignments = grid.expand();
        let got: Vec<(String, String)> = assignments
            .iter()
            .map(|a| {
                (
                    a.get("lr").unwrap().to_string(),
                    a.get("n_layers").unwrap().to_string(),
                )
            })
            .collect();
        let expected: Vec<(String, String)> = [
            ("0.01", "2"),
            ("0.01", "4"),
            ("0.01", "6"),
            ("0.1", "2"),
            ("0.1", "4"),
            ("0.1", "6"),
        ]
        .iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_expand_keeps_declared_order_inside_assignment() {
        let grid = ArgumentGrid::parse(["b=1", "a=2", "c=3,4"]).unwrap();
        for assignment in grid.expand() {
            let names: Vec<&str> = assignment.iter().map(|(n, _)| n).collect();
            assert_eq!(names, vec!["b", "a", "c"]);
        }
    }

    #[test]
    fn test_expand_single_value_specs() {
        let grid = ArgumentGrid::parse(["seed=7"]).unwrap();
        let assignments = grid.expand();
        assert_eq!(assignments.len(), 1);
        assert_eq!(
            pairs(&assignments[0]),
            vec![("seed".to_string(), "7".to_string())]
        );
    }

    #[test]
    fn test_expand_empty_grid_runs_once() {
        let assignments = ArgumentGrid::default().expand();
        assert_eq!(assignments.len(), 1);
        assert!(assignments[0].is_empty());
    }

    #[test]
    fn test_expand_is_deterministic() {
        let grid = ArgumentGrid::parse(["x=1,2,3", "y=a,b", "z=p,q"]).unwrap();
        assert_eq!(grid.expand(), grid.expand());
    }

    #[test]
    fn test_assignment_serializes_in_declared_order() {
        let assignment: Assignment = [("n_layers", "2"), ("lr", "0.01")].into_iter().collect();
        let json = serde_json::to_string(&assignment).unwrap();
        assert_eq!(json, r#"{"n_layers":"2","lr":"0.01"}"#);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn grid_strategy() -> impl Strategy<Value = Vec<usize>> {
            prop::collection::vec(1usize..5, 1..5)
        }

        fn grid_from_sizes(sizes: &[usize]) -> ArgumentGrid {
            let tokens: Vec<String> = sizes
                .iter()
                .enumerate()
                .map(|(i, &k)| {
                    let values: Vec<String> = (0..k).map(|v| v.to_string()).collect();
                    format!("p{i}={}", values.join(","))
                })
                .collect();
            ArgumentGrid::parse(tokens).unwrap()
        }

        proptest! {
            /// Property: the grid has exactly prod(k_i) points
            #[test]
            fn prop_expand_len_is_product(sizes in grid_strategy()) {
                let grid = grid_from_sizes(&sizes);
                let expected: usize = sizes.iter().product();
                prop_assert_eq!(grid.expand().len(), expected);
                prop_assert_eq!(grid.grid_size(), Some(expected));
            }

            /// Property: points are enumerated like a mixed-radix counter
            #[test]
            fn prop_expand_matches_mixed_radix_counter(sizes in grid_strategy()) {
                let grid = grid_from_sizes(&sizes);
                for (n, assignment) in grid.expand().iter().enumerate() {
                    let mut rest = n;
                    let mut digits = vec![0usize; sizes.len()];
                    for (i, &k) in sizes.iter().enumerate().rev() {
                        digits[i] = rest % k;
                        rest /= k;
                    }
                    for (i, digit) in digits.iter().enumerate() {
                        let name = format!("p{i}");
                        let expected = digit.to_string();
                        prop_assert_eq!(assignment.get(&name), Some(expected.as_str()));
                    }
                }
            }

            /// Property: every grid point is distinct
            #[test]
            fn prop_expand_has_no_duplicates(sizes in grid_strategy()) {
                let grid = grid_from_sizes(&sizes);
                let points = grid.expand();
                for (i, a) in points.iter().enumerate() {
                    for b in &points[i + 1..] {
                        prop_assert_ne!(a, b);
                    }
                }
            }
        }
    }
}
