//! Integer sets (iteration domains).

use crate::polyhedral::constraint::{Constraint, ConstraintKind};
use crate::polyhedral::map::Map;
use crate::polyhedral::{eliminate_positions, merge_params};
use crate::utils::errors::PolyError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An integer set: a named tuple of dimensions constrained by affine
/// inequalities and equalities, possibly over symbolic parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Set {
    pub(crate) tuple: Option<String>,
    pub(crate) dims: Vec<String>,
    pub(crate) params: Vec<String>,
    pub(crate) constraints: Vec<Constraint>,
}

impl Set {
    /// Parse from ISL syntax, e.g. `[N] -> { S0[i, j] : 0 <= i < N }`.
    pub fn parse(input: &str) -> Result<Self, PolyError> {
        crate::polyhedral::parse::parse_set(input)
    }

    /// The unconstrained set over the given dimension names.
    pub fn universe(tuple: Option<String>, dims: Vec<String>) -> Self {
        Self {
            tuple,
            dims,
            params: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// Number of set dimensions.
    pub fn n_dim(&self) -> usize {
        self.dims.len()
    }

    /// Tuple name, if set.
    pub fn tuple_name(&self) -> Option<&str> {
        self.tuple.as_deref()
    }

    /// Replace the tuple name.
    pub fn set_tuple_name(&mut self, name: &str) {
        self.tuple = Some(name.to_string());
    }

    /// Name of dimension `idx`.
    pub fn dim_name(&self, idx: usize) -> &str {
        &self.dims[idx]
    }

    /// All dimension names.
    pub fn dim_names(&self) -> &[String] {
        &self.dims
    }

    /// Rename dimension `idx`.
    pub fn set_dim_name(&mut self, idx: usize, name: &str) {
        self.dims[idx] = name.to_string();
    }

    /// Parameter names.
    pub fn param_names(&self) -> &[String] {
        &self.params
    }

    /// The constraints of the set.
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Add a constraint over this set's space.
    pub fn add_constraint(&mut self, c: Constraint) {
        assert_eq!(c.expr.n_var(), self.n_dim());
        assert_eq!(c.expr.n_param(), self.params.len());
        self.constraints.push(c.normalize());
    }

    /// `S0[i, j]` — the statement form of this set.
    pub fn statement_repr(&self) -> String {
        format!(
            "{}[{}]",
            self.tuple.as_deref().unwrap_or(""),
            self.dims.join(", ")
        )
    }

    /// Check membership of a concrete point.
    pub fn contains(&self, point: &[i64], params: &[i64]) -> bool {
        self.constraints
            .iter()
            .all(|c| c.is_satisfied(point, params))
    }

    /// True when some constraint is syntactically unsatisfiable.
    pub fn is_obviously_empty(&self) -> bool {
        self.constraints.iter().any(|c| c.is_trivially_false())
    }

    /// Intersect with another set over the same space (dimension
    /// counts must agree; alignment is positional).
    pub fn intersect(&self, other: &Set) -> Set {
        assert_eq!(
            self.n_dim(),
            other.n_dim(),
            "intersect: dimension mismatch between {} and {}",
            self,
            other
        );
        let (params, map_a, map_b) = merge_params(&self.params, &other.params);
        let mut constraints = Vec::new();
        for c in &self.constraints {
            let mut c = c.clone();
            c.expr.remap_params(&map_a, params.len());
            constraints.push(c);
        }
        for c in &other.constraints {
            let mut c = c.clone();
            c.expr.remap_params(&map_b, params.len());
            constraints.push(c);
        }
        Set {
            tuple: self.tuple.clone().or_else(|| other.tuple.clone()),
            dims: self.dims.clone(),
            params,
            constraints: dedup_constraints(constraints),
        }
    }

    /// The image of this set under `map` (the map's input arity must
    /// match this set's dimension count).
    pub fn apply(&self, map: &Map) -> Set {
        assert_eq!(
            self.n_dim(),
            map.n_in(),
            "apply: set dimension {} does not match map input arity {}",
            self.n_dim(),
            map.n_in()
        );
        let n_in = self.n_dim();
        let n_out = map.n_out();
        let (params, map_a, map_b) = merge_params(&self.params, map.param_names());

        let mut combined: Vec<Constraint> = Vec::new();
        for c in &self.constraints {
            let mut c = c.clone();
            c.expr.insert_vars(n_in, n_out);
            c.expr.remap_params(&map_a, params.len());
            combined.push(c);
        }
        for c in map.constraints() {
            let mut c = c.clone();
            c.expr.remap_params(&map_b, params.len());
            combined.push(c);
        }

        let constraints = eliminate_positions(combined, 0, n_in);
        Set {
            tuple: map.out_tuple_name().map(|s| s.to_string()),
            dims: map.out_dim_names().to_vec(),
            params,
            constraints: dedup_constraints(constraints),
        }
    }

    /// Identity map `{ S[i, j] -> [i, j] }` over this set's space.
    pub fn identity(&self) -> Map {
        Map::identity_of(self)
    }

    /// Intersect with constraints parsed from text over this set's
    /// dimensions, e.g. `"i > 0"`.
    pub fn append_cond(&self, cond: &str) -> Result<Set, PolyError> {
        crate::polyhedral::parse::append_cond(self, cond)
    }

    /// Project this set onto its first `keep` dimensions.
    pub fn project_onto_prefix(&self, keep: usize) -> Set {
        assert!(keep <= self.n_dim());
        let drop = self.n_dim() - keep;
        // eliminate trailing dims; eliminate_positions removes slots at
        // `start` repeatedly, so start at `keep` each time.
        let constraints = eliminate_positions(self.constraints.clone(), keep, drop);
        Set {
            tuple: self.tuple.clone(),
            dims: self.dims[..keep].to_vec(),
            params: self.params.clone(),
            constraints: dedup_constraints(constraints),
        }
    }

    /// Decide emptiness by eliminating every dimension and looking
    /// for a constant contradiction. Exact for constant bounds;
    /// conservative (returns false) when symbolic parameters keep the
    /// contradiction from reaching a constant.
    pub fn is_empty_exact(&self) -> bool {
        let reduced = eliminate_positions(self.constraints.clone(), 0, self.n_dim());
        reduced.iter().any(|c| {
            c.expr.param_coeffs.iter().all(|&p| p == 0)
                && match c.kind {
                    ConstraintKind::Inequality => c.expr.constant < 0,
                    ConstraintKind::Equality => c.expr.constant != 0,
                }
        })
    }

    /// Semantic equality: same tuple name, same arity, and the same
    /// canonicalised constraint system.
    pub fn is_equal(&self, other: &Set) -> bool {
        if self.tuple != other.tuple || self.n_dim() != other.n_dim() {
            return false;
        }
        let (params, map_a, map_b) = merge_params(&self.params, &other.params);
        let canon = |cs: &[Constraint], pmap: &[usize]| -> Vec<(ConstraintKind, Vec<i64>, i64)> {
            let mut v: Vec<_> = cs
                .iter()
                .map(|c| {
                    let mut c = c.clone();
                    c.expr.remap_params(pmap, params.len());
                    let c = c.normalize();
                    let mut coeffs = c.expr.coeffs.clone();
                    coeffs.extend_from_slice(&c.expr.param_coeffs);
                    (c.kind, coeffs, c.expr.constant)
                })
                .filter(|(kind, coeffs, constant)| {
                    // drop trivially true rows
                    !(coeffs.iter().all(|&x| x == 0)
                        && match kind {
                            ConstraintKind::Inequality => *constant >= 0,
                            ConstraintKind::Equality => *constant == 0,
                        })
                })
                .collect();
            v.sort();
            v.dedup();
            v
        };
        canon(&self.constraints, &map_a) == canon(&other.constraints, &map_b)
    }
}

/// Drop duplicate and trivially-true constraints, preserving order.
pub(crate) fn dedup_constraints(cs: Vec<Constraint>) -> Vec<Constraint> {
    let mut seen: Vec<Constraint> = Vec::new();
    for c in cs {
        let c = c.normalize();
        if c.is_trivially_true() {
            continue;
        }
        if !seen.contains(&c) {
            seen.push(c);
        }
    }
    seen
}

impl fmt::Display for Set {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.params.is_empty() {
            write!(f, "[{}] -> ", self.params.join(", "))?;
        }
        write!(f, "{{ {}", self.statement_repr())?;
        if !self.constraints.is_empty() {
            let parts: Vec<String> = self
                .constraints
                .iter()
                .map(|c| c.to_string_with_names(&self.dims, &self.params))
                .collect();
            write!(f, " : {}", parts.join(" and "))?;
        }
        write!(f, " }}")
    }
}

/// A union of integer sets over possibly different spaces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnionSet {
    pub(crate) sets: Vec<Set>,
}

impl UnionSet {
    /// The empty union.
    pub fn empty() -> Self {
        Self { sets: Vec::new() }
    }

    /// A union holding one set.
    pub fn from_set(set: Set) -> Self {
        Self { sets: vec![set] }
    }

    /// Parse from ISL syntax with `;`-separated components.
    pub fn parse(input: &str) -> Result<Self, PolyError> {
        crate::polyhedral::parse::parse_union_set(input)
    }

    /// Add one more set.
    pub fn add_set(&mut self, set: Set) {
        self.sets.push(set);
    }

    /// Union with another union-set.
    pub fn union(mut self, other: UnionSet) -> UnionSet {
        self.sets.extend(other.sets);
        self
    }

    /// Component sets.
    pub fn sets(&self) -> &[Set] {
        &self.sets
    }

    /// Find a component by tuple name.
    pub fn set_by_tuple(&self, name: &str) -> Option<&Set> {
        self.sets.iter().find(|s| s.tuple_name() == Some(name))
    }

    /// True when there are no components.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

impl fmt::Display for UnionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut params: Vec<String> = Vec::new();
        for s in &self.sets {
            for p in &s.params {
                if !params.contains(p) {
                    params.push(p.clone());
                }
            }
        }
        if !params.is_empty() {
            write!(f, "[{}] -> ", params.join(", "))?;
        }
        let bodies: Vec<String> = self
            .sets
            .iter()
            .map(|s| {
                let mut body = s.statement_repr();
                if !s.constraints.is_empty() {
                    let parts: Vec<String> = s
                        .constraints
                        .iter()
                        .map(|c| c.to_string_with_names(&s.dims, &s.params))
                        .collect();
                    body.push_str(&format!(" : {}", parts.join(" and ")));
                }
                body
            })
            .collect();
        write!(f, "{{ {} }}", bodies.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_universe_contains_everything() {
        let s = Set::universe(Some("S0".into()), vec!["i".into(), "j".into()]);
        assert!(s.contains(&[5, -3], &[]));
        assert_eq!(s.statement_repr(), "S0[i, j]");
    }

    #[test]
    fn test_parse_and_contains() {
        let s = Set::parse("{ S0[i, j] : 0 <= i < 20 and 0 <= j < 40 }").unwrap();
        assert_eq!(s.n_dim(), 2);
        assert!(s.contains(&[0, 39], &[]));
        assert!(!s.contains(&[20, 0], &[]));
    }

    #[test]
    fn test_intersect() {
        let a = Set::parse("{ S0[i] : 0 <= i < 10 }").unwrap();
        let b = Set::parse("{ S0[i] : i >= 5 }").unwrap();
        let c = a.intersect(&b);
        assert!(c.contains(&[5], &[]));
        assert!(!c.contains(&[4], &[]));
    }

    #[test]
    fn test_roundtrip_equality() {
        let s = Set::parse("[N] -> { S0[i, j] : 0 <= i < N and 0 <= j < 8 }").unwrap();
        let t = Set::parse(&s.to_string()).unwrap();
        assert!(s.is_equal(&t));
    }

    #[test]
    fn test_project_prefix() {
        let s = Set::parse("{ S0[i, j] : 0 <= i < 10 and 0 <= j < 5 and j <= i }").unwrap();
        let p = s.project_onto_prefix(1);
        assert_eq!(p.n_dim(), 1);
        assert!(p.contains(&[9], &[]));
        assert!(!p.contains(&[10], &[]));
    }
}
