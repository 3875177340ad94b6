//! Affine relations between named spaces (schedules, accesses,
//! dependencies).
//!
//! A `Map` relates an input tuple to an output tuple through affine
//! constraints over the concatenated space `[in ++ out ++ params]`.
//! Keeping maps relational rather than functional lets access
//! composition, dependence joins and split transforms stay exact.

use crate::polyhedral::constraint::Constraint;
use crate::polyhedral::expr::AffineExpr;
use crate::polyhedral::set::{dedup_constraints, Set, UnionSet};
use crate::polyhedral::{eliminate_positions, merge_params};
use crate::utils::errors::PolyError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An affine relation `in_tuple[in_dims] -> out_tuple[out_dims]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Map {
    pub(crate) in_tuple: Option<String>,
    pub(crate) in_dims: Vec<String>,
    pub(crate) out_tuple: Option<String>,
    pub(crate) out_dims: Vec<String>,
    pub(crate) params: Vec<String>,
    /// Constraints over `[in_dims ++ out_dims]` variables plus params.
    pub(crate) constraints: Vec<Constraint>,
}

impl Map {
    /// Parse from ISL syntax, e.g. `{ S0[i, j] -> out[i, j] }`.
    pub fn parse(input: &str) -> Result<Self, PolyError> {
        crate::polyhedral::parse::parse_map(input)
    }

    /// The identity map over a set's space: `{ S[i, j] -> [i, j] }`.
    pub fn identity_of(set: &Set) -> Map {
        let n = set.n_dim();
        let mut constraints = Vec::with_capacity(n);
        for k in 0..n {
            // out_k - in_k = 0
            let mut e = AffineExpr::zero(2 * n, set.param_names().len());
            e.coeffs[n + k] = 1;
            e.coeffs[k] = -1;
            constraints.push(Constraint::eq_zero(e));
        }
        Map {
            in_tuple: set.tuple_name().map(|s| s.to_string()),
            in_dims: set.dim_names().to_vec(),
            out_tuple: None,
            out_dims: set.dim_names().to_vec(),
            params: set.param_names().to_vec(),
            constraints,
        }
    }

    /// Input arity.
    pub fn n_in(&self) -> usize {
        self.in_dims.len()
    }

    /// Output arity.
    pub fn n_out(&self) -> usize {
        self.out_dims.len()
    }

    /// Input tuple name.
    pub fn in_tuple_name(&self) -> Option<&str> {
        self.in_tuple.as_deref()
    }

    /// Output tuple name.
    pub fn out_tuple_name(&self) -> Option<&str> {
        self.out_tuple.as_deref()
    }

    /// Set the input tuple name.
    pub fn set_in_tuple_name(&mut self, name: &str) {
        self.in_tuple = Some(name.to_string());
    }

    /// Set the output tuple name.
    pub fn set_out_tuple_name(&mut self, name: &str) {
        self.out_tuple = Some(name.to_string());
    }

    /// Input dimension names.
    pub fn in_dim_names(&self) -> &[String] {
        &self.in_dims
    }

    /// Output dimension names.
    pub fn out_dim_names(&self) -> &[String] {
        &self.out_dims
    }

    /// Rename an output dimension.
    pub fn set_out_dim_name(&mut self, idx: usize, name: &str) {
        self.out_dims[idx] = name.to_string();
    }

    /// Position of a named output dimension.
    pub fn out_dim_pos(&self, name: &str) -> Option<usize> {
        self.out_dims.iter().position(|d| d == name)
    }

    /// Parameter names.
    pub fn param_names(&self) -> &[String] {
        &self.params
    }

    /// The constraints over `[in ++ out ++ params]`.
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Swap two named output dimensions (loop interchange).
    pub fn swap_out_dims(&mut self, a: &str, b: &str) -> Result<(), PolyError> {
        let pa = self
            .out_dim_pos(a)
            .ok_or_else(|| PolyError::UnknownDim(a.to_string()))?;
        let pb = self
            .out_dim_pos(b)
            .ok_or_else(|| PolyError::UnknownDim(b.to_string()))?;
        self.out_dims.swap(pa, pb);
        let n_in = self.n_in();
        for c in &mut self.constraints {
            c.expr.coeffs.swap(n_in + pa, n_in + pb);
        }
        Ok(())
    }

    /// Reverse the relation: `{ A -> B }` becomes `{ B -> A }`.
    pub fn reverse(&self) -> Map {
        let n_in = self.n_in();
        let n_out = self.n_out();
        let constraints = self
            .constraints
            .iter()
            .map(|c| {
                let mut coeffs = Vec::with_capacity(n_in + n_out);
                coeffs.extend_from_slice(&c.expr.coeffs[n_in..]);
                coeffs.extend_from_slice(&c.expr.coeffs[..n_in]);
                Constraint {
                    expr: AffineExpr {
                        constant: c.expr.constant,
                        coeffs,
                        param_coeffs: c.expr.param_coeffs.clone(),
                    },
                    kind: c.kind,
                }
            })
            .collect();
        Map {
            in_tuple: self.out_tuple.clone(),
            in_dims: self.out_dims.clone(),
            out_tuple: self.in_tuple.clone(),
            out_dims: self.in_dims.clone(),
            params: self.params.clone(),
            constraints,
        }
    }

    /// Compose with `other` on this map's range: `self: A -> B`,
    /// `other: B -> C`, result `A -> C`. Returns `None` when the
    /// ranges do not join (tuple name or arity mismatch).
    pub fn apply_range(&self, other: &Map) -> Option<Map> {
        if self.n_out() != other.n_in() {
            return None;
        }
        if let (Some(a), Some(b)) = (self.out_tuple_name(), other.in_tuple_name()) {
            if a != b {
                return None;
            }
        }
        let n_a = self.n_in();
        let n_mid = self.n_out();
        let n_c = other.n_out();
        let (params, map_a, map_b) = merge_params(&self.params, &other.params);

        let mut combined: Vec<Constraint> = Vec::new();
        for c in &self.constraints {
            let mut c = c.clone();
            c.expr.insert_vars(n_a + n_mid, n_c);
            c.expr.remap_params(&map_a, params.len());
            combined.push(c);
        }
        for c in &other.constraints {
            let mut c = c.clone();
            c.expr.insert_vars(0, n_a);
            c.expr.remap_params(&map_b, params.len());
            combined.push(c);
        }
        let constraints = eliminate_positions(combined, n_a, n_mid);
        Some(Map {
            in_tuple: self.in_tuple.clone(),
            in_dims: self.in_dims.clone(),
            out_tuple: other.out_tuple.clone(),
            out_dims: other.out_dims.clone(),
            params,
            constraints: dedup_constraints(constraints),
        })
    }

    /// Compose with `other` on this map's domain: `self: A -> B`,
    /// `other: A -> C`, result `C -> B`.
    pub fn apply_domain(&self, other: &Map) -> Option<Map> {
        other.reverse().apply_range(self)
    }

    /// Restrict the domain to `set`.
    pub fn intersect_domain(&self, set: &Set) -> Map {
        assert_eq!(self.n_in(), set.n_dim());
        let n_out = self.n_out();
        let (params, map_a, map_b) = merge_params(&self.params, set.param_names());
        let mut constraints: Vec<Constraint> = Vec::new();
        for c in &self.constraints {
            let mut c = c.clone();
            c.expr.remap_params(&map_a, params.len());
            constraints.push(c);
        }
        for c in set.constraints() {
            let mut c = c.clone();
            c.expr.insert_vars(set.n_dim(), n_out);
            c.expr.remap_params(&map_b, params.len());
            constraints.push(c);
        }
        Map {
            in_tuple: self.in_tuple.clone(),
            in_dims: self.in_dims.clone(),
            out_tuple: self.out_tuple.clone(),
            out_dims: self.out_dims.clone(),
            params,
            constraints: dedup_constraints(constraints),
        }
    }

    /// Project onto the output space.
    pub fn range_set(&self) -> Set {
        let constraints = eliminate_positions(self.constraints.clone(), 0, self.n_in());
        Set {
            tuple: self.out_tuple.clone(),
            dims: self.out_dims.clone(),
            params: self.params.clone(),
            constraints: dedup_constraints(constraints),
        }
    }

    /// Derive equalities from opposing inequality pairs and normalise.
    pub fn detect_equalities(&self) -> Map {
        let mut out = self.clone();
        let cs = dedup_constraints(out.constraints.clone());
        let mut result: Vec<Constraint> = Vec::new();
        let mut used = vec![false; cs.len()];
        for i in 0..cs.len() {
            if used[i] || cs[i].is_equality() {
                continue;
            }
            for j in (i + 1)..cs.len() {
                if used[j] || cs[j].is_equality() {
                    continue;
                }
                let neg = -cs[i].expr.clone();
                if cs[j].expr == neg {
                    result.push(Constraint::eq_zero(cs[i].expr.clone()).normalize());
                    used[i] = true;
                    used[j] = true;
                    break;
                }
            }
        }
        for (i, c) in cs.into_iter().enumerate() {
            if !used[i] {
                result.push(c);
            }
        }
        out.constraints = result;
        out
    }

    /// True when the relation is the identity on a shared tuple.
    pub fn is_identity(&self) -> bool {
        if self.n_in() != self.n_out() {
            return false;
        }
        match (self.in_tuple_name(), self.out_tuple_name()) {
            (Some(a), Some(b)) if a != b => return false,
            _ => {}
        }
        let n = self.n_in();
        let normalized = self.detect_equalities();
        (0..n).all(|k| {
            normalized.constraints.iter().any(|c| {
                if !c.is_equality() {
                    return false;
                }
                let e = &c.expr;
                if e.constant != 0 || e.param_coeffs.iter().any(|&p| p != 0) {
                    return false;
                }
                let ok_pair = (e.coeff(k) == 1 && e.coeff(n + k) == -1)
                    || (e.coeff(k) == -1 && e.coeff(n + k) == 1);
                ok_pair
                    && e.coeffs
                        .iter()
                        .enumerate()
                        .all(|(i, &v)| i == k || i == n + k || v == 0)
            })
        })
    }

    /// Solve the relation for the input dimensions: an affine
    /// expression over `[out_dims ++ params]` per input dimension.
    /// Returns `None` when some input cannot be expressed exactly.
    pub fn in_dim_exprs(&self) -> Option<Vec<AffineExpr>> {
        let n_in = self.n_in();
        let n_out = self.n_out();
        let n_param = self.params.len();
        let eqs: Vec<&Constraint> = self.constraints.iter().filter(|c| c.is_equality()).collect();
        let mut solved: Vec<Option<AffineExpr>> = vec![None; n_in];

        let mut progress = true;
        while progress && solved.iter().any(|s| s.is_none()) {
            progress = false;
            for eq in &eqs {
                let e = &eq.expr;
                let unsolved: Vec<usize> = (0..n_in)
                    .filter(|&k| e.coeff(k) != 0 && solved[k].is_none())
                    .collect();
                if unsolved.len() != 1 {
                    continue;
                }
                let u = unsolved[0];
                let c = e.coeff(u);
                // residual over [out, params] after substituting solved inputs
                let mut residual = AffineExpr::zero(n_out, n_param);
                residual.constant = e.constant;
                for k in 0..n_out {
                    residual.coeffs[k] = e.coeff(n_in + k);
                }
                residual.param_coeffs = e.param_coeffs.clone();
                let mut ok = true;
                for k in 0..n_in {
                    if k == u {
                        continue;
                    }
                    let d = e.coeff(k);
                    if d != 0 {
                        match &solved[k] {
                            Some(s) => residual = residual + s.scale(d),
                            None => {
                                ok = false;
                                break;
                            }
                        }
                    }
                }
                if !ok {
                    continue;
                }
                // c*u + residual = 0  =>  u = -residual / c
                match exact_div(&residual.scale(-1), c) {
                    Some(expr) => {
                        solved[u] = Some(expr);
                        progress = true;
                    }
                    None => continue,
                }
            }
        }
        solved.into_iter().collect()
    }
}

/// Divide every term of `e` by `c`, requiring exact division.
fn exact_div(e: &AffineExpr, c: i64) -> Option<AffineExpr> {
    if c == 0 {
        return None;
    }
    let all_divisible = e.constant % c == 0
        && e.coeffs.iter().all(|&v| v % c == 0)
        && e.param_coeffs.iter().all(|&v| v % c == 0);
    if !all_divisible {
        return None;
    }
    Some(AffineExpr {
        constant: e.constant / c,
        coeffs: e.coeffs.iter().map(|&v| v / c).collect(),
        param_coeffs: e.param_coeffs.iter().map(|&v| v / c).collect(),
    })
}

impl fmt::Display for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (body, params) = map_body_string(self);
        if !params.is_empty() {
            write!(f, "[{}] -> ", params.join(", "))?;
        }
        write!(f, "{{ {} }}", body)
    }
}

/// Render the body of a map (`A[i] -> B[j] : conds`), hiding the
/// equalities that shared dimension names already encode and renaming
/// output dimensions that would otherwise clash.
pub(crate) fn map_body_string(map: &Map) -> (String, Vec<String>) {
    let n_in = map.n_in();
    let n_out = map.n_out();

    // trivial equality: out_k = in_j where both carry the same name
    let trivial_eq_of = |k: usize| -> Option<usize> {
        let name = &map.out_dims[k];
        let j = map.in_dims.iter().position(|d| d == name)?;
        map.constraints.iter().position(|c| {
            if !c.is_equality() {
                return false;
            }
            let e = &c.expr;
            if e.constant != 0 || e.param_coeffs.iter().any(|&p| p != 0) {
                return false;
            }
            let pair = (e.coeff(j) == 1 && e.coeff(n_in + k) == -1)
                || (e.coeff(j) == -1 && e.coeff(n_in + k) == 1);
            pair && e
                .coeffs
                .iter()
                .enumerate()
                .all(|(i, &v)| i == j || i == n_in + k || v == 0)
        })
    };

    let mut skipped: Vec<usize> = Vec::new();
    let mut display_out: Vec<String> = Vec::new();
    for k in 0..n_out {
        let name = map.out_dims[k].clone();
        let collides = map.in_dims.contains(&name);
        if !collides {
            display_out.push(name);
        } else if let Some(ci) = trivial_eq_of(k) {
            skipped.push(ci);
            display_out.push(name);
        } else {
            display_out.push(format!("o{}", k));
        }
    }

    let mut var_names = map.in_dims.clone();
    var_names.extend(display_out.iter().cloned());

    let conds: Vec<String> = map
        .constraints
        .iter()
        .enumerate()
        .filter(|(i, _)| !skipped.contains(i))
        .map(|(_, c)| c.to_string_with_names(&var_names, &map.params))
        .collect();

    let mut body = format!(
        "{}[{}] -> {}[{}]",
        map.in_tuple.as_deref().unwrap_or(""),
        map.in_dims.join(", "),
        map.out_tuple.as_deref().unwrap_or(""),
        display_out.join(", ")
    );
    if !conds.is_empty() {
        body.push_str(&format!(" : {}", conds.join(" and ")));
    }
    (body, map.params.clone())
}

/// A union of maps over possibly different space pairs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnionMap {
    pub(crate) maps: Vec<Map>,
}

impl UnionMap {
    /// The empty union.
    pub fn empty() -> Self {
        Self { maps: Vec::new() }
    }

    /// A union holding one map.
    pub fn from_map(map: Map) -> Self {
        Self { maps: vec![map] }
    }

    /// Parse from ISL syntax with `;`-separated components.
    pub fn parse(input: &str) -> Result<Self, PolyError> {
        crate::polyhedral::parse::parse_union_map(input)
    }

    /// Add one map.
    pub fn add_map(&mut self, map: Map) {
        self.maps.push(map);
    }

    /// Union with another union-map.
    pub fn union(mut self, other: UnionMap) -> UnionMap {
        self.maps.extend(other.maps);
        self
    }

    /// Component maps.
    pub fn maps(&self) -> &[Map] {
        &self.maps
    }

    /// True when there are no components.
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Restrict every component's domain to the matching union-set
    /// component (matched by input tuple name).
    pub fn intersect_domain(&self, domain: &UnionSet) -> UnionMap {
        let maps = self
            .maps
            .iter()
            .filter_map(|m| {
                let tuple = m.in_tuple_name()?;
                let set = domain.set_by_tuple(tuple)?;
                Some(m.intersect_domain(set))
            })
            .collect();
        UnionMap { maps }
    }

    /// Reverse every component.
    pub fn reverse(&self) -> UnionMap {
        UnionMap {
            maps: self.maps.iter().map(|m| m.reverse()).collect(),
        }
    }

    /// Compose all joinable pairs on the range.
    pub fn apply_range(&self, other: &UnionMap) -> UnionMap {
        let mut maps = Vec::new();
        for a in &self.maps {
            for b in &other.maps {
                if let Some(m) = a.apply_range(b) {
                    if !m.range_set().is_obviously_empty() {
                        maps.push(m);
                    }
                }
            }
        }
        UnionMap { maps }
    }

    /// Normalise every component.
    pub fn detect_equalities(&self) -> UnionMap {
        UnionMap {
            maps: self.maps.iter().map(|m| m.detect_equalities()).collect(),
        }
    }
}

impl fmt::Display for UnionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut params: Vec<String> = Vec::new();
        let mut bodies: Vec<String> = Vec::new();
        for m in &self.maps {
            let (body, m_params) = map_body_string(m);
            bodies.push(body);
            for p in m_params {
                if !params.contains(&p) {
                    params.push(p);
                }
            }
        }
        if !params.is_empty() {
            write!(f, "[{}] -> ", params.join(", "))?;
        }
        if bodies.is_empty() {
            write!(f, "{{ }}")
        } else {
            write!(f, "{{ {} }}", bodies.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_roundtrip() {
        let s = Set::parse("{ S0[i, j] : 0 <= i < 4 and 0 <= j < 4 }").unwrap();
        let id = s.identity();
        assert_eq!(id.n_in(), 2);
        assert_eq!(id.n_out(), 2);
        assert!(id.is_identity());
        let img = s.apply(&id);
        assert!(img.contains(&[3, 3], &[]));
        assert!(!img.contains(&[4, 0], &[]));
    }

    #[test]
    fn test_apply_transform() {
        // { [ii0, ii1] : 0 <= ii0 < 40 and 0 <= ii1 < 30 } applied to
        // { [ii0, ii1] -> [j, k] : ii0 = j and ii1 = k }
        let base = Set::parse("{ [ii0, ii1] : 0 <= ii0 < 40 and 0 <= ii1 < 30 }").unwrap();
        let t = Map::parse("{ [ii0, ii1] -> [j, k] : ii0 = j and ii1 = k }").unwrap();
        let img = base.apply(&t);
        assert_eq!(img.dim_names(), &["j".to_string(), "k".to_string()]);
        assert!(img.contains(&[39, 29], &[]));
        assert!(!img.contains(&[40, 0], &[]));
    }

    #[test]
    fn test_reverse_compose() {
        let w = Map::parse("{ S0[i, j] -> out[i, j] }").unwrap();
        let r = Map::parse("{ S1[i, j, k] -> out[i, j] }").unwrap();
        // S1 -> out composed with out -> S0
        let dep = r.apply_range(&w.reverse()).unwrap();
        assert_eq!(dep.in_tuple_name(), Some("S1"));
        assert_eq!(dep.out_tuple_name(), Some("S0"));
        assert!(!dep.is_identity());
    }

    #[test]
    fn test_in_dim_exprs_identity() {
        let s = Set::parse("{ S0[i, j] : 0 <= i < 4 and 0 <= j < 4 }").unwrap();
        let id = s.identity();
        let exprs = id.in_dim_exprs().unwrap();
        assert_eq!(exprs.len(), 2);
        assert_eq!(exprs[0].coeffs, vec![1, 0]);
        assert_eq!(exprs[1].coeffs, vec![0, 1]);
    }
}
