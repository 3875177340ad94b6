//! Linear constraints and integer-exact elimination.
//!
//! A constraint is `expr >= 0` (inequality) or `expr = 0` (equality).
//! Variable elimination uses equality substitution where possible and
//! Fourier-Motzkin combination otherwise, with floor/ceil rounding so
//! the integer hull is never widened on the constant term.

use crate::polyhedral::expr::{floor_div_i64, AffineExpr};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// `expr >= 0`
    Inequality,
    /// `expr = 0`
    Equality,
}

/// A linear constraint over a variable/parameter space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Constraint {
    /// The affine expression; the constraint is `expr >= 0` or `expr = 0`.
    pub expr: AffineExpr,
    /// Kind of constraint.
    pub kind: ConstraintKind,
}

impl Constraint {
    /// Create an inequality `expr >= 0`.
    pub fn ge_zero(expr: AffineExpr) -> Self {
        Self {
            expr,
            kind: ConstraintKind::Inequality,
        }
    }

    /// Create an equality `expr = 0`.
    pub fn eq_zero(expr: AffineExpr) -> Self {
        Self {
            expr,
            kind: ConstraintKind::Equality,
        }
    }

    /// `lhs >= rhs`
    pub fn ge(lhs: AffineExpr, rhs: AffineExpr) -> Self {
        Self::ge_zero(lhs - rhs)
    }

    /// `lhs = rhs`
    pub fn eq(lhs: AffineExpr, rhs: AffineExpr) -> Self {
        Self::eq_zero(lhs - rhs)
    }

    /// True for equality constraints.
    pub fn is_equality(&self) -> bool {
        matches!(self.kind, ConstraintKind::Equality)
    }

    /// Check satisfaction at a concrete point.
    pub fn is_satisfied(&self, vars: &[i64], params: &[i64]) -> bool {
        let v = self.expr.evaluate(vars, params);
        match self.kind {
            ConstraintKind::Inequality => v >= 0,
            ConstraintKind::Equality => v == 0,
        }
    }

    /// Divide through by the gcd of the coefficients. Inequality
    /// constants round toward the feasible side; an unsatisfiable
    /// equality collapses to the canonical `-1 >= 0`.
    pub fn normalize(mut self) -> Self {
        let g = self.expr.coeff_gcd();
        if g > 1 {
            match self.kind {
                ConstraintKind::Inequality => {
                    for c in self
                        .expr
                        .coeffs
                        .iter_mut()
                        .chain(self.expr.param_coeffs.iter_mut())
                    {
                        *c /= g;
                    }
                    self.expr.constant = floor_div_i64(self.expr.constant, g);
                }
                ConstraintKind::Equality => {
                    if self.expr.constant % g != 0 {
                        let n_var = self.expr.n_var();
                        let n_param = self.expr.n_param();
                        return Constraint::ge_zero(AffineExpr::constant(-1, n_var, n_param));
                    }
                    for c in self
                        .expr
                        .coeffs
                        .iter_mut()
                        .chain(self.expr.param_coeffs.iter_mut())
                    {
                        *c /= g;
                    }
                    self.expr.constant /= g;
                }
            }
        }
        // canonical sign for equalities: first nonzero coefficient positive
        if self.kind == ConstraintKind::Equality {
            let first = self
                .expr
                .coeffs
                .iter()
                .chain(self.expr.param_coeffs.iter())
                .find(|&&c| c != 0);
            if let Some(&c) = first {
                if c < 0 {
                    self.expr = -self.expr;
                }
            } else if self.expr.constant < 0 {
                self.expr = -self.expr;
            }
        }
        self
    }

    /// True when the constraint can never hold (constant-only and false).
    pub fn is_trivially_false(&self) -> bool {
        match self.expr.as_constant() {
            Some(v) => match self.kind {
                ConstraintKind::Inequality => v < 0,
                ConstraintKind::Equality => v != 0,
            },
            None => false,
        }
    }

    /// True when the constraint always holds.
    pub fn is_trivially_true(&self) -> bool {
        match self.expr.as_constant() {
            Some(v) => match self.kind {
                ConstraintKind::Inequality => v >= 0,
                ConstraintKind::Equality => v == 0,
            },
            None => false,
        }
    }

    /// Render with names, e.g. `19 - i >= 0`.
    pub fn to_string_with_names(&self, var_names: &[String], param_names: &[String]) -> String {
        let e = self.expr.to_string_with_names(var_names, param_names);
        match self.kind {
            ConstraintKind::Inequality => format!("{} >= 0", e),
            ConstraintKind::Equality => format!("{} = 0", e),
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let var_names: Vec<String> = (0..self.expr.n_var()).map(|i| format!("d{}", i)).collect();
        let param_names: Vec<String> = (0..self.expr.n_param()).map(|i| format!("p{}", i)).collect();
        write!(f, "{}", self.to_string_with_names(&var_names, &param_names))
    }
}

/// Substitute away variable `idx` in `target` using the equality
/// `eq.expr = 0` (whose coefficient on `idx` must be nonzero). The
/// result is scaled by `|c|` which preserves both constraint kinds.
pub fn substitute_with_equality(target: &Constraint, eq: &AffineExpr, idx: usize) -> Constraint {
    let c = eq.coeff(idx);
    debug_assert!(c != 0);
    let d = target.expr.coeff(idx);
    if d == 0 {
        return target.clone();
    }
    let scaled = target.expr.scale(c.abs());
    let k = -d * c.signum();
    let combined = scaled + eq.scale(k);
    debug_assert_eq!(combined.coeff(idx), 0);
    Constraint {
        expr: combined,
        kind: target.kind,
    }
    .normalize()
}

/// Eliminate variable `idx` from a constraint system, keeping the
/// variable slot (coefficient forced to zero everywhere) so positions
/// stay stable; callers drop the slot afterwards.
pub fn eliminate_var(constraints: &[Constraint], idx: usize) -> Vec<Constraint> {
    // Prefer an equality pivot.
    let pivot = constraints
        .iter()
        .filter(|c| c.is_equality() && c.expr.coeff(idx) != 0)
        .min_by_key(|c| c.expr.coeff(idx).abs());

    if let Some(pivot) = pivot {
        let eq = pivot.expr.clone();
        return constraints
            .iter()
            .filter(|c| !std::ptr::eq(*c, pivot))
            .map(|c| substitute_with_equality(c, &eq, idx))
            .filter(|c| !c.is_trivially_true())
            .collect();
    }

    // Fourier-Motzkin: combine every lower bound with every upper bound.
    let mut kept: Vec<Constraint> = Vec::new();
    let mut lowers: Vec<&Constraint> = Vec::new();
    let mut uppers: Vec<&Constraint> = Vec::new();
    for c in constraints {
        let coeff = c.expr.coeff(idx);
        if coeff == 0 {
            kept.push(c.clone());
        } else if coeff > 0 {
            lowers.push(c);
        } else {
            uppers.push(c);
        }
    }
    for lo in &lowers {
        for up in &uppers {
            let p = lo.expr.coeff(idx);
            let q = -up.expr.coeff(idx);
            let combined = lo.expr.scale(q) + up.expr.scale(p);
            debug_assert_eq!(combined.coeff(idx), 0);
            let c = Constraint::ge_zero(combined).normalize();
            if !c.is_trivially_true() {
                kept.push(c);
            }
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ineq(coeffs: Vec<i64>, constant: i64) -> Constraint {
        Constraint::ge_zero(AffineExpr {
            constant,
            coeffs,
            param_coeffs: vec![],
        })
    }

    #[test]
    fn test_normalize_rounds_down() {
        // 99 - 8*x >= 0  =>  12 - x >= 0
        let c = ineq(vec![-8], 99).normalize();
        assert_eq!(c.expr.coeffs, vec![-1]);
        assert_eq!(c.expr.constant, 12);
    }

    #[test]
    fn test_substitute_equality() {
        // vars: [i, t, p]; eq: i - 8t - p = 0; target: 99 - i >= 0
        let eq = AffineExpr {
            constant: 0,
            coeffs: vec![1, -8, -1],
            param_coeffs: vec![],
        };
        let target = ineq(vec![-1, 0, 0], 99);
        let out = substitute_with_equality(&target, &eq, 0);
        assert_eq!(out.expr.coeffs, vec![0, -8, -1]);
        assert_eq!(out.expr.constant, 99);
    }

    #[test]
    fn test_fm_elimination() {
        // vars: [t, p]; constraints: p >= 0, 7 - p >= 0, 99 - 8t - p >= 0, 8t + p >= 0
        let cs = vec![
            ineq(vec![0, 1], 0),
            ineq(vec![0, -1], 7),
            ineq(vec![-8, -1], 99),
            ineq(vec![8, 1], 0),
        ];
        let out = eliminate_var(&cs, 1);
        // expect bounds on t alone: t >= ... and 12 - t >= 0 among them
        assert!(out
            .iter()
            .any(|c| c.expr.coeffs == vec![-1, 0] && c.expr.constant == 12));
    }
}
