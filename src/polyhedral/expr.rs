//! Affine expressions for the integer-set kernel.
//!
//! An affine expression is a linear combination of variables and
//! parameters plus a constant:
//! `aff(x) = c0 + c1*x1 + ... + p1*N + p2*M + ...`

use num_integer::Integer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Neg, Sub};

/// Integer floor division (rounds toward negative infinity).
pub fn floor_div_i64(a: i64, b: i64) -> i64 {
    debug_assert!(b != 0);
    let d = a / b;
    let r = a % b;
    if (r != 0) && ((r < 0) != (b < 0)) {
        d - 1
    } else {
        d
    }
}

/// Integer ceiling division.
pub fn ceil_div_i64(a: i64, b: i64) -> i64 {
    -floor_div_i64(-a, b)
}

/// An affine expression: constant + sum(coeff[i] * var[i]) + sum(param_coeff[j] * param[j]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AffineExpr {
    /// Constant term.
    pub constant: i64,
    /// Coefficients for each variable (positional).
    pub coeffs: Vec<i64>,
    /// Coefficients for each parameter (positional).
    pub param_coeffs: Vec<i64>,
}

impl AffineExpr {
    /// Create a zero expression.
    pub fn zero(n_var: usize, n_param: usize) -> Self {
        Self {
            constant: 0,
            coeffs: vec![0; n_var],
            param_coeffs: vec![0; n_param],
        }
    }

    /// Create a constant expression.
    pub fn constant(value: i64, n_var: usize, n_param: usize) -> Self {
        Self {
            constant: value,
            coeffs: vec![0; n_var],
            param_coeffs: vec![0; n_param],
        }
    }

    /// Create an expression for a single variable.
    pub fn var(idx: usize, n_var: usize, n_param: usize) -> Self {
        let mut coeffs = vec![0; n_var];
        coeffs[idx] = 1;
        Self {
            constant: 0,
            coeffs,
            param_coeffs: vec![0; n_param],
        }
    }

    /// Create an expression for a single parameter.
    pub fn param(idx: usize, n_var: usize, n_param: usize) -> Self {
        let mut param_coeffs = vec![0; n_param];
        param_coeffs[idx] = 1;
        Self {
            constant: 0,
            coeffs: vec![0; n_var],
            param_coeffs,
        }
    }

    /// Number of variables this expression ranges over.
    pub fn n_var(&self) -> usize {
        self.coeffs.len()
    }

    /// Number of parameters this expression ranges over.
    pub fn n_param(&self) -> usize {
        self.param_coeffs.len()
    }

    /// True when no variable or parameter has a nonzero coefficient.
    pub fn is_constant(&self) -> bool {
        self.coeffs.iter().all(|&c| c == 0) && self.param_coeffs.iter().all(|&c| c == 0)
    }

    /// Constant value, if this is a constant expression.
    pub fn as_constant(&self) -> Option<i64> {
        if self.is_constant() {
            Some(self.constant)
        } else {
            None
        }
    }

    /// Coefficient of a variable.
    pub fn coeff(&self, idx: usize) -> i64 {
        self.coeffs.get(idx).copied().unwrap_or(0)
    }

    /// Evaluate given concrete variable and parameter values.
    pub fn evaluate(&self, vars: &[i64], params: &[i64]) -> i64 {
        let mut result = self.constant;
        for (i, &c) in self.coeffs.iter().enumerate() {
            if let Some(&v) = vars.get(i) {
                result += c * v;
            }
        }
        for (i, &c) in self.param_coeffs.iter().enumerate() {
            if let Some(&v) = params.get(i) {
                result += c * v;
            }
        }
        result
    }

    /// Scale every term by a constant factor.
    pub fn scale(&self, factor: i64) -> Self {
        Self {
            constant: self.constant * factor,
            coeffs: self.coeffs.iter().map(|&c| c * factor).collect(),
            param_coeffs: self.param_coeffs.iter().map(|&c| c * factor).collect(),
        }
    }

    /// GCD of all variable and parameter coefficients (not the constant).
    pub fn coeff_gcd(&self) -> i64 {
        let mut g = 0i64;
        for &c in self.coeffs.iter().chain(self.param_coeffs.iter()) {
            g = g.gcd(&c.abs());
        }
        g
    }

    /// Insert `n` zero-coefficient variables at position `at`.
    pub fn insert_vars(&mut self, at: usize, n: usize) {
        for _ in 0..n {
            self.coeffs.insert(at, 0);
        }
    }

    /// Remove the variable at position `idx`. The coefficient must be
    /// zero; eliminating live variables is the constraint system's job.
    pub fn remove_var(&mut self, idx: usize) {
        debug_assert_eq!(self.coeffs[idx], 0);
        self.coeffs.remove(idx);
    }

    /// Grow the parameter space to `n_param`, zero-filling.
    pub fn grow_params(&mut self, n_param: usize) {
        while self.param_coeffs.len() < n_param {
            self.param_coeffs.push(0);
        }
    }

    /// Remap parameter positions: `new_param_coeffs[map[i]] += param_coeffs[i]`.
    pub fn remap_params(&mut self, map: &[usize], new_len: usize) {
        let mut new_coeffs = vec![0i64; new_len];
        for (i, &c) in self.param_coeffs.iter().enumerate() {
            if c != 0 {
                new_coeffs[map[i]] += c;
            }
        }
        self.param_coeffs = new_coeffs;
    }

    /// Render with the given variable and parameter names.
    pub fn to_string_with_names(&self, var_names: &[String], param_names: &[String]) -> String {
        let mut parts: Vec<String> = Vec::new();

        if self.constant != 0 || self.is_constant() {
            parts.push(self.constant.to_string());
        }

        let mut push_term = |c: i64, name: &str| {
            if c == 1 {
                parts.push(name.to_string());
            } else if c == -1 {
                parts.push(format!("-{}", name));
            } else {
                parts.push(format!("{}*{}", c, name));
            }
        };

        for (i, &c) in self.coeffs.iter().enumerate() {
            if c != 0 {
                let fallback = format!("d{}", i);
                let name = var_names.get(i).map(|s| s.as_str()).unwrap_or(&fallback);
                push_term(c, name);
            }
        }
        for (i, &c) in self.param_coeffs.iter().enumerate() {
            if c != 0 {
                let fallback = format!("p{}", i);
                let name = param_names.get(i).map(|s| s.as_str()).unwrap_or(&fallback);
                push_term(c, name);
            }
        }

        if parts.is_empty() {
            "0".to_string()
        } else {
            parts.join(" + ").replace("+ -", "- ")
        }
    }
}

impl Add for AffineExpr {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        assert_eq!(self.coeffs.len(), other.coeffs.len());
        assert_eq!(self.param_coeffs.len(), other.param_coeffs.len());
        Self {
            constant: self.constant + other.constant,
            coeffs: self
                .coeffs
                .iter()
                .zip(&other.coeffs)
                .map(|(&a, &b)| a + b)
                .collect(),
            param_coeffs: self
                .param_coeffs
                .iter()
                .zip(&other.param_coeffs)
                .map(|(&a, &b)| a + b)
                .collect(),
        }
    }
}

impl Sub for AffineExpr {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        self + (-other)
    }
}

impl Neg for AffineExpr {
    type Output = Self;

    fn neg(self) -> Self {
        self.scale(-1)
    }
}

impl fmt::Display for AffineExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let var_names: Vec<String> = (0..self.n_var()).map(|i| format!("d{}", i)).collect();
        let param_names: Vec<String> = (0..self.n_param()).map(|i| format!("p{}", i)).collect();
        write!(f, "{}", self.to_string_with_names(&var_names, &param_names))
    }
}
