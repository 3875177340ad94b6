//! Parsers for the ISL-syntax textual forms of sets and maps.
//!
//! The accepted grammar covers what the pipeline produces: an optional
//! parameter prefix `[N, M] ->`, a braced body of `;`-separated
//! components, tuple names, chained comparisons
//! (`0 <= i < N`) and affine expressions with `+`, `-`, `*` and
//! parentheses. Unknown identifiers become parameters.

use crate::polyhedral::constraint::Constraint;
use crate::polyhedral::expr::AffineExpr;
use crate::polyhedral::map::{Map, UnionMap};
use crate::polyhedral::set::{Set, UnionSet};
use crate::utils::errors::PolyError;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Int(i64),
    Sym(&'static str),
}

fn lex(input: &str) -> Result<Vec<Tok>, PolyError> {
    let mut toks = Vec::new();
    let bytes: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            let text: String = bytes[start..i].iter().collect();
            let value = text.parse::<i64>().map_err(|e| PolyError::Parse {
                input: input.to_string(),
                message: format!("bad integer `{}`: {}", text, e),
            })?;
            toks.push(Tok::Int(value));
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_alphanumeric() || bytes[i] == '_') {
                i += 1;
            }
            toks.push(Tok::Ident(bytes[start..i].iter().collect()));
            continue;
        }
        let two: String = bytes[i..bytes.len().min(i + 2)].iter().collect();
        let sym = match two.as_str() {
            "->" => Some("->"),
            "<=" => Some("<="),
            ">=" => Some(">="),
            _ => None,
        };
        if let Some(s) = sym {
            toks.push(Tok::Sym(s));
            i += 2;
            continue;
        }
        let one = match c {
            '{' => "{",
            '}' => "}",
            '[' => "[",
            ']' => "]",
            '(' => "(",
            ')' => ")",
            ',' => ",",
            ';' => ";",
            ':' => ":",
            '<' => "<",
            '>' => ">",
            '=' => "=",
            '+' => "+",
            '-' => "-",
            '*' => "*",
            _ => {
                return Err(PolyError::Parse {
                    input: input.to_string(),
                    message: format!("unexpected character `{}`", c),
                })
            }
        };
        toks.push(Tok::Sym(one));
        i += 1;
    }
    Ok(toks)
}

/// A linear expression with symbolic terms, resolved to an
/// [`AffineExpr`] once the full name context is known.
#[derive(Debug, Clone, Default)]
struct LinExpr {
    constant: i64,
    terms: Vec<(String, i64)>,
}

impl LinExpr {
    fn add_term(&mut self, name: &str, coeff: i64) {
        if let Some(t) = self.terms.iter_mut().find(|(n, _)| n == name) {
            t.1 += coeff;
        } else {
            self.terms.push((name.to_string(), coeff));
        }
    }

    fn combine(mut self, other: LinExpr, sign: i64) -> LinExpr {
        self.constant += sign * other.constant;
        for (name, c) in other.terms {
            self.add_term(&name, sign * c);
        }
        self
    }

    fn scale(mut self, factor: i64) -> LinExpr {
        self.constant *= factor;
        for t in &mut self.terms {
            t.1 *= factor;
        }
        self
    }

    fn is_single_ident(&self) -> Option<&str> {
        if self.constant == 0 && self.terms.len() == 1 && self.terms[0].1 == 1 {
            Some(&self.terms[0].0)
        } else {
            None
        }
    }
}

struct Parser<'a> {
    toks: Vec<Tok>,
    pos: usize,
    input: &'a str,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Result<Self, PolyError> {
        Ok(Self {
            toks: lex(input)?,
            pos: 0,
            input,
        })
    }

    fn err(&self, message: impl Into<String>) -> PolyError {
        PolyError::Parse {
            input: self.input.to_string(),
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn bump(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat_sym(&mut self, s: &str) -> bool {
        if self.peek() == Some(&Tok::Sym(match_sym(s))) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_sym(&mut self, s: &str) -> Result<(), PolyError> {
        if self.eat_sym(s) {
            Ok(())
        } else {
            Err(self.err(format!("expected `{}`, found {:?}", s, self.peek())))
        }
    }

    fn ident(&mut self) -> Option<String> {
        if let Some(Tok::Ident(name)) = self.peek().cloned() {
            self.pos += 1;
            Some(name)
        } else {
            None
        }
    }

    /// `[a, b, c]` — a bracketed name list (possibly empty or with
    /// empty entries, which are skipped).
    fn name_list(&mut self) -> Result<Vec<String>, PolyError> {
        self.expect_sym("[")?;
        let mut names = Vec::new();
        loop {
            if self.eat_sym("]") {
                break;
            }
            match self.ident() {
                Some(name) => names.push(name),
                None => {
                    if !self.eat_sym(",") {
                        return Err(self.err(format!(
                            "expected name, `,` or `]`, found {:?}",
                            self.peek()
                        )));
                    }
                    continue;
                }
            }
            self.eat_sym(",");
        }
        Ok(names)
    }

    /// Optional `[N, M] ->` parameter prefix.
    fn param_prefix(&mut self) -> Result<Vec<String>, PolyError> {
        let save = self.pos;
        if self.peek() == Some(&Tok::Sym("[")) {
            let names = self.name_list()?;
            if self.eat_sym("->") {
                return Ok(names);
            }
            self.pos = save;
        }
        Ok(Vec::new())
    }

    /// term := INT | IDENT | INT '*' factor | IDENT '*' INT | '-' term | '(' expr ')'
    fn factor(&mut self) -> Result<LinExpr, PolyError> {
        match self.bump() {
            Some(Tok::Int(v)) => {
                if self.eat_sym("*") {
                    let rhs = self.factor()?;
                    Ok(rhs.scale(v))
                } else {
                    Ok(LinExpr {
                        constant: v,
                        terms: vec![],
                    })
                }
            }
            Some(Tok::Ident(name)) => {
                let mut e = LinExpr::default();
                e.add_term(&name, 1);
                if self.eat_sym("*") {
                    match self.bump() {
                        Some(Tok::Int(v)) => Ok(e.scale(v)),
                        other => Err(self.err(format!("expected integer after `*`, found {:?}", other))),
                    }
                } else {
                    Ok(e)
                }
            }
            Some(Tok::Sym("-")) => {
                let e = self.factor()?;
                Ok(e.scale(-1))
            }
            Some(Tok::Sym("(")) => {
                let e = self.lin_expr()?;
                self.expect_sym(")")?;
                if self.eat_sym("*") {
                    match self.bump() {
                        Some(Tok::Int(v)) => Ok(e.scale(v)),
                        other => Err(self.err(format!("expected integer after `*`, found {:?}", other))),
                    }
                } else {
                    Ok(e)
                }
            }
            other => Err(self.err(format!("expected expression, found {:?}", other))),
        }
    }

    fn lin_expr(&mut self) -> Result<LinExpr, PolyError> {
        let mut acc = self.factor()?;
        loop {
            if self.eat_sym("+") {
                let rhs = self.factor()?;
                acc = acc.combine(rhs, 1);
            } else if self.eat_sym("-") {
                let rhs = self.factor()?;
                acc = acc.combine(rhs, -1);
            } else {
                return Ok(acc);
            }
        }
    }

    fn relop(&mut self) -> Option<&'static str> {
        for op in ["<=", ">=", "<", ">", "="] {
            if self.eat_sym(op) {
                return Some(match_sym(op));
            }
        }
        None
    }

    /// A chained comparison `e0 op e1 op e2 ...`; also accepts `and`
    /// separated chains (the caller loops on `and`).
    fn constraint_chain(&mut self, out: &mut Vec<(LinExpr, &'static str, LinExpr)>) -> Result<(), PolyError> {
        let mut prev = self.lin_expr()?;
        let mut any = false;
        while let Some(op) = self.relop() {
            let next = self.lin_expr()?;
            out.push((prev.clone(), op, next.clone()));
            prev = next;
            any = true;
        }
        if !any {
            return Err(self.err("expected comparison"));
        }
        Ok(())
    }

    fn condition_list(&mut self) -> Result<Vec<(LinExpr, &'static str, LinExpr)>, PolyError> {
        let mut out = Vec::new();
        loop {
            self.constraint_chain(&mut out)?;
            match self.peek() {
                Some(Tok::Ident(word)) if word == "and" => {
                    self.pos += 1;
                }
                _ => break,
            }
        }
        Ok(out)
    }
}

fn match_sym(s: &str) -> &'static str {
    match s {
        "->" => "->",
        "<=" => "<=",
        ">=" => ">=",
        "{" => "{",
        "}" => "}",
        "[" => "[",
        "]" => "]",
        "(" => "(",
        ")" => ")",
        "," => ",",
        ";" => ";",
        ":" => ":",
        "<" => "<",
        ">" => ">",
        "=" => "=",
        "+" => "+",
        "-" => "-",
        "*" => "*",
        _ => unreachable!("unknown symbol {}", s),
    }
}

/// Resolve a [`LinExpr`] into an [`AffineExpr`] over `vars`/`params`,
/// appending unknown names to `params`.
fn resolve(e: &LinExpr, vars: &[String], params: &mut Vec<String>) -> AffineExpr {
    let mut coeffs = vec![0i64; vars.len()];
    let mut param_terms: Vec<(usize, i64)> = Vec::new();
    for (name, c) in &e.terms {
        if let Some(idx) = vars.iter().position(|v| v == name) {
            coeffs[idx] += c;
        } else {
            let idx = match params.iter().position(|p| p == name) {
                Some(idx) => idx,
                None => {
                    params.push(name.clone());
                    params.len() - 1
                }
            };
            param_terms.push((idx, *c));
        }
    }
    let mut out = AffineExpr {
        constant: e.constant,
        coeffs,
        param_coeffs: vec![0; params.len()],
    };
    for (idx, c) in param_terms {
        out.param_coeffs[idx] += c;
    }
    out
}

fn build_constraints(
    conds: &[(LinExpr, &'static str, LinExpr)],
    vars: &[String],
    params: &mut Vec<String>,
) -> Vec<Constraint> {
    let mut out = Vec::new();
    for (lhs, op, rhs) in conds {
        let mut l = resolve(lhs, vars, params);
        let mut r = resolve(rhs, vars, params);
        // the right side may have introduced parameters the left side
        // does not know about yet
        l.grow_params(params.len());
        r.grow_params(params.len());
        out.push(match *op {
            "<=" => Constraint::ge(r.clone(), l.clone()),
            "<" => {
                let mut c = Constraint::ge(r.clone(), l.clone());
                c.expr.constant -= 1;
                c
            }
            ">=" => Constraint::ge(l.clone(), r.clone()),
            ">" => {
                let mut c = Constraint::ge(l.clone(), r.clone());
                c.expr.constant -= 1;
                c
            }
            "=" => Constraint::eq(l.clone(), r.clone()),
            _ => unreachable!(),
        });
    }
    // grow every constraint to the final parameter count
    for c in &mut out {
        c.expr.grow_params(params.len());
    }
    out.into_iter().map(|c| c.normalize()).collect()
}

/// Parse a single set.
pub fn parse_set(input: &str) -> Result<Set, PolyError> {
    let union = parse_union_set(input)?;
    match union.sets().len() {
        1 => Ok(union.sets()[0].clone()),
        n => Err(PolyError::Parse {
            input: input.to_string(),
            message: format!("expected a single set, found {} components", n),
        }),
    }
}

/// Parse a union of sets.
pub fn parse_union_set(input: &str) -> Result<UnionSet, PolyError> {
    let mut p = Parser::new(input)?;
    let prefix = p.param_prefix()?;
    p.expect_sym("{")?;
    let mut result = UnionSet::empty();
    loop {
        if p.eat_sym("}") {
            break;
        }
        let tuple = p.ident();
        let dims = p.name_list()?;
        let mut params = prefix.clone();
        let mut constraints = Vec::new();
        if p.eat_sym(":") {
            if !matches!(p.peek(), Some(Tok::Sym("}")) | Some(Tok::Sym(";"))) {
                let conds = p.condition_list()?;
                constraints = build_constraints(&conds, &dims, &mut params);
            }
        }
        result.add_set(Set {
            tuple,
            dims,
            params,
            constraints,
        });
        if p.eat_sym(";") {
            continue;
        }
    }
    Ok(result)
}

/// Parse a single map.
pub fn parse_map(input: &str) -> Result<Map, PolyError> {
    let union = parse_union_map(input)?;
    match union.maps().len() {
        1 => Ok(union.maps()[0].clone()),
        n => Err(PolyError::Parse {
            input: input.to_string(),
            message: format!("expected a single map, found {} components", n),
        }),
    }
}

/// Parse a union of maps.
pub fn parse_union_map(input: &str) -> Result<UnionMap, PolyError> {
    let mut p = Parser::new(input)?;
    let prefix = p.param_prefix()?;
    p.expect_sym("{")?;
    let mut result = UnionMap::empty();
    loop {
        if p.eat_sym("}") {
            break;
        }
        let in_tuple = p.ident();
        let in_dims = p.name_list()?;
        p.expect_sym("->")?;
        let out_tuple = p.ident();

        // output components: bare names or affine expressions
        p.expect_sym("[")?;
        let mut out_exprs: Vec<LinExpr> = Vec::new();
        loop {
            if p.eat_sym("]") {
                break;
            }
            out_exprs.push(p.lin_expr()?);
            if p.eat_sym(",") {
                continue;
            }
        }

        let mut out_dims: Vec<String> = Vec::new();
        let mut implied: Vec<(usize, LinExpr)> = Vec::new();
        for (k, e) in out_exprs.iter().enumerate() {
            match e.is_single_ident() {
                Some(name) if !in_dims.iter().any(|d| d == name) => {
                    // fresh output dimension
                    out_dims.push(name.to_string());
                }
                Some(name) => {
                    // same-name reference to an input dimension
                    out_dims.push(name.to_string());
                    implied.push((k, e.clone()));
                }
                None => {
                    out_dims.push(format!("o{}", k));
                    implied.push((k, e.clone()));
                }
            }
        }

        let mut params = prefix.clone();
        let mut vars = in_dims.clone();
        vars.extend(out_dims.iter().cloned());
        let n_in = in_dims.len();

        let mut constraints: Vec<Constraint> = Vec::new();
        for (k, e) in &implied {
            // out_k = e, where e is resolved over the *input* dims only
            let rhs = resolve(e, &in_dims, &mut params);
            let mut expr = AffineExpr::zero(vars.len(), params.len());
            expr.coeffs[n_in + k] = 1;
            for (i, &c) in rhs.coeffs.iter().enumerate() {
                expr.coeffs[i] -= c;
            }
            expr.constant = -rhs.constant;
            expr.param_coeffs = rhs.param_coeffs.iter().map(|&c| -c).collect();
            constraints.push(Constraint::eq_zero(expr));
        }

        if p.eat_sym(":") {
            if !matches!(p.peek(), Some(Tok::Sym("}")) | Some(Tok::Sym(";"))) {
                let conds = p.condition_list()?;
                constraints.extend(build_constraints(&conds, &vars, &mut params));
            }
        }
        for c in &mut constraints {
            c.expr.grow_params(params.len());
        }

        result.add_map(Map {
            in_tuple,
            in_dims,
            out_tuple,
            out_dims,
            params,
            constraints: constraints.into_iter().map(|c| c.normalize()).collect(),
        });
        if p.eat_sym(";") {
            continue;
        }
    }
    Ok(result)
}

/// Intersect a set with constraints parsed from `cond` over the set's
/// dimensions, e.g. `append_cond(&s, "i > 0")`.
pub fn append_cond(set: &Set, cond: &str) -> Result<Set, PolyError> {
    let mut p = Parser::new(cond)?;
    let conds = p.condition_list()?;
    let mut result = set.clone();
    let mut params = result.params.clone();
    let new = build_constraints(&conds, &result.dims, &mut params);
    for c in &mut result.constraints {
        c.expr.grow_params(params.len());
    }
    result.params = params;
    for c in new {
        result.constraints.push(c);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chained_comparison() {
        let s = parse_set("{ [ii0] : 0 <= ii0 < 20 }").unwrap();
        assert!(s.contains(&[0], &[]));
        assert!(s.contains(&[19], &[]));
        assert!(!s.contains(&[20], &[]));
        assert!(!s.contains(&[-1], &[]));
    }

    #[test]
    fn test_params_from_prefix_and_body() {
        let s = parse_set("[N] -> { S0[i] : 0 <= i < N }").unwrap();
        assert_eq!(s.param_names(), &["N".to_string()]);
        assert!(s.contains(&[9], &[10]));
        assert!(!s.contains(&[10], &[10]));
    }

    #[test]
    fn test_unknown_name_becomes_param() {
        let s = parse_set("{ S0[i] : 0 <= i < M }").unwrap();
        assert_eq!(s.param_names(), &["M".to_string()]);
    }

    #[test]
    fn test_union_map() {
        let m =
            parse_union_map("{ S0[i, j] -> out[i, j]; S0[i, j] -> x[i, k] }").unwrap();
        assert_eq!(m.maps().len(), 2);
        assert_eq!(m.maps()[0].out_tuple_name(), Some("out"));
        // `k` is not an input dim, so it is a fresh output dim
        assert_eq!(m.maps()[1].out_dim_names()[1], "k");
    }

    #[test]
    fn test_map_with_expression_output() {
        let m = parse_map("{ S0[i] -> a[i + 1] }").unwrap();
        assert_eq!(m.out_dim_names(), &["o0".to_string()]);
        let img = crate::polyhedral::set::Set::parse("{ S0[i] : 0 <= i < 3 }")
            .unwrap()
            .apply(&m);
        assert!(img.contains(&[1], &[]));
        assert!(img.contains(&[3], &[]));
        assert!(!img.contains(&[0], &[]));
    }

    #[test]
    fn test_parenthesised_expr() {
        let m = parse_map("{ [ii0] -> [i] : ii0 = (i + 1) }").unwrap();
        assert_eq!(m.n_out(), 1);
    }

    #[test]
    fn test_append_cond() {
        let s = parse_set("{ S0[i] : 0 <= i < 10 }").unwrap();
        let s = append_cond(&s, "i > 0").unwrap();
        assert!(!s.contains(&[0], &[]));
        assert!(s.contains(&[1], &[]));
    }
}
