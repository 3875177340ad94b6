//! Loop-AST synthesis from a schedule tree.
//!
//! Each band of the schedule is lowered to a perfect loop nest scanned
//! over the image of the statements' domains under their schedule
//! maps. Loop bounds come from projecting the scheduled set onto each
//! dimension prefix; inner bounds may reference outer iterators
//! (split/tile remainders show up as `min(...)` upper bounds). User
//! nodes carry the statement name and the scheduled index expression
//! of every original iterator; an `at_each_domain` callback observes
//! (and may replace) every user node as it is created.

use crate::polyhedral::constraint::Constraint;
use crate::polyhedral::expr::AffineExpr;
use crate::polyhedral::map::Map;
use crate::polyhedral::set::Set;
use crate::transform::scheduler::{Schedule, ScheduleNode};
use crate::transform::tiling::tile_schedule;
use indexmap::IndexMap;
use tracing::debug;

/// Binary operators of the loop AST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum AstBinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

/// Expression in the loop AST.
#[derive(Debug, Clone, PartialEq)]
pub enum AstExpr {
    /// Integer literal.
    Int(i64),
    /// Iterator or parameter reference.
    Var(String),
    /// Binary operation.
    Binary {
        /// Operator.
        op: AstBinOp,
        /// Left operand.
        left: Box<AstExpr>,
        /// Right operand.
        right: Box<AstExpr>,
    },
    /// Minimum of two expressions.
    Min(Box<AstExpr>, Box<AstExpr>),
    /// Maximum of two expressions.
    Max(Box<AstExpr>, Box<AstExpr>),
    /// Floor division.
    FloorDiv(Box<AstExpr>, Box<AstExpr>),
    /// Ceiling division.
    CeilDiv(Box<AstExpr>, Box<AstExpr>),
}

impl AstExpr {
    /// Integer literal.
    pub fn int(v: i64) -> Self {
        Self::Int(v)
    }

    /// Named variable.
    pub fn var(name: &str) -> Self {
        Self::Var(name.to_string())
    }

    fn bin(op: AstBinOp, l: AstExpr, r: AstExpr) -> Self {
        Self::Binary {
            op,
            left: Box::new(l),
            right: Box::new(r),
        }
    }
}

/// Statement node of the loop AST.
#[derive(Debug, Clone)]
pub enum AstNode {
    /// Sequential statements.
    Block(Vec<AstNode>),
    /// A counted loop with unit increment.
    For {
        /// Iterator name (`c0`, `c1`, ...).
        iterator: String,
        /// Initial value.
        init: AstExpr,
        /// The whole continuation condition (a comparison).
        cond: AstExpr,
        /// Increment added each round.
        inc: AstExpr,
        /// Loop body.
        body: Box<AstNode>,
    },
    /// A guard.
    If {
        /// Condition.
        cond: AstExpr,
        /// Guarded statement.
        then: Box<AstNode>,
        /// Optional alternative.
        else_: Option<Box<AstNode>>,
    },
    /// A statement instance `stmt(args...)`.
    User {
        /// Statement (stage) name.
        stmt: String,
        /// Scheduled index expressions, one per domain iterator.
        args: Vec<AstExpr>,
    },
    /// An annotation wrapping a child.
    Mark {
        /// Annotation id.
        id: String,
        /// Wrapped node.
        child: Box<AstNode>,
    },
}

/// Per-statement polyhedral inputs to the AST build.
#[derive(Debug, Clone)]
pub struct StagePoly {
    /// The statement's iteration domain.
    pub domain: Set,
    /// Its schedule map (domain space to scheduled space).
    pub schedule: Map,
}

/// Information handed to the `at_each_domain` callback for each user
/// node.
#[derive(Debug)]
pub struct AstBuildInfo<'a> {
    /// Statement name of the user node.
    pub stmt: &'a str,
    /// `(domain iterator name, scheduled index expression)` pairs in
    /// domain-dimension order.
    pub index_exprs: &'a [(String, AstExpr)],
}

/// Builder turning a [`Schedule`] into an [`AstNode`] tree.
#[derive(Default)]
pub struct AstBuild<'f> {
    #[allow(clippy::type_complexity)]
    at_each_domain: Option<Box<dyn FnMut(AstNode, &AstBuildInfo<'_>) -> AstNode + 'f>>,
}

impl<'f> AstBuild<'f> {
    /// A builder with no callback installed.
    pub fn new() -> Self {
        Self {
            at_each_domain: None,
        }
    }

    /// Install the per-user-node callback. It receives each user node
    /// together with its index expressions and returns the node to
    /// place in the tree.
    pub fn set_at_each_domain(
        &mut self,
        cb: impl FnMut(AstNode, &AstBuildInfo<'_>) -> AstNode + 'f,
    ) {
        self.at_each_domain = Some(Box::new(cb));
    }

    /// Lower a schedule tree over the given per-statement inputs.
    pub fn node_from_schedule(
        &mut self,
        schedule: &Schedule,
        parts: &IndexMap<String, StagePoly>,
    ) -> AstNode {
        self.build_node(&schedule.root, parts)
    }

    fn build_node(&mut self, node: &ScheduleNode, parts: &IndexMap<String, StagePoly>) -> AstNode {
        match node {
            ScheduleNode::Sequence { children } => {
                let nodes = children.iter().map(|c| self.build_node(c, parts)).collect();
                AstNode::Block(nodes)
            }
            ScheduleNode::Band { stmts, tile } => self.build_band(stmts, tile, parts),
        }
    }

    fn build_band(
        &mut self,
        stmts: &[String],
        tile: &[(String, i64)],
        parts: &IndexMap<String, StagePoly>,
    ) -> AstNode {
        assert!(!stmts.is_empty());
        struct Scheduled {
            name: String,
            set: Set,
            index_exprs: Vec<(String, AstExpr)>,
        }

        let mut scheduled: Vec<Scheduled> = Vec::new();
        for name in stmts {
            let part = parts
                .get(name)
                .unwrap_or_else(|| panic!("no polyhedral input for statement `{}`", name));
            let eff = if tile.is_empty() {
                part.schedule.clone()
            } else {
                tile_schedule(&part.schedule, tile)
            };
            let mut set = eff.intersect_domain(&part.domain).range_set();
            let n = set.n_dim();
            for k in 0..n {
                set.set_dim_name(k, &iter_name(k));
            }
            let iter_names: Vec<String> = (0..n).map(iter_name).collect();
            let solutions = eff.in_dim_exprs().unwrap_or_else(|| {
                panic!(
                    "cannot express domain iterators of `{}` in scheduled coordinates",
                    name
                )
            });
            let index_exprs: Vec<(String, AstExpr)> = part
                .domain
                .dim_names()
                .iter()
                .zip(solutions.iter())
                .map(|(dim, aff)| {
                    (
                        dim.clone(),
                        affine_to_ast(aff, &iter_names, eff.param_names()),
                    )
                })
                .collect();
            debug!(stmt = %name, set = %set, "scheduled statement");
            scheduled.push(Scheduled {
                name: name.clone(),
                set,
                index_exprs,
            });
        }

        let n = scheduled[0].set.n_dim();
        for s in &scheduled {
            assert_eq!(
                s.set.n_dim(),
                n,
                "band statements must share the scheduled dimensionality"
            );
        }

        // the first statement's bounds drive the loop nest; others get
        // guards for whatever their own sets additionally require
        let skeleton_keys = constraint_keys(&scheduled[0].set);
        let mut body_nodes: Vec<AstNode> = Vec::new();
        for s in &scheduled {
            let user = AstNode::User {
                stmt: s.name.clone(),
                args: s.index_exprs.iter().map(|(_, e)| e.clone()).collect(),
            };
            let info = AstBuildInfo {
                stmt: &s.name,
                index_exprs: &s.index_exprs,
            };
            let user = match &mut self.at_each_domain {
                Some(cb) => cb(user, &info),
                None => user,
            };
            let extra: Vec<&crate::polyhedral::constraint::Constraint> = s
                .set
                .constraints()
                .iter()
                .filter(|c| !skeleton_keys.contains(&constraint_key(c, &s.set)))
                .collect();
            let node = if extra.is_empty() {
                user
            } else {
                let iter_names: Vec<String> = (0..n).map(iter_name).collect();
                let mut cond: Option<AstExpr> = None;
                for c in extra {
                    let lhs = affine_to_ast(&c.expr, &iter_names, s.set.param_names());
                    let op = if c.is_equality() {
                        AstBinOp::Eq
                    } else {
                        AstBinOp::Ge
                    };
                    let piece = AstExpr::bin(op, lhs, AstExpr::int(0));
                    cond = Some(match cond {
                        Some(acc) => AstExpr::bin(AstBinOp::And, acc, piece),
                        None => piece,
                    });
                }
                AstNode::If {
                    cond: cond.unwrap(),
                    then: Box::new(user),
                    else_: None,
                }
            };
            body_nodes.push(node);
        }

        let mut inner = if body_nodes.len() == 1 {
            body_nodes.into_iter().next().unwrap()
        } else {
            AstNode::Block(body_nodes)
        };

        let full = &scheduled[0].set;
        let levels: Vec<Set> = (0..n).map(|k| full.project_onto_prefix(k + 1)).collect();
        for k in (0..n).rev() {
            let ctx = level_context(&levels, k);
            let (init, upper) = level_bounds(&ctx, k, &levels[k]);
            let cond = AstExpr::bin(AstBinOp::Le, AstExpr::var(&iter_name(k)), upper);
            inner = AstNode::For {
                iterator: iter_name(k),
                init,
                cond,
                inc: AstExpr::int(1),
                body: Box::new(inner),
            };
        }
        inner
    }
}

fn iter_name(k: usize) -> String {
    format!("c{}", k)
}

/// The constraints visible while scanning dimension `k`: the level's
/// own projection plus every outer level's constraints, embedded into
/// the `k + 1`-dimensional space. Inner loop bounds may rely on facts
/// the outer loops already establish (`c0 >= 0` makes a `c1 >= -8*c0`
/// byproduct of substitution redundant).
fn level_context(levels: &[Set], k: usize) -> Vec<Constraint> {
    let mut ctx: Vec<Constraint> = levels[k].constraints().to_vec();
    for level in levels[..k].iter() {
        let missing = k + 1 - level.n_dim();
        for c in level.constraints() {
            let mut c = c.clone();
            c.expr.insert_vars(level.n_dim(), missing);
            if !ctx.contains(&c) {
                ctx.push(c);
            }
        }
    }
    ctx
}

/// Lower and upper bound expressions for dimension `k`, with
/// redundant inequality bounds removed against the remaining context.
fn level_bounds(ctx: &[Constraint], k: usize, level: &Set) -> (AstExpr, AstExpr) {
    let names: Vec<String> = level.dim_names().to_vec();
    let mut removed = vec![false; ctx.len()];
    for (idx, c) in ctx.iter().enumerate() {
        if c.expr.coeff(k) == 0 || c.is_equality() {
            continue;
        }
        let mut test: Vec<Constraint> = ctx
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != idx && !removed[*i])
            .map(|(_, c)| c.clone())
            .collect();
        let mut neg = -c.expr.clone();
        neg.constant -= 1;
        test.push(Constraint::ge_zero(neg));
        let probe = Set {
            tuple: None,
            dims: names.clone(),
            params: level.param_names().to_vec(),
            constraints: test,
        };
        if probe.is_empty_exact() {
            removed[idx] = true;
        }
    }

    let mut lowers: Vec<AstExpr> = Vec::new();
    let mut uppers: Vec<AstExpr> = Vec::new();
    for (idx, c) in ctx.iter().enumerate() {
        if removed[idx] {
            continue;
        }
        let coeff = c.expr.coeff(k);
        if coeff == 0 {
            continue;
        }
        // rest = expr without the k term
        let mut rest = c.expr.clone();
        rest.coeffs[k] = 0;
        if c.is_equality() {
            // coeff*k + rest = 0  =>  k = -rest/coeff
            let numerator = if coeff > 0 { rest.scale(-1) } else { rest.clone() };
            let value = div_ast(&numerator, coeff.abs(), level, &names, false);
            lowers.push(value.clone());
            uppers.push(value);
        } else if coeff > 0 {
            // coeff*k >= -rest  =>  k >= ceil(-rest / coeff)
            lowers.push(div_ast(&rest.scale(-1), coeff, level, &names, true));
        } else {
            // |coeff|*k <= rest  =>  k <= floor(rest / |coeff|)
            uppers.push(div_ast(&rest, -coeff, level, &names, false));
        }
    }
    let init = lowers
        .into_iter()
        .reduce(|a, b| AstExpr::Max(Box::new(a), Box::new(b)))
        .unwrap_or_else(|| panic!("dimension {} of {} has no lower bound", k, level));
    let upper = uppers
        .into_iter()
        .reduce(|a, b| AstExpr::Min(Box::new(a), Box::new(b)))
        .unwrap_or_else(|| panic!("dimension {} of {} has no upper bound", k, level));
    (init, upper)
}

fn div_ast(e: &AffineExpr, divisor: i64, set: &Set, names: &[String], ceil: bool) -> AstExpr {
    debug_assert!(divisor > 0);
    let numerator = affine_to_ast(e, names, set.param_names());
    if divisor == 1 {
        numerator
    } else if ceil {
        AstExpr::CeilDiv(Box::new(numerator), Box::new(AstExpr::int(divisor)))
    } else {
        AstExpr::FloorDiv(Box::new(numerator), Box::new(AstExpr::int(divisor)))
    }
}

/// Render an affine expression as an AST expression over named
/// dimensions and parameters.
pub fn affine_to_ast(e: &AffineExpr, dim_names: &[String], param_names: &[String]) -> AstExpr {
    let mut acc: Option<AstExpr> = None;
    let mut push = |term: AstExpr, coeff: i64, acc: &mut Option<AstExpr>| {
        if coeff == 0 {
            return;
        }
        let magnitude = if coeff.abs() == 1 {
            term
        } else {
            AstExpr::bin(AstBinOp::Mul, AstExpr::int(coeff.abs()), term)
        };
        *acc = Some(match acc.take() {
            None => {
                if coeff < 0 {
                    AstExpr::bin(AstBinOp::Sub, AstExpr::int(0), magnitude)
                } else {
                    magnitude
                }
            }
            Some(prev) => {
                let op = if coeff < 0 { AstBinOp::Sub } else { AstBinOp::Add };
                AstExpr::bin(op, prev, magnitude)
            }
        });
    };

    if e.constant != 0 {
        acc = Some(AstExpr::int(e.constant));
    }
    for (i, &c) in e.coeffs.iter().enumerate() {
        push(AstExpr::var(&dim_names[i]), c, &mut acc);
    }
    for (i, &c) in e.param_coeffs.iter().enumerate() {
        let fallback = format!("p{}", i);
        let name = param_names.get(i).map(|s| s.as_str()).unwrap_or(&fallback);
        push(AstExpr::var(name), c, &mut acc);
    }
    acc.unwrap_or(AstExpr::Int(0))
}

type ConstraintKey = (
    crate::polyhedral::constraint::ConstraintKind,
    Vec<i64>,
    Vec<(String, i64)>,
    i64,
);

fn constraint_key(c: &crate::polyhedral::constraint::Constraint, set: &Set) -> ConstraintKey {
    let mut params: Vec<(String, i64)> = set
        .param_names()
        .iter()
        .enumerate()
        .map(|(i, n)| (n.clone(), c.expr.param_coeffs.get(i).copied().unwrap_or(0)))
        .filter(|(_, v)| *v != 0)
        .collect();
    params.sort();
    (c.kind, c.expr.coeffs.clone(), params, c.expr.constant)
}

fn constraint_keys(set: &Set) -> Vec<ConstraintKey> {
    set.constraints()
        .iter()
        .map(|c| constraint_key(c, set))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polyhedral::set::UnionSet;
    use crate::transform::scheduler::ScheduleConstraints;

    fn single_part(domain: &str) -> (Schedule, IndexMap<String, StagePoly>) {
        let set = Set::parse(domain).unwrap();
        let name = set.tuple_name().unwrap().to_string();
        let schedule = set.identity();
        let mut parts = IndexMap::new();
        parts.insert(
            name,
            StagePoly {
                domain: set.clone(),
                schedule,
            },
        );
        let sched = ScheduleConstraints::on_domain(UnionSet::from_set(set))
            .compute_schedule()
            .unwrap();
        (sched, parts)
    }

    #[test]
    fn test_rectangular_band() {
        let (sched, parts) = single_part("{ S0[i, j] : 0 <= i < 20 and 0 <= j < 40 }");
        let mut build = AstBuild::new();
        let ast = build.node_from_schedule(&sched, &parts);
        // expect for c0 { for c1 { S0(c0, c1) } }
        let AstNode::For { iterator, init, cond, body, .. } = &ast else {
            panic!("expected outer loop");
        };
        assert_eq!(iterator, "c0");
        assert_eq!(*init, AstExpr::Int(0));
        assert_eq!(
            *cond,
            AstExpr::Binary {
                op: AstBinOp::Le,
                left: Box::new(AstExpr::var("c0")),
                right: Box::new(AstExpr::Int(19)),
            }
        );
        let AstNode::For { body: inner, .. } = body.as_ref() else {
            panic!("expected inner loop");
        };
        let AstNode::User { stmt, args } = inner.as_ref() else {
            panic!("expected user node");
        };
        assert_eq!(stmt, "S0");
        assert_eq!(args[0], AstExpr::var("c0"));
        assert_eq!(args[1], AstExpr::var("c1"));
    }

    #[test]
    fn test_split_band_bounds() {
        let set = Set::parse("{ S0[i] : 0 <= i < 100 }").unwrap();
        let schedule = crate::transform::tiling::tile_schedule(
            &set.identity(),
            &[("i".to_string(), 8)],
        );
        let mut parts = IndexMap::new();
        parts.insert(
            "S0".to_string(),
            StagePoly {
                domain: set.clone(),
                schedule,
            },
        );
        let sched = ScheduleConstraints::on_domain(UnionSet::from_set(set))
            .compute_schedule()
            .unwrap();
        let mut build = AstBuild::new();
        let ast = build.node_from_schedule(&sched, &parts);
        let AstNode::For { cond, body, .. } = &ast else {
            panic!("expected outer tile loop");
        };
        // outer bound floor(99/8) = 12
        assert_eq!(
            *cond,
            AstExpr::Binary {
                op: AstBinOp::Le,
                left: Box::new(AstExpr::var("c0")),
                right: Box::new(AstExpr::Int(12)),
            }
        );
        // inner bound is a min() with the remainder guard
        let AstNode::For { cond: inner_cond, body: inner_body, .. } = body.as_ref() else {
            panic!("expected inner loop");
        };
        match inner_cond {
            AstExpr::Binary { op: AstBinOp::Le, right, .. } => {
                assert!(matches!(right.as_ref(), AstExpr::Min(_, _)));
            }
            other => panic!("unexpected inner cond {:?}", other),
        }
        // index expression is 8*c0 + c1
        let AstNode::User { args, .. } = inner_body.as_ref() else {
            panic!("expected user node");
        };
        assert_eq!(
            args[0],
            AstExpr::Binary {
                op: AstBinOp::Add,
                left: Box::new(AstExpr::Binary {
                    op: AstBinOp::Mul,
                    left: Box::new(AstExpr::Int(8)),
                    right: Box::new(AstExpr::var("c0")),
                }),
                right: Box::new(AstExpr::var("c1")),
            }
        );
    }

    #[test]
    fn test_callback_sees_index_exprs() {
        let (sched, parts) = single_part("{ S0[i] : 0 <= i < 4 }");
        let mut seen: Vec<(String, usize)> = Vec::new();
        {
            let mut build = AstBuild::new();
            build.set_at_each_domain(|node, info| {
                seen.push((info.stmt.to_string(), info.index_exprs.len()));
                node
            });
            build.node_from_schedule(&sched, &parts);
        }
        assert_eq!(seen, vec![("S0".to_string(), 1)]);
    }
}
