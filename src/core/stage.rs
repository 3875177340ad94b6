//! Stages: one statement-like unit of computation with its own
//! iteration domain, schedule and access relations.

use crate::codegen::ast_builder::{AstBuild, StagePoly};
use crate::codegen::ast_to_ir::{ast_expr_to_expr, ast_to_expr, replace_expr_with_stage};
use crate::codegen::c::CCodeGen;
use crate::context::with_context;
use crate::ir::expr::{Expr, ExprKind, ExprTag, Var};
use crate::ir::printer::dump;
use crate::polyhedral::map::{Map, UnionMap};
use crate::polyhedral::set::{Set, UnionSet};
use crate::transform::scheduler::ScheduleConstraints;
use crate::transform::tiling::split_map;
use crate::utils::errors::{PolyError, TransformError};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

/// How a stage participates in scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageType {
    /// Assignment-family stages scheduled polyhedrally.
    Polyhedral,
    /// Call and allocation stages emitted as-is.
    FunctionCall,
    /// Anything else.
    Unk,
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageType::Polyhedral => "polyhedral",
            StageType::FunctionCall => "function_call",
            StageType::Unk => "unk",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Default)]
struct StageData {
    name: String,
    expr: Option<Expr>,
    iter_domain: Option<Set>,
    schedule: Option<Map>,
    read_access: Option<UnionMap>,
    write_access: Option<UnionMap>,
    tiles: IndexMap<String, i64>,
    tile_sizes: Vec<i64>,
    transposes: Vec<(String, String)>,
    fuse_with: Vec<String>,
    index_map: IndexMap<String, Expr>,
}

/// A shared handle to one stage. Cloning shares the underlying data;
/// the stage registry and AST callbacks mutate it in place.
#[derive(Debug, Clone, Default)]
pub struct Stage {
    data: Rc<RefCell<StageData>>,
}

impl Stage {
    /// Create a stage from an expression. The stage gets a generated
    /// unique name, its iteration domain is extracted from the
    /// references inside the expression, and (for assignment-family
    /// expressions) the identity schedule and read/write accesses are
    /// initialised. The stage registers itself in the context.
    pub fn new(expr: Expr) -> Stage {
        let stage = Stage::default();
        {
            let mut data = stage.data.borrow_mut();
            data.name = with_context(|ctx| ctx.names.new_stage_name());
            data.expr = Some(expr.clone());
        }
        debug!(stage = %stage.name(), expr = %expr, "stage created");

        stage.extract_domain_from_expr(&expr);
        if expr.is_assign_derived() {
            stage.init_schedule();
            stage.init_read_dependencies();
            stage.init_write_dependencies();
        }
        with_context(|ctx| ctx.register_stage(stage.clone()));
        stage
    }

    /// Create a stage from an explicit name and iteration-domain
    /// string in integer-set syntax.
    pub fn with_domain(name: &str, iter_domain: &str) -> Result<Stage, PolyError> {
        assert!(!name.is_empty(), "empty stage name");
        assert!(!iter_domain.is_empty(), "empty iteration domain for `{}`", name);
        let mut set = Set::parse(iter_domain)?;
        set.set_tuple_name(name);
        let stage = Stage::default();
        {
            let mut data = stage.data.borrow_mut();
            data.name = name.to_string();
            data.iter_domain = Some(set);
        }
        stage.init_schedule();
        with_context(|ctx| ctx.register_stage(stage.clone()));
        Ok(stage)
    }

    /// The stage's unique name.
    pub fn name(&self) -> String {
        self.data.borrow().name.clone()
    }

    /// The expression this stage computes, if any.
    pub fn expr(&self) -> Option<Expr> {
        self.data.borrow().expr.clone()
    }

    /// The iteration domain.
    pub fn iter_domain(&self) -> Option<Set> {
        self.data.borrow().iter_domain.clone()
    }

    /// The schedule map (before interchange requests are applied).
    pub fn schedule(&self) -> Option<Map> {
        self.data.borrow().schedule.clone()
    }

    /// Read access union-map.
    pub fn read_access(&self) -> Option<UnionMap> {
        self.data.borrow().read_access.clone()
    }

    /// Write access union-map.
    pub fn write_access(&self) -> Option<UnionMap> {
        self.data.borrow().write_access.clone()
    }

    /// Per-iterator tile widths requested so far.
    pub fn tiles(&self) -> IndexMap<String, i64> {
        self.data.borrow().tiles.clone()
    }

    /// Ordered tile sizes requested so far.
    pub fn tile_sizes(&self) -> Vec<i64> {
        self.data.borrow().tile_sizes.clone()
    }

    /// Names of the stages this one asked to fuse with.
    pub fn stages_fuse_with(&self) -> Vec<String> {
        self.data.borrow().fuse_with.clone()
    }

    /// How this stage is scheduled.
    pub fn stage_type(&self) -> StageType {
        let data = self.data.borrow();
        match &data.expr {
            None => StageType::Polyhedral,
            Some(e) if e.is_assign_derived() => StageType::Polyhedral,
            Some(e) => match e.tag() {
                ExprTag::Call | ExprTag::Allocate => StageType::FunctionCall,
                _ => StageType::Unk,
            },
        }
    }

    // ---- transformation requests --------------------------------------

    /// Record an interchange request between two iterator names.
    pub fn interchange(&self, a: &Var, b: &Var) {
        self.interchange_names(a.name(), b.name());
    }

    /// Record an interchange request between two dimension names.
    pub fn interchange_names(&self, a: &str, b: &str) {
        self.data
            .borrow_mut()
            .transposes
            .push((a.to_string(), b.to_string()));
    }

    /// Request tiling of one iterator.
    pub fn tile(&self, iter: &Var, width: i64) {
        self.data
            .borrow_mut()
            .tiles
            .insert(iter.name().to_string(), width);
    }

    /// Request tiling with ordered sizes, outermost first.
    pub fn tile_with_sizes(&self, sizes: Vec<i64>) {
        self.data.borrow_mut().tile_sizes = sizes;
    }

    /// Split iterator `iter` of the schedule's output space into
    /// `iter_` (the quotient) and `iter__` (the remainder modulo
    /// `size`). The new schedule is `old_schedule ∘ transform`.
    pub fn split(&self, iter: &Var, size: i64) -> Result<(), TransformError> {
        assert!(size > 0, "split size must be positive");
        let mut data = self.data.borrow_mut();
        let schedule = data
            .schedule
            .as_ref()
            .expect("stage has no schedule to split");
        let out_tuple = schedule.out_tuple_name().map(|s| s.to_string());
        let dims = schedule.out_dim_names().to_vec();
        let transform =
            split_map(out_tuple.as_deref(), &dims, iter.name(), size).ok_or_else(|| {
                TransformError::UnknownIterator {
                    iter: iter.name().to_string(),
                    stage: data.name.clone(),
                }
            })?;
        let new_schedule = schedule
            .apply_range(&transform)
            .expect("split transform must compose with the schedule");
        debug!(stage = %data.name, schedule = %new_schedule, "schedule after split");
        data.schedule = Some(new_schedule);
        Ok(())
    }

    /// Intersect the iteration domain with `"<iter> <cond>"`, e.g.
    /// `set_cond(&i, "> 0")`.
    pub fn set_cond(&self, iter: &Var, cond: &str) -> Result<(), PolyError> {
        self.append_domain_cond(&format!("{} {}", iter.name(), cond))
    }

    /// Intersect the iteration domain with `"<expr> <cond>"`.
    pub fn set_cond_expr(&self, expr: &Expr, cond: &str) -> Result<(), PolyError> {
        self.append_domain_cond(&format!("{} {}", dump(expr), cond))
    }

    fn append_domain_cond(&self, cond: &str) -> Result<(), PolyError> {
        let mut data = self.data.borrow_mut();
        let domain = data
            .iter_domain
            .as_ref()
            .expect("stage has no iteration domain");
        let updated = domain.append_cond(cond)?;
        debug!(stage = %data.name, domain = %updated, "domain restricted");
        data.iter_domain = Some(updated);
        Ok(())
    }

    /// Add a fusion target, resolved at snippet level.
    pub fn fuse_with(&self, name: &str) {
        self.data.borrow_mut().fuse_with.push(name.to_string());
    }

    // ---- scheduling support -------------------------------------------

    /// The schedule with recorded interchange requests applied.
    pub fn collected_schedule(&self) -> Map {
        let data = self.data.borrow();
        let mut schedule = data
            .schedule
            .clone()
            .expect("stage has no schedule");
        for (a, b) in &data.transposes {
            schedule
                .swap_out_dims(a, b)
                .unwrap_or_else(|e| panic!("interchange on stage `{}`: {}", data.name, e));
        }
        schedule
    }

    pub(crate) fn set_index_map(&self, map: IndexMap<String, Expr>) {
        self.data.borrow_mut().index_map = map;
    }

    pub(crate) fn index_map(&self) -> IndexMap<String, Expr> {
        self.data.borrow().index_map.clone()
    }

    // ---- initialisation -----------------------------------------------

    /// Extract the stage-level iteration domain: the intersection of
    /// all reference domains inside the expression, aligned into one
    /// space whose dimensions are the sorted free variables, retagged
    /// with the stage name.
    fn extract_domain_from_expr(&self, expr: &Expr) {
        let references = expr.collect(ExprTag::Reference);
        if references.is_empty() {
            return;
        }

        // all variable names across the reference domains, sorted
        let mut var_names: Vec<String> = Vec::new();
        for r in &references {
            let (_, _, domain) = r.as_reference().unwrap();
            let Some(domain) = domain else { continue };
            for name in domain.dim_names() {
                if !var_names.contains(name) {
                    var_names.push(name.clone());
                }
            }
        }
        if var_names.is_empty() {
            return;
        }
        var_names.sort();

        let mut stage_domain: Option<Set> = None;
        for r in &references {
            let (_, _, domain) = r.as_reference().unwrap();
            let Some(ref_domain) = domain else { continue };
            // align this reference's space with the stage space
            let transform_repr = format!(
                "{{ [{}] -> [{}] }}",
                ref_domain.dim_names().join(", "),
                var_names.join(", ")
            );
            let transform = Map::parse(&transform_repr).expect("alignment map must parse");
            let aligned = ref_domain.apply(&transform);
            stage_domain = Some(match stage_domain {
                None => aligned,
                Some(acc) => acc.intersect(&aligned),
            });
        }

        let mut domain = stage_domain.expect("at least one reference carries a domain");
        let name = self.name();
        domain.set_tuple_name(&name);
        debug!(stage = %name, domain = %domain, "stage domain");
        self.data.borrow_mut().iter_domain = Some(domain);
    }

    /// The identity schedule over the iteration domain.
    fn init_schedule(&self) {
        let mut data = self.data.borrow_mut();
        let domain = data
            .iter_domain
            .as_ref()
            .expect("schedule requires an iteration domain");
        let schedule = domain.identity();
        debug!(stage = %data.name, schedule = %schedule, "identity schedule");
        data.schedule = Some(schedule);
    }

    fn init_read_dependencies(&self) {
        let (domain, expr) = {
            let data = self.data.borrow();
            (data.iter_domain.clone(), data.expr.clone())
        };
        let Some(domain) = domain else { return };
        let expr = expr.expect("read accesses require an expression");
        let ExprKind::Assign { b, .. } = expr.kind() else {
            panic!("read accesses require an assignment, found {}", expr);
        };
        let access = collect_access(&domain, b);
        debug!(stage = %self.name(), reads = %access, "read access");
        self.data.borrow_mut().read_access = Some(access);
    }

    fn init_write_dependencies(&self) {
        let (domain, expr) = {
            let data = self.data.borrow();
            (data.iter_domain.clone(), data.expr.clone())
        };
        let Some(domain) = domain else { return };
        let expr = expr.expect("write accesses require an expression");
        let ExprKind::Assign { a, .. } = expr.kind() else {
            panic!("write accesses require an assignment, found {}", expr);
        };
        let access = collect_access(&domain, a);
        debug!(stage = %self.name(), writes = %access, "write access");
        self.data.borrow_mut().write_access = Some(access);
    }

    /// Render this single stage as a C loop nest (a debugging aid).
    pub fn dump_as_c(&self) -> String {
        let domain = self.iter_domain().expect("stage has no iteration domain");
        let schedule = ScheduleConstraints::on_domain(UnionSet::from_set(domain.clone()))
            .compute_schedule()
            .expect("a single stage always schedules");
        let mut parts = IndexMap::new();
        parts.insert(
            self.name(),
            StagePoly {
                domain,
                schedule: self.collected_schedule(),
            },
        );

        let stage = self.clone();
        let mut build = AstBuild::new();
        build.set_at_each_domain(move |node, info| {
            let map: IndexMap<String, Expr> = info
                .index_exprs
                .iter()
                .map(|(name, e)| (name.clone(), ast_expr_to_expr(e)))
                .collect();
            stage.set_index_map(map);
            node
        });
        let ast = build.node_from_schedule(&schedule, &parts);
        let mut expr = ast_to_expr(&ast);
        if let Some(stage_expr) = self.expr() {
            expr = replace_expr_with_stage(&expr, &self.name(), &stage_expr, &self.index_map());
        }
        let mut gen = CCodeGen::source();
        gen.print(&expr);
        gen.compiled_code()
    }
}

/// Build the access union-map of `expr` relative to `domain`: one
/// component `stmt[dims] -> tensor[indices]` per distinct reference.
pub fn collect_access(domain: &Set, expr: &Expr) -> UnionMap {
    let references = expr.collect(ExprTag::Reference);
    let mut reprs: Vec<String> = Vec::new();
    for r in &references {
        let s = dump(r);
        if !reprs.contains(&s) {
            reprs.push(s);
        }
    }
    reprs.sort();
    if reprs.is_empty() {
        return UnionMap::empty();
    }
    let statement = domain.statement_repr();
    let body: Vec<String> = reprs
        .iter()
        .map(|r| format!("{} -> {}", statement, r))
        .collect();
    let repr = format!("{{ {} }}", body.join("; "));
    UnionMap::parse(&repr).expect("access relation must parse")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context;
    use crate::ir::types::{Constant, PrimitiveType};

    fn f32_tensor(name: &str, dims: &[i32]) -> Expr {
        Expr::tensor(
            name,
            PrimitiveType::Float32,
            dims.iter().map(|&d| Constant::from(d)).collect(),
        )
    }

    #[test]
    fn test_stage_from_assignment() {
        context::reset();
        let out = f32_tensor("out", &[20, 40]);
        let x = f32_tensor("x", &[20, 30]);
        let w = f32_tensor("w", &[30, 40]);
        let i = Var::named("i");
        let j = Var::named("j");
        let k = Var::named("k");

        let expr = out.index(i.clone()).index(j.clone()).sum_assign(
            x.index(i).index(k.clone()) * w.index(k).index(j),
        );
        let stage = Stage::new(expr);

        assert_eq!(stage.name(), "S0");
        assert_eq!(stage.stage_type(), StageType::Polyhedral);

        let domain = stage.iter_domain().unwrap();
        assert_eq!(domain.tuple_name(), Some("S0"));
        assert_eq!(domain.n_dim(), 3);
        assert!(domain.contains(&[19, 39, 29], &[]));
        assert!(!domain.contains(&[19, 40, 0], &[]));

        let reads = stage.read_access().unwrap();
        assert_eq!(reads.maps().len(), 2);
        let writes = stage.write_access().unwrap();
        assert_eq!(writes.maps().len(), 1);
        assert_eq!(writes.maps()[0].out_tuple_name(), Some("out"));
    }

    #[test]
    fn test_stage_with_domain_string() {
        context::reset();
        let stage = Stage::with_domain("S9", "{ S9[i] : 0 <= i < 16 }").unwrap();
        assert_eq!(stage.name(), "S9");
        assert!(stage.schedule().is_some());
        assert_eq!(stage.stage_type(), StageType::Polyhedral);
    }

    #[test]
    fn test_split_rewrites_schedule() {
        context::reset();
        let a = f32_tensor("a", &[100]);
        let i = Var::named("i");
        let expr = a
            .clone()
            .index(i.clone())
            .assign(a.index(i.clone()) + Expr::from(1.0f32));
        let stage = Stage::new(expr);
        stage.split(&i, 8).unwrap();
        let schedule = stage.schedule().unwrap();
        assert_eq!(
            schedule.out_dim_names(),
            &["i_".to_string(), "i__".to_string()]
        );
        // i = 8*i_ + i__ must be recoverable
        let exprs = schedule.in_dim_exprs().unwrap();
        assert_eq!(exprs[0].coeffs, vec![8, 1]);
    }

    #[test]
    fn test_split_unknown_iterator() {
        context::reset();
        let stage = Stage::with_domain("S0", "{ S0[i] : 0 <= i < 4 }").unwrap();
        let z = Var::named("zz");
        assert!(stage.split(&z, 4).is_err());
    }

    #[test]
    fn test_set_cond_restricts_domain() {
        context::reset();
        let stage = Stage::with_domain("S0", "{ S0[i] : 0 <= i < 10 }").unwrap();
        let i = Var::named("i");
        stage.set_cond(&i, "> 0").unwrap();
        let domain = stage.iter_domain().unwrap();
        assert!(!domain.contains(&[0], &[]));
        assert!(domain.contains(&[1], &[]));
    }

    #[test]
    #[should_panic(expected = "duplicate stage name")]
    fn test_duplicate_stage_name_aborts() {
        context::reset();
        let _a = Stage::with_domain("S0", "{ S0[i] : 0 <= i < 4 }").unwrap();
        let _b = Stage::with_domain("S0", "{ S0[i] : 0 <= i < 4 }").unwrap();
    }

    #[test]
    fn test_transposed_reference_domain() {
        context::reset();
        // w indexed [j, k] with w shaped 40 x 30
        let w = f32_tensor("w", &[40, 30]);
        let out = f32_tensor("out", &[20, 40]);
        let j = Var::named("j");
        let k = Var::named("k");
        let i = Var::named("i");
        let expr = out
            .index(i.clone())
            .index(j.clone())
            .sum_assign(w.index(j).index(k));
        let stage = Stage::new(expr);
        let domain = stage.iter_domain().unwrap();
        // dims sorted: [i, j, k]; j < 40 via both refs, k < 30
        assert!(domain.contains(&[19, 39, 29], &[]));
        assert!(!domain.contains(&[0, 0, 30], &[]));
    }
}
