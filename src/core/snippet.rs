//! Snippets: maximal runs of same-typed stages scheduled as one unit.

use crate::analysis::dependence::{compute_deps, compute_schedule_validity};
use crate::codegen::ast_builder::{AstBuild, AstNode, StagePoly};
use crate::codegen::ast_to_ir::{ast_expr_to_expr, ast_to_expr, replace_expr_with_stage};
use crate::core::stage::{Stage, StageType};
use crate::ir::expr::Expr;
use crate::polyhedral::map::UnionMap;
use crate::polyhedral::set::UnionSet;
use crate::transform::scheduler::{Schedule, ScheduleConstraints, ScheduleNode};
use crate::utils::errors::{CinnResult, TransformError};
use indexmap::IndexMap;
use tracing::debug;

/// A group of consecutive same-typed stages. Lifecycle:
/// `add_stage* → end → (collections, schedule) → get_transformed_expr`.
#[derive(Default)]
pub struct Snippet {
    stages: Vec<Stage>,
    kind: Option<StageType>,
    is_end: bool,
    iter_domain: Option<UnionSet>,
    transform: Option<UnionMap>,
    access_reads: Option<UnionMap>,
    access_writes: Option<UnionMap>,
    proximity: Option<UnionMap>,
    schedule: Option<Schedule>,
}

impl Snippet {
    /// An open, empty snippet.
    pub fn new() -> Self {
        Self::default()
    }

    /// The snippet's stage type; `None` until the first stage.
    pub fn kind(&self) -> Option<StageType> {
        self.kind
    }

    /// True before any stage was added.
    pub fn is_unk(&self) -> bool {
        self.kind.is_none()
    }

    /// True for polyhedral snippets.
    pub fn is_polyhedral(&self) -> bool {
        self.kind == Some(StageType::Polyhedral)
    }

    /// The stages in insertion order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Add a stage; its type must match the snippet's.
    pub fn add_stage(&mut self, stage: Stage) {
        assert!(!self.is_end, "snippet definition already ended");
        let ty = stage.stage_type();
        assert!(ty != StageType::Unk, "stage `{}` has unknown type", stage.name());
        match self.kind {
            None => self.kind = Some(ty),
            Some(k) => assert_eq!(k, ty, "stage type mismatch in snippet"),
        }
        debug!(stage = %stage.name(), ty = %ty, "snippet takes stage");
        self.stages.push(stage);
    }

    /// Close the snippet. For polyhedral snippets this runs the fixed
    /// pipeline: domain/transform/access collection, fusion, schedule
    /// computation and tile attachment.
    pub fn end(&mut self) -> CinnResult<()> {
        if self.is_end {
            return Ok(());
        }
        self.is_end = true;
        if self.is_polyhedral() {
            self.collect_iterator_domain();
            self.collect_transforms();
            self.collect_read_access();
            self.collect_write_access();
            self.compute_schedule()?;
        }
        Ok(())
    }

    /// Union of all stages' iteration domains.
    pub fn collect_iterator_domain(&mut self) {
        assert!(self.is_polyhedral());
        let mut domain = UnionSet::empty();
        for stage in &self.stages {
            domain.add_set(
                stage
                    .iter_domain()
                    .unwrap_or_else(|| panic!("stage `{}` has no domain", stage.name())),
            );
        }
        debug!(domain = %domain, "collected iterator domain");
        self.iter_domain = Some(domain);
    }

    /// Union of all stages' schedule maps.
    pub fn collect_transforms(&mut self) {
        assert!(self.is_polyhedral());
        let mut transform = UnionMap::empty();
        for stage in &self.stages {
            transform.add_map(stage.collected_schedule());
        }
        debug!(transform = %transform, "collected transforms");
        self.transform = Some(transform);
    }

    /// Union of read accesses.
    pub fn collect_read_access(&mut self) {
        assert!(self.is_polyhedral());
        let mut reads = UnionMap::empty();
        for stage in &self.stages {
            if let Some(r) = stage.read_access() {
                reads = reads.union(r);
            }
        }
        debug!(reads = %reads, "collected read access");
        self.access_reads = Some(reads);
    }

    /// Union of write accesses.
    pub fn collect_write_access(&mut self) {
        assert!(self.is_polyhedral());
        let mut writes = UnionMap::empty();
        for stage in &self.stages {
            if let Some(w) = stage.write_access() {
                writes = writes.union(w);
            }
        }
        debug!(writes = %writes, "collected write access");
        self.access_writes = Some(writes);
    }

    /// Turn `fuse_with` requests into a proximity union-map mapping
    /// each stage's statement onto its target's.
    pub fn build_fusion(&mut self) -> Result<(), TransformError> {
        let mut proximity: Option<UnionMap> = None;
        for stage in &self.stages {
            for target in stage.stages_fuse_with() {
                let target_stage = self
                    .stages
                    .iter()
                    .find(|s| s.name() == target)
                    .ok_or_else(|| TransformError::UnknownFusionTarget(target.clone()))?;
                let this_stmt = stage
                    .iter_domain()
                    .expect("fusion source has no domain")
                    .statement_repr();
                let target_stmt = target_stage
                    .iter_domain()
                    .expect("fusion target has no domain")
                    .statement_repr();
                let repr = format!("{{ {} -> {} }}", this_stmt, target_stmt);
                let map = crate::polyhedral::map::Map::parse(&repr)
                    .expect("fusion relation must parse");
                proximity = Some(match proximity.take() {
                    None => UnionMap::from_map(map),
                    Some(acc) => {
                        let mut acc = acc;
                        acc.add_map(map);
                        acc
                    }
                });
            }
        }
        if let Some(p) = &proximity {
            debug!(proximity = %p, "fusion proximity");
        }
        self.proximity = proximity;
        Ok(())
    }

    /// Compute the snippet schedule: dependencies, forward-only
    /// validity, optional proximity, then the band tree; finally
    /// attach tile requests.
    pub fn compute_schedule(&mut self) -> CinnResult<()> {
        assert!(self.is_polyhedral());
        let domain = self.iter_domain.clone().expect("domain not collected");
        let reads = self.access_reads.clone().expect("reads not collected");
        let writes = self.access_writes.clone().expect("writes not collected");

        let deps = compute_deps(&domain, &reads, &writes);
        let validity = compute_schedule_validity(&domain, &deps);
        debug!(validity = %validity, "memory dependencies");

        self.build_fusion()?;

        let mut sc = ScheduleConstraints::on_domain(domain).set_validity(validity);
        if let Some(p) = &self.proximity {
            sc = sc.set_proximity(p.clone());
        }
        self.schedule = Some(sc.compute_schedule()?);

        self.build_tiles();
        Ok(())
    }

    /// Rewrite the schedule tree bottom-up, wrapping each requesting
    /// stage's band with its tile sizes.
    pub fn build_tiles(&mut self) {
        if !self.is_polyhedral() {
            return;
        }
        let schedule = self.schedule.as_ref().expect("schedule must exist before tiling");
        let mut result = schedule.clone();
        for stage in &self.stages {
            let tiles = stage.tiles();
            let tile_sizes = stage.tile_sizes();
            if tiles.is_empty() && tile_sizes.is_empty() {
                continue;
            }
            let name = stage.name();
            let mut requests: Vec<(String, i64)> =
                tiles.iter().map(|(k, v)| (k.clone(), *v)).collect();
            if !tile_sizes.is_empty() {
                let dims = stage.collected_schedule().out_dim_names().to_vec();
                for (dim, size) in dims.iter().zip(tile_sizes.iter()) {
                    requests.push((dim.clone(), *size));
                }
            }
            result = result.map_descendant_bottom_up(&mut |node| match node {
                ScheduleNode::Band { stmts, mut tile } if stmts.contains(&name) => {
                    tile.extend(requests.iter().cloned());
                    ScheduleNode::Band { stmts, tile }
                }
                other => other,
            });
        }
        self.schedule = Some(result);
    }

    /// Generate the loop AST for this snippet, recording each stage's
    /// scheduled index expressions through the `at_each_domain` hook.
    pub fn generate_ast(&self) -> AstNode {
        assert!(self.is_polyhedral());
        let schedule = self.schedule.as_ref().expect("schedule not computed");
        let mut parts: IndexMap<String, StagePoly> = IndexMap::new();
        for stage in &self.stages {
            parts.insert(
                stage.name(),
                StagePoly {
                    domain: stage.iter_domain().expect("stage has no domain"),
                    schedule: stage.collected_schedule(),
                },
            );
        }
        let stages = self.stages.clone();
        let mut build = AstBuild::new();
        build.set_at_each_domain(move |node, info| {
            if let Some(stage) = stages.iter().find(|s| s.name() == info.stmt) {
                let map: IndexMap<String, Expr> = info
                    .index_exprs
                    .iter()
                    .map(|(name, e)| (name.clone(), ast_expr_to_expr(e)))
                    .collect();
                stage.set_index_map(map);
            }
            node
        });
        build.node_from_schedule(schedule, &parts)
    }

    /// The final IR of this snippet: the lowered AST with every
    /// statement call replaced by its stage's expression under the
    /// recorded index map. Non-polyhedral snippets pass their stage
    /// expressions through (wrapped in a block when several).
    pub fn get_transformed_expr(&self) -> Expr {
        assert!(self.is_end, "snippet definition not ended");

        if !self.is_polyhedral() {
            if self.stages.len() == 1 {
                return self.stages[0].expr().expect("stage has no expression");
            }
            let exprs: Vec<Expr> = self
                .stages
                .iter()
                .map(|s| s.expr().expect("stage has no expression"))
                .collect();
            return Expr::block(exprs);
        }

        let ast = self.generate_ast();
        let mut expr = ast_to_expr(&ast);
        for stage in &self.stages {
            if let Some(stage_expr) = stage.expr() {
                expr =
                    replace_expr_with_stage(&expr, &stage.name(), &stage_expr, &stage.index_map());
            }
        }
        expr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context;
    use crate::ir::expr::Var;
    use crate::ir::types::{Constant, PrimitiveType};

    fn f32_tensor(name: &str, dims: &[i32]) -> Expr {
        Expr::tensor(
            name,
            PrimitiveType::Float32,
            dims.iter().map(|&d| Constant::from(d)).collect(),
        )
    }

    #[test]
    fn test_snippet_groups_and_schedules() {
        context::reset();
        let out = f32_tensor("out", &[4, 4]);
        let i = Var::named("i");
        let j = Var::named("j");
        let s0 = Stage::new(
            out.clone()
                .index(i.clone())
                .index(j.clone())
                .assign(Expr::from(0.0f32)),
        );
        let s1 = Stage::new(
            out.clone()
                .index(i.clone())
                .index(j.clone())
                .sum_assign(Expr::from(1.0f32)),
        );

        let mut snippet = Snippet::new();
        snippet.add_stage(s0);
        snippet.add_stage(s1);
        snippet.end().unwrap();

        let expr = snippet.get_transformed_expr();
        let code = crate::ir::printer::dump(&expr);
        // two loop nests, S0 before S1
        let p0 = code.find("out[c0, c1] = 0").expect("init statement");
        let p1 = code.find("out[c0, c1] += 1").expect("update statement");
        assert!(p0 < p1);
    }

    #[test]
    fn test_fused_stages_share_one_nest() {
        context::reset();
        let a = f32_tensor("a", &[8, 8]);
        let b = f32_tensor("b", &[8, 8]);
        let c = f32_tensor("c", &[8, 8]);
        let d = f32_tensor("d", &[8, 8]);
        let i = Var::named("i");
        let j = Var::named("j");
        let s0 = Stage::new(
            c.index(i.clone())
                .index(j.clone())
                .assign(a.index(i.clone()).index(j.clone()) + Expr::from(1.0f32)),
        );
        let s1 = Stage::new(
            d.index(i.clone())
                .index(j.clone())
                .assign(b.index(i.clone()).index(j.clone()) * Expr::from(2.0f32)),
        );
        s0.fuse_with(&s1.name());
        s1.fuse_with(&s0.name());

        let mut snippet = Snippet::new();
        snippet.add_stage(s0);
        snippet.add_stage(s1);
        snippet.end().unwrap();

        let expr = snippet.get_transformed_expr();
        let code = crate::ir::printer::dump(&expr);
        // exactly one outer c0 loop: both bodies inside the same nest
        let occurrences = code.matches("for (c0 = 0").count();
        assert_eq!(occurrences, 1, "fused stages must share a single nest:\n{}", code);
        let p0 = code.find("c[c0, c1]").unwrap();
        let p1 = code.find("d[c0, c1]").unwrap();
        assert!(p0 < p1, "write order must be preserved");
    }
}
