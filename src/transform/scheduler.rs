//! Validity-constrained schedule computation.
//!
//! The scheduler takes an iteration domain, a validity relation and an
//! optional proximity relation, and produces a schedule tree: a
//! sequence of bands, one band per fusion group. Statements connected
//! by proximity edges whose domains have the same dimensionality share
//! a band; everything else executes in creation order, which satisfies
//! the forward-only validity relation produced by
//! [`crate::analysis::dependence::compute_schedule_validity`].

use crate::polyhedral::map::UnionMap;
use crate::polyhedral::set::UnionSet;
use crate::utils::errors::TransformError;
use tracing::debug;

/// One node of a schedule tree.
#[derive(Debug, Clone)]
pub enum ScheduleNode {
    /// Ordered children, executed one after another.
    Sequence {
        /// The children in execution order.
        children: Vec<ScheduleNode>,
    },
    /// A loop band over the statements' scheduled dimensions.
    Band {
        /// Statement tuple names scheduled in this band, in execution
        /// order within the innermost loop body.
        stmts: Vec<String>,
        /// Tile requests `(iterator, width)` to apply when the band is
        /// lowered to loops. Empty means untiled.
        tile: Vec<(String, i64)>,
    },
}

/// A computed schedule: the iteration domain plus the band tree.
#[derive(Debug, Clone)]
pub struct Schedule {
    /// The scheduled union domain.
    pub domain: UnionSet,
    /// The root of the band tree.
    pub root: ScheduleNode,
}

impl Schedule {
    /// Rewrite the tree bottom-up. Children are rebuilt before their
    /// parent is handed to `f`, so a callback that wraps or edits
    /// band nodes (e.g. to attach tile sizes) sees final children.
    pub fn map_descendant_bottom_up(
        &self,
        f: &mut impl FnMut(ScheduleNode) -> ScheduleNode,
    ) -> Schedule {
        fn walk(node: &ScheduleNode, f: &mut impl FnMut(ScheduleNode) -> ScheduleNode) -> ScheduleNode {
            let rebuilt = match node {
                ScheduleNode::Sequence { children } => ScheduleNode::Sequence {
                    children: children.iter().map(|c| walk(c, f)).collect(),
                },
                ScheduleNode::Band { stmts, tile } => ScheduleNode::Band {
                    stmts: stmts.clone(),
                    tile: tile.clone(),
                },
            };
            f(rebuilt)
        }
        Schedule {
            domain: self.domain.clone(),
            root: walk(&self.root, f),
        }
    }
}

/// Constraints handed to the scheduler.
#[derive(Debug, Clone)]
pub struct ScheduleConstraints {
    domain: UnionSet,
    validity: UnionMap,
    proximity: Option<UnionMap>,
}

impl ScheduleConstraints {
    /// Start from the union iteration domain.
    pub fn on_domain(domain: UnionSet) -> Self {
        Self {
            domain,
            validity: UnionMap::empty(),
            proximity: None,
        }
    }

    /// Set the validity relation the schedule must respect.
    pub fn set_validity(mut self, validity: UnionMap) -> Self {
        self.validity = validity;
        self
    }

    /// Set the proximity relation used for fusion.
    pub fn set_proximity(mut self, proximity: UnionMap) -> Self {
        self.proximity = Some(proximity);
        self
    }

    /// Compute the schedule tree.
    pub fn compute_schedule(self) -> Result<Schedule, TransformError> {
        let stmts: Vec<String> = self
            .domain
            .sets()
            .iter()
            .filter_map(|s| s.tuple_name().map(|n| n.to_string()))
            .collect();
        let n = stmts.len();
        let index_of = |name: &str| stmts.iter().position(|s| s == name);

        // fusion groups from proximity edges (union-find)
        let mut group: Vec<usize> = (0..n).collect();
        fn find(group: &mut Vec<usize>, i: usize) -> usize {
            let parent = group[i];
            if parent != i {
                let root = find(group, parent);
                group[i] = root;
            }
            group[i]
        }
        if let Some(proximity) = &self.proximity {
            for m in proximity.maps() {
                let (Some(a), Some(b)) = (m.in_tuple_name(), m.out_tuple_name()) else {
                    continue;
                };
                let (Some(ia), Some(ib)) = (index_of(a), index_of(b)) else {
                    continue;
                };
                let da = self.domain.sets()[ia].n_dim();
                let db = self.domain.sets()[ib].n_dim();
                if da != db {
                    debug!(src = a, dst = b, "proximity ignored: dimension mismatch");
                    continue;
                }
                let (ra, rb) = (find(&mut group, ia), find(&mut group, ib));
                if ra != rb {
                    group[ra.max(rb)] = ra.min(rb);
                }
            }
        }

        // collect members per representative, in creation order
        let mut bands: Vec<Vec<usize>> = Vec::new();
        let mut rep_to_band: Vec<Option<usize>> = vec![None; n];
        for i in 0..n {
            let r = find(&mut group, i);
            match rep_to_band[r] {
                Some(b) => bands[b].push(i),
                None => {
                    rep_to_band[r] = Some(bands.len());
                    bands.push(vec![i]);
                }
            }
        }

        // validity must not point backwards across the band order
        for m in self.validity.maps() {
            let (Some(a), Some(b)) = (m.in_tuple_name(), m.out_tuple_name()) else {
                continue;
            };
            let (Some(ia), Some(ib)) = (index_of(a), index_of(b)) else {
                continue;
            };
            let ba = rep_to_band[find(&mut group, ia)].unwrap();
            let bb = rep_to_band[find(&mut group, ib)].unwrap();
            let violated = ba > bb || (ba == bb && ia > ib);
            if violated {
                return Err(TransformError::ScheduleInfeasible {
                    domain: self.domain.to_string(),
                    validity: self.validity.to_string(),
                });
            }
        }

        debug!(bands = bands.len(), "schedule computed");
        let children: Vec<ScheduleNode> = bands
            .into_iter()
            .map(|members| ScheduleNode::Band {
                stmts: members.into_iter().map(|i| stmts[i].clone()).collect(),
                tile: Vec::new(),
            })
            .collect();
        let root = if children.len() == 1 {
            children.into_iter().next().unwrap()
        } else {
            ScheduleNode::Sequence { children }
        };
        Ok(Schedule {
            domain: self.domain,
            root,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polyhedral::set::Set;

    fn domain2() -> UnionSet {
        let mut d = UnionSet::empty();
        d.add_set(Set::parse("{ S0[i] : 0 <= i < 10 }").unwrap());
        d.add_set(Set::parse("{ S1[i] : 0 <= i < 10 }").unwrap());
        d
    }

    #[test]
    fn test_sequence_without_proximity() {
        let sched = ScheduleConstraints::on_domain(domain2())
            .set_validity(UnionMap::parse("{ S0[i] -> S1[i] }").unwrap())
            .compute_schedule()
            .unwrap();
        match sched.root {
            ScheduleNode::Sequence { children } => assert_eq!(children.len(), 2),
            ScheduleNode::Band { .. } => panic!("expected a sequence"),
        }
    }

    #[test]
    fn test_proximity_fuses() {
        let sched = ScheduleConstraints::on_domain(domain2())
            .set_proximity(UnionMap::parse("{ S0[i] -> S1[i]; S1[i] -> S0[i] }").unwrap())
            .compute_schedule()
            .unwrap();
        match sched.root {
            ScheduleNode::Band { stmts, .. } => {
                assert_eq!(stmts, vec!["S0".to_string(), "S1".to_string()])
            }
            ScheduleNode::Sequence { .. } => panic!("expected a fused band"),
        }
    }

    #[test]
    fn test_backward_validity_is_infeasible() {
        let err = ScheduleConstraints::on_domain(domain2())
            .set_validity(UnionMap::parse("{ S1[i] -> S0[i] }").unwrap())
            .compute_schedule()
            .unwrap_err();
        assert!(err.to_string().contains("no valid schedule"));
    }

    #[test]
    fn test_bottom_up_rewrite_attaches_tiles() {
        let sched = ScheduleConstraints::on_domain(domain2())
            .compute_schedule()
            .unwrap();
        let tiled = sched.map_descendant_bottom_up(&mut |node| match node {
            ScheduleNode::Band { stmts, .. } if stmts.contains(&"S0".to_string()) => {
                ScheduleNode::Band {
                    stmts,
                    tile: vec![("i".to_string(), 4)],
                }
            }
            other => other,
        });
        match tiled.root {
            ScheduleNode::Sequence { children } => match &children[0] {
                ScheduleNode::Band { tile, .. } => assert_eq!(tile.len(), 1),
                _ => panic!(),
            },
            _ => panic!(),
        }
    }
}
