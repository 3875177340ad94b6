//! Dependence analysis over access relations.
//!
//! Given per-statement read and write access relations over a shared
//! iteration domain, the dependence relation is
//! `(R ∪ W) ∘ W⁻¹  ∪  W ∘ R⁻¹`: every pair of statement instances
//! that touch the same array element with at least one write involved.

use crate::polyhedral::map::UnionMap;
use crate::polyhedral::set::UnionSet;
use tracing::debug;

/// Compute the raw dependence relation between statement instances.
pub fn compute_deps(domain: &UnionSet, reads: &UnionMap, writes: &UnionMap) -> UnionMap {
    let reads_wd = reads.intersect_domain(domain);
    let writes_wd = writes.intersect_domain(domain);

    let reads_writes = reads_wd.clone().union(writes_wd.clone());
    let left = reads_writes.apply_range(&writes_wd.reverse());
    debug!(deps = %left, "(read ∪ write) ∘ write⁻¹");
    let right = writes_wd.apply_range(&reads_wd.reverse());
    debug!(deps = %right, "write ∘ read⁻¹");

    left.union(right).detect_equalities()
}

/// Derive the validity relation fed to the scheduler: identity maps
/// are dropped, and so is every pair whose source tuple name is
/// lexicographically >= the target.
///
/// Keeping only forward edges means backward dependencies are never
/// seen by the scheduler; the guarantee this preserves is exactly
/// "stages execute in creation order". This mirrors the behavior of
/// the system this compiler reimplements and is known-limited.
pub fn compute_schedule_validity(_domain: &UnionSet, deps: &UnionMap) -> UnionMap {
    let mut validity = UnionMap::empty();
    for map in deps.maps() {
        if map.is_identity() {
            continue;
        }
        let (Some(src), Some(dst)) = (map.in_tuple_name(), map.out_tuple_name()) else {
            continue;
        };
        if src >= dst {
            continue;
        }
        validity.add_map(map.clone());
    }
    debug!(validity = %validity, "schedule validity");
    validity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polyhedral::set::Set;

    fn matmul_like() -> (UnionSet, UnionMap, UnionMap) {
        let mut domain = UnionSet::empty();
        domain.add_set(Set::parse("{ S0[i, j] : 0 <= i < 20 and 0 <= j < 40 }").unwrap());
        domain.add_set(
            Set::parse("{ S1[i, j, k] : 0 <= i < 20 and 0 <= j < 40 and 0 <= k < 30 }").unwrap(),
        );
        let reads =
            UnionMap::parse("{ S1[i, j, k] -> x[i, k]; S1[i, j, k] -> w[k, j] }").unwrap();
        let writes =
            UnionMap::parse("{ S0[i, j] -> out[i, j]; S1[i, j, k] -> out[i, j] }").unwrap();
        (domain, reads, writes)
    }

    #[test]
    fn test_deps_connect_writers() {
        let (domain, reads, writes) = matmul_like();
        let deps = compute_deps(&domain, &reads, &writes);
        let pairs: Vec<(Option<&str>, Option<&str>)> = deps
            .maps()
            .iter()
            .map(|m| (m.in_tuple_name(), m.out_tuple_name()))
            .collect();
        assert!(pairs.contains(&(Some("S0"), Some("S1"))));
        assert!(pairs.contains(&(Some("S1"), Some("S0"))));
    }

    #[test]
    fn test_validity_keeps_forward_only() {
        let (domain, reads, writes) = matmul_like();
        let deps = compute_deps(&domain, &reads, &writes);
        let validity = compute_schedule_validity(&domain, &deps);
        for m in validity.maps() {
            assert!(m.in_tuple_name().unwrap() < m.out_tuple_name().unwrap());
        }
        assert!(validity
            .maps()
            .iter()
            .any(|m| m.in_tuple_name() == Some("S0") && m.out_tuple_name() == Some("S1")));
    }
}
