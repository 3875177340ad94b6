//! Split and tile transforms expressed as affine relations.
//!
//! Splitting iterator `i` by `size` replaces it in a schedule's output
//! space with the pair `i_`, `i__` such that `i_ = floor(i/size)` and
//! `i__ = i mod size`. Both facts are affine once written as
//! `i = size*i_ + i__` with `0 <= i__ < size`, so the transform stays
//! inside the integer-set kernel. Tiling a band applies the same
//! rewrite to each requested dimension, yielding interleaved
//! tile/point loops.

use crate::polyhedral::constraint::Constraint;
use crate::polyhedral::expr::AffineExpr;
use crate::polyhedral::map::Map;

/// Build the transform `{ [dims] -> [dims with iter replaced by
/// iter_, iter__] : iter = size*iter_ + iter__ and 0 <= iter__ < size }`.
///
/// The input space keeps `tuple` as its name so the transform can be
/// composed onto a schedule with `apply_range`.
pub fn split_map(tuple: Option<&str>, dims: &[String], iter: &str, size: i64) -> Option<Map> {
    assert!(size > 0, "split size must be positive, got {}", size);
    let pos = dims.iter().position(|d| d == iter)?;

    let mut out_dims: Vec<String> = Vec::with_capacity(dims.len() + 1);
    for (k, d) in dims.iter().enumerate() {
        if k == pos {
            out_dims.push(format!("{}_", iter));
            out_dims.push(format!("{}__", iter));
        } else {
            out_dims.push(d.clone());
        }
    }

    let n_in = dims.len();
    let n_out = out_dims.len();
    let n_var = n_in + n_out;
    let mut constraints = Vec::new();

    for (k, _) in dims.iter().enumerate() {
        let out_k = if k < pos { k } else if k == pos { k } else { k + 1 };
        if k == pos {
            // in_k - size*iter_ - iter__ = 0
            let mut e = AffineExpr::zero(n_var, 0);
            e.coeffs[k] = 1;
            e.coeffs[n_in + out_k] = -size;
            e.coeffs[n_in + out_k + 1] = -1;
            constraints.push(Constraint::eq_zero(e));
            // iter__ >= 0
            let mut lo = AffineExpr::zero(n_var, 0);
            lo.coeffs[n_in + out_k + 1] = 1;
            constraints.push(Constraint::ge_zero(lo));
            // size - 1 - iter__ >= 0
            let mut hi = AffineExpr::zero(n_var, 0);
            hi.constant = size - 1;
            hi.coeffs[n_in + out_k + 1] = -1;
            constraints.push(Constraint::ge_zero(hi));
        } else {
            // out_k - in_k = 0
            let mut e = AffineExpr::zero(n_var, 0);
            e.coeffs[n_in + out_k] = 1;
            e.coeffs[k] = -1;
            constraints.push(Constraint::eq_zero(e));
        }
    }

    Some(Map {
        in_tuple: tuple.map(|s| s.to_string()),
        in_dims: dims.to_vec(),
        out_tuple: None,
        out_dims,
        params: Vec::new(),
        constraints,
    })
}

/// Apply a sequence of split transforms to a schedule, one per
/// `(iterator, width)` request. Requests whose iterator is absent
/// from the current output space are skipped.
pub fn tile_schedule(schedule: &Map, tiles: &[(String, i64)]) -> Map {
    let mut result = schedule.clone();
    for (iter, width) in tiles {
        let out_tuple = result.out_tuple_name().map(|s| s.to_string());
        let dims = result.out_dim_names().to_vec();
        if let Some(t) = split_map(out_tuple.as_deref(), &dims, iter, *width) {
            if let Some(composed) = result.apply_range(&t) {
                result = composed;
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polyhedral::set::Set;

    #[test]
    fn test_split_map_shape() {
        let dims = vec!["i".to_string()];
        let m = split_map(Some("S0"), &dims, "i", 8).unwrap();
        assert_eq!(m.out_dim_names(), &["i_".to_string(), "i__".to_string()]);
    }

    #[test]
    fn test_split_image_bounds() {
        let s = Set::parse("{ S0[i] : 0 <= i < 100 }").unwrap();
        let m = split_map(Some("S0"), &["i".to_string()], "i", 8).unwrap();
        let img = s.apply(&m);
        // outer tile 0..=12, inner 0..=7, remainder guarded
        assert!(img.contains(&[12, 3], &[]));
        assert!(!img.contains(&[12, 4], &[]));
        assert!(!img.contains(&[13, 0], &[]));
        assert!(img.contains(&[0, 7], &[]));
    }

    #[test]
    fn test_split_skips_unknown_iterator() {
        let dims = vec!["i".to_string()];
        assert!(split_map(None, &dims, "zz", 8).is_none());
    }

    #[test]
    fn test_tile_schedule_interleaves() {
        let s = Set::parse("{ S0[i, j] : 0 <= i < 16 and 0 <= j < 16 }").unwrap();
        let sched = s.identity();
        let tiled = tile_schedule(&sched, &[("i".into(), 4), ("j".into(), 4)]);
        assert_eq!(
            tiled.out_dim_names(),
            &["i_".to_string(), "i__".to_string(), "j_".to_string(), "j__".to_string()]
        );
    }
}
