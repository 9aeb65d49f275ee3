use std::cmp::Ordering;
use ordered_float::OrderedFloat;
use rayon::prelude::*;

use crate::data::events::FeatureMatrix;

#[inline]
fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// k-nearest-neighbour indices, one row per query, nearest first.
#[derive(Clone, Debug, PartialEq)]
pub struct NeighborTable {
    k: usize,
    indices: Vec<usize>,
}

impl NeighborTable {
    /// Effective k after clamping to the reference size.
    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    #[inline]
    pub fn n_queries(&self) -> usize {
        if self.k == 0 { 0 } else { self.indices.len() / self.k }
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[usize] {
        &self.indices[i * self.k..(i + 1) * self.k]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[usize]> {
        self.indices.chunks(self.k.max(1))
    }
}

/// Exact Euclidean k-NN over a reference set of spike features.
#[derive(Clone, Debug)]
pub struct NeighborIndex<'a> {
    reference: &'a FeatureMatrix,
}

impl<'a> NeighborIndex<'a> {
    pub fn build(reference: &'a FeatureMatrix) -> Self {
        Self { reference }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.reference.n_rows()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.reference.is_empty()
    }

    #[inline]
    pub fn n_dims(&self) -> usize {
        self.reference.n_dims()
    }

    /// For every row of `queries`, the `k` nearest reference rows, nearest first.
    ///
    /// `k` is clamped to the reference size. Equal distances are ordered by reference index.
    /// Caller guarantees `queries.n_dims() == self.n_dims()`.
    pub fn query(&self, queries: &FeatureMatrix, k: usize) -> NeighborTable {
        let n_ref = self.len();
        let k_eff = k.min(n_ref);
        if k_eff < k {
            log::debug!("clamping k from {} to reference size {}", k, n_ref);
        }
        if k_eff == 0 {
            return NeighborTable { k: 0, indices: Vec::new() };
        }

        let per_query: Vec<Vec<usize>> = (0..queries.n_rows())
            .into_par_iter()
            .map(|qi| self.nearest(queries.row(qi), k_eff))
            .collect();

        NeighborTable { k: k_eff, indices: per_query.concat() }
    }

    fn nearest(&self, q: &[f32], k: usize) -> Vec<usize> {
        let mut dist: Vec<(OrderedFloat<f32>, usize)> = self
            .reference
            .rows()
            .enumerate()
            .map(|(j, r)| (OrderedFloat(squared_euclidean(q, r)), j))
            .collect();

        let cmp = |a: &(OrderedFloat<f32>, usize), b: &(OrderedFloat<f32>, usize)| -> Ordering {
            a.0.cmp(&b.0).then(a.1.cmp(&b.1))
        };

        // partial select first, then order the k survivors
        if k < dist.len() {
            dist.select_nth_unstable_by(k - 1, cmp);
            dist.truncate(k);
        }
        dist.sort_unstable_by(cmp);
        dist.into_iter().map(|(_, j)| j).collect()
    }
}
