//! HNSW dictionary over the columns of a reference coordinate matrix.
//!
//! Built once per reference dataset and immutable afterwards; queries are
//! read-only and safe to run concurrently.

use instant_distance::{Builder, HnswMap, Search};
use nalgebra::DMatrix;
use rayon::prelude::*;

/// A wrapper for `Vec<f32>` points under Euclidean distance
#[derive(Clone, Debug)]
pub struct RefPoint {
    pub data: Vec<f32>,
}

impl instant_distance::Point for RefPoint {
    fn distance(&self, other: &Self) -> f32 {
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt()
    }
}

/// Immutable ANN index over reference cells.
///
/// Construction is the only writer; once `build` returns, the index is
/// shared read-only across query threads.
pub struct ReferenceIndex {
    index: HnswMap<RefPoint, usize>,
    num_points: usize,
    dim: usize,
}

impl ReferenceIndex {
    /// Build from a coordinate matrix where each column is one reference
    /// cell (typically a reduced embedding, d x n).
    pub fn build(coords: &DMatrix<f32>) -> Self {
        let nn = coords.ncols();
        let dim = coords.nrows();

        let points: Vec<RefPoint> = (0..nn)
            .into_par_iter()
            .map(|j| RefPoint {
                data: coords.column(j).iter().cloned().collect(),
            })
            .collect();

        let names = (0..nn).collect::<Vec<_>>();
        let index = Builder::default().build(points, names);

        Self {
            index,
            num_points: nn,
            dim,
        }
    }

    pub fn len(&self) -> usize {
        self.num_points
    }

    pub fn is_empty(&self) -> bool {
        self.num_points == 0
    }

    /// Point dimensionality the index was built with
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// k-nearest reference cells for one query point.
    ///
    /// Returns `(indices, distances)` of length `min(knn, len())`, distances
    /// non-decreasing.
    pub fn search(&self, query: &[f32], knn: usize) -> (Vec<usize>, Vec<f32>) {
        let nquery = knn.min(self.num_points);
        let point = RefPoint {
            data: query.to_vec(),
        };

        let mut search = Search::default();
        let mut indices = Vec::with_capacity(nquery);
        let mut distances = Vec::with_capacity(nquery);

        for item in self.index.search(&point, &mut search).take(nquery) {
            indices.push(*item.value);
            distances.push(item.distance);
        }
        (indices, distances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_returns_nearest_first() {
        // four well-separated points on a line
        let coords = DMatrix::from_row_slice(1, 4, &[0.0, 1.0, 10.0, 11.0]);
        let index = ReferenceIndex::build(&coords);

        assert_eq!(index.len(), 4);
        assert_eq!(index.dim(), 1);

        let (idx, dist) = index.search(&[0.2], 2);
        assert_eq!(idx.len(), 2);
        assert_eq!(idx[0], 0);
        assert_eq!(idx[1], 1);
        for w in dist.windows(2) {
            assert!(w[0] <= w[1]);
        }
    }

    #[test]
    fn search_is_capped_by_population() {
        let coords = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 0.0, 1.0]);
        let index = ReferenceIndex::build(&coords);
        let (idx, _) = index.search(&[0.0, 0.0], 10);
        assert_eq!(idx.len(), 2);
    }
}
