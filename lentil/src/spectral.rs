use crate::common::*;

use mapping_util::unified_graph::{GraphLayout, UnifiedGraph};
use rand::Rng;

/// Spectral layout of the unified graph.
///
/// Works on the degree-normalized adjacency `D^{-1/2} A D^{-1/2}`: its
/// leading eigenvectors are the smallest eigenvectors of the symmetric
/// normalized Laplacian. The trivial leading eigenvector is dropped and the
/// next `dims` eigenvectors, weighted by their eigenvalues, become the
/// coordinates. Eigenvectors are found by randomized subspace iteration so
/// only sparse matrix-vector products touch the adjacency.
pub struct SpectralLayout {
    pub num_iter: usize,
    /// Added to every degree before normalization to keep isolated
    /// vertices finite
    pub degree_smoothing: f32,
}

impl Default for SpectralLayout {
    fn default() -> Self {
        Self {
            num_iter: 50,
            degree_smoothing: 1e-6,
        }
    }
}

impl GraphLayout for SpectralLayout {
    fn layout(
        &self,
        graph: &UnifiedGraph,
        init: Option<&Mat>,
        dims: usize,
    ) -> anyhow::Result<Mat> {
        let n = graph.num_vertices();
        anyhow::ensure!(dims >= 1, "layout needs at least one dimension");
        anyhow::ensure!(
            n > dims + 1,
            "need more than {} vertices for a {}-dimensional layout",
            dims + 1,
            dims
        );

        let d_inv_sqrt: Vec<f32> = (0..n)
            .map(|v| 1.0 / (graph.degree(v) + self.degree_smoothing).sqrt())
            .collect();

        // one extra column for the trivial eigenvector
        let k = dims + 1;
        let mut qq = Mat::zeros(n, k);

        // column 0 approximates the trivial eigenvector D^{1/2} 1
        for i in 0..n {
            qq[(i, 0)] = 1.0 / d_inv_sqrt[i];
        }

        let mut rng = rand::rng();
        match init {
            Some(coords) => {
                anyhow::ensure!(
                    coords.nrows() == n,
                    "warm-start coordinates cover {} vertices, expected {}",
                    coords.nrows(),
                    n
                );
                for j in 0..dims.min(coords.ncols()) {
                    qq.column_mut(j + 1).copy_from(&coords.column(j));
                }
                for j in coords.ncols().min(dims) + 1..k {
                    fill_random(&mut qq, j, &mut rng);
                }
            }
            None => {
                for j in 1..k {
                    fill_random(&mut qq, j, &mut rng);
                }
            }
        }

        let mut qq = orthonormalize(&qq, k);
        for iter in 0..self.num_iter {
            let z = normalized_matmul(graph, &d_inv_sqrt, &qq);
            qq = orthonormalize(&z, k);
            if iter + 1 == self.num_iter {
                info!("subspace iteration finished after {} rounds", iter + 1);
            }
        }

        // Rayleigh-Ritz on the converged subspace
        let z = normalized_matmul(graph, &d_inv_sqrt, &qq);
        let bb = qq.transpose() * &z;
        let bb = (&bb + bb.transpose()) * 0.5;
        let eig = bb.symmetric_eigen();
        let order = argsort_desc(&eig.eigenvalues);

        // drop the trivial eigenvector, weight the rest by eigenvalue
        let mut coords = Mat::zeros(n, dims);
        for (j, &i) in order[1..=dims].iter().enumerate() {
            let v = &qq * eig.eigenvectors.column(i);
            coords.column_mut(j).copy_from(&(v * eig.eigenvalues[i]));
        }

        let mu = coords.row_mean();
        for mut row in coords.row_iter_mut() {
            row -= &mu;
        }
        Ok(coords)
    }
}

fn fill_random(qq: &mut Mat, column: usize, rng: &mut impl Rng) {
    for i in 0..qq.nrows() {
        qq[(i, column)] = rng.random::<f32>() - 0.5;
    }
}

fn orthonormalize(mat: &Mat, k: usize) -> Mat {
    let qr = mat.clone().qr();
    let q = qr.q();
    let k = k.min(q.ncols());
    q.columns(0, k).into_owned()
}

/// `D^{-1/2} A D^{-1/2} * qq` using the CSC structure directly
fn normalized_matmul(graph: &UnifiedGraph, d_inv_sqrt: &[f32], qq: &Mat) -> Mat {
    let n = qq.nrows();
    let k = qq.ncols();
    let mut out = Mat::zeros(n, k);

    let offsets = graph.adjacency.col_offsets();
    let rows = graph.adjacency.row_indices();
    let values = graph.adjacency.values();

    for c in 0..n {
        for idx in offsets[c]..offsets[c + 1] {
            let r = rows[idx];
            let w = values[idx] * d_inv_sqrt[r] * d_inv_sqrt[c];
            for j in 0..k {
                out[(r, j)] += w * qq[(c, j)];
            }
        }
    }
    out
}

fn argsort_desc(values: &DVec) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].partial_cmp(&values[a]).unwrap());
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapping_util::knn_query::{NeighborEdge, NeighborEdges};
    use mapping_util::unified_graph::{ReferenceGraph, UnifiedGraphBuilder};

    /// Two reference triangles joined by one weak bridge, plus one target
    /// cell spiked into the first triangle.
    fn bridged_graph() -> UnifiedGraph {
        let edges = vec![
            (0, 1),
            (1, 2),
            (2, 0),
            (3, 4),
            (4, 5),
            (5, 3),
            (2, 3), // bridge
        ];
        let weights = vec![1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.01];
        let reference = ReferenceGraph::new(6, edges, weights).unwrap();

        let spike = NeighborEdges {
            k: 2,
            num_targets: 1,
            num_references: 6,
            edges: vec![
                NeighborEdge {
                    target: 0,
                    reference: 0,
                    distance: 0.1,
                    weight: 0.7,
                },
                NeighborEdge {
                    target: 0,
                    reference: 1,
                    distance: 0.2,
                    weight: 0.3,
                },
            ],
        };

        let mut builder = UnifiedGraphBuilder::new();
        builder.set_reference(reference).unwrap();
        builder.add_target("tgt", &spike, 1.0, 2).unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn layout_shape_and_centering() {
        let graph = bridged_graph();
        let layout = SpectralLayout::default();
        let coords = layout.layout(&graph, None, 2).unwrap();

        assert_eq!(coords.nrows(), 7);
        assert_eq!(coords.ncols(), 2);
        for j in 0..2 {
            let mean: f32 = coords.column(j).mean();
            assert!(mean.abs() < 1e-4, "column {} not centred: {}", j, mean);
        }
    }

    #[test]
    fn first_coordinate_separates_the_two_communities() {
        let graph = bridged_graph();
        let layout = SpectralLayout {
            num_iter: 100,
            ..Default::default()
        };
        let coords = layout.layout(&graph, None, 1).unwrap();

        let left: f32 = (0..3).map(|i| coords[(i, 0)]).sum::<f32>() / 3.0;
        let right: f32 = (3..6).map(|i| coords[(i, 0)]).sum::<f32>() / 3.0;
        assert!(
            left * right < 0.0,
            "communities not separated: {} vs {}",
            left,
            right
        );

        // the spiked target lands on its cluster's side
        let target = coords[(6, 0)];
        assert!(target * left > 0.0, "target strayed from its cluster");
    }

    #[test]
    fn warm_start_is_accepted() {
        let graph = bridged_graph();
        let init = Mat::zeros(7, 2);
        let layout = SpectralLayout::default();
        assert!(layout.layout(&graph, Some(&init), 2).is_ok());

        let bad = Mat::zeros(3, 2);
        assert!(layout.layout(&graph, Some(&bad), 2).is_err());
    }
}
