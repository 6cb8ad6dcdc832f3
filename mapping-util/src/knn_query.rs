//! k-nearest-neighbour queries of target cells against a reference index.

use crate::errors::MappingError;
use crate::reference_index::ReferenceIndex;

use indicatif::ParallelProgressIterator;
use log::info;
use nalgebra::DMatrix;
use rayon::prelude::*;

const DEFAULT_BLOCK_SIZE: usize = 1000;

/// One directed target -> reference edge
#[derive(Clone, Copy, Debug)]
pub struct NeighborEdge {
    pub target: usize,
    pub reference: usize,
    pub distance: f32,
    pub weight: f32,
}

/// Neighbour-query output: exactly `k` consecutive edges per target cell,
/// distances non-decreasing within each target's slice.
///
/// Weights are a softmax of `-distance / sigma` within each target's slice
/// (sigma = median edge distance over all edges), so every target cell
/// carries total weight 1 across its k edges.
#[derive(Clone, Debug)]
pub struct NeighborEdges {
    pub k: usize,
    pub num_targets: usize,
    pub num_references: usize,
    pub edges: Vec<NeighborEdge>,
}

impl NeighborEdges {
    /// The k edges of one target cell
    pub fn edges_of(&self, target: usize) -> &[NeighborEdge] {
        &self.edges[target * self.k..(target + 1) * self.k]
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }
}

/// Query `k` nearest reference cells for every column of `aligned`.
///
/// * `index` - prebuilt reference index (read-only, shared across threads)
/// * `aligned` - target coordinates (d x n), same space as the index
/// * `knn` - number of neighbours, `1 <= knn <= index.len()`
/// * `block_size` - cells per parallel job
///
/// Each target cell is independent and written to its own output slot, so
/// no cross-cell ordering is imposed during the parallel phase.
pub fn query_neighbors(
    index: &ReferenceIndex,
    aligned: &DMatrix<f32>,
    knn: usize,
    block_size: Option<usize>,
) -> anyhow::Result<NeighborEdges> {
    if knn < 1 {
        return Err(MappingError::invalid_parameter("knn must be at least 1"));
    }
    if knn > index.len() {
        return Err(MappingError::invalid_parameter(format!(
            "knn = {} exceeds the reference population size {}",
            knn,
            index.len()
        )));
    }
    if aligned.nrows() != index.dim() {
        return Err(MappingError::invalid_parameter(format!(
            "query dimension {} does not match index dimension {}",
            aligned.nrows(),
            index.dim()
        )));
    }

    let nn = aligned.ncols();
    let jobs = create_jobs(nn, block_size.unwrap_or(DEFAULT_BLOCK_SIZE));
    let njobs = jobs.len() as u64;

    let hits: Vec<Vec<(usize, usize, f32)>> = jobs
        .into_par_iter()
        .progress_count(njobs)
        .map(|(lb, ub)| -> anyhow::Result<Vec<(usize, usize, f32)>> {
            let mut ret = Vec::with_capacity((ub - lb) * knn);
            for i in lb..ub {
                let query: Vec<f32> = aligned.column(i).iter().cloned().collect();
                let (indices, distances) = index.search(&query, knn);
                if indices.len() != knn {
                    return Err(anyhow::anyhow!(
                        "index returned {} neighbours for cell {}, expected {}",
                        indices.len(),
                        i,
                        knn
                    ));
                }
                ret.extend(
                    indices
                        .into_iter()
                        .zip(distances)
                        .map(|(j, d_ij)| (i, j, d_ij)),
                );
            }
            Ok(ret)
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let triplets: Vec<(usize, usize, f32)> = hits.into_iter().flatten().collect();

    info!("{} target-reference edges by kNN matching", triplets.len());

    let sigma = median_f32(&triplets.iter().map(|&(_, _, d)| d).collect::<Vec<_>>());
    let sigma = if sigma > 0.0 { sigma } else { 1.0 };

    let mut edges = Vec::with_capacity(triplets.len());
    for chunk in triplets.chunks(knn) {
        let logits: Vec<f32> = chunk.iter().map(|&(_, _, d)| -d / sigma).collect();
        let max_logit = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let denom: f32 = logits.iter().map(|&l| (l - max_logit).exp()).sum();

        for (&(i, j, d), &l) in chunk.iter().zip(logits.iter()) {
            edges.push(NeighborEdge {
                target: i,
                reference: j,
                distance: d,
                weight: (l - max_logit).exp() / denom,
            });
        }
    }

    Ok(NeighborEdges {
        k: knn,
        num_targets: nn,
        num_references: index.len(),
        edges,
    })
}

fn median_f32(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

fn create_jobs(ntot: usize, block_size: usize) -> Vec<(usize, usize)> {
    let block_size = if block_size == 0 {
        DEFAULT_BLOCK_SIZE
    } else {
        block_size
    };
    let nblock = ntot.div_ceil(block_size);
    (0..nblock)
        .map(|block| {
            let lb = block * block_size;
            let ub = ((block + 1) * block_size).min(ntot);
            (lb, ub)
        })
        .collect()
}
