//! Spiked-graph construction: the reference affinity graph plus
//! target-to-reference edges, for joint re-embedding of both populations.
//!
//! Target cells attach only to reference cells; target-target edges are
//! never created, so the reference manifold is not distorted by structure
//! within the projected population.

use crate::errors::MappingError;
use crate::knn_query::NeighborEdges;

use log::info;
use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CscMatrix};

/// Existing reference-reference affinity graph (edge list, canonical
/// `i < j` pairs)
#[derive(Clone, Debug)]
pub struct ReferenceGraph {
    num_nodes: usize,
    edges: Vec<(usize, usize)>,
    weights: Vec<f32>,
}

impl ReferenceGraph {
    /// Canonicalizes each pair to `i < j`; self-loops and out-of-range
    /// indexes are rejected.
    pub fn new(
        num_nodes: usize,
        edges: Vec<(usize, usize)>,
        weights: Vec<f32>,
    ) -> anyhow::Result<Self> {
        if edges.len() != weights.len() {
            return Err(MappingError::invalid_parameter(format!(
                "{} edges vs {} weights",
                edges.len(),
                weights.len()
            )));
        }

        let mut canonical = Vec::with_capacity(edges.len());
        for &(i, j) in edges.iter() {
            if i == j {
                return Err(MappingError::invalid_parameter(format!(
                    "self-loop on reference node {}",
                    i
                )));
            }
            if i >= num_nodes || j >= num_nodes {
                return Err(MappingError::invalid_parameter(format!(
                    "edge ({}, {}) outside {} reference nodes",
                    i, j, num_nodes
                )));
            }
            canonical.push((i.min(j), i.max(j)));
        }

        Ok(Self {
            num_nodes,
            edges: canonical,
            weights,
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }
}

/// Edges of one target dataset, already capped and scaled
#[derive(Clone, Debug)]
struct TargetSpike {
    name: Box<str>,
    num_cells: usize,
    /// (local target index, reference index, scaled weight)
    edges: Vec<(usize, usize, f32)>,
}

/// Builder state machine:
/// `new` -> `set_reference` -> `add_target`* -> `build`.
///
/// Re-adding an existing target name replaces its edges. Each `add_target`
/// either fully succeeds or leaves the builder untouched. One builder owns
/// its edge set; concurrent spiking of the same builder must go through
/// `&mut self` and is therefore serialized by construction.
#[derive(Default)]
pub struct UnifiedGraphBuilder {
    reference: Option<ReferenceGraph>,
    spikes: Vec<TargetSpike>,
}

impl UnifiedGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reference(&mut self, graph: ReferenceGraph) -> anyhow::Result<()> {
        if self.reference.is_some() {
            return Err(MappingError::invalid_parameter(
                "reference graph already set",
            ));
        }
        self.reference = Some(graph);
        Ok(())
    }

    /// Add (or replace) one target dataset's spike edges.
    ///
    /// * `edges` - neighbour-query output for this target
    /// * `weight_scale` - multiplier applied to the kept edge weights
    /// * `use_k` - per-cell retained edge count, `1 <= use_k <= edges.k`
    pub fn add_target(
        &mut self,
        name: &str,
        edges: &NeighborEdges,
        weight_scale: f32,
        use_k: usize,
    ) -> anyhow::Result<()> {
        let reference = self.reference.as_ref().ok_or_else(|| {
            MappingError::InvalidParameter("add_target before set_reference".into())
        })?;

        if !weight_scale.is_finite() || weight_scale < 0.0 {
            return Err(MappingError::invalid_parameter(format!(
                "negative or non-finite weight scale {}",
                weight_scale
            )));
        }
        if use_k < 1 || use_k > edges.k {
            return Err(MappingError::invalid_parameter(format!(
                "use_k = {} outside [1, {}]",
                use_k, edges.k
            )));
        }
        if edges.num_references != reference.num_nodes() {
            return Err(MappingError::invalid_parameter(format!(
                "edges reference {} cells, graph has {}",
                edges.num_references,
                reference.num_nodes()
            )));
        }

        // construct the full spike before touching the builder
        let mut spike_edges = Vec::with_capacity(edges.num_targets * use_k);
        for t in 0..edges.num_targets {
            let mut kept = edges.edges_of(t).to_vec();
            kept.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap());
            kept.truncate(use_k);
            for e in kept {
                spike_edges.push((t, e.reference, e.weight * weight_scale));
            }
        }

        let spike = TargetSpike {
            name: name.into(),
            num_cells: edges.num_targets,
            edges: spike_edges,
        };

        match self.spikes.iter_mut().find(|s| s.name.as_ref() == name) {
            Some(existing) => {
                info!("replacing spike edges of target '{}'", name);
                *existing = spike;
            }
            None => self.spikes.push(spike),
        }
        Ok(())
    }

    pub fn num_targets(&self) -> usize {
        self.spikes.len()
    }

    /// Spike edge count for one target name
    pub fn target_edge_count(&self, name: &str) -> Option<usize> {
        self.spikes
            .iter()
            .find(|s| s.name.as_ref() == name)
            .map(|s| s.edges.len())
    }

    /// Assemble the combined graph. Reference-reference edges are copied
    /// unchanged; vertex order is reference cells first, then each target
    /// block in insertion order.
    pub fn build(&self) -> anyhow::Result<UnifiedGraph> {
        let reference = self
            .reference
            .as_ref()
            .ok_or_else(|| MappingError::InvalidParameter("build before set_reference".into()))?;

        let n_ref = reference.num_nodes();
        let mut targets = Vec::with_capacity(self.spikes.len());
        let mut offset = n_ref;
        for spike in self.spikes.iter() {
            targets.push(TargetBlock {
                name: spike.name.clone(),
                offset,
                num_cells: spike.num_cells,
            });
            offset += spike.num_cells;
        }
        let n_total = offset;

        let mut coo = CooMatrix::new(n_total, n_total);
        for (&(i, j), &w) in reference.edges.iter().zip(reference.weights.iter()) {
            coo.push(i, j, w);
            coo.push(j, i, w);
        }
        for (spike, block) in self.spikes.iter().zip(targets.iter()) {
            for &(t, r, w) in spike.edges.iter() {
                let v = block.offset + t;
                coo.push(v, r, w);
                coo.push(r, v, w);
            }
        }

        let adjacency = CscMatrix::from(&coo);

        info!(
            "unified graph: {} reference + {} target vertices, {} stored entries",
            n_ref,
            n_total - n_ref,
            adjacency.nnz()
        );

        Ok(UnifiedGraph {
            adjacency,
            num_reference: n_ref,
            targets,
        })
    }
}

/// Contiguous vertex block of one target dataset
#[derive(Clone, Debug)]
pub struct TargetBlock {
    pub name: Box<str>,
    pub offset: usize,
    pub num_cells: usize,
}

/// The combined reference + target graph, ready for layout
pub struct UnifiedGraph {
    /// Symmetric weighted adjacency (n_total x n_total)
    pub adjacency: CscMatrix<f32>,
    pub num_reference: usize,
    pub targets: Vec<TargetBlock>,
}

impl UnifiedGraph {
    pub fn num_vertices(&self) -> usize {
        self.adjacency.ncols()
    }

    pub fn num_target_cells(&self) -> usize {
        self.targets.iter().map(|b| b.num_cells).sum()
    }

    /// Neighbours of a vertex from the CSC adjacency
    pub fn neighbors(&self, vertex: usize) -> &[usize] {
        let offsets = self.adjacency.col_offsets();
        let start = offsets[vertex];
        let end = offsets[vertex + 1];
        &self.adjacency.row_indices()[start..end]
    }

    /// Total edge weight of a vertex
    pub fn degree(&self, vertex: usize) -> f32 {
        let offsets = self.adjacency.col_offsets();
        let start = offsets[vertex];
        let end = offsets[vertex + 1];
        self.adjacency.values()[start..end].iter().sum()
    }

    /// Which dataset a vertex belongs to: `None` for reference cells
    pub fn dataset_of(&self, vertex: usize) -> Option<&str> {
        self.targets
            .iter()
            .find(|b| vertex >= b.offset && vertex < b.offset + b.num_cells)
            .map(|b| b.name.as_ref())
    }
}

/// External layout collaborator: weighted graph (+ optional warm-start
/// coordinates) to low-dimensional coordinates, one row per vertex.
pub trait GraphLayout {
    fn layout(
        &self,
        graph: &UnifiedGraph,
        init: Option<&DMatrix<f32>>,
        dims: usize,
    ) -> anyhow::Result<DMatrix<f32>>;
}
