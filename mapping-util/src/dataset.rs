//! Dataset container and the mapping session that projects targets onto a
//! reference.

use crate::attributes::AttributeTable;
use crate::errors::MappingError;
use crate::feature_align::{align_features, AlignOptions};
use crate::knn_query::{query_neighbors, NeighborEdges};
use crate::reference_index::ReferenceIndex;

use log::info;
use nalgebra::DMatrix;

pub type Mat = DMatrix<f32>;

/// Derived neighbour state persisted on a target dataset after a mapping
/// call with `persist` set (the saved-k semantic).
#[derive(Clone, Debug)]
pub struct SavedNeighbors {
    pub k: usize,
    pub edges: NeighborEdges,
}

/// One dataset: a feature schema, a dense feature matrix (features x cells),
/// and a per-cell attribute table.
#[derive(Debug)]
pub struct Dataset {
    pub name: Box<str>,
    pub feature_names: Vec<Box<str>>,
    pub cell_names: Vec<Box<str>>,
    pub data: Mat,
    pub attributes: AttributeTable,
    saved_neighbors: Option<SavedNeighbors>,
}

impl Dataset {
    pub fn new(
        name: &str,
        feature_names: Vec<Box<str>>,
        cell_names: Vec<Box<str>>,
        data: Mat,
        attributes: AttributeTable,
    ) -> anyhow::Result<Self> {
        if data.nrows() != feature_names.len() {
            return Err(MappingError::invalid_parameter(format!(
                "dataset '{}': {} matrix rows vs {} feature names",
                name,
                data.nrows(),
                feature_names.len()
            )));
        }
        if data.ncols() != cell_names.len() {
            return Err(MappingError::invalid_parameter(format!(
                "dataset '{}': {} matrix columns vs {} cell names",
                name,
                data.ncols(),
                cell_names.len()
            )));
        }
        if attributes.num_cells() != cell_names.len() {
            return Err(MappingError::invalid_parameter(format!(
                "dataset '{}': attribute table covers {} cells, expected {}",
                name,
                attributes.num_cells(),
                cell_names.len()
            )));
        }

        Ok(Self {
            name: name.into(),
            feature_names,
            cell_names,
            data,
            attributes,
            saved_neighbors: None,
        })
    }

    /// Dataset with no attributes beyond names
    pub fn from_matrix(
        name: &str,
        feature_names: Vec<Box<str>>,
        cell_names: Vec<Box<str>>,
        data: Mat,
    ) -> anyhow::Result<Self> {
        let num_cells = cell_names.len();
        Self::new(
            name,
            feature_names,
            cell_names,
            data,
            AttributeTable::new(num_cells),
        )
    }

    pub fn num_features(&self) -> usize {
        self.feature_names.len()
    }

    pub fn num_cells(&self) -> usize {
        self.cell_names.len()
    }

    pub fn saved_neighbors(&self) -> Option<&SavedNeighbors> {
        self.saved_neighbors.as_ref()
    }

    pub fn save_neighbors(&mut self, edges: NeighborEdges) {
        self.saved_neighbors = Some(SavedNeighbors {
            k: edges.k,
            edges,
        });
    }

    pub fn clear_saved_neighbors(&mut self) {
        self.saved_neighbors = None;
    }
}

/// Options for one target-mapping call
#[derive(Clone, Debug)]
pub struct MapOptions {
    pub knn: usize,
    pub align: AlignOptions,
    /// Persist `(k, edges)` into the target dataset's derived state
    pub persist: bool,
    pub block_size: Option<usize>,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            knn: 10,
            align: AlignOptions::default(),
            persist: false,
            block_size: None,
        }
    }
}

/// A mapping session: the reference dataset, an optional shared projection
/// basis, and the ANN index over (projected) reference cells.
///
/// The index is built once here and reused for every target; rebuilding
/// requires a new session. Passing the session by reference replaces any
/// ambient per-reference global state.
pub struct MappingSession<'a> {
    reference: &'a Dataset,
    basis: Option<Mat>,
    index: ReferenceIndex,
}

impl<'a> MappingSession<'a> {
    /// Build the session index over the reference cells.
    ///
    /// * `basis` - optional projection basis (features x dims); when given,
    ///   both reference and aligned target matrices are projected through it
    ///   before indexing/querying.
    pub fn new(reference: &'a Dataset, basis: Option<Mat>) -> anyhow::Result<Self> {
        if let Some(bb) = &basis {
            if bb.nrows() != reference.num_features() {
                return Err(MappingError::invalid_parameter(format!(
                    "basis has {} rows, reference has {} features",
                    bb.nrows(),
                    reference.num_features()
                )));
            }
        }

        let index = match &basis {
            Some(bb) => {
                let coords = bb.transpose() * &reference.data;
                info!(
                    "indexing {} reference cells in {} basis dimensions",
                    coords.ncols(),
                    coords.nrows()
                );
                ReferenceIndex::build(&coords)
            }
            None => {
                info!(
                    "indexing {} reference cells in raw feature space",
                    reference.num_cells()
                );
                ReferenceIndex::build(&reference.data)
            }
        };

        Ok(Self {
            reference,
            basis,
            index,
        })
    }

    pub fn reference(&self) -> &Dataset {
        self.reference
    }

    pub fn index(&self) -> &ReferenceIndex {
        &self.index
    }

    /// Project a feature-space matrix into the index space
    fn to_index_space(&self, aligned: &Mat) -> Mat {
        match &self.basis {
            Some(bb) => bb.transpose() * aligned,
            None => aligned.clone(),
        }
    }

    /// Align a target to the reference schema and query its k nearest
    /// reference cells.
    ///
    /// Fully succeeds or leaves the target untouched: derived state is
    /// written only after alignment and query both complete.
    pub fn map_target(
        &self,
        target: &mut Dataset,
        options: &MapOptions,
    ) -> anyhow::Result<NeighborEdges> {
        let aligned = align_features(self.reference, target, &options.align)?;
        let coords = self.to_index_space(&aligned.matrix);
        let edges = query_neighbors(&self.index, &coords, options.knn, options.block_size)?;

        if options.persist {
            target.save_neighbors(edges.clone());
            info!(
                "saved k={} neighbour edges on dataset '{}'",
                edges.k, target.name
            );
        }
        Ok(edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttributeTable;

    fn names(prefix: &str, n: usize) -> Vec<Box<str>> {
        (0..n).map(|i| format!("{}{}", prefix, i).into()).collect()
    }

    #[test]
    fn dimension_checks() {
        let data = Mat::zeros(3, 2);
        assert!(Dataset::from_matrix("d", names("g", 3), names("c", 2), data.clone()).is_ok());
        assert!(Dataset::from_matrix("d", names("g", 2), names("c", 2), data.clone()).is_err());
        assert!(Dataset::from_matrix("d", names("g", 3), names("c", 3), data.clone()).is_err());

        let err = Dataset::new(
            "d",
            names("g", 3),
            names("c", 2),
            data,
            AttributeTable::new(5),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MappingError>(),
            Some(MappingError::InvalidParameter(_))
        ));
    }

    #[test]
    fn persist_saves_derived_state_only_on_success() {
        let ref_data = Mat::from_row_slice(2, 4, &[0.0, 1.0, 2.0, 3.0, 0.0, 1.0, 2.0, 3.0]);
        let reference =
            Dataset::from_matrix("ref", names("g", 2), names("r", 4), ref_data).unwrap();

        let tgt_data = Mat::from_row_slice(2, 2, &[0.1, 2.9, 0.1, 2.9]);
        let mut target =
            Dataset::from_matrix("tgt", names("g", 2), names("t", 2), tgt_data).unwrap();

        let session = MappingSession::new(&reference, None).unwrap();

        // k too large: fails, no derived state
        let bad = MapOptions {
            knn: 10,
            persist: true,
            ..Default::default()
        };
        assert!(session.map_target(&mut target, &bad).is_err());
        assert!(target.saved_neighbors().is_none());

        let good = MapOptions {
            knn: 2,
            persist: true,
            ..Default::default()
        };
        let edges = session.map_target(&mut target, &good).unwrap();
        assert_eq!(edges.num_targets, 2);

        let saved = target.saved_neighbors().unwrap();
        assert_eq!(saved.k, 2);
        assert_eq!(saved.edges.num_edges(), 4);
    }

    #[test]
    fn basis_projection_changes_index_space() {
        let ref_data = Mat::from_row_slice(3, 3, &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        let reference =
            Dataset::from_matrix("ref", names("g", 3), names("r", 3), ref_data).unwrap();

        let basis = Mat::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        let session = MappingSession::new(&reference, Some(basis)).unwrap();
        assert_eq!(session.index().dim(), 2);

        let wrong_basis = Mat::zeros(4, 2);
        assert!(MappingSession::new(&reference, Some(wrong_basis)).is_err());
    }
}
